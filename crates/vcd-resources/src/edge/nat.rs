//! NSX-T NAT rule.
//!
//! The remote allows several rules with the same name on one gateway, so a
//! name-based import can be ambiguous. The error lists every candidate and
//! the user re-imports by URN.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use vcd_kernel::{
    AttrValue, Attribute, ImportForm, ImportPath, ImportedResource, KernelError, KernelResult,
    LockKey, PathScope, ResolvedParent, ResourceData, ResourceDescriptor, ResourceKind, Schema,
    Session, validate,
};
use vcd_sdk::{Entity, EntityKind, Query};

use super::{edge_import_attributes, edge_lock, resolve_edge};
use crate::common::{self, EDGE_GATEWAY_ID, bool_at, int_at, str_at};
use crate::kinds;

const RULE_TYPES: &[&str] = &["DNAT", "NO_DNAT", "SNAT", "NO_SNAT", "REFLEXIVE"];
const FIREWALL_MATCH: &[&str] = &["MATCH_INTERNAL_ADDRESS", "MATCH_EXTERNAL_ADDRESS", "BYPASS"];

const FORMS: &[ImportForm] = &[ImportForm::new(
    PathScope::EdgeGateway,
    &["org-name", "vdc-or-vdc-group-name", "edge-gateway-name", "nat-rule-name-or-id"],
)];

fn check_rule_type(value: &AttrValue) -> Result<(), String> {
    validate::one_of(value, RULE_TYPES)
}

fn check_firewall_match(value: &AttrValue) -> Result<(), String> {
    validate::one_of(value, FIREWALL_MATCH)
}

fn schema() -> Schema {
    Schema::new([
        common::org(),
        common::edge_gateway_id(),
        common::name(),
        common::description(),
        Attribute::string("rule_type")
            .required()
            .force_new()
            .validate(check_rule_type),
        Attribute::string("external_address").validate(validate::ip_or_cidr),
        Attribute::string("internal_address").validate(validate::ip_or_cidr),
        Attribute::string("app_port_profile_id").validate(validate::urn),
        Attribute::string("dnat_external_port").validate(validate::port_or_range),
        Attribute::string("snat_destination_address").validate(validate::ip_or_cidr),
        Attribute::bool("logging").default(false),
        Attribute::bool("enabled").default(true),
        Attribute::string("firewall_match")
            .optional_computed()
            .validate(check_firewall_match),
        Attribute::int("priority").optional_computed(),
    ])
}

pub struct NatRule {
    schema: Arc<Schema>,
}

impl NatRule {
    pub fn new() -> Self {
        Self {
            schema: Arc::new(schema()),
        }
    }
}

impl Default for NatRule {
    fn default() -> Self {
        Self::new()
    }
}

fn candidate_row(rule: &Entity) -> Vec<String> {
    let body = &rule.body;
    vec![
        rule.id.to_string(),
        rule.name.clone(),
        str_at(body, "/ruleType").unwrap_or_default().to_string(),
        str_at(body, "/internalAddresses").unwrap_or_default().to_string(),
        str_at(body, "/externalAddresses").unwrap_or_default().to_string(),
    ]
}

#[async_trait]
impl ResourceDescriptor for NatRule {
    fn kind(&self) -> ResourceKind {
        kinds::NAT_RULE
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::NatRule
    }

    fn import_forms(&self) -> &'static [ImportForm] {
        FORMS
    }

    fn validate(&self, bag: &ResourceData) -> KernelResult<()> {
        let rule_type = bag.get_str("rule_type").unwrap_or_default();
        if rule_type != "NO_SNAT" && !bag.is_set("external_address") {
            return Err(KernelError::validation(format!(
                "`external_address` is required for {rule_type} rules"
            )));
        }
        if rule_type != "NO_DNAT" && !bag.is_set("internal_address") {
            return Err(KernelError::validation(format!(
                "`internal_address` is required for {rule_type} rules"
            )));
        }
        if bag.is_set("dnat_external_port") && rule_type != "DNAT" {
            return Err(KernelError::validation(
                "`dnat_external_port` only applies to DNAT rules",
            ));
        }
        Ok(())
    }

    async fn resolve_parent(&self, session: &Session, bag: &ResourceData) -> KernelResult<ResolvedParent> {
        resolve_edge(session, bag).await
    }

    fn lock_keys(&self, _bag: &ResourceData, parent: &ResolvedParent) -> Vec<LockKey> {
        edge_lock(parent)
    }

    fn to_payload(&self, bag: &ResourceData, _parent: &ResolvedParent) -> KernelResult<Value> {
        let profile = bag
            .get_str("app_port_profile_id")
            .map_or(Value::Null, |id| json!({"id": id}));
        Ok(json!({
            "name": bag.require_str("name")?,
            "description": bag.get_string("description"),
            "ruleType": bag.require_str("rule_type")?,
            "externalAddresses": bag.get_string("external_address"),
            "internalAddresses": bag.get_string("internal_address"),
            "applicationPortProfile": profile,
            "dnatExternalPort": bag.get_string("dnat_external_port"),
            "snatDestinationAddresses": bag.get_string("snat_destination_address"),
            "logging": bag.get_bool("logging"),
            "enabled": bag.get_bool("enabled"),
            "firewallMatch": common::opt_str(bag, "firewall_match"),
            "priority": bag.get_int("priority"),
        }))
    }

    fn from_payload(&self, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        let body = &entity.body;
        bag.set("name", entity.name.as_str())?;
        if let Some(edge) = &entity.parent {
            bag.set(EDGE_GATEWAY_ID, edge.to_string())?;
        }
        bag.set("description", str_at(body, "/description"))?;
        bag.set("rule_type", str_at(body, "/ruleType"))?;
        bag.set("external_address", common::canonical(str_at(body, "/externalAddresses")))?;
        bag.set("internal_address", common::canonical(str_at(body, "/internalAddresses")))?;
        bag.set("app_port_profile_id", str_at(body, "/applicationPortProfile/id"))?;
        bag.set("dnat_external_port", str_at(body, "/dnatExternalPort"))?;
        bag.set(
            "snat_destination_address",
            common::canonical(str_at(body, "/snatDestinationAddresses")),
        )?;
        bag.set("logging", bool_at(body, "/logging"))?;
        bag.set("enabled", bool_at(body, "/enabled"))?;
        bag.set("firewall_match", str_at(body, "/firewallMatch"))?;
        bag.set("priority", int_at(body, "/priority"))
    }

    async fn import(&self, session: &Session, path: &ImportPath) -> KernelResult<ImportedResource> {
        path.classify(FORMS)?;
        let (org, _owner, edge) = common::edge_from_path(session, path).await?;
        let rule = match path.last_as_urn() {
            Some(_) => common::child_from_path(session, &edge.id, EntityKind::NatRule, path).await?,
            None => {
                let query = Query::of(EntityKind::NatRule).under(&edge.id).named(path.last());
                common::find_unique(
                    session,
                    query,
                    &["ID", "Name", "Rule Type", "Internal", "External"],
                    candidate_row,
                )
                .await?
            }
        };
        Ok(ImportedResource {
            id: rule.id.to_string(),
            attributes: edge_import_attributes(&org, &edge),
        })
    }
}
