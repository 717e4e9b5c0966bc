//! DNS forwarder configuration of an NSX-T edge gateway.
//!
//! Not an object of its own: Create and Update write the section, Delete puts
//! the disabled default back.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use vcd_kernel::{
    AttrMap, AttrValue, Attribute, ImportForm, ImportPath, ImportedResource, KernelResult,
    Lifecycle, LockKey, PathScope, RecordExt, ResolvedParent, ResourceData, ResourceDescriptor,
    ResourceKind, Schema, Session, attrs, validate,
};
use vcd_sdk::{ConfigSection, Entity, EntityKind};

use super::{edge_from_path, edge_import_attributes, edge_lock, resolve_edge};
use crate::common::{self, EDGE_GATEWAY_ID, bool_at, str_at, strings_at};
use crate::kinds;

const DEFAULT_ZONE: &str = "default_forwarder_zone";
const CONDITIONAL_ZONE: &str = "conditional_forwarder_zone";

const FORMS: &[ImportForm] = &[ImportForm::new(
    PathScope::Tenant,
    &["org-name", "vdc-or-vdc-group-name", "edge-gateway-name"],
)];

fn zone_schema(with_domains: bool) -> Schema {
    let schema = Schema::new([
        Attribute::string("name").required(),
        Attribute::string_set("upstream_servers")
            .required()
            .max_items(3)
            .validate(validate::ip_addresses),
    ]);
    if with_domains {
        schema.with([Attribute::string_set("domain_names").required()])
    } else {
        schema
    }
}

fn schema() -> Schema {
    Schema::new([
        common::org(),
        common::edge_gateway_id(),
        Attribute::bool("enabled").default(true),
        Attribute::string("listener_ip")
            .computed()
            .describe("Address the forwarder listens on"),
        Attribute::bool("snat_rule_enabled").default(false),
        Attribute::string("snat_rule_ip_address")
            .validate(validate::ip_address)
            .min_api_version(38, 0),
        Attribute::records(DEFAULT_ZONE, zone_schema(false))
            .required()
            .max_items(1),
        Attribute::records(CONDITIONAL_ZONE, zone_schema(true))
            .max_items(5)
            .unordered(),
    ])
}

fn zone_payload(zone: &AttrMap) -> Value {
    let mut servers = zone.strings_of("upstream_servers");
    servers.sort();
    let mut body = json!({
        "displayName": zone.str_of("name"),
        "upstreamServers": servers,
    });
    if zone.contains_key("domain_names") {
        let mut domains = zone.strings_of("domain_names");
        domains.sort();
        body["dnsDomainNames"] = json!(domains);
    }
    body
}

fn zone_record(zone: &Value, with_domains: bool) -> AttrMap {
    let mut record = attrs! {
        "name" => str_at(zone, "/displayName"),
        "upstream_servers" => AttrValue::set(strings_at(zone, "/upstreamServers")),
    };
    if with_domains {
        record.insert(
            "domain_names".into(),
            AttrValue::set(strings_at(zone, "/dnsDomainNames")),
        );
    }
    record
}

pub struct DnsForwarder {
    schema: Arc<Schema>,
}

impl DnsForwarder {
    pub fn new() -> Self {
        Self {
            schema: Arc::new(schema()),
        }
    }
}

impl Default for DnsForwarder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDescriptor for DnsForwarder {
    fn kind(&self) -> ResourceKind {
        kinds::EDGE_DNS
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Config
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::ParentConfig(ConfigSection::DnsForwarder)
    }

    fn import_forms(&self) -> &'static [ImportForm] {
        FORMS
    }

    async fn resolve_parent(&self, session: &Session, bag: &ResourceData) -> KernelResult<ResolvedParent> {
        resolve_edge(session, bag).await
    }

    fn lock_keys(&self, _bag: &ResourceData, parent: &ResolvedParent) -> Vec<LockKey> {
        edge_lock(parent)
    }

    fn to_payload(&self, bag: &ResourceData, _parent: &ResolvedParent) -> KernelResult<Value> {
        let default_zone = bag
            .get_records(DEFAULT_ZONE)
            .first()
            .map_or(Value::Null, zone_payload);
        let conditional: Vec<Value> = bag
            .get_records(CONDITIONAL_ZONE)
            .iter()
            .map(zone_payload)
            .collect();
        Ok(json!({
            "enabled": bag.get_bool("enabled"),
            "listenerIp": Value::Null,
            "snatRuleEnabled": bag.get_bool("snat_rule_enabled"),
            "snatRuleIpAddress": common::opt_str(bag, "snat_rule_ip_address"),
            "defaultForwarderZone": default_zone,
            "conditionalForwarderZones": conditional,
        }))
    }

    fn from_payload(&self, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        let body = &entity.body;
        bag.set(EDGE_GATEWAY_ID, entity.id.to_string())?;
        bag.set("enabled", bool_at(body, "/enabled"))?;
        bag.set("listener_ip", str_at(body, "/listenerIp"))?;
        bag.set("snat_rule_enabled", bool_at(body, "/snatRuleEnabled"))?;
        bag.set("snat_rule_ip_address", str_at(body, "/snatRuleIpAddress"))?;
        let default_zone: Vec<AttrMap> = body
            .get("defaultForwarderZone")
            .filter(|zone| !zone.is_null())
            .map(|zone| vec![zone_record(zone, false)])
            .unwrap_or_default();
        bag.set(DEFAULT_ZONE, default_zone)?;
        let conditional: Vec<AttrMap> = body
            .get("conditionalForwarderZones")
            .and_then(Value::as_array)
            .map(|zones| zones.iter().map(|zone| zone_record(zone, true)).collect())
            .unwrap_or_default();
        bag.set(CONDITIONAL_ZONE, conditional)
    }

    fn reset_payload(&self) -> Value {
        json!({
            "enabled": false,
            "listenerIp": null,
            "snatRuleEnabled": false,
            "snatRuleIpAddress": null,
            "defaultForwarderZone": null,
            "conditionalForwarderZones": [],
        })
    }

    async fn import(&self, session: &Session, path: &ImportPath) -> KernelResult<ImportedResource> {
        path.classify(FORMS)?;
        let (org, edge) = edge_from_path(session, path).await?;
        Ok(ImportedResource {
            id: edge.id.to_string(),
            attributes: edge_import_attributes(&org, &edge),
        })
    }
}
