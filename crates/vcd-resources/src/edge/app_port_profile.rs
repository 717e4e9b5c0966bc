//! NSX-T application port profile.
//!
//! PROVIDER profiles live on an NSX-T manager and are managed from the System
//! org; TENANT profiles live in a VDC or VDC group.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use vcd_kernel::identity::{SYSTEM_ORG, check_scope};
use vcd_kernel::{
    AttrMap, AttrValue, Attribute, ImportForm, ImportPath, ImportedResource, KernelError,
    KernelResult, OwnerRules, ParentContext, PathScope, RecordExt, ResolvedParent, ResourceData,
    ResourceDescriptor, ResourceKind, Schema, Session, VdcOrGroup, attrs, validate,
};
use vcd_sdk::{Entity, EntityKind};

use crate::common::{self, str_at, strings_at};
use crate::kinds;

const CONTEXT_ID: &str = "context_id";
const APP_PORT: &str = "app_port";

const FORMS: &[ImportForm] = &[
    ImportForm::new(PathScope::Provider, &["nsxt-manager-name", "profile-name"]),
    ImportForm::new(
        PathScope::Tenant,
        &["org-name", "vdc-or-vdc-group-name", "profile-name"],
    ),
];

fn check_scope_value(value: &AttrValue) -> Result<(), String> {
    validate::one_of(value, &["PROVIDER", "TENANT"])
}

fn check_protocol(value: &AttrValue) -> Result<(), String> {
    validate::one_of(value, &["ICMPv4", "ICMPv6", "TCP", "UDP"])
}

fn schema() -> Schema {
    Schema::new([
        common::org(),
        Attribute::string(CONTEXT_ID)
            .optional_computed()
            .force_new()
            .validate(validate::urn)
            .describe("NSX-T manager for PROVIDER scope, VDC or VDC group for TENANT scope"),
        common::name(),
        common::description(),
        Attribute::string("scope")
            .required()
            .force_new()
            .validate(check_scope_value),
        Attribute::records(
            APP_PORT,
            Schema::new([
                Attribute::string("protocol").required().validate(check_protocol),
                Attribute::string_set("port").validate(validate::ports),
            ]),
        )
        .required()
        .unordered(),
    ])
}

pub struct AppPortProfile {
    schema: Arc<Schema>,
}

impl AppPortProfile {
    pub fn new() -> Self {
        Self {
            schema: Arc::new(schema()),
        }
    }

    async fn tenant_owner(&self, session: &Session, bag: &ResourceData) -> KernelResult<(ParentContext, VdcOrGroup)> {
        let Some(raw) = bag.get_str(CONTEXT_ID) else {
            return session.resolver().resolve_owner(bag, OwnerRules::default()).await;
        };
        let org = session.resolver().org(bag).await?;
        let owner = VdcOrGroup::from_entity(session.fetch(&session.urn(raw)?).await?)?;
        if owner.entity().parent.as_ref() != Some(&org.id) {
            return Err(KernelError::validation(format!(
                "{CONTEXT_ID} {raw} does not belong to org '{}'",
                org.name
            )));
        }
        Ok((owner.context(&org.name), owner))
    }
}

impl Default for AppPortProfile {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDescriptor for AppPortProfile {
    fn kind(&self) -> ResourceKind {
        kinds::APP_PORT_PROFILE
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::AppPortProfile
    }

    fn import_forms(&self) -> &'static [ImportForm] {
        FORMS
    }

    fn validate(&self, bag: &ResourceData) -> KernelResult<()> {
        if bag.get_str("scope") == Some("PROVIDER") && !bag.is_set(CONTEXT_ID) {
            return Err(KernelError::validation(format!(
                "PROVIDER scope needs `{CONTEXT_ID}` set to an NSX-T manager URN"
            )));
        }
        Ok(())
    }

    async fn resolve_parent(&self, session: &Session, bag: &ResourceData) -> KernelResult<ResolvedParent> {
        let scope = bag.require_str("scope")?;
        let org = session.resolver().org_name(bag)?;
        check_scope(scope, &org)?;
        if scope == "PROVIDER" {
            let manager = session.fetch(&session.urn(bag.require_str(CONTEXT_ID)?)?).await?;
            if manager.kind != EntityKind::NsxtManager {
                return Err(KernelError::validation(format!(
                    "{} is not an NSX-T manager",
                    manager.id
                )));
            }
            let context = ParentContext::NsxtManager {
                manager: manager.id.clone(),
            };
            return Ok(ResolvedParent::new(context, Some(manager)));
        }
        let (context, owner) = self.tenant_owner(session, bag).await?;
        Ok(ResolvedParent::new(context, Some(owner.entity().clone())))
    }

    fn to_payload(&self, bag: &ResourceData, parent: &ResolvedParent) -> KernelResult<Value> {
        let context = parent.require_container()?;
        let ports: Vec<Value> = bag
            .get_records(APP_PORT)
            .iter()
            .map(|port| {
                let mut destinations = port.strings_of("port");
                destinations.sort();
                json!({
                    "protocol": port.str_of("protocol"),
                    "destinationPorts": destinations,
                })
            })
            .collect();
        Ok(json!({
            "name": bag.require_str("name")?,
            "description": bag.get_string("description"),
            "scope": bag.require_str("scope")?,
            "contextEntityId": context.id,
            "applicationPorts": ports,
        }))
    }

    fn from_payload(&self, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        let body = &entity.body;
        bag.set("name", entity.name.as_str())?;
        bag.set("description", str_at(body, "/description"))?;
        bag.set("scope", str_at(body, "/scope"))?;
        bag.set(CONTEXT_ID, str_at(body, "/contextEntityId"))?;
        let ports: Vec<AttrMap> = body
            .get("applicationPorts")
            .and_then(Value::as_array)
            .map(|ports| {
                ports
                    .iter()
                    .map(|port| {
                        attrs! {
                            "protocol" => str_at(port, "/protocol"),
                            "port" => AttrValue::set(strings_at(port, "/destinationPorts")),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        bag.set(APP_PORT, ports)
    }

    async fn import(&self, session: &Session, path: &ImportPath) -> KernelResult<ImportedResource> {
        let form = path.classify(FORMS)?;
        let (org, parent) = match form.scope {
            PathScope::Provider => {
                let manager = session.resolver().nsxt_manager_by_name(path.segment(0)).await?;
                (SYSTEM_ORG.to_string(), manager.id)
            }
            _ => {
                let (org, owner) = common::owner_from_path(session, path).await?;
                (org.name, owner.id().clone())
            }
        };
        let profile = common::child_from_path(session, &parent, EntityKind::AppPortProfile, path).await?;
        Ok(ImportedResource {
            id: profile.id.to_string(),
            attributes: attrs! { common::ORG => org },
        })
    }
}
