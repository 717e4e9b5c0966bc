//! NSX-T imported network backed by a logical switch or a distributed port
//! group.
//!
//! Port groups are only visible to a single VDC, so a VDC group owner is
//! rejected for them before anything is looked up.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use vcd_kernel::metadata::metadata_attributes;
use vcd_kernel::{
    Attribute, ImportForm, ImportPath, ImportedResource, KernelError, KernelResult, MetadataStyle,
    OwnerRules, PathScope, ResolvedParent, ResourceData, ResourceDescriptor, ResourceKind, Schema,
    Session, attrs,
};
use vcd_sdk::{Entity, EntityKind};

use super::{check_pools, ensure_network_type, read_common, read_subnet, subnet_attributes, subnet_payload};
use crate::common::{self, str_at};
use crate::kinds;

const NETWORK_TYPE: &str = "OPAQUE";
const LOGICAL_SWITCH: &str = "nsxt_logical_switch_name";
const PORT_GROUP: &str = "dvpg_name";
const BACKINGS: &[&str] = &[LOGICAL_SWITCH, PORT_GROUP];

const FORMS: &[ImportForm] = &[ImportForm::new(
    PathScope::Tenant,
    &["org-name", "vdc-or-vdc-group-name", "network-name"],
)];

/// Backing attribute in use and the remote backing type it maps to.
fn backing(bag: &ResourceData) -> KernelResult<(&'static str, &'static str, &str)> {
    if let Some(name) = bag.get_str(LOGICAL_SWITCH) {
        return Ok((LOGICAL_SWITCH, "NSXT_LOGICAL_SWITCH", name));
    }
    if let Some(name) = bag.get_str(PORT_GROUP) {
        return Ok((PORT_GROUP, "DV_PORTGROUP", name));
    }
    Err(KernelError::validation(format!(
        "one of `{LOGICAL_SWITCH}` or `{PORT_GROUP}` must be set"
    )))
}

pub struct ImportedNetwork {
    schema: Arc<Schema>,
}

impl ImportedNetwork {
    pub fn new() -> Self {
        let schema = Schema::new([common::org()])
            .with(common::owner())
            .with([
                common::name(),
                common::description(),
                Attribute::string(LOGICAL_SWITCH)
                    .force_new()
                    .exactly_one_of(BACKINGS)
                    .describe("NSX-T logical switch to import"),
                Attribute::string(PORT_GROUP)
                    .force_new()
                    .exactly_one_of(BACKINGS)
                    .describe("Distributed port group to import; VDC owners only"),
            ])
            .with(subnet_attributes())
            .with(metadata_attributes(MetadataStyle::OpenApi));
        Self {
            schema: Arc::new(schema),
        }
    }
}

impl Default for ImportedNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDescriptor for ImportedNetwork {
    fn kind(&self) -> ResourceKind {
        kinds::NETWORK_IMPORTED
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::OrgVdcNetwork
    }

    fn import_forms(&self) -> &'static [ImportForm] {
        FORMS
    }

    fn metadata_style(&self) -> Option<MetadataStyle> {
        Some(MetadataStyle::OpenApi)
    }

    fn validate(&self, bag: &ResourceData) -> KernelResult<()> {
        check_pools(bag)
    }

    async fn resolve_parent(&self, session: &Session, bag: &ResourceData) -> KernelResult<ResolvedParent> {
        let (attr, backing_type, switch_name) = backing(bag)?;
        let rules = OwnerRules {
            allow_group: attr == LOGICAL_SWITCH,
            ..OwnerRules::default()
        };
        let (context, owner) = session.resolver().resolve_owner(bag, rules).await?;
        let switch = owner.importable_switch_by_name(session, switch_name).await?;
        let actual = str_at(&switch.body, "/backingType").unwrap_or("unknown");
        if actual != backing_type {
            return Err(KernelError::validation(format!(
                "'{switch_name}' is backed by {actual}, but `{attr}` expects {backing_type}"
            )));
        }
        Ok(ResolvedParent::new(context, Some(owner.entity().clone())).with_related("switch", switch))
    }

    fn to_payload(&self, bag: &ResourceData, parent: &ResolvedParent) -> KernelResult<Value> {
        let owner = parent.require_container()?;
        let switch = parent.related("switch")?;
        Ok(json!({
            "name": bag.require_str("name")?,
            "description": bag.get_string("description"),
            "networkType": NETWORK_TYPE,
            "ownerRef": {"id": owner.id, "name": owner.name},
            "backingNetworkId": switch.id,
            "backingNetworkType": str_at(&switch.body, "/backingType"),
            "backingNetworkName": switch.name,
            "subnets": subnet_payload(bag),
        }))
    }

    fn from_payload(&self, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        read_common(entity, bag)?;
        let body = &entity.body;
        let name = str_at(body, "/backingNetworkName");
        match str_at(body, "/backingNetworkType") {
            Some("DV_PORTGROUP") => bag.set(PORT_GROUP, name)?,
            _ => bag.set(LOGICAL_SWITCH, name)?,
        }
        read_subnet(entity, bag)
    }

    async fn import(&self, session: &Session, path: &ImportPath) -> KernelResult<ImportedResource> {
        path.classify(FORMS)?;
        let (org, owner) = common::owner_from_path(session, path).await?;
        let network = owner.network_by_name(session, path.last()).await?;
        ensure_network_type(&network, NETWORK_TYPE)?;
        Ok(ImportedResource {
            id: network.id.to_string(),
            attributes: attrs! { common::ORG => org.name },
        })
    }
}
