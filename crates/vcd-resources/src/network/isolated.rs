//! NSX-T isolated network, owned by a VDC or a VDC group.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use vcd_kernel::metadata::metadata_attributes;
use vcd_kernel::{
    ImportForm, ImportPath, ImportedResource, KernelResult, MetadataStyle, OwnerRules, PathScope,
    ResolvedParent, ResourceData, ResourceDescriptor, ResourceKind, Schema, Session, attrs,
};
use vcd_sdk::{Entity, EntityKind};

use super::{check_pools, ensure_network_type, read_common, read_subnet, subnet_attributes, subnet_payload};
use crate::common;
use crate::kinds;

const NETWORK_TYPE: &str = "ISOLATED";

const FORMS: &[ImportForm] = &[ImportForm::new(
    PathScope::Tenant,
    &["org-name", "vdc-or-vdc-group-name", "network-name"],
)];

pub struct IsolatedNetwork {
    schema: Arc<Schema>,
}

impl IsolatedNetwork {
    pub fn new() -> Self {
        let schema = Schema::new([common::org()])
            .with(common::owner())
            .with([common::name(), common::description()])
            .with(subnet_attributes())
            .with(metadata_attributes(MetadataStyle::OpenApi));
        Self {
            schema: Arc::new(schema),
        }
    }
}

impl Default for IsolatedNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDescriptor for IsolatedNetwork {
    fn kind(&self) -> ResourceKind {
        kinds::NETWORK_ISOLATED_V2
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
        let (context, owner) = session.resolver().resolve_owner(bag, OwnerRules::default()).await?;
        Ok(ResolvedParent::new(context, Some(owner.entity().clone())))
    }

    fn to_payload(&self, bag: &ResourceData, parent: &ResolvedParent) -> KernelResult<Value> {
        let owner = parent.require_container()?;
        Ok(json!({
            "name": bag.require_str("name")?,
            "description": bag.get_string("description"),
            "networkType": NETWORK_TYPE,
            "ownerRef": {"id": owner.id, "name": owner.name},
            "subnets": subnet_payload(bag),
        }))
    }

    fn from_payload(&self, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        read_common(entity, bag)?;
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
