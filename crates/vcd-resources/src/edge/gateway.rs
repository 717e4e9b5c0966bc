//! Data source: NSX-T edge gateway by name within a VDC or VDC group.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use vcd_kernel::{
    Attribute, DescriptorMode, KernelError, KernelResult, OwnerRules, ResolvedParent,
    ResourceData, ResourceDescriptor, ResourceKind, Schema, Session,
};
use vcd_sdk::{Entity, EntityKind};

use crate::common::{self, OWNER_ID, VDC, str_at};
use crate::kinds;

pub struct EdgeGatewayData {
    schema: Arc<Schema>,
}

impl EdgeGatewayData {
    pub fn new() -> Self {
        let schema = Schema::new([
            common::org(),
            Attribute::string(VDC).conflicts_with(&[OWNER_ID]),
            Attribute::string(OWNER_ID).optional_computed(),
            common::name(),
            Attribute::string("description").computed(),
            Attribute::string("owner_name").computed(),
            Attribute::string("gateway_type").computed(),
        ]);
        Self {
            schema: Arc::new(schema),
        }
    }
}

impl Default for EdgeGatewayData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDescriptor for EdgeGatewayData {
    fn kind(&self) -> ResourceKind {
        kinds::DATA_EDGE_GATEWAY
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::EdgeGateway
    }

    fn mode(&self) -> DescriptorMode {
        DescriptorMode::DataSource
    }

    async fn resolve_parent(&self, session: &Session, bag: &ResourceData) -> KernelResult<ResolvedParent> {
        let (context, owner) = session.resolver().resolve_owner(bag, OwnerRules::default()).await?;
        Ok(ResolvedParent::new(context, Some(owner.entity().clone())))
    }

    fn to_payload(&self, _bag: &ResourceData, _parent: &ResolvedParent) -> KernelResult<Value> {
        Err(KernelError::validation("data sources have no payload"))
    }

    fn from_payload(&self, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        let body = &entity.body;
        bag.set("name", entity.name.as_str())?;
        bag.set("description", str_at(body, "/description"))?;
        bag.set(OWNER_ID, str_at(body, "/ownerRef/id"))?;
        bag.set("gateway_type", str_at(body, "/gatewayBacking/gatewayType"))
    }

    async fn after_read(&self, session: &Session, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        if let Some(owner) = &entity.parent {
            let owner = session.fetch(owner).await?;
            bag.set("owner_name", owner.name)?;
        }
        Ok(())
    }

    async fn lookup(&self, session: &Session, bag: &ResourceData) -> KernelResult<Entity> {
        let (_, owner) = session.resolver().resolve_owner(bag, OwnerRules::default()).await?;
        owner.edge_gateway_by_name(session, bag.require_str("name")?).await
    }
}
