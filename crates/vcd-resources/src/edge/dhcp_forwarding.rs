//! DHCP forwarding (relay) configuration of an NSX-T edge gateway.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use vcd_kernel::{
    AttrValue, Attribute, ImportForm, ImportPath, ImportedResource, KernelResult, Lifecycle,
    LockKey, PathScope, ResolvedParent, ResourceData, ResourceDescriptor, ResourceKind, Schema,
    Session, validate,
};
use vcd_sdk::{ConfigSection, Entity, EntityKind};

use super::{edge_from_path, edge_import_attributes, edge_lock, resolve_edge};
use crate::common::{self, EDGE_GATEWAY_ID, bool_at, strings_at};
use crate::kinds;

const FORMS: &[ImportForm] = &[ImportForm::new(
    PathScope::Tenant,
    &["org-name", "vdc-or-vdc-group-name", "edge-gateway-name"],
)];

pub struct DhcpForwarding {
    schema: Arc<Schema>,
}

impl DhcpForwarding {
    pub fn new() -> Self {
        let schema = Schema::new([
            common::org(),
            common::edge_gateway_id(),
            Attribute::bool("enabled").default(true),
            Attribute::string_set("dhcp_servers")
                .required()
                .max_items(8)
                .validate(validate::ip_addresses),
        ]);
        Self {
            schema: Arc::new(schema),
        }
    }
}

impl Default for DhcpForwarding {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDescriptor for DhcpForwarding {
    fn kind(&self) -> ResourceKind {
        kinds::EDGE_DHCP_FORWARDING
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Config
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::ParentConfig(ConfigSection::DhcpForwarding)
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
        Ok(json!({
            "enabled": bag.get_bool("enabled"),
            "dhcpServers": bag.get_set("dhcp_servers"),
        }))
    }

    fn from_payload(&self, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        bag.set(EDGE_GATEWAY_ID, entity.id.to_string())?;
        bag.set("enabled", bool_at(&entity.body, "/enabled"))?;
        let servers = strings_at(&entity.body, "/dhcpServers")
            .into_iter()
            .map(|ip| ip.to_ascii_lowercase());
        bag.set("dhcp_servers", AttrValue::set(servers))
    }

    fn reset_payload(&self) -> Value {
        json!({"enabled": false, "dhcpServers": []})
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
