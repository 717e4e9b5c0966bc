//! NSX-T routed network and its data source.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use vcd_kernel::lock::edge_gateway_keys;
use vcd_kernel::metadata::metadata_attributes;
use vcd_kernel::{
    Attribute, DescriptorMode, ImportForm, ImportPath, ImportedResource, KernelError,
    KernelResult, LockKey, MetadataStyle, OwnerRules, PathScope, ResolvedParent, ResourceData,
    ResourceDescriptor, ResourceKind, Schema, Session, attrs, validate,
};
use vcd_sdk::{Entity, EntityKind, Urn};

use super::{
    check_pools, computed_subnet_attributes, ensure_network_type, read_common, read_subnet,
    subnet_attributes, subnet_payload,
};
use crate::common::{self, EDGE_GATEWAY_ID, OWNER_ID, str_at};
use crate::kinds;

const NETWORK_TYPE: &str = "NAT_ROUTED";

const FORMS: &[ImportForm] = &[ImportForm::new(
    PathScope::Tenant,
    &["org-name", "vdc-or-vdc-group-name", "network-name"],
)];

/// Lock keys of the gateway the network is leaving, resolved through its
/// owner so a group-owned gateway locks its group. A gateway that is already
/// gone needs no lock.
async fn previous_gateway_keys(
    session: &Session,
    bag: &ResourceData,
    current: &Urn,
) -> KernelResult<Vec<LockKey>> {
    if bag.desired().is_none() {
        return Ok(Vec::new());
    }
    let Some(previous) = bag.prior_str(EDGE_GATEWAY_ID).and_then(|raw| Urn::parse(raw).ok()) else {
        return Ok(Vec::new());
    };
    if &previous == current {
        return Ok(Vec::new());
    }
    match session.resolver().edge_gateway_by_id(&previous).await {
        Ok((context, _)) => Ok(edge_gateway_keys(&context, &previous)),
        Err(err) if err.is_not_found() => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}

fn check_interface_type(value: &vcd_kernel::AttrValue) -> Result<(), String> {
    validate::one_of(value, &["internal", "subinterface", "distributed"])
}

fn schema() -> Schema {
    Schema::new([
        common::org(),
        Attribute::string(OWNER_ID)
            .computed()
            .describe("VDC or VDC group that owns the edge gateway"),
        Attribute::string(EDGE_GATEWAY_ID)
            .required()
            .validate(validate::urn)
            .describe("Edge gateway the network is routed through"),
        common::name(),
        common::description(),
        Attribute::string("interface_type")
            .default("internal")
            .validate(check_interface_type),
        Attribute::bool("guest_vlan_allowed").default(false),
    ])
    .with(subnet_attributes())
    .with(metadata_attributes(MetadataStyle::Legacy))
}

/// Remote fields into the bag; shared with the data source.
fn read_network(entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
    read_common(entity, bag)?;
    let body = &entity.body;
    bag.set(EDGE_GATEWAY_ID, str_at(body, "/connection/routerRef/id"))?;
    bag.set(
        "interface_type",
        common::canonical(str_at(body, "/connection/connectionType")),
    )?;
    bag.set("guest_vlan_allowed", common::bool_at(body, "/guestVlanTaggingAllowed"))?;
    read_subnet(entity, bag)
}

pub struct RoutedNetwork {
    schema: Arc<Schema>,
}

impl RoutedNetwork {
    pub fn new() -> Self {
        Self {
            schema: Arc::new(schema()),
        }
    }
}

impl Default for RoutedNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDescriptor for RoutedNetwork {
    fn kind(&self) -> ResourceKind {
        kinds::NETWORK_ROUTED_V2
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
        Some(MetadataStyle::Legacy)
    }

    fn validate(&self, bag: &ResourceData) -> KernelResult<()> {
        check_pools(bag)
    }

    async fn resolve_parent(&self, session: &Session, bag: &ResourceData) -> KernelResult<ResolvedParent> {
        let (context, edge) = session.resolver().edge_gateway(bag, EDGE_GATEWAY_ID).await?;
        let owner = edge
            .parent
            .clone()
            .ok_or_else(|| KernelError::payload(format!("edge gateway {} has no owner", edge.id)))?;
        let owner = session.fetch(&owner).await?;
        let previous = previous_gateway_keys(session, bag, &edge.id).await?;
        Ok(ResolvedParent::new(context, Some(owner))
            .with_related("edge_gateway", edge)
            .with_locks(previous))
    }

    /// The current edge gateway, and the previous one while moving between
    /// gateways.
    fn lock_keys(&self, _bag: &ResourceData, parent: &ResolvedParent) -> Vec<LockKey> {
        let Ok(edge) = parent.related("edge_gateway") else {
            return Vec::new();
        };
        let mut keys = edge_gateway_keys(&parent.context, &edge.id);
        keys.extend(parent.extra_locks.iter().cloned());
        keys
    }

    fn to_payload(&self, bag: &ResourceData, parent: &ResolvedParent) -> KernelResult<Value> {
        let owner = parent.require_container()?;
        let edge = parent.related("edge_gateway")?;
        Ok(json!({
            "name": bag.require_str("name")?,
            "description": bag.get_string("description"),
            "networkType": NETWORK_TYPE,
            "ownerRef": {"id": owner.id},
            "connection": {
                "routerRef": {"id": edge.id, "name": edge.name},
                "connectionType": bag.get_string("interface_type").to_ascii_uppercase(),
            },
            "subnets": subnet_payload(bag),
            "guestVlanTaggingAllowed": bag.get_bool("guest_vlan_allowed"),
        }))
    }

    fn from_payload(&self, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        read_network(entity, bag)
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

// ---------------------------------------------------------------------------
// Data source
// ---------------------------------------------------------------------------

fn data_schema() -> Schema {
    Schema::new([
        common::org(),
        Attribute::string(OWNER_ID).optional().validate(validate::urn),
        Attribute::string(EDGE_GATEWAY_ID)
            .optional_computed()
            .validate(validate::urn),
        common::name(),
        Attribute::string("description").computed(),
        Attribute::string("interface_type").computed(),
        Attribute::bool("guest_vlan_allowed").computed(),
    ])
    .with(computed_subnet_attributes())
    .with([
        Attribute::string_map(vcd_kernel::metadata::METADATA).computed(),
        Attribute::string_map(vcd_kernel::metadata::INHERITED_METADATA).computed(),
    ])
}

/// Looks a routed network up by name under `owner_id` (or the org's
/// default VDC), optionally narrowed to one edge gateway.
pub struct RoutedNetworkData {
    schema: Arc<Schema>,
}

impl RoutedNetworkData {
    pub fn new() -> Self {
        Self {
            schema: Arc::new(data_schema()),
        }
    }
}

impl Default for RoutedNetworkData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDescriptor for RoutedNetworkData {
    fn kind(&self) -> ResourceKind {
        kinds::DATA_NETWORK_ROUTED_V2
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::OrgVdcNetwork
    }

    fn mode(&self) -> DescriptorMode {
        DescriptorMode::DataSource
    }

    fn metadata_style(&self) -> Option<MetadataStyle> {
        Some(MetadataStyle::Legacy)
    }

    async fn resolve_parent(&self, session: &Session, bag: &ResourceData) -> KernelResult<ResolvedParent> {
        let (context, owner) = session.resolver().resolve_owner(bag, OwnerRules::default()).await?;
        Ok(ResolvedParent::new(context, Some(owner.entity().clone())))
    }

    fn to_payload(&self, _bag: &ResourceData, _parent: &ResolvedParent) -> KernelResult<Value> {
        Err(KernelError::validation("data sources have no payload"))
    }

    fn from_payload(&self, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        read_network(entity, bag)
    }

    async fn lookup(&self, session: &Session, bag: &ResourceData) -> KernelResult<Entity> {
        let parent = self.resolve_parent(session, bag).await?;
        let owner = parent.require_container()?;
        let name = bag.require_str("name")?;
        let network = vcd_kernel::identity::child_by_name(session, &owner.id, EntityKind::OrgVdcNetwork, name).await?;
        ensure_network_type(&network, NETWORK_TYPE)?;
        if let Some(edge) = bag.get_str(EDGE_GATEWAY_ID) {
            let wanted = session.urn(edge)?;
            if str_at(&network.body, "/connection/routerRef/id") != Some(wanted.as_str()) {
                return Err(KernelError::not_found(format!(
                    "routed network '{name}' on edge gateway {wanted}"
                )));
            }
        }
        Ok(network)
    }
}
