//! Objects and configuration sections that hang off an NSX-T edge gateway.
//!
//! Everything here serializes on the edge gateway lock, which follows the
//! gateway into a VDC group when it was moved there.

use vcd_kernel::lock::edge_gateway_keys;
use vcd_kernel::{
    AttrMap, ImportPath, KernelResult, LockKey, ResolvedParent, ResourceData, Session, attrs,
};
use vcd_sdk::Entity;

use crate::common::{self, EDGE_GATEWAY_ID};

pub mod app_port_profile;
pub mod dhcp_forwarding;
pub mod dns;
pub mod gateway;
pub mod ipsec;
pub mod nat;

pub use app_port_profile::AppPortProfile;
pub use dhcp_forwarding::DhcpForwarding;
pub use dns::DnsForwarder;
pub use gateway::EdgeGatewayData;
pub use ipsec::IpsecVpnTunnel;
pub use nat::NatRule;

/// Parent of an edge gateway child: the gateway itself.
pub(crate) async fn resolve_edge(session: &Session, bag: &ResourceData) -> KernelResult<ResolvedParent> {
    let (context, edge) = session.resolver().edge_gateway(bag, EDGE_GATEWAY_ID).await?;
    Ok(ResolvedParent::new(context, Some(edge)))
}

pub(crate) fn edge_lock(parent: &ResolvedParent) -> Vec<LockKey> {
    match parent.container_id() {
        Some(edge) => edge_gateway_keys(&parent.context, edge),
        None => Vec::new(),
    }
}

/// Scope attributes every edge gateway import sets.
pub(crate) fn edge_import_attributes(org: &Entity, edge: &Entity) -> AttrMap {
    attrs! {
        common::ORG => org.name.as_str(),
        EDGE_GATEWAY_ID => edge.id.to_string(),
    }
}

/// Edge gateway named by `org.vdcOrGroup.edge`, the import form of
/// configuration sections.
pub(crate) async fn edge_from_path(session: &Session, path: &ImportPath) -> KernelResult<(Entity, Entity)> {
    let (org, _owner, edge) = common::edge_from_path(session, path).await?;
    Ok((org, edge))
}
