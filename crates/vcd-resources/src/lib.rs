//! Resource descriptors for the NSX-T networking, vApp and catalog slice of
//! Cloud Director, plus the JSON adapter hosts drive them through.
//!
//! [`registry()`] builds the startup table the kernel dispatches on; every
//! kind is addressed by a typed [`vcd_kernel::ResourceKind`] from [`kinds`].

pub mod catalog;
pub mod common;
pub mod edge;
pub mod network;
pub mod policy;
pub mod provider;
pub mod registry;
pub mod vapp;

pub use provider::{HostRequest, HostResponse, Provider, ProviderError};
pub use registry::registry;

/// Typed keys of every registered kind.
pub mod kinds {
    use vcd_kernel::ResourceKind;

    pub const NETWORK_ROUTED_V2: ResourceKind = ResourceKind::new("vcd_network_routed_v2");
    pub const NETWORK_ISOLATED_V2: ResourceKind = ResourceKind::new("vcd_network_isolated_v2");
    pub const NETWORK_IMPORTED: ResourceKind = ResourceKind::new("vcd_nsxt_network_imported");
    pub const NAT_RULE: ResourceKind = ResourceKind::new("vcd_nsxt_nat_rule");
    pub const IPSEC_VPN_TUNNEL: ResourceKind = ResourceKind::new("vcd_nsxt_ipsec_vpn_tunnel");
    pub const APP_PORT_PROFILE: ResourceKind = ResourceKind::new("vcd_nsxt_app_port_profile");
    pub const EDGE_DNS: ResourceKind = ResourceKind::new("vcd_nsxt_edgegateway_dns");
    pub const EDGE_DHCP_FORWARDING: ResourceKind =
        ResourceKind::new("vcd_nsxt_edgegateway_dhcp_forwarding");
    pub const VAPP: ResourceKind = ResourceKind::new("vcd_vapp");
    pub const VAPP_VM: ResourceKind = ResourceKind::new("vcd_vapp_vm");
    pub const VAPP_ORG_NETWORK: ResourceKind = ResourceKind::new("vcd_vapp_org_network");
    pub const VAPP_TEMPLATE: ResourceKind = ResourceKind::new("vcd_catalog_vapp_template");
    pub const VM_SIZING_POLICY: ResourceKind = ResourceKind::new("vcd_vm_sizing_policy");

    pub const DATA_EDGE_GATEWAY: ResourceKind = ResourceKind::new("data.vcd_nsxt_edgegateway");
    pub const DATA_NETWORK_ROUTED_V2: ResourceKind =
        ResourceKind::new("data.vcd_network_routed_v2");
}
