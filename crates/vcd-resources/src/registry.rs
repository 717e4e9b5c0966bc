use vcd_kernel::{DescriptorRegistry, KernelResult};

use crate::catalog::VAppTemplate;
use crate::edge::{
    AppPortProfile, DhcpForwarding, DnsForwarder, EdgeGatewayData, IpsecVpnTunnel, NatRule,
};
use crate::network::{ImportedNetwork, IsolatedNetwork, RoutedNetwork, RoutedNetworkData};
use crate::policy::VmSizingPolicy;
use crate::vapp::{VApp, VAppOrgNetwork, VAppVm};

/// Every descriptor this crate ships, keyed by kind.
///
/// Registering the same kind twice is a startup error.
pub fn registry() -> KernelResult<DescriptorRegistry> {
    let mut registry = DescriptorRegistry::new();

    registry.register(RoutedNetwork::new())?;
    registry.register(IsolatedNetwork::new())?;
    registry.register(ImportedNetwork::new())?;

    registry.register(NatRule::new())?;
    registry.register(IpsecVpnTunnel::new())?;
    registry.register(AppPortProfile::new())?;
    registry.register(DnsForwarder::new())?;
    registry.register(DhcpForwarding::new())?;

    registry.register(VApp::new())?;
    registry.register(VAppVm::new())?;
    registry.register(VAppOrgNetwork::new())?;

    registry.register(VAppTemplate::new())?;
    registry.register(VmSizingPolicy::new())?;

    registry.register(EdgeGatewayData::new())?;
    registry.register(RoutedNetworkData::new())?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds;

    #[test]
    fn registry_resolves_every_type_name() {
        let registry = registry().unwrap();
        assert_eq!(registry.len(), 15);
        for kind in [
            kinds::NETWORK_ROUTED_V2,
            kinds::VAPP_VM,
            kinds::EDGE_DNS,
            kinds::DATA_EDGE_GATEWAY,
        ] {
            assert_eq!(registry.resolve_name(kind.name()).unwrap(), kind);
        }
        assert!(registry.resolve_name("vcd_nsxt_alb_pool").is_err());
    }
}
