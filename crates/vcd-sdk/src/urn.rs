use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const URN_PREFIX: &str = "urn:vcloud:";

/// Canonical identifier of a remote object, e.g. `urn:vcloud:gateway:5f1c...`.
///
/// URNs are stored lowercased so that values read back from the remote compare
/// byte-for-byte with values the user supplied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Urn(String);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid URN '{value}': {reason}")]
pub struct UrnParseError {
    pub value: String,
    pub reason: &'static str,
}

impl Urn {
    pub fn new(entity_type: &str, uuid: &str) -> Self {
        Urn(format!("{URN_PREFIX}{entity_type}:{uuid}").to_ascii_lowercase())
    }

    pub fn parse(value: &str) -> Result<Self, UrnParseError> {
        let canonical = value.trim().to_ascii_lowercase();
        let err = |reason| UrnParseError {
            value: value.to_string(),
            reason,
        };
        let rest = canonical
            .strip_prefix(URN_PREFIX)
            .ok_or_else(|| err("missing 'urn:vcloud:' prefix"))?;
        let (entity_type, uuid) = rest
            .split_once(':')
            .ok_or_else(|| err("expected '<type>:<id>' after the prefix"))?;
        if entity_type.is_empty() || uuid.is_empty() {
            return Err(err("empty type or id segment"));
        }
        Ok(Urn(canonical))
    }

    /// Reports whether `value` looks like a URN without allocating a handle.
    pub fn is_urn(value: &str) -> bool {
        Urn::parse(value).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Type segment, e.g. `gateway` or `vdcGroup` (lowercased).
    pub fn entity_type(&self) -> &str {
        self.0[URN_PREFIX.len()..].split(':').next().unwrap_or_default()
    }

    pub fn uuid(&self) -> &str {
        self.0[URN_PREFIX.len()..]
            .split_once(':')
            .map(|(_, id)| id)
            .unwrap_or_default()
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Urn {
    type Err = UrnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Urn::parse(s)
    }
}

impl TryFrom<String> for Urn {
    type Error = UrnParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Urn::parse(&value)
    }
}

impl From<Urn> for String {
    fn from(value: Urn) -> Self {
        value.0
    }
}

/// Remote object families the kernel addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Org,
    Vdc,
    VdcGroup,
    NsxtManager,
    EdgeGateway,
    OrgVdcNetwork,
    ImportableSwitch,
    NatRule,
    IpsecVpnTunnel,
    AppPortProfile,
    VApp,
    Vm,
    VAppNetwork,
    Catalog,
    VAppTemplate,
    VmSizingPolicy,
    Task,
    /// A configuration section stored on another object (DNS forwarder, lease...).
    Config,
}

impl EntityKind {
    /// Type segment used when minting URNs for this kind.
    pub fn urn_type(self) -> &'static str {
        match self {
            EntityKind::Org => "org",
            EntityKind::Vdc => "vdc",
            EntityKind::VdcGroup => "vdcgroup",
            EntityKind::NsxtManager => "nsxtmanager",
            EntityKind::EdgeGateway => "gateway",
            EntityKind::OrgVdcNetwork => "network",
            EntityKind::ImportableSwitch => "importableswitch",
            EntityKind::NatRule => "natrule",
            EntityKind::IpsecVpnTunnel => "ipsecvpntunnel",
            EntityKind::AppPortProfile => "applicationportprofile",
            EntityKind::VApp => "vapp",
            EntityKind::Vm => "vm",
            EntityKind::VAppNetwork => "vappnetwork",
            EntityKind::Catalog => "catalog",
            EntityKind::VAppTemplate => "vapptemplate",
            EntityKind::VmSizingPolicy => "vdccomputepolicy",
            EntityKind::Task => "task",
            EntityKind::Config => "config",
        }
    }

    pub fn from_urn_type(value: &str) -> Option<Self> {
        let kind = match value {
            "org" => EntityKind::Org,
            "vdc" => EntityKind::Vdc,
            "vdcgroup" => EntityKind::VdcGroup,
            "nsxtmanager" => EntityKind::NsxtManager,
            "gateway" => EntityKind::EdgeGateway,
            "network" => EntityKind::OrgVdcNetwork,
            "importableswitch" => EntityKind::ImportableSwitch,
            "natrule" => EntityKind::NatRule,
            "ipsecvpntunnel" => EntityKind::IpsecVpnTunnel,
            "applicationportprofile" => EntityKind::AppPortProfile,
            "vapp" => EntityKind::VApp,
            "vm" => EntityKind::Vm,
            "vappnetwork" => EntityKind::VAppNetwork,
            "catalog" => EntityKind::Catalog,
            "vapptemplate" => EntityKind::VAppTemplate,
            "vdccomputepolicy" => EntityKind::VmSizingPolicy,
            "task" => EntityKind::Task,
            "config" => EntityKind::Config,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::Org => "Org",
            EntityKind::Vdc => "VDC",
            EntityKind::VdcGroup => "VDC Group",
            EntityKind::NsxtManager => "NSX-T Manager",
            EntityKind::EdgeGateway => "Edge Gateway",
            EntityKind::OrgVdcNetwork => "Org VDC Network",
            EntityKind::ImportableSwitch => "Importable Switch",
            EntityKind::NatRule => "NAT Rule",
            EntityKind::IpsecVpnTunnel => "IPsec VPN Tunnel",
            EntityKind::AppPortProfile => "Application Port Profile",
            EntityKind::VApp => "vApp",
            EntityKind::Vm => "VM",
            EntityKind::VAppNetwork => "vApp Network",
            EntityKind::Catalog => "Catalog",
            EntityKind::VAppTemplate => "vApp Template",
            EntityKind::VmSizingPolicy => "VM Sizing Policy",
            EntityKind::Task => "Task",
            EntityKind::Config => "Configuration",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_canonicalizes_case() {
        let urn = Urn::parse("URN:vcloud:Gateway:ABC-123").unwrap();
        assert_eq!(urn.as_str(), "urn:vcloud:gateway:abc-123");
        assert_eq!(urn.entity_type(), "gateway");
        assert_eq!(urn.uuid(), "abc-123");
    }

    #[test]
    fn parse_rejects_names() {
        assert!(Urn::parse("my-edge").is_err());
        assert!(Urn::parse("urn:vcloud:gateway:").is_err());
        assert!(!Urn::is_urn("org.vdc.name"));
    }

    #[test]
    fn urn_type_round_trips_for_every_kind() {
        for kind in [
            EntityKind::Org,
            EntityKind::VdcGroup,
            EntityKind::EdgeGateway,
            EntityKind::AppPortProfile,
            EntityKind::VmSizingPolicy,
        ] {
            assert_eq!(EntityKind::from_urn_type(kind.urn_type()), Some(kind));
        }
    }
}
