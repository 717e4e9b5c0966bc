//! NSX-T IPsec VPN tunnel.
//!
//! The tunnel's crypto settings live in a separate security profile section
//! on the tunnel. Without a `security_profile_customization` block the
//! profile stays (or is put back) at the remote's DEFAULT.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use vcd_kernel::{
    AttrMap, AttrValue, Attribute, HookPhase, ImportForm, ImportPath, ImportedResource,
    KernelResult, LockKey, PathScope, PostHook, RecordExt, ResolvedParent, ResourceData,
    ResourceDescriptor, ResourceKind, Schema, Session, attrs, validate,
};
use vcd_sdk::{ConfigSection, Entity, EntityKind, Urn};

use super::{edge_import_attributes, edge_lock, resolve_edge};
use crate::common::{self, EDGE_GATEWAY_ID, bool_at, int_at, str_at, strings_at};
use crate::kinds;

const PROFILE: &str = "security_profile_customization";
const SECURITY_TYPE: &str = "security_type";

const FORMS: &[ImportForm] = &[ImportForm::new(
    PathScope::EdgeGateway,
    &["org-name", "vdc-or-vdc-group-name", "edge-gateway-name", "tunnel-name-or-id"],
)];

fn networks(value: &AttrValue) -> Result<(), String> {
    match value {
        AttrValue::Set(items) => items
            .iter()
            .try_for_each(|cidr| validate::ip_or_cidr(&AttrValue::String(cidr.clone()))),
        other => validate::ip_or_cidr(other),
    }
}

fn check_ike_version(value: &AttrValue) -> Result<(), String> {
    validate::one_of(value, &["IKE_V1", "IKE_V2", "IKE_FLEX"])
}

fn check_df_policy(value: &AttrValue) -> Result<(), String> {
    validate::one_of(value, &["COPY", "CLEAR"])
}

fn profile_schema() -> Schema {
    Schema::new([
        Attribute::string("ike_version")
            .default("IKE_V2")
            .validate(check_ike_version),
        Attribute::string_set("ike_encryption_algorithms").required(),
        Attribute::string_set("ike_digest_algorithms"),
        Attribute::string_set("ike_dh_groups").required(),
        Attribute::int("ike_sa_lifetime").default(86400),
        Attribute::bool("tunnel_pfs_enabled").default(true),
        Attribute::string("tunnel_df_policy")
            .default("COPY")
            .validate(check_df_policy),
        Attribute::string_set("tunnel_encryption_algorithms").required(),
        Attribute::string_set("tunnel_digest_algorithms"),
        Attribute::string_set("tunnel_dh_groups").required(),
        Attribute::int("tunnel_sa_lifetime").default(3600),
        Attribute::int("dpd_probe_internal").default(30),
    ])
}

fn schema() -> Schema {
    Schema::new([
        common::org(),
        common::edge_gateway_id(),
        common::name(),
        common::description(),
        Attribute::string("pre_shared_key").required().sensitive(),
        Attribute::bool("enabled").default(true),
        Attribute::bool("logging").default(false),
        Attribute::string("local_ip_address")
            .required()
            .validate(validate::ip_address),
        Attribute::string_set("local_networks")
            .required()
            .validate(networks),
        Attribute::string("remote_ip_address")
            .required()
            .validate(validate::ip_address),
        Attribute::string_set("remote_networks").validate(networks),
        Attribute::string(SECURITY_TYPE)
            .computed()
            .describe("DEFAULT or CUSTOM, as reported by the remote"),
        Attribute::records(PROFILE, profile_schema())
            .max_items(1)
            .describe("Overrides the default IKE, tunnel and DPD settings"),
    ])
}

/// Security profile document for a customization block.
fn custom_profile(block: &AttrMap) -> Value {
    let sorted = |name: &str| {
        let mut items = block.strings_of(name);
        items.sort();
        items
    };
    json!({
        "securityType": "CUSTOM",
        "ikeConfiguration": {
            "ikeVersion": block.str_of("ike_version").unwrap_or("IKE_V2"),
            "encryptionAlgorithms": sorted("ike_encryption_algorithms"),
            "digestAlgorithms": sorted("ike_digest_algorithms"),
            "dhGroups": sorted("ike_dh_groups"),
            "saLifeTime": block.int_of("ike_sa_lifetime").unwrap_or(86400),
        },
        "tunnelConfiguration": {
            "perfectForwardSecrecyEnabled": block
                .get("tunnel_pfs_enabled")
                .and_then(AttrValue::as_bool)
                .unwrap_or(true),
            "dfPolicy": block.str_of("tunnel_df_policy").unwrap_or("COPY"),
            "encryptionAlgorithms": sorted("tunnel_encryption_algorithms"),
            "digestAlgorithms": sorted("tunnel_digest_algorithms"),
            "dhGroups": sorted("tunnel_dh_groups"),
            "saLifeTime": block.int_of("tunnel_sa_lifetime").unwrap_or(3600),
        },
        "dpdConfiguration": {
            "probeInterval": block.int_of("dpd_probe_internal").unwrap_or(30),
        },
    })
}

fn default_profile() -> Value {
    json!({"securityType": "DEFAULT"})
}

fn block_from_profile(body: &Value) -> AttrMap {
    let set = |pointer: &str| AttrValue::set(strings_at(body, pointer));
    attrs! {
        "ike_version" => str_at(body, "/ikeConfiguration/ikeVersion"),
        "ike_encryption_algorithms" => set("/ikeConfiguration/encryptionAlgorithms"),
        "ike_digest_algorithms" => set("/ikeConfiguration/digestAlgorithms"),
        "ike_dh_groups" => set("/ikeConfiguration/dhGroups"),
        "ike_sa_lifetime" => int_at(body, "/ikeConfiguration/saLifeTime"),
        "tunnel_pfs_enabled" => bool_at(body, "/tunnelConfiguration/perfectForwardSecrecyEnabled"),
        "tunnel_df_policy" => str_at(body, "/tunnelConfiguration/dfPolicy"),
        "tunnel_encryption_algorithms" => set("/tunnelConfiguration/encryptionAlgorithms"),
        "tunnel_digest_algorithms" => set("/tunnelConfiguration/digestAlgorithms"),
        "tunnel_dh_groups" => set("/tunnelConfiguration/dhGroups"),
        "tunnel_sa_lifetime" => int_at(body, "/tunnelConfiguration/saLifeTime"),
        "dpd_probe_internal" => int_at(body, "/dpdConfiguration/probeInterval"),
    }
}

/// Writes the security profile after the tunnel itself.
struct SecurityProfileHook;

#[async_trait]
impl PostHook for SecurityProfileHook {
    fn name(&self) -> &'static str {
        "ipsec-security-profile"
    }

    async fn run(
        &self,
        session: &Session,
        phase: HookPhase,
        id: &Urn,
        bag: &mut ResourceData,
    ) -> KernelResult<()> {
        if phase == HookPhase::Update && !bag.has_change(PROFILE) {
            return Ok(());
        }
        let body = match bag.get_records(PROFILE).first() {
            Some(block) => custom_profile(block),
            None if phase == HookPhase::Create => return Ok(()),
            None => default_profile(),
        };
        debug!(tunnel = %id, security_type = ?body.get("securityType"), "writing security profile");
        let task = session
            .client
            .put_config(&session.ctx, id, ConfigSection::IpsecSecurityProfile, body)
            .await?;
        session.waiter().wait(task).await?;
        Ok(())
    }
}

pub struct IpsecVpnTunnel {
    schema: Arc<Schema>,
}

impl IpsecVpnTunnel {
    pub fn new() -> Self {
        Self {
            schema: Arc::new(schema()),
        }
    }
}

impl Default for IpsecVpnTunnel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDescriptor for IpsecVpnTunnel {
    fn kind(&self) -> ResourceKind {
        kinds::IPSEC_VPN_TUNNEL
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::IpsecVpnTunnel
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
            "name": bag.require_str("name")?,
            "description": bag.get_string("description"),
            "enabled": bag.get_bool("enabled"),
            "logging": bag.get_bool("logging"),
            "authenticationMode": "PSK",
            "preSharedKey": bag.require_str("pre_shared_key")?,
            "localEndpoint": {
                "localAddress": bag.require_str("local_ip_address")?,
                "localNetworks": bag.get_set("local_networks"),
            },
            "remoteEndpoint": {
                "remoteAddress": bag.require_str("remote_ip_address")?,
                "remoteNetworks": bag.get_set("remote_networks"),
            },
        }))
    }

    fn from_payload(&self, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        let body = &entity.body;
        bag.set("name", entity.name.as_str())?;
        if let Some(edge) = &entity.parent {
            bag.set(EDGE_GATEWAY_ID, edge.to_string())?;
        }
        bag.set("description", str_at(body, "/description"))?;
        bag.set("enabled", bool_at(body, "/enabled"))?;
        bag.set("logging", bool_at(body, "/logging"))?;
        bag.set("pre_shared_key", str_at(body, "/preSharedKey"))?;
        bag.set("local_ip_address", str_at(body, "/localEndpoint/localAddress"))?;
        bag.set(
            "local_networks",
            AttrValue::set(strings_at(body, "/localEndpoint/localNetworks")),
        )?;
        bag.set("remote_ip_address", str_at(body, "/remoteEndpoint/remoteAddress"))?;
        bag.set(
            "remote_networks",
            AttrValue::set(strings_at(body, "/remoteEndpoint/remoteNetworks")),
        )
    }

    async fn after_read(&self, session: &Session, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        let profile = session
            .client
            .get_config(&session.ctx, &entity.id, ConfigSection::IpsecSecurityProfile)
            .await?;
        let security_type = str_at(&profile.body, "/securityType").unwrap_or("DEFAULT");
        bag.set(SECURITY_TYPE, security_type)?;
        let blocks = match security_type {
            "CUSTOM" => vec![block_from_profile(&profile.body)],
            _ => Vec::new(),
        };
        bag.set(PROFILE, blocks)
    }

    async fn import(&self, session: &Session, path: &ImportPath) -> KernelResult<ImportedResource> {
        path.classify(FORMS)?;
        let (org, _owner, edge) = common::edge_from_path(session, path).await?;
        let tunnel = common::child_from_path(session, &edge.id, EntityKind::IpsecVpnTunnel, path).await?;
        Ok(ImportedResource {
            id: tunnel.id.to_string(),
            attributes: edge_import_attributes(&org, &edge),
        })
    }

    fn post_create_hooks(&self) -> Vec<Arc<dyn PostHook>> {
        vec![Arc::new(SecurityProfileHook)]
    }

    fn post_update_hooks(&self) -> Vec<Arc<dyn PostHook>> {
        vec![Arc::new(SecurityProfileHook)]
    }
}
