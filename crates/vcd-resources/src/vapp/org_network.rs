//! Org VDC network attached to a vApp.
//!
//! Removing the attachment is refused while the vApp runs;
//! `reboot_vapp_on_removal = true` lets the provider stop the vApp around the
//! delete.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use vcd_kernel::identity::child_by_name;
use vcd_kernel::{
    Attribute, ImportForm, ImportPath, ImportedResource, KernelResult, LockKey, PathScope,
    PowerOffPolicy, PowerTarget, ResolvedParent, ResourceData, ResourceDescriptor, ResourceKind,
    Schema, Session, attrs,
};
use vcd_sdk::{Entity, EntityKind};

use super::{VAPP_NAME, resolve_vapp, vapp_from_path, vapp_lock};
use crate::common::{self, VDC, bool_at, str_at};
use crate::kinds;

const ORG_NETWORK_NAME: &str = "org_network_name";
const REBOOT_ON_REMOVAL: &str = "reboot_vapp_on_removal";

const FORMS: &[ImportForm] = &[ImportForm::new(
    PathScope::VApp,
    &["org-name", "vdc-name", "vapp-name", "org-network-name"],
)];

pub struct VAppOrgNetwork {
    schema: Arc<Schema>,
}

impl VAppOrgNetwork {
    pub fn new() -> Self {
        let schema = Schema::new([
            common::org(),
            Attribute::string(VDC).force_new(),
            Attribute::string(VAPP_NAME).required().force_new(),
            Attribute::string(ORG_NETWORK_NAME).required().force_new(),
            Attribute::bool("is_fenced").default(false),
            Attribute::bool("retain_ip_mac_enabled").default(false),
            Attribute::bool(REBOOT_ON_REMOVAL)
                .default(false)
                .describe("Stop the vApp when removing the network requires it"),
        ]);
        Self {
            schema: Arc::new(schema),
        }
    }
}

impl Default for VAppOrgNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDescriptor for VAppOrgNetwork {
    fn kind(&self) -> ResourceKind {
        kinds::VAPP_ORG_NETWORK
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::VAppNetwork
    }

    fn import_forms(&self) -> &'static [ImportForm] {
        FORMS
    }

    fn cosmetic_attributes(&self) -> &'static [&'static str] {
        &[REBOOT_ON_REMOVAL]
    }

    fn power_off_policy(&self) -> Option<PowerOffPolicy> {
        Some(PowerOffPolicy {
            attribute: REBOOT_ON_REMOVAL,
            allowed_when: true,
            target: PowerTarget::Container,
        })
    }

    async fn resolve_parent(&self, session: &Session, bag: &ResourceData) -> KernelResult<ResolvedParent> {
        let parent = resolve_vapp(session, bag).await?;
        // Deletes only need the vApp; the org network may already be gone.
        if bag.desired().is_none() {
            return Ok(parent);
        }
        let vdc = parent.related("vdc")?.id.clone();
        let network = child_by_name(
            session,
            &vdc,
            EntityKind::OrgVdcNetwork,
            bag.require_str(ORG_NETWORK_NAME)?,
        )
        .await?;
        Ok(parent.with_related("org_network", network))
    }

    fn lock_keys(&self, _bag: &ResourceData, parent: &ResolvedParent) -> Vec<LockKey> {
        vapp_lock(parent)
    }

    fn to_payload(&self, bag: &ResourceData, parent: &ResolvedParent) -> KernelResult<Value> {
        let network = parent.related("org_network")?;
        let fence_mode = if bag.get_bool("is_fenced") {
            "natRouted"
        } else {
            "bridged"
        };
        Ok(json!({
            "name": network.name,
            "parentNetworkId": network.id.to_string(),
            "fenceMode": fence_mode,
            "retainNetInfoAcrossDeployments": bag.get_bool("retain_ip_mac_enabled"),
        }))
    }

    fn from_payload(&self, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        let body = &entity.body;
        bag.set(ORG_NETWORK_NAME, entity.name.as_str())?;
        bag.set("is_fenced", str_at(body, "/fenceMode") == Some("natRouted"))?;
        bag.set(
            "retain_ip_mac_enabled",
            bool_at(body, "/retainNetInfoAcrossDeployments"),
        )
    }

    async fn import(&self, session: &Session, path: &ImportPath) -> KernelResult<ImportedResource> {
        path.classify(FORMS)?;
        let (org, vdc, vapp) = vapp_from_path(session, path).await?;
        let network = child_by_name(session, &vapp.id, EntityKind::VAppNetwork, path.last()).await?;
        Ok(ImportedResource {
            id: network.id.to_string(),
            attributes: attrs! {
                common::ORG => org.name,
                VDC => vdc.name,
                VAPP_NAME => vapp.name,
            },
        })
    }
}
