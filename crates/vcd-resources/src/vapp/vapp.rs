//! vApp: container of VMs and vApp networks in a VDC.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use vcd_kernel::identity::SYSTEM_ORG;
use vcd_kernel::metadata::metadata_attributes;
use vcd_kernel::{
    AttrMap, Attribute, HookPhase, ImportForm, ImportPath, ImportedResource, KernelResult, LockKey,
    MetadataStyle, OwnerRules, PathScope, PostHook, RecordExt, ResolvedParent, ResourceData,
    ResourceDescriptor, ResourceKind, Schema, Session, attrs, validate,
};
use vcd_sdk::{ConfigSection, Entity, EntityKind, Urn};

use super::{POWER_ON, PowerHook, STATUS_TEXT, read_status, vapp_from_path};
use crate::common::{self, VDC, int_at, str_at};
use crate::kinds;

const LEASE: &str = "lease";

const FORMS: &[ImportForm] = &[ImportForm::new(
    PathScope::VApp,
    &["org-name", "vdc-name", "vapp-name"],
)];

fn lease_schema() -> Schema {
    Schema::new([
        Attribute::int("runtime_lease_in_sec")
            .required()
            .describe("0 means never expires"),
        Attribute::int("storage_lease_in_sec").required(),
    ])
}

fn schema() -> Schema {
    Schema::new([
        common::org(),
        Attribute::string(VDC).force_new(),
        Attribute::string("name")
            .required()
            .force_new()
            .validate(validate::non_empty),
        common::description(),
        Attribute::bool(POWER_ON).default(false),
        Attribute::string(STATUS_TEXT).computed(),
        Attribute::records(LEASE, lease_schema())
            .optional_computed()
            .max_items(1),
    ])
    .with(metadata_attributes(MetadataStyle::Legacy))
}

/// Writes the lease section when the declaration carries one.
struct LeaseHook;

#[async_trait]
impl PostHook for LeaseHook {
    fn name(&self) -> &'static str {
        "vapp-lease"
    }

    async fn run(
        &self,
        session: &Session,
        phase: HookPhase,
        id: &Urn,
        bag: &mut ResourceData,
    ) -> KernelResult<()> {
        if phase == HookPhase::Update && !bag.has_change(LEASE) {
            return Ok(());
        }
        let Some(lease) = bag.get_records(LEASE).first() else {
            return Ok(());
        };
        let body = json!({
            "deploymentLeaseInSeconds": lease.int_of("runtime_lease_in_sec").unwrap_or(0),
            "storageLeaseInSeconds": lease.int_of("storage_lease_in_sec").unwrap_or(0),
        });
        let task = session
            .client
            .put_config(&session.ctx, id, ConfigSection::VAppLease, body)
            .await?;
        session.waiter().wait(task).await?;
        Ok(())
    }
}

pub struct VApp {
    schema: Arc<Schema>,
}

impl VApp {
    pub fn new() -> Self {
        Self {
            schema: Arc::new(schema()),
        }
    }
}

impl Default for VApp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDescriptor for VApp {
    fn kind(&self) -> ResourceKind {
        kinds::VAPP
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::VApp
    }

    fn import_forms(&self) -> &'static [ImportForm] {
        FORMS
    }

    fn metadata_style(&self) -> Option<MetadataStyle> {
        Some(MetadataStyle::Legacy)
    }

    async fn resolve_parent(&self, session: &Session, bag: &ResourceData) -> KernelResult<ResolvedParent> {
        let rules = OwnerRules {
            allow_group: false,
            require_nsxt: false,
        };
        let (context, vdc) = session.resolver().resolve_owner(bag, rules).await?;
        Ok(ResolvedParent::new(context, Some(vdc.entity().clone())))
    }

    fn lock_keys(&self, bag: &ResourceData, parent: &ResolvedParent) -> Vec<LockKey> {
        let (Some(vdc), Some(name)) = (parent.container.as_ref(), bag.get_str("name")) else {
            return Vec::new();
        };
        let org = parent.context.org().unwrap_or(SYSTEM_ORG);
        vec![LockKey::vapp(org, &vdc.name, name)]
    }

    fn to_payload(&self, bag: &ResourceData, _parent: &ResolvedParent) -> KernelResult<Value> {
        Ok(json!({
            "name": bag.require_str("name")?,
            "description": bag.get_string("description"),
            "powerOn": bag.get_bool(POWER_ON),
        }))
    }

    fn from_payload(&self, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        bag.set("name", entity.name.as_str())?;
        bag.set("description", str_at(&entity.body, "/description"))
    }

    async fn after_read(&self, session: &Session, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        read_status(session, &entity.id, bag).await?;
        let lease = session
            .client
            .get_config(&session.ctx, &entity.id, ConfigSection::VAppLease)
            .await?;
        let record: AttrMap = attrs! {
            "runtime_lease_in_sec" => int_at(&lease.body, "/deploymentLeaseInSeconds"),
            "storage_lease_in_sec" => int_at(&lease.body, "/storageLeaseInSeconds"),
        };
        bag.set(LEASE, vec![record])
    }

    async fn import(&self, session: &Session, path: &ImportPath) -> KernelResult<ImportedResource> {
        path.classify(FORMS)?;
        let (org, vdc, vapp) = vapp_from_path(session, path).await?;
        Ok(ImportedResource {
            id: vapp.id.to_string(),
            attributes: attrs! {
                common::ORG => org.name,
                VDC => vdc.name,
            },
        })
    }

    fn post_create_hooks(&self) -> Vec<Arc<dyn PostHook>> {
        vec![Arc::new(LeaseHook)]
    }

    fn post_update_hooks(&self) -> Vec<Arc<dyn PostHook>> {
        vec![Arc::new(PowerHook), Arc::new(LeaseHook)]
    }
}
