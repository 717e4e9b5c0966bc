//! VM inside a vApp.
//!
//! Some hardware settings (hot-add flags, firmware) are only accepted while
//! the VM is stopped. With `prevent_update_power_off = false` the kernel
//! stops the VM, applies the change and starts it again; otherwise the
//! refusal is reported with a hint naming that flag.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use vcd_kernel::metadata::metadata_attributes;
use vcd_kernel::power::ForceCustomizationHook;
use vcd_kernel::{
    AttrMap, AttrValue, Attribute, ImportForm, ImportPath, ImportedResource, KernelResult, LockKey,
    MetadataStyle, PathScope, PostHook, PowerOffPolicy, PowerTarget, RecordExt, ResolvedParent,
    ResourceData, ResourceDescriptor, ResourceKind, Schema, Session, attrs, validate,
};
use vcd_sdk::{Entity, EntityKind};

use super::{
    POWER_ON, PowerHook, STATUS_TEXT, VAPP_NAME, read_status, resolve_vapp, vapp_from_path,
    vapp_lock,
};
use crate::common::{self, VDC, bool_at, int_at, str_at};
use crate::kinds;

const CUSTOMIZATION: &str = "customization";
const PREVENT_POWER_OFF: &str = "prevent_update_power_off";

const FORMS: &[ImportForm] = &[ImportForm::new(
    PathScope::VApp,
    &["org-name", "vdc-name", "vapp-name", "vm-name"],
)];

fn check_firmware(value: &AttrValue) -> Result<(), String> {
    validate::one_of(value, &["bios", "efi"])
}

fn customization_schema() -> Schema {
    Schema::new([
        Attribute::bool("force")
            .default(false)
            .describe("Re-run guest customization on the next apply; reset to false afterwards"),
        Attribute::bool("enabled").default(false),
        Attribute::bool("allow_local_admin_password").default(false),
        Attribute::bool("auto_generate_password").default(false),
        Attribute::string("admin_password").sensitive(),
    ])
}

fn schema() -> Schema {
    Schema::new([
        common::org(),
        Attribute::string(VDC).force_new(),
        Attribute::string(VAPP_NAME).required().force_new(),
        common::name(),
        common::description(),
        Attribute::string("computer_name").optional_computed(),
        Attribute::int("memory").default(1024).validate(validate::positive),
        Attribute::int("cpus").default(1).validate(validate::positive),
        Attribute::int("cpu_cores").default(1).validate(validate::positive),
        Attribute::bool("cpu_hot_add_enabled").default(false),
        Attribute::bool("memory_hot_add_enabled").default(false),
        Attribute::string("firmware").default("bios").validate(check_firmware),
        Attribute::bool(POWER_ON).default(true),
        Attribute::bool(PREVENT_POWER_OFF)
            .default(false)
            .describe("Fail instead of stopping the VM for changes that need it off"),
        Attribute::string("vapp_template_id")
            .force_new()
            .validate(validate::urn),
        Attribute::bool("copy_tpm_on_instantiate")
            .force_new()
            .min_api_version(37, 2),
        Attribute::records(CUSTOMIZATION, customization_schema())
            .optional_computed()
            .max_items(1),
        Attribute::string(STATUS_TEXT).computed(),
    ])
    .with(metadata_attributes(MetadataStyle::Legacy))
}

fn customization_payload(bag: &ResourceData) -> Value {
    let empty = AttrMap::new();
    let block = bag.get_records(CUSTOMIZATION).first().unwrap_or(&empty);
    json!({
        "enabled": block.bool_of("enabled"),
        "allowLocalAdminPassword": block.bool_of("allow_local_admin_password"),
        "autoGeneratePassword": block.bool_of("auto_generate_password"),
        "adminPassword": block.str_of("admin_password"),
    })
}

pub struct VAppVm {
    schema: Arc<Schema>,
}

impl VAppVm {
    pub fn new() -> Self {
        Self {
            schema: Arc::new(schema()),
        }
    }
}

impl Default for VAppVm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDescriptor for VAppVm {
    fn kind(&self) -> ResourceKind {
        kinds::VAPP_VM
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Vm
    }

    fn import_forms(&self) -> &'static [ImportForm] {
        FORMS
    }

    fn cosmetic_attributes(&self) -> &'static [&'static str] {
        &[PREVENT_POWER_OFF]
    }

    fn metadata_style(&self) -> Option<MetadataStyle> {
        Some(MetadataStyle::Legacy)
    }

    fn power_off_policy(&self) -> Option<PowerOffPolicy> {
        Some(PowerOffPolicy {
            attribute: PREVENT_POWER_OFF,
            allowed_when: false,
            target: PowerTarget::Itself,
        })
    }

    async fn resolve_parent(&self, session: &Session, bag: &ResourceData) -> KernelResult<ResolvedParent> {
        resolve_vapp(session, bag).await
    }

    fn lock_keys(&self, _bag: &ResourceData, parent: &ResolvedParent) -> Vec<LockKey> {
        vapp_lock(parent)
    }

    fn to_payload(&self, bag: &ResourceData, _parent: &ResolvedParent) -> KernelResult<Value> {
        let name = bag.require_str("name")?;
        Ok(json!({
            "name": name,
            "description": bag.get_string("description"),
            "computerName": bag.get_str("computer_name").unwrap_or(name),
            "cpus": bag.get_int("cpus"),
            "coresPerSocket": bag.get_int("cpu_cores"),
            "memory": bag.get_int("memory"),
            "cpuHotAddEnabled": bag.get_bool("cpu_hot_add_enabled"),
            "memoryHotAddEnabled": bag.get_bool("memory_hot_add_enabled"),
            "firmware": bag.get_string("firmware"),
            "powerOn": bag.get_bool(POWER_ON),
            "vAppTemplateId": common::opt_str(bag, "vapp_template_id"),
            "copyTpmOnInstantiate": bag.get("copy_tpm_on_instantiate").and_then(AttrValue::as_bool),
            "guestCustomization": customization_payload(bag),
        }))
    }

    fn from_payload(&self, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        let body = &entity.body;
        bag.set("name", entity.name.as_str())?;
        bag.set("description", str_at(body, "/description"))?;
        bag.set("computer_name", str_at(body, "/computerName"))?;
        bag.set("cpus", int_at(body, "/cpus"))?;
        bag.set("cpu_cores", int_at(body, "/coresPerSocket"))?;
        bag.set("memory", int_at(body, "/memory"))?;
        bag.set("cpu_hot_add_enabled", bool_at(body, "/cpuHotAddEnabled"))?;
        bag.set("memory_hot_add_enabled", bool_at(body, "/memoryHotAddEnabled"))?;
        bag.set("firmware", str_at(body, "/firmware"))?;
        bag.set("vapp_template_id", str_at(body, "/vAppTemplateId"))?;
        bag.set(
            "copy_tpm_on_instantiate",
            body.get("copyTpmOnInstantiate").and_then(Value::as_bool),
        )?;
        // `force` is a trigger, never remote state.
        let customization = attrs! {
            "force" => false,
            "enabled" => bool_at(body, "/guestCustomization/enabled"),
            "allow_local_admin_password" => bool_at(body, "/guestCustomization/allowLocalAdminPassword"),
            "auto_generate_password" => bool_at(body, "/guestCustomization/autoGeneratePassword"),
            "admin_password" => str_at(body, "/guestCustomization/adminPassword"),
        };
        bag.set(CUSTOMIZATION, vec![customization])
    }

    async fn after_read(&self, session: &Session, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        read_status(session, &entity.id, bag).await
    }

    async fn import(&self, session: &Session, path: &ImportPath) -> KernelResult<ImportedResource> {
        path.classify(FORMS)?;
        let (org, vdc, vapp) = vapp_from_path(session, path).await?;
        let vm = common::child_from_path(session, &vapp.id, EntityKind::Vm, path).await?;
        Ok(ImportedResource {
            id: vm.id.to_string(),
            attributes: attrs! {
                common::ORG => org.name,
                VDC => vdc.name,
                VAPP_NAME => vapp.name,
            },
        })
    }

    fn post_create_hooks(&self) -> Vec<Arc<dyn PostHook>> {
        vec![Arc::new(ForceCustomizationHook {
            attribute: CUSTOMIZATION,
        })]
    }

    fn post_update_hooks(&self) -> Vec<Arc<dyn PostHook>> {
        vec![
            Arc::new(PowerHook),
            Arc::new(ForceCustomizationHook {
                attribute: CUSTOMIZATION,
            }),
        ]
    }
}
