//! Per-kind descriptors and the registry the kernel dispatches through.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use vcd_sdk::{ConfigSection, Entity, EntityKind, Urn};

use crate::bag::ResourceData;
use crate::error::{KernelError, KernelResult};
use crate::identity::ParentContext;
use crate::import::{ImportForm, ImportPath, ImportedResource};
use crate::lock::LockKey;
use crate::metadata::MetadataStyle;
use crate::power::PowerOffPolicy;
use crate::schema::Schema;
use crate::session::Session;

/// Typed key of a registered kind, e.g. `vcd_nsxt_nat_rule`.
///
/// Data sources share the namespace with a `data.` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKind(&'static str);

impl ResourceKind {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }

    pub fn is_data_source(&self) -> bool {
        self.0.starts_with("data.")
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// What Create and Delete mean for a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// A remote object with its own URN.
    Object,
    /// A configuration section on the parent; the ID is the parent's URN and
    /// Delete resets the section.
    ParentConfig(ConfigSection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorMode {
    Resource,
    DataSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Create,
    Update,
}

/// Outcome of parent resolution.
#[derive(Debug, Clone)]
pub struct ResolvedParent {
    pub context: ParentContext,
    /// Object the resource is created under or configured on.
    pub container: Option<Entity>,
    /// Other objects the payload refers to, looked up alongside the parent.
    pub related: Vec<(&'static str, Entity)>,
    /// Keys for other parents the mutation touches, found during resolution.
    pub extra_locks: Vec<LockKey>,
}

impl ResolvedParent {
    pub fn new(context: ParentContext, container: Option<Entity>) -> Self {
        Self {
            context,
            container,
            related: Vec::new(),
            extra_locks: Vec::new(),
        }
    }

    pub fn with_related(mut self, role: &'static str, entity: Entity) -> Self {
        self.related.push((role, entity));
        self
    }

    pub fn with_locks(mut self, keys: impl IntoIterator<Item = LockKey>) -> Self {
        self.extra_locks.extend(keys);
        self
    }

    pub fn related(&self, role: &str) -> KernelResult<&Entity> {
        self.related
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, e)| e)
            .ok_or_else(|| KernelError::payload(format!("{role} was not resolved")))
    }

    pub fn container_id(&self) -> Option<&Urn> {
        self.container.as_ref().map(|c| &c.id)
    }

    pub fn require_container(&self) -> KernelResult<&Entity> {
        self.container
            .as_ref()
            .ok_or_else(|| KernelError::payload("parent object was not resolved"))
    }
}

/// Sub-step run after the main mutation, in declaration order.
#[async_trait]
pub trait PostHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        session: &Session,
        phase: HookPhase,
        id: &Urn,
        bag: &mut ResourceData,
    ) -> KernelResult<()>;
}

/// Everything the kernel needs to know about one kind.
#[async_trait]
pub trait ResourceDescriptor: Send + Sync {
    fn kind(&self) -> ResourceKind;
    fn schema(&self) -> Arc<Schema>;
    fn entity_kind(&self) -> EntityKind;

    fn mode(&self) -> DescriptorMode {
        DescriptorMode::Resource
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Object
    }

    fn import_forms(&self) -> &'static [ImportForm] {
        &[]
    }

    /// Attributes whose change alone needs no remote call.
    fn cosmetic_attributes(&self) -> &'static [&'static str] {
        &[]
    }

    fn metadata_style(&self) -> Option<MetadataStyle> {
        None
    }

    fn power_off_policy(&self) -> Option<PowerOffPolicy> {
        None
    }

    /// Boolean attribute that selects the recursive delete variant.
    fn force_delete_attribute(&self) -> Option<&'static str> {
        None
    }

    /// Label for per-poll progress lines while the create task runs.
    fn upload_progress_label(&self) -> Option<&'static str> {
        None
    }

    /// Rules the schema cannot express; runs before any remote call.
    fn validate(&self, _bag: &ResourceData) -> KernelResult<()> {
        Ok(())
    }

    async fn resolve_parent(&self, session: &Session, bag: &ResourceData) -> KernelResult<ResolvedParent>;

    fn lock_keys(&self, _bag: &ResourceData, _parent: &ResolvedParent) -> Vec<LockKey> {
        Vec::new()
    }

    fn to_payload(&self, bag: &ResourceData, parent: &ResolvedParent) -> KernelResult<Value>;

    fn from_payload(&self, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()>;

    /// Body written on Delete for configuration sections.
    fn reset_payload(&self) -> Value {
        Value::Object(Default::default())
    }

    /// Extra reads once the main payload is in the bag.
    async fn after_read(
        &self,
        _session: &Session,
        _entity: &Entity,
        _bag: &mut ResourceData,
    ) -> KernelResult<()> {
        Ok(())
    }

    async fn import(&self, _session: &Session, path: &ImportPath) -> KernelResult<ImportedResource> {
        Err(KernelError::validation(format!(
            "{} does not support import (path '{}')",
            self.kind(),
            path.raw()
        )))
    }

    /// Data source lookup from the declared arguments.
    async fn lookup(&self, _session: &Session, _bag: &ResourceData) -> KernelResult<Entity> {
        Err(KernelError::validation(format!(
            "{} is not a data source",
            self.kind()
        )))
    }

    fn post_create_hooks(&self) -> Vec<Arc<dyn PostHook>> {
        Vec::new()
    }

    fn post_update_hooks(&self) -> Vec<Arc<dyn PostHook>> {
        Vec::new()
    }
}

pub type SharedDescriptor = Arc<dyn ResourceDescriptor>;

/// Startup-built table of descriptors.
#[derive(Default, Clone)]
pub struct DescriptorRegistry {
    by_kind: IndexMap<ResourceKind, SharedDescriptor>,
    by_name: HashMap<&'static str, ResourceKind>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: impl ResourceDescriptor + 'static) -> KernelResult<()> {
        let kind = descriptor.kind();
        if self.by_kind.contains_key(&kind) {
            return Err(KernelError::validation(format!(
                "resource kind '{kind}' registered twice"
            )));
        }
        self.by_name.insert(kind.name(), kind);
        self.by_kind.insert(kind, Arc::new(descriptor));
        Ok(())
    }

    pub fn get(&self, kind: ResourceKind) -> KernelResult<&SharedDescriptor> {
        self.by_kind
            .get(&kind)
            .ok_or_else(|| KernelError::UnknownKind(kind.to_string()))
    }

    /// Resolve a host-supplied type name once, at the boundary.
    pub fn resolve_name(&self, name: &str) -> KernelResult<ResourceKind> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| KernelError::UnknownKind(name.to_string()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.by_kind.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}
