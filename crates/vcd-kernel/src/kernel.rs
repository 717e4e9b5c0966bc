//! The reconciliation loop.
//!
//! Every public operation returns [`Diagnostics`] instead of an error; the
//! internal `try_*` functions use `?` and the wrappers turn the first error
//! into an error diagnostic next to any warnings gathered on the way.

use std::sync::Arc;

use tracing::{debug, info, warn};
use vcd_sdk::{OpContext, SharedClient, Urn};

use crate::bag::ResourceData;
use crate::config::KernelConfig;
use crate::descriptor::{
    DescriptorMode, DescriptorRegistry, HookPhase, Lifecycle, ResolvedParent, ResourceDescriptor,
    ResourceKind, SharedDescriptor,
};
use crate::diag::Diagnostics;
use crate::error::{KernelError, KernelResult};
use crate::import::ImportPath;
use crate::lock::LockBroker;
use crate::metadata::{self, trigger_attribute};
use crate::power::{PowerOffPolicy, PowerTarget, with_powered_off};
use crate::schema::{Plan, Schema};
use crate::session::Session;
use crate::task::{ProgressSink, TracingProgressSink};
use crate::value::AttrMap;

pub struct KernelBuilder {
    client: SharedClient,
    config: KernelConfig,
    locks: Option<Arc<LockBroker>>,
    progress: Arc<dyn ProgressSink>,
}

impl KernelBuilder {
    pub fn new(client: SharedClient) -> Self {
        Self {
            client,
            config: KernelConfig::default(),
            locks: None,
            progress: Arc::new(TracingProgressSink),
        }
    }

    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Share one lock table between several kernels in the same process.
    pub fn with_lock_broker(mut self, locks: Arc<LockBroker>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn build(self, registry: DescriptorRegistry) -> Kernel {
        Kernel {
            client: self.client,
            config: Arc::new(self.config),
            locks: self.locks.unwrap_or_default(),
            registry: Arc::new(registry),
            progress: self.progress,
        }
    }
}

pub struct Kernel {
    client: SharedClient,
    config: Arc<KernelConfig>,
    locks: Arc<LockBroker>,
    registry: Arc<DescriptorRegistry>,
    progress: Arc<dyn ProgressSink>,
}

impl Kernel {
    pub fn builder(client: SharedClient) -> KernelBuilder {
        KernelBuilder::new(client)
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn locks(&self) -> &LockBroker {
        &self.locks
    }

    pub fn session(&self, ctx: &OpContext) -> Session {
        Session {
            client: Arc::clone(&self.client),
            ctx: ctx.clone(),
            config: Arc::clone(&self.config),
            progress: Arc::clone(&self.progress),
        }
    }

    pub fn schema(&self, kind: ResourceKind) -> KernelResult<Arc<Schema>> {
        Ok(self.registry.get(kind)?.schema())
    }

    fn descriptor(&self, kind: ResourceKind, mode: DescriptorMode) -> KernelResult<SharedDescriptor> {
        let descriptor = Arc::clone(self.registry.get(kind)?);
        if descriptor.mode() != mode {
            return Err(KernelError::validation(format!(
                "{kind} is registered as a {:?}, not a {mode:?}",
                descriptor.mode()
            )));
        }
        Ok(descriptor)
    }

    // ---------------------------------------------------------------------
    // Public operations
    // ---------------------------------------------------------------------

    pub async fn create(&self, ctx: &OpContext, kind: ResourceKind, bag: &mut ResourceData) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if let Err(err) = self.try_create(ctx, kind, bag, &mut diags).await {
            warn!(kind = %kind, error = %err, "create failed");
            diags.error(&err);
        }
        diags
    }

    pub async fn read(&self, ctx: &OpContext, kind: ResourceKind, bag: &mut ResourceData) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let result = async {
            let descriptor = self.descriptor(kind, DescriptorMode::Resource)?;
            let session = self.session(ctx);
            self.read_inner(&session, descriptor.as_ref(), bag).await
        }
        .await;
        if let Err(err) = result {
            warn!(kind = %kind, error = %err, "read failed");
            diags.error(&err);
        }
        diags
    }

    pub async fn read_data_source(
        &self,
        ctx: &OpContext,
        kind: ResourceKind,
        bag: &mut ResourceData,
    ) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if let Err(err) = self.try_read_data_source(ctx, kind, bag, &mut diags).await {
            warn!(kind = %kind, error = %err, "data source read failed");
            diags.error(&err);
        }
        diags
    }

    pub async fn update(&self, ctx: &OpContext, kind: ResourceKind, bag: &mut ResourceData) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if let Err(err) = self.try_update(ctx, kind, bag, &mut diags).await {
            warn!(kind = %kind, id = ?bag.id(), error = %err, "update failed");
            diags.error(&err);
        }
        diags
    }

    pub async fn delete(&self, ctx: &OpContext, kind: ResourceKind, bag: &mut ResourceData) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if let Err(err) = self.try_delete(ctx, kind, bag).await {
            warn!(kind = %kind, id = ?bag.id(), error = %err, "delete failed");
            diags.error(&err);
        }
        diags
    }

    /// Resolve an import path to a bag holding just the ID and the scope
    /// attributes; the host reads it next.
    pub async fn import(
        &self,
        ctx: &OpContext,
        kind: ResourceKind,
        path: &str,
    ) -> Result<ResourceData, Diagnostics> {
        self.try_import(ctx, kind, path).await.map_err(|err| {
            warn!(kind = %kind, path, error = %err, "import failed");
            Diagnostics::from(err)
        })
    }

    pub fn plan(
        &self,
        kind: ResourceKind,
        prior: Option<&AttrMap>,
        desired: &AttrMap,
    ) -> KernelResult<Plan> {
        let schema = self.schema(kind)?;
        schema.validate(desired)?;
        Ok(schema.plan(prior, desired))
    }

    // ---------------------------------------------------------------------
    // Flows
    // ---------------------------------------------------------------------

    fn validate(
        &self,
        session: &Session,
        descriptor: &dyn ResourceDescriptor,
        bag: &ResourceData,
        diags: &mut Diagnostics,
    ) -> KernelResult<()> {
        let desired = bag
            .desired()
            .ok_or_else(|| KernelError::validation("no desired configuration supplied"))?;
        let schema = descriptor.schema();
        schema.validate(desired)?;
        descriptor.validate(bag)?;
        schema.check_api_version(desired, session.api_version())?;
        for (name, notice) in schema.deprecations(desired) {
            diags.warn(format!("attribute `{name}` is deprecated"), Some(notice.to_string()));
        }
        Ok(())
    }

    async fn try_create(
        &self,
        ctx: &OpContext,
        kind: ResourceKind,
        bag: &mut ResourceData,
        diags: &mut Diagnostics,
    ) -> KernelResult<()> {
        ctx.check()?;
        let descriptor = self.descriptor(kind, DescriptorMode::Resource)?;
        let session = self.session(ctx);
        self.validate(&session, descriptor.as_ref(), bag, diags)?;
        debug!(kind = %kind, "create");

        let parent = descriptor.resolve_parent(&session, bag).await?;
        {
            let _guard = self
                .locks
                .acquire_all(ctx, descriptor.lock_keys(bag, &parent))
                .await?;
            let payload = descriptor.to_payload(bag, &parent)?;
            let id = match descriptor.lifecycle() {
                Lifecycle::Object => {
                    let task = self
                        .client
                        .create(ctx, descriptor.entity_kind(), parent.container_id(), payload)
                        .await?;
                    let waiter = session.waiter();
                    let task = match descriptor.upload_progress_label() {
                        Some(label) => waiter.wait_with_progress(task, label).await?,
                        None => waiter.wait(task).await?,
                    };
                    task.result.ok_or_else(|| {
                        KernelError::payload(format!("create task {} returned no object", task.id))
                    })?
                }
                Lifecycle::ParentConfig(section) => {
                    let owner = parent.require_container()?.id.clone();
                    let task = self.client.put_config(ctx, &owner, section, payload).await?;
                    session.waiter().wait(task).await?;
                    owner
                }
            };
            bag.set_id(id.to_string());
            info!(kind = %kind, id = %id, "created");
            self.run_hooks(&session, descriptor.as_ref(), HookPhase::Create, &id, bag)
                .await?;
        }
        self.read_inner(&session, descriptor.as_ref(), bag).await
    }

    async fn run_hooks(
        &self,
        session: &Session,
        descriptor: &dyn ResourceDescriptor,
        phase: HookPhase,
        id: &Urn,
        bag: &mut ResourceData,
    ) -> KernelResult<()> {
        if let Some(style) = descriptor.metadata_style() {
            let trigger = trigger_attribute(style);
            let wanted = match phase {
                HookPhase::Create => bag.is_set(trigger),
                HookPhase::Update => bag.has_change(trigger),
            };
            if wanted {
                metadata::write_metadata(session, id, style, bag).await?;
            }
        }
        let hooks = match phase {
            HookPhase::Create => descriptor.post_create_hooks(),
            HookPhase::Update => descriptor.post_update_hooks(),
        };
        for hook in hooks {
            debug!(hook = hook.name(), id = %id, "running post hook");
            hook.run(session, phase, id, bag).await?;
        }
        Ok(())
    }

    async fn read_inner(
        &self,
        session: &Session,
        descriptor: &dyn ResourceDescriptor,
        bag: &mut ResourceData,
    ) -> KernelResult<()> {
        session.ctx.check()?;
        let Some(raw) = bag.id() else {
            return Ok(());
        };
        let id = session.urn(raw)?;
        let fetched = match descriptor.lifecycle() {
            Lifecycle::Object => session.fetch(&id).await,
            Lifecycle::ParentConfig(section) => self
                .client
                .get_config(&session.ctx, &id, section)
                .await
                .map_err(KernelError::from),
        };
        let entity = match fetched {
            Ok(entity) => entity,
            Err(err) if err.is_not_found() => {
                warn!(kind = %descriptor.kind(), id = %id, "object gone from the remote, clearing ID");
                bag.clear_id();
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        self.populate(session, descriptor, &entity, bag).await
    }

    async fn populate(
        &self,
        session: &Session,
        descriptor: &dyn ResourceDescriptor,
        entity: &vcd_sdk::Entity,
        bag: &mut ResourceData,
    ) -> KernelResult<()> {
        descriptor.from_payload(entity, bag)?;
        if let Some(style) = descriptor.metadata_style() {
            metadata::read_metadata(session, &entity.id, style, bag).await?;
        }
        descriptor.after_read(session, entity, bag).await
    }

    async fn try_read_data_source(
        &self,
        ctx: &OpContext,
        kind: ResourceKind,
        bag: &mut ResourceData,
        diags: &mut Diagnostics,
    ) -> KernelResult<()> {
        ctx.check()?;
        let descriptor = self.descriptor(kind, DescriptorMode::DataSource)?;
        let session = self.session(ctx);
        self.validate(&session, descriptor.as_ref(), bag, diags)?;
        let entity = descriptor.lookup(&session, bag).await?;
        bag.set_id(entity.id.to_string());
        self.populate(&session, descriptor.as_ref(), &entity, bag).await
    }

    async fn try_update(
        &self,
        ctx: &OpContext,
        kind: ResourceKind,
        bag: &mut ResourceData,
        diags: &mut Diagnostics,
    ) -> KernelResult<()> {
        ctx.check()?;
        let descriptor = self.descriptor(kind, DescriptorMode::Resource)?;
        let session = self.session(ctx);
        self.validate(&session, descriptor.as_ref(), bag, diags)?;

        let changed = bag.changed_attributes();
        let schema = descriptor.schema();
        if let Some(forced) = changed.iter().find(|name| schema.is_force_new(name)) {
            return Err(KernelError::validation(format!(
                "attribute `{forced}` cannot change in place; the resource must be replaced"
            )));
        }
        let cosmetic = descriptor.cosmetic_attributes();
        let metadata_trigger = descriptor.metadata_style().map(trigger_attribute);
        let needs_remote = changed
            .iter()
            .any(|name| !cosmetic.contains(name) && Some(*name) != metadata_trigger);
        let needs_hooks = changed.iter().any(|name| !cosmetic.contains(name));

        if !needs_hooks {
            debug!(kind = %kind, ?changed, "only cosmetic attributes changed");
            return self.read_inner(&session, descriptor.as_ref(), bag).await;
        }

        let raw = bag
            .id()
            .ok_or_else(|| KernelError::validation("update called without an ID"))?;
        let id = session.urn(raw)?;
        let parent = descriptor.resolve_parent(&session, bag).await?;
        {
            let _guard = self
                .locks
                .acquire_all(ctx, descriptor.lock_keys(bag, &parent))
                .await?;
            if needs_remote {
                let attempt = self
                    .apply_update(&session, descriptor.as_ref(), &id, &parent, bag)
                    .await;
                self.retry_powered_off(&session, descriptor.power_off_policy(), &id, &parent, bag, attempt, || {
                    self.apply_update(&session, descriptor.as_ref(), &id, &parent, bag)
                })
                .await?;
                info!(kind = %kind, id = %id, ?changed, "updated");
            }
            self.run_hooks(&session, descriptor.as_ref(), HookPhase::Update, &id, bag)
                .await?;
        }
        self.read_inner(&session, descriptor.as_ref(), bag).await
    }

    /// Re-run a refused mutation with the target stopped when the kind opts
    /// in; otherwise attach the hint naming the opt-in attribute.
    #[allow(clippy::too_many_arguments)]
    async fn retry_powered_off<F, Fut>(
        &self,
        session: &Session,
        policy: Option<PowerOffPolicy>,
        id: &Urn,
        parent: &ResolvedParent,
        bag: &ResourceData,
        attempt: KernelResult<()>,
        retry: F,
    ) -> KernelResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = KernelResult<()>>,
    {
        let err = match attempt {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        let Some(policy) = policy else {
            return Err(err);
        };
        if !err.requires_power_off() {
            return Err(err);
        }
        if !policy.allows(bag) {
            return Err(policy.decorate(err));
        }
        let target = match policy.target {
            PowerTarget::Itself => id.clone(),
            PowerTarget::Container => parent.require_container()?.id.clone(),
        };
        info!(object = %target, "remote requires power off, retrying with the target stopped");
        with_powered_off(session, &target, retry).await
    }

    async fn apply_update(
        &self,
        session: &Session,
        descriptor: &dyn ResourceDescriptor,
        id: &Urn,
        parent: &ResolvedParent,
        bag: &ResourceData,
    ) -> KernelResult<()> {
        let payload = descriptor.to_payload(bag, parent)?;
        let task = match descriptor.lifecycle() {
            Lifecycle::Object => {
                // Fresh handle for a current ETag.
                let current = session.fetch(id).await?;
                self.client
                    .update(&session.ctx, id, &current.etag, payload)
                    .await?
            }
            Lifecycle::ParentConfig(section) => {
                self.client
                    .put_config(&session.ctx, id, section, payload)
                    .await?
            }
        };
        session.waiter().wait(task).await?;
        Ok(())
    }

    async fn try_delete(&self, ctx: &OpContext, kind: ResourceKind, bag: &mut ResourceData) -> KernelResult<()> {
        ctx.check()?;
        let descriptor = self.descriptor(kind, DescriptorMode::Resource)?;
        let session = self.session(ctx);
        let Some(raw) = bag.id() else {
            return Ok(());
        };
        let id = session.urn(raw)?;
        debug!(kind = %kind, id = %id, "delete");

        let parent = match descriptor.resolve_parent(&session, bag).await {
            Ok(parent) => parent,
            Err(err) if err.is_not_found() => {
                info!(kind = %kind, id = %id, error = %err, "parent already gone, nothing to delete");
                bag.clear_id();
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        {
            let _guard = self
                .locks
                .acquire_all(ctx, descriptor.lock_keys(bag, &parent))
                .await?;
            let attempt = self
                .apply_delete(&session, descriptor.as_ref(), &id, bag)
                .await;
            let result = self
                .retry_powered_off(&session, descriptor.power_off_policy(), &id, &parent, bag, attempt, || {
                    self.apply_delete(&session, descriptor.as_ref(), &id, bag)
                })
                .await;
            match result {
                Ok(()) => info!(kind = %kind, id = %id, "deleted"),
                Err(err) if err.is_not_found() => {
                    debug!(kind = %kind, id = %id, "already deleted");
                }
                Err(err) => return Err(err),
            }
        }
        bag.clear_id();
        Ok(())
    }

    async fn apply_delete(
        &self,
        session: &Session,
        descriptor: &dyn ResourceDescriptor,
        id: &Urn,
        bag: &ResourceData,
    ) -> KernelResult<()> {
        let task = match descriptor.lifecycle() {
            Lifecycle::Object => {
                let force = descriptor
                    .force_delete_attribute()
                    .is_some_and(|attr| bag.get_bool(attr));
                self.client.delete(&session.ctx, id, force).await?
            }
            Lifecycle::ParentConfig(section) => {
                self.client
                    .put_config(&session.ctx, id, section, descriptor.reset_payload())
                    .await?
            }
        };
        session.waiter().wait(task).await?;
        Ok(())
    }

    async fn try_import(&self, ctx: &OpContext, kind: ResourceKind, raw: &str) -> KernelResult<ResourceData> {
        ctx.check()?;
        let descriptor = self.descriptor(kind, DescriptorMode::Resource)?;
        let session = self.session(ctx);
        let path = ImportPath::parse(raw, &self.config.import_separator)?;
        let imported = descriptor.import(&session, &path).await?;
        let mut bag = ResourceData::for_import(descriptor.schema());
        for (name, value) in imported.attributes {
            bag.set(&name, value)?;
        }
        bag.set_id(imported.id);
        info!(kind = %kind, id = ?bag.id(), "imported");
        Ok(bag)
    }
}
