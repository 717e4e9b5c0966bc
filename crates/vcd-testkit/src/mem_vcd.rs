//! In-memory Cloud Director.
//!
//! Objects live in one insertion-ordered table keyed by URN; tasks advance one
//! step per `get_task` poll. Effects are applied when a mutation is accepted,
//! so a task that is later reported as failed (see [`MemVcd::abort_next_task`])
//! never touches the table.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;
use vcd_sdk::{
    ApiVersion, ConfigSection, Entity, EntityKind, GC_PENDING, LegacyMetadataEntry, MetadataEntry,
    OpContext, PowerOnOptions, PowerState, PowerStatus, Query, SdkError, SdkResult, Task,
    TaskStatus, Urn, VcdClient,
};

/// Task operation names reported for power changes and legacy metadata.
pub mod ops {
    pub const STOP_VM: &str = "vmUndeployPowerOff";
    pub const STOP_VAPP: &str = "vappUndeployPowerOff";
    pub const POWER_ON_VM: &str = "vmPowerOn";
    pub const POWER_ON_VAPP: &str = "vappDeploy";
    pub const METADATA_UPDATE: &str = "metadataUpdate";
    pub const METADATA_DELETE: &str = "metadataDelete";
}

const STOP_FIRST: &str = "Stop the vApp and try again.";

/// VM fields the remote refuses to change on a running VM.
const COLD_VM_FIELDS: [&str; 3] = ["cpuHotAddEnabled", "memoryHotAddEnabled", "firmware"];

/// Fields the remote fills in and keeps across updates.
const SERVER_FIELDS: [&str; 1] = ["catalogItemId"];

const GC_COMPLETE: &str = "GC_COMPLETE";

/// One client call as seen by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub seq: u64,
    pub op: &'static str,
    pub target: Option<Urn>,
}

/// Span during which `parent` had an unfinished mutation task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationWindow {
    pub parent: Urn,
    pub task: Urn,
    pub opened: u64,
    pub closed: Option<u64>,
}

impl MutationWindow {
    pub fn overlaps(&self, other: &MutationWindow) -> bool {
        let end = |w: &MutationWindow| w.closed.unwrap_or(u64::MAX);
        self.opened < end(other) && other.opened < end(self)
    }
}

struct PendingTask {
    task: Task,
    remaining: u32,
    total: u32,
    report_progress: bool,
    failure: Option<String>,
    busy: Option<Urn>,
}

struct Settings {
    api_version: ApiVersion,
    task_latency: u32,
    upload_polls: u32,
    sync_lag: u32,
    item_id_lag: u32,
    customization_polls: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_version: ApiVersion::new(38, 0),
            task_latency: 1,
            upload_polls: 3,
            sync_lag: 2,
            item_id_lag: 1,
            customization_polls: 2,
        }
    }
}

#[derive(Default)]
struct State {
    settings: Settings,
    seq: u64,
    entities: IndexMap<Urn, Entity>,
    configs: HashMap<(Urn, ConfigSection), Value>,
    power: HashMap<Urn, PowerStatus>,
    customization: HashMap<Urn, u32>,
    legacy_metadata: HashMap<Urn, Vec<LegacyMetadataEntry>>,
    metadata: HashMap<Urn, Vec<MetadataEntry>>,
    tasks: IndexMap<Urn, PendingTask>,
    busy: HashMap<Urn, Urn>,
    windows: Vec<MutationWindow>,
    calls: Vec<CallRecord>,
    faults: Vec<(&'static str, SdkError)>,
    aborts: Vec<(String, String)>,
    unsynced: HashMap<Urn, u32>,
    pending_item_ids: HashMap<Urn, (u32, Urn)>,
}

fn new_urn(entity_type: &str) -> Urn {
    Urn::new(entity_type, &Uuid::new_v4().to_string())
}

fn bump(etag: &str) -> String {
    (etag.parse::<u64>().unwrap_or(0) + 1).to_string()
}

fn default_config(section: ConfigSection) -> Value {
    match section {
        ConfigSection::DnsForwarder => json!({
            "enabled": false,
            "listenerIp": null,
            "snatRuleEnabled": false,
            "snatRuleIpAddress": null,
            "defaultForwarderZone": null,
            "conditionalForwarderZones": [],
        }),
        ConfigSection::DhcpForwarding => json!({"enabled": false, "dhcpServers": []}),
        ConfigSection::IpsecSecurityProfile => json!({"securityType": "DEFAULT"}),
        ConfigSection::VAppLease => json!({
            "deploymentLeaseInSeconds": 0,
            "storageLeaseInSeconds": 0,
        }),
    }
}

impl State {
    fn tick(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn entity(&self, id: &Urn) -> SdkResult<&Entity> {
        self.entities
            .get(id)
            .ok_or_else(|| SdkError::not_found(id.to_string()))
    }

    fn insert(&mut self, kind: EntityKind, parent: Option<Urn>, name: String, body: Value) -> Urn {
        let id = new_urn(kind.urn_type());
        self.entities.insert(
            id.clone(),
            Entity {
                id: id.clone(),
                kind,
                name,
                parent,
                etag: "1".into(),
                body,
            },
        );
        self.on_created(&id);
        id
    }

    fn on_created(&mut self, id: &Urn) {
        let Some(entity) = self.entities.get(id) else {
            return;
        };
        let kind = entity.kind;
        let power_on = entity.bool_field("powerOn");
        match kind {
            EntityKind::VApp | EntityKind::Vm => self.apply_power(id, power_on),
            EntityKind::VAppTemplate => {
                let lag = self.settings.sync_lag;
                self.unsynced.insert(id.clone(), lag);
                let item = new_urn("catalogitem");
                match self.settings.item_id_lag {
                    0 => self.publish_item_id(id, &item),
                    lag => {
                        self.pending_item_ids.insert(id.clone(), (lag, item));
                    }
                }
            }
            _ => {}
        }
    }

    fn publish_item_id(&mut self, id: &Urn, item: &Urn) {
        if let Some(body) = self.entities.get_mut(id).and_then(|e| e.body.as_object_mut()) {
            body.insert("catalogItemId".into(), Value::String(item.to_string()));
        }
    }

    fn release_item_id(&mut self, id: &Urn) {
        let ready = match self.pending_item_ids.get_mut(id) {
            Some((left, item)) => {
                *left = left.saturating_sub(1);
                (*left == 0).then(|| item.clone())
            }
            None => None,
        };
        if let Some(item) = ready {
            self.pending_item_ids.remove(id);
            self.publish_item_id(id, &item);
        }
    }

    fn name_taken(&self, kind: EntityKind, parent: Option<&Urn>, name: &str) -> bool {
        self.entities
            .values()
            .any(|e| e.kind == kind && e.parent.as_ref() == parent && e.name == name)
    }

    fn children(&self, parent: &Urn, kind: EntityKind) -> Vec<Urn> {
        self.entities
            .values()
            .filter(|e| e.kind == kind && e.parent.as_ref() == Some(parent))
            .map(|e| e.id.clone())
            .collect()
    }

    /// Edge gateways and vApps reject a second writer while a task runs.
    fn busy_key(&self, parent: Option<&Urn>) -> Option<Urn> {
        let parent = parent?;
        match self.entities.get(parent)?.kind {
            EntityKind::EdgeGateway | EntityKind::VApp => Some(parent.clone()),
            _ => None,
        }
    }

    fn check_busy(&self, key: Option<&Urn>) -> SdkResult<()> {
        match key.and_then(|k| self.busy.get(k).map(|task| (k, task))) {
            Some((key, task)) => Err(SdkError::rejected(
                409,
                format!("{key} is busy completing task {task}, try again later"),
            )),
            None => Ok(()),
        }
    }

    fn take_abort(&mut self, operation: &str) -> Option<String> {
        let idx = self
            .aborts
            .iter()
            .position(|(prefix, _)| operation.starts_with(prefix.as_str()))?;
        Some(self.aborts.remove(idx).1)
    }

    fn submit(
        &mut self,
        operation: String,
        owner: Option<Urn>,
        result: Option<Urn>,
        busy: Option<Urn>,
        failure: Option<String>,
        upload: bool,
    ) -> Task {
        let polls = if upload {
            self.settings.upload_polls
        } else {
            self.settings.task_latency
        };
        let id = new_urn("task");
        let task = Task {
            id: id.clone(),
            operation,
            owner,
            status: TaskStatus::Running,
            progress: upload.then_some(0),
            result: if failure.is_some() { None } else { result },
            error: None,
        };
        if let Some(parent) = &busy {
            let opened = self.tick();
            self.busy.insert(parent.clone(), id.clone());
            self.windows.push(MutationWindow {
                parent: parent.clone(),
                task: id.clone(),
                opened,
                closed: None,
            });
        }
        self.tasks.insert(
            id.clone(),
            PendingTask {
                task,
                remaining: polls,
                total: polls.max(1),
                report_progress: upload,
                failure,
                busy,
            },
        );
        if polls == 0 {
            self.finish(&id);
        }
        self.tasks[&id].task.clone()
    }

    fn finish(&mut self, id: &Urn) {
        let busy = {
            let Some(pending) = self.tasks.get_mut(id) else {
                return;
            };
            match pending.failure.take() {
                Some(message) => {
                    pending.task.status = TaskStatus::Error;
                    pending.task.error = Some(message);
                }
                None => {
                    pending.task.status = TaskStatus::Success;
                    if pending.report_progress {
                        pending.task.progress = Some(100);
                    }
                }
            }
            pending.busy.take()
        };
        if let Some(parent) = busy {
            self.busy.remove(&parent);
            let closed = self.tick();
            if let Some(window) = self.windows.iter_mut().rev().find(|w| &w.task == id) {
                window.closed = Some(closed);
            }
        }
    }

    fn poll(&mut self, id: &Urn) -> SdkResult<Task> {
        let pending = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| SdkError::not_found(id.to_string()))?;
        if !pending.task.is_terminal() {
            pending.remaining = pending.remaining.saturating_sub(1);
            if pending.report_progress {
                let done = pending.total - pending.remaining.min(pending.total);
                pending.task.progress = Some(u8::try_from(done * 100 / pending.total).unwrap_or(100));
            }
            if pending.remaining == 0 {
                self.finish(id);
            }
        }
        Ok(self.tasks[id].task.clone())
    }

    fn remove_tree(&mut self, root: &Urn) {
        let mut doomed = vec![root.clone()];
        let mut idx = 0;
        while idx < doomed.len() {
            let current = doomed[idx].clone();
            doomed.extend(
                self.entities
                    .values()
                    .filter(|e| e.parent.as_ref() == Some(&current))
                    .map(|e| e.id.clone()),
            );
            idx += 1;
        }
        for id in &doomed {
            self.entities.shift_remove(id);
            self.power.remove(id);
            self.customization.remove(id);
            self.metadata.remove(id);
            self.legacy_metadata.remove(id);
            self.configs.retain(|(owner, _), _| owner != id);
        }
    }

    fn power_of(&self, id: &Urn) -> PowerStatus {
        self.power.get(id).copied().unwrap_or(PowerStatus {
            state: PowerState::PoweredOff,
            deployed: false,
        })
    }

    fn set_power(&mut self, id: &Urn, on: bool) {
        let status = if on {
            PowerStatus {
                state: PowerState::PoweredOn,
                deployed: true,
            }
        } else {
            PowerStatus {
                state: PowerState::PoweredOff,
                deployed: false,
            }
        };
        self.power.insert(id.clone(), status);
    }

    /// A vApp drags its VMs along; a VM starts its vApp and the vApp stops
    /// with its last running VM.
    fn apply_power(&mut self, id: &Urn, on: bool) {
        let Some(entity) = self.entities.get(id) else {
            return;
        };
        let kind = entity.kind;
        let parent = entity.parent.clone();
        self.set_power(id, on);
        match kind {
            EntityKind::VApp => {
                for vm in self.children(id, EntityKind::Vm) {
                    self.set_power(&vm, on);
                }
            }
            EntityKind::Vm => {
                let Some(vapp) = parent else {
                    return;
                };
                if on {
                    self.set_power(&vapp, true);
                } else {
                    let any_running = self
                        .children(&vapp, EntityKind::Vm)
                        .iter()
                        .any(|vm| !self.power_of(vm).state.is_off());
                    if !any_running {
                        self.set_power(&vapp, false);
                    }
                }
            }
            _ => {}
        }
    }

    fn powerable(&self, id: &Urn) -> SdkResult<EntityKind> {
        match self.entity(id)?.kind {
            kind @ (EntityKind::VApp | EntityKind::Vm) => Ok(kind),
            other => Err(SdkError::rejected(
                400,
                format!("{other} {id} has no power state"),
            )),
        }
    }

    fn config_entity(&self, owner: &Urn, section: ConfigSection) -> Entity {
        Entity {
            id: owner.clone(),
            kind: EntityKind::Config,
            name: section.to_string(),
            parent: Some(owner.clone()),
            etag: "1".into(),
            body: self
                .configs
                .get(&(owner.clone(), section))
                .cloned()
                .unwrap_or_else(|| default_config(section)),
        }
    }
}

/// In-memory [`VcdClient`].
///
/// Clones share the same state, so a test keeps one handle for seeding and
/// inspection while the kernel holds another.
#[derive(Clone, Default)]
pub struct MemVcd {
    state: Arc<Mutex<State>>,
}

impl fmt::Debug for MemVcd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("MemVcd")
            .field("api_version", &state.settings.api_version)
            .field("entities", &state.entities.len())
            .field("tasks", &state.tasks.len())
            .field("calls", &state.calls.len())
            .finish()
    }
}

impl MemVcd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_version(self, version: ApiVersion) -> Self {
        self.set_api_version(version);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every client call passes through here: yield so concurrent callers
    /// interleave, honour cancellation, record the call, fire injected faults.
    async fn enter(&self, ctx: &OpContext, op: &'static str, target: Option<&Urn>) -> SdkResult<()> {
        tokio::task::yield_now().await;
        ctx.check()?;
        let mut state = self.state();
        let seq = state.tick();
        state.calls.push(CallRecord {
            seq,
            op,
            target: target.cloned(),
        });
        if let Some(idx) = state.faults.iter().position(|(name, _)| *name == op) {
            let (_, err) = state.faults.remove(idx);
            debug!(op, error = %err, "injected fault");
            return Err(err);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Behaviour knobs
    // ---------------------------------------------------------------------

    pub fn set_api_version(&self, version: ApiVersion) {
        self.state().settings.api_version = version;
    }

    /// Polls before an ordinary task reports success.
    pub fn set_task_latency(&self, polls: u32) {
        self.state().settings.task_latency = polls;
    }

    /// Polls before a vApp template upload finishes; progress is reported on each.
    pub fn set_upload_polls(&self, polls: u32) {
        self.state().settings.upload_polls = polls;
    }

    /// Not-found answers from the catalog index before a new template shows up.
    pub fn set_sync_lag(&self, lookups: u32) {
        self.state().settings.sync_lag = lookups;
    }

    /// Refreshes before a new template exposes its catalog item ID.
    pub fn set_item_id_lag(&self, refreshes: u32) {
        self.state().settings.item_id_lag = refreshes;
    }

    /// `GC_PENDING` answers after a forced customization.
    pub fn set_customization_polls(&self, polls: u32) {
        self.state().settings.customization_polls = polls;
    }

    /// Fail the next call of `op` (e.g. `"update"`) with `err`.
    pub fn fail_next(&self, op: &'static str, err: SdkError) {
        self.state().faults.push((op, err));
    }

    /// Let the next task whose operation starts with `prefix` end in error
    /// without applying its effect.
    pub fn abort_next_task(&self, prefix: &str, message: &str) {
        self.state()
            .aborts
            .push((prefix.to_string(), message.to_string()));
    }

    // ---------------------------------------------------------------------
    // Seeding
    // ---------------------------------------------------------------------

    /// Insert an object directly, bypassing tasks and remote rules.
    pub fn seed(&self, kind: EntityKind, parent: Option<&Urn>, name: &str, mut body: Value) -> Urn {
        if let Some(fields) = body.as_object_mut() {
            fields.insert("name".into(), Value::String(name.to_string()));
        }
        self.state()
            .insert(kind, parent.cloned(), name.to_string(), body)
    }

    pub fn org(&self, name: &str) -> Urn {
        self.seed(EntityKind::Org, None, name, json!({"isEnabled": true}))
    }

    pub fn vdc(&self, org: &Urn, name: &str, nsxt: bool) -> Urn {
        self.seed(EntityKind::Vdc, Some(org), name, json!({"isNsxt": nsxt}))
    }

    pub fn vdc_group(&self, org: &Urn, name: &str) -> Urn {
        self.seed(
            EntityKind::VdcGroup,
            Some(org),
            name,
            json!({"networkProviderType": "NSX_T"}),
        )
    }

    pub fn edge_gateway(&self, owner: &Urn, name: &str) -> Urn {
        self.seed(
            EntityKind::EdgeGateway,
            Some(owner),
            name,
            json!({
                "description": "",
                "ownerRef": {"id": owner.to_string()},
                "gatewayBacking": {"gatewayType": "NSXT_BACKED"},
            }),
        )
    }

    pub fn nsxt_manager(&self, name: &str) -> Urn {
        self.seed(
            EntityKind::NsxtManager,
            None,
            name,
            json!({"url": "https://nsx.example.com"}),
        )
    }

    /// `backing` is `NSXT_LOGICAL_SWITCH` or `DV_PORTGROUP`.
    pub fn importable_switch(&self, vdc: &Urn, name: &str, backing: &str) -> Urn {
        self.seed(
            EntityKind::ImportableSwitch,
            Some(vdc),
            name,
            json!({"backingType": backing}),
        )
    }

    pub fn catalog(&self, org: &Urn, name: &str) -> Urn {
        self.seed(EntityKind::Catalog, Some(org), name, json!({"description": ""}))
    }

    pub fn vapp(&self, vdc: &Urn, name: &str, powered_on: bool) -> Urn {
        self.seed(
            EntityKind::VApp,
            Some(vdc),
            name,
            json!({"description": "", "powerOn": powered_on}),
        )
    }

    pub fn vm(&self, vapp: &Urn, name: &str, powered_on: bool) -> Urn {
        self.seed(
            EntityKind::Vm,
            Some(vapp),
            name,
            json!({
                "powerOn": powered_on,
                "cpus": 1,
                "memory": 1024,
                "cpuHotAddEnabled": false,
                "memoryHotAddEnabled": false,
            }),
        )
    }

    pub fn seed_legacy_metadata(&self, owner: &Urn, key: &str, value: &str, inherited: bool) {
        self.state()
            .legacy_metadata
            .entry(owner.clone())
            .or_default()
            .push(LegacyMetadataEntry {
                key: key.to_string(),
                value: value.to_string(),
                inherited,
            });
    }

    /// Delete out-of-band, as another tool would.
    pub fn remove(&self, id: &Urn) -> bool {
        let mut state = self.state();
        let existed = state.entities.contains_key(id);
        state.remove_tree(id);
        existed
    }

    /// Rewrite a body field out-of-band and bump the ETag.
    pub fn set_field(&self, id: &Urn, field: &str, value: Value) {
        let mut state = self.state();
        if let Some(entity) = state.entities.get_mut(id) {
            if let Some(fields) = entity.body.as_object_mut() {
                fields.insert(field.to_string(), value);
            }
            entity.etag = bump(&entity.etag);
        }
    }

    // ---------------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------------

    pub fn api(&self) -> ApiVersion {
        self.state().settings.api_version
    }

    pub fn entity(&self, id: &Urn) -> Option<Entity> {
        self.state().entities.get(id).cloned()
    }

    pub fn find(&self, kind: EntityKind, name: &str) -> Option<Entity> {
        self.state()
            .entities
            .values()
            .find(|e| e.kind == kind && e.name == name)
            .cloned()
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.state()
            .entities
            .values()
            .filter(|e| e.kind == kind)
            .count()
    }

    /// Stored section, or the remote's defaults when never written.
    pub fn config(&self, owner: &Urn, section: ConfigSection) -> Value {
        self.state().config_entity(owner, section).body
    }

    pub fn power_state(&self, id: &Urn) -> PowerState {
        self.state().power_of(id).state
    }

    /// Every task in submission order, as last observed.
    pub fn tasks(&self) -> Vec<Task> {
        self.state()
            .tasks
            .values()
            .map(|p| p.task.clone())
            .collect()
    }

    pub fn task_count(&self, owner: &Urn, operation: &str) -> usize {
        self.state()
            .tasks
            .values()
            .filter(|p| p.task.operation == operation && p.task.owner.as_ref() == Some(owner))
            .count()
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn windows(&self, parent: &Urn) -> Vec<MutationWindow> {
        self.state()
            .windows
            .iter()
            .filter(|w| &w.parent == parent)
            .cloned()
            .collect()
    }

    pub fn metadata_of(&self, owner: &Urn) -> Vec<MetadataEntry> {
        self.state()
            .metadata
            .get(owner)
            .cloned()
            .unwrap_or_default()
    }

    pub fn legacy_metadata_of(&self, owner: &Urn) -> Vec<LegacyMetadataEntry> {
        self.state()
            .legacy_metadata
            .get(owner)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl VcdClient for MemVcd {
    fn api_version(&self) -> ApiVersion {
        self.state().settings.api_version
    }

    async fn get_by_id(&self, ctx: &OpContext, id: &Urn) -> SdkResult<Entity> {
        self.enter(ctx, "get_by_id", Some(id)).await?;
        self.state().entity(id).cloned()
    }

    async fn query(&self, ctx: &OpContext, query: &Query) -> SdkResult<Vec<Entity>> {
        self.enter(ctx, "query", query.parent.as_ref()).await?;
        Ok(self
            .state()
            .entities
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect())
    }

    async fn refresh(&self, ctx: &OpContext, entity: &Entity) -> SdkResult<Entity> {
        self.enter(ctx, "refresh", Some(&entity.id)).await?;
        let mut state = self.state();
        state.release_item_id(&entity.id);
        state.entity(&entity.id).cloned()
    }

    async fn create(
        &self,
        ctx: &OpContext,
        kind: EntityKind,
        parent: Option<&Urn>,
        body: Value,
    ) -> SdkResult<Task> {
        self.enter(ctx, "create", parent).await?;
        let mut state = self.state();
        if let Some(parent) = parent {
            state.entity(parent)?;
        }
        let name = body
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if kind != EntityKind::NatRule && state.name_taken(kind, parent, &name) {
            return Err(SdkError::rejected(
                400,
                format!("{kind} with name '{name}' already exists"),
            ));
        }
        let busy = state.busy_key(parent);
        state.check_busy(busy.as_ref())?;
        let operation = format!("{}Create", kind.urn_type());
        let upload = kind == EntityKind::VAppTemplate;
        if let Some(message) = state.take_abort(&operation) {
            return Ok(state.submit(operation, parent.cloned(), None, busy, Some(message), upload));
        }
        let id = state.insert(kind, parent.cloned(), name, body);
        debug!(kind = %kind, id = %id, "created");
        Ok(state.submit(operation, Some(id.clone()), Some(id), busy, None, upload))
    }

    async fn update(&self, ctx: &OpContext, id: &Urn, etag: &str, mut body: Value) -> SdkResult<Task> {
        self.enter(ctx, "update", Some(id)).await?;
        let mut state = self.state();
        let current = state.entity(id)?.clone();
        if current.etag != etag {
            return Err(SdkError::StaleEtag(id.to_string()));
        }
        if current.kind == EntityKind::Vm && !state.power_of(id).state.is_off() {
            if let Some(field) = COLD_VM_FIELDS
                .iter()
                .find(|f| current.body.get(**f) != body.get(**f))
            {
                return Err(SdkError::rejected(
                    400,
                    format!("Cannot change {field} of VM '{}' while it is running. {STOP_FIRST}", current.name),
                ));
            }
        }
        let busy = state.busy_key(current.parent.as_ref());
        state.check_busy(busy.as_ref())?;
        let operation = format!("{}Update", current.kind.urn_type());
        let failure = state.take_abort(&operation);
        if failure.is_none() {
            if let Some(fields) = body.as_object_mut() {
                for key in SERVER_FIELDS {
                    if let Some(kept) = current.body.get(key) {
                        fields.entry(key).or_insert_with(|| kept.clone());
                    }
                }
            }
            if let Some(entity) = state.entities.get_mut(id) {
                if let Some(name) = body.get("name").and_then(Value::as_str) {
                    entity.name = name.to_string();
                }
                entity.body = body;
                entity.etag = bump(&entity.etag);
            }
        }
        Ok(state.submit(operation, Some(id.clone()), None, busy, failure, false))
    }

    async fn delete(&self, ctx: &OpContext, id: &Urn, force: bool) -> SdkResult<Task> {
        self.enter(ctx, "delete", Some(id)).await?;
        let mut state = self.state();
        let current = state.entity(id)?.clone();
        if current.kind == EntityKind::VAppNetwork {
            if let Some(vapp) = &current.parent {
                if !state.power_of(vapp).state.is_off() {
                    return Err(SdkError::rejected(
                        400,
                        format!("Network '{}' is in use by a running vApp. {STOP_FIRST}", current.name),
                    ));
                }
            }
        }
        if current.kind == EntityKind::Catalog
            && !force
            && state.entities.values().any(|e| e.parent.as_ref() == Some(id))
        {
            return Err(SdkError::rejected(
                400,
                format!("catalog '{}' is not empty", current.name),
            ));
        }
        let busy = state.busy_key(current.parent.as_ref());
        state.check_busy(busy.as_ref())?;
        let operation = format!("{}Delete", current.kind.urn_type());
        let failure = state.take_abort(&operation);
        if failure.is_none() {
            state.remove_tree(id);
        }
        Ok(state.submit(operation, Some(id.clone()), None, busy, failure, false))
    }

    async fn get_task(&self, ctx: &OpContext, id: &Urn) -> SdkResult<Task> {
        self.enter(ctx, "get_task", Some(id)).await?;
        self.state().poll(id)
    }

    async fn get_config(&self, ctx: &OpContext, owner: &Urn, section: ConfigSection) -> SdkResult<Entity> {
        self.enter(ctx, "get_config", Some(owner)).await?;
        let state = self.state();
        state.entity(owner)?;
        Ok(state.config_entity(owner, section))
    }

    async fn put_config(
        &self,
        ctx: &OpContext,
        owner: &Urn,
        section: ConfigSection,
        body: Value,
    ) -> SdkResult<Task> {
        self.enter(ctx, "put_config", Some(owner)).await?;
        let mut state = self.state();
        state.entity(owner)?;
        let sets_snat_ip = body
            .get("snatRuleIpAddress")
            .is_some_and(|v| !v.is_null());
        if section == ConfigSection::DnsForwarder
            && sets_snat_ip
            && !state.settings.api_version.at_least(ApiVersion::new(38, 0))
        {
            return Err(SdkError::rejected(400, "unrecognized field 'snatRuleIpAddress'"));
        }
        let busy = state.busy_key(Some(owner));
        state.check_busy(busy.as_ref())?;
        let operation = format!("{section}Update");
        let failure = state.take_abort(&operation);
        if failure.is_none() {
            state.configs.insert((owner.clone(), section), body);
        }
        Ok(state.submit(operation, Some(owner.clone()), None, busy, failure, false))
    }

    async fn power_status(&self, ctx: &OpContext, id: &Urn) -> SdkResult<PowerStatus> {
        self.enter(ctx, "power_status", Some(id)).await?;
        let state = self.state();
        state.powerable(id)?;
        Ok(state.power_of(id))
    }

    async fn power_on(&self, ctx: &OpContext, id: &Urn, options: PowerOnOptions) -> SdkResult<Task> {
        self.enter(ctx, "power_on", Some(id)).await?;
        let mut state = self.state();
        let kind = state.powerable(id)?;
        let operation = match kind {
            EntityKind::Vm => ops::POWER_ON_VM,
            _ => ops::POWER_ON_VAPP,
        }
        .to_string();
        let failure = state.take_abort(&operation);
        if failure.is_none() {
            state.apply_power(id, true);
            if options.force_customization && kind == EntityKind::Vm {
                let polls = state.settings.customization_polls;
                state.customization.insert(id.clone(), polls);
            }
        }
        Ok(state.submit(operation, Some(id.clone()), None, None, failure, false))
    }

    async fn undeploy(&self, ctx: &OpContext, id: &Urn) -> SdkResult<Task> {
        self.enter(ctx, "undeploy", Some(id)).await?;
        let mut state = self.state();
        let kind = state.powerable(id)?;
        let operation = match kind {
            EntityKind::Vm => ops::STOP_VM,
            _ => ops::STOP_VAPP,
        }
        .to_string();
        let failure = state.take_abort(&operation);
        if failure.is_none() {
            state.apply_power(id, false);
        }
        Ok(state.submit(operation, Some(id.clone()), None, None, failure, false))
    }

    async fn guest_customization_status(&self, ctx: &OpContext, vm: &Urn) -> SdkResult<String> {
        self.enter(ctx, "guest_customization_status", Some(vm)).await?;
        let mut state = self.state();
        state.entity(vm)?;
        match state.customization.get_mut(vm) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Ok(GC_PENDING.to_string())
            }
            _ => Ok(GC_COMPLETE.to_string()),
        }
    }

    async fn query_synchronized_by_id(&self, ctx: &OpContext, id: &Urn) -> SdkResult<Entity> {
        self.enter(ctx, "query_synchronized_by_id", Some(id)).await?;
        let mut state = self.state();
        let entity = state.entity(id)?.clone();
        if let Some(left) = state.unsynced.get_mut(id) {
            if *left > 0 {
                *left -= 1;
                return Err(SdkError::not_found(format!("{id} in the catalog index")));
            }
        }
        Ok(entity)
    }

    async fn legacy_metadata(&self, ctx: &OpContext, owner: &Urn) -> SdkResult<Vec<LegacyMetadataEntry>> {
        self.enter(ctx, "legacy_metadata", Some(owner)).await?;
        let state = self.state();
        state.entity(owner)?;
        Ok(state.legacy_metadata.get(owner).cloned().unwrap_or_default())
    }

    async fn merge_legacy_metadata(
        &self,
        ctx: &OpContext,
        owner: &Urn,
        entries: &[(String, String)],
    ) -> SdkResult<Task> {
        self.enter(ctx, "merge_legacy_metadata", Some(owner)).await?;
        let mut state = self.state();
        state.entity(owner)?;
        let failure = state.take_abort(ops::METADATA_UPDATE);
        if failure.is_none() {
            let stored = state.legacy_metadata.entry(owner.clone()).or_default();
            for (key, value) in entries {
                match stored.iter_mut().find(|e| &e.key == key && !e.inherited) {
                    Some(existing) => existing.value = value.clone(),
                    None => stored.push(LegacyMetadataEntry {
                        key: key.clone(),
                        value: value.clone(),
                        inherited: false,
                    }),
                }
            }
        }
        Ok(state.submit(
            ops::METADATA_UPDATE.to_string(),
            Some(owner.clone()),
            None,
            None,
            failure,
            false,
        ))
    }

    async fn delete_legacy_metadata(&self, ctx: &OpContext, owner: &Urn, key: &str) -> SdkResult<Task> {
        self.enter(ctx, "delete_legacy_metadata", Some(owner)).await?;
        let mut state = self.state();
        state.entity(owner)?;
        let failure = state.take_abort(ops::METADATA_DELETE);
        if failure.is_none() {
            if let Some(stored) = state.legacy_metadata.get_mut(owner) {
                stored.retain(|e| e.inherited || e.key != key);
            }
        }
        Ok(state.submit(
            ops::METADATA_DELETE.to_string(),
            Some(owner.clone()),
            None,
            None,
            failure,
            false,
        ))
    }

    async fn metadata_entries(&self, ctx: &OpContext, owner: &Urn) -> SdkResult<Vec<MetadataEntry>> {
        self.enter(ctx, "metadata_entries", Some(owner)).await?;
        let state = self.state();
        state.entity(owner)?;
        Ok(state.metadata.get(owner).cloned().unwrap_or_default())
    }

    async fn metadata_entry(&self, ctx: &OpContext, owner: &Urn, entry_id: &str) -> SdkResult<MetadataEntry> {
        self.enter(ctx, "metadata_entry", Some(owner)).await?;
        let state = self.state();
        state.entity(owner)?;
        state
            .metadata
            .get(owner)
            .and_then(|entries| entries.iter().find(|e| e.id.as_deref() == Some(entry_id)))
            .cloned()
            .ok_or_else(|| SdkError::not_found(format!("metadata entry {entry_id}")))
    }

    async fn create_metadata_entry(
        &self,
        ctx: &OpContext,
        owner: &Urn,
        entry: &MetadataEntry,
    ) -> SdkResult<MetadataEntry> {
        self.enter(ctx, "create_metadata_entry", Some(owner)).await?;
        let mut state = self.state();
        state.entity(owner)?;
        let stored = state.metadata.entry(owner.clone()).or_default();
        if stored
            .iter()
            .any(|e| e.namespace == entry.namespace && e.key == entry.key)
        {
            return Err(SdkError::rejected(
                400,
                format!(
                    "metadata entry '{}' already exists in namespace '{}'",
                    entry.key, entry.namespace
                ),
            ));
        }
        let created = MetadataEntry {
            id: Some(format!("urn:vcloud:metadata:{}", Uuid::new_v4())),
            etag: Some("1".into()),
            ..entry.clone()
        };
        stored.push(created.clone());
        Ok(created)
    }

    async fn update_metadata_entry(
        &self,
        ctx: &OpContext,
        owner: &Urn,
        entry: &MetadataEntry,
    ) -> SdkResult<MetadataEntry> {
        self.enter(ctx, "update_metadata_entry", Some(owner)).await?;
        let mut state = self.state();
        state.entity(owner)?;
        let entry_id = entry
            .id
            .as_deref()
            .ok_or_else(|| SdkError::rejected(400, "metadata entry has no ID"))?;
        let current = state
            .metadata
            .get_mut(owner)
            .and_then(|entries| entries.iter_mut().find(|e| e.id.as_deref() == Some(entry_id)))
            .ok_or_else(|| SdkError::not_found(format!("metadata entry {entry_id}")))?;
        if current.etag != entry.etag {
            return Err(SdkError::StaleEtag(entry_id.to_string()));
        }
        if current.ty != entry.ty
            || current.domain != entry.domain
            || current.readonly != entry.readonly
            || current.namespace != entry.namespace
            || current.key != entry.key
        {
            return Err(SdkError::rejected(
                400,
                "namespace, key, type, domain and readonly of a metadata entry cannot change",
            ));
        }
        current.value = entry.value.clone();
        current.persistent = entry.persistent;
        current.etag = Some(bump(current.etag.as_deref().unwrap_or("0")));
        Ok(current.clone())
    }

    async fn delete_metadata_entry(&self, ctx: &OpContext, owner: &Urn, entry_id: &str) -> SdkResult<()> {
        self.enter(ctx, "delete_metadata_entry", Some(owner)).await?;
        let mut state = self.state();
        state.entity(owner)?;
        let stored = state.metadata.entry(owner.clone()).or_default();
        let before = stored.len();
        stored.retain(|e| e.id.as_deref() != Some(entry_id));
        if stored.len() == before {
            return Err(SdkError::not_found(format!("metadata entry {entry_id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(vcd: &MemVcd, ctx: &OpContext, mut task: Task) -> Task {
        while !task.is_terminal() {
            task = vcd.get_task(ctx, &task.id).await.unwrap();
        }
        task
    }

    #[tokio::test]
    async fn tasks_finish_after_configured_polls() {
        let vcd = MemVcd::new();
        vcd.set_task_latency(2);
        let ctx = OpContext::new();
        let org = vcd.org("acme");
        let task = vcd
            .create(&ctx, EntityKind::Catalog, Some(&org), json!({"name": "c"}))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        let first = vcd.get_task(&ctx, &task.id).await.unwrap();
        assert_eq!(first.status, TaskStatus::Running);
        let second = vcd.get_task(&ctx, &task.id).await.unwrap();
        assert_eq!(second.status, TaskStatus::Success);
        assert!(vcd.entity(second.result.as_ref().unwrap()).is_some());
    }

    #[tokio::test]
    async fn busy_edge_gateway_rejects_second_writer() {
        let vcd = MemVcd::new();
        let ctx = OpContext::new();
        let org = vcd.org("acme");
        let vdc = vcd.vdc(&org, "vdc", true);
        let edge = vcd.edge_gateway(&vdc, "edge");

        let running = vcd
            .create(&ctx, EntityKind::NatRule, Some(&edge), json!({"name": "a"}))
            .await
            .unwrap();
        let err = vcd
            .create(&ctx, EntityKind::NatRule, Some(&edge), json!({"name": "b"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::Rejected { status: 409, .. }));

        drain(&vcd, &ctx, running).await;
        let second = vcd
            .create(&ctx, EntityKind::NatRule, Some(&edge), json!({"name": "a"}))
            .await
            .unwrap();
        drain(&vcd, &ctx, second).await;

        let windows = vcd.windows(&edge);
        assert_eq!(windows.len(), 2);
        assert!(!windows[0].overlaps(&windows[1]));
    }

    #[tokio::test]
    async fn running_vm_refuses_cold_changes() {
        let vcd = MemVcd::new();
        let ctx = OpContext::new();
        let org = vcd.org("acme");
        let vdc = vcd.vdc(&org, "vdc", true);
        let vapp = vcd.vapp(&vdc, "app", false);
        let vm = vcd.vm(&vapp, "vm", true);
        assert_eq!(vcd.power_state(&vapp), PowerState::PoweredOn);

        let mut body = vcd.entity(&vm).unwrap().body;
        body["cpuHotAddEnabled"] = json!(true);
        let err = vcd.update(&ctx, &vm, "1", body.clone()).await.unwrap_err();
        assert!(err.mentions("Stop the vApp and try again"));

        let stop = vcd.undeploy(&ctx, &vm).await.unwrap();
        drain(&vcd, &ctx, stop).await;
        assert_eq!(vcd.power_state(&vapp), PowerState::PoweredOff);
        let task = vcd.update(&ctx, &vm, "1", body).await.unwrap();
        assert_eq!(drain(&vcd, &ctx, task).await.status, TaskStatus::Success);
        assert_eq!(vcd.task_count(&vm, ops::STOP_VM), 1);
    }

    #[tokio::test]
    async fn templates_lag_behind_in_index_and_item_id() {
        let vcd = MemVcd::new();
        vcd.set_sync_lag(1);
        vcd.set_item_id_lag(2);
        let ctx = OpContext::new();
        let org = vcd.org("acme");
        let catalog = vcd.catalog(&org, "cat");
        let id = vcd.seed(EntityKind::VAppTemplate, Some(&catalog), "tpl", json!({}));

        assert!(vcd.query_synchronized_by_id(&ctx, &id).await.unwrap_err().is_not_found());
        let entity = vcd.query_synchronized_by_id(&ctx, &id).await.unwrap();
        assert!(entity.field("catalogItemId").is_none());

        let once = vcd.refresh(&ctx, &entity).await.unwrap();
        assert!(once.field("catalogItemId").is_none());
        let twice = vcd.refresh(&ctx, &entity).await.unwrap();
        assert!(twice.str_field("catalogItemId").is_some());
    }

    #[tokio::test]
    async fn aborted_task_leaves_no_object() {
        let vcd = MemVcd::new();
        let ctx = OpContext::new();
        let org = vcd.org("acme");
        vcd.abort_next_task("catalogCreate", "storage policy exhausted");
        let task = vcd
            .create(&ctx, EntityKind::Catalog, Some(&org), json!({"name": "c"}))
            .await
            .unwrap();
        let done = drain(&vcd, &ctx, task).await;
        assert_eq!(done.status, TaskStatus::Error);
        assert_eq!(done.error.as_deref(), Some("storage policy exhausted"));
        assert_eq!(vcd.count(EntityKind::Catalog), 0);
    }

    #[tokio::test]
    async fn stale_metadata_etag_is_rejected() {
        let vcd = MemVcd::new();
        let ctx = OpContext::new();
        let org = vcd.org("acme");
        let entry = MetadataEntry {
            id: None,
            etag: None,
            namespace: String::new(),
            key: "k".into(),
            value: json!("v"),
            ty: vcd_sdk::MetadataType::String,
            domain: vcd_sdk::MetadataDomain::Tenant,
            readonly: false,
            persistent: false,
        };
        let created = vcd.create_metadata_entry(&ctx, &org, &entry).await.unwrap();
        let updated = vcd
            .update_metadata_entry(&ctx, &org, &MetadataEntry { value: json!("w"), ..created.clone() })
            .await
            .unwrap();
        assert_eq!(updated.etag.as_deref(), Some("2"));
        let err = vcd.update_metadata_entry(&ctx, &org, &created).await.unwrap_err();
        assert!(matches!(err, SdkError::StaleEtag(_)));
    }
}
