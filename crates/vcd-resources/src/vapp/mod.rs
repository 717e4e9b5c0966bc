//! vApps and the objects that live inside them.
//!
//! Mutations inside one vApp queue on the `vapp:<org>/<vdc>/<vapp>` lock.

use async_trait::async_trait;
use tracing::info;
use vcd_kernel::identity::child_by_name;
use vcd_kernel::{
    HookPhase, ImportPath, KernelResult, LockKey, PostHook, ResolvedParent, ResourceData, Session,
};
use vcd_sdk::{Entity, EntityKind, PowerOnOptions, Urn};

pub mod org_network;
#[allow(clippy::module_inception)]
pub mod vapp;
pub mod vm;

pub use org_network::VAppOrgNetwork;
pub use vapp::VApp;
pub use vm::VAppVm;

pub const VAPP_NAME: &str = "vapp_name";
pub const POWER_ON: &str = "power_on";
pub const STATUS_TEXT: &str = "status_text";

/// Parent of an object inside a vApp: the vApp, with its VDC alongside for
/// the lock key.
pub(crate) async fn resolve_vapp(session: &Session, bag: &ResourceData) -> KernelResult<ResolvedParent> {
    let scope = session.resolver().vapp(bag, VAPP_NAME).await?;
    Ok(ResolvedParent::new(scope.context(), Some(scope.vapp)).with_related("vdc", scope.vdc))
}

pub(crate) fn vapp_lock(parent: &ResolvedParent) -> Vec<LockKey> {
    let (Some(org), Some(vapp), Ok(vdc)) = (
        parent.context.org(),
        parent.container.as_ref(),
        parent.related("vdc"),
    ) else {
        return Vec::new();
    };
    vec![LockKey::vapp(org, &vdc.name, &vapp.name)]
}

/// Org, VDC and vApp named by the first three path segments.
pub(crate) async fn vapp_from_path(session: &Session, path: &ImportPath) -> KernelResult<(Entity, Entity, Entity)> {
    let resolver = session.resolver();
    let org = resolver.org_by_name(path.segment(0)).await?;
    let vdc = resolver.vdc_by_name(&org, path.segment(1)).await?;
    let vapp = child_by_name(session, &vdc.id, EntityKind::VApp, path.segment(2)).await?;
    Ok((org, vdc, vapp))
}

/// Reports the remote power state as text.
pub(crate) async fn read_status(session: &Session, id: &Urn, bag: &mut ResourceData) -> KernelResult<()> {
    let status = session.client.power_status(&session.ctx, id).await?;
    bag.set(STATUS_TEXT, status.state.as_str())
}

/// Starts or stops the object when `power_on` changed in an update.
pub(crate) struct PowerHook;

#[async_trait]
impl PostHook for PowerHook {
    fn name(&self) -> &'static str {
        "power-state"
    }

    async fn run(
        &self,
        session: &Session,
        phase: HookPhase,
        id: &Urn,
        bag: &mut ResourceData,
    ) -> KernelResult<()> {
        if phase != HookPhase::Update || !bag.has_change(POWER_ON) {
            return Ok(());
        }
        let status = session.client.power_status(&session.ctx, id).await?;
        let wanted = bag.get_bool(POWER_ON);
        if wanted == !status.state.is_off() {
            return Ok(());
        }
        let task = if wanted {
            session
                .client
                .power_on(&session.ctx, id, PowerOnOptions::default())
                .await?
        } else {
            session.client.undeploy(&session.ctx, id).await?
        };
        session.waiter().wait(task).await?;
        info!(object = %id, power_on = wanted, "power state changed");
        Ok(())
    }
}
