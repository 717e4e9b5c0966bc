//! Power-state orchestration around mutations the remote only accepts on
//! stopped objects.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};
use vcd_sdk::{PowerOnOptions, Urn};

use crate::bag::ResourceData;
use crate::descriptor::{HookPhase, PostHook};
use crate::error::{KernelError, KernelResult};
use crate::session::Session;
use crate::value::{AttrMap, AttrValue};

/// Which object has to be stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerTarget {
    /// The resource itself (a VM).
    Itself,
    /// The object the resource lives in (the vApp of a vApp network).
    Container,
}

/// How a kind opts into power cycling.
#[derive(Debug, Clone, Copy)]
pub struct PowerOffPolicy {
    /// Opt-in attribute named in the hint.
    pub attribute: &'static str,
    /// Value of `attribute` that permits stopping the target.
    pub allowed_when: bool,
    pub target: PowerTarget,
}

impl PowerOffPolicy {
    pub fn allows(&self, bag: &ResourceData) -> bool {
        bag.get_bool(self.attribute) == self.allowed_when
    }

    pub fn hint(&self) -> String {
        format!(
            "The change requires the {} to be powered off. Set `{} = {}` to let the provider stop and restart it.",
            match self.target {
                PowerTarget::Itself => "VM",
                PowerTarget::Container => "vApp",
            },
            self.attribute,
            self.allowed_when
        )
    }

    /// Attach the opt-in hint when the remote refused for power reasons.
    pub fn decorate(&self, err: KernelError) -> KernelError {
        if err.requires_power_off() {
            err.with_hint(self.hint())
        } else {
            err
        }
    }
}

/// Run `mutation` with `target` stopped.
///
/// Objects already off (or only resolved) are mutated directly. Otherwise the
/// target is undeployed, mutated and then powered on again, whatever partial
/// state it was in before. A mutation error wins over a restore error.
pub async fn with_powered_off<T, F, Fut>(session: &Session, target: &Urn, mutation: F) -> KernelResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = KernelResult<T>>,
{
    let status = session.client.power_status(&session.ctx, target).await?;
    if status.state.is_off() {
        return mutation().await;
    }

    info!(object = %target, state = %status.state, "powering off before mutation");
    let task = session.client.undeploy(&session.ctx, target).await?;
    session.waiter().wait(task).await?;

    let result = mutation().await;

    let restore = async {
        let task = session
            .client
            .power_on(&session.ctx, target, PowerOnOptions::default())
            .await?;
        session.waiter().wait(task).await
    }
    .await;

    match (result, restore) {
        (Err(err), restore) => {
            if let Err(restore_err) = restore {
                warn!(object = %target, error = %restore_err, "power on after failed mutation also failed");
            }
            Err(err)
        }
        (Ok(_), Err(err)) => Err(err),
        (Ok(value), Ok(_)) => {
            info!(object = %target, "powered on after mutation");
            Ok(value)
        }
    }
}

/// Undeploy if needed, power on with forced guest customization, and wait
/// until the guest reports something other than `GC_PENDING`.
pub async fn force_customization(session: &Session, vm: &Urn, budget: Duration) -> KernelResult<String> {
    let status = session.client.power_status(&session.ctx, vm).await?;
    if status.deployed {
        let task = session.client.undeploy(&session.ctx, vm).await?;
        session.waiter().wait(task).await?;
    }
    let task = session
        .client
        .power_on(
            &session.ctx,
            vm,
            PowerOnOptions {
                force_customization: true,
            },
        )
        .await?;
    session.waiter().wait(task).await?;
    let status = session.waiter().wait_guest_customization(vm, budget).await?;
    info!(vm = %vm, status = %status, "guest customization settled");
    Ok(status)
}

/// Re-customizes the guest when `<attribute>.0.force` is true, then stores
/// `force = false` so the next plan shows the flag again.
pub struct ForceCustomizationHook {
    pub attribute: &'static str,
}

impl ForceCustomizationHook {
    fn requested(&self, bag: &ResourceData) -> bool {
        bag.get_records(self.attribute)
            .first()
            .and_then(|block| block.get("force"))
            .and_then(AttrValue::as_bool)
            .unwrap_or(false)
    }
}

#[async_trait]
impl PostHook for ForceCustomizationHook {
    fn name(&self) -> &'static str {
        "force-customization"
    }

    async fn run(
        &self,
        session: &Session,
        phase: HookPhase,
        id: &Urn,
        bag: &mut ResourceData,
    ) -> KernelResult<()> {
        if !self.requested(bag) {
            return Ok(());
        }
        if phase == HookPhase::Update && !bag.has_change(self.attribute) {
            return Ok(());
        }
        if bag.schema().contains("power_on") && !bag.get_bool("power_on") {
            warn!(vm = %id, "force customization requested on a VM declared powered off; skipping");
            return Ok(());
        }
        force_customization(session, id, session.config.customization_budget).await?;

        let mut blocks: Vec<AttrMap> = bag.get_records(self.attribute).to_vec();
        if let Some(first) = blocks.first_mut() {
            first.insert("force".into(), AttrValue::Bool(false));
        }
        bag.set(self.attribute, blocks)
    }
}
