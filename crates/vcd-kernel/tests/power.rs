use std::sync::Arc;

use anyhow::Result;
use vcd_kernel::power::{force_customization, with_powered_off};
use vcd_kernel::{
    DescriptorRegistry, ErrorKind, Kernel, KernelConfig, KernelError, RecordingProgressSink,
};
use vcd_sdk::{GC_PENDING, OpContext, PowerOnOptions, PowerState, Urn, VcdClient};
use vcd_testkit::{MemVcd, ops};

struct Fixture {
    vcd: MemVcd,
    kernel: Kernel,
    vm: Urn,
}

fn fixture(vm_running: bool) -> Fixture {
    vcd_testkit::init_tracing();
    let vcd = MemVcd::new();
    let org = vcd.org("acme");
    let vdc = vcd.vdc(&org, "vdc-nsxt", true);
    let vapp = vcd.vapp(&vdc, "app", vm_running);
    let vm = vcd.vm(&vapp, "web-1", vm_running);
    let kernel = Kernel::builder(Arc::new(vcd.clone()))
        .with_config(KernelConfig::fast())
        .build(DescriptorRegistry::new());
    Fixture { vcd, kernel, vm }
}

#[tokio::test]
async fn running_vm_is_stopped_for_the_mutation_and_restarted() -> Result<()> {
    let fx = fixture(true);
    let session = fx.kernel.session(&OpContext::new());

    let seen = with_powered_off(&session, &fx.vm, || async {
        Ok(fx.vcd.power_state(&fx.vm))
    })
    .await?;

    assert_eq!(seen, PowerState::PoweredOff);
    assert_eq!(fx.vcd.power_state(&fx.vm), PowerState::PoweredOn);
    assert_eq!(fx.vcd.task_count(&fx.vm, ops::STOP_VM), 1);
    assert_eq!(fx.vcd.task_count(&fx.vm, ops::POWER_ON_VM), 1);
    Ok(())
}

#[tokio::test]
async fn stopped_vm_is_mutated_in_place() -> Result<()> {
    let fx = fixture(false);
    let session = fx.kernel.session(&OpContext::new());

    with_powered_off(&session, &fx.vm, || async { Ok(()) }).await?;

    assert_eq!(fx.vcd.power_state(&fx.vm), PowerState::PoweredOff);
    assert!(fx.vcd.tasks().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_mutation_still_restores_power() -> Result<()> {
    let fx = fixture(true);
    let session = fx.kernel.session(&OpContext::new());

    let err = with_powered_off(&session, &fx.vm, || async {
        Err::<(), _>(KernelError::validation("disk bus not supported"))
    })
    .await
    .expect_err("mutation error is returned");

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("disk bus not supported"));
    assert_eq!(fx.vcd.power_state(&fx.vm), PowerState::PoweredOn);
    Ok(())
}

#[tokio::test]
async fn failed_restore_is_reported_after_successful_mutation() -> Result<()> {
    let fx = fixture(true);
    fx.vcd.abort_next_task(ops::POWER_ON_VM, "host in maintenance mode");
    let session = fx.kernel.session(&OpContext::new());

    let err = with_powered_off(&session, &fx.vm, || async { Ok(()) })
        .await
        .expect_err("power on was aborted");

    assert_eq!(err.kind(), ErrorKind::TaskAborted);
    assert!(err.to_string().contains("host in maintenance mode"));
    Ok(())
}

#[tokio::test]
async fn forced_customization_waits_out_pending_status() -> Result<()> {
    let fx = fixture(true);
    fx.vcd.set_customization_polls(2);
    let session = fx.kernel.session(&OpContext::new());

    let status = force_customization(&session, &fx.vm, session.config.customization_budget).await?;

    assert_ne!(status, GC_PENDING);
    assert_eq!(fx.vcd.task_count(&fx.vm, ops::STOP_VM), 1);
    assert_eq!(fx.vcd.task_count(&fx.vm, ops::POWER_ON_VM), 1);
    let polls = fx
        .vcd
        .calls()
        .iter()
        .filter(|call| call.op == "guest_customization_status")
        .count();
    assert_eq!(polls, 3);
    Ok(())
}

#[tokio::test]
async fn waiter_reports_status_lines_while_polling() -> Result<()> {
    let fx = fixture(false);
    fx.vcd.set_task_latency(2);
    let sink = Arc::new(RecordingProgressSink::default());
    let kernel = Kernel::builder(Arc::new(fx.vcd.clone()))
        .with_config(KernelConfig::fast())
        .with_progress_sink(sink.clone())
        .build(DescriptorRegistry::new());
    let ctx = OpContext::new();
    let session = kernel.session(&ctx);

    let task = fx.vcd.power_on(&ctx, &fx.vm, PowerOnOptions::default()).await?;
    session.waiter().wait_with_progress(task, "power on").await?;

    let lines = sink.lines();
    assert_eq!(lines.last().map(String::as_str), Some("power on: success"));
    assert!(lines.iter().all(|line| line.starts_with("power on: ")));
    Ok(())
}

#[tokio::test]
async fn unknown_target_is_not_found() -> Result<()> {
    let fx = fixture(true);
    let session = fx.kernel.session(&OpContext::new());
    let gone = fx.vm.clone();
    fx.vcd.remove(&gone);

    let err = with_powered_off(&session, &gone, || async { Ok(()) })
        .await
        .expect_err("the VM is gone");
    assert!(err.is_not_found());
    Ok(())
}
