use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use vcd_kernel::{AttrMap, ErrorKind, Kernel, KernelConfig, attrs};
use vcd_resources::kinds::NAT_RULE;
use vcd_resources::registry;
use vcd_sdk::{EntityKind, OpContext};

#[path = "helpers.rs"]
mod helpers;
use helpers::{World, world};

fn snat(world: &World) -> AttrMap {
    attrs! {
        "org" => helpers::ORG,
        "edge_gateway_id" => world.edge.to_string(),
        "name" => "outbound",
        "rule_type" => "SNAT",
        "external_address" => "10.10.10.100",
        "internal_address" => "192.168.0.0/16",
    }
}

#[tokio::test]
async fn cancellation_stops_polling() -> Result<()> {
    let world = world();
    world.vcd.set_task_latency(u32::MAX);

    let ctx = OpContext::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let mut bag = world.bag_for_create(NAT_RULE, snat(&world));
    let diags = world.kernel.create(&ctx, NAT_RULE, &mut bag).await;
    let error = diags.first_error().expect("cancelled create reports an error");
    assert_eq!(error.kind, Some(ErrorKind::Cancelled));
    assert_eq!(bag.id(), None);
    Ok(())
}

#[tokio::test]
async fn cancelled_context_makes_no_remote_call() -> Result<()> {
    let world = world();
    let ctx = OpContext::new();
    ctx.cancel();
    world.vcd.clear_calls();

    let mut bag = world.bag_for_create(NAT_RULE, snat(&world));
    let diags = world.kernel.create(&ctx, NAT_RULE, &mut bag).await;
    assert_eq!(
        diags.first_error().and_then(|d| d.kind),
        Some(ErrorKind::Cancelled)
    );
    assert!(world.vcd.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn aborted_task_surfaces_its_message() -> Result<()> {
    let world = world();
    let operation = format!("{}Create", EntityKind::NatRule.urn_type());
    world
        .vcd
        .abort_next_task(&operation, "NSX-T manager unreachable");

    let (bag, diags) = world.try_create(NAT_RULE, snat(&world)).await;
    let error = diags.first_error().expect("aborted create reports an error");
    assert_eq!(error.kind, Some(ErrorKind::TaskAborted));
    assert!(error.summary.contains("NSX-T manager unreachable"));
    assert_eq!(bag.id(), None);
    assert_eq!(world.count(EntityKind::NatRule), 0);

    // The edge gateway is free again for the next writer.
    world.create(NAT_RULE, snat(&world)).await?;
    Ok(())
}

#[tokio::test]
async fn slow_task_times_out_within_budget() -> Result<()> {
    let world = world();
    world.vcd.set_task_latency(u32::MAX);
    let config = KernelConfig {
        task_budget: Duration::from_millis(50),
        ..KernelConfig::fast().with_defaults(Some(helpers::ORG), Some(helpers::VDC))
    };
    let kernel = Kernel::builder(Arc::new(world.vcd.clone()))
        .with_config(config)
        .build(registry()?);

    let mut bag = world.bag_for_create(NAT_RULE, snat(&world));
    let diags = kernel.create(&world.ctx, NAT_RULE, &mut bag).await;
    assert_eq!(
        diags.first_error().and_then(|d| d.kind),
        Some(ErrorKind::TimeoutExceeded)
    );
    Ok(())
}
