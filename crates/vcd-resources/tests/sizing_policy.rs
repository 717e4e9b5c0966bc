use anyhow::Result;
use vcd_kernel::{Plan, attrs};
use vcd_resources::kinds::VM_SIZING_POLICY;
use vcd_sdk::EntityKind;

#[path = "helpers.rs"]
mod helpers;
use helpers::{first_error, id_of, world};

#[tokio::test]
async fn sizing_policy_lifecycle() -> Result<()> {
    let world = world();
    let desired = attrs! {
        "name" => "small",
        "description" => "2 vCPU / 2 GiB",
        "cpu_count" => 2,
        "memory_in_mb" => 2048,
    };
    let created = world.create(VM_SIZING_POLICY, desired.clone()).await?;
    let id = id_of(&created);
    assert_eq!(created.get_int("cpu_count"), Some(2));
    assert_eq!(created.get_int("cores_per_socket"), None);

    let mut resized = desired.clone();
    resized.insert("memory_in_mb".into(), 4096.into());
    let plan = world
        .kernel
        .plan(VM_SIZING_POLICY, Some(&created.state()), &resized)?;
    assert_eq!(
        plan,
        Plan::Replace {
            forced_by: vec!["memory_in_mb".to_string()]
        }
    );

    let mut renamed = desired;
    renamed.insert("description".into(), "two by two".into());
    let updated = world.update(VM_SIZING_POLICY, &created, renamed).await?;
    assert_eq!(id_of(&updated), id);
    assert_eq!(updated.get_str("description"), Some("two by two"));

    let by_name = world.import(VM_SIZING_POLICY, "small").await?;
    assert_eq!(by_name.id(), created.id());
    let by_id = world.import(VM_SIZING_POLICY, id.as_str()).await?;
    assert_eq!(by_id.id(), created.id());

    world.delete(VM_SIZING_POLICY, &updated).await?;
    assert_eq!(world.count(EntityKind::VmSizingPolicy), 0);
    Ok(())
}

#[tokio::test]
async fn zero_cpu_count_is_rejected() -> Result<()> {
    let world = world();
    world.vcd.clear_calls();
    let (_, diags) = world
        .try_create(VM_SIZING_POLICY, attrs! {"name" => "none", "cpu_count" => 0})
        .await;
    assert!(first_error(&diags).contains("cpu_count"));
    assert!(world.vcd.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn id_of_another_kind_is_not_a_policy() -> Result<()> {
    let world = world();
    let diags = world
        .try_import(VM_SIZING_POLICY, world.vdc.as_str())
        .await
        .expect_err("a VDC is not a sizing policy");
    assert!(first_error(&diags).contains("VM sizing policy"));
    Ok(())
}
