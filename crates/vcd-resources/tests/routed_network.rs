use std::time::Duration;

use anyhow::Result;
use vcd_kernel::{AttrMap, LockKey, Plan, attrs};
use vcd_resources::kinds::NETWORK_ROUTED_V2;
use vcd_sdk::EntityKind;

#[path = "helpers.rs"]
mod helpers;
use helpers::{World, id_of, world};

fn pool(start: &str, end: &str) -> AttrMap {
    attrs! {"start_address" => start, "end_address" => end}
}

fn routed(
    world: &World,
    name: &str,
    description: Option<&str>,
    pools: Vec<AttrMap>,
    guest_vlan: bool,
    metadata: AttrMap,
) -> AttrMap {
    attrs! {
        "org" => helpers::ORG,
        "edge_gateway_id" => world.edge.to_string(),
        "name" => name,
        "description" => description,
        "gateway" => "1.1.1.1",
        "prefix_length" => 24,
        "static_ip_pool" => pools,
        "guest_vlan_allowed" => guest_vlan,
        "metadata" => metadata,
    }
}

#[tokio::test]
async fn routed_network_lifecycle() -> Result<()> {
    let world = world();

    let created = world
        .create(
            NETWORK_ROUTED_V2,
            routed(
                &world,
                "nsxt-routed-test-initial",
                None,
                vec![pool("1.1.1.10", "1.1.1.20")],
                true,
                attrs! {"key1" => "value1"},
            ),
        )
        .await?;
    let id = id_of(&created);
    assert_eq!(created.get_records("static_ip_pool").len(), 1);
    assert!(created.get_bool("guest_vlan_allowed"));
    assert_eq!(created.get_str("owner_id"), Some(world.vdc.as_str()));

    let three_pools = vec![
        pool("1.1.1.10", "1.1.1.20"),
        pool("1.1.1.30", "1.1.1.40"),
        pool("1.1.1.50", "1.1.1.60"),
    ];
    let updated = world
        .update(
            NETWORK_ROUTED_V2,
            &created,
            routed(
                &world,
                "TestRoutedNetworkLifecycle",
                Some("Updated"),
                three_pools,
                false,
                attrs! {"key2" => "value2"},
            ),
        )
        .await?;
    assert_eq!(id_of(&updated), id);
    assert_eq!(updated.get_records("static_ip_pool").len(), 3);
    assert_eq!(updated.get_str("description"), Some("Updated"));
    let remote_keys: Vec<String> = world
        .vcd
        .legacy_metadata_of(&id)
        .into_iter()
        .map(|entry| entry.key)
        .collect();
    assert_eq!(remote_keys, vec!["key2".to_string()]);

    let imported = world
        .import(NETWORK_ROUTED_V2, "acme.vdc-nsxt.TestRoutedNetworkLifecycle")
        .await?;
    assert_eq!(id_of(&imported), id);
    assert_eq!(imported.state(), updated.state());

    let emptied = world
        .update(
            NETWORK_ROUTED_V2,
            &updated,
            routed(
                &world,
                "TestRoutedNetworkLifecycle",
                Some("Updated"),
                Vec::new(),
                false,
                attrs! {"key2" => "value2"},
            ),
        )
        .await?;
    assert_eq!(id_of(&emptied), id);
    assert!(emptied.get_records("static_ip_pool").is_empty());
    Ok(())
}

#[tokio::test]
async fn reads_are_stable_and_match_create() -> Result<()> {
    let world = world();
    let created = world
        .create(
            NETWORK_ROUTED_V2,
            routed(
                &world,
                "stable",
                Some("twice"),
                vec![pool("1.1.1.10", "1.1.1.20")],
                false,
                attrs! {"env" => "test"},
            ),
        )
        .await?;

    let first = world.read(NETWORK_ROUTED_V2, &created).await?;
    assert_eq!(first.state(), created.state());
    let second = world.read(NETWORK_ROUTED_V2, &first).await?;
    assert_eq!(second.state(), first.state());
    Ok(())
}

#[tokio::test]
async fn removed_network_is_planned_again() -> Result<()> {
    let world = world();
    let desired = routed(&world, "drifting", None, Vec::new(), false, AttrMap::new());
    let created = world.create(NETWORK_ROUTED_V2, desired.clone()).await?;

    assert!(world.vcd.remove(&id_of(&created)));
    let read = world.read(NETWORK_ROUTED_V2, &created).await?;
    assert_eq!(read.id(), None);

    let plan = world.kernel.plan(NETWORK_ROUTED_V2, None, &desired)?;
    assert_eq!(plan, Plan::Create);
    Ok(())
}

#[tokio::test]
async fn delete_twice_succeeds() -> Result<()> {
    let world = world();
    let created = world
        .create(
            NETWORK_ROUTED_V2,
            routed(&world, "short-lived", None, Vec::new(), false, AttrMap::new()),
        )
        .await?;

    let deleted = world.delete(NETWORK_ROUTED_V2, &created).await?;
    assert_eq!(deleted.id(), None);
    assert_eq!(world.count(EntityKind::OrgVdcNetwork), 0);

    // The host retries with the state it still holds.
    world.delete(NETWORK_ROUTED_V2, &created).await?;
    Ok(())
}

#[tokio::test]
async fn gateway_change_is_a_replacement() -> Result<()> {
    let world = world();
    let created = world
        .create(
            NETWORK_ROUTED_V2,
            routed(&world, "replace-me", None, Vec::new(), false, AttrMap::new()),
        )
        .await?;

    let mut desired = routed(&world, "replace-me", None, Vec::new(), false, AttrMap::new());
    desired.insert("gateway".into(), "2.2.2.1".into());
    let plan = world
        .kernel
        .plan(NETWORK_ROUTED_V2, Some(&created.state()), &desired)?;
    assert_eq!(
        plan,
        Plan::Replace {
            forced_by: vec!["gateway".to_string()]
        }
    );

    // Applying it as an update anyway is refused before touching the remote.
    world.vcd.clear_calls();
    let (_, diags) = world.try_update(NETWORK_ROUTED_V2, &created, desired).await;
    assert!(diags.has_errors());
    assert!(helpers::first_error(&diags).contains("gateway"));
    assert!(world.vcd.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn reversed_pool_fails_before_any_remote_call() -> Result<()> {
    let world = world();
    world.vcd.clear_calls();
    let (bag, diags) = world
        .try_create(
            NETWORK_ROUTED_V2,
            routed(
                &world,
                "bad-pool",
                None,
                vec![pool("1.1.1.20", "1.1.1.10")],
                false,
                AttrMap::new(),
            ),
        )
        .await;
    assert!(diags.has_errors());
    assert_eq!(bag.id(), None);
    assert!(world.vcd.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn leaving_a_group_gateway_waits_for_the_group_lock() -> Result<()> {
    let world = world();
    let group = world.vcd.vdc_group(&world.org, "shared");
    let group_edge = world.vcd.edge_gateway(&group, "edge-shared");

    let mut desired = routed(&world, "mover", None, Vec::new(), false, AttrMap::new());
    desired.insert("edge_gateway_id".into(), group_edge.to_string().into());
    let created = world.create(NETWORK_ROUTED_V2, desired.clone()).await?;

    let mut moved = desired;
    moved.insert("edge_gateway_id".into(), world.edge.to_string().into());

    let held = world
        .kernel
        .locks()
        .acquire(&world.ctx, LockKey::VdcGroup(group.clone()))
        .await?;
    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        world.update(NETWORK_ROUTED_V2, &created, moved.clone()),
    )
    .await;
    assert!(blocked.is_err(), "update ran while the group was locked");

    drop(held);
    let updated = world.update(NETWORK_ROUTED_V2, &created, moved).await?;
    assert_eq!(updated.get_str("edge_gateway_id"), Some(world.edge.as_str()));
    Ok(())
}
