use anyhow::Result;
use vcd_kernel::{AttrMap, attrs};
use vcd_resources::kinds::NAT_RULE;
use vcd_sdk::EntityKind;

#[path = "helpers.rs"]
mod helpers;
use helpers::{World, first_error, id_of, world};

fn dnat(world: &World, name: &str, external: &str, internal: &str) -> AttrMap {
    attrs! {
        "org" => helpers::ORG,
        "edge_gateway_id" => world.edge.to_string(),
        "name" => name,
        "rule_type" => "DNAT",
        "external_address" => external,
        "internal_address" => internal,
    }
}

#[tokio::test]
async fn duplicate_names_make_name_import_ambiguous() -> Result<()> {
    let world = world();
    let first = world
        .create(NAT_RULE, dnat(&world, "web", "10.10.10.1", "192.168.1.10"))
        .await?;
    let second = world
        .create(NAT_RULE, dnat(&world, "web", "10.10.10.2", "192.168.1.20"))
        .await?;
    assert_eq!(world.count(EntityKind::NatRule), 2);

    let diags = world
        .try_import(NAT_RULE, "acme.vdc-nsxt.edge-1.web")
        .await
        .expect_err("two rules share the name");
    let message = first_error(&diags);
    assert!(message.contains("found 2"), "{message}");
    assert!(message.contains("ID | Name | Rule Type | Internal | External"), "{message}");
    for rule in [&first, &second] {
        assert!(message.contains(rule.id().unwrap_or_default()), "{message}");
    }

    let path = format!("acme.vdc-nsxt.edge-1.{}", id_of(&second));
    let imported = world.import(NAT_RULE, &path).await?;
    assert_eq!(imported.id(), second.id());
    assert_eq!(imported.get_str("internal_address"), Some("192.168.1.20"));
    assert_eq!(imported.get_str("edge_gateway_id"), Some(world.edge.as_str()));
    Ok(())
}

#[tokio::test]
async fn unique_name_imports_directly() -> Result<()> {
    let world = world();
    let created = world
        .create(NAT_RULE, dnat(&world, "ssh", "10.10.10.5", "192.168.1.5"))
        .await?;
    let imported = world.import(NAT_RULE, "acme.vdc-nsxt.edge-1.ssh").await?;
    assert_eq!(imported.id(), created.id());
    assert_eq!(imported.state(), created.state());
    Ok(())
}

#[tokio::test]
async fn import_path_with_wrong_arity_lists_forms() -> Result<()> {
    let world = world();
    let diags = world
        .try_import(NAT_RULE, "acme.edge-1.ssh")
        .await
        .expect_err("three segments is not a NAT rule path");
    let message = first_error(&diags);
    assert!(message.contains("accepted forms"), "{message}");
    assert!(
        message.contains("org-name.vdc-or-vdc-group-name.edge-gateway-name.nat-rule-name-or-id"),
        "{message}"
    );
    Ok(())
}

#[tokio::test]
async fn concurrent_rules_on_one_edge_never_overlap() -> Result<()> {
    let world = world();
    let (a, b, c, d) = tokio::join!(
        world.create(NAT_RULE, dnat(&world, "a", "10.10.10.1", "192.168.1.1")),
        world.create(NAT_RULE, dnat(&world, "b", "10.10.10.2", "192.168.1.2")),
        world.create(NAT_RULE, dnat(&world, "c", "10.10.10.3", "192.168.1.3")),
        world.create(NAT_RULE, dnat(&world, "d", "10.10.10.4", "192.168.1.4")),
    );
    for rule in [a?, b?, c?, d?] {
        assert!(rule.id().is_some());
    }

    let windows = world.vcd.windows(&world.edge);
    assert_eq!(windows.len(), 4);
    for (i, left) in windows.iter().enumerate() {
        for right in &windows[i + 1..] {
            assert!(!left.overlaps(right), "{left:?} overlaps {right:?}");
        }
    }
    Ok(())
}

#[tokio::test]
async fn missing_internal_address_is_rejected_locally() -> Result<()> {
    let world = world();
    world.vcd.clear_calls();
    let mut desired = dnat(&world, "half", "10.10.10.1", "192.168.1.1");
    desired.remove("internal_address");
    let (_, diags) = world.try_create(NAT_RULE, desired).await;
    assert!(first_error(&diags).contains("internal_address"));
    assert!(world.vcd.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn duplicate_org_names_list_candidates_as_a_table() -> Result<()> {
    let world = world();
    let twin = world.vcd.org(helpers::ORG);

    let diags = world
        .try_import(NAT_RULE, "acme.vdc-nsxt.edge-1.web")
        .await
        .expect_err("two orgs share the name");
    let message = first_error(&diags);
    assert!(message.contains("found 2 org named 'acme'"), "{message}");
    assert!(message.contains("ID | Name"), "{message}");
    for org in [&world.org, &twin] {
        assert!(message.contains(&format!("{org} | acme")), "{message}");
    }
    Ok(())
}
