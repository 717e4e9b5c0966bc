use std::sync::Arc;

use anyhow::Result;
use vcd_kernel::{AttrMap, RecordingProgressSink, attrs};
use vcd_resources::kinds::VAPP_TEMPLATE;
use vcd_sdk::EntityKind;

#[path = "helpers.rs"]
mod helpers;
use helpers::{first_error, id_of, world, world_with_progress};

fn template(catalog: &vcd_sdk::Urn) -> AttrMap {
    attrs! {
        "org" => helpers::ORG,
        "catalog_id" => catalog.to_string(),
        "name" => "photon-5",
        "ova_path" => "/images/photon-5.ova",
        "metadata_entry" => vec![attrs! {"key" => "os", "value" => "photon"}],
    }
}

#[tokio::test]
async fn upload_reports_progress_and_waits_for_catalog_item() -> Result<()> {
    let sink = Arc::new(RecordingProgressSink::default());
    let world = world_with_progress(sink.clone());
    world.vcd.set_upload_polls(4);
    world.vcd.set_sync_lag(2);
    world.vcd.set_item_id_lag(2);
    let catalog = world.catalog("base-images");

    let created = world.create(VAPP_TEMPLATE, template(&catalog)).await?;
    let id = id_of(&created);

    let lines = sink.lines();
    assert_eq!(lines.len(), 4, "{lines:?}");
    assert!(lines.iter().all(|line| line.starts_with("vApp template upload: ")));
    assert_eq!(lines.last().map(String::as_str), Some("vApp template upload: 100%"));

    let item = created
        .get_str("catalog_item_id")
        .expect("catalog item ID is known after create");
    assert!(item.starts_with("urn:vcloud:catalogitem:"));
    assert_eq!(created.get_str("catalog_id"), Some(catalog.as_str()));

    let entries = world.vcd.metadata_of(&id);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, "os");
    Ok(())
}

#[tokio::test]
async fn template_needs_exactly_one_source() -> Result<()> {
    let world = world();
    let catalog = world.catalog("base-images");

    let mut both = template(&catalog);
    both.insert("ovf_url".into(), "https://images.example.com/photon.ovf".into());
    let (_, diags) = world.try_create(VAPP_TEMPLATE, both).await;
    assert!(first_error(&diags).contains("ova_path"));

    let mut neither = template(&catalog);
    neither.remove("ova_path");
    let (_, diags) = world.try_create(VAPP_TEMPLATE, neither).await;
    assert!(diags.has_errors());
    assert_eq!(world.count(EntityKind::VAppTemplate), 0);
    Ok(())
}

#[tokio::test]
async fn catalog_from_another_org_is_rejected() -> Result<()> {
    let world = world();
    let other = world.vcd.org("other");
    let foreign = world.vcd.catalog(&other, "theirs");
    let (_, diags) = world.try_create(VAPP_TEMPLATE, template(&foreign)).await;
    assert!(diags.has_errors());
    assert_eq!(world.count(EntityKind::VAppTemplate), 0);
    Ok(())
}

#[tokio::test]
async fn template_imports_by_catalog_path() -> Result<()> {
    let world = world();
    let catalog = world.catalog("base-images");
    let created = world.create(VAPP_TEMPLATE, template(&catalog)).await?;

    let imported = world
        .import(VAPP_TEMPLATE, "acme.base-images.photon-5")
        .await?;
    assert_eq!(imported.id(), created.id());
    assert_eq!(imported.get_str("catalog_item_id"), created.get_str("catalog_item_id"));
    Ok(())
}
