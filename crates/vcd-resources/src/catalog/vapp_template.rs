//! vApp template uploaded into a catalog from an OVF URL or a local OVA.
//!
//! A finished upload task does not mean the template is usable: the catalog
//! index and the catalog item ID both show up later. The create hook waits
//! for both before the first read.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use vcd_kernel::identity::child_by_name;
use vcd_kernel::metadata::metadata_attributes;
use vcd_kernel::task::run_with_retry;
use vcd_kernel::{
    Attribute, HookPhase, ImportForm, ImportPath, ImportedResource, KernelError, KernelResult,
    MetadataStyle, ParentContext, PathScope, PostHook, ResolvedParent, ResourceData,
    ResourceDescriptor, ResourceKind, Schema, Session, attrs, validate,
};
use vcd_sdk::{Entity, EntityKind, Urn};

use crate::common::{self, str_at, urn_attr};
use crate::kinds;

const CATALOG_ID: &str = "catalog_id";
const CATALOG_ITEM_ID: &str = "catalog_item_id";
const SOURCES: &[&str] = &["ovf_url", "ova_path"];

const FORMS: &[ImportForm] = &[ImportForm::new(
    PathScope::Catalog,
    &["org-name", "catalog-name", "vapp-template-name"],
)];

fn schema() -> Schema {
    Schema::new([
        common::org(),
        Attribute::string(CATALOG_ID)
            .required()
            .force_new()
            .validate(validate::urn),
        common::name(),
        common::description(),
        Attribute::string("ovf_url").force_new().exactly_one_of(SOURCES),
        Attribute::string("ova_path").force_new().exactly_one_of(SOURCES),
        Attribute::int("upload_piece_size")
            .default(1)
            .validate(validate::positive)
            .describe("Upload chunk size in MB"),
        Attribute::string(CATALOG_ITEM_ID).computed(),
    ])
    .with(metadata_attributes(MetadataStyle::OpenApi))
}

/// Waits for the catalog index, then for the item ID, and records it.
struct SynchronizedHook;

#[async_trait]
impl PostHook for SynchronizedHook {
    fn name(&self) -> &'static str {
        "catalog-sync"
    }

    async fn run(
        &self,
        session: &Session,
        _phase: HookPhase,
        id: &Urn,
        bag: &mut ResourceData,
    ) -> KernelResult<()> {
        let entity = session.waiter().wait_synchronized(id).await?;
        let client = &session.client;
        let ctx = &session.ctx;
        let item = run_with_retry(
            ctx,
            entity,
            move |entity: Entity| async move {
                client.refresh(ctx, &entity).await.map_err(KernelError::from)
            },
            |entity: &Entity| {
                entity
                    .str_field("catalogItemId")
                    .map(str::to_string)
                    .ok_or_else(|| KernelError::payload(format!("catalog item ID of {id} not populated yet")))
            },
            session.config.sync_budget,
        )
        .await?;
        debug!(object = %id, item = %item, "catalog item available");
        bag.set(CATALOG_ITEM_ID, item)
    }
}

pub struct VAppTemplate {
    schema: Arc<Schema>,
}

impl VAppTemplate {
    pub fn new() -> Self {
        Self {
            schema: Arc::new(schema()),
        }
    }
}

impl Default for VAppTemplate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDescriptor for VAppTemplate {
    fn kind(&self) -> ResourceKind {
        kinds::VAPP_TEMPLATE
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::VAppTemplate
    }

    fn import_forms(&self) -> &'static [ImportForm] {
        FORMS
    }

    fn cosmetic_attributes(&self) -> &'static [&'static str] {
        &["upload_piece_size"]
    }

    fn metadata_style(&self) -> Option<MetadataStyle> {
        Some(MetadataStyle::OpenApi)
    }

    fn upload_progress_label(&self) -> Option<&'static str> {
        Some("vApp template upload")
    }

    async fn resolve_parent(&self, session: &Session, bag: &ResourceData) -> KernelResult<ResolvedParent> {
        let org = session.resolver().org(bag).await?;
        let catalog = session.fetch(&urn_attr(bag, CATALOG_ID)?).await?;
        if catalog.kind != EntityKind::Catalog || catalog.parent.as_ref() != Some(&org.id) {
            return Err(KernelError::not_found(format!(
                "catalog {} in org '{}'",
                catalog.id, org.name
            )));
        }
        let context = ParentContext::Org {
            org: org.name,
            id: org.id,
        };
        Ok(ResolvedParent::new(context, Some(catalog)))
    }

    fn to_payload(&self, bag: &ResourceData, _parent: &ResolvedParent) -> KernelResult<Value> {
        Ok(json!({
            "name": bag.require_str("name")?,
            "description": bag.get_string("description"),
            "ovfUrl": common::opt_str(bag, "ovf_url"),
            "ovaPath": common::opt_str(bag, "ova_path"),
            "uploadPieceSize": bag.get_int("upload_piece_size"),
        }))
    }

    fn from_payload(&self, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        bag.set("name", entity.name.as_str())?;
        bag.set("description", str_at(&entity.body, "/description"))?;
        if let Some(catalog) = &entity.parent {
            bag.set(CATALOG_ID, catalog.to_string())?;
        }
        if let Some(item) = str_at(&entity.body, "/catalogItemId") {
            bag.set(CATALOG_ITEM_ID, item)?;
        }
        Ok(())
    }

    async fn import(&self, session: &Session, path: &ImportPath) -> KernelResult<ImportedResource> {
        path.classify(FORMS)?;
        let org = session.resolver().org_by_name(path.segment(0)).await?;
        let catalog = child_by_name(session, &org.id, EntityKind::Catalog, path.segment(1)).await?;
        let template =
            common::child_from_path(session, &catalog.id, EntityKind::VAppTemplate, path).await?;
        Ok(ImportedResource {
            id: template.id.to_string(),
            attributes: attrs! {
                common::ORG => org.name,
                CATALOG_ID => catalog.id.to_string(),
            },
        })
    }

    fn post_create_hooks(&self) -> Vec<Arc<dyn PostHook>> {
        vec![Arc::new(SynchronizedHook)]
    }
}
