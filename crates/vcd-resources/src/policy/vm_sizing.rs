//! VM sizing policy: a provider-level compute policy VDCs can publish.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use vcd_kernel::{
    Attribute, ImportForm, ImportPath, ImportedResource, KernelError, KernelResult, ParentContext,
    PathScope, ResolvedParent, ResourceData, ResourceDescriptor, ResourceKind, Schema, Session,
    attrs, validate,
};
use vcd_sdk::{Entity, EntityKind, Query};

use crate::common::{self, int_at, str_at};
use crate::kinds;

const FORMS: &[ImportForm] = &[ImportForm::new(PathScope::Global, &["policy-name-or-id"])];

const SIZES: [(&str, &str); 4] = [
    ("cpu_count", "cpuCount"),
    ("cpu_speed_in_mhz", "cpuSpeed"),
    ("cores_per_socket", "coresPerSocket"),
    ("memory_in_mb", "memory"),
];

pub struct VmSizingPolicy {
    schema: Arc<Schema>,
}

impl VmSizingPolicy {
    pub fn new() -> Self {
        let sizes = SIZES.map(|(attr, _)| {
            Attribute::int(attr)
                .force_new()
                .validate(validate::positive)
        });
        let schema = Schema::new([common::name(), common::description()]).with(sizes);
        Self {
            schema: Arc::new(schema),
        }
    }
}

impl Default for VmSizingPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDescriptor for VmSizingPolicy {
    fn kind(&self) -> ResourceKind {
        kinds::VM_SIZING_POLICY
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::VmSizingPolicy
    }

    fn import_forms(&self) -> &'static [ImportForm] {
        FORMS
    }

    async fn resolve_parent(&self, _session: &Session, _bag: &ResourceData) -> KernelResult<ResolvedParent> {
        Ok(ResolvedParent::new(ParentContext::Provider, None))
    }

    fn to_payload(&self, bag: &ResourceData, _parent: &ResolvedParent) -> KernelResult<Value> {
        let mut body = json!({
            "name": bag.require_str("name")?,
            "description": bag.get_string("description"),
        });
        for (attr, field) in SIZES {
            if let Some(value) = bag.get_int(attr) {
                body[field] = json!(value);
            }
        }
        Ok(body)
    }

    fn from_payload(&self, entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
        bag.set("name", entity.name.as_str())?;
        bag.set("description", str_at(&entity.body, "/description"))?;
        for (attr, field) in SIZES {
            bag.set(attr, int_at(&entity.body, &format!("/{field}")))?;
        }
        Ok(())
    }

    async fn import(&self, session: &Session, path: &ImportPath) -> KernelResult<ImportedResource> {
        path.classify(FORMS)?;
        let policy = match path.last_as_urn() {
            Some(urn) => {
                let entity = session.fetch(&urn).await?;
                if entity.kind != EntityKind::VmSizingPolicy {
                    return Err(KernelError::not_found(format!("VM sizing policy {urn}")));
                }
                entity
            }
            None => {
                let query = Query::of(EntityKind::VmSizingPolicy).named(path.last());
                common::find_unique(session, query, &["ID", "Name", "Description"], |entity| {
                    vec![
                        entity.id.to_string(),
                        entity.name.clone(),
                        entity.str_field("description").unwrap_or_default().to_string(),
                    ]
                })
                .await?
            }
        };
        Ok(ImportedResource {
            id: policy.id.to_string(),
            attributes: attrs! {},
        })
    }
}
