//! Shared test helpers for integration tests.
//!
//! Every test file compiles this module separately, so some helpers look
//! unused from the point of view of a single file.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Result, bail};
use vcd_kernel::{AttrMap, Diagnostics, Kernel, KernelConfig, ProgressSink, ResourceData, ResourceKind};
use vcd_resources::registry;
use vcd_sdk::{EntityKind, OpContext, Urn};
use vcd_testkit::MemVcd;

pub const ORG: &str = "acme";
pub const VDC: &str = "vdc-nsxt";
pub const EDGE: &str = "edge-1";

/// An in-memory Cloud Director with one org, one NSX-T VDC and one edge
/// gateway, plus a kernel carrying every descriptor of the crate.
pub struct World {
    pub vcd: MemVcd,
    pub kernel: Kernel,
    pub ctx: OpContext,
    pub org: Urn,
    pub vdc: Urn,
    pub edge: Urn,
}

pub fn world() -> World {
    build(MemVcd::new(), None)
}

pub fn world_with_progress(sink: Arc<dyn ProgressSink>) -> World {
    build(MemVcd::new(), Some(sink))
}

pub fn world_on(vcd: MemVcd) -> World {
    build(vcd, None)
}

fn build(vcd: MemVcd, sink: Option<Arc<dyn ProgressSink>>) -> World {
    vcd_testkit::init_tracing();
    let org = vcd.org(ORG);
    let vdc = vcd.vdc(&org, VDC, true);
    let edge = vcd.edge_gateway(&vdc, EDGE);
    let mut builder = Kernel::builder(Arc::new(vcd.clone()))
        .with_config(KernelConfig::fast().with_defaults(Some(ORG), Some(VDC)));
    if let Some(sink) = sink {
        builder = builder.with_progress_sink(sink);
    }
    let kernel = builder.build(registry().expect("descriptor registry"));
    World {
        vcd,
        kernel,
        ctx: OpContext::new(),
        org,
        vdc,
        edge,
    }
}

pub fn ok(diags: Diagnostics) -> Result<()> {
    if diags.has_errors() {
        bail!("kernel reported errors: {diags:?}");
    }
    Ok(())
}

pub fn first_error(diags: &Diagnostics) -> String {
    diags
        .first_error()
        .map(|d| d.summary.clone())
        .unwrap_or_default()
}

pub fn urn(raw: &str) -> Urn {
    Urn::parse(raw).expect("valid URN")
}

pub fn id_of(bag: &ResourceData) -> Urn {
    urn(bag.id().expect("bag has an ID"))
}

impl World {
    pub fn bag_for_create(&self, kind: ResourceKind, desired: AttrMap) -> ResourceData {
        ResourceData::for_create(self.kernel.schema(kind).expect("registered kind"), desired)
    }

    pub async fn try_create(&self, kind: ResourceKind, desired: AttrMap) -> (ResourceData, Diagnostics) {
        let mut bag = self.bag_for_create(kind, desired);
        let diags = self.kernel.create(&self.ctx, kind, &mut bag).await;
        (bag, diags)
    }

    pub async fn create(&self, kind: ResourceKind, desired: AttrMap) -> Result<ResourceData> {
        let (bag, diags) = self.try_create(kind, desired).await;
        ok(diags)?;
        Ok(bag)
    }

    /// Fresh read of the state a previous call returned, as the host does
    /// before planning.
    pub async fn read(&self, kind: ResourceKind, previous: &ResourceData) -> Result<ResourceData> {
        let mut bag = ResourceData::for_read(
            self.kernel.schema(kind)?,
            previous.id().unwrap_or_default(),
            previous.state(),
        );
        ok(self.kernel.read(&self.ctx, kind, &mut bag).await)?;
        Ok(bag)
    }

    pub async fn try_update(
        &self,
        kind: ResourceKind,
        previous: &ResourceData,
        desired: AttrMap,
    ) -> (ResourceData, Diagnostics) {
        let mut bag = ResourceData::for_update(
            self.kernel.schema(kind).expect("registered kind"),
            previous.id().unwrap_or_default(),
            previous.state(),
            desired,
        );
        let diags = self.kernel.update(&self.ctx, kind, &mut bag).await;
        (bag, diags)
    }

    pub async fn update(
        &self,
        kind: ResourceKind,
        previous: &ResourceData,
        desired: AttrMap,
    ) -> Result<ResourceData> {
        let (bag, diags) = self.try_update(kind, previous, desired).await;
        ok(diags)?;
        Ok(bag)
    }

    pub async fn try_delete(&self, kind: ResourceKind, previous: &ResourceData) -> (ResourceData, Diagnostics) {
        let mut bag = ResourceData::for_delete(
            self.kernel.schema(kind).expect("registered kind"),
            previous.id().unwrap_or_default(),
            previous.state(),
        );
        let diags = self.kernel.delete(&self.ctx, kind, &mut bag).await;
        (bag, diags)
    }

    pub async fn delete(&self, kind: ResourceKind, previous: &ResourceData) -> Result<ResourceData> {
        let (bag, diags) = self.try_delete(kind, previous).await;
        ok(diags)?;
        Ok(bag)
    }

    /// Import followed by the read the host performs right after.
    pub async fn import(&self, kind: ResourceKind, path: &str) -> Result<ResourceData> {
        let imported = match self.kernel.import(&self.ctx, kind, path).await {
            Ok(bag) => bag,
            Err(diags) => bail!("import failed: {diags:?}"),
        };
        self.read(kind, &imported).await
    }

    pub async fn try_import(&self, kind: ResourceKind, path: &str) -> Result<ResourceData, Diagnostics> {
        self.kernel.import(&self.ctx, kind, path).await
    }

    /// A vApp seeded straight into the remote, optionally running.
    pub fn seed_vapp(&self, name: &str, powered_on: bool) -> Urn {
        self.vcd.vapp(&self.vdc, name, powered_on)
    }

    pub fn catalog(&self, name: &str) -> Urn {
        self.vcd.catalog(&self.org, name)
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.vcd.count(kind)
    }
}
