use std::sync::Arc;

use vcd_sdk::{ApiVersion, Entity, OpContext, SharedClient, Urn};

use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::handle::EntityHandle;
use crate::identity::IdentityResolver;
use crate::task::{ProgressSink, TaskWaiter};

/// Everything one kernel call needs to talk to the remote.
///
/// Built per call; cloning is cheap.
#[derive(Clone)]
pub struct Session {
    pub client: SharedClient,
    pub ctx: OpContext,
    pub config: Arc<KernelConfig>,
    pub progress: Arc<dyn ProgressSink>,
}

impl Session {
    pub fn resolver(&self) -> IdentityResolver<'_> {
        IdentityResolver::new(self)
    }

    pub fn waiter(&self) -> TaskWaiter<'_> {
        TaskWaiter::new(self)
    }

    pub fn handle<'a>(&'a self, id: &'a Urn) -> EntityHandle<'a> {
        EntityHandle::new(self, id)
    }

    pub fn api_version(&self) -> ApiVersion {
        self.client.api_version()
    }

    pub async fn fetch(&self, id: &Urn) -> KernelResult<Entity> {
        Ok(self.client.get_by_id(&self.ctx, id).await?)
    }

    /// Parse a host-supplied ID into a URN.
    pub fn urn(&self, raw: &str) -> KernelResult<Urn> {
        Urn::parse(raw).map_err(|err| KernelError::validation(err.to_string()))
    }
}
