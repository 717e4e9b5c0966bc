//! JSON adapter between a host and the kernel.
//!
//! A host sends one [`HostRequest`] per operation, naming the resource kind by
//! its type name. The name is resolved once to a typed kind; everything after
//! that works on the kernel's typed API.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use vcd_kernel::{
    AttrMap, Diagnostics, Kernel, KernelConfig, KernelError, Plan, ProviderConfig, ResourceData,
};
use vcd_sdk::{OpContext, SharedClient};

use crate::registry::registry;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("malformed host message: {0}")]
    Message(#[from] serde_json::Error),
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostRequest {
    Create {
        kind: String,
        config: AttrMap,
    },
    Read {
        kind: String,
        id: String,
        state: AttrMap,
    },
    Update {
        kind: String,
        id: String,
        state: AttrMap,
        config: AttrMap,
    },
    Delete {
        kind: String,
        id: String,
        state: AttrMap,
    },
    Import {
        kind: String,
        path: String,
    },
    Plan {
        kind: String,
        #[serde(default)]
        state: Option<AttrMap>,
        config: AttrMap,
    },
    ReadDataSource {
        kind: String,
        config: AttrMap,
    },
}

impl HostRequest {
    pub fn kind(&self) -> &str {
        match self {
            HostRequest::Create { kind, .. }
            | HostRequest::Read { kind, .. }
            | HostRequest::Update { kind, .. }
            | HostRequest::Delete { kind, .. }
            | HostRequest::Import { kind, .. }
            | HostRequest::Plan { kind, .. }
            | HostRequest::ReadDataSource { kind, .. } => kind,
        }
    }

    fn op(&self) -> &'static str {
        match self {
            HostRequest::Create { .. } => "create",
            HostRequest::Read { .. } => "read",
            HostRequest::Update { .. } => "update",
            HostRequest::Delete { .. } => "delete",
            HostRequest::Import { .. } => "import",
            HostRequest::Plan { .. } => "plan",
            HostRequest::ReadDataSource { .. } => "read_data_source",
        }
    }
}

/// New state after an operation. `id` and `state` are absent when the object
/// is gone (deleted, or found missing on read).
#[derive(Debug, Clone, Default, Serialize)]
pub struct HostResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<AttrMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    pub diagnostics: Diagnostics,
}

impl HostResponse {
    fn from_bag(bag: &ResourceData, diagnostics: Diagnostics) -> Self {
        let id = bag.id().map(str::to_string);
        Self {
            state: id.as_ref().map(|_| bag.state()),
            id,
            plan: None,
            diagnostics,
        }
    }

    fn failed(diagnostics: Diagnostics) -> Self {
        Self {
            diagnostics,
            ..Self::default()
        }
    }
}

pub struct Provider {
    kernel: Kernel,
}

impl Provider {
    pub fn new(kernel: Kernel) -> Self {
        Self { kernel }
    }

    /// Kernel over `client` with every descriptor of this crate registered.
    pub fn from_config(client: SharedClient, config: &ProviderConfig) -> Result<Self, ProviderError> {
        config.validate()?;
        let kernel = Kernel::builder(client)
            .with_config(KernelConfig::from_provider(config))
            .build(registry()?);
        Ok(Self::new(kernel))
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub async fn handle(&self, ctx: &OpContext, request: HostRequest) -> Result<HostResponse, ProviderError> {
        let kind = self.kernel.registry().resolve_name(request.kind())?;
        debug!(op = request.op(), kind = %kind, "host request");
        let schema = self.kernel.schema(kind)?;
        let coerce = |raw: AttrMap| {
            schema
                .coerce(raw)
                .map_err(|err| KernelError::validation(format!("{kind}: {err}")))
        };
        let response = match request {
            HostRequest::Create { config, .. } => {
                let mut bag = ResourceData::for_create(schema.clone(), coerce(config)?);
                let diags = self.kernel.create(ctx, kind, &mut bag).await;
                HostResponse::from_bag(&bag, diags)
            }
            HostRequest::Read { id, state, .. } => {
                let mut bag = ResourceData::for_read(schema.clone(), id, coerce(state)?);
                let diags = self.kernel.read(ctx, kind, &mut bag).await;
                HostResponse::from_bag(&bag, diags)
            }
            HostRequest::Update {
                id, state, config, ..
            } => {
                let mut bag =
                    ResourceData::for_update(schema.clone(), id, coerce(state)?, coerce(config)?);
                let diags = self.kernel.update(ctx, kind, &mut bag).await;
                HostResponse::from_bag(&bag, diags)
            }
            HostRequest::Delete { id, state, .. } => {
                let mut bag = ResourceData::for_delete(schema.clone(), id, coerce(state)?);
                let diags = self.kernel.delete(ctx, kind, &mut bag).await;
                if diags.has_errors() {
                    HostResponse::from_bag(&bag, diags)
                } else {
                    HostResponse::failed(diags)
                }
            }
            HostRequest::Import { path, .. } => match self.kernel.import(ctx, kind, &path).await {
                Ok(mut bag) => {
                    let diags = self.kernel.read(ctx, kind, &mut bag).await;
                    HostResponse::from_bag(&bag, diags)
                }
                Err(diags) => HostResponse::failed(diags),
            },
            HostRequest::Plan { state, config, .. } => {
                let prior = state.map(coerce).transpose()?;
                let desired = coerce(config)?;
                match self.kernel.plan(kind, prior.as_ref(), &desired) {
                    Ok(plan) => HostResponse {
                        plan: Some(plan),
                        ..HostResponse::default()
                    },
                    Err(err) => HostResponse::failed(Diagnostics::from(err)),
                }
            }
            HostRequest::ReadDataSource { config, .. } => {
                let mut bag = ResourceData::for_data_source(schema.clone(), coerce(config)?);
                let diags = self.kernel.read_data_source(ctx, kind, &mut bag).await;
                HostResponse::from_bag(&bag, diags)
            }
        };
        Ok(response)
    }

    /// Parse, dispatch and serialize; adapter failures come back as error
    /// diagnostics rather than a transport error.
    pub async fn handle_json(&self, ctx: &OpContext, raw: &str) -> String {
        let response = match serde_json::from_str::<HostRequest>(raw) {
            Ok(request) => self.handle(ctx, request).await,
            Err(err) => Err(ProviderError::from(err)),
        };
        let response = response.unwrap_or_else(|err| {
            let err = match err {
                ProviderError::Kernel(err) => err,
                other => KernelError::validation(other.to_string()),
            };
            HostResponse::failed(Diagnostics::from(err))
        });
        serde_json::to_string(&response).unwrap_or_else(|err| {
            format!(r#"{{"diagnostics":[{{"severity":"error","summary":"unserializable response: {err}"}}]}}"#)
        })
    }
}
