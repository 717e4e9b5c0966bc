//! Reconciliation kernel for Cloud Director resources.
//!
//! A host hands the kernel an attribute bag and a typed resource kind; the
//! kernel resolves the parent scope, serializes access to shared parents,
//! drives the remote through a [`vcd_sdk::VcdClient`], waits on the resulting
//! tasks and writes what it observed back into the bag.
//!
//! Per-kind knowledge lives in [`descriptor::ResourceDescriptor`]
//! implementations; this crate holds only the machinery they plug into.

pub mod bag;
pub mod config;
pub mod descriptor;
pub mod diag;
pub mod error;
pub mod handle;
pub mod identity;
pub mod import;
pub mod kernel;
pub mod lock;
pub mod metadata;
pub mod power;
pub mod schema;
pub mod session;
pub mod task;
pub mod validate;
pub mod value;

pub use bag::ResourceData;
pub use config::{Credentials, KernelConfig, ProviderConfig};
pub use descriptor::{
    DescriptorMode, DescriptorRegistry, HookPhase, Lifecycle, PostHook, ResolvedParent,
    ResourceDescriptor, ResourceKind, SharedDescriptor,
};
pub use diag::{Diagnostic, Diagnostics, Severity};
pub use error::{ErrorKind, KernelError, KernelResult};
pub use identity::{OwnerRules, ParentContext, VAppScope, VdcOrGroup};
pub use import::{CandidateTable, ImportForm, ImportPath, ImportedResource, PathScope};
pub use kernel::{Kernel, KernelBuilder};
pub use lock::{LockBroker, LockGuard, LockKey};
pub use metadata::MetadataStyle;
pub use power::{PowerOffPolicy, PowerTarget};
pub use schema::{AttrType, Attribute, Plan, Presence, Schema};
pub use session::Session;
pub use task::{ProgressSink, RecordingProgressSink, TracingProgressSink};
pub use value::{AttrMap, AttrValue, RecordExt};
