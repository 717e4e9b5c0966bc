//! Client-side surface of the Cloud Director API as seen by the reconciliation kernel.
//!
//! The transport (legacy XML endpoints plus OpenAPI JSON endpoints) lives behind the
//! [`VcdClient`] trait; this crate only defines the typed handles, identifiers and
//! error shapes that cross that seam.

mod client;
mod context;
mod entity;
mod error;
mod metadata;
mod power;
mod task;
mod urn;
mod version;

pub use client::{ConfigSection, SharedClient, VcdClient};
pub use context::OpContext;
pub use entity::{Entity, Query};
pub use error::{SdkError, SdkResult};
pub use metadata::{LegacyMetadataEntry, MetadataDomain, MetadataEntry, MetadataType};
pub use power::{GC_PENDING, PowerOnOptions, PowerState, PowerStatus};
pub use task::{Task, TaskStatus};
pub use urn::{EntityKind, Urn, UrnParseError};
pub use version::{ApiVersion, VersionParseError};
