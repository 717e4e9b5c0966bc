use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    ApiVersion, Entity, LegacyMetadataEntry, MetadataEntry, OpContext, PowerOnOptions,
    PowerStatus, Query, SdkResult, Task, Urn,
};

pub type SharedClient = Arc<dyn VcdClient>;

/// Configuration documents that live on another object rather than being
/// objects of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigSection {
    DnsForwarder,
    DhcpForwarding,
    IpsecSecurityProfile,
    VAppLease,
}

impl ConfigSection {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSection::DnsForwarder => "dns",
            ConfigSection::DhcpForwarding => "dhcpForwarder",
            ConfigSection::IpsecSecurityProfile => "tunnelProfile",
            ConfigSection::VAppLease => "leaseSettingsSection",
        }
    }
}

impl fmt::Display for ConfigSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations the kernel needs from a Cloud Director client.
///
/// Mutations return a [`Task`]; the caller decides how long to wait for it.
/// Every call receives the per-operation [`OpContext`].
#[async_trait]
pub trait VcdClient: Send + Sync {
    fn api_version(&self) -> ApiVersion;

    async fn get_by_id(&self, ctx: &OpContext, id: &Urn) -> SdkResult<Entity>;
    async fn query(&self, ctx: &OpContext, query: &Query) -> SdkResult<Vec<Entity>>;

    /// Re-read an entity to pick up links and ETags the remote populates lazily.
    async fn refresh(&self, ctx: &OpContext, entity: &Entity) -> SdkResult<Entity> {
        self.get_by_id(ctx, &entity.id).await
    }

    async fn create(
        &self,
        ctx: &OpContext,
        kind: crate::EntityKind,
        parent: Option<&Urn>,
        body: Value,
    ) -> SdkResult<Task>;
    async fn update(&self, ctx: &OpContext, id: &Urn, etag: &str, body: Value)
    -> SdkResult<Task>;
    async fn delete(&self, ctx: &OpContext, id: &Urn, force: bool) -> SdkResult<Task>;
    async fn get_task(&self, ctx: &OpContext, id: &Urn) -> SdkResult<Task>;

    async fn get_config(
        &self,
        ctx: &OpContext,
        owner: &Urn,
        section: ConfigSection,
    ) -> SdkResult<Entity>;
    async fn put_config(
        &self,
        ctx: &OpContext,
        owner: &Urn,
        section: ConfigSection,
        body: Value,
    ) -> SdkResult<Task>;

    async fn power_status(&self, ctx: &OpContext, id: &Urn) -> SdkResult<PowerStatus>;
    async fn power_on(&self, ctx: &OpContext, id: &Urn, options: PowerOnOptions)
    -> SdkResult<Task>;
    /// The "Power Off" button: undeploys and powers off.
    async fn undeploy(&self, ctx: &OpContext, id: &Urn) -> SdkResult<Task>;
    async fn guest_customization_status(&self, ctx: &OpContext, vm: &Urn) -> SdkResult<String>;

    /// Catalog index lookup; reports not found until the catalog item is indexed.
    async fn query_synchronized_by_id(&self, ctx: &OpContext, id: &Urn) -> SdkResult<Entity>;

    async fn legacy_metadata(
        &self,
        ctx: &OpContext,
        owner: &Urn,
    ) -> SdkResult<Vec<LegacyMetadataEntry>>;
    async fn merge_legacy_metadata(
        &self,
        ctx: &OpContext,
        owner: &Urn,
        entries: &[(String, String)],
    ) -> SdkResult<Task>;
    async fn delete_legacy_metadata(&self, ctx: &OpContext, owner: &Urn, key: &str)
    -> SdkResult<Task>;

    async fn metadata_entries(&self, ctx: &OpContext, owner: &Urn)
    -> SdkResult<Vec<MetadataEntry>>;
    async fn metadata_entry(
        &self,
        ctx: &OpContext,
        owner: &Urn,
        entry_id: &str,
    ) -> SdkResult<MetadataEntry>;
    async fn create_metadata_entry(
        &self,
        ctx: &OpContext,
        owner: &Urn,
        entry: &MetadataEntry,
    ) -> SdkResult<MetadataEntry>;
    /// Rejected with [`crate::SdkError::StaleEtag`] when `entry.etag` is not current.
    async fn update_metadata_entry(
        &self,
        ctx: &OpContext,
        owner: &Urn,
        entry: &MetadataEntry,
    ) -> SdkResult<MetadataEntry>;
    async fn delete_metadata_entry(
        &self,
        ctx: &OpContext,
        owner: &Urn,
        entry_id: &str,
    ) -> SdkResult<()>;
}
