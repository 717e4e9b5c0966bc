use async_trait::async_trait;
use vcd_sdk::{LegacyMetadataEntry, MetadataEntry, Urn};

use crate::error::KernelResult;
use crate::metadata::{LegacyMetadataCapable, MetadataCapable};
use crate::session::Session;

/// A remote object addressed by URN, bound to the current call.
///
/// This is where the metadata capabilities are attached; the engine itself
/// only sees the traits.
#[derive(Clone, Copy)]
pub struct EntityHandle<'a> {
    session: &'a Session,
    id: &'a Urn,
}

impl<'a> EntityHandle<'a> {
    pub fn new(session: &'a Session, id: &'a Urn) -> Self {
        Self { session, id }
    }

    pub fn id(&self) -> &Urn {
        self.id
    }
}

#[async_trait]
impl MetadataCapable for EntityHandle<'_> {
    async fn get_metadata(&self) -> KernelResult<Vec<MetadataEntry>> {
        let s = self.session;
        Ok(s.client.metadata_entries(&s.ctx, self.id).await?)
    }

    async fn get_metadata_by_id(&self, id: &str) -> KernelResult<MetadataEntry> {
        let s = self.session;
        Ok(s.client.metadata_entry(&s.ctx, self.id, id).await?)
    }

    async fn add_metadata(&self, entry: &MetadataEntry) -> KernelResult<MetadataEntry> {
        let s = self.session;
        Ok(s.client.create_metadata_entry(&s.ctx, self.id, entry).await?)
    }

    async fn update_metadata(&self, entry: &MetadataEntry) -> KernelResult<MetadataEntry> {
        let s = self.session;
        Ok(s.client.update_metadata_entry(&s.ctx, self.id, entry).await?)
    }

    async fn delete_metadata(&self, id: &str) -> KernelResult<()> {
        let s = self.session;
        Ok(s.client.delete_metadata_entry(&s.ctx, self.id, id).await?)
    }
}

#[async_trait]
impl LegacyMetadataCapable for EntityHandle<'_> {
    async fn get_legacy_metadata(&self) -> KernelResult<Vec<LegacyMetadataEntry>> {
        let s = self.session;
        Ok(s.client.legacy_metadata(&s.ctx, self.id).await?)
    }

    async fn merge_legacy_metadata(&self, entries: &[(String, String)]) -> KernelResult<()> {
        let s = self.session;
        let task = s.client.merge_legacy_metadata(&s.ctx, self.id, entries).await?;
        s.waiter().wait(task).await?;
        Ok(())
    }

    async fn delete_legacy_metadata(&self, key: &str) -> KernelResult<()> {
        let s = self.session;
        let task = s.client.delete_legacy_metadata(&s.ctx, self.id, key).await?;
        s.waiter().wait(task).await?;
        Ok(())
    }
}
