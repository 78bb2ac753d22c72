use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use sfn_core::{
    AssetId, AssetRecord, ContentId, ContentMeta, ContentRecord, ContentStats, ContentStatus,
    NewAsset, NewContent, StoreError, UpsertOutcome,
};
use tokio::sync::RwLock;

use crate::records::{AssetIndex, ContentStore};

#[derive(Debug, Default)]
struct MemoryState {
    contents: BTreeMap<ContentId, ContentRecord>,
    by_external_id: HashMap<String, ContentId>,
    assets: BTreeMap<AssetId, AssetRecord>,
    by_source_url: HashMap<String, AssetId>,
    next_content_id: i64,
    next_asset_id: i64,
}

/// Process-local backend for both record stores. Uniqueness is enforced under
/// a single write lock, so check-and-insert is atomic here.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all_contents(&self) -> Vec<ContentRecord> {
        self.state.read().await.contents.values().cloned().collect()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<ContentRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .by_external_id
            .get(external_id)
            .and_then(|id| state.contents.get(id))
            .cloned())
    }

    async fn get(&self, id: ContentId) -> Result<Option<ContentRecord>, StoreError> {
        Ok(self.state.read().await.contents.get(&id).cloned())
    }

    async fn upsert(&self, content: NewContent) -> Result<(ContentRecord, UpsertOutcome), StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        if let Some(id) = state.by_external_id.get(&content.meta.external_id).copied() {
            let record = state
                .contents
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(format!("content {id}")))?;
            record.title = content.title;
            record.body = content.body;
            record.updated_at = now;
            return Ok((record.clone(), UpsertOutcome::Updated));
        }

        state.next_content_id += 1;
        let id = ContentId(state.next_content_id);
        let record = ContentRecord {
            id,
            title: content.title,
            body: content.body,
            published_at: content.published_at,
            status: content.status,
            meta: content.meta,
            lead_image: None,
            created_at: now,
            updated_at: now,
        };
        state
            .by_external_id
            .insert(record.meta.external_id.clone(), id);
        state.contents.insert(id, record.clone());
        Ok((record, UpsertOutcome::Inserted))
    }

    async fn set_meta(&self, id: ContentId, meta: &ContentMeta) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let record = state
            .contents
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("content {id}")))?;
        if record.meta.external_id != meta.external_id {
            return Err(StoreError::Conflict(format!(
                "content {id} belongs to external id {}",
                record.meta.external_id
            )));
        }
        record.meta = meta.clone();
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn set_lead_image(&self, id: ContentId, asset: AssetId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.assets.contains_key(&asset) {
            return Err(StoreError::NotFound(format!("asset {asset}")));
        }
        let record = state
            .contents
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("content {id}")))?;
        record.lead_image = Some(asset);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn find_by_lead_image(&self, asset: AssetId) -> Result<Vec<ContentId>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .contents
            .values()
            .filter(|c| c.lead_image == Some(asset))
            .map(|c| c.id)
            .collect())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.state.read().await.contents.len() as u64)
    }

    async fn stats(&self) -> Result<ContentStats, StoreError> {
        let state = self.state.read().await;
        let published = state
            .contents
            .values()
            .filter(|c| c.status == ContentStatus::Publish);
        let mut stats = ContentStats::default();
        for record in published {
            stats.total_published += 1;
            stats.latest_published_at = stats.latest_published_at.max(Some(record.published_at));
        }
        Ok(stats)
    }
}

#[async_trait]
impl AssetIndex for MemoryStore {
    async fn find_by_source_url(&self, url: &str) -> Result<Option<AssetRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .by_source_url
            .get(url)
            .and_then(|id| state.assets.get(id))
            .cloned())
    }

    async fn get_asset(&self, id: AssetId) -> Result<Option<AssetRecord>, StoreError> {
        Ok(self.state.read().await.assets.get(&id).cloned())
    }

    async fn insert_or_get(&self, asset: NewAsset) -> Result<(AssetRecord, bool), StoreError> {
        let mut state = self.state.write().await;

        if let Some(url) = &asset.source_image_url {
            if let Some(existing) = state.by_source_url.get(url).and_then(|id| state.assets.get(id)) {
                return Ok((existing.clone(), false));
            }
        }

        state.next_asset_id += 1;
        let record = AssetRecord {
            id: AssetId(state.next_asset_id),
            source_image_url: asset.source_image_url,
            file_name: asset.file_name,
            content_type: asset.content_type,
            content_hash: asset.content_hash,
            relative_path: asset.relative_path,
            byte_size: asset.byte_size,
            created_at: Utc::now(),
        };
        if let Some(url) = &record.source_image_url {
            state.by_source_url.insert(url.clone(), record.id);
        }
        state.assets.insert(record.id, record.clone());
        Ok((record, true))
    }

    async fn count_assets(&self) -> Result<u64, StoreError> {
        Ok(self.state.read().await.assets.len() as u64)
    }
}
