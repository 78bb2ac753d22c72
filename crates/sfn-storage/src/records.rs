use async_trait::async_trait;
use sfn_core::{
    AssetId, AssetRecord, ContentId, ContentMeta, ContentRecord, ContentStats, NewAsset, NewContent,
    StoreError, UpsertOutcome,
};

/// Persistence for content records. `external_id` is unique across the store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<ContentRecord>, StoreError>;

    async fn get(&self, id: ContentId) -> Result<Option<ContentRecord>, StoreError>;

    /// Insert keyed on `content.meta.external_id`. When a record already
    /// exists only its title and body are refreshed; publish time, status and
    /// metadata keep their original values.
    async fn upsert(&self, content: NewContent) -> Result<(ContentRecord, UpsertOutcome), StoreError>;

    /// Overwrite the metadata of an existing record. The external id itself never changes.
    async fn set_meta(&self, id: ContentId, meta: &ContentMeta) -> Result<(), StoreError>;

    async fn set_lead_image(&self, id: ContentId, asset: AssetId) -> Result<(), StoreError>;

    /// Reverse lookup: every record using `asset` as its lead image.
    async fn find_by_lead_image(&self, asset: AssetId) -> Result<Vec<ContentId>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    async fn stats(&self) -> Result<ContentStats, StoreError>;
}

/// Index of downloaded assets. At most one asset exists per `source_image_url`.
#[async_trait]
pub trait AssetIndex: Send + Sync {
    async fn find_by_source_url(&self, url: &str) -> Result<Option<AssetRecord>, StoreError>;

    async fn get_asset(&self, id: AssetId) -> Result<Option<AssetRecord>, StoreError>;

    /// Insert a new asset, or return the existing one when another writer
    /// already registered the same source URL. The flag is `true` when this
    /// call created the row.
    async fn insert_or_get(&self, asset: NewAsset) -> Result<(AssetRecord, bool), StoreError>;

    async fn count_assets(&self) -> Result<u64, StoreError>;
}
