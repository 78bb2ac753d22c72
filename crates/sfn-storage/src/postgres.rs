use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sfn_core::{
    ArticleRecord, AssetId, AssetRecord, ContentId, ContentMeta, ContentRecord, ContentStats,
    ContentStatus, NewAsset, NewContent, StoreError, UpsertOutcome,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;

use crate::cache::ArticleCache;
use crate::records::{AssetIndex, ContentStore};

const CONTENT_COLUMNS: &str = "id, external_id, title, body, published_at, status, news_site, \
                               source_url, image_url, lead_image_id, created_at, updated_at";
const ASSET_COLUMNS: &str = "id, source_image_url, file_name, content_type, content_hash, \
                             relative_path, byte_size, created_at";

/// Postgres backend for content, assets and the API response cache.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("running database migrations")
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Backend(err.to_string())
}

fn content_from_row(row: &PgRow) -> Result<ContentRecord, StoreError> {
    let status: String = row.try_get("status").map_err(backend)?;
    let status = ContentStatus::parse(&status)
        .ok_or_else(|| StoreError::Backend(format!("unknown content status `{status}`")))?;
    Ok(ContentRecord {
        id: ContentId(row.try_get("id").map_err(backend)?),
        title: row.try_get("title").map_err(backend)?,
        body: row.try_get("body").map_err(backend)?,
        published_at: row.try_get("published_at").map_err(backend)?,
        status,
        meta: ContentMeta {
            external_id: row.try_get("external_id").map_err(backend)?,
            news_site: row.try_get("news_site").map_err(backend)?,
            source_url: row.try_get("source_url").map_err(backend)?,
            image_url: row.try_get("image_url").map_err(backend)?,
        },
        lead_image: row
            .try_get::<Option<i64>, _>("lead_image_id")
            .map_err(backend)?
            .map(AssetId),
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

fn asset_from_row(row: &PgRow) -> Result<AssetRecord, StoreError> {
    let byte_size: i64 = row.try_get("byte_size").map_err(backend)?;
    Ok(AssetRecord {
        id: AssetId(row.try_get("id").map_err(backend)?),
        source_image_url: row.try_get("source_image_url").map_err(backend)?,
        file_name: row.try_get("file_name").map_err(backend)?,
        content_type: row.try_get("content_type").map_err(backend)?,
        content_hash: row.try_get("content_hash").map_err(backend)?,
        relative_path: row.try_get("relative_path").map_err(backend)?,
        byte_size: u64::try_from(byte_size).unwrap_or_default(),
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

#[async_trait]
impl ContentStore for PgStore {
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<ContentRecord>, StoreError> {
        let sql = format!("SELECT {CONTENT_COLUMNS} FROM content_records WHERE external_id = $1");
        sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(content_from_row)
            .transpose()
    }

    async fn get(&self, id: ContentId) -> Result<Option<ContentRecord>, StoreError> {
        let sql = format!("SELECT {CONTENT_COLUMNS} FROM content_records WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(content_from_row)
            .transpose()
    }

    async fn upsert(&self, content: NewContent) -> Result<(ContentRecord, UpsertOutcome), StoreError> {
        // xmax is zero only for a row created by this statement.
        let sql = format!(
            r#"
            INSERT INTO content_records
                (external_id, title, body, published_at, status, news_site, source_url, image_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (external_id) DO UPDATE
               SET title = EXCLUDED.title,
                   body = EXCLUDED.body,
                   updated_at = NOW()
            RETURNING {CONTENT_COLUMNS}, (xmax = 0) AS inserted
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&content.meta.external_id)
            .bind(&content.title)
            .bind(&content.body)
            .bind(content.published_at)
            .bind(content.status.as_str())
            .bind(&content.meta.news_site)
            .bind(&content.meta.source_url)
            .bind(content.meta.image_url.as_deref())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let inserted: bool = row.try_get("inserted").map_err(backend)?;
        let outcome = if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        };
        Ok((content_from_row(&row)?, outcome))
    }

    async fn set_meta(&self, id: ContentId, meta: &ContentMeta) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE content_records
               SET news_site = $3,
                   source_url = $4,
                   image_url = $5,
                   updated_at = NOW()
             WHERE id = $1
               AND external_id = $2
            "#,
        )
        .bind(id.0)
        .bind(&meta.external_id)
        .bind(&meta.news_site)
        .bind(&meta.source_url)
        .bind(meta.image_url.as_deref())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "content {id} with external id {}",
                meta.external_id
            )));
        }
        Ok(())
    }

    async fn set_lead_image(&self, id: ContentId, asset: AssetId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE content_records SET lead_image_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.0)
        .bind(asset.0)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("content {id}")));
        }
        Ok(())
    }

    async fn find_by_lead_image(&self, asset: AssetId) -> Result<Vec<ContentId>, StoreError> {
        let rows = sqlx::query("SELECT id FROM content_records WHERE lead_image_id = $1 ORDER BY id")
            .bind(asset.0)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter()
            .map(|row| row.try_get("id").map(ContentId).map_err(backend))
            .collect()
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_records")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(total.max(0) as u64)
    }

    async fn stats(&self) -> Result<ContentStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total, MAX(published_at) AS latest
              FROM content_records
             WHERE status = 'publish'
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        let total: i64 = row.try_get("total").map_err(backend)?;
        Ok(ContentStats {
            total_published: total.max(0) as u64,
            latest_published_at: row.try_get("latest").map_err(backend)?,
        })
    }
}

#[async_trait]
impl AssetIndex for PgStore {
    async fn find_by_source_url(&self, url: &str) -> Result<Option<AssetRecord>, StoreError> {
        let sql = format!("SELECT {ASSET_COLUMNS} FROM asset_records WHERE source_image_url = $1");
        sqlx::query(&sql)
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(asset_from_row)
            .transpose()
    }

    async fn get_asset(&self, id: AssetId) -> Result<Option<AssetRecord>, StoreError> {
        let sql = format!("SELECT {ASSET_COLUMNS} FROM asset_records WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(asset_from_row)
            .transpose()
    }

    async fn insert_or_get(&self, asset: NewAsset) -> Result<(AssetRecord, bool), StoreError> {
        let sql = format!(
            r#"
            INSERT INTO asset_records
                (source_image_url, file_name, content_type, content_hash, relative_path, byte_size)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_image_url) DO NOTHING
            RETURNING {ASSET_COLUMNS}
            "#
        );
        let inserted = sqlx::query(&sql)
            .bind(asset.source_image_url.as_deref())
            .bind(&asset.file_name)
            .bind(asset.content_type.as_deref())
            .bind(&asset.content_hash)
            .bind(&asset.relative_path)
            .bind(i64::try_from(asset.byte_size).unwrap_or(i64::MAX))
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        if let Some(row) = inserted {
            return Ok((asset_from_row(&row)?, true));
        }

        let url = asset.source_image_url.as_deref().unwrap_or_default();
        let existing = self
            .find_by_source_url(url)
            .await?
            .ok_or_else(|| StoreError::Conflict(format!("asset for {url} vanished after conflict")))?;
        Ok((existing, false))
    }

    async fn count_assets(&self) -> Result<u64, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM asset_records")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(total.max(0) as u64)
    }
}

#[async_trait]
impl ArticleCache for PgStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<ArticleRecord>>, StoreError> {
        let row = sqlx::query("SELECT payload FROM api_cache WHERE cache_key = $1 AND expires_at > NOW()")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|row| {
            row.try_get::<Json<Vec<ArticleRecord>>, _>("payload")
                .map(|json| json.0)
                .map_err(backend)
        })
        .transpose()
    }

    async fn put(&self, key: &str, articles: &[ArticleRecord], ttl: Duration) -> Result<(), StoreError> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| StoreError::Backend(e.to_string()))?;
        let expires_at: DateTime<Utc> = Utc::now() + ttl;
        sqlx::query("DELETE FROM api_cache WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        sqlx::query(
            r#"
            INSERT INTO api_cache (cache_key, payload, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (cache_key) DO UPDATE
               SET payload = EXCLUDED.payload,
                   expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(Json(articles.to_vec()))
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}
