use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sfn_core::{ArticleRecord, StoreError};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Short-lived store of fetched article lists keyed by query signature.
/// Entries past their TTL are treated as absent.
#[async_trait]
pub trait ArticleCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<ArticleRecord>>, StoreError>;
    async fn put(&self, key: &str, articles: &[ArticleRecord], ttl: Duration) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    articles: Vec<ArticleRecord>,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct MemoryArticleCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryArticleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl ArticleCache for MemoryArticleCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<ArticleRecord>>, StoreError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.articles.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, articles: &[ArticleRecord], ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let entry = CacheEntry {
            articles: articles.to_vec(),
            expires_at: now + ttl,
        };
        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(key.to_string(), entry);
        Ok(())
    }
}
