//! Client for the Spaceflight News API `articles` endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sfn_core::{ArticleRecord, FetchError, Settings};
use sfn_storage::{ArticleCache, HttpTransport};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

pub const CRATE_NAME: &str = "sfn-api";

pub const DEFAULT_API_BASE: &str = "https://api.spaceflightnewsapi.net/v4";
pub const PAGE_SIZE: u32 = 20;
pub const CACHE_TTL: Duration = Duration::from_secs(60 * 60);
pub const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Fully resolved request parameters. Stored sorted, so two queries built from
/// the same filters always render the same URL and cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleQuery {
    params: BTreeMap<String, String>,
}

impl ArticleQuery {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut params = BTreeMap::new();
        params.insert("limit".to_string(), PAGE_SIZE.to_string());
        params.insert("ordering".to_string(), "-published_at".to_string());

        let phrase = settings.search_phrase.trim();
        if !phrase.is_empty() {
            params.insert("search".to_string(), phrase.to_string());
        }
        if let Some(cutoff) = settings.date_cutoff {
            params.insert(
                "published_at_gte".to_string(),
                format!("{}T00:00:00Z", cutoff.format("%Y-%m-%d")),
            );
        }
        Self { params }
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn url(&self, base: &str) -> Result<Url, FetchError> {
        let endpoint = format!("{}/articles/", base.trim_end_matches('/'));
        let mut url = Url::parse(&endpoint)
            .map_err(|e| FetchError::Transport(format!("invalid API base `{base}`: {e}")))?;
        url.query_pairs_mut().extend_pairs(self.params.iter());
        Ok(url)
    }

    pub fn cache_key(&self, base: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(base.trim_end_matches('/').as_bytes());
        for (k, v) in &self.params {
            hasher.update(b"\0");
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        format!("sfn_api_{}", hex::encode(hasher.finalize()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArticles {
    pub articles: Vec<ArticleRecord>,
    pub from_cache: bool,
}

/// Decode an `articles` response body. Invalid JSON is an error; a missing or
/// non-array `results` field is an empty list. Entries that do not decode as
/// articles are skipped.
pub fn decode_articles(body: &[u8]) -> Result<Vec<ArticleRecord>, FetchError> {
    let value: JsonValue =
        serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    let Some(results) = value.get("results").and_then(JsonValue::as_array) else {
        return Ok(Vec::new());
    };

    let mut articles = Vec::with_capacity(results.len());
    for (idx, raw) in results.iter().enumerate() {
        match serde_json::from_value::<ArticleRecord>(raw.clone()) {
            Ok(article) => articles.push(article),
            Err(err) => warn!(index = idx, error = %err, "skipping malformed article entry"),
        }
    }
    Ok(articles)
}

pub struct SpaceflightClient {
    base_url: String,
    http: Arc<dyn HttpTransport>,
    cache: Arc<dyn ArticleCache>,
    timeout: Duration,
    cache_ttl: Duration,
}

impl SpaceflightClient {
    pub fn new(
        base_url: impl Into<String>,
        http: Arc<dyn HttpTransport>,
        cache: Arc<dyn ArticleCache>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            http,
            cache,
            timeout: API_TIMEOUT,
            cache_ttl: CACHE_TTL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Return the article list for `settings`, from cache when a fresh entry exists.
    pub async fn fetch(&self, settings: &Settings) -> Result<FetchedArticles, FetchError> {
        let query = ArticleQuery::from_settings(settings);
        let key = query.cache_key(&self.base_url);

        match self.cache.get(&key).await {
            Ok(Some(articles)) => {
                info!(cache_key = %key, count = articles.len(), "using cached article list");
                return Ok(FetchedArticles {
                    articles,
                    from_cache: true,
                });
            }
            Ok(None) => debug!(cache_key = %key, "article cache miss"),
            Err(err) => warn!(cache_key = %key, error = %err, "article cache read failed; fetching"),
        }

        let url = query.url(&self.base_url)?;
        let resp = self
            .http
            .get(url.as_str(), self.timeout)
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        if resp.status.as_u16() != 200 {
            return Err(FetchError::UpstreamStatus(resp.status.as_u16()));
        }

        let articles = decode_articles(&resp.body)?;
        if let Err(err) = self.cache.put(&key, &articles, self.cache_ttl).await {
            warn!(cache_key = %key, error = %err, "article cache write failed");
        }
        info!(url = %url, count = articles.len(), "fetched article list");
        Ok(FetchedArticles {
            articles,
            from_cache: false,
        })
    }
}
