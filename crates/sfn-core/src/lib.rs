//! Core domain model for the Spaceflight News ingest pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

mod error;
mod settings;

pub use error::{AttachmentError, FetchError, StoreError};
pub use settings::{Settings, SettingsInput, UpdateFrequency, DEFAULT_CUTOFF_DAYS};

pub const CRATE_NAME: &str = "sfn-core";

/// Article as published by the upstream news API.
///
/// Serde names follow the upstream wire format so a cached list round-trips
/// through the same decoder as a fresh response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    #[serde(rename = "id", deserialize_with = "de_external_id")]
    pub external_id: String,
    #[serde(default, deserialize_with = "de_nullable_string")]
    pub title: String,
    #[serde(default, deserialize_with = "de_nullable_string")]
    pub summary: String,
    pub published_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "de_nullable_string")]
    pub news_site: String,
    #[serde(rename = "url", default, deserialize_with = "de_nullable_string")]
    pub source_url: String,
    #[serde(default, deserialize_with = "de_optional_url")]
    pub image_url: Option<String>,
}

fn de_external_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        other => Err(serde::de::Error::custom(format!(
            "article id must be a number or non-empty string, got {other}"
        ))),
    }
}

/// Upstream sends `null` for text fields it has no value for.
fn de_nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn de_optional_url<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub i64);

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub i64);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    #[default]
    Publish,
    Draft,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Draft => "draft",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "publish" => Some(Self::Publish),
            "draft" => Some(Self::Draft),
            _ => None,
        }
    }
}

/// Upstream provenance stored alongside a content record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentMeta {
    pub external_id: String,
    pub news_site: String,
    pub source_url: String,
    pub image_url: Option<String>,
}

/// Locally persisted article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: ContentId,
    pub title: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
    pub status: ContentStatus,
    pub meta: ContentMeta,
    pub lead_image: Option<AssetId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert/update payload for the content store. Text is expected to be sanitized already.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContent {
    pub title: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
    pub status: ContentStatus,
    pub meta: ContentMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Downloaded media persisted in the asset store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: AssetId,
    /// Dedup key. Assets that did not come from an article image URL carry `None`.
    pub source_image_url: Option<String>,
    pub file_name: String,
    pub content_type: Option<String>,
    pub content_hash: String,
    pub relative_path: String,
    pub byte_size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAsset {
    pub source_image_url: Option<String>,
    pub file_name: String,
    pub content_type: Option<String>,
    pub content_hash: String,
    pub relative_path: String,
    pub byte_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentStats {
    pub total_published: u64,
    pub latest_published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Manual,
    Scheduled,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        }
    }
}

/// Outcome of one pipeline invocation, shaped for both the manual trigger and job logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    pub count: usize,
    pub message: String,
    #[serde(default)]
    pub from_cache: bool,
}

impl PipelineResult {
    pub fn failed(err: &FetchError) -> Self {
        Self {
            success: false,
            count: 0,
            message: err.to_string(),
            from_cache: false,
        }
    }

    pub fn empty(from_cache: bool) -> Self {
        Self {
            success: true,
            count: 0,
            message: "No articles found".to_string(),
            from_cache,
        }
    }

    pub fn completed(count: usize, from_cache: bool) -> Self {
        Self {
            success: true,
            count,
            message: format!("Successfully fetched {count} articles"),
            from_cache,
        }
    }
}
