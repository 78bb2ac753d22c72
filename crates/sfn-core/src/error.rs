use thiserror::Error;

/// Failure to obtain the article list. Aborts the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("API request failed: {0}")]
    Transport(String),
    #[error("API returned error code: {0}")]
    UpstreamStatus(u16),
    #[error("Failed to parse API response: {0}")]
    Decode(String),
}

/// Persistence failure on a single record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("conflicting record: {0}")]
    Conflict(String),
}

/// Lead-image attachment failure. Logged and swallowed by the pipeline.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("image download failed: {0}")]
    Download(String),
    #[error("image host returned status {0}")]
    UpstreamStatus(u16),
    #[error("downloaded resource is not an image: {0}")]
    NotAnImage(String),
    #[error("storing image failed: {0}")]
    Storage(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
