//! Storage and transport plumbing for the Spaceflight News ingest:
//! HTTP fetching, content-addressed asset blobs, the article-list cache and
//! the content/asset record stores.

mod artifacts;
mod cache;
mod http;
mod memory;
mod postgres;
mod records;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use artifacts::{ArtifactStore, StagedFile, StoredArtifact};
pub use cache::{ArticleCache, MemoryArticleCache};
pub use http::{FetchedResponse, HttpClientConfig, HttpFetcher, HttpTransport, TransportError};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use records::{AssetIndex, ContentStore};
pub use reqwest::StatusCode;

pub const CRATE_NAME: &str = "sfn-storage";
