use std::sync::Arc;
use std::time::Duration;

use sfn_core::{AssetId, AttachmentError, ContentId, NewAsset, StoreError};
use sfn_storage::{ArtifactStore, AssetIndex, ContentStore, FetchedResponse, HttpTransport};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug)]
pub enum AttachOutcome {
    /// The record already points at the asset for this URL.
    AlreadyAttached(AssetId),
    /// An existing asset was linked without downloading.
    Reused(AssetId),
    Downloaded(AssetId),
    /// Logged and swallowed; the article still counts as processed.
    Failed(AttachmentError),
}

/// Attaches lead images, downloading each distinct image URL at most once.
pub struct ImageAttacher {
    contents: Arc<dyn ContentStore>,
    assets: Arc<dyn AssetIndex>,
    artifacts: ArtifactStore,
    http: Arc<dyn HttpTransport>,
    timeout: Duration,
}

impl ImageAttacher {
    pub fn new(
        contents: Arc<dyn ContentStore>,
        assets: Arc<dyn AssetIndex>,
        artifacts: ArtifactStore,
        http: Arc<dyn HttpTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            contents,
            assets,
            artifacts,
            http,
            timeout,
        }
    }

    pub async fn attach(&self, content_id: ContentId, image_url: &str) -> AttachOutcome {
        match self.try_attach(content_id, image_url).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%content_id, image_url, error = %err, "lead image not attached");
                AttachOutcome::Failed(err)
            }
        }
    }

    async fn try_attach(&self, content_id: ContentId, image_url: &str) -> Result<AttachOutcome, AttachmentError> {
        let record = self
            .contents
            .get(content_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("content {content_id}")))?;

        if let Some(existing) = self.assets.find_by_source_url(image_url).await? {
            if record.lead_image == Some(existing.id) {
                return Ok(AttachOutcome::AlreadyAttached(existing.id));
            }
            self.contents.set_lead_image(content_id, existing.id).await?;
            debug!(%content_id, asset_id = %existing.id, "reused existing image asset");
            return Ok(AttachOutcome::Reused(existing.id));
        }

        if let Some(lead) = record.lead_image {
            if let Some(current) = self.assets.get_asset(lead).await? {
                if current.source_image_url.as_deref() == Some(image_url) {
                    return Ok(AttachOutcome::AlreadyAttached(lead));
                }
            }
        }

        let resp = self.download(image_url).await?;
        let file_name = file_name_for(image_url);
        let extension = extension_for(&file_name, resp.content_type.as_deref());

        // Dropping `staged` removes the temp file on every path out of here.
        let staged = self
            .artifacts
            .stage(&resp.body)
            .await
            .map_err(|e| AttachmentError::Storage(format!("{e:#}")))?;
        let stored = self
            .artifacts
            .persist(&staged, &extension)
            .await
            .map_err(|e| AttachmentError::Storage(format!("{e:#}")))?;

        let (asset, created) = self
            .assets
            .insert_or_get(NewAsset {
                source_image_url: Some(image_url.to_string()),
                file_name,
                content_type: resp.content_type.clone(),
                content_hash: stored.content_hash.clone(),
                relative_path: stored.relative_path.to_string_lossy().replace('\\', "/"),
                byte_size: stored.byte_size as u64,
            })
            .await?;
        if !created {
            debug!(image_url, asset_id = %asset.id, "image registered concurrently; using existing asset");
            if !stored.deduplicated && stored.content_hash != asset.content_hash {
                if let Err(err) = tokio::fs::remove_file(&stored.absolute_path).await {
                    warn!(path = %stored.absolute_path.display(), error = %err, "orphaned image blob not removed");
                }
            }
            self.contents.set_lead_image(content_id, asset.id).await?;
            return Ok(AttachOutcome::Reused(asset.id));
        }
        self.contents.set_lead_image(content_id, asset.id).await?;
        info!(%content_id, asset_id = %asset.id, bytes = stored.byte_size, "downloaded lead image");
        Ok(AttachOutcome::Downloaded(asset.id))
    }

    async fn download(&self, image_url: &str) -> Result<FetchedResponse, AttachmentError> {
        let resp = self
            .http
            .get(image_url, self.timeout)
            .await
            .map_err(|e| AttachmentError::Download(e.to_string()))?;
        if !resp.status.is_success() {
            return Err(AttachmentError::UpstreamStatus(resp.status.as_u16()));
        }
        if resp.body.is_empty() {
            return Err(AttachmentError::Download("empty response body".to_string()));
        }
        if let Some(content_type) = resp.content_type.as_deref() {
            let mime = content_type.split(';').next().unwrap_or_default().trim();
            if !mime.starts_with("image/") && mime != "application/octet-stream" {
                return Err(AttachmentError::NotAnImage(mime.to_string()));
            }
        }
        Ok(resp)
    }
}

fn file_name_for(image_url: &str) -> String {
    Url::parse(image_url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(ToString::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "image".to_string())
}

fn extension_for(file_name: &str, content_type: Option<&str>) -> String {
    let from_name = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    if let Some(ext) = from_name {
        return ext;
    }
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .unwrap_or_default();
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/avif" => "avif",
        "image/svg+xml" => "svg",
        _ => "bin",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sfn_core::{AssetRecord, ContentMeta, ContentStatus, NewContent};
    use sfn_storage::testing::RouteTransport;
    use sfn_storage::{MemoryStore, TransportError};
    use tempfile::{tempdir, TempDir};

    struct Harness {
        store: Arc<MemoryStore>,
        transport: Arc<RouteTransport>,
        attacher: ImageAttacher,
        dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(RouteTransport::new());
        let attacher = ImageAttacher::new(
            store.clone(),
            store.clone(),
            ArtifactStore::new(dir.path()),
            transport.clone(),
            Duration::from_secs(5),
        );
        Harness {
            store,
            transport,
            attacher,
            dir,
        }
    }

    async fn content(store: &MemoryStore, external_id: &str) -> ContentId {
        let (record, _) = store
            .upsert(NewContent {
                title: external_id.to_string(),
                body: String::new(),
                published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                status: ContentStatus::Publish,
                meta: ContentMeta {
                    external_id: external_id.to_string(),
                    ..ContentMeta::default()
                },
            })
            .await
            .unwrap();
        record.id
    }

    fn staging_is_empty(dir: &TempDir) -> bool {
        match std::fs::read_dir(dir.path().join(".staging")) {
            Ok(entries) => entries.count() == 0,
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn same_url_is_downloaded_once_and_shared() {
        let h = harness();
        let url = "https://img.test/shared.jpg";
        h.transport.respond_image(url, b"jpeg-bytes");
        let a = content(&h.store, "a").await;
        let b = content(&h.store, "b").await;

        let first = h.attacher.attach(a, url).await;
        let second = h.attacher.attach(b, url).await;
        let third = h.attacher.attach(b, url).await;

        let AttachOutcome::Downloaded(asset) = first else {
            panic!("expected download, got {first:?}");
        };
        assert!(matches!(second, AttachOutcome::Reused(id) if id == asset));
        assert!(matches!(third, AttachOutcome::AlreadyAttached(id) if id == asset));
        assert_eq!(h.transport.calls_to(url), 1);
        assert_eq!(h.store.count_assets().await.unwrap(), 1);
        assert_eq!(h.store.find_by_lead_image(asset).await.unwrap(), vec![a, b]);

        let record = h.store.get_asset(asset).await.unwrap().unwrap();
        assert_eq!(record.file_name, "shared.jpg");
        assert!(h.dir.path().join(&record.relative_path).exists());
        assert!(staging_is_empty(&h.dir));
    }

    #[tokio::test]
    async fn lead_image_is_repointed_when_url_changes() {
        let h = harness();
        h.transport.respond_image("https://img.test/one.png", b"one");
        h.transport.respond_image("https://img.test/two.png", b"two");
        let a = content(&h.store, "a").await;

        let AttachOutcome::Downloaded(one) = h.attacher.attach(a, "https://img.test/one.png").await else {
            panic!("first download");
        };
        let AttachOutcome::Downloaded(two) = h.attacher.attach(a, "https://img.test/two.png").await else {
            panic!("second download");
        };
        assert_ne!(one, two);
        assert!(matches!(
            h.attacher.attach(a, "https://img.test/one.png").await,
            AttachOutcome::Reused(id) if id == one
        ));
        assert_eq!(h.transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn download_failures_are_swallowed() {
        let h = harness();
        let a = content(&h.store, "a").await;
        h.transport.respond("https://img.test/404.jpg", 404, None, Vec::new());
        h.transport.fail(
            "https://img.test/timeout.jpg",
            TransportError::Timeout(Duration::from_secs(5)),
        );
        h.transport.respond("https://img.test/page.jpg", 200, Some("text/html"), "<html/>");

        assert!(matches!(
            h.attacher.attach(a, "https://img.test/404.jpg").await,
            AttachOutcome::Failed(AttachmentError::UpstreamStatus(404))
        ));
        assert!(matches!(
            h.attacher.attach(a, "https://img.test/timeout.jpg").await,
            AttachOutcome::Failed(AttachmentError::Download(_))
        ));
        assert!(matches!(
            h.attacher.attach(a, "https://img.test/page.jpg").await,
            AttachOutcome::Failed(AttachmentError::NotAnImage(_))
        ));
        assert_eq!(h.store.count_assets().await.unwrap(), 0);
        assert_eq!(h.store.get(a).await.unwrap().unwrap().lead_image, None);
        assert!(staging_is_empty(&h.dir));
    }

    #[tokio::test]
    async fn unknown_content_record_fails_without_download() {
        let h = harness();
        h.transport.respond_image("https://img.test/x.jpg", b"x");
        let outcome = h.attacher.attach(ContentId(42), "https://img.test/x.jpg").await;
        assert!(matches!(
            outcome,
            AttachOutcome::Failed(AttachmentError::Store(StoreError::NotFound(_)))
        ));
        assert!(h.transport.calls().is_empty());
    }

    /// Never sees an existing asset on lookup, so the insert is what detects the duplicate.
    struct LateIndex {
        inner: Arc<MemoryStore>,
    }

    #[async_trait::async_trait]
    impl AssetIndex for LateIndex {
        async fn find_by_source_url(&self, _url: &str) -> Result<Option<AssetRecord>, StoreError> {
            Ok(None)
        }

        async fn get_asset(&self, id: AssetId) -> Result<Option<AssetRecord>, StoreError> {
            self.inner.get_asset(id).await
        }

        async fn insert_or_get(&self, asset: NewAsset) -> Result<(AssetRecord, bool), StoreError> {
            self.inner.insert_or_get(asset).await
        }

        async fn count_assets(&self) -> Result<u64, StoreError> {
            self.inner.count_assets().await
        }
    }

    #[tokio::test]
    async fn losing_the_insert_race_reuses_the_winner_and_removes_its_blob() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(RouteTransport::new());
        let artifacts = ArtifactStore::new(dir.path());
        let attacher = ImageAttacher::new(
            store.clone(),
            Arc::new(LateIndex { inner: store.clone() }),
            artifacts.clone(),
            transport.clone(),
            Duration::from_secs(5),
        );
        let url = "https://img.test/raced.jpg";
        let (winner, _) = store
            .insert_or_get(NewAsset {
                source_image_url: Some(url.to_string()),
                file_name: "raced.jpg".into(),
                content_type: Some("image/jpeg".into()),
                content_hash: ArtifactStore::sha256_hex(b"winner-bytes"),
                relative_path: "wi/winner.jpg".into(),
                byte_size: 12,
            })
            .await
            .unwrap();
        transport.respond_image(url, b"loser-bytes");
        let a = content(&store, "a").await;

        let outcome = attacher.attach(a, url).await;

        assert!(matches!(outcome, AttachOutcome::Reused(id) if id == winner.id));
        assert_eq!(store.get(a).await.unwrap().unwrap().lead_image, Some(winner.id));
        assert_eq!(store.count_assets().await.unwrap(), 1);
        let loser_path = artifacts.absolute_path(
            artifacts.artifact_relative_path(&ArtifactStore::sha256_hex(b"loser-bytes"), "jpg"),
        );
        assert!(!loser_path.exists());
        assert!(staging_is_empty(&dir));
    }

    #[test]
    fn extensions_come_from_name_then_content_type() {
        assert_eq!(extension_for("photo.JPG", None), "jpg");
        assert_eq!(extension_for("photo", Some("image/webp; q=1")), "webp");
        assert_eq!(extension_for("photo.php?x", Some("image/png")), "png");
        assert_eq!(extension_for("photo", None), "bin");
        assert_eq!(file_name_for("https://img.test/a/b/c.jpeg?w=200"), "c.jpeg");
        assert_eq!(file_name_for("https://img.test/"), "image");
    }
}
