use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use sfn_core::{
    ArticleRecord, AssetId, ContentId, ContentMeta, ContentRecord, ContentStats, NewContent,
    RunTrigger, Settings, StoreError, UpdateFrequency, UpsertOutcome,
};
use sfn_storage::testing::RouteTransport;
use sfn_storage::{ArticleCache, AssetIndex, ContentStore, MemoryArticleCache, MemoryStore, TransportError};
use sfn_sync::{SyncConfig, SyncRuntime};
use tempfile::{tempdir, TempDir};

const BASE: &str = "https://api.test/v4";
const ENDPOINT: &str = "https://api.test/v4/articles/";

/// Always misses, so every run goes to the network.
struct NoCache;

#[async_trait]
impl ArticleCache for NoCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<ArticleRecord>>, StoreError> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _articles: &[ArticleRecord], _ttl: Duration) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Rejects upserts for one external id and delegates everything else.
struct RejectingStore {
    inner: Arc<MemoryStore>,
    reject: String,
}

#[async_trait]
impl ContentStore for RejectingStore {
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<ContentRecord>, StoreError> {
        self.inner.find_by_external_id(external_id).await
    }

    async fn get(&self, id: ContentId) -> Result<Option<ContentRecord>, StoreError> {
        ContentStore::get(self.inner.as_ref(), id).await
    }

    async fn upsert(&self, content: NewContent) -> Result<(ContentRecord, UpsertOutcome), StoreError> {
        if content.meta.external_id == self.reject {
            return Err(StoreError::Backend("disk full".into()));
        }
        self.inner.upsert(content).await
    }

    async fn set_meta(&self, id: ContentId, meta: &ContentMeta) -> Result<(), StoreError> {
        self.inner.set_meta(id, meta).await
    }

    async fn set_lead_image(&self, id: ContentId, asset: AssetId) -> Result<(), StoreError> {
        self.inner.set_lead_image(id, asset).await
    }

    async fn find_by_lead_image(&self, asset: AssetId) -> Result<Vec<ContentId>, StoreError> {
        self.inner.find_by_lead_image(asset).await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.inner.count().await
    }

    async fn stats(&self) -> Result<ContentStats, StoreError> {
        self.inner.stats().await
    }
}

struct Env {
    store: Arc<MemoryStore>,
    transport: Arc<RouteTransport>,
    runtime: SyncRuntime,
    dir: TempDir,
}

fn config(dir: &TempDir) -> SyncConfig {
    SyncConfig {
        api_base: BASE.to_string(),
        assets_dir: dir.path().join("assets"),
        settings_path: dir.path().join("settings.yaml"),
        ..SyncConfig::default()
    }
}

fn env_with(cache: Arc<dyn ArticleCache>) -> Env {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(RouteTransport::new());
    let runtime = SyncRuntime::assemble(config(&dir), store.clone(), store.clone(), cache, transport.clone());
    Env {
        store,
        transport,
        runtime,
        dir,
    }
}

fn settings() -> Settings {
    Settings {
        search_phrase: String::new(),
        date_cutoff: NaiveDate::from_ymd_opt(2024, 1, 1),
        update_frequency: UpdateFrequency::Hourly,
    }
}

fn article(id: u64, title: &str, image: Option<&str>) -> Value {
    json!({
        "id": id,
        "title": title,
        "summary": format!("<p>{title} summary</p>"),
        "published_at": "2024-01-02T10:00:00Z",
        "news_site": "SpaceNews",
        "url": format!("https://news.test/{id}"),
        "image_url": image,
    })
}

fn results(articles: Vec<Value>) -> Value {
    json!({ "count": articles.len(), "results": articles })
}

fn staging_is_empty(dir: &TempDir) -> bool {
    match std::fs::read_dir(dir.path().join("assets").join(".staging")) {
        Ok(entries) => entries.count() == 0,
        Err(_) => true,
    }
}

#[tokio::test]
async fn first_run_stores_articles_and_images() {
    let env = env_with(Arc::new(NoCache));
    env.transport.respond_json(
        ENDPOINT,
        &results(vec![
            article(101, "A", Some("https://img.test/a.jpg")),
            article(102, "B", None),
        ]),
    );
    env.transport.respond_image("https://img.test/a.jpg", b"a-bytes");

    let result = env.runtime.pipeline.run(&settings(), RunTrigger::Manual).await;

    assert!(result.success);
    assert_eq!(result.count, 2);
    assert_eq!(result.message, "Successfully fetched 2 articles");
    assert!(!result.from_cache);

    let a = env.store.find_by_external_id("101").await.unwrap().unwrap();
    let b = env.store.find_by_external_id("102").await.unwrap().unwrap();
    assert_eq!(a.title, "A");
    assert_eq!(a.body, "<p>A summary</p>");
    assert!(a.lead_image.is_some());
    assert_eq!(b.lead_image, None);
    assert_eq!(env.store.count_assets().await.unwrap(), 1);
    assert!(staging_is_empty(&env.dir));

    let call = &env.transport.calls()[0];
    assert!(call.starts_with(ENDPOINT));
    assert!(call.contains("published_at_gte=2024-01-01T00%3A00%3A00Z"));
}

#[tokio::test]
async fn rerunning_the_same_batch_is_idempotent() {
    let env = env_with(Arc::new(NoCache));
    env.transport.respond_json(
        ENDPOINT,
        &results(vec![
            article(101, "A", Some("https://img.test/a.jpg")),
            article(102, "B", Some("https://img.test/b.jpg")),
        ]),
    );
    env.transport.respond_image("https://img.test/a.jpg", b"a-bytes");
    env.transport.respond_image("https://img.test/b.jpg", b"b-bytes");

    let first = env.runtime.pipeline.run(&settings(), RunTrigger::Manual).await;
    let second = env.runtime.pipeline.run(&settings(), RunTrigger::Scheduled).await;

    assert_eq!(first.count, 2);
    assert_eq!(second.count, 2);
    assert_eq!(env.store.count().await.unwrap(), 2);
    assert_eq!(env.store.count_assets().await.unwrap(), 2);
    assert_eq!(env.transport.calls_to("https://img.test/a.jpg"), 1);
    assert_eq!(env.transport.calls_to("https://img.test/b.jpg"), 1);
}

#[tokio::test]
async fn cached_list_skips_the_api_call() {
    let env = env_with(Arc::new(MemoryArticleCache::new()));
    env.transport
        .respond_json(ENDPOINT, &results(vec![article(101, "A", None)]));

    let first = env.runtime.pipeline.run(&settings(), RunTrigger::Manual).await;
    let second = env.runtime.pipeline.run(&settings(), RunTrigger::Manual).await;

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(second.count, 1);
    assert_eq!(env.transport.calls_to(ENDPOINT), 1);
    assert_eq!(env.store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn changed_title_updates_the_existing_record() {
    let env = env_with(Arc::new(NoCache));
    env.transport
        .respond_json(ENDPOINT, &results(vec![article(7, "Old", None)]));
    env.runtime.pipeline.run(&settings(), RunTrigger::Manual).await;
    let before = env.store.find_by_external_id("7").await.unwrap().unwrap();

    env.transport
        .respond_json(ENDPOINT, &results(vec![article(7, "New", None)]));
    let result = env.runtime.pipeline.run(&settings(), RunTrigger::Manual).await;

    let after = env.store.find_by_external_id("7").await.unwrap().unwrap();
    assert_eq!(result.count, 1);
    assert_eq!(after.id, before.id);
    assert_eq!(after.title, "New");
    assert_eq!(env.store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn shared_image_url_is_downloaded_once() {
    let env = env_with(Arc::new(NoCache));
    let shared = "https://img.test/shared.png";
    env.transport.respond_json(
        ENDPOINT,
        &results(vec![article(1, "One", Some(shared)), article(2, "Two", Some(shared))]),
    );
    env.transport.respond(shared, 200, Some("image/png"), b"png".to_vec());

    let result = env.runtime.pipeline.run(&settings(), RunTrigger::Manual).await;

    assert_eq!(result.count, 2);
    assert_eq!(env.transport.calls_to(shared), 1);
    assert_eq!(env.store.count_assets().await.unwrap(), 1);
    let one = env.store.find_by_external_id("1").await.unwrap().unwrap();
    let two = env.store.find_by_external_id("2").await.unwrap().unwrap();
    assert!(one.lead_image.is_some());
    assert_eq!(one.lead_image, two.lead_image);
}

#[tokio::test]
async fn empty_results_report_no_articles() {
    let env = env_with(Arc::new(NoCache));
    env.transport.respond_json(ENDPOINT, &results(Vec::new()));

    let result = env.runtime.pipeline.run(&settings(), RunTrigger::Manual).await;

    assert!(result.success);
    assert_eq!(result.count, 0);
    assert_eq!(result.message, "No articles found");
    assert_eq!(env.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn upstream_error_status_fails_the_run() {
    let env = env_with(Arc::new(NoCache));
    env.transport
        .respond_json(ENDPOINT, &results(vec![article(11, "Kept", None)]));
    env.runtime.pipeline.run(&settings(), RunTrigger::Manual).await;
    let before = env.store.find_by_external_id("11").await.unwrap().unwrap();

    env.transport.respond(ENDPOINT, 500, Some("text/plain"), "boom");
    let result = env.runtime.pipeline.run(&settings(), RunTrigger::Manual).await;

    assert!(!result.success);
    assert_eq!(result.count, 0);
    assert!(result.message.contains("500"), "{}", result.message);
    assert_eq!(env.store.count().await.unwrap(), 1);
    let after = env.store.find_by_external_id("11").await.unwrap().unwrap();
    assert_eq!(after.title, before.title);
    assert_eq!(after.updated_at, before.updated_at);
}

#[tokio::test]
async fn dropped_image_url_is_not_retried_from_stored_metadata() {
    let env = env_with(Arc::new(NoCache));
    let image = "https://img.test/gone.jpg";
    env.transport.respond(image, 404, None, Vec::new());
    env.transport
        .respond_json(ENDPOINT, &results(vec![article(21, "Relay", Some(image))]));
    env.runtime.pipeline.run(&settings(), RunTrigger::Manual).await;

    env.transport
        .respond_json(ENDPOINT, &results(vec![article(21, "Relay", None)]));
    let second = env.runtime.pipeline.run(&settings(), RunTrigger::Manual).await;
    let third = env.runtime.pipeline.run(&settings(), RunTrigger::Manual).await;

    assert_eq!(second.count, 1);
    assert_eq!(third.count, 1);
    assert_eq!(env.transport.calls_to(image), 1);
    let record = env.store.find_by_external_id("21").await.unwrap().unwrap();
    assert_eq!(record.meta.image_url.as_deref(), Some(image));
    assert_eq!(record.lead_image, None);
}

#[tokio::test]
async fn article_with_null_fields_is_still_imported() {
    let env = env_with(Arc::new(NoCache));
    env.transport.respond_json(
        ENDPOINT,
        &json!({ "results": [{
            "id": 31,
            "title": "Static fire",
            "summary": null,
            "published_at": "2024-01-04T00:00:00Z",
            "news_site": null,
            "url": null,
            "image_url": null
        }]}),
    );

    let result = env.runtime.pipeline.run(&settings(), RunTrigger::Manual).await;

    assert!(result.success);
    assert_eq!(result.count, 1);
    let record = env.store.find_by_external_id("31").await.unwrap().unwrap();
    assert_eq!(record.title, "Static fire");
    assert_eq!(record.body, "");
    assert_eq!(record.lead_image, None);
}

#[tokio::test]
async fn transport_failure_fails_the_run() {
    let env = env_with(Arc::new(NoCache));
    env.transport
        .fail(ENDPOINT, TransportError::Connect("connection refused".into()));

    let result = env.runtime.pipeline.run(&settings(), RunTrigger::Manual).await;

    assert!(!result.success);
    assert!(result.message.starts_with("API request failed"), "{}", result.message);
}

#[tokio::test]
async fn store_error_skips_only_that_article() {
    let dir = tempdir().unwrap();
    let inner = Arc::new(MemoryStore::new());
    let contents = Arc::new(RejectingStore {
        inner: inner.clone(),
        reject: "2".into(),
    });
    let transport = Arc::new(RouteTransport::new());
    let runtime = SyncRuntime::assemble(
        config(&dir),
        contents,
        inner.clone(),
        Arc::new(NoCache),
        transport.clone(),
    );
    transport.respond_json(
        ENDPOINT,
        &results(vec![article(1, "One", None), article(2, "Two", None), article(3, "Three", None)]),
    );

    let result = runtime.pipeline.run(&settings(), RunTrigger::Manual).await;

    assert!(result.success);
    assert_eq!(result.count, 2);
    assert!(inner.find_by_external_id("1").await.unwrap().is_some());
    assert!(inner.find_by_external_id("2").await.unwrap().is_none());
    assert!(inner.find_by_external_id("3").await.unwrap().is_some());
}

#[tokio::test]
async fn failed_image_download_still_counts_the_article() {
    let env = env_with(Arc::new(NoCache));
    env.transport.respond_json(
        ENDPOINT,
        &results(vec![article(5, "Five", Some("https://img.test/missing.jpg"))]),
    );
    env.transport.respond("https://img.test/missing.jpg", 404, None, Vec::new());

    let result = env.runtime.pipeline.run(&settings(), RunTrigger::Manual).await;

    assert_eq!(result.count, 1);
    let record = env.store.find_by_external_id("5").await.unwrap().unwrap();
    assert_eq!(record.lead_image, None);
    assert_eq!(env.store.count_assets().await.unwrap(), 0);
    assert!(staging_is_empty(&env.dir));
}

#[tokio::test]
async fn runtime_run_reads_settings_from_disk() {
    let env = env_with(Arc::new(NoCache));
    std::fs::write(
        env.dir.path().join("settings.yaml"),
        "search_phrase: Artemis\ndate_cutoff: 2024-03-01\nupdate_frequency: daily\n",
    )
    .unwrap();
    env.transport.respond_json(ENDPOINT, &results(Vec::new()));

    let result = env.runtime.run(RunTrigger::Manual).await.unwrap();

    assert!(result.success);
    let call = &env.transport.calls()[0];
    assert!(call.contains("search=Artemis"), "{call}");
    assert!(call.contains("published_at_gte=2024-03-01"), "{call}");
}
