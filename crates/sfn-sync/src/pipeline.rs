use sfn_api::SpaceflightClient;
use sfn_core::{ArticleRecord, PipelineResult, RunTrigger, Settings, StoreError};
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::articles::{clean_url, ArticleStore};
use crate::attachments::{AttachOutcome, ImageAttacher};

/// Fetch, upsert and attach in one pass. Runs in the same process are serialized.
pub struct Pipeline {
    client: SpaceflightClient,
    articles: ArticleStore,
    attacher: ImageAttacher,
    run_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(client: SpaceflightClient, articles: ArticleStore, attacher: ImageAttacher) -> Self {
        Self {
            client,
            articles,
            attacher,
            run_lock: Mutex::new(()),
        }
    }

    pub async fn run(&self, settings: &Settings, trigger: RunTrigger) -> PipelineResult {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id, trigger = trigger.as_str());
        async {
            let _guard = self.run_lock.lock().await;
            self.run_locked(settings).await
        }
        .instrument(span)
        .await
    }

    async fn run_locked(&self, settings: &Settings) -> PipelineResult {
        let fetched = match self.client.fetch(settings).await {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(error = %err, "article fetch failed");
                return PipelineResult::failed(&err);
            }
        };
        if fetched.articles.is_empty() {
            info!(from_cache = fetched.from_cache, "no articles to import");
            return PipelineResult::empty(fetched.from_cache);
        }

        let mut count = 0usize;
        for article in &fetched.articles {
            match self.import(article).await {
                Ok(()) => count += 1,
                Err(err) => warn!(external_id = %article.external_id, error = %err, "article skipped"),
            }
        }
        info!(count, total = fetched.articles.len(), from_cache = fetched.from_cache, "pipeline run finished");
        PipelineResult::completed(count, fetched.from_cache)
    }

    async fn import(&self, article: &ArticleRecord) -> Result<(), StoreError> {
        let (record, outcome) = self.articles.upsert(article).await?;
        info!(external_id = %article.external_id, content_id = %record.id, ?outcome, "stored article");

        if let Err(err) = self.articles.republish_meta(&record, article).await {
            warn!(content_id = %record.id, error = %err, "metadata not republished");
        }

        // Attach only the image the article carries on this run.
        if let Some(image_url) = article.image_url.as_deref().and_then(clean_url) {
            if let AttachOutcome::Downloaded(asset_id) = self.attacher.attach(record.id, &image_url).await {
                info!(content_id = %record.id, %asset_id, "lead image attached");
            }
        }
        Ok(())
    }
}
