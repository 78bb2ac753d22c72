//! Pipeline orchestration: settings, article import, lead images and the
//! periodic fetch job.

use std::sync::Arc;

use anyhow::{Context, Result};
use sfn_api::SpaceflightClient;
use sfn_core::{PipelineResult, RunTrigger};
use sfn_storage::{
    ArticleCache, ArtifactStore, AssetIndex, ContentStore, HttpClientConfig, HttpFetcher,
    HttpTransport, MemoryArticleCache, MemoryStore, PgStore,
};
use tracing::{info, warn};

mod articles;
mod attachments;
mod config;
mod pipeline;
mod schedule;
mod settings;

pub use articles::{clean_url, sanitize_html, sanitize_text, ArticleStore};
pub use attachments::{AttachOutcome, ImageAttacher};
pub use config::SyncConfig;
pub use pipeline::Pipeline;
pub use schedule::{EntryPoint, FetchScheduler, FETCH_JOB};
pub use settings::FileSettingsStore;

pub const CRATE_NAME: &str = "sfn-sync";

/// Everything a process needs to run the pipeline: stores, the pipeline
/// itself and the settings file.
#[derive(Clone)]
pub struct SyncRuntime {
    pub config: SyncConfig,
    pub contents: Arc<dyn ContentStore>,
    pub pipeline: Arc<Pipeline>,
    pub settings: FileSettingsStore,
}

impl SyncRuntime {
    /// Postgres when `DATABASE_URL` is set, in-memory stores otherwise.
    pub async fn from_config(config: SyncConfig) -> Result<Self> {
        let http: Arc<dyn HttpTransport> = Arc::new(HttpFetcher::new(HttpClientConfig {
            timeout: config.http_timeout(),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?);

        match config.database_url.clone() {
            Some(url) => {
                let pg = Arc::new(PgStore::connect(&url).await?);
                pg.migrate().await?;
                info!("using postgres storage");
                Ok(Self::assemble(config, pg.clone(), pg.clone(), pg, http))
            }
            None => {
                warn!("DATABASE_URL not set; records will not outlive this process");
                let store = Arc::new(MemoryStore::new());
                let cache = Arc::new(MemoryArticleCache::new());
                Ok(Self::assemble(config, store.clone(), store, cache, http))
            }
        }
    }

    pub fn assemble(
        config: SyncConfig,
        contents: Arc<dyn ContentStore>,
        assets: Arc<dyn AssetIndex>,
        cache: Arc<dyn ArticleCache>,
        http: Arc<dyn HttpTransport>,
    ) -> Self {
        let client = SpaceflightClient::new(config.api_base.clone(), http.clone(), cache)
            .with_timeout(config.http_timeout());
        let attacher = ImageAttacher::new(
            contents.clone(),
            assets,
            ArtifactStore::new(config.assets_dir.clone()),
            http,
            config.image_timeout(),
        );
        let pipeline = Pipeline::new(client, ArticleStore::new(contents.clone()), attacher);
        let settings = FileSettingsStore::new(config.settings_path.clone());
        Self {
            config,
            contents,
            pipeline: Arc::new(pipeline),
            settings,
        }
    }

    pub async fn run(&self, trigger: RunTrigger) -> Result<PipelineResult> {
        let settings = self.settings.current().await.context("loading settings")?;
        Ok(self.pipeline.run(&settings, trigger).await)
    }

    /// Job body for the scheduler: settings are re-read on every tick.
    pub fn scheduled_entry(&self) -> EntryPoint {
        let runtime = self.clone();
        Arc::new(move || {
            let runtime = runtime.clone();
            Box::pin(async move {
                match runtime.run(RunTrigger::Scheduled).await {
                    Ok(result) if result.success => info!(count = result.count, "scheduled fetch finished"),
                    Ok(result) => warn!(message = %result.message, "scheduled fetch failed"),
                    Err(err) => warn!(error = %format!("{err:#}"), "scheduled fetch not started"),
                }
            })
        })
    }

    /// Start a scheduler with the fetch job armed at the stored frequency.
    pub async fn start_scheduler(&self) -> Result<FetchScheduler> {
        let scheduler = FetchScheduler::start().await?;
        let settings = self.settings.current().await.context("loading settings")?;
        scheduler
            .schedule(FETCH_JOB, settings.update_frequency, self.scheduled_entry())
            .await?;
        Ok(scheduler)
    }
}

pub async fn run_once_from_env() -> Result<PipelineResult> {
    let runtime = SyncRuntime::from_config(SyncConfig::from_env()).await?;
    runtime.run(RunTrigger::Manual).await
}
