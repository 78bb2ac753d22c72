//! JSON admin surface: status, settings and the manual fetch trigger.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sfn_core::{PipelineResult, RunTrigger, SettingsInput, UpdateFrequency};
use sfn_sync::{FetchScheduler, SyncConfig, SyncRuntime, FETCH_JOB};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "sfn-web";

const CACHED_NOTICE: &str = "Using cached data (updates every hour)";
const NOT_SCHEDULED: &str = "Not scheduled";

#[derive(Clone)]
pub struct AppState {
    pub runtime: SyncRuntime,
    pub scheduler: Option<Arc<FetchScheduler>>,
}

impl AppState {
    pub fn new(runtime: SyncRuntime, scheduler: Option<Arc<FetchScheduler>>) -> Self {
        Self { runtime, scheduler }
    }
}

#[derive(Debug, Serialize)]
struct StatusView {
    total_articles: u64,
    latest_article_at: Option<DateTime<Utc>>,
    next_update: String,
}

/// Raw form fields; blank strings mean "unset".
#[derive(Debug, Default, Deserialize)]
struct SettingsForm {
    #[serde(default)]
    search_phrase: Option<String>,
    #[serde(default)]
    date_cutoff: Option<String>,
    #[serde(default)]
    update_frequency: Option<String>,
}

impl SettingsForm {
    fn into_input(self) -> Result<SettingsInput, String> {
        let date_cutoff = match self.date_cutoff.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|_| format!("date_cutoff must be YYYY-MM-DD, got `{raw}`"))?,
            ),
        };
        let update_frequency = match self.update_frequency.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<UpdateFrequency>()?),
        };
        Ok(SettingsInput {
            search_phrase: self.search_phrase.map(|s| s.trim().to_string()),
            date_cutoff,
            update_frequency,
        })
    }
}

#[derive(Debug, Serialize)]
struct FetchView {
    #[serde(flatten)]
    result: PipelineResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    notice: Option<&'static str>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/settings", get(settings_handler).post(save_settings_handler))
        .route("/fetch", post(fetch_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let port = config.web_port;
    let scheduler_enabled = config.scheduler_enabled;
    let runtime = SyncRuntime::from_config(config).await?;

    let scheduler = if scheduler_enabled {
        Some(Arc::new(runtime.start_scheduler().await?))
    } else {
        None
    };

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, scheduler = scheduler.is_some(), "serving");
    axum::serve(listener, app(AppState::new(runtime, scheduler.clone())))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("web server")?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await?;
    }
    Ok(())
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    let stats = match state.runtime.contents.stats().await {
        Ok(stats) => stats,
        Err(err) => return server_error(err.into()),
    };
    let next_update = match &state.scheduler {
        Some(scheduler) => match scheduler.next_run(FETCH_JOB).await {
            Ok(Some(at)) => at.to_rfc3339(),
            Ok(None) => NOT_SCHEDULED.to_string(),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "next run unavailable");
                NOT_SCHEDULED.to_string()
            }
        },
        None => NOT_SCHEDULED.to_string(),
    };
    Json(StatusView {
        total_articles: stats.total_published,
        latest_article_at: stats.latest_published_at,
        next_update,
    })
    .into_response()
}

async fn settings_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.runtime.settings.current().await {
        Ok(settings) => Json(settings).into_response(),
        Err(err) => server_error(err),
    }
}

async fn save_settings_handler(
    State(state): State<Arc<AppState>>,
    Json(form): Json<SettingsForm>,
) -> Response {
    let input = match form.into_input() {
        Ok(input) => input,
        Err(message) => return bad_request(message),
    };
    if let Err(err) = state.runtime.settings.save(&input).await {
        return server_error(err);
    }

    let mut message = "Settings saved.";
    if let Some(scheduler) = &state.scheduler {
        let frequency = input.update_frequency.unwrap_or_default();
        if let Err(err) = scheduler
            .reschedule(FETCH_JOB, frequency, state.runtime.scheduled_entry())
            .await
        {
            return server_error(err);
        }
        message = "Settings saved and schedule updated.";
    }
    info!(frequency = ?input.update_frequency, "settings saved");
    Json(serde_json::json!({ "message": message })).into_response()
}

async fn fetch_handler(State(state): State<Arc<AppState>>) -> Response {
    let result = match state.runtime.run(RunTrigger::Manual).await {
        Ok(result) => result,
        Err(err) => return server_error(err),
    };
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    let notice = result.from_cache.then_some(CACHED_NOTICE);
    (status, Json(FetchView { result, notice })).into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message }))).into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    warn!(error = %format!("{err:#}"), "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": format!("Server error: {err}") })),
    )
        .into_response()
}
