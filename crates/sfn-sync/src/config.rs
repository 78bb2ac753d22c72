use std::path::PathBuf;
use std::time::Duration;

use sfn_api::DEFAULT_API_BASE;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub api_base: String,
    pub assets_dir: PathBuf,
    pub settings_path: PathBuf,
    pub scheduler_enabled: bool,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub image_timeout_secs: u64,
    pub web_port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            api_base: DEFAULT_API_BASE.to_string(),
            assets_dir: PathBuf::from("./assets"),
            settings_path: PathBuf::from("./sfn-settings.yaml"),
            scheduler_enabled: false,
            user_agent: "sfn-bot/0.1".to_string(),
            http_timeout_secs: 30,
            image_timeout_secs: 30,
            web_port: 8000,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            api_base: std::env::var("SFN_API_BASE").unwrap_or(defaults.api_base),
            assets_dir: std::env::var("ASSETS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.assets_dir),
            settings_path: std::env::var("SFN_SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.settings_path),
            scheduler_enabled: std::env::var("SFN_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            user_agent: std::env::var("SFN_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: env_parse("SFN_HTTP_TIMEOUT_SECS").unwrap_or(defaults.http_timeout_secs),
            image_timeout_secs: env_parse("SFN_IMAGE_TIMEOUT_SECS")
                .unwrap_or(defaults.image_timeout_secs),
            web_port: env_parse("SFN_WEB_PORT").unwrap_or(defaults.web_port),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs.max(1))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
