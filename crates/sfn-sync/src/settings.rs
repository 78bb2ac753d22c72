use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use sfn_core::{Settings, SettingsInput};
use tokio::fs;
use uuid::Uuid;

/// YAML-backed key/value persistence for the pipeline settings.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored settings, or an empty input when nothing was saved yet.
    pub async fn load(&self) -> Result<SettingsInput> {
        if !fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking {}", self.path.display()))?
        {
            return Ok(SettingsInput::default());
        }
        let text = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        if text.trim().is_empty() {
            return Ok(SettingsInput::default());
        }
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", self.path.display()))
    }

    pub async fn save(&self, input: &SettingsInput) -> Result<()> {
        let yaml = serde_yaml::to_string(input).context("serializing settings")?;
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;

        let temp_path = parent.join(format!(".settings.{}.tmp", Uuid::new_v4()));
        fs::write(&temp_path, yaml)
            .await
            .with_context(|| format!("writing {}", temp_path.display()))?;
        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| format!("replacing {}", self.path.display()));
        }
        Ok(())
    }

    pub async fn resolved(&self, today: NaiveDate) -> Result<Settings> {
        Ok(self.load().await?.resolve(today))
    }

    pub async fn current(&self) -> Result<Settings> {
        self.resolved(Utc::now().date_naive()).await
    }
}
