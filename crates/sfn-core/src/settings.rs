use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CUTOFF_DAYS: u64 = 30;

/// How often the external scheduler re-runs the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateFrequency {
    #[default]
    Hourly,
    TwiceDaily,
    Daily,
}

impl UpdateFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::TwiceDaily => "twicedaily",
            Self::Daily => "daily",
        }
    }

    pub fn interval(&self) -> Duration {
        match self {
            Self::Hourly => Duration::from_secs(60 * 60),
            Self::TwiceDaily => Duration::from_secs(12 * 60 * 60),
            Self::Daily => Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl fmt::Display for UpdateFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "twicedaily" => Ok(Self::TwiceDaily),
            "daily" => Ok(Self::Daily),
            other => Err(format!("unknown update frequency `{other}`")),
        }
    }
}

/// Settings exactly as persisted; every field may be unset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SettingsInput {
    #[serde(default)]
    pub search_phrase: Option<String>,
    #[serde(default)]
    pub date_cutoff: Option<NaiveDate>,
    #[serde(default)]
    pub update_frequency: Option<UpdateFrequency>,
}

impl SettingsInput {
    /// Apply defaults: no search filter, cutoff thirty days before `today`, hourly.
    pub fn resolve(&self, today: NaiveDate) -> Settings {
        let search_phrase = self
            .search_phrase
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let date_cutoff = self
            .date_cutoff
            .or_else(|| today.checked_sub_days(Days::new(DEFAULT_CUTOFF_DAYS)));
        Settings {
            search_phrase,
            date_cutoff,
            update_frequency: self.update_frequency.unwrap_or_default(),
        }
    }
}

/// Resolved settings handed explicitly to the pipeline and API client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub search_phrase: String,
    /// Inclusive lower bound on publish date, applied from midnight UTC.
    pub date_cutoff: Option<NaiveDate>,
    pub update_frequency: UpdateFrequency,
}

impl From<&Settings> for SettingsInput {
    fn from(settings: &Settings) -> Self {
        Self {
            search_phrase: Some(settings.search_phrase.clone()),
            date_cutoff: settings.date_cutoff,
            update_frequency: Some(settings.update_frequency),
        }
    }
}
