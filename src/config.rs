use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PREFIX: &str = "LEAD_DASHBOARD_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardConfig {
    pub data_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub refresh_interval_secs: u64,
    pub page_size: usize,
    /// Stage value that counts a lead as converted.
    pub converted_stage: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".lead-dashboard"),
            log_dir: None,
            refresh_interval_secs: 300,
            page_size: 25,
            converted_stage: "Converted".to_string(),
        }
    }
}

impl DashboardConfig {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Overlays `LEAD_DASHBOARD_*` values from `lookup` onto the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let mut config = Self::default();
        let var = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(dir) = var("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("LOG_DIR") {
            config.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = var("REFRESH_SECS") {
            config.refresh_interval_secs = parse_positive(&raw, "REFRESH_SECS")?;
        }
        if let Some(raw) = var("PAGE_SIZE") {
            config.page_size = parse_positive(&raw, "PAGE_SIZE")? as usize;
        }
        if let Some(stage) = var("CONVERTED_STAGE") {
            config.converted_stage = stage;
        }

        Ok(config)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("leads.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("logs"))
    }
}

fn parse_positive(raw: &str, name: &str) -> AppResult<u64> {
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(AppError::InvalidInput(format!(
            "{ENV_PREFIX}{name} must be a positive integer, got {raw:?}"
        ))),
    }
}
