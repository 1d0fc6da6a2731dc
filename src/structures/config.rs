use std::{fs::File, io::BufReader, path::Path, time::Duration};

use log::{info, warn};
use serde::Deserialize;

use super::errors::OffwatchError;
use super::settle::SettlePolicy;

/// What to do with the cache when a notification fails to go out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyFailurePolicy {
    /// Record the decision anyway so a flaky transport does not cause repeat alerts.
    #[default]
    Record,
    /// Leave the cache untouched so the next pass tries again.
    Retry,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettleConfig {
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        SettleConfig {
            timeout_secs: 60,
            poll_interval_secs: 2,
        }
    }
}

impl From<&SettleConfig> for SettlePolicy {
    fn from(c: &SettleConfig) -> Self {
        SettlePolicy {
            timeout: Duration::from_secs(c.timeout_secs),
            poll_interval: Duration::from_secs(c.poll_interval_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub dashboard_url: String,
    /// Offset the calendar day is computed in, e.g. `-03:00`.
    pub utc_offset: String,
    pub cache_path: String,
    pub settle: SettleConfig,
    pub watch_interval_secs: u64,
    pub notify_failure_policy: NotifyFailurePolicy,
    pub still_offline_notice: bool,
    pub all_clear_notice: bool,
    pub retain_days: Option<usize>,
    pub chrome_bin: String,
    pub render_budget_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dashboard_url: "https://htmleiene.github.io/monitoramento_urls/".to_string(),
            utc_offset: "-03:00".to_string(),
            cache_path: "./offline_cache.json".to_string(),
            settle: SettleConfig::default(),
            watch_interval_secs: 15,
            notify_failure_policy: NotifyFailurePolicy::default(),
            still_offline_notice: true,
            all_clear_notice: true,
            retain_days: None,
            chrome_bin: "chromium".to_string(),
            render_budget_ms: 5000,
        }
    }
}

impl Config {
    /// Read YAML config, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, OffwatchError> {
        if !path.exists() {
            warn!("config {} not found, using defaults", path.display());
            return Ok(Config::default());
        }
        info!("Reading config from {}", path.display());
        let config: Config = serde_yaml::from_reader(BufReader::new(File::open(path)?))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), OffwatchError> {
        if self.settle.poll_interval_secs == 0 {
            return Err(OffwatchError::Other(
                "settle.poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.retain_days == Some(0) {
            return Err(OffwatchError::Other("retain_days must be positive".to_string()));
        }
        Ok(())
    }
}
