use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the monitor.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// HTTP listener for ingestion and chart serving. Default: "0.0.0.0:7070".
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Records buffered between producers and the writer. Default: 100000.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Pause between the end of one aggregation pass and the next. Default: 100s.
    #[serde(default = "default_aggregate_interval", with = "humantime_serde")]
    pub aggregate_interval: Duration,

    /// Delay before the first aggregation pass. Default: 1ms.
    #[serde(default = "default_aggregate_initial_delay", with = "humantime_serde")]
    pub aggregate_initial_delay: Duration,

    /// Run a full aggregation pass after every stored record.
    #[serde(default)]
    pub aggregate_after_write: bool,

    /// Root of the raw counter tree. Default: "statistics".
    #[serde(default = "default_statistics_dir")]
    pub statistics_dir: PathBuf,

    /// Root of the chart artifacts. Default: "charts".
    #[serde(default = "default_charts_dir")]
    pub charts_dir: PathBuf,

    /// Forwarding of raw records to an external store.
    #[serde(default)]
    pub persist: PersistConfig,

    /// Back-off before a dead writer loop is restarted. Default: 5s.
    #[serde(default = "default_writer_retry_delay", with = "humantime_serde")]
    pub writer_retry_delay: Duration,
}

/// External persistence endpoint. No URL disables forwarding.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistConfig {
    #[serde(default)]
    pub url: Option<String>,

    /// Bound on one outbound call. Default: 5s.
    #[serde(default = "default_persist_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:7070".to_string()
}

fn default_queue_capacity() -> usize {
    100_000
}

fn default_aggregate_interval() -> Duration {
    Duration::from_millis(100_000)
}

fn default_aggregate_initial_delay() -> Duration {
    Duration::from_millis(1)
}

fn default_statistics_dir() -> PathBuf {
    PathBuf::from("statistics")
}

fn default_charts_dir() -> PathBuf {
    PathBuf::from("charts")
}

fn default_writer_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_persist_timeout() -> Duration {
    Duration::from_secs(5)
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            listen_addr: default_listen_addr(),
            queue_capacity: default_queue_capacity(),
            aggregate_interval: default_aggregate_interval(),
            aggregate_initial_delay: default_aggregate_initial_delay(),
            aggregate_after_write: false,
            statistics_dir: default_statistics_dir(),
            charts_dir: default_charts_dir(),
            persist: PersistConfig::default(),
            writer_retry_delay: default_writer_retry_delay(),
        }
    }
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: default_persist_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::from_yaml(&data).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Parse and validate a YAML document. An empty document yields defaults.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = if data.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(data).context("invalid YAML")?
        };

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be greater than zero");
        }

        if self.aggregate_interval.is_zero() {
            bail!("aggregate_interval must be greater than zero");
        }

        if self.statistics_dir.as_os_str().is_empty() {
            bail!("statistics_dir is required");
        }

        if self.charts_dir.as_os_str().is_empty() {
            bail!("charts_dir is required");
        }

        if let Some(url) = self.persist_url() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("persist.url must be an http(s) URL, got {url:?}");
            }
            if self.persist.timeout.is_zero() {
                bail!("persist.timeout must be greater than zero");
            }
        }

        Ok(())
    }

    /// Forwarding URL, treating an empty string as unset.
    pub fn persist_url(&self) -> Option<&str> {
        self.persist.url.as_deref().filter(|u| !u.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.queue_capacity, 100_000);
        assert_eq!(cfg.aggregate_interval, Duration::from_secs(100));
        assert!(!cfg.aggregate_after_write);
        assert_eq!(cfg.statistics_dir, PathBuf::from("statistics"));
        assert_eq!(cfg.charts_dir, PathBuf::from("charts"));
        assert!(cfg.persist_url().is_none());
    }

    #[test]
    fn test_empty_document_is_default() {
        let cfg = Config::from_yaml("").expect("valid");
        assert_eq!(cfg.queue_capacity, 100_000);
    }

    #[test]
    fn test_parse_full_document() {
        let cfg = Config::from_yaml(
            r#"
queue_capacity: 10
aggregate_interval: 100000ms
aggregate_after_write: true
statistics_dir: /var/lib/monitor/statistics
charts_dir: /var/lib/monitor/charts
persist:
  url: http://collector:8080/statistics
  timeout: 2s
"#,
        )
        .expect("valid");

        assert_eq!(cfg.queue_capacity, 10);
        assert_eq!(cfg.aggregate_interval, Duration::from_secs(100));
        assert!(cfg.aggregate_after_write);
        assert_eq!(cfg.persist_url(), Some("http://collector:8080/statistics"));
        assert_eq!(cfg.persist.timeout, Duration::from_secs(2));
        assert_eq!(cfg.writer_retry_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = Config::from_yaml("queue_capacity: 0").unwrap_err();
        assert!(err.to_string().contains("queue_capacity"));
    }

    #[test]
    fn test_non_http_persist_url_rejected() {
        assert!(Config::from_yaml("persist:\n  url: ftp://nope\n").is_err());
    }

    #[test]
    fn test_empty_persist_url_is_disabled() {
        let cfg = Config::from_yaml("persist:\n  url: \"\"\n").expect("valid");
        assert!(cfg.persist_url().is_none());
    }
}
