use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::queue::QueueSettings;
use crate::scheduler::EngineSettings;

/// Settings applied to queues created from the CLI when flags are omitted
/// (optional `[default_queue]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultQueueConfig {
    /// Directory finished files land in. `None` = current directory at creation time.
    #[serde(default)]
    pub save_dir: Option<PathBuf>,
    /// Maximum segments in flight across the queue.
    pub max_concurrent: usize,
    /// Bandwidth cap in KB/s (None = unlimited).
    #[serde(default)]
    pub max_bandwidth_kbs: Option<u32>,
    /// Start of the active window, "HH:MM".
    pub active_start: String,
    /// End of the active window, "HH:MM".
    pub active_end: String,
    /// Read failures tolerated per transfer before it fails.
    pub max_retries: u32,
    /// Admit a transfer only when all of its segments can get a slot at once.
    #[serde(default)]
    pub strict_admission: bool,
}

impl Default for DefaultQueueConfig {
    fn default() -> Self {
        Self {
            save_dir: None,
            max_concurrent: 5,
            max_bandwidth_kbs: None,
            active_start: "00:00".to_string(),
            active_end: "23:59".to_string(),
            max_retries: 3,
            strict_admission: false,
        }
    }
}

impl DefaultQueueConfig {
    /// Queue settings from these defaults; `fallback_dir` is used when no save_dir is configured.
    pub fn queue_settings(&self, fallback_dir: impl Into<PathBuf>) -> QueueSettings {
        QueueSettings {
            save_dir: self.save_dir.clone().unwrap_or_else(|| fallback_dir.into()),
            max_concurrent: self.max_concurrent,
            max_bandwidth_kbs: self.max_bandwidth_kbs,
            active_start: self.active_start.clone(),
            active_end: self.active_end.clone(),
            max_retries: self.max_retries,
            strict_admission: self.strict_admission,
        }
    }
}

/// Global configuration loaded from `~/.config/qdm/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdmConfig {
    /// Maximum number of segments per transfer.
    pub max_parts: usize,
    /// One extra segment per this many MiB of content, up to `max_parts`.
    pub part_size_mb: u64,
    /// Scratch directory for segment temp files. None = `~/.local/share/qdm/tempparts`.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Safety-net wake-up of each queue's admission loop.
    pub poll_interval_ms: u64,
    /// Fixed backoff between retries of a failed segment read.
    pub retry_backoff_ms: u64,
    /// Delay before a removed transfer's temp files are deleted.
    pub removal_grace_ms: u64,
    #[serde(default)]
    pub default_queue: DefaultQueueConfig,
}

impl Default for QdmConfig {
    fn default() -> Self {
        Self {
            max_parts: 10,
            part_size_mb: 3,
            temp_dir: None,
            poll_interval_ms: 1000,
            retry_backoff_ms: 2000,
            removal_grace_ms: 1000,
            default_queue: DefaultQueueConfig::default(),
        }
    }
}

impl QdmConfig {
    /// Resolve the scratch directory and timings into scheduler settings.
    pub fn engine_settings(&self) -> Result<EngineSettings> {
        let temp_dir = match &self.temp_dir {
            Some(dir) => dir.clone(),
            None => default_temp_dir()?,
        };
        Ok(EngineSettings {
            max_parts: self.max_parts,
            part_size_mb: self.part_size_mb,
            temp_dir,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            removal_grace: Duration::from_millis(self.removal_grace_ms),
        })
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("qdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// `~/.local/share/qdm/tempparts`.
pub fn default_temp_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("qdm")?;
    Ok(xdg_dirs.get_data_home().join("qdm").join("tempparts"))
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<QdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = QdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: QdmConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = QdmConfig::default();
        assert_eq!(cfg.max_parts, 10);
        assert_eq!(cfg.part_size_mb, 3);
        assert_eq!(cfg.retry_backoff_ms, 2000);
        assert_eq!(cfg.default_queue.max_concurrent, 5);
        assert_eq!(cfg.default_queue.active_start, "00:00");
        assert_eq!(cfg.default_queue.active_end, "23:59");
        assert!(cfg.default_queue.max_bandwidth_kbs.is_none());
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = QdmConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: QdmConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_parts, cfg.max_parts);
        assert_eq!(parsed.part_size_mb, cfg.part_size_mb);
        assert_eq!(parsed.poll_interval_ms, cfg.poll_interval_ms);
        assert_eq!(parsed.default_queue.max_retries, cfg.default_queue.max_retries);
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            max_parts = 4
            part_size_mb = 1
            poll_interval_ms = 200
            retry_backoff_ms = 50
            removal_grace_ms = 10
            temp_dir = "/tmp/qdm-scratch"

            [default_queue]
            max_concurrent = 2
            max_bandwidth_kbs = 500
            active_start = "22:00"
            active_end = "06:00"
            max_retries = 1
            strict_admission = true
        "#;
        let cfg: QdmConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_parts, 4);
        assert_eq!(cfg.part_size_mb, 1);
        assert_eq!(cfg.temp_dir.as_deref(), Some(std::path::Path::new("/tmp/qdm-scratch")));
        assert_eq!(cfg.default_queue.max_bandwidth_kbs, Some(500));
        assert!(cfg.default_queue.strict_admission);

        let settings = cfg.engine_settings().unwrap();
        assert_eq!(settings.temp_dir, PathBuf::from("/tmp/qdm-scratch"));
        assert_eq!(settings.poll_interval, Duration::from_millis(200));
        assert_eq!(settings.retry_backoff, Duration::from_millis(50));
    }

    #[test]
    fn missing_default_queue_section_uses_defaults() {
        let toml = r#"
            max_parts = 8
            part_size_mb = 2
            poll_interval_ms = 1000
            retry_backoff_ms = 2000
            removal_grace_ms = 1000
        "#;
        let cfg: QdmConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.default_queue.max_concurrent, 5);
        assert!(cfg.temp_dir.is_none());
    }

    #[test]
    fn default_queue_fills_queue_settings() {
        let mut dq = DefaultQueueConfig::default();
        let qs = dq.queue_settings("/home/u/Downloads");
        assert_eq!(qs.save_dir, PathBuf::from("/home/u/Downloads"));
        assert!(qs.validate().is_ok());

        dq.save_dir = Some(PathBuf::from("/srv/dl"));
        dq.max_bandwidth_kbs = Some(64);
        let qs = dq.queue_settings("/ignored");
        assert_eq!(qs.save_dir, PathBuf::from("/srv/dl"));
        assert_eq!(qs.bandwidth_cap(), Some(64));
    }
}
