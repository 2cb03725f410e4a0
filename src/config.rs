// src/config.rs - TOML configuration for the fleet host

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::BackoffPolicy;
use crate::collab::SlicerEntry;
use crate::monitor::MonitorConfig;
use crate::printers::PrinterVendor;
use crate::slicing::QueueConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueSection,

    #[serde(default)]
    pub monitor: MonitorSection,

    /// Retry tuning for post-slice artifact uploads.
    #[serde(default)]
    pub upload_backoff: BackoffSection,

    #[serde(default)]
    pub paths: PathsSection,

    #[serde(default)]
    pub printers: HashMap<String, PrinterSection>,

    #[serde(default)]
    pub slicers: HashMap<String, SlicerSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueSection {
    #[serde(default = "default_dispatch_interval_secs")]
    pub dispatch_interval_secs: f64,

    #[serde(default)]
    pub backoff: BackoffSection,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            dispatch_interval_secs: default_dispatch_interval_secs(),
            backoff: BackoffSection::default(),
        }
    }
}

/// One backoff tuning. The algorithm is shared; slicing retries, poll
/// delays and snapshot retries each carry their own numbers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackoffSection {
    #[serde(default = "default_backoff_base_secs")]
    pub base_secs: f64,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_backoff_cap_secs")]
    pub cap_secs: f64,
    #[serde(default = "default_backoff_max_attempts")]
    pub max_attempts: u32,
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            base_secs: default_backoff_base_secs(),
            multiplier: default_backoff_multiplier(),
            cap_secs: default_backoff_cap_secs(),
            max_attempts: default_backoff_max_attempts(),
        }
    }
}

impl BackoffSection {
    pub fn to_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs_f64(self.base_secs),
            self.multiplier,
            Duration::from_secs_f64(self.cap_secs),
            self.max_attempts,
        )
    }

    // Everything here feeds Duration::from_secs_f64 eventually, which
    // panics on NaN/infinity/negative; the negated comparisons reject
    // NaN as well.
    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(format!(
                "{section}.max_attempts must be at least 1"
            )));
        }
        if !(self.multiplier >= 1.0) || !self.multiplier.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "{section}.multiplier must be a finite number >= 1"
            )));
        }
        if !(self.base_secs >= 0.0) || !self.base_secs.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "{section}.base_secs must be a finite non-negative number"
            )));
        }
        if !(self.cap_secs >= 0.0) || !self.cap_secs.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "{section}.cap_secs must be a finite non-negative number"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorSection {
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
    #[serde(default = "default_status_error_cap_secs")]
    pub status_error_cap_secs: u64,
    #[serde(default = "default_job_interval_secs")]
    pub job_interval_secs: u64,
    #[serde(default = "default_job_error_cap_secs")]
    pub job_error_cap_secs: u64,
    #[serde(default = "default_offline_threshold")]
    pub offline_threshold: u32,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            status_interval_secs: default_status_interval_secs(),
            status_error_cap_secs: default_status_error_cap_secs(),
            job_interval_secs: default_job_interval_secs(),
            job_error_cap_secs: default_job_error_cap_secs(),
            offline_threshold: default_offline_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsSection {
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            output_dir: default_output_dir(),
            spool_dir: default_spool_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrinterSection {
    #[serde(default)]
    pub vendor: PrinterVendor,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlicerSection {
    pub executable: PathBuf,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub profiles: HashMap<String, PathBuf>,
}

impl Config {
    pub fn load_config(config_path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(config_path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded configuration from: {}", config_path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.queue.dispatch_interval_secs > 0.0)
            || !self.queue.dispatch_interval_secs.is_finite()
        {
            return Err(ConfigError::Invalid(
                "queue.dispatch_interval_secs must be a finite positive number".to_string(),
            ));
        }
        self.queue.backoff.validate("queue.backoff")?;
        self.upload_backoff.validate("upload_backoff")?;
        if self.monitor.offline_threshold == 0 {
            return Err(ConfigError::Invalid(
                "monitor.offline_threshold must be at least 1".to_string(),
            ));
        }
        if self.monitor.status_interval_secs == 0 || self.monitor.job_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "monitor poll intervals must be positive".to_string(),
            ));
        }
        for (id, slicer) in &self.slicers {
            if slicer.executable.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "slicer {id} has an empty executable path"
                )));
            }
        }
        Ok(())
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            dispatch_interval: Duration::from_secs_f64(self.queue.dispatch_interval_secs),
            backoff: self.queue.backoff.to_policy(),
            upload_backoff: self.upload_backoff.to_policy(),
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            status_interval: Duration::from_secs(self.monitor.status_interval_secs),
            status_error_cap: Duration::from_secs(self.monitor.status_error_cap_secs),
            job_interval: Duration::from_secs(self.monitor.job_interval_secs),
            job_error_cap: Duration::from_secs(self.monitor.job_error_cap_secs),
            offline_threshold: self.monitor.offline_threshold,
        }
    }

    pub fn registry_entries(&self) -> HashMap<String, SlicerEntry> {
        self.slicers
            .iter()
            .map(|(id, s)| {
                (
                    id.clone(),
                    SlicerEntry {
                        executable: s.executable.clone(),
                        max_concurrent: s.max_concurrent,
                        profiles: s.profiles.clone(),
                    },
                )
            })
            .collect()
    }
}

fn default_dispatch_interval_secs() -> f64 {
    2.0
}

fn default_backoff_base_secs() -> f64 {
    2.0
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_cap_secs() -> f64 {
    60.0
}

fn default_backoff_max_attempts() -> u32 {
    3
}

fn default_status_interval_secs() -> u64 {
    30
}

fn default_status_error_cap_secs() -> u64 {
    60
}

fn default_job_interval_secs() -> u64 {
    10
}

fn default_job_error_cap_secs() -> u64 {
    30
}

fn default_offline_threshold() -> u32 {
    3
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("spool")
}

fn default_max_concurrent() -> usize {
    1
}
