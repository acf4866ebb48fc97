use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, path::Path, time::Duration};
use thiserror::Error;

/// Control loop cadence.
pub const CONTROL_TICK: Duration = Duration::from_secs(1);
/// How often the meter folds pending marks into its decayed rate.
pub const DECAY_TICK: Duration = Duration::from_secs(5);
/// Smoothing window of the decayed rate.
pub const DECAY_WINDOW: Duration = Duration::from_secs(60);
/// Pause after each detected movement so one jolt is not counted many times.
pub const MARK_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("sensitivity must be >= 0, got {0}")]
    NegativeSensitivity(f64),
    #[error("sensitivity must be a finite number, got {0}")]
    NonFiniteSensitivity(f64),
    #[error("threshold must be >= 0, got {0}")]
    NegativeThreshold(f64),
    #[error("threshold must be a finite number, got {0}")]
    NonFiniteThreshold(f64),
}

/// Validated monitor parameters. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Decayed rate (events/sec) above which the sensor counts as active.
    threshold: f64,
    /// Extra g on top of the 1g rest baseline an axis must exceed.
    sensitivity: f64,
    /// Consecutive active ticks needed before going hot.
    warmup_ticks: u32,
    /// Consecutive quiet ticks needed before going cold.
    cooldown_ticks: u32,
    debug: bool,
}

impl MonitorConfig {
    pub fn new(
        threshold: f64,
        sensitivity: f64,
        warmup_ticks: u32,
        cooldown_ticks: u32,
        debug: bool,
    ) -> Result<Self, ConfigError> {
        if !threshold.is_finite() {
            return Err(ConfigError::NonFiniteThreshold(threshold));
        }
        if threshold < 0.0 {
            return Err(ConfigError::NegativeThreshold(threshold));
        }
        if !sensitivity.is_finite() {
            return Err(ConfigError::NonFiniteSensitivity(sensitivity));
        }
        if sensitivity < 0.0 {
            return Err(ConfigError::NegativeSensitivity(sensitivity));
        }

        Ok(Self {
            threshold,
            sensitivity,
            warmup_ticks,
            cooldown_ticks,
            debug,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    pub fn warmup_ticks(&self) -> u32 {
        self.warmup_ticks
    }

    pub fn cooldown_ticks(&self) -> u32 {
        self.cooldown_ticks
    }

    pub fn debug(&self) -> bool {
        self.debug
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            sensitivity: 0.1,
            warmup_ticks: 120,
            cooldown_ticks: 120,
            debug: false,
        }
    }
}

/// Optional on-disk settings. Anything left out falls back to the CLI value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileConfig {
    pub name: Option<String>,
    pub threshold: Option<f64>,
    pub sensitivity: Option<f64>,
    pub warmup: Option<u32>,
    pub cooldown: Option<u32>,
    pub debug: Option<bool>,
    pub device: Option<String>,
    pub active_led: Option<String>,
    pub inactive_led: Option<String>,
    pub notify_url: Option<String>,
    pub notify_priority: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config in {}", path.display()))
    }
}
