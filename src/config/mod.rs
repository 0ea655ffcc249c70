//! Configuration types for the ADC pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Highest valid channel index.
pub const MAX_CHANNEL: usize = 63;

/// Errors raised by configuration validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid channel window {min}-{max}: channels must lie in 0-{limit} with min <= max", limit = MAX_CHANNEL)]
    ChannelRangeInvalid { min: usize, max: usize },
}

/// Channel window selecting which of the 64 channels to process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Lowest channel to process
    #[serde(default)]
    pub min_channel: usize,

    /// Highest channel to process (inclusive)
    #[serde(default = "default_max_channel")]
    pub max_channel: usize,
}

fn default_max_channel() -> usize {
    MAX_CHANNEL
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_channel: 0,
            max_channel: default_max_channel(),
        }
    }
}

/// Settings for the pulse-shape fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    /// Rise-time constant of the pulse shape, in samples
    #[serde(default = "default_rise_time")]
    pub rise_time: f64,

    /// Lower bound on the per-sample uncertainty, in ADC counts
    #[serde(default = "default_sigma_floor")]
    pub sigma_floor: f64,

    /// Iteration cap for the least-squares solver
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Relative chi-square improvement below which a fit counts as converged
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_rise_time() -> f64 {
    1.5
}

fn default_sigma_floor() -> f64 {
    1.0
}

fn default_max_iterations() -> usize {
    200
}

fn default_tolerance() -> f64 {
    1e-8
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            rise_time: default_rise_time(),
            sigma_floor: default_sigma_floor(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
        }
    }
}

/// Event-block parsing policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseConfig {
    /// Abort on the first malformed event block instead of skipping it
    #[serde(default)]
    pub strict: bool,
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub fit: FitConfig,

    #[serde(default)]
    pub parsing: ParseConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the channel window. Called before any parsing work begins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.capture;
        if c.min_channel > c.max_channel || c.max_channel > MAX_CHANNEL {
            return Err(ConfigError::ChannelRangeInvalid {
                min: c.min_channel,
                max: c.max_channel,
            });
        }
        Ok(())
    }
}
