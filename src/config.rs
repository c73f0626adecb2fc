//! Handshake Configuration
//!
//! Tunables for eligibility, blending, and commit timing. Every field has a
//! default, so a JSON file only needs the values it overrides.

use std::path::Path;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use tracing::info;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for this schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Handshake tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Both peers must see each other within this angle (degrees).
    pub view_angle_threshold_deg: f32,
    /// Hand distance below which blending starts.
    pub max_distance_threshold: f32,
    /// Hand distance below which peers count as touching.
    pub min_distance_threshold: f32,
    /// Blend change per second.
    pub blending_speed: f32,
    /// Cooldown after an effect change, in seconds.
    pub effect_change_protection_secs: f64,
    /// Engaged ticks needed before a commit (commit fires when exceeded).
    pub handshake_frame_threshold: u32,
    /// Simulation tick rate (Hz).
    pub tick_rate: u32,
    /// Give up waiting for the local peer after this many seconds.
    pub readiness_timeout_secs: f64,
    /// Interval between readiness checks, in seconds.
    pub readiness_poll_interval_secs: f64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            view_angle_threshold_deg: 60.0,
            max_distance_threshold: 1.0,
            min_distance_threshold: 0.2,
            blending_speed: 1.0,
            effect_change_protection_secs: 5.0,
            handshake_frame_threshold: 60,
            tick_rate: 60,
            readiness_timeout_secs: 10.0,
            readiness_poll_interval_secs: 0.1,
        }
    }
}

impl HandshakeConfig {
    /// Parse from a JSON string and validate.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        info!("Loaded handshake config from {}", path.display());
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// `max_distance_threshold > min_distance_threshold` is what keeps the
    /// falloff remap from dividing by zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_distance_threshold >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "min_distance_threshold must be >= 0, got {}",
                self.min_distance_threshold
            )));
        }
        if !(self.max_distance_threshold > self.min_distance_threshold) {
            return Err(ConfigError::Invalid(format!(
                "max_distance_threshold ({}) must exceed min_distance_threshold ({})",
                self.max_distance_threshold, self.min_distance_threshold
            )));
        }
        if !(self.view_angle_threshold_deg > 0.0 && self.view_angle_threshold_deg <= 180.0) {
            return Err(ConfigError::Invalid(format!(
                "view_angle_threshold_deg must be in (0, 180], got {}",
                self.view_angle_threshold_deg
            )));
        }
        if !(self.blending_speed > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "blending_speed must be positive, got {}",
                self.blending_speed
            )));
        }
        if !(self.effect_change_protection_secs >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "effect_change_protection_secs must be >= 0, got {}",
                self.effect_change_protection_secs
            )));
        }
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be non-zero".into()));
        }
        if self.readiness_poll_interval()?.is_zero() {
            return Err(ConfigError::Invalid(format!(
                "readiness_poll_interval_secs must be positive, got {}",
                self.readiness_poll_interval_secs
            )));
        }
        self.readiness_timeout()?;
        Ok(())
    }

    /// Readiness timeout as a `Duration`.
    pub fn readiness_timeout(&self) -> Result<Duration, ConfigError> {
        secs_to_duration("readiness_timeout_secs", self.readiness_timeout_secs)
    }

    /// Readiness poll interval as a `Duration`.
    pub fn readiness_poll_interval(&self) -> Result<Duration, ConfigError> {
        secs_to_duration("readiness_poll_interval_secs", self.readiness_poll_interval_secs)
    }

    /// Frame interval in seconds.
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }
}

/// Negative, non-finite, and overflowing values are rejected.
fn secs_to_duration(name: &str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ConfigError::Invalid(format!("{} out of range ({}): {}", name, secs, e)))
}
