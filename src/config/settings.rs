use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::engine::StreamSettings;
use crate::error::ConfigError;
use crate::execution::LiveSettings;

/// Default settings file looked up in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "quantbot.toml";

/// Engine-wide settings
///
/// Loaded from built-in defaults, an optional TOML file, then `QUANTBOT_*`
/// environment variables (e.g. `QUANTBOT_FEE_RATE=0.0005`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Bounded capacity of the command channel
    pub command_capacity: usize,
    /// Bounded capacity of the event channel
    pub event_capacity: usize,
    /// Closed candles kept per timeframe
    pub candle_buffer: usize,
    /// Commission rate when the gateway does not report one
    pub fee_rate: f64,
    pub submit_attempts: u32,
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
    /// Production streams silent this long are restarted
    pub stream_stale_ms: u64,
    pub stream_reconnect_attempts: u32,
    pub stream_reconnect_delay_ms: u64,
    pub synthetic_seed: u64,
    pub synthetic_interval_secs: i64,
    pub log_filter: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command_capacity: 16,
            event_capacity: 1024,
            candle_buffer: 500,
            fee_rate: 0.001,
            submit_attempts: 3,
            poll_attempts: 5,
            poll_interval_ms: 200,
            stream_stale_ms: 10_000,
            stream_reconnect_attempts: 5,
            stream_reconnect_delay_ms: 1_000,
            synthetic_seed: 42,
            synthetic_interval_secs: 1,
            log_filter: "quantbot=info".to_string(),
        }
    }
}

impl EngineSettings {
    /// Load settings
    ///
    /// # Arguments
    /// * `path` - Explicit settings file; must exist when given. Without it
    ///   `quantbot.toml` is used if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        builder = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::Io {
                        path: path.display().to_string(),
                        reason: "file not found".to_string(),
                    });
                }
                builder.add_source(config::File::from(path).format(config::FileFormat::Toml))
            }
            None => builder.add_source(
                config::File::new(DEFAULT_SETTINGS_FILE, config::FileFormat::Toml).required(false),
            ),
        };

        let settings: EngineSettings = builder
            .add_source(config::Environment::with_prefix("QUANTBOT").try_parsing(true))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_capacity == 0 || self.event_capacity == 0 {
            return Err(ConfigError::Invalid("channel capacities must be positive".to_string()));
        }
        if self.candle_buffer == 0 {
            return Err(ConfigError::Invalid("candle_buffer must be positive".to_string()));
        }
        if !self.fee_rate.is_finite() || self.fee_rate < 0.0 {
            return Err(ConfigError::Invalid(format!("invalid fee_rate {}", self.fee_rate)));
        }
        if self.submit_attempts == 0 {
            return Err(ConfigError::Invalid("submit_attempts must be at least 1".to_string()));
        }
        if self.stream_stale_ms == 0 {
            return Err(ConfigError::Invalid("stream_stale_ms must be positive".to_string()));
        }
        if self.synthetic_interval_secs <= 0 {
            return Err(ConfigError::Invalid("synthetic_interval_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn live(&self) -> LiveSettings {
        LiveSettings {
            submit_attempts: self.submit_attempts,
            poll_attempts: self.poll_attempts,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn streams(&self) -> StreamSettings {
        StreamSettings {
            stale_after: Duration::from_millis(self.stream_stale_ms),
            reconnect_attempts: self.stream_reconnect_attempts,
            reconnect_delay: Duration::from_millis(self.stream_reconnect_delay_ms),
        }
    }
}
