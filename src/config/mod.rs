use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::ConfigError;

/// Streaming player configuration. Every field has a default so partial
/// TOML files load cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Seconds of audio per chunk
    pub chunk_duration: f64,
    /// Chunks loaded by `load_track` before it resolves
    pub preload_chunks: usize,
    /// Chunks kept resident ahead of the playback cursor
    pub buffer_ahead: usize,
    /// Chunks kept resident behind the playback cursor
    pub buffer_behind: usize,
    /// Linear fade-in length applied at chunk joins, in seconds
    pub crossfade_duration: f64,
    /// Reserved for drift correction
    pub seamless_threshold: f64,
    /// Byte-rate estimate used to turn chunk times into byte ranges
    pub assumed_bytes_per_second: u64,
    pub initial_volume: f32,
    /// Time constant of the master volume smoothing, in seconds
    pub volume_time_constant: f64,
    /// Buffer management tick; zero disables the background loop
    pub manage_interval_ms: u64,
    /// Progress/timeupdate tick; zero disables the background loop
    pub progress_interval_ms: u64,
    /// Performance stats tick; zero disables the background loop
    pub stats_interval_ms: u64,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
    pub preferred_device: Option<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            chunk_duration: 30.0,
            preload_chunks: 3,
            buffer_ahead: 2,
            buffer_behind: 1,
            crossfade_duration: 0.5,
            seamless_threshold: 0.1,
            assumed_bytes_per_second: 16_000,
            initial_volume: 0.7,
            volume_time_constant: 0.1,
            manage_interval_ms: 1000,
            progress_interval_ms: 100,
            stats_interval_ms: 5000,
            event_capacity: 256,
            preferred_device: None,
        }
    }
}

impl PlayerConfig {
    /// Check that the values describe a usable chunk window
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.chunk_duration.is_finite() || self.chunk_duration <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "chunk_duration",
                reason: format!("must be a positive number of seconds, got {}", self.chunk_duration),
            });
        }
        if self.buffer_ahead == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer_ahead",
                reason: "must keep at least one chunk ahead".to_string(),
            });
        }
        if !self.crossfade_duration.is_finite() || self.crossfade_duration < 0.0 {
            return Err(ConfigError::Invalid {
                field: "crossfade_duration",
                reason: format!("must be zero or positive, got {}", self.crossfade_duration),
            });
        }
        if self.crossfade_duration >= self.chunk_duration {
            return Err(ConfigError::Invalid {
                field: "crossfade_duration",
                reason: "must be shorter than a chunk".to_string(),
            });
        }
        if self.assumed_bytes_per_second == 0 {
            return Err(ConfigError::Invalid {
                field: "assumed_bytes_per_second",
                reason: "must be non-zero".to_string(),
            });
        }
        if !self.volume_time_constant.is_finite() || self.volume_time_constant < 0.0 {
            return Err(ConfigError::Invalid {
                field: "volume_time_constant",
                reason: format!("must be zero or positive, got {}", self.volume_time_constant),
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "event_capacity",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn manage_interval(&self) -> Option<Duration> {
        non_zero_millis(self.manage_interval_ms)
    }

    pub fn progress_interval(&self) -> Option<Duration> {
        non_zero_millis(self.progress_interval_ms)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        non_zero_millis(self.stats_interval_ms)
    }

    /// Configuration with every background loop disabled, for hosts that
    /// drive ticks themselves
    pub fn manual_ticks(self) -> Self {
        Self {
            manage_interval_ms: 0,
            progress_interval_ms: 0,
            stats_interval_ms: 0,
            ..self
        }
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: PlayerConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        let config = Self::load_config(&config_path).unwrap_or_default();

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Manager bound to an explicit file instead of the per-user location
    pub fn with_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let config = Self::load_config(&config_path)?;
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut PlayerConfig),
    {
        let mut updated = self.config.clone();
        updater(&mut updated);
        updated.validate()?;
        self.config = updated;
        self.save_config()
    }

    pub fn set_volume(&mut self, volume: f32) -> Result<(), ConfigError> {
        self.config.initial_volume = volume.clamp(0.0, 1.0);
        self.save_config()
    }

    pub fn set_preferred_device(&mut self, device: Option<String>) -> Result<(), ConfigError> {
        self.config.preferred_device = device;
        self.save_config()
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = PlayerConfig::default();
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::home_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(".config")
            .join("chunkstream");

        std::fs::create_dir_all(&config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<PlayerConfig, ConfigError> {
        if !path.exists() {
            return Ok(PlayerConfig::default());
        }

        let config_content = std::fs::read_to_string(path)?;
        let config: PlayerConfig = toml::from_str(&config_content)?;
        config.validate()?;

        Ok(config)
    }

    fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let config_content = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.config_path, config_content)?;

        Ok(())
    }
}
