use crate::audio::format::AudioFormat;
use crate::defaults;
use crate::error::{KeyshiftError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub channel: ChannelConfig,
    pub export: ExportConfig,
}

/// Stretch engine and arena configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Max process size hint handed to the engine, in samples per channel.
    pub block_size: usize,
    /// Capacity of the memory arena shared with the engine.
    pub arena_bytes: usize,
}

/// Worker channel timeouts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    pub initialize_timeout_ms: u64,
    pub process_timeout_ms: u64,
}

/// Export defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    pub format: AudioFormat,
    pub bitrate: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: defaults::BLOCK_SIZE,
            arena_bytes: defaults::ARENA_BYTES,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            initialize_timeout_ms: defaults::INITIALIZE_TIMEOUT_MS,
            process_timeout_ms: defaults::PROCESS_TIMEOUT_MS,
        }
    }
}

impl ChannelConfig {
    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_millis(self.initialize_timeout_ms)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_millis(self.process_timeout_ms)
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::Wav,
            bitrate: defaults::EXPORT_BITRATE,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only a missing file falls back to defaults; invalid TOML or invalid
    /// values are errors.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                {
                    Ok(Self::default())
                } else {
                    Err(e.context(format!("Failed to load config from {}", path.display())))
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - KEYSHIFT_BLOCK_SIZE → engine.block_size
    /// - KEYSHIFT_PROCESS_TIMEOUT_MS → channel.process_timeout_ms
    /// - KEYSHIFT_EXPORT_FORMAT → export.format
    ///
    /// Unparseable values are ignored with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var("KEYSHIFT_BLOCK_SIZE")
            && !value.is_empty()
        {
            match value.parse() {
                Ok(block_size) => self.engine.block_size = block_size,
                Err(e) => tracing::warn!("ignoring KEYSHIFT_BLOCK_SIZE={value}: {e}"),
            }
        }

        if let Ok(value) = std::env::var("KEYSHIFT_PROCESS_TIMEOUT_MS")
            && !value.is_empty()
        {
            match value.parse() {
                Ok(timeout) => self.channel.process_timeout_ms = timeout,
                Err(e) => tracing::warn!("ignoring KEYSHIFT_PROCESS_TIMEOUT_MS={value}: {e}"),
            }
        }

        if let Ok(value) = std::env::var("KEYSHIFT_EXPORT_FORMAT")
            && !value.is_empty()
        {
            match value.parse() {
                Ok(format) => self.export.format = format,
                Err(e) => tracing::warn!("ignoring KEYSHIFT_EXPORT_FORMAT={value}: {e}"),
            }
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.engine.block_size == 0 {
            return Err(KeyshiftError::invalid(
                "engine.block_size",
                "must be greater than zero",
            ));
        }
        if self.engine.arena_bytes == 0 || self.engine.arena_bytes > u32::MAX as usize {
            return Err(KeyshiftError::invalid(
                "engine.arena_bytes",
                format!("must be between 1 and {}", u32::MAX),
            ));
        }
        if self.channel.initialize_timeout_ms == 0 {
            return Err(KeyshiftError::invalid(
                "channel.initialize_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.channel.process_timeout_ms == 0 {
            return Err(KeyshiftError::invalid(
                "channel.process_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/keyshift/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keyshift")
            .join("config.toml")
    }
}
