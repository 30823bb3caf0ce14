//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Hardware acceleration hints ffmpeg accepts for `-hwaccel`
pub const HWACCEL_HINTS: &[&str] = &[
    "auto",
    "none",
    "cuda",
    "vaapi",
    "qsv",
    "videotoolbox",
    "d3d11va",
    "dxva2",
    "vulkan",
];

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value parsed but is not usable
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Transcoding engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Path or name of the ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Hardware acceleration hint passed as an input option (`-hwaccel`)
    #[serde(default)]
    pub hwaccel: Option<String>,
    /// Oldest ffmpeg major version accepted by the startup check
    #[serde(default = "default_min_ffmpeg_major")]
    pub min_ffmpeg_major: u32,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_min_ffmpeg_major() -> u32 {
    4
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            hwaccel: None,
            min_ffmpeg_major: default_min_ffmpeg_major(),
        }
    }
}

/// Cache and scratch directory configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CacheConfig {
    /// Waveform cache directory (platform cache dir if None)
    #[serde(default)]
    pub waveform_dir: Option<PathBuf>,
    /// Root for per-export scratch directories (system temp dir if None)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

impl CacheConfig {
    /// Resolve the waveform cache directory
    ///
    /// Falls back to `<cache_dir>/clipdeck/waveforms`, or the system temp
    /// directory when the platform has no cache directory.
    pub fn waveform_dir(&self) -> PathBuf {
        if let Some(dir) = &self.waveform_dir {
            return dir.clone();
        }
        dirs::cache_dir()
            .unwrap_or_else(env::temp_dir)
            .join("clipdeck")
            .join("waveforms")
    }

    /// Resolve the scratch root
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(env::temp_dir)
    }
}

/// Waveform extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WaveformConfig {
    /// Fixed PCM decode rate. None decodes at a rate equal to the bar count.
    #[serde(default)]
    pub decode_sample_rate: Option<u32>,
}

/// Concurrency limits for independent pipeline operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConcurrencyConfig {
    /// Number of child invocations per batch (default 8)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    8
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

/// Media stream server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Socket address to bind
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Worker pool size (0 = one per logical core)
    #[serde(default)]
    pub workers: u32,
}

fn default_bind() -> String {
    "127.0.0.1:7879".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            workers: 0,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub waveform: WaveformConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - CLIPDECK_FFMPEG_PATH -> engine.ffmpeg_path
    /// - CLIPDECK_HWACCEL -> engine.hwaccel (empty string clears it)
    /// - CLIPDECK_MIN_FFMPEG_MAJOR -> engine.min_ffmpeg_major
    /// - CLIPDECK_WAVEFORM_DIR -> cache.waveform_dir
    /// - CLIPDECK_SCRATCH_DIR -> cache.scratch_dir
    /// - CLIPDECK_WAVEFORM_DECODE_RATE -> waveform.decode_sample_rate
    /// - CLIPDECK_BATCH_SIZE -> concurrency.batch_size
    /// - CLIPDECK_SERVER_BIND -> server.bind
    /// - CLIPDECK_SERVER_WORKERS -> server.workers
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("CLIPDECK_FFMPEG_PATH") {
            if !val.is_empty() {
                self.engine.ffmpeg_path = val;
            }
        }

        if let Ok(val) = env::var("CLIPDECK_HWACCEL") {
            self.engine.hwaccel = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = env::var("CLIPDECK_MIN_FFMPEG_MAJOR") {
            if let Ok(major) = val.parse::<u32>() {
                self.engine.min_ffmpeg_major = major;
            }
        }

        if let Ok(val) = env::var("CLIPDECK_WAVEFORM_DIR") {
            if !val.is_empty() {
                self.cache.waveform_dir = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = env::var("CLIPDECK_SCRATCH_DIR") {
            if !val.is_empty() {
                self.cache.scratch_dir = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = env::var("CLIPDECK_WAVEFORM_DECODE_RATE") {
            if let Ok(rate) = val.parse::<u32>() {
                self.waveform.decode_sample_rate = Some(rate);
            }
        }

        if let Ok(val) = env::var("CLIPDECK_BATCH_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                self.concurrency.batch_size = size;
            }
        }

        if let Ok(val) = env::var("CLIPDECK_SERVER_BIND") {
            if !val.is_empty() {
                self.server.bind = val;
            }
        }

        if let Ok(val) = env::var("CLIPDECK_SERVER_WORKERS") {
            if let Ok(workers) = val.parse::<u32>() {
                self.server.workers = workers;
            }
        }
    }

    /// Reject values that parse but cannot drive the pipeline
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "concurrency.batch_size must be at least 1".to_string(),
            ));
        }

        if let Some(hint) = &self.engine.hwaccel {
            let lower = hint.to_lowercase();
            if !HWACCEL_HINTS.contains(&lower.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "unknown engine.hwaccel '{}', expected one of {}",
                    hint,
                    HWACCEL_HINTS.join(", ")
                )));
            }
        }

        if self.waveform.decode_sample_rate == Some(0) {
            return Err(ConfigError::Invalid(
                "waveform.decode_sample_rate must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a config file
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
