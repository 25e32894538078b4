use crate::defaults;
use crate::error::ConvoError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub analysis: AnalysisConfig,
    pub finalize: FinalizeConfig,
    pub storage: StorageConfig,
    pub providers: ProvidersConfig,
    pub logging: LoggingConfig,
}

/// HTTP/WebSocket listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

/// Inbound PCM stream format and chunking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub bytes_per_sample: u16,
    pub chunk_duration_secs: f64,
}

/// Per-chunk streaming analysis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    #[serde(with = "duration_str")]
    pub chunk_timeout: Duration,
    pub max_concurrent: usize,
    pub similarity_threshold: f32,
}

/// End-of-session batch re-analysis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FinalizeConfig {
    pub similarity_threshold: f32,
}

/// Database and audio artifact locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub database: PathBuf,
    pub audio_dir: PathBuf,
}

/// Remote analysis backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvidersConfig {
    pub endpoint: Option<String>,
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::BIND_ADDR.to_string(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            bytes_per_sample: defaults::BYTES_PER_SAMPLE,
            chunk_duration_secs: defaults::CHUNK_DURATION_SECS,
        }
    }
}

impl AudioConfig {
    /// Bytes in one streaming chunk.
    pub fn chunk_size_bytes(&self) -> usize {
        defaults::chunk_size_bytes(
            self.chunk_duration_secs,
            self.sample_rate,
            self.bytes_per_sample,
        )
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            chunk_timeout: defaults::CHUNK_TIMEOUT,
            max_concurrent: defaults::MAX_CONCURRENT_ANALYSES,
            similarity_threshold: defaults::STREAMING_SIMILARITY_THRESHOLD,
        }
    }
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: defaults::FINALIZE_SIMILARITY_THRESHOLD,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from(defaults::DATABASE_PATH),
            audio_dir: PathBuf::from(defaults::AUDIO_DIR),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout: defaults::PROVIDER_REQUEST_TIMEOUT,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: defaults::LOG_FILTER.to_string(),
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
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - CONVOSCOPE_BIND → server.bind
    /// - CONVOSCOPE_DATABASE → storage.database
    /// - CONVOSCOPE_AUDIO_DIR → storage.audio_dir
    /// - CONVOSCOPE_PROVIDER_ENDPOINT → providers.endpoint
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(bind) = std::env::var("CONVOSCOPE_BIND")
            && !bind.is_empty()
        {
            self.server.bind = bind;
        }

        if let Ok(database) = std::env::var("CONVOSCOPE_DATABASE")
            && !database.is_empty()
        {
            self.storage.database = PathBuf::from(database);
        }

        if let Ok(audio_dir) = std::env::var("CONVOSCOPE_AUDIO_DIR")
            && !audio_dir.is_empty()
        {
            self.storage.audio_dir = PathBuf::from(audio_dir);
        }

        if let Ok(endpoint) = std::env::var("CONVOSCOPE_PROVIDER_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.providers.endpoint = Some(endpoint);
        }

        self
    }

    /// Reject values the streaming core cannot work with.
    pub fn validate(&self) -> Result<(), ConvoError> {
        fn invalid(key: &str, message: &str) -> ConvoError {
            ConvoError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if self.audio.bytes_per_sample == 0 {
            return Err(invalid("audio.bytes_per_sample", "must be positive"));
        }
        if !(self.audio.chunk_duration_secs > 0.0) || self.audio.chunk_size_bytes() == 0 {
            return Err(invalid(
                "audio.chunk_duration_secs",
                "must cover at least one sample",
            ));
        }
        if self.analysis.max_concurrent == 0 {
            return Err(invalid("analysis.max_concurrent", "must be at least 1"));
        }
        if self.analysis.chunk_timeout.is_zero() {
            return Err(invalid("analysis.chunk_timeout", "must be positive"));
        }
        for (key, value) in [
            (
                "analysis.similarity_threshold",
                self.analysis.similarity_threshold,
            ),
            (
                "finalize.similarity_threshold",
                self.finalize.similarity_threshold,
            ),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(invalid(key, "must be within [-1, 1]"));
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/convoscope/config.toml on Linux, or a relative
    /// `convoscope.toml` when no config directory can be determined.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("convoscope").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("convoscope.toml"))
    }
}

/// Serialize durations as humantime strings ("10s", "1m 30s").
///
/// Bare numbers are accepted as seconds.
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => {
                let text = text.trim();
                if let Ok(secs) = text.parse::<u64>() {
                    return Ok(Duration::from_secs(secs));
                }
                humantime::parse_duration(text).map_err(serde::de::Error::custom)
            }
        }
    }
}
