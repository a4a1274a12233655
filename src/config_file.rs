//! Configuration file support
//!
//! Loads server configuration from TOML files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{AudioConfig, ExtractorConfig, PipelineCaps, PollingConfig, ServerConfig};
use crate::media::OutputCodec;

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Server settings
    pub server: ServerSettings,
    /// Duration and size caps
    pub caps: CapsSettings,
    /// Audio settings
    pub audio: AudioSettings,
    /// Transcode loop polling
    pub polling: Option<PollingSettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
    /// Limits settings
    pub limits: Option<LimitsSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: Option<bool>,
    /// Origins CORS allows (any origin when empty)
    pub cors_origins: Option<Vec<String>>,
    /// Directory for default output files
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapsSettings {
    /// Maximum output duration in seconds (omit for no limit)
    pub max_duration_secs: Option<f64>,
    /// Maximum output payload in bytes (omit for no limit)
    pub max_output_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Codec tried first when transcoding (mp3, aac)
    pub preferred_codec: OutputCodec,
    /// Codec used when the preferred encoder is missing
    pub fallback_codec: Option<OutputCodec>,
    /// Encoder bitrate in bps
    pub bitrate: u64,
    /// Try passthrough/remux before transcoding
    pub enable_fast_paths: Option<bool>,
    /// Encoder input slot size in bytes
    pub encoder_input_capacity: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    /// Bounded wait per dequeue in milliseconds
    pub poll_timeout_ms: Option<u64>,
    /// Idle iterations before the run is declared stalled
    pub stall_limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSettings {
    /// Maximum concurrent extractions
    pub max_concurrent_extractions: Option<usize>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        let defaults = ServerConfig::default();
        let extractor = &defaults.extractor;
        Self {
            server: ServerSettings {
                host: defaults.host.clone(),
                port: defaults.port,
                cors_enabled: Some(defaults.cors_enabled),
                cors_origins: Some(defaults.cors_origins.clone()),
                scratch_dir: None,
            },
            caps: CapsSettings {
                max_duration_secs: extractor.caps.max_duration_secs,
                max_output_bytes: extractor.caps.max_output_bytes,
            },
            audio: AudioSettings {
                preferred_codec: extractor.audio.preferred_codec,
                fallback_codec: Some(extractor.audio.fallback_codec),
                bitrate: extractor.audio.bitrate,
                enable_fast_paths: Some(extractor.audio.enable_fast_paths),
                encoder_input_capacity: Some(extractor.audio.encoder_input_capacity),
            },
            polling: Some(PollingSettings {
                poll_timeout_ms: Some(extractor.polling.poll_timeout_ms),
                stall_limit: Some(extractor.polling.stall_limit),
            }),
            logging: Some(LoggingSettings {
                level: defaults.log_level.clone(),
                format: Some(defaults.log_format.clone()),
            }),
            limits: Some(LimitsSettings {
                max_concurrent_extractions: Some(defaults.max_concurrent_extractions),
            }),
        }
    }

    /// Convert to ServerConfig
    pub fn into_server_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        let audio_defaults = AudioConfig::default();
        let polling_defaults = PollingConfig::default();
        let polling = self.polling.unwrap_or(PollingSettings {
            poll_timeout_ms: None,
            stall_limit: None,
        });
        let (log_level, log_format) = match self.logging {
            Some(l) => (l.level, l.format.unwrap_or(defaults.log_format)),
            None => (defaults.log_level, defaults.log_format),
        };

        ServerConfig {
            host: self.server.host,
            port: self.server.port,
            extractor: ExtractorConfig {
                caps: PipelineCaps {
                    max_duration_secs: self.caps.max_duration_secs,
                    max_output_bytes: self.caps.max_output_bytes,
                },
                audio: AudioConfig {
                    preferred_codec: self.audio.preferred_codec,
                    fallback_codec: self
                        .audio
                        .fallback_codec
                        .unwrap_or(audio_defaults.fallback_codec),
                    bitrate: self.audio.bitrate,
                    enable_fast_paths: self
                        .audio
                        .enable_fast_paths
                        .unwrap_or(audio_defaults.enable_fast_paths),
                    encoder_input_capacity: self
                        .audio
                        .encoder_input_capacity
                        .unwrap_or(audio_defaults.encoder_input_capacity),
                },
                polling: PollingConfig {
                    poll_timeout_ms: polling
                        .poll_timeout_ms
                        .unwrap_or(polling_defaults.poll_timeout_ms),
                    stall_limit: polling.stall_limit.unwrap_or(polling_defaults.stall_limit),
                },
                scratch_dir: self.server.scratch_dir,
            },
            max_concurrent_extractions: self
                .limits
                .and_then(|l| l.max_concurrent_extractions)
                .unwrap_or(defaults.max_concurrent_extractions),
            cors_enabled: self.server.cors_enabled.unwrap_or(defaults.cors_enabled),
            cors_origins: self.server.cors_origins.unwrap_or_default(),
            log_level,
            log_format,
        }
    }
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigFile::default_config();
    config.to_file(path)?;
    Ok(())
}
