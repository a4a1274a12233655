//! Extractor and server configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::media::{secs_to_ticks, OutputCodec};

/// Hard resource caps for one extraction run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineCaps {
    /// Maximum output duration in seconds (`None` = unbounded)
    pub max_duration_secs: Option<f64>,

    /// Maximum output payload size in bytes (`None` = unbounded)
    pub max_output_bytes: Option<u64>,
}

impl Default for PipelineCaps {
    fn default() -> Self {
        Self {
            max_duration_secs: Some(300.0),            // 5 minutes
            max_output_bytes: Some(10 * 1024 * 1024), // 10 MiB
        }
    }
}

impl PipelineCaps {
    /// No duration or size limit.
    pub fn unbounded() -> Self {
        Self {
            max_duration_secs: None,
            max_output_bytes: None,
        }
    }

    /// Maximum duration in ticks
    pub fn max_duration_ticks(&self) -> Option<i64> {
        self.max_duration_secs.map(secs_to_ticks)
    }
}

/// Audio output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Codec tried first for a full transcode
    pub preferred_codec: OutputCodec,

    /// Codec substituted when the preferred encoder is unavailable
    pub fallback_codec: OutputCodec,

    /// Encoder bitrate in bps
    pub bitrate: u64,

    /// Try passthrough/remux before transcoding
    pub enable_fast_paths: bool,

    /// Bytes of PCM one encoder input slot accepts
    pub encoder_input_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            preferred_codec: OutputCodec::Mp3,
            fallback_codec: OutputCodec::Aac,
            bitrate: 192_000,
            enable_fast_paths: true,
            encoder_input_capacity: 256 * 1024,
        }
    }
}

/// Polling behaviour of the transcode loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Bounded wait at every dequeue point, in milliseconds
    pub poll_timeout_ms: u64,

    /// Consecutive idle outer iterations tolerated before failing the run
    pub stall_limit: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 10,
            stall_limit: 100_000,
        }
    }
}

impl PollingConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Everything one `AudioExtractor` needs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub caps: PipelineCaps,
    pub audio: AudioConfig,
    pub polling: PollingConfig,
    /// Directory for default output files (system temp dir when unset)
    pub scratch_dir: Option<PathBuf>,
}

impl ExtractorConfig {
    /// Directory where outputs go when the caller names none
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if let Some(secs) = self.caps.max_duration_secs {
            if !(secs > 0.0) {
                return Err(crate::error::ExtractError::Config(format!(
                    "max_duration_secs must be positive, got {}",
                    secs
                )));
            }
        }
        if self.caps.max_output_bytes == Some(0) {
            return Err(crate::error::ExtractError::Config(
                "max_output_bytes must be positive".to_string(),
            ));
        }
        if self.audio.encoder_input_capacity < 4096 {
            return Err(crate::error::ExtractError::Config(format!(
                "encoder_input_capacity too small: {}",
                self.audio.encoder_input_capacity
            )));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Settings handed to every extraction
    pub extractor: ExtractorConfig,

    /// Extractions allowed to run at once
    pub max_concurrent_extractions: usize,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Origins CORS allows; any origin when empty
    pub cors_origins: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log output format (pretty, json)
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            extractor: ExtractorConfig::default(),
            max_concurrent_extractions: 4,
            cors_enabled: false,
            cors_origins: Vec::new(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
