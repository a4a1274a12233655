use serde::Serialize;
use thiserror::Error;

/// Main error type for an extraction run
#[derive(Error, Debug)]
pub enum ExtractError {
    /// An error originating from the underlying FFmpeg library
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    /// A standard I/O error on the source or destination
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The input could not be resolved to a readable local file
    #[error("Input not found: {0}")]
    InputNotFound(String),

    /// The container holds no audio track
    #[error("No audio track found")]
    NoAudioTrack,

    /// A bypass strategy failed; the run falls back to a full transcode
    #[error("Fast path {strategy} aborted: {reason}")]
    FastPathAborted {
        strategy: &'static str,
        reason: String,
    },

    /// The requested encoder is not available in this FFmpeg build
    #[error("Codec unavailable: {0}")]
    CodecUnavailable(String),

    /// Internal sequencing error between pipeline stages
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The requested output path lies outside the allowed directory
    #[error("Output path not allowed: {0}")]
    OutputNotAllowed(String),

    /// The host asked the run to stop
    #[error("Extraction cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The background worker died before reporting a result
    #[error("Worker failed: {0}")]
    Worker(String),
}

/// FFmpeg-specific errors
#[derive(Error, Debug)]
pub enum FfmpegError {
    /// Failure during global FFmpeg initialization
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    /// Failure opening an input media file
    #[error("Failed to open input file: {0}")]
    OpenInput(String),

    /// The requested decoder for a specific codec ID was not found
    #[error("Failed to find decoder: codec_id={0}")]
    DecoderNotFound(String),

    /// The requested encoder for a specific codec ID was not found
    #[error("Failed to find encoder: codec_id={0}")]
    EncoderNotFound(String),

    /// Failure opening a configured encoder
    #[error("Failed to create encoder: {0}")]
    EncoderCreate(String),

    /// Failure creating an audio resampler
    #[error("Failed to create resampler: {0}")]
    ResamplerCreate(String),

    /// Failure creating an output format muxer
    #[error("Failed to create muxer: {0}")]
    MuxerCreate(String),

    /// Failure writing the container header
    #[error("Failed to write header: {0}")]
    WriteHeader(String),

    /// Failure writing a media packet to the container
    #[error("Failed to write packet: {0}")]
    WritePacket(String),

    /// Failure writing the container trailer
    #[error("Failed to write trailer: {0}")]
    WriteTrailer(String),

    /// Failure decoding a single packet into a frame
    #[error("Failed to decode packet: {0}")]
    DecodePacket(String),

    /// Failure encoding a single frame into a packet
    #[error("Failed to encode frame: {0}")]
    EncodeFrame(String),

    /// Failure reading a single packet from the input context
    #[error("Failed to read frame: {0}")]
    ReadFrame(String),

    /// Failure configuring stream contexts or parameters
    #[error("Stream configuration failed: {0}")]
    StreamConfig(String),
}

/// Failure taxonomy reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    NoAudioTrack,
    FastPathAborted,
    CodecUnavailable,
    ProtocolViolation,
    IoFailure,
    /// Progress observer panicked; logged, never returned
    ObservationFailure,
    OutputNotAllowed,
    Cancelled,
    Config,
}

impl ExtractError {
    /// Classify this error for the completion contract.
    pub fn kind(&self) -> FailureKind {
        match self {
            ExtractError::InputNotFound(_) => FailureKind::NotFound,
            ExtractError::NoAudioTrack => FailureKind::NoAudioTrack,
            ExtractError::FastPathAborted { .. } => FailureKind::FastPathAborted,
            ExtractError::CodecUnavailable(_) => FailureKind::CodecUnavailable,
            ExtractError::Ffmpeg(FfmpegError::EncoderNotFound(_))
            | ExtractError::Ffmpeg(FfmpegError::EncoderCreate(_)) => {
                FailureKind::CodecUnavailable
            }
            ExtractError::ProtocolViolation(_) | ExtractError::Worker(_) => {
                FailureKind::ProtocolViolation
            }
            ExtractError::OutputNotAllowed(_) => FailureKind::OutputNotAllowed,
            ExtractError::Cancelled => FailureKind::Cancelled,
            ExtractError::Config(_) => FailureKind::Config,
            ExtractError::Ffmpeg(_) | ExtractError::Io(_) => FailureKind::IoFailure,
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ExtractError>;
