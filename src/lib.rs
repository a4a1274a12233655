//! Capped audio extraction
//!
//! Pulls the first audio track out of any container FFmpeg can read and
//! writes it as MP3 (or AAC in MPEG-4 when no MP3 encoder exists), bounded by
//! a maximum duration and output size. MP3 sources are copied byte for byte,
//! AAC sources are remuxed, everything else is decoded, downmixed to at most
//! two channels and re-encoded.

pub mod config;
pub mod config_file;
pub mod demux;
pub mod error;
pub mod ffmpeg;
pub mod host;
pub mod http;
pub mod media;
pub mod pipeline;
pub mod sink;
pub mod transcode;


pub use config::{ExtractorConfig, PipelineCaps, ServerConfig};
pub use error::{ExtractError, FailureKind, Result};
pub use media::OutputCodec;
pub use pipeline::{AudioExtractor, CancelFlag, ExtractRequest, ExtractionOutcome, Strategy};
