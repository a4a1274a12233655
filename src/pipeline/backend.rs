//! Factories for the stages of one run

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::demux::{ContainerReader, FfmpegReader};
use crate::error::Result;
use crate::media::Track;
use crate::sink::{FfmpegMuxer, Muxer};
use crate::transcode::{DecodeStage, EncodeStage, EncoderSettings, FfmpegDecoder, FfmpegEncoder};

/// Opens every resource a run acquires
pub trait Backend: Send + Sync {
    fn open_reader(&self, path: &Path) -> Result<Box<dyn ContainerReader>>;
    fn open_decoder(&self, track: &Track) -> Result<Box<dyn DecodeStage>>;
    fn open_encoder(&self, settings: &EncoderSettings) -> Result<Box<dyn EncodeStage>>;
    fn open_raw_writer(&self, path: &Path) -> Result<Box<dyn Write>>;
    fn open_muxer(&self, path: &Path) -> Result<Box<dyn Muxer>>;
}

/// The production backend
#[derive(Debug, Clone, Copy)]
pub struct FfmpegBackend {
    _private: (),
}

impl FfmpegBackend {
    /// Initialize FFmpeg (once per process) and return the backend.
    pub fn new() -> Result<Self> {
        crate::ffmpeg::init()?;
        Ok(Self { _private: () })
    }
}

impl Backend for FfmpegBackend {
    fn open_reader(&self, path: &Path) -> Result<Box<dyn ContainerReader>> {
        Ok(Box::new(FfmpegReader::open(path)?))
    }

    fn open_decoder(&self, track: &Track) -> Result<Box<dyn DecodeStage>> {
        Ok(Box::new(FfmpegDecoder::open(track)?))
    }

    fn open_encoder(&self, settings: &EncoderSettings) -> Result<Box<dyn EncodeStage>> {
        Ok(Box::new(FfmpegEncoder::open(settings)?))
    }

    fn open_raw_writer(&self, path: &Path) -> Result<Box<dyn Write>> {
        Ok(Box::new(BufWriter::new(File::create(path)?)))
    }

    fn open_muxer(&self, path: &Path) -> Result<Box<dyn Muxer>> {
        Ok(Box::new(FfmpegMuxer::create(path)?))
    }
}
