//! Output sinks
//!
//! Two forms:
//! - `RawStreamSink`: bare elementary stream (MP3), bytes written verbatim
//! - `ContainerWriter`: formatted container (MPEG-4) driven through a `Muxer`
//!
//! The container writer accepts exactly one format initialization, after which
//! it starts; samples written before that, or a second initialization, are
//! protocol violations.

pub mod muxer;

pub use muxer::FfmpegMuxer;

use std::io::Write;

use crate::error::{ExtractError, Result};
use crate::media::{EncodedPacket, SinkKind, TrackFormat};

/// Container multiplexer for a single audio track
pub trait Muxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn write_sample(&mut self, packet: &EncodedPacket) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Created,
    Started,
    Finished,
}

/// Container writer with a one-shot initialization
pub struct ContainerWriter {
    muxer: Box<dyn Muxer>,
    state: WriterState,
}

impl ContainerWriter {
    pub fn new(muxer: Box<dyn Muxer>) -> Self {
        Self {
            muxer,
            state: WriterState::Created,
        }
    }

    /// Add the track described by `format` and start the container.
    pub fn initialize(&mut self, format: &TrackFormat) -> Result<()> {
        if self.state != WriterState::Created {
            return Err(ExtractError::ProtocolViolation(
                "container writer initialized twice".to_string(),
            ));
        }
        self.muxer.add_track(format)?;
        self.muxer.start()?;
        self.state = WriterState::Started;
        Ok(())
    }

    pub fn write(&mut self, packet: &EncodedPacket) -> Result<()> {
        if self.state != WriterState::Started {
            return Err(ExtractError::ProtocolViolation(
                "container writer has not started".to_string(),
            ));
        }
        self.muxer.write_sample(packet)
    }

    /// Finalize the container. A writer that never started has nothing to
    /// finalize.
    pub fn finish(&mut self) -> Result<()> {
        if self.state == WriterState::Started {
            self.state = WriterState::Finished;
            return self.muxer.finish();
        }
        self.state = WriterState::Finished;
        Ok(())
    }
}

/// Byte sink for a bare elementary stream
pub struct RawStreamSink {
    writer: Box<dyn Write>,
    configured: bool,
}

impl RawStreamSink {
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self {
            writer,
            configured: false,
        }
    }

    pub fn configure(&mut self, format: &TrackFormat) -> Result<()> {
        if self.configured {
            return Err(ExtractError::ProtocolViolation(
                "raw sink configured twice".to_string(),
            ));
        }
        tracing::debug!(codec = ?format.codec_id, "Raw stream sink configured");
        self.configured = true;
        Ok(())
    }

    pub fn write(&mut self, packet: &EncodedPacket) -> Result<()> {
        self.writer.write_all(&packet.data)?;
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Where encoded or copied samples end up
pub enum OutputSink {
    Raw(RawStreamSink),
    Container(ContainerWriter),
}

impl OutputSink {
    pub fn kind(&self) -> SinkKind {
        match self {
            OutputSink::Raw(_) => SinkKind::RawStream,
            OutputSink::Container(_) => SinkKind::Container,
        }
    }

    /// Apply the output format. Allowed once.
    pub fn configure(&mut self, format: &TrackFormat) -> Result<()> {
        match self {
            OutputSink::Raw(sink) => sink.configure(format),
            OutputSink::Container(writer) => writer.initialize(format),
        }
    }

    pub fn write(&mut self, packet: &EncodedPacket) -> Result<()> {
        match self {
            OutputSink::Raw(sink) => sink.write(packet),
            OutputSink::Container(writer) => writer.write(packet),
        }
    }

    pub fn finish(&mut self) -> Result<()> {
        match self {
            OutputSink::Raw(sink) => sink.finish(),
            OutputSink::Container(writer) => writer.finish(),
        }
    }
}
