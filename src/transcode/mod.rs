//! Decode and encode stages of the full transcode path
//!
//! Both stages are slot-based: the caller asks for a free input slot with a
//! bounded wait, queues input into it, and polls for output with a bounded
//! wait. Absence of a slot or of output is not an error.

pub mod decoder;
pub mod downmix;
pub mod encoder;
pub mod resampler;

pub use decoder::FfmpegDecoder;
pub use downmix::downmix;
pub use encoder::FfmpegEncoder;

use bytes::Bytes;
use std::time::Duration;

use crate::error::Result;
use crate::media::{EncodedPacket, OutputCodec, PcmBuffer, SampleChunk, TrackFormat};

pub trait DecodeStage {
    /// Whether an input slot is free, waiting at most `timeout`.
    fn input_slot(&mut self, timeout: Duration) -> Result<bool>;

    /// Queue one compressed chunk into the free slot.
    fn queue_chunk(&mut self, chunk: SampleChunk) -> Result<()>;

    /// Queue the end-of-stream marker into the free slot.
    fn queue_eos(&mut self) -> Result<()>;

    /// Next decoded buffer, waiting at most `timeout`.
    fn dequeue(&mut self, timeout: Duration) -> Result<Option<PcmBuffer>>;

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait EncodeStage {
    /// Bytes of PCM the next input slot accepts, or `None` if no slot is
    /// free after waiting at most `timeout`.
    fn input_capacity(&mut self, timeout: Duration) -> Result<Option<usize>>;

    /// Queue interleaved 16-bit PCM into the free slot.
    fn queue_pcm(&mut self, pcm: Bytes, pts: i64) -> Result<()>;

    /// Queue the zero-length end-of-stream marker into the free slot.
    fn queue_eos(&mut self) -> Result<()>;

    /// Next output event, waiting at most `timeout`.
    fn dequeue(&mut self, timeout: Duration) -> Result<Option<EncoderOutput>>;

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// What an encode stage can produce
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderOutput {
    /// Output format, reported once before the first packet
    Format(TrackFormat),
    Packet(EncodedPacket),
    EndOfStream,
}

/// Parameters for opening an encode stage
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub codec: OutputCodec,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate: u64,
    /// Bytes of PCM one input slot accepts
    pub input_capacity: usize,
}
