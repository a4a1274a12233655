//! Media data model shared by every pipeline stage
//!
//! - `Track`: the selected audio track and its codec description
//! - `SampleChunk`: one compressed sample read from the container
//! - `PcmBuffer`: decoded interleaved 16-bit PCM on its way to the encoder
//! - `EncodedPacket`: one compressed output sample on its way to the sink
//!
//! All timestamps are ticks of `1 / TICKS_PER_SECOND` seconds.

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use serde::{Deserialize, Serialize};

/// Tick unit used for every timestamp in the pipeline (microseconds)
pub const TICKS_PER_SECOND: i64 = 1_000_000;

/// Bytes per interleaved PCM sample handed from decoder to encoder
pub const PCM_BYTES_PER_SAMPLE: usize = 2;

/// Default upper bound for a single compressed input sample
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 256 * 1024;

/// Timebase matching `TICKS_PER_SECOND`
pub fn ticks_time_base() -> ffmpeg::Rational {
    ffmpeg::Rational::new(1, TICKS_PER_SECOND as i32)
}

/// Convert a duration in seconds to ticks.
pub fn secs_to_ticks(secs: f64) -> i64 {
    (secs * TICKS_PER_SECOND as f64).round() as i64
}

/// Codec description of a track, enough to open a decoder or a container stream.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackFormat {
    pub codec_id: ffmpeg::codec::Id,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate: u64,
    /// Samples per channel per compressed frame (0 if variable/unknown)
    pub frame_size: u32,
    pub block_align: u32,
    pub bits_per_coded_sample: u32,
    /// Codec-specific setup bytes (e.g. AudioSpecificConfig for AAC)
    pub extradata: Option<Bytes>,
}

impl TrackFormat {
    /// A bare description with only the essentials filled in.
    pub fn audio(codec_id: ffmpeg::codec::Id, sample_rate: u32, channels: u16) -> Self {
        Self {
            codec_id,
            sample_rate,
            channels,
            bit_rate: 0,
            frame_size: 0,
            block_align: 0,
            bits_per_coded_sample: 0,
            extradata: None,
        }
    }
}

/// The selected audio track. Immutable once selected.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// Stream index inside the container
    pub index: usize,
    pub format: TrackFormat,
    /// Declared duration in ticks (0 if the container does not say)
    pub duration_ticks: i64,
    /// Largest compressed sample the reader may hand out
    pub max_chunk_size: usize,
}

impl Track {
    pub fn codec_id(&self) -> ffmpeg::codec::Id {
        self.format.codec_id
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.format.channels
    }
}

/// One compressed sample read from the container.
///
/// Owned by exactly one stage at a time; handing it on moves it.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleChunk {
    pub payload: Bytes,
    /// Presentation timestamp in ticks, relative to the track start
    pub pts: i64,
    /// Duration in ticks (0 if unknown)
    pub duration: i64,
    pub keyframe: bool,
    pub track_index: usize,
}

impl SampleChunk {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Interleaved signed 16-bit little-endian PCM produced by a decode stage.
///
/// `data` is consumed from the front as it is forwarded to the encoder, so a
/// partially forwarded buffer keeps only what is left.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub data: Bytes,
    pub pts: i64,
    pub channels: u16,
    pub sample_rate: u32,
    /// The decoder has nothing more after this buffer
    pub end_of_stream: bool,
}

impl PcmBuffer {
    /// An empty buffer flagged end-of-stream.
    pub fn end_of_stream(pts: i64, channels: u16, sample_rate: u32) -> Self {
        Self {
            data: Bytes::new(),
            pts,
            channels,
            sample_rate,
            end_of_stream: true,
        }
    }

    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * PCM_BYTES_PER_SAMPLE
    }
}

/// One compressed output sample.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPacket {
    pub data: Bytes,
    pub pts: i64,
    pub duration: i64,
    pub keyframe: bool,
}

impl EncodedPacket {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<SampleChunk> for EncodedPacket {
    fn from(chunk: SampleChunk) -> Self {
        Self {
            data: chunk.payload,
            pts: chunk.pts,
            duration: chunk.duration,
            keyframe: chunk.keyframe,
        }
    }
}

/// How an output codec is stored on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// Bare elementary stream written byte-for-byte
    RawStream,
    /// Formatted container (MPEG-4)
    Container,
}

/// Audio codecs this crate can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCodec {
    Mp3,
    Aac,
}

impl OutputCodec {
    pub fn codec_id(self) -> ffmpeg::codec::Id {
        match self {
            OutputCodec::Mp3 => ffmpeg::codec::Id::MP3,
            OutputCodec::Aac => ffmpeg::codec::Id::AAC,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputCodec::Mp3 => "audio/mpeg",
            OutputCodec::Aac => "audio/mp4",
        }
    }

    /// Canonical file extension, including the dot
    pub fn extension(self) -> &'static str {
        match self {
            OutputCodec::Mp3 => ".mp3",
            OutputCodec::Aac => ".m4a",
        }
    }

    pub fn sink_kind(self) -> SinkKind {
        match self {
            OutputCodec::Mp3 => SinkKind::RawStream,
            OutputCodec::Aac => SinkKind::Container,
        }
    }

    pub fn from_codec_id(codec_id: ffmpeg::codec::Id) -> Option<Self> {
        match codec_id {
            ffmpeg::codec::Id::MP3 => Some(OutputCodec::Mp3),
            ffmpeg::codec::Id::AAC => Some(OutputCodec::Aac),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutputCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputCodec::Mp3 => write!(f, "mp3"),
            OutputCodec::Aac => write!(f, "aac"),
        }
    }
}
