//! Sample format conversion for decoded frames
//!
//! Converts whatever the decoder produces to interleaved signed 16-bit PCM,
//! keeping the source rate and channel layout.

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::resampling;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::{Sample, Type};

use crate::error::{ExtractError, FfmpegError, Result};
use crate::media::PCM_BYTES_PER_SAMPLE;

/// Sample format handed from the decode stage to the encode stage
pub const PCM_SAMPLE_FORMAT: Sample = Sample::I16(Type::Packed);

/// Wraps FFmpeg's `SwrContext` for frame-by-frame conversion to packed S16
pub struct PcmConverter {
    context: resampling::Context,
    channels: u16,
}

impl PcmConverter {
    /// Create a converter for frames shaped like `src_frame`.
    pub fn new(src_frame: &ffmpeg::util::frame::Audio) -> Result<Self> {
        let layout = frame_layout(src_frame);

        let context = resampling::Context::get(
            src_frame.format(),
            layout,
            src_frame.rate(),
            PCM_SAMPLE_FORMAT,
            layout,
            src_frame.rate(),
        )
        .map_err(|e| {
            ExtractError::Ffmpeg(FfmpegError::ResamplerCreate(format!(
                "{:?} -> s16 at {} Hz: {}",
                src_frame.format(),
                src_frame.rate(),
                e
            )))
        })?;

        Ok(Self {
            context,
            channels: layout.channels().max(1) as u16,
        })
    }

    /// Convert one frame to interleaved S16 bytes.
    pub fn convert(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<Bytes> {
        let mut out = ffmpeg::util::frame::Audio::empty();
        self.context.run(frame, &mut out).map_err(|e| {
            ExtractError::Ffmpeg(FfmpegError::DecodePacket(format!(
                "sample conversion error: {}",
                e
            )))
        })?;
        Ok(self.packed_bytes(&out))
    }

    /// Drain samples still buffered inside the converter.
    pub fn flush(&mut self) -> Bytes {
        let mut out = ffmpeg::util::frame::Audio::empty();
        match self.context.flush(&mut out) {
            Ok(_) => self.packed_bytes(&out),
            Err(e) => {
                // Nothing buffered when rates match
                tracing::debug!("Converter flush returned non-fatal error: {}", e);
                Bytes::new()
            }
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    fn packed_bytes(&self, out: &ffmpeg::util::frame::Audio) -> Bytes {
        if out.samples() == 0 {
            return Bytes::new();
        }
        let len = out.samples() * self.channels as usize * PCM_BYTES_PER_SAMPLE;
        let data = out.data(0);
        Bytes::copy_from_slice(&data[..len.min(data.len())])
    }
}

/// Whether `frame` is already interleaved S16.
pub fn is_packed_s16(frame: &ffmpeg::util::frame::Audio) -> bool {
    frame.format() == PCM_SAMPLE_FORMAT
}

/// Copy an already-packed S16 frame out as bytes.
pub fn packed_s16_bytes(frame: &ffmpeg::util::frame::Audio) -> Bytes {
    let len = frame.samples() * frame.channels().max(1) as usize * PCM_BYTES_PER_SAMPLE;
    let data = frame.data(0);
    Bytes::copy_from_slice(&data[..len.min(data.len())])
}

/// Channel layout of a frame, guessed from the channel count when unset.
fn frame_layout(frame: &ffmpeg::util::frame::Audio) -> ChannelLayout {
    if frame.channel_layout().bits() != 0 {
        return frame.channel_layout();
    }
    default_layout(frame.channels().max(1) as u16)
}

/// FFmpeg's default layout for `channels` channels. Counts without a named
/// layout take the first `channels` speaker positions.
fn default_layout(channels: u16) -> ChannelLayout {
    match channels {
        1 => ChannelLayout::MONO,
        2 => ChannelLayout::STEREO,
        3 => ChannelLayout::SURROUND,
        4 => ChannelLayout::_4POINT0,
        5 => ChannelLayout::_5POINT0_BACK,
        6 => ChannelLayout::_5POINT1_BACK,
        7 => ChannelLayout::_6POINT1_BACK,
        8 => ChannelLayout::_7POINT1,
        n => ChannelLayout::from_bits_truncate(u64::MAX >> (64 - n.clamp(1, 63) as u32)),
    }
}
