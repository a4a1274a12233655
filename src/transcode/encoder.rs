//! Audio encode stage
//!
//! Wraps an FFmpeg `AVCodecContext` to encode interleaved 16-bit PCM into MP3
//! or AAC-LC packets. Input is buffered and re-chunked to the codec frame
//! size; the output format is reported once before the first packet.

use bytes::{Bytes, BytesMut};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::{Sample, Type};
use std::time::Duration;

use super::{EncodeStage, EncoderOutput, EncoderSettings};
use crate::error::{ExtractError, FfmpegError, Result};
use crate::ffmpeg::helpers::{
    audio_plane_data_mut, encoder_codec_parameters, fltp_plane_as_f32_mut,
    track_format_from_parameters,
};
use crate::ffmpeg::utils::to_ticks;
use crate::media::{EncodedPacket, OutputCodec, PCM_BYTES_PER_SAMPLE};

/// Sample format fed to the encoder (accepted by both libmp3lame and the
/// native AAC encoder)
pub const ENCODER_SAMPLE_FMT: Sample = Sample::F32(Type::Planar);

/// Encode stage backed by a real FFmpeg codec context
pub struct FfmpegEncoder {
    encoder: ffmpeg::encoder::Audio,
    codec: OutputCodec,
    layout: ChannelLayout,
    channels: u16,
    sample_rate: u32,
    frame_size: usize,
    time_base: ffmpeg::Rational,
    /// Interleaved S16 waiting to fill a whole codec frame
    fifo: BytesMut,
    input_capacity: usize,
    /// Next frame pts in samples
    pts: i64,
    format_reported: bool,
    eos_queued: bool,
    eos_sent: bool,
    finished: bool,
}

impl FfmpegEncoder {
    /// Open an encoder with the given settings.
    pub fn open(settings: &EncoderSettings) -> Result<Self> {
        let encoder_codec = codec::encoder::find(settings.codec.codec_id()).ok_or_else(|| {
            ExtractError::Ffmpeg(FfmpegError::EncoderNotFound(format!(
                "{} encoder not found in this FFmpeg build",
                settings.codec
            )))
        })?;

        let channels = settings.channels.clamp(1, 2);
        let layout = if channels == 1 {
            ChannelLayout::MONO
        } else {
            ChannelLayout::STEREO
        };
        let time_base = ffmpeg::Rational::new(1, settings.sample_rate as i32);

        // Build context and configure the audio encoder BEFORE opening
        let mut context = codec::Context::new_with_codec(encoder_codec);
        context.set_time_base(time_base);
        if settings.codec.sink_kind() == crate::media::SinkKind::Container {
            // MP4 wants the AudioSpecificConfig in extradata, not in-band
            context.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut audio_enc = context.encoder().audio().map_err(|e| {
            ExtractError::Ffmpeg(FfmpegError::EncoderCreate(format!(
                "cannot get {} encoder handle: {}",
                settings.codec, e
            )))
        })?;

        audio_enc.set_rate(settings.sample_rate as i32);
        audio_enc.set_format(ENCODER_SAMPLE_FMT);
        audio_enc.set_channel_layout(layout);
        audio_enc.set_bit_rate(settings.bit_rate as usize);

        let encoder = audio_enc.open_as(encoder_codec).map_err(|e| {
            ExtractError::Ffmpeg(FfmpegError::EncoderCreate(format!(
                "failed to open {} encoder: {}",
                settings.codec, e
            )))
        })?;

        let frame_size = match encoder.frame_size() as usize {
            0 => default_frame_size(settings.codec),
            n => n,
        };
        let frame_bytes = frame_size * channels as usize * PCM_BYTES_PER_SAMPLE;

        tracing::debug!(
            codec = %settings.codec,
            sample_rate = settings.sample_rate,
            channels,
            bit_rate = settings.bit_rate,
            frame_size,
            "Encoder opened"
        );

        Ok(Self {
            encoder,
            codec: settings.codec,
            layout,
            channels,
            sample_rate: settings.sample_rate,
            frame_size,
            time_base,
            fifo: BytesMut::new(),
            input_capacity: settings.input_capacity.max(frame_bytes),
            pts: 0,
            format_reported: false,
            eos_queued: false,
            eos_sent: false,
            finished: false,
        })
    }

    fn frame_bytes(&self) -> usize {
        self.frame_size * self.channels as usize * PCM_BYTES_PER_SAMPLE
    }

    /// Build one frame from the front of the fifo (at most `frame_size` samples).
    fn next_frame(&mut self) -> Result<ffmpeg::util::frame::Audio> {
        let channels = self.channels as usize;
        let frame_len = self.frame_bytes().min(self.fifo.len());
        let samples = frame_len / (channels * PCM_BYTES_PER_SAMPLE);
        let pcm = self.fifo.split_to(samples * channels * PCM_BYTES_PER_SAMPLE);

        let mut frame = ffmpeg::util::frame::Audio::new(ENCODER_SAMPLE_FMT, samples, self.layout);
        frame.set_rate(self.sample_rate);
        frame.set_pts(Some(self.pts));
        self.pts += samples as i64;

        for ch in 0..channels {
            let plane = fltp_plane_as_f32_mut(audio_plane_data_mut(&mut frame, ch), samples)
                .ok_or_else(|| {
                    ExtractError::Ffmpeg(FfmpegError::EncodeFrame(format!(
                        "frame plane {} is not a valid f32 plane",
                        ch
                    )))
                })?;
            for (i, out) in plane.iter_mut().enumerate() {
                let at = (i * channels + ch) * PCM_BYTES_PER_SAMPLE;
                let s = i16::from_le_bytes([pcm[at], pcm[at + 1]]);
                *out = s as f32 / 32768.0;
            }
        }
        Ok(frame)
    }

    fn send_frame(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<()> {
        self.encoder.send_frame(frame).map_err(|e| {
            ExtractError::Ffmpeg(FfmpegError::EncodeFrame(format!(
                "{} send_frame error: {}",
                self.codec, e
            )))
        })
    }

    /// Receive one encoded packet, or `None` if the encoder needs more input
    /// or has finished (`finished` tells which).
    fn receive_packet(&mut self) -> Result<Option<EncodedPacket>> {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        match self.encoder.receive_packet(&mut packet) {
            Ok(()) => {
                let pts = packet.pts().or(packet.dts()).unwrap_or(0);
                Ok(Some(EncodedPacket {
                    data: Bytes::copy_from_slice(packet.data().unwrap_or(&[])),
                    pts: to_ticks(pts, self.time_base),
                    duration: to_ticks(packet.duration().max(0), self.time_base),
                    keyframe: packet.is_key(),
                }))
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(None),
            Err(ffmpeg::Error::Eof) => {
                self.finished = true;
                Ok(None)
            }
            Err(e) => Err(ExtractError::Ffmpeg(FfmpegError::EncodeFrame(format!(
                "{} receive_packet error: {}",
                self.codec, e
            )))),
        }
    }

    fn send_eof(&mut self) -> Result<()> {
        match self.encoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(ExtractError::Ffmpeg(FfmpegError::EncodeFrame(format!(
                "{} send_eof error: {}",
                self.codec, e
            )))),
        }
    }
}

impl EncodeStage for FfmpegEncoder {
    fn input_capacity(&mut self, _timeout: Duration) -> Result<Option<usize>> {
        if self.eos_queued {
            return Ok(None);
        }
        let free = self.input_capacity.saturating_sub(self.fifo.len());
        if free < self.frame_bytes() {
            return Ok(None);
        }
        Ok(Some(free))
    }

    fn queue_pcm(&mut self, pcm: Bytes, _pts: i64) -> Result<()> {
        if self.eos_queued {
            return Err(ExtractError::ProtocolViolation(
                "encoder input queued after end of stream".to_string(),
            ));
        }
        if self.fifo.len() + pcm.len() > self.input_capacity {
            return Err(ExtractError::ProtocolViolation(format!(
                "encoder input of {} bytes exceeds the free slot",
                pcm.len()
            )));
        }
        self.fifo.extend_from_slice(&pcm);
        Ok(())
    }

    fn queue_eos(&mut self) -> Result<()> {
        self.eos_queued = true;
        Ok(())
    }

    fn dequeue(&mut self, _timeout: Duration) -> Result<Option<EncoderOutput>> {
        if !self.format_reported {
            self.format_reported = true;
            let params = encoder_codec_parameters(&self.encoder);
            return Ok(Some(EncoderOutput::Format(track_format_from_parameters(
                &params,
            ))));
        }

        loop {
            if self.finished {
                return Ok(None);
            }
            if let Some(packet) = self.receive_packet()? {
                return Ok(Some(EncoderOutput::Packet(packet)));
            }
            if self.finished {
                return Ok(Some(EncoderOutput::EndOfStream));
            }

            if self.fifo.len() >= self.frame_bytes() {
                let frame = self.next_frame()?;
                self.send_frame(&frame)?;
            } else if self.eos_queued && !self.eos_sent {
                if !self.fifo.is_empty() {
                    // Short last frame
                    let frame = self.next_frame()?;
                    self.send_frame(&frame)?;
                }
                self.send_eof()?;
                self.eos_sent = true;
            } else {
                return Ok(None);
            }
        }
    }
}

fn default_frame_size(codec: OutputCodec) -> usize {
    match codec {
        OutputCodec::Mp3 => 1152,
        OutputCodec::Aac => 1024,
    }
}

/// Check whether the FFmpeg build includes an encoder for `codec`.
pub fn is_encoder_available(codec: OutputCodec) -> bool {
    crate::ffmpeg::helpers::encoder_exists(codec.codec_id())
}
