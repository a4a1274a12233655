//! Audio decode stage
//!
//! Wraps an FFmpeg `AVCodecContext` to decode compressed chunks (MP3, AAC,
//! AC-3, Opus, FLAC, PCM variants, ...) into interleaved 16-bit PCM.

use ffmpeg_next as ffmpeg;
use std::time::Duration;

use super::resampler::{is_packed_s16, packed_s16_bytes, PcmConverter};
use super::DecodeStage;
use crate::error::{ExtractError, FfmpegError, Result};
use crate::ffmpeg::helpers::parameters_from_track_format;
use crate::media::{ticks_time_base, PcmBuffer, SampleChunk, Track, TICKS_PER_SECOND};

/// Decode stage backed by a FFmpeg codec context
pub struct FfmpegDecoder {
    decoder: ffmpeg::decoder::Audio,
    /// Packet the decoder refused until more output is drained
    pending: Option<ffmpeg::codec::packet::Packet>,
    converter: Option<PcmConverter>,
    eos_queued: bool,
    eos_sent: bool,
    finished: bool,
    /// Timestamp following the last buffer handed out
    next_pts: i64,
    channels: u16,
    sample_rate: u32,
}

impl FfmpegDecoder {
    /// Open a decoder for `track`.
    pub fn open(track: &Track) -> Result<Self> {
        let params = parameters_from_track_format(&track.format);
        let mut context = ffmpeg::codec::Context::from_parameters(params).map_err(|e| {
            ExtractError::Ffmpeg(FfmpegError::DecoderNotFound(format!(
                "{:?}: failed to create codec context: {}",
                track.codec_id(),
                e
            )))
        })?;
        // Chunks carry tick timestamps
        context.set_time_base(ticks_time_base());

        let decoder = context.decoder().audio().map_err(|e| {
            ExtractError::Ffmpeg(FfmpegError::DecoderNotFound(format!(
                "{:?}: failed to open audio decoder: {}",
                track.codec_id(),
                e
            )))
        })?;

        Ok(Self {
            decoder,
            pending: None,
            converter: None,
            eos_queued: false,
            eos_sent: false,
            finished: false,
            next_pts: 0,
            channels: track.channels().max(1),
            sample_rate: track.sample_rate(),
        })
    }

    /// Push whatever input is waiting. Returns true if the decoder accepted
    /// something.
    fn push_input(&mut self) -> Result<bool> {
        if let Some(packet) = self.pending.take() {
            return match self.decoder.send_packet(&packet) {
                Ok(()) => Ok(true),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    self.pending = Some(packet);
                    Ok(false)
                }
                Err(ffmpeg::Error::InvalidData) => {
                    tracing::debug!("send_packet: skipping invalid packet");
                    Ok(true)
                }
                Err(e) => Err(ExtractError::Ffmpeg(FfmpegError::DecodePacket(format!(
                    "send_packet error: {}",
                    e
                )))),
            };
        }

        if self.eos_queued && !self.eos_sent {
            return match self.decoder.send_eof() {
                Ok(()) | Err(ffmpeg::Error::Eof) => {
                    self.eos_sent = true;
                    Ok(true)
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(false),
                Err(e) => Err(ExtractError::Ffmpeg(FfmpegError::DecodePacket(format!(
                    "send_eof error: {}",
                    e
                )))),
            };
        }

        Ok(false)
    }

    fn to_pcm(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<PcmBuffer> {
        let data = if is_packed_s16(frame) {
            self.channels = frame.channels().max(1);
            packed_s16_bytes(frame)
        } else {
            if self.converter.is_none() {
                tracing::debug!(
                    sample_rate = frame.rate(),
                    channels = frame.channels(),
                    format = ?frame.format(),
                    "Creating PCM converter from first frame"
                );
                let converter = PcmConverter::new(frame)?;
                self.channels = converter.channels();
                self.converter = Some(converter);
            }
            match self.converter.as_mut() {
                Some(converter) => converter.convert(frame)?,
                None => bytes::Bytes::new(),
            }
        };
        if frame.rate() > 0 {
            self.sample_rate = frame.rate();
        }

        let pts = frame.pts().unwrap_or(self.next_pts);
        let frames = data.len() / (self.channels as usize * 2);
        self.next_pts = pts + self.samples_to_ticks(frames);

        Ok(PcmBuffer {
            data,
            pts,
            channels: self.channels,
            sample_rate: self.sample_rate,
            end_of_stream: false,
        })
    }

    fn samples_to_ticks(&self, samples: usize) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        samples as i64 * TICKS_PER_SECOND / self.sample_rate as i64
    }

    fn end_of_stream(&mut self) -> PcmBuffer {
        self.finished = true;
        let mut buffer = PcmBuffer::end_of_stream(self.next_pts, self.channels, self.sample_rate);
        if let Some(converter) = self.converter.as_mut() {
            buffer.data = converter.flush();
        }
        buffer
    }
}

impl DecodeStage for FfmpegDecoder {
    fn input_slot(&mut self, _timeout: Duration) -> Result<bool> {
        Ok(self.pending.is_none() && !self.eos_queued)
    }

    fn queue_chunk(&mut self, chunk: SampleChunk) -> Result<()> {
        if self.pending.is_some() || self.eos_queued {
            return Err(ExtractError::ProtocolViolation(
                "decoder input queued without a free slot".to_string(),
            ));
        }

        let mut packet = ffmpeg::codec::packet::Packet::copy(&chunk.payload);
        packet.set_pts(Some(chunk.pts));
        packet.set_dts(Some(chunk.pts));
        packet.set_duration(chunk.duration);
        if chunk.keyframe {
            packet.set_flags(ffmpeg::codec::packet::Flags::KEY);
        }

        self.pending = Some(packet);
        self.push_input()?;
        Ok(())
    }

    fn queue_eos(&mut self) -> Result<()> {
        if self.eos_queued {
            return Err(ExtractError::ProtocolViolation(
                "decoder end of stream queued twice".to_string(),
            ));
        }
        self.eos_queued = true;
        self.push_input()?;
        Ok(())
    }

    fn dequeue(&mut self, _timeout: Duration) -> Result<Option<PcmBuffer>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            let mut frame = ffmpeg::util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut frame) {
                Ok(()) => {
                    // Output drained; a refused packet may fit now
                    self.push_input()?;
                    let buffer = self.to_pcm(&frame)?;
                    if buffer.data.is_empty() {
                        continue;
                    }
                    return Ok(Some(buffer));
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    if self.push_input()? {
                        continue;
                    }
                    return Ok(None);
                }
                Err(ffmpeg::Error::Eof) => return Ok(Some(self.end_of_stream())),
                Err(e) => {
                    return Err(ExtractError::Ffmpeg(FfmpegError::DecodePacket(format!(
                        "receive_frame error: {}",
                        e
                    ))))
                }
            }
        }
    }
}
