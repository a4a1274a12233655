//! Full transcode: reader -> decoder -> downmix -> encoder -> sink
//!
//! One outer iteration feeds the decoder, forwards decoded PCM to the
//! encoder, propagates end of stream and drains the encoder into the sink.
//! Every wait is bounded; an iteration where nothing moves simply yields.

use bytes::{BufMut, BytesMut};
use std::time::Duration;

use super::RunContext;
use crate::demux::ContainerReader;
use crate::error::{ExtractError, FailureKind, Result};
use crate::media::{OutputCodec, PcmBuffer, SinkKind, TICKS_PER_SECOND};
use crate::sink::{ContainerWriter, OutputSink, RawStreamSink};
use crate::transcode::downmix::{downmix, output_channels};
use crate::transcode::{DecodeStage, EncodeStage, EncoderOutput, EncoderSettings};

/// Sample rate assumed when the container does not declare one
const FALLBACK_SAMPLE_RATE: u32 = 44_100;

/// How far the end of stream has travelled down the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Reader still has chunks for the decoder
    Reading,
    /// Decoder has its end-of-stream marker, output still coming
    DrainingDecoder,
    /// Decoder is done; the encoder gets its marker next
    FlushingEncoder,
    /// Encoder reported its own end of stream
    Finished,
}

/// Result of a full transcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeResult {
    pub codec: OutputCodec,
    pub payload_bytes: u64,
}

/// Open the stages, run the loop and release everything in reverse order.
pub fn run(ctx: &mut RunContext<'_>, reader: &mut dyn ContainerReader) -> Result<TranscodeResult> {
    let track = reader.track().clone();

    let mut decoder = ctx.backend.open_decoder(&track)?;

    let (mut encoder, codec, settings) = match open_encoder(ctx, track.sample_rate(), track.channels()) {
        Ok(opened) => opened,
        Err(e) => {
            release("decoder", decoder.release());
            return Err(e);
        }
    };

    let mut sink = match open_sink(ctx, codec) {
        Ok(sink) => sink,
        Err(e) => {
            release("encoder", encoder.release());
            release("decoder", decoder.release());
            return Err(e);
        }
    };

    tracing::info!(
        codec = %codec,
        sample_rate = settings.sample_rate,
        channels = settings.channels,
        source_channels = track.channels(),
        "Starting full transcode"
    );

    let mut machine = Machine {
        reader,
        decoder: decoder.as_mut(),
        encoder: encoder.as_mut(),
        sink: &mut sink,
        ctx: &mut *ctx,
        out_channels: settings.channels,
        phase: Phase::Reading,
        pending: None,
        encoder_eos_queued: false,
        size_capped: false,
        written: 0,
        packets: 0,
    };
    let result = machine.run();

    match &result {
        Ok(_) => {}
        // Best effort, so a truncated container is still readable
        Err(_) => release("sink", sink.finish()),
    }
    drop(sink);
    release("encoder", encoder.release());
    release("decoder", decoder.release());

    result.map(|payload_bytes| TranscodeResult {
        codec,
        payload_bytes,
    })
}

/// Open the preferred encoder, substituting the fallback codec when the
/// preferred one is unavailable.
fn open_encoder(
    ctx: &RunContext<'_>,
    sample_rate: u32,
    channels: u16,
) -> Result<(Box<dyn EncodeStage>, OutputCodec, EncoderSettings)> {
    let audio = &ctx.config.audio;
    let settings = EncoderSettings {
        codec: audio.preferred_codec,
        sample_rate: if sample_rate > 0 {
            sample_rate
        } else {
            FALLBACK_SAMPLE_RATE
        },
        channels: output_channels(channels),
        bit_rate: audio.bitrate,
        input_capacity: audio.encoder_input_capacity,
    };

    match ctx.backend.open_encoder(&settings) {
        Ok(encoder) => Ok((encoder, settings.codec, settings)),
        Err(e)
            if e.kind() == FailureKind::CodecUnavailable
                && audio.fallback_codec != audio.preferred_codec =>
        {
            tracing::warn!(
                preferred = %audio.preferred_codec,
                fallback = %audio.fallback_codec,
                error = %e,
                "Preferred encoder unavailable, substituting"
            );
            let settings = EncoderSettings {
                codec: audio.fallback_codec,
                ..settings
            };
            let encoder = ctx.backend.open_encoder(&settings)?;
            Ok((encoder, settings.codec, settings))
        }
        Err(e) => Err(e),
    }
}

fn open_sink(ctx: &RunContext<'_>, codec: OutputCodec) -> Result<OutputSink> {
    Ok(match codec.sink_kind() {
        SinkKind::RawStream => {
            OutputSink::Raw(RawStreamSink::new(ctx.backend.open_raw_writer(ctx.output)?))
        }
        SinkKind::Container => {
            OutputSink::Container(ContainerWriter::new(ctx.backend.open_muxer(ctx.output)?))
        }
    })
}

/// Log a failed release without escalating it.
fn release(stage: &str, result: Result<()>) {
    if let Err(e) = result {
        tracing::warn!(stage, error = %e, "Release failed");
    }
}

struct Machine<'a, 'c> {
    reader: &'a mut dyn ContainerReader,
    decoder: &'a mut dyn DecodeStage,
    encoder: &'a mut dyn EncodeStage,
    sink: &'a mut OutputSink,
    ctx: &'a mut RunContext<'c>,
    out_channels: u16,
    phase: Phase,
    /// Decoded buffer not yet fully handed to the encoder
    pending: Option<PcmBuffer>,
    encoder_eos_queued: bool,
    size_capped: bool,
    written: u64,
    packets: u64,
}

impl Machine<'_, '_> {
    fn run(&mut self) -> Result<u64> {
        let stall_limit = self.ctx.config.polling.stall_limit.max(1);
        let mut idle: u64 = 0;

        while self.phase != Phase::Finished {
            self.ctx.cancel.check()?;

            if self.step()? {
                idle = 0;
            } else {
                idle += 1;
                if idle >= stall_limit {
                    return Err(ExtractError::ProtocolViolation(format!(
                        "pipeline stalled for {} iterations in {:?}",
                        idle, self.phase
                    )));
                }
            }
        }

        self.sink.finish()?;
        tracing::info!(
            written = self.written,
            size_capped = self.size_capped,
            "Full transcode complete"
        );
        Ok(self.written)
    }

    fn timeout(&self) -> Duration {
        self.ctx.config.polling.poll_timeout()
    }

    /// One outer iteration. Returns whether anything moved.
    fn step(&mut self) -> Result<bool> {
        let mut progressed = self.feed_decoder()?;
        progressed |= self.drain_decoder()?;
        progressed |= self.propagate_eos()?;
        progressed |= self.drain_encoder()?;
        Ok(progressed)
    }

    fn feed_decoder(&mut self) -> Result<bool> {
        if self.phase != Phase::Reading || self.size_capped {
            return Ok(false);
        }
        let timeout = self.timeout();
        if !self.decoder.input_slot(timeout)? {
            return Ok(false);
        }

        match self.reader.read_next_chunk()? {
            Some(chunk) if !self.ctx.caps.past_cutoff(chunk.pts) => {
                self.decoder.queue_chunk(chunk)?;
                self.reader.advance()?;
            }
            last => {
                if let Some(chunk) = last {
                    tracing::debug!(pts = chunk.pts, "Duration cap reached");
                }
                self.decoder.queue_eos()?;
                self.phase = Phase::DrainingDecoder;
            }
        }
        Ok(true)
    }

    fn drain_decoder(&mut self) -> Result<bool> {
        let timeout = self.timeout();
        let mut progressed = false;

        if self.pending.is_none() && matches!(self.phase, Phase::Reading | Phase::DrainingDecoder) {
            if let Some(buffer) = self.decoder.dequeue(timeout)? {
                self.pending = Some(buffer);
                progressed = true;
            }
        }

        let Some(buffer) = self.pending.as_mut() else {
            return Ok(progressed);
        };

        if self.encoder_eos_queued {
            // Size cap forced the end; nothing more goes in
            self.pending = None;
            return Ok(progressed);
        }

        if buffer.data.len() >= buffer.frame_bytes() {
            if let Some(capacity) = self.encoder.input_capacity(timeout)? {
                let pts = buffer.pts;
                let mut pcm = BytesMut::with_capacity(capacity.min(buffer.data.len())).limit(capacity);
                let consumed_frames = {
                    let before = buffer.data.len();
                    downmix(&mut buffer.data, buffer.channels, self.out_channels, &mut pcm);
                    (before - buffer.data.len()) / buffer.frame_bytes()
                };
                let pcm = pcm.into_inner().freeze();
                if !pcm.is_empty() {
                    self.encoder.queue_pcm(pcm, pts)?;
                    progressed = true;
                }
                if buffer.sample_rate > 0 {
                    buffer.pts += consumed_frames as i64 * TICKS_PER_SECOND / buffer.sample_rate as i64;
                }
            }
        }

        // Release the buffer once everything usable has been copied out
        if buffer.data.len() < buffer.frame_bytes() {
            if buffer.end_of_stream {
                tracing::debug!("Decoder reached end of stream");
                self.phase = Phase::FlushingEncoder;
            }
            self.pending = None;
            progressed = true;
        }

        Ok(progressed)
    }

    fn propagate_eos(&mut self) -> Result<bool> {
        if self.phase != Phase::FlushingEncoder || self.encoder_eos_queued {
            return Ok(false);
        }
        let timeout = self.timeout();
        if self.encoder.input_capacity(timeout)?.is_none() {
            return Ok(false);
        }
        self.encoder.queue_eos()?;
        self.encoder_eos_queued = true;
        Ok(true)
    }

    fn drain_encoder(&mut self) -> Result<bool> {
        let timeout = self.timeout();
        let mut progressed = false;

        while let Some(output) = self.encoder.dequeue(timeout)? {
            progressed = true;
            match output {
                EncoderOutput::Format(format) => {
                    tracing::debug!(
                        codec = ?format.codec_id,
                        sample_rate = format.sample_rate,
                        channels = format.channels,
                        "Encoder output format"
                    );
                    self.sink.configure(&format)?;
                }
                EncoderOutput::Packet(packet) => {
                    if self.size_capped || packet.is_empty() {
                        continue;
                    }
                    let caps = self.ctx.caps.for_sink(self.sink.kind());
                    if !caps.admits(self.written, self.packets, packet.len()) {
                        tracing::debug!(written = self.written, "Size cap reached, forcing end of stream");
                        self.size_capped = true;
                        self.pending = None;
                        if !self.encoder_eos_queued {
                            self.encoder.queue_eos()?;
                            self.encoder_eos_queued = true;
                        }
                        continue;
                    }
                    self.sink.write(&packet)?;
                    self.written += packet.len() as u64;
                    self.packets += 1;
                    self.ctx.progress.report(packet.pts);
                }
                EncoderOutput::EndOfStream => {
                    self.phase = Phase::Finished;
                    break;
                }
            }
        }

        Ok(progressed)
    }
}
