//! Bypass strategies that copy compressed samples without decoding
//!
//! - Passthrough: MP3 source, chunks written verbatim to a raw MP3 file
//! - Remux: AAC source, chunks copied with their timing into an `.m4a`
//!
//! Any failure releases the sink, rewinds the reader and reports
//! `FastPathAborted` so the caller can fall back to a full transcode.

use ffmpeg_next as ffmpeg;

use super::{RunContext, Strategy};
use crate::demux::ContainerReader;
use crate::error::{ExtractError, Result};
use crate::media::{EncodedPacket, OutputCodec, Track};
use crate::pipeline::state::PipelineState;
use crate::sink::{ContainerWriter, OutputSink, RawStreamSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastPath {
    Passthrough,
    Remux,
}

impl FastPath {
    pub fn name(self) -> &'static str {
        match self {
            FastPath::Passthrough => "passthrough",
            FastPath::Remux => "remux",
        }
    }

    pub fn state(self) -> PipelineState {
        match self {
            FastPath::Passthrough => PipelineState::FastPathPassthrough,
            FastPath::Remux => PipelineState::FastPathRemux,
        }
    }

    pub fn strategy(self) -> Strategy {
        match self {
            FastPath::Passthrough => Strategy::Passthrough,
            FastPath::Remux => Strategy::Remux,
        }
    }

    pub fn output_codec(self) -> OutputCodec {
        match self {
            FastPath::Passthrough => OutputCodec::Mp3,
            FastPath::Remux => OutputCodec::Aac,
        }
    }
}

/// Pick the bypass strategy the track's codec allows, if any.
///
/// AAC without an AudioSpecificConfig (raw ADTS) cannot go into MPEG-4
/// as-is, so it gets no fast path.
pub fn classify(track: &Track) -> Option<FastPath> {
    match track.codec_id() {
        ffmpeg::codec::Id::MP3 => Some(FastPath::Passthrough),
        ffmpeg::codec::Id::AAC if has_extradata(track) => Some(FastPath::Remux),
        _ => None,
    }
}

fn has_extradata(track: &Track) -> bool {
    track.format.extradata.as_ref().is_some_and(|e| !e.is_empty())
}

/// Run `path` to completion. Returns the payload bytes written.
pub fn run(path: FastPath, ctx: &mut RunContext<'_>, reader: &mut dyn ContainerReader) -> Result<u64> {
    tracing::info!(strategy = path.name(), "Trying fast path");

    match copy_chunks(path, ctx, reader) {
        Ok(written) => Ok(written),
        // Cancellation ends the run; it is not a reason to fall back
        Err(ExtractError::Cancelled) => Err(ExtractError::Cancelled),
        Err(e) => {
            tracing::warn!(
                strategy = path.name(),
                error = %e,
                "Fast path failed, falling back to full transcode"
            );
            let track_index = reader.track().index;
            reader.seek_to_start(track_index)?;
            Err(ExtractError::FastPathAborted {
                strategy: path.name(),
                reason: e.to_string(),
            })
        }
    }
}

fn open_sink(path: FastPath, ctx: &RunContext<'_>) -> Result<OutputSink> {
    Ok(match path {
        FastPath::Passthrough => {
            OutputSink::Raw(RawStreamSink::new(ctx.backend.open_raw_writer(ctx.output)?))
        }
        FastPath::Remux => {
            OutputSink::Container(ContainerWriter::new(ctx.backend.open_muxer(ctx.output)?))
        }
    })
}

fn copy_chunks(path: FastPath, ctx: &mut RunContext<'_>, reader: &mut dyn ContainerReader) -> Result<u64> {
    let format = reader.track().format.clone();
    // Dropped (and so released) on every early return
    let mut sink = open_sink(path, ctx)?;
    sink.configure(&format)?;
    let caps = ctx.caps.for_sink(sink.kind());

    let mut written: u64 = 0;
    let mut packets: u64 = 0;
    loop {
        ctx.cancel.check()?;

        let Some(chunk) = reader.read_next_chunk()? else {
            break;
        };
        if caps.past_cutoff(chunk.pts) {
            tracing::debug!(pts = chunk.pts, "Duration cap reached");
            break;
        }
        if !caps.admits(written, packets, chunk.len()) {
            tracing::debug!(written, "Size cap reached");
            break;
        }

        let pts = chunk.pts;
        let len = chunk.len() as u64;
        sink.write(&EncodedPacket::from(chunk))?;
        written += len;
        packets += 1;
        ctx.progress.report(pts);
        reader.advance()?;
    }

    sink.finish()?;
    tracing::info!(strategy = path.name(), written, "Fast path complete");
    Ok(written)
}
