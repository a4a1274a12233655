//! FFmpeg-backed container reader

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};

use super::{ContainerReader, Cursor};
use crate::error::{ExtractError, FfmpegError, Result};
use crate::ffmpeg::helpers::track_format_from_parameters;
use crate::ffmpeg::utils::to_ticks;
use crate::media::{SampleChunk, Track, DEFAULT_MAX_CHUNK_SIZE};

/// Reads the first audio track of a local file.
pub struct FfmpegReader {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    track: Track,
    time_base: ffmpeg::Rational,
    /// Stream start in `time_base` units; subtracted from every timestamp
    start_time: i64,
    cursor: Cursor,
}

impl FfmpegReader {
    /// Open `path` and select its first audio track.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ExtractError::InputNotFound(path.display().to_string()));
        }

        let input = ffmpeg::format::input(&path).map_err(|e| {
            ExtractError::Ffmpeg(FfmpegError::OpenInput(format!(
                "failed to open {:?}: {}",
                path, e
            )))
        })?;

        let (track, time_base, start_time) = select_audio_track(&input)?;

        tracing::debug!(
            path = %path.display(),
            stream_index = track.index,
            codec = ?track.codec_id(),
            sample_rate = track.sample_rate(),
            channels = track.channels(),
            duration_ticks = track.duration_ticks,
            "Selected audio track"
        );

        Ok(Self {
            path: path.to_path_buf(),
            input,
            track,
            time_base,
            start_time,
            cursor: Cursor::Ready,
        })
    }

    /// Read packets until one belongs to the selected track.
    fn next_packet(&mut self) -> Result<Option<ffmpeg::codec::packet::Packet>> {
        loop {
            let mut packet = ffmpeg::codec::packet::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() == self.track.index {
                        return Ok(Some(packet));
                    }
                }
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => {
                    return Err(ExtractError::Ffmpeg(FfmpegError::ReadFrame(format!(
                        "read error on {:?}: {}",
                        self.path, e
                    ))))
                }
            }
        }
    }

    fn chunk_from_packet(&self, packet: &ffmpeg::codec::packet::Packet) -> SampleChunk {
        let ts = packet.pts().or(packet.dts()).unwrap_or(self.start_time);
        SampleChunk {
            payload: Bytes::copy_from_slice(packet.data().unwrap_or(&[])),
            pts: to_ticks(ts - self.start_time, self.time_base),
            duration: to_ticks(packet.duration().max(0), self.time_base),
            keyframe: packet.is_key(),
            track_index: self.track.index,
        }
    }

    fn reopen(&mut self) -> Result<()> {
        let input = ffmpeg::format::input(&self.path).map_err(|e| {
            ExtractError::Ffmpeg(FfmpegError::OpenInput(format!(
                "failed to reopen {:?}: {}",
                self.path, e
            )))
        })?;
        self.input = input;
        Ok(())
    }
}

impl ContainerReader for FfmpegReader {
    fn track(&self) -> &Track {
        &self.track
    }

    fn read_next_chunk(&mut self) -> Result<Option<SampleChunk>> {
        match self.cursor {
            Cursor::Taken => Err(ExtractError::ProtocolViolation(
                "chunk read twice without advancing".to_string(),
            )),
            Cursor::Exhausted => Ok(None),
            Cursor::Ready => match self.next_packet()? {
                Some(packet) => {
                    self.cursor = Cursor::Taken;
                    Ok(Some(self.chunk_from_packet(&packet)))
                }
                None => {
                    self.cursor = Cursor::Exhausted;
                    Ok(None)
                }
            },
        }
    }

    fn advance(&mut self) -> Result<()> {
        match self.cursor {
            Cursor::Taken => self.cursor = Cursor::Ready,
            Cursor::Ready => {
                // Skip the chunk nobody looked at.
                if self.next_packet()?.is_none() {
                    self.cursor = Cursor::Exhausted;
                }
            }
            Cursor::Exhausted => {}
        }
        Ok(())
    }

    fn seek_to_start(&mut self, track_index: usize) -> Result<()> {
        if track_index != self.track.index {
            return Err(ExtractError::ProtocolViolation(format!(
                "seek to track {} but track {} is selected",
                track_index, self.track.index
            )));
        }

        if let Err(e) = self.input.seek(0, ..0) {
            tracing::debug!(error = %e, "Seek failed, reopening input");
            self.reopen()?;
        }
        self.cursor = Cursor::Ready;
        Ok(())
    }
}

/// Pick the first audio stream and describe it.
fn select_audio_track(
    input: &ffmpeg::format::context::Input,
) -> Result<(Track, ffmpeg::Rational, i64)> {
    let stream = input
        .streams()
        .find(|s| s.parameters().medium() == ffmpeg::media::Type::Audio)
        .ok_or(ExtractError::NoAudioTrack)?;

    let time_base = stream.time_base();
    let start_time = match stream.start_time() {
        i64::MIN => 0, // AV_NOPTS_VALUE
        t => t,
    };

    let duration_ticks = if stream.duration() > 0 {
        to_ticks(stream.duration(), time_base)
    } else if input.duration() > 0 {
        // Container duration is already in AV_TIME_BASE (microseconds)
        input.duration()
    } else {
        0
    };

    let track = Track {
        index: stream.index(),
        format: track_format_from_parameters(&stream.parameters()),
        duration_ticks,
        max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
    };

    Ok((track, time_base, start_time))
}
