//! MPEG-4 audio muxer backed by FFmpeg

use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};

use super::Muxer;
use crate::error::{ExtractError, FfmpegError, Result};
use crate::ffmpeg::helpers::{parameters_from_track_format, stream_reset_codec_tag};
use crate::ffmpeg::utils::from_ticks;
use crate::media::{EncodedPacket, TrackFormat};

/// Writes one audio track into an `.m4a` file
pub struct FfmpegMuxer {
    output: ffmpeg::format::context::Output,
    path: PathBuf,
    stream_index: Option<usize>,
    /// Output stream timebase, final only after the header is written
    time_base: ffmpeg::Rational,
    last_dts: Option<i64>,
}

impl FfmpegMuxer {
    /// Create the output file at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let output = ffmpeg::format::output_as(&path, "mp4").map_err(|e| {
            ExtractError::Ffmpeg(FfmpegError::MuxerCreate(format!(
                "failed to create {:?}: {}",
                path, e
            )))
        })?;

        Ok(Self {
            output,
            path: path.to_path_buf(),
            stream_index: None,
            time_base: ffmpeg::Rational::new(1, 1),
            last_dts: None,
        })
    }
}

impl Muxer for FfmpegMuxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<()> {
        let mut out_stream = self
            .output
            .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
            .map_err(|e| FfmpegError::StreamConfig(format!("Failed to add audio stream: {}", e)))?;

        out_stream.set_parameters(parameters_from_track_format(format));
        // Let the muxer pick the tag for mp4, whatever the source container used
        stream_reset_codec_tag(&mut out_stream);
        if format.sample_rate > 0 {
            out_stream.set_time_base(ffmpeg::Rational::new(1, format.sample_rate as i32));
        }

        self.stream_index = Some(out_stream.index());
        tracing::debug!(
            path = %self.path.display(),
            codec = ?format.codec_id,
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Added audio stream"
        );
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let index = self.stream_index.ok_or_else(|| {
            ExtractError::ProtocolViolation("muxer started without a track".to_string())
        })?;

        self.output
            .write_header()
            .map_err(|e| FfmpegError::WriteHeader(format!("{:?}: {}", self.path, e)))?;

        // The mp4 muxer may replace the requested timebase in write_header
        self.time_base = self
            .output
            .stream(index)
            .map(|s| s.time_base())
            .ok_or_else(|| FfmpegError::StreamConfig("output stream vanished".to_string()))?;
        Ok(())
    }

    fn write_sample(&mut self, sample: &EncodedPacket) -> Result<()> {
        let index = self.stream_index.ok_or_else(|| {
            ExtractError::ProtocolViolation("muxer has no track".to_string())
        })?;

        let mut ts = from_ticks(sample.pts, self.time_base);
        // mp4 requires strictly increasing dts
        if let Some(last) = self.last_dts {
            if ts <= last {
                ts = last + 1;
            }
        }
        self.last_dts = Some(ts);

        let mut packet = ffmpeg::codec::packet::Packet::copy(&sample.data);
        packet.set_stream(index);
        packet.set_pts(Some(ts));
        packet.set_dts(Some(ts));
        packet.set_duration(from_ticks(sample.duration, self.time_base));
        packet.set_position(-1);
        if sample.keyframe {
            packet.set_flags(ffmpeg::codec::packet::Flags::KEY);
        }

        packet
            .write_interleaved(&mut self.output)
            .map_err(|e| FfmpegError::WritePacket(format!("{:?}: {}", self.path, e)))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.output
            .write_trailer()
            .map_err(|e| FfmpegError::WriteTrailer(format!("{:?}: {}", self.path, e)))?;
        Ok(())
    }
}
