//! FFmpeg utility functions

use ffmpeg_next as ffmpeg;

use crate::media::ticks_time_base;

/// Convert timestamps from one timebase to another
pub fn rescale_ts(ts: i64, from: ffmpeg::Rational, to: ffmpeg::Rational) -> i64 {
    unsafe { ffmpeg::ffi::av_rescale_q(ts, from.into(), to.into()) }
}

/// Convert a timestamp in `time_base` units to pipeline ticks.
pub fn to_ticks(ts: i64, time_base: ffmpeg::Rational) -> i64 {
    rescale_ts(ts, time_base, ticks_time_base())
}

/// Convert pipeline ticks to a timestamp in `time_base` units.
pub fn from_ticks(ticks: i64, time_base: ffmpeg::Rational) -> i64 {
    rescale_ts(ticks, ticks_time_base(), time_base)
}
