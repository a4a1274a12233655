//! FFmpeg module - wrappers and utilities for FFmpeg library access
//!
//! This module handles:
//! - FFmpeg initialization and log filtering
//! - Codec-parameter conversion to and from `TrackFormat`
//! - Timebase conversion

pub mod helpers;
pub mod utils;

pub use ffmpeg_next as ffmpeg;
#[allow(unused_imports)]
pub use utils::*;

use std::sync::OnceLock;

static INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize the FFmpeg library.
///
/// Safe to call more than once; only the first call touches FFmpeg and every
/// later call returns the same outcome.
pub fn init() -> Result<(), crate::error::FfmpegError> {
    INIT.get_or_init(|| {
        ffmpeg::init().map_err(|e| format!("ffmpeg::init() failed: {}", e))?;
        tracing::info!("FFmpeg initialized");
        Ok(())
    })
    .clone()
    .map_err(crate::error::FfmpegError::InitFailed)
}

/// Install a custom FFmpeg log callback that suppresses known-noisy messages.
///
/// Must be called after `init()` and before any extraction threads start,
/// because the global log callback is not thread-safe to change.
pub fn install_log_filter() {
    // SAFETY: both functions modify global FFmpeg state and are called once at
    // startup before worker threads exist.
    unsafe {
        ffmpeg_next::ffi::av_log_set_level(ffmpeg_next::ffi::AV_LOG_WARNING as i32);
        ffmpeg_next::ffi::av_log_set_callback(Some(ffmpeg_log_callback));
    }
}

/// Messages that are expected while extracting from arbitrary containers.
const SUPPRESSED_MESSAGES: &[&str] = &[
    "Estimating duration from bitrate",
    "Could not update timestamps for skipped samples",
    "Could not update timestamps for discarded samples",
    "Queue input is backward in time",
    "Application provided invalid, non monotonically increasing dts",
];

unsafe extern "C" fn ffmpeg_log_callback(
    avcl: *mut std::ffi::c_void,
    level: std::ffi::c_int,
    fmt: *const std::ffi::c_char,
    vl: ffmpeg_next::ffi::va_list,
) {
    use std::ffi::CStr;

    if level > unsafe { ffmpeg_next::ffi::av_log_get_level() } {
        return;
    }

    let mut buf = [0 as std::ffi::c_char; 1024];
    let mut print_prefix: std::ffi::c_int = 1;
    ffmpeg_next::ffi::av_log_format_line(
        avcl,
        level,
        fmt,
        vl,
        buf.as_mut_ptr(),
        buf.len() as std::ffi::c_int,
        &mut print_prefix,
    );

    let msg = CStr::from_ptr(buf.as_ptr()).to_string_lossy();
    if SUPPRESSED_MESSAGES.iter().any(|s| msg.contains(s)) {
        return;
    }

    let msg = msg.trim_end();
    if level <= ffmpeg_next::ffi::AV_LOG_ERROR as std::ffi::c_int {
        tracing::error!(target: "ffmpeg", "{}", msg);
    } else {
        tracing::warn!(target: "ffmpeg", "{}", msg);
    }
}

/// Version string of the linked libavcodec.
pub fn version_info() -> String {
    // SAFETY: avcodec_version has no preconditions.
    let v = unsafe { ffmpeg::ffi::avcodec_version() };
    format!("libavcodec {}.{}.{}", v >> 16, (v >> 8) & 0xff, v & 0xff)
}
