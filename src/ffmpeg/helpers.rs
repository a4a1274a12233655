//! Safe wrappers around FFmpeg FFI calls.
//!
//! Every function in this module is `pub` and **safe** to call. All `unsafe`
//! blocks are contained here; callers elsewhere never touch raw codec
//! parameters.

use bytes::Bytes;
use ffmpeg_next as ffmpeg;

use crate::media::TrackFormat;

/// Zero padding FFmpeg requires after extradata
const EXTRADATA_PADDING: usize = 64;

// ── Codec-parameter field accessors ─────────────────────────────────────────

/// Read `sample_rate` from an `AVCodecParameters` struct.
///
/// `ffmpeg-next` does not expose this field through a safe accessor.
pub fn codec_params_sample_rate(params: &ffmpeg::codec::Parameters) -> u32 {
    // SAFETY: `params.as_ptr()` is valid for the lifetime of `params`.
    unsafe { (*params.as_ptr()).sample_rate.max(0) as u32 }
}

/// Read `ch_layout.nb_channels` from an `AVCodecParameters` struct.
pub fn codec_params_channels(params: &ffmpeg::codec::Parameters) -> u16 {
    unsafe { (*params.as_ptr()).ch_layout.nb_channels.max(0) as u16 }
}

/// Read `bit_rate` from an `AVCodecParameters` struct.
pub fn codec_params_bit_rate(params: &ffmpeg::codec::Parameters) -> u64 {
    unsafe { (*params.as_ptr()).bit_rate.max(0) as u64 }
}

/// Copy the codec extradata out of an `AVCodecParameters` struct.
pub fn codec_params_extradata(params: &ffmpeg::codec::Parameters) -> Option<Bytes> {
    // SAFETY: `extradata` is either null or points at `extradata_size` bytes
    // owned by `params`.
    unsafe {
        let p = params.as_ptr();
        if (*p).extradata.is_null() || (*p).extradata_size <= 0 {
            return None;
        }
        let slice = std::slice::from_raw_parts((*p).extradata, (*p).extradata_size as usize);
        Some(Bytes::copy_from_slice(slice))
    }
}

/// Describe an audio stream's codec parameters as a `TrackFormat`.
pub fn track_format_from_parameters(params: &ffmpeg::codec::Parameters) -> TrackFormat {
    // SAFETY: plain scalar reads from a valid struct.
    let (frame_size, block_align, bits_per_coded_sample) = unsafe {
        let p = params.as_ptr();
        (
            (*p).frame_size.max(0) as u32,
            (*p).block_align.max(0) as u32,
            (*p).bits_per_coded_sample.max(0) as u32,
        )
    };

    TrackFormat {
        codec_id: params.id(),
        sample_rate: codec_params_sample_rate(params),
        channels: codec_params_channels(params),
        bit_rate: codec_params_bit_rate(params),
        frame_size,
        block_align,
        bits_per_coded_sample,
        extradata: codec_params_extradata(params),
    }
}

/// Build fresh audio codec parameters from a `TrackFormat`.
///
/// Used to open a decoder for a reader's track and to describe a copied
/// stream to the container writer.
pub fn parameters_from_track_format(format: &TrackFormat) -> ffmpeg::codec::Parameters {
    let mut params = ffmpeg::codec::Parameters::new();
    // SAFETY: `params` owns a freshly allocated AVCodecParameters. The
    // extradata buffer is allocated with av_mallocz so that
    // avcodec_parameters_free can release it.
    unsafe {
        let p = params.as_mut_ptr();
        (*p).codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_AUDIO;
        (*p).codec_id = format.codec_id.into();
        (*p).sample_rate = format.sample_rate as i32;
        (*p).bit_rate = format.bit_rate as i64;
        (*p).frame_size = format.frame_size as i32;
        (*p).block_align = format.block_align as i32;
        (*p).bits_per_coded_sample = format.bits_per_coded_sample as i32;
        ffmpeg::ffi::av_channel_layout_default(&mut (*p).ch_layout, format.channels as i32);

        if let Some(extra) = format.extradata.as_ref().filter(|e| !e.is_empty()) {
            let buf = ffmpeg::ffi::av_mallocz(extra.len() + EXTRADATA_PADDING) as *mut u8;
            if !buf.is_null() {
                std::ptr::copy_nonoverlapping(extra.as_ptr(), buf, extra.len());
                (*p).extradata = buf;
                (*p).extradata_size = extra.len() as i32;
            }
        }
    }
    params
}

/// Zero out `codec_tag` on the `AVCodecParameters` attached to an output
/// stream, so the muxer picks the correct tag for the target container.
///
/// Must be called after `out_stream.set_parameters(...)` and before
/// `write_header`.
pub fn stream_reset_codec_tag(out_stream: &mut ffmpeg::format::stream::StreamMut) {
    // SAFETY: `codecpar` is set by `set_parameters` and is non-null.
    unsafe {
        (*(*out_stream.as_mut_ptr()).codecpar).codec_tag = 0;
    }
}

/// Allocate a fresh `AVCodecParameters` and copy an opened encoder context
/// into it.
pub fn encoder_codec_parameters(
    encoder: &ffmpeg::codec::encoder::Audio,
) -> ffmpeg::codec::Parameters {
    use std::ops::Deref;
    use std::rc::Rc;
    let ctx: &ffmpeg::codec::Context = encoder.deref();
    // SAFETY: `ctx.as_ptr()` is a live, opened encoder context.
    unsafe {
        let params = ffmpeg::ffi::avcodec_parameters_alloc();
        ffmpeg::ffi::avcodec_parameters_from_context(params, ctx.as_ptr());
        ffmpeg::codec::Parameters::wrap(params, None::<Rc<dyn std::any::Any>>)
    }
}

// ── FLTP audio plane access ─────────────────────────────────────────────────

/// Mutable data plane `index` of an audio frame.
///
/// `ffmpeg-next`'s `Audio::data_mut(index)` stops at planes whose
/// `linesize[index]` is 0, but planar audio only fills `linesize[0]` and uses
/// it for every plane.
pub fn audio_plane_data_mut(frame: &mut ffmpeg::util::frame::Audio, index: usize) -> &mut [u8] {
    // SAFETY: the index is checked against the channel count (planar) or 0
    // (packed), and every plane of an allocated frame is `linesize[0]` bytes.
    unsafe {
        let f = frame.as_mut_ptr();
        let channels = (*f).ch_layout.nb_channels as usize;

        if frame.format().is_planar() {
            if index >= channels {
                return &mut [];
            }
        } else if index > 0 {
            return &mut [];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &mut [];
        }
        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &mut [];
        }

        let size = (*f).linesize[0] as usize;
        std::slice::from_raw_parts_mut(plane_ptr, size)
    }
}

/// Reinterpret an FLTP plane as `sample_count` f32 values.
///
/// Returns `None` if the slice is too short or not 4-byte aligned.
pub fn fltp_plane_as_f32_mut(byte_slice: &mut [u8], sample_count: usize) -> Option<&mut [f32]> {
    let expected_bytes = sample_count.checked_mul(4)?;
    if byte_slice.len() < expected_bytes {
        return None;
    }
    let ptr = byte_slice.as_mut_ptr();
    if (ptr as usize) % std::mem::align_of::<f32>() != 0 {
        return None;
    }
    // SAFETY: alignment and length are verified above.
    Some(unsafe { std::slice::from_raw_parts_mut(ptr as *mut f32, sample_count) })
}

/// Returns `true` if an encoder is registered for `codec_id`.
pub fn encoder_exists(codec_id: ffmpeg::codec::Id) -> bool {
    ffmpeg::codec::encoder::find(codec_id).is_some()
}
