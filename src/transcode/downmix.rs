//! Channel downmixing of interleaved 16-bit PCM

use bytes::{Buf, BufMut};

use crate::media::PCM_BYTES_PER_SAMPLE;

/// Output channel count for a source with `channels` channels (never upmix).
pub fn output_channels(channels: u16) -> u16 {
    match channels {
        0 => 2,
        c => c.min(2),
    }
}

/// Move as many whole frames as fit from `src` to `dst`, downmixing from
/// `input_channels` to `output_channels` (1 or 2).
///
/// Mono output is `(ch0 + ch1) / 2` truncated toward zero; stereo output keeps
/// the first two channels. A mono source counts as both left and right. `src`
/// advances only by the frames consumed. Returns the number of bytes written.
pub fn downmix<S, D>(src: &mut S, input_channels: u16, output_channels: u16, dst: &mut D) -> usize
where
    S: Buf,
    D: BufMut,
{
    let input_channels = input_channels.max(1) as usize;
    let output_channels = output_channels.clamp(1, 2) as usize;
    let in_frame = input_channels * PCM_BYTES_PER_SAMPLE;
    let out_frame = output_channels * PCM_BYTES_PER_SAMPLE;

    let frames = (src.remaining() / in_frame).min(dst.remaining_mut() / out_frame);
    if frames == 0 {
        return 0;
    }

    if input_channels == output_channels {
        dst.put((&mut *src).take(frames * in_frame));
        return frames * out_frame;
    }

    let skip = input_channels.saturating_sub(2) * PCM_BYTES_PER_SAMPLE;
    for _ in 0..frames {
        let left = src.get_i16_le();
        let right = if input_channels > 1 {
            src.get_i16_le()
        } else {
            left
        };
        src.advance(skip);

        if output_channels == 1 {
            dst.put_i16_le(((left as i32 + right as i32) / 2) as i16);
        } else {
            dst.put_i16_le(left);
            dst.put_i16_le(right);
        }
    }

    frames * out_frame
}
