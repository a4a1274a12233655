//! Duration and size cap policy

use crate::config::PipelineCaps;
use crate::media::SinkKind;

/// File bytes held back for the MPEG-4 header and index boxes that do not
/// grow with the sample count (ftyp, moov/trak/mdia/stsd, mdat header).
pub const CONTAINER_HEADER_RESERVE: u64 = 4096;

/// Upper bound of index bytes one MPEG-4 sample adds: stsz (4), stts (8)
/// and, when every sample lands in its own chunk, co64 (8) plus stsc (12).
pub const CONTAINER_INDEX_BYTES_PER_PACKET: u64 = 32;

/// Cap policy for one run, fixed once the track is known
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapEnforcer {
    /// Chunks at or after this timestamp are not processed
    cutoff_ticks: Option<i64>,
    max_bytes: Option<u64>,
    declared_ticks: i64,
    /// Container bytes written regardless of payload
    header_reserve: u64,
    /// Container bytes added per written packet
    per_packet: u64,
}

impl CapEnforcer {
    /// `declared_ticks` is the track's declared duration (0 if unknown).
    pub fn new(caps: &PipelineCaps, declared_ticks: i64) -> Self {
        let cutoff_ticks = caps.max_duration_ticks().map(|max| {
            if declared_ticks > 0 {
                declared_ticks.min(max)
            } else {
                max
            }
        });

        Self {
            cutoff_ticks,
            max_bytes: caps.max_output_bytes,
            declared_ticks,
            header_reserve: 0,
            per_packet: 0,
        }
    }

    /// Account for the framing overhead of the sink the samples go to.
    pub fn for_sink(self, kind: SinkKind) -> Self {
        let (header_reserve, per_packet) = match kind {
            SinkKind::RawStream => (0, 0),
            SinkKind::Container => (CONTAINER_HEADER_RESERVE, CONTAINER_INDEX_BYTES_PER_PACKET),
        };
        Self {
            header_reserve,
            per_packet,
            ..self
        }
    }

    pub fn cutoff_ticks(&self) -> Option<i64> {
        self.cutoff_ticks
    }

    /// Whether a chunk at `pts` lies past the duration cutoff.
    pub fn past_cutoff(&self, pts: i64) -> bool {
        self.cutoff_ticks.is_some_and(|cutoff| pts >= cutoff)
    }

    /// Whether one more packet of `len` bytes fits after `packets` packets
    /// totalling `written` payload bytes, with the output file (payload plus
    /// container overhead) staying within the size cap.
    pub fn admits(&self, written: u64, packets: u64, len: usize) -> bool {
        self.max_bytes.map_or(true, |max| {
            let overhead = self
                .header_reserve
                .saturating_add(self.per_packet.saturating_mul(packets.saturating_add(1)));
            written
                .saturating_add(len as u64)
                .saturating_add(overhead)
                <= max
        })
    }

    /// Duration progress is measured against (0 if unknown).
    pub fn effective_duration(&self) -> i64 {
        self.cutoff_ticks.unwrap_or(self.declared_ticks.max(0))
    }
}
