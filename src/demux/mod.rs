//! Container reading and audio track selection
//!
//! A `ContainerReader` hands out the compressed samples of one selected audio
//! track in presentation order. The chunk under the cursor is moved out by
//! `read_next_chunk`; `advance` then moves the cursor to the next sample.

pub mod reader;

pub use reader::FfmpegReader;

use crate::error::Result;
use crate::media::{SampleChunk, Track};

pub trait ContainerReader {
    /// The selected audio track.
    fn track(&self) -> &Track;

    /// Take the chunk under the cursor, or `None` at end of stream.
    ///
    /// Calling this twice without `advance` in between is a protocol
    /// violation.
    fn read_next_chunk(&mut self) -> Result<Option<SampleChunk>>;

    /// Move the cursor to the next chunk of the selected track.
    fn advance(&mut self) -> Result<()>;

    /// Rewind to the first chunk of `track_index`.
    fn seek_to_start(&mut self, track_index: usize) -> Result<()>;

    /// Release underlying resources. The reader is unusable afterwards.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Cursor state shared by reader implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// The next `read_next_chunk` fetches a new chunk
    Ready,
    /// The current chunk was handed out; `advance` is required
    Taken,
    /// No chunks remain
    Exhausted,
}
