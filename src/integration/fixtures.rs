//! Scripted pipeline stages for scenario tests
//!
//! The fakes pass bytes straight through: the decoder treats each compressed
//! chunk as interleaved 16-bit PCM and the encoder turns each PCM slot into one
//! packet. Byte counts and timestamps therefore survive every stage, which
//! makes caps and downmixing directly observable in the output file.

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::demux::{ContainerReader, Cursor};
use crate::error::{ExtractError, Result};
use crate::media::{
    EncodedPacket, OutputCodec, PcmBuffer, SampleChunk, Track, TrackFormat, DEFAULT_MAX_CHUNK_SIZE,
    TICKS_PER_SECOND,
};
use crate::pipeline::Backend;
use crate::sink::Muxer;
use crate::transcode::{DecodeStage, EncodeStage, EncoderOutput, EncoderSettings};

/// Duration of one MP3 frame at 44.1 kHz, in ticks
pub const MP3_FRAME_TICKS: i64 = 26_122;

/// Duration of one AAC frame at 44.1 kHz, in ticks
pub const AAC_FRAME_TICKS: i64 = 23_220;

/// Something a fake stage did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Read(i64),
    Seek,
    WriterOpened,
    MuxerStarted,
    MuxerFinished,
    Released(&'static str),
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

fn record(log: &EventLog, event: Event) {
    log.lock().unwrap().push(event);
}

/// A track plus the chunks a reader hands out for it
#[derive(Debug, Clone)]
pub struct Script {
    pub track: Track,
    pub chunks: Arc<Vec<SampleChunk>>,
}

impl Script {
    /// Concatenated payload of every chunk starting before `cutoff`.
    pub fn payload_before(&self, cutoff: i64) -> Vec<u8> {
        self.chunks
            .iter()
            .filter(|c| c.pts < cutoff)
            .flat_map(|c| c.payload.iter().copied())
            .collect()
    }
}

fn track(codec_id: ffmpeg::codec::Id, sample_rate: u32, channels: u16, duration_ticks: i64) -> Track {
    Track {
        index: 0,
        format: TrackFormat::audio(codec_id, sample_rate, channels),
        duration_ticks,
        max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
    }
}

fn compressed(codec_id: ffmpeg::codec::Id, frame_ticks: i64, count: usize, size: usize) -> Script {
    let chunks = (0..count)
        .map(|i| SampleChunk {
            payload: Bytes::from(vec![i as u8; size]),
            pts: i as i64 * frame_ticks,
            duration: frame_ticks,
            keyframe: true,
            track_index: 0,
        })
        .collect();
    Script {
        track: track(codec_id, 44_100, 2, count as i64 * frame_ticks),
        chunks: Arc::new(chunks),
    }
}

/// Stereo MP3 at 44.1 kHz; chunk `i` is `size` bytes of value `i`.
pub fn mp3_chunks(count: usize, size: usize) -> Script {
    compressed(ffmpeg::codec::Id::MP3, MP3_FRAME_TICKS, count, size)
}

/// Stereo AAC at 44.1 kHz with an AudioSpecificConfig; chunk `i` is `size`
/// bytes of value `i`.
pub fn aac_chunks(count: usize, size: usize) -> Script {
    let mut script = compressed(ffmpeg::codec::Id::AAC, AAC_FRAME_TICKS, count, size);
    script.track.format.extradata = Some(Bytes::from_static(&[0x12, 0x10]));
    script
}

/// Stereo AAC straight from an ADTS stream, with no AudioSpecificConfig
pub fn adts_chunks(count: usize, size: usize) -> Script {
    compressed(ffmpeg::codec::Id::AAC, AAC_FRAME_TICKS, count, size)
}

/// Sample value of channel `c` in every frame of `pcm_script`
pub fn channel_value(c: u16) -> i16 {
    1000 * (c as i16 + 1)
}

/// `secs` seconds of PCM in a codec with no fast path.
///
/// Every chunk holds `chunk_frames` frames where channel `c` is
/// `channel_value(c)`. All chunks share one payload buffer.
pub fn pcm_script(channels: u16, sample_rate: u32, secs: u32, chunk_frames: usize) -> Script {
    let mut frame = Vec::with_capacity(channels as usize * 2);
    for c in 0..channels {
        frame.extend_from_slice(&channel_value(c).to_le_bytes());
    }
    let payload = Bytes::from(frame.repeat(chunk_frames));

    let total_frames = secs as usize * sample_rate as usize;
    let count = total_frames / chunk_frames;
    let chunk_ticks = chunk_frames as i64 * TICKS_PER_SECOND / sample_rate as i64;
    let chunks = (0..count)
        .map(|i| SampleChunk {
            payload: payload.clone(),
            pts: i as i64 * chunk_ticks,
            duration: chunk_ticks,
            keyframe: true,
            track_index: 0,
        })
        .collect();

    Script {
        track: track(
            ffmpeg::codec::Id::AC3,
            sample_rate,
            channels,
            secs as i64 * TICKS_PER_SECOND,
        ),
        chunks: Arc::new(chunks),
    }
}

/// Reader over a fixed chunk list
pub struct ScriptedReader {
    script: Script,
    pos: usize,
    cursor: Cursor,
    events: EventLog,
}

impl ContainerReader for ScriptedReader {
    fn track(&self) -> &Track {
        &self.script.track
    }

    fn read_next_chunk(&mut self) -> Result<Option<SampleChunk>> {
        match self.cursor {
            Cursor::Taken => Err(ExtractError::ProtocolViolation(
                "chunk read twice without advance".to_string(),
            )),
            Cursor::Exhausted => Ok(None),
            Cursor::Ready => match self.script.chunks.get(self.pos) {
                Some(chunk) => {
                    self.cursor = Cursor::Taken;
                    record(&self.events, Event::Read(chunk.pts));
                    Ok(Some(chunk.clone()))
                }
                None => {
                    self.cursor = Cursor::Exhausted;
                    Ok(None)
                }
            },
        }
    }

    fn advance(&mut self) -> Result<()> {
        if self.cursor != Cursor::Exhausted {
            self.pos += 1;
            self.cursor = Cursor::Ready;
        }
        Ok(())
    }

    fn seek_to_start(&mut self, _track_index: usize) -> Result<()> {
        self.pos = 0;
        self.cursor = Cursor::Ready;
        record(&self.events, Event::Seek);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        record(&self.events, Event::Released("reader"));
        Ok(())
    }
}

/// Decoder that hands each chunk on as PCM
pub struct IdentityDecoder {
    channels: u16,
    sample_rate: u32,
    output: VecDeque<PcmBuffer>,
    eos_queued: bool,
    eos_sent: bool,
    last_pts: i64,
    events: EventLog,
}

/// Decoded buffers the identity decoder holds before refusing input
const DECODER_SLOTS: usize = 4;

impl DecodeStage for IdentityDecoder {
    fn input_slot(&mut self, _timeout: Duration) -> Result<bool> {
        Ok(!self.eos_queued && self.output.len() < DECODER_SLOTS)
    }

    fn queue_chunk(&mut self, chunk: SampleChunk) -> Result<()> {
        if self.eos_queued {
            return Err(ExtractError::ProtocolViolation("chunk after end of stream".into()));
        }
        self.last_pts = chunk.pts;
        self.output.push_back(PcmBuffer {
            data: chunk.payload,
            pts: chunk.pts,
            channels: self.channels,
            sample_rate: self.sample_rate,
            end_of_stream: false,
        });
        Ok(())
    }

    fn queue_eos(&mut self) -> Result<()> {
        if self.eos_queued {
            return Err(ExtractError::ProtocolViolation("end of stream queued twice".into()));
        }
        self.eos_queued = true;
        Ok(())
    }

    fn dequeue(&mut self, _timeout: Duration) -> Result<Option<PcmBuffer>> {
        if let Some(buffer) = self.output.pop_front() {
            return Ok(Some(buffer));
        }
        if self.eos_queued && !self.eos_sent {
            self.eos_sent = true;
            return Ok(Some(PcmBuffer::end_of_stream(
                self.last_pts,
                self.channels,
                self.sample_rate,
            )));
        }
        Ok(None)
    }

    fn release(&mut self) -> Result<()> {
        record(&self.events, Event::Released("decoder"));
        Ok(())
    }
}

/// Decoder that never accepts input or produces output
pub struct StuckDecoder;

impl DecodeStage for StuckDecoder {
    fn input_slot(&mut self, _timeout: Duration) -> Result<bool> {
        Ok(false)
    }

    fn queue_chunk(&mut self, _chunk: SampleChunk) -> Result<()> {
        Err(ExtractError::ProtocolViolation("no slot".into()))
    }

    fn queue_eos(&mut self) -> Result<()> {
        Err(ExtractError::ProtocolViolation("no slot".into()))
    }

    fn dequeue(&mut self, _timeout: Duration) -> Result<Option<PcmBuffer>> {
        Ok(None)
    }
}

/// Encoder that emits each queued PCM slot as one packet
pub struct IdentityEncoder {
    settings: EncoderSettings,
    output: VecDeque<EncoderOutput>,
    format_sent: bool,
    eos_queued: bool,
    events: EventLog,
}

/// Packets the identity encoder holds before refusing input
const ENCODER_SLOTS: usize = 8;

impl EncodeStage for IdentityEncoder {
    fn input_capacity(&mut self, _timeout: Duration) -> Result<Option<usize>> {
        if self.eos_queued || self.output.len() >= ENCODER_SLOTS {
            return Ok(None);
        }
        Ok(Some(self.settings.input_capacity))
    }

    fn queue_pcm(&mut self, pcm: Bytes, pts: i64) -> Result<()> {
        if self.eos_queued {
            return Err(ExtractError::ProtocolViolation("input after end of stream".into()));
        }
        if pcm.len() > self.settings.input_capacity {
            return Err(ExtractError::ProtocolViolation(format!(
                "{} bytes exceed slot capacity {}",
                pcm.len(),
                self.settings.input_capacity
            )));
        }
        self.output.push_back(EncoderOutput::Packet(EncodedPacket {
            data: pcm,
            pts,
            duration: 0,
            keyframe: true,
        }));
        Ok(())
    }

    fn queue_eos(&mut self) -> Result<()> {
        if self.eos_queued {
            return Err(ExtractError::ProtocolViolation("end of stream queued twice".into()));
        }
        self.eos_queued = true;
        self.output.push_back(EncoderOutput::EndOfStream);
        Ok(())
    }

    fn dequeue(&mut self, _timeout: Duration) -> Result<Option<EncoderOutput>> {
        if !self.format_sent {
            self.format_sent = true;
            return Ok(Some(EncoderOutput::Format(TrackFormat::audio(
                self.settings.codec.codec_id(),
                self.settings.sample_rate,
                self.settings.channels,
            ))));
        }
        Ok(self.output.pop_front())
    }

    fn release(&mut self) -> Result<()> {
        record(&self.events, Event::Released("encoder"));
        Ok(())
    }
}

fn injected_failure() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, "injected write failure")
}

/// File writer that can be told to fail after a number of writes
pub struct FailingWriter {
    file: File,
    writes: usize,
    fail_after: Option<usize>,
}

impl Write for FailingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.fail_after.is_some_and(|n| self.writes >= n) {
            return Err(injected_failure());
        }
        self.writes += 1;
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

/// Header bytes `FileMuxer` writes when it starts
pub const MUXER_HEADER_BYTES: usize = 1_024;

/// Index bytes `FileMuxer` appends per sample when it finishes
pub const MUXER_INDEX_BYTES_PER_SAMPLE: usize = 20;

/// Muxer that frames sample bytes with a fixed header and a per-sample index
/// trailer, like an MPEG-4 moov box
pub struct FileMuxer {
    file: File,
    writes: usize,
    fail_after: Option<usize>,
    events: EventLog,
}

impl Muxer for FileMuxer {
    fn add_track(&mut self, _format: &TrackFormat) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        record(&self.events, Event::MuxerStarted);
        self.file.write_all(&[b'H'; MUXER_HEADER_BYTES])?;
        Ok(())
    }

    fn write_sample(&mut self, packet: &EncodedPacket) -> Result<()> {
        if self.fail_after.is_some_and(|n| self.writes >= n) {
            return Err(injected_failure().into());
        }
        self.writes += 1;
        self.file.write_all(&packet.data)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        record(&self.events, Event::MuxerFinished);
        self.file
            .write_all(&vec![b'I'; self.writes * MUXER_INDEX_BYTES_PER_SAMPLE])?;
        self.file.flush()?;
        Ok(())
    }
}

/// Backend built from scripted fakes
pub struct FakeBackend {
    script: Script,
    events: EventLog,
    writers_opened: AtomicUsize,
    /// The first `failing_writers` writers fail after `fail_writes_after` writes
    failing_writers: usize,
    fail_writes_after: Option<usize>,
    unavailable: Vec<OutputCodec>,
    no_audio: bool,
    stuck_decoder: bool,
}

impl FakeBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            events: EventLog::default(),
            writers_opened: AtomicUsize::new(0),
            failing_writers: 0,
            fail_writes_after: None,
            unavailable: Vec::new(),
            no_audio: false,
            stuck_decoder: false,
        }
    }

    /// The first writer opened fails after `after` writes.
    pub fn failing_writer(self, after: usize) -> Self {
        self.failing_writers(1, after)
    }

    pub fn failing_writers(mut self, count: usize, after: usize) -> Self {
        self.failing_writers = count;
        self.fail_writes_after = Some(after);
        self
    }

    pub fn without_encoder(mut self, codec: OutputCodec) -> Self {
        self.unavailable.push(codec);
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.no_audio = true;
        self
    }

    pub fn with_stuck_decoder(mut self) -> Self {
        self.stuck_decoder = true;
        self
    }

    pub fn event_log(&self) -> EventLog {
        self.events.clone()
    }

    fn next_writer_failure(&self) -> Option<usize> {
        record(&self.events, Event::WriterOpened);
        let n = self.writers_opened.fetch_add(1, Ordering::SeqCst);
        if n < self.failing_writers {
            self.fail_writes_after
        } else {
            None
        }
    }
}

impl Backend for FakeBackend {
    fn open_reader(&self, _path: &Path) -> Result<Box<dyn ContainerReader>> {
        if self.no_audio {
            return Err(ExtractError::NoAudioTrack);
        }
        Ok(Box::new(ScriptedReader {
            script: self.script.clone(),
            pos: 0,
            cursor: Cursor::Ready,
            events: self.events.clone(),
        }))
    }

    fn open_decoder(&self, track: &Track) -> Result<Box<dyn DecodeStage>> {
        if self.stuck_decoder {
            return Ok(Box::new(StuckDecoder));
        }
        Ok(Box::new(IdentityDecoder {
            channels: track.channels(),
            sample_rate: track.sample_rate(),
            output: VecDeque::new(),
            eos_queued: false,
            eos_sent: false,
            last_pts: 0,
            events: self.events.clone(),
        }))
    }

    fn open_encoder(&self, settings: &EncoderSettings) -> Result<Box<dyn EncodeStage>> {
        if self.unavailable.contains(&settings.codec) {
            return Err(ExtractError::CodecUnavailable(settings.codec.to_string()));
        }
        Ok(Box::new(IdentityEncoder {
            settings: settings.clone(),
            output: VecDeque::new(),
            format_sent: false,
            eos_queued: false,
            events: self.events.clone(),
        }))
    }

    fn open_raw_writer(&self, path: &Path) -> Result<Box<dyn Write>> {
        let fail_after = self.next_writer_failure();
        Ok(Box::new(FailingWriter {
            file: File::create(path)?,
            writes: 0,
            fail_after,
        }))
    }

    fn open_muxer(&self, path: &Path) -> Result<Box<dyn Muxer>> {
        let fail_after = self.next_writer_failure();
        Ok(Box::new(FileMuxer {
            file: File::create(path)?,
            writes: 0,
            fail_after,
            events: self.events.clone(),
        }))
    }
}
