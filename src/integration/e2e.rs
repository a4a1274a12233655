//! End-to-end pipeline scenarios over scripted stages

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{ExtractorConfig, PipelineCaps};
use crate::error::{ExtractError, FailureKind};
use crate::integration::fixtures::{
    aac_chunks, adts_chunks, channel_value, mp3_chunks, pcm_script, Event, EventLog, FakeBackend,
    Script, MUXER_HEADER_BYTES, MUXER_INDEX_BYTES_PER_SAMPLE,
};
use crate::media::{secs_to_ticks, OutputCodec};
use crate::pipeline::{AudioExtractor, CancelFlag, ExtractRequest, ExtractionOutcome, Strategy};

struct Run {
    _dir: tempfile::TempDir,
    input: PathBuf,
    output: PathBuf,
    events: EventLog,
    extractor: AudioExtractor,
}

impl Run {
    fn new(backend: FakeBackend, config: ExtractorConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("source.mp4");
        std::fs::write(&input, b"scripted").unwrap();
        let output = dir.path().join("out.bin");
        let events = backend.event_log();
        let extractor = AudioExtractor::with_backend(config, Arc::new(backend)).unwrap();
        Self {
            _dir: dir,
            input,
            output,
            events,
            extractor,
        }
    }

    fn request(&self) -> ExtractRequest {
        ExtractRequest::new(&self.input, &self.output)
    }

    fn extract(&mut self, request: ExtractRequest) -> crate::error::Result<ExtractionOutcome> {
        self.extractor.extract_blocking(request)
    }

    fn output_bytes(&self) -> Vec<u8> {
        std::fs::read(&self.output).unwrap()
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn releases(&self) -> Vec<&'static str> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Released(stage) => Some(stage),
                _ => None,
            })
            .collect()
    }
}

fn config_with(caps: PipelineCaps) -> ExtractorConfig {
    ExtractorConfig {
        caps,
        ..Default::default()
    }
}

fn recorder() -> (Arc<Mutex<Vec<f64>>>, impl FnMut(f64) + Send + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = seen.clone();
    (seen, move |f| sink_seen.lock().unwrap().push(f))
}

fn assert_progress(seen: &[f64]) {
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "not monotonic: {:?}", seen);
    assert!(seen.iter().all(|f| (0.0..=1.0).contains(f)));
    assert_eq!(seen.last(), Some(&1.0));
}

fn pcm_frames(bytes: &[u8], channels: usize) -> Vec<Vec<i16>> {
    bytes
        .chunks_exact(channels * 2)
        .map(|frame| {
            frame
                .chunks_exact(2)
                .map(|s| i16::from_le_bytes([s[0], s[1]]))
                .collect()
        })
        .collect()
}

#[test]
fn passthrough_copies_source_bytes() {
    let script = mp3_chunks(50, 417);
    let mut run = Run::new(FakeBackend::new(script.clone()), config_with(PipelineCaps::unbounded()));
    let (seen, sink) = recorder();

    let outcome = run.extract(run.request().on_progress(sink)).unwrap();

    assert_eq!(outcome.strategy, Strategy::Passthrough);
    assert_eq!(outcome.codec_mime_type, "audio/mpeg");
    assert_eq!(run.output_bytes(), script.payload_before(i64::MAX));
    assert_eq!(outcome.file_size_bytes, 50 * 417);
    assert_eq!(outcome.payload_bytes, 50 * 417);
    assert_progress(&seen.lock().unwrap());
}

#[test]
fn passthrough_stops_at_duration_cap() {
    let script = mp3_chunks(1000, 100);
    let caps = PipelineCaps {
        max_duration_secs: Some(10.0),
        max_output_bytes: None,
    };
    let mut run = Run::new(FakeBackend::new(script.clone()), config_with(caps));

    run.extract(run.request()).unwrap();

    let expected = script.payload_before(secs_to_ticks(10.0));
    assert_eq!(run.output_bytes(), expected);
    // Every written chunk starts before the cutoff
    let chunks_written = expected.len() / 100;
    assert!(script.chunks[chunks_written - 1].pts < secs_to_ticks(10.0));
    assert!(script.chunks[chunks_written].pts >= secs_to_ticks(10.0));
}

#[test]
fn passthrough_stops_at_size_cap() {
    let caps = PipelineCaps {
        max_duration_secs: None,
        max_output_bytes: Some(10_500),
    };
    let mut run = Run::new(FakeBackend::new(mp3_chunks(100, 1000)), config_with(caps));

    let outcome = run.extract(run.request()).unwrap();

    assert_eq!(outcome.file_size_bytes, 10_000);
    assert!(outcome.file_size_bytes <= 10_500);
}

#[test]
fn declared_duration_shorter_than_cap() {
    let script = mp3_chunks(100, 10);
    let mut run = Run::new(FakeBackend::new(script.clone()), ExtractorConfig::default());
    let (seen, sink) = recorder();

    run.extract(run.request().on_progress(sink)).unwrap();

    assert_eq!(run.output_bytes(), script.payload_before(i64::MAX));
    assert_progress(&seen.lock().unwrap());
}

#[test]
fn remux_aac_into_container() {
    let script = aac_chunks(40, 300);
    let mut run = Run::new(FakeBackend::new(script.clone()), ExtractorConfig::default());

    let outcome = run.extract(run.request()).unwrap();

    assert_eq!(outcome.strategy, Strategy::Remux);
    assert_eq!(outcome.codec_mime_type, "audio/mp4");
    let bytes = run.output_bytes();
    let index_bytes = 40 * MUXER_INDEX_BYTES_PER_SAMPLE;
    assert_eq!(
        &bytes[MUXER_HEADER_BYTES..bytes.len() - index_bytes],
        &script.payload_before(i64::MAX)[..]
    );
    let events = run.events();
    let started = events.iter().position(|e| *e == Event::MuxerStarted).unwrap();
    let finished = events.iter().position(|e| *e == Event::MuxerFinished).unwrap();
    assert!(started < finished);
}

#[test]
fn remux_file_size_stays_within_size_cap() {
    let caps = PipelineCaps {
        max_duration_secs: None,
        max_output_bytes: Some(10_000),
    };
    let mut run = Run::new(FakeBackend::new(aac_chunks(100, 300)), config_with(caps));

    let outcome = run.extract(run.request()).unwrap();

    assert_eq!(outcome.strategy, Strategy::Remux);
    // Header and index allowance leave room for 17 of the 300-byte chunks
    assert_eq!(outcome.payload_bytes, 17 * 300);
    assert!(outcome.file_size_bytes <= 10_000);
    assert_eq!(
        outcome.file_size_bytes,
        (MUXER_HEADER_BYTES + 17 * 300 + 17 * MUXER_INDEX_BYTES_PER_SAMPLE) as u64
    );
}

#[test]
fn adts_aac_skips_remux() {
    let mut run = Run::new(FakeBackend::new(adts_chunks(10, 300)), ExtractorConfig::default());

    let outcome = run.extract(run.request()).unwrap();

    assert_eq!(outcome.strategy, Strategy::Transcode);
    assert!(!run.events().contains(&Event::Seek));
    assert!(!run.events().contains(&Event::MuxerStarted));
}

#[test]
fn fast_path_failure_falls_back_to_transcode() {
    // 416 bytes = 104 whole stereo frames, so the identity stages keep every byte
    let script = mp3_chunks(30, 416);
    let backend = FakeBackend::new(script.clone()).failing_writer(5);
    let mut run = Run::new(backend, config_with(PipelineCaps::unbounded()));
    let (seen, sink) = recorder();

    let outcome = run.extract(run.request().on_progress(sink)).unwrap();

    assert_eq!(outcome.strategy, Strategy::Transcode);
    assert_eq!(outcome.codec_mime_type, "audio/mpeg");
    assert_eq!(run.output_bytes(), script.payload_before(i64::MAX));
    assert_progress(&seen.lock().unwrap());

    // Reader rewound: the first chunk read after the seek is at tick 0
    let events = run.events();
    let seek = events.iter().position(|e| *e == Event::Seek).unwrap();
    let first_reread = events[seek..].iter().find_map(|e| match e {
        Event::Read(pts) => Some(*pts),
        _ => None,
    });
    assert_eq!(first_reread, Some(0));
    assert_eq!(
        events.iter().filter(|e| **e == Event::WriterOpened).count(),
        2
    );
}

#[test]
fn transcode_ten_minutes_capped_to_five() {
    let script = pcm_script(2, 44_100, 600, 4_410);
    let caps = PipelineCaps {
        max_duration_secs: Some(300.0),
        max_output_bytes: None,
    };
    let mut run = Run::new(FakeBackend::new(script), config_with(caps));
    let (seen, sink) = recorder();

    let outcome = run.extract(run.request().on_progress(sink)).unwrap();

    assert_eq!(outcome.strategy, Strategy::Transcode);
    // 2 channels of 16-bit samples at 44.1 kHz
    let bytes_per_sec = 2 * 2 * 44_100;
    assert_eq!(outcome.file_size_bytes, 300 * bytes_per_sec);
    assert_progress(&seen.lock().unwrap());
}

#[test]
fn transcode_downmixes_six_channels_to_stereo() {
    let script = pcm_script(6, 48_000, 2, 1_024);
    let mut run = Run::new(FakeBackend::new(script), ExtractorConfig::default());

    run.extract(run.request()).unwrap();

    let frames = pcm_frames(&run.output_bytes(), 2);
    assert!(!frames.is_empty());
    assert!(frames
        .iter()
        .all(|f| f == &vec![channel_value(0), channel_value(1)]));
}

#[test]
fn transcode_keeps_mono_source_mono() {
    let script = pcm_script(1, 22_050, 1, 441);
    let mut run = Run::new(FakeBackend::new(script), ExtractorConfig::default());

    let outcome = run.extract(run.request()).unwrap();

    assert_eq!(outcome.file_size_bytes, 22_050 * 2);
    assert!(pcm_frames(&run.output_bytes(), 1)
        .iter()
        .all(|f| f[0] == channel_value(0)));
}

#[test]
fn transcode_respects_size_cap() {
    let script = pcm_script(2, 44_100, 10, 4_410);
    let mut config = config_with(PipelineCaps {
        max_duration_secs: None,
        max_output_bytes: Some(100_000),
    });
    config.audio.encoder_input_capacity = 16 * 1024;
    let mut run = Run::new(FakeBackend::new(script), config);

    let outcome = run.extract(run.request()).unwrap();

    assert!(outcome.file_size_bytes > 0);
    assert!(outcome.file_size_bytes <= 100_000);
    assert_eq!(outcome.payload_bytes, outcome.file_size_bytes);
}

#[test]
fn missing_mp3_encoder_substitutes_aac() {
    let backend = FakeBackend::new(pcm_script(2, 44_100, 1, 4_410)).without_encoder(OutputCodec::Mp3);
    let mut run = Run::new(backend, ExtractorConfig::default());

    let outcome = run.extract(run.request()).unwrap();

    assert_eq!(outcome.codec_mime_type, "audio/mp4");
    assert!(run.events().contains(&Event::MuxerFinished));
}

#[test]
fn substituted_aac_file_size_stays_within_size_cap() {
    let backend = FakeBackend::new(pcm_script(2, 44_100, 10, 4_410)).without_encoder(OutputCodec::Mp3);
    let mut config = config_with(PipelineCaps {
        max_duration_secs: None,
        max_output_bytes: Some(100_000),
    });
    config.audio.encoder_input_capacity = 16 * 1024;
    let mut run = Run::new(backend, config);

    let outcome = run.extract(run.request()).unwrap();

    assert_eq!(outcome.codec_mime_type, "audio/mp4");
    assert!(outcome.payload_bytes > 0);
    assert!(outcome.file_size_bytes > outcome.payload_bytes);
    assert!(outcome.file_size_bytes <= 100_000);
}

#[test]
fn no_encoder_at_all_releases_decoder_and_reader() {
    let backend = FakeBackend::new(pcm_script(2, 44_100, 1, 4_410))
        .without_encoder(OutputCodec::Mp3)
        .without_encoder(OutputCodec::Aac);
    let mut run = Run::new(backend, ExtractorConfig::default());

    let err = run.extract(run.request()).unwrap_err();

    assert_eq!(err.kind(), FailureKind::CodecUnavailable);
    assert_eq!(run.releases(), vec!["decoder", "reader"]);
}

#[test]
fn writer_failure_releases_in_reverse_order() {
    let backend = FakeBackend::new(pcm_script(2, 44_100, 5, 4_410)).failing_writers(usize::MAX, 3);
    let mut run = Run::new(backend, ExtractorConfig::default());

    let err = run.extract(run.request()).unwrap_err();

    assert_eq!(err.kind(), FailureKind::IoFailure);
    assert_eq!(run.releases(), vec!["encoder", "decoder", "reader"]);
}

#[test]
fn no_audio_track_reports_once() {
    let backend = FakeBackend::new(mp3_chunks(1, 1)).without_audio();
    let run = Run::new(backend, ExtractorConfig::default());
    let request = run.request();
    let output = run.output.clone();

    let calls = Arc::new(AtomicUsize::new(0));
    let result = Arc::new(Mutex::new(None));
    let (cb_calls, cb_result) = (calls.clone(), result.clone());
    let handle = run
        .extractor
        .spawn(request, move |r| {
            cb_calls.fetch_add(1, Ordering::SeqCst);
            *cb_result.lock().unwrap() = Some(r.map_err(|e| e.kind()));
        })
        .unwrap();
    handle.join().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        result.lock().unwrap().take(),
        Some(Err(FailureKind::NoAudioTrack))
    );
    assert!(!output.exists());
}

#[test]
fn panicking_progress_observer_does_not_fail_run() {
    let mut run = Run::new(FakeBackend::new(mp3_chunks(20, 50)), ExtractorConfig::default());

    let outcome = run
        .extract(run.request().on_progress(|_| panic!("observer broke")))
        .unwrap();

    assert_eq!(outcome.file_size_bytes, 20 * 50);
}

#[test]
fn cancellation_during_fast_path_does_not_fall_back() {
    let mut run = Run::new(FakeBackend::new(mp3_chunks(100, 10)), ExtractorConfig::default());
    let cancel = CancelFlag::new();
    let trigger = cancel.clone();

    let err = run
        .extract(
            run.request()
                .with_cancel(cancel)
                .on_progress(move |_| trigger.cancel()),
        )
        .unwrap_err();

    assert!(matches!(err, ExtractError::Cancelled));
    assert!(!run.events().contains(&Event::Seek));
    assert_eq!(run.releases(), vec!["reader"]);
}

#[test]
fn cancellation_during_transcode_releases_everything() {
    let mut run = Run::new(FakeBackend::new(pcm_script(2, 44_100, 5, 4_410)), ExtractorConfig::default());
    let request = run.request();
    let trigger = request.cancel_flag();

    let err = run
        .extract(request.on_progress(move |_| trigger.cancel()))
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Cancelled);
    assert_eq!(run.releases(), vec!["encoder", "decoder", "reader"]);
}

#[test]
fn stalled_pipeline_fails() {
    let mut config = ExtractorConfig::default();
    config.polling.stall_limit = 50;
    let backend = FakeBackend::new(pcm_script(2, 44_100, 1, 4_410)).with_stuck_decoder();
    let mut run = Run::new(backend, config);

    let err = run.extract(run.request()).unwrap_err();

    assert_eq!(err.kind(), FailureKind::ProtocolViolation);
    assert!(err.to_string().contains("stalled"));
}

#[test]
fn stale_output_is_replaced() {
    let script = mp3_chunks(3, 8);
    let mut run = Run::new(FakeBackend::new(script.clone()), ExtractorConfig::default());
    std::fs::write(&run.output, vec![0xAA; 4096]).unwrap();

    run.extract(run.request()).unwrap();

    assert_eq!(run.output_bytes(), script.payload_before(i64::MAX));
}

#[test]
fn disabled_fast_paths_transcode_mp3() {
    let mut config = ExtractorConfig::default();
    config.audio.enable_fast_paths = false;
    let mut run = Run::new(FakeBackend::new(mp3_chunks(10, 400)), config);

    let outcome = run.extract(run.request()).unwrap();

    assert_eq!(outcome.strategy, Strategy::Transcode);
    assert!(!run.events().contains(&Event::Seek));
}

#[test]
fn per_request_caps_override_config() {
    let script: Script = mp3_chunks(100, 100);
    let mut run = Run::new(FakeBackend::new(script), ExtractorConfig::default());

    let request = run.request().with_caps(PipelineCaps {
        max_duration_secs: None,
        max_output_bytes: Some(1_000),
    });
    let outcome = run.extract(request).unwrap();

    assert_eq!(outcome.file_size_bytes, 1_000);
}

#[tokio::test]
async fn async_extract_runs_on_worker() {
    let mut run = Run::new(FakeBackend::new(aac_chunks(5, 20)), ExtractorConfig::default());
    let request = run.request();

    let outcome = run.extractor.extract(request).await.unwrap();

    assert_eq!(outcome.strategy, Strategy::Remux);
    assert_eq!(outcome.output_path, run.output);
    assert!(Path::new(&outcome.output_path).exists());
}
