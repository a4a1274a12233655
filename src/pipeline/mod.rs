//! Extraction pipeline
//!
//! `AudioExtractor` runs one extraction at a time on a worker:
//! 1. Open the input and select its first audio track
//! 2. Try the codec's fast path (passthrough or remux), if any
//! 3. Otherwise, or when the fast path aborts, run the full transcode
//!
//! Duration and size caps apply to every strategy.

pub mod backend;
pub mod caps;
pub mod fast_path;
pub mod machine;
pub mod progress;
pub mod state;

pub use backend::{Backend, FfmpegBackend};
pub use caps::CapEnforcer;
pub use progress::{ProgressReporter, ProgressSink};
pub use state::{PipelineState, StateTracker};

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::{ExtractorConfig, PipelineCaps};
use crate::demux::ContainerReader;
use crate::error::{ExtractError, Result};
use crate::media::OutputCodec;

/// How the output was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Passthrough,
    Remux,
    Transcode,
}

/// Successful result of one extraction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOutcome {
    pub output_path: PathBuf,
    pub codec_mime_type: String,
    pub file_size_bytes: u64,
    pub strategy: Strategy,
    /// Compressed audio bytes written, excluding container overhead
    pub payload_bytes: u64,
}

/// Cooperative stop request, checked once per loop iteration
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        Ok(())
    }
}

/// One extraction request
pub struct ExtractRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Overrides the extractor's configured caps
    pub caps: Option<PipelineCaps>,
    on_progress: Option<ProgressSink>,
    cancel: CancelFlag,
}

impl ExtractRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            caps: None,
            on_progress: None,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_caps(mut self, caps: PipelineCaps) -> Self {
        self.caps = Some(caps);
        self
    }

    pub fn on_progress(mut self, sink: impl FnMut(f64) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(sink));
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle that cancels this request.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}

impl std::fmt::Debug for ExtractRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractRequest")
            .field("input", &self.input)
            .field("output", &self.output)
            .field("caps", &self.caps)
            .field("has_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Everything the strategies share during one run
pub struct RunContext<'a> {
    pub config: &'a ExtractorConfig,
    pub backend: &'a dyn Backend,
    pub output: &'a Path,
    pub caps: CapEnforcer,
    pub progress: ProgressReporter,
    pub cancel: CancelFlag,
}

/// Extracts capped audio from media files.
///
/// Every entry point takes `&mut self` or `self`, so one instance never runs
/// two extractions at once. Use separate instances for concurrent work.
pub struct AudioExtractor {
    config: ExtractorConfig,
    backend: Arc<dyn Backend>,
}

impl AudioExtractor {
    /// An extractor using the FFmpeg backend.
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        let backend = FfmpegBackend::new()?;
        Self::with_backend(config, Arc::new(backend))
    }

    pub fn with_backend(config: ExtractorConfig, backend: Arc<dyn Backend>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, backend })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Run one extraction on a blocking worker task.
    pub async fn extract(&mut self, request: ExtractRequest) -> Result<ExtractionOutcome> {
        let config = self.config.clone();
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || run_extraction(&config, backend.as_ref(), request))
            .await
            .map_err(|e| ExtractError::Worker(format!("extraction task failed: {}", e)))?
    }

    /// Run one extraction on the current thread.
    pub fn extract_blocking(&mut self, request: ExtractRequest) -> Result<ExtractionOutcome> {
        run_extraction(&self.config, self.backend.as_ref(), request)
    }

    /// Run one extraction on a dedicated thread and report through
    /// `on_complete`, which is called exactly once. The join handle gives the
    /// extractor back.
    pub fn spawn<F>(self, request: ExtractRequest, on_complete: F) -> std::io::Result<JoinHandle<Self>>
    where
        F: FnOnce(Result<ExtractionOutcome>) + Send + 'static,
    {
        std::thread::Builder::new()
            .name("audio-extract".to_string())
            .spawn(move || {
                let mut extractor = self;
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    extractor.extract_blocking(request)
                }))
                .unwrap_or_else(|_| Err(ExtractError::Worker("extraction panicked".to_string())));
                on_complete(result);
                extractor
            })
    }
}

/// Run one extraction to completion.
pub fn run_extraction(
    config: &ExtractorConfig,
    backend: &dyn Backend,
    request: ExtractRequest,
) -> Result<ExtractionOutcome> {
    let ExtractRequest {
        input,
        output,
        caps,
        on_progress,
        cancel,
    } = request;
    let caps = caps.unwrap_or_else(|| config.caps.clone());

    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        max_duration_secs = ?caps.max_duration_secs,
        max_output_bytes = ?caps.max_output_bytes,
        "Starting extraction"
    );

    let mut state = StateTracker::new();
    let result = remove_stale_output(&output).and_then(|()| {
        run_strategies(
            config,
            backend,
            &input,
            &output,
            &caps,
            on_progress,
            cancel,
            &mut state,
        )
    });

    match result {
        Ok(outcome) => {
            state.transition(PipelineState::Completed)?;
            tracing::info!(
                output = %outcome.output_path.display(),
                mime = %outcome.codec_mime_type,
                size = outcome.file_size_bytes,
                strategy = ?outcome.strategy,
                "Extraction complete"
            );
            Ok(outcome)
        }
        Err(e) => {
            if let Err(te) = state.transition(PipelineState::Failed) {
                tracing::debug!(error = %te, "Failed state not recorded");
            }
            tracing::error!(kind = ?e.kind(), error = %e, "Extraction failed");
            Err(e)
        }
    }
}

/// Delete whatever a previous run left at `output`.
fn remove_stale_output(output: &Path) -> Result<()> {
    match std::fs::remove_file(output) {
        Ok(()) => {
            tracing::debug!(path = %output.display(), "Removed stale output");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_strategies(
    config: &ExtractorConfig,
    backend: &dyn Backend,
    input: &Path,
    output: &Path,
    caps: &PipelineCaps,
    on_progress: Option<ProgressSink>,
    cancel: CancelFlag,
    state: &mut StateTracker,
) -> Result<ExtractionOutcome> {
    let mut reader = backend.open_reader(input)?;
    let track = reader.track().clone();

    let caps = CapEnforcer::new(caps, track.duration_ticks);
    let mut ctx = RunContext {
        config,
        backend,
        output,
        caps,
        progress: ProgressReporter::new(on_progress, caps.effective_duration()),
        cancel,
    };

    let result = select_and_run(&mut ctx, reader.as_mut(), state);

    // The reader was acquired first, so it goes last
    if let Err(e) = reader.release() {
        tracing::warn!(stage = "reader", error = %e, "Release failed");
    }

    let (strategy, codec, payload_bytes) = result?;
    ctx.progress.complete();

    Ok(ExtractionOutcome {
        output_path: output.to_path_buf(),
        codec_mime_type: codec.mime_type().to_string(),
        file_size_bytes: std::fs::metadata(output)?.len(),
        strategy,
        payload_bytes,
    })
}

fn select_and_run(
    ctx: &mut RunContext<'_>,
    reader: &mut dyn ContainerReader,
    state: &mut StateTracker,
) -> Result<(Strategy, OutputCodec, u64)> {
    if ctx.config.audio.enable_fast_paths {
        if let Some(path) = fast_path::classify(reader.track()) {
            state.transition(path.state())?;
            match fast_path::run(path, ctx, reader) {
                Ok(written) => return Ok((path.strategy(), path.output_codec(), written)),
                Err(e @ ExtractError::FastPathAborted { .. }) => {
                    tracing::debug!(error = %e, "Fast path aborted");
                }
                Err(e) => return Err(e),
            }
        }
    }

    state.transition(PipelineState::FullTranscode)?;
    let result = machine::run(ctx, reader)?;
    Ok((Strategy::Transcode, result.codec, result.payload_bytes))
}
