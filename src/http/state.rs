//! Application state shared by the HTTP handlers

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::pipeline::{AudioExtractor, Backend, FfmpegBackend};

pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,

    /// Opens the stages of every extraction
    backend: Arc<dyn Backend>,

    /// One permit per extraction allowed to run at once
    permits: Arc<Semaphore>,
}

impl AppState {
    /// Create a new AppState with the FFmpeg backend
    pub fn new(config: ServerConfig) -> Result<Self> {
        let backend = FfmpegBackend::new()?;
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    pub fn with_backend(config: ServerConfig, backend: Arc<dyn Backend>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_extractions));
        Self {
            config,
            backend,
            permits,
        }
    }

    /// A permit for one extraction, or `None` when all are in use.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().try_acquire_owned().ok()
    }

    /// A fresh extractor; each request gets its own.
    pub fn extractor(&self) -> Result<AudioExtractor> {
        AudioExtractor::with_backend(self.config.extractor.clone(), self.backend.clone())
    }
}
