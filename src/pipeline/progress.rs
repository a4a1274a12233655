//! Progress reporting
//!
//! Fractions are clamped to [0, 1] and never decrease over one run. A panic
//! inside the sink is an observation failure: it is logged and the run goes
//! on.

use std::panic::{catch_unwind, AssertUnwindSafe};

/// Receives progress fractions from the worker thread
pub type ProgressSink = Box<dyn FnMut(f64) + Send>;

pub struct ProgressReporter {
    sink: Option<ProgressSink>,
    duration_ticks: i64,
    last: Option<f64>,
    failures: u32,
}

impl ProgressReporter {
    /// `duration_ticks` <= 0 means only the final 1.0 is reported.
    pub fn new(sink: Option<ProgressSink>, duration_ticks: i64) -> Self {
        Self {
            sink,
            duration_ticks,
            last: None,
            failures: 0,
        }
    }

    /// Report that output up to `pts` has been written.
    pub fn report(&mut self, pts: i64) {
        if self.duration_ticks <= 0 {
            return;
        }
        let fraction = (pts as f64 / self.duration_ticks as f64).clamp(0.0, 1.0);
        self.emit(fraction);
    }

    /// Report completion.
    pub fn complete(&mut self) {
        self.emit(1.0);
    }

    /// Number of sink invocations that panicked.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    fn emit(&mut self, fraction: f64) {
        if self.last.is_some_and(|last| fraction <= last) {
            return;
        }
        self.last = Some(fraction);

        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        tracing::trace!(fraction, "Progress");
        if catch_unwind(AssertUnwindSafe(|| sink(fraction))).is_err() {
            self.failures += 1;
            tracing::warn!(
                fraction,
                kind = ?crate::error::FailureKind::ObservationFailure,
                "Progress observer panicked, ignoring"
            );
        }
    }
}
