//! Pipeline state and validated transitions

use serde::Serialize;

use crate::error::{ExtractError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Selecting,
    FastPathPassthrough,
    FastPathRemux,
    FullTranscode,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }

    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Selecting, FastPathPassthrough | FastPathRemux | FullTranscode) => true,
            (FastPathPassthrough | FastPathRemux, FullTranscode | Completed) => true,
            (FullTranscode, Completed) => true,
            _ => false,
        }
    }
}

/// Tracks the state of one run and rejects illegal transitions
#[derive(Debug)]
pub struct StateTracker {
    state: PipelineState,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Selecting,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn transition(&mut self, next: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ExtractError::ProtocolViolation(format!(
                "illegal state transition {:?} -> {:?}",
                self.state, next
            )));
        }
        tracing::debug!(from = ?self.state, to = ?next, "Pipeline state transition");
        self.state = next;
        Ok(())
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
