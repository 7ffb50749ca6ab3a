//! The controller's state cell: the one place pipeline state changes.

use std::sync::{Arc, Mutex};

use golive_common::error::{FailureCause, GoliveError, GoliveResult};
use golive_media_model::PipelineState;
use tokio::sync::{broadcast, watch};

/// Transitions buffered per lagging listener.
const TRANSITION_BACKLOG: usize = 64;

#[derive(Debug, Clone)]
pub(crate) struct StateCell {
    tx: Arc<watch::Sender<PipelineState>>,
    transitions: broadcast::Sender<PipelineState>,
    failure: Arc<Mutex<Option<FailureCause>>>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(PipelineState::Idle);
        let (transitions, _) = broadcast::channel(TRANSITION_BACKLOG);
        Self {
            tx: Arc::new(tx),
            transitions,
            failure: Arc::default(),
        }
    }

    pub(crate) fn get(&self) -> PipelineState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.tx.subscribe()
    }

    /// Every state entered from now on, in order. Unlike [`Self::subscribe`]
    /// nothing is coalesced.
    pub(crate) fn transitions(&self) -> broadcast::Receiver<PipelineState> {
        self.transitions.subscribe()
    }

    pub(crate) fn failure(&self) -> Option<FailureCause> {
        self.failure.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Move to `next` if the state machine allows it from the current state.
    pub(crate) fn transition(&self, next: PipelineState) -> GoliveResult<PipelineState> {
        let mut previous = None;
        self.tx.send_if_modified(|current| {
            if current.can_transition_to(next) {
                previous = Some(*current);
                *current = next;
                // Published under the watch lock so listeners see transitions
                // in the order they were applied.
                let _ = self.transitions.send(next);
                true
            } else {
                false
            }
        });
        match previous {
            Some(from) => {
                tracing::info!(%from, to = %next, "Pipeline state changed");
                Ok(from)
            }
            None => Err(GoliveError::invalid_state(format!(
                "cannot move from {} to {next}",
                self.get()
            ))),
        }
    }

    /// Record `err` as the failure cause and enter `Failed`.
    pub(crate) fn fail(&self, err: &GoliveError) {
        let cause = err.failure_cause();
        tracing::error!(cause = %cause, "Pipeline failed");
        *self.failure.lock().unwrap_or_else(|p| p.into_inner()) = Some(cause);
        if let Err(e) = self.transition(PipelineState::Failed) {
            tracing::debug!(error = %e, "Failure recorded without a state change");
        }
    }

    /// Leave `Failed`, forgetting the cause.
    pub(crate) fn reset(&self) -> GoliveResult<()> {
        self.transition(PipelineState::Idle)?;
        *self.failure.lock().unwrap_or_else(|p| p.into_inner()) = None;
        Ok(())
    }
}
