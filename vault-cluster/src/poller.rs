//! Operation poller - waits for an asynchronous control plane operation to
//! reach a terminal state.
//!
//! The wait loop is the only suspension point of a lifecycle call. Every
//! status query and every sleep between queries races the call deadline and
//! the cancellation token, so neither has to wait for the next tick to be
//! noticed.

use thiserror::Error;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clients::{ClientError, ControlPlane, OperationHandle, OperationState};
use crate::config::PollConfig;

/// Per-call phase of a mutating lifecycle action. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Submitted,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Phase::Submitted | Phase::Polling)
    }

    fn can_advance_to(&self, next: Phase) -> bool {
        match self {
            Phase::Submitted => next != Phase::Submitted,
            Phase::Polling => next.is_terminal(),
            _ => false,
        }
    }
}

/// Tracks the phase of one call and logs each transition.
#[derive(Debug)]
pub struct PhaseTracker {
    operation_id: String,
    phase: Phase,
}

impl PhaseTracker {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            phase: Phase::Submitted,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to `next`. Terminal phases never transition again; an invalid
    /// transition is ignored and reported.
    pub fn advance(&mut self, next: Phase) {
        if !self.phase.can_advance_to(next) {
            warn!(
                operation_id = %self.operation_id,
                from = ?self.phase,
                to = ?next,
                "Ignoring invalid phase transition"
            );
            return;
        }
        debug!(operation_id = %self.operation_id, from = ?self.phase, to = ?next, "Phase transition");
        self.phase = next;
    }
}

/// Terminal result of an operation that the control plane reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Succeeded,
    Failed { reason: String },
}

/// Reasons a wait ended without a terminal status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("deadline exceeded while operation {operation_id} was {}", state_name(.last_state))]
    TimedOut {
        operation_id: String,
        last_state: Option<OperationState>,
    },

    #[error("wait for operation {operation_id} cancelled")]
    Cancelled { operation_id: String },

    #[error("operation {operation_id} status unavailable after {attempts} transient failure(s): {message}")]
    Transient {
        operation_id: String,
        attempts: u32,
        message: String,
    },

    #[error("operation status query failed: {0}")]
    Client(ClientError),
}

fn state_name(state: &Option<OperationState>) -> &'static str {
    match state {
        None => "never observed",
        Some(OperationState::Pending) => "pending",
        Some(OperationState::Running) => "running",
        Some(OperationState::Done) => "done",
    }
}

/// Polls one client's operations at a fixed interval.
pub struct OperationPoller<'a, C: ?Sized> {
    client: &'a C,
    config: PollConfig,
}

impl<'a, C: ControlPlane + ?Sized> OperationPoller<'a, C> {
    pub fn new(client: &'a C, config: PollConfig) -> Self {
        Self { client, config }
    }

    /// Wait for `operation` to finish, until `deadline` at the latest.
    pub async fn wait(
        &self,
        operation: &OperationHandle,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, WaitError> {
        let mut tracker = PhaseTracker::new(&operation.id);
        tracker.advance(Phase::Polling);

        let mut last_state = None;
        let mut transient_errors = 0u32;
        let mut polls = 0u32;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracker.advance(Phase::Cancelled);
                    return Err(WaitError::Cancelled { operation_id: operation.id.clone() });
                }
                _ = sleep_until(deadline) => {
                    tracker.advance(Phase::TimedOut);
                    return Err(WaitError::TimedOut {
                        operation_id: operation.id.clone(),
                        last_state,
                    });
                }
                r = self.client.get_operation(operation) => r,
            };
            polls += 1;

            match result {
                Ok(status) => {
                    transient_errors = 0;
                    last_state = Some(status.state);
                    if status.is_terminal() {
                        return Ok(match status.error {
                            None => {
                                tracker.advance(Phase::Succeeded);
                                info!(operation_id = %operation.id, polls, "Operation succeeded");
                                WaitOutcome::Succeeded
                            }
                            Some(reason) => {
                                tracker.advance(Phase::Failed);
                                warn!(operation_id = %operation.id, polls, reason = %reason, "Operation failed");
                                WaitOutcome::Failed { reason }
                            }
                        });
                    }
                    debug!(operation_id = %operation.id, polls, state = ?status.state, "Operation not done yet");
                }
                Err(e) if e.is_transient() => {
                    transient_errors += 1;
                    if transient_errors > self.config.max_transient_errors {
                        tracker.advance(Phase::Failed);
                        return Err(WaitError::Transient {
                            operation_id: operation.id.clone(),
                            attempts: transient_errors,
                            message: e.to_string(),
                        });
                    }
                    warn!(
                        operation_id = %operation.id,
                        attempt = transient_errors,
                        error = %e,
                        "Transient error querying operation, retrying"
                    );
                }
                Err(e) => {
                    tracker.advance(Phase::Failed);
                    return Err(WaitError::Client(e));
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracker.advance(Phase::Cancelled);
                    return Err(WaitError::Cancelled { operation_id: operation.id.clone() });
                }
                _ = sleep_until(deadline) => {
                    tracker.advance(Phase::TimedOut);
                    return Err(WaitError::TimedOut {
                        operation_id: operation.id.clone(),
                        last_state,
                    });
                }
                _ = sleep(self.config.interval) => {}
            }
        }
    }
}
