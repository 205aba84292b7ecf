//! Press run state machine.
//!
//! The machine is pure: it consumes [`SupervisorEvent`]s one at a time and
//! decides the [`Outcome`]. All I/O lives in the runner.

use serde::{Deserialize, Serialize};

use crate::supervisor::{ShutdownSignal, SupervisorEvent};
use crate::worker::WorkerEvent;

/// Protocol state of the supervised worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    #[default]
    Init,
    Running,
    Done,
    Failed,
    Quit,
}

impl WorkerState {
    /// `Done`, `Failed` and `Quit` accept no further events.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Quit)
    }
}

/// Terminal classification of one supervised run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    Cancelled,
    /// Reserved for a bounded-duration run; nothing produces it yet.
    TimedOut,
}

impl Outcome {
    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::TimedOut => 1,
            Self::Cancelled => 2,
            Self::Failed => 3,
        }
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed out",
        };
        f.write_str(name)
    }
}

/// State machine for one press run.
#[derive(Debug, Clone, Default)]
pub struct PressStateMachine {
    state: WorkerState,
    progress: u8,
    reported: Option<u8>,
    outcome: Option<Outcome>,
    updates: usize,
    /// A real percentage has been read (or the press completed).
    measured: bool,
}

impl PressStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Last accepted progress percentage.
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// The outcome, once decided. Never changes afterwards.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Number of progress reports received while running.
    #[must_use]
    pub fn updates(&self) -> usize {
        self.updates
    }

    /// Progress not yet handed to a progress sink, if it changed.
    pub fn take_progress_update(&mut self) -> Option<u8> {
        if !self.measured || self.reported == Some(self.progress) {
            return None;
        }
        self.reported = Some(self.progress);
        Some(self.progress)
    }

    /// Apply one event. Returns the outcome when this event decided it.
    pub fn handle(&mut self, event: &SupervisorEvent) -> Option<Outcome> {
        if self.state.is_terminal() {
            tracing::debug!(state = ?self.state, ?event, "Event after terminal state ignored");
            return None;
        }

        match event {
            SupervisorEvent::Worker(worker_event) => self.handle_worker(*worker_event),
            SupervisorEvent::Cancelled(signal) => Some(self.cancel(*signal)),
            SupervisorEvent::Violation(violation) => {
                tracing::warn!(%violation, "Protocol violation");
                Some(self.fail())
            }
            SupervisorEvent::StreamEnded => {
                tracing::warn!(state = ?self.state, "Worker stdout closed before completion");
                Some(self.fail())
            }
            SupervisorEvent::StreamReset(reason) => {
                tracing::error!(state = ?self.state, %reason, "Worker stdout reset");
                Some(self.fail())
            }
            SupervisorEvent::StdinClosed(reason) => {
                tracing::error!(state = ?self.state, %reason, "Writing to worker stdin failed");
                Some(self.fail())
            }
        }
    }

    fn handle_worker(&mut self, event: WorkerEvent) -> Option<Outcome> {
        match (self.state, event) {
            (_, WorkerEvent::Failed { stage }) => {
                tracing::warn!(?stage, progress = self.progress, "Worker reported failure");
                Some(self.fail())
            }
            (WorkerState::Init, WorkerEvent::Progress(progress)) => {
                self.transition(WorkerState::Running);
                self.record_progress(progress);
                None
            }
            // A first `done` only confirms the press started; the next
            // query confirms completion.
            (WorkerState::Init, WorkerEvent::Completed) => {
                self.transition(WorkerState::Running);
                None
            }
            (WorkerState::Running, WorkerEvent::Progress(progress)) => {
                self.record_progress(progress);
                None
            }
            (WorkerState::Running, WorkerEvent::Completed) => {
                self.progress = 100;
                self.measured = true;
                self.transition(WorkerState::Done);
                Some(self.decide(Outcome::Succeeded))
            }
            (WorkerState::Done | WorkerState::Failed | WorkerState::Quit, _) => None,
        }
    }

    fn record_progress(&mut self, progress: Option<u8>) {
        self.updates = self.updates.saturating_add(1);
        let Some(value) = progress else {
            tracing::debug!("Progress unavailable");
            return;
        };
        if value < self.progress {
            tracing::warn!(
                reported = value,
                last = self.progress,
                "Progress regressed, ignoring"
            );
            return;
        }
        self.progress = value.min(100);
        self.measured = true;
    }

    fn fail(&mut self) -> Outcome {
        self.transition(WorkerState::Failed);
        self.decide(Outcome::Failed)
    }

    fn cancel(&mut self, signal: ShutdownSignal) -> Outcome {
        tracing::info!(%signal, "Cancellation requested");
        self.transition(WorkerState::Quit);
        self.decide(Outcome::Cancelled)
    }

    /// Enter `Quit` after `Done` or `Failed`, once `quit` has been sent.
    pub fn finish(&mut self) {
        if self.state != WorkerState::Quit {
            self.transition(WorkerState::Quit);
        }
    }

    fn decide(&mut self, outcome: Outcome) -> Outcome {
        *self.outcome.get_or_insert(outcome)
    }

    fn transition(&mut self, new_state: WorkerState) {
        tracing::debug!(from = ?self.state, to = ?new_state, "State transition");
        self.state = new_state;
    }
}
