//! Progress observers.

use crate::supervisor::Outcome;

/// Receives progress while a press is running.
///
/// Purely observational: nothing a sink does affects the run.
pub trait ProgressSink: Send {
    /// Called whenever the accepted percentage changes.
    fn on_progress(&mut self, percent: u8);

    /// Called once when the run has finished.
    fn on_finish(&mut self, outcome: Outcome) {
        let _ = outcome;
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&mut self, _percent: u8) {}
}

impl<F> ProgressSink for F
where
    F: FnMut(u8) + Send,
{
    fn on_progress(&mut self, percent: u8) {
        self(percent);
    }
}
