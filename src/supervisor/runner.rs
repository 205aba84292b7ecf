//! Supervisor runner for driving one press through the worker protocol.
//!
//! The runner spawns the worker, wires the tasks from [`crate::supervisor`]
//! together with a control channel and an event channel, feeds events to
//! the [`PressStateMachine`] until an [`Outcome`] is decided, and then shuts
//! everything down in a fixed order:
//!
//! 1. cancel Ticker and Signal Watcher and close the event channel,
//! 2. send `quit` (a worker that already exited is tolerated),
//! 3. wait for the worker, escalating to SIGTERM/SIGKILL after a grace period,
//! 4. return the outcome.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::SupervisorConfig;
use crate::supervisor::{
    forward_stderr, input_dispatcher, output_monitor, signal_watcher, ticker, NoopProgress,
    Outcome, PressStateMachine, ProgressSink, SignalSource, SupervisorEvent, TaskHandle,
    WorkerState,
};
use crate::worker::{Command, SpawnError, WorkerProcess};

/// Capacity of the control and event channels.
///
/// Tokio channels cannot be zero-sized; one slot keeps producers in
/// lockstep with the consumer.
pub const CHANNEL_CAPACITY: usize = 1;

/// Extension of the packaged database the worker writes next to its input.
pub const ARTIFACT_EXTENSION: &str = "dcp";

/// Error type for supervisor operations.
///
/// Everything that happens after the worker is running is folded into the
/// [`Outcome`] instead.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// The worker could not be started.
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] SpawnError),
    /// The input path has no usable file name.
    #[error("Input path has no file name: {}", .0.display())]
    InvalidInput(PathBuf),
}

/// Summary of one supervised run.
#[derive(Debug, Clone)]
pub struct PressReport {
    pub outcome: Outcome,
    /// Last accepted progress percentage.
    pub progress: u8,
    /// Worker exit status; `None` only if waiting itself failed.
    pub exit_status: Option<ExitStatus>,
    /// Where the worker writes the packaged database.
    pub artifact: PathBuf,
}

/// Drives one pressy worker through a press.
pub struct Supervisor {
    config: SupervisorConfig,
    sink: Box<dyn ProgressSink>,
    cancel: Option<CancellationToken>,
    machine: PressStateMachine,
}

impl Supervisor {
    #[must_use]
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            sink: Box::new(NoopProgress),
            cancel: None,
            machine: PressStateMachine::new(),
        }
    }

    /// Report progress to `sink`.
    #[must_use]
    pub fn with_progress_sink(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Treat `cancel` firing like a termination signal.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// State of the last (or current) run.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.machine.state()
    }

    #[must_use]
    pub fn progress(&self) -> u8 {
        self.machine.progress()
    }

    #[must_use]
    pub fn outcome(&self) -> Option<Outcome> {
        self.machine.outcome()
    }

    /// Press `input` and return once the worker has exited.
    ///
    /// The worker runs in the input's directory and receives only the file
    /// name.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError` only if the worker never started.
    pub async fn run(&mut self, input: &Path) -> Result<PressReport, SupervisorError> {
        let span = tracing::info_span!(
            "press",
            run_id = %Uuid::new_v4(),
            input = %input.display()
        );
        self.run_inner(input).instrument(span).await
    }

    async fn run_inner(&mut self, input: &Path) -> Result<PressReport, SupervisorError> {
        let filename = input
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| SupervisorError::InvalidInput(input.to_path_buf()))?
            .to_string();
        let workdir = input
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf);

        self.machine = PressStateMachine::new();
        let mut process = WorkerProcess::spawn(&self.config.worker_command(workdir))?;

        let (stdin, stdout) = match (process.take_stdin(), process.stdout_lines()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            (stdin, _) => {
                let missing = if stdin.is_none() { "stdin" } else { "stdout" };
                if let Err(e) = process.kill().await {
                    tracing::warn!(error = %e, "Failed to kill half-spawned worker");
                }
                reap(&mut process, self.config.shutdown_grace()).await;
                return Err(SpawnError::MissingPipe(missing).into());
            }
        };
        tracing::info!(pid = ?process.id(), %filename, "Worker started");

        let stderr_task = process
            .stderr_lines()
            .map(|lines| tokio::spawn(forward_stderr(lines)));

        let (control_tx, control_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, mut event_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let dispatcher = tokio::spawn(input_dispatcher(stdin, control_rx, event_tx.clone()));
        let monitor = tokio::spawn(output_monitor(stdout, event_tx.clone()));

        let subscription = SignalSource {
            os_signals: self.config.handle_signals,
            external: self.cancel.clone(),
        }
        .subscribe();
        let mut signals = TaskHandle::spawn("signal watcher", move |cancel| {
            signal_watcher(subscription, event_tx, cancel)
        });

        let mut ticker_task = None;
        let outcome = if control_tx
            .send(Command::Press(filename.clone()))
            .await
            .is_ok()
        {
            let commands = control_tx.clone();
            let period = self.config.poll_interval();
            ticker_task = Some(TaskHandle::spawn("ticker", move |cancel| {
                ticker(commands, period, cancel)
            }));
            self.drive(&mut event_rx).await
        } else {
            let closed = SupervisorEvent::StdinClosed("input dispatcher exited".to_string());
            self.machine.handle(&closed).unwrap_or(Outcome::Failed)
        };
        tracing::info!(%outcome, progress = self.machine.progress(), "Run decided");

        if let Some(ticker_task) = ticker_task.as_mut() {
            ticker_task.stop().await;
        }
        signals.stop().await;
        drop(event_rx);

        send_quit(&control_tx, self.config.shutdown_grace()).await;
        drop(control_tx);
        self.machine.finish();

        let abort = dispatcher.abort_handle();
        match tokio::time::timeout(self.config.shutdown_grace(), dispatcher).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Input dispatcher panicked"),
            Err(_) => {
                tracing::warn!("Input dispatcher stuck writing to worker, aborting");
                abort.abort();
            }
        }

        let exit_status = reap(&mut process, self.config.shutdown_grace()).await;

        monitor.abort();
        let _ = monitor.await;
        if let Some(task) = stderr_task {
            let abort = task.abort_handle();
            if tokio::time::timeout(self.config.shutdown_grace(), task)
                .await
                .is_err()
            {
                abort.abort();
            }
        }

        self.sink.on_finish(outcome);

        Ok(PressReport {
            outcome,
            progress: self.machine.progress(),
            exit_status,
            artifact: input.with_extension(ARTIFACT_EXTENSION),
        })
    }

    /// Consume events until the state machine decides an outcome.
    async fn drive(&mut self, events: &mut Receiver<SupervisorEvent>) -> Outcome {
        while let Some(event) = events.recv().await {
            let decided = self.machine.handle(&event);
            if let Some(percent) = self.machine.take_progress_update() {
                self.sink.on_progress(percent);
            }
            if let Some(outcome) = decided {
                return outcome;
            }
        }

        // Every producer is gone without a terminal event.
        self.machine
            .handle(&SupervisorEvent::StreamEnded)
            .unwrap_or(Outcome::Failed)
    }
}

async fn send_quit(commands: &Sender<Command>, grace: Duration) {
    match tokio::time::timeout(grace, commands.send(Command::Quit)).await {
        Ok(Ok(())) => tracing::debug!("Quit sent"),
        Ok(Err(_)) => tracing::debug!("Input dispatcher already stopped, quit not sent"),
        Err(_) => tracing::warn!("Timed out handing quit to the input dispatcher"),
    }
}

/// Wait for the worker, terminating it if it outlives `grace`.
async fn reap(process: &mut WorkerProcess, grace: Duration) -> Option<ExitStatus> {
    match tokio::time::timeout(grace, process.wait()).await {
        Ok(Ok(status)) => {
            tracing::info!(%status, "Worker exited");
            return Some(status);
        }
        Ok(Err(e)) => tracing::error!(error = %e, "Waiting for worker failed"),
        Err(_) => {
            tracing::warn!(?grace, "Worker still running after quit, terminating");
            if let Err(e) = process.graceful_terminate(grace).await {
                tracing::error!(error = %e, "Failed to terminate worker");
            }
        }
    }

    match process.wait().await {
        Ok(status) => {
            tracing::info!(%status, "Worker exited");
            Some(status)
        }
        Err(e) => {
            tracing::error!(error = %e, "Waiting for worker failed");
            None
        }
    }
}
