//! Concurrent tasks wired around a running worker.
//!
//! ```text
//!  Ticker ──┐ Query                          ┌── Output Monitor (stdout)
//!           ├──► control ──► Input Dispatcher │
//!  Supervisor ┘ Press/Quit       │ stdin       ├──► events ──► Supervisor
//!                                ▼             │
//!                              worker ─────────┘── Signal Watcher
//! ```
//!
//! Every task exits on its own once its input ends or the channel it sends
//! into is closed. Ticker and Signal Watcher additionally observe a
//! [`CancellationToken`] held by the supervisor through a [`TaskHandle`].

use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::worker::{
    parse_line, Command, LineError, LineReader, ProtocolViolation, WorkerEvent, WorkerStdin,
};

/// Signal that requested cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// Caller-supplied cancellation token.
    External,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::External => "external",
        };
        f.write_str(name)
    }
}

/// Events consumed by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A well-formed status line.
    Worker(WorkerEvent),
    /// A stdout line outside the protocol.
    Violation(ProtocolViolation),
    /// Worker stdout reached end of stream.
    StreamEnded,
    /// Worker stdout failed mid-read.
    StreamReset(String),
    /// A command other than `quit` could not be written.
    StdinClosed(String),
    /// Operator cancellation.
    Cancelled(ShutdownSignal),
}

/// A spawned task paired with its cancellation token.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawn `task`, handing it a fresh cancellation token.
    pub fn spawn<F, Fut>(name: &'static str, task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task(cancel.clone()));
        Self {
            name,
            cancel,
            handle: Some(handle),
        }
    }

    /// Request cancellation. Calling this more than once has no effect.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(task = self.name, "Cancelling task");
            self.cancel.cancel();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait for the task to finish.
    pub async fn stop(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(task = self.name, error = %e, "Task did not finish cleanly");
            }
        }
    }
}

/// Send `Query` into the control channel once per `period` until cancelled.
///
/// The first query goes out immediately.
pub async fn ticker(commands: Sender<Command>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            sent = commands.send(Command::Query) => {
                if sent.is_err() {
                    tracing::debug!("Control channel closed");
                    break;
                }
            }
        }
    }
    tracing::debug!("Ticker stopped");
}

fn is_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset
    )
}

/// Write commands to the worker's stdin in arrival order.
///
/// Exits after writing `quit`, dropping stdin. A failed write of any other
/// command is reported as [`SupervisorEvent::StdinClosed`].
pub async fn input_dispatcher(
    mut stdin: WorkerStdin,
    mut commands: Receiver<Command>,
    events: Sender<SupervisorEvent>,
) {
    while let Some(command) = commands.recv().await {
        tracing::trace!(%command, "Writing command");
        match stdin.write(command.to_line().as_bytes()).await {
            Ok(()) => {}
            Err(e) if command.is_quit() && is_disconnect(&e) => {
                tracing::debug!(error = %e, "Worker already gone, quit not delivered");
            }
            Err(e) if command.is_quit() => {
                tracing::warn!(error = %e, "Failed to write quit");
            }
            Err(e) => {
                tracing::error!(%command, error = %e, "Failed to write command");
                let _ = events.send(SupervisorEvent::StdinClosed(e.to_string())).await;
                break;
            }
        }
        if command.is_quit() {
            break;
        }
    }
    tracing::debug!("Input dispatcher stopped");
}

/// Classify worker stdout lines into events.
///
/// Ends at end of stream, on a read error, or when the event channel closes.
pub async fn output_monitor<R>(mut lines: LineReader<R>, events: Sender<SupervisorEvent>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let (event, last) = match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::trace!(%line, "Worker stdout");
                let event = match parse_line(&line) {
                    Ok(event) => SupervisorEvent::Worker(event),
                    Err(violation) => SupervisorEvent::Violation(violation),
                };
                (event, false)
            }
            Ok(None) => {
                tracing::debug!("Worker stdout closed");
                (SupervisorEvent::StreamEnded, true)
            }
            Err(LineError::StreamReset(e) | LineError::Io(e)) => {
                (SupervisorEvent::StreamReset(e.to_string()), true)
            }
        };

        if events.send(event).await.is_err() || last {
            break;
        }
    }
    tracing::debug!("Output monitor stopped");
}

/// Copy worker stderr lines to our stderr.
pub async fn forward_stderr<R>(lines: LineReader<R>)
where
    R: AsyncRead + Unpin + Send,
{
    let mut stream = std::pin::pin!(lines.into_stream());
    while let Some(line) = stream.next().await {
        match line {
            Ok(line) => eprintln!("{line}"),
            Err(e) => {
                tracing::debug!(error = %e, "Worker stderr closed");
                break;
            }
        }
    }
}

/// Where cancellation requests come from.
#[derive(Debug, Clone, Default)]
pub struct SignalSource {
    /// Listen for SIGINT and SIGTERM.
    pub os_signals: bool,
    /// Treat this token being cancelled as a signal.
    pub external: Option<CancellationToken>,
}

impl SignalSource {
    /// Register signal handlers now, so no signal is missed between
    /// spawning the watcher and its first poll.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn subscribe(self) -> SignalSubscription {
        SignalSubscription {
            os: self.os_signals.then(OsSignals::register).flatten(),
            external: self.external,
        }
    }
}

/// Registered signal handlers.
#[derive(Debug)]
pub struct SignalSubscription {
    os: Option<OsSignals>,
    external: Option<CancellationToken>,
}

impl SignalSubscription {
    /// Wait for the first signal. Pends forever when nothing is subscribed.
    pub async fn recv(&mut self) -> ShutdownSignal {
        let Self { os, external } = self;
        let external = async {
            match external {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let os = async {
            match os.as_mut() {
                Some(os) => os.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = external => ShutdownSignal::External,
            signal = os => signal,
        }
    }
}

#[cfg(unix)]
#[derive(Debug)]
struct OsSignals {
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl OsSignals {
    fn register() -> Option<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(terminate), Ok(interrupt)) => Some(Self {
                terminate,
                interrupt,
            }),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Cannot subscribe to termination signals");
                None
            }
        }
    }

    async fn recv(&mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.terminate.recv() => ShutdownSignal::Terminate,
            _ = self.interrupt.recv() => ShutdownSignal::Interrupt,
        }
    }
}

#[cfg(not(unix))]
#[derive(Debug)]
struct OsSignals;

#[cfg(not(unix))]
impl OsSignals {
    #[allow(clippy::unnecessary_wraps)]
    fn register() -> Option<Self> {
        Some(Self)
    }

    async fn recv(&mut self) -> ShutdownSignal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        ShutdownSignal::Interrupt
    }
}

/// Emit one [`SupervisorEvent::Cancelled`] for the first signal, then stop.
pub async fn signal_watcher(
    mut signals: SignalSubscription,
    events: Sender<SupervisorEvent>,
    cancel: CancellationToken,
) {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {}
        signal = signals.recv() => {
            tracing::info!(%signal, "Received shutdown signal");
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                sent = events.send(SupervisorEvent::Cancelled(signal)) => {
                    if sent.is_err() {
                        tracing::debug!("Event channel closed before cancellation was delivered");
                    }
                }
            }
        }
    }
    tracing::debug!("Signal watcher stopped");
}

/// Cancel `token` on the first SIGINT or SIGTERM (Ctrl+C off Unix).
///
/// Handlers are registered before this returns. The task ends early if
/// `token` is cancelled by someone else.
pub fn cancel_on_signal(token: CancellationToken) -> JoinHandle<()> {
    let mut signals = SignalSource {
        os_signals: true,
        external: None,
    }
    .subscribe();

    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            signal = signals.recv() => {
                tracing::info!(%signal, "Shutdown requested, stopping after the current job");
                token.cancel();
            }
        }
    })
}
