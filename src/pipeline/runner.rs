//! Sequential job processing: fetch, press, publish, acknowledge.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::pipeline::{FileTransfer, Job, JobSource, PipelineError};
use crate::supervisor::{NoopProgress, Outcome, ProgressSink, Supervisor};

type SinkFactory = Box<dyn Fn(&Job) -> Box<dyn ProgressSink> + Send + Sync>;
type OutcomeHook = Box<dyn Fn(&JobOutcome) + Send + Sync>;

/// Result of processing one job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: Job,
    pub outcome: Outcome,
    /// Service response to the upload, if the artifact was published.
    pub published: Option<String>,
}

impl JobOutcome {
    /// Whether the job should be acknowledged to its source.
    ///
    /// Interrupted jobs stay unacknowledged so they are delivered again.
    #[must_use]
    pub fn should_acknowledge(&self) -> bool {
        matches!(self.outcome, Outcome::Succeeded | Outcome::Failed)
    }
}

/// Tally of a [`JobRunner::run`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs that errored before or after pressing.
    pub errored: usize,
    pub cancelled: bool,
}

/// Drives jobs one at a time through a [`FileTransfer`] and a [`Supervisor`].
pub struct JobRunner<T> {
    transfer: T,
    config: SupervisorConfig,
    cancel: CancellationToken,
    sinks: SinkFactory,
    on_outcome: OutcomeHook,
}

impl<T: FileTransfer> JobRunner<T> {
    #[must_use]
    pub fn new(transfer: T, config: SupervisorConfig) -> Self {
        Self {
            transfer,
            config,
            cancel: CancellationToken::new(),
            sinks: Box::new(noop_sink),
            on_outcome: Box::new(ignore_outcome),
        }
    }

    /// Stop processing when `cancel` fires; a running press is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build a progress sink for each job.
    #[must_use]
    pub fn with_progress<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Job) -> Box<dyn ProgressSink> + Send + Sync + 'static,
    {
        self.sinks = Box::new(factory);
        self
    }

    /// Observe every job that was pressed, before it is acknowledged.
    #[must_use]
    pub fn on_outcome<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JobOutcome) + Send + Sync + 'static,
    {
        self.on_outcome = Box::new(hook);
        self
    }

    #[must_use]
    pub fn transfer(&self) -> &T {
        &self.transfer
    }

    /// Fetch, press and (on success) publish one job.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if the transfer fails or the worker cannot be
    /// started.
    pub async fn process(&self, job: &Job) -> Result<JobOutcome, PipelineError> {
        let input = self
            .transfer
            .fetch(&job.download_path(), &job.filename)
            .await?;

        let mut supervisor = Supervisor::new(self.config.clone())
            .with_progress_sink(BoxedSink((self.sinks)(job)))
            .with_cancellation(self.cancel.child_token());
        let report = supervisor.run(&input).await?;

        let published = if report.outcome.is_success() {
            Some(self.publish(&report.artifact).await?)
        } else {
            None
        };

        Ok(JobOutcome {
            job: job.clone(),
            outcome: report.outcome,
            published,
        })
    }

    async fn publish(&self, artifact: &Path) -> Result<String, PipelineError> {
        let response = self.transfer.publish(artifact).await?;
        tracing::info!(artifact = %artifact.display(), %response, "Artifact published");
        Ok(response)
    }

    /// Process every job of `source` in order.
    ///
    /// Stops when the source is exhausted, when the cancellation token fires
    /// (also while waiting for the next job) or after a cancelled press. A
    /// job whose processing errors is logged and left unacknowledged.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if the source itself fails.
    pub async fn run<S: JobSource + ?Sized>(
        &self,
        source: &mut S,
    ) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                next = source.next() => next?,
            };
            let Some(job) = next else {
                break;
            };
            tracing::info!(id = job.id, filename = %job.filename, "Processing job");

            let result = match self.process(&job).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(id = job.id, error = %e, "Job failed");
                    summary.errored += 1;
                    continue;
                }
            };

            (self.on_outcome)(&result);
            match result.outcome {
                Outcome::Succeeded => summary.succeeded += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Cancelled | Outcome::TimedOut => {}
            }
            if result.should_acknowledge() {
                source.acknowledge(&job).await?;
            }
            if result.outcome == Outcome::Cancelled {
                summary.cancelled = true;
                break;
            }
        }

        if self.cancel.is_cancelled() {
            summary.cancelled = true;
        }
        Ok(summary)
    }
}

fn ignore_outcome(_: &JobOutcome) {}

fn noop_sink(_: &Job) -> Box<dyn ProgressSink> {
    Box::new(NoopProgress)
}

/// Adapts a boxed sink to the `impl ProgressSink` the supervisor takes.
struct BoxedSink(Box<dyn ProgressSink>);

impl ProgressSink for BoxedSink {
    fn on_progress(&mut self, percent: u8) {
        self.0.on_progress(percent);
    }

    fn on_finish(&mut self, outcome: Outcome) {
        self.0.on_finish(outcome);
    }
}
