//! Job descriptors and the sources that deliver them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::pipeline::PipelineError;
use crate::worker::LineReader;

/// One profile file to press.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Identifier of the profile file on the file service.
    pub id: i64,
    /// File name the profile is stored under locally.
    pub filename: String,
    /// Optional identifier of the job record tracking this press.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,
}

impl Job {
    #[must_use]
    pub fn new(id: i64, filename: impl Into<String>) -> Self {
        Self {
            id,
            filename: filename.into(),
            job_id: None,
        }
    }

    /// Path of the profile's download endpoint, relative to the API root.
    #[must_use]
    pub fn download_path(&self) -> String {
        format!("/hmms/{}/download", self.id)
    }
}

/// Upstream source of jobs.
///
/// A job that is not acknowledged is expected to be redelivered.
#[async_trait]
pub trait JobSource: Send {
    /// Next job, or `None` once the source is exhausted.
    async fn next(&mut self) -> Result<Option<Job>, PipelineError>;

    /// Mark `job` as done.
    async fn acknowledge(&mut self, job: &Job) -> Result<(), PipelineError>;
}

/// A source yielding exactly one job.
#[derive(Debug, Clone)]
pub struct SingleJob {
    job: Option<Job>,
    acknowledged: bool,
}

impl SingleJob {
    #[must_use]
    pub fn new(job: Job) -> Self {
        Self {
            job: Some(job),
            acknowledged: false,
        }
    }

    #[must_use]
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }
}

#[async_trait]
impl JobSource for SingleJob {
    async fn next(&mut self) -> Result<Option<Job>, PipelineError> {
        Ok(self.job.take())
    }

    async fn acknowledge(&mut self, job: &Job) -> Result<(), PipelineError> {
        tracing::info!(id = job.id, filename = %job.filename, "Job acknowledged");
        self.acknowledged = true;
        Ok(())
    }
}

/// Jobs read as one JSON object per line.
///
/// ```text
/// {"id": 1, "filename": "Pfam-A.hmm"}
/// {"id": 2, "filename": "minifam.hmm", "job_id": 7}
/// ```
pub struct JsonLinesJobSource<R> {
    lines: LineReader<R>,
    acknowledged: Vec<Job>,
}

impl<R: AsyncRead + Unpin + Send> JsonLinesJobSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: LineReader::new(reader),
            acknowledged: Vec::new(),
        }
    }

    /// Jobs acknowledged so far, in order.
    #[must_use]
    pub fn acknowledged(&self) -> &[Job] {
        &self.acknowledged
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> JobSource for JsonLinesJobSource<R> {
    async fn next(&mut self) -> Result<Option<Job>, PipelineError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            if line.is_empty() {
                continue;
            }
            let job = serde_json::from_str(&line)?;
            tracing::debug!(?job, "Job received");
            return Ok(Some(job));
        }
    }

    async fn acknowledge(&mut self, job: &Job) -> Result<(), PipelineError> {
        tracing::info!(
            id = job.id,
            filename = %job.filename,
            total = self.acknowledged.len() + 1,
            "Job acknowledged"
        );
        self.acknowledged.push(job.clone());
        Ok(())
    }
}
