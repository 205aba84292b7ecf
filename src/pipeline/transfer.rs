//! Moving profile files and pressed databases to and from the file service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tokio::io::AsyncWriteExt;

use crate::config::ApiConfig;
use crate::pipeline::PipelineError;

/// Connection timeout for HTTP requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Multipart field the pressed database is uploaded under.
pub const UPLOAD_FIELD: &str = "db_file";

/// Endpoint accepting pressed databases.
pub const UPLOAD_PATH: &str = "/dbs/";

const UPLOAD_MIME: &str = "application/octet-stream";
const API_KEY_HEADER: &str = "X-API-KEY";

/// Retrieves inputs and publishes artifacts.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Download `remote_path` and store it locally as `filename`.
    async fn fetch(&self, remote_path: &str, filename: &str) -> Result<PathBuf, PipelineError>;

    /// Upload the file at `local_path`, returning the service's response.
    async fn publish(&self, local_path: &Path) -> Result<String, PipelineError>;
}

/// [`FileTransfer`] over the file service's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpFileTransfer {
    client: Client,
    api: ApiConfig,
    download_dir: PathBuf,
}

impl HttpFileTransfer {
    /// Create a client for `api` storing downloads in `download_dir`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Http` if the HTTP client cannot be built.
    pub fn new(api: ApiConfig, download_dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            client,
            api,
            download_dir: download_dir.into(),
        })
    }

    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Local destination for `filename`, refusing anything but a bare name.
    fn destination(&self, filename: &str) -> Result<PathBuf, PipelineError> {
        let name = Path::new(filename)
            .file_name()
            .filter(|name| name.to_str() == Some(filename))
            .ok_or_else(|| PipelineError::InvalidFilename(filename.to_string()))?;
        Ok(self.download_dir.join(name))
    }
}

#[async_trait]
impl FileTransfer for HttpFileTransfer {
    async fn fetch(&self, remote_path: &str, filename: &str) -> Result<PathBuf, PipelineError> {
        let destination = self.destination(filename)?;
        let url = self.api.endpoint(remote_path)?;
        tracing::info!(%url, destination = %destination.display(), "Downloading");

        let mut response = self
            .client
            .get(url)
            .header("Accept", "*/*")
            .header(API_KEY_HEADER, &self.api.api_key)
            .send()
            .await?
            .error_for_status()?;

        let mut file = tokio::fs::File::create(&destination).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            if chunk.is_empty() {
                continue;
            }
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::info!(bytes = written, "Download finished");
        Ok(destination)
    }

    async fn publish(&self, local_path: &Path) -> Result<String, PipelineError> {
        let url = self.api.endpoint(UPLOAD_PATH)?;
        let file_name = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| PipelineError::InvalidFilename(local_path.display().to_string()))?
            .to_string();
        let bytes = tokio::fs::read(local_path).await?;
        tracing::info!(%url, file = %file_name, bytes = bytes.len(), "Uploading");

        let part = Part::bytes(bytes).file_name(file_name).mime_str(UPLOAD_MIME)?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        let body: serde_json::Value = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .header(API_KEY_HEADER, &self.api.api_key)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(serde_json::to_string_pretty(&body)?)
    }
}
