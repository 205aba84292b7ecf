//! Newline-delimited line reader over a worker stream.

use std::io::ErrorKind;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Error type for line reading.
#[derive(thiserror::Error, Debug)]
pub enum LineError {
    /// The peer closed the stream in the middle of a read.
    #[error("Stream reset by worker: {0}")]
    StreamReset(#[source] std::io::Error),
    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LineError {
    fn classify(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => {
                Self::StreamReset(err)
            }
            _ => Self::Io(err),
        }
    }
}

/// Reads trimmed text lines from a byte stream.
///
/// `Ok(None)` marks an ordinary end of stream. Invalid UTF-8 is replaced
/// rather than rejected.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Read the next line, without its terminator and surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns `LineError::StreamReset` if the stream was torn down mid-read.
    pub async fn next_line(&mut self) -> Result<Option<String>, LineError> {
        self.buf.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .await
            .map_err(LineError::classify)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).trim().to_string()))
    }

    /// Convert into a lazy stream of lines.
    ///
    /// The stream ends after the first error or at end of stream.
    pub fn into_stream(self) -> impl futures_core::Stream<Item = Result<String, LineError>>
    where
        R: Send,
    {
        futures_util::stream::unfold(Some(self), |state| async move {
            let mut reader = state?;
            match reader.next_line().await {
                Ok(Some(line)) => Some((Ok(line), Some(reader))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
