//! HTTP file transfer against a one-shot stub server.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use pressy_supervisor::config::ApiConfig;
use pressy_supervisor::pipeline::{FileTransfer, HttpFileTransfer, PipelineError};

/// Serve one request with `status` and `body`; resolves to the raw request.
async fn serve_once(status: &'static str, body: &'static str) -> (ApiConfig, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            if request_complete(&request) {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8_lossy(&request).into_owned()
    });

    let api = ApiConfig {
        host: "127.0.0.1".to_string(),
        port,
        api_key: "secret".to_string(),
        ..ApiConfig::default()
    };
    (api, handle)
}

/// Headers received and, for a body, its multipart terminator.
fn request_complete(request: &[u8]) -> bool {
    let text = String::from_utf8_lossy(request);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let headers = text[..header_end].to_ascii_lowercase();
    if !headers.contains("content-type: multipart/form-data") {
        return true;
    }
    let body = &text[header_end + 4..];
    body.ends_with("--\r\n") || body.ends_with("0\r\n\r\n")
}

#[tokio::test]
async fn fetch_downloads_into_directory() {
    let (api, server) = serve_once("200 OK", "HMMER3/f\n//\n").await;
    let dir = tempfile::tempdir().unwrap();
    let transfer = HttpFileTransfer::new(api, dir.path()).unwrap();

    let path = transfer.fetch("/hmms/4/download", "pfam.hmm").await.unwrap();

    assert_eq!(path, dir.path().join("pfam.hmm"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "HMMER3/f\n//\n");
    let request = server.await.unwrap();
    assert!(request.starts_with("GET /hmms/4/download HTTP/1.1"));
    assert!(request.to_ascii_lowercase().contains("x-api-key: secret"));
}

#[tokio::test]
async fn fetch_http_error_is_reported() {
    let (api, server) = serve_once("404 Not Found", "{}").await;
    let dir = tempfile::tempdir().unwrap();
    let transfer = HttpFileTransfer::new(api, dir.path()).unwrap();

    let err = transfer.fetch("/hmms/9/download", "x.hmm").await.unwrap_err();

    assert!(matches!(err, PipelineError::Http(_)));
    assert!(!dir.path().join("x.hmm").exists());
    server.await.unwrap();
}

#[tokio::test]
async fn publish_uploads_multipart() {
    let (api, server) = serve_once("201 Created", r#"{"id":1,"filename":"pfam.dcp"}"#).await;
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("pfam.dcp");
    std::fs::write(&artifact, b"packed").unwrap();
    let transfer = HttpFileTransfer::new(api, dir.path()).unwrap();

    let response = transfer.publish(&artifact).await.unwrap();

    assert!(response.contains("\n  \"id\": 1"));
    let body: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert_eq!(body["filename"], "pfam.dcp");
    let request = server.await.unwrap();
    assert!(request.starts_with("POST /dbs/ HTTP/1.1"));
    assert!(request.contains(r#"name="db_file"; filename="pfam.dcp""#));
    assert!(request.contains("application/octet-stream"));
    assert!(request.contains("packed"));
}

#[tokio::test]
async fn fetch_rejects_path_like_filename() {
    let dir = tempfile::tempdir().unwrap();
    let transfer = HttpFileTransfer::new(ApiConfig::default(), dir.path()).unwrap();

    let err = transfer.fetch("/hmms/1/download", "../escape.hmm").await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidFilename(_)));
}
