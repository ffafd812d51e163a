//! HTTP storage client tests against an in-process responder.

use chrono::Utc;
use invigil_storage::fakes::MemoryStorageEndpoint;
use invigil_storage::{
    HttpStorageClient, MediaRegistration, StorageConfig, StorageEndpoint, StorageError,
    UploadPackage,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

fn package() -> UploadPackage {
    UploadPackage {
        file_name: "session-s1-abc.webm".to_string(),
        content_type: "video/webm".to_string(),
        bytes: vec![1, 2, 3, 4],
        session_id: "s1".to_string(),
        subject_id: "candidate-7".to_string(),
        submission_id: "sub-9".to_string(),
        expires_at: Utc::now(),
        notify: true,
        sha256: "00".repeat(32),
        duration_secs: 42,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let Some(end) = find(&buf, b"\r\n\r\n") else {
            continue;
        };
        let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
        let length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok());
        match length {
            Some(length) if buf.len() >= end + 4 + length => break,
            Some(_) => continue,
            None if headers.contains("transfer-encoding: chunked") => {
                if buf.ends_with(b"0\r\n\r\n") {
                    break;
                }
            }
            None => break,
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Accept one connection, answer with `status` and `body`, return the raw request.
async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        request
    });
    (format!("http://{addr}"), handle)
}

#[tokio::test]
async fn test_upload_sends_multipart_with_metadata() {
    let (base, server) = serve_once("200 OK", r#"{"url":"https://cdn.example.com/r.webm"}"#).await;
    let client = HttpStorageClient::new(StorageConfig::new(&base).with_token("t0k")).unwrap();

    let receipt = client.upload(package()).await.unwrap();
    assert_eq!(receipt.url.as_deref(), Some("https://cdn.example.com/r.webm"));

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /recordings "));
    assert!(request.to_lowercase().contains("authorization: bearer t0k"));
    assert!(request.contains("name=\"sessionId\""));
    assert!(request.contains("candidate-7"));
    assert!(request.contains("filename=\"session-s1-abc.webm\""));
    assert!(request.contains("name=\"notify\""));
}

#[tokio::test]
async fn test_upload_non_2xx_is_rejected_with_body() {
    let (base, server) = serve_once("507 Insufficient Storage", "disk full").await;
    let client = HttpStorageClient::new(StorageConfig::new(&base)).unwrap();

    let err = client.upload(package()).await.unwrap_err();
    assert_eq!(
        err,
        StorageError::Rejected {
            status: 507,
            body: "disk full".to_string()
        }
    );
    server.await.unwrap();
}

#[tokio::test]
async fn test_upload_without_url_is_malformed() {
    let (base, server) = serve_once("200 OK", r#"{"id":"123"}"#).await;
    let client = HttpStorageClient::new(StorageConfig::new(&base)).unwrap();

    let err = client.upload(package()).await.unwrap_err();
    assert!(matches!(err, StorageError::MalformedResponse(_)));
    server.await.unwrap();
}

#[tokio::test]
async fn test_register_posts_json() {
    let (base, server) = serve_once("201 Created", r#"{"ok":true}"#).await;
    let client = HttpStorageClient::new(StorageConfig::new(&base)).unwrap();

    let receipt = client
        .register(MediaRegistration {
            session_id: "s1".to_string(),
            subject_id: "candidate-7".to_string(),
            submission_id: "sub-9".to_string(),
            external_url: "https://videos.example.com/v/1".to_string(),
            duration: 300,
        })
        .await
        .unwrap();
    assert!(receipt.url.is_none());
    assert_eq!(receipt.raw["ok"], true);

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /recordings/register "));
    assert!(request.contains("\"externalUrl\":\"https://videos.example.com/v/1\""));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_http_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = HttpStorageClient::new(StorageConfig::new(&format!("http://{addr}"))).unwrap();
    let err = client.upload(package()).await.unwrap_err();
    assert!(matches!(err, StorageError::Http(_)));
}

#[tokio::test]
async fn test_empty_payload_never_leaves_the_client() {
    let client = HttpStorageClient::new(StorageConfig::new("http://127.0.0.1:9")).unwrap();
    let mut empty = package();
    empty.bytes.clear();
    let err = client.upload(empty).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidPackage(_)));
}

#[tokio::test]
async fn test_memory_endpoint_records_and_fails_on_demand() {
    let endpoint = MemoryStorageEndpoint::new();
    endpoint.fail_next(StorageError::Http("connection reset".to_string()));

    assert!(endpoint.upload(package()).await.is_err());
    let receipt = endpoint.upload(package()).await.unwrap();
    assert_eq!(
        receipt.url.as_deref(),
        Some("memory://recordings/session-s1-abc.webm")
    );
    assert_eq!(endpoint.uploads().len(), 1);
}
