//! Workflow client behaviour against a scripted HTTP server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use posecraft_backends::comfy::ComfyGenerationClient;
use posecraft_backends::retry::RetryConfig;
use posecraft_backends::timeout::with_timeout;
use posecraft_backends::{BackendError, GenerationBackend, GenerationRequest};
use posecraft_core::pose::PoseKeypoint;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// ---------------------------------------------------------------------------
// Scripted server
// ---------------------------------------------------------------------------

/// One request seen by the server: method, path, and JSON body.
#[derive(Debug, Clone)]
struct Seen {
    method: String,
    path: String,
    body: Value,
}

type Route = Arc<dyn Fn(&str) -> (u16, String) + Send + Sync>;

/// Answers every request through `route` and records it.
async fn serve(route: Route) -> (String, Arc<Mutex<Vec<Seen>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            let route = Arc::clone(&route);
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let head_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
                let length = head
                    .lines()
                    .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);
                while buf.len() < head_end + length {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }

                let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
                let method = request_line.next().unwrap_or_default().to_string();
                let path = request_line.next().unwrap_or_default().to_string();
                let body = serde_json::from_slice(&buf[head_end..]).unwrap_or(Value::Null);
                let (status, reply) = route(&path);
                log.lock().unwrap().push(Seen { method, path, body });

                let response = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
                    reply.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });

    (url, seen)
}

fn client(url: &str) -> ComfyGenerationClient {
    ComfyGenerationClient::new(reqwest::Client::new(), url)
        .with_retry(RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
            max_attempts: 3,
        })
        .with_poll_interval(Duration::from_millis(10))
}

fn request() -> GenerationRequest {
    GenerationRequest {
        background_url: "bg.png".into(),
        mask_url: "mask.png".into(),
        pose_reference_url: "pose.png".into(),
        prompt: "woman on a terrace".into(),
        controlnet_strength: 1.0,
        guidance_scale: 7.5,
        seed: 42,
        keypoints: vec![PoseKeypoint::new("left_hip", 0.4, 0.6, 0.9)],
    }
}

fn count(seen: &Mutex<Vec<Seen>>, method: &str, path: &str) -> usize {
    seen.lock()
        .unwrap()
        .iter()
        .filter(|s| s.method == method && s.path == path)
        .count()
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_is_not_resent_after_server_error() {
    let (url, seen) = serve(Arc::new(|_: &str| (502, r#"{"error":"bad gateway"}"#.to_string()))).await;

    let result = client(&url).generate(&request()).await;
    assert_matches!(result, Err(BackendError::Api { status: 502, .. }));
    assert_eq!(count(&seen, "POST", "/prompt"), 1);
}

#[tokio::test]
async fn refused_submit_is_resent() {
    let (url, seen) = serve(Arc::new(|_: &str| (503, r#"{"error":"busy"}"#.to_string()))).await;

    let result = client(&url).generate(&request()).await;
    assert_matches!(result, Err(BackendError::Api { status: 503, .. }));
    assert_eq!(count(&seen, "POST", "/prompt"), 3);
}

#[tokio::test]
async fn completed_prompt_is_not_cancelled() {
    let (url, seen) = serve(Arc::new(|path: &str| match path {
        "/prompt" => (200, r#"{"prompt_id":"p1","number":0}"#.to_string()),
        _ => (
            200,
            r#"{"p1":{"outputs":{"12":{"images":[{"filename":"out.png","subfolder":"","type":"output"}]}},"status":{"status_str":"success","completed":true}}}"#
                .to_string(),
        ),
    }))
    .await;

    let output = client(&url).generate(&request()).await.unwrap();
    assert_eq!(output.backend_request_id, "p1");
    assert!(output.image_url.contains("filename=out.png"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count(&seen, "POST", "/queue"), 0);
    assert_eq!(count(&seen, "POST", "/interrupt"), 0);

    let submitted = seen.lock().unwrap()[0].body.clone();
    assert_eq!(submitted["extra_data"]["extra_pnginfo"]["pose_keypoints"][0]["name"], "left_hip");
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timed_out_generation_cancels_prompt() {
    let (url, seen) = serve(Arc::new(|path: &str| match path {
        "/prompt" => (200, r#"{"prompt_id":"p1","number":3}"#.to_string()),
        // Never finishes.
        _ => (200, "{}".to_string()),
    }))
    .await;

    let client = client(&url);
    let result: Result<_, BackendError> =
        with_timeout("generation", Duration::from_millis(100), client.generate(&request())).await;
    assert_matches!(result, Err(BackendError::Timeout { stage: "generation", .. }));

    for _ in 0..50 {
        if count(&seen, "POST", "/interrupt") > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let seen = seen.lock().unwrap();
    let delete = seen
        .iter()
        .find(|s| s.method == "POST" && s.path == "/queue")
        .unwrap();
    assert_eq!(delete.body["delete"][0], "p1");
    let interrupt = seen
        .iter()
        .find(|s| s.method == "POST" && s.path == "/interrupt")
        .unwrap();
    assert_eq!(interrupt.body["prompt_id"], "p1");
}
