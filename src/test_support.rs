//! In-process HTTP/1.1 responder for tests that need a real socket.

use crate::classifier::{Classifier, ClassifierService, ModelInfo, Prediction};
use crate::config::Config;
use crate::AppState;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// One parsed request as seen by a route.
pub(crate) struct Request {
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub(crate) struct Reply {
    pub status: &'static str,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    /// Overrides the Content-Length header to simulate a truncated body.
    pub declared_len: Option<usize>,
    /// Stall this long before sending anything.
    pub delay: Option<Duration>,
}

impl Reply {
    pub fn ok(content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: "200 OK",
            content_type,
            body: body.into(),
            declared_len: None,
            delay: None,
        }
    }

    pub fn status(status: &'static str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: status.as_bytes().to_vec(),
            declared_len: None,
            delay: None,
        }
    }
}

/// Serve `route(request)` on 127.0.0.1 and return the base URL.
pub(crate) async fn spawn_responder<F>(route: F) -> String
where
    F: Fn(&Request) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let route = Arc::new(route);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let route = route.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };

                let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
                let headers: Vec<(String, String)> = head
                    .lines()
                    .skip(1)
                    .filter_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        Some((name.trim().to_string(), value.trim().to_string()))
                    })
                    .collect();
                let content_length = headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.parse::<usize>().ok())
                    .unwrap_or(0);
                while buf.len() < header_end + content_length {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }

                let request = Request {
                    path: head.split_whitespace().nth(1).unwrap_or("/").to_string(),
                    headers,
                    body: buf[header_end..].to_vec(),
                };
                let reply = route(&request);
                if let Some(delay) = reply.delay {
                    tokio::time::sleep(delay).await;
                }
                let header = format!(
                    "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    reply.status,
                    reply.content_type,
                    reply.declared_len.unwrap_or(reply.body.len())
                );
                let _ = socket.write_all(header.as_bytes()).await;
                let _ = socket.write_all(&reply.body).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}", addr)
}

/// Classifier that always answers with one fixed label, or is offline.
pub(crate) struct StaticClassifier {
    pub available: bool,
    pub label: &'static str,
}

#[async_trait]
impl Classifier for StaticClassifier {
    async fn model_info(&self) -> Result<ModelInfo, String> {
        if !self.available {
            return Err("connection refused".to_string());
        }
        Ok(ModelInfo {
            available: true,
            model: Some("static".into()),
            labels: vec![self.label.to_string()],
        })
    }

    async fn classify(
        &self,
        _image_path: &Path,
        _top_k: usize,
    ) -> Result<Vec<Prediction>, String> {
        Ok(vec![Prediction {
            label: self.label.to_string(),
            confidence: 0.8,
        }])
    }
}

/// `AppState` rooted in a temp dir with a `StaticClassifier`.
pub(crate) fn test_state(available: bool) -> (AppState, TempDir) {
    let temp = TempDir::new().unwrap();
    let config = Config {
        data_dir: temp.path().to_path_buf(),
        ..Config::default()
    };
    let classifier = Arc::new(ClassifierService::new(Arc::new(StaticClassifier {
        available,
        label: "noodles",
    })));
    let state = AppState::with_classifier(config, classifier).unwrap();
    (state, temp)
}
