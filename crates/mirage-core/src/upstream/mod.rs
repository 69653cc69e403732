//! Upstream generative-API adapters.
//!
//! One adapter per upstream family: the Google family
//! ([`google`]: `generateContent` for images, `predictLongRunning` plus
//! operation polling for video) and the OpenAI-compatible streaming family
//! ([`openai`]: used both for Sora-compatible video endpoints and for a
//! user-configured custom endpoint).  Adapters compose endpoint URLs,
//! attach credentials, serialize the family's request body, and hand the
//! raw response to the matching extractor.  They never touch task state:
//! they return a result reference or raise, and the task manager performs
//! the transition.

mod google;
mod openai;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::UpstreamError;
use crate::types::{ImageInput, TaskKind};

/// Which upstream family serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum UpstreamFamily {
    /// Google generative API (Gemini image generation, Veo video operations).
    Google,
    /// Sora-compatible endpoint speaking the OpenAI chat-completions stream.
    Sora,
    /// User-configured OpenAI-compatible endpoint.
    Custom,
}

/// Route a request to its upstream family from the model identifier.
///
/// `veo*` video models run as Google long-running operations; every other
/// video model goes to the Sora-compatible endpoint.  Images are served by
/// Google `generateContent`, chat by the custom endpoint.
pub fn route_for(kind: TaskKind, model: &str) -> UpstreamFamily {
    match kind {
        TaskKind::Video if model.starts_with("veo") => UpstreamFamily::Google,
        TaskKind::Video => UpstreamFamily::Sora,
        TaskKind::Image => UpstreamFamily::Google,
        TaskKind::Chat => UpstreamFamily::Custom,
    }
}

/// Base URL and credential for one upstream family.
#[derive(Debug, Clone, Default)]
pub struct UpstreamEndpoint {
    pub base_url: String,
    pub api_key: String,
}

/// Connection settings for all upstream families.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub google: UpstreamEndpoint,
    pub sora: UpstreamEndpoint,
    pub custom: UpstreamEndpoint,
    /// Interval between long-running-operation polls.
    pub operation_poll_interval: Duration,
    /// Maximum number of operation polls before the attempt is abandoned.
    pub operation_poll_attempts: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            google: UpstreamEndpoint {
                base_url: "https://generativelanguage.googleapis.com".into(),
                api_key: String::new(),
            },
            sora: UpstreamEndpoint::default(),
            custom: UpstreamEndpoint::default(),
            operation_poll_interval: Duration::from_secs(2),
            operation_poll_attempts: 30,
        }
    }
}

impl UpstreamConfig {
    fn endpoint(&self, family: UpstreamFamily) -> &UpstreamEndpoint {
        match family {
            UpstreamFamily::Google => &self.google,
            UpstreamFamily::Sora => &self.sora,
            UpstreamFamily::Custom => &self.custom,
        }
    }
}

/// One upstream generation request, owned by the in-flight call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: TaskKind,
    pub prompt: String,
    pub model: String,
    pub image: Option<ImageInput>,
}

/// The boundary the task manager dispatches through.  Production code uses
/// [`UpstreamClient`]; tests substitute a scripted implementation.
#[async_trait]
pub trait GenerationBackend: Send + Sync + 'static {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, UpstreamError>;
}

/// Live HTTP client over all upstream families.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");
        Self { http, config }
    }
}

#[async_trait]
impl GenerationBackend for UpstreamClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, UpstreamError> {
        let family = route_for(request.kind, &request.model);
        let endpoint = self.config.endpoint(family);
        tracing::debug!(
            family = %family,
            model = %request.model,
            kind = %request.kind,
            "dispatching upstream generation"
        );
        match (family, request.kind) {
            (UpstreamFamily::Google, TaskKind::Video) => {
                google::generate_video(&self.http, endpoint, &self.config, request).await
            }
            (UpstreamFamily::Google, _) => {
                google::generate_image(&self.http, endpoint, request).await
            }
            (UpstreamFamily::Sora | UpstreamFamily::Custom, _) => {
                openai::generate_stream(&self.http, endpoint, request).await
            }
        }
    }
}

/// Join `base` with a version path segment, normalizing trailing slashes and
/// making sure the segment appears exactly once.
fn with_version_segment(base: &str, segment: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with(segment) {
        trimmed.to_owned()
    } else {
        format!("{trimmed}/{segment}")
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_segment_added_once() {
        assert_eq!(
            with_version_segment("https://api.test", "v1beta"),
            "https://api.test/v1beta"
        );
        assert_eq!(
            with_version_segment("https://api.test/", "v1beta"),
            "https://api.test/v1beta"
        );
        assert_eq!(
            with_version_segment("https://api.test/v1beta/", "v1beta"),
            "https://api.test/v1beta"
        );
    }

    #[test]
    fn routing_by_kind_and_model() {
        assert_eq!(
            route_for(TaskKind::Video, "veo-3.0-generate"),
            UpstreamFamily::Google
        );
        assert_eq!(
            route_for(TaskKind::Video, "sora2-landscape-10s"),
            UpstreamFamily::Sora
        );
        assert_eq!(
            route_for(TaskKind::Image, "gemini-2.5-flash-image"),
            UpstreamFamily::Google
        );
        assert_eq!(route_for(TaskKind::Chat, "gpt-4o-mini"), UpstreamFamily::Custom);
    }

    // ── Live-wire tests against a local mock upstream ─────────────────────────

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Serve canned HTTP responses on a local port, forwarding each request
    /// head to `captured` so tests can assert on path and headers.
    async fn spawn_upstream(
        body: &'static str,
        content_type: &'static str,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
        let addr = listener.local_addr().expect("local addr");
        let (captured_tx, captured_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let captured_tx = captured_tx.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    // Read through the header terminator.
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    // Drain the declared body so the client never sees a
                    // reset from unread request bytes.
                    let head = String::from_utf8_lossy(&request).into_owned();
                    let header_end = request
                        .windows(4)
                        .position(|w| w == b"\r\n\r\n")
                        .map(|p| p + 4)
                        .unwrap_or(request.len());
                    let content_length = head
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    let mut remaining =
                        content_length.saturating_sub(request.len() - header_end);
                    while remaining > 0 {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => remaining = remaining.saturating_sub(n),
                        }
                    }
                    let _ = captured_tx.send(head);

                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len(),
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{addr}"), captured_rx)
    }

    fn client_for(family: UpstreamFamily, base_url: String) -> UpstreamClient {
        let endpoint = UpstreamEndpoint {
            base_url,
            api_key: "test-key".into(),
        };
        let mut config = UpstreamConfig::default();
        match family {
            UpstreamFamily::Google => config.google = endpoint,
            UpstreamFamily::Sora => config.sora = endpoint,
            UpstreamFamily::Custom => config.custom = endpoint,
        }
        UpstreamClient::new(config)
    }

    #[tokio::test]
    async fn sora_stream_with_url_in_text_completes() {
        let (base, mut captured) = spawn_upstream(
            "data: {\"choices\":[{\"delta\":{\"content\":\"here: https://x.test/v.mp4 enjoy\"}}]}\n\ndata: [DONE]\n\n",
            "text/event-stream",
        )
        .await;
        let client = client_for(UpstreamFamily::Sora, base);

        let result = client
            .generate(&GenerationRequest {
                kind: TaskKind::Video,
                prompt: "cat".into(),
                model: "sora2-landscape-10s".into(),
                image: None,
            })
            .await
            .expect("stream should yield a result");
        assert_eq!(result, "https://x.test/v.mp4");

        let request = captured.recv().await.expect("request captured");
        assert!(request.starts_with("POST /v1/chat/completions"));
        assert!(request.contains("authorization: Bearer test-key")
            || request.contains("Authorization: Bearer test-key"));
    }

    #[tokio::test]
    async fn sora_stream_error_frame_rejects() {
        let (base, _captured) = spawn_upstream(
            "data: {\"error\":{\"message\":\"quota exceeded upstream\"}}\n\n",
            "text/event-stream",
        )
        .await;
        let client = client_for(UpstreamFamily::Sora, base);

        let err = client
            .generate(&GenerationRequest {
                kind: TaskKind::Video,
                prompt: "cat".into(),
                model: "sora2-landscape-10s".into(),
                image: None,
            })
            .await
            .expect_err("error frame should reject");
        assert!(!err.is_inconclusive());
        assert!(err.message().contains("quota exceeded upstream"));
    }

    #[tokio::test]
    async fn google_image_response_becomes_data_uri() {
        let (base, mut captured) = spawn_upstream(
            "{\"candidates\":[{\"content\":{\"parts\":[{\"inlineData\":{\"data\":\"QQ==\",\"mimeType\":\"image/png\"}}]}}]}",
            "application/json",
        )
        .await;
        let client = client_for(UpstreamFamily::Google, base);

        let result = client
            .generate(&GenerationRequest {
                kind: TaskKind::Image,
                prompt: "a sunset".into(),
                model: "gemini-2.5-flash-image".into(),
                image: None,
            })
            .await
            .expect("image extraction should succeed");
        assert_eq!(result, "data:image/png;base64,QQ==");

        // Credential travels as a query parameter on the versioned path.
        let request = captured.recv().await.expect("request captured");
        assert!(
            request
                .starts_with("POST /v1beta/models/gemini-2.5-flash-image:generateContent?key=test-key")
        );
    }
}
