//! OpenAI-compatible streaming adapter.
//!
//! Serves both the Sora-compatible family (video generation carried inside
//! a chat-completions stream) and the user-configured custom endpoint.  The
//! request is a standard `messages` array with `stream: true` and a bearer
//! credential; the response body is fed chunk-by-chunk into the SSE
//! extractor, stopping early once an explicit error frame is seen.

use futures::StreamExt;
use serde_json::json;

use super::{GenerationRequest, UpstreamEndpoint, with_version_segment};
use crate::error::UpstreamError;
use crate::extract::SseExtractor;

pub(super) async fn generate_stream(
    http: &reqwest::Client,
    endpoint: &UpstreamEndpoint,
    request: &GenerationRequest,
) -> Result<String, UpstreamError> {
    let url = format!(
        "{}/chat/completions",
        with_version_segment(&endpoint.base_url, "v1")
    );

    let body = json!({
        "model": request.model,
        "stream": true,
        "messages": [{"role": "user", "content": request.prompt}],
    });

    let response = http
        .post(&url)
        .bearer_auth(&endpoint.api_key)
        .json(&body)
        .send()
        .await
        .map_err(UpstreamError::from_transport)?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(UpstreamError::from_status(status, &text));
    }

    let mut extractor = SseExtractor::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let bytes = chunk.map_err(UpstreamError::from_transport)?;
        extractor.push_chunk(&bytes);
        if extractor.failed() {
            // An explicit error frame outranks anything still in flight.
            break;
        }
    }

    extractor.finish()
}
