//! Google generative API adapter.
//!
//! Images go through `models/{model}:generateContent` and come back as
//! inline base64 data.  Video models start a long-running operation via
//! `models/{model}:predictLongRunning`, which is then polled on a fixed
//! interval until `done` or the attempt bound is hit.  The API key travels
//! as a `key` query parameter on every call.

use serde_json::{Value, json};

use super::{GenerationRequest, UpstreamEndpoint, with_version_segment};
use crate::error::UpstreamError;
use crate::extract::{self, OperationPoll};

pub(super) async fn generate_image(
    http: &reqwest::Client,
    endpoint: &UpstreamEndpoint,
    request: &GenerationRequest,
) -> Result<String, UpstreamError> {
    let url = format!(
        "{}/models/{}:generateContent",
        with_version_segment(&endpoint.base_url, "v1beta"),
        request.model
    );

    let mut parts = Vec::new();
    if let Some(image) = &request.image {
        // UI clients deliver the source image as a data URI; the API wants
        // the bare base64 payload.
        let data = image
            .data
            .split_once(";base64,")
            .map(|(_, payload)| payload)
            .unwrap_or(&image.data);
        parts.push(json!({
            "inline_data": {
                "data": data,
                "mime_type": image.mime_type,
            }
        }));
    }
    parts.push(json!({"text": request.prompt}));

    let body = json!({
        "contents": [{"role": "user", "parts": parts}],
        "generationConfig": {"responseModalities": ["IMAGE"]},
    });

    let payload = post_json(http, &url, &endpoint.api_key, &body).await?;
    extract::inline_data_uri(&payload)
}

pub(super) async fn generate_video(
    http: &reqwest::Client,
    endpoint: &UpstreamEndpoint,
    config: &super::UpstreamConfig,
    request: &GenerationRequest,
) -> Result<String, UpstreamError> {
    let base = with_version_segment(&endpoint.base_url, "v1beta");
    let start_url = format!("{base}/models/{}:predictLongRunning", request.model);
    let body = json!({"instances": [{"prompt": request.prompt}]});

    let started = post_json(http, &start_url, &endpoint.api_key, &body).await?;
    let operation = started
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| UpstreamError::Extraction {
            message: "operation response missing name".into(),
        })?;

    let poll_url = format!("{base}/{operation}");
    for attempt in 0..config.operation_poll_attempts {
        tokio::time::sleep(config.operation_poll_interval).await;

        let payload = get_json(http, &poll_url, &endpoint.api_key).await?;
        match extract::parse_operation(&payload)? {
            OperationPoll::Pending => {
                tracing::debug!(operation, attempt, "video operation still running");
            }
            OperationPoll::Done(uri) => return Ok(uri),
        }
    }

    // Exhausted polls count as an upstream rejection, not an inconclusive
    // failure: the operation endpoint answered every time.
    Err(UpstreamError::Rejected {
        message: format!(
            "video operation did not complete after {} polls",
            config.operation_poll_attempts
        ),
    })
}

async fn post_json(
    http: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &Value,
) -> Result<Value, UpstreamError> {
    let response = http
        .post(url)
        .query(&[("key", api_key)])
        .json(body)
        .send()
        .await
        .map_err(UpstreamError::from_transport)?;
    decode_json(response).await
}

async fn get_json(
    http: &reqwest::Client,
    url: &str,
    api_key: &str,
) -> Result<Value, UpstreamError> {
    let response = http
        .get(url)
        .query(&[("key", api_key)])
        .send()
        .await
        .map_err(UpstreamError::from_transport)?;
    decode_json(response).await
}

async fn decode_json(response: reqwest::Response) -> Result<Value, UpstreamError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(UpstreamError::from_transport)?;
    if !status.is_success() {
        return Err(UpstreamError::from_status(status, &body));
    }
    serde_json::from_str(&body).map_err(|_| UpstreamError::from_invalid_body(&body))
}
