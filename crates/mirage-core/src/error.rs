//! Failure taxonomy for the generation pipeline.
//!
//! Adapters raise [`UpstreamError`]; only the task manager decides whether a
//! failure marks the task `Failed` or leaves it `Generating` for the
//! reconciliation poller, based on [`UpstreamError::is_inconclusive`].

use reqwest::StatusCode;
use thiserror::Error;

use crate::store::StoreError;
use crate::types::TaskId;

/// A failed upstream generation attempt.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// The upstream returned a well-formed error: an explicit error object,
    /// or a non-success status with a parseable body.  Includes exhausted
    /// long-running-operation polls.
    #[error("upstream rejected request: {message}")]
    Rejected { message: String },

    /// The upstream returned success-shaped data but no usable result could
    /// be located in it.
    #[error("no result in upstream response: {message}")]
    Extraction { message: String },

    /// A local failure that does not prove the upstream job failed: a
    /// transport abort, a gateway timeout, or a body that looks like a proxy
    /// error page.  The task stays `Generating` and reconciliation learns
    /// the true outcome.
    #[error("inconclusive upstream failure: {reason}")]
    Inconclusive { reason: String },
}

impl UpstreamError {
    /// `true` when this failure must not mark the task `Failed`.
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, UpstreamError::Inconclusive { .. })
    }

    /// The human-readable message carried by this error, without the variant
    /// prefix.  Used as the task's `error_message`.
    pub fn message(&self) -> &str {
        match self {
            UpstreamError::Rejected { message } => message,
            UpstreamError::Extraction { message } => message,
            UpstreamError::Inconclusive { reason } => reason,
        }
    }

    /// Classify a transport-level failure.  Nothing came back from the
    /// upstream, so the attempt is always inconclusive.
    pub fn from_transport(err: reqwest::Error) -> Self {
        UpstreamError::Inconclusive {
            reason: err.to_string(),
        }
    }

    /// Classify a non-success HTTP response.
    ///
    /// Gateway statuses and HTML-shaped bodies indicate a proxy or timeout
    /// page rather than a real API error; everything else is an explicit
    /// rejection carrying the status code and body for diagnostics.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        if matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ) || looks_like_html(body)
        {
            UpstreamError::Inconclusive {
                reason: format!("upstream gateway returned status {status}"),
            }
        } else {
            UpstreamError::Rejected {
                message: format!("upstream returned status {status}: {body}"),
            }
        }
    }

    /// Classify a success response whose body could not be parsed as JSON.
    pub fn from_invalid_body(body: &str) -> Self {
        if looks_like_html(body) {
            UpstreamError::Inconclusive {
                reason: "upstream returned an HTML page instead of JSON".into(),
            }
        } else {
            UpstreamError::Extraction {
                message: format!("upstream response is not valid JSON ({} bytes)", body.len()),
            }
        }
    }
}

fn looks_like_html(body: &str) -> bool {
    body.trim_start().starts_with('<')
}

/// A rejected submission.  No task is created for any of these.
#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    /// The per-kind daily quota is exhausted.
    #[error("quota exceeded: {used}/{limit}")]
    QuotaExceeded { used: u32, limit: u32 },

    /// The session is not authenticated against the task store.
    #[error("not authenticated")]
    Unauthenticated,

    /// The referenced task does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// A chat message was sent to a task that is not awaiting one.
    #[error("task {id} is not awaiting a message (status: {status})")]
    NotAwaitingMessage { id: TaskId, status: String },

    /// The task store could not be reached.
    #[error("store unavailable: {0}")]
    Store(String),
}

impl From<StoreError> for SubmitError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::QuotaExceeded { used, limit } => SubmitError::QuotaExceeded { used, limit },
            StoreError::Unauthenticated => SubmitError::Unauthenticated,
            StoreError::NotFound(id) => SubmitError::TaskNotFound(id),
            StoreError::Unavailable(msg) => SubmitError::Store(msg),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_statuses_are_inconclusive() {
        for status in [
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ] {
            assert!(UpstreamError::from_status(status, "").is_inconclusive());
        }
    }

    #[test]
    fn explicit_status_errors_are_rejections() {
        let err = UpstreamError::from_status(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(!err.is_inconclusive());
        assert!(err.message().contains("429"));
        assert!(err.message().contains("slow down"));
    }

    #[test]
    fn html_body_is_inconclusive_even_on_client_error() {
        let err = UpstreamError::from_status(
            StatusCode::NOT_FOUND,
            "<html><body>504 Gateway Time-out</body></html>",
        );
        assert!(err.is_inconclusive());
    }

    #[test]
    fn html_success_body_is_inconclusive() {
        assert!(UpstreamError::from_invalid_body("<!DOCTYPE html>…").is_inconclusive());
        assert!(!UpstreamError::from_invalid_body("plain garbage").is_inconclusive());
    }
}
