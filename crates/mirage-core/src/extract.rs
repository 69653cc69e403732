//! Result extraction from upstream generation responses.
//!
//! Two response shapes exist: server-sent-event streams of chat-completion
//! chunks (the Sora-compatible and custom OpenAI-style families), and single
//! JSON documents (the Google family, including long-running video
//! operations).  Everything in this module is pure parsing; adapters own
//! the I/O and feed bytes/documents in.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::UpstreamError;

/// SSE payload prefix.  A trailing space after the colon is optional.
const DATA_PREFIX: &str = "data:";
/// Stream-termination sentinel emitted by OpenAI-style upstreams.
const DONE_SENTINEL: &str = "[DONE]";
/// Accumulated text at or below this length is surfaced verbatim as the
/// error message when no result was found; anything longer gets a generic
/// diagnostic instead.
const SHORT_TEXT_MAX: usize = 500;

type UrlStrategy = fn(&Value) -> Option<&str>;

/// Ordered list of structured-URL extraction strategies.  The first match
/// wins; all of them outrank the text heuristic in [`SseExtractor::finish`].
const URL_STRATEGIES: [(&str, UrlStrategy); 5] = [
    ("url", url_field),
    ("video_url", video_url_field),
    ("data[0].url", data_url_field),
    ("output.url", output_url_field),
    ("choices[0].delta.url", delta_url_field),
];

fn url_field(v: &Value) -> Option<&str> {
    v.get("url")?.as_str()
}

fn video_url_field(v: &Value) -> Option<&str> {
    v.get("video_url")?.as_str()
}

fn data_url_field(v: &Value) -> Option<&str> {
    v.get("data")?.get(0)?.get("url")?.as_str()
}

fn output_url_field(v: &Value) -> Option<&str> {
    v.get("output")?.get("url")?.as_str()
}

fn delta_url_field(v: &Value) -> Option<&str> {
    v.get("choices")?.get(0)?.get("delta")?.get("url")?.as_str()
}

/// Incremental extractor for `data: <json>` chat-completion streams.
///
/// Feed raw body chunks with [`push_chunk`](Self::push_chunk); a partial
/// trailing line is carried over between chunks.  Call
/// [`finish`](Self::finish) at end of stream to resolve the tie-break:
/// explicit error > structured URL field > URL scanned out of accumulated
/// text > short accumulated text as error > generic failure.
#[derive(Debug, Default)]
pub struct SseExtractor {
    carry: String,
    text: String,
    direct_url: Option<String>,
    error: Option<String>,
}

impl SseExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once an explicit error payload has been seen.  Callers should
    /// stop reading the stream at that point; the error outranks anything
    /// that could still arrive.
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// Consume one chunk of the response body.
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.carry.push_str(&String::from_utf8_lossy(chunk));
        while let Some(pos) = self.carry.find('\n') {
            let line: String = self.carry.drain(..=pos).collect();
            self.process_line(line.trim_end_matches(['\n', '\r']));
        }
    }

    fn process_line(&mut self, line: &str) {
        if self.failed() {
            return;
        }
        let Some(payload) = line.trim().strip_prefix(DATA_PREFIX) else {
            return;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == DONE_SENTINEL {
            return;
        }
        // Malformed frames are skipped; upstreams occasionally interleave
        // keep-alive noise with real chunks.
        let Ok(value) = serde_json::from_str::<Value>(payload) else {
            return;
        };

        if let Some(message) = explicit_error(&value) {
            self.error = Some(message);
            return;
        }

        if self.direct_url.is_none() {
            self.direct_url = URL_STRATEGIES
                .iter()
                .find_map(|(_, strategy)| strategy(&value))
                .map(str::to_owned);
        }

        if let Some(delta) = content_delta(&value) {
            self.text.push_str(delta);
        }
    }

    /// Resolve the stream into a result reference or a typed failure.
    pub fn finish(mut self) -> Result<String, UpstreamError> {
        // Flush a final line that arrived without a trailing newline.
        if !self.carry.is_empty() {
            let line = std::mem::take(&mut self.carry);
            self.process_line(line.trim_end_matches('\r'));
        }

        if let Some(message) = self.error {
            return Err(UpstreamError::Rejected { message });
        }
        if let Some(url) = self.direct_url {
            return Ok(url);
        }
        if let Some(url) = scan_url(&self.text) {
            return Ok(url);
        }

        let text = self.text.trim();
        if !text.is_empty() && text.len() <= SHORT_TEXT_MAX {
            return Err(UpstreamError::Extraction {
                message: text.to_owned(),
            });
        }
        Err(UpstreamError::Extraction {
            message: format!(
                "no result found in stream ({} chars of text accumulated)",
                text.len()
            ),
        })
    }
}

/// Pull the explicit error message out of a chunk, if any.
///
/// Accepts both `{"error": {"message": "…"}}` and `{"error": "…"}`.
fn explicit_error(value: &Value) -> Option<String> {
    let error = value.get("error")?;
    if let Some(message) = error.get("message").and_then(Value::as_str) {
        return Some(message.to_owned());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_owned());
    }
    // An error object with no message field still means failure.
    (!error.is_null()).then(|| error.to_string())
}

fn content_delta(value: &Value) -> Option<&str> {
    let choice = value.get("choices")?.get(0)?;
    choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str)
        .or_else(|| {
            choice
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(Value::as_str)
        })
}

/// Find the first `http(s)://` substring in free text and strip trailing
/// sentence punctuation from it.
pub fn scan_url(text: &str) -> Option<String> {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    let re = URL_RE.get_or_init(|| {
        // A URL runs until whitespace, a closing bracket, or a quote.
        Regex::new(r#"https?://[^\s<>"'`)\]}]+"#).expect("url pattern compiles")
    });
    let found = re.find(text)?;
    let url = found.as_str().trim_end_matches(['.', ',', ';', '!', '?']);
    (!url.is_empty()).then(|| url.to_owned())
}

// ── Single-document extraction (Google family) ────────────────────────────────

/// Build a data-URI from the first inline-data part of a `generateContent`
/// response.  The declared MIME type defaults to `image/png` when absent.
pub fn inline_data_uri(payload: &Value) -> Result<String, UpstreamError> {
    let parts = payload
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| candidate.get("content")?.get("parts")?.as_array())
        .flatten();

    for part in parts {
        let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) else {
            continue;
        };
        let Some(data) = inline.get("data").and_then(Value::as_str) else {
            continue;
        };
        let mime = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        return Ok(format!("data:{mime};base64,{data}"));
    }

    Err(UpstreamError::Extraction {
        message: "no media data in response".into(),
    })
}

/// Outcome of parsing one long-running-operation poll response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationPoll {
    /// `done` is not yet true; keep polling.
    Pending,
    /// The operation finished and produced a result URI.
    Done(String),
}

/// Parse a Veo-style operation document.
///
/// An embedded error fails fast even when a result is also present; the
/// result URI is read from either of the two shapes the API is known to
/// emit.
pub fn parse_operation(payload: &Value) -> Result<OperationPoll, UpstreamError> {
    if !payload.get("done").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(OperationPoll::Pending);
    }

    if let Some(message) = explicit_error(payload) {
        return Err(UpstreamError::Rejected { message });
    }

    let response = payload.get("response");
    let uri = response
        .and_then(|r| r.get("generateVideoResponse")?.get("generatedSamples")?.get(0))
        .and_then(|sample| sample.get("video")?.get("uri")?.as_str())
        .or_else(|| {
            response
                .and_then(|r| r.get("generatedVideos")?.get(0))
                .and_then(|video| video.get("video")?.get("uri")?.as_str())
        });

    match uri {
        Some(uri) => Ok(OperationPoll::Done(uri.to_owned())),
        None => Err(UpstreamError::Extraction {
            message: "operation completed without a result uri".into(),
        }),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
