use crate::error::{ApiError, HttpError};
use bytes::Bytes;
use http::{HeaderMap, Response};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Maximum bytes kept from a non-2xx body (8 KiB).
///
/// Error bodies are attached to [`ApiError::data`]; anything larger is cut off
/// rather than buffered.
pub const ERROR_BODY_LIMIT: usize = 8 * 1024;

/// Type alias for the boxed response body that supports decompression.
///
/// This type can hold either a raw body or a decompressed body (gzip/br/deflate).
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// A parsed response body
///
/// JSON content types are parsed into a [`Value`]; everything else (CSV
/// exports, plain-text errors, HTML from a misbehaving proxy) is kept as text.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Zero-length body (e.g. `204 No Content`)
    Empty,
    Json(Value),
    Text(String),
}

impl Payload {
    /// Parse a body according to its `Content-Type`.
    ///
    /// # Errors
    /// Returns `HttpError::Json` if the content type claims JSON but the body
    /// is not valid JSON.
    pub fn parse(content_type: Option<&str>, body: &[u8]) -> Result<Self, HttpError> {
        if body.is_empty() {
            return Ok(Payload::Empty);
        }
        if content_type.is_some_and(is_json_content_type) {
            return Ok(Payload::Json(serde_json::from_slice(body)?));
        }
        Ok(Payload::Text(String::from_utf8_lossy(body).into_owned()))
    }

    /// Decode into a caller type.
    ///
    /// Text decodes as a JSON string (so `String` receives CSV exports) and an
    /// empty body decodes as `null` (so `()` and `Option<_>` work).
    ///
    /// # Errors
    /// Returns `HttpError::Json` if the payload does not fit `T`.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        Ok(serde_json::from_value(self.into_json())?)
    }

    /// The payload as a JSON value (`Text` → string, `Empty` → `null`).
    #[must_use]
    pub fn into_json(self) -> Value {
        match self {
            Payload::Empty => Value::Null,
            Payload::Json(value) => value,
            Payload::Text(text) => Value::String(text),
        }
    }

    /// Human-readable failure message carried by an error body: the JSON
    /// `message` field, then the JSON `error` field (a string, or an object
    /// with its own `message`), then the raw text. Blank strings are skipped.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        match self {
            Payload::Json(value) => ["message", "error"]
                .iter()
                .find_map(|key| json_message(value.get(key)?))
                .map(ToOwned::to_owned),
            Payload::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_owned())
            }
            Payload::Empty => None,
        }
    }
}

fn json_message(field: &Value) -> Option<&str> {
    let text = match field {
        Value::String(text) => text.as_str(),
        Value::Object(nested) => nested.get("message")?.as_str()?,
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then_some(text)
}

/// `application/json`, `application/problem+json`, `text/json; charset=utf-8`, ...
fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence.to_ascii_lowercase().ends_with("json")
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Read the complete response body, failing once `limit` bytes are exceeded.
///
/// The limit applies to decompressed bytes.
///
/// # Errors
/// Returns `HttpError::BodyTooLarge` past the limit, `HttpError::Transport`
/// if the body stream fails.
pub async fn read_body_limited(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<Bytes, HttpError> {
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(response.into_body());

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

/// Turn the final response of a call into a payload or an [`ApiError`].
///
/// # Errors
/// - `HttpError::Api` for non-2xx statuses
/// - `HttpError::BodyTooLarge` / `HttpError::Transport` while reading
/// - `HttpError::Json` for a 2xx JSON response that does not parse
pub async fn parse_response(
    response: Response<ResponseBody>,
    max_body_size: usize,
) -> Result<Payload, HttpError> {
    let status = response.status();
    let content_type = content_type(response.headers());

    if !status.is_success() {
        let body = match read_body_limited(response, max_body_size.min(ERROR_BODY_LIMIT)).await {
            Ok(bytes) => bytes,
            Err(HttpError::BodyTooLarge { .. }) => Bytes::new(),
            Err(e) => return Err(e),
        };
        let payload = Payload::parse(content_type.as_deref(), &body)
            .unwrap_or_else(|_| Payload::Text(String::from_utf8_lossy(&body).into_owned()));
        let message = payload.error_message().unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_owned()
        });

        tracing::debug!(status = status.as_u16(), message = %message, "API call failed");
        return Err(ApiError::new(status, message).with_data(payload).into());
    }

    let body = read_body_limited(response, max_body_size).await?;
    Payload::parse(content_type.as_deref(), &body)
}
