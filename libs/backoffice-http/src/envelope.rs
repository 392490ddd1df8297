//! Backend response envelopes.
//!
//! Different backend services wrap their payloads differently:
//!
//! | Shape                                   | Variant                   |
//! |-----------------------------------------|---------------------------|
//! | `{"success": bool, "data": …}`          | [`Envelope::SuccessFlag`] |
//! | `{"result": …}`                         | [`Envelope::Result`]      |
//! | `{"status": "success" \| …, "data": …}` | [`Envelope::Status`]      |
//! | anything else                           | [`Envelope::Raw`]         |
//!
//! Classification checks the shapes in that order and the first match wins,
//! so `{"success": true, "result": 1}` is a success-flag envelope whose
//! payload is taken from `result`.

use crate::error::{ApiError, HttpError};
use crate::response::Payload;
use http::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Message used when a failed envelope carries neither `message` nor `error`
pub const DEFAULT_FAILURE_MESSAGE: &str = "request was not successful";

/// Normalized result of a backend call
///
/// `success == true` implies `data.is_some()`; `success == false` implies
/// `message` or `error` is present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,
}

/// Auxiliary fields carried by flag and status envelopes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvelopeMeta {
    pub message: Option<String>,
    pub error: Option<Value>,
    pub errors: Option<Value>,
}

/// A classified backend envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    SuccessFlag {
        success: bool,
        data: Option<Value>,
        meta: EnvelopeMeta,
    },
    Result(Value),
    Status {
        success: bool,
        data: Option<Value>,
        meta: EnvelopeMeta,
    },
    Raw(Value),
}

fn present(object: &Map<String, Value>, key: &str) -> Option<Value> {
    object.get(key).filter(|v| !v.is_null()).cloned()
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f.abs() > 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

impl EnvelopeMeta {
    fn extract(object: &Map<String, Value>) -> Self {
        Self {
            message: present(object, "message").map(|m| match m {
                Value::String(s) => s,
                other => other.to_string(),
            }),
            error: present(object, "error"),
            errors: present(object, "errors"),
        }
    }
}

impl Envelope {
    /// Classify a raw JSON body
    #[must_use]
    pub fn classify(raw: Value) -> Self {
        let Value::Object(object) = raw else {
            return Envelope::Raw(raw);
        };

        if let Some(flag) = object.get("success") {
            return Envelope::SuccessFlag {
                success: truthy(flag),
                data: present(&object, "data").or_else(|| present(&object, "result")),
                meta: EnvelopeMeta::extract(&object),
            };
        }

        if let Some(result) = object.get("result") {
            return Envelope::Result(result.clone());
        }

        if let Some(status) = object.get("status") {
            let success = match status {
                Value::String(s) => s == "success",
                Value::Bool(b) => *b,
                _ => false,
            };
            return Envelope::Status {
                success,
                data: present(&object, "data"),
                meta: EnvelopeMeta::extract(&object),
            };
        }

        Envelope::Raw(Value::Object(object))
    }

    /// Convert into the normalized response
    #[must_use]
    pub fn into_response(self) -> ApiResponse<Value> {
        match self {
            Envelope::SuccessFlag {
                success,
                data,
                meta,
            }
            | Envelope::Status {
                success,
                data,
                meta,
            } => flagged(success, data, meta),
            Envelope::Result(data) | Envelope::Raw(data) => ApiResponse::ok(data),
        }
    }
}

fn flagged(success: bool, data: Option<Value>, meta: EnvelopeMeta) -> ApiResponse<Value> {
    let EnvelopeMeta {
        mut message,
        error,
        errors,
    } = meta;

    if success {
        return ApiResponse {
            success,
            data: Some(data.unwrap_or(Value::Null)),
            message,
            error,
            errors,
        };
    }

    if message.is_none() && error.is_none() {
        message = Some(DEFAULT_FAILURE_MESSAGE.to_owned());
    }
    ApiResponse {
        success,
        data,
        message,
        error,
        errors,
    }
}

/// Normalize any backend body into an [`ApiResponse`].
///
/// Unknown shapes are treated as an implicit success carrying the whole body.
#[must_use]
pub fn normalize(raw: Value) -> ApiResponse<Value> {
    Envelope::classify(raw).into_response()
}

impl<T> ApiResponse<T> {
    /// Successful response carrying `data`
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
            errors: None,
        }
    }

    /// Human-readable failure description: `message`, else `error` when it
    /// is a string, else the serialized `error`.
    #[must_use]
    pub fn failure_message(&self) -> Option<String> {
        self.message.clone().or_else(|| {
            self.error.as_ref().map(|e| match e {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        })
    }

    /// Turn a failed envelope into an error so services can use `?`.
    ///
    /// The error keeps status 200 since the transport succeeded; its data
    /// carries `errors` (or `error`) for field-level reporting.
    ///
    /// # Errors
    /// Returns `ApiError` when `success` is false.
    pub fn into_result(self) -> Result<Option<T>, ApiError> {
        if self.success {
            return Ok(self.data);
        }

        let message = self
            .failure_message()
            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_owned());
        let mut err = ApiError::new(StatusCode::OK, message);
        if let Some(details) = self.errors.or(self.error) {
            err = err.with_data(Payload::Json(details));
        }
        Err(err)
    }
}

impl ApiResponse<Value> {
    /// Decode the payload into a caller type, keeping the envelope fields.
    ///
    /// # Errors
    /// Returns `HttpError::Json` if the payload does not fit `T`.
    pub fn decode<T: DeserializeOwned>(self) -> Result<ApiResponse<T>, HttpError> {
        let data = self.data.map(serde_json::from_value).transpose()?;
        Ok(ApiResponse {
            success: self.success,
            data,
            message: self.message,
            error: self.error,
            errors: self.errors,
        })
    }
}
