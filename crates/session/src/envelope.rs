//! Response envelope normalization.
//!
//! The resource server wraps payloads as `{ "success": true, "data": ... }`
//! and failures as `{ "success": false, "message": "..." }`. Callers get the
//! unwrapped `data`, and a failure envelope becomes the same
//! [`ClientError::Resource`] an HTTP-level error would. Endpoints that do not
//! use the envelope pass through unchanged.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ClientError;
use crate::transport::RawResponse;

/// Message used when a failure carries no text of its own.
const DEFAULT_FAILURE_MESSAGE: &str = "Request failed";

/// Unwrap a response into its payload.
///
/// - Success envelope: the `data` field (`null` if missing)
/// - Failure envelope: `ClientError::Resource` with the server message
/// - Anything else on a 2xx: the body itself (`null` if empty, a JSON string
///   if it is not JSON)
/// - Anything else on a non-2xx: `ClientError::Resource` with the body text
///
/// # Errors
///
/// Returns `ClientError::Resource` for failure envelopes and non-2xx
/// responses without an envelope.
pub fn normalize(response: RawResponse) -> Result<Value, ClientError> {
    let RawResponse { status, body } = response;
    let value = parse_body(&body);

    if let Some(success) = value.get("success").and_then(Value::as_bool) {
        return if success {
            Ok(value.get("data").cloned().unwrap_or(Value::Null))
        } else {
            Err(ClientError::Resource {
                status,
                message: failure_message(&value)
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
            })
        };
    }

    if status.is_success() {
        return Ok(value);
    }

    let message = match &value {
        Value::Null => status
            .canonical_reason()
            .unwrap_or(DEFAULT_FAILURE_MESSAGE)
            .to_string(),
        Value::String(text) => text.clone(),
        other => failure_message(other).unwrap_or_else(|| other.to_string()),
    };
    Err(ClientError::Resource { status, message })
}

/// Unwrap a response and decode the payload into `T`.
///
/// # Errors
///
/// Returns the errors of [`normalize`], or `ClientError::Json` if the payload
/// does not match `T`.
pub fn decode<T: DeserializeOwned>(response: RawResponse) -> Result<T, ClientError> {
    Ok(serde_json::from_value(normalize(response)?)?)
}

fn parse_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn failure_message(value: &Value) -> Option<String> {
    value
        .get("message")
        .or_else(|| value.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
