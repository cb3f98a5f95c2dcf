//! Response payload classification.
//!
//! The portal signals failure inconsistently: HTML behind a 200, empty
//! bodies, `{"output": "...logout..."}`, or a bare error-code field. A
//! payload is therefore classified by shape. The normal data response
//! carries an `output` list; finder-style endpoints respond with
//! `OutBlock*`/`block*` keys instead and are accepted as-is.

use serde_json::Value;

use crate::error::{snippet, RequestError, Result};

/// Error-code field spellings seen on data responses.
const ERROR_CODE_KEYS: [&str; 5] = [
    "errorCode",
    "ERROR_CODE",
    "error_code",
    "errCode",
    "ERR_CD",
];

/// Error-code field spellings seen on login responses.
const LOGIN_ERROR_CODE_KEYS: [&str; 4] = ["errorCode", "ERROR_CODE", "error_code", "_error_code"];

/// Error-message field spellings seen on login responses.
const LOGIN_ERROR_MESSAGE_KEYS: [&str; 3] = ["_error_message", "error_message", "ERROR_MESSAGE"];

/// First non-empty value found under any of `keys`, rendered as a string.
fn field_string(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| data.get(*k)).find_map(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Error code on a data payload, if any.
pub(crate) fn error_code(data: &Value) -> Option<String> {
    field_string(data, &ERROR_CODE_KEYS)
}

/// Error code on a login payload, if any.
pub(crate) fn login_error_code(data: &Value) -> Option<String> {
    field_string(data, &LOGIN_ERROR_CODE_KEYS)
}

/// Human-readable message on a login failure payload, falling back to a
/// snippet of the payload itself.
pub(crate) fn login_error_message(data: &Value) -> String {
    field_string(data, &LOGIN_ERROR_MESSAGE_KEYS).unwrap_or_else(|| snippet(&data.to_string()))
}

/// Decode a response body as JSON regardless of the advertised
/// content-type - the portal is known to mislabel it.
pub(crate) fn decode_body(body: &str) -> Option<Value> {
    serde_json::from_str(body).ok()
}

/// Classify a decoded data payload.
///
/// Non-object payloads pass through unchecked; every shape rule below only
/// applies to JSON objects.
pub(crate) fn validate_data_payload(data: &Value) -> Result<()> {
    let Some(map) = data.as_object() else {
        return Ok(());
    };

    if let Some(code) = error_code(data) {
        return Err(RequestError::ServerError { code });
    }

    let has_out_block = map.keys().any(|k| k.starts_with("OutBlock"));
    let has_block = map.keys().any(|k| k.starts_with("block"));

    let Some(output) = map.get("output") else {
        if has_out_block || has_block {
            // Alternate (finder-style) response shape, valid as-is.
            return Ok(());
        }
        return Err(RequestError::UnexpectedPayload {
            snippet: snippet(&data.to_string()),
        });
    };

    match output {
        Value::Null => Err(RequestError::UnexpectedPayload {
            snippet: snippet(&data.to_string()),
        }),
        Value::String(s) => {
            let lowered = s.to_lowercase();
            if lowered.contains("login") || lowered.contains("logout") {
                Err(RequestError::AuthExpired)
            } else {
                Err(RequestError::UnexpectedPayload {
                    snippet: snippet(s),
                })
            }
        }
        Value::Array(_) => Ok(()),
        other => Err(RequestError::UnexpectedPayload {
            snippet: snippet(&other.to_string()),
        }),
    }
}
