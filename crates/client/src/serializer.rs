//! Request body encoding and response body decoding
//!
//! Parameters are flattened the way form encoders conventionally do it:
//! nested objects become `key[sub]`, arrays become repeated `key[]`.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::{RequestSerializer, ResponseSerializer};
use crate::error::ApiError;
use crate::request::UploadPart;
use crate::response::ResponseBody;

/// Encoded request body with its content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBody {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Flatten parameters into ordered key/value pairs
#[must_use]
pub fn flatten_parameters(parameters: &BTreeMap<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in parameters {
        flatten_into(key, value, &mut pairs);
    }
    pairs
}

fn flatten_into(key: &str, value: &Value, pairs: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (sub, nested) in map {
                flatten_into(&format!("{key}[{sub}]"), nested, pairs);
            }
        }
        Value::Array(items) => {
            let array_key = format!("{key}[]");
            for item in items {
                flatten_into(&array_key, item, pairs);
            }
        }
        Value::String(s) => pairs.push((key.to_string(), s.clone())),
        Value::Null => pairs.push((key.to_string(), String::new())),
        other => pairs.push((key.to_string(), other.to_string())),
    }
}

/// `a=1&b=two` with percent-encoded keys and values
#[must_use]
pub fn query_string(parameters: &BTreeMap<String, Value>) -> String {
    flatten_parameters(parameters)
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Encode parameters as a request body
///
/// # Errors
/// Returns `ApiError::Serialization` if JSON encoding fails.
pub fn encode_body(
    serializer: RequestSerializer,
    parameters: &BTreeMap<String, Value>,
) -> Result<EncodedBody, ApiError> {
    match serializer {
        RequestSerializer::Json => {
            let bytes =
                serde_json::to_vec(parameters).map_err(|e| ApiError::Serialization(e.to_string()))?;
            Ok(EncodedBody { bytes, content_type: "application/json".into() })
        }
        RequestSerializer::FormUrlencoded => Ok(EncodedBody {
            bytes: query_string(parameters).into_bytes(),
            content_type: "application/x-www-form-urlencoded".into(),
        }),
    }
}

/// Encode parameters and upload parts as `multipart/form-data`
#[must_use]
pub fn encode_multipart(
    parameters: &BTreeMap<String, Value>,
    uploads: &[UploadPart],
    boundary: &str,
) -> EncodedBody {
    let mut bytes = Vec::new();
    for (key, value) in flatten_parameters(parameters) {
        bytes.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        bytes.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", disposition_value(&key))
                .as_bytes(),
        );
        bytes.extend_from_slice(value.as_bytes());
        bytes.extend_from_slice(b"\r\n");
    }
    for part in uploads {
        bytes.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        bytes.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                disposition_value(&part.field_name),
                disposition_value(&part.filename)
            )
            .as_bytes(),
        );
        bytes.extend_from_slice(format!("Content-Type: {}\r\n\r\n", part.mime_type).as_bytes());
        bytes.extend_from_slice(&part.data);
        bytes.extend_from_slice(b"\r\n");
    }
    bytes.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    EncodedBody { bytes, content_type: format!("multipart/form-data; boundary={boundary}") }
}

/// Quoted `Content-Disposition` parameter value
///
/// Quote, CR and LF are percent-encoded the way browsers submit form names.
fn disposition_value(value: &str) -> String {
    value.replace('"', "%22").replace('\r', "%0D").replace('\n', "%0A")
}

/// Decode a response body
///
/// A JSON body that fails to parse is kept raw; the failure is reported
/// only for 2xx statuses, where the body was supposed to be the payload.
#[must_use]
pub fn decode_body(
    serializer: ResponseSerializer,
    status: u16,
    bytes: Vec<u8>,
) -> (Option<ResponseBody>, Option<ApiError>) {
    if bytes.is_empty() {
        return (None, None);
    }
    match serializer {
        ResponseSerializer::Raw => (Some(ResponseBody::Raw(bytes)), None),
        ResponseSerializer::Json => match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => (Some(ResponseBody::Json(value)), None),
            Err(e) => {
                let error = (200..300)
                    .contains(&status)
                    .then(|| ApiError::Serialization(e.to_string()));
                (Some(ResponseBody::Raw(bytes)), error)
            }
        },
    }
}
