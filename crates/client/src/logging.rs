//! Request and response log rendering
//!
//! Verbosity comes from [`LogLevel`]; everything is emitted through
//! `tracing` so the host application's subscriber decides where it goes.
//! Credentials never reach the output: the `Authorization` header and the
//! values of [`SENSITIVE_KEYS`] in form or JSON bodies are redacted.

use std::fmt::Write as _;
use std::time::Duration;

use serde_json::Value;
use tracing::info;

use crate::config::{LogLevel, RequestLog, ResponseLog};
use crate::response::{Response, ResponseBody};
use crate::task::TaskId;
use crate::transport::TransportRequest;

const REDACTED: &str = "<redacted>";

/// Body keys whose values are replaced before logging
pub const SENSITIVE_KEYS: &[&str] = &["password", "client_secret", "refresh_token", "access_token"];

/// Render a request as an equivalent curl command
///
/// The `Authorization` header value and sensitive body fields are redacted.
#[must_use]
pub fn curl_command(request: &TransportRequest) -> String {
    let mut command = format!("curl -X {} '{}'", request.method, request.url);
    for (name, value) in &request.headers {
        let value = if name.eq_ignore_ascii_case("authorization") { REDACTED } else { value };
        let _ = write!(command, " -H '{name}: {value}'");
    }
    if let Some(body) = &request.body {
        match std::str::from_utf8(body) {
            Ok(text) => {
                let _ = write!(command, " --data '{}'", redact_text(text).replace('\'', "'\\''"));
            }
            Err(_) => {
                let _ = write!(command, " --data-binary '<{} bytes>'", body.len());
            }
        }
    }
    command
}

pub(crate) fn log_request(level: LogLevel, task: TaskId, request: &TransportRequest) {
    match level.requests {
        RequestLog::Off => {}
        RequestLog::Summary => {
            info!(%task, method = %request.method, url = %request.url, "HTTP request");
        }
        RequestLog::Curl => {
            info!(%task, curl = %curl_command(request), "HTTP request");
        }
    }
}

pub(crate) fn log_response(level: LogLevel, task: TaskId, response: &Response, elapsed: Duration) {
    let status = response.status.unwrap_or_default();
    let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    let error = response.error.as_ref().map(ToString::to_string);
    match level.responses {
        ResponseLog::Off => {}
        ResponseLog::Summary => {
            info!(
                %task,
                status,
                source = ?response.source,
                elapsed_ms,
                error = error.as_deref(),
                "HTTP response"
            );
        }
        ResponseLog::Body => {
            let body = response.body.as_ref().map(render_body);
            info!(
                %task,
                status,
                source = ?response.source,
                elapsed_ms,
                error = error.as_deref(),
                body = body.as_deref(),
                "HTTP response"
            );
        }
    }
}

fn render_body(body: &ResponseBody) -> String {
    match body {
        ResponseBody::Json(value) => {
            let mut value = value.clone();
            redact_json(&mut value);
            value.to_string()
        }
        ResponseBody::Raw(bytes) => redact_text(&String::from_utf8_lossy(bytes)),
    }
}

fn is_sensitive(key: &str) -> bool {
    SENSITIVE_KEYS.iter().any(|sensitive| key.eq_ignore_ascii_case(sensitive))
}

fn redact_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if is_sensitive(key) {
                    *field = Value::from(REDACTED);
                } else {
                    redact_json(field);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_json),
        _ => {}
    }
}

/// Redact a body that is either JSON or `key=value&...` form text
fn redact_text(text: &str) -> String {
    if let Ok(mut value) = serde_json::from_str::<Value>(text) {
        redact_json(&mut value);
        return value.to_string();
    }
    text.split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if urlencoding::decode(key).is_ok_and(|decoded| is_sensitive(&decoded)) => {
                format!("{key}={REDACTED}")
            }
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&")
}
