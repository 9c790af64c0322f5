// POST /api/submit-proxy: the direct write path. Posts the response to the
// store as a form and retries, instead of failing fast like /api/submit.
use crate::api::{ProxyResponse, query_param};
use crate::errors::ProxyError;
use crate::proxy_service::ProxyState;
use chrono::{SecondsFormat, Utc};
use hyper::StatusCode;
use hyper::header::{CONTENT_TYPE, HeaderMap};
use serde_json::{Map, Value, json};
use shared::http::make_json_response;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub const SUBMIT_FAILED_MESSAGE: &str = "שגיאה בשליחת האישור. אנא נסה שוב.";

const QUERY_FIELDS: [&str; 6] = ["name", "status", "guests", "blessing", "timestamp", "id"];

static SUBMISSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Submission fields in the order they will be posted.
type Fields = Vec<(String, String)>;

fn from_json(body: &[u8]) -> Option<Fields> {
    let map: Map<String, Value> = serde_json::from_slice(body).ok()?;
    Some(
        map.into_iter()
            .filter_map(|(key, value)| match value {
                Value::Null => None,
                Value::String(s) => Some((key, s)),
                other => Some((key, other.to_string())),
            })
            .collect(),
    )
}

fn from_query(query: Option<&str>) -> Fields {
    QUERY_FIELDS
        .iter()
        .filter_map(|key| query_param(query, key).map(|value| (key.to_string(), value)))
        .collect()
}

fn field<'a>(fields: &'a Fields, key: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

fn set_default(fields: &mut Fields, key: &str, value: impl FnOnce() -> String) {
    if field(fields, key).is_some() {
        return;
    }
    fields.retain(|(k, _)| k != key);
    fields.push((key.to_string(), value()));
}

/// Id for a submission that arrives without one: `rsvp_<millis>_<seq>`.
fn generate_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let seq = SUBMISSION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("rsvp_{millis}_{seq}")
}

/// Submission time as `2024-01-15T10:00:00.000Z`.
fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// JSON bodies are used when declared and parseable, otherwise the fields
/// come from the query string.
pub fn collect_fields(headers: &HeaderMap, query: Option<&str>, body: &[u8]) -> Fields {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));

    let parsed = if is_json { from_json(body) } else { None };
    parsed.unwrap_or_else(|| from_query(query))
}

pub async fn post(
    state: &ProxyState,
    headers: &HeaderMap,
    query: Option<&str>,
    body: &[u8],
) -> Result<ProxyResponse, ProxyError> {
    let mut fields = collect_fields(headers, query, body);

    if field(&fields, "name").is_none() || field(&fields, "status").is_none() {
        return Ok(make_json_response(
            StatusCode::BAD_REQUEST,
            &json!({ "error": "Missing required fields: name and status" }),
        ));
    }

    set_default(&mut fields, "guests", || "1".to_string());
    set_default(&mut fields, "timestamp", timestamp_now);
    set_default(&mut fields, "id", generate_id);

    match state.upstream.submit_with_retry(&fields).await {
        Ok(data) => {
            if let Some(id) = field(&fields, "reportId") {
                state.not_found.invalidate(id);
            }
            Ok(make_json_response(
                StatusCode::OK,
                &json!({
                    "success": true,
                    "message": "RSVP submitted successfully",
                    "data": data,
                }),
            ))
        }
        Err(e) => {
            tracing::error!("direct submission failed: {e}");
            Ok(make_json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({
                    "error": SUBMIT_FAILED_MESSAGE,
                    "details": e.to_string(),
                }),
            ))
        }
    }
}
