//! Request handlers for the public `/api/*` routes, plus the body and
//! parameter helpers they share.

pub mod calendar;
pub mod rsvp;
pub mod submit;
pub mod submit_proxy;
pub mod track_visit;

use crate::errors::ProxyError;
use crate::rate_limit::RateLimitStatus;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use hyper::{Response, StatusCode};
use serde_json::{Map, Value, json};
use shared::http::{PeerAddr, make_json_response};

pub type ProxyBody = BoxBody<Bytes, ProxyError>;
pub type ProxyResponse = Response<ProxyBody>;

/// Largest request body any route accepts.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

pub const RATE_LIMITED_MESSAGE: &str = "יותר מדי בקשות, נסה שוב בעוד דקה.";

pub async fn read_body<B>(body: B) -> Result<Bytes, ProxyError>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(ProxyError::PayloadTooLarge {
            limit: MAX_BODY_BYTES,
        }),
        Err(e) => Err(ProxyError::RequestBody(e.to_string())),
    }
}

/// First value of `key` in a raw query string.
pub fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// The JSON object in `body`. Anything else, including an empty or broken
/// body, reads as an empty object.
pub fn json_object(body: &[u8]) -> Map<String, Value> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Renders a field the way a form post would: strings as they are, numbers
/// and booleans in their text form, and nothing for null or a missing key.
pub fn string_field(fields: &Map<String, Value>, key: &str) -> String {
    match fields.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Party size as sent upstream: any finite number is passed through in its
/// own text form, everything else becomes `"1"`.
pub fn coerce_guests(value: Option<&Value>) -> String {
    match value {
        Some(Value::Number(n)) if n.as_f64().is_some_and(f64::is_finite) => n.to_string(),
        Some(Value::String(s)) if !s.trim().is_empty() && s.trim().parse::<f64>().is_ok_and(f64::is_finite) => {
            s.clone()
        }
        _ => "1".to_string(),
    }
}

/// Client address used for rate limiting: the first `x-forwarded-for` hop,
/// then `x-real-ip`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<&PeerAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
    };

    header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .or_else(|| peer.map(|PeerAddr(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn too_many_requests(status: RateLimitStatus) -> ProxyResponse {
    let mut response = make_json_response(
        StatusCode::TOO_MANY_REQUESTS,
        &json!({ "error": RATE_LIMITED_MESSAGE }),
    );
    // Round up so a client that waits exactly this long is admitted.
    let secs = status.reset_after.as_millis().div_ceil(1000);
    let secs = u64::try_from(secs).unwrap_or(u64::MAX).max(1);
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(secs));
    response
}

/// `{ok: false, message}` with the given status.
pub fn failure(status: StatusCode, message: &str) -> ProxyResponse {
    make_json_response(status, &json!({ "ok": false, "message": message }))
}
