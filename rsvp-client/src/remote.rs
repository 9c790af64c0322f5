//! Client for the RSVP proxy endpoints.
//!
//! The spreadsheet behind the proxy answers in more than one shape. Every
//! response is resolved into one canonical type here, at the boundary, so no
//! caller ever sees the raw payload.

use crate::cancel::CancelSignal;
use crate::types::{MAX_GUESTS, RsvpRecord, RsvpStatus};
use crate::visit::VisitRequest;
use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use url::Url;

/// Coarse transport timeout for every call. Callers that need to stay
/// responsive bound their calls more tightly with a `CancelSignal`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out")]
    TimedOut,

    #[error("network error: {0}")]
    Network(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl RemoteError {
    /// Cancellation and timeouts are expected on the background paths and are
    /// never surfaced to the guest.
    pub fn is_soft(&self) -> bool {
        matches!(self, RemoteError::Cancelled | RemoteError::TimedOut)
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::TimedOut
        } else if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(RsvpRecord),
    NotFound,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Create,
    Update,
}

impl UpsertAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" | "created" => Some(UpsertAction::Create),
            "update" | "updated" => Some(UpsertAction::Update),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            UpsertAction::Create => "create",
            UpsertAction::Update => "update",
        }
    }
}

/// Write request. A present `report_id` asks for an update of that record,
/// an absent one for a new record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertRequest {
    pub name: String,
    pub status: RsvpStatus,
    pub guests: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub blessing: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub ok: bool,
    pub report_id: Option<String>,
    pub action: Option<UpsertAction>,
}

#[async_trait]
pub trait RsvpRemote: Send + Sync {
    async fn fetch_by_id(
        &self,
        id: &str,
        cancel: Option<&CancelSignal>,
    ) -> Result<FetchOutcome, RemoteError>;

    async fn upsert(
        &self,
        request: &UpsertRequest,
        cancel: Option<&CancelSignal>,
    ) -> Result<UpsertOutcome, RemoteError>;

    async fn track_visit(&self, visit: &VisitRequest) -> Result<(), RemoteError>;
}

/// The shapes a read has been observed to come back in.
#[derive(Debug)]
enum FetchShape {
    /// `{success, data}`, possibly with an `error` string.
    Envelope {
        success: Option<bool>,
        data: Option<Value>,
        error: Option<String>,
    },
    /// The record's fields directly at the top level.
    Flat(Map<String, Value>),
    Unrecognized,
}

impl FetchShape {
    fn classify(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return FetchShape::Unrecognized;
        };

        if map.contains_key("name") {
            return FetchShape::Flat(map);
        }

        if ["success", "ok", "data", "error"]
            .iter()
            .any(|key| map.contains_key(*key))
        {
            let success = map
                .get("success")
                .or_else(|| map.get("ok"))
                .and_then(Value::as_bool);
            let error = string_field(&map, &["error"]);
            return FetchShape::Envelope {
                success,
                data: map.remove("data"),
                error,
            };
        }

        FetchShape::Unrecognized
    }
}

fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Whether an upstream error string means "no such record".
pub fn is_not_found_message(error: &str) -> bool {
    let lowered = error.to_ascii_lowercase();
    ["not found", "not_found", "notfound", "no record"]
        .iter()
        .any(|needle| lowered.contains(needle))
}

fn guests_field(map: &Map<String, Value>) -> Option<u32> {
    let raw = match map.get("guests")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    Some(raw.clamp(0.0, f64::from(MAX_GUESTS)) as u32)
}

/// Builds a record from loosely typed store fields. A record without a name
/// is indistinguishable from "no record".
fn record_from_map(map: &Map<String, Value>, requested_id: &str) -> Option<RsvpRecord> {
    let name = string_field(map, &["name"])?;

    let status = match map.get("status").and_then(Value::as_str) {
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            tracing::warn!("{e}, defaulting to yes");
            RsvpStatus::Yes
        }),
        None => RsvpStatus::Yes,
    };
    let guests = status.normalize_guests(guests_field(map).unwrap_or(1));

    Some(RsvpRecord {
        report_id: string_field(map, &["reportId", "report_id", "id"])
            .unwrap_or_else(|| requested_id.to_string()),
        name,
        status,
        guests,
        blessing: map
            .get("blessing")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn outcome_from_shape(
    shape: FetchShape,
    status: u16,
    requested_id: &str,
    depth: u8,
) -> Result<FetchOutcome, RemoteError> {
    match shape {
        FetchShape::Flat(map) => Ok(record_from_map(&map, requested_id)
            .map(FetchOutcome::Found)
            .unwrap_or(FetchOutcome::NotFound)),
        FetchShape::Envelope {
            success,
            data,
            error,
        } => {
            if let Some(error) = &error
                && is_not_found_message(error)
            {
                return Ok(FetchOutcome::NotFound);
            }

            if !(200..300).contains(&status) || success == Some(false) || error.is_some() {
                return Err(RemoteError::Server {
                    status,
                    message: error.unwrap_or_else(|| "request failed".to_string()),
                });
            }

            match data {
                None | Some(Value::Null) => Ok(FetchOutcome::NotFound),
                // The proxy wraps whatever the store sent, which may itself be an envelope.
                Some(inner) if depth == 0 => {
                    outcome_from_shape(FetchShape::classify(inner), status, requested_id, 1)
                }
                Some(_) => Err(RemoteError::Decode("nested envelope too deep".into())),
            }
        }
        FetchShape::Unrecognized => {
            if depth > 0 {
                // `data: {}` and similar carry no record.
                return Ok(FetchOutcome::NotFound);
            }
            Err(RemoteError::Decode("unrecognized response shape".into()))
        }
    }
}

/// Resolves a read response into a `FetchOutcome`. A missing record is a
/// normal outcome, never an error.
pub fn parse_fetch_response(
    status: u16,
    body: &str,
    requested_id: &str,
) -> Result<FetchOutcome, RemoteError> {
    if status == 404 {
        return Ok(FetchOutcome::NotFound);
    }

    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) if (200..300).contains(&status) => return Err(RemoteError::Decode(e.to_string())),
        Err(_) => {
            return Err(RemoteError::Server {
                status,
                message: body.trim().chars().take(200).collect(),
            });
        }
    };

    outcome_from_shape(FetchShape::classify(value), status, requested_id, 0)
}

/// Resolves a write response. A bare success flag is not trusted: the
/// response must also carry an identity or a recognized action.
pub fn parse_upsert_response(body: &str) -> UpsertOutcome {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
        return UpsertOutcome::default();
    };

    let declared = map
        .get("ok")
        .and_then(Value::as_bool)
        .or_else(|| map.get("success").and_then(Value::as_bool))
        .unwrap_or(false);
    let report_id = string_field(&map, &["reportId", "report_id"]);
    let action = map
        .get("action")
        .and_then(Value::as_str)
        .and_then(UpsertAction::parse);

    UpsertOutcome {
        ok: declared && (report_id.is_some() || action.is_some()),
        report_id,
        action,
    }
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => string_field(&map, &["message", "error"])
            .unwrap_or_else(|| "request failed".to_string()),
        _ => body.trim().chars().take(200).collect(),
    }
}

async fn with_cancel<F, T>(cancel: Option<&CancelSignal>, request: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, reqwest::Error>>,
{
    match cancel {
        None => request.await.map_err(RemoteError::from),
        Some(signal) => {
            tokio::select! {
                biased;
                _ = signal.cancelled() => Err(RemoteError::Cancelled),
                result = request => result.map_err(RemoteError::from),
            }
        }
    }
}

/// HTTP implementation of `RsvpRemote` against the proxy at `base_url`.
#[derive(Clone)]
pub struct RemoteClient {
    client: reqwest::Client,
    base_url: Url,
}

impl RemoteClient {
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| RemoteError::InvalidUrl(e.to_string()))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RemoteError::from)?;

        Ok(RemoteClient { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::InvalidUrl(e.to_string()))
    }
}

#[async_trait]
impl RsvpRemote for RemoteClient {
    async fn fetch_by_id(
        &self,
        id: &str,
        cancel: Option<&CancelSignal>,
    ) -> Result<FetchOutcome, RemoteError> {
        let url = self.endpoint("api/rsvp")?;
        let request = async {
            let response = self
                .client
                .get(url)
                .query(&[("id", id)])
                .header(CACHE_CONTROL, "no-store")
                .send()
                .await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok((status, body))
        };

        let (status, body) = with_cancel(cancel, request).await?;
        tracing::debug!(id, status, "fetched RSVP");
        parse_fetch_response(status, &body, id)
    }

    async fn upsert(
        &self,
        request: &UpsertRequest,
        cancel: Option<&CancelSignal>,
    ) -> Result<UpsertOutcome, RemoteError> {
        let url = self.endpoint("api/submit")?;
        let call = async {
            let response = self.client.post(url).json(request).send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok((status, body))
        };

        let (status, body) = with_cancel(cancel, call).await?;
        if !(200..300).contains(&status) {
            return Err(RemoteError::Server {
                status,
                message: error_message(&body),
            });
        }
        Ok(parse_upsert_response(&body))
    }

    async fn track_visit(&self, visit: &VisitRequest) -> Result<(), RemoteError> {
        let url = self.endpoint("api/track-visit")?;
        let response = self.client.post(url).json(visit).send().await?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Server {
                status,
                message: error_message(&body),
            });
        }
        Ok(())
    }
}
