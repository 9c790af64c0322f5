//! Client for the spreadsheet web app that stores the responses.
//!
//! Every call is a GET with an `action` query parameter, except the direct
//! write path, which posts a form and retries with a linear backoff.

use crate::metrics_defs::{UPSTREAM_DURATION, UPSTREAM_RETRIES};
use hyper::StatusCode;
use reqwest::header::CACHE_CONTROL;
use serde_json::Value;
use shared::{counter, histogram};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use url::Url;

pub const USER_AGENT: &str = "RSVP-Form/1.0";

#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    #[error("upstream URL not configured")]
    NotConfigured,

    #[error("upstream request failed: {0}")]
    Request(String),

    #[error("upstream request timed out")]
    TimedOut,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response from upstream: {0}")]
    InvalidResponse(String),

    #[error("failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<UpstreamError>,
    },
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::TimedOut
        } else {
            UpstreamError::Request(e.to_string())
        }
    }
}

/// Attempt `n` that fails waits `base_delay * n` before attempt `n + 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// A raw upstream answer. `body` is `None` when it was not JSON.
#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Option<Value>,
}

impl UpstreamResponse {
    pub fn body_or_empty(&self) -> Value {
        self.body
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

/// The store's own verdict: its `ok` flag, else its `success` flag.
pub fn declares_ok(body: &Value) -> bool {
    body.get("ok")
        .and_then(Value::as_bool)
        .or_else(|| body.get("success").and_then(Value::as_bool))
        .unwrap_or(false)
}

pub struct Upstream {
    client: reqwest::Client,
    url: Option<Url>,
    retry: RetryPolicy,
}

impl Upstream {
    /// `timeout` bounds every single attempt.
    pub fn new(url: Option<Url>, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Upstream {
            client,
            url,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    fn url(&self) -> Result<&Url, UpstreamError> {
        self.url.as_ref().ok_or(UpstreamError::NotConfigured)
    }

    async fn get(
        &self,
        action: &'static str,
        params: &[(&str, &str)],
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = self.url()?.clone();
        let started = Instant::now();

        let result = async {
            let response = self
                .client
                .get(url)
                .query(&[("action", action)])
                .query(params)
                .header(CACHE_CONTROL, "no-store")
                .send()
                .await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        }
        .await;

        histogram!(UPSTREAM_DURATION, "action" => action).record(started.elapsed().as_secs_f64());

        let (status, text) = result?;
        if !status.is_success() {
            tracing::warn!(action, status = status.as_u16(), "upstream answered with an error status");
        }

        Ok(UpstreamResponse {
            status,
            body: serde_json::from_str(&text).ok(),
        })
    }

    pub async fn get_by_id(&self, report_id: &str) -> Result<UpstreamResponse, UpstreamError> {
        self.get("getById", &[("reportId", report_id)]).await
    }

    /// `params` are the record fields, in the order the store expects them.
    pub async fn upsert(&self, params: &[(&str, &str)]) -> Result<UpstreamResponse, UpstreamError> {
        self.get("upsert", params).await
    }

    pub async fn track_visit(&self, params: &[(&str, &str)]) -> Result<UpstreamResponse, UpstreamError> {
        self.get("track_visit", params).await
    }

    pub async fn health(&self) -> Result<UpstreamResponse, UpstreamError> {
        self.get("health", &[]).await
    }

    /// Posts `fields` as a form, defaulting `action` to `upsert`, and retries
    /// any failure. Returns the store's JSON answer from the first attempt
    /// that gets a 2xx.
    pub async fn submit_with_retry(&self, fields: &[(String, String)]) -> Result<Value, UpstreamError> {
        let url = self.url()?;

        let mut form: Vec<(&str, &str)> = fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        if !form.iter().any(|(key, _)| *key == "action") {
            form.push(("action", "upsert"));
        }

        let mut attempt = 1;
        loop {
            tracing::debug!(attempt, attempts = self.retry.attempts, "submitting to upstream");

            match self.post_form(url, &form).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.retry.attempts => {
                    tracing::error!(attempt, "upstream submission failed: {e}");
                    return Err(UpstreamError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(attempt, ?delay, "upstream submission failed, retrying: {e}");
                    counter!(UPSTREAM_RETRIES).increment(1);
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn post_form(&self, url: &Url, form: &[(&str, &str)]) -> Result<Value, UpstreamError> {
        let started = Instant::now();
        let result = async {
            let response = self.client.post(url.clone()).form(form).send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        }
        .await;
        histogram!(UPSTREAM_DURATION, "action" => "submit").record(started.elapsed().as_secs_f64());

        let (status, text) = result?;
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        serde_json::from_str(&text).map_err(|e| UpstreamError::InvalidResponse(e.to_string()))
    }
}
