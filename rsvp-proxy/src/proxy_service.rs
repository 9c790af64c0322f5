use crate::api::{self, ProxyResponse};
use crate::errors::ProxyError;
use crate::metrics_defs::{RATE_LIMITED, REQUEST_DURATION, REQUESTS};
use crate::not_found::NotFoundCache;
use crate::rate_limit::RateLimiter;
use crate::upstream::Upstream;
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde_json::json;
use shared::http::{PeerAddr, make_json_response};
use shared::{counter, histogram};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Everything the handlers share. Built once at startup.
pub struct ProxyState {
    pub upstream: Upstream,
    pub rate_limiter: Arc<RateLimiter>,
    pub not_found: NotFoundCache,
    pub allowed_origin: HeaderValue,
    pub calendar_path: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    FetchRsvp,
    SubmitRsvp,
    SubmitInfo,
    TrackVisit,
    Calendar,
    CalendarPreflight,
    SubmitProxy,
}

impl Route {
    /// `Err` carries the status for an unknown path or a known path hit with
    /// the wrong method.
    fn resolve(method: &Method, path: &str) -> Result<Route, StatusCode> {
        let path = match path.strip_suffix('/') {
            Some(trimmed) if !trimmed.is_empty() => trimmed,
            _ => path,
        };

        let route = match (path, method) {
            ("/api/rsvp", &Method::GET) => Route::FetchRsvp,
            ("/api/submit", &Method::POST) => Route::SubmitRsvp,
            ("/api/submit", &Method::GET) => Route::SubmitInfo,
            ("/api/track-visit", &Method::POST) => Route::TrackVisit,
            ("/api/calendar", &Method::GET) => Route::Calendar,
            ("/api/calendar", &Method::OPTIONS) => Route::CalendarPreflight,
            ("/api/submit-proxy", &Method::POST) => Route::SubmitProxy,
            (
                "/api/rsvp" | "/api/submit" | "/api/track-visit" | "/api/calendar"
                | "/api/submit-proxy",
                _,
            ) => return Err(StatusCode::METHOD_NOT_ALLOWED),
            _ => return Err(StatusCode::NOT_FOUND),
        };
        Ok(route)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Route::FetchRsvp => "fetch_rsvp",
            Route::SubmitRsvp => "submit",
            Route::SubmitInfo => "submit_info",
            Route::TrackVisit => "track_visit",
            Route::Calendar => "calendar",
            Route::CalendarPreflight => "calendar_preflight",
            Route::SubmitProxy => "submit_proxy",
        }
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, Route::SubmitRsvp | Route::SubmitProxy)
    }
}

pub struct ProxyService {
    state: Arc<ProxyState>,
}

impl ProxyService {
    pub fn new(state: ProxyState) -> Self {
        ProxyService {
            state: Arc::new(state),
        }
    }
}

fn error_response(route: Route, e: ProxyError) -> ProxyResponse {
    let status = e.status_code();
    if status.is_server_error() {
        tracing::error!(route = route.as_str(), "request failed: {e}");
    } else {
        tracing::warn!(route = route.as_str(), "rejected request: {e}");
    }
    api::failure(status, &e.to_string())
}

async fn handle(
    state: &ProxyState,
    route: Route,
    req: Request<Incoming>,
) -> Result<ProxyResponse, ProxyError> {
    if route.is_rate_limited() {
        let ip = api::client_ip(req.headers(), req.extensions().get::<PeerAddr>());
        if !state.rate_limiter.check(&ip) {
            tracing::warn!(%ip, route = route.as_str(), "rate limit exceeded");
            counter!(RATE_LIMITED, "route" => route.as_str()).increment(1);
            return Ok(api::too_many_requests(state.rate_limiter.status(&ip)));
        }
    }

    let (parts, body) = req.into_parts();
    let query = parts.uri.query();

    match route {
        Route::FetchRsvp => api::rsvp::get(state, query).await,
        Route::SubmitInfo => api::submit::get(state, query).await,
        Route::SubmitRsvp => {
            let body = api::read_body(body).await?;
            api::submit::post(state, &body).await
        }
        Route::TrackVisit => {
            let body = api::read_body(body).await?;
            api::track_visit::post(state, &body).await
        }
        Route::Calendar => api::calendar::get(state).await,
        Route::CalendarPreflight => api::calendar::options(state).await,
        Route::SubmitProxy => {
            let body = api::read_body(body).await?;
            api::submit_proxy::post(state, &parts.headers, query, &body).await
        }
    }
}

impl Service<Request<Incoming>> for ProxyService {
    type Response = ProxyResponse;
    type Error = ProxyError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let state = self.state.clone();

        Box::pin(async move {
            let started = Instant::now();

            let (route_name, response): (&'static str, Response<_>) =
                match Route::resolve(req.method(), req.uri().path()) {
                    Ok(route) => {
                        let response = handle(&state, route, req)
                            .await
                            .unwrap_or_else(|e| error_response(route, e));
                        (route.as_str(), response)
                    }
                    Err(status) => {
                        tracing::debug!(
                            method = %req.method(),
                            path = %req.uri().path(),
                            "No route matched"
                        );
                        let message = status.canonical_reason().unwrap_or("Not Found");
                        let body = json!({ "ok": false, "message": message });
                        ("unmatched", make_json_response(status, &body))
                    }
                };

            counter!(
                REQUESTS,
                "route" => route_name,
                "status" => response.status().as_str().to_string()
            )
            .increment(1);
            histogram!(REQUEST_DURATION, "route" => route_name)
                .record(started.elapsed().as_secs_f64());

            Ok(response)
        })
    }
}
