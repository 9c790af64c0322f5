use crate::http::{make_boxed_error_response, make_json_response, make_text_response};
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

type ReadinessCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Serves `/health` (process is up) and `/ready` (every registered check
/// passes) on the admin listener.
pub struct AdminService<E> {
    checks: Vec<(&'static str, ReadinessCheck)>,
    _error: PhantomData<fn() -> E>,
}

#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
    failing: Vec<&'static str>,
}

impl<E> AdminService<E> {
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            _error: PhantomData,
        }
    }

    pub fn with_check<F>(mut self, name: &'static str, check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.checks.push((name, Arc::new(check)));
        self
    }

    fn failing_checks(&self) -> Vec<&'static str> {
        self.checks
            .iter()
            .filter(|(_, check)| !check())
            .map(|(name, _)| *name)
            .collect()
    }
}

impl<E> Default for AdminService<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Service<Request<Incoming>> for AdminService<E>
where
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, E>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let failing = self.failing_checks();

        Box::pin(async move {
            if req.method() != Method::GET {
                return Ok(make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED));
            }

            let res = match req.uri().path() {
                "/health" => make_text_response(StatusCode::OK, "ok\n"),
                "/ready" => {
                    let status = if failing.is_empty() {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    let body = ReadyResponse {
                        ready: failing.is_empty(),
                        failing,
                    };
                    make_json_response(status, &body)
                }
                _ => make_boxed_error_response(StatusCode::NOT_FOUND),
            };
            Ok(res)
        })
    }
}
