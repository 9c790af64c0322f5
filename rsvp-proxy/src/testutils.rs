use crate::not_found::NotFoundCache;
use crate::proxy_service::{ProxyService, ProxyState};
use crate::rate_limit::RateLimiter;
use crate::upstream::{RetryPolicy, Upstream};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::HeaderValue;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use parking_lot::Mutex;
use serde_json::Value;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

#[derive(Clone, Debug)]
pub struct UpstreamRequest {
    pub method: String,
    pub query: Option<String>,
    pub body: String,
}

impl UpstreamRequest {
    pub fn param(&self, key: &str) -> Option<String> {
        find(self.query.as_deref().unwrap_or(""), key)
    }

    pub fn form(&self, key: &str) -> Option<String> {
        find(&self.body, key)
    }
}

fn find(encoded: &str, key: &str) -> Option<String> {
    url::form_urlencoded::parse(encoded.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

pub struct UpstreamReply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
    pub delay: Option<Duration>,
}

impl UpstreamReply {
    pub fn json(status: u16, body: Value) -> Self {
        UpstreamReply {
            status,
            content_type: "application/json",
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        UpstreamReply {
            status,
            content_type: "text/html",
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Responder = dyn Fn(&UpstreamRequest) -> UpstreamReply + Send + Sync;

/// Stand-in for the spreadsheet web app. Answers from a closure and keeps
/// every request it saw.
pub struct MockUpstream {
    port: u16,
    requests: Arc<Mutex<Vec<UpstreamRequest>>>,
}

impl MockUpstream {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&UpstreamRequest) -> UpstreamReply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let responder: Arc<Responder> = Arc::new(responder);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    continue;
                };
                let io = TokioIo::new(stream);
                let responder = responder.clone();
                let recorded = recorded.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let responder = responder.clone();
                        let recorded = recorded.clone();
                        async move {
                            let (parts, body) = req.into_parts();
                            let body = body.collect().await.unwrap().to_bytes();
                            let request = UpstreamRequest {
                                method: parts.method.to_string(),
                                query: parts.uri.query().map(str::to_string),
                                body: String::from_utf8_lossy(&body).into_owned(),
                            };
                            let reply = responder(&request);
                            recorded.lock().push(request);

                            if let Some(delay) = reply.delay {
                                tokio::time::sleep(delay).await;
                            }

                            let response = Response::builder()
                                .status(reply.status)
                                .header("content-type", reply.content_type)
                                .body(Full::new(Bytes::from(reply.body)))
                                .unwrap();
                            Ok::<_, Infallible>(response)
                        }
                    });

                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockUpstream { port, requests }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://127.0.0.1:{}/macros/s/test/exec", self.port)).unwrap()
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().clone()
    }
}

pub struct TestProxy {
    pub upstream_url: Option<Url>,
    pub rate_limiter: Arc<RateLimiter>,
    pub calendar_path: PathBuf,
}

impl TestProxy {
    pub fn new(upstream_url: Option<Url>) -> Self {
        TestProxy {
            upstream_url,
            rate_limiter: Arc::new(RateLimiter::new(100, Duration::from_secs(60))),
            calendar_path: PathBuf::from("does-not-exist.ics"),
        }
    }

    pub fn rate_limit(mut self, max_requests: usize) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::new(max_requests, Duration::from_secs(60)));
        self
    }

    pub fn calendar(mut self, path: PathBuf) -> Self {
        self.calendar_path = path;
        self
    }

    /// Serves the proxy on an ephemeral port and returns its base URL.
    pub async fn spawn(self) -> String {
        let upstream = Upstream::new(self.upstream_url, Duration::from_secs(2))
            .unwrap()
            .with_retry(RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(10),
            });
        let state = ProxyState {
            upstream,
            rate_limiter: self.rate_limiter,
            not_found: NotFoundCache::new(),
            allowed_origin: HeaderValue::from_static("https://wedding.example"),
            calendar_path: self.calendar_path,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(shared::http::serve(listener, ProxyService::new(state)));
        format!("http://127.0.0.1:{port}")
    }
}
