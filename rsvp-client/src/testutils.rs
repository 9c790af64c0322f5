//! Test doubles: an in-memory `RsvpRemote`, a notifier that records what it
//! was told, and a local HTTP server with scripted responses.

use crate::cancel::CancelSignal;
use crate::notify::{Notice, Notifier};
use crate::remote::{
    FetchOutcome, RemoteError, RsvpRemote, UpsertAction, UpsertOutcome, UpsertRequest,
};
use crate::types::RsvpRecord;
use crate::visit::VisitRequest;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;

/// How `FakeRemote` answers reads.
#[derive(Clone, Debug)]
pub enum FetchBehavior {
    /// Look the id up in the fake store.
    Store,
    /// Same as `Store`, after a delay.
    Delayed(Duration),
    Respond(Result<FetchOutcome, RemoteError>),
    /// Never answers unless cancelled.
    Hang,
}

/// An in-memory stand-in for the spreadsheet store that behaves like the
/// real upsert protocol: unknown or missing ids create, known ids update.
pub struct FakeRemote {
    records: Mutex<HashMap<String, RsvpRecord>>,
    fetch_behavior: Mutex<FetchBehavior>,
    upsert_error: Mutex<Option<RemoteError>>,
    upsert_delay: Mutex<Option<Duration>>,
    visit_error: Mutex<Option<RemoteError>>,
    upserts: Mutex<Vec<UpsertRequest>>,
    visits: Mutex<Vec<VisitRequest>>,
    fetch_calls: AtomicUsize,
    fetch_signal: Mutex<Option<CancelSignal>>,
    next_id: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        FakeRemote {
            records: Mutex::new(HashMap::new()),
            fetch_behavior: Mutex::new(FetchBehavior::Store),
            upsert_error: Mutex::new(None),
            upsert_delay: Mutex::new(None),
            visit_error: Mutex::new(None),
            upserts: Mutex::new(Vec::new()),
            visits: Mutex::new(Vec::new()),
            fetch_calls: AtomicUsize::new(0),
            fetch_signal: Mutex::new(None),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn insert(&self, record: RsvpRecord) {
        self.records.lock().insert(record.report_id.clone(), record);
    }

    pub fn record(&self, report_id: &str) -> Option<RsvpRecord> {
        self.records.lock().get(report_id).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn set_fetch_behavior(&self, behavior: FetchBehavior) {
        *self.fetch_behavior.lock() = behavior;
    }

    pub fn fail_upserts(&self, error: RemoteError) {
        *self.upsert_error.lock() = Some(error);
    }

    pub fn set_upsert_delay(&self, delay: Duration) {
        *self.upsert_delay.lock() = Some(delay);
    }

    pub fn fail_visits(&self, error: RemoteError) {
        *self.visit_error.lock() = Some(error);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Cancel signal handed to the most recent read.
    pub fn last_fetch_signal(&self) -> Option<CancelSignal> {
        self.fetch_signal.lock().clone()
    }

    pub fn upserts(&self) -> Vec<UpsertRequest> {
        self.upserts.lock().clone()
    }

    pub fn visits(&self) -> Vec<VisitRequest> {
        self.visits.lock().clone()
    }

    fn lookup(&self, id: &str) -> FetchOutcome {
        match self.record(id) {
            Some(record) => FetchOutcome::Found(record),
            None => FetchOutcome::NotFound,
        }
    }
}

async fn wait_for_cancel(cancel: Option<&CancelSignal>) -> RemoteError {
    match cancel {
        Some(signal) => {
            signal.cancelled().await;
            RemoteError::Cancelled
        }
        None => std::future::pending().await,
    }
}

#[async_trait]
impl RsvpRemote for FakeRemote {
    async fn fetch_by_id(
        &self,
        id: &str,
        cancel: Option<&CancelSignal>,
    ) -> Result<FetchOutcome, RemoteError> {
        *self.fetch_signal.lock() = cancel.cloned();
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.fetch_behavior.lock().clone();

        match behavior {
            FetchBehavior::Store => Ok(self.lookup(id)),
            FetchBehavior::Delayed(delay) => {
                tokio::select! {
                    error = wait_for_cancel(cancel) => Err(error),
                    _ = tokio::time::sleep(delay) => Ok(self.lookup(id)),
                }
            }
            FetchBehavior::Respond(result) => result,
            FetchBehavior::Hang => Err(wait_for_cancel(cancel).await),
        }
    }

    async fn upsert(
        &self,
        request: &UpsertRequest,
        _cancel: Option<&CancelSignal>,
    ) -> Result<UpsertOutcome, RemoteError> {
        self.upserts.lock().push(request.clone());
        let delay = *self.upsert_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.upsert_error.lock().clone() {
            return Err(error);
        }

        let mut records = self.records.lock();
        let (report_id, action) = match &request.report_id {
            Some(id) if records.contains_key(id) => (id.clone(), UpsertAction::Update),
            _ => {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                (format!("r-{n}"), UpsertAction::Create)
            }
        };

        records.insert(
            report_id.clone(),
            RsvpRecord {
                report_id: report_id.clone(),
                name: request.name.clone(),
                status: request.status,
                guests: request.guests,
                blessing: request.blessing.clone(),
            },
        );

        Ok(UpsertOutcome {
            ok: true,
            report_id: Some(report_id),
            action: Some(action),
        })
    }

    async fn track_visit(&self, visit: &VisitRequest) -> Result<(), RemoteError> {
        self.visits.lock().push(visit.clone());
        match self.visit_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub body: String,
}

#[derive(Clone, Debug)]
pub struct MockResponse {
    pub status: u16,
    pub body: String,
    pub delay: Option<Duration>,
}

impl MockResponse {
    pub fn json(status: u16, body: &str) -> Self {
        MockResponse {
            status,
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Responder = dyn Fn(&RecordedRequest) -> MockResponse + Send + Sync;

/// Local HTTP server that answers from a closure and keeps every request.
pub struct MockServer {
    port: u16,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockServer {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
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
                            let request = RecordedRequest {
                                method: parts.method.to_string(),
                                path: parts.uri.path().to_string(),
                                query: parts.uri.query().map(str::to_string),
                                body: String::from_utf8_lossy(&body).into_owned(),
                            };
                            let response = responder(&request);
                            recorded.lock().push(request);

                            if let Some(delay) = response.delay {
                                tokio::time::sleep(delay).await;
                            }

                            let response = Response::builder()
                                .status(response.status)
                                .header("content-type", "application/json")
                                .body(Full::new(Bytes::from(response.body)))
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

        MockServer { port, requests }
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}
