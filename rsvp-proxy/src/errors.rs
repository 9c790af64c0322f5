use crate::config::ValidationError;
use crate::upstream::UpstreamError;
use hyper::StatusCode;
use std::io;

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    RequestBody(String),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::RequestBody(_) => StatusCode::BAD_REQUEST,
            // The store declaring failure is answered as 502 by the handlers;
            // failing to reach it at all is a plain server error.
            ProxyError::Upstream(_)
            | ProxyError::Io(_)
            | ProxyError::Config(_)
            | ProxyError::InvalidHeader(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
