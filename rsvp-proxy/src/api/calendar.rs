// /api/calendar: the wedding's .ics file, downloadable cross-origin from the
// site's own origin only.
use crate::api::ProxyResponse;
use crate::errors::ProxyError;
use crate::proxy_service::ProxyState;
use hyper::StatusCode;
use hyper::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap, HeaderValue, VARY,
};
use shared::http::make_text_response;

fn insert_common_headers(headers: &mut HeaderMap, state: &ProxyState) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, state.allowed_origin.clone());
    headers.insert(VARY, HeaderValue::from_static("Origin"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store, max-age=0"));
}

pub async fn get(state: &ProxyState) -> Result<ProxyResponse, ProxyError> {
    let contents = match tokio::fs::read(&state.calendar_path).await {
        Ok(contents) => contents,
        Err(e) => {
            tracing::error!(path = %state.calendar_path.display(), "failed to read calendar file: {e}");
            return Ok(make_text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error serving calendar file",
            ));
        }
    };

    let mut response = make_text_response(StatusCode::OK, contents);
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/calendar; charset=utf-8"),
    );
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=wedding.ics"),
    );
    insert_common_headers(headers, state);
    Ok(response)
}

pub async fn options(state: &ProxyState) -> Result<ProxyResponse, ProxyError> {
    let mut response = make_text_response(StatusCode::NO_CONTENT, "");
    let headers = response.headers_mut();
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    insert_common_headers(headers, state);
    Ok(response)
}
