// GET /api/rsvp?id= : looks a response up by its report id.
use crate::api::{ProxyResponse, query_param};
use crate::errors::ProxyError;
use crate::proxy_service::ProxyState;
use hyper::StatusCode;
use rsvp_client::remote::is_not_found_message;
use serde_json::{Value, json};
use shared::http::make_json_response;

fn failure(status: StatusCode, error: &str) -> ProxyResponse {
    make_json_response(status, &json!({ "success": false, "error": error }))
}

/// The store signals a failed lookup with a truthy `error` field.
fn store_error(data: &Value) -> Option<String> {
    match data.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub async fn get(state: &ProxyState, query: Option<&str>) -> Result<ProxyResponse, ProxyError> {
    let Some(id) = query_param(query, "id").filter(|id| !id.is_empty()) else {
        return Ok(failure(StatusCode::BAD_REQUEST, "Missing reportId parameter"));
    };

    if !state.upstream.is_configured() {
        return Ok(failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Google Script URL not configured",
        ));
    }

    if let Some(error) = state.not_found.get(&id) {
        tracing::debug!(%id, "answering from not-found cache");
        return Ok(failure(StatusCode::BAD_REQUEST, &error));
    }

    let response = match state.upstream.get_by_id(&id).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(%id, "failed to fetch RSVP from upstream: {e}");
            return Ok(failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
            ));
        }
    };

    if !response.status.is_success() {
        let message = format!(
            "Upstream request failed with status {}",
            response.status.as_u16()
        );
        return Ok(failure(response.status, &message));
    }

    let Some(data) = response.body else {
        tracing::error!(%id, "upstream answered with a body that is not JSON");
        return Ok(failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Invalid response from upstream",
        ));
    };

    if let Some(error) = store_error(&data) {
        if is_not_found_message(&error) {
            state.not_found.insert(&id, &error);
        }
        return Ok(failure(StatusCode::BAD_REQUEST, &error));
    }

    Ok(make_json_response(
        StatusCode::OK,
        &json!({ "success": true, "data": data }),
    ))
}
