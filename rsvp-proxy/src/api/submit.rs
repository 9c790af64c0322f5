// /api/submit: creates or updates a response through the store's upsert
// action. GET answers a usage hint or, with `health=1`, the store's health.
use crate::api::{ProxyResponse, coerce_guests, failure, json_object, query_param, string_field};
use crate::errors::ProxyError;
use crate::proxy_service::ProxyState;
use crate::upstream::declares_ok;
use hyper::StatusCode;
use rsvp_client::remote::UpsertAction;
use serde_json::{Value, json};
use shared::http::make_json_response;

const MISSING_ENDPOINT: &str = "Missing GAS endpoint";

/// What the store did. Its own `action` wins, then a past-tense `message`,
/// then whether the caller already had an id.
fn resolve_action(data: &Value, sent_report_id: &str) -> Value {
    if let Some(action) = data.get("action").filter(|a| !a.is_null()) {
        return action.clone();
    }
    let from_message = data
        .get("message")
        .and_then(Value::as_str)
        .and_then(UpsertAction::parse);
    let action = from_message.unwrap_or(if sent_report_id.is_empty() {
        UpsertAction::Create
    } else {
        UpsertAction::Update
    });
    Value::from(action.as_str())
}

fn resolve_report_id(data: &Value, sent_report_id: &str) -> Value {
    match data.get("reportId") {
        Some(id) if !id.is_null() => id.clone(),
        _ if !sent_report_id.is_empty() => Value::from(sent_report_id),
        _ => Value::Null,
    }
}

pub async fn post(state: &ProxyState, body: &[u8]) -> Result<ProxyResponse, ProxyError> {
    if !state.upstream.is_configured() {
        return Ok(failure(StatusCode::INTERNAL_SERVER_ERROR, MISSING_ENDPOINT));
    }

    let fields = json_object(body);
    let name = string_field(&fields, "name").trim().to_string();
    let status = string_field(&fields, "status").trim().to_string();
    let guests = coerce_guests(fields.get("guests"));
    let blessing = string_field(&fields, "blessing");
    let report_id = string_field(&fields, "reportId").trim().to_string();

    if name.is_empty() || status.is_empty() {
        return Ok(failure(StatusCode::BAD_REQUEST, "Missing name/status"));
    }

    let mut params = vec![
        ("name", name.as_str()),
        ("status", status.as_str()),
        ("guests", guests.as_str()),
    ];
    if !blessing.is_empty() {
        params.push(("blessing", blessing.as_str()));
    }
    if !report_id.is_empty() {
        params.push(("reportId", report_id.as_str()));
    }

    let response = state.upstream.upsert(&params).await?;
    let data = response.body_or_empty();
    let ok = declares_ok(&data);
    let action = resolve_action(&data, &report_id);
    let resolved_id = resolve_report_id(&data, &report_id);

    if ok {
        if let Some(id) = resolved_id.as_str() {
            state.not_found.invalidate(id);
        }
        tracing::info!(action = %action, report_id = %resolved_id, "RSVP stored");
    } else {
        tracing::warn!(upstream_status = response.status.as_u16(), "upstream rejected RSVP");
    }

    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok(make_json_response(
        status,
        &json!({
            "ok": ok,
            "action": action,
            "reportId": resolved_id,
            "gas": data,
        }),
    ))
}

pub async fn get(state: &ProxyState, query: Option<&str>) -> Result<ProxyResponse, ProxyError> {
    if !state.upstream.is_configured() {
        return Ok(failure(StatusCode::INTERNAL_SERVER_ERROR, MISSING_ENDPOINT));
    }

    let health = query_param(query, "health");
    if !matches!(health.as_deref(), Some("1" | "true")) {
        return Ok(make_json_response(
            StatusCode::OK,
            &json!({ "ok": true, "message": "POST here to submit RSVP" }),
        ));
    }

    match state.upstream.health().await {
        Ok(response) => {
            let data = response.body_or_empty();
            let ok = declares_ok(&data);
            let status = if ok {
                StatusCode::OK
            } else {
                StatusCode::BAD_GATEWAY
            };
            Ok(make_json_response(status, &json!({ "ok": ok, "gas": data })))
        }
        Err(e) => {
            tracing::warn!("upstream health check failed: {e}");
            Ok(failure(StatusCode::BAD_GATEWAY, "Health check failed"))
        }
    }
}
