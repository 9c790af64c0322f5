// POST /api/track-visit
use crate::api::{ProxyResponse, failure, json_object, string_field};
use crate::errors::ProxyError;
use crate::proxy_service::ProxyState;
use hyper::StatusCode;
use serde_json::{Value, json};
use shared::http::make_json_response;

/// Visits count as recorded when either flag is literally `true`.
fn recorded(data: &Value) -> bool {
    let flag = |key| data.get(key).and_then(Value::as_bool) == Some(true);
    flag("ok") || flag("success")
}

pub async fn post(state: &ProxyState, body: &[u8]) -> Result<ProxyResponse, ProxyError> {
    if !state.upstream.is_configured() {
        return Ok(failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Missing GAS endpoint",
        ));
    }

    let fields = json_object(body);
    let name = string_field(&fields, "name").trim().to_string();
    let report_id = string_field(&fields, "reportId").trim().to_string();
    let device = match fields.get("device") {
        None | Some(Value::Null) => "unknown".to_string(),
        Some(_) => string_field(&fields, "device").trim().to_string(),
    };

    if name.is_empty() {
        return Ok(failure(StatusCode::BAD_REQUEST, "Missing name"));
    }

    let mut params = vec![("name", name.as_str())];
    if !report_id.is_empty() {
        params.push(("reportId", report_id.as_str()));
    }
    if !device.is_empty() {
        params.push(("device", device.as_str()));
    }

    let response = state.upstream.track_visit(&params).await?;
    let data = response.body_or_empty();
    let ok = recorded(&data);
    tracing::debug!(ok, %device, "visit tracked");

    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok(make_json_response(status, &json!({ "ok": ok, "gas": data })))
}
