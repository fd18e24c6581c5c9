//! Route handlers for the local API.

use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::control::{self, ControlFilter};

use super::ApiContext;

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub mode: i32,
    pub node_ready: bool,
}

pub async fn status(State(ctx): State<Arc<ApiContext>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: ctx.started.elapsed().as_secs(),
        node_id: ctx.state.my_node_num().map(|n| format!("{:#010x}", n)),
        mode: ctx.state.mode() as i32,
        node_ready: ctx.state.is_ready(),
    })
}

pub async fn get_mode(State(ctx): State<Arc<ApiContext>>) -> Json<serde_json::Value> {
    let mode = ctx
        .mode_override
        .unwrap_or_else(|| ctx.state.mode() as i32);
    Json(json!({ "mode": mode }))
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub box_id: Option<String>,
    pub dist_id: Option<String>,
    pub sens_id: Option<String>,
    pub dev_type: Option<String>,
}

/// Translate a key/value request into a broadcast control command.
pub async fn set_control_value(
    State(ctx): State<Arc<ApiContext>>,
    Form(request): Form<ControlRequest>,
) -> Response {
    if request.key.is_empty() || request.value.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing key or value parameter.");
    }

    let filter = match parse_filter(&request) {
        Ok(filter) => filter,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };

    let Some(control) = control::build_control_message(&request.key, &request.value, &filter)
    else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid key or value.");
    };

    match control::send_control(&ctx.to_device, control).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "control value set",
                "key": request.key,
                "value": request.value,
            })),
        )
            .into_response(),
        Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, "Device link is down."),
    }
}

fn parse_filter(request: &ControlRequest) -> Result<ControlFilter, String> {
    Ok(ControlFilter {
        box_id: parse_filter_field("box_id", &request.box_id)?,
        dist_id: parse_filter_field("dist_id", &request.dist_id)?,
        sens_id: parse_filter_field("sens_id", &request.sens_id)?,
        dev_type: parse_filter_field("dev_type", &request.dev_type)?,
    })
}

fn parse_filter_field(name: &str, value: &Option<String>) -> Result<Option<u32>, String> {
    match value.as_deref() {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| format!("Invalid {} filter value.", name)),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SharedState;
    use std::time::Instant;
    use tokio::sync::mpsc;

    fn context() -> (Arc<ApiContext>, mpsc::Receiver<crate::protobuf::meshtastic::ToRadio>) {
        let (to_device, to_rx) = mpsc::channel(10);
        let ctx = Arc::new(ApiContext {
            state: Arc::new(SharedState::new()),
            to_device,
            mode_override: None,
            started: Instant::now(),
        });
        (ctx, to_rx)
    }

    fn request(key: &str, value: &str) -> ControlRequest {
        ControlRequest {
            key: key.into(),
            value: value.into(),
            box_id: None,
            dist_id: None,
            sens_id: None,
            dev_type: None,
        }
    }

    #[tokio::test]
    async fn control_accepts_valid_request() {
        let (ctx, mut to_rx) = context();
        let response = set_control_value(State(ctx), Form(request("mode", "2"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(to_rx.try_recv().is_ok(), "an envelope must be enqueued");
    }

    #[tokio::test]
    async fn control_rejects_unknown_key() {
        let (ctx, mut to_rx) = context();
        let response = set_control_value(State(ctx), Form(request("voltage", "5"))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(to_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn control_rejects_missing_parameters() {
        let (ctx, _to_rx) = context();
        let response = set_control_value(State(ctx), Form(request("", ""))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn control_rejects_bad_filter() {
        let (ctx, _to_rx) = context();
        let mut req = request("mode", "1");
        req.box_id = Some("abc".into());
        let response = set_control_value(State(ctx), Form(req)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn mode_prefers_override() {
        let (ctx, _to_rx) = context();
        let Json(body) = get_mode(State(ctx.clone())).await;
        assert_eq!(body, json!({ "mode": 0 }));

        let ctx_override = Arc::new(ApiContext {
            state: ctx.state.clone(),
            to_device: ctx.to_device.clone(),
            mode_override: Some(2),
            started: Instant::now(),
        });
        let Json(body) = get_mode(State(ctx_override)).await;
        assert_eq!(body, json!({ "mode": 2 }));
    }
}
