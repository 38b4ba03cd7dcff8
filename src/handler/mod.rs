use crate::config::Config;
use crate::engine::numbers::{NumberPair, NumberPool};
use crate::engine::Engine;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};


#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/stats", get(get_stats))
        .route("/api/config", get(get_config).post(post_config))
        .route("/api/numbers", post(post_numbers))
        .route("/api/control", post(post_control))
        .layer(middleware::from_fn_with_state(state.clone(), basic_auth))
        .layer(cors)
        .with_state(state)
}

async fn basic_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let auth = &state.config.control_surface.basic_auth;
    if credentials_match(request.headers(), &auth.user, &auth.pass) {
        return next.run(request).await;
    }
    (
        StatusCode::UNAUTHORIZED,
        [(
            header::WWW_AUTHENTICATE,
            "Basic realm=\"S1 Call Generator\"",
        )],
        "Unauthorized",
    )
        .into_response()
}

fn credentials_match(headers: &HeaderMap, user: &str, pass: &str) -> bool {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    match decoded.split_once(':') {
        Some((u, p)) => u == user && p == pass,
        None => false,
    }
}

async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.snapshot())
}

async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.as_ref().clone())
}

/// Accepts a configuration document but applies only the mutable subset:
/// the shaper's target CPS and the autopilot toggle. Everything else is
/// immutable after load.
async fn post_config(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let mut applied = Vec::new();
    if let Some(cps) = body
        .pointer("/call_params/target_cps")
        .and_then(|v| v.as_f64())
    {
        state.engine.set_target_cps(cps);
        applied.push("call_params.target_cps");
    }
    if let Some(enabled) = body.pointer("/autopilot/enabled").and_then(|v| v.as_bool()) {
        state.engine.set_autopilot(enabled);
        applied.push("autopilot.enabled");
    }
    info!("config update applied: {:?}", applied);
    Json(json!({ "applied": applied }))
}

#[derive(Debug, Deserialize)]
struct NumbersPayload {
    pairs: Vec<NumberPair>,
}

/// Replace the number pool: either a raw CSV body (`text/csv`) or a JSON
/// `{"pairs": [...]}` list.
async fn post_numbers(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let is_csv = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("text/csv"))
        .unwrap_or(false);

    let pairs = if is_csv {
        match NumberPool::parse_csv(body.as_bytes()) {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!("csv upload rejected: {}", e);
                return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
            }
        }
    } else {
        match serde_json::from_str::<NumbersPayload>(&body) {
            Ok(payload) => payload.pairs,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        }
    };

    let count = state.engine.replace_numbers(pairs);
    Json(json!({ "count": count })).into_response()
}

#[derive(Debug, Deserialize)]
struct ControlRequest {
    action: String,
}

async fn post_control(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> Response {
    match request.action.as_str() {
        "start" => match state.engine.start().await {
            Ok(()) => Json(json!({ "running": true })).into_response(),
            Err(e) => {
                warn!("start failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        },
        "stop" => {
            state.engine.stop().await;
            Json(json!({ "running": false })).into_response()
        }
        "toggle_autopilot" => {
            let enabled = state.engine.toggle_autopilot();
            Json(json!({ "autopilot": enabled })).into_response()
        }
        other => (
            StatusCode::BAD_REQUEST,
            format!("unknown action: {}", other),
        )
            .into_response(),
    }
}
