use axum::{
    extract::{Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::{
    clock::parse_date,
    config::Settings,
    oracle::BrowserEvent,
    profile::{self, SignupForm, UserProfile},
    report::ReportError,
    service::TrackerService,
    store::load_sessions,
};

pub const SEND_REPORT_NOW_ACTION: &str = "send_report_now";

#[derive(Clone)]
pub struct AppState {
    pub service: TrackerService,
    pub settings: Settings,
}

#[derive(Serialize)]
struct OkResponse<T: Serialize> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

#[derive(Serialize)]
struct ErrResponse {
    ok: bool,
    error: String,
}

fn ok<T: Serialize>(data: T) -> Response {
    Json(OkResponse {
        ok: true,
        data: Some(data),
    })
    .into_response()
}

fn ok_empty() -> Response {
    Json(OkResponse::<Value> { ok: true, data: None }).into_response()
}

fn err(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrResponse {
            ok: false,
            error: error.into(),
        }),
    )
        .into_response()
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/event", post(post_event).options(options_ok))
        .route("/tracking/current", get(get_tracking_current))
        .route("/sessions", get(get_sessions))
        .route("/report/preview", get(get_report_preview))
        .route(
            "/report/send_now",
            post(post_report_send_now).options(options_ok),
        )
        .route(
            "/profile",
            get(get_profile).post(post_profile).options(options_ok),
        )
        .route(
            "/profile/logout",
            post(post_profile_logout).options(options_ok),
        )
        .route(
            "/profile/validate",
            post(post_profile_validate).options(options_ok),
        )
        .route("/settings", get(get_settings))
        .with_state(state)
        .layer(cors)
}

async fn options_ok() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
struct HealthInfo {
    service: &'static str,
    version: &'static str,
}

async fn health() -> Response {
    ok(HealthInfo {
        service: "tracker_core",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct Envelope {
    v: i32,
}

#[derive(Serialize)]
struct EventAck {
    queued: bool,
}

async fn post_event(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let envelope: Envelope = match serde_json::from_value(payload.clone()) {
        Ok(v) => v,
        Err(_) => return err(StatusCode::BAD_REQUEST, "invalid_json"),
    };
    if envelope.v < 1 {
        return err(StatusCode::BAD_REQUEST, "invalid_version");
    }
    let event: BrowserEvent = match serde_json::from_value(payload) {
        Ok(e) => e,
        Err(e) => {
            info!("rejected event: {e}");
            return err(StatusCode::BAD_REQUEST, "invalid_event");
        }
    };

    let queued = state.service.ingest(event).await;
    ok(EventAck { queued })
}

async fn get_tracking_current(State(state): State<AppState>) -> Response {
    // `data: null` when nothing is being tracked.
    ok(state.service.tracker().current_view().await)
}

#[derive(Deserialize)]
struct DateQuery {
    #[serde(default)]
    date: Option<String>,
}

fn resolve_date(state: &AppState, q: DateQuery) -> Result<String, Response> {
    match q.date {
        None => Ok(state.service.today()),
        Some(s) => parse_date(&s).ok_or_else(|| err(StatusCode::BAD_REQUEST, "invalid_date")),
    }
}

async fn get_sessions(State(state): State<AppState>, Query(q): Query<DateQuery>) -> Response {
    let date = match resolve_date(&state, q) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    match load_sessions(state.service.store(), &date).await {
        Ok(records) => ok(records),
        Err(e) => {
            error!("load_sessions failed: {e:#}");
            err(StatusCode::INTERNAL_SERVER_ERROR, "db_error")
        }
    }
}

async fn get_report_preview(State(state): State<AppState>, Query(q): Query<DateQuery>) -> Response {
    let date = match resolve_date(&state, q) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    match state.service.reporter().preview(&date).await {
        Ok(text) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            text,
        )
            .into_response(),
        Err(e @ ReportError::NoActivity) => err(StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => {
            error!("report preview failed: {e}");
            err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Deserialize)]
struct ActionRequest {
    action: String,
}

async fn post_report_send_now(
    State(state): State<AppState>,
    Json(req): Json<ActionRequest>,
) -> Response {
    if req.action != SEND_REPORT_NOW_ACTION {
        return err(StatusCode::BAD_REQUEST, "unknown_action");
    }
    Json(state.service.send_report_now().await).into_response()
}

async fn get_profile(State(state): State<AppState>) -> Response {
    match profile::load(state.service.store()).await {
        Ok(p) => ok(p),
        Err(e) => {
            error!("profile load failed: {e:#}");
            err(StatusCode::INTERNAL_SERVER_ERROR, "db_error")
        }
    }
}

async fn post_profile(State(state): State<AppState>, Json(req): Json<UserProfile>) -> Response {
    let store = state.service.store();
    if let Err(e) = profile::save(store, &req).await {
        error!("profile save failed: {e:#}");
        return err(StatusCode::INTERNAL_SERVER_ERROR, "db_error");
    }
    match profile::load(store).await {
        Ok(p) => ok(p),
        Err(e) => {
            error!("profile load failed: {e:#}");
            err(StatusCode::INTERNAL_SERVER_ERROR, "db_error")
        }
    }
}

async fn post_profile_logout(State(state): State<AppState>) -> Response {
    match profile::logout(state.service.store()).await {
        Ok(()) => ok_empty(),
        Err(e) => {
            error!("logout failed: {e:#}");
            err(StatusCode::INTERNAL_SERVER_ERROR, "db_error")
        }
    }
}

async fn post_profile_validate(Json(form): Json<SignupForm>) -> Response {
    match profile::validate_signup(&form) {
        Ok(valid) => ok(valid),
        Err(e) => err(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn get_settings(State(state): State<AppState>) -> Response {
    ok(state.settings)
}
