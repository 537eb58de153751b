use crate::state::CycleReport;
use axum::extract::State;
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use tokio::sync::watch;

pub type Reports = watch::Receiver<Option<CycleReport>>;

pub async fn readiness_probe(State(reports): State<Reports>) -> impl IntoResponse {
    // ready once the first cycle has finished, whatever its outcome
    match *reports.borrow() {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub async fn liveness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn status(State(reports): State<Reports>) -> impl IntoResponse {
    let report = reports.borrow().clone();
    match report {
        Some(report) => (StatusCode::OK, Json(report)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

pub fn create_app(reports: Reports) -> Router {
    Router::new()
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/status", get(status))
        .with_state(reports)
}
