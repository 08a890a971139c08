use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use appointment_cell::{appointment_routes, AppointmentState};

pub fn create_router(appointments: AppointmentState) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic API is running!" }))
        .route("/health", get(health))
        .nest("/api/appointments", appointment_routes(appointments))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
