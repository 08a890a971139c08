// libs/appointment-cell/src/handlers.rs
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_models::response::ApiResponse;

use crate::models::{AppointmentListQuery, CreateAppointmentRequest, TimeSlot, UpdateAppointmentRequest};
use crate::router::AppointmentState;
use crate::services::access::{resolve_scope, Actor};
use crate::services::formatting::AppointmentView;
use crate::services::reminders::ReminderRunSummary;

// ==============================================================================
// REQUEST PARSING
// ==============================================================================

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::ValidationError(format!("Invalid request body: {}", e)))
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("Invalid {} id", what)))
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<AppointmentView>>), AppError> {
    let request: CreateAppointmentRequest = parse_body(&body)?;
    let actor = Actor::from_user(&user);

    let created = state.service.create_appointment(request, &actor).await?;

    Ok((
        StatusCode::CREATED,
        Json(
            ApiResponse::ok(created.data)
                .with_message("Appointment created successfully")
                .with_warnings(created.warnings),
        ),
    ))
}

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    query: Result<Query<AppointmentListQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<AppointmentView>>>, AppError> {
    let Query(query) = query.map_err(|e| AppError::ValidationError(format!("Invalid query: {}", e)))?;
    let actor = Actor::from_user(&user);
    let scope = resolve_scope(state.service.store(), &actor).await?;

    let page = state.service.list_appointments(query, scope).await?;
    let count = page.appointments.len() as u64;

    Ok(Json(
        ApiResponse::ok(page.appointments).with_page(count, page.total, page.total_pages, page.current_page),
    ))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<String>,
) -> Result<Json<ApiResponse<AppointmentView>>, AppError> {
    let appointment_id = parse_id(&appointment_id, "appointment")?;
    let actor = Actor::from_user(&user);
    let scope = resolve_scope(state.service.store(), &actor).await?;

    let appointment = state.service.get_appointment(appointment_id).await?;
    if !scope.permits(&appointment) {
        debug!("User {} denied access to appointment {}", user.id, appointment_id);
        return Err(AppError::Forbidden("Not authorized to view this appointment".to_string()));
    }

    Ok(Json(ApiResponse::ok(appointment)))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<String>,
    body: Bytes,
) -> Result<Json<ApiResponse<AppointmentView>>, AppError> {
    let appointment_id = parse_id(&appointment_id, "appointment")?;
    let request: UpdateAppointmentRequest = parse_body(&body)?;
    let actor = Actor::from_user(&user);

    let updated = state
        .service
        .update_appointment(appointment_id, request, &actor)
        .await?;

    Ok(Json(
        ApiResponse::ok(updated.data)
            .with_message("Appointment updated successfully")
            .with_warnings(updated.warnings),
    ))
}

#[axum::debug_handler]
pub async fn delete_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<String>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let appointment_id = parse_id(&appointment_id, "appointment")?;
    let actor = Actor::from_user(&user);

    let deleted = state.service.delete_appointment(appointment_id, &actor).await?;
    if !deleted.data {
        return Err(AppError::NotFound("Appointment not found".to_string()));
    }

    Ok(Json(
        ApiResponse::ok(json!({ "id": appointment_id, "deleted": true }))
            .with_message("Appointment deleted successfully")
            .with_warnings(deleted.warnings),
    ))
}

// ==============================================================================
// TIME SLOTS & MAINTENANCE
// ==============================================================================

#[axum::debug_handler]
pub async fn get_time_slot(
    State(state): State<AppointmentState>,
    Path(slot_id): Path<String>,
) -> Result<Json<ApiResponse<TimeSlot>>, AppError> {
    let slot_id = parse_id(&slot_id, "time slot")?;
    let slot = state.service.get_time_slot(slot_id).await?;
    Ok(Json(ApiResponse::ok(slot)))
}

/// Admin only: runs one reminder pass immediately.
#[axum::debug_handler]
pub async fn run_reminders(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
) -> Result<Json<ApiResponse<ReminderRunSummary>>, AppError> {
    if user.role() != Role::Admin {
        return Err(AppError::Forbidden("Only administrators can run reminders".to_string()));
    }

    let summary = state.reminders.run_once(Utc::now()).await?;
    Ok(Json(ApiResponse::ok(summary)))
}
