// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::NaiveDate;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{ActorContext, Capability, User};
use shared_models::error::AppError;

use crate::models::{AppointmentError, BookAppointmentRequest};
use crate::services::scheduling::SchedulingService;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct DayScheduleQuery {
    pub date: Option<NaiveDate>,
}

// ==============================================================================
// ERROR TRANSLATION
// ==============================================================================

fn map_appointment_error(e: AppointmentError) -> AppError {
    match e {
        AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        AppointmentError::PastDate => AppError::BadRequest(
            "Appointments cannot be scheduled for past dates. Please select today or a future date."
                .to_string(),
        ),
        AppointmentError::CapacityExceeded => AppError::Conflict(
            "Provider already has the maximum number of appointments on this date".to_string(),
        ),
        AppointmentError::InvalidStatusTransition(status) => {
            AppError::BadRequest(format!("Cannot transition from current status: {}", status))
        }
        AppointmentError::DeletionFailed(msg) => AppError::Internal(msg),
        AppointmentError::ValidationError(msg) => AppError::BadRequest(msg),
        AppointmentError::Unauthorized => {
            AppError::Auth("Not authorized for this appointment".to_string())
        }
        AppointmentError::DatabaseError(msg) => AppError::Internal(msg),
    }
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let actor = ActorContext::from_user(&user)?;
    actor.require(Capability::Book)?;

    let scheduling_service = SchedulingService::new(&state);

    let appointment = scheduling_service
        .book_appointment(&actor, request, token)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked successfully"
    })))
}

/// Appointment plus its clinical records, the detail view.
#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let actor = ActorContext::from_user(&user)?;

    let scheduling_service = SchedulingService::new(&state);

    let appointment = scheduling_service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_appointment_error)?;

    if !appointment.involves(actor.actor_id) {
        return Err(AppError::Auth(
            "Not authorized to view this appointment".to_string(),
        ));
    }

    let prescriptions = scheduling_service
        .prescriptions()
        .list_for_appointment(appointment_id, token)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(json!({
        "appointment": appointment,
        "prescriptions": prescriptions
    })))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let actor = ActorContext::from_user(&user)?;
    actor.require(Capability::Complete)?;

    let scheduling_service = SchedulingService::new(&state);

    let appointment = scheduling_service
        .complete_appointment(&actor, appointment_id, token)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment marked as completed"
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let actor = ActorContext::from_user(&user)?;
    actor.require(Capability::Cancel)?;

    let scheduling_service = SchedulingService::new(&state);

    let appointment = scheduling_service
        .cancel_appointment(&actor, appointment_id, token)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled"
    })))
}

#[axum::debug_handler]
pub async fn delete_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let actor = ActorContext::from_user(&user)?;
    actor.require(Capability::Delete)?;

    let scheduling_service = SchedulingService::new(&state);

    scheduling_service
        .delete_appointment(&actor, appointment_id, token)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment and its prescriptions deleted"
    })))
}

/// The caller's own appointments, ordered by date ascending.
#[axum::debug_handler]
pub async fn list_my_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let actor = ActorContext::from_user(&user)?;

    let scheduling_service = SchedulingService::new(&state);

    let appointments = scheduling_service
        .list_for_actor(&actor, token)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "appointments": appointments
    })))
}

/// A provider's Scheduled appointments for one day (defaults to today).
#[axum::debug_handler]
pub async fn get_provider_day_schedule(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<DayScheduleQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let actor = ActorContext::from_user(&user)?;

    let scheduling_service = SchedulingService::new(&state);

    let appointments = scheduling_service
        .provider_day_schedule(&actor, doctor_id, query.date, token)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "appointments": appointments
    })))
}
