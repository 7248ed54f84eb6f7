// libs/prescription-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{ActorContext, User};
use shared_models::error::AppError;

use crate::models::{AttachPrescriptionRequest, PrescriptionError};
use crate::services::prescription::PrescriptionService;

fn map_prescription_error(e: PrescriptionError) -> AppError {
    match e {
        PrescriptionError::AppointmentNotFound => {
            AppError::NotFound("Appointment not found".to_string())
        }
        PrescriptionError::Unauthorized => {
            AppError::Auth("Not authorized to manage prescriptions for this appointment".to_string())
        }
        PrescriptionError::ValidationError(msg) => AppError::BadRequest(msg),
        PrescriptionError::DatabaseError(msg) => AppError::Internal(msg),
    }
}

#[axum::debug_handler]
pub async fn attach_prescription(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<AttachPrescriptionRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let actor = ActorContext::from_user(&user)?;

    let service = PrescriptionService::new(&state);

    let prescription = service
        .attach(&actor, appointment_id, request, token)
        .await
        .map_err(map_prescription_error)?;

    Ok(Json(json!({
        "success": true,
        "prescription": prescription,
        "message": "Prescription recorded successfully"
    })))
}

#[axum::debug_handler]
pub async fn list_prescriptions(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    // Any authenticated actor may read; the store scopes rows to the caller
    let _actor = ActorContext::from_user(&user)?;

    let service = PrescriptionService::new(&state);

    let prescriptions = service
        .list_for_appointment(appointment_id, token)
        .await
        .map_err(map_prescription_error)?;

    Ok(Json(json!({
        "appointment_id": appointment_id,
        "prescriptions": prescriptions
    })))
}
