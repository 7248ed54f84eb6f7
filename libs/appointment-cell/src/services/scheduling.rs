// libs/appointment-cell/src/services/scheduling.rs
use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::{ActorContext, ActorRole, Capability};

use prescription_cell::services::prescription::PrescriptionService;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, BookAppointmentRequest, LifecycleAction,
    SchedulingRules,
};
use crate::services::capacity::CapacityGuard;
use crate::services::lifecycle::AppointmentLifecycleService;

/// Orchestrates booking, lifecycle transitions and deletion. Every operation
/// takes the acting identity explicitly and re-checks its capability before
/// touching the store.
pub struct SchedulingService {
    supabase: Arc<SupabaseClient>,
    capacity_guard: CapacityGuard,
    lifecycle_service: AppointmentLifecycleService,
    prescription_service: PrescriptionService,
    rules: SchedulingRules,
}

impl SchedulingService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));

        Self {
            capacity_guard: CapacityGuard::new(Arc::clone(&supabase)),
            lifecycle_service: AppointmentLifecycleService::new(),
            prescription_service: PrescriptionService::new(config),
            supabase,
            rules: SchedulingRules::default(),
        }
    }

    /// Book an appointment: validate, reject past dates, then delegate the
    /// count-and-insert admission to the capacity guard as one atomic unit.
    pub async fn book_appointment(
        &self,
        actor: &ActorContext,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        info!(
            "Booking appointment for patient {} with provider {}",
            request.patient_id, request.doctor_id
        );

        if !actor.can(Capability::Book) {
            return Err(AppointmentError::Unauthorized);
        }

        // A patient books for themselves only
        if actor.is_patient() && actor.actor_id != request.patient_id {
            return Err(AppointmentError::Unauthorized);
        }

        self.validate_booking_request(&request)?;

        let today = Utc::now().date_naive();
        if request.appointment_date < today {
            return Err(AppointmentError::PastDate);
        }

        let appointment = self.capacity_guard.admit(&request, auth_token).await?;

        info!(
            "Appointment {} booked for {} with provider {}",
            appointment.id, appointment.appointment_date, appointment.doctor_id
        );

        Ok(appointment)
    }

    /// Fetch one appointment; an absent id is always an explicit error.
    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Fetching appointment: {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(AppointmentError::NotFound);
        }

        let appointment: Appointment = serde_json::from_value(result[0].clone()).map_err(|e| {
            AppointmentError::DatabaseError(format!("Failed to parse appointment: {}", e))
        })?;

        Ok(appointment)
    }

    /// Mark an encounter as having taken place. Provider-of-the-appointment
    /// only; terminal states are rejected.
    pub async fn complete_appointment(
        &self,
        actor: &ActorContext,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Completing appointment: {}", appointment_id);

        if !actor.can(Capability::Complete) {
            return Err(AppointmentError::Unauthorized);
        }

        let current = self.get_appointment(appointment_id, auth_token).await?;

        if current.doctor_id != actor.actor_id {
            return Err(AppointmentError::Unauthorized);
        }

        let new_status = self
            .lifecycle_service
            .transition(&current.status, LifecycleAction::Complete)?;

        let updated = self.update_status(&current, new_status, auth_token).await?;

        info!("Appointment {} marked as completed", appointment_id);
        Ok(updated)
    }

    /// Cancel an appointment. The row is kept as a Cancelled tombstone so
    /// the encounter history stays auditable.
    pub async fn cancel_appointment(
        &self,
        actor: &ActorContext,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Cancelling appointment: {}", appointment_id);

        if !actor.can(Capability::Cancel) {
            return Err(AppointmentError::Unauthorized);
        }

        let current = self.get_appointment(appointment_id, auth_token).await?;

        if !current.involves(actor.actor_id) {
            return Err(AppointmentError::Unauthorized);
        }

        let new_status = self
            .lifecycle_service
            .transition(&current.status, LifecycleAction::Cancel)?;

        let updated = self.update_status(&current, new_status, auth_token).await?;

        info!("Appointment {} cancelled", appointment_id);
        Ok(updated)
    }

    /// Delete an appointment and its clinical records as one cascade:
    /// records are captured and removed first, then the appointment; if the
    /// appointment removal fails the captured records are re-inserted so no
    /// orphaned state remains.
    pub async fn delete_appointment(
        &self,
        actor: &ActorContext,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        debug!("Deleting appointment: {}", appointment_id);

        if !actor.can(Capability::Delete) {
            return Err(AppointmentError::Unauthorized);
        }

        let appointment = self.get_appointment(appointment_id, auth_token).await?;

        if !appointment.involves(actor.actor_id) {
            return Err(AppointmentError::Unauthorized);
        }

        let removed_records = self
            .prescription_service
            .purge_for_appointment(appointment_id, auth_token)
            .await
            .map_err(|e| AppointmentError::DeletionFailed(e.to_string()))?;

        if let Err(e) = self.delete_appointment_row(appointment_id, auth_token).await {
            if let Err(restore_err) = self
                .prescription_service
                .restore(&removed_records, auth_token)
                .await
            {
                error!(
                    "Rollback of {} prescriptions for appointment {} failed: {}",
                    removed_records.len(),
                    appointment_id,
                    restore_err
                );
            }
            return Err(AppointmentError::DeletionFailed(e.to_string()));
        }

        info!(
            "Appointment {} deleted with {} prescriptions",
            appointment_id,
            removed_records.len()
        );

        Ok(())
    }

    /// Appointments where the actor is the participant for its role,
    /// ordered by date ascending.
    pub async fn list_for_actor(
        &self,
        actor: &ActorContext,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let column = match actor.role {
            ActorRole::Patient => "patient_id",
            ActorRole::Provider => "doctor_id",
        };

        let path = format!(
            "/rest/v1/appointments?{}=eq.{}&order=appointment_date.asc",
            column, actor.actor_id
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let appointments: Vec<Appointment> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| {
                AppointmentError::DatabaseError(format!("Failed to parse appointments: {}", e))
            })?;

        Ok(appointments)
    }

    /// A provider's Scheduled appointments for one day (defaults to today).
    pub async fn provider_day_schedule(
        &self,
        actor: &ActorContext,
        doctor_id: Uuid,
        date: Option<NaiveDate>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        if !actor.is_provider() || actor.actor_id != doctor_id {
            return Err(AppointmentError::Unauthorized);
        }

        let date = date.unwrap_or_else(|| Utc::now().date_naive());

        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=eq.{}&status=eq.{}&order=created_at.asc",
            doctor_id,
            date.format("%Y-%m-%d"),
            AppointmentStatus::Scheduled,
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let appointments: Vec<Appointment> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| {
                AppointmentError::DatabaseError(format!("Failed to parse appointments: {}", e))
            })?;

        Ok(appointments)
    }

    fn validate_booking_request(
        &self,
        request: &BookAppointmentRequest,
    ) -> Result<(), AppointmentError> {
        if request.patient_id.is_nil() || request.doctor_id.is_nil() {
            return Err(AppointmentError::ValidationError(
                "Malformed participant identifier".to_string(),
            ));
        }

        if request.patient_id == request.doctor_id {
            return Err(AppointmentError::ValidationError(
                "Patient and provider must be distinct parties".to_string(),
            ));
        }

        let details = request.details.trim();
        if details.is_empty() {
            return Err(AppointmentError::ValidationError(
                "Appointment details must not be empty".to_string(),
            ));
        }
        if details.chars().count() > self.rules.max_details_length {
            return Err(AppointmentError::ValidationError(format!(
                "Appointment details cannot exceed {} characters",
                self.rules.max_details_length
            )));
        }

        Ok(())
    }

    async fn update_status(
        &self,
        current: &Appointment,
        new_status: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let update_data = json!({
            "status": new_status.to_string(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let path = format!("/rest/v1/appointments?id=eq.{}", current.id);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update_data),
                Some(headers),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(AppointmentError::DatabaseError(
                "Failed to update appointment".to_string(),
            ));
        }

        let updated: Appointment = serde_json::from_value(result[0].clone()).map_err(|e| {
            AppointmentError::DatabaseError(format!("Failed to parse updated appointment: {}", e))
        })?;

        Ok(updated)
    }

    async fn delete_appointment_row(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(Method::DELETE, &path, Some(auth_token), None, Some(headers))
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(AppointmentError::DatabaseError(
                "Appointment delete affected no rows".to_string(),
            ));
        }

        Ok(())
    }

    /// Expose the prescriptions of an appointment for the detail view.
    pub fn prescriptions(&self) -> &PrescriptionService {
        &self.prescription_service
    }
}
