use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::{ActorContext, Capability};

use crate::models::{AttachPrescriptionRequest, Prescription, PrescriptionError};

const MAX_DETAILS_LENGTH: usize = 200;

pub struct PrescriptionService {
    supabase: SupabaseClient,
}

impl PrescriptionService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Attach a prescription to an existing appointment. The patient and
    /// provider ids are derived from the appointment row; the acting
    /// provider must be the appointment's provider.
    pub async fn attach(
        &self,
        actor: &ActorContext,
        appointment_id: Uuid,
        request: AttachPrescriptionRequest,
        auth_token: &str,
    ) -> Result<Prescription, PrescriptionError> {
        debug!(
            "Attaching prescription to appointment {} by {}",
            appointment_id, actor.actor_id
        );

        if !actor.can(Capability::Prescribe) {
            return Err(PrescriptionError::Unauthorized);
        }

        let details = request.details.trim();
        if details.is_empty() {
            return Err(PrescriptionError::ValidationError(
                "Prescription details must not be empty".to_string(),
            ));
        }
        if details.chars().count() > MAX_DETAILS_LENGTH {
            return Err(PrescriptionError::ValidationError(format!(
                "Prescription details cannot exceed {} characters",
                MAX_DETAILS_LENGTH
            )));
        }

        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;

        let patient_id = parse_id_field(&appointment, "patient_id")?;
        let doctor_id = parse_id_field(&appointment, "doctor_id")?;

        if doctor_id != actor.actor_id {
            return Err(PrescriptionError::Unauthorized);
        }

        let prescription_data = json!({
            "appointment_id": appointment_id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "details": details,
            "created_at": chrono::Utc::now().to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/prescriptions",
                Some(auth_token),
                Some(prescription_data),
                Some(headers),
            )
            .await
            .map_err(|e| PrescriptionError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(PrescriptionError::DatabaseError(
                "Failed to create prescription".to_string(),
            ));
        }

        let prescription: Prescription =
            serde_json::from_value(result[0].clone()).map_err(|e| {
                PrescriptionError::DatabaseError(format!(
                    "Failed to parse created prescription: {}",
                    e
                ))
            })?;

        info!(
            "Prescription {} attached to appointment {}",
            prescription.id, appointment_id
        );

        Ok(prescription)
    }

    /// All prescriptions for an appointment, in creation order.
    pub async fn list_for_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Prescription>, PrescriptionError> {
        let path = format!(
            "/rest/v1/prescriptions?appointment_id=eq.{}&order=created_at.asc",
            appointment_id
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| PrescriptionError::DatabaseError(e.to_string()))?;

        let prescriptions: Vec<Prescription> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Prescription>, _>>()
            .map_err(|e| {
                PrescriptionError::DatabaseError(format!("Failed to parse prescriptions: {}", e))
            })?;

        Ok(prescriptions)
    }

    /// Capture and remove every prescription referencing an appointment.
    /// Returns the removed rows so a failed cascade can compensate.
    pub async fn purge_for_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Prescription>, PrescriptionError> {
        let records = self
            .list_for_appointment(appointment_id, auth_token)
            .await?;

        if records.is_empty() {
            return Ok(records);
        }

        let path = format!("/rest/v1/prescriptions?appointment_id=eq.{}", appointment_id);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(Method::DELETE, &path, Some(auth_token), None, Some(headers))
            .await
            .map_err(|e| PrescriptionError::DatabaseError(e.to_string()))?;

        info!(
            "Removed {} prescriptions for appointment {}",
            records.len(),
            appointment_id
        );

        Ok(records)
    }

    /// Re-insert previously captured records, ids included. Compensation
    /// path for a cascade that failed after the purge.
    pub async fn restore(
        &self,
        records: &[Prescription],
        auth_token: &str,
    ) -> Result<(), PrescriptionError> {
        if records.is_empty() {
            return Ok(());
        }

        let rows = serde_json::to_value(records).map_err(|e| {
            PrescriptionError::DatabaseError(format!("Failed to serialise prescriptions: {}", e))
        })?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/prescriptions",
                Some(auth_token),
                Some(rows),
                Some(headers),
            )
            .await
            .map_err(|e| {
                error!("Prescription restore failed: {}", e);
                PrescriptionError::DatabaseError(e.to_string())
            })?;

        info!("Restored {} prescriptions after failed cascade", records.len());

        Ok(())
    }

    async fn fetch_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Value, PrescriptionError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| PrescriptionError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(PrescriptionError::AppointmentNotFound);
        }

        Ok(result[0].clone())
    }
}

fn parse_id_field(row: &Value, field: &str) -> Result<Uuid, PrescriptionError> {
    row.get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| {
            PrescriptionError::DatabaseError(format!("Appointment row missing {}", field))
        })
}
