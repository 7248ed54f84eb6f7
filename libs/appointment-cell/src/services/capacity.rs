// libs/appointment-cell/src/services/capacity.rs
//
// Per-provider-per-day admission control. The count check and the insert it
// gates form a single admission decision, serialised through a store-level
// scheduling lock so concurrent bookings cannot both pass the count.
//
use chrono::{DateTime, Duration, NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, AppointmentError, AppointmentStatus, BookAppointmentRequest};

/// Maximum Scheduled appointments a provider may hold on one calendar day.
pub const DAILY_APPOINTMENT_CAPACITY: usize = 10;

pub struct CapacityGuard {
    supabase: Arc<SupabaseClient>,
    lock_timeout_seconds: u64,
    max_retry_attempts: u32,
}

impl CapacityGuard {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self {
            supabase,
            lock_timeout_seconds: 30,
            max_retry_attempts: 3,
        }
    }

    /// Side-effect-free capacity probe for the exact (provider, date) pair.
    pub async fn can_admit(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<bool, AppointmentError> {
        let count = self.count_scheduled(doctor_id, date, auth_token).await?;
        Ok(count < DAILY_APPOINTMENT_CAPACITY)
    }

    /// Count Scheduled appointments for a provider on one day.
    pub async fn count_scheduled(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<usize, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=eq.{}&status=eq.{}&select=id",
            doctor_id,
            date.format("%Y-%m-%d"),
            AppointmentStatus::Scheduled,
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        debug!(
            "Provider {} holds {} scheduled appointments on {}",
            doctor_id,
            rows.len(),
            date
        );

        Ok(rows.len())
    }

    /// Admit a booking: count and insert under one admission lock, retrying
    /// on lock contention with backoff.
    pub async fn admit(
        &self,
        request: &BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let lock_key = self.admission_lock_key(request.doctor_id, request.appointment_date);

        for attempt in 1..=self.max_retry_attempts {
            debug!(
                "Admission attempt {} for provider {} on {}",
                attempt, request.doctor_id, request.appointment_date
            );

            match self.try_admit(&lock_key, request, auth_token).await? {
                Some(appointment) => {
                    info!(
                        "Admission successful for provider {} - appointment {}",
                        request.doctor_id, appointment.id
                    );
                    return Ok(appointment);
                }
                None if attempt < self.max_retry_attempts => {
                    warn!(
                        "Admission lock contention, retrying attempt {}/{}",
                        attempt, self.max_retry_attempts
                    );
                    tokio::time::sleep(tokio::time::Duration::from_millis(100 * attempt as u64))
                        .await;
                }
                None => {}
            }
        }

        Err(AppointmentError::DatabaseError(
            "Failed to admit booking after multiple attempts".to_string(),
        ))
    }

    /// One admission attempt under the lock. `None` means the lock was busy.
    async fn try_admit(
        &self,
        lock_key: &str,
        request: &BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Option<Appointment>, AppointmentError> {
        if !self.acquire_admission_lock(lock_key, request.doctor_id).await? {
            return Ok(None);
        }

        let count = match self
            .count_scheduled(request.doctor_id, request.appointment_date, auth_token)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                self.release_admission_lock(lock_key).await;
                return Err(e);
            }
        };

        if count >= DAILY_APPOINTMENT_CAPACITY {
            self.release_admission_lock(lock_key).await;
            info!(
                "Capacity reached for provider {} on {} ({} scheduled)",
                request.doctor_id, request.appointment_date, count
            );
            return Err(AppointmentError::CapacityExceeded);
        }

        let appointment = match self.insert_appointment(request, auth_token).await {
            Ok(appointment) => appointment,
            Err(e) => {
                self.release_admission_lock(lock_key).await;
                return Err(e);
            }
        };

        self.release_admission_lock(lock_key).await;

        Ok(Some(appointment))
    }

    async fn insert_appointment(
        &self,
        request: &BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let now = Utc::now();

        let appointment_data = json!({
            "patient_id": request.patient_id,
            "doctor_id": request.doctor_id,
            "appointment_date": request.appointment_date.format("%Y-%m-%d").to_string(),
            "details": request.details,
            "status": AppointmentStatus::Scheduled.to_string(),
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
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
                "/rest/v1/appointments",
                Some(auth_token),
                Some(appointment_data),
                Some(headers),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(AppointmentError::DatabaseError(
                "Failed to create appointment".to_string(),
            ));
        }

        let appointment: Appointment = serde_json::from_value(result[0].clone()).map_err(|e| {
            AppointmentError::DatabaseError(format!("Failed to parse created appointment: {}", e))
        })?;

        Ok(appointment)
    }

    /// Acquire the admission lock for a (provider, date) slot. The insert
    /// fails while a live lock row exists; expired rows are cleaned up and
    /// acquisition is attempted once more.
    async fn acquire_admission_lock(
        &self,
        lock_key: &str,
        doctor_id: Uuid,
    ) -> Result<bool, AppointmentError> {
        match self.try_insert_lock(lock_key, doctor_id).await {
            Ok(()) => {
                debug!("Admission lock acquired: {}", lock_key);
                Ok(true)
            }
            Err(_) => {
                // Lock already exists; usable again only if it expired
                if self.cleanup_expired_lock(lock_key).await? {
                    match self.try_insert_lock(lock_key, doctor_id).await {
                        Ok(()) => {
                            debug!("Admission lock acquired after cleanup: {}", lock_key);
                            Ok(true)
                        }
                        Err(_) => Ok(false),
                    }
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn try_insert_lock(&self, lock_key: &str, doctor_id: Uuid) -> anyhow::Result<()> {
        let lock_data = json!({
            "lock_key": lock_key,
            "doctor_id": doctor_id,
            "acquired_at": Utc::now().to_rfc3339(),
            "expires_at": (Utc::now() + Duration::seconds(self.lock_timeout_seconds as i64)).to_rfc3339(),
            "process_id": format!("scheduler_{}", Uuid::new_v4())
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let _: Value = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/scheduling_locks",
                None, // No auth needed for internal locking
                Some(lock_data),
                Some(headers),
            )
            .await?;

        Ok(())
    }

    /// Best-effort release; a leaked lock expires on its own.
    async fn release_admission_lock(&self, lock_key: &str) {
        let result: anyhow::Result<Value> = self
            .supabase
            .request(
                Method::DELETE,
                &format!("/rest/v1/scheduling_locks?lock_key=eq.{}", lock_key),
                None,
                None,
            )
            .await;

        match result {
            Ok(_) => debug!("Admission lock released: {}", lock_key),
            Err(e) => warn!("Admission lock release failed for {}: {}", lock_key, e),
        }
    }

    /// Remove the lock row if its expiry has passed. Returns true when a
    /// stale lock was cleaned up and acquisition may be retried.
    async fn cleanup_expired_lock(&self, lock_key: &str) -> Result<bool, AppointmentError> {
        let response: Value = self
            .supabase
            .request(
                Method::GET,
                &format!("/rest/v1/scheduling_locks?lock_key=eq.{}&select=*", lock_key),
                None,
                None,
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(format!("Lock check failed: {}", e)))?;

        if let Some(locks) = response.as_array() {
            if let Some(lock) = locks.first() {
                if let Some(expires_at_str) = lock.get("expires_at").and_then(|v| v.as_str()) {
                    if let Ok(expires_at) = DateTime::parse_from_rfc3339(expires_at_str) {
                        if expires_at.with_timezone(&Utc) < Utc::now() {
                            self.release_admission_lock(lock_key).await;
                            return Ok(true);
                        }
                    }
                }
            }
        }

        Ok(false)
    }

    fn admission_lock_key(&self, doctor_id: Uuid, date: NaiveDate) -> String {
        format!("cap_{}_{}", doctor_id, date.format("%Y-%m-%d"))
    }
}
