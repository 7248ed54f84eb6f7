// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{AppointmentError, AppointmentStatus, LifecycleAction};

pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Pure transition function over the closed status set. Terminal states
    /// admit no action.
    pub fn transition(
        &self,
        current_status: &AppointmentStatus,
        action: LifecycleAction,
    ) -> Result<AppointmentStatus, AppointmentError> {
        debug!("Applying {:?} to appointment in {:?}", action, current_status);

        match (current_status, action) {
            (AppointmentStatus::Scheduled, LifecycleAction::Complete) => {
                Ok(AppointmentStatus::Completed)
            }
            (AppointmentStatus::Scheduled, LifecycleAction::Cancel) => {
                Ok(AppointmentStatus::Cancelled)
            }
            _ => {
                warn!(
                    "Invalid lifecycle action attempted: {:?} on {:?}",
                    action, current_status
                );
                Err(AppointmentError::InvalidStatusTransition(
                    current_status.clone(),
                ))
            }
        }
    }

    /// Validate that a status transition is allowed.
    pub fn validate_status_transition(
        &self,
        current_status: &AppointmentStatus,
        new_status: &AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        let valid_transitions = self.get_valid_transitions(current_status);

        if !valid_transitions.contains(new_status) {
            warn!(
                "Invalid status transition attempted: {:?} -> {:?}",
                current_status, new_status
            );
            return Err(AppointmentError::InvalidStatusTransition(
                current_status.clone(),
            ));
        }

        Ok(())
    }

    /// All valid next statuses for a given current status.
    pub fn get_valid_transitions(
        &self,
        current_status: &AppointmentStatus,
    ) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Scheduled => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
            ],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed => vec![],
            AppointmentStatus::Cancelled => vec![],
        }
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}
