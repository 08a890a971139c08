// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, info, warn};

use crate::models::{AppointmentError, AppointmentStatus};

/// Owns the appointment status graph. Every status change made by the
/// scheduling service is checked here.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidStatusTransition {
                from: current_status,
                to: new_status,
            });
        }

        info!("Status transition validated: {} -> {}", current_status, new_status);
        Ok(())
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Scheduled => vec![
                AppointmentStatus::CheckedIn,
                AppointmentStatus::InProgress,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::CheckedIn => vec![
                AppointmentStatus::InProgress,
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::InProgress => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
            ],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed => vec![],
            AppointmentStatus::Cancelled => vec![],
            AppointmentStatus::NoShow => vec![],
        }
    }

    /// Whether entering `status` gives the appointment's slot back.
    pub fn releases_slot(&self, status: AppointmentStatus) -> bool {
        status == AppointmentStatus::Cancelled
    }

    /// Whether an appointment in `status` may still be moved to another slot.
    pub fn can_reschedule(&self, status: AppointmentStatus) -> bool {
        matches!(status, AppointmentStatus::Scheduled | AppointmentStatus::CheckedIn)
    }

    /// Statuses that still expect the patient to show up.
    pub fn awaiting_visit(&self, status: AppointmentStatus) -> bool {
        matches!(status, AppointmentStatus::Scheduled | AppointmentStatus::CheckedIn)
    }
}
