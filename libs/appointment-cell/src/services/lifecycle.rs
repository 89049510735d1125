// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use shared_models::auth::Actor;

use crate::models::{Appointment, AppointmentError, AppointmentStatus};

/// The appointment state machine and who may drive each edge.
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
            return Err(AppointmentError::InvalidTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Pending => vec![AppointmentStatus::Confirmed, AppointmentStatus::Cancelled],
            AppointmentStatus::Confirmed => vec![AppointmentStatus::InProgress, AppointmentStatus::Cancelled],
            AppointmentStatus::InProgress => vec![AppointmentStatus::Completed, AppointmentStatus::Cancelled],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed | AppointmentStatus::Cancelled => vec![],
        }
    }

    /// Role check for one edge. Call after `validate_status_transition`.
    pub fn authorize_transition(
        &self,
        actor: &Actor,
        appointment: &Appointment,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        let allowed = match (appointment.status, new_status) {
            (_, AppointmentStatus::Confirmed) => {
                appointment.is_assigned_consultant(actor) || actor.is_privileged()
            }
            (AppointmentStatus::InProgress, AppointmentStatus::Cancelled) => actor.is_privileged(),
            (_, AppointmentStatus::Cancelled) => appointment.can_be_accessed_by(actor),
            (_, AppointmentStatus::InProgress) => {
                appointment.is_customer(actor) || appointment.is_assigned_consultant(actor)
            }
            (_, AppointmentStatus::Completed) => appointment.is_assigned_consultant(actor),
            (_, AppointmentStatus::Pending) => false,
        };

        if allowed {
            Ok(())
        } else {
            warn!(
                "User {} ({}) may not move appointment {} to {}",
                actor.user_id, actor.role, appointment.id, new_status
            );
            Err(AppointmentError::PermissionDenied(format!(
                "{} cannot mark this appointment as {}",
                actor.role, new_status
            )))
        }
    }

    pub fn can_access(&self, actor: &Actor, appointment: &Appointment) -> Result<(), AppointmentError> {
        if appointment.can_be_accessed_by(actor) {
            Ok(())
        } else {
            Err(AppointmentError::PermissionDenied(
                "You do not have access to this appointment".to_string(),
            ))
        }
    }
}
