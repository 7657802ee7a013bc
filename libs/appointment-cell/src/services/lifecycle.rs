// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{
    Appointment, AppointmentChanges, AppointmentError, AppointmentStatus, TimeInterval,
    UpdateAppointmentRequest,
};
use crate::services::interval::truncate_to_seconds;

impl AppointmentStatus {
    /// Statuses reachable in one step from `self`.
    pub fn valid_transitions(&self) -> &'static [AppointmentStatus] {
        match self {
            AppointmentStatus::Created => &[AppointmentStatus::Confirmed, AppointmentStatus::Cancelled],
            AppointmentStatus::Confirmed => &[AppointmentStatus::Completed, AppointmentStatus::Cancelled],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed | AppointmentStatus::Cancelled => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Whether an appointment in this status occupies its time slot.
    pub fn blocks_time(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }

    /// Apply one edge of the status graph. Re-asserting the current status is
    /// accepted as a no-op.
    pub fn transition(self, to: AppointmentStatus) -> Result<AppointmentStatus, AppointmentError> {
        if self == to || self.valid_transitions().contains(&to) {
            Ok(to)
        } else {
            Err(AppointmentError::InvalidStatusTransition { from: self, to })
        }
    }
}

/// Mutation rules for existing appointments: status graph, terminal-state
/// locking and field merging.
pub struct AppointmentLifecycleService;

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<AppointmentStatus, AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        current_status.transition(new_status).map_err(|e| {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            e
        })
    }

    /// Merge an update request over `current`, returning only the columns that
    /// actually change. Fails if the merged interval is empty or inverted, if
    /// the status edge is not in the graph, or if `current` is terminal.
    pub fn merge_changes(
        &self,
        current: &Appointment,
        request: &UpdateAppointmentRequest,
    ) -> Result<AppointmentChanges, AppointmentError> {
        if current.status.is_terminal() {
            warn!("Rejecting update of appointment {} in terminal status {}", current.id, current.status);
            return Err(AppointmentError::AppointmentLocked(current.status));
        }

        if request.end_at.is_some() && request.duration_minutes.is_some() {
            return Err(AppointmentError::ValidationError(
                "supply either end_at or duration_minutes, not both".to_string(),
            ));
        }

        let mut changes = AppointmentChanges::default();

        // Stored rows may carry sub-second precision from other writers, so
        // timing is only rebuilt when the request names a timing field.
        let touches_timing = request.begin_at.is_some()
            || request.end_at.is_some()
            || request.duration_minutes.is_some();

        if touches_timing {
            let begin_at = request.begin_at.unwrap_or(current.begin_at);
            let interval = match (request.duration_minutes, request.end_at) {
                (Some(minutes), _) => TimeInterval::from_duration(begin_at, minutes)?,
                (None, Some(end_at)) => TimeInterval::new(begin_at, end_at)?,
                (None, None) => TimeInterval::new(begin_at, current.end_at)?,
            };

            if interval.begin_at() != truncate_to_seconds(current.begin_at) {
                changes.begin_at = Some(interval.begin_at());
            }
            if interval.end_at() != truncate_to_seconds(current.end_at) {
                changes.end_at = Some(interval.end_at());
            }
        }

        if let Some(patient_id) = request.patient_id.filter(|id| *id != current.patient_id) {
            changes.patient_id = Some(patient_id);
        }

        if let Some(at_home) = request.at_home.filter(|flag| *flag != current.at_home) {
            changes.at_home = Some(at_home);
        }

        if let Some(note) = &request.note {
            let note = normalize_note(Some(note.clone()));
            if note != current.note {
                changes.note = Some(note);
            }
        }

        if let Some(new_status) = request.status {
            let status = self.validate_status_transition(current.status, new_status)?;
            if status != current.status {
                changes.status = Some(status);
            }
        }

        Ok(changes)
    }
}

/// Blank notes are stored as absent.
pub fn normalize_note(note: Option<String>) -> Option<String> {
    note.map(|text| text.trim().to_string()).filter(|text| !text.is_empty())
}
