// libs/appointment-cell/src/services/conflict.rs
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentError, ConflictCheckResponse, OrganizationScope, TimeInterval,
};
use crate::services::store::AppointmentStore;

/// Reports which existing bookings block a candidate interval. It never
/// decides policy; callers choose whether a non-empty result rejects or warns.
pub struct ConflictDetectionService {
    store: Arc<dyn AppointmentStore>,
}

impl ConflictDetectionService {
    pub fn new(store: Arc<dyn AppointmentStore>) -> Self {
        Self { store }
    }

    /// Every non-cancelled appointment of `scope` overlapping `candidate`,
    /// minus `exclude_appointment_id`. No ordering is guaranteed. The only
    /// error is a failure to read the store.
    pub async fn find_conflicts(
        &self,
        scope: &OrganizationScope,
        candidate: &TimeInterval,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        debug!("Checking conflicts for organization {} from {} to {}",
               scope, candidate.begin_at(), candidate.end_at());

        let existing = self.store
            .find_overlapping(scope, candidate.begin_at(), candidate.end_at())
            .await?;

        // Adapters may over-fetch; the half-open test is authoritative.
        let conflicts: Vec<Appointment> = existing
            .into_iter()
            .filter(|apt| apt.belongs_to(scope))
            .filter(|apt| apt.status.blocks_time())
            .filter(|apt| Some(apt.id) != exclude_appointment_id)
            .filter(|apt| candidate.overlaps_range(apt.begin_at, apt.end_at))
            .collect();

        if !conflicts.is_empty() {
            warn!("Conflict detected for organization {} - {} conflicting appointments",
                  scope, conflicts.len());
        }

        Ok(conflicts)
    }

    /// `find_conflicts` shaped for display, ordered by `begin_at`.
    pub async fn check_conflicts(
        &self,
        scope: &OrganizationScope,
        candidate: &TimeInterval,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<ConflictCheckResponse, AppointmentError> {
        let mut conflicting_appointments = self
            .find_conflicts(scope, candidate, exclude_appointment_id)
            .await?;
        conflicting_appointments.sort_by_key(|apt| apt.begin_at);

        Ok(ConflictCheckResponse {
            has_conflict: !conflicting_appointments.is_empty(),
            conflicting_appointments,
        })
    }
}
