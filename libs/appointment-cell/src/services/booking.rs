// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, CalendarDay, ConflictCheckResponse,
    CreateAppointmentRequest, NewAppointment, OrganizationScope, PatientWithOwner, TimeInterval,
    UpdateAppointmentRequest,
};
use crate::services::calendar::group_by_calendar_day;
use crate::services::collaborators::{
    PatientResolver, ReportResolver, SupabasePatientResolver, SupabaseReportResolver,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::interval::{day_bounds, scheduling_offset};
use crate::services::lifecycle::{normalize_note, AppointmentLifecycleService};
use crate::services::locks::OrganizationLocks;
use crate::services::notification::{AppointmentNotification, NotificationOutbox};
use crate::services::store::{AppointmentStore, SupabaseAppointmentStore};

pub const DEFAULT_REPORT_LOOKBACK_DAYS: i64 = 30;

impl CreateAppointmentRequest {
    /// The requested slot. Exactly one of `end_at` or `duration_minutes`
    /// must be present.
    pub fn interval(&self) -> Result<TimeInterval, AppointmentError> {
        match (self.duration_minutes, self.end_at) {
            (Some(_), Some(_)) => Err(AppointmentError::ValidationError(
                "supply either end_at or duration_minutes, not both".to_string(),
            )),
            (Some(minutes), None) => TimeInterval::from_duration(self.begin_at, minutes),
            (None, Some(end_at)) => TimeInterval::new(self.begin_at, end_at),
            (None, None) => Err(AppointmentError::ValidationError(
                "end_at or duration_minutes is required".to_string(),
            )),
        }
    }
}

/// Create, update, delete and list appointments for one organization at a
/// time. Conflict detection is advisory in `create`/`update` and enforced in
/// the `_strict` variants.
pub struct AppointmentBookingService {
    store: Arc<dyn AppointmentStore>,
    conflict_service: ConflictDetectionService,
    lifecycle_service: AppointmentLifecycleService,
    patients: Arc<dyn PatientResolver>,
    reports: Arc<dyn ReportResolver>,
    outbox: Option<NotificationOutbox>,
    locks: OrganizationLocks,
    schedule_offset: FixedOffset,
}

impl AppointmentBookingService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        patients: Arc<dyn PatientResolver>,
        reports: Arc<dyn ReportResolver>,
    ) -> Self {
        Self {
            conflict_service: ConflictDetectionService::new(Arc::clone(&store)),
            lifecycle_service: AppointmentLifecycleService::new(),
            store,
            patients,
            reports,
            outbox: None,
            locks: OrganizationLocks::new(),
            schedule_offset: scheduling_offset(0),
        }
    }

    /// PostgREST-backed service for the configured Supabase project.
    pub fn from_config(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));

        Self::new(
            Arc::new(SupabaseAppointmentStore::new(Arc::clone(&supabase))),
            Arc::new(SupabasePatientResolver::new(Arc::clone(&supabase))),
            Arc::new(SupabaseReportResolver::new(supabase)),
        )
        .with_utc_offset_minutes(config.scheduling_utc_offset_minutes)
    }

    pub fn with_outbox(mut self, outbox: NotificationOutbox) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.schedule_offset = scheduling_offset(minutes);
        self
    }

    pub fn schedule_offset(&self) -> FixedOffset {
        self.schedule_offset
    }

    // ==============================================================================
    // MUTATIONS
    // ==============================================================================

    /// Book an appointment without rejecting overlaps.
    pub async fn create(
        &self,
        scope: &OrganizationScope,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        self.book(scope, request, false).await
    }

    /// Book an appointment, failing with `ConflictDetected` if the slot
    /// overlaps a non-cancelled appointment of the same organization.
    pub async fn create_strict(
        &self,
        scope: &OrganizationScope,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        self.book(scope, request, true).await
    }

    #[instrument(skip(self, scope, request), fields(organization_id = %scope, patient_id = %request.patient_id))]
    async fn book(
        &self,
        scope: &OrganizationScope,
        request: CreateAppointmentRequest,
        strict: bool,
    ) -> Result<Appointment, AppointmentError> {
        info!("Booking appointment (strict: {})", strict);

        let interval = request.interval()?;
        let patient = self.resolve_patient(scope, request.patient_id).await?;

        let _guard = if strict {
            let guard = self.locks.acquire(scope).await;
            self.reject_conflicts(scope, &interval, None).await?;
            Some(guard)
        } else {
            None
        };

        let appointment = self.store.insert(scope, NewAppointment {
            patient_id: patient.id,
            interval,
            status: AppointmentStatus::Created,
            at_home: request.at_home.unwrap_or(false),
            note: normalize_note(request.note),
        }).await?;

        info!("Appointment {} booked for patient {}", appointment.id, patient.id);

        if request.notify_owner.unwrap_or(false) {
            self.queue_owner_notification(&appointment, &patient);
        }

        Ok(appointment)
    }

    /// Apply a partial update. Status changes follow the lifecycle graph;
    /// overlaps are not rejected.
    pub async fn update(
        &self,
        scope: &OrganizationScope,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        self.apply_update(scope, appointment_id, request, false).await
    }

    /// As `update`, but a timing change that would overlap another
    /// non-cancelled appointment fails with `ConflictDetected`.
    pub async fn update_strict(
        &self,
        scope: &OrganizationScope,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        self.apply_update(scope, appointment_id, request, true).await
    }

    /// Move an appointment along the status graph.
    pub async fn transition_status(
        &self,
        scope: &OrganizationScope,
        appointment_id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Appointment, AppointmentError> {
        self.apply_update(scope, appointment_id, UpdateAppointmentRequest {
            status: Some(status),
            ..Default::default()
        }, false).await
    }

    #[instrument(skip(self, scope, request), fields(organization_id = %scope))]
    async fn apply_update(
        &self,
        scope: &OrganizationScope,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
        strict: bool,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Updating appointment {} (strict: {})", appointment_id, strict);

        let _guard = if strict {
            Some(self.locks.acquire(scope).await)
        } else {
            None
        };

        let current = self.get(scope, appointment_id).await?;
        let changes = self.lifecycle_service.merge_changes(&current, &request)?;

        if changes.is_empty() {
            debug!("Appointment {} unchanged", appointment_id);
            return Ok(current);
        }

        if let Some(patient_id) = changes.patient_id {
            self.resolve_patient(scope, patient_id).await?;
        }

        let resulting_status = changes.status.unwrap_or(current.status);
        if strict && changes.touches_timing() && resulting_status.blocks_time() {
            let interval = TimeInterval::new(
                changes.begin_at.unwrap_or(current.begin_at),
                changes.end_at.unwrap_or(current.end_at),
            )?;
            self.reject_conflicts(scope, &interval, Some(appointment_id)).await?;
        }

        let updated = self.store.update(scope, appointment_id, changes).await?;

        if updated.status != current.status {
            info!("Appointment {} moved from {} to {}", appointment_id, current.status, updated.status);
        } else {
            info!("Appointment {} updated", appointment_id);
        }

        Ok(updated)
    }

    /// Hard delete, allowed in every status.
    #[instrument(skip(self, scope), fields(organization_id = %scope))]
    pub async fn delete(
        &self,
        scope: &OrganizationScope,
        appointment_id: Uuid,
    ) -> Result<Appointment, AppointmentError> {
        let deleted = self.store.delete(scope, appointment_id).await?;
        info!("Appointment {} deleted (was {})", appointment_id, deleted.status);
        Ok(deleted)
    }

    // ==============================================================================
    // QUERIES
    // ==============================================================================

    pub async fn get(
        &self,
        scope: &OrganizationScope,
        appointment_id: Uuid,
    ) -> Result<Appointment, AppointmentError> {
        self.store
            .get(scope, appointment_id)
            .await?
            .ok_or(AppointmentError::NotFoundOrUnauthorized)
    }

    pub async fn find_conflicts(
        &self,
        scope: &OrganizationScope,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let candidate = TimeInterval::new(start, end)?;
        self.conflict_service.find_conflicts(scope, &candidate, exclude_appointment_id).await
    }

    pub async fn check_conflicts(
        &self,
        scope: &OrganizationScope,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<ConflictCheckResponse, AppointmentError> {
        let candidate = TimeInterval::new(start, end)?;
        self.conflict_service.check_conflicts(scope, &candidate, exclude_appointment_id).await
    }

    /// Appointments beginning today in the scheduling zone, ascending.
    pub async fn list_today(&self, scope: &OrganizationScope) -> Result<Vec<Appointment>, AppointmentError> {
        self.list_for_day(scope, Utc::now()).await
    }

    /// Appointments beginning on the local day containing `instant`, ascending.
    pub async fn list_for_day(
        &self,
        scope: &OrganizationScope,
        instant: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let day = day_bounds(instant, self.schedule_offset);
        debug!("Listing appointments for organization {} from {} to {}", scope, day.begin_at(), day.end_at());

        let mut appointments = self.store
            .find_by_date_range(scope, day.begin_at(), day.end_at())
            .await?;
        appointments.sort_by_key(|apt| apt.begin_at);
        Ok(appointments)
    }

    /// Appointments beginning in `[start, end)`, ascending.
    pub async fn list_in_range(
        &self,
        scope: &OrganizationScope,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let range = TimeInterval::new(start, end)?;

        let mut appointments = self.store
            .find_by_date_range(scope, range.begin_at(), range.end_at())
            .await?;
        appointments.sort_by_key(|apt| apt.begin_at);
        Ok(appointments)
    }

    pub async fn list_calendar(
        &self,
        scope: &OrganizationScope,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarDay>, AppointmentError> {
        let appointments = self.list_in_range(scope, start, end).await?;
        Ok(group_by_calendar_day(appointments, self.schedule_offset))
    }

    /// A patient's appointments, most recent first.
    pub async fn list_by_patient(
        &self,
        scope: &OrganizationScope,
        patient_id: Uuid,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut appointments = self.store.find_by_patient(scope, patient_id).await?;
        appointments.sort_by(|a, b| b.begin_at.cmp(&a.begin_at));
        Ok(appointments)
    }

    /// Completed appointments from the last `days_back` days (30 when
    /// omitted) that have no report yet, most recent first.
    pub async fn list_completed_without_report(
        &self,
        scope: &OrganizationScope,
        days_back: Option<i64>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.list_completed_without_report_at(scope, days_back, Utc::now()).await
    }

    pub async fn list_completed_without_report_at(
        &self,
        scope: &OrganizationScope,
        days_back: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let days_back = days_back.unwrap_or(DEFAULT_REPORT_LOOKBACK_DAYS);
        if days_back < 0 {
            return Err(AppointmentError::ValidationError("days_back must not be negative".to_string()));
        }

        let since = Duration::try_days(days_back)
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| AppointmentError::ValidationError(format!("days_back out of range: {}", days_back)))?;

        let completed = self.store
            .find_by_status_since(scope, AppointmentStatus::Completed, since)
            .await?;

        let ids: Vec<Uuid> = completed.iter().map(|apt| apt.id).collect();
        let reported = self.reports.appointments_with_reports(&ids).await?;

        let mut pending: Vec<Appointment> = completed
            .into_iter()
            .filter(|apt| !reported.contains(&apt.id))
            .collect();
        pending.sort_by(|a, b| b.begin_at.cmp(&a.begin_at));

        debug!("{} completed appointments without report since {}", pending.len(), since);
        Ok(pending)
    }

    // ==============================================================================
    // HELPER METHODS
    // ==============================================================================

    /// Patients of other organizations are reported as missing.
    async fn resolve_patient(
        &self,
        scope: &OrganizationScope,
        patient_id: Uuid,
    ) -> Result<PatientWithOwner, AppointmentError> {
        match self.patients.get_patient_with_owner(patient_id).await? {
            Some(patient) if patient.organization_id == scope.id() => Ok(patient),
            Some(_) => {
                warn!("Patient {} does not belong to organization {}", patient_id, scope);
                Err(AppointmentError::PatientNotFound)
            }
            None => Err(AppointmentError::PatientNotFound),
        }
    }

    async fn reject_conflicts(
        &self,
        scope: &OrganizationScope,
        interval: &TimeInterval,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<(), AppointmentError> {
        let conflicts = self.conflict_service
            .find_conflicts(scope, interval, exclude_appointment_id)
            .await?;

        if conflicts.is_empty() {
            return Ok(());
        }

        Err(AppointmentError::ConflictDetected {
            conflicting_ids: conflicts.into_iter().map(|apt| apt.id).collect(),
        })
    }

    /// Best effort: never fails the booking that triggered it.
    fn queue_owner_notification(&self, appointment: &Appointment, patient: &PatientWithOwner) {
        let Some(outbox) = &self.outbox else {
            debug!("No notification outbox configured, skipping owner notification");
            return;
        };

        let Some(notification) = AppointmentNotification::for_appointment(appointment, patient, self.schedule_offset) else {
            info!("Owner of patient {} has no contact email, skipping notification", patient.id);
            return;
        };

        if let Err(e) = outbox.publish(notification) {
            error!("Failed to queue notification for appointment {}: {}", appointment.id, e);
        }
    }
}
