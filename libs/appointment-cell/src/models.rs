// libs/appointment-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate, Duration};
use std::fmt;

// ==============================================================================
// TENANT SCOPE
// ==============================================================================

/// The organization every read and write is partitioned by. Store methods
/// take it as a required argument so an unscoped query cannot be expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationScope(Uuid);

impl OrganizationScope {
    pub fn new(organization_id: Uuid) -> Self {
        Self(organization_id)
    }

    pub fn id(&self) -> Uuid {
        self.0
    }

    pub fn parse(raw: &str) -> Result<Self, AppointmentError> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| AppointmentError::ValidationError(format!("invalid organization id: {}", raw)))
    }
}

impl fmt::Display for OrganizationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub patient_id: Uuid,
    pub begin_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub at_home: bool,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn duration(&self) -> Duration {
        self.end_at - self.begin_at
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration().num_minutes()
    }

    pub fn belongs_to(&self, scope: &OrganizationScope) -> bool {
        self.organization_id == scope.id()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    #[default]
    Created,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Created => "CREATED",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated half-open `[begin_at, end_at)` range with second precision.
/// Construct through `TimeInterval::new` or `TimeInterval::from_duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeInterval {
    pub(crate) begin_at: DateTime<Utc>,
    pub(crate) end_at: DateTime<Utc>,
}

/// Row shape handed to `AppointmentStore::insert`; the store assigns the id
/// and audit timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub interval: TimeInterval,
    pub status: AppointmentStatus,
    pub at_home: bool,
    pub note: Option<String>,
}

/// Partial update applied by the store. `None` leaves a column untouched;
/// `note: Some(None)` clears the note.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppointmentChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub begin_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_home: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AppointmentStatus>,
}

impl AppointmentChanges {
    pub fn is_empty(&self) -> bool {
        self.patient_id.is_none()
            && self.begin_at.is_none()
            && self.end_at.is_none()
            && self.at_home.is_none()
            && self.note.is_none()
            && self.status.is_none()
    }

    pub fn touches_timing(&self) -> bool {
        self.begin_at.is_some() || self.end_at.is_some()
    }

    pub fn apply_to(&self, appointment: &mut Appointment) {
        if let Some(patient_id) = self.patient_id {
            appointment.patient_id = patient_id;
        }
        if let Some(begin_at) = self.begin_at {
            appointment.begin_at = begin_at;
        }
        if let Some(end_at) = self.end_at {
            appointment.end_at = end_at;
        }
        if let Some(at_home) = self.at_home {
            appointment.at_home = at_home;
        }
        if let Some(note) = &self.note {
            appointment.note = note.clone();
        }
        if let Some(status) = self.status {
            appointment.status = status;
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub begin_at: DateTime<Utc>,
    /// Either `duration_minutes` or `end_at` must be supplied, not both.
    pub duration_minutes: Option<i64>,
    pub end_at: Option<DateTime<Utc>>,
    pub at_home: Option<bool>,
    pub note: Option<String>,
    pub notify_owner: Option<bool>,
    /// Reject the booking if it overlaps an existing one.
    pub strict: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub patient_id: Option<Uuid>,
    pub begin_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    /// Recomputes `end_at` from the (possibly new) `begin_at`.
    pub duration_minutes: Option<i64>,
    pub at_home: Option<bool>,
    /// An empty string clears the note.
    pub note: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub strict: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    pub conflicting_appointments: Vec<Appointment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRangeQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WithoutReportQuery {
    pub days_back: Option<i64>,
}

/// One local calendar day of a range fetch, for calendar rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub appointments: Vec<Appointment>,
}

// ==============================================================================
// COLLABORATOR MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientOwner {
    pub name: String,
    pub email: Option<String>,
}

/// Patient as resolved by the patient collaborator, joined with its owning
/// client and organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientWithOwner {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub animal_type: Option<String>,
    pub owner: PatientOwner,
    pub organization_name: String,
}

impl PatientWithOwner {
    pub fn display_label(&self) -> String {
        match &self.animal_type {
            Some(kind) if !kind.is_empty() => format!("{} ({})", self.name, kind),
            _ => self.name.clone(),
        }
    }

    pub fn owner_email(&self) -> Option<&str> {
        self.owner.email.as_deref().filter(|email| !email.trim().is_empty())
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error, PartialEq)]
pub enum AppointmentError {
    #[error("Appointment must end after it begins")]
    InvalidInterval,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Appointment not found")]
    NotFoundOrUnauthorized,

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointment cannot be modified in status {0}")]
    AppointmentLocked(AppointmentStatus),

    #[error("Appointment conflicts with {} existing booking(s)", conflicting_ids.len())]
    ConflictDetected { conflicting_ids: Vec<Uuid> },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),
}
