// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use shared_config::ConflictPolicy;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    Appointment, AppointmentError, ConflictCheckQuery, CreateAppointmentRequest, DateRangeQuery,
    OrganizationScope, UpdateAppointmentRequest, WithoutReportQuery,
};
use crate::services::booking::AppointmentBookingService;

/// Router state shared by every appointment handler.
#[derive(Clone)]
pub struct AppointmentState {
    pub service: Arc<AppointmentBookingService>,
    pub policy: ConflictPolicy,
}

impl AppointmentState {
    pub fn new(service: Arc<AppointmentBookingService>, policy: ConflictPolicy) -> Self {
        Self { service, policy }
    }

    /// A per-request `strict` flag overrides the configured policy.
    fn is_strict(&self, requested: Option<bool>) -> bool {
        requested.unwrap_or(self.policy == ConflictPolicy::Strict)
    }
}

impl From<AppointmentError> for AppError {
    fn from(error: AppointmentError) -> Self {
        let message = error.to_string();
        match error {
            AppointmentError::InvalidInterval
            | AppointmentError::InvalidStatusTransition { .. }
            | AppointmentError::AppointmentLocked(_) => AppError::BadRequest(message),
            AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
            AppointmentError::PatientNotFound
            | AppointmentError::NotFoundOrUnauthorized => AppError::NotFound(message),
            AppointmentError::ConflictDetected { conflicting_ids } => AppError::Conflict {
                message,
                details: Some(json!({ "conflicting_appointment_ids": conflicting_ids })),
            },
            AppointmentError::DatabaseError(msg) => AppError::Database(msg),
            AppointmentError::ExternalServiceError(msg) => AppError::ExternalService(msg),
        }
    }
}

/// The caller's organization, taken from the verified token.
fn organization_scope(user: &User) -> Result<OrganizationScope, AppError> {
    let raw = user.organization_id.as_deref().ok_or_else(|| {
        warn!("User {} has no organization in token", user.id);
        AppError::Auth("Token carries no organization".to_string())
    })?;

    OrganizationScope::parse(raw)
        .map_err(|_| AppError::Auth("Token carries an invalid organization".to_string()))
}

fn appointment_list(appointments: Vec<Appointment>) -> Json<Value> {
    let count = appointments.len();
    Json(json!({
        "appointments": appointments,
        "count": count,
    }))
}

// ==============================================================================
// MUTATION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let scope = organization_scope(&user)?;

    let appointment = if state.is_strict(request.strict) {
        state.service.create_strict(&scope, request).await?
    } else {
        state.service.create(&scope, request).await?
    };

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked successfully"
    }))))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let scope = organization_scope(&user)?;

    let appointment = if state.is_strict(request.strict) {
        state.service.update_strict(&scope, appointment_id, request).await?
    } else {
        state.service.update(&scope, appointment_id, request).await?
    };

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment updated successfully"
    })))
}

#[axum::debug_handler]
pub async fn delete_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let scope = organization_scope(&user)?;
    let appointment = state.service.delete(&scope, appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment deleted"
    })))
}

// ==============================================================================
// QUERY HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let scope = organization_scope(&user)?;
    let appointment = state.service.get(&scope, appointment_id).await?;

    Ok(Json(json!({ "appointment": appointment })))
}

#[axum::debug_handler]
pub async fn list_today_appointments(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let scope = organization_scope(&user)?;
    let appointments = state.service.list_today(&scope).await?;

    Ok(appointment_list(appointments))
}

#[axum::debug_handler]
pub async fn list_appointments_in_range(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<Value>, AppError> {
    let scope = organization_scope(&user)?;
    let appointments = state.service.list_in_range(&scope, query.start, query.end).await?;

    Ok(appointment_list(appointments))
}

#[axum::debug_handler]
pub async fn get_calendar(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<Value>, AppError> {
    let scope = organization_scope(&user)?;
    let days = state.service.list_calendar(&scope, query.start, query.end).await?;

    Ok(Json(json!({
        "days": days,
        "utc_offset_seconds": state.service.schedule_offset().local_minus_utc(),
    })))
}

#[axum::debug_handler]
pub async fn check_appointment_conflicts(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Query(query): Query<ConflictCheckQuery>,
) -> Result<Json<Value>, AppError> {
    let scope = organization_scope(&user)?;
    let response = state.service
        .check_conflicts(&scope, query.start, query.end, query.exclude_appointment_id)
        .await?;

    Ok(Json(json!(response)))
}

#[axum::debug_handler]
pub async fn list_completed_without_report(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Query(query): Query<WithoutReportQuery>,
) -> Result<Json<Value>, AppError> {
    let scope = organization_scope(&user)?;
    let appointments = state.service
        .list_completed_without_report(&scope, query.days_back)
        .await?;

    Ok(appointment_list(appointments))
}

#[axum::debug_handler]
pub async fn get_patient_appointments(
    State(state): State<AppointmentState>,
    Path(patient_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let scope = organization_scope(&user)?;
    let appointments = state.service.list_by_patient(&scope, patient_id).await?;

    Ok(appointment_list(appointments))
}
