// libs/appointment-cell/src/services/store.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentChanges, AppointmentError, AppointmentStatus, NewAppointment,
    OrganizationScope,
};
use crate::services::interval::{overlaps, truncate_to_seconds};

/// Persistence boundary for appointments. Every operation is partitioned by
/// `OrganizationScope`; a row owned by another organization behaves exactly
/// like a missing row.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Persist a new row, assigning `id`, `created_at` and `updated_at`.
    async fn insert(&self, scope: &OrganizationScope, appointment: NewAppointment)
        -> Result<Appointment, AppointmentError>;

    async fn get(&self, scope: &OrganizationScope, id: Uuid)
        -> Result<Option<Appointment>, AppointmentError>;

    /// Fails with `NotFoundOrUnauthorized` unless a row matches both `id`
    /// and `scope`.
    async fn update(&self, scope: &OrganizationScope, id: Uuid, changes: AppointmentChanges)
        -> Result<Appointment, AppointmentError>;

    async fn delete(&self, scope: &OrganizationScope, id: Uuid)
        -> Result<Appointment, AppointmentError>;

    async fn find_by_organization(&self, scope: &OrganizationScope)
        -> Result<Vec<Appointment>, AppointmentError>;

    /// Rows whose `begin_at` lies in `[start, end)`.
    async fn find_by_date_range(&self, scope: &OrganizationScope, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<Vec<Appointment>, AppointmentError>;

    async fn find_by_patient(&self, scope: &OrganizationScope, patient_id: Uuid)
        -> Result<Vec<Appointment>, AppointmentError>;

    /// Rows in `status` whose `begin_at` is at or after `since`.
    async fn find_by_status_since(&self, scope: &OrganizationScope, status: AppointmentStatus, since: DateTime<Utc>)
        -> Result<Vec<Appointment>, AppointmentError>;

    /// Non-cancelled rows overlapping `[start, end)`. Adapters that can push
    /// the predicate down should override this scan.
    async fn find_overlapping(&self, scope: &OrganizationScope, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<Vec<Appointment>, AppointmentError> {
        let rows = self.find_by_organization(scope).await?;
        Ok(rows
            .into_iter()
            .filter(|apt| apt.status.blocks_time() && overlaps(start, end, apt.begin_at, apt.end_at))
            .collect())
    }
}

// ==============================================================================
// IN-MEMORY ADAPTER
// ==============================================================================

/// Process-local store used for tests and for running the API without a
/// database.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    rows: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn scoped<F>(&self, scope: &OrganizationScope, predicate: F) -> Vec<Appointment>
    where
        F: Fn(&Appointment) -> bool,
    {
        self.rows
            .read()
            .await
            .values()
            .filter(|apt| apt.belongs_to(scope) && predicate(apt))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert(&self, scope: &OrganizationScope, appointment: NewAppointment)
        -> Result<Appointment, AppointmentError> {
        let now = truncate_to_seconds(Utc::now());
        let row = Appointment {
            id: Uuid::new_v4(),
            organization_id: scope.id(),
            patient_id: appointment.patient_id,
            begin_at: appointment.interval.begin_at(),
            end_at: appointment.interval.end_at(),
            status: appointment.status,
            at_home: appointment.at_home,
            note: appointment.note,
            created_at: now,
            updated_at: now,
        };

        self.rows.write().await.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, scope: &OrganizationScope, id: Uuid)
        -> Result<Option<Appointment>, AppointmentError> {
        Ok(self.rows
            .read()
            .await
            .get(&id)
            .filter(|apt| apt.belongs_to(scope))
            .cloned())
    }

    async fn update(&self, scope: &OrganizationScope, id: Uuid, changes: AppointmentChanges)
        -> Result<Appointment, AppointmentError> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(&id)
            .filter(|apt| apt.belongs_to(scope))
            .ok_or(AppointmentError::NotFoundOrUnauthorized)?;

        changes.apply_to(row);
        row.updated_at = truncate_to_seconds(Utc::now());
        Ok(row.clone())
    }

    async fn delete(&self, scope: &OrganizationScope, id: Uuid)
        -> Result<Appointment, AppointmentError> {
        let mut rows = self.rows.write().await;
        if !rows.get(&id).is_some_and(|apt| apt.belongs_to(scope)) {
            return Err(AppointmentError::NotFoundOrUnauthorized);
        }
        rows.remove(&id).ok_or(AppointmentError::NotFoundOrUnauthorized)
    }

    async fn find_by_organization(&self, scope: &OrganizationScope)
        -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self.scoped(scope, |_| true).await)
    }

    async fn find_by_date_range(&self, scope: &OrganizationScope, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self.scoped(scope, |apt| apt.begin_at >= start && apt.begin_at < end).await)
    }

    async fn find_by_patient(&self, scope: &OrganizationScope, patient_id: Uuid)
        -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self.scoped(scope, |apt| apt.patient_id == patient_id).await)
    }

    async fn find_by_status_since(&self, scope: &OrganizationScope, status: AppointmentStatus, since: DateTime<Utc>)
        -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self.scoped(scope, |apt| apt.status == status && apt.begin_at >= since).await)
    }
}

// ==============================================================================
// POSTGREST ADAPTER
// ==============================================================================

const APPOINTMENTS_PATH: &str = "/rest/v1/appointments";

/// `appointments` table behind PostgREST. Every request filters on
/// `organization_id`.
pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn scoped_path(scope: &OrganizationScope, filters: &[String]) -> String {
        let mut query_parts = vec![format!("organization_id=eq.{}", scope)];
        query_parts.extend(filters.iter().cloned());
        format!("{}?{}", APPOINTMENTS_PATH, query_parts.join("&"))
    }

    async fn fetch(&self, path: &str) -> Result<Vec<Appointment>, AppointmentError> {
        debug!("Fetching appointments: {}", path);

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            path,
            None,
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        parse_rows(result)
    }

    async fn write(&self, method: Method, path: &str, body: Option<Value>)
        -> Result<Vec<Appointment>, AppointmentError> {
        let result: Vec<Value> = self.supabase.request_with_headers(
            method,
            path,
            None,
            body,
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        parse_rows(result)
    }
}

fn parse_rows(rows: Vec<Value>) -> Result<Vec<Appointment>, AppointmentError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<Appointment>, _>>()
        .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointments: {}", e)))
}

/// RFC 3339 with a `Z` suffix, percent-encoded for use in a query string.
pub(crate) fn query_timestamp(instant: DateTime<Utc>) -> String {
    urlencoding::encode(&instant.to_rfc3339_opts(SecondsFormat::Secs, true)).into_owned()
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn insert(&self, scope: &OrganizationScope, appointment: NewAppointment)
        -> Result<Appointment, AppointmentError> {
        let body = json!({
            "organization_id": scope.id(),
            "patient_id": appointment.patient_id,
            "begin_at": appointment.interval.begin_at(),
            "end_at": appointment.interval.end_at(),
            "status": appointment.status,
            "at_home": appointment.at_home,
            "note": appointment.note,
        });

        self.write(Method::POST, APPOINTMENTS_PATH, Some(body))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppointmentError::DatabaseError("Insert returned no row".to_string()))
    }

    async fn get(&self, scope: &OrganizationScope, id: Uuid)
        -> Result<Option<Appointment>, AppointmentError> {
        let path = Self::scoped_path(scope, &[format!("id=eq.{}", id), "limit=1".to_string()]);
        Ok(self.fetch(&path).await?.into_iter().next())
    }

    async fn update(&self, scope: &OrganizationScope, id: Uuid, changes: AppointmentChanges)
        -> Result<Appointment, AppointmentError> {
        let mut body = serde_json::to_value(&changes)
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;
        body["updated_at"] = json!(truncate_to_seconds(Utc::now()));

        let path = Self::scoped_path(scope, &[format!("id=eq.{}", id)]);
        self.write(Method::PATCH, &path, Some(body))
            .await?
            .into_iter()
            .next()
            .ok_or(AppointmentError::NotFoundOrUnauthorized)
    }

    async fn delete(&self, scope: &OrganizationScope, id: Uuid)
        -> Result<Appointment, AppointmentError> {
        let path = Self::scoped_path(scope, &[format!("id=eq.{}", id)]);
        self.write(Method::DELETE, &path, None)
            .await?
            .into_iter()
            .next()
            .ok_or(AppointmentError::NotFoundOrUnauthorized)
    }

    async fn find_by_organization(&self, scope: &OrganizationScope)
        -> Result<Vec<Appointment>, AppointmentError> {
        let path = Self::scoped_path(scope, &["order=begin_at.asc".to_string()]);
        self.fetch(&path).await
    }

    async fn find_by_date_range(&self, scope: &OrganizationScope, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<Vec<Appointment>, AppointmentError> {
        let path = Self::scoped_path(scope, &[
            format!("begin_at=gte.{}", query_timestamp(start)),
            format!("begin_at=lt.{}", query_timestamp(end)),
            "order=begin_at.asc".to_string(),
        ]);
        self.fetch(&path).await
    }

    async fn find_by_patient(&self, scope: &OrganizationScope, patient_id: Uuid)
        -> Result<Vec<Appointment>, AppointmentError> {
        let path = Self::scoped_path(scope, &[
            format!("patient_id=eq.{}", patient_id),
            "order=begin_at.desc".to_string(),
        ]);
        self.fetch(&path).await
    }

    async fn find_by_status_since(&self, scope: &OrganizationScope, status: AppointmentStatus, since: DateTime<Utc>)
        -> Result<Vec<Appointment>, AppointmentError> {
        let path = Self::scoped_path(scope, &[
            format!("status=eq.{}", status),
            format!("begin_at=gte.{}", query_timestamp(since)),
            "order=begin_at.desc".to_string(),
        ]);
        self.fetch(&path).await
    }

    async fn find_overlapping(&self, scope: &OrganizationScope, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<Vec<Appointment>, AppointmentError> {
        let path = Self::scoped_path(scope, &[
            format!("begin_at=lt.{}", query_timestamp(end)),
            format!("end_at=gt.{}", query_timestamp(start)),
            format!("status=neq.{}", AppointmentStatus::Cancelled),
            "order=begin_at.asc".to_string(),
        ]);
        self.fetch(&path).await
    }
}
