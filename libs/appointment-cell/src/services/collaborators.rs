// libs/appointment-cell/src/services/collaborators.rs
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{AppointmentError, PatientOwner, PatientWithOwner};

/// Resolves a patient together with its owner and organization.
#[async_trait]
pub trait PatientResolver: Send + Sync {
    async fn get_patient_with_owner(&self, patient_id: Uuid)
        -> Result<Option<PatientWithOwner>, AppointmentError>;
}

/// Answers whether reports have been written for an appointment.
#[async_trait]
pub trait ReportResolver: Send + Sync {
    async fn has_reports(&self, appointment_id: Uuid) -> Result<bool, AppointmentError>;

    /// The subset of `appointment_ids` that have at least one report.
    async fn appointments_with_reports(&self, appointment_ids: &[Uuid])
        -> Result<HashSet<Uuid>, AppointmentError> {
        let flags = try_join_all(appointment_ids.iter().map(|id| self.has_reports(*id))).await?;

        Ok(appointment_ids
            .iter()
            .zip(flags)
            .filter_map(|(id, has_report)| has_report.then_some(*id))
            .collect())
    }
}

// ==============================================================================
// IN-MEMORY ADAPTERS
// ==============================================================================

#[derive(Default)]
pub struct InMemoryPatientDirectory {
    patients: RwLock<HashMap<Uuid, PatientWithOwner>>,
}

impl InMemoryPatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, patient: PatientWithOwner) {
        self.patients.write().await.insert(patient.id, patient);
    }
}

#[async_trait]
impl PatientResolver for InMemoryPatientDirectory {
    async fn get_patient_with_owner(&self, patient_id: Uuid)
        -> Result<Option<PatientWithOwner>, AppointmentError> {
        Ok(self.patients.read().await.get(&patient_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryReportIndex {
    reported: RwLock<HashSet<Uuid>>,
}

impl InMemoryReportIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_report(&self, appointment_id: Uuid) {
        self.reported.write().await.insert(appointment_id);
    }
}

#[async_trait]
impl ReportResolver for InMemoryReportIndex {
    async fn has_reports(&self, appointment_id: Uuid) -> Result<bool, AppointmentError> {
        Ok(self.reported.read().await.contains(&appointment_id))
    }
}

// ==============================================================================
// POSTGREST ADAPTERS
// ==============================================================================

const PATIENT_SELECT: &str =
    "id,organization_id,name,animal_type,client:clients(first_name,last_name,email),organization:organizations(name)";

#[derive(Debug, Deserialize)]
struct ClientRow {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganizationRow {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PatientRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    animal_type: Option<String>,
    client: Option<ClientRow>,
    organization: Option<OrganizationRow>,
}

impl From<PatientRow> for PatientWithOwner {
    fn from(row: PatientRow) -> Self {
        let owner = row.client
            .map(|client| {
                let name = [client.first_name, client.last_name]
                    .into_iter()
                    .flatten()
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                PatientOwner { name, email: client.email }
            })
            .unwrap_or(PatientOwner { name: String::new(), email: None });

        Self {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name,
            animal_type: row.animal_type,
            owner,
            organization_name: row.organization.and_then(|org| org.name).unwrap_or_default(),
        }
    }
}

pub struct SupabasePatientResolver {
    supabase: Arc<SupabaseClient>,
}

impl SupabasePatientResolver {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl PatientResolver for SupabasePatientResolver {
    async fn get_patient_with_owner(&self, patient_id: Uuid)
        -> Result<Option<PatientWithOwner>, AppointmentError> {
        debug!("Resolving patient {} with owner", patient_id);

        let path = format!("/rest/v1/patients?id=eq.{}&select={}&limit=1", patient_id, PATIENT_SELECT);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            None,
            None,
        ).await.map_err(|e| AppointmentError::ExternalServiceError(e.to_string()))?;

        result.into_iter()
            .next()
            .map(|row| {
                serde_json::from_value::<PatientRow>(row)
                    .map(PatientWithOwner::from)
                    .map_err(|e| AppointmentError::ExternalServiceError(format!("Failed to parse patient: {}", e)))
            })
            .transpose()
    }
}

/// Ids per `in.(...)` filter, keeping the request line well under common
/// 8 KB proxy limits.
pub const REPORT_LOOKUP_BATCH_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct ReportRow {
    appointment_id: Uuid,
}

pub struct SupabaseReportResolver {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseReportResolver {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn fetch_report_rows(&self, filter: &str) -> Result<Vec<ReportRow>, AppointmentError> {
        let path = format!("/rest/v1/reports?{}&select=appointment_id", filter);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            None,
            None,
        ).await.map_err(|e| AppointmentError::ExternalServiceError(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<ReportRow>, _>>()
            .map_err(|e| AppointmentError::ExternalServiceError(format!("Failed to parse reports: {}", e)))
    }
}

#[async_trait]
impl ReportResolver for SupabaseReportResolver {
    async fn has_reports(&self, appointment_id: Uuid) -> Result<bool, AppointmentError> {
        let rows = self.fetch_report_rows(&format!("appointment_id=eq.{}&limit=1", appointment_id)).await?;
        Ok(!rows.is_empty())
    }

    async fn appointments_with_reports(&self, appointment_ids: &[Uuid])
        -> Result<HashSet<Uuid>, AppointmentError> {
        if appointment_ids.is_empty() {
            return Ok(HashSet::new());
        }

        debug!("Looking up reports for {} appointments", appointment_ids.len());

        let batches = try_join_all(appointment_ids.chunks(REPORT_LOOKUP_BATCH_SIZE).map(|chunk| {
            let ids = chunk.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",");
            async move { self.fetch_report_rows(&format!("appointment_id=in.({})", ids)).await }
        })).await?;

        Ok(batches.into_iter().flatten().map(|row| row.appointment_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patient_row_mapping() {
        let org = Uuid::new_v4();
        let row: PatientRow = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "organization_id": org,
            "name": "Rex",
            "animal_type": "Dog",
            "client": { "first_name": "Ana", "last_name": " Silva ", "email": "ana@example.com" },
            "organization": { "name": "Riverside Vets" }
        })).unwrap();

        let patient = PatientWithOwner::from(row);
        assert_eq!(patient.owner.name, "Ana Silva");
        assert_eq!(patient.owner_email(), Some("ana@example.com"));
        assert_eq!(patient.organization_name, "Riverside Vets");
        assert_eq!(patient.display_label(), "Rex (Dog)");
    }

    #[test]
    fn test_patient_row_without_client() {
        let row: PatientRow = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "organization_id": Uuid::new_v4(),
            "name": "Tom",
            "animal_type": null,
            "client": null,
            "organization": null
        })).unwrap();

        let patient = PatientWithOwner::from(row);
        assert_eq!(patient.owner_email(), None);
        assert_eq!(patient.display_label(), "Tom");
    }

    #[tokio::test]
    async fn test_default_batch_lookup() {
        let index = InMemoryReportIndex::new();
        let reported = Uuid::new_v4();
        let unreported = Uuid::new_v4();
        index.record_report(reported).await;

        let found = index.appointments_with_reports(&[reported, unreported]).await.unwrap();
        assert!(found.contains(&reported));
        assert!(!found.contains(&unreported));
    }
}
