// libs/appointment-cell/src/services/notification.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::FixedOffset;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::models::{Appointment, PatientWithOwner};

/// Payload for telling a patient's owner about a new booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentNotification {
    pub appointment_id: Uuid,
    pub target_email: String,
    pub owner_name: String,
    pub patient_name: String,
    /// Local calendar date, `YYYY-MM-DD`.
    pub appointment_date: String,
    /// Local wall-clock time, `HH:MM`.
    pub appointment_time: String,
    pub duration_minutes: i64,
    pub at_home: bool,
    pub note: Option<String>,
    pub organization_name: String,
}

impl AppointmentNotification {
    /// `None` when the owner has no contact email.
    pub fn for_appointment(
        appointment: &Appointment,
        patient: &PatientWithOwner,
        offset: FixedOffset,
    ) -> Option<Self> {
        let target_email = patient.owner_email()?.to_string();
        let local_begin = appointment.begin_at.with_timezone(&offset);

        Some(Self {
            appointment_id: appointment.id,
            target_email,
            owner_name: patient.owner.name.clone(),
            patient_name: patient.display_label(),
            appointment_date: local_begin.format("%Y-%m-%d").to_string(),
            appointment_time: local_begin.format("%H:%M").to_string(),
            duration_minutes: appointment.duration_minutes(),
            at_home: appointment.at_home,
            note: appointment.note.clone(),
            organization_name: patient.organization_name.clone(),
        })
    }
}

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Notification outbox is closed")]
    OutboxClosed,
}

/// Delivers owner notifications. Implementations may retry internally; the
/// worker never does.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, notification: &AppointmentNotification) -> Result<(), NotificationError>;
}

/// POSTs each notification as JSON to a mail/webhook endpoint.
pub struct WebhookNotificationDispatcher {
    client: Client,
    url: String,
}

impl WebhookNotificationDispatcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookNotificationDispatcher {
    async fn notify(&self, notification: &AppointmentNotification) -> Result<(), NotificationError> {
        debug!("Posting appointment notification {} to {}", notification.appointment_id, self.url);

        let response = self.client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected { status: status.as_u16(), body });
        }

        Ok(())
    }
}

/// Used when no webhook is configured.
pub struct LogOnlyNotificationDispatcher;

#[async_trait]
impl NotificationDispatcher for LogOnlyNotificationDispatcher {
    async fn notify(&self, notification: &AppointmentNotification) -> Result<(), NotificationError> {
        info!("Notification for appointment {} to {} not sent: no dispatcher configured",
              notification.appointment_id, notification.target_email);
        Ok(())
    }
}

// ==============================================================================
// OUTBOX + WORKER
// ==============================================================================

/// Write side of the notification queue. Publishing never waits on delivery.
#[derive(Clone)]
pub struct NotificationOutbox {
    sender: mpsc::UnboundedSender<AppointmentNotification>,
}

impl NotificationOutbox {
    /// Create an outbox and the worker that drains it.
    pub fn channel(dispatcher: Arc<dyn NotificationDispatcher>) -> (Self, NotificationWorker) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, NotificationWorker { dispatcher, receiver })
    }

    pub fn publish(&self, notification: AppointmentNotification) -> Result<(), NotificationError> {
        self.sender
            .send(notification)
            .map_err(|_| NotificationError::OutboxClosed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationWorkerStats {
    pub delivered: u64,
    pub failed: u64,
}

pub struct NotificationWorker {
    dispatcher: Arc<dyn NotificationDispatcher>,
    receiver: mpsc::UnboundedReceiver<AppointmentNotification>,
}

impl NotificationWorker {
    /// Drain the outbox until every `NotificationOutbox` handle is dropped.
    /// Delivery failures are logged and skipped.
    #[instrument(skip(self))]
    pub async fn run(mut self) -> NotificationWorkerStats {
        info!("Notification worker started");
        let mut stats = NotificationWorkerStats::default();

        while let Some(notification) = self.receiver.recv().await {
            match self.dispatcher.notify(&notification).await {
                Ok(()) => {
                    stats.delivered += 1;
                    info!("Notified {} about appointment {}",
                          notification.target_email, notification.appointment_id);
                }
                Err(e) => {
                    stats.failed += 1;
                    error!("Failed to notify {} about appointment {}: {}",
                           notification.target_email, notification.appointment_id, e);
                }
            }
        }

        warn!("Notification outbox closed, worker stopping ({} delivered, {} failed)",
              stats.delivered, stats.failed);
        stats
    }

    pub fn spawn(self) -> JoinHandle<NotificationWorkerStats> {
        tokio::spawn(self.run())
    }
}
