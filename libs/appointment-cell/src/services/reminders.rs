// libs/appointment-cell/src/services/reminders.rs
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Map};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_database::{ClientSession, DocumentStore, Filter};
use shared_models::records::PatientRecord;

use crate::models::{
    collections, Appointment, AppointmentError, AppointmentStatus, AuditAction, AuditLogEntry, Notification,
    NotificationKind, RecipientRole, REMINDER_1H, REMINDER_24H,
};
use crate::services::access::Actor;
use crate::services::audit::{AuditTrail, DocumentAuditTrail};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notification::NotificationGateway;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRunSummary {
    /// Appointments that had at least one reminder due.
    pub scanned: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Sends the 24 hour and 1 hour reminders for upcoming appointments. Each
/// marker is recorded on the appointment before the notification goes out,
/// so a reminder is sent at most once.
pub struct ReminderService {
    store: DocumentStore,
    notifications: Arc<dyn NotificationGateway>,
    audit: Arc<dyn AuditTrail>,
    lifecycle: AppointmentLifecycleService,
}

impl ReminderService {
    pub fn new(store: DocumentStore, notifications: Arc<dyn NotificationGateway>) -> Self {
        Self {
            store,
            notifications,
            audit: Arc::new(DocumentAuditTrail),
            lifecycle: AppointmentLifecycleService::new(),
        }
    }

    /// Reminder markers due for an appointment at `now`, widest window first.
    pub fn due_markers(&self, appointment: &Appointment, now: DateTime<Utc>) -> Vec<&'static str> {
        if !self.lifecycle.awaiting_visit(appointment.status) {
            return Vec::new();
        }

        let starts_at = appointment.starts_at();
        if starts_at <= now {
            return Vec::new();
        }
        let remaining = starts_at - now;

        [(REMINDER_24H, Duration::hours(24)), (REMINDER_1H, Duration::hours(1))]
            .into_iter()
            .filter(|(marker, window)| remaining <= *window && !appointment.has_reminder(marker))
            .map(|(marker, _)| marker)
            .collect()
    }

    #[instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<ReminderRunSummary, AppointmentError> {
        let filter = Filter::any_of(
            "status",
            vec![
                json!(AppointmentStatus::Scheduled.as_str()),
                json!(AppointmentStatus::CheckedIn.as_str()),
            ],
        );
        let candidates = self.store.find(collections::APPOINTMENTS, &filter).await?;

        let mut summary = ReminderRunSummary::default();
        for document in candidates {
            let appointment: Appointment = match serde_json::from_value(document) {
                Ok(appointment) => appointment,
                Err(e) => {
                    warn!("Skipping malformed appointment document: {}", e);
                    continue;
                }
            };

            if self.due_markers(&appointment, now).is_empty() {
                continue;
            }
            summary.scanned += 1;

            let markers = match self.record_markers(appointment.id, now).await {
                Ok(markers) if markers.is_empty() => continue,
                Ok(markers) => markers,
                Err(AppointmentError::Conflict(_)) => {
                    debug!("Appointment {} changed while recording reminders", appointment.id);
                    continue;
                }
                Err(e) => {
                    error!("Failed to record reminders for appointment {}: {}", appointment.id, e);
                    summary.failed += 1;
                    continue;
                }
            };

            match self.send_reminder(&appointment, &markers).await {
                Ok(()) => summary.sent += 1,
                Err(e) => {
                    warn!("Reminder for appointment {} was not delivered: {}", appointment.id, e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Marks due reminders as sent. Returns the markers this call recorded,
    /// empty when another run got there first.
    async fn record_markers(
        &self,
        appointment_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<&'static str>, AppointmentError> {
        let mut session = self.store.start_session();
        session.start_transaction()?;
        let result = self.record_markers_in_session(&mut session, appointment_id, now).await;

        let outcome = match result {
            Ok(markers) => session
                .commit_transaction()
                .await
                .map(|_| markers)
                .map_err(AppointmentError::from),
            Err(e) => {
                if let Err(abort_error) = session.abort_transaction().await {
                    warn!("Failed to abort reminder transaction: {}", abort_error);
                }
                Err(e)
            }
        };
        session.end_session();
        outcome
    }

    async fn record_markers_in_session(
        &self,
        session: &mut ClientSession,
        appointment_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<&'static str>, AppointmentError> {
        let Some(document) = session.find_by_id(collections::APPOINTMENTS, appointment_id).await? else {
            return Ok(Vec::new());
        };
        let appointment: Appointment = serde_json::from_value(document)?;
        let markers = self.due_markers(&appointment, now);
        if markers.is_empty() {
            return Ok(markers);
        }

        let mut sent = appointment.reminders_sent.clone();
        sent.extend(markers.iter().map(|marker| marker.to_string()));

        let mut changes = Map::new();
        changes.insert("remindersSent".to_string(), json!(sent));
        session
            .update_by_id(collections::APPOINTMENTS, appointment_id, changes)
            .await?;

        self.audit
            .record(
                session,
                AuditLogEntry::new(
                    &Actor::system().user_id,
                    AuditAction::Update,
                    "appointment",
                    appointment_id,
                    json!({ "changedFields": ["remindersSent"], "remindersSent": markers }),
                ),
            )
            .await?;

        Ok(markers)
    }

    async fn send_reminder(&self, appointment: &Appointment, markers: &[&str]) -> anyhow::Result<()> {
        let patient: PatientRecord = self
            .store
            .find_by_id(collections::PATIENTS, appointment.patient_id)
            .await?
            .map(serde_json::from_value::<PatientRecord>)
            .transpose()?
            .ok_or_else(|| anyhow::anyhow!("patient {} not found", appointment.patient_id))?;

        let lead = if markers.contains(&REMINDER_1H) { "in one hour" } else { "tomorrow" };
        let notification = Notification::new(
            patient.user_id,
            RecipientRole::Patient,
            NotificationKind::Reminder,
            appointment.id,
            "Appointment reminder",
            format!(
                "Reminder: your appointment is {} ({} at {})",
                lead,
                appointment.date,
                appointment.start_time.format("%H:%M")
            ),
        );

        self.notifications.notify(&notification).await?;
        info!("Sent {:?} reminder for appointment {}", markers, appointment.id);
        Ok(())
    }
}

/// Runs `run_once` on a fixed interval until the task is aborted.
pub fn spawn_reminder_worker(service: Arc<ReminderService>, every: StdDuration) -> JoinHandle<()> {
    let every = every.max(StdDuration::from_secs(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match service.run_once(Utc::now()).await {
                Ok(summary) if summary.sent > 0 || summary.failed > 0 => {
                    info!(
                        "Reminder run: {} due, {} sent, {} failed",
                        summary.scanned, summary.sent, summary.failed
                    );
                }
                Ok(_) => debug!("Reminder run: nothing due"),
                Err(e) => error!("Reminder run failed: {}", e),
            }
        }
    })
}
