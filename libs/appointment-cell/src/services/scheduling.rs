// libs/appointment-cell/src/services/scheduling.rs
//
// Appointment create / update / delete. Each mutation runs in two phases:
// a critical phase inside one transaction (slot reservation, appointment
// write, audit entry), and an advisory phase after commit (calendar event,
// notifications) whose failures come back as warnings.
//

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Map};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{ClientSession, DocumentStore, Filter, Pipeline};
use shared_models::auth::Role;
use shared_models::records::{DoctorRecord, PatientRecord};

use crate::models::{
    collections, Appointment, AppointmentError, AppointmentListQuery, AppointmentStatus, AuditAction,
    AuditLogEntry, CreateAppointmentRequest, Mutation, Notification, NotificationKind, RecipientRole,
    TimeSlot, UpdateAppointmentRequest,
};
use crate::services::access::{resolve_scope, AccessScope, Actor};
use crate::services::audit::{AuditTrail, DocumentAuditTrail};
use crate::services::calendar::{calendar_gateway_from_config, CalendarEventRequest, CalendarGateway};
use crate::services::formatting::{format_document, with_relations, AppointmentView};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::listing::{self, AppointmentPage, ListOptions};
use crate::services::notification::{notification_gateway_from_config, NotificationGateway};
use crate::services::slots::SlotService;

const RESOURCE_TYPE: &str = "appointment";

/// User accounts to notify about an appointment.
#[derive(Debug, Clone, Copy, Default)]
struct Participants {
    patient_user_id: Option<Uuid>,
    doctor_user_id: Option<Uuid>,
}

struct UpdatedAppointment {
    appointment: Appointment,
    previous: Appointment,
    status_change: Option<(AppointmentStatus, AppointmentStatus)>,
    moved: bool,
}

pub struct AppointmentSchedulingService {
    store: DocumentStore,
    audit: Arc<dyn AuditTrail>,
    calendar: Arc<dyn CalendarGateway>,
    notifications: Arc<dyn NotificationGateway>,
    lifecycle: AppointmentLifecycleService,
    slots: SlotService,
    default_page_size: u64,
    max_page_size: u64,
}

impl AppointmentSchedulingService {
    pub fn new(
        store: DocumentStore,
        calendar: Arc<dyn CalendarGateway>,
        notifications: Arc<dyn NotificationGateway>,
    ) -> Self {
        Self {
            store,
            audit: Arc::new(DocumentAuditTrail),
            calendar,
            notifications,
            lifecycle: AppointmentLifecycleService::new(),
            slots: SlotService::new(),
            default_page_size: shared_config::DEFAULT_PAGE_SIZE,
            max_page_size: shared_config::DEFAULT_MAX_PAGE_SIZE,
        }
    }

    pub fn from_config(store: DocumentStore, config: &AppConfig) -> Self {
        let calendar = calendar_gateway_from_config(config);
        let notifications = notification_gateway_from_config(store.clone(), config);

        Self::new(store, calendar, notifications)
            .with_page_sizes(config.default_page_size, config.max_page_size)
    }

    pub fn with_audit_trail(mut self, audit: Arc<dyn AuditTrail>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_page_sizes(mut self, default_page_size: u64, max_page_size: u64) -> Self {
        self.default_page_size = default_page_size.max(1);
        self.max_page_size = max_page_size.max(self.default_page_size);
        self
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    // ==========================================================================
    // CREATE
    // ==========================================================================

    #[instrument(skip(self, request, actor), fields(user_id = %actor.user_id))]
    pub async fn create_appointment(
        &self,
        request: CreateAppointmentRequest,
        actor: &Actor,
    ) -> Result<Mutation<AppointmentView>, AppointmentError> {
        request.validate()?;

        if !actor.can_create() {
            return Err(AppointmentError::Forbidden("Not allowed to create appointments".to_string()));
        }
        let scope = resolve_scope(&self.store, actor).await?;
        match scope {
            AccessScope::Patient(own) if own != request.patient_id => {
                return Err(AppointmentError::Forbidden(
                    "Patients can only book appointments for themselves".to_string(),
                ));
            }
            AccessScope::Doctor(own) if own != request.doctor_id => {
                return Err(AppointmentError::Forbidden(
                    "Doctors can only book their own appointments".to_string(),
                ));
            }
            _ => {}
        }

        info!(
            "Creating appointment for patient {} with doctor {}",
            request.patient_id, request.doctor_id
        );

        let mut session = self.store.start_session();
        session.start_transaction()?;
        let result = self.create_in_session(&mut session, &request, actor, &scope).await;
        let outcome = finish_transaction(&mut session, result, "create").await;
        session.end_session();
        let (appointment, participants) = outcome?;

        info!(
            "Appointment {} booked in slot {} on {} at {}",
            appointment.id, appointment.time_slot_id, appointment.date, appointment.start_time
        );

        let mut warnings = Vec::new();
        self.attach_calendar_event(&appointment, &mut warnings).await;
        self.notify_participants(
            &appointment,
            participants,
            NotificationKind::AppointmentCreated,
            "Appointment scheduled",
            format!(
                "Appointment scheduled for {} at {}",
                appointment.date,
                appointment.start_time.format("%H:%M")
            ),
            &mut warnings,
        )
        .await;

        let view = self.get_appointment(appointment.id).await?;
        Ok(Mutation::new(view, warnings))
    }

    async fn create_in_session(
        &self,
        session: &mut ClientSession,
        request: &CreateAppointmentRequest,
        actor: &Actor,
        scope: &AccessScope,
    ) -> Result<(Appointment, Participants), AppointmentError> {
        let doctor: DoctorRecord = serde_json::from_value(
            session
                .find_by_id(collections::DOCTORS, request.doctor_id)
                .await?
                .ok_or(AppointmentError::DoctorNotFound)?,
        )?;
        let patient: PatientRecord = serde_json::from_value(
            session
                .find_by_id(collections::PATIENTS, request.patient_id)
                .await?
                .ok_or(AppointmentError::PatientNotFound)?,
        )?;

        let clinic_id = doctor
            .clinic_id
            .or(request.clinic_id)
            .or(actor.clinic_id)
            .ok_or(AppointmentError::ClinicNotFound)?;
        if session.find_by_id(collections::CLINICS, clinic_id).await?.is_none() {
            return Err(AppointmentError::ClinicNotFound);
        }
        if let AccessScope::Clinic(own_clinic) = scope {
            if *own_clinic != clinic_id {
                return Err(AppointmentError::Forbidden(
                    "Cannot book appointments for another clinic".to_string(),
                ));
            }
        }

        let slot = self.slot_for_request(session, request, clinic_id).await?;
        if slot.doctor_id != request.doctor_id {
            return Err(AppointmentError::ValidationError(
                "Time slot belongs to a different doctor".to_string(),
            ));
        }
        if !slot.is_available() {
            return Err(AppointmentError::SlotUnavailable(slot.status));
        }

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: patient.id,
            doctor_id: doctor.id,
            clinic_id,
            time_slot_id: slot.id,
            date: slot.date,
            start_time: slot.start_time,
            end_time: slot.end_time,
            status: AppointmentStatus::Scheduled,
            visit_type: request.visit_type.unwrap_or_default(),
            reason: request.reason.clone(),
            notes: request.notes.clone(),
            video_conference_link: None,
            calendar_event_id: None,
            created_by: actor.user_id.clone(),
            updated_by: None,
            created_at: now,
            updated_at: now,
            reminders_sent: Vec::new(),
        };

        session
            .insert_one(collections::APPOINTMENTS, serde_json::to_value(&appointment)?)
            .await?;
        self.slots.reserve(session, &slot, appointment.id).await?;

        self.audit
            .record(
                session,
                AuditLogEntry::new(
                    &actor.user_id,
                    AuditAction::Create,
                    RESOURCE_TYPE,
                    appointment.id,
                    json!({
                        "patientId": appointment.patient_id,
                        "doctorId": appointment.doctor_id,
                        "clinicId": appointment.clinic_id,
                        "timeSlotId": appointment.time_slot_id,
                        "date": appointment.date,
                        "startTime": appointment.start_time,
                    }),
                ),
            )
            .await?;

        let participants = Participants {
            patient_user_id: Some(patient.user_id),
            doctor_user_id: Some(doctor.user_id),
        };
        Ok((appointment, participants))
    }

    async fn slot_for_request(
        &self,
        session: &mut ClientSession,
        request: &CreateAppointmentRequest,
        clinic_id: Uuid,
    ) -> Result<TimeSlot, AppointmentError> {
        if let Some(slot_id) = request.time_slot_id {
            return self.slots.load_slot(session, slot_id).await;
        }

        match (request.date, request.start_time, request.end_time) {
            (Some(date), Some(start), Some(end)) => {
                self.slots
                    .resolve_slot(session, request.doctor_id, clinic_id, date, start, end)
                    .await
            }
            _ => Err(AppointmentError::ValidationError(
                "Either timeSlotId or date, startTime and endTime are required".to_string(),
            )),
        }
    }

    // ==========================================================================
    // UPDATE
    // ==========================================================================

    #[instrument(skip(self, request, actor), fields(user_id = %actor.user_id))]
    pub async fn update_appointment(
        &self,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
        actor: &Actor,
    ) -> Result<Mutation<AppointmentView>, AppointmentError> {
        request.validate()?;

        if !actor.can_update() {
            return Err(AppointmentError::Forbidden("Not allowed to update appointments".to_string()));
        }
        let scope = resolve_scope(&self.store, actor).await?;
        if actor.role == Role::Patient && !request.is_cancellation_only() {
            return Err(AppointmentError::Forbidden(
                "Patients can only cancel their appointments".to_string(),
            ));
        }

        info!("Updating appointment {}", appointment_id);

        let mut session = self.store.start_session();
        session.start_transaction()?;
        let result = self
            .update_in_session(&mut session, appointment_id, &request, actor, &scope)
            .await;
        let outcome = finish_transaction(&mut session, result, "update").await;
        session.end_session();
        let updated = outcome?;

        let mut warnings = Vec::new();
        let appointment = &updated.appointment;

        if let Some((from, to)) = updated.status_change {
            info!("Appointment {} status changed: {} -> {}", appointment.id, from, to);

            if to == AppointmentStatus::Cancelled {
                self.cancel_calendar_event(appointment, &mut warnings).await;
            }

            let participants = self.participants(appointment).await;
            let kind = if to == AppointmentStatus::Cancelled {
                NotificationKind::AppointmentCancelled
            } else {
                NotificationKind::StatusChanged
            };
            self.notify_participants(
                appointment,
                participants,
                kind,
                "Appointment status updated",
                format!(
                    "Appointment on {} at {} is now {}",
                    appointment.date,
                    appointment.start_time.format("%H:%M"),
                    to
                ),
                &mut warnings,
            )
            .await;
        }

        if updated.moved {
            info!(
                "Appointment {} moved from slot {} to {}",
                appointment.id, updated.previous.time_slot_id, appointment.time_slot_id
            );

            self.cancel_calendar_event(&updated.previous, &mut warnings).await;
            self.attach_calendar_event(appointment, &mut warnings).await;

            let participants = self.participants(appointment).await;
            self.notify_participants(
                appointment,
                participants,
                NotificationKind::AppointmentRescheduled,
                "Appointment rescheduled",
                format!(
                    "Appointment moved to {} at {}",
                    appointment.date,
                    appointment.start_time.format("%H:%M")
                ),
                &mut warnings,
            )
            .await;
        }

        let view = self.get_appointment(appointment.id).await?;
        Ok(Mutation::new(view, warnings))
    }

    async fn update_in_session(
        &self,
        session: &mut ClientSession,
        appointment_id: Uuid,
        request: &UpdateAppointmentRequest,
        actor: &Actor,
        scope: &AccessScope,
    ) -> Result<UpdatedAppointment, AppointmentError> {
        let current: Appointment = serde_json::from_value(
            session
                .find_by_id(collections::APPOINTMENTS, appointment_id)
                .await?
                .ok_or(AppointmentError::NotFound)?,
        )?;
        authorize_existing(scope, &current)?;

        let mut changes = Map::new();
        let mut changed_fields: Vec<&str> = Vec::new();
        let mut status_change = None;

        if let Some(new_status) = request.status {
            if new_status != current.status {
                self.lifecycle.validate_status_transition(current.status, new_status)?;
                changes.insert("status".to_string(), json!(new_status));
                changed_fields.push("status");
                status_change = Some((current.status, new_status));
            }
        }
        if let Some(visit_type) = request.visit_type {
            if visit_type != current.visit_type {
                changes.insert("type".to_string(), json!(visit_type));
                changed_fields.push("type");
            }
        }
        if let Some(reason) = &request.reason {
            if current.reason.as_ref() != Some(reason) {
                changes.insert("reason".to_string(), json!(reason));
                changed_fields.push("reason");
            }
        }
        if let Some(notes) = &request.notes {
            if current.notes.as_ref() != Some(notes) {
                changes.insert("notes".to_string(), json!(notes));
                changed_fields.push("notes");
            }
        }

        let mut moved = false;
        if let Some(new_slot_id) = request.time_slot_id {
            if new_slot_id != current.time_slot_id {
                if !self.lifecycle.can_reschedule(current.status) {
                    return Err(AppointmentError::ValidationError(format!(
                        "Cannot move an appointment that is {}",
                        current.status
                    )));
                }

                let slot = self.slots.load_slot(session, new_slot_id).await?;
                if slot.doctor_id != current.doctor_id {
                    return Err(AppointmentError::ValidationError(
                        "Time slot belongs to a different doctor".to_string(),
                    ));
                }
                self.slots.reserve(session, &slot, current.id).await?;
                self.slots.release(session, current.time_slot_id, current.id).await?;

                changes.insert("timeSlotId".to_string(), json!(slot.id));
                changes.insert("date".to_string(), json!(slot.date));
                changes.insert("startTime".to_string(), json!(slot.start_time));
                changes.insert("endTime".to_string(), json!(slot.end_time));
                // A new time gets a fresh set of reminders.
                changes.insert("remindersSent".to_string(), json!([]));
                changed_fields.push("timeSlotId");
                moved = true;
            }
        }

        if let Some((_, to)) = status_change {
            if self.lifecycle.releases_slot(to) {
                self.slots.release(session, current.time_slot_id, current.id).await?;
            }
        }

        changes.insert("updatedBy".to_string(), json!(actor.user_id));
        changes.insert("updatedAt".to_string(), json!(Utc::now()));

        let updated: Appointment = serde_json::from_value(
            session
                .find_one_and_update(collections::APPOINTMENTS, appointment_id, changes)
                .await?
                .ok_or(AppointmentError::NotFound)?,
        )?;

        let mut details = json!({ "changedFields": changed_fields });
        if let Some((from, to)) = status_change {
            details["previousStatus"] = json!(from);
            details["newStatus"] = json!(to);
        }
        if moved {
            details["previousTimeSlotId"] = json!(current.time_slot_id);
            details["newTimeSlotId"] = json!(updated.time_slot_id);
        }

        self.audit
            .record(
                session,
                AuditLogEntry::new(&actor.user_id, AuditAction::Update, RESOURCE_TYPE, appointment_id, details),
            )
            .await?;

        Ok(UpdatedAppointment {
            appointment: updated,
            previous: current,
            status_change,
            moved,
        })
    }

    // ==========================================================================
    // DELETE
    // ==========================================================================

    /// Deletes the appointment and frees its slot. `false` when there was
    /// nothing to delete.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn delete_appointment(
        &self,
        appointment_id: Uuid,
        actor: &Actor,
    ) -> Result<Mutation<bool>, AppointmentError> {
        if !actor.can_delete() {
            return Err(AppointmentError::Forbidden("Not allowed to delete appointments".to_string()));
        }
        let scope = resolve_scope(&self.store, actor).await?;

        let mut session = self.store.start_session();
        session.start_transaction()?;
        let result = self.delete_in_session(&mut session, appointment_id, actor, &scope).await;
        let outcome = finish_transaction(&mut session, result, "delete").await;
        session.end_session();

        let Some(deleted) = outcome? else {
            debug!("Appointment {} not found, nothing to delete", appointment_id);
            return Ok(Mutation::new(false, Vec::new()));
        };

        info!("Deleted appointment {} and released slot {}", deleted.id, deleted.time_slot_id);

        let mut warnings = Vec::new();
        self.cancel_calendar_event(&deleted, &mut warnings).await;
        Ok(Mutation::new(true, warnings))
    }

    async fn delete_in_session(
        &self,
        session: &mut ClientSession,
        appointment_id: Uuid,
        actor: &Actor,
        scope: &AccessScope,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let Some(document) = session.find_by_id(collections::APPOINTMENTS, appointment_id).await? else {
            return Ok(None);
        };
        let current: Appointment = serde_json::from_value(document)?;
        authorize_existing(scope, &current)?;

        self.slots.release(session, current.time_slot_id, current.id).await?;
        session.delete_by_id(collections::APPOINTMENTS, appointment_id).await?;

        self.audit
            .record(
                session,
                AuditLogEntry::new(
                    &actor.user_id,
                    AuditAction::Delete,
                    RESOURCE_TYPE,
                    appointment_id,
                    json!({
                        "patientId": current.patient_id,
                        "doctorId": current.doctor_id,
                        "timeSlotId": current.time_slot_id,
                        "date": current.date,
                        "startTime": current.start_time,
                        "status": current.status,
                    }),
                ),
            )
            .await?;

        Ok(Some(current))
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<AppointmentView, AppointmentError> {
        let pipeline = with_relations(
            Pipeline::new().match_filter(Filter::eq("id", appointment_id.to_string())),
        )
        .limit(1);

        self.store
            .aggregate(collections::APPOINTMENTS, &pipeline)
            .await?
            .into_iter()
            .next()
            .map(format_document)
            .ok_or(AppointmentError::NotFound)
    }

    pub async fn get_time_slot(&self, slot_id: Uuid) -> Result<TimeSlot, AppointmentError> {
        self.slots.get_time_slot(&self.store, slot_id).await
    }

    #[instrument(skip(self, query))]
    pub async fn list_appointments(
        &self,
        query: AppointmentListQuery,
        scope: AccessScope,
    ) -> Result<AppointmentPage, AppointmentError> {
        let options = ListOptions::from_query(query, scope, self.default_page_size, self.max_page_size)?;
        listing::list_appointments(&self.store, &options).await
    }

    // ==========================================================================
    // ADVISORY SIDE EFFECTS
    // ==========================================================================

    async fn attach_calendar_event(&self, appointment: &Appointment, warnings: &mut Vec<String>) {
        let request = CalendarEventRequest::for_appointment(appointment);
        let event = match self.calendar.create_event(&request).await {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                warn!("Calendar event for appointment {} failed: {}", appointment.id, e);
                warnings.push(format!("Calendar event could not be created: {}", e));
                return;
            }
        };

        let mut changes = Map::new();
        changes.insert("calendarEventId".to_string(), json!(event.event_id));
        if let Some(link) = &event.meeting_link {
            changes.insert("videoConferenceLink".to_string(), json!(link));
        }

        if let Err(e) = self
            .store
            .update_by_id(collections::APPOINTMENTS, appointment.id, changes)
            .await
        {
            warn!("Could not store calendar event on appointment {}: {}", appointment.id, e);
            warnings.push("Calendar event was created but could not be saved".to_string());
        }
    }

    async fn cancel_calendar_event(&self, appointment: &Appointment, warnings: &mut Vec<String>) {
        let Some(event_id) = appointment.calendar_event_id.as_deref() else {
            return;
        };

        if let Err(e) = self.calendar.cancel_event(event_id).await {
            warn!("Cancelling calendar event {} failed: {}", event_id, e);
            warnings.push(format!("Calendar event could not be cancelled: {}", e));
        }
    }

    async fn participants(&self, appointment: &Appointment) -> Participants {
        let patient_user_id = self
            .load_record::<PatientRecord>(collections::PATIENTS, appointment.patient_id)
            .await
            .map(|patient| patient.user_id);
        let doctor_user_id = self
            .load_record::<DoctorRecord>(collections::DOCTORS, appointment.doctor_id)
            .await
            .map(|doctor| doctor.user_id);

        Participants {
            patient_user_id,
            doctor_user_id,
        }
    }

    async fn load_record<T: serde::de::DeserializeOwned>(&self, collection: &str, id: Uuid) -> Option<T> {
        match self.store.find_by_id(collection, id).await {
            Ok(Some(document)) => serde_json::from_value(document).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("Could not load {} {}: {}", collection, id, e);
                None
            }
        }
    }

    async fn notify_participants(
        &self,
        appointment: &Appointment,
        participants: Participants,
        kind: NotificationKind,
        title: &str,
        message: String,
        warnings: &mut Vec<String>,
    ) {
        let recipients = [
            (participants.patient_user_id, RecipientRole::Patient),
            (participants.doctor_user_id, RecipientRole::Doctor),
        ];

        let notifications: Vec<Notification> = recipients
            .into_iter()
            .filter_map(|(user_id, role)| {
                user_id.map(|id| Notification::new(id, role, kind, appointment.id, title, message.clone()))
            })
            .collect();

        let results = join_all(notifications.iter().map(|n| self.notifications.notify(n))).await;
        for (notification, result) in notifications.iter().zip(results) {
            if let Err(e) = result {
                warn!(
                    "Notification to {:?} for appointment {} failed: {}",
                    notification.recipient_role, appointment.id, e
                );
                warnings.push(format!(
                    "Could not notify the {}: {}",
                    match notification.recipient_role {
                        RecipientRole::Patient => "patient",
                        RecipientRole::Doctor => "doctor",
                    },
                    e
                ));
            }
        }
    }
}

/// Mutations follow the same visibility rules as reads.
fn authorize_existing(scope: &AccessScope, appointment: &Appointment) -> Result<(), AppointmentError> {
    if scope.covers(appointment) {
        return Ok(());
    }
    Err(AppointmentError::Forbidden(match scope {
        AccessScope::Patient(_) => "Patients can only change their own appointments",
        AccessScope::Doctor(_) => "Doctors can only change their own appointments",
        _ => "Appointment belongs to another clinic",
    }
    .to_string()))
}

/// Commits on success, aborts on failure. The caller ends the session.
async fn finish_transaction<T>(
    session: &mut ClientSession,
    result: Result<T, AppointmentError>,
    operation: &str,
) -> Result<T, AppointmentError> {
    match result {
        Ok(value) => match session.commit_transaction().await {
            Ok(()) => {
                debug!("Committed {} transaction", operation);
                Ok(value)
            }
            Err(e) => {
                if e.is_transient() {
                    warn!("Concurrent write aborted {} transaction: {}", operation, e);
                } else {
                    error!("Failed to commit {} transaction: {}", operation, e);
                }
                Err(e.into())
            }
        },
        Err(e) => {
            if let Err(abort_error) = session.abort_transaction().await {
                warn!("Failed to abort {} transaction: {}", operation, abort_error);
            }
            match &e {
                AppointmentError::DatabaseError(_) => error!("Aborted {} transaction: {}", operation, e),
                _ => debug!("Aborted {} transaction: {}", operation, e),
            }
            Err(e)
        }
    }
}

impl std::fmt::Debug for AppointmentSchedulingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppointmentSchedulingService")
            .field("default_page_size", &self.default_page_size)
            .field("max_page_size", &self.max_page_size)
            .finish_non_exhaustive()
    }
}
