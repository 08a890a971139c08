// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use shared_database::DatabaseError as StoreError;
use shared_models::error::AppError;

pub mod collections {
    pub const TIME_SLOTS: &str = "timeSlots";
    pub const APPOINTMENTS: &str = "appointments";
    pub const AUDIT_LOGS: &str = "auditLogs";
    pub const NOTIFICATIONS: &str = "notifications";

    pub use shared_models::records::collections::{CLINICS, DOCTORS, PATIENTS, USERS};
}

// ==============================================================================
// TIME SLOTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Booked,
    Cancelled,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Booked => "booked",
            SlotStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub id: Uuid,
    pub doctor_id: Uuid,
    #[serde(default)]
    pub clinic_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: SlotStatus,
    #[serde(default)]
    pub booked_by_appointment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimeSlot {
    pub fn is_available(&self) -> bool {
        self.status == SlotStatus::Available
    }
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Scheduled,
    #[serde(alias = "checked_in")]
    CheckedIn,
    #[serde(alias = "in_progress")]
    InProgress,
    Completed,
    Cancelled,
    #[serde(alias = "no_show")]
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::CheckedIn => "checked-in",
            AppointmentStatus::InProgress => "in-progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no-show",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum VisitType {
    #[default]
    #[serde(alias = "general", alias = "general_consultation")]
    Consultation,
    #[serde(alias = "follow_up", alias = "followup")]
    FollowUp,
    #[serde(alias = "urgent")]
    Emergency,
    #[serde(alias = "virtual", alias = "video")]
    Telehealth,
    Procedure,
    #[serde(alias = "check_up", alias = "checkup")]
    CheckUp,
}

impl VisitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitType::Consultation => "consultation",
            VisitType::FollowUp => "follow-up",
            VisitType::Emergency => "emergency",
            VisitType::Telehealth => "telehealth",
            VisitType::Procedure => "procedure",
            VisitType::CheckUp => "check-up",
        }
    }
}

impl fmt::Display for VisitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const REMINDER_24H: &str = "24h";
pub const REMINDER_1H: &str = "1h";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub clinic_id: Uuid,
    pub time_slot_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: AppointmentStatus,
    #[serde(rename = "type", default)]
    pub visit_type: VisitType,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub video_conference_link: Option<String>,
    #[serde(default)]
    pub calendar_event_id: Option<String>,
    pub created_by: String,
    #[serde(default)]
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub reminders_sent: Vec<String>,
}

impl Appointment {
    /// Scheduled start as a UTC instant. Slot times are clinic wall-clock
    /// times and are treated as UTC.
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.start_time).and_utc()
    }

    pub fn has_reminder(&self, marker: &str) -> bool {
        self.reminders_sent.iter().any(|sent| sent == marker)
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    #[serde(default)]
    pub time_slot_id: Option<Uuid>,
    #[serde(default)]
    pub clinic_id: Option<Uuid>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    #[serde(rename = "type", default)]
    pub visit_type: Option<VisitType>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CreateAppointmentRequest {
    pub fn validate(&self) -> Result<(), AppointmentError> {
        if self.patient_id.is_nil() || self.doctor_id.is_nil() {
            return Err(AppointmentError::ValidationError(
                "patientId and doctorId are required".to_string(),
            ));
        }

        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if end <= start {
                return Err(AppointmentError::ValidationError(
                    "endTime must be after startTime".to_string(),
                ));
            }
        }

        if self.time_slot_id.is_none()
            && (self.date.is_none() || self.start_time.is_none() || self.end_time.is_none())
        {
            return Err(AppointmentError::ValidationError(
                "Either timeSlotId or date, startTime and endTime are required".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAppointmentRequest {
    #[serde(default)]
    pub status: Option<AppointmentStatus>,
    #[serde(rename = "type", default)]
    pub visit_type: Option<VisitType>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub time_slot_id: Option<Uuid>,
}

impl UpdateAppointmentRequest {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.visit_type.is_none()
            && self.reason.is_none()
            && self.notes.is_none()
            && self.time_slot_id.is_none()
    }

    pub fn validate(&self) -> Result<(), AppointmentError> {
        if self.is_empty() {
            return Err(AppointmentError::ValidationError(
                "No fields to update".to_string(),
            ));
        }
        if self.status == Some(AppointmentStatus::Cancelled) && self.time_slot_id.is_some() {
            return Err(AppointmentError::ValidationError(
                "Cannot cancel and move an appointment in the same update".to_string(),
            ));
        }
        Ok(())
    }

    /// Only a status change to `cancelled` and nothing else.
    pub fn is_cancellation_only(&self) -> bool {
        self.status == Some(AppointmentStatus::Cancelled)
            && self.visit_type.is_none()
            && self.reason.is_none()
            && self.notes.is_none()
            && self.time_slot_id.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<AppointmentStatus>,
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub clinic_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

// ==============================================================================
// AUDIT AND NOTIFICATIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Read,
    Login,
    Logout,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Read => "read",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub user_id: String,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default)]
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        user_id: &str,
        action: AuditAction,
        resource_type: &str,
        resource_id: impl ToString,
        details: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            action,
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            details,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AppointmentCreated,
    StatusChanged,
    AppointmentRescheduled,
    AppointmentCancelled,
    Reminder,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecipientRole {
    Patient,
    Doctor,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub recipient_user_id: Uuid,
    pub recipient_role: RecipientRole,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub appointment_id: Uuid,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        recipient_user_id: Uuid,
        recipient_role: RecipientRole,
        kind: NotificationKind,
        appointment_id: Uuid,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_user_id,
            recipient_role,
            kind,
            title: title.into(),
            message: message.into(),
            appointment_id,
            read: false,
            created_at: Utc::now(),
        }
    }
}

/// Result of a mutation. `warnings` lists side effects that failed after the
/// data was committed.
#[derive(Debug, Clone, Serialize)]
pub struct Mutation<T> {
    pub data: T,
    pub warnings: Vec<String>,
}

impl<T> Mutation<T> {
    pub fn new(data: T, warnings: Vec<String>) -> Self {
        Self { data, warnings }
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Time slot not found")]
    SlotNotFound,

    #[error("Clinic not found")]
    ClinicNotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Time slot is not available (current status: {0})")]
    SlotUnavailable(SlotStatus),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Cannot change appointment status from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<StoreError> for AppointmentError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::WriteConflict { .. } | StoreError::DuplicateKey { .. } => {
                AppointmentError::Conflict(
                    "The time slot or appointment was modified concurrently, please retry".to_string(),
                )
            }
            other => AppointmentError::DatabaseError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppointmentError {
    fn from(error: serde_json::Error) -> Self {
        AppointmentError::DatabaseError(format!("Malformed document: {}", error))
    }
}

impl From<AppointmentError> for AppError {
    fn from(error: AppointmentError) -> Self {
        match error {
            AppointmentError::NotFound
            | AppointmentError::SlotNotFound
            | AppointmentError::ClinicNotFound
            | AppointmentError::DoctorNotFound
            | AppointmentError::PatientNotFound => AppError::NotFound(error.to_string()),
            AppointmentError::SlotUnavailable(_) | AppointmentError::Conflict(_) => {
                AppError::Conflict(error.to_string())
            }
            AppointmentError::InvalidStatusTransition { .. } => AppError::BadRequest(error.to_string()),
            AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
            AppointmentError::Forbidden(msg) => AppError::Forbidden(msg),
            AppointmentError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}
