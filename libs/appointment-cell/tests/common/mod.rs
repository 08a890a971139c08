#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use serde_json::json;
use uuid::Uuid;

use appointment_cell::models::{
    collections, AppointmentError, AuditLogEntry, Notification, SlotStatus, TimeSlot,
};
use appointment_cell::services::access::Actor;
use appointment_cell::services::audit::AuditTrail;
use appointment_cell::services::calendar::{CalendarEvent, CalendarEventRequest, CalendarGateway};
use appointment_cell::services::notification::NotificationGateway;
use appointment_cell::services::scheduling::AppointmentSchedulingService;
use shared_database::{ClientSession, DocumentStore};
use shared_models::auth::Role;

pub struct Fixture {
    pub store: DocumentStore,
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub doctor_user_id: Uuid,
    pub patient_id: Uuid,
    pub patient_user_id: Uuid,
    pub slot_id: Uuid,
}

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 11, 2).unwrap()
}

pub fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

impl Fixture {
    pub async fn seed() -> Self {
        let store = DocumentStore::in_memory();
        let clinic_id = Uuid::new_v4();
        let doctor_user_id = Uuid::new_v4();
        let patient_user_id = Uuid::new_v4();

        store
            .insert_one(collections::CLINICS, json!({"id": clinic_id, "name": "Harbor Clinic"}))
            .await
            .unwrap();
        store
            .insert_one(
                collections::USERS,
                json!({"id": doctor_user_id, "firstName": "Gregory", "lastName": "House", "email": "house@example.com"}),
            )
            .await
            .unwrap();
        store
            .insert_one(
                collections::USERS,
                json!({"id": patient_user_id, "firstName": "Ada", "lastName": "Lovelace", "email": "ada@example.com"}),
            )
            .await
            .unwrap();

        let doctor_id = store
            .insert_one(
                collections::DOCTORS,
                json!({"id": Uuid::new_v4(), "userId": doctor_user_id, "clinicId": clinic_id}),
            )
            .await
            .unwrap();
        let patient_id = store
            .insert_one(
                collections::PATIENTS,
                json!({"id": Uuid::new_v4(), "userId": patient_user_id, "clinicId": clinic_id}),
            )
            .await
            .unwrap();

        let mut fixture = Self {
            store,
            clinic_id,
            doctor_id,
            doctor_user_id,
            patient_id,
            patient_user_id,
            slot_id: Uuid::nil(),
        };
        fixture.slot_id = fixture.add_slot(day(), time(9, 0)).await;
        fixture
    }

    pub async fn add_slot(&self, date: NaiveDate, start: NaiveTime) -> Uuid {
        let now = Utc::now();
        let slot = TimeSlot {
            id: Uuid::new_v4(),
            doctor_id: self.doctor_id,
            clinic_id: Some(self.clinic_id),
            date,
            start_time: start,
            end_time: start + Duration::minutes(30),
            status: SlotStatus::Available,
            booked_by_appointment_id: None,
            created_at: now,
            updated_at: now,
        };
        self.store
            .insert_one(collections::TIME_SLOTS, serde_json::to_value(&slot).unwrap())
            .await
            .unwrap()
    }

    /// A second patient registered at the same clinic.
    pub async fn add_patient(&self, first_name: &str, last_name: &str) -> (Uuid, Uuid) {
        let user_id = Uuid::new_v4();
        self.store
            .insert_one(
                collections::USERS,
                json!({"id": user_id, "firstName": first_name, "lastName": last_name}),
            )
            .await
            .unwrap();
        let patient_id = self
            .store
            .insert_one(
                collections::PATIENTS,
                json!({"id": Uuid::new_v4(), "userId": user_id, "clinicId": self.clinic_id}),
            )
            .await
            .unwrap();
        (patient_id, user_id)
    }

    /// Another doctor at the same clinic, returned as an actor.
    pub async fn add_doctor(&self, first_name: &str, last_name: &str) -> Actor {
        let user_id = Uuid::new_v4();
        self.store
            .insert_one(
                collections::USERS,
                json!({"id": user_id, "firstName": first_name, "lastName": last_name}),
            )
            .await
            .unwrap();
        self.store
            .insert_one(
                collections::DOCTORS,
                json!({"id": Uuid::new_v4(), "userId": user_id, "clinicId": self.clinic_id}),
            )
            .await
            .unwrap();
        Actor {
            user_id: user_id.to_string(),
            role: Role::Doctor,
            clinic_id: Some(self.clinic_id),
        }
    }

    pub async fn slot(&self, slot_id: Uuid) -> TimeSlot {
        serde_json::from_value(
            self.store
                .find_by_id(collections::TIME_SLOTS, slot_id)
                .await
                .unwrap()
                .unwrap(),
        )
        .unwrap()
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.store
            .find(collection, &shared_database::Filter::And(vec![]))
            .await
            .unwrap()
            .len()
    }

    pub fn staff(&self) -> Actor {
        Actor {
            user_id: Uuid::new_v4().to_string(),
            role: Role::Staff,
            clinic_id: Some(self.clinic_id),
        }
    }

    pub fn doctor(&self) -> Actor {
        Actor {
            user_id: self.doctor_user_id.to_string(),
            role: Role::Doctor,
            clinic_id: Some(self.clinic_id),
        }
    }

    pub fn patient(&self) -> Actor {
        Actor {
            user_id: self.patient_user_id.to_string(),
            role: Role::Patient,
            clinic_id: None,
        }
    }

    pub fn booking(&self, slot_id: Uuid) -> appointment_cell::models::CreateAppointmentRequest {
        serde_json::from_value(json!({
            "patientId": self.patient_id,
            "doctorId": self.doctor_id,
            "timeSlotId": slot_id,
            "reason": "Annual check"
        }))
        .unwrap()
    }
}

#[derive(Default)]
pub struct RecordingNotifications {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifications {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationGateway for RecordingNotifications {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub struct FailingNotifications;

#[async_trait]
impl NotificationGateway for FailingNotifications {
    async fn notify(&self, _notification: &Notification) -> anyhow::Result<()> {
        Err(anyhow!("notification service unavailable"))
    }
}

#[derive(Default)]
pub struct RecordingCalendar {
    pub created: Mutex<Vec<Uuid>>,
    pub cancelled: Mutex<Vec<String>>,
}

#[async_trait]
impl CalendarGateway for RecordingCalendar {
    async fn create_event(&self, request: &CalendarEventRequest) -> anyhow::Result<Option<CalendarEvent>> {
        self.created.lock().unwrap().push(request.appointment_id);
        Ok(Some(CalendarEvent {
            event_id: format!("evt-{}", request.appointment_id),
            meeting_link: request
                .create_meeting_link
                .then(|| format!("https://meet.example.com/{}", request.appointment_id)),
        }))
    }

    async fn cancel_event(&self, event_id: &str) -> anyhow::Result<()> {
        self.cancelled.lock().unwrap().push(event_id.to_string());
        Ok(())
    }
}

pub struct FailingCalendar;

#[async_trait]
impl CalendarGateway for FailingCalendar {
    async fn create_event(&self, _request: &CalendarEventRequest) -> anyhow::Result<Option<CalendarEvent>> {
        Err(anyhow!("calendar service unavailable"))
    }

    async fn cancel_event(&self, _event_id: &str) -> anyhow::Result<()> {
        Err(anyhow!("calendar service unavailable"))
    }
}

/// Fails every write so the surrounding transaction has to abort.
pub struct FailingAuditTrail;

#[async_trait]
impl AuditTrail for FailingAuditTrail {
    async fn record(&self, _session: &mut ClientSession, _entry: AuditLogEntry) -> Result<(), AppointmentError> {
        Err(AppointmentError::DatabaseError("audit store unavailable".to_string()))
    }
}

pub struct Harness {
    pub fixture: Fixture,
    pub service: Arc<AppointmentSchedulingService>,
    pub calendar: Arc<RecordingCalendar>,
    pub notifications: Arc<RecordingNotifications>,
}

impl Harness {
    pub async fn new() -> Self {
        let fixture = Fixture::seed().await;
        let calendar = Arc::new(RecordingCalendar::default());
        let notifications = Arc::new(RecordingNotifications::default());
        let service = Arc::new(AppointmentSchedulingService::new(
            fixture.store.clone(),
            calendar.clone(),
            notifications.clone(),
        ));

        Self {
            fixture,
            service,
            calendar,
            notifications,
        }
    }
}
