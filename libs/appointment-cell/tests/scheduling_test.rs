mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use serde_json::json;
use uuid::Uuid;

use appointment_cell::models::{
    collections, AppointmentError, AppointmentStatus, AuditAction, NotificationKind, SlotStatus,
    UpdateAppointmentRequest,
};
use appointment_cell::services::audit::audit_entries_for_resource;
use appointment_cell::services::scheduling::AppointmentSchedulingService;
use appointment_cell::services::slots::synthetic_slot_id;
use shared_models::auth::Role;

use common::{day, time, FailingAuditTrail, FailingCalendar, FailingNotifications, Harness, RecordingNotifications};

fn status_update(status: AppointmentStatus) -> UpdateAppointmentRequest {
    UpdateAppointmentRequest {
        status: Some(status),
        ..Default::default()
    }
}

fn appointment_id(view: &appointment_cell::services::formatting::AppointmentView) -> Uuid {
    Uuid::parse_str(view.id()).unwrap()
}

#[tokio::test]
async fn test_create_books_slot_and_writes_audit_entry() {
    let h = Harness::new().await;
    let f = &h.fixture;

    let created = h
        .service
        .create_appointment(f.booking(f.slot_id), &f.staff())
        .await
        .unwrap();

    assert!(created.warnings.is_empty());
    let view = created.data;
    let id = appointment_id(&view);
    assert_eq!(view.status(), "scheduled");
    assert_eq!(view.date(), "2026-11-02");
    assert_eq!(view.patient_name, "Ada Lovelace");
    assert_eq!(view.doctor_name, "Gregory House");
    assert_eq!(view.field_str("timeSlotId"), f.slot_id.to_string());
    assert_eq!(view.field_str("calendarEventId"), format!("evt-{}", id));

    let slot = f.slot(f.slot_id).await;
    assert_eq!(slot.status, SlotStatus::Booked);
    assert_eq!(slot.booked_by_appointment_id, Some(id));

    let entries = audit_entries_for_resource(&f.store, "appointment", &id.to_string())
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::Create);

    let sent = h.notifications.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|n| n.kind == NotificationKind::AppointmentCreated));
    assert!(sent.iter().any(|n| n.recipient_user_id == f.patient_user_id));
    assert!(sent.iter().any(|n| n.recipient_user_id == f.doctor_user_id));
}

#[tokio::test]
async fn test_second_booking_of_slot_is_rejected_without_side_effects() {
    let h = Harness::new().await;
    let f = &h.fixture;

    h.service
        .create_appointment(f.booking(f.slot_id), &f.staff())
        .await
        .unwrap();

    let result = h.service.create_appointment(f.booking(f.slot_id), &f.staff()).await;
    assert_matches!(result, Err(AppointmentError::SlotUnavailable(SlotStatus::Booked)));

    assert_eq!(f.count(collections::APPOINTMENTS).await, 1);
    assert_eq!(f.count(collections::AUDIT_LOGS).await, 1);
    assert_eq!(h.calendar.created.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_of_one_slot_admit_exactly_one() {
    let h = Harness::new().await;
    let f = &h.fixture;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&h.service);
        let request = f.booking(f.slot_id);
        let actor = f.staff();
        tasks.push(tokio::spawn(async move { service.create_appointment(request, &actor).await }));
    }

    let mut booked = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => booked += 1,
            Err(AppointmentError::SlotUnavailable(_)) | Err(AppointmentError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(booked, 1);
    assert_eq!(f.count(collections::APPOINTMENTS).await, 1);
    assert_eq!(f.count(collections::AUDIT_LOGS).await, 1);
    assert_eq!(f.slot(f.slot_id).await.status, SlotStatus::Booked);
}

#[tokio::test]
async fn test_failed_audit_write_rolls_back_booking() {
    let h = Harness::new().await;
    let f = &h.fixture;
    let service = AppointmentSchedulingService::new(
        f.store.clone(),
        h.calendar.clone(),
        h.notifications.clone(),
    )
    .with_audit_trail(Arc::new(FailingAuditTrail));

    let result = service.create_appointment(f.booking(f.slot_id), &f.staff()).await;
    assert_matches!(result, Err(AppointmentError::DatabaseError(_)));

    let slot = f.slot(f.slot_id).await;
    assert_eq!(slot.status, SlotStatus::Available);
    assert!(slot.booked_by_appointment_id.is_none());
    assert_eq!(f.count(collections::APPOINTMENTS).await, 0);
    assert!(h.calendar.created.lock().unwrap().is_empty());
    assert!(h.notifications.sent().is_empty());
}

#[tokio::test]
async fn test_unknown_references_are_rejected() {
    let h = Harness::new().await;
    let f = &h.fixture;

    let mut request = f.booking(f.slot_id);
    request.doctor_id = Uuid::new_v4();
    assert_matches!(
        h.service.create_appointment(request, &f.staff()).await,
        Err(AppointmentError::DoctorNotFound)
    );

    let mut request = f.booking(f.slot_id);
    request.patient_id = Uuid::new_v4();
    assert_matches!(
        h.service.create_appointment(request, &f.staff()).await,
        Err(AppointmentError::PatientNotFound)
    );

    assert_matches!(
        h.service.create_appointment(f.booking(Uuid::new_v4()), &f.staff()).await,
        Err(AppointmentError::SlotNotFound)
    );
    assert_eq!(f.count(collections::AUDIT_LOGS).await, 0);
}

#[tokio::test]
async fn test_slot_is_synthesized_from_date_and_time() {
    let h = Harness::new().await;
    let f = &h.fixture;

    let request: appointment_cell::models::CreateAppointmentRequest = serde_json::from_value(json!({
        "patientId": f.patient_id,
        "doctorId": f.doctor_id,
        "date": "2026-11-03",
        "startTime": "14:00:00",
        "endTime": "14:30:00",
        "type": "telehealth"
    }))
    .unwrap();

    let created = h.service.create_appointment(request.clone(), &f.staff()).await.unwrap();
    let expected_slot = synthetic_slot_id(f.doctor_id, request.date.unwrap(), time(14, 0));
    assert_eq!(created.data.field_str("timeSlotId"), expected_slot.to_string());
    assert!(created.data.field_str("videoConferenceLink").starts_with("https://meet.example.com/"));

    let slot = f.slot(expected_slot).await;
    assert_eq!(slot.status, SlotStatus::Booked);
    assert_eq!(slot.clinic_id, Some(f.clinic_id));

    assert_matches!(
        h.service.create_appointment(request, &f.staff()).await,
        Err(AppointmentError::SlotUnavailable(SlotStatus::Booked))
    );
}

#[tokio::test]
async fn test_status_change_is_audited_with_previous_and_new_status() {
    let h = Harness::new().await;
    let f = &h.fixture;
    let created = h.service.create_appointment(f.booking(f.slot_id), &f.staff()).await.unwrap();
    let id = appointment_id(&created.data);

    let updated = h
        .service
        .update_appointment(id, status_update(AppointmentStatus::CheckedIn), &f.doctor())
        .await
        .unwrap();
    assert_eq!(updated.data.status(), "checked-in");
    assert_eq!(updated.data.field_str("updatedBy"), f.doctor_user_id.to_string());

    let entries = audit_entries_for_resource(&f.store, "appointment", &id.to_string())
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].action, AuditAction::Update);
    assert_eq!(entries[1].details["previousStatus"], "scheduled");
    assert_eq!(entries[1].details["newStatus"], "checked-in");
    assert_eq!(entries[1].details["changedFields"], json!(["status"]));

    assert!(h
        .notifications
        .sent()
        .iter()
        .any(|n| n.kind == NotificationKind::StatusChanged));
    // Checking in keeps the slot.
    assert_eq!(f.slot(f.slot_id).await.status, SlotStatus::Booked);
}

#[tokio::test]
async fn test_invalid_transition_changes_nothing() {
    let h = Harness::new().await;
    let f = &h.fixture;
    let created = h.service.create_appointment(f.booking(f.slot_id), &f.staff()).await.unwrap();
    let id = appointment_id(&created.data);

    for status in [AppointmentStatus::InProgress, AppointmentStatus::Completed] {
        h.service
            .update_appointment(id, status_update(status), &f.staff())
            .await
            .unwrap();
    }

    let result = h
        .service
        .update_appointment(id, status_update(AppointmentStatus::Scheduled), &f.staff())
        .await;
    assert_matches!(
        result,
        Err(AppointmentError::InvalidStatusTransition {
            from: AppointmentStatus::Completed,
            to: AppointmentStatus::Scheduled
        })
    );

    let view = h.service.get_appointment(id).await.unwrap();
    assert_eq!(view.status(), "completed");
    assert_eq!(f.count(collections::AUDIT_LOGS).await, 3);
}

#[tokio::test]
async fn test_cancellation_frees_slot_for_another_patient() {
    let h = Harness::new().await;
    let f = &h.fixture;
    let created = h.service.create_appointment(f.booking(f.slot_id), &f.staff()).await.unwrap();
    let id = appointment_id(&created.data);

    h.service
        .update_appointment(id, status_update(AppointmentStatus::Cancelled), &f.patient())
        .await
        .unwrap();

    let slot = f.slot(f.slot_id).await;
    assert_eq!(slot.status, SlotStatus::Available);
    assert!(slot.booked_by_appointment_id.is_none());
    assert_eq!(*h.calendar.cancelled.lock().unwrap(), vec![format!("evt-{}", id)]);

    let (other_patient, _) = f.add_patient("Grace", "Hopper").await;
    let mut request = f.booking(f.slot_id);
    request.patient_id = other_patient;
    let rebooked = h.service.create_appointment(request, &f.staff()).await.unwrap();

    assert_eq!(
        f.slot(f.slot_id).await.booked_by_appointment_id,
        Some(appointment_id(&rebooked.data))
    );
}

#[tokio::test]
async fn test_moving_to_new_slot_swaps_reservations() {
    let h = Harness::new().await;
    let f = &h.fixture;
    let created = h.service.create_appointment(f.booking(f.slot_id), &f.staff()).await.unwrap();
    let id = appointment_id(&created.data);
    let new_slot = f.add_slot(day(), time(11, 30)).await;

    let moved = h
        .service
        .update_appointment(
            id,
            UpdateAppointmentRequest {
                time_slot_id: Some(new_slot),
                ..Default::default()
            },
            &f.staff(),
        )
        .await
        .unwrap();

    assert_eq!(moved.data.field_str("timeSlotId"), new_slot.to_string());
    assert_eq!(moved.data.field_str("startTime"), "11:30:00");
    assert_eq!(f.slot(f.slot_id).await.status, SlotStatus::Available);
    assert_eq!(f.slot(new_slot).await.booked_by_appointment_id, Some(id));
    assert!(h
        .notifications
        .sent()
        .iter()
        .any(|n| n.kind == NotificationKind::AppointmentRescheduled));
}

#[tokio::test]
async fn test_moving_to_booked_slot_is_rejected() {
    let h = Harness::new().await;
    let f = &h.fixture;
    let first = h.service.create_appointment(f.booking(f.slot_id), &f.staff()).await.unwrap();
    let other_slot = f.add_slot(day(), time(10, 0)).await;
    h.service
        .create_appointment(f.booking(other_slot), &f.staff())
        .await
        .unwrap();

    let result = h
        .service
        .update_appointment(
            appointment_id(&first.data),
            UpdateAppointmentRequest {
                time_slot_id: Some(other_slot),
                ..Default::default()
            },
            &f.staff(),
        )
        .await;

    assert_matches!(result, Err(AppointmentError::SlotUnavailable(SlotStatus::Booked)));
    assert_eq!(
        f.slot(f.slot_id).await.booked_by_appointment_id,
        Some(appointment_id(&first.data))
    );
}

#[tokio::test]
async fn test_delete_releases_slot_and_is_idempotent() {
    let h = Harness::new().await;
    let f = &h.fixture;
    let created = h.service.create_appointment(f.booking(f.slot_id), &f.staff()).await.unwrap();
    let id = appointment_id(&created.data);

    let deleted = h.service.delete_appointment(id, &f.staff()).await.unwrap();
    assert!(deleted.data);
    assert_eq!(f.slot(f.slot_id).await.status, SlotStatus::Available);
    assert_matches!(h.service.get_appointment(id).await, Err(AppointmentError::NotFound));

    let entries = audit_entries_for_resource(&f.store, "appointment", &id.to_string())
        .await
        .unwrap();
    let deletion = entries.last().unwrap();
    assert_eq!(deletion.action, AuditAction::Delete);
    assert_eq!(deletion.details["status"], "scheduled");
    assert_eq!(deletion.details["patientId"], f.patient_id.to_string());

    let again = h.service.delete_appointment(id, &f.staff()).await.unwrap();
    assert!(!again.data);
    assert_eq!(f.count(collections::AUDIT_LOGS).await, 2);
}

#[tokio::test]
async fn test_side_effect_failures_become_warnings() {
    let h = Harness::new().await;
    let f = &h.fixture;
    let service = AppointmentSchedulingService::new(
        f.store.clone(),
        Arc::new(FailingCalendar),
        Arc::new(FailingNotifications),
    );

    let created = service.create_appointment(f.booking(f.slot_id), &f.staff()).await.unwrap();

    assert_eq!(created.warnings.len(), 3);
    assert!(created.warnings[0].contains("Calendar"));
    assert_eq!(created.data.status(), "scheduled");
    assert_eq!(f.slot(f.slot_id).await.status, SlotStatus::Booked);
}

#[tokio::test]
async fn test_role_rules() {
    let h = Harness::new().await;
    let f = &h.fixture;
    let created = h.service.create_appointment(f.booking(f.slot_id), &f.staff()).await.unwrap();
    let id = appointment_id(&created.data);

    assert_matches!(
        h.service.delete_appointment(id, &f.doctor()).await,
        Err(AppointmentError::Forbidden(_))
    );

    let reason_change = UpdateAppointmentRequest {
        reason: Some("Different reason".to_string()),
        ..Default::default()
    };
    assert_matches!(
        h.service.update_appointment(id, reason_change, &f.patient()).await,
        Err(AppointmentError::Forbidden(_))
    );

    let mut outsider = f.staff();
    outsider.clinic_id = Some(Uuid::new_v4());
    let other_slot = f.add_slot(day(), time(15, 0)).await;
    assert_matches!(
        h.service.create_appointment(f.booking(other_slot), &outsider).await,
        Err(AppointmentError::Forbidden(_))
    );
    assert_matches!(
        h.service
            .update_appointment(id, status_update(AppointmentStatus::CheckedIn), &outsider)
            .await,
        Err(AppointmentError::Forbidden(_))
    );
}

#[tokio::test]
async fn test_operator_without_clinic_cannot_change_anything() {
    let h = Harness::new().await;
    let f = &h.fixture;
    let created = h.service.create_appointment(f.booking(f.slot_id), &f.staff()).await.unwrap();
    let id = appointment_id(&created.data);

    let mut unassigned = f.staff();
    unassigned.clinic_id = None;

    assert_matches!(
        h.service.delete_appointment(id, &unassigned).await,
        Err(AppointmentError::Forbidden(_))
    );
    assert_matches!(
        h.service
            .update_appointment(id, status_update(AppointmentStatus::Cancelled), &unassigned)
            .await,
        Err(AppointmentError::Forbidden(_))
    );
    let other_slot = f.add_slot(day(), time(15, 0)).await;
    assert_matches!(
        h.service.create_appointment(f.booking(other_slot), &unassigned).await,
        Err(AppointmentError::Forbidden(_))
    );

    let mut unassigned_admin = unassigned.clone();
    unassigned_admin.role = Role::ClinicAdmin;
    assert_matches!(
        h.service.delete_appointment(id, &unassigned_admin).await,
        Err(AppointmentError::Forbidden(_))
    );

    let current = h.service.get_appointment(id).await.unwrap();
    assert_eq!(current.status(), "scheduled");
    assert_eq!(f.slot(f.slot_id).await.status, SlotStatus::Booked);
    let entries = audit_entries_for_resource(&f.store, "appointment", &id.to_string())
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_doctors_only_change_their_own_appointments() {
    let h = Harness::new().await;
    let f = &h.fixture;
    let created = h.service.create_appointment(f.booking(f.slot_id), &f.staff()).await.unwrap();
    let id = appointment_id(&created.data);

    let colleague = f.add_doctor("Lisa", "Cuddy").await;
    assert_matches!(
        h.service
            .update_appointment(id, status_update(AppointmentStatus::NoShow), &colleague)
            .await,
        Err(AppointmentError::Forbidden(_))
    );

    let mut without_profile = f.doctor();
    without_profile.user_id = Uuid::new_v4().to_string();
    without_profile.clinic_id = None;
    assert_matches!(
        h.service
            .update_appointment(id, status_update(AppointmentStatus::NoShow), &without_profile)
            .await,
        Err(AppointmentError::Forbidden(_))
    );

    let other_slot = f.add_slot(day(), time(15, 0)).await;
    assert_matches!(
        h.service.create_appointment(f.booking(other_slot), &colleague).await,
        Err(AppointmentError::Forbidden(_))
    );

    assert_eq!(h.service.get_appointment(id).await.unwrap().status(), "scheduled");

    let checked_in = h
        .service
        .update_appointment(id, status_update(AppointmentStatus::CheckedIn), &f.doctor())
        .await
        .unwrap();
    assert_eq!(checked_in.data.status(), "checked-in");
}

#[tokio::test]
async fn test_patient_books_only_for_themselves() {
    let h = Harness::new().await;
    let f = &h.fixture;
    let (other_patient, _) = f.add_patient("Grace", "Hopper").await;

    let mut request = f.booking(f.slot_id);
    request.patient_id = other_patient;
    assert_matches!(
        h.service.create_appointment(request, &f.patient()).await,
        Err(AppointmentError::Forbidden(_))
    );

    let own = h.service.create_appointment(f.booking(f.slot_id), &f.patient()).await.unwrap();
    assert_eq!(own.data.field_str("createdBy"), f.patient_user_id.to_string());
}

#[tokio::test]
async fn test_notification_recipients_are_user_accounts() {
    let fixture = common::Fixture::seed().await;
    let notifications = Arc::new(RecordingNotifications::default());
    let service = AppointmentSchedulingService::new(
        fixture.store.clone(),
        Arc::new(appointment_cell::services::calendar::DisabledCalendarGateway),
        notifications.clone(),
    );

    let created = service
        .create_appointment(fixture.booking(fixture.slot_id), &fixture.staff())
        .await
        .unwrap();

    assert!(created.data.field_str("calendarEventId").is_empty());
    let recipients: Vec<Uuid> = notifications.sent().iter().map(|n| n.recipient_user_id).collect();
    assert!(recipients.contains(&fixture.patient_user_id));
    assert!(!recipients.contains(&fixture.patient_id));
}
