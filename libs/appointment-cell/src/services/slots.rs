// libs/appointment-cell/src/services/slots.rs
use chrono::{NaiveDate, NaiveTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::{ClientSession, DocumentStore, Filter};

use crate::models::{collections, AppointmentError, SlotStatus, TimeSlot};

// Namespace for slot ids derived from doctor, date and start time.
const SLOT_NAMESPACE: Uuid = Uuid::from_u128(0x8d3f_52a1_6c0e_4b7a_9f21_3e5d_c4a0_7b19);

/// Deterministic id of the slot a doctor has on `date` at `start_time`. Two
/// requests that synthesize the same slot produce the same id, so only one
/// of them can commit it.
pub fn synthetic_slot_id(doctor_id: Uuid, date: NaiveDate, start_time: NaiveTime) -> Uuid {
    let name = format!("{}:{}:{}", doctor_id, date, start_time.format("%H:%M"));
    Uuid::new_v5(&SLOT_NAMESPACE, name.as_bytes())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SlotService;

impl SlotService {
    pub fn new() -> Self {
        Self
    }

    pub async fn load_slot(
        &self,
        session: &mut ClientSession,
        slot_id: Uuid,
    ) -> Result<TimeSlot, AppointmentError> {
        let document = session
            .find_by_id(collections::TIME_SLOTS, slot_id)
            .await?
            .ok_or(AppointmentError::SlotNotFound)?;
        Ok(serde_json::from_value(document)?)
    }

    /// Finds the doctor's slot starting at `start_time` on `date`, creating
    /// it when none exists yet.
    pub async fn resolve_slot(
        &self,
        session: &mut ClientSession,
        doctor_id: Uuid,
        clinic_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<TimeSlot, AppointmentError> {
        let slot_id = synthetic_slot_id(doctor_id, date, start_time);
        if let Some(document) = session.find_by_id(collections::TIME_SLOTS, slot_id).await? {
            debug!("Reusing synthesized slot {}", slot_id);
            return Ok(serde_json::from_value(document)?);
        }

        let existing = session
            .find_one(
                collections::TIME_SLOTS,
                &Filter::And(vec![
                    Filter::eq("doctorId", doctor_id.to_string()),
                    Filter::eq("date", json!(date)),
                    Filter::eq("startTime", json!(start_time)),
                    Filter::ne("status", SlotStatus::Cancelled.as_str()),
                ]),
            )
            .await?;
        if let Some(document) = existing {
            debug!("Found existing slot for doctor {} on {} at {}", doctor_id, date, start_time);
            return Ok(serde_json::from_value(document)?);
        }

        let now = Utc::now();
        let slot = TimeSlot {
            id: slot_id,
            doctor_id,
            clinic_id: Some(clinic_id),
            date,
            start_time,
            end_time,
            status: SlotStatus::Available,
            booked_by_appointment_id: None,
            created_at: now,
            updated_at: now,
        };
        session
            .insert_one(collections::TIME_SLOTS, serde_json::to_value(&slot)?)
            .await?;

        info!("Created time slot {} for doctor {} on {} at {}", slot.id, doctor_id, date, start_time);
        Ok(slot)
    }

    /// Marks `slot` booked by `appointment_id`. The slot must have been read
    /// through the same session.
    pub async fn reserve(
        &self,
        session: &mut ClientSession,
        slot: &TimeSlot,
        appointment_id: Uuid,
    ) -> Result<(), AppointmentError> {
        if !slot.is_available() {
            warn!("Time slot {} is not available ({})", slot.id, slot.status);
            return Err(AppointmentError::SlotUnavailable(slot.status));
        }

        let mut changes = Map::new();
        changes.insert("status".to_string(), json!(SlotStatus::Booked));
        changes.insert("bookedByAppointmentId".to_string(), json!(appointment_id));
        changes.insert("updatedAt".to_string(), json!(Utc::now()));

        if !session.update_by_id(collections::TIME_SLOTS, slot.id, changes).await? {
            return Err(AppointmentError::SlotNotFound);
        }

        debug!("Reserved slot {} for appointment {}", slot.id, appointment_id);
        Ok(())
    }

    /// Returns the slot to `available` when it is held by `appointment_id`.
    /// A slot held by another appointment is left alone.
    pub async fn release(
        &self,
        session: &mut ClientSession,
        slot_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<bool, AppointmentError> {
        let Some(document) = session.find_by_id(collections::TIME_SLOTS, slot_id).await? else {
            warn!("Slot {} of appointment {} no longer exists", slot_id, appointment_id);
            return Ok(false);
        };
        let slot: TimeSlot = serde_json::from_value(document)?;

        match slot.booked_by_appointment_id {
            Some(holder) if holder != appointment_id => {
                warn!(
                    "Slot {} is held by appointment {}, not releasing it for {}",
                    slot_id, holder, appointment_id
                );
                return Ok(false);
            }
            _ => {}
        }

        let mut changes = Map::new();
        changes.insert("status".to_string(), json!(SlotStatus::Available));
        changes.insert("bookedByAppointmentId".to_string(), Value::Null);
        changes.insert("updatedAt".to_string(), json!(Utc::now()));
        session.update_by_id(collections::TIME_SLOTS, slot_id, changes).await?;

        debug!("Released slot {} from appointment {}", slot_id, appointment_id);
        Ok(true)
    }

    pub async fn get_time_slot(
        &self,
        store: &DocumentStore,
        slot_id: Uuid,
    ) -> Result<TimeSlot, AppointmentError> {
        let document = store
            .find_by_id(collections::TIME_SLOTS, slot_id)
            .await?
            .ok_or(AppointmentError::SlotNotFound)?;
        Ok(serde_json::from_value(document)?)
    }
}
