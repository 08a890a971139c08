// libs/appointment-cell/src/services/formatting.rs
//
// Shapes stored appointments, together with the patient, doctor and user
// documents joined onto them, into the structure returned by the API.
// Formatting never fails: anything malformed degrades to an empty value.
//

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use shared_database::Pipeline;
use shared_models::records::{DoctorRecord, PatientRecord, UserRecord};

use crate::models::collections;

const PATIENT_FIELD: &str = "patient";
const PATIENT_USER_FIELD: &str = "patientUser";
const DOCTOR_FIELD: &str = "doctor";
const DOCTOR_USER_FIELD: &str = "doctorUser";

const ID_FIELDS: [&str; 5] = ["id", "patientId", "doctorId", "clinicId", "timeSlotId"];

/// Adds the lookups that join patient, doctor and their user documents.
pub fn with_relations(pipeline: Pipeline) -> Pipeline {
    pipeline
        .lookup_one(collections::PATIENTS, "patientId", "id", PATIENT_FIELD)
        .lookup_one(collections::USERS, "patient.userId", "id", PATIENT_USER_FIELD)
        .lookup_one(collections::DOCTORS, "doctorId", "id", DOCTOR_FIELD)
        .lookup_one(collections::USERS, "doctor.userId", "id", DOCTOR_USER_FIELD)
}

/// A stored appointment with its optional relations split out.
#[derive(Debug, Clone, Default)]
pub struct PopulatedAppointment {
    pub appointment: Map<String, Value>,
    pub patient: Option<PatientRecord>,
    pub patient_user: Option<UserRecord>,
    pub doctor: Option<DoctorRecord>,
    pub doctor_user: Option<UserRecord>,
}

impl PopulatedAppointment {
    pub fn from_document(document: Value) -> Self {
        let Value::Object(mut appointment) = document else {
            return Self::default();
        };

        let patient = take_record(&mut appointment, PATIENT_FIELD);
        let patient_user = take_record(&mut appointment, PATIENT_USER_FIELD);
        let doctor = take_record(&mut appointment, DOCTOR_FIELD);
        let doctor_user = take_record(&mut appointment, DOCTOR_USER_FIELD);

        Self {
            appointment,
            patient,
            patient_user,
            doctor,
            doctor_user,
        }
    }
}

fn take_record<T: serde::de::DeserializeOwned>(fields: &mut Map<String, Value>, key: &str) -> Option<T> {
    fields
        .remove(key)
        .filter(|value| !value.is_null())
        .and_then(|value| serde_json::from_value(value).ok())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersonSummary {
    pub id: String,
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentView {
    /// Every stored appointment field, with `date` as `YYYY-MM-DD` and id
    /// references as plain strings.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub patient_name: String,
    pub doctor_name: String,
    pub patient: Option<PersonSummary>,
    pub doctor: Option<PersonSummary>,
}

impl AppointmentView {
    pub fn id(&self) -> &str {
        self.fields.get("id").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn status(&self) -> &str {
        self.fields.get("status").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn date(&self) -> &str {
        self.fields.get("date").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn field_str(&self, field: &str) -> &str {
        self.fields.get(field).and_then(Value::as_str).unwrap_or_default()
    }
}

pub fn format_document(document: Value) -> AppointmentView {
    format_appointment(PopulatedAppointment::from_document(document))
}

pub fn format_appointment(populated: PopulatedAppointment) -> AppointmentView {
    let PopulatedAppointment {
        mut appointment,
        patient,
        patient_user,
        doctor,
        doctor_user,
    } = populated;

    // An embedded relation in place of the id still yields the raw id.
    let patient = patient.or_else(|| embedded_record(&appointment, "patientId"));
    let doctor = doctor.or_else(|| embedded_record(&appointment, "doctorId"));

    appointment.remove("patientName");
    appointment.remove("doctorName");

    let date = appointment.get("date").map(format_date).unwrap_or_default();
    appointment.insert("date".to_string(), Value::String(date));

    for field in ID_FIELDS {
        if let Some(value) = appointment.get(field) {
            let id = id_string(value);
            appointment.insert(field.to_string(), Value::String(id));
        }
    }

    let patient_name = patient_user.as_ref().map(UserRecord::full_name).unwrap_or_default();
    let doctor_name = doctor_user.as_ref().map(UserRecord::full_name).unwrap_or_default();

    AppointmentView {
        fields: appointment,
        patient_name,
        doctor_name,
        patient: patient.map(|record| {
            summarize(record.id.to_string(), record.user_id.to_string(), patient_user.as_ref())
        }),
        doctor: doctor.map(|record| {
            summarize(record.id.to_string(), record.user_id.to_string(), doctor_user.as_ref())
        }),
    }
}

fn embedded_record<T: serde::de::DeserializeOwned>(fields: &Map<String, Value>, key: &str) -> Option<T> {
    match fields.get(key) {
        Some(value @ Value::Object(_)) => serde_json::from_value(value.clone()).ok(),
        _ => None,
    }
}

fn summarize(id: String, user_id: String, user: Option<&UserRecord>) -> PersonSummary {
    PersonSummary {
        id,
        user_id,
        first_name: user.map(|u| u.first_name.clone()).unwrap_or_default(),
        last_name: user.map(|u| u.last_name.clone()).unwrap_or_default(),
        email: user.and_then(|u| u.email.clone()),
    }
}

/// `YYYY-MM-DD` for anything that reads as a date, empty otherwise.
pub fn format_date(value: &Value) -> String {
    parse_date(value)
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(raw) => {
            let raw = raw.trim();
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
                .or_else(|| raw.get(..10).and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()))
        }
        Value::Number(millis) => millis
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| dt.date_naive()),
        Value::Object(map) => map.get("$date").and_then(parse_date),
        _ => None,
    }
}

fn id_string(value: &Value) -> String {
    match value {
        Value::String(id) => id.clone(),
        Value::Number(n) => n.to_string(),
        Value::Object(map) => map
            .get("id")
            .or_else(|| map.get("_id"))
            .map(id_string)
            .unwrap_or_default(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_format_date_variants() {
        assert_eq!(format_date(&json!("2026-11-02")), "2026-11-02");
        assert_eq!(format_date(&json!("2026-11-02T09:30:00Z")), "2026-11-02");
        assert_eq!(format_date(&json!("2026-11-02 09:30")), "2026-11-02");
        assert_eq!(format_date(&json!({"$date": "2026-11-02T00:00:00+00:00"})), "2026-11-02");
        assert_eq!(format_date(&json!(1793577600000_i64)), "2026-11-02");
    }

    #[test]
    fn test_format_date_never_fails() {
        for garbage in [
            json!(null),
            json!({}),
            json!([]),
            json!(true),
            json!("not a date"),
            json!("2026-13-45"),
            json!("é"),
            json!(""),
        ] {
            assert_eq!(format_date(&garbage), "");
        }
    }

    #[test]
    fn test_preserves_fields_and_flattens_names() {
        let patient_user = Uuid::new_v4();
        let patient_id = Uuid::new_v4();
        let document = json!({
            "id": Uuid::new_v4(),
            "patientId": patient_id,
            "doctorId": Uuid::new_v4(),
            "date": "2026-11-02T00:00:00Z",
            "status": "scheduled",
            "reason": "Annual check",
            "customField": 42,
            "patient": {"id": patient_id, "userId": patient_user},
            "patientUser": {"id": patient_user, "firstName": "Ada", "lastName": "Lovelace"},
            "doctor": null,
            "doctorUser": null
        });

        let view = format_document(document);
        assert_eq!(view.date(), "2026-11-02");
        assert_eq!(view.patient_name, "Ada Lovelace");
        assert_eq!(view.doctor_name, "");
        assert_eq!(view.fields["customField"], 42);
        assert_eq!(view.field_str("reason"), "Annual check");
        assert_eq!(view.field_str("patientId"), patient_id.to_string());
        assert!(view.doctor.is_none());
        assert_eq!(view.patient.as_ref().unwrap().first_name, "Ada");
        assert!(!view.fields.contains_key("patientUser"));
    }

    #[test]
    fn test_embedded_relation_becomes_raw_id() {
        let patient_id = Uuid::new_v4();
        let document = json!({
            "id": "a1",
            "patientId": {"id": patient_id, "userId": Uuid::new_v4()},
            "date": {"unexpected": true}
        });

        let view = format_document(document);
        assert_eq!(view.field_str("patientId"), patient_id.to_string());
        assert_eq!(view.date(), "");
        assert_eq!(view.patient.unwrap().id, patient_id.to_string());
    }

    #[test]
    fn test_non_object_document_formats_empty() {
        let view = format_document(json!("broken"));
        assert_eq!(view.id(), "");
        assert_eq!(view.date(), "");
    }
}
