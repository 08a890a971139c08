//! Read-only directory records owned by the patient, doctor, user and clinic
//! services. Scheduling only ever reads them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod collections {
    pub const USERS: &str = "users";
    pub const PATIENTS: &str = "patients";
    pub const DOCTORS: &str = "doctors";
    pub const CLINICS: &str = "clinics";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: Uuid,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub clinic_id: Option<Uuid>,
}

impl UserRecord {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub clinic_id: Option<Uuid>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub medical_record_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub clinic_id: Option<Uuid>,
    #[serde(default)]
    pub specialization: Option<String>,
    /// Identity of the doctor's connected calendar, when any.
    #[serde(default)]
    pub calendar_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicRecord {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_full_name_trims_missing_parts() {
        let user: UserRecord = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "firstName": "Ada"
        }))
        .unwrap();

        assert_eq!(user.full_name(), "Ada");
        assert!(user.email.is_none());
    }
}
