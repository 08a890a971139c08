// libs/appointment-cell/src/services/access.rs
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_database::{DocumentStore, Filter};
use shared_models::auth::{Role, User};

use crate::models::{collections, Appointment, AppointmentError};
use crate::services::formatting::AppointmentView;

/// The authenticated caller behind a mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
    pub clinic_id: Option<Uuid>,
}

impl Actor {
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            role: user.role(),
            clinic_id: user.clinic_id.as_deref().and_then(|id| Uuid::parse_str(id).ok()),
        }
    }

    /// Background jobs act with admin rights under this id.
    pub fn system() -> Self {
        Self {
            user_id: "system".to_string(),
            role: Role::Admin,
            clinic_id: None,
        }
    }

    pub fn can_create(&self) -> bool {
        !matches!(self.role, Role::Unknown)
    }

    pub fn can_update(&self) -> bool {
        !matches!(self.role, Role::Unknown)
    }

    pub fn can_delete(&self) -> bool {
        self.role.is_clinic_operator()
    }
}

/// The appointments a caller may read.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessScope {
    All,
    Clinic(Uuid),
    Doctor(Uuid),
    Patient(Uuid),
}

impl AccessScope {
    pub fn filter(&self) -> Option<Filter> {
        match self {
            AccessScope::All => None,
            AccessScope::Clinic(id) => Some(Filter::eq("clinicId", id.to_string())),
            AccessScope::Doctor(id) => Some(Filter::eq("doctorId", id.to_string())),
            AccessScope::Patient(id) => Some(Filter::eq("patientId", id.to_string())),
        }
    }

    pub fn permits(&self, view: &AppointmentView) -> bool {
        match self {
            AccessScope::All => true,
            AccessScope::Clinic(id) => view.field_str("clinicId") == id.to_string(),
            AccessScope::Doctor(id) => view.field_str("doctorId") == id.to_string(),
            AccessScope::Patient(id) => view.field_str("patientId") == id.to_string(),
        }
    }

    /// Same rule as `permits`, applied to a stored appointment before it is changed.
    pub fn covers(&self, appointment: &Appointment) -> bool {
        match self {
            AccessScope::All => true,
            AccessScope::Clinic(id) => appointment.clinic_id == *id,
            AccessScope::Doctor(id) => appointment.doctor_id == *id,
            AccessScope::Patient(id) => appointment.patient_id == *id,
        }
    }
}

pub async fn resolve_scope(store: &DocumentStore, actor: &Actor) -> Result<AccessScope, AppointmentError> {
    let scope = match actor.role {
        Role::Admin => AccessScope::All,
        Role::ClinicAdmin | Role::Staff => AccessScope::Clinic(actor.clinic_id.ok_or_else(|| {
            AppointmentError::Forbidden("No clinic is associated with this account".to_string())
        })?),
        Role::Doctor => AccessScope::Doctor(
            profile_id_for_user(store, collections::DOCTORS, &actor.user_id)
                .await?
                .ok_or_else(|| AppointmentError::Forbidden("No doctor profile for this account".to_string()))?,
        ),
        Role::Patient => AccessScope::Patient(
            profile_id_for_user(store, collections::PATIENTS, &actor.user_id)
                .await?
                .ok_or_else(|| AppointmentError::Forbidden("No patient profile for this account".to_string()))?,
        ),
        Role::Unknown => {
            return Err(AppointmentError::Forbidden("Unrecognized role".to_string()));
        }
    };

    debug!("Resolved access scope {:?} for user {}", scope, actor.user_id);
    Ok(scope)
}

/// Id of the patient or doctor profile owned by `user_id`.
pub async fn profile_id_for_user(
    store: &DocumentStore,
    collection: &str,
    user_id: &str,
) -> Result<Option<Uuid>, AppointmentError> {
    let profiles = store.find(collection, &Filter::eq("userId", user_id)).await?;
    Ok(profiles
        .first()
        .and_then(|profile| profile.get("id"))
        .and_then(Value::as_str)
        .and_then(|id| Uuid::parse_str(id).ok()))
}
