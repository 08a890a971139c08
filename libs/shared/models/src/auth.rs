use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub clinic_id: Option<String>,
    pub user_metadata: Option<serde_json::Value>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    ClinicAdmin,
    Staff,
    Doctor,
    Patient,
    Unknown,
}

impl Role {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
            Some("admin") => Role::Admin,
            Some("clinic_admin") | Some("clinicadmin") => Role::ClinicAdmin,
            Some("staff") | Some("receptionist") => Role::Staff,
            Some("doctor") => Role::Doctor,
            Some("patient") => Role::Patient,
            _ => Role::Unknown,
        }
    }

    /// Roles that run the front desk of a clinic.
    pub fn is_clinic_operator(&self) -> bool {
        matches!(self, Role::Admin | Role::ClinicAdmin | Role::Staff)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub clinic_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn role(&self) -> Role {
        Role::parse(self.role.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!(Role::parse(Some("admin")), Role::Admin);
        assert_eq!(Role::parse(Some("Clinic_Admin")), Role::ClinicAdmin);
        assert_eq!(Role::parse(Some("receptionist")), Role::Staff);
        assert_eq!(Role::parse(Some("doctor")), Role::Doctor);
        assert_eq!(Role::parse(None), Role::Unknown);
        assert!(Role::Staff.is_clinic_operator());
        assert!(!Role::Doctor.is_clinic_operator());
    }
}
