// libs/appointment-cell/src/services/audit.rs
use async_trait::async_trait;
use tracing::info;

use shared_database::{ClientSession, DocumentStore, Filter};

use crate::models::{collections, AppointmentError, AuditLogEntry};

/// Append-only record of who did what to which resource. Entries are written
/// through the caller's session so they commit or abort with the mutation
/// they describe.
#[async_trait]
pub trait AuditTrail: Send + Sync {
    async fn record(
        &self,
        session: &mut ClientSession,
        entry: AuditLogEntry,
    ) -> Result<(), AppointmentError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentAuditTrail;

#[async_trait]
impl AuditTrail for DocumentAuditTrail {
    async fn record(
        &self,
        session: &mut ClientSession,
        entry: AuditLogEntry,
    ) -> Result<(), AppointmentError> {
        let document = serde_json::to_value(&entry)?;
        session.insert_one(collections::AUDIT_LOGS, document).await?;

        info!(
            audit_id = %entry.id,
            user_id = %entry.user_id,
            resource_id = %entry.resource_id,
            resource_type = %entry.resource_type,
            "AUDIT: {} {}", entry.action, entry.resource_type
        );
        Ok(())
    }
}

/// Committed audit entries for one resource, oldest first.
pub async fn audit_entries_for_resource(
    store: &DocumentStore,
    resource_type: &str,
    resource_id: &str,
) -> Result<Vec<AuditLogEntry>, AppointmentError> {
    let documents = store
        .find(
            collections::AUDIT_LOGS,
            &Filter::And(vec![
                Filter::eq("resourceType", resource_type),
                Filter::eq("resourceId", resource_id),
            ]),
        )
        .await?;

    let mut entries = documents
        .into_iter()
        .map(serde_json::from_value::<AuditLogEntry>)
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.timestamp);
    Ok(entries)
}
