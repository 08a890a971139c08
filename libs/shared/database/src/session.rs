// libs/shared/database/src/session.rs
//
// Client session bound to one transaction at a time. Writes stay private to
// the session until commit; reads see the session's own pending writes.
//

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DatabaseError, DbResult};
use crate::query::Filter;
use crate::store::{document_id, merge_changes, DocKey, DocumentStore, WriteOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    None,
    InProgress,
    Committed,
    Aborted,
}

pub struct ClientSession {
    id: u64,
    store: DocumentStore,
    state: TransactionState,
    reads: HashMap<DocKey, u64>,
    writes: BTreeMap<DocKey, WriteOp>,
    ended: bool,
}

impl ClientSession {
    pub(crate) fn new(store: DocumentStore, id: u64) -> Self {
        Self {
            id,
            store,
            state: TransactionState::None,
            reads: HashMap::new(),
            writes: BTreeMap::new(),
            ended: false,
        }
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.state
    }

    pub fn in_transaction(&self) -> bool {
        self.state == TransactionState::InProgress
    }

    pub fn start_transaction(&mut self) -> DbResult<()> {
        if self.ended {
            return Err(DatabaseError::TransactionState(format!("session {} has ended", self.id)));
        }
        if self.in_transaction() {
            return Err(DatabaseError::TransactionState(format!(
                "session {} already has a transaction in progress",
                self.id
            )));
        }

        self.reads.clear();
        self.writes.clear();
        self.state = TransactionState::InProgress;
        debug!("Session {} started a transaction", self.id);
        Ok(())
    }

    pub async fn find_by_id(&mut self, collection: &str, id: Uuid) -> DbResult<Option<Value>> {
        self.ensure_active()?;
        let key = DocKey::new(collection, id);

        if let Some(op) = self.writes.get(&key) {
            return Ok(match op {
                WriteOp::Insert(body) | WriteOp::Replace(body) => Some(body.clone()),
                WriteOp::Delete => None,
            });
        }

        let (version, body) = self.store.read_versioned(collection, id).await;
        self.reads.entry(key).or_insert(version);
        Ok(body)
    }

    /// First document matching `filter`, seen through this transaction.
    pub async fn find_one(&mut self, collection: &str, filter: &Filter) -> DbResult<Option<Value>> {
        self.ensure_active()?;

        for (key, op) in self.writes.range(DocKey::new(collection, Uuid::nil())..) {
            if key.collection != collection {
                break;
            }
            if let WriteOp::Insert(body) | WriteOp::Replace(body) = op {
                if filter.matches(body) {
                    return Ok(Some(body.clone()));
                }
            }
        }

        for (id, version, body) in self.store.scan_versioned(collection).await {
            let key = DocKey::new(collection, id);
            if self.writes.contains_key(&key) {
                continue;
            }
            if filter.matches(&body) {
                self.reads.entry(key).or_insert(version);
                return Ok(Some(body));
            }
        }

        Ok(None)
    }

    pub async fn insert_one(&mut self, collection: &str, document: Value) -> DbResult<Uuid> {
        self.ensure_active()?;
        let id = document_id(&document)?;
        let key = DocKey::new(collection, id);

        match self.writes.get(&key) {
            Some(WriteOp::Insert(_)) | Some(WriteOp::Replace(_)) => {
                return Err(DatabaseError::DuplicateKey {
                    collection: collection.to_string(),
                    id,
                });
            }
            Some(WriteOp::Delete) => {
                self.writes.insert(key, WriteOp::Replace(document));
                return Ok(id);
            }
            None => {}
        }

        let (version, existing) = self.store.read_versioned(collection, id).await;
        if existing.is_some() {
            return Err(DatabaseError::DuplicateKey {
                collection: collection.to_string(),
                id,
            });
        }
        self.reads.entry(key.clone()).or_insert(version);
        self.writes.insert(key, WriteOp::Insert(document));
        Ok(id)
    }

    pub async fn insert_many(&mut self, collection: &str, documents: Vec<Value>) -> DbResult<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            ids.push(self.insert_one(collection, document).await?);
        }
        Ok(ids)
    }

    /// Applies `changes` to the document and returns it as it looks after the
    /// update, or `None` when it does not exist.
    pub async fn find_one_and_update(
        &mut self,
        collection: &str,
        id: Uuid,
        changes: Map<String, Value>,
    ) -> DbResult<Option<Value>> {
        let Some(current) = self.find_by_id(collection, id).await? else {
            return Ok(None);
        };

        let updated = merge_changes(&current, changes)?;
        let key = DocKey::new(collection, id);
        let op = match self.writes.get(&key) {
            Some(WriteOp::Insert(_)) => WriteOp::Insert(updated.clone()),
            _ => WriteOp::Replace(updated.clone()),
        };
        self.writes.insert(key, op);

        Ok(Some(updated))
    }

    pub async fn update_by_id(
        &mut self,
        collection: &str,
        id: Uuid,
        changes: Map<String, Value>,
    ) -> DbResult<bool> {
        Ok(self.find_one_and_update(collection, id, changes).await?.is_some())
    }

    pub async fn delete_by_id(&mut self, collection: &str, id: Uuid) -> DbResult<bool> {
        if self.find_by_id(collection, id).await?.is_none() {
            return Ok(false);
        }

        let key = DocKey::new(collection, id);
        if let Some(WriteOp::Insert(_)) = self.writes.get(&key) {
            self.writes.remove(&key);
        } else {
            self.writes.insert(key, WriteOp::Delete);
        }
        Ok(true)
    }

    pub async fn commit_transaction(&mut self) -> DbResult<()> {
        self.ensure_active()?;

        let reads = std::mem::take(&mut self.reads);
        let writes = std::mem::take(&mut self.writes);
        let write_count = writes.len();

        match self.store.commit(&reads, writes).await {
            Ok(sequence) => {
                self.state = TransactionState::Committed;
                debug!(
                    "Session {} committed {} writes at sequence {}",
                    self.id, write_count, sequence
                );
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::Aborted;
                warn!("Session {} failed to commit: {}", self.id, e);
                Err(e)
            }
        }
    }

    pub async fn abort_transaction(&mut self) -> DbResult<()> {
        self.ensure_active()?;
        let discarded = self.writes.len();
        self.reads.clear();
        self.writes.clear();
        self.state = TransactionState::Aborted;
        debug!("Session {} aborted, discarded {} writes", self.id, discarded);
        Ok(())
    }

    /// Ends the session, aborting any transaction still in progress.
    pub fn end_session(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.ended {
            return;
        }
        if self.in_transaction() {
            debug!("Session {} ended with an open transaction, aborting", self.id);
            self.reads.clear();
            self.writes.clear();
            self.state = TransactionState::Aborted;
        }
        self.ended = true;
    }

    fn ensure_active(&self) -> DbResult<()> {
        if self.in_transaction() {
            Ok(())
        } else {
            Err(DatabaseError::TransactionState(format!(
                "session {} has no transaction in progress ({:?})",
                self.id, self.state
            )))
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if !self.ended && self.in_transaction() {
            warn!("Session {} dropped without being ended, discarding its transaction", self.id);
        }
        self.close();
    }
}
