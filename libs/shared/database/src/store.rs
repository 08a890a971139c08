// libs/shared/database/src/store.rs
//
// Document store with multi-document transactions.
//
// Every stored document carries the sequence number of the commit that last
// wrote it. A transaction remembers the version of each document it read and
// the commit is rejected with a write conflict when any of them moved, so two
// transactions that read the same time slot can never both commit.
//

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::error::{DatabaseError, DbResult};
use crate::query::{run_pipeline, Filter, Pipeline};
use crate::session::ClientSession;

const SNAPSHOT_FILE: &str = "store.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredDocument {
    pub version: u64,
    pub body: Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    sequence: u64,
    collections: HashMap<String, BTreeMap<Uuid, StoredDocument>>,
}

impl StoreState {
    fn get(&self, collection: &str, id: &Uuid) -> Option<&StoredDocument> {
        self.collections.get(collection).and_then(|docs| docs.get(id))
    }

    fn version(&self, collection: &str, id: &Uuid) -> u64 {
        self.get(collection, id).map(|doc| doc.version).unwrap_or(0)
    }

    fn documents(&self, collection: &str) -> Vec<&Value> {
        self.collections
            .get(collection)
            .map(|docs| docs.values().map(|doc| &doc.body).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct DocKey {
    pub collection: String,
    pub id: Uuid,
}

impl DocKey {
    pub fn new(collection: &str, id: Uuid) -> Self {
        Self {
            collection: collection.to_string(),
            id,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum WriteOp {
    Insert(Value),
    Replace(Value),
    Delete,
}

struct StoreInner {
    state: RwLock<StoreState>,
    snapshot_path: Option<PathBuf>,
    next_session_id: AtomicU64,
}

#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<StoreInner>,
}

impl DocumentStore {
    pub fn in_memory() -> Self {
        Self::with_state(StoreState::default(), None)
    }

    /// Opens a store persisted under `data_dir`, loading the last snapshot.
    pub async fn open(data_dir: impl AsRef<Path>) -> DbResult<Self> {
        let data_dir = data_dir.as_ref();
        tokio::fs::create_dir_all(data_dir).await?;

        let path = data_dir.join(SNAPSHOT_FILE);
        let state: StoreState = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };

        info!(
            "Opened document store at {} ({} collections, sequence {})",
            path.display(),
            state.collections.len(),
            state.sequence
        );

        Ok(Self::with_state(state, Some(path)))
    }

    pub async fn connect(config: &AppConfig) -> DbResult<Self> {
        match &config.data_dir {
            Some(dir) => Self::open(dir).await,
            None => Ok(Self::in_memory()),
        }
    }

    fn with_state(state: StoreState, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(state),
                snapshot_path,
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn start_session(&self) -> ClientSession {
        let id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        debug!("Starting session {}", id);
        ClientSession::new(self.clone(), id)
    }

    pub async fn find_by_id(&self, collection: &str, id: Uuid) -> DbResult<Option<Value>> {
        let state = self.inner.state.read().await;
        Ok(state.get(collection, &id).map(|doc| doc.body.clone()))
    }

    pub async fn find(&self, collection: &str, filter: &Filter) -> DbResult<Vec<Value>> {
        let state = self.inner.state.read().await;
        Ok(state
            .documents(collection)
            .into_iter()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect())
    }

    /// Single-document insert, atomic on its own.
    pub async fn insert_one(&self, collection: &str, document: Value) -> DbResult<Uuid> {
        let id = document_id(&document)?;
        let mut writes = BTreeMap::new();
        writes.insert(DocKey::new(collection, id), WriteOp::Insert(document));
        self.commit(&HashMap::new(), writes).await?;
        Ok(id)
    }

    /// Single-document update outside any transaction. Returns the updated
    /// document, or `None` when it does not exist.
    pub async fn update_by_id(
        &self,
        collection: &str,
        id: Uuid,
        changes: Map<String, Value>,
    ) -> DbResult<Option<Value>> {
        let mut state = self.inner.state.write().await;
        let Some(current) = state.get(collection, &id) else {
            return Ok(None);
        };

        let updated = merge_changes(&current.body, changes)?;
        let mut writes = BTreeMap::new();
        writes.insert(DocKey::new(collection, id), WriteOp::Replace(updated.clone()));
        self.apply_locked(&mut state, &HashMap::new(), writes).await?;

        Ok(Some(updated))
    }

    pub async fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> DbResult<Vec<Value>> {
        let state = self.inner.state.read().await;
        let documents = state.documents(collection).into_iter().cloned().collect();
        Ok(run_pipeline(documents, pipeline, |name| state.documents(name)))
    }

    pub(crate) async fn read_versioned(&self, collection: &str, id: Uuid) -> (u64, Option<Value>) {
        let state = self.inner.state.read().await;
        match state.get(collection, &id) {
            Some(doc) => (doc.version, Some(doc.body.clone())),
            None => (0, None),
        }
    }

    pub(crate) async fn scan_versioned(&self, collection: &str) -> Vec<(Uuid, u64, Value)> {
        let state = self.inner.state.read().await;
        state
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, doc)| (*id, doc.version, doc.body.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) async fn commit(
        &self,
        reads: &HashMap<DocKey, u64>,
        writes: BTreeMap<DocKey, WriteOp>,
    ) -> DbResult<u64> {
        let mut state = self.inner.state.write().await;
        self.apply_locked(&mut state, reads, writes).await
    }

    async fn apply_locked(
        &self,
        state: &mut StoreState,
        reads: &HashMap<DocKey, u64>,
        writes: BTreeMap<DocKey, WriteOp>,
    ) -> DbResult<u64> {
        for (key, seen) in reads {
            if state.version(&key.collection, &key.id) != *seen {
                return Err(DatabaseError::WriteConflict {
                    collection: key.collection.clone(),
                    id: key.id,
                });
            }
        }

        for (key, op) in &writes {
            if matches!(op, WriteOp::Insert(_)) && state.get(&key.collection, &key.id).is_some() {
                return Err(DatabaseError::DuplicateKey {
                    collection: key.collection.clone(),
                    id: key.id,
                });
            }
        }

        if writes.is_empty() {
            return Ok(state.sequence);
        }

        let sequence = state.sequence + 1;
        let mut undo: Vec<(DocKey, Option<StoredDocument>)> = Vec::with_capacity(writes.len());

        for (key, op) in writes {
            let docs = state.collections.entry(key.collection.clone()).or_default();
            let previous = match op {
                WriteOp::Insert(body) | WriteOp::Replace(body) => docs.insert(
                    key.id,
                    StoredDocument {
                        version: sequence,
                        body,
                    },
                ),
                WriteOp::Delete => docs.remove(&key.id),
            };
            undo.push((key, previous));
        }
        state.sequence = sequence;

        if let Some(path) = &self.inner.snapshot_path {
            if let Err(e) = persist_snapshot(path, state).await {
                error!("Failed to persist snapshot, rolling back commit {}: {}", sequence, e);
                for (key, previous) in undo.into_iter().rev() {
                    let docs = state.collections.entry(key.collection).or_default();
                    match previous {
                        Some(doc) => {
                            docs.insert(key.id, doc);
                        }
                        None => {
                            docs.remove(&key.id);
                        }
                    }
                }
                state.sequence = sequence - 1;
                return Err(e);
            }
        }

        debug!("Committed sequence {}", sequence);
        Ok(sequence)
    }
}

async fn persist_snapshot(path: &Path, state: &StoreState) -> DbResult<()> {
    let bytes = serde_json::to_vec(state)?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

pub(crate) fn document_id(document: &Value) -> DbResult<Uuid> {
    document
        .get("id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| DatabaseError::InvalidDocument("document has no valid 'id' field".to_string()))
}

pub(crate) fn merge_changes(current: &Value, changes: Map<String, Value>) -> DbResult<Value> {
    let Value::Object(existing) = current else {
        return Err(DatabaseError::InvalidDocument("stored document is not an object".to_string()));
    };

    let mut merged = existing.clone();
    for (field, value) in changes {
        if field == "id" {
            continue;
        }
        merged.insert(field, value);
    }

    Ok(Value::Object(merged))
}
