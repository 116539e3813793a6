//! The bounded store — every learned document, under a hard byte ceiling.
//!
//! Records are kept in insertion order. After each insert the store evicts
//! the oldest records until the summed `size_bytes` is back under the
//! eviction threshold, then rewrites the store file. Readers take an
//! immutable [`StoreSnapshot`]; the snapshot is rebuilt once per mutation and
//! shared behind an `Arc`.

use crate::citation::find_citation;
use crate::persist::{self, Persister};
use chrono::Utc;
use localmind_core::error::{MemoryError, PersistenceWarning};
use localmind_core::{DomainEvent, EventBus, KnowledgeRecord, RecordSummary};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Capacity and locking knobs for a [`BoundedStore`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreSettings {
    pub capacity_bytes: usize,
    /// Eviction runs while `total > eviction_trigger * capacity`
    pub eviction_trigger: f64,
    pub lock_timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            capacity_bytes: 2000 * 1024,
            eviction_trigger: 1.0,
            lock_timeout: Duration::from_millis(2000),
        }
    }
}

impl StoreSettings {
    fn threshold(&self) -> f64 {
        self.capacity_bytes as f64 * self.eviction_trigger
    }
}

/// Point-in-time, ordered view of the store (oldest first).
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    records: Vec<KnowledgeRecord>,
    total_bytes: usize,
    capacity_bytes: usize,
}

impl StoreSnapshot {
    /// Build a snapshot directly from records, oldest first.
    pub fn from_records(records: Vec<KnowledgeRecord>, capacity_bytes: usize) -> Self {
        let total_bytes = records.iter().map(KnowledgeRecord::size_bytes).sum();
        Self {
            records,
            total_bytes,
            capacity_bytes,
        }
    }

    pub fn records(&self) -> &[KnowledgeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn get(&self, id: &str) -> Option<&KnowledgeRecord> {
        self.records.iter().find(|r| r.id() == id)
    }

    /// Raw excerpt kept for citations.
    pub fn excerpt(&self, id: &str) -> Option<&str> {
        self.get(id).map(KnowledgeRecord::excerpt)
    }

    pub fn list(&self) -> Vec<RecordSummary> {
        self.records.iter().map(KnowledgeRecord::summarize).collect()
    }
}

/// What an insert did.
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    pub id: String,
    /// The id already existed and its record was overwritten in place
    pub replaced: bool,
    /// Records evicted to make room, oldest first
    pub evicted: Vec<RecordSummary>,
    pub total_bytes: usize,
    /// Set when the store file could not be written
    pub persistence: Option<PersistenceWarning>,
}

/// What a remove did.
#[derive(Debug, Clone)]
pub struct RemoveOutcome {
    /// `None` when the id was not stored
    pub removed: Option<RecordSummary>,
    pub total_bytes: usize,
    pub persistence: Option<PersistenceWarning>,
}

/// What a clear did.
#[derive(Debug, Clone)]
pub struct ClearOutcome {
    pub removed: usize,
    pub persistence: Option<PersistenceWarning>,
}

struct Inner {
    records: Vec<KnowledgeRecord>,
    next_sequence: u64,
    revision: u64,
    snapshot: Arc<StoreSnapshot>,
}

impl Inner {
    /// Rebuild the shared snapshot and encode the file for a new revision.
    fn commit(&mut self, capacity_bytes: usize) -> Pending {
        self.snapshot = Arc::new(StoreSnapshot::from_records(
            self.records.clone(),
            capacity_bytes,
        ));
        self.revision += 1;
        Pending {
            revision: self.revision,
            payload: persist::encode(&self.records).map_err(|e| e.to_string()),
        }
    }
}

/// An encoded revision waiting to be written once the lock is released.
struct Pending {
    revision: u64,
    payload: Result<Vec<u8>, String>,
}

/// A capacity-bounded collection of knowledge records.
///
/// All mutations go through one async mutex. Disk writes happen after the
/// lock is released and are ordered by revision, so readers never wait on
/// the filesystem.
pub struct BoundedStore {
    inner: Mutex<Inner>,
    persister: Arc<Persister>,
    settings: StoreSettings,
    total_bytes: AtomicUsize,
    events: Option<Arc<EventBus>>,
}

impl BoundedStore {
    /// Open the store at `path`, loading whatever valid records it holds.
    ///
    /// Never fails: unreadable files start an empty store. If the loaded
    /// records exceed the current capacity they are evicted oldest-first and
    /// the file is rewritten.
    pub async fn open(path: impl Into<PathBuf>, settings: StoreSettings) -> Self {
        let path = path.into();
        let loaded = persist::load(&path);
        let mut records = loaded.records;
        for (sequence, record) in records.iter_mut().enumerate() {
            record.set_sequence(sequence as u64);
        }

        let evicted = evict_oldest(&mut records, settings.threshold(), None);
        let total = sum_bytes(&records);
        info!(
            path = %path.display(),
            count = records.len(),
            skipped = loaded.skipped,
            total_bytes = total,
            capacity_bytes = settings.capacity_bytes,
            "Memory store loaded"
        );

        let next_sequence = records.len() as u64;
        let store = Self {
            inner: Mutex::new(Inner {
                snapshot: Arc::new(StoreSnapshot::from_records(
                    records.clone(),
                    settings.capacity_bytes,
                )),
                records,
                next_sequence,
                revision: 0,
            }),
            persister: Arc::new(Persister::new(path)),
            settings,
            total_bytes: AtomicUsize::new(total),
            events: None,
        };

        if !evicted.is_empty() {
            for victim in &evicted {
                info!(id = %victim.id, name = %victim.name, bytes = victim.size_bytes, "Evicted on load, capacity shrank");
            }
            if let Err(warning) = store.flush().await {
                warn!(error = %warning, "Could not rewrite memory file after load-time eviction");
            }
        }
        store
    }

    /// Publish store events on `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn path(&self) -> &Path {
        self.persister.path()
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Add a record, or overwrite the one with the same id in place, then
    /// evict and persist.
    ///
    /// The inserted record is never evicted by its own insert, so a single
    /// record larger than capacity is accepted.
    pub async fn insert_or_replace(&self, mut record: KnowledgeRecord) -> InsertOutcome {
        let id = record.id().to_string();
        let name = record.name().to_string();
        let size = record.size_bytes();

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let replaced = match inner.records.iter_mut().find(|r| r.id() == id) {
            Some(existing) => {
                record.set_sequence(existing.sequence());
                *existing = record;
                true
            }
            None => {
                record.set_sequence(inner.next_sequence);
                inner.next_sequence += 1;
                inner.records.push(record);
                false
            }
        };

        let evicted = evict_oldest(&mut inner.records, self.settings.threshold(), Some(&id));
        let total = sum_bytes(&inner.records);
        self.total_bytes.store(total, Ordering::SeqCst);
        let pending = inner.commit(self.settings.capacity_bytes);
        drop(guard);

        info!(id = %id, name = %name, bytes = size, total_bytes = total, replaced, "Record stored");
        self.publish(DomainEvent::RecordStored {
            id: id.clone(),
            name,
            size_bytes: size,
            replaced,
            total_bytes: total,
            timestamp: Utc::now(),
        });
        for victim in &evicted {
            info!(id = %victim.id, name = %victim.name, bytes = victim.size_bytes, "Record evicted");
            self.publish(DomainEvent::RecordEvicted {
                id: victim.id.clone(),
                name: victim.name.clone(),
                size_bytes: victim.size_bytes,
                timestamp: Utc::now(),
            });
        }

        let persistence = self.persist(pending).await;
        InsertOutcome {
            id,
            replaced,
            evicted,
            total_bytes: total,
            persistence,
        }
    }

    /// Forget one record. Absent ids are a no-op.
    pub async fn remove(&self, id: &str) -> RemoveOutcome {
        let mut inner = self.inner.lock().await;
        let Some(index) = inner.records.iter().position(|r| r.id() == id) else {
            debug!(id = %id, "Remove of unknown record ignored");
            return RemoveOutcome {
                removed: None,
                total_bytes: self.total_bytes(),
                persistence: None,
            };
        };

        let removed = inner.records.remove(index).summarize();
        let total = sum_bytes(&inner.records);
        self.total_bytes.store(total, Ordering::SeqCst);
        let pending = inner.commit(self.settings.capacity_bytes);
        drop(inner);

        info!(id = %removed.id, name = %removed.name, total_bytes = total, "Record forgotten");
        self.publish(DomainEvent::RecordForgotten {
            id: removed.id.clone(),
            timestamp: Utc::now(),
        });

        let persistence = self.persist(pending).await;
        RemoveOutcome {
            removed: Some(removed),
            total_bytes: total,
            persistence,
        }
    }

    /// Forget everything.
    pub async fn clear(&self) -> ClearOutcome {
        let mut inner = self.inner.lock().await;
        let removed = inner.records.len();
        let ids: Vec<String> = inner.records.iter().map(|r| r.id().to_string()).collect();
        inner.records.clear();
        self.total_bytes.store(0, Ordering::SeqCst);
        let pending = inner.commit(self.settings.capacity_bytes);
        drop(inner);

        info!(removed, "Memory store cleared");
        for id in ids {
            self.publish(DomainEvent::RecordForgotten {
                id,
                timestamp: Utc::now(),
            });
        }

        let persistence = self.persist(pending).await;
        ClearOutcome {
            removed,
            persistence,
        }
    }

    /// Current committed state, waiting at most `lock_timeout` for writers.
    pub async fn snapshot(&self) -> Result<Arc<StoreSnapshot>, MemoryError> {
        let timeout = self.settings.lock_timeout;
        let inner = tokio::time::timeout(timeout, self.inner.lock())
            .await
            .map_err(|_| MemoryError::LockTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })?;
        Ok(Arc::clone(&inner.snapshot))
    }

    /// Sum of all stored record sizes.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::SeqCst)
    }

    pub fn capacity_bytes(&self) -> usize {
        self.settings.capacity_bytes
    }

    pub async fn list_records(&self) -> Result<Vec<RecordSummary>, MemoryError> {
        Ok(self.snapshot().await?.list())
    }

    pub async fn get(&self, id: &str) -> Result<Option<KnowledgeRecord>, MemoryError> {
        Ok(self.snapshot().await?.get(id).cloned())
    }

    /// Quote from a record's excerpt around `query`.
    ///
    /// `Ok(None)` when the record is unknown or the text does not occur.
    pub async fn cite(&self, id: &str, query: &str) -> Result<Option<String>, MemoryError> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .excerpt(id)
            .and_then(|excerpt| find_citation(excerpt, query)))
    }

    /// Rewrite the store file from the current state.
    pub async fn flush(&self) -> Result<(), PersistenceWarning> {
        let pending = {
            let mut inner = self.inner.lock().await;
            inner.commit(self.settings.capacity_bytes)
        };
        match self.persist(pending).await {
            Some(warning) => Err(warning),
            None => Ok(()),
        }
    }

    async fn persist(&self, pending: Pending) -> Option<PersistenceWarning> {
        let payload = match pending.payload {
            Ok(payload) => payload,
            Err(reason) => {
                return Some(self.report(PersistenceWarning {
                    path: self.persister.path().to_path_buf(),
                    reason,
                }));
            }
        };

        let persister = Arc::clone(&self.persister);
        let revision = pending.revision;
        let result =
            tokio::task::spawn_blocking(move || persister.write(revision, &payload)).await;
        match result {
            Ok(Ok(_)) => None,
            Ok(Err(warning)) => Some(self.report(warning)),
            Err(join_error) => Some(self.report(PersistenceWarning {
                path: self.persister.path().to_path_buf(),
                reason: format!("write task failed: {join_error}"),
            })),
        }
    }

    fn report(&self, warning: PersistenceWarning) -> PersistenceWarning {
        warn!(path = %warning.path.display(), reason = %warning.reason, "Memory store not persisted, keeping in-memory state");
        self.publish(DomainEvent::PersistenceFailed {
            path: warning.path.display().to_string(),
            reason: warning.reason.clone(),
            timestamp: Utc::now(),
        });
        warning
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

fn sum_bytes(records: &[KnowledgeRecord]) -> usize {
    records.iter().map(KnowledgeRecord::size_bytes).sum()
}

/// Drop records from the front (oldest) until the total is within
/// `threshold`, skipping `protect`.
fn evict_oldest(
    records: &mut Vec<KnowledgeRecord>,
    threshold: f64,
    protect: Option<&str>,
) -> Vec<RecordSummary> {
    let mut evicted = Vec::new();
    while sum_bytes(records) as f64 > threshold {
        let Some(victim) = records.iter().position(|r| Some(r.id()) != protect) else {
            break;
        };
        evicted.push(records.remove(victim).summarize());
    }
    evicted
}
