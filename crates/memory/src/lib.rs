//! In-memory `FlowStorage` backend.
//!
//! Committed data lives behind a single `RwLock`. Each snapshot stages its
//! writes privately and holds per-row locks (`SELECT ... FOR UPDATE`
//! semantics) until it is committed, aborted, or dropped. Commit applies the
//! staged writes in one step under the write lock, so readers never observe
//! a partially applied snapshot.

use std::collections::HashMap;
use std::sync::{Arc, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tollgate_storage::{AuditEntryRecord, FlowRecord, FlowStorage, SessionRecord, StorageError};

const FLOWS: &str = "flows";
const SESSIONS: &str = "sessions";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Flow(String),
    Session(String),
}

#[derive(Default)]
struct Tables {
    flows: HashMap<String, FlowRecord>,
    sessions: HashMap<String, SessionRecord>,
    audit: Vec<AuditEntryRecord>,
}

/// Row mutexes by key. An entry lives only while some snapshot holds or
/// waits for it.
type LockTable = std::sync::Mutex<HashMap<RowKey, Arc<Mutex<()>>>>;

fn lock_table(table: &LockTable) -> MutexGuard<'_, HashMap<RowKey, Arc<Mutex<()>>>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Inner {
    committed: RwLock<Tables>,
    row_locks: Arc<LockTable>,
}

/// A row lock held by a snapshot.
struct RowGuard {
    key: RowKey,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = lock_table(&self.table);
        // Waiters clone the mutex under the table lock, so a count of one
        // means nobody else holds or wants this row.
        if locks
            .get(&self.key)
            .is_some_and(|row| Arc::strong_count(row) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

/// Shared, cloneable in-memory store. Clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

/// An open transaction against a [`MemoryStorage`].
///
/// Dropping it releases its row locks and discards its staged writes.
pub struct MemorySnapshot {
    guards: HashMap<RowKey, RowGuard>,
    flows: HashMap<String, FlowRecord>,
    sessions: HashMap<String, SessionRecord>,
    audit: Vec<AuditEntryRecord>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the row lock for `key` unless this snapshot already holds it.
    async fn lock_row(&self, snapshot: &mut MemorySnapshot, key: RowKey) {
        if snapshot.guards.contains_key(&key) {
            return;
        }
        let row = lock_table(&self.inner.row_locks)
            .entry(key.clone())
            .or_default()
            .clone();
        let guard = row.lock_owned().await;
        let held = RowGuard {
            key: key.clone(),
            guard: Some(guard),
            table: self.inner.row_locks.clone(),
        };
        snapshot.guards.insert(key, held);
    }

    /// The flow as this snapshot sees it: staged write first, then committed.
    async fn visible_flow(
        &self,
        snapshot: &MemorySnapshot,
        participant_id: &str,
    ) -> Option<FlowRecord> {
        if let Some(staged) = snapshot.flows.get(participant_id) {
            return Some(staged.clone());
        }
        self.inner
            .committed
            .read()
            .await
            .flows
            .get(participant_id)
            .cloned()
    }

    async fn visible_session(
        &self,
        snapshot: &MemorySnapshot,
        session_id: &str,
    ) -> Option<SessionRecord> {
        if let Some(staged) = snapshot.sessions.get(session_id) {
            return Some(staged.clone());
        }
        self.inner
            .committed
            .read()
            .await
            .sessions
            .get(session_id)
            .cloned()
    }
}

fn flow_not_found(participant_id: &str) -> StorageError {
    StorageError::FlowNotFound {
        participant_id: participant_id.to_string(),
    }
}

fn session_not_found(session_id: &str) -> StorageError {
    StorageError::SessionNotFound {
        session_id: session_id.to_string(),
    }
}

#[async_trait]
impl FlowStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        Ok(MemorySnapshot {
            guards: HashMap::new(),
            flows: HashMap::new(),
            sessions: HashMap::new(),
            audit: Vec::new(),
        })
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let MemorySnapshot {
            guards,
            flows,
            sessions,
            audit,
        } = snapshot;
        {
            let mut committed = self.inner.committed.write().await;
            committed.flows.extend(flows);
            committed.sessions.extend(sessions);
            committed.audit.extend(audit);
        }
        // Row locks are released only once the writes are visible.
        drop(guards);
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        drop(snapshot);
        Ok(())
    }

    async fn insert_flow(
        &self,
        snapshot: &mut MemorySnapshot,
        record: FlowRecord,
    ) -> Result<(), StorageError> {
        self.lock_row(snapshot, RowKey::Flow(record.participant_id.clone()))
            .await;
        if self
            .visible_flow(snapshot, &record.participant_id)
            .await
            .is_some()
        {
            return Err(StorageError::AlreadyInitialized {
                table: FLOWS,
                key: record.participant_id,
            });
        }
        snapshot
            .flows
            .insert(record.participant_id.clone(), record);
        Ok(())
    }

    async fn get_flow_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        participant_id: &str,
    ) -> Result<FlowRecord, StorageError> {
        self.lock_row(snapshot, RowKey::Flow(participant_id.to_string()))
            .await;
        self.visible_flow(snapshot, participant_id)
            .await
            .ok_or_else(|| flow_not_found(participant_id))
    }

    async fn update_flow(
        &self,
        snapshot: &mut MemorySnapshot,
        record: &FlowRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        let participant_id = record.participant_id.as_str();
        self.lock_row(snapshot, RowKey::Flow(participant_id.to_string()))
            .await;
        let current = self
            .visible_flow(snapshot, participant_id)
            .await
            .ok_or_else(|| flow_not_found(participant_id))?;
        if current.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                table: FLOWS,
                key: participant_id.to_string(),
                expected_version,
            });
        }
        let next = FlowRecord {
            version: current.version + 1,
            ..record.clone()
        };
        let version = next.version;
        snapshot.flows.insert(participant_id.to_string(), next);
        Ok(version)
    }

    async fn insert_session(
        &self,
        snapshot: &mut MemorySnapshot,
        record: SessionRecord,
    ) -> Result<(), StorageError> {
        self.lock_row(snapshot, RowKey::Session(record.session_id.clone()))
            .await;
        if self
            .visible_session(snapshot, &record.session_id)
            .await
            .is_some()
        {
            return Err(StorageError::AlreadyInitialized {
                table: SESSIONS,
                key: record.session_id,
            });
        }
        snapshot
            .sessions
            .insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn get_session_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        session_id: &str,
    ) -> Result<SessionRecord, StorageError> {
        self.lock_row(snapshot, RowKey::Session(session_id.to_string()))
            .await;
        self.visible_session(snapshot, session_id)
            .await
            .ok_or_else(|| session_not_found(session_id))
    }

    async fn decrement_capacity(
        &self,
        snapshot: &mut MemorySnapshot,
        session_id: &str,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        self.lock_row(snapshot, RowKey::Session(session_id.to_string()))
            .await;
        let mut session = self
            .visible_session(snapshot, session_id)
            .await
            .ok_or_else(|| session_not_found(session_id))?;
        if session.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                table: SESSIONS,
                key: session_id.to_string(),
                expected_version,
            });
        }
        if session.capacity_remaining <= 0 {
            return Err(StorageError::CapacityUnderflow {
                session_id: session_id.to_string(),
            });
        }
        session.capacity_remaining -= 1;
        session.version += 1;
        let remaining = session.capacity_remaining;
        snapshot.sessions.insert(session_id.to_string(), session);
        Ok(remaining)
    }

    async fn append_audit_entry(
        &self,
        snapshot: &mut MemorySnapshot,
        entry: AuditEntryRecord,
    ) -> Result<(), StorageError> {
        snapshot.audit.push(entry);
        Ok(())
    }

    async fn get_flow(&self, participant_id: &str) -> Result<FlowRecord, StorageError> {
        self.inner
            .committed
            .read()
            .await
            .flows
            .get(participant_id)
            .cloned()
            .ok_or_else(|| flow_not_found(participant_id))
    }

    async fn list_flows(&self, stage_filter: Option<&str>) -> Result<Vec<FlowRecord>, StorageError> {
        let committed = self.inner.committed.read().await;
        let mut flows: Vec<FlowRecord> = committed
            .flows
            .values()
            .filter(|f| stage_filter.map_or(true, |s| f.stage == s))
            .cloned()
            .collect();
        flows.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        Ok(flows)
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionRecord, StorageError> {
        self.inner
            .committed
            .read()
            .await
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| session_not_found(session_id))
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, StorageError> {
        let committed = self.inner.committed.read().await;
        let mut sessions: Vec<SessionRecord> = committed.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| {
            a.starts_at
                .cmp(&b.starts_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }

    async fn list_audit_entries(
        &self,
        participant_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AuditEntryRecord>, StorageError> {
        let committed = self.inner.committed.read().await;
        let limit = if limit == 0 { usize::MAX } else { limit };
        let entries = match participant_id {
            Some(p) => committed
                .audit
                .iter()
                .filter(|e| e.participant_id == p)
                .take(limit)
                .cloned()
                .collect(),
            None => committed.audit.iter().rev().take(limit).cloned().collect(),
        };
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn flow(participant_id: &str, stage: &str) -> FlowRecord {
        FlowRecord {
            participant_id: participant_id.to_string(),
            stage: stage.to_string(),
            reserved_session_id: None,
            locked: false,
            lock_reason: None,
            version: 0,
            updated_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn second_snapshot_waits_for_row_lock() {
        let storage = MemoryStorage::new();
        let mut seed = storage.begin_snapshot().await.unwrap();
        storage
            .insert_flow(&mut seed, flow("p-1", "ARTICLE_WAITING"))
            .await
            .unwrap();
        storage.commit_snapshot(seed).await.unwrap();

        let mut holder = storage.begin_snapshot().await.unwrap();
        storage
            .get_flow_for_update(&mut holder, "p-1")
            .await
            .unwrap();

        let contender = storage.clone();
        let waiter = tokio::spawn(async move {
            let mut snap = contender.begin_snapshot().await.unwrap();
            let seen = contender
                .get_flow_for_update(&mut snap, "p-1")
                .await
                .unwrap();
            contender.abort_snapshot(snap).await.unwrap();
            seen
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "row lock was not held");

        let current = storage.get_flow("p-1").await.unwrap();
        let next = FlowRecord {
            stage: "ARTICLE_VERIFIED".to_string(),
            ..current
        };
        storage.update_flow(&mut holder, &next, 0).await.unwrap();
        storage.commit_snapshot(holder).await.unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter never acquired the lock")
            .unwrap();
        assert_eq!(seen.stage, "ARTICLE_VERIFIED");
        assert_eq!(seen.version, 1);
    }

    #[tokio::test]
    async fn missed_lookups_leave_no_row_locks_behind() {
        let storage = MemoryStorage::new();
        for i in 0..100 {
            let mut snap = storage.begin_snapshot().await.unwrap();
            let err = storage
                .get_flow_for_update(&mut snap, &format!("ghost-{i}"))
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::FlowNotFound { .. }));
            let err = storage
                .get_session_for_update(&mut snap, &format!("no-session-{i}"))
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::SessionNotFound { .. }));
            storage.abort_snapshot(snap).await.unwrap();
        }
        assert!(lock_table(&storage.inner.row_locks).is_empty());
    }

    #[tokio::test]
    async fn row_lock_survives_until_last_waiter_finishes() {
        let storage = MemoryStorage::new();
        let mut seed = storage.begin_snapshot().await.unwrap();
        storage
            .insert_flow(&mut seed, flow("p-1", "PAYMENT_REQUIRED"))
            .await
            .unwrap();
        storage.commit_snapshot(seed).await.unwrap();
        assert!(lock_table(&storage.inner.row_locks).is_empty());

        let mut holder = storage.begin_snapshot().await.unwrap();
        storage
            .get_flow_for_update(&mut holder, "p-1")
            .await
            .unwrap();
        let contender = storage.clone();
        let waiter = tokio::spawn(async move {
            let mut snap = contender.begin_snapshot().await.unwrap();
            contender
                .get_flow_for_update(&mut snap, "p-1")
                .await
                .unwrap();
            contender.commit_snapshot(snap).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        storage.abort_snapshot(holder).await.unwrap();
        assert_eq!(lock_table(&storage.inner.row_locks).len(), 1);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter never acquired the lock")
            .unwrap();
        assert!(lock_table(&storage.inner.row_locks).is_empty());
    }

    #[tokio::test]
    async fn reads_do_not_wait_for_row_locks() {
        let storage = MemoryStorage::new();
        let mut seed = storage.begin_snapshot().await.unwrap();
        storage
            .insert_flow(&mut seed, flow("p-1", "PAYMENT_REQUIRED"))
            .await
            .unwrap();
        storage.commit_snapshot(seed).await.unwrap();

        let mut holder = storage.begin_snapshot().await.unwrap();
        storage
            .get_flow_for_update(&mut holder, "p-1")
            .await
            .unwrap();

        let read = tokio::time::timeout(Duration::from_secs(1), storage.get_flow("p-1"))
            .await
            .expect("plain read blocked on a row lock")
            .unwrap();
        assert_eq!(read.stage, "PAYMENT_REQUIRED");
        storage.abort_snapshot(holder).await.unwrap();
    }

    #[tokio::test]
    async fn clones_share_committed_state() {
        let storage = MemoryStorage::new();
        let other = storage.clone();
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .insert_session(
                &mut snap,
                SessionRecord {
                    session_id: "batch-1".to_string(),
                    capacity_remaining: 4,
                    starts_at: "2030-01-01T00:00:00Z".to_string(),
                    version: 0,
                },
            )
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();

        assert_eq!(other.get_session("batch-1").await.unwrap().capacity_remaining, 4);
    }
}
