use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{AuditEntryRecord, FlowRecord, SessionRecord};

/// The storage trait for Tollgate backends.
///
/// A `FlowStorage` implementation provides durable, transactional storage
/// for participant flows, training sessions, and the audit trail.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()`: start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)`: commit and consume the transaction
///    OR `abort_snapshot(snapshot)`: roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, the underlying transaction
/// MUST be rolled back. Writes made through a snapshot are invisible to the
/// non-snapshot query methods until commit.
///
/// ## Row Locks
///
/// `get_flow_for_update` and `get_session_for_update` use
/// `SELECT ... FOR UPDATE` semantics: the row stays locked until the
/// snapshot is committed, aborted, or dropped. A second snapshot asking for
/// the same row waits. Callers that lock both kinds of row lock the flow
/// first, then the session.
///
/// ## OCC Conflict Detection
///
/// `update_flow` and `decrement_capacity` are conditional on the row's
/// current version (`UPDATE ... WHERE version = expected_version`). If zero
/// rows are affected, the method returns
/// `Err(StorageError::ConcurrentConflict { .. })`.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared across
/// async task boundaries.
#[async_trait]
pub trait FlowStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations durable.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Flow operations (within snapshot) ─────────────────────────────────────

    /// Insert a new flow record. The record's `version` is stored as given.
    ///
    /// Returns `Err(StorageError::AlreadyInitialized)` if a flow already
    /// exists for the participant.
    async fn insert_flow(
        &self,
        snapshot: &mut Self::Snapshot,
        record: FlowRecord,
    ) -> Result<(), StorageError>;

    /// Read a participant's flow, locking the row for update.
    ///
    /// Returns `Err(StorageError::FlowNotFound)` if the flow does not exist.
    async fn get_flow_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        participant_id: &str,
    ) -> Result<FlowRecord, StorageError>;

    /// Replace a flow's mutable fields (stage, reservation, lock, updated_at),
    /// conditional on `version = expected_version`.
    ///
    /// The `version` field of `record` is ignored. Returns the new version.
    async fn update_flow(
        &self,
        snapshot: &mut Self::Snapshot,
        record: &FlowRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    // ── Session operations (within snapshot) ──────────────────────────────────

    /// Insert a new training session.
    ///
    /// Returns `Err(StorageError::AlreadyInitialized)` if the id is taken.
    async fn insert_session(
        &self,
        snapshot: &mut Self::Snapshot,
        record: SessionRecord,
    ) -> Result<(), StorageError>;

    /// Read a session, locking the row for update.
    ///
    /// Returns `Err(StorageError::SessionNotFound)` if it does not exist.
    async fn get_session_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        session_id: &str,
    ) -> Result<SessionRecord, StorageError>;

    /// Decrement `capacity_remaining` by one, conditional on
    /// `version = expected_version`.
    ///
    /// Returns `Err(StorageError::CapacityUnderflow)` if the remaining
    /// capacity is already zero; the counter never goes negative.
    /// Returns the new remaining capacity.
    async fn decrement_capacity(
        &self,
        snapshot: &mut Self::Snapshot,
        session_id: &str,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    // ── Audit trail (within snapshot) ─────────────────────────────────────────

    /// Append an audit entry.
    ///
    /// CRITICAL: must be called in the SAME snapshot as the flow update it
    /// describes. No stage change without its audit entry.
    async fn append_audit_entry(
        &self,
        snapshot: &mut Self::Snapshot,
        entry: AuditEntryRecord,
    ) -> Result<(), StorageError>;

    // ── Query operations (outside snapshot) ───────────────────────────────────

    /// Read a participant's committed flow without locking.
    async fn get_flow(&self, participant_id: &str) -> Result<FlowRecord, StorageError>;

    /// List committed flows, optionally filtered by stage code.
    async fn list_flows(&self, stage_filter: Option<&str>) -> Result<Vec<FlowRecord>, StorageError>;

    /// Read a committed session without locking.
    async fn get_session(&self, session_id: &str) -> Result<SessionRecord, StorageError>;

    /// List all committed sessions.
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, StorageError>;

    /// List committed audit entries.
    ///
    /// - `participant_id`: restrict to one participant, in append order
    /// - otherwise all entries, newest first
    /// - `limit`: maximum number of results (0 = no limit)
    async fn list_audit_entries(
        &self,
        participant_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AuditEntryRecord>, StorageError>;
}
