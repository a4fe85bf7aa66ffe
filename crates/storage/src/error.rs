/// All errors that can be returned by a FlowStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict: another snapshot modified
    /// the row first. The expected version was not found.
    #[error("concurrent conflict on {table}/{key}: expected version {expected_version}")]
    ConcurrentConflict {
        table: &'static str,
        key: String,
        expected_version: i64,
    },

    /// No flow record exists for the participant.
    #[error("flow not found: {participant_id}")]
    FlowNotFound { participant_id: String },

    /// No session record exists with the given id.
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// A row with this key already exists.
    #[error("already initialized: {table}/{key}")]
    AlreadyInitialized { table: &'static str, key: String },

    /// A decrement would take the session's remaining capacity below zero.
    #[error("capacity underflow on session {session_id}")]
    CapacityUnderflow { session_id: String },

    /// A backend-specific storage error (connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
