use tollgate_storage::StorageError;

use crate::stage::Stage;

/// Errors returned by [`FlowEngine`](crate::FlowEngine) operations.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("no flow for participant {participant_id}")]
    FlowNotFound { participant_id: String },

    #[error("training session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// The flow is on administrative hold. Nothing was changed.
    #[error("flow for participant {participant_id} is locked: {reason}")]
    Locked {
        participant_id: String,
        reason: String,
    },

    /// `to` is not an allowed next stage of `from`. Nothing was changed.
    #[error("participant {participant_id} cannot move from {from} to {to}")]
    InvalidTransition {
        participant_id: String,
        from: Stage,
        to: Stage,
    },

    #[error("training session {session_id} has no capacity left")]
    Exhausted { session_id: String },

    #[error("training session {session_id} started at {starts_at}")]
    Expired {
        session_id: String,
        starts_at: String,
    },

    #[error("training session {session_id} has an unrepresentable start time: {detail}")]
    InvalidStartTime { session_id: String, detail: String },

    #[error("participant {participant_id} already reserved session {session_id}")]
    AlreadyReserved {
        participant_id: String,
        session_id: String,
    },

    #[error("participant {participant_id} is already registered")]
    AlreadyRegistered { participant_id: String },

    /// A caller operation's stage guard rejected the flow's current stage.
    #[error(
        "participant {participant_id} is at {current}, expected one of [{}]",
        join_stages(.allowed)
    )]
    StageNotPermitted {
        participant_id: String,
        current: Stage,
        allowed: Vec<Stage>,
    },

    /// A reservation kept losing optimistic concurrency races.
    #[error("reservation for participant {participant_id} conflicted {attempts} times")]
    Conflict {
        participant_id: String,
        attempts: u32,
    },

    /// A stored record could not be interpreted (unknown stage code,
    /// malformed timestamp, non-object metadata).
    #[error("corrupt record {key}: {detail}")]
    CorruptRecord { key: String, detail: String },

    #[error("storage error: {0}")]
    Storage(#[source] StorageError),
}

impl FlowError {
    /// True for outcomes a caller is expected to handle as a normal answer
    /// (rejections, missing rows), false for infrastructure failures.
    pub fn is_business(&self) -> bool {
        !matches!(
            self,
            FlowError::Conflict { .. } | FlowError::CorruptRecord { .. } | FlowError::Storage(_)
        )
    }

    pub(crate) fn is_concurrent_conflict(&self) -> bool {
        matches!(self, FlowError::Storage(StorageError::ConcurrentConflict { .. }))
    }
}

impl From<StorageError> for FlowError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::FlowNotFound { participant_id } => FlowError::FlowNotFound { participant_id },
            StorageError::SessionNotFound { session_id } => FlowError::SessionNotFound { session_id },
            other => FlowError::Storage(other),
        }
    }
}

fn join_stages(stages: &[Stage]) -> String {
    stages
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_rows_map_to_business_errors() {
        let err = FlowError::from(StorageError::FlowNotFound {
            participant_id: "p-1".to_string(),
        });
        assert!(matches!(err, FlowError::FlowNotFound { ref participant_id } if participant_id == "p-1"));
        assert!(err.is_business());
    }

    #[test]
    fn conflicts_are_not_business_errors() {
        let err = FlowError::from(StorageError::ConcurrentConflict {
            table: "sessions",
            key: "batch-1".to_string(),
            expected_version: 2,
        });
        assert!(err.is_concurrent_conflict());
        assert!(!err.is_business());
    }

    #[test]
    fn stage_guard_message_lists_allowed_stages() {
        let err = FlowError::StageNotPermitted {
            participant_id: "p-1".to_string(),
            current: Stage::ReviewRevision,
            allowed: vec![Stage::TrainingVerified, Stage::ReviewWaiting],
        };
        assert_eq!(
            err.to_string(),
            "participant p-1 is at REVIEW_REVISION, expected one of [TRAINING_VERIFIED, REVIEW_WAITING]"
        );
    }
}
