//! Flow orchestration engine.
//!
//! Every mutation runs in one storage snapshot: the flow row is locked,
//! the change is validated against the transition table, the flow is
//! written version-checked, and the audit entry is appended in the same
//! snapshot. Any failure aborts the snapshot, so a stage never changes
//! without its audit entry.

use tollgate_storage::{AuditEntryRecord, FlowRecord, FlowStorage, StorageError};
use tracing::{debug, info, warn};

use crate::clock::{format_timestamp, Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::FlowError;
use crate::flow::{parse_stage, AuditEntry, Flow, Metadata};
use crate::stage::Stage;
use crate::transitions;

/// Drives participant flows through the approval pipeline.
pub struct FlowEngine<S, C = SystemClock> {
    pub(crate) storage: S,
    pub(crate) clock: C,
    pub(crate) config: EngineConfig,
}

/// One step applied to a row-locked flow inside an open snapshot.
pub(crate) struct Advance<'a> {
    pub to: Stage,
    pub actor_id: &'a str,
    pub metadata: Metadata,
    /// Session to record on the flow. Only the reservation protocol sets it.
    pub reserve: Option<&'a str>,
    /// Record a decision at the current stage without moving the flow.
    pub in_place: bool,
}

impl<S: FlowStorage> FlowEngine<S, SystemClock> {
    pub fn new(storage: S) -> Self {
        Self::with_clock(storage, SystemClock)
    }
}

impl<S: FlowStorage, C: Clock> FlowEngine<S, C> {
    pub fn with_clock(storage: S, clock: C) -> Self {
        Self {
            storage,
            clock,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn now_string(&self) -> String {
        format_timestamp(self.clock.now())
    }

    /// Create a participant's flow at the initial stage.
    pub async fn register(&self, participant_id: &str) -> Result<Flow, FlowError> {
        let record = FlowRecord {
            participant_id: participant_id.to_string(),
            stage: Stage::INITIAL.as_str().to_string(),
            reserved_session_id: None,
            locked: false,
            lock_reason: None,
            version: 0,
            updated_at: self.now_string(),
        };

        let mut snapshot = self.storage.begin_snapshot().await?;
        if let Err(e) = self.storage.insert_flow(&mut snapshot, record.clone()).await {
            let _ = self.storage.abort_snapshot(snapshot).await;
            return Err(match e {
                StorageError::AlreadyInitialized { .. } => FlowError::AlreadyRegistered {
                    participant_id: participant_id.to_string(),
                },
                other => other.into(),
            });
        }
        self.storage.commit_snapshot(snapshot).await?;

        info!(participant_id, stage = %Stage::INITIAL, "participant registered");
        Flow::try_from(record)
    }

    /// Move a participant's flow to `next`.
    ///
    /// Fails with `Locked` if the flow is on hold and with
    /// `InvalidTransition` if `next` is not an allowed successor of the
    /// current stage. On success the stage change and its audit entry are
    /// committed together.
    pub async fn transition_status(
        &self,
        participant_id: &str,
        next: Stage,
        actor_id: &str,
        metadata: Metadata,
    ) -> Result<Flow, FlowError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let advance = Advance {
            to: next,
            actor_id,
            metadata,
            reserve: None,
            in_place: false,
        };
        let result = self
            .transition_in(&mut snapshot, participant_id, advance)
            .await;

        let flow = match result {
            Ok(flow) => flow,
            Err(e) => {
                let _ = self.storage.abort_snapshot(snapshot).await;
                debug!(participant_id, to = %next, error = %e, "transition rejected");
                return Err(e);
            }
        };
        self.storage.commit_snapshot(snapshot).await?;

        info!(
            participant_id,
            stage = %flow.stage,
            actor_id,
            version = flow.version,
            "transition applied"
        );
        Ok(flow)
    }

    /// Put a flow on administrative hold.
    ///
    /// Applies regardless of stage and replaces any previous reason. No
    /// audit entry is written since the stage does not change.
    pub async fn lock_flow(&self, participant_id: &str, reason: &str) -> Result<Flow, FlowError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self.lock_in(&mut snapshot, participant_id, reason).await;

        let flow = match result {
            Ok(flow) => flow,
            Err(e) => {
                let _ = self.storage.abort_snapshot(snapshot).await;
                return Err(e);
            }
        };
        self.storage.commit_snapshot(snapshot).await?;

        warn!(participant_id, reason, stage = %flow.stage, "flow locked");
        Ok(flow)
    }

    /// Append an audit entry at `stage` without changing it. Fails with
    /// `StageNotPermitted` if the flow has moved on.
    pub(crate) async fn record_in_place(
        &self,
        participant_id: &str,
        stage: Stage,
        actor_id: &str,
        metadata: Metadata,
    ) -> Result<Flow, FlowError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let advance = Advance {
            to: stage,
            actor_id,
            metadata,
            reserve: None,
            in_place: true,
        };
        let result = self
            .record_in_place_in(&mut snapshot, participant_id, advance)
            .await;

        let flow = match result {
            Ok(flow) => flow,
            Err(e) => {
                let _ = self.storage.abort_snapshot(snapshot).await;
                debug!(participant_id, %stage, error = %e, "decision rejected");
                return Err(e);
            }
        };
        self.storage.commit_snapshot(snapshot).await?;

        info!(participant_id, %stage, actor_id, version = flow.version, "decision recorded");
        Ok(flow)
    }

    pub async fn get_flow(&self, participant_id: &str) -> Result<Flow, FlowError> {
        let record = self.storage.get_flow(participant_id).await?;
        Flow::try_from(record)
    }

    /// Return the flow if its current stage is one of `allowed`.
    pub async fn ensure_stage(
        &self,
        participant_id: &str,
        allowed: &[Stage],
    ) -> Result<Flow, FlowError> {
        let flow = self.get_flow(participant_id).await?;
        if !allowed.contains(&flow.stage) {
            return Err(FlowError::StageNotPermitted {
                participant_id: participant_id.to_string(),
                current: flow.stage,
                allowed: allowed.to_vec(),
            });
        }
        Ok(flow)
    }

    /// A participant's audit trail, oldest first.
    pub async fn audit_trail(&self, participant_id: &str) -> Result<Vec<AuditEntry>, FlowError> {
        self.storage
            .list_audit_entries(Some(participant_id), 0)
            .await?
            .into_iter()
            .map(AuditEntry::try_from)
            .collect()
    }

    /// The most recent audit entries across all participants, newest first.
    pub async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, FlowError> {
        self.storage
            .list_audit_entries(None, limit)
            .await?
            .into_iter()
            .map(AuditEntry::try_from)
            .collect()
    }

    async fn transition_in(
        &self,
        snapshot: &mut S::Snapshot,
        participant_id: &str,
        advance: Advance<'_>,
    ) -> Result<Flow, FlowError> {
        let current = self
            .storage
            .get_flow_for_update(snapshot, participant_id)
            .await?;
        self.apply_transition(snapshot, &current, advance).await
    }

    async fn record_in_place_in(
        &self,
        snapshot: &mut S::Snapshot,
        participant_id: &str,
        advance: Advance<'_>,
    ) -> Result<Flow, FlowError> {
        let current = self
            .storage
            .get_flow_for_update(snapshot, participant_id)
            .await?;
        ensure_unlocked(&current)?;
        let stage = parse_stage(&current.stage, participant_id)?;
        if stage != advance.to {
            return Err(FlowError::StageNotPermitted {
                participant_id: participant_id.to_string(),
                current: stage,
                allowed: vec![advance.to],
            });
        }
        self.apply_transition(snapshot, &current, advance).await
    }

    async fn lock_in(
        &self,
        snapshot: &mut S::Snapshot,
        participant_id: &str,
        reason: &str,
    ) -> Result<Flow, FlowError> {
        let current = self
            .storage
            .get_flow_for_update(snapshot, participant_id)
            .await?;
        let next = FlowRecord {
            locked: true,
            lock_reason: Some(reason.to_string()),
            updated_at: self.now_string(),
            ..current.clone()
        };
        let version = self
            .storage
            .update_flow(snapshot, &next, current.version)
            .await?;
        Flow::try_from(FlowRecord { version, ..next })
    }

    /// Validate and write one step against a flow already locked in
    /// `snapshot`, appending its audit entry in the same snapshot.
    ///
    /// The caller owns the snapshot and must abort it on error.
    pub(crate) async fn apply_transition(
        &self,
        snapshot: &mut S::Snapshot,
        current: &FlowRecord,
        advance: Advance<'_>,
    ) -> Result<Flow, FlowError> {
        ensure_unlocked(current)?;
        let from = parse_stage(&current.stage, &current.participant_id)?;

        // Same-stage steps skip the table: a reservation on a flow already
        // waiting for training, or a decision recorded in place.
        let same_stage = (advance.reserve.is_some() || advance.in_place) && from == advance.to;
        if !same_stage && !transitions::is_allowed(from, advance.to) {
            return Err(FlowError::InvalidTransition {
                participant_id: current.participant_id.clone(),
                from,
                to: advance.to,
            });
        }

        let now = self.now_string();
        let next = FlowRecord {
            stage: advance.to.as_str().to_string(),
            reserved_session_id: advance
                .reserve
                .map(str::to_string)
                .or_else(|| current.reserved_session_id.clone()),
            updated_at: now.clone(),
            ..current.clone()
        };
        let version = self
            .storage
            .update_flow(snapshot, &next, current.version)
            .await?;

        let entry = AuditEntryRecord {
            id: format!("{}-{version}", current.participant_id),
            participant_id: current.participant_id.clone(),
            actor_id: advance.actor_id.to_string(),
            from_stage: from.as_str().to_string(),
            to_stage: advance.to.as_str().to_string(),
            metadata: serde_json::Value::Object(advance.metadata),
            occurred_at: now,
        };
        self.storage.append_audit_entry(snapshot, entry).await?;

        Flow::try_from(FlowRecord { version, ..next })
    }
}

pub(crate) fn ensure_unlocked(record: &FlowRecord) -> Result<(), FlowError> {
    if record.locked {
        return Err(FlowError::Locked {
            participant_id: record.participant_id.clone(),
            reason: record.lock_reason.clone().unwrap_or_default(),
        });
    }
    Ok(())
}
