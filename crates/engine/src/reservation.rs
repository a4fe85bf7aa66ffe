//! Training session reservation.
//!
//! Selecting a session takes one unit of its capacity and advances the flow
//! to `TRAINING_WAITING` in a single snapshot. The flow row is locked
//! before the session row, and every precondition is checked on the locked
//! rows, so two participants racing for the last seat cannot both win.

use time::OffsetDateTime;
use tollgate_storage::{FlowStorage, SessionRecord, StorageError};
use tracing::{info, warn};

use crate::clock::{format_instant, parse_timestamp, Clock};
use crate::engine::{ensure_unlocked, Advance, FlowEngine};
use crate::error::FlowError;
use crate::flow::{parse_stage, session_key, Flow, Metadata, Session};
use crate::stage::Stage;

impl<S: FlowStorage, C: Clock> FlowEngine<S, C> {
    /// Register a training session with `capacity` seats.
    pub async fn create_session(
        &self,
        session_id: &str,
        capacity: u32,
        starts_at: OffsetDateTime,
    ) -> Result<Session, FlowError> {
        let starts_at = format_instant(starts_at).map_err(|e| FlowError::InvalidStartTime {
            session_id: session_id.to_string(),
            detail: e.to_string(),
        })?;
        let record = SessionRecord {
            session_id: session_id.to_string(),
            capacity_remaining: i64::from(capacity),
            starts_at,
            version: 0,
        };
        let mut snapshot = self.storage.begin_snapshot().await?;
        if let Err(e) = self
            .storage
            .insert_session(&mut snapshot, record.clone())
            .await
        {
            let _ = self.storage.abort_snapshot(snapshot).await;
            return Err(e.into());
        }
        self.storage.commit_snapshot(snapshot).await?;

        info!(session_id, capacity, "training session created");
        Session::try_from(record)
    }

    /// Sessions open for selection now, earliest first.
    pub async fn available_sessions(&self) -> Result<Vec<Session>, FlowError> {
        let now = self.clock.now();
        let mut sessions = Vec::new();
        for record in self.storage.list_sessions().await? {
            let session = Session::try_from(record)?;
            if session.is_selectable(now) {
                sessions.push(session);
            }
        }
        sessions.sort_by(|a, b| {
            a.starts_at
                .cmp(&b.starts_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session, FlowError> {
        Session::try_from(self.storage.get_session(session_id).await?)
    }

    /// Reserve a seat in `session_id` for the participant and move the flow
    /// to `TRAINING_WAITING`.
    ///
    /// The whole unit is retried when the store reports a concurrent
    /// conflict, up to `reservation.max_attempts` times; after that the
    /// result is `Conflict`. Business rejections are returned immediately.
    pub async fn reserve_session(
        &self,
        participant_id: &str,
        session_id: &str,
    ) -> Result<Flow, FlowError> {
        let max_attempts = self.config.reservation.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_reserve(participant_id, session_id).await {
                Ok(flow) => {
                    info!(participant_id, session_id, attempt, "training session reserved");
                    return Ok(flow);
                }
                Err(e) if e.is_concurrent_conflict() => {
                    if attempt >= max_attempts {
                        warn!(participant_id, session_id, attempt, "reservation gave up");
                        return Err(FlowError::Conflict {
                            participant_id: participant_id.to_string(),
                            attempts: attempt,
                        });
                    }
                    warn!(participant_id, session_id, attempt, error = %e, "reservation retry");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_reserve(&self, participant_id: &str, session_id: &str) -> Result<Flow, FlowError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        match self
            .reserve_in(&mut snapshot, participant_id, session_id)
            .await
        {
            Ok(flow) => {
                self.storage.commit_snapshot(snapshot).await?;
                Ok(flow)
            }
            Err(e) => {
                let _ = self.storage.abort_snapshot(snapshot).await;
                Err(e)
            }
        }
    }

    async fn reserve_in(
        &self,
        snapshot: &mut S::Snapshot,
        participant_id: &str,
        session_id: &str,
    ) -> Result<Flow, FlowError> {
        let current = self
            .storage
            .get_flow_for_update(snapshot, participant_id)
            .await?;
        ensure_unlocked(&current)?;

        if let Some(existing) = &current.reserved_session_id {
            return Err(FlowError::AlreadyReserved {
                participant_id: participant_id.to_string(),
                session_id: existing.clone(),
            });
        }

        // Flows that reached TRAINING_WAITING before reservations existed
        // have no session yet and may still pick one. This stays until those
        // flows are migrated to ARTICLE_VERIFIED.
        let stage = parse_stage(&current.stage, participant_id)?;
        if !matches!(stage, Stage::ArticleVerified | Stage::TrainingWaiting) {
            return Err(FlowError::InvalidTransition {
                participant_id: participant_id.to_string(),
                from: stage,
                to: Stage::TrainingWaiting,
            });
        }

        let session = self
            .storage
            .get_session_for_update(snapshot, session_id)
            .await?;
        if session.capacity_remaining <= 0 {
            return Err(exhausted(session_id));
        }
        let starts_at = parse_timestamp(&session.starts_at, &session_key(session_id))?;
        if starts_at <= self.clock.now() {
            return Err(FlowError::Expired {
                session_id: session_id.to_string(),
                starts_at: session.starts_at,
            });
        }

        match self
            .storage
            .decrement_capacity(snapshot, session_id, session.version)
            .await
        {
            Ok(_) => {}
            Err(StorageError::CapacityUnderflow { .. }) => return Err(exhausted(session_id)),
            Err(e) => return Err(e.into()),
        }

        let mut metadata = Metadata::new();
        metadata.insert("action".to_string(), "SELECT_TRAINING".into());
        metadata.insert("sessionId".to_string(), session_id.into());
        let advance = Advance {
            to: Stage::TrainingWaiting,
            actor_id: participant_id,
            metadata,
            reserve: Some(session_id),
            in_place: false,
        };
        self.apply_transition(snapshot, &current, advance).await
    }
}

fn exhausted(session_id: &str) -> FlowError {
    FlowError::Exhausted {
        session_id: session_id.to_string(),
    }
}
