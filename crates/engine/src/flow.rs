//! Typed views over the stored records.

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tollgate_storage::{AuditEntryRecord, FlowRecord, SessionRecord};

use crate::clock::parse_timestamp;
use crate::error::FlowError;
use crate::stage::Stage;

/// Caller-supplied audit metadata. Opaque to the engine.
pub type Metadata = serde_json::Map<String, Value>;

/// A participant's position in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flow {
    pub participant_id: String,
    pub stage: Stage,
    pub reserved_session_id: Option<String>,
    pub locked: bool,
    pub lock_reason: Option<String>,
    pub version: i64,
    pub updated_at: String,
}

impl TryFrom<FlowRecord> for Flow {
    type Error = FlowError;

    fn try_from(record: FlowRecord) -> Result<Self, Self::Error> {
        let stage = parse_stage(&record.stage, &record.participant_id)?;
        Ok(Flow {
            participant_id: record.participant_id,
            stage,
            reserved_session_id: record.reserved_session_id,
            locked: record.locked,
            lock_reason: record.lock_reason,
            version: record.version,
            updated_at: record.updated_at,
        })
    }
}

/// A capacity-limited training session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub session_id: String,
    pub capacity_remaining: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub starts_at: OffsetDateTime,
}

impl Session {
    /// Open for selection at `now`: capacity left and not yet started.
    pub fn is_selectable(&self, now: OffsetDateTime) -> bool {
        self.capacity_remaining > 0 && self.starts_at > now
    }
}

impl TryFrom<SessionRecord> for Session {
    type Error = FlowError;

    fn try_from(record: SessionRecord) -> Result<Self, Self::Error> {
        let starts_at = parse_timestamp(&record.starts_at, &session_key(&record.session_id))?;
        Ok(Session {
            session_id: record.session_id,
            capacity_remaining: record.capacity_remaining,
            starts_at,
        })
    }
}

/// One applied transition, as read back from the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub id: String,
    pub participant_id: String,
    pub actor_id: String,
    pub from: Stage,
    pub to: Stage,
    pub metadata: Metadata,
    pub occurred_at: String,
}

impl TryFrom<AuditEntryRecord> for AuditEntry {
    type Error = FlowError;

    fn try_from(record: AuditEntryRecord) -> Result<Self, Self::Error> {
        let key = format!("audit/{}", record.id);
        let metadata = match record.metadata {
            Value::Object(map) => map,
            Value::Null => Metadata::new(),
            other => {
                return Err(FlowError::CorruptRecord {
                    key,
                    detail: format!("metadata is not an object: {other}"),
                })
            }
        };
        Ok(AuditEntry {
            from: parse_stage(&record.from_stage, &key)?,
            to: parse_stage(&record.to_stage, &key)?,
            id: record.id,
            participant_id: record.participant_id,
            actor_id: record.actor_id,
            metadata,
            occurred_at: record.occurred_at,
        })
    }
}

pub(crate) fn parse_stage(code: &str, key: &str) -> Result<Stage, FlowError> {
    code.parse().map_err(|e| FlowError::CorruptRecord {
        key: key.to_string(),
        detail: format!("{e}"),
    })
}

pub(crate) fn session_key(session_id: &str) -> String {
    format!("sessions/{session_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn audit_record(metadata: Value) -> AuditEntryRecord {
        AuditEntryRecord {
            id: "p-1-3".to_string(),
            participant_id: "p-1".to_string(),
            actor_id: "admin-1".to_string(),
            from_stage: "ARTICLE_WAITING".to_string(),
            to_stage: "ARTICLE_VERIFIED".to_string(),
            metadata,
            occurred_at: "2030-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn unknown_stage_code_is_corrupt() {
        let record = FlowRecord {
            participant_id: "p-1".to_string(),
            stage: "CERTIFIED".to_string(),
            reserved_session_id: None,
            locked: false,
            lock_reason: None,
            version: 0,
            updated_at: "2030-01-01T00:00:00Z".to_string(),
        };
        let err = Flow::try_from(record).unwrap_err();
        assert!(matches!(err, FlowError::CorruptRecord { ref key, .. } if key == "p-1"));
    }

    #[test]
    fn audit_metadata_must_be_an_object() {
        let entry = AuditEntry::try_from(audit_record(json!({"action": "VERIFY_ARTICLE"}))).unwrap();
        assert_eq!(entry.metadata["action"], "VERIFY_ARTICLE");
        assert_eq!(entry.from, Stage::ArticleWaiting);

        let err = AuditEntry::try_from(audit_record(json!(["VERIFY_ARTICLE"]))).unwrap_err();
        assert!(matches!(err, FlowError::CorruptRecord { .. }));
    }

    #[test]
    fn session_selectable_only_before_start_with_capacity() {
        let session = Session {
            session_id: "batch-1".to_string(),
            capacity_remaining: 1,
            starts_at: datetime!(2030-06-01 09:00 UTC),
        };
        assert!(session.is_selectable(datetime!(2030-05-31 09:00 UTC)));
        assert!(!session.is_selectable(datetime!(2030-06-01 09:00 UTC)));

        let full = Session {
            capacity_remaining: 0,
            ..session
        };
        assert!(!full.is_selectable(datetime!(2030-05-31 09:00 UTC)));
    }
}
