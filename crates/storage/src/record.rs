use serde::{Deserialize, Serialize};

/// A participant's position in the approval pipeline as stored in the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub participant_id: String,
    /// Stage code, e.g. `"ARTICLE_VERIFIED"`.
    pub stage: String,
    pub reserved_session_id: Option<String>,
    pub locked: bool,
    /// Present iff `locked`.
    pub lock_reason: Option<String>,
    pub version: i64,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub updated_at: String,
}

/// A capacity-limited training session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub capacity_remaining: i64,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub starts_at: String,
    pub version: i64,
}

/// One applied stage transition. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntryRecord {
    pub id: String,
    pub participant_id: String,
    pub actor_id: String,
    pub from_stage: String,
    pub to_stage: String,
    /// Opaque JSON object supplied by the caller.
    pub metadata: serde_json::Value,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub occurred_at: String,
}
