//! Conformance test suite for `FlowStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any `FlowStorage`
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Initialization**: flow and session creation, duplicate detection
//! - **Snapshot isolation**: uncommitted writes invisible, committed writes visible
//! - **Atomic commit**: all-or-nothing semantics for multi-record snapshots
//! - **Version validation / OCC**: optimistic concurrency conflict detection
//! - **Capacity**: decrement semantics, no underflow
//! - **Audit coupling**: audit entries committed and rolled back with their flow update
//! - **Concurrency**: racing snapshots against the same and different rows
//! - **Error handling**: correct error variants for invalid operations
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use tollgate_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test(flavor = "multi_thread")]
//! async fn memory_conformance() {
//!     let report = run_conformance_suite(|| async { MemoryStorage::new() }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod audit;
mod capacity;
mod commit;
mod concurrent;
mod error;
mod init;
mod snapshot;
mod version;

use std::fmt;
use std::future::Future;

use crate::record::{AuditEntryRecord, FlowRecord, SessionRecord};
use crate::FlowStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "snapshot", "commit").
    pub category: String,
    /// Test name (e.g. "insert_flow_visible_after_commit").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation. The concurrency category spawns
/// tasks with `tokio::spawn`, so the suite must run inside a Tokio runtime.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(init::run_init_tests(&factory).await);
    results.extend(error::run_error_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(commit::run_commit_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(capacity::run_capacity_tests(&factory).await);
    results.extend(audit::run_audit_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn make_flow(participant_id: &str, stage: &str) -> FlowRecord {
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

fn make_session(session_id: &str, capacity_remaining: i64) -> SessionRecord {
    SessionRecord {
        session_id: session_id.to_string(),
        capacity_remaining,
        starts_at: "2030-06-01T09:00:00Z".to_string(),
        version: 0,
    }
}

fn make_audit_entry(id: &str, participant_id: &str, from: &str, to: &str) -> AuditEntryRecord {
    AuditEntryRecord {
        id: id.to_string(),
        participant_id: participant_id.to_string(),
        actor_id: "admin-1".to_string(),
        from_stage: from.to_string(),
        to_stage: to.to_string(),
        metadata: serde_json::json!({"action": "TEST"}),
        occurred_at: "2025-01-01T00:00:30Z".to_string(),
    }
}

/// Insert a flow in its own committed snapshot.
async fn seed_flow<S: FlowStorage>(s: &S, participant_id: &str, stage: &str) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_flow(&mut snap, make_flow(participant_id, stage))
        .await
        .map_err(|e| format!("insert flow {participant_id}: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit seed flow: {e}"))
}

/// Insert a session in its own committed snapshot.
async fn seed_session<S: FlowStorage>(
    s: &S,
    session_id: &str,
    capacity_remaining: i64,
) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_session(&mut snap, make_session(session_id, capacity_remaining))
        .await
        .map_err(|e| format!("insert session {session_id}: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit seed session: {e}"))
}

/// Copy of `record` moved to `stage`.
fn with_stage(record: &FlowRecord, stage: &str) -> FlowRecord {
    FlowRecord {
        stage: stage.to_string(),
        ..record.clone()
    }
}
