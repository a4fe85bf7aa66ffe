use std::future::Future;

use super::{make_flow, seed_flow, TestResult};
use crate::{FlowStorage, StorageError};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "error",
        "get_flow_nonexistent",
        get_flow_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "get_flow_for_update_nonexistent",
        get_flow_for_update_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "update_flow_nonexistent",
        update_flow_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "get_session_nonexistent",
        get_session_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "get_session_for_update_nonexistent",
        get_session_for_update_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "decrement_capacity_nonexistent",
        decrement_capacity_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "list_audit_entries_empty_for_unknown_participant",
        list_audit_entries_empty_for_unknown_participant(factory).await,
    ));

    results
}

// ── 1. get_flow on empty store returns FlowNotFound with the participant id ──

async fn get_flow_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_flow("p-404").await {
        Err(StorageError::FlowNotFound { participant_id }) => {
            if participant_id != "p-404" {
                return Err(format!(
                    "expected participant_id \"p-404\", got \"{participant_id}\""
                ));
            }
            Ok(())
        }
        other => Err(format!("expected FlowNotFound, got {:?}", other)),
    }
}

// ── 2. get_flow_for_update on a missing flow returns FlowNotFound ────────────

async fn get_flow_for_update_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_flow(&s, "p-1", "PAYMENT_REQUIRED").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.get_flow_for_update(&mut snap, "p-2").await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::FlowNotFound { participant_id }) if participant_id == "p-2" => Ok(()),
        other => Err(format!("expected FlowNotFound for p-2, got {:?}", other)),
    }
}

// ── 3. update_flow on a missing flow returns FlowNotFound ────────────────────

async fn update_flow_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .update_flow(&mut snap, &make_flow("p-9", "PAYMENT_WAITING"), 0)
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::FlowNotFound { .. }) => Ok(()),
        other => Err(format!("expected FlowNotFound, got {:?}", other)),
    }
}

// ── 4. get_session on empty store returns SessionNotFound ────────────────────

async fn get_session_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_session("batch-404").await {
        Err(StorageError::SessionNotFound { session_id }) if session_id == "batch-404" => Ok(()),
        other => Err(format!("expected SessionNotFound, got {:?}", other)),
    }
}

// ── 5. get_session_for_update on a missing session returns SessionNotFound ──

async fn get_session_for_update_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.get_session_for_update(&mut snap, "batch-404").await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::SessionNotFound { .. }) => Ok(()),
        other => Err(format!("expected SessionNotFound, got {:?}", other)),
    }
}

// ── 6. decrement_capacity on a missing session returns SessionNotFound ───────

async fn decrement_capacity_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.decrement_capacity(&mut snap, "batch-404", 0).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::SessionNotFound { .. }) => Ok(()),
        other => Err(format!("expected SessionNotFound, got {:?}", other)),
    }
}

// ── 7. Audit listing for an unknown participant is empty, not an error ───────

async fn list_audit_entries_empty_for_unknown_participant<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let entries = s
        .list_audit_entries(Some("nobody"), 0)
        .await
        .map_err(|e| format!("expected Ok(vec![]), got error: {e}"))?;
    if !entries.is_empty() {
        return Err(format!("expected no entries, got {}", entries.len()));
    }
    Ok(())
}
