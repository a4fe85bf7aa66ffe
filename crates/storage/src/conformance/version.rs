use std::future::Future;

use super::{seed_flow, seed_session, with_stage, TestResult};
use crate::{FlowStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "version",
        "stale_flow_version_conflicts",
        stale_flow_version_conflicts(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "flow_conflict_leaves_state_unchanged",
        flow_conflict_leaves_state_unchanged(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "retry_with_fresh_version_succeeds",
        retry_with_fresh_version_succeeds(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "stale_session_version_conflicts",
        stale_session_version_conflicts(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "decrement_increments_session_version",
        decrement_increments_session_version(factory).await,
    ));

    results
}

/// After one committed update (version 1), an update expecting version 0
/// must fail with ConcurrentConflict carrying the table, key and version.
async fn stale_flow_version_conflicts<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_flow(&s, "p-1", "PAYMENT_REQUIRED").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let current = s
        .get_flow_for_update(&mut snap, "p-1")
        .await
        .map_err(|e| e.to_string())?;
    s.update_flow(&mut snap, &with_stage(&current, "PAYMENT_WAITING"), 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .update_flow(&mut snap, &with_stage(&current, "PAYMENT_VERIFIED"), 0)
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ConcurrentConflict {
            table,
            key,
            expected_version,
        }) => {
            if table != "flows" || key != "p-1" || expected_version != 0 {
                return Err(format!(
                    "wrong conflict fields: {table}/{key} expected_version={expected_version}"
                ));
            }
            Ok(())
        }
        other => Err(format!("expected ConcurrentConflict, got {other:?}")),
    }
}

async fn flow_conflict_leaves_state_unchanged<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_flow(&s, "p-1", "PAYMENT_REQUIRED").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let current = s
        .get_flow_for_update(&mut snap, "p-1")
        .await
        .map_err(|e| e.to_string())?;
    let result = s
        .update_flow(&mut snap, &with_stage(&current, "PAYMENT_WAITING"), 7)
        .await;
    let _ = s.abort_snapshot(snap).await;
    if !matches!(result, Err(StorageError::ConcurrentConflict { .. })) {
        return Err(format!("expected ConcurrentConflict, got {result:?}"));
    }

    let stored = s.get_flow("p-1").await.map_err(|e| e.to_string())?;
    if stored.stage != "PAYMENT_REQUIRED" || stored.version != 0 {
        return Err(format!("conflict mutated the flow: {stored:?}"));
    }
    Ok(())
}

async fn retry_with_fresh_version_succeeds<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_flow(&s, "p-1", "PAYMENT_REQUIRED").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let current = s
        .get_flow_for_update(&mut snap, "p-1")
        .await
        .map_err(|e| e.to_string())?;
    let stale = s
        .update_flow(&mut snap, &with_stage(&current, "PAYMENT_WAITING"), 5)
        .await;
    if !matches!(stale, Err(StorageError::ConcurrentConflict { .. })) {
        let _ = s.abort_snapshot(snap).await;
        return Err(format!("expected ConcurrentConflict, got {stale:?}"));
    }
    let version = s
        .update_flow(
            &mut snap,
            &with_stage(&current, "PAYMENT_WAITING"),
            current.version,
        )
        .await
        .map_err(|e| format!("fresh update: {e}"))?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if version != 1 {
        return Err(format!("expected version 1, got {version}"));
    }
    Ok(())
}

async fn stale_session_version_conflicts<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "batch-1", 5).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.decrement_capacity(&mut snap, "batch-1", 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.decrement_capacity(&mut snap, "batch-1", 0).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ConcurrentConflict {
            table: "sessions", ..
        }) => {}
        other => return Err(format!("expected ConcurrentConflict, got {other:?}")),
    }

    let stored = s.get_session("batch-1").await.map_err(|e| e.to_string())?;
    if stored.capacity_remaining != 4 {
        return Err(format!(
            "expected remaining 4, got {}",
            stored.capacity_remaining
        ));
    }
    Ok(())
}

async fn decrement_increments_session_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "batch-1", 5).await?;

    for expected in 0..3 {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        let session = s
            .get_session_for_update(&mut snap, "batch-1")
            .await
            .map_err(|e| e.to_string())?;
        if session.version != expected {
            let _ = s.abort_snapshot(snap).await;
            return Err(format!(
                "expected version {expected}, got {}",
                session.version
            ));
        }
        s.decrement_capacity(&mut snap, "batch-1", session.version)
            .await
            .map_err(|e| e.to_string())?;
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    }

    let stored = s.get_session("batch-1").await.map_err(|e| e.to_string())?;
    if stored.version != 3 || stored.capacity_remaining != 2 {
        return Err(format!("unexpected session after 3 decrements: {stored:?}"));
    }
    Ok(())
}
