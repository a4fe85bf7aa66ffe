use std::future::Future;

use super::{seed_session, TestResult};
use crate::{FlowStorage, StorageError};

pub(super) async fn run_capacity_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "capacity",
        "decrement_returns_remaining",
        decrement_returns_remaining(factory).await,
    ));
    results.push(TestResult::from_result(
        "capacity",
        "decrement_at_zero_underflows",
        decrement_at_zero_underflows(factory).await,
    ));
    results.push(TestResult::from_result(
        "capacity",
        "last_unit_then_underflow",
        last_unit_then_underflow(factory).await,
    ));
    results.push(TestResult::from_result(
        "capacity",
        "two_decrements_in_one_snapshot",
        two_decrements_in_one_snapshot(factory).await,
    ));

    results
}

async fn decrement_returns_remaining<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "batch-1", 30).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let remaining = s
        .decrement_capacity(&mut snap, "batch-1", 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if remaining != 29 {
        return Err(format!("expected 29, got {remaining}"));
    }
    Ok(())
}

/// The store itself refuses to take capacity below zero.
async fn decrement_at_zero_underflows<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "batch-full", 0).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.decrement_capacity(&mut snap, "batch-full", 0).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::CapacityUnderflow { session_id }) if session_id == "batch-full" => {}
        other => return Err(format!("expected CapacityUnderflow, got {other:?}")),
    }

    let stored = s
        .get_session("batch-full")
        .await
        .map_err(|e| e.to_string())?;
    if stored.capacity_remaining != 0 || stored.version != 0 {
        return Err(format!("underflow mutated the session: {stored:?}"));
    }
    Ok(())
}

async fn last_unit_then_underflow<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "batch-1", 1).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let remaining = s
        .decrement_capacity(&mut snap, "batch-1", 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    if remaining != 0 {
        return Err(format!("expected 0 after last unit, got {remaining}"));
    }

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.decrement_capacity(&mut snap, "batch-1", 1).await;
    let _ = s.abort_snapshot(snap).await;
    if !matches!(result, Err(StorageError::CapacityUnderflow { .. })) {
        return Err(format!("expected CapacityUnderflow, got {result:?}"));
    }
    Ok(())
}

async fn two_decrements_in_one_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "batch-1", 2).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.decrement_capacity(&mut snap, "batch-1", 0)
        .await
        .map_err(|e| e.to_string())?;
    let remaining = s
        .decrement_capacity(&mut snap, "batch-1", 1)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let stored = s.get_session("batch-1").await.map_err(|e| e.to_string())?;
    if remaining != 0 || stored.capacity_remaining != 0 || stored.version != 2 {
        return Err(format!(
            "expected 0@2, got returned {remaining}, stored {stored:?}"
        ));
    }
    Ok(())
}
