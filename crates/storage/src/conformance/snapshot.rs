use std::future::Future;

use super::{make_flow, seed_flow, seed_session, with_stage, TestResult};
use crate::FlowStorage;

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_insert_invisible",
        uncommitted_insert_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_update_invisible",
        uncommitted_update_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "snapshot_reads_own_writes",
        snapshot_reads_own_writes(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "aborted_update_not_visible",
        aborted_update_not_visible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "dropped_snapshot_rolls_back",
        dropped_snapshot_rolls_back(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "row_lock_released_after_abort",
        row_lock_released_after_abort(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_decrement_invisible",
        uncommitted_decrement_invisible(factory).await,
    ));

    results
}

/// A flow inserted in an open snapshot is not visible to non-snapshot reads.
async fn uncommitted_insert_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_flow(&mut snap, make_flow("p-1", "PAYMENT_REQUIRED"))
        .await
        .map_err(|e| e.to_string())?;

    let visible = s.get_flow("p-1").await.is_ok();
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if visible {
        return Err("uncommitted insert was visible outside its snapshot".to_string());
    }
    s.get_flow("p-1")
        .await
        .map_err(|e| format!("insert not visible after commit: {e}"))?;
    Ok(())
}

/// An update made in an open snapshot is not visible until commit.
async fn uncommitted_update_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
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

    let outside = s.get_flow("p-1").await.map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if outside.stage != "PAYMENT_REQUIRED" || outside.version != 0 {
        return Err(format!(
            "uncommitted update leaked: stage {}, version {}",
            outside.stage, outside.version
        ));
    }
    let after = s.get_flow("p-1").await.map_err(|e| e.to_string())?;
    if after.stage != "PAYMENT_WAITING" || after.version != 1 {
        return Err(format!(
            "committed update missing: stage {}, version {}",
            after.stage, after.version
        ));
    }
    Ok(())
}

/// Reads through a snapshot observe the snapshot's own pending writes.
async fn snapshot_reads_own_writes<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let reread = s
        .get_flow_for_update(&mut snap, "p-1")
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if reread.stage != "PAYMENT_WAITING" || reread.version != 1 {
        return Err(format!(
            "snapshot did not see its own write: stage {}, version {}",
            reread.stage, reread.version
        ));
    }
    Ok(())
}

async fn aborted_update_not_visible<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let after = s.get_flow("p-1").await.map_err(|e| e.to_string())?;
    if after.stage != "PAYMENT_REQUIRED" || after.version != 0 {
        return Err(format!(
            "aborted update visible: stage {}, version {}",
            after.stage, after.version
        ));
    }
    Ok(())
}

/// Dropping a snapshot without commit behaves like abort.
async fn dropped_snapshot_rolls_back<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_flow(&s, "p-1", "PAYMENT_REQUIRED").await?;

    {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        let current = s
            .get_flow_for_update(&mut snap, "p-1")
            .await
            .map_err(|e| e.to_string())?;
        s.update_flow(&mut snap, &with_stage(&current, "PAYMENT_WAITING"), 0)
            .await
            .map_err(|e| e.to_string())?;
        drop(snap);
    }

    let after = s.get_flow("p-1").await.map_err(|e| e.to_string())?;
    if after.stage != "PAYMENT_REQUIRED" {
        return Err(format!("dropped snapshot was applied: stage {}", after.stage));
    }

    // The row lock must have been released by the drop.
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.get_flow_for_update(&mut snap, "p-1")
        .await
        .map_err(|e| format!("relock after drop: {e}"))?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    Ok(())
}

async fn row_lock_released_after_abort<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_flow(&s, "p-1", "PAYMENT_REQUIRED").await?;

    let mut first = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.get_flow_for_update(&mut first, "p-1")
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(first).await.map_err(|e| e.to_string())?;

    let mut second = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let current = s
        .get_flow_for_update(&mut second, "p-1")
        .await
        .map_err(|e| e.to_string())?;
    s.update_flow(&mut second, &with_stage(&current, "PAYMENT_WAITING"), 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(second).await.map_err(|e| e.to_string())?;

    let after = s.get_flow("p-1").await.map_err(|e| e.to_string())?;
    if after.stage != "PAYMENT_WAITING" {
        return Err(format!("expected PAYMENT_WAITING, got {}", after.stage));
    }
    Ok(())
}

async fn uncommitted_decrement_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "batch-1", 2).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let session = s
        .get_session_for_update(&mut snap, "batch-1")
        .await
        .map_err(|e| e.to_string())?;
    s.decrement_capacity(&mut snap, "batch-1", session.version)
        .await
        .map_err(|e| e.to_string())?;

    let outside = s.get_session("batch-1").await.map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if outside.capacity_remaining != 2 {
        return Err(format!(
            "uncommitted decrement leaked: remaining {}",
            outside.capacity_remaining
        ));
    }
    let after = s.get_session("batch-1").await.map_err(|e| e.to_string())?;
    if after.capacity_remaining != 2 {
        return Err(format!(
            "aborted decrement applied: remaining {}",
            after.capacity_remaining
        ));
    }
    Ok(())
}
