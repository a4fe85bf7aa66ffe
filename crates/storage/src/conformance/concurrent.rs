use std::future::Future;
use std::sync::Arc;

use super::{make_flow, seed_flow, seed_session, with_stage, TestResult};
use crate::{FlowStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_blind_updates_exactly_one_wins",
        concurrent_blind_updates_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_inserts_exactly_one_wins",
        concurrent_inserts_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_different_flows_all_succeed",
        concurrent_updates_different_flows_all_succeed(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "locked_read_modify_write_loses_no_update",
        locked_read_modify_write_loses_no_update(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_decrements_never_underflow",
        concurrent_decrements_never_underflow(factory).await,
    ));

    results
}

// ── Blind updates at version 0: exactly one wins ────────────────────────────

/// N tasks each open a snapshot and update the same flow expecting version 0
/// without reading it first. Exactly one commit succeeds; the rest must get
/// ConcurrentConflict.
async fn concurrent_blind_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_flow(storage.as_ref(), "p-1", "PAYMENT_WAITING").await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let mut record = make_flow("p-1", "PAYMENT_VERIFIED");
            record.updated_at = format!("2025-01-01T00:00:{i:02}Z");
            match s.update_flow(&mut snap, &record, 0).await {
                Ok(_) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::ConcurrentConflict { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let (winners, losers) = tally(handles).await?;
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }

    let record = storage.get_flow("p-1").await.map_err(|e| e.to_string())?;
    if record.version != 1 || record.stage != "PAYMENT_VERIFIED" {
        return Err(format!("inconsistent final flow: {record:?}"));
    }
    Ok(())
}

// ── Concurrent registration: exactly one wins ───────────────────────────────

async fn concurrent_inserts_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            match s
                .insert_flow(&mut snap, make_flow("p-1", "PAYMENT_REQUIRED"))
                .await
            {
                Ok(()) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::AlreadyInitialized { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let (winners, losers) = tally(handles).await?;
    if winners != 1 || losers != N - 1 {
        return Err(format!(
            "expected 1 winner and {} losers, got {winners} and {losers}",
            N - 1
        ));
    }
    Ok(())
}

// ── Different flows: no false conflicts ─────────────────────────────────────

async fn concurrent_updates_different_flows_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    for i in 0..N {
        seed_flow(storage.as_ref(), &format!("p-{i}"), "ARTICLE_WAITING").await?;
    }

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let participant = format!("p-{i}");
            let mut snap = s.begin_snapshot().await?;
            let current = s.get_flow_for_update(&mut snap, &participant).await?;
            s.update_flow(&mut snap, &with_stage(&current, "ARTICLE_VERIFIED"), 0)
                .await?;
            s.commit_snapshot(snap).await?;
            Ok::<(), StorageError>(())
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        handle
            .await
            .map_err(|e| format!("task {i} panic: {e}"))?
            .map_err(|e| format!("task {i} failed: {e}"))?;
    }

    for i in 0..N {
        let record = storage
            .get_flow(&format!("p-{i}"))
            .await
            .map_err(|e| format!("get p-{i}: {e}"))?;
        if record.stage != "ARTICLE_VERIFIED" || record.version != 1 {
            return Err(format!("p-{i}: unexpected {}@{}", record.stage, record.version));
        }
    }
    Ok(())
}

// ── Row locks serialize read-modify-write ───────────────────────────────────

/// N tasks each lock the flow, read its version, and write back with that
/// version. With row locks every task sees its predecessor's commit, so all
/// succeed and the final version is N.
async fn locked_read_modify_write_loses_no_update<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_flow(storage.as_ref(), "p-1", "TRAINING_WAITING").await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let current = s.get_flow_for_update(&mut snap, "p-1").await?;
            let mut next = current.clone();
            next.updated_at = format!("2025-01-01T00:01:{i:02}Z");
            s.update_flow(&mut snap, &next, current.version).await?;
            s.commit_snapshot(snap).await?;
            Ok::<(), StorageError>(())
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        handle
            .await
            .map_err(|e| format!("task {i} panic: {e}"))?
            .map_err(|e| format!("task {i} lost its update: {e}"))?;
    }

    let record = storage.get_flow("p-1").await.map_err(|e| e.to_string())?;
    if record.version != N as i64 {
        return Err(format!("expected version {N}, got {}", record.version));
    }
    Ok(())
}

// ── Capacity under contention ───────────────────────────────────────────────

/// N tasks race to take one unit each from a session with capacity 3.
/// Exactly 3 succeed and the counter ends at zero.
async fn concurrent_decrements_never_underflow<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    const CAPACITY: i64 = 3;
    let storage = Arc::new(factory().await);
    seed_session(storage.as_ref(), "batch-1", CAPACITY).await?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let session = s.get_session_for_update(&mut snap, "batch-1").await?;
            if session.capacity_remaining <= 0 {
                s.abort_snapshot(snap).await?;
                return Ok(false);
            }
            s.decrement_capacity(&mut snap, "batch-1", session.version)
                .await?;
            s.commit_snapshot(snap).await?;
            Ok::<bool, StorageError>(true)
        }));
    }

    let (winners, _) = tally(handles).await?;
    if winners != CAPACITY as usize {
        return Err(format!("expected {CAPACITY} reservations, got {winners}"));
    }
    let session = storage
        .get_session("batch-1")
        .await
        .map_err(|e| e.to_string())?;
    if session.capacity_remaining != 0 {
        return Err(format!(
            "expected capacity 0, got {}",
            session.capacity_remaining
        ));
    }
    Ok(())
}

/// Join all handles and count `true` (won) and `false` (lost) results.
async fn tally(
    handles: Vec<tokio::task::JoinHandle<Result<bool, StorageError>>>,
) -> Result<(usize, usize), String> {
    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }
    Ok((winners, losers))
}
