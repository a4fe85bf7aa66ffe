use std::future::Future;

use super::{make_flow, make_session, seed_flow, seed_session, TestResult};
use crate::{FlowStorage, StorageError};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "init",
        "insert_flow_visible_after_commit",
        insert_flow_visible_after_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "insert_flow_preserves_fields",
        insert_flow_preserves_fields(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "insert_duplicate_flow_already_initialized",
        insert_duplicate_flow_already_initialized(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "insert_duplicate_flow_in_same_snapshot",
        insert_duplicate_flow_in_same_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "insert_session_visible_after_commit",
        insert_session_visible_after_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "insert_duplicate_session_already_initialized",
        insert_duplicate_session_already_initialized(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "empty_store_lists_nothing",
        empty_store_lists_nothing(factory).await,
    ));

    results
}

async fn insert_flow_visible_after_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_flow(&s, "p-1", "PAYMENT_REQUIRED").await?;

    let record = s
        .get_flow("p-1")
        .await
        .map_err(|e| format!("get_flow: {e}"))?;
    if record.stage != "PAYMENT_REQUIRED" {
        return Err(format!("expected stage PAYMENT_REQUIRED, got {}", record.stage));
    }
    if record.version != 0 {
        return Err(format!("expected version 0, got {}", record.version));
    }
    Ok(())
}

async fn insert_flow_preserves_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut original = make_flow("p-1", "TRAINING_WAITING");
    original.reserved_session_id = Some("batch-7".to_string());
    original.updated_at = "2025-03-04T05:06:07Z".to_string();

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_flow(&mut snap, original.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let stored = s.get_flow("p-1").await.map_err(|e| e.to_string())?;
    if stored != original {
        return Err(format!("expected {original:?}, got {stored:?}"));
    }
    Ok(())
}

async fn insert_duplicate_flow_already_initialized<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_flow(&s, "p-1", "PAYMENT_REQUIRED").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .insert_flow(&mut snap, make_flow("p-1", "PAYMENT_REQUIRED"))
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::AlreadyInitialized { table, key }) => {
            if table != "flows" || key != "p-1" {
                return Err(format!("wrong fields: table={table}, key={key}"));
            }
            Ok(())
        }
        other => Err(format!("expected AlreadyInitialized, got {other:?}")),
    }
}

async fn insert_duplicate_flow_in_same_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let result = s
        .insert_flow(&mut snap, make_flow("p-1", "PAYMENT_REQUIRED"))
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::AlreadyInitialized { .. }) => Ok(()),
        other => Err(format!("expected AlreadyInitialized, got {other:?}")),
    }
}

async fn insert_session_visible_after_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "batch-1", 25).await?;

    let record = s.get_session("batch-1").await.map_err(|e| e.to_string())?;
    if record != make_session("batch-1", 25) {
        return Err(format!("unexpected session record: {record:?}"));
    }
    Ok(())
}

async fn insert_duplicate_session_already_initialized<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "batch-1", 25).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.insert_session(&mut snap, make_session("batch-1", 3)).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::AlreadyInitialized { table: "sessions", .. }) => {}
        other => return Err(format!("expected AlreadyInitialized, got {other:?}")),
    }

    let record = s.get_session("batch-1").await.map_err(|e| e.to_string())?;
    if record.capacity_remaining != 25 {
        return Err(format!(
            "duplicate insert overwrote capacity: {}",
            record.capacity_remaining
        ));
    }
    Ok(())
}

async fn empty_store_lists_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let flows = s.list_flows(None).await.map_err(|e| e.to_string())?;
    let sessions = s.list_sessions().await.map_err(|e| e.to_string())?;
    let entries = s
        .list_audit_entries(None, 0)
        .await
        .map_err(|e| e.to_string())?;
    if !flows.is_empty() || !sessions.is_empty() || !entries.is_empty() {
        return Err(format!(
            "expected empty store, got {} flows, {} sessions, {} audit entries",
            flows.len(),
            sessions.len(),
            entries.len()
        ));
    }
    Ok(())
}
