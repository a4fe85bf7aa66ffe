use std::future::Future;

use super::{make_audit_entry, seed_flow, seed_session, with_stage, TestResult};
use crate::{FlowRecord, FlowStorage};

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "commit",
        "update_persists_all_mutable_fields",
        update_persists_all_mutable_fields(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "update_returns_new_version",
        update_returns_new_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "sequential_updates_increment_version",
        sequential_updates_increment_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "reservation_unit_all_visible_after_commit",
        reservation_unit_all_visible_after_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "reservation_unit_none_visible_after_abort",
        reservation_unit_none_visible_after_abort(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "multi_flow_updates_all_visible_after_commit",
        multi_flow_updates_all_visible_after_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "list_flows_with_stage_filter",
        list_flows_with_stage_filter(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "list_sessions_after_multiple_commits",
        list_sessions_after_multiple_commits(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "commit_empty_snapshot",
        commit_empty_snapshot(factory).await,
    ));

    results
}

async fn update_persists_all_mutable_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_flow(&s, "p-1", "ARTICLE_VERIFIED").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let current = s
        .get_flow_for_update(&mut snap, "p-1")
        .await
        .map_err(|e| e.to_string())?;
    let next = FlowRecord {
        stage: "TRAINING_WAITING".to_string(),
        reserved_session_id: Some("batch-1".to_string()),
        locked: true,
        lock_reason: Some("document audit".to_string()),
        updated_at: "2025-02-02T10:00:00Z".to_string(),
        ..current
    };
    s.update_flow(&mut snap, &next, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let stored = s.get_flow("p-1").await.map_err(|e| e.to_string())?;
    let expected = FlowRecord { version: 1, ..next };
    if stored != expected {
        return Err(format!("expected {expected:?}, got {stored:?}"));
    }
    Ok(())
}

async fn update_returns_new_version<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let version = s
        .update_flow(&mut snap, &with_stage(&current, "PAYMENT_WAITING"), 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if version != 1 {
        return Err(format!("expected returned version 1, got {version}"));
    }
    Ok(())
}

async fn sequential_updates_increment_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_flow(&s, "p-1", "PAYMENT_REQUIRED").await?;

    let stages = ["PAYMENT_WAITING", "PAYMENT_VERIFIED", "ADMINISTRATIVE_WAITING"];
    for (i, stage) in stages.iter().enumerate() {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        let current = s
            .get_flow_for_update(&mut snap, "p-1")
            .await
            .map_err(|e| e.to_string())?;
        let version = s
            .update_flow(&mut snap, &with_stage(&current, stage), current.version)
            .await
            .map_err(|e| format!("update {i}: {e}"))?;
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
        if version != i as i64 + 1 {
            return Err(format!("update {i}: expected version {}, got {version}", i + 1));
        }
    }

    let stored = s.get_flow("p-1").await.map_err(|e| e.to_string())?;
    if stored.version != 3 || stored.stage != "ADMINISTRATIVE_WAITING" {
        return Err(format!(
            "expected ADMINISTRATIVE_WAITING@3, got {}@{}",
            stored.stage, stored.version
        ));
    }
    Ok(())
}

/// Decrement + flow update + audit entry in one snapshot: all visible after commit.
async fn reservation_unit_all_visible_after_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_flow(&s, "p-1", "ARTICLE_VERIFIED").await?;
    seed_session(&s, "batch-1", 3).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let flow = s
        .get_flow_for_update(&mut snap, "p-1")
        .await
        .map_err(|e| e.to_string())?;
    let session = s
        .get_session_for_update(&mut snap, "batch-1")
        .await
        .map_err(|e| e.to_string())?;
    let remaining = s
        .decrement_capacity(&mut snap, "batch-1", session.version)
        .await
        .map_err(|e| e.to_string())?;
    let next = FlowRecord {
        stage: "TRAINING_WAITING".to_string(),
        reserved_session_id: Some("batch-1".to_string()),
        ..flow
    };
    s.update_flow(&mut snap, &next, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.append_audit_entry(
        &mut snap,
        make_audit_entry("a-1", "p-1", "ARTICLE_VERIFIED", "TRAINING_WAITING"),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if remaining != 2 {
        return Err(format!("decrement returned {remaining}, expected 2"));
    }
    let stored_session = s.get_session("batch-1").await.map_err(|e| e.to_string())?;
    let stored_flow = s.get_flow("p-1").await.map_err(|e| e.to_string())?;
    let entries = s
        .list_audit_entries(Some("p-1"), 0)
        .await
        .map_err(|e| e.to_string())?;
    if stored_session.capacity_remaining != 2 {
        return Err(format!(
            "capacity not committed: {}",
            stored_session.capacity_remaining
        ));
    }
    if stored_flow.reserved_session_id.as_deref() != Some("batch-1")
        || stored_flow.stage != "TRAINING_WAITING"
    {
        return Err(format!("flow not committed: {stored_flow:?}"));
    }
    if entries.len() != 1 {
        return Err(format!("expected 1 audit entry, got {}", entries.len()));
    }
    Ok(())
}

/// Same unit aborted: no decrement, no flow change, no audit entry.
async fn reservation_unit_none_visible_after_abort<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_flow(&s, "p-1", "ARTICLE_VERIFIED").await?;
    seed_session(&s, "batch-1", 3).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let flow = s
        .get_flow_for_update(&mut snap, "p-1")
        .await
        .map_err(|e| e.to_string())?;
    let session = s
        .get_session_for_update(&mut snap, "batch-1")
        .await
        .map_err(|e| e.to_string())?;
    s.decrement_capacity(&mut snap, "batch-1", session.version)
        .await
        .map_err(|e| e.to_string())?;
    let next = FlowRecord {
        stage: "TRAINING_WAITING".to_string(),
        reserved_session_id: Some("batch-1".to_string()),
        ..flow
    };
    s.update_flow(&mut snap, &next, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.append_audit_entry(
        &mut snap,
        make_audit_entry("a-1", "p-1", "ARTICLE_VERIFIED", "TRAINING_WAITING"),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let stored_session = s.get_session("batch-1").await.map_err(|e| e.to_string())?;
    let stored_flow = s.get_flow("p-1").await.map_err(|e| e.to_string())?;
    let entries = s
        .list_audit_entries(None, 0)
        .await
        .map_err(|e| e.to_string())?;
    if stored_session.capacity_remaining != 3 || stored_session.version != 0 {
        return Err(format!("session changed after abort: {stored_session:?}"));
    }
    if stored_flow.stage != "ARTICLE_VERIFIED" || stored_flow.reserved_session_id.is_some() {
        return Err(format!("flow changed after abort: {stored_flow:?}"));
    }
    if !entries.is_empty() {
        return Err(format!("{} audit entries survived abort", entries.len()));
    }
    Ok(())
}

async fn multi_flow_updates_all_visible_after_commit<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for p in ["p-1", "p-2", "p-3"] {
        seed_flow(&s, p, "PAYMENT_WAITING").await?;
    }

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    for p in ["p-1", "p-2", "p-3"] {
        let current = s
            .get_flow_for_update(&mut snap, p)
            .await
            .map_err(|e| e.to_string())?;
        s.update_flow(&mut snap, &with_stage(&current, "PAYMENT_VERIFIED"), 0)
            .await
            .map_err(|e| format!("update {p}: {e}"))?;
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    for p in ["p-1", "p-2", "p-3"] {
        let stored = s.get_flow(p).await.map_err(|e| e.to_string())?;
        if stored.stage != "PAYMENT_VERIFIED" {
            return Err(format!("{p}: expected PAYMENT_VERIFIED, got {}", stored.stage));
        }
    }
    Ok(())
}

async fn list_flows_with_stage_filter<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_flow(&s, "p-1", "ARTICLE_WAITING").await?;
    seed_flow(&s, "p-2", "ARTICLE_WAITING").await?;
    seed_flow(&s, "p-3", "PAYMENT_REQUIRED").await?;

    let all = s.list_flows(None).await.map_err(|e| e.to_string())?;
    if all.len() != 3 {
        return Err(format!("expected 3 flows, got {}", all.len()));
    }
    let waiting = s
        .list_flows(Some("ARTICLE_WAITING"))
        .await
        .map_err(|e| e.to_string())?;
    if waiting.len() != 2 || waiting.iter().any(|f| f.stage != "ARTICLE_WAITING") {
        return Err(format!("stage filter returned {waiting:?}"));
    }
    Ok(())
}

async fn list_sessions_after_multiple_commits<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "batch-1", 10).await?;
    seed_session(&s, "batch-2", 0).await?;

    let mut ids: Vec<String> = s
        .list_sessions()
        .await
        .map_err(|e| e.to_string())?
        .into_iter()
        .map(|r| r.session_id)
        .collect();
    ids.sort();
    if ids != ["batch-1", "batch-2"] {
        return Err(format!("unexpected sessions: {ids:?}"));
    }
    Ok(())
}

async fn commit_empty_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("empty commit failed: {e}"))
}
