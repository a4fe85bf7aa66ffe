use std::future::Future;

use super::{make_audit_entry, seed_flow, TestResult};
use crate::FlowStorage;

pub(super) async fn run_audit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "audit",
        "audit_entry_fields_preserved",
        audit_entry_fields_preserved(factory).await,
    ));
    results.push(TestResult::from_result(
        "audit",
        "participant_listing_in_append_order",
        participant_listing_in_append_order(factory).await,
    ));
    results.push(TestResult::from_result(
        "audit",
        "global_listing_newest_first_with_limit",
        global_listing_newest_first_with_limit(factory).await,
    ));
    results.push(TestResult::from_result(
        "audit",
        "participant_filter_excludes_others",
        participant_filter_excludes_others(factory).await,
    ));
    results.push(TestResult::from_result(
        "audit",
        "audit_entry_rolled_back_with_snapshot",
        audit_entry_rolled_back_with_snapshot(factory).await,
    ));

    results
}

/// Append entries in separate committed snapshots.
async fn append_committed<S: FlowStorage>(
    s: &S,
    entries: &[(&str, &str, &str, &str)],
) -> Result<(), String> {
    for (id, participant, from, to) in entries {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.append_audit_entry(&mut snap, make_audit_entry(id, participant, from, to))
            .await
            .map_err(|e| format!("append {id}: {e}"))?;
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    }
    Ok(())
}

async fn audit_entry_fields_preserved<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut entry = make_audit_entry("a-1", "p-1", "PAYMENT_WAITING", "PAYMENT_VERIFIED");
    entry.metadata = serde_json::json!({"action": "VERIFY_PAYMENT", "paymentId": "att-77"});

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.append_audit_entry(&mut snap, entry.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let stored = s
        .list_audit_entries(Some("p-1"), 0)
        .await
        .map_err(|e| e.to_string())?;
    if stored != vec![entry] {
        return Err(format!("audit entry not preserved: {stored:?}"));
    }
    Ok(())
}

async fn participant_listing_in_append_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    append_committed(
        &s,
        &[
            ("a-1", "p-1", "PAYMENT_REQUIRED", "PAYMENT_WAITING"),
            ("a-2", "p-1", "PAYMENT_WAITING", "PAYMENT_VERIFIED"),
            ("a-3", "p-1", "PAYMENT_VERIFIED", "ADMINISTRATIVE_WAITING"),
        ],
    )
    .await?;

    let ids: Vec<String> = s
        .list_audit_entries(Some("p-1"), 0)
        .await
        .map_err(|e| e.to_string())?
        .into_iter()
        .map(|e| e.id)
        .collect();
    if ids != ["a-1", "a-2", "a-3"] {
        return Err(format!("expected append order, got {ids:?}"));
    }
    Ok(())
}

async fn global_listing_newest_first_with_limit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    append_committed(
        &s,
        &[
            ("a-1", "p-1", "PAYMENT_REQUIRED", "PAYMENT_WAITING"),
            ("a-2", "p-2", "PAYMENT_REQUIRED", "PAYMENT_WAITING"),
            ("a-3", "p-1", "PAYMENT_WAITING", "PAYMENT_VERIFIED"),
        ],
    )
    .await?;

    let ids: Vec<String> = s
        .list_audit_entries(None, 2)
        .await
        .map_err(|e| e.to_string())?
        .into_iter()
        .map(|e| e.id)
        .collect();
    if ids != ["a-3", "a-2"] {
        return Err(format!("expected [a-3, a-2], got {ids:?}"));
    }
    Ok(())
}

async fn participant_filter_excludes_others<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    append_committed(
        &s,
        &[
            ("a-1", "p-1", "PAYMENT_REQUIRED", "PAYMENT_WAITING"),
            ("a-2", "p-2", "PAYMENT_REQUIRED", "PAYMENT_WAITING"),
        ],
    )
    .await?;

    let entries = s
        .list_audit_entries(Some("p-2"), 0)
        .await
        .map_err(|e| e.to_string())?;
    if entries.len() != 1 || entries[0].participant_id != "p-2" {
        return Err(format!("participant filter leaked: {entries:?}"));
    }
    Ok(())
}

/// An audit entry appended in an aborted snapshot never becomes visible,
/// together with the flow update it accompanied.
async fn audit_entry_rolled_back_with_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FlowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_flow(&s, "p-1", "ARTICLE_WAITING").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let current = s
        .get_flow_for_update(&mut snap, "p-1")
        .await
        .map_err(|e| e.to_string())?;
    s.update_flow(&mut snap, &super::with_stage(&current, "ARTICLE_VERIFIED"), 0)
        .await
        .map_err(|e| e.to_string())?;
    s.append_audit_entry(
        &mut snap,
        make_audit_entry("a-1", "p-1", "ARTICLE_WAITING", "ARTICLE_VERIFIED"),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let entries = s
        .list_audit_entries(Some("p-1"), 0)
        .await
        .map_err(|e| e.to_string())?;
    let flow = s.get_flow("p-1").await.map_err(|e| e.to_string())?;
    if !entries.is_empty() || flow.stage != "ARTICLE_WAITING" {
        return Err(format!(
            "abort leaked: {} entries, stage {}",
            entries.len(),
            flow.stage
        ));
    }
    Ok(())
}
