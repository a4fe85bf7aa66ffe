//! Transition, lock and audit behaviour of the flow engine.

mod common;

use common::{engine, flow_at, meta, ADMIN, TO_ARTICLE_VERIFIED};
use tollgate_engine::{transitions, FlowError, Stage};
use tollgate_storage::FlowStorage;

#[tokio::test]
async fn register_starts_at_payment_required() {
    let engine = engine();
    let flow = engine.register("p-1").await.unwrap();
    assert_eq!(flow.stage, Stage::PaymentRequired);
    assert_eq!(flow.version, 0);
    assert!(!flow.locked);
    assert_eq!(flow.reserved_session_id, None);
    assert_eq!(flow.updated_at, "2030-01-15T10:00:00Z");
}

#[tokio::test]
async fn register_twice_is_rejected() {
    let engine = engine();
    engine.register("p-1").await.unwrap();
    let err = engine.register("p-1").await.unwrap_err();
    assert!(matches!(err, FlowError::AlreadyRegistered { ref participant_id } if participant_id == "p-1"));
}

#[tokio::test]
async fn allowed_transition_updates_stage_and_writes_audit_entry() {
    let engine = engine();
    engine.register("p-1").await.unwrap();

    let mut metadata = meta("UPLOAD_PAYMENT_PROOF");
    metadata.insert("fileName".to_string(), "receipt.pdf".into());
    let flow = engine
        .transition_status("p-1", Stage::PaymentWaiting, "p-1", metadata.clone())
        .await
        .unwrap();
    assert_eq!(flow.stage, Stage::PaymentWaiting);
    assert_eq!(flow.version, 1);

    let trail = engine.audit_trail("p-1").await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].actor_id, "p-1");
    assert_eq!(trail[0].from, Stage::PaymentRequired);
    assert_eq!(trail[0].to, Stage::PaymentWaiting);
    assert_eq!(trail[0].metadata, metadata);
    assert_eq!(trail[0].occurred_at, "2030-01-15T10:00:00Z");
}

#[tokio::test]
async fn off_table_transition_changes_nothing() {
    let engine = engine();
    engine.register("p-1").await.unwrap();

    let err = engine
        .transition_status("p-1", Stage::LoaPublished, ADMIN, meta("UPLOAD_LOA"))
        .await
        .unwrap_err();
    match err {
        FlowError::InvalidTransition {
            participant_id,
            from,
            to,
        } => {
            assert_eq!(participant_id, "p-1");
            assert_eq!(from, Stage::PaymentRequired);
            assert_eq!(to, Stage::LoaPublished);
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }

    let flow = engine.get_flow("p-1").await.unwrap();
    assert_eq!(flow.stage, Stage::PaymentRequired);
    assert_eq!(flow.version, 0);
    assert!(engine.audit_trail("p-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn same_stage_transition_is_invalid() {
    let engine = engine();
    flow_at(&engine, "p-1", &[Stage::PaymentWaiting]).await;
    let err = engine
        .transition_status("p-1", Stage::PaymentWaiting, ADMIN, meta("NOOP"))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::InvalidTransition { .. }));
}

#[tokio::test]
async fn terminal_stage_accepts_nothing() {
    let engine = engine();
    let mut path = TO_ARTICLE_VERIFIED.to_vec();
    path.extend([
        Stage::TrainingWaiting,
        Stage::TrainingVerified,
        Stage::ReviewVerified,
        Stage::LoaWaiting,
        Stage::LoaPublished,
    ]);
    flow_at(&engine, "p-1", &path).await;

    for to in Stage::ALL {
        let err = engine
            .transition_status("p-1", to, ADMIN, meta("AFTER_END"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidTransition { from: Stage::LoaPublished, .. }));
    }
}

#[tokio::test]
async fn unknown_participant_is_not_found() {
    let engine = engine();
    let err = engine
        .transition_status("ghost", Stage::PaymentWaiting, ADMIN, meta("X"))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::FlowNotFound { ref participant_id } if participant_id == "ghost"));
    assert!(err.is_business());

    let err = engine.lock_flow("ghost", "fraud check").await.unwrap_err();
    assert!(matches!(err, FlowError::FlowNotFound { .. }));
}

#[tokio::test]
async fn locked_flow_rejects_transitions_without_side_effects() {
    let engine = engine();
    flow_at(&engine, "p-1", &[Stage::PaymentWaiting]).await;

    let locked = engine.lock_flow("p-1", "duplicate payment").await.unwrap();
    assert!(locked.locked);
    assert_eq!(locked.lock_reason.as_deref(), Some("duplicate payment"));
    assert_eq!(locked.stage, Stage::PaymentWaiting);

    let err = engine
        .transition_status("p-1", Stage::PaymentVerified, ADMIN, meta("VERIFY_PAYMENT"))
        .await
        .unwrap_err();
    match err {
        FlowError::Locked {
            participant_id,
            reason,
        } => {
            assert_eq!(participant_id, "p-1");
            assert_eq!(reason, "duplicate payment");
        }
        other => panic!("expected Locked, got {other:?}"),
    }

    let flow = engine.get_flow("p-1").await.unwrap();
    assert_eq!(flow.stage, Stage::PaymentWaiting);
    assert_eq!(flow.version, locked.version);
    assert_eq!(engine.audit_trail("p-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn relocking_replaces_the_reason_and_writes_no_audit_entry() {
    let engine = engine();
    engine.register("p-1").await.unwrap();

    engine.lock_flow("p-1", "first").await.unwrap();
    let flow = engine.lock_flow("p-1", "second").await.unwrap();
    assert_eq!(flow.lock_reason.as_deref(), Some("second"));
    assert_eq!(flow.version, 2);
    assert!(engine.audit_trail("p-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn ensure_stage_guards_current_stage() {
    let engine = engine();
    flow_at(&engine, "p-1", &[Stage::PaymentWaiting]).await;

    let flow = engine
        .ensure_stage("p-1", &[Stage::PaymentRequired, Stage::PaymentWaiting])
        .await
        .unwrap();
    assert_eq!(flow.stage, Stage::PaymentWaiting);

    let err = engine
        .ensure_stage("p-1", &[Stage::ArticleWaiting])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::StageNotPermitted { current: Stage::PaymentWaiting, .. }
    ));
}

#[tokio::test]
async fn recent_audit_is_newest_first_across_participants() {
    let engine = engine();
    flow_at(&engine, "p-1", &[Stage::PaymentWaiting]).await;
    flow_at(&engine, "p-2", &[Stage::PaymentWaiting, Stage::PaymentVerified]).await;

    let recent = engine.recent_audit(2).await.unwrap();
    let seen: Vec<(&str, Stage)> = recent
        .iter()
        .map(|e| (e.participant_id.as_str(), e.to))
        .collect();
    assert_eq!(
        seen,
        vec![("p-2", Stage::PaymentVerified), ("p-2", Stage::PaymentWaiting)]
    );
    assert_eq!(engine.recent_audit(0).await.unwrap().len(), 3);
}

/// Walk a flow along pseudo-random table edges; every stage it lands on is a
/// pipeline stage and every audit entry records a table edge.
#[tokio::test]
async fn random_walks_stay_on_the_table() {
    let engine = engine();
    engine.register("walker").await.unwrap();

    let mut seed: u64 = 0x5eed;
    let mut steps = 0;
    while steps < 200 {
        let current = engine.get_flow("walker").await.unwrap().stage;
        let next = transitions::allowed_next(current);
        if next.is_empty() {
            break;
        }
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let to = next[(seed >> 33) as usize % next.len()];
        let flow = engine
            .transition_status("walker", to, ADMIN, meta("WALK"))
            .await
            .unwrap();
        assert!(Stage::ALL.contains(&flow.stage));
        steps += 1;
    }

    let trail = engine.audit_trail("walker").await.unwrap();
    assert_eq!(trail.len(), steps);
    for pair in trail.windows(2) {
        assert_eq!(pair[0].to, pair[1].from);
    }
    for entry in &trail {
        assert!(transitions::is_allowed(entry.from, entry.to));
    }
}

#[tokio::test]
async fn stored_stage_codes_are_plain_strings() {
    let engine = engine();
    flow_at(&engine, "p-1", &[Stage::PaymentWaiting]).await;
    let record = engine.storage().get_flow("p-1").await.unwrap();
    assert_eq!(record.stage, "PAYMENT_WAITING");
}
