//! A participant walked through the whole pipeline with the caller
//! operations, plus their stage guards.

mod common;

use common::{engine, flow_at, TestEngine, ADMIN, NEXT_MONTH, TO_ARTICLE_VERIFIED};
use tollgate_engine::{FlowError, Stage, SYSTEM_ACTOR};

async fn to_training_verified(engine: &TestEngine, participant_id: &str) {
    let mut path = TO_ARTICLE_VERIFIED.to_vec();
    path.extend([Stage::TrainingWaiting, Stage::TrainingVerified]);
    flow_at(engine, participant_id, &path).await;
}

#[tokio::test]
async fn full_pipeline_with_caller_operations() {
    let engine = engine();
    engine.create_session("batch-1", 10, NEXT_MONTH).await.unwrap();
    engine.register("p-1").await.unwrap();

    engine.submit_payment_proof("p-1", "receipt.pdf").await.unwrap();
    engine.reject_payment("p-1", ADMIN, "blurry scan").await.unwrap();
    engine.submit_payment_proof("p-1", "receipt-2.pdf").await.unwrap();
    engine.verify_payment("p-1", ADMIN, "pay-77").await.unwrap();
    engine.require_administrative("p-1").await.unwrap();
    engine.confirm_administrative("p-1").await.unwrap();
    engine
        .open_article_submission("p-1", ADMIN, "journal-account-9")
        .await
        .unwrap();
    engine.verify_article("p-1", ADMIN, "looks good").await.unwrap();
    engine.select_training("p-1", "batch-1").await.unwrap();
    engine.verify_training("p-1", ADMIN).await.unwrap();
    engine.request_revision("p-1", ADMIN, "fix figure 2").await.unwrap();
    engine.resubmit_review("p-1").await.unwrap();
    engine.accept_review("p-1", ADMIN, "accepted").await.unwrap();
    let flow = engine.publish_loa("p-1", ADMIN, "loa-p-1.pdf").await.unwrap();

    assert_eq!(flow.stage, Stage::LoaPublished);
    assert_eq!(flow.reserved_session_id.as_deref(), Some("batch-1"));

    let trail = engine.audit_trail("p-1").await.unwrap();
    let actions: Vec<&str> = trail
        .iter()
        .map(|e| e.metadata["action"].as_str().unwrap())
        .collect();
    assert_eq!(
        actions,
        vec![
            "UPLOAD_PAYMENT_PROOF",
            "REJECT_PAYMENT",
            "UPLOAD_PAYMENT_PROOF",
            "VERIFY_PAYMENT",
            "REQUIRE_ADMINISTRATIVE_FORM",
            "CONFIRM_ADMINISTRATIVE_FORM",
            "ASSIGN_ARTICLE_ACCOUNT",
            "VERIFY_ARTICLE",
            "SELECT_TRAINING",
            "VERIFY_TRAINING",
            "REQUEST_REVISION",
            "RESUBMIT_REVIEW",
            "ACCEPT_REVIEW",
            "REQUEST_LOA",
            "UPLOAD_LOA",
        ]
    );
    assert_eq!(trail[0].from, Stage::PaymentRequired);
    assert_eq!(trail.last().unwrap().to, Stage::LoaPublished);
    assert_eq!(trail[3].metadata["paymentId"], "pay-77");
    assert_eq!(trail[0].actor_id, "p-1");
}

#[tokio::test]
async fn accept_review_records_admin_then_system() {
    let engine = engine();
    to_training_verified(&engine, "p-1").await;

    let flow = engine.accept_review("p-1", ADMIN, "well argued").await.unwrap();
    assert_eq!(flow.stage, Stage::LoaWaiting);

    let trail = engine.audit_trail("p-1").await.unwrap();
    let [.., accepted, queued] = trail.as_slice() else {
        panic!("expected at least two entries");
    };
    assert_eq!(accepted.actor_id, ADMIN);
    assert_eq!(accepted.to, Stage::ReviewVerified);
    assert_eq!(accepted.metadata["comment"], "well argued");
    assert_eq!(queued.actor_id, SYSTEM_ACTOR);
    assert_eq!(queued.from, Stage::ReviewVerified);
    assert_eq!(queued.to, Stage::LoaWaiting);
}

#[tokio::test]
async fn review_decisions_require_a_reviewable_stage() {
    let engine = engine();
    flow_at(&engine, "p-1", TO_ARTICLE_VERIFIED).await;

    let err = engine.accept_review("p-1", ADMIN, "early").await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::StageNotPermitted {
            current: Stage::ArticleVerified,
            ..
        }
    ));
    let err = engine.request_revision("p-1", ADMIN, "early").await.unwrap_err();
    assert!(matches!(err, FlowError::StageNotPermitted { .. }));
    assert_eq!(
        engine.audit_trail("p-1").await.unwrap().len(),
        TO_ARTICLE_VERIFIED.len()
    );
}

#[tokio::test]
async fn article_verification_requires_a_submitted_article() {
    let engine = engine();
    flow_at(&engine, "p-1", &[Stage::PaymentWaiting]).await;

    let err = engine.verify_article("p-1", ADMIN, "ok").await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::StageNotPermitted {
            current: Stage::PaymentWaiting,
            ..
        }
    ));
}

#[tokio::test]
async fn certificate_requires_loa_waiting() {
    let engine = engine();
    to_training_verified(&engine, "p-1").await;

    let err = engine.publish_loa("p-1", ADMIN, "loa.pdf").await.unwrap_err();
    assert!(matches!(err, FlowError::StageNotPermitted { .. }));
}

#[tokio::test]
async fn reschedule_returns_to_training_waiting() {
    let engine = engine();
    let mut path = TO_ARTICLE_VERIFIED.to_vec();
    path.push(Stage::TrainingWaiting);
    flow_at(&engine, "p-1", &path).await;

    let flow = engine
        .request_reschedule("p-1", ADMIN, "missed the session")
        .await
        .unwrap();
    assert_eq!(flow.stage, Stage::TrainingReschedule);

    let flow = engine
        .transition_status("p-1", Stage::TrainingWaiting, ADMIN, Default::default())
        .await
        .unwrap();
    assert_eq!(flow.stage, Stage::TrainingWaiting);
}

#[tokio::test]
async fn locked_flow_blocks_caller_operations() {
    let engine = engine();
    engine.register("p-1").await.unwrap();
    engine.lock_flow("p-1", "chargeback").await.unwrap();

    let err = engine.submit_payment_proof("p-1", "receipt.pdf").await.unwrap_err();
    assert!(matches!(err, FlowError::Locked { ref reason, .. } if reason == "chargeback"));
}

#[tokio::test]
async fn article_rejection_keeps_the_flow_waiting() {
    let engine = engine();
    flow_at(&engine, "p-1", &TO_ARTICLE_VERIFIED[..4]).await;
    let before = engine.get_flow("p-1").await.unwrap();
    assert_eq!(before.stage, Stage::ArticleWaiting);

    let flow = engine
        .reject_article("p-1", ADMIN, "missing abstract")
        .await
        .unwrap();
    assert_eq!(flow.stage, Stage::ArticleWaiting);
    assert_eq!(flow.version, before.version + 1);

    let trail = engine.audit_trail("p-1").await.unwrap();
    let last = trail.last().unwrap();
    assert_eq!(last.from, Stage::ArticleWaiting);
    assert_eq!(last.to, Stage::ArticleWaiting);
    assert_eq!(last.actor_id, ADMIN);
    assert_eq!(last.metadata["action"], "REJECT_ARTICLE");
    assert_eq!(last.metadata["comment"], "missing abstract");

    let flow = engine.verify_article("p-1", ADMIN, "fixed").await.unwrap();
    assert_eq!(flow.stage, Stage::ArticleVerified);
}

#[tokio::test]
async fn article_rejection_never_moves_the_flow() {
    let engine = engine();
    flow_at(&engine, "p-1", &TO_ARTICLE_VERIFIED[..3]).await;

    let err = engine.reject_article("p-1", ADMIN, "too early").await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::StageNotPermitted {
            current: Stage::AdministrativeWaiting,
            ..
        }
    ));
    assert_eq!(engine.get_flow("p-1").await.unwrap().stage, Stage::AdministrativeWaiting);
    assert_eq!(engine.audit_trail("p-1").await.unwrap().len(), 3);
}

#[tokio::test]
async fn locked_flow_cannot_have_its_article_rejected() {
    let engine = engine();
    flow_at(&engine, "p-1", &TO_ARTICLE_VERIFIED[..4]).await;
    engine.lock_flow("p-1", "plagiarism check").await.unwrap();

    let err = engine.reject_article("p-1", ADMIN, "no").await.unwrap_err();
    assert!(matches!(err, FlowError::Locked { .. }));
    assert_eq!(engine.audit_trail("p-1").await.unwrap().len(), 4);
}
