//! Stage-specific operations invoked by participants and administrators.
//!
//! Each one picks the target stage, attaches `{"action": CODE, ...}`
//! metadata, and goes through [`FlowEngine::transition_status`] (or the
//! reservation protocol). `reject_article` records its decision without
//! moving the flow. None of them writes flow fields directly.

use serde_json::Value;
use tollgate_storage::FlowStorage;

use crate::clock::Clock;
use crate::engine::FlowEngine;
use crate::error::FlowError;
use crate::flow::{Flow, Metadata};
use crate::stage::Stage;

/// Actor recorded for steps the system takes on its own.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

const REVIEW_DECISION_STAGES: &[Stage] = &[Stage::TrainingVerified, Stage::ReviewWaiting];

fn action(code: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("action".to_string(), Value::from(code));
    metadata
}

fn action_with(code: &str, key: &str, value: &str) -> Metadata {
    let mut metadata = action(code);
    metadata.insert(key.to_string(), Value::from(value));
    metadata
}

impl<S: FlowStorage, C: Clock> FlowEngine<S, C> {
    pub async fn submit_payment_proof(
        &self,
        participant_id: &str,
        file_name: &str,
    ) -> Result<Flow, FlowError> {
        self.transition_status(
            participant_id,
            Stage::PaymentWaiting,
            participant_id,
            action_with("UPLOAD_PAYMENT_PROOF", "fileName", file_name),
        )
        .await
    }

    pub async fn verify_payment(
        &self,
        participant_id: &str,
        admin_id: &str,
        payment_ref: &str,
    ) -> Result<Flow, FlowError> {
        self.transition_status(
            participant_id,
            Stage::PaymentVerified,
            admin_id,
            action_with("VERIFY_PAYMENT", "paymentId", payment_ref),
        )
        .await
    }

    /// Send an uploaded proof back; the participant pays again.
    pub async fn reject_payment(
        &self,
        participant_id: &str,
        admin_id: &str,
        comment: &str,
    ) -> Result<Flow, FlowError> {
        self.transition_status(
            participant_id,
            Stage::PaymentRequired,
            admin_id,
            action_with("REJECT_PAYMENT", "comment", comment),
        )
        .await
    }

    pub async fn require_administrative(&self, participant_id: &str) -> Result<Flow, FlowError> {
        self.transition_status(
            participant_id,
            Stage::AdministrativeRequired,
            SYSTEM_ACTOR,
            action("REQUIRE_ADMINISTRATIVE_FORM"),
        )
        .await
    }

    pub async fn confirm_administrative(&self, participant_id: &str) -> Result<Flow, FlowError> {
        self.transition_status(
            participant_id,
            Stage::AdministrativeWaiting,
            participant_id,
            action("CONFIRM_ADMINISTRATIVE_FORM"),
        )
        .await
    }

    /// Hand the participant an article submission account.
    pub async fn open_article_submission(
        &self,
        participant_id: &str,
        admin_id: &str,
        account_ref: &str,
    ) -> Result<Flow, FlowError> {
        self.transition_status(
            participant_id,
            Stage::ArticleWaiting,
            admin_id,
            action_with("ASSIGN_ARTICLE_ACCOUNT", "accountId", account_ref),
        )
        .await
    }

    pub async fn verify_article(
        &self,
        participant_id: &str,
        admin_id: &str,
        comment: &str,
    ) -> Result<Flow, FlowError> {
        self.ensure_stage(participant_id, &[Stage::ArticleWaiting])
            .await?;
        self.transition_status(
            participant_id,
            Stage::ArticleVerified,
            admin_id,
            action_with("VERIFY_ARTICLE", "comment", comment),
        )
        .await
    }

    /// Turn the article down. The flow stays at `ARTICLE_WAITING`; only the
    /// audit trail records the decision.
    pub async fn reject_article(
        &self,
        participant_id: &str,
        admin_id: &str,
        comment: &str,
    ) -> Result<Flow, FlowError> {
        self.record_in_place(
            participant_id,
            Stage::ArticleWaiting,
            admin_id,
            action_with("REJECT_ARTICLE", "comment", comment),
        )
        .await
    }

    pub async fn select_training(
        &self,
        participant_id: &str,
        session_id: &str,
    ) -> Result<Flow, FlowError> {
        self.reserve_session(participant_id, session_id).await
    }

    pub async fn verify_training(
        &self,
        participant_id: &str,
        admin_id: &str,
    ) -> Result<Flow, FlowError> {
        self.transition_status(
            participant_id,
            Stage::TrainingVerified,
            admin_id,
            action("VERIFY_TRAINING"),
        )
        .await
    }

    pub async fn request_reschedule(
        &self,
        participant_id: &str,
        admin_id: &str,
        comment: &str,
    ) -> Result<Flow, FlowError> {
        self.transition_status(
            participant_id,
            Stage::TrainingReschedule,
            admin_id,
            action_with("REQUEST_RESCHEDULE", "comment", comment),
        )
        .await
    }

    /// Accept the review, then queue the certificate as the system actor.
    ///
    /// The two steps commit separately. If the second fails the flow stays
    /// at `REVIEW_VERIFIED`, from which `LOA_WAITING` is still allowed.
    pub async fn accept_review(
        &self,
        participant_id: &str,
        admin_id: &str,
        comment: &str,
    ) -> Result<Flow, FlowError> {
        self.ensure_stage(participant_id, REVIEW_DECISION_STAGES)
            .await?;
        self.transition_status(
            participant_id,
            Stage::ReviewVerified,
            admin_id,
            action_with("ACCEPT_REVIEW", "comment", comment),
        )
        .await?;
        self.transition_status(
            participant_id,
            Stage::LoaWaiting,
            SYSTEM_ACTOR,
            action("REQUEST_LOA"),
        )
        .await
    }

    pub async fn request_revision(
        &self,
        participant_id: &str,
        admin_id: &str,
        comment: &str,
    ) -> Result<Flow, FlowError> {
        self.ensure_stage(participant_id, REVIEW_DECISION_STAGES)
            .await?;
        self.transition_status(
            participant_id,
            Stage::ReviewRevision,
            admin_id,
            action_with("REQUEST_REVISION", "comment", comment),
        )
        .await
    }

    pub async fn resubmit_review(&self, participant_id: &str) -> Result<Flow, FlowError> {
        self.transition_status(
            participant_id,
            Stage::ReviewWaiting,
            participant_id,
            action("RESUBMIT_REVIEW"),
        )
        .await
    }

    pub async fn publish_loa(
        &self,
        participant_id: &str,
        admin_id: &str,
        document_ref: &str,
    ) -> Result<Flow, FlowError> {
        self.ensure_stage(participant_id, &[Stage::LoaWaiting])
            .await?;
        self.transition_status(
            participant_id,
            Stage::LoaPublished,
            admin_id,
            action_with("UPLOAD_LOA", "documentId", document_ref),
        )
        .await
    }
}
