//! `tollgate walk`: drive one participant from registration to the
//! published certificate using the caller operations.

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tollgate_engine::{AuditEntry, EngineConfig, Flow, FlowEngine, FlowError};
use tollgate_memory::MemoryStorage;

use crate::OutputFormat;

const ADMIN: &str = "admin";
const SESSION: &str = "walk-session";

#[derive(Serialize)]
struct WalkReport {
    flow: Flow,
    audit: Vec<AuditEntry>,
}

pub(crate) async fn cmd_walk(
    participant: &str,
    config: EngineConfig,
    output: OutputFormat,
) -> Result<(), String> {
    let engine = FlowEngine::new(MemoryStorage::new()).with_config(config);
    let flow = walk(&engine, participant).await.map_err(|e| e.to_string())?;
    let audit = engine
        .audit_trail(participant)
        .await
        .map_err(|e| e.to_string())?;

    match output {
        OutputFormat::Json => crate::print_json(&WalkReport { flow, audit }),
        OutputFormat::Text => {
            for (i, entry) in audit.iter().enumerate() {
                let action = entry
                    .metadata
                    .get("action")
                    .and_then(|v| v.as_str())
                    .unwrap_or("-");
                println!(
                    "{:>2}. {} -> {} by {} ({})",
                    i + 1,
                    entry.from,
                    entry.to,
                    entry.actor_id,
                    action
                );
            }
            println!("final stage: {}", flow.stage);
            if let Some(session) = &flow.reserved_session_id {
                println!("training session: {}", session);
            }
            Ok(())
        }
    }
}

/// Register `participant` and bring it to `ARTICLE_VERIFIED`.
pub(crate) async fn prepare_for_training(
    engine: &FlowEngine<MemoryStorage>,
    participant: &str,
) -> Result<Flow, FlowError> {
    engine.register(participant).await?;
    engine
        .submit_payment_proof(participant, "payment-proof.pdf")
        .await?;
    engine
        .verify_payment(participant, ADMIN, &format!("payment-{participant}"))
        .await?;
    engine.confirm_administrative(participant).await?;
    engine
        .open_article_submission(participant, ADMIN, &format!("account-{participant}"))
        .await?;
    engine
        .verify_article(participant, ADMIN, "article accepted")
        .await
}

async fn walk(engine: &FlowEngine<MemoryStorage>, participant: &str) -> Result<Flow, FlowError> {
    let starts_at = OffsetDateTime::now_utc() + Duration::days(7);
    engine.create_session(SESSION, 1, starts_at).await?;

    prepare_for_training(engine, participant).await?;
    engine.select_training(participant, SESSION).await?;
    engine.verify_training(participant, ADMIN).await?;
    engine
        .accept_review(participant, ADMIN, "review accepted")
        .await?;
    engine
        .publish_loa(participant, ADMIN, &format!("loa-{participant}.pdf"))
        .await
}
