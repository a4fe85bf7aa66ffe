//! `tollgate race`: many participants reserving one session at once.

use std::sync::Arc;

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tollgate_engine::{EngineConfig, FlowEngine, FlowError};
use tollgate_memory::MemoryStorage;
use tracing::info;

use crate::walk::prepare_for_training;
use crate::OutputFormat;

const SESSION: &str = "race-session";

#[derive(Debug, Default, Serialize)]
struct RaceReport {
    participants: usize,
    capacity: u32,
    reserved: usize,
    exhausted: usize,
    expired: usize,
    capacity_remaining: i64,
}

pub(crate) async fn cmd_race(
    capacity: u32,
    participants: usize,
    starts_in_secs: i64,
    config: EngineConfig,
    output: OutputFormat,
) -> Result<(), String> {
    let engine = Arc::new(FlowEngine::new(MemoryStorage::new()).with_config(config));
    let starts_at = OffsetDateTime::now_utc()
        .checked_add(Duration::seconds(starts_in_secs))
        .ok_or_else(|| format!("--starts-in-secs {starts_in_secs} is out of range"))?;
    engine
        .create_session(SESSION, capacity, starts_at)
        .await
        .map_err(|e| e.to_string())?;

    let ids: Vec<String> = (1..=participants).map(|i| format!("racer-{i}")).collect();
    for id in &ids {
        prepare_for_training(&engine, id)
            .await
            .map_err(|e| e.to_string())?;
    }

    info!(participants, capacity, session_id = SESSION, "starting reservation race");
    let mut handles = Vec::with_capacity(ids.len());
    for id in ids {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.select_training(&id, SESSION).await
        }));
    }

    let mut report = RaceReport {
        participants,
        capacity,
        ..RaceReport::default()
    };
    for handle in handles {
        let result = handle
            .await
            .map_err(|e| format!("reservation task failed: {}", e))?;
        match result {
            Ok(_) => report.reserved += 1,
            Err(FlowError::Exhausted { .. }) => report.exhausted += 1,
            Err(FlowError::Expired { .. }) => report.expired += 1,
            Err(e) => return Err(e.to_string()),
        }
    }
    report.capacity_remaining = engine
        .get_session(SESSION)
        .await
        .map_err(|e| e.to_string())?
        .capacity_remaining;

    match output {
        OutputFormat::Json => crate::print_json(&report),
        OutputFormat::Text => {
            println!(
                "{} participants, {} seats",
                report.participants, report.capacity
            );
            println!("reserved:  {}", report.reserved);
            println!("exhausted: {}", report.exhausted);
            println!("expired:   {}", report.expired);
            println!("remaining: {}", report.capacity_remaining);
            Ok(())
        }
    }
}
