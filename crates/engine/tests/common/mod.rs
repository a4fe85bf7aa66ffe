#![allow(dead_code)]

use time::macros::datetime;
use time::OffsetDateTime;
use tollgate_engine::{FixedClock, FlowEngine, Metadata, Stage};
use tollgate_memory::MemoryStorage;

pub type TestEngine = FlowEngine<MemoryStorage, FixedClock>;

pub const ADMIN: &str = "admin-1";

/// "Now" for every test engine.
pub const NOW: OffsetDateTime = datetime!(2030-01-15 10:00 UTC);
pub const NEXT_MONTH: OffsetDateTime = datetime!(2030-02-15 09:00 UTC);
pub const LAST_WEEK: OffsetDateTime = datetime!(2030-01-08 09:00 UTC);

pub fn engine() -> TestEngine {
    FlowEngine::with_clock(MemoryStorage::new(), FixedClock(NOW))
}

pub fn meta(action: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("action".to_string(), action.into());
    metadata
}

/// Register `participant_id` and move it along `path` with admin actions.
pub async fn flow_at(engine: &TestEngine, participant_id: &str, path: &[Stage]) {
    engine.register(participant_id).await.unwrap();
    for stage in path {
        engine
            .transition_status(participant_id, *stage, ADMIN, meta("TEST_STEP"))
            .await
            .unwrap();
    }
}

/// Path from registration to `ARTICLE_VERIFIED`.
pub const TO_ARTICLE_VERIFIED: &[Stage] = &[
    Stage::PaymentWaiting,
    Stage::PaymentVerified,
    Stage::AdministrativeWaiting,
    Stage::ArticleWaiting,
    Stage::ArticleVerified,
];
