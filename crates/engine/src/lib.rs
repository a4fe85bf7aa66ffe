//! Flow orchestration for the participant approval pipeline.
//!
//! [`FlowEngine`] validates stage changes against the fixed
//! [transition table](transitions::TABLE), enforces administrative locks,
//! writes an audit entry with every change, and runs the training session
//! reservation protocol. Persistence is delegated to a
//! [`FlowStorage`](tollgate_storage::FlowStorage) backend.

mod actions;
pub mod clock;
pub mod config;
mod engine;
mod error;
mod flow;
mod reservation;
pub mod stage;
pub mod transitions;

pub use actions::SYSTEM_ACTOR;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{EngineConfig, ReservationConfig};
pub use engine::FlowEngine;
pub use error::FlowError;
pub use flow::{AuditEntry, Flow, Metadata, Session};
pub use stage::{Stage, UnknownStage};
