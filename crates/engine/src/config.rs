use serde::{Deserialize, Serialize};

/// Engine settings. Every field has a default, so an empty document is a
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default `tracing` filter directive when `RUST_LOG` is unset.
    pub log_level: String,
    pub reservation: ReservationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            reservation: ReservationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationConfig {
    /// Whole-unit attempts made when a reservation hits a concurrent
    /// conflict. Values below 1 are treated as 1.
    pub max_attempts: u32,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl ReservationConfig {
    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
