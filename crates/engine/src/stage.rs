use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A position in the participant approval pipeline.
///
/// Stages are stored and exchanged as their SCREAMING_SNAKE_CASE codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    PaymentRequired,
    PaymentWaiting,
    PaymentVerified,
    AdministrativeRequired,
    AdministrativeWaiting,
    ArticleWaiting,
    ArticleVerified,
    TrainingWaiting,
    TrainingVerified,
    TrainingReschedule,
    ReviewWaiting,
    ReviewVerified,
    ReviewRevision,
    LoaWaiting,
    LoaPublished,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 15] = [
        Stage::PaymentRequired,
        Stage::PaymentWaiting,
        Stage::PaymentVerified,
        Stage::AdministrativeRequired,
        Stage::AdministrativeWaiting,
        Stage::ArticleWaiting,
        Stage::ArticleVerified,
        Stage::TrainingWaiting,
        Stage::TrainingVerified,
        Stage::TrainingReschedule,
        Stage::ReviewWaiting,
        Stage::ReviewVerified,
        Stage::ReviewRevision,
        Stage::LoaWaiting,
        Stage::LoaPublished,
    ];

    /// Stage assigned at registration.
    pub const INITIAL: Stage = Stage::PaymentRequired;

    /// The certificate has been issued; nothing follows.
    pub const TERMINAL: Stage = Stage::LoaPublished;

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::PaymentRequired => "PAYMENT_REQUIRED",
            Stage::PaymentWaiting => "PAYMENT_WAITING",
            Stage::PaymentVerified => "PAYMENT_VERIFIED",
            Stage::AdministrativeRequired => "ADMINISTRATIVE_REQUIRED",
            Stage::AdministrativeWaiting => "ADMINISTRATIVE_WAITING",
            Stage::ArticleWaiting => "ARTICLE_WAITING",
            Stage::ArticleVerified => "ARTICLE_VERIFIED",
            Stage::TrainingWaiting => "TRAINING_WAITING",
            Stage::TrainingVerified => "TRAINING_VERIFIED",
            Stage::TrainingReschedule => "TRAINING_RESCHEDULE",
            Stage::ReviewWaiting => "REVIEW_WAITING",
            Stage::ReviewVerified => "REVIEW_VERIFIED",
            Stage::ReviewRevision => "REVIEW_REVISION",
            Stage::LoaWaiting => "LOA_WAITING",
            Stage::LoaPublished => "LOA_PUBLISHED",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Stage::TERMINAL
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage code that names none of the pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage code: {0}")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}
