//! The fixed transition table of the approval pipeline.
//!
//! The table is a plain constant. There is no write path: adding an edge
//! means changing this file.

use std::collections::{BTreeSet, VecDeque};

use crate::stage::Stage;

use Stage::*;

/// Stage -> stages a flow may move to next. A stage absent from the table
/// has no successors.
pub const TABLE: &[(Stage, &[Stage])] = &[
    (PaymentRequired, &[PaymentWaiting]),
    (PaymentWaiting, &[PaymentVerified, PaymentRequired]),
    (PaymentVerified, &[AdministrativeRequired, AdministrativeWaiting]),
    (AdministrativeRequired, &[AdministrativeWaiting]),
    (AdministrativeWaiting, &[ArticleWaiting, AdministrativeRequired]),
    (ArticleWaiting, &[ArticleVerified]),
    (ArticleVerified, &[TrainingWaiting]),
    (TrainingWaiting, &[TrainingVerified, TrainingReschedule]),
    (TrainingReschedule, &[TrainingWaiting]),
    (TrainingVerified, &[ReviewWaiting, ReviewVerified, ReviewRevision]),
    (ReviewWaiting, &[ReviewVerified, ReviewRevision]),
    (ReviewRevision, &[ReviewWaiting]),
    (ReviewVerified, &[LoaWaiting]),
    (LoaWaiting, &[LoaPublished]),
];

pub fn allowed_next(stage: Stage) -> &'static [Stage] {
    TABLE
        .iter()
        .find(|(from, _)| *from == stage)
        .map(|(_, next)| *next)
        .unwrap_or(&[])
}

pub fn is_allowed(from: Stage, to: Stage) -> bool {
    allowed_next(from).contains(&to)
}

/// Every stage reachable from `start` by one or more transitions.
///
/// `start` itself is included only if some cycle leads back to it.
pub fn reachable_from(start: Stage) -> BTreeSet<Stage> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<Stage> = allowed_next(start).iter().copied().collect();
    while let Some(stage) = queue.pop_front() {
        if seen.insert(stage) {
            queue.extend(allowed_next(stage).iter().copied());
        }
    }
    seen
}
