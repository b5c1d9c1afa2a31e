use std::collections::HashSet;

use serde::Serialize;

use super::delivery::DeliveryOutcome;
use crate::db::{Destination, StreamerMapping};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Duplicate,
    Unmapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchReport {
    Dropped(DropReason),
    Delivered {
        delivered: usize,
        commands: usize,
        failed: usize,
    },
}

/// Destinations of a mapping with repeated `(community, channel)` pairs removed,
/// first one wins.
pub(crate) fn unique_destinations(mapping: &StreamerMapping) -> Vec<Destination> {
    let mut seen = HashSet::new();
    mapping
        .destinations
        .iter()
        .filter(|destination| seen.insert(destination.key()))
        .cloned()
        .collect()
}

pub(crate) fn summarize<'a>(outcomes: impl IntoIterator<Item = &'a DeliveryOutcome>) -> DispatchReport {
    let mut delivered = 0;
    let mut commands = 0;
    let mut failed = 0;
    for outcome in outcomes {
        match outcome {
            DeliveryOutcome::Delivered { .. } => delivered += 1,
            DeliveryOutcome::Command(_) => commands += 1,
            DeliveryOutcome::Failed(_) => failed += 1,
            DeliveryOutcome::Skipped => {}
        }
    }
    DispatchReport::Delivered {
        delivered,
        commands,
        failed,
    }
}
