//! Result aggregation for a completed round.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::deck::CardValue;

/// Share of votes the modal value needs for the round to count as consensus.
pub const DEFAULT_CONSENSUS_THRESHOLD: f64 = 0.70;

/// Derived outcome of a revealed round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub mode: Option<CardValue>,
    pub average: Option<f64>,
    pub consensus_reached: bool,
}

impl AggregateResult {
    pub fn empty() -> Self {
        Self {
            mode: None,
            average: None,
            consensus_reached: false,
        }
    }
}

/// Aggregate the finalized votes of a round.
///
/// `values` must be in insertion order: a tie for the mode goes to the value
/// encountered first. "?" takes part in mode and consensus but not the average.
pub fn aggregate<'a, I>(values: I, consensus_threshold: f64) -> AggregateResult
where
    I: IntoIterator<Item = &'a CardValue>,
{
    let mut frequency: IndexMap<&str, usize> = IndexMap::new();
    let mut total = 0usize;
    let mut sum = 0.0;
    let mut numeric = 0usize;

    for value in values {
        total += 1;
        *frequency.entry(value.as_str()).or_insert(0) += 1;
        if let Some(n) = value.as_number() {
            sum += n;
            numeric += 1;
        }
    }

    if total == 0 {
        return AggregateResult::empty();
    }

    // Strict comparison keeps the earliest value on ties.
    let mut mode: Option<(&str, usize)> = None;
    for (value, count) in &frequency {
        if mode.map_or(true, |(_, best)| *count > best) {
            mode = Some((*value, *count));
        }
    }

    let average = (numeric > 0).then(|| round_one_decimal(sum / numeric as f64));
    let consensus_reached = mode
        .map(|(_, count)| count as f64 / total as f64 >= consensus_threshold)
        .unwrap_or(false);

    AggregateResult {
        mode: mode.map(|(value, _)| CardValue::from(value)),
        average,
        consensus_reached,
    }
}

fn round_one_decimal(n: f64) -> f64 {
    (n * 10.0).round() / 10.0
}
