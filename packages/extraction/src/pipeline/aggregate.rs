//! Aggregation - one best result per indicator.
//!
//! Ranking, most important first:
//! 1. an observation with a value beats one without
//! 2. higher confidence
//! 3. lower source page (no page ranks last)
//! 4. first seen

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::FailureKind;
use crate::types::{
    catalog::IndicatorCatalog,
    observation::{AggregatedResult, Observation, ResultStatus},
};

/// Chunk failures seen per indicator, used to explain missing results.
#[derive(Debug, Default, Clone)]
pub struct FailureLog {
    worst: HashMap<String, FailureKind>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a chunk covering `indicator_ids` failed with `kind`.
    pub fn record<'a>(&mut self, indicator_ids: impl IntoIterator<Item = &'a str>, kind: FailureKind) {
        for id in indicator_ids {
            let entry = self.worst.entry(id.to_string()).or_insert(kind);
            if severity(kind) > severity(*entry) {
                *entry = kind;
            }
        }
    }

    /// Most telling failure for an indicator, if any chunk failed.
    pub fn get(&self, indicator_id: &str) -> Option<FailureKind> {
        self.worst.get(indicator_id).copied()
    }
}

fn severity(kind: FailureKind) -> u8 {
    match kind {
        FailureKind::Timeout => 3,
        FailureKind::InvalidSchema => 2,
        FailureKind::ModelError => 1,
        FailureKind::Cancelled => 0,
    }
}

fn failure_status(kind: FailureKind) -> ResultStatus {
    match kind {
        FailureKind::Timeout => ResultStatus::Timeout,
        FailureKind::InvalidSchema => ResultStatus::InvalidSchema,
        FailureKind::ModelError | FailureKind::Cancelled => ResultStatus::ModelError,
    }
}

/// Ordering where `Greater` means `a` should win over `b`.
fn rank(a: &Observation, b: &Observation) -> Ordering {
    a.value
        .is_some()
        .cmp(&b.value.is_some())
        .then_with(|| a.confidence.total_cmp(&b.confidence))
        .then_with(|| {
            let page = |o: &Observation| o.source_page.map_or(u64::MAX, u64::from);
            // lower page wins
            page(b).cmp(&page(a))
        })
}

/// Reduce raw observations to exactly one result per catalog indicator,
/// in catalog order.
pub fn aggregate(
    company: &str,
    report_year: i32,
    catalog: &IndicatorCatalog,
    observations: impl IntoIterator<Item = Observation>,
    failures: &FailureLog,
) -> Vec<AggregatedResult> {
    let mut best: HashMap<String, Observation> = HashMap::new();

    for obs in observations {
        if obs.company != company || obs.report_year != report_year {
            debug!(
                company = company,
                observed_company = %obs.company,
                observed_year = obs.report_year,
                "Dropping observation for another company or year"
            );
            continue;
        }
        if !catalog.contains(&obs.indicator_id) {
            debug!(indicator_id = %obs.indicator_id, "Dropping observation for unknown indicator");
            continue;
        }

        match best.get(&obs.indicator_id) {
            // strict: ties keep the first seen
            Some(current) if rank(&obs, current) != Ordering::Greater => {}
            _ => {
                best.insert(obs.indicator_id.clone(), obs);
            }
        }
    }

    catalog
        .iter()
        .map(|def| {
            let failure = failures.get(&def.id).map(failure_status);

            let Some(obs) = best.remove(&def.id) else {
                return AggregatedResult::not_extracted(
                    company,
                    report_year,
                    def,
                    failure.unwrap_or(ResultStatus::NotMentioned),
                );
            };

            let mut result = AggregatedResult::from_observation(obs, def);

            match result.value {
                Some(value) if !def.in_expected_range(value) => {
                    if let Some((min, max)) = def.expected_range {
                        warn!(
                            company = company,
                            indicator_id = %def.id,
                            value = value,
                            "Value outside expected range"
                        );
                        result.push_note(&format!(
                            "WARNING: value {} outside expected range [{}, {}]",
                            value, min, max
                        ));
                    }
                }
                Some(_) => {}
                None => {
                    result.status = failure.unwrap_or(ResultStatus::NotMentioned);
                }
            }

            result
        })
        .collect()
}
