//! Outcome roll-up: student scores weighted into learning-outcome success
//! rates, and learning-outcome rates weighted into program-outcome rates.
//!
//! Everything here is a pure function of the rows it is given. Any zero
//! denominator yields a rate of 0 and the outcome is still listed.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::models::{LearningOutcome, OutcomeRows, ProgramOutcome};

pub const GOOD_THRESHOLD: f64 = 70.0;
pub const WARNING_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Good,
    Warning,
    Risk,
}

impl Tier {
    pub fn for_rate(rate: f64) -> Self {
        if rate >= GOOD_THRESHOLD {
            Tier::Good
        } else if rate >= WARNING_THRESHOLD {
            Tier::Warning
        } else {
            Tier::Risk
        }
    }
}

/// Rounds to one decimal place, nearest-even on the exact binary value.
/// `12.45` is stored as `12.4499...` and so rounds down.
pub fn round1(value: f64) -> f64 {
    format!("{:.1}", value).parse().unwrap_or(value)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeDetail {
    pub code: String,
    pub description: String,
    pub score: f64,
    pub tier: Tier,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollupReport {
    pub rates: BTreeMap<String, f64>,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
    pub details: Vec<OutcomeDetail>,
}

impl RollupReport {
    /// Builds the report from `(id, code, description, unrounded rate)`
    /// entries, ordering by code and then id.
    fn from_entries(mut entries: Vec<(i64, String, String, f64)>) -> Self {
        entries.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));

        let mut report = RollupReport::default();
        for (_, code, description, rate) in entries {
            let score = round1(rate);
            report.rates.insert(code.clone(), score);
            report.labels.push(code.clone());
            report.values.push(score);
            report.details.push(OutcomeDetail {
                code,
                description,
                score,
                tier: Tier::for_rate(score),
            });
        }

        report
    }
}

/// Unrounded success rate per learning-outcome id.
pub fn learning_outcome_rates(rows: &OutcomeRows) -> HashMap<i64, f64> {
    let scores: HashMap<i64, f64> = rows
        .scores
        .iter()
        .map(|s| (s.assessment_id, s.score))
        .collect();

    let mut totals: HashMap<i64, (f64, f64)> = rows
        .learning_outcomes
        .iter()
        .map(|lo| (lo.id, (0.0, 0.0)))
        .collect();

    for weight in &rows.assessment_weights {
        let Some(score) = scores.get(&weight.assessment_id) else {
            continue;
        };
        if let Some((earned, max)) = totals.get_mut(&weight.learning_outcome_id) {
            *earned += score * weight.percentage;
            *max += 100.0 * weight.percentage;
        }
    }

    totals
        .into_iter()
        .map(|(id, (earned, max))| (id, ratio(earned, max)))
        .collect()
}

/// Unrounded success rate per program-outcome id, fed by unrounded
/// learning-outcome rates. Mappings from outcomes outside `lo_rates` are
/// ignored.
pub fn program_outcome_rates(rows: &OutcomeRows, lo_rates: &HashMap<i64, f64>) -> HashMap<i64, f64> {
    let mut totals: HashMap<i64, (f64, f64)> = rows
        .program_outcomes
        .iter()
        .map(|po| (po.id, (0.0, 0.0)))
        .collect();

    for mapping in &rows.mappings {
        let Some(lo_rate) = lo_rates.get(&mapping.learning_outcome_id) else {
            continue;
        };
        if let Some((earned, max)) = totals.get_mut(&mapping.program_outcome_id) {
            *earned += lo_rate * mapping.weight;
            *max += 100.0 * mapping.weight;
        }
    }

    totals
        .into_iter()
        .map(|(id, (earned, max))| (id, ratio(earned, max)))
        .collect()
}

/// Weighted mean of `(score, weight)` pairs; 0 when the weights sum to 0.
pub fn weighted_average<I>(entries: I) -> f64
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let (sum, total_weight) = entries
        .into_iter()
        .fold((0.0, 0.0), |(sum, total), (score, weight)| {
            (sum + score * weight, total + weight)
        });

    if total_weight > 0.0 {
        sum / total_weight
    } else {
        0.0
    }
}

pub fn learning_outcome_report(rows: &OutcomeRows) -> RollupReport {
    let rates = learning_outcome_rates(rows);
    RollupReport::from_entries(
        rows.learning_outcomes
            .iter()
            .map(|lo: &LearningOutcome| {
                let rate = rates.get(&lo.id).copied().unwrap_or_default();
                (lo.id, lo.code.clone(), lo.description.clone(), rate)
            })
            .collect(),
    )
}

pub fn program_outcome_report(rows: &OutcomeRows) -> RollupReport {
    let lo_rates = learning_outcome_rates(rows);
    let rates = program_outcome_rates(rows, &lo_rates);
    RollupReport::from_entries(
        rows.program_outcomes
            .iter()
            .map(|po: &ProgramOutcome| {
                let rate = rates.get(&po.id).copied().unwrap_or_default();
                (po.id, po.code.clone(), po.description.clone(), rate)
            })
            .collect(),
    )
}

fn ratio(earned: f64, max: f64) -> f64 {
    if max > 0.0 { earned / max * 100.0 } else { 0.0 }
}
