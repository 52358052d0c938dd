//! Accuracy metrics for labelled evaluation runs.
//!
//! Precision, recall and F1 are computed per label and averaged with each
//! label weighted by its true support. A ratio with a zero denominator is 0.

use crate::recognizer::Recognizer;
use crate::resolver::IdentityResolver;
use crate::sample::{FaceSample, NORMALIZED_SIZE};
use crate::types::UNKNOWN_LABEL;
use crate::vision::Classifier;
use serde::Serialize;
use std::collections::BTreeMap;

/// Weighted-average metrics for one evaluation scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    pub scenario: String,
    pub samples: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Default)]
struct LabelCounts {
    hits: usize,
    predicted: usize,
    support: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl ScenarioMetrics {
    /// Score `predicted` against `truth`, pairwise.
    pub fn compute(scenario: impl Into<String>, truth: &[i64], predicted: &[i64]) -> Self {
        let mut labels: BTreeMap<i64, LabelCounts> = BTreeMap::new();
        let mut correct = 0;
        let mut samples = 0;

        for (&t, &p) in truth.iter().zip(predicted) {
            samples += 1;
            labels.entry(t).or_default().support += 1;
            labels.entry(p).or_default().predicted += 1;
            if t == p {
                correct += 1;
                labels.entry(t).or_default().hits += 1;
            }
        }

        let (mut precision, mut recall, mut f1) = (0.0, 0.0, 0.0);
        for counts in labels.values() {
            let weight = ratio(counts.support, samples);
            let p = ratio(counts.hits, counts.predicted);
            let r = ratio(counts.hits, counts.support);
            let f = if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };
            precision += weight * p;
            recall += weight * r;
            f1 += weight * f;
        }

        Self {
            scenario: scenario.into(),
            samples,
            accuracy: ratio(correct, samples),
            precision,
            recall,
            f1,
        }
    }
}

/// Run labelled face crops through the recognizer and score the decisions.
///
/// A crop counts as predicted `label` only when `resolver` would accept it;
/// rejected or failed predictions count as [`UNKNOWN_LABEL`]. Label crops of
/// people who are not enrolled with [`UNKNOWN_LABEL`] to measure false accepts.
pub fn evaluate_scenario<C: Classifier>(
    recognizer: &mut Recognizer<C>,
    resolver: &IdentityResolver,
    scenario: &str,
    cases: &[(i64, FaceSample)],
) -> ScenarioMetrics {
    let mut truth = Vec::with_capacity(cases.len());
    let mut predicted = Vec::with_capacity(cases.len());

    for (label, crop) in cases {
        let decision = match recognizer.predict(&crop.normalized(NORMALIZED_SIZE)) {
            Ok(p) if resolver.accepts(p.label, p.confidence) => p.label,
            Ok(_) => UNKNOWN_LABEL,
            Err(e) => {
                tracing::warn!(scenario, error = %e, "evaluation prediction failed");
                UNKNOWN_LABEL
            }
        };
        truth.push(*label);
        predicted.push(decision);
    }

    let metrics = ScenarioMetrics::compute(scenario, &truth, &predicted);
    tracing::info!(
        scenario,
        samples = metrics.samples,
        accuracy = metrics.accuracy,
        f1 = metrics.f1,
        "scenario evaluated"
    );
    metrics
}
