//! Offline accuracy evaluation over labelled face crops.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use custos_core::{
    evaluate_scenario, Classifier, FaceSample, Identity, IdentityResolver, Recognizer, ScenarioMetrics, UNKNOWN_LABEL,
};
use custos_store::Scenario;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Pair each crop with its classifier label. People who are not enrolled
/// become [`UNKNOWN_LABEL`], so accepting them counts as an error.
pub fn label_cases(scenario: &Scenario, identities: &[Identity]) -> Vec<(i64, FaceSample)> {
    let ids: HashMap<&str, i64> = identities
        .iter()
        .map(|identity| (identity.national_id.as_str(), identity.id))
        .collect();
    scenario
        .samples
        .iter()
        .map(|case| {
            let label = ids.get(case.national_id.as_str()).copied().unwrap_or(UNKNOWN_LABEL);
            (label, case.sample.clone())
        })
        .collect()
}

/// Evaluate every scenario in order.
pub fn run<C: Classifier>(
    recognizer: &mut Recognizer<C>,
    resolver: &IdentityResolver,
    scenarios: &[Scenario],
    identities: &[Identity],
) -> Vec<ScenarioMetrics> {
    scenarios
        .iter()
        .map(|scenario| evaluate_scenario(recognizer, resolver, &scenario.name, &label_cases(scenario, identities)))
        .collect()
}

/// Default results file under `dir`, named after the run time.
pub fn results_path(dir: &Path, at: DateTime<Local>) -> PathBuf {
    dir.join(format!("evaluation_{}.csv", at.format("%Y%m%d_%H%M%S")))
}

/// Write one CSV row per scenario, replacing any existing file.
pub fn write_results(path: &Path, results: &[ScenarioMetrics]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for row in results {
        writer.serialize(row)?;
    }
    writer.flush()?;
    tracing::info!(path = %path.display(), scenarios = results.len(), "evaluation results written");
    Ok(())
}

#[derive(Serialize)]
struct LogRow<'a> {
    recorded_at: String,
    scenario: &'a str,
    samples: usize,
    accuracy: f64,
    precision: f64,
    recall: f64,
    f1: f64,
}

/// Append results to the running metrics log, writing the header only when
/// the log is new.
pub fn append_metrics_log(path: &Path, recorded_at: DateTime<Local>, results: &[ScenarioMetrics]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let fresh = file.metadata()?.len() == 0;
    let mut writer = csv::WriterBuilder::new().has_headers(fresh).from_writer(file);

    let recorded_at = recorded_at.to_rfc3339();
    for m in results {
        writer.serialize(LogRow {
            recorded_at: recorded_at.clone(),
            scenario: &m.scenario,
            samples: m.samples,
            accuracy: m.accuracy,
            precision: m.precision,
            recall: m.recall,
            f1: m.f1,
        })?;
    }
    writer.flush()?;
    Ok(())
}
