//! Labelled face crops for offline evaluation.
//!
//! Layout: `<root>/<scenario>/<national_id>/<image>`. Scenarios and people
//! are visited in name order.

use crate::samples::SampleDir;
use custos_core::{FaceSample, StoreError};
use std::path::{Path, PathBuf};

/// One face crop and the national id of the person it shows.
#[derive(Debug, Clone)]
pub struct LabelledSample {
    pub national_id: String,
    pub sample: FaceSample,
}

/// A named set of labelled crops, e.g. "low light" or "glasses".
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub samples: Vec<LabelledSample>,
    /// Files that could not be read as images.
    pub skipped: usize,
}

fn subdirs(dir: &Path) -> Result<Vec<(String, PathBuf)>, StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|e| StoreError::Archive(format!("{}: {e}", dir.display())))?;
    let mut dirs: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter_map(|path| Some((path.file_name()?.to_str()?.to_string(), path)))
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|e| StoreError::Archive(format!("{}: {e}", dir.display())))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Load every scenario under `root`.
pub fn load_scenarios(root: &Path) -> Result<Vec<Scenario>, StoreError> {
    let mut scenarios = Vec::new();
    for (name, scenario_dir) in subdirs(root)? {
        let mut scenario = Scenario {
            name,
            samples: Vec::new(),
            skipped: 0,
        };
        for (national_id, person_dir) in subdirs(&scenario_dir)? {
            for path in files(&person_dir)? {
                match SampleDir::load(&path) {
                    Ok(sample) => scenario.samples.push(LabelledSample {
                        national_id: national_id.clone(),
                        sample,
                    }),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping evaluation image");
                        scenario.skipped += 1;
                    }
                }
            }
        }
        tracing::debug!(
            scenario = %scenario.name,
            samples = scenario.samples.len(),
            skipped = scenario.skipped,
            "scenario loaded"
        );
        scenarios.push(scenario);
    }
    Ok(scenarios)
}
