//! custos-store — durable identities, the recognition log and face sample files.

pub mod samples;
pub mod scenarios;
pub mod sqlite;

pub use samples::{validate_national_id, SampleDir, TrainingSet};
pub use scenarios::{load_scenarios, LabelledSample, Scenario};
pub use sqlite::SqliteStore;
