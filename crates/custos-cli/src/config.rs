use anyhow::{Context, Result};
use custos_core::capture::DEFAULT_DWELL;
use custos_core::QualityThresholds;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "custos.toml";

/// Terminal configuration: built-in defaults, then `custos.toml`, then
/// `CUSTOS_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Root for the database, samples, logs and reports.
    pub data_dir: PathBuf,
    /// Directory containing the SCRFD ONNX model; `<data_dir>/models` when unset.
    pub model_dir: Option<PathBuf>,
    pub quality: QualityThresholds,
    pub capture: CaptureConfig,
    pub recognition: RecognitionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Side of the square guide box centered in the frame, in pixels.
    pub guide_size: u32,
    /// Continuous in-guide time required before a capture, in seconds.
    pub dwell_secs: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            guide_size: 300,
            dwell_secs: DEFAULT_DWELL.as_secs_f32(),
        }
    }
}

impl CaptureConfig {
    /// Dwell as a duration. Negative, NaN or unrepresentable values fall back
    /// to the default.
    pub fn dwell(&self) -> Duration {
        Duration::try_from_secs_f32(self.dwell_secs).unwrap_or_else(|e| {
            tracing::warn!(dwell_secs = self.dwell_secs, error = %e, "invalid capture dwell, using default");
            DEFAULT_DWELL
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Minimum confidence (0–100) for a confirmed match.
    pub threshold: f32,
    pub cache_capacity: usize,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            threshold: custos_core::resolver::DEFAULT_ACCEPTANCE_THRESHOLD,
            cache_capacity: custos_core::cache::DEFAULT_CAPACITY,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            frame_width: custos_hw::DEFAULT_WIDTH,
            frame_height: custos_hw::DEFAULT_HEIGHT,
            data_dir: default_data_dir(),
            model_dir: None,
            quality: QualityThresholds::default(),
            capture: CaptureConfig::default(),
            recognition: RecognitionConfig::default(),
        }
    }
}

impl Config {
    /// Load from `$CUSTOS_CONFIG` (or `./custos.toml` if present), then
    /// apply environment overrides.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var("CUSTOS_CONFIG").ok().map(PathBuf::from);
        let path = explicit.clone().unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else if let Some(path) = explicit {
            anyhow::bail!("config file {} does not exist", path.display());
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config = Self::from_toml(&text).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from `CUSTOS_*` variables. Unparseable values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(device) = var("CUSTOS_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        if let Some(dir) = var("CUSTOS_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("CUSTOS_MODEL_DIR") {
            self.model_dir = Some(PathBuf::from(dir));
        }
        self.recognition.threshold = parsed(&var, "CUSTOS_ACCEPTANCE_THRESHOLD", self.recognition.threshold);
        self.capture.dwell_secs = parsed(&var, "CUSTOS_DWELL_SECS", self.capture.dwell_secs);
        self.capture.guide_size = parsed(&var, "CUSTOS_GUIDE_SIZE", self.capture.guide_size);
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("custos.db")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    /// Running CSV log of evaluation metrics.
    pub fn metrics_log_path(&self) -> PathBuf {
        self.data_dir.join("metrics_log.csv")
    }

    pub fn model_dir(&self) -> PathBuf {
        self.model_dir.clone().unwrap_or_else(|| self.data_dir.join("models"))
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir().join("det_10g.onnx")
    }

    /// Path to the trained LBPH model.
    pub fn classifier_model_path(&self) -> PathBuf {
        self.data_dir.join("model").join("lbph.json")
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("custos")
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match var(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            current
        }),
        None => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.recognition.threshold, 80.0);
        assert_eq!(config.recognition.cache_capacity, 100);
        assert_eq!(config.capture.guide_size, 300);
        assert_eq!(config.capture.dwell(), Duration::from_secs(3));
        assert_eq!(config.quality, QualityThresholds::default());
        assert!(config.db_path().ends_with("custos/custos.db"));
        assert!(config.metrics_log_path().ends_with("custos/metrics_log.csv"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            camera_device = "/dev/video4"
            data_dir = "/srv/custos"

            [quality]
            min_face_size = 80

            [recognition]
            threshold = 72.5
            "#,
        )
        .unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.quality.min_face_size, 80);
        assert_eq!(config.quality.max_face_size, 400);
        assert_eq!(config.recognition.threshold, 72.5);
        assert_eq!(config.recognition.cache_capacity, 100);
        assert_eq!(config.reports_dir(), PathBuf::from("/srv/custos/reports"));
        assert_eq!(
            config.detector_model_path(),
            PathBuf::from("/srv/custos/models/det_10g.onnx")
        );
    }

    #[test]
    fn test_model_dir_follows_data_dir_unless_set() {
        let mut config = Config::default();
        config.apply_env(|key| (key == "CUSTOS_DATA_DIR").then(|| "/var/lib/custos".to_string()));
        assert_eq!(config.model_dir(), PathBuf::from("/var/lib/custos/models"));

        let config = Config::from_toml("data_dir = \"/srv/custos\"\nmodel_dir = \"/opt/models\"").unwrap();
        assert_eq!(config.detector_model_path(), PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(config.db_path(), PathBuf::from("/srv/custos/custos.db"));
    }

    #[test]
    fn test_unrepresentable_dwell_falls_back() {
        for dwell_secs in [f32::INFINITY, f32::NAN, -1.0, 1e30] {
            let capture = CaptureConfig {
                dwell_secs,
                ..Default::default()
            };
            assert_eq!(capture.dwell(), DEFAULT_DWELL);
        }

        let mut config = Config::default();
        config.apply_env(|key| (key == "CUSTOS_DWELL_SECS").then(|| "inf".to_string()));
        assert_eq!(config.capture.dwell(), DEFAULT_DWELL);
    }

    #[test]
    fn test_unknown_type_is_error() {
        assert!(Config::from_toml("frame_width = \"wide\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CUSTOS_CAMERA_DEVICE", "/dev/video9"),
            ("CUSTOS_DATA_DIR", "/var/lib/custos"),
            ("CUSTOS_ACCEPTANCE_THRESHOLD", "90"),
            ("CUSTOS_DWELL_SECS", "not-a-number"),
        ]);
        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.camera_device, "/dev/video9");
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/custos/custos.db"));
        assert_eq!(config.recognition.threshold, 90.0);
        assert_eq!(config.capture.dwell_secs, 3.0);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[capture]\ndwell_secs = 1.5\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.capture.dwell(), Duration::from_millis(1500));
    }
}
