use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub input_model_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_archive_path: Option<PathBuf>,
    pub renderer_path: PathBuf,
    #[serde(default)]
    pub renderer_args: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout", with = "seconds")]
    pub timeout_per_job: Duration,
    #[serde(default)]
    pub allow_empty_color_set: bool,
    #[serde(default)]
    pub cancel_on_failure: bool,
    #[serde(default = "default_canonical_triangles")]
    pub canonical_triangles: bool,
    /// Directory for the per-color archives. A fresh temporary directory is
    /// used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn new(input_model_path: impl Into<PathBuf>, renderer_path: impl Into<PathBuf>) -> Self {
        Self {
            input_model_path: input_model_path.into(),
            output_archive_path: None,
            renderer_path: renderer_path.into(),
            renderer_args: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
            timeout_per_job: DEFAULT_TIMEOUT,
            allow_empty_color_set: false,
            cancel_on_failure: false,
            canonical_triangles: default_canonical_triangles(),
            work_dir: None,
        }
    }

    /// Target archive path; defaults to the model path with a `.3mf`
    /// extension.
    pub fn output_path(&self) -> PathBuf {
        self.output_archive_path
            .clone()
            .unwrap_or_else(|| default_output_path(&self.input_model_path))
    }

    /// Worker count, never below one.
    pub fn workers(&self) -> usize {
        self.concurrency.max(1)
    }
}

pub fn default_output_path(input: &Path) -> PathBuf {
    input.with_extension("3mf")
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_canonical_triangles() -> bool {
    true
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
