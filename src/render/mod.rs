//! Producing one single-color archive per color.

pub mod discovery;
mod openscad;
mod runner;

use std::path::PathBuf;
use std::time::Duration;

use crate::color::ResolvedColor;
use crate::error::{PipelineError, RenderFailureKind};

pub use discovery::find_renderer;
pub use openscad::OpenScadRenderer;
pub use runner::RenderJobRunner;

/// Everything needed to render one color of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    /// Position of the color in extraction order.
    pub index: usize,
    pub color: ResolvedColor,
    pub model_path: PathBuf,
    pub output_path: PathBuf,
}

/// What happened to a render job. Produced exactly once per job.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutcome {
    pub job: RenderJob,
    pub error: Option<RenderFailureKind>,
}

impl RenderOutcome {
    pub fn succeeded(job: RenderJob) -> Self {
        Self { job, error: None }
    }

    pub fn failed(job: RenderJob, kind: RenderFailureKind) -> Self {
        Self {
            job,
            error: Some(kind),
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Converts a failed outcome into the pipeline error it stands for.
    pub fn to_error(&self) -> Option<PipelineError> {
        self.error.clone().map(|kind| PipelineError::RenderFailure {
            token: self.job.color.token.clone(),
            kind,
        })
    }
}

/// Capability that turns a model plus a color into a single-color archive
/// at `job.output_path`.
///
/// Implementations must not write anywhere except the job's output path.
/// The runner checks that the archive exists and is non-empty afterwards.
pub trait Renderer: Send + Sync {
    fn render(&self, job: &RenderJob, timeout: Duration) -> Result<(), RenderFailureKind>;
}

impl<R: Renderer + ?Sized> Renderer for &R {
    fn render(&self, job: &RenderJob, timeout: Duration) -> Result<(), RenderFailureKind> {
        (**self).render(job, timeout)
    }
}
