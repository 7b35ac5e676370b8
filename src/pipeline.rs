//! Sequencing extraction, resolution, rendering and merging for one model.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::archive::ArchiveStore;
use crate::color::{ColorDictionary, ColorResolver, CssColors, ResolvedColor};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineFailure};
use crate::extract::extract_colors;
use crate::merge::{ArchiveMerger, MergeInput};
use crate::render::{RenderJob, RenderJobRunner, RenderOutcome, Renderer};

/// Where a pipeline run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Idle,
    Extracting,
    Resolving,
    Rendering,
    Merging,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Extracting => "extracting",
            PipelineStage::Resolving => "resolving",
            PipelineStage::Rendering => "rendering",
            PipelineStage::Merging => "merging",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        })
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub output_path: PathBuf,
    pub colors: Vec<ResolvedColor>,
    pub objects: usize,
    pub materials: usize,
    /// `color()` calls skipped because their literal could not be parsed.
    pub skipped_calls: usize,
    /// The model had no colors and an empty package was written.
    pub empty: bool,
    /// Temporary files that could not be removed.
    pub cleanup_warnings: Vec<String>,
}

/// Drives one model through the render-and-merge pipeline.
///
/// Runs take `&mut self`, so two runs on the same coordinator can never
/// overlap.
pub struct PipelineCoordinator<R, S, D = CssColors> {
    config: PipelineConfig,
    renderer: R,
    store: S,
    resolver: ColorResolver<D>,
    stage: PipelineStage,
}

impl<R: Renderer, S: ArchiveStore> PipelineCoordinator<R, S> {
    pub fn new(config: PipelineConfig, renderer: R, store: S) -> Self {
        Self::with_resolver(config, renderer, store, ColorResolver::default())
    }
}

impl<R: Renderer, S: ArchiveStore, D: ColorDictionary> PipelineCoordinator<R, S, D> {
    pub fn with_resolver(
        config: PipelineConfig,
        renderer: R,
        store: S,
        resolver: ColorResolver<D>,
    ) -> Self {
        Self {
            config,
            renderer,
            store,
            resolver,
            stage: PipelineStage::Idle,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&mut self) -> Result<PipelineReport, PipelineFailure> {
        self.stage = PipelineStage::Idle;
        match self.run_stages() {
            Ok(report) => {
                self.stage = PipelineStage::Done;
                Ok(report)
            }
            Err(causes) => {
                let failure = PipelineFailure::new(self.stage, causes);
                self.stage = PipelineStage::Failed;
                Err(failure)
            }
        }
    }

    fn enter(&mut self, stage: PipelineStage) {
        info!("pipeline: {} -> {stage}", self.stage);
        self.stage = stage;
    }

    fn run_stages(&mut self) -> Result<PipelineReport, Vec<PipelineError>> {
        let model_path = self.config.input_model_path.clone();
        let output_path = self.config.output_path();

        self.enter(PipelineStage::Extracting);
        let source = fs::read_to_string(&model_path).map_err(|source| {
            vec![PipelineError::Input {
                path: model_path.clone(),
                source,
            }]
        })?;
        let extracted = extract_colors(&source);
        let skipped_calls = extracted.malformed.len();
        if extracted.is_empty() {
            if !self.config.allow_empty_color_set {
                return Err(vec![PipelineError::Extraction {
                    path: model_path,
                    skipped: skipped_calls,
                }]);
            }
            warn!(
                "no color() calls found in {}; writing a package without geometry",
                model_path.display()
            );
        } else {
            info!(
                "Found {} color(s): {:?}",
                extracted.tokens.len(),
                extracted.tokens
            );
        }

        self.enter(PipelineStage::Resolving);
        let colors = self
            .resolver
            .resolve_all(&extracted.tokens)
            .map_err(|err| vec![err])?;

        self.enter(PipelineStage::Rendering);
        let workspace = Workspace::create(self.config.work_dir.as_deref())
            .map_err(|err| vec![PipelineError::Workspace(err)])?;
        let jobs: Vec<RenderJob> = colors
            .iter()
            .enumerate()
            .map(|(index, color)| RenderJob {
                index,
                color: color.clone(),
                model_path: model_path.clone(),
                output_path: workspace.archive_path(index),
            })
            .collect();
        let outcomes = RenderJobRunner::new(&self.renderer, self.config.workers(), self.config.timeout_per_job)
            .cancel_on_failure(self.config.cancel_on_failure)
            .run(jobs);

        let failures: Vec<PipelineError> = outcomes.iter().filter_map(RenderOutcome::to_error).collect();
        if !failures.is_empty() {
            workspace.cleanup(&outcomes);
            return Err(failures);
        }

        self.enter(PipelineStage::Merging);
        let inputs: Vec<MergeInput> = outcomes
            .iter()
            .map(|outcome| MergeInput {
                color: outcome.job.color.clone(),
                archive_path: outcome.job.output_path.clone(),
            })
            .collect();
        let merged = ArchiveMerger::new(&self.store)
            .canonical_triangles(self.config.canonical_triangles)
            .merge(&inputs, &output_path);
        let cleanup_warnings = workspace.cleanup(&outcomes);
        let summary = merged.map_err(|err| vec![err])?;

        Ok(PipelineReport {
            output_path: summary.output_path,
            empty: colors.is_empty(),
            colors,
            objects: summary.objects,
            materials: summary.materials,
            skipped_calls,
            cleanup_warnings,
        })
    }
}

/// Scratch space for the per-color archives of one run.
///
/// Every run gets a fresh directory, inside the configured work directory
/// when there is one, so runs sharing a work directory never share paths.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn create(configured: Option<&Path>) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("colorscad-");
        let dir = match configured {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        Ok(Self { dir })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Each job gets its own file, named by position so arbitrary tokens
    /// never end up in file names.
    fn archive_path(&self, index: usize) -> PathBuf {
        self.path().join(format!("color-{index:03}.3mf"))
    }

    /// Removes every per-color archive and the run directory. Problems are
    /// logged and returned as warnings; they never fail the run.
    fn cleanup(self, outcomes: &[RenderOutcome]) -> Vec<String> {
        let mut warnings = Vec::new();
        for outcome in outcomes {
            let path = &outcome.job.output_path;
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    let message = format!("unable to remove {}: {err}", path.display());
                    warn!("{message}");
                    warnings.push(message);
                }
            }
        }
        let path = self.path().to_path_buf();
        if let Err(err) = self.dir.close() {
            let message = format!("unable to remove {}: {err}", path.display());
            warn!("{message}");
            warnings.push(message);
        }
        warnings
    }
}
