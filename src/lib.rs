//! Color-separated rendering of OpenSCAD models into multi-material 3MF.
//!
//! OpenSCAD exports a single mesh and drops `color()` information. The
//! pipeline here renders the model once per color, with every other color
//! filtered out, and merges the single-color archives into one package in
//! which each mesh object carries its own material. Rendering goes through
//! the [`Renderer`] trait and archive I/O through [`ArchiveStore`], so the
//! whole pipeline can run headless in tests without OpenSCAD installed.

pub mod archive;
pub mod cli;
pub mod color;
pub mod config;
pub mod error;
pub mod extract;
pub mod merge;
pub mod mesh;
pub mod model;
pub mod package;
pub mod pipeline;
pub mod render;

pub use archive::{ArchiveStore, ThreeMfStore};
pub use color::{ColorDictionary, ColorResolver, CssColors, ResolvedColor, Rgba};
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineFailure, RenderFailureKind};
pub use extract::{extract_colors, ExtractedColors};
pub use merge::{ArchiveMerger, MergeInput, MergeSummary};
pub use mesh::MeshObject;
pub use package::MergedPackage;
pub use pipeline::{PipelineCoordinator, PipelineReport, PipelineStage};
pub use render::{find_renderer, OpenScadRenderer, RenderJob, RenderJobRunner, RenderOutcome, Renderer};
