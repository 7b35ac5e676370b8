//! Error taxonomy for the render-and-merge pipeline.
//!
//! Errors raised inside a stage are [`PipelineError`] values. A run that
//! ends in the `Failed` state returns a [`PipelineFailure`] carrying the
//! stage it failed in together with every cause collected up to that point.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::PipelineStage;

/// A fatal condition raised by one of the pipeline stages.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The model source could not be read.
    #[error("unable to read model {}: {source}", .path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No usable color token was found and empty color sets are disallowed.
    #[error("no color() calls found in {} ({skipped} malformed call(s) skipped)", .path.display())]
    Extraction { path: PathBuf, skipped: usize },

    /// A token could not be mapped to an RGBA value.
    #[error("unknown color '{token}'")]
    UnknownColor { token: String },

    /// Scratch space for the per-color archives could not be prepared.
    #[error("unable to prepare work directory: {0}")]
    Workspace(#[source] std::io::Error),

    /// A render job failed.
    #[error("render for color '{token}' failed: {kind}")]
    RenderFailure {
        token: String,
        kind: RenderFailureKind,
    },

    /// The merge step could not produce the output archive.
    #[error("{}", merge_message(.token.as_deref(), .reason))]
    Merge {
        token: Option<String>,
        reason: String,
    },
}

fn merge_message(token: Option<&str>, reason: &str) -> String {
    match token {
        Some(token) => format!("merge failed for color '{token}': {reason}"),
        None => format!("merge failed: {reason}"),
    }
}

impl PipelineError {
    pub fn unknown_color(token: impl Into<String>) -> Self {
        Self::UnknownColor {
            token: token.into(),
        }
    }

    pub fn merge(token: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Merge {
            token: Some(token.into()),
            reason: reason.to_string(),
        }
    }

    pub fn merge_output(reason: impl fmt::Display) -> Self {
        Self::Merge {
            token: None,
            reason: reason.to_string(),
        }
    }
}

/// Reason a single render job did not produce a usable archive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderFailureKind {
    #[error("unable to launch renderer: {0}")]
    Spawn(String),

    #[error("renderer exited with {}{}", exit_label(.code), stderr_suffix(.stderr))]
    ExitStatus { code: Option<i32>, stderr: String },

    #[error("renderer exceeded the {}s deadline and was terminated", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("renderer reported success but {} was not created", .0.display())]
    MissingOutput(PathBuf),

    #[error("renderer produced an empty archive at {}", .0.display())]
    EmptyOutput(PathBuf),

    #[error("skipped after an earlier job failed")]
    Skipped,
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

/// Terminal error of a pipeline run.
#[derive(Error, Debug)]
#[error("pipeline failed while {stage}: {}", join_causes(.causes))]
pub struct PipelineFailure {
    pub stage: PipelineStage,
    pub causes: Vec<PipelineError>,
}

impl PipelineFailure {
    pub fn new(stage: PipelineStage, causes: Vec<PipelineError>) -> Self {
        Self { stage, causes }
    }

    pub fn single(stage: PipelineStage, cause: PipelineError) -> Self {
        Self::new(stage, vec![cause])
    }
}

fn join_causes(causes: &[PipelineError]) -> String {
    causes
        .iter()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
