use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::archive::ArchiveStore;
use crate::color::ResolvedColor;
use crate::error::PipelineError;
use crate::mesh::MeshObject;
use crate::package::MergedPackage;

/// A successfully rendered single-color archive.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeInput {
    pub color: ResolvedColor,
    pub archive_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub output_path: PathBuf,
    pub objects: usize,
    pub materials: usize,
}

/// Fuses single-color archives into one multi-material package.
pub struct ArchiveMerger<'s, S: ?Sized> {
    store: &'s S,
    canonical_triangles: bool,
}

impl<'s, S: ArchiveStore + ?Sized> ArchiveMerger<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            canonical_triangles: true,
        }
    }

    pub fn canonical_triangles(mut self, enabled: bool) -> Self {
        self.canonical_triangles = enabled;
        self
    }

    /// Merges `inputs` in the order given and writes the result to `output`.
    ///
    /// The package is staged next to `output` and only moved into place once
    /// it is complete, so a failed merge never leaves a file at `output`.
    pub fn merge(&self, inputs: &[MergeInput], output: &Path) -> Result<MergeSummary, PipelineError> {
        let mut package = MergedPackage::new();

        for input in inputs {
            let token = &input.color.token;
            let mut mesh = self.load_single_mesh(input)?;
            if self.canonical_triangles {
                mesh.canonicalize();
            }
            mesh.name = Some(token.clone());
            let triangles = mesh.triangles.len();
            let id = package.add_object(token.as_str(), input.color.rgba, mesh);
            debug!("added object {id} for color '{token}' ({triangles} triangles)");
        }

        self.write_atomically(&package, output)?;
        info!(
            "Merged {} object(s) with {} color definition(s) into {}",
            package.objects().len(),
            package.materials().len(),
            output.display()
        );

        Ok(MergeSummary {
            output_path: output.to_path_buf(),
            objects: package.objects().len(),
            materials: package.materials().len(),
        })
    }

    fn load_single_mesh(&self, input: &MergeInput) -> Result<MeshObject, PipelineError> {
        let token = &input.color.token;
        let meshes = self.store.load_meshes(&input.archive_path).map_err(|err| {
            PipelineError::merge(
                token.as_str(),
                format!("unable to read {}: {err:#}", input.archive_path.display()),
            )
        })?;
        match <[MeshObject; 1]>::try_from(meshes) {
            Ok([mesh]) => Ok(mesh),
            Err(meshes) => Err(PipelineError::merge(
                token.as_str(),
                format!(
                    "unsupported archive shape: expected exactly one mesh object, found {}",
                    meshes.len()
                ),
            )),
        }
    }

    fn write_atomically(&self, package: &MergedPackage, output: &Path) -> Result<(), PipelineError> {
        let parent = output
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let staging = tempfile::Builder::new()
            .prefix(".colorscad-")
            .suffix(".3mf.partial")
            .tempfile_in(parent)
            .map_err(|err| {
                PipelineError::merge_output(format!(
                    "unable to stage output in {}: {err}",
                    parent.display()
                ))
            })?;

        self.store
            .save(package, staging.path())
            .map_err(|err| PipelineError::merge_output(format!("{err:#}")))?;

        staging.persist(output).map_err(|err| {
            PipelineError::merge_output(format!(
                "unable to move merged archive to {}: {}",
                output.display(),
                err.error
            ))
        })?;
        Ok(())
    }
}
