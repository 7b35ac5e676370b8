use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::mesh::MeshObject;
use crate::model::{self, PackageLayout};
use crate::package::MergedPackage;

/// Storage backend for packaged 3D files.
pub trait ArchiveStore: Send + Sync {
    /// Loads every mesh object stored in the archive at `path`.
    fn load_meshes(&self, path: &Path) -> Result<Vec<MeshObject>>;

    /// Writes `package` to `path`, replacing whatever is there.
    fn save(&self, package: &MergedPackage, path: &Path) -> Result<()>;
}

/// [`ArchiveStore`] for 3MF packages.
///
/// Entries are written with a fixed timestamp so identical packages produce
/// identical bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreeMfStore;

impl ThreeMfStore {
    /// Reads the structural layout of the model part of a 3MF file.
    pub fn inspect(&self, path: &Path) -> Result<PackageLayout> {
        let mut archive = open_zip(path)?;
        let xml = read_model_part(&mut archive)?;
        model::parse_layout(&xml)
    }

    /// Returns `true` when the archive carries the slicer naming metadata.
    pub fn has_slicer_config(&self, path: &Path) -> Result<bool> {
        let archive = open_zip(path)?;
        let found = archive.file_names().any(|name| name == model::SLICER_CONFIG_PART);
        Ok(found)
    }
}

impl ArchiveStore for ThreeMfStore {
    fn load_meshes(&self, path: &Path) -> Result<Vec<MeshObject>> {
        let mut archive = open_zip(path)?;
        let xml = read_model_part(&mut archive)?;
        model::parse_meshes(&xml)
    }

    fn save(&self, package: &MergedPackage, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("unable to create {}", path.display()))?;
        let mut writer = ZipWriter::new(BufWriter::new(file));

        let mut model_xml = String::new();
        model::write_model(package, &mut model_xml)
            .map_err(|_| anyhow!("unable to format model XML"))?;
        let mut config_xml = String::new();
        let has_config = model::write_slicer_config(package, &mut config_xml)
            .map_err(|_| anyhow!("unable to format slicer metadata"))?;

        add_entry(&mut writer, model::CONTENT_TYPES_PART, model::CONTENT_TYPES_XML)?;
        add_entry(&mut writer, model::RELS_PART, &model::rels_xml())?;
        add_entry(&mut writer, model::MODEL_PART, &model_xml)?;
        if has_config {
            add_entry(&mut writer, model::SLICER_CONFIG_PART, &config_xml)?;
        }

        let mut inner = writer
            .finish()
            .with_context(|| format!("unable to finalize {}", path.display()))?;
        inner
            .flush()
            .with_context(|| format!("unable to write {}", path.display()))?;
        Ok(())
    }
}

fn open_zip(path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file =
        File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
    ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("{} is not a valid 3MF package", path.display()))
}

fn read_model_part<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String> {
    let part = match read_entry(archive, model::RELS_PART)? {
        Some(rels) => model::model_part_from_rels(&rels)?
            .unwrap_or_else(|| model::MODEL_PART.to_string()),
        None => model::MODEL_PART.to_string(),
    };
    read_entry(archive, &part)?.ok_or_else(|| anyhow!("package has no model part {part}"))
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<String>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("unable to read {name}")),
    };
    let mut contents = String::new();
    entry
        .read_to_string(&mut contents)
        .with_context(|| format!("{name} is not valid UTF-8 text"))?;
    Ok(Some(contents))
}

fn add_entry<W: Write + Seek>(writer: &mut ZipWriter<W>, name: &str, contents: &str) -> Result<()> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());
    writer
        .start_file(name, options)
        .with_context(|| format!("unable to add {name}"))?;
    writer
        .write_all(contents.as_bytes())
        .with_context(|| format!("unable to write {name}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgba;
    use glam::Vec3;
    use once_cell::sync::Lazy;
    use tempfile::TempDir;

    static TRIANGLE: Lazy<MeshObject> = Lazy::new(|| {
        MeshObject::new(
            vec![Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), Vec3::new(0.0, 10.0, 0.0)],
            vec![[0, 1, 2]],
        )
    });

    fn package_with(colors: &[(&str, Rgba)]) -> MergedPackage {
        let mut package = MergedPackage::new();
        for (name, rgba) in colors {
            package.add_object(*name, *rgba, TRIANGLE.clone());
        }
        package
    }

    #[test]
    fn save_then_load_meshes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("single.3mf");
        let store = ThreeMfStore;
        store
            .save(&package_with(&[("red", Rgba::new(1.0, 0.0, 0.0, 1.0))]), &path)
            .unwrap();

        let meshes = store.load_meshes(&path).unwrap();
        assert_eq!(meshes.len(), 1);
        assert_eq!(meshes[0].vertices, TRIANGLE.vertices);
        assert_eq!(meshes[0].triangles, TRIANGLE.triangles);
        assert!(store.has_slicer_config(&path).unwrap());
    }

    #[test]
    fn identical_packages_produce_identical_bytes() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("a.3mf");
        let second = dir.path().join("b.3mf");
        let package = package_with(&[
            ("red", Rgba::new(1.0, 0.0, 0.0, 1.0)),
            ("blue", Rgba::new(0.0, 0.0, 1.0, 1.0)),
        ]);
        ThreeMfStore.save(&package, &first).unwrap();
        ThreeMfStore.save(&package, &second).unwrap();
        assert_eq!(std::fs::read(first).unwrap(), std::fs::read(second).unwrap());
    }

    #[test]
    fn garbage_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.3mf");
        std::fs::write(&path, b"definitely not a zip").unwrap();
        let err = ThreeMfStore.load_meshes(&path).unwrap_err();
        assert!(err.to_string().contains("is not a valid 3MF package"));
    }

    #[test]
    fn model_part_found_without_rels() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bare.3mf");
        let mut xml = String::new();
        model::write_model(&package_with(&[("red", Rgba::new(1.0, 0.0, 0.0, 1.0))]), &mut xml)
            .unwrap();

        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        add_entry(&mut writer, model::MODEL_PART, &xml).unwrap();
        writer.finish().unwrap();

        assert_eq!(ThreeMfStore.load_meshes(&path).unwrap().len(), 1);
    }

    #[test]
    fn missing_model_part_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.3mf");
        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        add_entry(&mut writer, "readme.txt", "hello").unwrap();
        writer.finish().unwrap();

        let err = ThreeMfStore.load_meshes(&path).unwrap_err();
        assert!(err.to_string().contains("no model part"));
    }
}
