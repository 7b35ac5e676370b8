use crate::color::Rgba;
use crate::mesh::MeshObject;

/// One mesh object in the merged package.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageObject {
    pub id: u32,
    pub name: String,
    /// Index into [`MergedPackage::materials`].
    pub material: usize,
    pub mesh: MeshObject,
}

/// Multi-material package accumulated during a merge.
///
/// Mesh objects receive ids `1..=n` in insertion order. The shared color
/// group takes id `n + 1` and the assembly that groups every object for the
/// single build item takes id `n + 2`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedPackage {
    objects: Vec<PackageObject>,
    materials: Vec<Rgba>,
}

impl MergedPackage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a mesh object colored with `rgba` and returns its id.
    ///
    /// A material entry is reused when an earlier object used exactly the
    /// same color.
    pub fn add_object(&mut self, name: impl Into<String>, rgba: Rgba, mesh: MeshObject) -> u32 {
        let material = match self.materials.iter().position(|existing| *existing == rgba) {
            Some(index) => index,
            None => {
                self.materials.push(rgba);
                self.materials.len() - 1
            }
        };
        let id = self.objects.len() as u32 + 1;
        self.objects.push(PackageObject {
            id,
            name: name.into(),
            material,
            mesh,
        });
        id
    }

    pub fn objects(&self) -> &[PackageObject] {
        &self.objects
    }

    pub fn materials(&self) -> &[Rgba] {
        &self.materials
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn material_group_id(&self) -> u32 {
        self.objects.len() as u32 + 1
    }

    /// Id of the assembly referenced by the build item, if there is anything
    /// to build.
    pub fn assembly_id(&self) -> Option<u32> {
        (!self.is_empty()).then(|| self.objects.len() as u32 + 2)
    }

    /// Object ids grouped under the build item, in merge order.
    pub fn build_item_refs(&self) -> Vec<u32> {
        self.objects.iter().map(|object| object.id).collect()
    }
}
