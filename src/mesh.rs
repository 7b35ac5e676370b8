use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Triangle mesh carried from a per-color archive into the merged package.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeshObject {
    pub name: Option<String>,
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
}

impl MeshObject {
    pub fn new(vertices: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            name: None,
            vertices,
            triangles,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Rotates every triangle so its smallest index comes first, keeping the
    /// winding, then sorts the triangle list.
    ///
    /// Exporters are free to start a triangle at any corner and to emit
    /// triangles in any order; the canonical form makes merged packages
    /// comparable across renderer versions.
    pub fn canonicalize(&mut self) {
        for triangle in &mut self.triangles {
            *triangle = rotate_smallest_first(*triangle);
        }
        self.triangles.sort_unstable();
    }
}

fn rotate_smallest_first([a, b, c]: [u32; 3]) -> [u32; 3] {
    if b < a && b < c {
        [b, c, a]
    } else if c < a && c < b {
        [c, a, b]
    } else {
        [a, b, c]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_preserves_winding() {
        assert_eq!(rotate_smallest_first([2, 0, 1]), [0, 1, 2]);
        assert_eq!(rotate_smallest_first([1, 2, 0]), [0, 1, 2]);
        assert_eq!(rotate_smallest_first([0, 2, 1]), [0, 2, 1]);
    }

    #[test]
    fn canonicalize_sorts_rotated_triangles() {
        let mut mesh = MeshObject::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z],
            vec![[3, 1, 2], [2, 0, 1], [1, 3, 0]],
        );
        mesh.canonicalize();
        assert_eq!(mesh.triangles, vec![[0, 1, 2], [0, 1, 3], [1, 2, 3]]);
        assert_eq!(mesh.vertices.len(), 4);
    }
}
