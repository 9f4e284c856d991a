//! Cell shape recognition.
//!
//! The topology engine mostly treats cells as generic polyhedra; shape
//! matching matters where a policy is only defined for a specific shape
//! (2x2x2 refinement requires hexahedra).

use crate::mesh::PolyMesh;
use crate::mesh::ids::CellId;

/// Recognized primitive cell shapes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CellShape {
    /// 4 triangular faces, 4 points.
    Tetrahedron,
    /// 4 triangles on a quad base, 5 points.
    Pyramid,
    /// 2 triangles and 3 quads, 6 points.
    Prism,
    /// 6 quads, 8 points, 3 faces per point.
    Hexahedron,
    /// Anything else.
    Polyhedron,
}

impl CellShape {
    /// Topological dimension; always 3 for mesh cells.
    pub fn dimension(self) -> u8 {
        3
    }
}

/// Classifies cell `c` by face/vertex counts and per-vertex face valence.
pub fn cell_shape(mesh: &PolyMesh, c: CellId) -> CellShape {
    let faces = &mesh.cell_faces()[c.index()];
    let points = &mesh.cell_points()[c.index()];
    let mut n_tri = 0usize;
    let mut n_quad = 0usize;
    for f in faces {
        match mesh.face(*f).len() {
            3 => n_tri += 1,
            4 => n_quad += 1,
            _ => return CellShape::Polyhedron,
        }
    }

    match (faces.len(), points.len(), n_tri, n_quad) {
        (4, 4, 4, 0) => CellShape::Tetrahedron,
        (5, 5, 4, 1) => CellShape::Pyramid,
        (5, 6, 2, 3) => CellShape::Prism,
        (6, 8, 0, 6) => {
            // A hex has every vertex on exactly three of the six faces.
            for p in points {
                let valence = faces
                    .iter()
                    .filter(|f| mesh.face(**f).contains(*p))
                    .count();
                if valence != 3 {
                    return CellShape::Polyhedron;
                }
            }
            CellShape::Hexahedron
        }
        _ => CellShape::Polyhedron,
    }
}

/// True if cell `c` is topologically a hexahedron.
pub fn is_hex(mesh: &PolyMesh, c: CellId) -> bool {
    cell_shape(mesh, c) == CellShape::Hexahedron
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::builder::{BlockMeshSpec, block_mesh};

    #[test]
    fn block_cells_are_hexes() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(2)).unwrap();
        for c in 0..mesh.n_cells() {
            assert_eq!(cell_shape(&mesh, CellId::new(c)), CellShape::Hexahedron);
        }
    }
}
