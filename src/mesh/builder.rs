//! Structured block-mesh generation with per-side boundary patches.
//!
//! Produces canonical meshes (upper-triangular internal ordering, one patch
//! per box side) used as starting points for the topology-change policies
//! and throughout the test suites.

use crate::mesh::PolyMesh;
use crate::mesh::face::Face;
use crate::mesh::ids::{CellId, PointId};
use crate::mesh::patch::{Patch, PatchKind};
use crate::mesh_error::MeshMorphError;

/// Boundary patch name for the minimum-x side.
pub const PATCH_X_MIN: &str = "x_min";
/// Boundary patch name for the maximum-x side.
pub const PATCH_X_MAX: &str = "x_max";
/// Boundary patch name for the minimum-y side.
pub const PATCH_Y_MIN: &str = "y_min";
/// Boundary patch name for the maximum-y side.
pub const PATCH_Y_MAX: &str = "y_max";
/// Boundary patch name for the minimum-z side.
pub const PATCH_Z_MIN: &str = "z_min";
/// Boundary patch name for the maximum-z side.
pub const PATCH_Z_MAX: &str = "z_max";

/// Extents and resolution of a structured hexahedral block.
#[derive(Clone, Copy, Debug)]
pub struct BlockMeshSpec {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BlockMeshSpec {
    /// An `n`×`n`×`n` block over the unit cube.
    pub fn unit_cube(n: usize) -> Self {
        BlockMeshSpec {
            nx: n,
            ny: n,
            nz: n,
            min: [0.0; 3],
            max: [1.0; 3],
        }
    }

    fn vertex(&self, i: usize, j: usize, k: usize) -> PointId {
        PointId::new(i + (self.nx + 1) * (j + (self.ny + 1) * k))
    }

    fn cell(&self, i: usize, j: usize, k: usize) -> CellId {
        CellId::new(i + self.nx * (j + self.ny * k))
    }
}

/// Builds a structured hexahedral block mesh with six wall patches
/// (`x_min`, `x_max`, `y_min`, `y_max`, `z_min`, `z_max`).
pub fn block_mesh(spec: &BlockMeshSpec) -> Result<PolyMesh, MeshMorphError> {
    let (nx, ny, nz) = (spec.nx, spec.ny, spec.nz);
    assert!(nx > 0 && ny > 0 && nz > 0, "block resolution must be positive");

    let mut points = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
    for k in 0..=nz {
        for j in 0..=ny {
            for i in 0..=nx {
                points.push([
                    spec.min[0] + (spec.max[0] - spec.min[0]) * i as f64 / nx as f64,
                    spec.min[1] + (spec.max[1] - spec.min[1]) * j as f64 / ny as f64,
                    spec.min[2] + (spec.max[2] - spec.min[2]) * k as f64 / nz as f64,
                ]);
            }
        }
    }

    let mut faces = Vec::new();
    let mut owner = Vec::new();
    let mut neighbour = Vec::new();

    // Internal faces, generated cell-by-cell towards the +x/+y/+z neighbour;
    // this yields upper-triangular (owner, neighbour) order directly.
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let c = spec.cell(i, j, k);
                if i + 1 < nx {
                    faces.push(Face::new(vec![
                        spec.vertex(i + 1, j, k),
                        spec.vertex(i + 1, j + 1, k),
                        spec.vertex(i + 1, j + 1, k + 1),
                        spec.vertex(i + 1, j, k + 1),
                    ]));
                    owner.push(c);
                    neighbour.push(spec.cell(i + 1, j, k));
                }
                if j + 1 < ny {
                    faces.push(Face::new(vec![
                        spec.vertex(i, j + 1, k),
                        spec.vertex(i, j + 1, k + 1),
                        spec.vertex(i + 1, j + 1, k + 1),
                        spec.vertex(i + 1, j + 1, k),
                    ]));
                    owner.push(c);
                    neighbour.push(spec.cell(i, j + 1, k));
                }
                if k + 1 < nz {
                    faces.push(Face::new(vec![
                        spec.vertex(i, j, k + 1),
                        spec.vertex(i + 1, j, k + 1),
                        spec.vertex(i + 1, j + 1, k + 1),
                        spec.vertex(i, j + 1, k + 1),
                    ]));
                    owner.push(c);
                    neighbour.push(spec.cell(i, j, k + 1));
                }
            }
        }
    }
    let n_internal = faces.len();

    let mut patches = Vec::with_capacity(6);
    let mut push_patch = |name: &str, start: usize, len: usize| {
        patches.push(Patch::new(name, PatchKind::Wall, start, len));
    };

    // x_min: outward normal -x.
    let start = faces.len();
    for k in 0..nz {
        for j in 0..ny {
            faces.push(Face::new(vec![
                spec.vertex(0, j, k),
                spec.vertex(0, j, k + 1),
                spec.vertex(0, j + 1, k + 1),
                spec.vertex(0, j + 1, k),
            ]));
            owner.push(spec.cell(0, j, k));
        }
    }
    push_patch(PATCH_X_MIN, start, faces.len() - start);

    // x_max: outward normal +x.
    let start = faces.len();
    for k in 0..nz {
        for j in 0..ny {
            faces.push(Face::new(vec![
                spec.vertex(nx, j, k),
                spec.vertex(nx, j + 1, k),
                spec.vertex(nx, j + 1, k + 1),
                spec.vertex(nx, j, k + 1),
            ]));
            owner.push(spec.cell(nx - 1, j, k));
        }
    }
    push_patch(PATCH_X_MAX, start, faces.len() - start);

    // y_min: outward normal -y.
    let start = faces.len();
    for k in 0..nz {
        for i in 0..nx {
            faces.push(Face::new(vec![
                spec.vertex(i, 0, k),
                spec.vertex(i + 1, 0, k),
                spec.vertex(i + 1, 0, k + 1),
                spec.vertex(i, 0, k + 1),
            ]));
            owner.push(spec.cell(i, 0, k));
        }
    }
    push_patch(PATCH_Y_MIN, start, faces.len() - start);

    // y_max: outward normal +y.
    let start = faces.len();
    for k in 0..nz {
        for i in 0..nx {
            faces.push(Face::new(vec![
                spec.vertex(i, ny, k),
                spec.vertex(i, ny, k + 1),
                spec.vertex(i + 1, ny, k + 1),
                spec.vertex(i + 1, ny, k),
            ]));
            owner.push(spec.cell(i, ny - 1, k));
        }
    }
    push_patch(PATCH_Y_MAX, start, faces.len() - start);

    // z_min: outward normal -z.
    let start = faces.len();
    for j in 0..ny {
        for i in 0..nx {
            faces.push(Face::new(vec![
                spec.vertex(i, j, 0),
                spec.vertex(i, j + 1, 0),
                spec.vertex(i + 1, j + 1, 0),
                spec.vertex(i + 1, j, 0),
            ]));
            owner.push(spec.cell(i, j, 0));
        }
    }
    push_patch(PATCH_Z_MIN, start, faces.len() - start);

    // z_max: outward normal +z.
    let start = faces.len();
    for j in 0..ny {
        for i in 0..nx {
            faces.push(Face::new(vec![
                spec.vertex(i, j, nz),
                spec.vertex(i + 1, j, nz),
                spec.vertex(i + 1, j + 1, nz),
                spec.vertex(i, j + 1, nz),
            ]));
            owner.push(spec.cell(i, j, nz - 1));
        }
    }
    push_patch(PATCH_Z_MAX, start, faces.len() - start);

    debug_assert_eq!(n_internal + patches.iter().map(|p| p.len).sum::<usize>(), faces.len());

    PolyMesh::new(points, faces, owner, neighbour, patches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_match_resolution() {
        let mesh = block_mesh(&BlockMeshSpec {
            nx: 3,
            ny: 2,
            nz: 1,
            min: [0.0; 3],
            max: [3.0, 2.0, 1.0],
        })
        .unwrap();
        assert_eq!(mesh.n_cells(), 6);
        assert_eq!(mesh.n_points(), 4 * 3 * 2);
        // internal: x-planes 2*2, y-planes 3*1 -> 4 + 3 = 7
        assert_eq!(mesh.n_internal_faces(), 7);
        assert!((mesh.total_volume() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn outward_normals_on_boundary() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(2)).unwrap();
        let centres = mesh.face_centres();
        let areas = mesh.face_area_vectors();
        let cell_centres = mesh.cell_centres();
        for fi in mesh.n_internal_faces()..mesh.n_faces() {
            let f = crate::mesh::ids::FaceId::new(fi);
            let own = mesh.owner_of(f);
            let out = [
                centres[fi][0] - cell_centres[own.index()][0],
                centres[fi][1] - cell_centres[own.index()][1],
                centres[fi][2] - cell_centres[own.index()][2],
            ];
            let d = out[0] * areas[fi][0] + out[1] * areas[fi][1] + out[2] * areas[fi][2];
            assert!(d > 0.0, "boundary face {fi} normal not outward");
        }
    }

    #[test]
    fn internal_faces_upper_triangular() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(3)).unwrap();
        let mut previous = (0usize, 0usize);
        for fi in 0..mesh.n_internal_faces() {
            let f = crate::mesh::ids::FaceId::new(fi);
            let key = (
                mesh.owner_of(f).index(),
                mesh.neighbour_of(f).unwrap().index(),
            );
            assert!(key.0 < key.1);
            assert!(previous <= key, "face {fi} breaks ordering");
            previous = key;
        }
    }
}
