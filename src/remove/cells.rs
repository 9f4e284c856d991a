//! Cell removal: deleting cells and re-patching the faces they expose.

use crate::mesh::PolyMesh;
use crate::mesh::face::Face;
use crate::mesh::ids::{CellId, FaceId, PatchId, PointId};
use crate::mesh_error::MeshMorphError;
use crate::topo::{FaceDef, TopoChange};
use hashbrown::{HashMap, HashSet};

/// Cell-removal policy.
///
/// Removing a set of cells deletes the faces interior to the set and the
/// boundary faces its cells own; internal faces with exactly one side in the
/// set survive as boundary faces on caller-chosen patches.
#[derive(Clone, Copy, Debug, Default)]
pub struct CellRemover;

impl CellRemover {
    pub fn new() -> Self {
        CellRemover
    }

    /// Internal faces that removing `cells` would expose, ascending.
    pub fn exposed_faces(
        &self,
        mesh: &PolyMesh,
        cells: &[CellId],
    ) -> Result<Vec<FaceId>, MeshMorphError> {
        let doomed = self.cell_set(mesh, cells)?;
        let mut exposed = Vec::new();
        for fi in 0..mesh.n_internal_faces() {
            let f = FaceId::new(fi);
            let own = doomed.contains(&mesh.owner_of(f));
            let nei = doomed.contains(&mesh.neighbour_of(f).expect("internal"));
            if own != nei {
                exposed.push(f);
            }
        }
        Ok(exposed)
    }

    /// Stages the removal of `cells` into `change`. `exposed` must be the
    /// faces returned by [`exposed_faces`](Self::exposed_faces), and
    /// `patches` assigns each of them a destination patch.
    pub fn set_refinement(
        &self,
        mesh: &PolyMesh,
        cells: &[CellId],
        exposed: &[FaceId],
        patches: &[PatchId],
        change: &mut TopoChange,
    ) -> Result<(), MeshMorphError> {
        if exposed.len() != patches.len() {
            return Err(MeshMorphError::ExposedPatchMismatch {
                faces: exposed.len(),
                patches: patches.len(),
            });
        }
        let doomed = self.cell_set(mesh, cells)?;
        let expected = self.exposed_faces(mesh, cells)?;
        let mut sorted: Vec<FaceId> = exposed.to_vec();
        sorted.sort_unstable();
        if sorted != expected {
            return Err(MeshMorphError::ExposedPatchMismatch {
                faces: expected.len(),
                patches: patches.len(),
            });
        }
        let patch_of_exposed: HashMap<FaceId, PatchId> = exposed
            .iter()
            .copied()
            .zip(patches.iter().copied())
            .collect();
        for p in patches {
            if p.index() >= change.n_patches() {
                return Err(MeshMorphError::PatchOutOfRange {
                    patch: p.index(),
                    n_patches: change.n_patches(),
                });
            }
        }

        let mut face_survives = vec![true; mesh.n_faces()];
        for fi in 0..mesh.n_faces() {
            let f = FaceId::new(fi);
            let own_doomed = doomed.contains(&mesh.owner_of(f));
            match mesh.neighbour_of(f) {
                Some(nei) => {
                    let nei_doomed = doomed.contains(&nei);
                    if own_doomed && nei_doomed {
                        face_survives[fi] = false;
                        change.remove_face(f, None)?;
                    } else if own_doomed || nei_doomed {
                        let patch = patch_of_exposed[&f];
                        let zone = change.face_zone_of(f)?;
                        // The face flips when the doomed side was the owner,
                        // so its normal keeps pointing out of the survivor.
                        let (verts, survivor, flipped) = if own_doomed {
                            (
                                Face::new(mesh.face(f).verts().to_vec())
                                    .reversed()
                                    .into_verts(),
                                nei,
                                true,
                            )
                        } else {
                            (mesh.face(f).verts().to_vec(), mesh.owner_of(f), false)
                        };
                        let mut def = FaceDef::boundary(verts, survivor, patch);
                        if let Some(z) = zone {
                            def = def.with_zone(z.zone, z.flipped ^ flipped);
                        }
                        change.modify_face(f, def)?;
                    }
                }
                None => {
                    if own_doomed {
                        face_survives[fi] = false;
                        change.remove_face(f, None)?;
                    }
                }
            }
        }

        for c in &doomed {
            change.remove_cell(*c, None)?;
        }

        // Points no surviving face references disappear with the cells.
        let mut used = vec![false; mesh.n_points()];
        for fi in 0..mesh.n_faces() {
            if !face_survives[fi] {
                continue;
            }
            for v in mesh.face(FaceId::new(fi)).verts() {
                used[v.index()] = true;
            }
        }
        for (pi, used) in used.iter().enumerate() {
            if !used {
                change.remove_point(PointId::new(pi), None)?;
            }
        }

        log::debug!(
            "staged removal of {} cells ({} faces exposed)",
            doomed.len(),
            exposed.len(),
        );
        Ok(())
    }

    fn cell_set(
        &self,
        mesh: &PolyMesh,
        cells: &[CellId],
    ) -> Result<HashSet<CellId>, MeshMorphError> {
        let mut set = HashSet::with_capacity(cells.len());
        for c in cells {
            mesh.check_cell(*c)?;
            set.insert(*c);
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::builder::{BlockMeshSpec, block_mesh};
    use crate::topo::CommitOptions;

    #[test]
    fn removing_one_cell_exposes_its_internal_faces() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(2)).unwrap();
        let remover = CellRemover::new();
        let cells = [CellId::new(0)];
        let exposed = remover.exposed_faces(&mesh, &cells).unwrap();
        assert_eq!(exposed.len(), 3);

        let mut change = TopoChange::from_mesh(&mesh);
        let patches = vec![PatchId::new(0); exposed.len()];
        remover
            .set_refinement(&mesh, &cells, &exposed, &patches, &mut change)
            .unwrap();
        let (new_mesh, map) = change.apply(&CommitOptions::default()).unwrap();

        assert_eq!(new_mesh.n_cells(), 7);
        assert_eq!(map.cells().old_to_new(CellId::new(0)), None);
        // Exposed faces moved to patch 0.
        assert_eq!(
            new_mesh.patch(PatchId::new(0)).len,
            mesh.patch(PatchId::new(0)).len - 1 + 3
        );
        // One corner of the block is gone: volume drops by one cell.
        let expected = mesh.total_volume() - mesh.cell_volumes()[0];
        assert!((new_mesh.total_volume() - expected).abs() < 1e-12);
        crate::mesh::check::check_mesh(
            &new_mesh,
            &crate::mesh::check::MeshCheckOptions::default(),
        )
        .unwrap();
    }

    #[test]
    fn exposed_patch_list_must_match() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(2)).unwrap();
        let remover = CellRemover::new();
        let cells = [CellId::new(0)];
        let exposed = remover.exposed_faces(&mesh, &cells).unwrap();
        let mut change = TopoChange::from_mesh(&mesh);
        let err = remover
            .set_refinement(&mesh, &cells, &exposed, &[PatchId::new(0)], &mut change)
            .unwrap_err();
        assert!(matches!(err, MeshMorphError::ExposedPatchMismatch { .. }));
    }
}
