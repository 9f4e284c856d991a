//! The topology-change engine: request accumulation, commit, transfer maps.
//!
//! The life cycle of one topology change:
//! 1. seed a [`TopoChange`] from the live mesh (or start empty),
//! 2. let a policy (refinement, dualisation, removal) stage operations,
//! 3. [`TopoChange::apply`] validates and commits, producing a new
//!    [`PolyMesh`](crate::mesh::PolyMesh) and a [`MeshMap`],
//! 4. the caller re-samples fields through the map and, when the map says
//!    so, finishes with `move_points`.

pub mod change;
pub mod commit;
pub mod map;

pub use change::{FaceDef, FaceZoneMembership, TopoChange, TopoOp};
pub use commit::CommitOptions;
pub use map::{EntityMap, MeshMap};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::builder::{BlockMeshSpec, block_mesh};
    use crate::mesh::ids::{CellId, FaceId, PatchId, PointId};

    #[test]
    fn noop_commit_is_identity() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(2)).unwrap();
        let change = TopoChange::from_mesh(&mesh);
        let (new_mesh, map) = change.apply(&CommitOptions::default()).unwrap();
        assert!(map.is_identity());
        assert!(!map.morphing());
        assert!(!map.has_motion_points());
        assert_eq!(new_mesh, mesh);
    }

    #[test]
    fn noop_commit_with_inflate_has_no_motion() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(2)).unwrap();
        let change = TopoChange::from_mesh(&mesh);
        let (new_mesh, map) = change.apply(&CommitOptions::inflated()).unwrap();
        // Inflation was requested but nothing moved: no motion is pending.
        assert!(!map.has_motion_points());
        assert!(map.is_identity());
        assert_eq!(new_mesh, mesh);
    }

    #[test]
    fn dangling_point_is_a_validation_error() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(1)).unwrap();
        let mut change = TopoChange::from_mesh(&mesh);
        change.remove_point(PointId::new(0), None).unwrap();
        let err = change.apply(&CommitOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            crate::mesh_error::MeshMorphError::DanglingPoint { .. }
        ));
    }

    #[test]
    fn merged_points_collapse_face_loops() {
        // Merging two adjacent vertices of a hex degenerates its quads into
        // triangles; the mesh stays valid.
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(1)).unwrap();
        let mut change = TopoChange::from_mesh(&mesh);
        let a = mesh.face(FaceId::new(0)).verts()[0];
        let b = mesh.face(FaceId::new(0)).verts()[1];
        change.merge_points(a, b).unwrap();
        let (new_mesh, map) = change.apply(&CommitOptions::default()).unwrap();
        assert_eq!(new_mesh.n_points(), 7);
        assert_eq!(map.points().merged().len(), 1);
        assert_eq!(map.points().old_to_new(b), None);
        let target = map.points().merged()[0].1;
        assert_eq!(map.points().old_to_new(a), Some(target));
    }

    #[test]
    fn patch_relabelling_is_reported() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(1)).unwrap();
        let mut change = TopoChange::from_mesh(&mesh);
        // Move every face of the last patch onto the first, then drop it.
        let last = PatchId::new(mesh.n_patches() - 1);
        for fi in mesh.patch(last).range() {
            let f = FaceId::new(fi);
            let def = FaceDef::boundary(
                mesh.face(f).verts().to_vec(),
                mesh.owner_of(f),
                PatchId::new(0),
            );
            change.modify_face(f, def).unwrap();
        }
        change.set_patch_count(mesh.n_patches() - 1);
        let mut patch_map: Vec<Option<PatchId>> = (0..mesh.n_patches() - 1)
            .map(|i| Some(PatchId::new(i)))
            .collect();
        patch_map.push(Some(PatchId::new(0)));
        change.set_patch_map(patch_map).unwrap();

        let (new_mesh, map) = change.apply(&CommitOptions::default()).unwrap();
        assert_eq!(new_mesh.n_patches(), mesh.n_patches() - 1);
        assert_eq!(new_mesh.patch(PatchId::new(0)).len, 2);
        assert_eq!(map.patch_map()[mesh.n_patches() - 1], Some(PatchId::new(0)));
        assert!(map.morphing());
    }

    #[test]
    fn cell_with_too_few_faces_rejected() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(1)).unwrap();
        let mut change = TopoChange::from_mesh(&mesh);
        change.remove_face(FaceId::new(0), None).unwrap();
        change.remove_face(FaceId::new(1), None).unwrap();
        change.remove_face(FaceId::new(2), None).unwrap();
        let err = change.apply(&CommitOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            crate::mesh_error::MeshMorphError::CellWithoutFaces { .. }
        ));
    }

    #[test]
    fn insertion_order_does_not_change_committed_mesh() {
        // Stage the same end state twice with different op orders; the
        // committed meshes must be identical.
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(2)).unwrap();
        let sample: Vec<FaceId> = (0..mesh.n_internal_faces()).map(FaceId::new).collect();

        let build = |order: &[FaceId]| {
            let mut change = TopoChange::from_mesh(&mesh);
            for f in order {
                // Rewrite each internal face with its own definition; a pure
                // no-op expressed through modify ops.
                let def = FaceDef::internal(
                    mesh.face(*f).verts().to_vec(),
                    mesh.owner_of(*f),
                    mesh.neighbour_of(*f).unwrap(),
                );
                change.modify_face(*f, def).unwrap();
            }
            change.apply(&CommitOptions::default()).unwrap().0
        };

        let forward = build(&sample);
        let reversed: Vec<FaceId> = sample.iter().rev().copied().collect();
        let backward = build(&reversed);
        assert_eq!(forward, backward);
        assert_eq!(forward, mesh);
    }

    #[test]
    fn orientation_canonicalized_and_flip_recorded() {
        // Stage an internal face flipped (owner > neighbour); commit must
        // restore owner < neighbour and record the flip.
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(2)).unwrap();
        let f = FaceId::new(0);
        let own = mesh.owner_of(f);
        let nei = mesh.neighbour_of(f).unwrap();
        let mut change = TopoChange::from_mesh(&mesh);
        let flipped = crate::mesh::face::Face::new(mesh.face(f).verts().to_vec()).reversed();
        change
            .modify_face(f, FaceDef::internal(flipped.into_verts(), nei, own))
            .unwrap();
        let (new_mesh, map) = change.apply(&CommitOptions::default()).unwrap();
        assert_eq!(new_mesh, mesh);
        let new_f = map.faces().old_to_new(f).unwrap();
        assert!(map.face_flipped(new_f));
    }

    #[test]
    fn remove_cell_merge_redirects_faces() {
        // Remove one cell of a 2x1x1 block, merging into its neighbour, and
        // drop the separating face; the survivor inherits the slave's faces.
        let spec = BlockMeshSpec {
            nx: 2,
            ny: 1,
            nz: 1,
            min: [0.0; 3],
            max: [2.0, 1.0, 1.0],
        };
        let mesh = block_mesh(&spec).unwrap();
        assert_eq!(mesh.n_cells(), 2);
        assert_eq!(mesh.n_internal_faces(), 1);
        let mut change = TopoChange::from_mesh(&mesh);
        change
            .remove_cell(CellId::new(1), Some(CellId::new(0)))
            .unwrap();
        change.remove_face(FaceId::new(0), None).unwrap();
        let (new_mesh, map) = change.apply(&CommitOptions::default()).unwrap();
        assert_eq!(new_mesh.n_cells(), 1);
        assert_eq!(new_mesh.n_internal_faces(), 0);
        assert_eq!(new_mesh.n_faces(), 10);
        assert_eq!(map.cells().merged(), &[(CellId::new(1), CellId::new(0))]);
        // All 8 points survive; total volume is conserved.
        assert_eq!(new_mesh.n_points(), mesh.n_points());
        assert!((new_mesh.total_volume() - mesh.total_volume()).abs() < 1e-12);
    }
}
