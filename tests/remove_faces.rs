//! Face removal (cell merging) and field mapping across it.

mod util;

use mesh_morph::prelude::*;
use util::{assert_valid, cube, rel_diff};

#[test]
fn merge_two_cells_conserves_volume() {
    let mesh = block_mesh(&BlockMeshSpec {
        nx: 2,
        ny: 1,
        nz: 1,
        min: [0.0; 3],
        max: [2.0, 1.0, 1.0],
    })
    .unwrap();
    let remover = FaceRemover::new();
    let plan = remover
        .compatible_removes(&mesh, &[FaceId::new(0)])
        .unwrap();

    let mut change = TopoChange::from_mesh(&mesh);
    remover.set_refinement(&mesh, &plan, &mut change).unwrap();
    let (new_mesh, map) = change.apply(&CommitOptions::inflated()).unwrap();

    assert_eq!(new_mesh.n_cells(), 1);
    assert_eq!(map.cells().merged(), &[(CellId::new(1), CellId::new(0))]);
    // Nothing moved, so inflation has no pending motion.
    assert!(!map.has_motion_points());
    assert!(rel_diff(new_mesh.total_volume(), mesh.total_volume()) < 1e-10);
    assert_valid(&new_mesh);
}

#[test]
fn uniform_field_survives_removal_cycle() {
    // The canonical mapping scenario: a uniform unit field, one face-removal
    // + commit + map cycle, still uniform to within 1e-10.
    let mesh = cube(2);
    let remover = FaceRemover::new();
    // Merge the bottom-front pair of cells.
    let shared: Vec<FaceId> = (0..mesh.n_internal_faces())
        .map(FaceId::new)
        .filter(|f| {
            mesh.owner_of(*f) == CellId::new(0)
                && mesh.neighbour_of(*f) == Some(CellId::new(1))
        })
        .collect();
    assert_eq!(shared.len(), 1);
    let plan = remover.compatible_removes(&mesh, &shared).unwrap();

    let volumes = mesh.cell_volumes().to_vec();
    let field = vec![1.0f64; mesh.n_cells()];

    let mut change = TopoChange::from_mesh(&mesh);
    remover.set_refinement(&mesh, &plan, &mut change).unwrap();
    let (new_mesh, map) = change.apply(&CommitOptions::inflated()).unwrap();

    let mapped = FieldMapper::new(&map)
        .with_cell_volumes(&volumes)
        .map_cell_scalar(&field)
        .unwrap();
    assert_eq!(mapped.len(), new_mesh.n_cells());
    let (min, max) = mapped
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    assert!((min - 1.0).abs() < 1e-10);
    assert!((max - 1.0).abs() < 1e-10);

    assert!(rel_diff(new_mesh.total_volume(), mesh.total_volume()) < 1e-10);
    assert_valid(&new_mesh);
}

#[test]
fn merged_cell_boundary_faces_fuse() {
    // Merging two coplanar-faced cells also fuses their boundary faces on
    // each flat side, and straightens the leftover mid-edge points.
    let mesh = block_mesh(&BlockMeshSpec {
        nx: 2,
        ny: 1,
        nz: 1,
        min: [0.0; 3],
        max: [2.0, 1.0, 1.0],
    })
    .unwrap();
    let remover = FaceRemover::new();
    let plan = remover
        .compatible_removes(&mesh, &[FaceId::new(0)])
        .unwrap();
    let mut change = TopoChange::from_mesh(&mesh);
    remover.set_refinement(&mesh, &plan, &mut change).unwrap();
    let (new_mesh, _) = change.apply(&CommitOptions::default()).unwrap();

    // The 2x1x1 box fuses into a single hex: the four long sides merge
    // pairwise and the four shared-face corner points vanish.
    assert_eq!(new_mesh.n_cells(), 1);
    assert_eq!(new_mesh.n_faces(), 6);
    assert_eq!(new_mesh.n_points(), 8);
    assert_valid(&new_mesh);
}

#[test]
fn boundary_candidates_are_rejected() {
    let mesh = cube(1);
    let remover = FaceRemover::new();
    let err = remover
        .compatible_removes(&mesh, &[FaceId::new(0)])
        .unwrap_err();
    assert!(matches!(err, MeshMorphError::NotInternalFace { .. }));
}

#[test]
fn cell_removal_reassigns_exposed_faces() {
    let mesh = cube(3);
    let remover = CellRemover::new();
    // Carve out the centre cell; its six faces land on the x_min patch.
    let cells = [CellId::new(13)];
    let exposed = remover.exposed_faces(&mesh, &cells).unwrap();
    assert_eq!(exposed.len(), 6);
    let patches = vec![PatchId::new(0); exposed.len()];

    let mut change = TopoChange::from_mesh(&mesh);
    remover
        .set_refinement(&mesh, &cells, &exposed, &patches, &mut change)
        .unwrap();
    let (new_mesh, map) = change.apply(&CommitOptions::default()).unwrap();

    assert_eq!(new_mesh.n_cells(), 26);
    assert_eq!(map.cells().old_to_new(CellId::new(13)), None);
    assert_eq!(
        new_mesh.patch(PatchId::new(0)).len,
        mesh.patch(PatchId::new(0)).len + 6
    );
    let expected = mesh.total_volume() - mesh.cell_volumes()[13];
    assert!(rel_diff(new_mesh.total_volume(), expected) < 1e-10);
    assert_valid(&new_mesh);
}
