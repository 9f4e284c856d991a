//! Refine → unrefine round trips.

mod util;

use mesh_morph::prelude::*;
use util::{assert_valid, cube, face_sets, rel_diff};

fn refine_once(mesh: &mut PolyMesh, refiner: &mut HexRefiner, cells: &[CellId]) -> MeshMap {
    refine_cells_once(mesh, refiner, cells, &NoComm, &RefineOptions::default()).unwrap()
}

fn unrefine_points(
    mesh: &mut PolyMesh,
    refiner: &mut HexRefiner,
    points: &[PointId],
) -> MeshMap {
    let remover = FaceRemover::new();
    let mut change = TopoChange::from_mesh(mesh);
    refiner
        .set_unrefinement(mesh, points, &mut change, &remover)
        .unwrap();
    let (new_mesh, map) = change.apply(&CommitOptions::default()).unwrap();
    refiner.update(&map).unwrap();
    *mesh = new_mesh;
    map
}

#[test]
fn single_hex_round_trip_restores_topology() {
    let original = cube(1);
    let mut mesh = original.clone();
    let mut refiner = HexRefiner::new(&mesh);

    refine_once(&mut mesh, &mut refiner, &[CellId::new(0)]);
    assert_eq!(mesh.n_cells(), 8);
    assert_eq!(mesh.n_points(), 27);
    assert_eq!(refiner.history().n_active(), 1);

    let split_points = refiner.split_points(&mesh);
    assert_eq!(split_points.len(), 1);

    unrefine_points(&mut mesh, &mut refiner, &split_points);

    // Same topology up to loop relabelling: counts, face vertex sets,
    // patches, volume, and the refinement level all return.
    assert_eq!(mesh.n_cells(), original.n_cells());
    assert_eq!(mesh.n_points(), original.n_points());
    assert_eq!(mesh.n_faces(), original.n_faces());
    assert_eq!(face_sets(&mesh), face_sets(&original));
    assert_eq!(mesh.n_patches(), original.n_patches());
    for (a, b) in mesh.patches().iter().zip(original.patches()) {
        assert_eq!(a.len, b.len);
        assert_eq!(a.name, b.name);
    }
    assert!(rel_diff(mesh.total_volume(), original.total_volume()) < 1e-10);
    assert_eq!(refiner.cell_level(CellId::new(0)), 0);
    assert!(refiner.history().is_empty());
    assert_valid(&mesh);
}

#[test]
fn interior_round_trip_conserves_volume() {
    let original = cube(3);
    let mut mesh = original.clone();
    let mut refiner = HexRefiner::new(&mesh);

    // Refine the centre cell of the 3x3x3 block (cell (1,1,1) = 13).
    refine_once(&mut mesh, &mut refiner, &[CellId::new(13)]);
    assert_eq!(mesh.n_cells(), 27 + 7);
    assert!(rel_diff(mesh.total_volume(), original.total_volume()) < 1e-10);
    assert_valid(&mesh);

    let split_points = refiner.split_points(&mesh);
    assert_eq!(split_points.len(), 1);
    unrefine_points(&mut mesh, &mut refiner, &split_points);

    assert_eq!(mesh.n_cells(), original.n_cells());
    assert_eq!(mesh.n_points(), original.n_points());
    assert_eq!(mesh.n_faces(), original.n_faces());
    assert_eq!(face_sets(&mesh), face_sets(&original));
    assert!(rel_diff(mesh.total_volume(), original.total_volume()) < 1e-10);
    assert!(refiner.levels().cell.iter().all(|l| *l == 0));
    assert_valid(&mesh);
}

#[test]
fn consistent_unrefinement_blocks_imbalance() {
    // Refine the whole block once, then the centre octet again; unrefining
    // the centre's siblings is fine, but unrefining a level-1 octet next to
    // level-2 cells is not.
    let mut mesh = cube(2);
    let mut refiner = HexRefiner::new(&mesh);
    let all: Vec<CellId> = (0..mesh.n_cells()).map(CellId::new).collect();
    refine_once(&mut mesh, &mut refiner, &all);
    assert_eq!(mesh.n_cells(), 64);

    // Refine the level-1 cell at the block centre again, so its level-2
    // children sit face-adjacent to three other octets.
    let target = CellId::new(
        mesh.cell_centres()
            .iter()
            .position(|c| {
                (c[0] - 0.375).abs() < 1e-9
                    && (c[1] - 0.375).abs() < 1e-9
                    && (c[2] - 0.375).abs() < 1e-9
            })
            .expect("centre-adjacent cell exists"),
    );
    refine_once(&mut mesh, &mut refiner, &[target]);
    assert_eq!(mesh.n_cells(), 64 + 7);

    // Ask to unrefine only the level-1 octets while the level-2 octet stays:
    // the ones face-adjacent to the level-2 children must be dropped.
    let candidates: Vec<PointId> = refiner
        .history()
        .complete_octets()
        .into_iter()
        .filter(|o| o.parent_level == 0)
        .map(|o| o.centre_point)
        .collect();
    assert_eq!(candidates.len(), 7);
    let kept = refiner
        .consistent_unrefinement(&mesh, &candidates, &NoComm, 2)
        .unwrap();
    assert!(!kept.is_empty());
    assert!(kept.len() < candidates.len());

    unrefine_points(&mut mesh, &mut refiner, &kept);
    assert_valid(&mesh);
    mesh_morph::mesh::check::check_level_balance(&mesh, &refiner.levels().cell, 2).unwrap();
}

#[test]
fn unrefining_an_arbitrary_point_is_rejected() {
    let mut mesh = cube(2);
    let mut refiner = HexRefiner::new(&mesh);
    refine_once(&mut mesh, &mut refiner, &[CellId::new(0)]);

    let remover = FaceRemover::new();
    let mut change = TopoChange::from_mesh(&mesh);
    // Any non-centre point is not a recorded split point.
    let bogus = PointId::new(0);
    let err = refiner
        .set_unrefinement(&mesh, &[bogus], &mut change, &remover)
        .unwrap_err();
    assert!(matches!(err, MeshMorphError::NotASplitPoint { .. }));
}
