//! Mesh dualisation.

mod util;

use mesh_morph::prelude::*;
use util::{assert_valid, cube, rel_diff};

#[test]
fn dual_of_block_fills_the_domain() {
    let mesh = cube(2);
    let mut change = TopoChange::new();
    DualMesher::new(&mesh)
        .set_refinement(&DualFeatures::default(), &mut change)
        .unwrap();
    check_topo_change(&change).unwrap();
    let (dual, map) = change.apply(&CommitOptions::default()).unwrap();

    // One dual cell per original point; the original patch table survives.
    assert_eq!(dual.n_cells(), mesh.n_points());
    assert_eq!(dual.n_patches(), mesh.n_patches());
    for (a, b) in dual.patches().iter().zip(mesh.patches()) {
        assert_eq!(a.name, b.name);
    }
    // The dual tiles the same domain.
    assert!(rel_diff(dual.total_volume(), mesh.total_volume()) < 1e-10);
    assert_valid(&dual);
    // A from-scratch build: nothing maps back to old entities.
    assert_eq!(map.cells().n_old(), 0);
    assert_eq!(map.points().n_old(), 0);
}

#[test]
fn split_all_faces_builds_barycentric_dual() {
    let mesh = cube(2);
    let mut change = TopoChange::new();
    let features = DualFeatures {
        split_all_faces: true,
        ..DualFeatures::default()
    };
    DualMesher::new(&mesh)
        .set_refinement(&features, &mut change)
        .unwrap();
    check_topo_change(&change).unwrap();
    let (dual, _) = change.apply(&CommitOptions::default()).unwrap();

    assert_eq!(dual.n_cells(), mesh.n_points());
    // Every internal face centre and every interior edge midpoint becomes a
    // dual point now.
    let plain = {
        let mut change = TopoChange::new();
        DualMesher::new(&mesh)
            .set_refinement(&DualFeatures::default(), &mut change)
            .unwrap();
        change.n_points()
    };
    let edges = mesh.edges();
    let interior_edges = (0..edges.n_edges())
        .filter(|e| {
            edges
                .edge_faces(*e)
                .iter()
                .all(|f| mesh.is_internal(*f))
        })
        .count();
    assert_eq!(
        change.n_points(),
        plain + mesh.n_internal_faces() + interior_edges
    );
    assert!(rel_diff(dual.total_volume(), mesh.total_volume()) < 1e-10);
    assert_valid(&dual);
}

#[test]
fn multi_cell_feature_point_without_split_faces_is_rejected() {
    let mesh = cube(2);
    // The centre point has 8 surrounding cells and unsplit internal faces.
    let centre = mesh
        .points()
        .iter()
        .position(|p| p == &[0.5, 0.5, 0.5])
        .map(PointId::new)
        .unwrap();
    let features = DualFeatures {
        multi_cell_feature_points: vec![centre],
        ..DualFeatures::default()
    };
    let mut change = TopoChange::new();
    let err = DualMesher::new(&mesh)
        .set_refinement(&features, &mut change)
        .unwrap_err();
    assert!(matches!(
        err,
        MeshMorphError::MultiCellPointUnsplitFace { .. }
    ));
}

#[test]
fn multi_cell_feature_point_with_split_faces() {
    let mesh = cube(2);
    let centre = mesh
        .points()
        .iter()
        .position(|p| p == &[0.5, 0.5, 0.5])
        .map(PointId::new)
        .unwrap();
    let features = DualFeatures {
        split_all_faces: true,
        multi_cell_feature_points: vec![centre],
        ..DualFeatures::default()
    };
    let mut change = TopoChange::new();
    DualMesher::new(&mesh)
        .set_refinement(&features, &mut change)
        .unwrap();
    check_topo_change(&change).unwrap();
    let (dual, _) = change.apply(&CommitOptions::default()).unwrap();

    // The centre point contributes one dual cell per surrounding cell.
    assert_eq!(dual.n_cells(), mesh.n_points() - 1 + 8);
    assert!(rel_diff(dual.total_volume(), mesh.total_volume()) < 1e-10);
    assert_valid(&dual);
}

#[test]
fn single_cell_feature_point_must_be_on_boundary() {
    let mesh = cube(2);
    let centre = mesh
        .points()
        .iter()
        .position(|p| p == &[0.5, 0.5, 0.5])
        .map(PointId::new)
        .unwrap();
    let features = DualFeatures {
        single_cell_feature_points: vec![centre],
        ..DualFeatures::default()
    };
    let mut change = TopoChange::new();
    let err = DualMesher::new(&mesh)
        .set_refinement(&features, &mut change)
        .unwrap_err();
    assert!(matches!(
        err,
        MeshMorphError::FeaturePointNotBoundary { .. }
    ));
}
