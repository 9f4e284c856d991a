//! Shared helpers for the integration suites.

#![allow(dead_code)]

use mesh_morph::prelude::*;

/// An n×n×n unit-cube block mesh.
pub fn cube(n: usize) -> PolyMesh {
    block_mesh(&BlockMeshSpec::unit_cube(n)).expect("block mesh builds")
}

/// Runs the full default check suite and panics with the failure.
pub fn assert_valid(mesh: &PolyMesh) {
    check_mesh(mesh, &MeshCheckOptions::default()).expect("mesh passes checks");
}

/// Face vertex sets (rotation/orientation insensitive), sorted, for
/// comparing topology up to relabelling of loops.
pub fn face_sets(mesh: &PolyMesh) -> Vec<Vec<usize>> {
    let mut sets: Vec<Vec<usize>> = mesh
        .faces()
        .iter()
        .map(|f| {
            let mut verts: Vec<usize> = f.verts().iter().map(|v| v.index()).collect();
            verts.sort_unstable();
            verts
        })
        .collect();
    sets.sort();
    sets
}

/// Relative difference between two volumes.
pub fn rel_diff(a: f64, b: f64) -> f64 {
    (a - b).abs() / a.abs().max(b.abs()).max(f64::MIN_POSITIVE)
}
