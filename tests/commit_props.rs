//! Property tests over the commit engine.

mod util;

use mesh_morph::mesh::check::{check_level_balance, check_upper_triangular};
use mesh_morph::prelude::*;
use proptest::prelude::*;
use util::{cube, rel_diff};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// A no-op batch commits to the identity on any block mesh.
    #[test]
    fn noop_commit_is_identity(nx in 1usize..4, ny in 1usize..4, nz in 1usize..3) {
        let mesh = block_mesh(&BlockMeshSpec {
            nx, ny, nz,
            min: [0.0; 3],
            max: [nx as f64, ny as f64, nz as f64],
        }).unwrap();
        let change = TopoChange::from_mesh(&mesh);
        let (new_mesh, map) = change.apply(&CommitOptions::default()).unwrap();
        prop_assert!(map.is_identity());
        prop_assert!(new_mesh == mesh);
    }

    /// Refining a random subset keeps every structural invariant: dense
    /// renumbering, upper-triangular ordering, 2:1 balance, closed cells,
    /// conserved volume, and the +7-cells-per-refined-hex count.
    #[test]
    fn random_refinement_keeps_invariants(mask in proptest::collection::vec(any::<bool>(), 27)) {
        let mesh = cube(3);
        let picked: Vec<CellId> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.then(|| CellId::new(i)))
            .collect();

        let mut refiner = HexRefiner::new(&mesh);
        let set = refiner
            .consistent_refinement(&mesh, &picked, &NoComm, true, 2)
            .unwrap();
        let mut change = TopoChange::from_mesh(&mesh);
        refiner.set_refinement(&mesh, &set, &mut change).unwrap();
        let (new_mesh, map) = change.apply(&CommitOptions::default()).unwrap();
        refiner.update(&map).unwrap();

        prop_assert_eq!(new_mesh.n_cells(), mesh.n_cells() + 7 * set.len());
        check_upper_triangular(&new_mesh).unwrap();
        check_mesh(&new_mesh, &MeshCheckOptions::default()).unwrap();
        check_level_balance(&new_mesh, &refiner.levels().cell, 2).unwrap();
        prop_assert!(rel_diff(new_mesh.total_volume(), mesh.total_volume()) < 1e-10);

        // Patch layout stays dense and contiguous.
        let mut expected_start = new_mesh.n_internal_faces();
        for p in new_mesh.patches() {
            prop_assert_eq!(p.start, expected_start);
            expected_start += p.len;
        }
        prop_assert_eq!(expected_start, new_mesh.n_faces());
    }

    /// Mapping a uniform field across a random refinement leaves it uniform.
    #[test]
    fn uniform_field_maps_uniformly(mask in proptest::collection::vec(any::<bool>(), 8)) {
        let mesh = cube(2);
        let picked: Vec<CellId> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.then(|| CellId::new(i)))
            .collect();
        let mut refiner = HexRefiner::new(&mesh);
        let set = refiner
            .consistent_refinement(&mesh, &picked, &NoComm, true, 2)
            .unwrap();
        let mut change = TopoChange::from_mesh(&mesh);
        refiner.set_refinement(&mesh, &set, &mut change).unwrap();
        let (_, map) = change.apply(&CommitOptions::default()).unwrap();

        let field = vec![1.0f64; mesh.n_cells()];
        let mapped = FieldMapper::new(&map).map_cell_scalar(&field).unwrap();
        for v in mapped {
            prop_assert!((v - 1.0).abs() < 1e-10);
        }
    }
}
