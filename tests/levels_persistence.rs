//! Refinement-level persistence: read-if-present semantics.

mod util;

use mesh_morph::prelude::*;
use serial_test::serial;
use util::cube;

fn levels_path() -> std::path::PathBuf {
    std::env::temp_dir().join("mesh-morph-test-refinement-levels.txt")
}

#[test]
#[serial]
fn absent_levels_start_at_zero() {
    let mesh = cube(2);
    let _ = std::fs::remove_file(levels_path());
    let levels = RefinementLevels::load_if_present(levels_path(), &mesh).unwrap();
    assert_eq!(levels, RefinementLevels::zero(&mesh));
    let refiner = HexRefiner::with_levels(&mesh, levels).unwrap();
    assert!(refiner.levels().cell.iter().all(|l| *l == 0));
}

#[test]
#[serial]
fn levels_survive_a_refinement_cycle() {
    let mut mesh = cube(2);
    let mut refiner = HexRefiner::new(&mesh);
    refine_cells_once(
        &mut mesh,
        &mut refiner,
        &[CellId::new(0)],
        &NoComm,
        &RefineOptions::default(),
    )
    .unwrap();

    refiner.levels().save(levels_path()).unwrap();
    let loaded = RefinementLevels::load_if_present(levels_path(), &mesh).unwrap();
    assert_eq!(&loaded, refiner.levels());

    // Resuming from the persisted levels reproduces the refiner state.
    let resumed = HexRefiner::with_levels(&mesh, loaded).unwrap();
    assert_eq!(resumed.levels(), refiner.levels());
    let _ = std::fs::remove_file(levels_path());
}

#[test]
#[serial]
fn levels_for_the_wrong_mesh_are_rejected() {
    let mesh = cube(2);
    let levels = RefinementLevels::zero(&mesh);
    levels.save(levels_path()).unwrap();

    let other = cube(3);
    let err = RefinementLevels::load_if_present(levels_path(), &other).unwrap_err();
    assert!(matches!(err, MeshMorphError::LevelCountMismatch { .. }));
    let _ = std::fs::remove_file(levels_path());
}
