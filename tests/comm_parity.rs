//! Serial and local-group communicators must drive identical decisions.

mod util;

use mesh_morph::prelude::*;
use util::cube;

#[test]
fn consistent_refinement_parity_between_backends() {
    let mesh = cube(3);
    let mut refiner = HexRefiner::new(&mesh);
    // Fake an existing level so the candidate set actually grows.
    let mut levels = RefinementLevels::zero(&mesh);
    levels.cell[13] = 1;
    refiner = HexRefiner::with_levels(&mesh, levels).unwrap();

    let picked = [CellId::new(13)];
    let serial = refiner
        .consistent_refinement(&mesh, &picked, &NoComm, true, 2)
        .unwrap();

    let local = LocalComm::group(1).pop().unwrap();
    let grouped = refiner
        .consistent_refinement(&mesh, &picked, &local, true, 2)
        .unwrap();

    assert_eq!(serial, grouped);
    assert!(serial.len() > 1);
}

#[test]
fn empty_rank_participates_in_the_reduction() {
    // Two ranks, one with work and one without: both must run the same
    // number of reduction rounds and agree the loop terminated.
    let mut comms = LocalComm::group(2);
    let busy = comms.remove(0);
    let idle = comms.remove(0);

    let worker = std::thread::spawn(move || {
        let mesh = cube(2);
        let refiner = HexRefiner::new(&mesh);
        refiner
            .consistent_refinement(&mesh, &[CellId::new(0)], &busy, true, 2)
            .unwrap()
            .len()
    });
    let observer = std::thread::spawn(move || {
        let mesh = cube(2);
        let refiner = HexRefiner::new(&mesh);
        refiner
            .consistent_refinement(&mesh, &[], &idle, true, 2)
            .unwrap()
            .len()
    });

    assert_eq!(worker.join().unwrap(), 1);
    assert_eq!(observer.join().unwrap(), 0);
}
