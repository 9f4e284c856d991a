use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use mesh_morph::prelude::*;

fn refine_half_the_block(n: usize) -> usize {
    let mesh = block_mesh(&BlockMeshSpec::unit_cube(n)).unwrap();
    let mut refiner = HexRefiner::new(&mesh);
    let picked: Vec<CellId> = (0..mesh.n_cells() / 2).map(CellId::new).collect();
    let set = refiner
        .consistent_refinement(&mesh, &picked, &NoComm, true, 2)
        .unwrap();
    let mut change = TopoChange::from_mesh(&mesh);
    refiner.set_refinement(&mesh, &set, &mut change).unwrap();
    let (refined, _) = change.apply(&CommitOptions::default()).unwrap();
    refined.n_cells()
}

fn bench_refine(c: &mut Criterion) {
    let mut group = c.benchmark_group("hex_refine");
    for &n in &[4usize, 6] {
        group.bench_with_input(BenchmarkId::new("half_block", n), &n, |b, &n| {
            b.iter(|| criterion::black_box(refine_half_the_block(n)));
        });
    }
    group.finish();
}

fn bench_commit_noop(c: &mut Criterion) {
    let mesh = block_mesh(&BlockMeshSpec::unit_cube(8)).unwrap();
    c.bench_function("noop_commit_8x8x8", |b| {
        b.iter(|| {
            let change = TopoChange::from_mesh(&mesh);
            let (m, map) = change.apply(&CommitOptions::default()).unwrap();
            criterion::black_box((m.n_faces(), map.is_identity()))
        });
    });
}

criterion_group!(benches, bench_refine, bench_commit_noop);
criterion_main!(benches);
