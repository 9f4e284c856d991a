//! Multi-pass refinement drivers.
//!
//! One commit can only refine each cell once; reaching per-cell target
//! levels needs repeated balance → stage → commit → update passes, with the
//! targets re-addressed through each pass's [`MeshMap`]. The drivers here do
//! that bookkeeping and hand back the map chain so callers can re-sample
//! fields after every committed pass.
//!
//! All drivers are collective: every rank must call them together with its
//! (possibly empty) local request.

use crate::comm::Collective;
use crate::mesh::PolyMesh;
use crate::mesh::ids::CellId;
use crate::mesh_error::MeshMorphError;
use crate::refine::hex::{DEFAULT_LIMIT_DIFF, HexRefiner};
use crate::topo::{CommitOptions, MeshMap, TopoChange};
use hashbrown::HashMap;

/// Settings for the refinement drivers.
#[derive(Clone, Copy, Debug)]
pub struct RefineOptions {
    /// 2:1 balance limit passed to the consistency passes.
    pub limit_diff: u32,
    /// Upper bound on balance → commit passes in [`refine_to_levels`].
    pub max_passes: usize,
    /// Grow the candidate set to keep balance (the default); with `false`
    /// the set shrinks instead, refining fewer cells than requested.
    pub extend_set: bool,
}

impl Default for RefineOptions {
    fn default() -> Self {
        RefineOptions {
            limit_diff: DEFAULT_LIMIT_DIFF,
            max_passes: 32,
            extend_set: true,
        }
    }
}

/// One full refinement pass: balance the candidate set, stage, commit,
/// update the refiner, and replace `mesh` with the committed mesh.
pub fn refine_cells_once<C: Collective>(
    mesh: &mut PolyMesh,
    refiner: &mut HexRefiner,
    cells: &[CellId],
    comm: &C,
    options: &RefineOptions,
) -> Result<MeshMap, MeshMorphError> {
    let set = refiner.consistent_refinement(
        mesh,
        cells,
        comm,
        options.extend_set,
        options.limit_diff,
    )?;
    let mut change = TopoChange::from_mesh(mesh);
    if let Err(e) = refiner.set_refinement(mesh, &set, &mut change) {
        refiner.abandon_pending();
        return Err(e);
    }
    let (new_mesh, map) = match change.apply(&CommitOptions::default()) {
        Ok(ok) => ok,
        Err(e) => {
            refiner.abandon_pending();
            return Err(e);
        }
    };
    refiner.update(&map)?;
    *mesh = new_mesh;
    Ok(map)
}

/// Refines until every target cell has reached its target level (or
/// `max_passes` is exhausted), re-addressing targets through each pass's
/// map: a refined target cell hands its remaining target to all its
/// children. Returns the map chain, one entry per committed pass.
pub fn refine_to_levels<C: Collective>(
    mesh: &mut PolyMesh,
    refiner: &mut HexRefiner,
    targets: &[(CellId, u32)],
    comm: &C,
    options: &RefineOptions,
) -> Result<Vec<MeshMap>, MeshMorphError> {
    let mut wanted: HashMap<CellId, u32> = HashMap::new();
    for (c, t) in targets {
        mesh.check_cell(*c)?;
        let entry = wanted.entry(*c).or_insert(*t);
        *entry = (*entry).max(*t);
    }

    let mut maps = Vec::new();
    for pass in 0..options.max_passes {
        let mut below: Vec<CellId> = wanted
            .iter()
            .filter(|(c, t)| refiner.cell_level(**c) < **t)
            .map(|(c, _)| *c)
            .collect();
        below.sort_unstable();
        if comm.all_reduce_sum(below.len() as u64) == 0 {
            return Ok(maps);
        }
        log::debug!(
            "refinement pass {pass}: {} cells below target",
            below.len()
        );

        let map = refine_cells_once(mesh, refiner, &below, comm, options)?;

        let mut children_of: HashMap<CellId, Vec<CellId>> = HashMap::new();
        for (new, master) in map.cells().added_from() {
            if let Some(m) = master {
                children_of.entry(*m).or_default().push(*new);
            }
        }
        let mut next: HashMap<CellId, u32> = HashMap::new();
        for (c, t) in &wanted {
            if let Some(new) = map.cells().old_to_new(*c) {
                let entry = next.entry(new).or_insert(*t);
                *entry = (*entry).max(*t);
            }
            if let Some(kids) = children_of.get(c) {
                for k in kids {
                    let entry = next.entry(*k).or_insert(*t);
                    *entry = (*entry).max(*t);
                }
            }
        }
        wanted = next;
        maps.push(map);
    }

    let leftover: usize = wanted
        .iter()
        .filter(|(c, t)| refiner.cell_level(**c) < **t)
        .count();
    if comm.all_reduce_sum(leftover as u64) > 0 {
        log::warn!("{leftover} cells still below target after max_passes");
    }
    Ok(maps)
}
