//! Internal-face removal: merging cells across their shared faces.
//!
//! Removing a face merges its two cells. Removals interact: once two cells
//! become one region, every other face between cells of that region must go
//! too, or the committed mesh would contain a face with the same cell on
//! both sides. [`FaceRemover::compatible_removes`] computes that closure and
//! picks one master (surviving) cell per region;
//! [`FaceRemover::set_refinement`] then computes the merged end state —
//! including coplanar face merging and removal of straightened/orphaned
//! points — and emits the operations.

use crate::mesh::PolyMesh;
use crate::mesh::geometry;
use crate::mesh::ids::{CellId, FaceId, PointId};
use crate::mesh_error::MeshMorphError;
use crate::topo::{FaceDef, TopoChange};
use hashbrown::HashMap;

/// Tolerances for the face-merge pass.
#[derive(Clone, Copy, Debug)]
pub struct RemoveOptions {
    /// Two faces sharing an edge merge only when their unit normals agree
    /// within this cosine; the same threshold gates the straightening of
    /// two-face points. Keeps perpendicular faces at corners apart.
    pub min_cos: f64,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        RemoveOptions { min_cos: 0.9999 }
    }
}

/// The closure of a face-removal request.
#[derive(Clone, Debug)]
pub struct RemovalPlan {
    /// All faces to remove: the candidates plus the forced closure.
    pub faces: Vec<FaceId>,
    /// Per cell: the merge region it belongs to, if any.
    pub cell_region: Vec<Option<usize>>,
    /// Surviving (master) cell per region: the lowest cell index.
    pub region_master: Vec<CellId>,
}

/// Face-removal policy.
#[derive(Clone, Debug, Default)]
pub struct FaceRemover {
    options: RemoveOptions,
}

impl FaceRemover {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: RemoveOptions) -> Self {
        FaceRemover { options }
    }

    /// Computes the closure of `candidates`: cell merge regions, one master
    /// per region, and every face that must be removed with them.
    pub fn compatible_removes(
        &self,
        mesh: &PolyMesh,
        candidates: &[FaceId],
    ) -> Result<RemovalPlan, MeshMorphError> {
        let mut requested: Vec<FaceId> = candidates.to_vec();
        requested.sort_unstable();
        requested.dedup();

        let mut parent: Vec<usize> = (0..mesh.n_cells()).collect();
        for f in &requested {
            mesh.check_face(*f)?;
            let Some(nei) = mesh.neighbour_of(*f) else {
                return Err(MeshMorphError::NotInternalFace { face: *f });
            };
            union(&mut parent, mesh.owner_of(*f).index(), nei.index());
        }

        // Closure: any internal face joining two cells of one region.
        let mut faces = Vec::new();
        for fi in 0..mesh.n_internal_faces() {
            let f = FaceId::new(fi);
            let own = mesh.owner_of(f).index();
            let nei = mesh.neighbour_of(f).expect("internal").index();
            if find(&mut parent, own) == find(&mut parent, nei) {
                faces.push(f);
            }
        }

        // Region numbering in ascending root order; master = lowest cell.
        let mut region_of_root: HashMap<usize, usize> = HashMap::new();
        let mut region_master = Vec::new();
        let mut region_size = Vec::new();
        for c in 0..mesh.n_cells() {
            let root = find(&mut parent, c);
            let region = *region_of_root.entry(root).or_insert_with(|| {
                region_master.push(CellId::new(c));
                region_size.push(0usize);
                region_master.len() - 1
            });
            region_size[region] += 1;
        }

        let mut cell_region = vec![None; mesh.n_cells()];
        for c in 0..mesh.n_cells() {
            let root = find(&mut parent, c);
            let region = region_of_root[&root];
            if region_size[region] > 1 {
                cell_region[c] = Some(region);
            }
        }

        // Drop the single-cell pseudo-regions from the master table by
        // remapping to a dense region numbering.
        let mut dense = vec![usize::MAX; region_master.len()];
        let mut masters = Vec::new();
        for (old_region, size) in region_size.iter().enumerate() {
            if *size > 1 {
                dense[old_region] = masters.len();
                masters.push(region_master[old_region]);
            }
        }
        for r in cell_region.iter_mut() {
            *r = r.map(|old| dense[old]);
        }

        log::debug!(
            "face removal closure: {} requested, {} to remove, {} merge regions",
            requested.len(),
            faces.len(),
            masters.len(),
        );

        Ok(RemovalPlan {
            faces,
            cell_region,
            region_master: masters,
        })
    }

    /// Stages the merged end state into `change`: removes the planned faces,
    /// merges each region into its master cell, re-owns surviving faces,
    /// fuses coplanar face pairs left around the merged cells, straightens
    /// two-face points, and drops points nothing references any more.
    pub fn set_refinement(
        &self,
        mesh: &PolyMesh,
        plan: &RemovalPlan,
        change: &mut TopoChange,
    ) -> Result<(), MeshMorphError> {
        let n_faces = mesh.n_faces();
        let n_points = mesh.n_points();
        let points = mesh.points();

        let master_of = |c: CellId| -> CellId {
            match plan.cell_region[c.index()] {
                Some(r) => plan.region_master[r],
                None => c,
            }
        };

        // Working copy of the post-removal state.
        let mut removed = vec![false; n_faces];
        let mut merged_into: Vec<Option<FaceId>> = vec![None; n_faces];
        for f in &plan.faces {
            mesh.check_face(*f)?;
            if mesh.neighbour_of(*f).is_none() {
                return Err(MeshMorphError::NotInternalFace { face: *f });
            }
            removed[f.index()] = true;
        }

        let mut verts: Vec<Vec<PointId>> =
            mesh.faces().iter().map(|f| f.verts().to_vec()).collect();
        let mut owner_w: Vec<CellId> = Vec::with_capacity(n_faces);
        let mut neighb_w: Vec<Option<CellId>> = Vec::with_capacity(n_faces);
        for fi in 0..n_faces {
            let f = FaceId::new(fi);
            let own = master_of(mesh.owner_of(f));
            let nei = mesh.neighbour_of(f).map(master_of);
            if !removed[fi] && nei == Some(own) {
                return Err(MeshMorphError::RegionClosureBroken { face: f });
            }
            owner_w.push(own);
            neighb_w.push(nei);
        }

        // Fixed point: merge compatible coplanar face pairs, then straighten
        // two-face points; each change can enable the other.
        loop {
            if self.merge_one_pair(
                mesh, &mut removed, &mut merged_into, &mut verts, &owner_w, &neighb_w, points,
            )? {
                continue;
            }
            if self.straighten_points(&mut removed, &mut verts, points)? {
                continue;
            }
            break;
        }

        // Usage count over the final state; orphaned points disappear.
        let mut usage = vec![0usize; n_points];
        for fi in 0..n_faces {
            if removed[fi] {
                continue;
            }
            for v in &verts[fi] {
                usage[v.index()] += 1;
            }
        }
        for (pi, count) in usage.iter().enumerate() {
            // A point on a single surviving face cannot close a surface.
            // Two-face points survive when their loops kink (warped meshes);
            // only the collinear ones were straightened away above.
            if *count == 1 {
                return Err(MeshMorphError::PointUsage {
                    point: PointId::new(pi),
                    count: *count,
                });
            }
        }

        // Emit: cells first, then faces, then points.
        for c in 0..mesh.n_cells() {
            let cell = CellId::new(c);
            if master_of(cell) != cell {
                change.remove_cell(cell, Some(master_of(cell)))?;
            }
        }
        for fi in 0..n_faces {
            let f = FaceId::new(fi);
            if removed[fi] {
                let target = resolve_merge(&merged_into, &removed, f);
                change.remove_face(f, target)?;
                continue;
            }
            let changed = verts[fi] != mesh.face(f).verts()
                || owner_w[fi] != mesh.owner_of(f)
                || neighb_w[fi] != mesh.neighbour_of(f);
            if changed {
                let zone = change.face_zone_of(f)?;
                let mut def = match neighb_w[fi] {
                    Some(n) => FaceDef::internal(verts[fi].clone(), owner_w[fi], n),
                    None => FaceDef::boundary(
                        verts[fi].clone(),
                        owner_w[fi],
                        mesh.patch_of(f).expect("boundary face has patch"),
                    ),
                };
                if let Some(z) = zone {
                    def = def.with_zone(z.zone, z.flipped);
                }
                change.modify_face(f, def)?;
            }
        }
        for (pi, count) in usage.iter().enumerate() {
            if *count == 0 {
                change.remove_point(PointId::new(pi), None)?;
            }
        }

        Ok(())
    }

    /// Finds one mergeable face pair and fuses it. Returns true if a merge
    /// happened (the incidence is stale afterwards and must be rebuilt).
    #[allow(clippy::too_many_arguments)]
    fn merge_one_pair(
        &self,
        mesh: &PolyMesh,
        removed: &mut [bool],
        merged_into: &mut [Option<FaceId>],
        verts: &mut [Vec<PointId>],
        owner_w: &[CellId],
        neighb_w: &[Option<CellId>],
        points: &[[f64; 3]],
    ) -> Result<bool, MeshMorphError> {
        let mut edge_faces: HashMap<(PointId, PointId), Vec<FaceId>> = HashMap::new();
        for (fi, loop_verts) in verts.iter().enumerate() {
            if removed[fi] {
                continue;
            }
            let n = loop_verts.len();
            for i in 0..n {
                let a = loop_verts[i];
                let b = loop_verts[(i + 1) % n];
                let key = if a < b { (a, b) } else { (b, a) };
                edge_faces.entry(key).or_default().push(FaceId::new(fi));
            }
        }

        let mut keys: Vec<(PointId, PointId)> = edge_faces.keys().copied().collect();
        keys.sort_unstable();

        for key in keys {
            let fs = &edge_faces[&key];
            if fs.len() != 2 {
                continue;
            }
            let (f, g) = (fs[0], fs[1]);
            if f == g {
                continue; // both half-edges of a collapsed loop
            }
            let fi = f.index();
            let gi = g.index();

            // Compatible sides: same owner/neighbour as sets (internal) or
            // same owner and patch (boundary).
            let mut g_aligned = verts[gi].clone();
            let mut aligned = false;
            match (neighb_w[fi], neighb_w[gi]) {
                (Some(fn_), Some(gn)) => {
                    if owner_w[fi] == owner_w[gi] && fn_ == gn {
                        aligned = true;
                    } else if owner_w[fi] == gn && fn_ == owner_w[gi] {
                        g_aligned.reverse();
                        aligned = true;
                    }
                }
                (None, None) => {
                    if owner_w[fi] == owner_w[gi] && mesh.patch_of(f) == mesh.patch_of(g) {
                        aligned = true;
                    }
                }
                _ => {}
            }
            if !aligned {
                continue;
            }

            let area_f = geometry::face_area_vector(&verts[fi], points);
            let area_g = geometry::face_area_vector(&g_aligned, points);
            let (Some(unit_f), Some(unit_g)) =
                (geometry::unit(area_f), geometry::unit(area_g))
            else {
                continue;
            };
            if geometry::dot(unit_f, unit_g) < self.options.min_cos {
                continue;
            }

            let combined = splice_loops(&verts[fi], &g_aligned, key)?;
            verts[fi] = combined;
            removed[gi] = true;
            merged_into[gi] = Some(f);
            return Ok(true);
        }
        Ok(false)
    }

    /// Removes subdivision points: a point with exactly two distinct
    /// incident edges sits mid-edge in every loop through it (a fused face
    /// on one side, possibly several spliced faces on the other) and can be
    /// dropped from all of them once the two half-edges are collinear.
    /// Returns true if any point was straightened away.
    fn straighten_points(
        &self,
        removed: &mut [bool],
        verts: &mut [Vec<PointId>],
        points: &[[f64; 3]],
    ) -> Result<bool, MeshMorphError> {
        let n_points = points.len();
        let mut usage: Vec<Vec<usize>> = vec![Vec::new(); n_points];
        let mut link: Vec<Vec<PointId>> = vec![Vec::new(); n_points];
        for (fi, loop_verts) in verts.iter().enumerate() {
            if removed[fi] {
                continue;
            }
            let n = loop_verts.len();
            for (i, v) in loop_verts.iter().enumerate() {
                usage[v.index()].push(fi);
                link[v.index()].push(loop_verts[(i + 1) % n]);
                link[v.index()].push(loop_verts[(i + n - 1) % n]);
            }
        }

        let mut changed = false;
        for pi in 0..n_points {
            if usage[pi].is_empty() {
                continue;
            }
            let neighbours = &mut link[pi];
            neighbours.sort_unstable();
            neighbours.dedup();
            if neighbours.len() != 2 {
                continue;
            }
            let (a, b) = (neighbours[0], neighbours[1]);
            let here = points[pi];
            let straight = match (
                geometry::unit(geometry::sub(here, points[a.index()])),
                geometry::unit(geometry::sub(points[b.index()], here)),
            ) {
                (Some(u), Some(v)) => geometry::dot(u, v).abs() >= self.options.min_cos,
                _ => false,
            };
            // Dropping the point must not degenerate any loop.
            if !straight || usage[pi].iter().any(|fi| verts[*fi].len() < 4) {
                continue;
            }
            let p = PointId::new(pi);
            for fi in usage[pi].clone() {
                verts[fi].retain(|v| *v != p);
            }
            // The link table is stale now; let the caller rebuild.
            changed = true;
            break;
        }
        Ok(changed)
    }
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        // Lower root wins so masters are deterministic.
        if ra < rb {
            parent[rb] = ra;
        } else {
            parent[ra] = rb;
        }
    }
}

fn resolve_merge(
    merged_into: &[Option<FaceId>],
    removed: &[bool],
    f: FaceId,
) -> Option<FaceId> {
    let mut t = merged_into[f.index()]?;
    let mut hops = 0;
    while removed[t.index()] {
        t = merged_into[t.index()]?;
        hops += 1;
        if hops > merged_into.len() {
            return None;
        }
    }
    Some(t)
}

/// Fuses two aligned loops along their shared edge: all of `a` starting
/// after the shared edge, then the verts of `b` strictly between the shared
/// endpoints.
fn splice_loops(
    a: &[PointId],
    b: &[PointId],
    edge: (PointId, PointId),
) -> Result<Vec<PointId>, MeshMorphError> {
    let n = a.len();
    let m = b.len();
    let pos_a = (0..n)
        .find(|i| {
            let pair = (a[*i], a[(*i + 1) % n]);
            pair == edge || pair == (edge.1, edge.0)
        })
        .ok_or(MeshMorphError::UnknownEdge {
            a: edge.0,
            b: edge.1,
        })?;
    let (u, v) = (a[pos_a], a[(pos_a + 1) % n]);
    // Aligned loops traverse the shared edge in opposite directions.
    let pos_b = (0..m)
        .find(|j| b[*j] == v && b[(*j + 1) % m] == u)
        .ok_or(MeshMorphError::UnknownEdge {
            a: edge.0,
            b: edge.1,
        })?;

    let mut out = Vec::with_capacity(n + m - 2);
    for k in 0..n {
        out.push(a[(pos_a + 1 + k) % n]);
    }
    for k in 2..m {
        out.push(b[(pos_b + k) % m]);
    }
    Ok(collapse_spikes(out))
}

/// Removes immediate backtracks (`x, y, x`) and consecutive duplicates left
/// when two loops shared more than one edge (e.g. the last two quarters of a
/// fully re-fused face, which share both edges around the centre point).
fn collapse_spikes(mut verts: Vec<PointId>) -> Vec<PointId> {
    loop {
        let n = verts.len();
        if n < 3 {
            return verts;
        }
        let mut doomed: Option<Vec<usize>> = None;
        for i in 0..n {
            if verts[i] == verts[(i + 1) % n] {
                doomed = Some(vec![(i + 1) % n]);
                break;
            }
            if verts[i] == verts[(i + 2) % n] {
                doomed = Some(vec![(i + 1) % n, (i + 2) % n]);
                break;
            }
        }
        match doomed {
            Some(mut idx) => {
                idx.sort_unstable();
                idx.reverse();
                for i in idx {
                    verts.remove(i);
                }
            }
            None => return verts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::builder::{BlockMeshSpec, block_mesh};

    fn pid(i: usize) -> PointId {
        PointId::new(i)
    }

    #[test]
    fn splice_joins_two_quads() {
        // Two unit quads sharing edge (1, 2).
        let a = vec![pid(0), pid(1), pid(2), pid(3)];
        let b = vec![pid(1), pid(4), pid(5), pid(2)];
        let joined = splice_loops(&a, &b, (pid(1), pid(2))).unwrap();
        assert_eq!(joined.len(), 6);
        // One cycle visiting all six vertices, no duplicates.
        let mut sorted = joined.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 6);
    }

    #[test]
    fn closure_pulls_in_second_face() {
        // A 2x2x1 block: removing two faces that chain three cells into one
        // region forces any other face inside that region to go too.
        let mesh = block_mesh(&BlockMeshSpec {
            nx: 2,
            ny: 2,
            nz: 1,
            min: [0.0; 3],
            max: [2.0, 2.0, 1.0],
        })
        .unwrap();
        let remover = FaceRemover::new();
        // All four internal faces chain all four cells into one region; the
        // closure must then contain all internal faces.
        let all_internal: Vec<FaceId> = (0..mesh.n_internal_faces()).map(FaceId::new).collect();
        let plan = remover
            .compatible_removes(&mesh, &all_internal[..2])
            .unwrap();
        // Cells 0,1 merge via face 0; cells 0,2 via face 1 -> one region of
        // {0,1,2}; faces between 1 and 3 or 2 and 3 stay.
        assert_eq!(plan.region_master, vec![CellId::new(0)]);
        let in_region = |c: usize| plan.cell_region[c].is_some();
        assert!(in_region(0) && in_region(1) && in_region(2));
        assert!(!in_region(3));
        assert_eq!(plan.faces.len(), 2);
    }

    #[test]
    fn region_master_is_lowest_cell() {
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
        assert_eq!(plan.region_master, vec![CellId::new(0)]);
        assert_eq!(plan.cell_region[1], Some(0));
    }
}
