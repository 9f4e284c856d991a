//! 2x2x2 hexahedral refinement and history-backed unrefinement.
//!
//! Refining a hex inserts one cell-centre point, one centre point per
//! (virtual) face, one midpoint per (virtual) edge, then splits the cell
//! into eight children anchored at its corners. Points shared between
//! simultaneously refined cells are created once; faces of unrefined
//! neighbours that use a split edge get the midpoint spliced into their
//! vertex loop so the mesh stays conformal.
//!
//! Cells touched by earlier passes are handled through their *anchor*
//! structure: the anchors of a cell at level L are its points with level
//! ≤ L. A refinable cell has exactly 8 anchors; a face of such a cell is
//! either whole (4 anchors, possibly with spliced midpoints) or a quarter
//! left behind by a finer neighbour (1 anchor), in which case the four
//! quarters sharing a centre point act as one virtual face and are only
//! reassigned, never re-split.
//!
//! The 2:1 invariant (`|level(a) − level(b)| < limit_diff` across internal
//! faces) is policy-enforced: [`HexRefiner::consistent_refinement`] expands
//! or shrinks a candidate set to a legal one before any topology is staged.
//! The loop-termination test is a collective reduction, so every rank must
//! call it in lock-step even with an empty local set.

use crate::comm::Collective;
use crate::mesh::PolyMesh;
use crate::mesh::check::check_level_balance;
use crate::mesh::geometry;
use crate::mesh::ids::{CellId, FaceId, PointId};
use crate::mesh_error::MeshMorphError;
use crate::refine::history::{CellRef, RefinementHistory, SplitRecord};
use crate::refine::levels::RefinementLevels;
use crate::remove::{FaceRemover, RemovalPlan};
use crate::topo::{FaceDef, MeshMap, TopoChange};
use hashbrown::{HashMap, HashSet};

/// Default 2:1 balance limit: adjacent levels may differ by at most 1.
pub const DEFAULT_LIMIT_DIFF: u32 = 2;

#[derive(Clone, Debug)]
struct ParentSplit {
    parent: CellId,
    /// Parent level before the split.
    level: u32,
    centre: PointId,
    /// All eight children (staged ids; slot of the sorted first anchor
    /// reuses the parent id).
    children: [CellId; 8],
}

#[derive(Clone, Debug, Default)]
struct PendingRefine {
    refined: HashSet<CellId>,
    splits: Vec<ParentSplit>,
    /// Staged id → level of points created by this batch.
    added_point_levels: HashMap<PointId, u32>,
}

#[derive(Clone, Debug, Default)]
struct PendingUnrefine {
    /// (history record, master cell (old id), restored level).
    collapsed: Vec<(usize, CellId, u32)>,
}

#[derive(Clone, Debug)]
enum Pending {
    Refine(PendingRefine),
    Unrefine(PendingUnrefine),
}

/// Octree-style hex refinement policy with persistent levels and history.
#[derive(Clone, Debug)]
pub struct HexRefiner {
    levels: RefinementLevels,
    history: RefinementHistory,
    pending: Option<Pending>,
}

impl HexRefiner {
    /// A refiner for a never-refined mesh (all levels zero, empty history).
    pub fn new(mesh: &PolyMesh) -> Self {
        HexRefiner {
            levels: RefinementLevels::zero(mesh),
            history: RefinementHistory::new(),
            pending: None,
        }
    }

    /// A refiner resuming from persisted levels.
    pub fn with_levels(
        mesh: &PolyMesh,
        levels: RefinementLevels,
    ) -> Result<Self, MeshMorphError> {
        levels.validate(mesh)?;
        Ok(HexRefiner {
            levels,
            history: RefinementHistory::new(),
            pending: None,
        })
    }

    /// A refiner resuming from persisted levels and history.
    pub fn with_state(
        mesh: &PolyMesh,
        levels: RefinementLevels,
        history: RefinementHistory,
    ) -> Result<Self, MeshMorphError> {
        levels.validate(mesh)?;
        Ok(HexRefiner {
            levels,
            history,
            pending: None,
        })
    }

    pub fn levels(&self) -> &RefinementLevels {
        &self.levels
    }

    pub fn history(&self) -> &RefinementHistory {
        &self.history
    }

    pub fn cell_level(&self, c: CellId) -> u32 {
        self.levels.cell.get(c.index()).copied().unwrap_or(0)
    }

    /// Drops an uncommitted staged batch, e.g. after its commit failed.
    /// Levels and history are untouched (they only change in
    /// [`update`](Self::update)).
    pub fn abandon_pending(&mut self) {
        self.pending = None;
    }

    pub fn point_level(&self, p: PointId) -> u32 {
        self.levels.point.get(p.index()).copied().unwrap_or(0)
    }

    // ------------------------------------------------------------------------
    // consistent refinement
    // ------------------------------------------------------------------------

    /// Expands (`extend = true`) or shrinks (`extend = false`) `candidates`
    /// to a set whose refinement respects the 2:1 balance, by fixed-point
    /// iteration over the internal faces.
    ///
    /// Collective: the termination test is an or-reduction across ranks, so
    /// all ranks must call this together, even with empty local sets.
    pub fn consistent_refinement<C: Collective>(
        &self,
        mesh: &PolyMesh,
        candidates: &[CellId],
        comm: &C,
        extend: bool,
        limit_diff: u32,
    ) -> Result<Vec<CellId>, MeshMorphError> {
        self.levels.validate(mesh)?;
        let limit = limit_diff.max(1);
        check_level_balance(mesh, &self.levels.cell, limit)?;

        let mut wanted = vec![false; mesh.n_cells()];
        for c in candidates {
            mesh.check_cell(*c)?;
            wanted[c.index()] = true;
        }

        loop {
            let mut changed = false;
            for fi in 0..mesh.n_internal_faces() {
                let f = FaceId::new(fi);
                let a = mesh.owner_of(f).index();
                let b = mesh.neighbour_of(f).expect("internal").index();
                let la = self.levels.cell[a] + wanted[a] as u32;
                let lb = self.levels.cell[b] + wanted[b] as u32;
                if la >= lb + limit {
                    if extend {
                        if !wanted[b] {
                            wanted[b] = true;
                            changed = true;
                        }
                    } else if wanted[a] {
                        wanted[a] = false;
                        changed = true;
                    }
                } else if lb >= la + limit {
                    if extend {
                        if !wanted[a] {
                            wanted[a] = true;
                            changed = true;
                        }
                    } else if wanted[b] {
                        wanted[b] = false;
                        changed = true;
                    }
                }
            }
            if !comm.all_reduce_or(changed) {
                break;
            }
        }

        Ok(wanted
            .iter()
            .enumerate()
            .filter_map(|(i, w)| w.then(|| CellId::new(i)))
            .collect())
    }

    // ------------------------------------------------------------------------
    // refinement
    // ------------------------------------------------------------------------

    /// Stages the 2x2x2 split of `cells` into `change` and returns all child
    /// cells (staged ids). Each selected cell must be (anchor-)topologically
    /// a hexahedron; callers are expected to have balanced the set with
    /// [`consistent_refinement`](Self::consistent_refinement) first.
    pub fn set_refinement(
        &mut self,
        mesh: &PolyMesh,
        cells: &[CellId],
        change: &mut TopoChange,
    ) -> Result<Vec<CellId>, MeshMorphError> {
        if self.pending.is_some() {
            return Err(MeshMorphError::PendingChangeInProgress);
        }
        self.levels.validate(mesh)?;

        let mut refined: Vec<CellId> = cells.to_vec();
        refined.sort_unstable();
        refined.dedup();
        for c in &refined {
            mesh.check_cell(*c)?;
        }
        if refined.is_empty() {
            self.pending = Some(Pending::Refine(PendingRefine::default()));
            return Ok(Vec::new());
        }

        // -- virtual hex structure per refined cell ---------------------------
        let virtuals: Vec<VirtualCell> = refined
            .iter()
            .map(|c| VirtualCell::build(mesh, *c, &self.levels))
            .collect::<Result<_, _>>()?;
        let vc_of: HashMap<CellId, usize> = virtuals
            .iter()
            .enumerate()
            .map(|(i, vc)| (vc.cell, i))
            .collect();

        let mut pending = PendingRefine {
            refined: refined.iter().copied().collect(),
            splits: Vec::new(),
            added_point_levels: HashMap::new(),
        };

        // -- create shared points ---------------------------------------------
        // Edge midpoints, keyed by the sorted anchor pair. Existing midpoints
        // (from earlier passes) are reused; new ones are recorded so faces of
        // unrefined cells can be spliced below.
        let mut edge_mid: HashMap<(PointId, PointId), PointId> = HashMap::new();
        let mut new_mid: HashMap<(PointId, PointId), PointId> = HashMap::new();
        let mut face_centre: HashMap<FaceId, PointId> = HashMap::new();

        for vc in &virtuals {
            let child_level = vc.level + 1;
            for ((a, b), edge) in &vc.edges {
                match edge.midpoint {
                    Some(existing) => {
                        if let Some(prev) = edge_mid.insert((*a, *b), existing) {
                            if prev != existing {
                                return Err(MeshMorphError::RefinementPattern {
                                    cell: vc.cell,
                                });
                            }
                        }
                    }
                    None => {
                        let mid = *edge_mid.entry((*a, *b)).or_insert_with(|| {
                            let pos = geometry::midpoint(
                                mesh.points()[a.index()],
                                mesh.points()[b.index()],
                            );
                            let p = change.add_point(pos, None, None);
                            new_mid.insert((*a, *b), p);
                            p
                        });
                        record_point_level(&mut pending.added_point_levels, mid, child_level);
                    }
                }
            }
            for vf in &vc.faces {
                if let Some(f) = vf.single {
                    let centre = *face_centre.entry(f).or_insert_with(|| {
                        change.add_point(mesh.face_centres()[f.index()], None, None)
                    });
                    record_point_level(&mut pending.added_point_levels, centre, child_level);
                }
            }
        }

        // Resolve every virtual face to its centre point.
        let vface_centre = |vf: &VirtualFace| -> PointId {
            match vf.single {
                Some(f) => face_centre[&f],
                None => vf.centre.expect("grouped virtual face has centre"),
            }
        };

        // -- children ---------------------------------------------------------
        let mut child_of: HashMap<(CellId, PointId), CellId> = HashMap::new();
        let mut all_children = Vec::with_capacity(8 * virtuals.len());
        for vc in &virtuals {
            let zone = change.cell_zone_of(vc.cell)?;
            let centre = change.add_point(mesh.cell_centres()[vc.cell.index()], None, None);
            record_point_level(&mut pending.added_point_levels, centre, vc.level + 1);

            let mut children = [CellId::new(0); 8];
            for (slot, anchor) in vc.anchors.iter().enumerate() {
                let child = if slot == 0 {
                    vc.cell
                } else {
                    change.add_cell(Some(vc.cell), zone)
                };
                child_of.insert((vc.cell, *anchor), child);
                children[slot] = child;
                all_children.push(child);
            }
            pending.splits.push(ParentSplit {
                parent: vc.cell,
                level: vc.level,
                centre,
                children,
            });
        }

        // -- split whole faces -------------------------------------------------
        // A face is split once even when both sides refine. Ownership of each
        // quarter goes to the adjacent child on a refined side: the child of
        // the quarter's anchor when the anchor belongs to that side, else the
        // side's unique anchor on the face (the quarter lies inside that
        // child).
        let mut split_faces: HashSet<FaceId> = HashSet::new();
        for vc in &virtuals {
            for vf in &vc.faces {
                if let Some(f) = vf.single {
                    split_faces.insert(f);
                }
            }
        }

        let side_child = |vc: &VirtualCell,
                          face_verts: &[PointId],
                          sub_anchor: PointId|
         -> Result<CellId, MeshMorphError> {
            if vc.anchor_set.contains(&sub_anchor) {
                return Ok(child_of[&(vc.cell, sub_anchor)]);
            }
            let mut own_anchor = None;
            for v in face_verts {
                if vc.anchor_set.contains(v) {
                    if own_anchor.replace(*v).is_some() {
                        return Err(MeshMorphError::RefinementPattern { cell: vc.cell });
                    }
                }
            }
            let anchor = own_anchor
                .ok_or(MeshMorphError::RefinementPattern { cell: vc.cell })?;
            Ok(child_of[&(vc.cell, anchor)])
        };

        struct NewFace {
            def: FaceDef,
        }
        struct FaceUpdate {
            verts: Vec<PointId>,
            owner: CellId,
            neighbour: Option<CellId>,
        }
        let mut face_mods: HashMap<FaceId, FaceUpdate> = HashMap::new();
        let mut face_adds: Vec<NewFace> = Vec::new();

        let mut split_order: Vec<FaceId> = split_faces.iter().copied().collect();
        split_order.sort_unstable();
        for f in split_order {
            let owner = change.face_owner(f)?;
            let neighbour = change.face_neighbour(f)?;
            let patch = change.face_patch(f)?;
            let zone = change.face_zone_of(f)?;
            let verts = change.face_verts(f)?.to_vec();

            // The anchor cycle of the parent loop: the side that classified
            // this face as whole defines the anchors.
            let anchor_side = vc_of
                .get(&owner)
                .or_else(|| neighbour.and_then(|n| vc_of.get(&n)))
                .copied()
                .expect("split face borders a refined cell");
            let anchor_set = &virtuals[anchor_side].anchor_set;
            let loop_anchors: Vec<usize> = (0..verts.len())
                .filter(|i| anchor_set.contains(&verts[*i]))
                .collect();
            if loop_anchors.len() != 4 {
                return Err(MeshMorphError::RefinementPattern {
                    cell: virtuals[anchor_side].cell,
                });
            }
            let centre = face_centre[&f];

            for sub in 0..4 {
                let a = verts[loop_anchors[sub]];
                let next = verts[loop_anchors[(sub + 1) % 4]];
                let prev = verts[loop_anchors[(sub + 3) % 4]];
                let m_next = edge_mid[&ordered(a, next)];
                let m_prev = edge_mid[&ordered(prev, a)];
                let sub_verts = vec![a, m_next, centre, m_prev];

                let sub_owner = match vc_of.get(&owner) {
                    Some(i) => side_child(&virtuals[*i], &verts, a)?,
                    None => owner,
                };
                let sub_neighbour = match neighbour {
                    Some(n) => Some(match vc_of.get(&n) {
                        Some(i) => side_child(&virtuals[*i], &verts, a)?,
                        None => n,
                    }),
                    None => None,
                };

                if sub == 0 {
                    face_mods.insert(
                        f,
                        FaceUpdate {
                            verts: sub_verts,
                            owner: sub_owner,
                            neighbour: sub_neighbour,
                        },
                    );
                } else {
                    let mut def = match sub_neighbour {
                        Some(n) => FaceDef::internal(sub_verts, sub_owner, n),
                        None => FaceDef::boundary(
                            sub_verts,
                            sub_owner,
                            patch.expect("boundary face has patch"),
                        ),
                    };
                    def = def.with_master(f);
                    if let Some(z) = zone {
                        def = def.with_zone(z.zone, z.flipped);
                    }
                    face_adds.push(NewFace { def });
                }
            }
        }

        // -- reassign quarter faces left by earlier passes ---------------------
        for vc in &virtuals {
            for vf in &vc.faces {
                if vf.single.is_some() {
                    continue;
                }
                for (member, anchor) in &vf.members {
                    if split_faces.contains(member) {
                        continue; // handled by the split above
                    }
                    let child = child_of[&(vc.cell, *anchor)];
                    let entry = face_mods.entry(*member);
                    let update = match entry {
                        hashbrown::hash_map::Entry::Occupied(o) => o.into_mut(),
                        hashbrown::hash_map::Entry::Vacant(v) => v.insert(FaceUpdate {
                            verts: change.face_verts(*member)?.to_vec(),
                            owner: change.face_owner(*member)?,
                            neighbour: change.face_neighbour(*member)?,
                        }),
                    };
                    if update.owner == vc.cell {
                        update.owner = child;
                    } else if update.neighbour == Some(vc.cell) {
                        update.neighbour = Some(child);
                    }
                }
            }
        }

        // -- twelve internal faces per refined cell ----------------------------
        for vc in &virtuals {
            let split = pending
                .splits
                .iter()
                .find(|s| s.parent == vc.cell)
                .expect("split recorded");
            let cc = split.centre;
            for ((a, b), edge) in &vc.edges {
                let mid = edge_mid[&(*a, *b)];
                let fc_a = vface_centre(&vc.faces[edge.faces[0]]);
                let fc_b = vface_centre(&vc.faces[edge.faces[1]]);
                let mut verts = vec![mid, fc_a, cc, fc_b];

                // Orient from child(a) towards child(b).
                let positions: Vec<[f64; 3]> = verts
                    .iter()
                    .map(|p| change.point_position(*p))
                    .collect::<Result<_, _>>()?;
                let ids: Vec<PointId> = (0..4).map(PointId::new).collect();
                let normal = geometry::face_area_vector(&ids, &positions);
                let dir = geometry::sub(
                    change.point_position(*b)?,
                    change.point_position(*a)?,
                );
                if geometry::dot(normal, dir) < 0.0 {
                    verts.reverse();
                    verts.rotate_right(1); // keep the midpoint first
                }

                let owner = child_of[&(vc.cell, *a)];
                let neighbour = child_of[&(vc.cell, *b)];
                face_adds.push(NewFace {
                    def: FaceDef::internal(verts, owner, neighbour),
                });
            }
        }

        // -- splice new midpoints into untouched faces -------------------------
        for ((a, b), _) in &new_mid {
            let Some(e) = mesh.edges().edge_between(*a, *b) else {
                continue;
            };
            for g in mesh.edges().edge_faces(e) {
                if split_faces.contains(g) {
                    continue;
                }
                if !face_mods.contains_key(g) {
                    face_mods.insert(
                        *g,
                        FaceUpdate {
                            verts: change.face_verts(*g)?.to_vec(),
                            owner: change.face_owner(*g)?,
                            neighbour: change.face_neighbour(*g)?,
                        },
                    );
                }
            }
        }
        for update in face_mods.values_mut() {
            update.verts = splice_midpoints(&update.verts, &new_mid);
        }
        for add in &mut face_adds {
            add.def.verts = splice_midpoints(&add.def.verts, &new_mid);
        }

        // -- emit --------------------------------------------------------------
        let mods: Vec<(FaceId, FaceUpdate)> = {
            let mut v: Vec<_> = face_mods.into_iter().collect();
            v.sort_by_key(|(f, _)| f.index());
            v
        };
        for (f, update) in mods {
            let patch = change.face_patch(f)?;
            let zone = change.face_zone_of(f)?;
            let mut def = match update.neighbour {
                Some(n) => FaceDef::internal(update.verts, update.owner, n),
                None => FaceDef::boundary(
                    update.verts,
                    update.owner,
                    patch.expect("boundary face keeps its patch"),
                ),
            };
            if let Some(z) = zone {
                def = def.with_zone(z.zone, z.flipped);
            }
            change.modify_face(f, def)?;
        }
        for add in face_adds {
            change.add_face(add.def);
        }

        log::debug!(
            "staged 2x2x2 refinement of {} cells: +{} cells, +{} points",
            refined.len(),
            all_children.len() - refined.len(),
            pending.added_point_levels.len(),
        );

        self.pending = Some(Pending::Refine(pending));
        Ok(all_children)
    }

    // ------------------------------------------------------------------------
    // unrefinement
    // ------------------------------------------------------------------------

    /// Cell-centre points of complete, live octets: the unrefinement
    /// candidates.
    pub fn split_points(&self, mesh: &PolyMesh) -> Vec<PointId> {
        self.history
            .complete_octets()
            .into_iter()
            .filter(|o| {
                // The centre must still be interior and fully surrounded by
                // the octet's faces.
                o.centre_point.index() < mesh.n_points()
                    && mesh.point_faces()[o.centre_point.index()]
                        .iter()
                        .all(|f| mesh.is_internal(*f))
            })
            .map(|o| o.centre_point)
            .collect()
    }

    /// Shrinks a set of split points so that merging the octets keeps the
    /// 2:1 balance. Collective, like
    /// [`consistent_refinement`](Self::consistent_refinement).
    pub fn consistent_unrefinement<C: Collective>(
        &self,
        mesh: &PolyMesh,
        candidates: &[PointId],
        comm: &C,
        limit_diff: u32,
    ) -> Result<Vec<PointId>, MeshMorphError> {
        let limit = limit_diff.max(1);
        let octets = self.history.complete_octets();
        let by_centre: HashMap<PointId, usize> = octets
            .iter()
            .enumerate()
            .map(|(i, o)| (o.centre_point, i))
            .collect();

        let mut selected = Vec::new();
        for p in candidates {
            let i = *by_centre
                .get(p)
                .ok_or(MeshMorphError::NotASplitPoint { point: *p })?;
            selected.push(i);
        }
        selected.sort_unstable();
        selected.dedup();
        let mut kept: Vec<bool> = vec![true; selected.len()];

        loop {
            let mut changed = false;
            // Cell → kept octet.
            let mut octet_of: HashMap<CellId, usize> = HashMap::new();
            for (si, oi) in selected.iter().enumerate() {
                if kept[si] {
                    for c in octets[*oi].children {
                        octet_of.insert(c, si);
                    }
                }
            }
            let projected = |c: CellId| -> u32 {
                match octet_of.get(&c) {
                    Some(_) => self.levels.cell[c.index()].saturating_sub(1),
                    None => self.levels.cell[c.index()],
                }
            };
            for (si, oi) in selected.iter().enumerate() {
                if !kept[si] {
                    continue;
                }
                let octet = &octets[*oi];
                let merged_level = octet.parent_level;
                'outer: for child in octet.children {
                    for f in &mesh.cell_faces()[child.index()] {
                        let Some(other) = opposite_cell(mesh, *f, child) else {
                            continue;
                        };
                        if octet_of.get(&other) == Some(&si) {
                            continue; // intra-octet face
                        }
                        if projected(other) >= merged_level + limit {
                            kept[si] = false;
                            changed = true;
                            break 'outer;
                        }
                    }
                }
            }
            if !comm.all_reduce_or(changed) {
                break;
            }
        }

        Ok(selected
            .iter()
            .zip(&kept)
            .filter_map(|(oi, k)| k.then(|| octets[*oi].centre_point))
            .collect())
    }

    /// Stages the merge of the octets identified by `points` (their centre
    /// points, as returned by [`split_points`](Self::split_points)) into
    /// `change`, restoring each parent cell at level L−1.
    pub fn set_unrefinement(
        &mut self,
        mesh: &PolyMesh,
        points: &[PointId],
        change: &mut TopoChange,
        remover: &FaceRemover,
    ) -> Result<(), MeshMorphError> {
        if self.pending.is_some() {
            return Err(MeshMorphError::PendingChangeInProgress);
        }
        self.levels.validate(mesh)?;

        let octets = self.history.complete_octets();
        let by_centre: HashMap<PointId, usize> = octets
            .iter()
            .enumerate()
            .map(|(i, o)| (o.centre_point, i))
            .collect();

        let mut faces = Vec::new();
        let mut pending = PendingUnrefine::default();
        for p in points {
            let octet = &octets[*by_centre
                .get(p)
                .ok_or(MeshMorphError::NotASplitPoint { point: *p })?];
            mesh.check_point(*p)?;
            let around = &mesh.point_faces()[p.index()];
            if around.len() != 12 || around.iter().any(|f| !mesh.is_internal(*f)) {
                return Err(MeshMorphError::NotASplitPoint { point: *p });
            }
            faces.extend(around.iter().copied());
            let master = *octet.children.iter().min().expect("octet has children");
            pending
                .collapsed
                .push((octet.record, master, octet.parent_level));
        }

        let plan: RemovalPlan = remover.compatible_removes(mesh, &faces)?;
        remover.set_refinement(mesh, &plan, change)?;

        self.pending = Some(Pending::Unrefine(pending));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // post-commit update
    // ------------------------------------------------------------------------

    /// Rebuilds levels and history after the staged batch was committed.
    /// Children take their parent's level + 1; unrefined masters drop back
    /// to the recorded parent level; created points take the levels recorded
    /// while staging. Must be called once per committed batch.
    pub fn update(&mut self, map: &MeshMap) -> Result<(), MeshMorphError> {
        let pending = self.pending.take();

        // Cell levels.
        let mut cell_override: HashMap<CellId, u32> = HashMap::new();
        match &pending {
            Some(Pending::Refine(p)) => {
                for split in &p.splits {
                    for child in split.children {
                        if let Some(new) = map.cells().staged_to_new(child) {
                            cell_override.insert(new, split.level + 1);
                        }
                    }
                }
            }
            Some(Pending::Unrefine(p)) => {
                for (_, master, level) in &p.collapsed {
                    if let Some(new) = map.cells().old_to_new(*master) {
                        cell_override.insert(new, *level);
                    }
                }
            }
            None => {}
        }

        let mut new_cell_levels = vec![0u32; map.cells().n_new()];
        let mut master_of_added: HashMap<CellId, Option<CellId>> = HashMap::new();
        for (new, master) in map.cells().added_from() {
            master_of_added.insert(*new, *master);
        }
        for (newi, level) in new_cell_levels.iter_mut().enumerate() {
            let new = CellId::new(newi);
            if let Some(l) = cell_override.get(&new) {
                *level = *l;
            } else if let Some(old) = map.cells().new_to_old(new) {
                *level = self.levels.cell.get(old.index()).copied().unwrap_or(0);
            } else if let Some(Some(master)) = master_of_added.get(&new) {
                *level = self.levels.cell.get(master.index()).copied().unwrap_or(0);
            }
        }

        // Point levels.
        let mut point_override: HashMap<PointId, u32> = HashMap::new();
        if let Some(Pending::Refine(p)) = &pending {
            for (staged, level) in &p.added_point_levels {
                if let Some(new) = map.points().staged_to_new(*staged) {
                    point_override.insert(new, *level);
                }
            }
        }
        let mut master_of_added_point: HashMap<PointId, Option<PointId>> = HashMap::new();
        for (new, master) in map.points().added_from() {
            master_of_added_point.insert(*new, *master);
        }
        let mut new_point_levels = vec![0u32; map.points().n_new()];
        for (newi, level) in new_point_levels.iter_mut().enumerate() {
            let new = PointId::new(newi);
            if let Some(l) = point_override.get(&new) {
                *level = *l;
            } else if let Some(old) = map.points().new_to_old(new) {
                *level = self.levels.point.get(old.index()).copied().unwrap_or(0);
            } else if let Some(Some(master)) = master_of_added_point.get(&new) {
                *level = self.levels.point.get(master.index()).copied().unwrap_or(0);
            }
        }

        // History.
        match pending {
            Some(Pending::Refine(p)) => {
                self.history.remap_live(
                    |c| map.cells().old_to_new(c),
                    |pt| map.points().old_to_new(pt),
                );
                for split in &p.splits {
                    let mut children = [CellRef::Live(CellId::new(0)); 8];
                    let mut complete = true;
                    for (slot, child) in split.children.iter().enumerate() {
                        match map.cells().staged_to_new(*child) {
                            Some(new) => children[slot] = CellRef::Live(new),
                            None => {
                                complete = false;
                                break;
                            }
                        }
                    }
                    if !complete {
                        log::warn!(
                            "refined cell {} lost children during commit; not recorded",
                            split.parent
                        );
                        continue;
                    }
                    let centre = map.points().staged_to_new(split.centre);
                    let idx = self.history.add_record(SplitRecord {
                        parent_level: split.level,
                        centre_point: centre,
                        children,
                    });
                    if let Some(reused) = map.cells().old_to_new(split.parent) {
                        // The parent's slot in any enclosing record now reads
                        // the reused child id; repoint it at the new record.
                        self.history.replace_live_with_split(reused, idx);
                        // replace_live_with_split also rewrites the freshly
                        // added record's own reused-child slot; restore it.
                        if let Some(rec) = self.history.records[idx].as_mut() {
                            for (slot, child) in split.children.iter().enumerate() {
                                if *child == split.parent {
                                    rec.children[slot] = CellRef::Live(reused);
                                }
                            }
                        }
                    }
                }
            }
            Some(Pending::Unrefine(p)) => {
                for (record, master, _) in &p.collapsed {
                    self.history.collapse(*record, *master);
                }
                self.history.remap_live(
                    |c| map.cells().old_to_new(c),
                    |pt| map.points().old_to_new(pt),
                );
            }
            None => {
                self.history.remap_live(
                    |c| map.cells().old_to_new(c),
                    |pt| map.points().old_to_new(pt),
                );
            }
        }

        self.levels = RefinementLevels {
            cell: new_cell_levels,
            point: new_point_levels,
        };
        Ok(())
    }
}

/// A created point must stay an anchor of every adjacent child, so a point
/// shared between refined cells of different levels takes the *lowest*
/// child level.
fn record_point_level(levels: &mut HashMap<PointId, u32>, p: PointId, level: u32) {
    let entry = levels.entry(p).or_insert(level);
    *entry = (*entry).min(level);
}

fn ordered(a: PointId, b: PointId) -> (PointId, PointId) {
    if a < b { (a, b) } else { (b, a) }
}

fn opposite_cell(mesh: &PolyMesh, f: FaceId, c: CellId) -> Option<CellId> {
    let own = mesh.owner_of(f);
    let nei = mesh.neighbour_of(f)?;
    Some(if own == c { nei } else { own })
}

/// Inserts new midpoints into a vertex loop wherever two consecutive
/// vertices are the anchors of a freshly split edge.
fn splice_midpoints(
    verts: &[PointId],
    new_mid: &HashMap<(PointId, PointId), PointId>,
) -> Vec<PointId> {
    if new_mid.is_empty() {
        return verts.to_vec();
    }
    let mut out = Vec::with_capacity(verts.len() + 2);
    for i in 0..verts.len() {
        let a = verts[i];
        let b = verts[(i + 1) % verts.len()];
        out.push(a);
        if let Some(mid) = new_mid.get(&ordered(a, b)) {
            out.push(*mid);
        }
    }
    out
}

/// One face of the virtual hex around a refinable cell.
#[derive(Clone, Debug)]
struct VirtualFace {
    /// The whole face to split, when the face survives from the cell's own
    /// level.
    single: Option<FaceId>,
    /// Quarter faces left behind by a finer neighbour, with their anchor.
    members: Vec<(FaceId, PointId)>,
    /// Existing centre point (grouped faces only).
    centre: Option<PointId>,
    /// The four anchors of this virtual face.
    anchors: Vec<PointId>,
}

#[derive(Clone, Debug)]
struct VirtualEdge {
    midpoint: Option<PointId>,
    /// The two virtual faces meeting at this edge.
    faces: [usize; 2],
}

/// The anchor-level hex structure of one refinable cell.
#[derive(Clone, Debug)]
struct VirtualCell {
    cell: CellId,
    level: u32,
    /// Exactly eight anchors, ascending.
    anchors: Vec<PointId>,
    anchor_set: HashSet<PointId>,
    faces: Vec<VirtualFace>,
    /// Sorted anchor pair → edge info; exactly twelve entries.
    edges: Vec<((PointId, PointId), VirtualEdge)>,
}

impl VirtualCell {
    fn build(
        mesh: &PolyMesh,
        cell: CellId,
        levels: &RefinementLevels,
    ) -> Result<Self, MeshMorphError> {
        let level = levels.cell[cell.index()];
        let cell_points = &mesh.cell_points()[cell.index()];
        let anchors: Vec<PointId> = cell_points
            .iter()
            .copied()
            .filter(|p| levels.point[p.index()] <= level)
            .collect();
        if anchors.len() != 8 {
            return Err(MeshMorphError::NotAHexahedron { cell });
        }
        let anchor_set: HashSet<PointId> = anchors.iter().copied().collect();

        // Classify the cell's faces.
        let mut singles: Vec<FaceId> = Vec::new();
        let mut quarters: Vec<(FaceId, PointId)> = Vec::new();
        for f in &mesh.cell_faces()[cell.index()] {
            let verts = mesh.face(*f).verts();
            let face_anchors: Vec<PointId> = verts
                .iter()
                .copied()
                .filter(|v| anchor_set.contains(v))
                .collect();
            match face_anchors.len() {
                4 => singles.push(*f),
                1 => quarters.push((*f, face_anchors[0])),
                _ => return Err(MeshMorphError::RefinementPattern { cell }),
            }
        }

        let mut faces: Vec<VirtualFace> = Vec::new();

        // Whole faces: anchors in loop order, midpoints from the loop gaps.
        let mut edge_accum: HashMap<(PointId, PointId), (Option<PointId>, Vec<usize>)> =
            HashMap::new();
        for f in singles {
            let verts = mesh.face(f).verts();
            // The loop may start mid-gap (a leading spliced midpoint belongs
            // to the closing edge), so walk from the first anchor.
            let rotated = rotate_to_anchor(verts, &anchor_set);
            let (loop_anchors, gaps) = walk_gaps(&rotated, &anchor_set, cell)?;

            let face_idx = faces.len();
            faces.push(VirtualFace {
                single: Some(f),
                members: Vec::new(),
                centre: None,
                anchors: loop_anchors.clone(),
            });
            for i in 0..4 {
                let a = loop_anchors[i];
                let b = loop_anchors[(i + 1) % 4];
                let entry = edge_accum.entry(ordered(a, b)).or_insert((None, Vec::new()));
                if let Some(m) = gaps[i] {
                    if entry.0.is_some() && entry.0 != Some(m) {
                        return Err(MeshMorphError::RefinementPattern { cell });
                    }
                    entry.0 = Some(m);
                }
                entry.1.push(face_idx);
            }
        }

        // Quarter faces: group by the shared centre point.
        let child_level = level + 1;
        let mut groups: HashMap<PointId, Vec<(FaceId, PointId)>> = HashMap::new();
        let mut deferred: Vec<(FaceId, PointId, Vec<PointId>)> = Vec::new();
        for (f, anchor) in quarters {
            let verts = mesh.face(f).verts();
            if verts.len() == 4 {
                let pos = verts
                    .iter()
                    .position(|v| *v == anchor)
                    .expect("anchor on face");
                let centre = verts[(pos + 2) % 4];
                groups.entry(centre).or_default().push((f, anchor));
            } else {
                // Spliced quarter: centre is one of the level L+1 vertices
                // not adjacent to the anchor; resolved against the groups of
                // the unambiguous quarters below.
                let pos = verts
                    .iter()
                    .position(|v| *v == anchor)
                    .expect("anchor on face");
                let n = verts.len();
                let candidates: Vec<PointId> = (0..n)
                    .filter(|i| {
                        *i != pos && *i != (pos + 1) % n && *i != (pos + n - 1) % n
                    })
                    .map(|i| verts[i])
                    .filter(|v| levels.point[v.index()] == child_level)
                    .collect();
                deferred.push((f, anchor, candidates));
            }
        }
        for (f, anchor, candidates) in deferred {
            let mut matched = None;
            for c in &candidates {
                if groups.contains_key(c) {
                    if matched.replace(*c).is_some() {
                        return Err(MeshMorphError::RefinementPattern { cell });
                    }
                }
            }
            let centre = matched.ok_or(MeshMorphError::RefinementPattern { cell })?;
            groups.entry(centre).or_default().push((f, anchor));
        }

        let mut grouped: Vec<(PointId, Vec<(FaceId, PointId)>)> = groups.into_iter().collect();
        grouped.sort_by_key(|(c, _)| c.index());
        for (centre, members) in grouped {
            if members.len() != 4 {
                return Err(MeshMorphError::RefinementPattern { cell });
            }
            let face_idx = faces.len();
            let anchors: Vec<PointId> = members.iter().map(|(_, a)| *a).collect();
            // Virtual edges: two quarters sharing a level L+1 vertex other
            // than the centre meet along the edge between their anchors.
            for i in 0..members.len() {
                for j in i + 1..members.len() {
                    let (fi, ai) = members[i];
                    let (fj, aj) = members[j];
                    let vi = mesh.face(fi).verts();
                    let shared: Vec<PointId> = vi
                        .iter()
                        .copied()
                        .filter(|v| {
                            *v != centre
                                && levels.point[v.index()] == child_level
                                && mesh.face(fj).contains(*v)
                        })
                        .collect();
                    if shared.len() > 1 {
                        return Err(MeshMorphError::RefinementPattern { cell });
                    }
                    if let Some(mid) = shared.first() {
                        let entry = edge_accum
                            .entry(ordered(ai, aj))
                            .or_insert((None, Vec::new()));
                        if entry.0.is_some() && entry.0 != Some(*mid) {
                            return Err(MeshMorphError::RefinementPattern { cell });
                        }
                        entry.0 = Some(*mid);
                        if entry.1.last() != Some(&face_idx) {
                            entry.1.push(face_idx);
                        }
                    }
                }
            }
            faces.push(VirtualFace {
                single: None,
                members,
                centre: Some(centre),
                anchors,
            });
        }

        if faces.len() != 6 {
            return Err(MeshMorphError::NotAHexahedron { cell });
        }
        let mut edges: Vec<((PointId, PointId), VirtualEdge)> = Vec::with_capacity(12);
        for (key, (midpoint, vfaces)) in edge_accum {
            if vfaces.len() != 2 {
                return Err(MeshMorphError::RefinementPattern { cell });
            }
            edges.push((
                key,
                VirtualEdge {
                    midpoint,
                    faces: [vfaces[0], vfaces[1]],
                },
            ));
        }
        if edges.len() != 12 {
            return Err(MeshMorphError::NotAHexahedron { cell });
        }
        edges.sort_by_key(|(k, _)| *k);

        let mut anchors = anchors;
        anchors.sort_unstable();

        Ok(VirtualCell {
            cell,
            level,
            anchors,
            anchor_set,
            faces,
            edges,
        })
    }
}

/// Rotates a face loop so it starts at an anchor.
fn rotate_to_anchor(verts: &[PointId], anchors: &HashSet<PointId>) -> Vec<PointId> {
    let start = verts
        .iter()
        .position(|v| anchors.contains(v))
        .unwrap_or(0);
    let mut out = Vec::with_capacity(verts.len());
    out.extend_from_slice(&verts[start..]);
    out.extend_from_slice(&verts[..start]);
    out
}

/// Walks a loop starting at an anchor, returning the four anchors in loop
/// order and the optional intermediate vertex in each of the four gaps.
fn walk_gaps(
    verts: &[PointId],
    anchors: &HashSet<PointId>,
    cell: CellId,
) -> Result<(Vec<PointId>, Vec<Option<PointId>>), MeshMorphError> {
    let mut loop_anchors = Vec::with_capacity(4);
    let mut gaps: Vec<Option<PointId>> = Vec::with_capacity(4);
    for v in verts {
        if anchors.contains(v) {
            loop_anchors.push(*v);
            gaps.push(None);
        } else {
            match gaps.last_mut() {
                Some(slot) if slot.is_none() => *slot = Some(*v),
                _ => return Err(MeshMorphError::RefinementPattern { cell }),
            }
        }
    }
    if loop_anchors.len() != 4 {
        return Err(MeshMorphError::RefinementPattern { cell });
    }
    Ok((loop_anchors, gaps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;
    use crate::mesh::builder::{BlockMeshSpec, block_mesh};

    #[test]
    fn virtual_cell_of_pristine_hex() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(1)).unwrap();
        let levels = RefinementLevels::zero(&mesh);
        let vc = VirtualCell::build(&mesh, CellId::new(0), &levels).unwrap();
        assert_eq!(vc.anchors.len(), 8);
        assert_eq!(vc.faces.len(), 6);
        assert_eq!(vc.edges.len(), 12);
        assert!(vc.faces.iter().all(|f| f.single.is_some()));
        assert!(vc.edges.iter().all(|(_, e)| e.midpoint.is_none()));
    }

    #[test]
    fn consistent_refinement_extends_across_levels() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(2)).unwrap();
        let mut refiner = HexRefiner::new(&mesh);
        // Pretend cell 0 is one level finer already.
        refiner.levels.cell[0] = 1;
        // With balanced input this is consistent as-is.
        let set = refiner
            .consistent_refinement(
                &mesh,
                &[CellId::new(0)],
                &NoComm,
                true,
                DEFAULT_LIMIT_DIFF,
            )
            .unwrap();
        // Refining cell 0 to level 2 drags its face neighbours to level 1.
        assert!(set.contains(&CellId::new(0)));
        assert!(set.len() > 1);
        for c in &set {
            if *c != CellId::new(0) {
                assert_eq!(refiner.levels.cell[c.index()], 0);
            }
        }
    }

    #[test]
    fn consistent_refinement_shrinks_when_not_extending() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(2)).unwrap();
        let mut refiner = HexRefiner::new(&mesh);
        refiner.levels.cell[0] = 1;
        let set = refiner
            .consistent_refinement(
                &mesh,
                &[CellId::new(0)],
                &NoComm,
                false,
                DEFAULT_LIMIT_DIFF,
            )
            .unwrap();
        // Not allowed to grow the set, so the candidate is dropped.
        assert!(set.is_empty());
    }

    #[test]
    fn pending_batch_blocks_second_batch() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(1)).unwrap();
        let mut refiner = HexRefiner::new(&mesh);
        let mut change = crate::topo::TopoChange::from_mesh(&mesh);
        refiner
            .set_refinement(&mesh, &[CellId::new(0)], &mut change)
            .unwrap();
        let err = refiner
            .set_refinement(&mesh, &[CellId::new(0)], &mut change)
            .unwrap_err();
        assert!(matches!(err, MeshMorphError::PendingChangeInProgress));
    }
}
