//! Commit: turn a pending [`TopoChange`] into a new mesh plus a [`MeshMap`].
//!
//! Commit is single-shot and transactional: it validates the staged end
//! state, renumbers everything into the canonical layout, and builds a brand
//! new [`PolyMesh`]. The seeding mesh is never touched; on any validation
//! failure an error is returned and nothing is produced.
//!
//! # Canonical renumbering
//! - Points and cells compact in staged order.
//! - Internal faces come first, sorted by (owner, neighbour) after
//!   canonicalizing orientation so owner < neighbour (flips are recorded in
//!   the map); ties between the same cell pair keep staged order.
//! - Boundary faces follow, grouped contiguously by ascending patch index,
//!   keeping staged order within each patch.
//!
//! The committed ordering is therefore a function of the staged end state
//! only — the order in which operations were inserted never matters.

use crate::mesh::PolyMesh;
use crate::mesh::face::Face;
use crate::mesh::ids::{CellId, FaceId, PatchId, PointId};
use crate::mesh::patch::Patch;
use crate::mesh::zone::{CellZone, FaceZone, PointZone};
use crate::mesh_error::MeshMorphError;
use crate::topo::change::TopoChange;
use crate::topo::map::{EntityMap, MeshMap};

/// Options for [`TopoChange::apply`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CommitOptions {
    /// When true, surviving points keep their old positions in the committed
    /// mesh and the map carries the staged target positions for a follow-up
    /// `move_points`; added points start at their master point's old
    /// position when they have one. When false, the mesh takes the staged
    /// positions directly.
    pub inflate: bool,
}

impl CommitOptions {
    /// Commit with inflation enabled.
    pub fn inflated() -> Self {
        CommitOptions { inflate: true }
    }
}

struct LiveFace {
    staged: FaceId,
    verts: Vec<PointId>,
    owner: CellId,
    neighbour: Option<CellId>,
    patch: Option<PatchId>,
    flipped: bool,
}

impl TopoChange {
    /// Commits the batch: validates, renumbers, and builds the new mesh and
    /// its transfer map. The seeding mesh is left untouched.
    ///
    /// A no-op batch (seeded from a mesh, nothing changed) commits to an
    /// identity map and an equivalent mesh.
    pub fn apply(
        &self,
        options: &CommitOptions,
    ) -> Result<(PolyMesh, MeshMap), MeshMorphError> {
        let n_staged_points = self.points.len();
        let n_staged_cells = self.cells.len();
        let n_staged_faces = self.faces.len();

        // -- merge resolution -------------------------------------------------
        let point_target = self.resolve_point_merges()?;
        let cell_target = self.resolve_cell_merges()?;

        // Zone declarations must cover every staged membership.
        self.validate_zone_bounds()?;

        // -- face validation and substitution ---------------------------------
        let mut live_faces = Vec::with_capacity(n_staged_faces);
        for fi in 0..n_staged_faces {
            let rec = &self.faces[fi];
            if rec.removed {
                continue;
            }
            let face = FaceId::new(fi);

            let mut verts = Vec::with_capacity(rec.verts.len());
            for v in &rec.verts {
                if v.index() >= n_staged_points {
                    return Err(MeshMorphError::PointOutOfRange {
                        point: v.index(),
                        n_points: n_staged_points,
                    });
                }
                let resolved = point_target[v.index()]
                    .ok_or(MeshMorphError::DanglingPoint { face, point: *v })?;
                // Merging can collapse consecutive loop entries.
                if verts.last() != Some(&resolved) {
                    verts.push(resolved);
                }
            }
            while verts.len() > 1 && verts.first() == verts.last() {
                verts.pop();
            }
            if verts.len() < 3 {
                return Err(MeshMorphError::DegenerateFace {
                    face,
                    n_verts: verts.len(),
                });
            }
            let mut sorted = verts.clone();
            sorted.sort_unstable();
            if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
                return Err(MeshMorphError::DuplicateFaceVertex {
                    face,
                    point: w[0],
                });
            }

            if rec.owner.index() >= n_staged_cells {
                return Err(MeshMorphError::CellOutOfRange {
                    cell: rec.owner.index(),
                    n_cells: n_staged_cells,
                });
            }
            let owner = cell_target[rec.owner.index()].ok_or(MeshMorphError::DanglingOwner {
                face,
                cell: rec.owner,
            })?;
            let neighbour = match rec.neighbour {
                Some(n) => {
                    if n.index() >= n_staged_cells {
                        return Err(MeshMorphError::CellOutOfRange {
                            cell: n.index(),
                            n_cells: n_staged_cells,
                        });
                    }
                    Some(
                        cell_target[n.index()]
                            .ok_or(MeshMorphError::DanglingNeighbour { face, cell: n })?,
                    )
                }
                None => None,
            };
            match (neighbour, rec.patch) {
                (Some(_), Some(_)) | (None, None) => {
                    return Err(MeshMorphError::FaceRegionConflict { face });
                }
                _ => {}
            }
            if let Some(n) = neighbour {
                if n == owner {
                    return Err(MeshMorphError::SelfAdjacentFace { face, cell: owner });
                }
            }
            if let Some(p) = rec.patch {
                if p.index() >= self.patch_specs.len() {
                    return Err(MeshMorphError::PatchOutOfRange {
                        patch: p.index(),
                        n_patches: self.patch_specs.len(),
                    });
                }
            }

            live_faces.push(LiveFace {
                staged: face,
                verts,
                owner,
                neighbour,
                patch: rec.patch,
                flipped: false,
            });
        }

        // -- cell validation --------------------------------------------------
        let mut cell_face_count = vec![0usize; n_staged_cells];
        for lf in &live_faces {
            cell_face_count[lf.owner.index()] += 1;
            if let Some(n) = lf.neighbour {
                cell_face_count[n.index()] += 1;
            }
        }
        for ci in 0..n_staged_cells {
            if self.cells[ci].removed {
                continue;
            }
            if cell_face_count[ci] < 4 {
                return Err(MeshMorphError::CellWithoutFaces {
                    cell: CellId::new(ci),
                    n_faces: cell_face_count[ci],
                });
            }
        }

        // -- renumber points and cells (staged order) -------------------------
        let mut point_new: Vec<Option<PointId>> = vec![None; n_staged_points];
        let mut new_points_staged = Vec::new();
        for pi in 0..n_staged_points {
            if self.points[pi].removed {
                continue;
            }
            point_new[pi] = Some(PointId::new(new_points_staged.len()));
            new_points_staged.push(PointId::new(pi));
        }

        let mut cell_new: Vec<Option<CellId>> = vec![None; n_staged_cells];
        let mut new_cells_staged = Vec::new();
        for ci in 0..n_staged_cells {
            if self.cells[ci].removed {
                continue;
            }
            cell_new[ci] = Some(CellId::new(new_cells_staged.len()));
            new_cells_staged.push(CellId::new(ci));
        }

        // -- canonical face ordering ------------------------------------------
        for lf in &mut live_faces {
            if let Some(n) = lf.neighbour {
                let own_new = cell_new[lf.owner.index()].expect("live owner renumbered");
                let nei_new = cell_new[n.index()].expect("live neighbour renumbered");
                if own_new > nei_new {
                    let old_owner = lf.owner;
                    lf.owner = n;
                    lf.neighbour = Some(old_owner);
                    lf.verts = Face::new(std::mem::take(&mut lf.verts))
                        .reversed()
                        .into_verts();
                    lf.flipped = !lf.flipped;
                }
            }
        }

        live_faces.sort_by_key(|lf| match (lf.neighbour, lf.patch) {
            (Some(n), _) => (
                0usize,
                cell_new[lf.owner.index()].expect("renumbered").index(),
                cell_new[n.index()].expect("renumbered").index(),
                lf.staged.index(),
            ),
            (None, Some(p)) => (1usize, p.index(), lf.staged.index(), 0),
            (None, None) => unreachable!("validated: boundary face has patch"),
        });

        let n_internal = live_faces.iter().filter(|lf| lf.neighbour.is_some()).count();

        let mut face_new: Vec<Option<FaceId>> = vec![None; n_staged_faces];
        for (newi, lf) in live_faces.iter().enumerate() {
            face_new[lf.staged.index()] = Some(FaceId::new(newi));
        }

        // -- patch ranges -----------------------------------------------------
        let mut patch_count = vec![0usize; self.patch_specs.len()];
        for lf in &live_faces {
            if let Some(p) = lf.patch {
                patch_count[p.index()] += 1;
            }
        }
        let mut patches = Vec::with_capacity(self.patch_specs.len());
        let mut start = n_internal;
        for (pi, spec) in self.patch_specs.iter().enumerate() {
            patches.push(Patch::new(
                spec.name.clone(),
                spec.kind.clone(),
                start,
                patch_count[pi],
            ));
            start += patch_count[pi];
        }

        // -- positions and inflation ------------------------------------------
        let n_new_points = new_points_staged.len();
        let mut targets = Vec::with_capacity(n_new_points);
        for staged in &new_points_staged {
            targets.push(self.points[staged.index()].position);
        }
        let (mesh_points, motion_points) = if options.inflate {
            let mut initial = Vec::with_capacity(n_new_points);
            for staged in &new_points_staged {
                initial.push(self.inflation_start(*staged));
            }
            let moved = initial
                .iter()
                .zip(&targets)
                .any(|(a, b)| a != b);
            if moved {
                (initial, Some(targets))
            } else {
                (targets, None)
            }
        } else {
            (targets, None)
        };

        // -- assemble the mesh ------------------------------------------------
        let mut faces = Vec::with_capacity(live_faces.len());
        let mut owner = Vec::with_capacity(live_faces.len());
        let mut neighbour = Vec::with_capacity(n_internal);
        let mut face_flipped = Vec::with_capacity(live_faces.len());
        for lf in &live_faces {
            let verts: Vec<PointId> = lf
                .verts
                .iter()
                .map(|v| point_new[v.index()].expect("live point renumbered"))
                .collect();
            faces.push(Face::new(verts));
            owner.push(cell_new[lf.owner.index()].expect("renumbered"));
            if let Some(n) = lf.neighbour {
                neighbour.push(cell_new[n.index()].expect("renumbered"));
            }
            face_flipped.push(lf.flipped);
        }

        // -- zones ------------------------------------------------------------
        let mut cell_zones: Vec<CellZone> = self
            .cell_zone_names
            .iter()
            .map(|n| CellZone::new(n.clone(), Vec::new()))
            .collect();
        for (newi, staged) in new_cells_staged.iter().enumerate() {
            if let Some(z) = self.cells[staged.index()].zone {
                cell_zones[z.index()].cells.push(CellId::new(newi));
            }
        }
        let mut point_zones: Vec<PointZone> = self
            .point_zone_names
            .iter()
            .map(|n| PointZone::new(n.clone(), Vec::new()))
            .collect();
        for (newi, staged) in new_points_staged.iter().enumerate() {
            if let Some(z) = self.points[staged.index()].zone {
                point_zones[z.index()].points.push(PointId::new(newi));
            }
        }
        let mut face_zones: Vec<FaceZone> = self
            .face_zone_names
            .iter()
            .map(|n| FaceZone {
                name: n.clone(),
                faces: Vec::new(),
                flipped: Vec::new(),
            })
            .collect();
        for (newi, lf) in live_faces.iter().enumerate() {
            if let Some(m) = self.faces[lf.staged.index()].zone {
                let zone = &mut face_zones[m.zone.index()];
                zone.faces.push(FaceId::new(newi));
                zone.flipped.push(m.flipped ^ lf.flipped);
            }
        }

        // -- transfer maps ----------------------------------------------------
        let points_map = self.build_point_map(&point_new, &new_points_staged, &point_target)?;
        let cells_map = self.build_cell_map(&cell_new, &new_cells_staged, &cell_target)?;
        let faces_map = self.build_face_map(&face_new, &live_faces)?;

        if self.patch_map.len() != self.n_old_patches {
            return Err(MeshMorphError::PatchMapMismatch {
                expected: self.n_old_patches,
                found: self.patch_map.len(),
            });
        }
        for p in self.patch_map.iter().flatten() {
            if p.index() >= self.patch_specs.len() {
                return Err(MeshMorphError::PatchOutOfRange {
                    patch: p.index(),
                    n_patches: self.patch_specs.len(),
                });
            }
        }

        let map = MeshMap {
            points: points_map,
            faces: faces_map,
            cells: cells_map,
            face_flipped,
            patch_map: self.patch_map.clone(),
            motion_points,
        };

        let mesh = PolyMesh::new(mesh_points, faces, owner, neighbour, patches)?
            .with_zones(cell_zones, face_zones, point_zones)?;

        log::debug!(
            "committed topology change: {} -> {} points, {} -> {} faces, {} -> {} cells{}",
            self.n_old_points,
            mesh.n_points(),
            self.n_old_faces,
            mesh.n_faces(),
            self.n_old_cells,
            mesh.n_cells(),
            if map.has_motion_points() {
                " (motion pending)"
            } else {
                ""
            },
        );

        Ok((mesh, map))
    }

    /// Starting position of a committed point under inflation: surviving old
    /// points keep their old position; added points start at their master's
    /// old position when the master chain reaches an old point.
    fn inflation_start(&self, staged: PointId) -> [f64; 3] {
        if staged.index() < self.n_old_points {
            return self.old_positions[staged.index()];
        }
        let mut master = self.points[staged.index()].master;
        let mut hops = 0;
        while let Some(m) = master {
            if m.index() < self.n_old_points {
                return self.old_positions[m.index()];
            }
            hops += 1;
            if hops > self.points.len() || m.index() >= self.points.len() {
                break;
            }
            master = self.points[m.index()].master;
        }
        self.points[staged.index()].position
    }

    fn resolve_point_merges(&self) -> Result<Vec<Option<PointId>>, MeshMorphError> {
        let n = self.points.len();
        let mut target = vec![None; n];
        for i in 0..n {
            let rec = &self.points[i];
            if !rec.removed {
                target[i] = Some(PointId::new(i));
                continue;
            }
            let Some(mut t) = rec.merge_into else {
                continue; // plain removal
            };
            let mut hops = 0;
            loop {
                if t.index() >= n {
                    return Err(MeshMorphError::PointOutOfRange {
                        point: t.index(),
                        n_points: n,
                    });
                }
                let trec = &self.points[t.index()];
                if !trec.removed {
                    target[i] = Some(t);
                    break;
                }
                match trec.merge_into {
                    Some(next) => {
                        hops += 1;
                        if hops > n {
                            return Err(MeshMorphError::MergeCycle {
                                entity: "point",
                                index: i,
                            });
                        }
                        t = next;
                    }
                    None => {
                        return Err(MeshMorphError::MergeIntoRemoved {
                            entity: "point",
                            index: i,
                            target: t.index(),
                        });
                    }
                }
            }
        }
        Ok(target)
    }

    fn resolve_cell_merges(&self) -> Result<Vec<Option<CellId>>, MeshMorphError> {
        let n = self.cells.len();
        let mut target = vec![None; n];
        for i in 0..n {
            let rec = &self.cells[i];
            if !rec.removed {
                target[i] = Some(CellId::new(i));
                continue;
            }
            let Some(mut t) = rec.merge_into else {
                continue;
            };
            let mut hops = 0;
            loop {
                if t.index() >= n {
                    return Err(MeshMorphError::CellOutOfRange {
                        cell: t.index(),
                        n_cells: n,
                    });
                }
                let trec = &self.cells[t.index()];
                if !trec.removed {
                    target[i] = Some(t);
                    break;
                }
                match trec.merge_into {
                    Some(next) => {
                        hops += 1;
                        if hops > n {
                            return Err(MeshMorphError::MergeCycle {
                                entity: "cell",
                                index: i,
                            });
                        }
                        t = next;
                    }
                    None => {
                        return Err(MeshMorphError::MergeIntoRemoved {
                            entity: "cell",
                            index: i,
                            target: t.index(),
                        });
                    }
                }
            }
        }
        Ok(target)
    }

    fn validate_zone_bounds(&self) -> Result<(), MeshMorphError> {
        for rec in &self.points {
            if let Some(z) = rec.zone {
                if z.index() >= self.point_zone_names.len() {
                    return Err(MeshMorphError::ZoneOutOfRange {
                        zone: z.index(),
                        n_zones: self.point_zone_names.len(),
                    });
                }
            }
        }
        for rec in &self.cells {
            if let Some(z) = rec.zone {
                if z.index() >= self.cell_zone_names.len() {
                    return Err(MeshMorphError::ZoneOutOfRange {
                        zone: z.index(),
                        n_zones: self.cell_zone_names.len(),
                    });
                }
            }
        }
        for rec in &self.faces {
            if let Some(m) = rec.zone {
                if m.zone.index() >= self.face_zone_names.len() {
                    return Err(MeshMorphError::ZoneOutOfRange {
                        zone: m.zone.index(),
                        n_zones: self.face_zone_names.len(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Follows an added point's master chain back into the old id space.
    fn master_point_in_old(&self, staged: PointId) -> Option<PointId> {
        let mut master = self.points.get(staged.index())?.master;
        let mut hops = 0;
        while let Some(m) = master {
            if m.index() < self.n_old_points {
                return Some(m);
            }
            hops += 1;
            if hops > self.points.len() || m.index() >= self.points.len() {
                return None;
            }
            master = self.points[m.index()].master;
        }
        None
    }

    fn master_face_in_old(&self, staged: FaceId) -> Option<FaceId> {
        let mut master = self.faces.get(staged.index())?.master;
        let mut hops = 0;
        while let Some(m) = master {
            if m.index() < self.n_old_faces {
                return Some(m);
            }
            hops += 1;
            if hops > self.faces.len() || m.index() >= self.faces.len() {
                return None;
            }
            master = self.faces[m.index()].master;
        }
        None
    }

    fn master_cell_in_old(&self, staged: CellId) -> Option<CellId> {
        let mut master = self.cells.get(staged.index())?.master;
        let mut hops = 0;
        while let Some(m) = master {
            if m.index() < self.n_old_cells {
                return Some(m);
            }
            hops += 1;
            if hops > self.cells.len() || m.index() >= self.cells.len() {
                return None;
            }
            master = self.cells[m.index()].master;
        }
        None
    }

    fn build_point_map(
        &self,
        point_new: &[Option<PointId>],
        new_points_staged: &[PointId],
        point_target: &[Option<PointId>],
    ) -> Result<EntityMap<PointId>, MeshMorphError> {
        let mut merged = Vec::new();
        for i in 0..self.n_old_points {
            if self.points[i].removed {
                if let Some(t) = point_target[i] {
                    if let Some(new) = point_new[t.index()] {
                        merged.push((PointId::new(i), new));
                    }
                }
            }
        }
        let mut added_from = Vec::new();
        let mut new_to_old = Vec::with_capacity(new_points_staged.len());
        for (newi, staged) in new_points_staged.iter().enumerate() {
            if staged.index() < self.n_old_points {
                new_to_old.push(Some(*staged));
            } else {
                new_to_old.push(None);
                added_from.push((PointId::new(newi), self.master_point_in_old(*staged)));
            }
        }
        Ok(EntityMap {
            n_old: self.n_old_points,
            staged_to_new: point_new.to_vec(),
            new_to_old,
            added_from,
            merged,
        })
    }

    fn build_cell_map(
        &self,
        cell_new: &[Option<CellId>],
        new_cells_staged: &[CellId],
        cell_target: &[Option<CellId>],
    ) -> Result<EntityMap<CellId>, MeshMorphError> {
        let mut merged = Vec::new();
        for i in 0..self.n_old_cells {
            if self.cells[i].removed {
                if let Some(t) = cell_target[i] {
                    if let Some(new) = cell_new[t.index()] {
                        merged.push((CellId::new(i), new));
                    }
                }
            }
        }
        let mut added_from = Vec::new();
        let mut new_to_old = Vec::with_capacity(new_cells_staged.len());
        for (newi, staged) in new_cells_staged.iter().enumerate() {
            if staged.index() < self.n_old_cells {
                new_to_old.push(Some(*staged));
            } else {
                new_to_old.push(None);
                added_from.push((CellId::new(newi), self.master_cell_in_old(*staged)));
            }
        }
        Ok(EntityMap {
            n_old: self.n_old_cells,
            staged_to_new: cell_new.to_vec(),
            new_to_old,
            added_from,
            merged,
        })
    }

    fn build_face_map(
        &self,
        face_new: &[Option<FaceId>],
        live_faces: &[LiveFace],
    ) -> Result<EntityMap<FaceId>, MeshMorphError> {
        let n = self.faces.len();
        let mut merged = Vec::new();
        for i in 0..self.n_old_faces {
            let rec = &self.faces[i];
            if !rec.removed {
                continue;
            }
            // Follow the recorded merge chain to a live face, if any.
            let mut t = rec.merge_into;
            let mut hops = 0;
            while let Some(f) = t {
                if f.index() >= n {
                    return Err(MeshMorphError::FaceOutOfRange {
                        face: f.index(),
                        n_faces: n,
                    });
                }
                let frec = &self.faces[f.index()];
                if !frec.removed {
                    if let Some(new) = face_new[f.index()] {
                        merged.push((FaceId::new(i), new));
                    }
                    break;
                }
                hops += 1;
                if hops > n {
                    return Err(MeshMorphError::MergeCycle {
                        entity: "face",
                        index: i,
                    });
                }
                t = frec.merge_into;
            }
        }
        let mut added_from = Vec::new();
        let mut new_to_old = Vec::with_capacity(live_faces.len());
        for (newi, lf) in live_faces.iter().enumerate() {
            if lf.staged.index() < self.n_old_faces {
                new_to_old.push(Some(lf.staged));
            } else {
                new_to_old.push(None);
                added_from.push((FaceId::new(newi), self.master_face_in_old(lf.staged)));
            }
        }
        Ok(EntityMap {
            n_old: self.n_old_faces,
            staged_to_new: face_new.to_vec(),
            new_to_old,
            added_from,
            merged,
        })
    }
}
