//! Accumulation of a pending topology change.
//!
//! A [`TopoChange`] is an arena of staged entities seeded from a live mesh
//! (or empty, for from-scratch builds such as dualisation). Operations edit
//! the staged state and append to a journal; nothing touches any live mesh
//! until [`TopoChange::apply`](crate::topo::TopoChange::apply) commits the
//! batch.
//!
//! Staged ids extend the seeding mesh's id space: entity `i` of the old mesh
//! is staged entity `i`; additions get the next free indices. Insertion is
//! O(1) — only cheap bounds checks can fail here. Topological validation
//! (dangling references, degenerate loops, region conflicts) is deferred to
//! commit time so callers can build a legal end state in any order.

use crate::mesh::PolyMesh;
use crate::mesh::ids::{CellId, CellZoneId, FaceId, FaceZoneId, PatchId, PointId, PointZoneId};
use crate::mesh::patch::{PatchKind, PatchSpec};
use crate::mesh_error::MeshMorphError;

/// Face-zone membership with orientation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaceZoneMembership {
    pub zone: FaceZoneId,
    /// True when the face points against the zone's nominal direction.
    pub flipped: bool,
}

/// Everything that describes one staged face.
///
/// Exactly one of `neighbour` (internal) and `patch` (boundary) must be set;
/// this is validated at commit, not here.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceDef {
    pub verts: Vec<PointId>,
    pub owner: CellId,
    pub neighbour: Option<CellId>,
    pub patch: Option<PatchId>,
    /// Old face this face derives from, for mapping purposes.
    pub master: Option<FaceId>,
    /// True when this face is oriented opposite to its master.
    pub flip_master: bool,
    pub zone: Option<FaceZoneMembership>,
}

impl FaceDef {
    /// An internal face between `owner` and `neighbour`.
    pub fn internal(verts: Vec<PointId>, owner: CellId, neighbour: CellId) -> Self {
        FaceDef {
            verts,
            owner,
            neighbour: Some(neighbour),
            patch: None,
            master: None,
            flip_master: false,
            zone: None,
        }
    }

    /// A boundary face of `owner` on `patch`.
    pub fn boundary(verts: Vec<PointId>, owner: CellId, patch: PatchId) -> Self {
        FaceDef {
            verts,
            owner,
            neighbour: None,
            patch: Some(patch),
            master: None,
            flip_master: false,
            zone: None,
        }
    }

    /// Records the old face this one derives from.
    pub fn with_master(mut self, master: FaceId) -> Self {
        self.master = Some(master);
        self
    }

    /// Records a master with opposite orientation.
    pub fn with_flipped_master(mut self, master: FaceId) -> Self {
        self.master = Some(master);
        self.flip_master = true;
        self
    }

    /// Attaches face-zone membership.
    pub fn with_zone(mut self, zone: FaceZoneId, flipped: bool) -> Self {
        self.zone = Some(FaceZoneMembership { zone, flipped });
        self
    }
}

/// One journal entry; insertion order is kept only for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopoOp {
    AddPoint(PointId),
    ModifyPoint(PointId),
    RemovePoint(PointId),
    MergePoints { master: PointId, slave: PointId },
    AddFace(FaceId),
    ModifyFace(FaceId),
    RemoveFace(FaceId),
    AddCell(CellId),
    RemoveCell(CellId),
    AddPatch(PatchId),
    SetPatchCount(usize),
}

#[derive(Clone, Debug)]
pub(crate) struct PointRecord {
    pub position: [f64; 3],
    pub master: Option<PointId>,
    pub zone: Option<PointZoneId>,
    pub removed: bool,
    pub merge_into: Option<PointId>,
}

#[derive(Clone, Debug)]
pub(crate) struct FaceRecord {
    pub verts: Vec<PointId>,
    pub owner: CellId,
    pub neighbour: Option<CellId>,
    pub patch: Option<PatchId>,
    pub zone: Option<FaceZoneMembership>,
    pub master: Option<FaceId>,
    pub flip_master: bool,
    pub removed: bool,
    pub merge_into: Option<FaceId>,
}

#[derive(Clone, Debug)]
pub(crate) struct CellRecord {
    pub master: Option<CellId>,
    pub zone: Option<CellZoneId>,
    pub removed: bool,
    pub merge_into: Option<CellId>,
}

/// A pending, uncommitted batch of topology operations.
#[derive(Clone, Debug)]
pub struct TopoChange {
    pub(crate) n_old_points: usize,
    pub(crate) n_old_faces: usize,
    pub(crate) n_old_cells: usize,
    pub(crate) n_old_patches: usize,
    /// Positions of the seeding mesh, untouched by `modify_point`.
    pub(crate) old_positions: Vec<[f64; 3]>,
    pub(crate) points: Vec<PointRecord>,
    pub(crate) faces: Vec<FaceRecord>,
    pub(crate) cells: Vec<CellRecord>,
    pub(crate) patch_specs: Vec<PatchSpec>,
    pub(crate) patch_map: Vec<Option<PatchId>>,
    pub(crate) cell_zone_names: Vec<String>,
    pub(crate) face_zone_names: Vec<String>,
    pub(crate) point_zone_names: Vec<String>,
    pub(crate) journal: Vec<TopoOp>,
}

impl TopoChange {
    /// An empty change for building a mesh from scratch (e.g. dualisation).
    pub fn new() -> Self {
        TopoChange {
            n_old_points: 0,
            n_old_faces: 0,
            n_old_cells: 0,
            n_old_patches: 0,
            old_positions: Vec::new(),
            points: Vec::new(),
            faces: Vec::new(),
            cells: Vec::new(),
            patch_specs: Vec::new(),
            patch_map: Vec::new(),
            cell_zone_names: Vec::new(),
            face_zone_names: Vec::new(),
            point_zone_names: Vec::new(),
            journal: Vec::new(),
        }
    }

    /// Seeds a change from a live mesh: every entity of `mesh` becomes a
    /// staged entity with the same index.
    pub fn from_mesh(mesh: &PolyMesh) -> Self {
        let mut change = TopoChange::new();
        change.n_old_points = mesh.n_points();
        change.n_old_faces = mesh.n_faces();
        change.n_old_cells = mesh.n_cells();
        change.n_old_patches = mesh.n_patches();
        change.old_positions = mesh.points().to_vec();

        // Per-entity zone membership; overlapping zones keep the first hit,
        // matching the single-zone bookkeeping of the staging arena.
        let mut point_zone = vec![None; mesh.n_points()];
        for (zi, z) in mesh.point_zones().iter().enumerate() {
            change.point_zone_names.push(z.name.clone());
            for p in &z.points {
                point_zone[p.index()].get_or_insert(PointZoneId::new(zi));
            }
        }
        let mut cell_zone = vec![None; mesh.n_cells()];
        for (zi, z) in mesh.cell_zones().iter().enumerate() {
            change.cell_zone_names.push(z.name.clone());
            for c in &z.cells {
                cell_zone[c.index()].get_or_insert(CellZoneId::new(zi));
            }
        }
        let mut face_zone: Vec<Option<FaceZoneMembership>> = vec![None; mesh.n_faces()];
        for (zi, z) in mesh.face_zones().iter().enumerate() {
            change.face_zone_names.push(z.name.clone());
            for (f, flip) in z.faces.iter().zip(&z.flipped) {
                face_zone[f.index()].get_or_insert(FaceZoneMembership {
                    zone: FaceZoneId::new(zi),
                    flipped: *flip,
                });
            }
        }

        for (pi, pos) in mesh.points().iter().enumerate() {
            change.points.push(PointRecord {
                position: *pos,
                master: Some(PointId::new(pi)),
                zone: point_zone[pi],
                removed: false,
                merge_into: None,
            });
        }
        for fi in 0..mesh.n_faces() {
            let f = FaceId::new(fi);
            change.faces.push(FaceRecord {
                verts: mesh.face(f).verts().to_vec(),
                owner: mesh.owner_of(f),
                neighbour: mesh.neighbour_of(f),
                patch: mesh.patch_of(f),
                zone: face_zone[fi],
                master: Some(f),
                flip_master: false,
                removed: false,
                merge_into: None,
            });
        }
        for ci in 0..mesh.n_cells() {
            change.cells.push(CellRecord {
                master: Some(CellId::new(ci)),
                zone: cell_zone[ci],
                removed: false,
                merge_into: None,
            });
        }

        change.patch_specs = mesh.patches().iter().map(|p| p.spec()).collect();
        change.patch_map = (0..mesh.n_patches())
            .map(|i| Some(PatchId::new(i)))
            .collect();
        change
    }

    // --- extents -------------------------------------------------------------

    /// Staged point count (old + added).
    #[inline]
    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    /// Staged face count (old + added).
    #[inline]
    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    /// Staged cell count (old + added).
    #[inline]
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn n_old_points(&self) -> usize {
        self.n_old_points
    }

    #[inline]
    pub fn n_old_faces(&self) -> usize {
        self.n_old_faces
    }

    #[inline]
    pub fn n_old_cells(&self) -> usize {
        self.n_old_cells
    }

    /// Declared post-commit patch count.
    #[inline]
    pub fn n_patches(&self) -> usize {
        self.patch_specs.len()
    }

    /// The diagnostic journal, in insertion order.
    pub fn journal(&self) -> &[TopoOp] {
        &self.journal
    }

    // --- bounds checks -------------------------------------------------------

    fn check_point(&self, p: PointId) -> Result<(), MeshMorphError> {
        if p.index() >= self.points.len() {
            return Err(MeshMorphError::PointOutOfRange {
                point: p.index(),
                n_points: self.points.len(),
            });
        }
        Ok(())
    }

    fn check_face(&self, f: FaceId) -> Result<(), MeshMorphError> {
        if f.index() >= self.faces.len() {
            return Err(MeshMorphError::FaceOutOfRange {
                face: f.index(),
                n_faces: self.faces.len(),
            });
        }
        Ok(())
    }

    fn check_cell(&self, c: CellId) -> Result<(), MeshMorphError> {
        if c.index() >= self.cells.len() {
            return Err(MeshMorphError::CellOutOfRange {
                cell: c.index(),
                n_cells: self.cells.len(),
            });
        }
        Ok(())
    }

    // --- point operations ----------------------------------------------------

    /// Registers a new point. `master` records the old point this one derives
    /// from for mapping purposes; computed points (centroids, midpoints) have
    /// no master.
    pub fn add_point(
        &mut self,
        position: [f64; 3],
        master: Option<PointId>,
        zone: Option<PointZoneId>,
    ) -> PointId {
        let id = PointId::new(self.points.len());
        self.points.push(PointRecord {
            position,
            master,
            zone,
            removed: false,
            merge_into: None,
        });
        self.journal.push(TopoOp::AddPoint(id));
        id
    }

    /// Replaces a staged point's position and zone.
    pub fn modify_point(
        &mut self,
        point: PointId,
        position: [f64; 3],
        zone: Option<PointZoneId>,
    ) -> Result<(), MeshMorphError> {
        self.check_point(point)?;
        let rec = &mut self.points[point.index()];
        rec.position = position;
        rec.zone = zone;
        rec.removed = false;
        rec.merge_into = None;
        self.journal.push(TopoOp::ModifyPoint(point));
        Ok(())
    }

    /// Marks a point for deletion. With `merge_into`, faces referencing the
    /// point are rewritten to the target at commit; without it, any remaining
    /// reference is a commit-time validation error.
    pub fn remove_point(
        &mut self,
        point: PointId,
        merge_into: Option<PointId>,
    ) -> Result<(), MeshMorphError> {
        self.check_point(point)?;
        if let Some(m) = merge_into {
            self.check_point(m)?;
        }
        let rec = &mut self.points[point.index()];
        rec.removed = true;
        rec.merge_into = merge_into;
        self.journal.push(match merge_into {
            Some(master) => TopoOp::MergePoints {
                master,
                slave: point,
            },
            None => TopoOp::RemovePoint(point),
        });
        Ok(())
    }

    /// Merges `slave` into `master`: the slave disappears and every face
    /// using it is rewritten to the master at commit.
    pub fn merge_points(
        &mut self,
        master: PointId,
        slave: PointId,
    ) -> Result<(), MeshMorphError> {
        self.remove_point(slave, Some(master))
    }

    /// Staged position of a point.
    pub fn point_position(&self, point: PointId) -> Result<[f64; 3], MeshMorphError> {
        self.check_point(point)?;
        Ok(self.points[point.index()].position)
    }

    /// True if the point is marked removed (or merged away).
    pub fn is_point_removed(&self, point: PointId) -> bool {
        self.points
            .get(point.index())
            .map(|r| r.removed)
            .unwrap_or(false)
    }

    // --- cell operations -----------------------------------------------------

    /// Registers a new cell. Its bounding faces are whichever staged faces
    /// name it as owner or neighbour at commit time.
    pub fn add_cell(&mut self, master: Option<CellId>, zone: Option<CellZoneId>) -> CellId {
        let id = CellId::new(self.cells.len());
        self.cells.push(CellRecord {
            master,
            zone,
            removed: false,
            merge_into: None,
        });
        self.journal.push(TopoOp::AddCell(id));
        id
    }

    /// Marks a cell for deletion. With `merge_into`, faces naming this cell
    /// are re-pointed to the target at commit; without it, any remaining
    /// reference is a commit-time validation error.
    pub fn remove_cell(
        &mut self,
        cell: CellId,
        merge_into: Option<CellId>,
    ) -> Result<(), MeshMorphError> {
        self.check_cell(cell)?;
        if let Some(m) = merge_into {
            self.check_cell(m)?;
        }
        let rec = &mut self.cells[cell.index()];
        rec.removed = true;
        rec.merge_into = merge_into;
        self.journal.push(TopoOp::RemoveCell(cell));
        Ok(())
    }

    /// True if the cell is marked removed (or merged away).
    pub fn is_cell_removed(&self, cell: CellId) -> bool {
        self.cells
            .get(cell.index())
            .map(|r| r.removed)
            .unwrap_or(false)
    }

    /// Staged cell-zone membership.
    pub fn cell_zone_of(&self, cell: CellId) -> Result<Option<CellZoneId>, MeshMorphError> {
        self.check_cell(cell)?;
        Ok(self.cells[cell.index()].zone)
    }

    // --- face operations -----------------------------------------------------

    /// Registers a new face.
    pub fn add_face(&mut self, def: FaceDef) -> FaceId {
        let id = FaceId::new(self.faces.len());
        self.faces.push(FaceRecord {
            verts: def.verts,
            owner: def.owner,
            neighbour: def.neighbour,
            patch: def.patch,
            zone: def.zone,
            master: def.master,
            flip_master: def.flip_master,
            removed: false,
            merge_into: None,
        });
        self.journal.push(TopoOp::AddFace(id));
        id
    }

    /// Replaces a staged face's definition in place. Modifying a removed
    /// face reinstates it.
    pub fn modify_face(&mut self, face: FaceId, def: FaceDef) -> Result<(), MeshMorphError> {
        self.check_face(face)?;
        let master = self.faces[face.index()].master.or(def.master);
        self.faces[face.index()] = FaceRecord {
            verts: def.verts,
            owner: def.owner,
            neighbour: def.neighbour,
            patch: def.patch,
            zone: def.zone,
            master,
            flip_master: def.flip_master,
            removed: false,
            merge_into: None,
        };
        self.journal.push(TopoOp::ModifyFace(face));
        Ok(())
    }

    /// Marks a face for deletion. `merge_into` records, for mapping only,
    /// the face this one was geometrically merged into.
    pub fn remove_face(
        &mut self,
        face: FaceId,
        merge_into: Option<FaceId>,
    ) -> Result<(), MeshMorphError> {
        self.check_face(face)?;
        if let Some(m) = merge_into {
            self.check_face(m)?;
        }
        let rec = &mut self.faces[face.index()];
        rec.removed = true;
        rec.merge_into = merge_into;
        self.journal.push(TopoOp::RemoveFace(face));
        Ok(())
    }

    /// Staged vertex loop of a face.
    pub fn face_verts(&self, face: FaceId) -> Result<&[PointId], MeshMorphError> {
        self.check_face(face)?;
        Ok(&self.faces[face.index()].verts)
    }

    /// Staged owner of a face.
    pub fn face_owner(&self, face: FaceId) -> Result<CellId, MeshMorphError> {
        self.check_face(face)?;
        Ok(self.faces[face.index()].owner)
    }

    /// Staged neighbour of a face (`None` for boundary faces).
    pub fn face_neighbour(&self, face: FaceId) -> Result<Option<CellId>, MeshMorphError> {
        self.check_face(face)?;
        Ok(self.faces[face.index()].neighbour)
    }

    /// Staged patch of a face (`None` for internal faces).
    pub fn face_patch(&self, face: FaceId) -> Result<Option<PatchId>, MeshMorphError> {
        self.check_face(face)?;
        Ok(self.faces[face.index()].patch)
    }

    /// Staged face-zone membership.
    pub fn face_zone_of(
        &self,
        face: FaceId,
    ) -> Result<Option<FaceZoneMembership>, MeshMorphError> {
        self.check_face(face)?;
        Ok(self.faces[face.index()].zone)
    }

    /// True if the face is marked removed.
    pub fn is_face_removed(&self, face: FaceId) -> bool {
        self.faces
            .get(face.index())
            .map(|r| r.removed)
            .unwrap_or(false)
    }

    // --- patches and zones ---------------------------------------------------

    /// Declares one more post-commit patch and returns its index.
    pub fn add_patch(&mut self, spec: PatchSpec) -> PatchId {
        let id = PatchId::new(self.patch_specs.len());
        self.patch_specs.push(spec);
        self.journal.push(TopoOp::AddPatch(id));
        id
    }

    /// Declares the post-commit patch count. Growing the table pads it with
    /// generic patches named `patch<N>`; shrinking truncates.
    pub fn set_patch_count(&mut self, n: usize) {
        while self.patch_specs.len() < n {
            let name = format!("patch{}", self.patch_specs.len());
            self.patch_specs.push(PatchSpec::new(name, PatchKind::Generic));
        }
        self.patch_specs.truncate(n);
        self.journal.push(TopoOp::SetPatchCount(n));
    }

    /// Post-commit patch table declared so far.
    pub fn patch_specs(&self) -> &[PatchSpec] {
        &self.patch_specs
    }

    /// Overrides the old→new patch correspondence recorded in the map
    /// (defaults to identity over the seeding mesh's patches).
    pub fn set_patch_map(
        &mut self,
        map: Vec<Option<PatchId>>,
    ) -> Result<(), MeshMorphError> {
        if map.len() != self.n_old_patches {
            return Err(MeshMorphError::PatchMapMismatch {
                expected: self.n_old_patches,
                found: map.len(),
            });
        }
        self.patch_map = map;
        Ok(())
    }

    /// Declares a new cell zone.
    pub fn add_cell_zone(&mut self, name: impl Into<String>) -> CellZoneId {
        self.cell_zone_names.push(name.into());
        CellZoneId::new(self.cell_zone_names.len() - 1)
    }

    /// Declares a new face zone.
    pub fn add_face_zone(&mut self, name: impl Into<String>) -> FaceZoneId {
        self.face_zone_names.push(name.into());
        FaceZoneId::new(self.face_zone_names.len() - 1)
    }

    /// Declares a new point zone.
    pub fn add_point_zone(&mut self, name: impl Into<String>) -> PointZoneId {
        self.point_zone_names.push(name.into());
        PointZoneId::new(self.point_zone_names.len() - 1)
    }
}

impl Default for TopoChange {
    fn default() -> Self {
        TopoChange::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::builder::{BlockMeshSpec, block_mesh};

    #[test]
    fn from_mesh_seeds_identity() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(2)).unwrap();
        let change = TopoChange::from_mesh(&mesh);
        assert_eq!(change.n_points(), mesh.n_points());
        assert_eq!(change.n_faces(), mesh.n_faces());
        assert_eq!(change.n_cells(), mesh.n_cells());
        assert_eq!(change.n_patches(), mesh.n_patches());
        assert!(change.journal().is_empty());
        let f = FaceId::new(0);
        assert_eq!(change.face_verts(f).unwrap(), mesh.face(f).verts());
        assert_eq!(change.face_owner(f).unwrap(), mesh.owner_of(f));
    }

    #[test]
    fn staged_ids_extend_old_space() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(1)).unwrap();
        let mut change = TopoChange::from_mesh(&mesh);
        let p = change.add_point([0.5, 0.5, 0.5], None, None);
        assert_eq!(p.index(), mesh.n_points());
        let c = change.add_cell(Some(CellId::new(0)), None);
        assert_eq!(c.index(), mesh.n_cells());
    }

    #[test]
    fn bounds_are_checked() {
        let mut change = TopoChange::new();
        assert!(matches!(
            change.remove_point(PointId::new(0), None),
            Err(MeshMorphError::PointOutOfRange { .. })
        ));
        assert!(matches!(
            change.remove_face(FaceId::new(3), None),
            Err(MeshMorphError::FaceOutOfRange { .. })
        ));
    }

    #[test]
    fn journal_records_insertion_order() {
        let mut change = TopoChange::new();
        let a = change.add_point([0.0; 3], None, None);
        let b = change.add_point([1.0; 3], None, None);
        change.merge_points(a, b).unwrap();
        assert_eq!(
            change.journal(),
            &[
                TopoOp::AddPoint(a),
                TopoOp::AddPoint(b),
                TopoOp::MergePoints { master: a, slave: b },
            ]
        );
    }

    #[test]
    fn set_patch_count_pads_with_generic() {
        let mut change = TopoChange::new();
        change.set_patch_count(2);
        assert_eq!(change.patch_specs().len(), 2);
        assert_eq!(change.patch_specs()[1].name, "patch1");
        assert_eq!(change.patch_specs()[1].kind, PatchKind::Generic);
    }
}
