//! Polyhedral mesh storage and derived addressing.
//!
//! A [`PolyMesh`] stores points, faces (vertex loops), the owner cell of
//! every face and the neighbour cell of every internal face, plus the patch
//! table and zones. Cells are implicit: a cell is exactly the set of faces
//! that declare it as owner or neighbour.
//!
//! # Layout invariants
//! - Internal faces occupy indices `[0, n_internal_faces)` with no gaps.
//! - Boundary faces are grouped contiguously per patch, patches in ascending
//!   index order, tiling `[n_internal_faces, n_faces)`.
//! - Every face loop has at least 3 distinct vertices.
//!
//! Derived addressing (cell↔face, point↔face, edges) and geometry (centres,
//! areas, volumes) are computed lazily and cached; any mutation goes through
//! `&mut self` and resets the affected caches, so stale derived data cannot
//! be observed.

pub mod builder;
pub mod cache;
pub mod check;
pub mod face;
pub mod geometry;
pub mod ids;
pub mod patch;
pub mod shape;
pub mod zone;

use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshMorphError;
use cache::InvalidateCache;
use face::Face;
use hashbrown::HashMap;
use ids::{CellId, FaceId, PatchId, PointId};
use once_cell::sync::OnceCell;
use patch::Patch;
use zone::{CellZone, FaceZone, PointZone};

/// Edge addressing derived from the face loops.
///
/// Edges are undirected; endpoints are stored with the smaller id first.
/// Edge order is deterministic: first appearance while walking faces in
/// index order.
#[derive(Clone, Debug, Default)]
pub struct EdgeTable {
    endpoints: Vec<(PointId, PointId)>,
    index: HashMap<(PointId, PointId), usize>,
    face_edges: Vec<Vec<usize>>,
    edge_faces: Vec<Vec<FaceId>>,
    point_edges: Vec<Vec<usize>>,
}

impl EdgeTable {
    fn build(faces: &[Face], n_points: usize) -> Self {
        let mut endpoints = Vec::new();
        let mut index: HashMap<(PointId, PointId), usize> = HashMap::new();
        let mut face_edges = Vec::with_capacity(faces.len());
        let mut edge_faces: Vec<Vec<FaceId>> = Vec::new();
        let mut point_edges: Vec<Vec<usize>> = vec![Vec::new(); n_points];

        for (fi, f) in faces.iter().enumerate() {
            let mut this_face = Vec::with_capacity(f.len());
            for (a, b) in f.edges() {
                let key = if a < b { (a, b) } else { (b, a) };
                let e = *index.entry(key).or_insert_with(|| {
                    endpoints.push(key);
                    edge_faces.push(Vec::new());
                    point_edges[key.0.index()].push(endpoints.len() - 1);
                    point_edges[key.1.index()].push(endpoints.len() - 1);
                    endpoints.len() - 1
                });
                edge_faces[e].push(FaceId::new(fi));
                this_face.push(e);
            }
            face_edges.push(this_face);
        }

        EdgeTable {
            endpoints,
            index,
            face_edges,
            edge_faces,
            point_edges,
        }
    }

    /// Number of distinct edges.
    pub fn n_edges(&self) -> usize {
        self.endpoints.len()
    }

    /// Endpoints of edge `e`, smaller id first.
    pub fn endpoints(&self, e: usize) -> (PointId, PointId) {
        self.endpoints[e]
    }

    /// Edge index between two points, if they are connected.
    pub fn edge_between(&self, a: PointId, b: PointId) -> Option<usize> {
        let key = if a < b { (a, b) } else { (b, a) };
        self.index.get(&key).copied()
    }

    /// Edges of face `f`, parallel to the face's directed edges.
    pub fn face_edges(&self, f: FaceId) -> &[usize] {
        &self.face_edges[f.index()]
    }

    /// Faces using edge `e`, in face-index discovery order.
    pub fn edge_faces(&self, e: usize) -> &[FaceId] {
        &self.edge_faces[e]
    }

    /// Edges incident to point `p`.
    pub fn point_edges(&self, p: PointId) -> &[usize] {
        &self.point_edges[p.index()]
    }
}

#[derive(Clone, Debug, Default)]
struct TopoCache {
    cell_faces: OnceCell<Vec<Vec<FaceId>>>,
    cell_points: OnceCell<Vec<Vec<PointId>>>,
    point_faces: OnceCell<Vec<Vec<FaceId>>>,
    point_cells: OnceCell<Vec<Vec<CellId>>>,
    edges: OnceCell<EdgeTable>,
}

#[derive(Clone, Debug, Default)]
struct GeomCache {
    face_centres: OnceCell<Vec<[f64; 3]>>,
    face_areas: OnceCell<Vec<[f64; 3]>>,
    cell_geometry: OnceCell<(Vec<[f64; 3]>, Vec<f64>)>,
}

/// An unstructured polyhedral mesh with owner/neighbour face addressing.
#[derive(Clone, Debug)]
pub struct PolyMesh {
    points: Vec<[f64; 3]>,
    faces: Vec<Face>,
    owner: Vec<CellId>,
    neighbour: Vec<CellId>,
    n_cells: usize,
    patches: Vec<Patch>,
    cell_zones: Vec<CellZone>,
    face_zones: Vec<FaceZone>,
    point_zones: Vec<PointZone>,
    topo: TopoCache,
    geom: GeomCache,
}

impl PolyMesh {
    /// Builds a mesh and validates the layout invariants.
    ///
    /// `neighbour` covers exactly the internal faces; `patches` must tile
    /// the remaining (boundary) face range contiguously in patch order.
    pub fn new(
        points: Vec<[f64; 3]>,
        faces: Vec<Face>,
        owner: Vec<CellId>,
        neighbour: Vec<CellId>,
        patches: Vec<Patch>,
    ) -> Result<Self, MeshMorphError> {
        let n_cells = owner
            .iter()
            .chain(neighbour.iter())
            .map(|c| c.index() + 1)
            .max()
            .unwrap_or(0);
        let mesh = PolyMesh {
            points,
            faces,
            owner,
            neighbour,
            n_cells,
            patches,
            cell_zones: Vec::new(),
            face_zones: Vec::new(),
            point_zones: Vec::new(),
            topo: TopoCache::default(),
            geom: GeomCache::default(),
        };
        mesh.validate_invariants()?;
        Ok(mesh)
    }

    /// Attaches zones, validating membership against the mesh extents.
    pub fn with_zones(
        mut self,
        cell_zones: Vec<CellZone>,
        face_zones: Vec<FaceZone>,
        point_zones: Vec<PointZone>,
    ) -> Result<Self, MeshMorphError> {
        for z in &cell_zones {
            for c in &z.cells {
                self.check_cell(*c)?;
            }
        }
        for z in &face_zones {
            if z.faces.len() != z.flipped.len() {
                return Err(MeshMorphError::ZoneLengthMismatch {
                    zone: z.name.clone(),
                    faces: z.faces.len(),
                    flips: z.flipped.len(),
                });
            }
            for f in &z.faces {
                self.check_face(*f)?;
            }
        }
        for z in &point_zones {
            for p in &z.points {
                self.check_point(*p)?;
            }
        }
        self.cell_zones = cell_zones;
        self.face_zones = face_zones;
        self.point_zones = point_zones;
        Ok(self)
    }

    // --- extents -------------------------------------------------------------

    #[inline]
    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    #[inline]
    pub fn n_internal_faces(&self) -> usize {
        self.neighbour.len()
    }

    #[inline]
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    #[inline]
    pub fn n_patches(&self) -> usize {
        self.patches.len()
    }

    // --- primitive access ----------------------------------------------------

    #[inline]
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    #[inline]
    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    #[inline]
    pub fn face(&self, f: FaceId) -> &Face {
        &self.faces[f.index()]
    }

    #[inline]
    pub fn owner(&self) -> &[CellId] {
        &self.owner
    }

    #[inline]
    pub fn owner_of(&self, f: FaceId) -> CellId {
        self.owner[f.index()]
    }

    /// Neighbour cell of an internal face; `None` for boundary faces.
    #[inline]
    pub fn neighbour_of(&self, f: FaceId) -> Option<CellId> {
        self.neighbour.get(f.index()).copied()
    }

    #[inline]
    pub fn is_internal(&self, f: FaceId) -> bool {
        f.index() < self.neighbour.len()
    }

    #[inline]
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    #[inline]
    pub fn patch(&self, p: PatchId) -> &Patch {
        &self.patches[p.index()]
    }

    /// Patch containing boundary face `f`; `None` for internal faces.
    pub fn patch_of(&self, f: FaceId) -> Option<PatchId> {
        if self.is_internal(f) {
            return None;
        }
        self.patches
            .iter()
            .position(|p| p.contains(f.index()))
            .map(PatchId::new)
    }

    pub fn cell_zones(&self) -> &[CellZone] {
        &self.cell_zones
    }

    pub fn face_zones(&self) -> &[FaceZone] {
        &self.face_zones
    }

    pub fn point_zones(&self) -> &[PointZone] {
        &self.point_zones
    }

    /// Looks up a cell zone by name.
    pub fn cell_zone(&self, name: &str) -> Option<&CellZone> {
        self.cell_zones.iter().find(|z| z.name == name)
    }

    // --- bounds checks -------------------------------------------------------

    pub(crate) fn check_point(&self, p: PointId) -> Result<(), MeshMorphError> {
        if p.index() >= self.points.len() {
            return Err(MeshMorphError::PointOutOfRange {
                point: p.index(),
                n_points: self.points.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn check_face(&self, f: FaceId) -> Result<(), MeshMorphError> {
        if f.index() >= self.faces.len() {
            return Err(MeshMorphError::FaceOutOfRange {
                face: f.index(),
                n_faces: self.faces.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn check_cell(&self, c: CellId) -> Result<(), MeshMorphError> {
        if c.index() >= self.n_cells {
            return Err(MeshMorphError::CellOutOfRange {
                cell: c.index(),
                n_cells: self.n_cells,
            });
        }
        Ok(())
    }

    // --- derived addressing --------------------------------------------------

    /// Bounding faces per cell, in face-index order.
    pub fn cell_faces(&self) -> &[Vec<FaceId>] {
        self.topo.cell_faces.get_or_init(|| {
            let mut cf: Vec<Vec<FaceId>> = vec![Vec::new(); self.n_cells];
            for (fi, c) in self.owner.iter().enumerate() {
                cf[c.index()].push(FaceId::new(fi));
            }
            for (fi, c) in self.neighbour.iter().enumerate() {
                cf[c.index()].push(FaceId::new(fi));
            }
            for faces in &mut cf {
                faces.sort_unstable();
            }
            cf
        })
    }

    /// Distinct points per cell, ascending.
    pub fn cell_points(&self) -> &[Vec<PointId>] {
        self.topo.cell_points.get_or_init(|| {
            let cell_faces = self.cell_faces();
            let mut cp = Vec::with_capacity(self.n_cells);
            for faces in cell_faces {
                let mut pts: Vec<PointId> = faces
                    .iter()
                    .flat_map(|f| self.faces[f.index()].verts().iter().copied())
                    .collect();
                pts.sort_unstable();
                pts.dedup();
                cp.push(pts);
            }
            cp
        })
    }

    /// Faces using each point, in face-index order.
    pub fn point_faces(&self) -> &[Vec<FaceId>] {
        self.topo.point_faces.get_or_init(|| {
            let mut pf: Vec<Vec<FaceId>> = vec![Vec::new(); self.points.len()];
            for (fi, f) in self.faces.iter().enumerate() {
                for v in f.verts() {
                    pf[v.index()].push(FaceId::new(fi));
                }
            }
            pf
        })
    }

    /// Distinct cells around each point, ascending.
    pub fn point_cells(&self) -> &[Vec<CellId>] {
        self.topo.point_cells.get_or_init(|| {
            let point_faces = self.point_faces();
            let mut pc = Vec::with_capacity(self.points.len());
            for faces in point_faces {
                let mut cells: Vec<CellId> = Vec::with_capacity(faces.len());
                for f in faces {
                    cells.push(self.owner[f.index()]);
                    if let Some(n) = self.neighbour_of(*f) {
                        cells.push(n);
                    }
                }
                cells.sort_unstable();
                cells.dedup();
                pc.push(cells);
            }
            pc
        })
    }

    /// Edge addressing derived from the face loops.
    pub fn edges(&self) -> &EdgeTable {
        self.topo
            .edges
            .get_or_init(|| EdgeTable::build(&self.faces, self.points.len()))
    }

    /// Distinct edges of cell `c`, ascending edge index.
    pub fn cell_edges(&self, c: CellId) -> Vec<usize> {
        let edges = self.edges();
        let mut out: Vec<usize> = self.cell_faces()[c.index()]
            .iter()
            .flat_map(|f| edges.face_edges(*f).iter().copied())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// True if `p` lies on at least one boundary face.
    pub fn is_boundary_point(&self, p: PointId) -> bool {
        self.point_faces()[p.index()]
            .iter()
            .any(|f| !self.is_internal(*f))
    }

    // --- derived geometry ----------------------------------------------------

    /// Face centroids.
    pub fn face_centres(&self) -> &[[f64; 3]] {
        self.geom.face_centres.get_or_init(|| {
            self.faces
                .iter()
                .map(|f| f.centre(&self.points))
                .collect()
        })
    }

    /// Face area vectors (owner → neighbour / outward).
    pub fn face_area_vectors(&self) -> &[[f64; 3]] {
        self.geom.face_areas.get_or_init(|| {
            self.faces
                .iter()
                .map(|f| f.area_vector(&self.points))
                .collect()
        })
    }

    fn cell_geometry(&self) -> &(Vec<[f64; 3]>, Vec<f64>) {
        self.geom.cell_geometry.get_or_init(|| {
            geometry::cell_centres_and_volumes(
                self.cell_faces(),
                &self.owner,
                self.face_centres(),
                self.face_area_vectors(),
            )
        })
    }

    /// Cell centroids.
    pub fn cell_centres(&self) -> &[[f64; 3]] {
        &self.cell_geometry().0
    }

    /// Cell volumes (signed; positive for well-oriented cells).
    pub fn cell_volumes(&self) -> &[f64] {
        &self.cell_geometry().1
    }

    /// Sum of all cell volumes.
    pub fn total_volume(&self) -> f64 {
        self.cell_volumes().iter().sum()
    }

    // --- mutation ------------------------------------------------------------

    /// Replaces all point positions, keeping topology. Invalidates derived
    /// geometry only.
    pub fn move_points(&mut self, new_points: Vec<[f64; 3]>) -> Result<(), MeshMorphError> {
        if new_points.len() != self.points.len() {
            return Err(MeshMorphError::LevelCountMismatch {
                what: "point position",
                expected: self.points.len(),
                found: new_points.len(),
            });
        }
        self.points = new_points;
        self.geom = GeomCache::default();
        Ok(())
    }
}

impl InvalidateCache for PolyMesh {
    fn invalidate_cache(&mut self) {
        self.topo = TopoCache::default();
        self.geom = GeomCache::default();
    }
}

/// Structural equality: primitives, patches and zones; caches are ignored.
impl PartialEq for PolyMesh {
    fn eq(&self, other: &Self) -> bool {
        self.points == other.points
            && self.faces == other.faces
            && self.owner == other.owner
            && self.neighbour == other.neighbour
            && self.patches == other.patches
            && self.cell_zones == other.cell_zones
            && self.face_zones == other.face_zones
            && self.point_zones == other.point_zones
    }
}

impl DebugInvariants for PolyMesh {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "PolyMesh");
    }

    fn validate_invariants(&self) -> Result<(), MeshMorphError> {
        let n_faces = self.faces.len();
        let n_internal = self.neighbour.len();
        if self.owner.len() != n_faces {
            return Err(MeshMorphError::OwnerCountMismatch {
                n_owner: self.owner.len(),
                n_faces,
            });
        }
        if n_internal > n_faces {
            return Err(MeshMorphError::NeighbourCountMismatch {
                n_neighbour: n_internal,
                n_faces,
            });
        }

        // Face loops reference live points and are non-degenerate.
        for (fi, f) in self.faces.iter().enumerate() {
            if f.len() < 3 {
                return Err(MeshMorphError::DegenerateFace {
                    face: FaceId::new(fi),
                    n_verts: f.len(),
                });
            }
            for v in f.verts() {
                self.check_point(*v)?;
            }
        }

        // Internal faces join two distinct cells, owner < neighbour, in
        // upper-triangular order.
        let mut previous = (0usize, 0usize);
        for (fi, n) in self.neighbour.iter().enumerate() {
            if self.owner[fi] == *n {
                return Err(MeshMorphError::SelfAdjacentFace {
                    face: FaceId::new(fi),
                    cell: *n,
                });
            }
            let key = (self.owner[fi].index(), n.index());
            if key.0 >= key.1 || key < previous {
                return Err(MeshMorphError::NotUpperTriangular {
                    face: FaceId::new(fi),
                });
            }
            previous = key;
        }

        // Patches tile the boundary contiguously in patch order.
        let mut expected = n_internal;
        for (pi, p) in self.patches.iter().enumerate() {
            if p.start != expected {
                return Err(MeshMorphError::PatchNotContiguous {
                    patch: PatchId::new(pi),
                    start: p.start,
                    expected,
                });
            }
            expected += p.len;
            if let patch::PatchKind::Cyclic { partner } = &p.kind {
                if partner.index() >= self.patches.len() {
                    return Err(MeshMorphError::PatchOutOfRange {
                        patch: partner.index(),
                        n_patches: self.patches.len(),
                    });
                }
            }
        }
        if expected != n_faces {
            return Err(MeshMorphError::BoundaryNotCovered {
                covered: expected - n_internal,
                n_boundary: n_faces - n_internal,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::builder::{BlockMeshSpec, block_mesh};
    use super::*;

    #[test]
    fn single_hex_extents() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(1)).unwrap();
        assert_eq!(mesh.n_points(), 8);
        assert_eq!(mesh.n_faces(), 6);
        assert_eq!(mesh.n_internal_faces(), 0);
        assert_eq!(mesh.n_cells(), 1);
        assert_eq!(mesh.n_patches(), 6);
        assert!((mesh.total_volume() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn block_mesh_addressing() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(2)).unwrap();
        assert_eq!(mesh.n_cells(), 8);
        assert_eq!(mesh.n_points(), 27);
        // 3 interior planes of 4 faces each.
        assert_eq!(mesh.n_internal_faces(), 12);
        assert_eq!(mesh.n_faces(), 12 + 24);
        for faces in mesh.cell_faces() {
            assert_eq!(faces.len(), 6);
        }
        for pts in mesh.cell_points() {
            assert_eq!(pts.len(), 8);
        }
        // Interior point shared by all 8 cells.
        let interior = mesh
            .points()
            .iter()
            .position(|p| {
                (p[0] - 0.5).abs() < 1e-12
                    && (p[1] - 0.5).abs() < 1e-12
                    && (p[2] - 0.5).abs() < 1e-12
            })
            .map(PointId::new)
            .unwrap();
        assert_eq!(mesh.point_cells()[interior.index()].len(), 8);
        assert!(!mesh.is_boundary_point(interior));
        assert!((mesh.total_volume() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn edge_table_on_unit_cube() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(1)).unwrap();
        let edges = mesh.edges();
        assert_eq!(edges.n_edges(), 12);
        for e in 0..edges.n_edges() {
            assert_eq!(edges.edge_faces(e).len(), 2);
            let (a, b) = edges.endpoints(e);
            assert_eq!(edges.edge_between(a, b), Some(e));
            assert_eq!(edges.edge_between(b, a), Some(e));
        }
        assert_eq!(mesh.cell_edges(CellId::new(0)).len(), 12);
    }

    #[test]
    fn move_points_invalidates_geometry() {
        let mut mesh = block_mesh(&BlockMeshSpec::unit_cube(1)).unwrap();
        assert!((mesh.total_volume() - 1.0).abs() < 1e-12);
        let stretched: Vec<[f64; 3]> = mesh
            .points()
            .iter()
            .map(|p| [2.0 * p[0], p[1], p[2]])
            .collect();
        mesh.move_points(stretched).unwrap();
        assert!((mesh.total_volume() - 2.0).abs() < 1e-12);
    }
}
