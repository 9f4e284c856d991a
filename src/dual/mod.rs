//! Mesh dualisation: every point becomes a cell, every cell a point.
//!
//! The dual mesh is built from scratch into an empty
//! [`TopoChange`](crate::topo::TopoChange): dual points at cell centres,
//! at the centres of boundary and feature faces, at the midpoints of
//! boundary and feature edges, and at the original positions of boundary
//! points. Dual faces come from walking the face-cell-face cycle around
//! each original edge; feature faces split the walk into separate dual
//! faces so dual cells never straddle a feature. Boundary faces contribute
//! one patch face per (face, corner) pair, preserving the original patch
//! table.
//!
//! This policy only produces the request; committing it is the caller's
//! job, typically after a [`check_topo_change`] precondition pass.

use crate::mesh::PolyMesh;
use crate::mesh::geometry;
use crate::mesh::ids::{CellId, FaceId, PointId};
use crate::mesh_error::MeshMorphError;
use crate::topo::{FaceDef, TopoChange};
use hashbrown::{HashMap, HashSet};

/// Feature selection for [`DualMesher::set_refinement`].
#[derive(Clone, Debug, Default)]
pub struct DualFeatures {
    /// Treat every internal face as a feature face (full barycentric dual).
    pub split_all_faces: bool,
    /// Internal faces whose centres become dual points and split the
    /// around-edge walks.
    pub feature_faces: Vec<FaceId>,
    /// Edges (as point pairs) whose midpoints become dual points even when
    /// no surrounding face forces them.
    pub feature_edges: Vec<(PointId, PointId)>,
    /// Boundary points that must collapse to exactly one dual cell.
    pub single_cell_feature_points: Vec<PointId>,
    /// Points that get one dual cell per surrounding cell; every internal
    /// face around such a point must be a feature face.
    pub multi_cell_feature_points: Vec<PointId>,
}

/// The walk around one edge: faces and cells in pivot order. For a boundary
/// edge the walk is an open path with a boundary face at each end
/// (`faces.len() == cells.len() + 1`); for an interior edge it is a closed
/// ring (`faces.len() == cells.len()`, face `i` between cells `i-1` and `i`).
struct EdgeWalk {
    faces: Vec<FaceId>,
    cells: Vec<CellId>,
    boundary: bool,
}

/// Dual-mesh policy over one mesh.
pub struct DualMesher<'m> {
    mesh: &'m PolyMesh,
}

impl<'m> DualMesher<'m> {
    pub fn new(mesh: &'m PolyMesh) -> Self {
        DualMesher { mesh }
    }

    /// Stages the dual of the mesh into `change` (which should be empty).
    pub fn set_refinement(
        &self,
        features: &DualFeatures,
        change: &mut TopoChange,
    ) -> Result<(), MeshMorphError> {
        let mesh = self.mesh;
        let edges = mesh.edges();

        // -- resolve and validate features ------------------------------------
        let mut split_face = vec![false; mesh.n_faces()];
        for fi in mesh.n_internal_faces()..mesh.n_faces() {
            split_face[fi] = true;
        }
        if features.split_all_faces {
            split_face.iter_mut().for_each(|s| *s = true);
        }
        for f in &features.feature_faces {
            mesh.check_face(*f)?;
            split_face[f.index()] = true;
        }

        let mut single_cell: HashSet<PointId> = HashSet::new();
        for p in &features.single_cell_feature_points {
            mesh.check_point(*p)?;
            if !mesh.is_boundary_point(*p) {
                return Err(MeshMorphError::FeaturePointNotBoundary { point: *p });
            }
            single_cell.insert(*p);
        }
        let mut multi_cell: HashSet<PointId> = HashSet::new();
        for p in &features.multi_cell_feature_points {
            mesh.check_point(*p)?;
            if single_cell.contains(p) {
                continue; // single-cell wins; the point stays whole
            }
            for f in &mesh.point_faces()[p.index()] {
                if mesh.is_internal(*f) && !split_face[f.index()] {
                    return Err(MeshMorphError::MultiCellPointUnsplitFace {
                        point: *p,
                        face: *f,
                    });
                }
            }
            multi_cell.insert(*p);
        }

        // An edge needs a midpoint when its walk is split: boundary edges
        // always, interior edges when any surrounding face splits the ring.
        let mut need_mid = vec![false; edges.n_edges()];
        for e in 0..edges.n_edges() {
            need_mid[e] = edges
                .edge_faces(e)
                .iter()
                .any(|f| !mesh.is_internal(*f) || split_face[f.index()]);
        }
        for (a, b) in &features.feature_edges {
            let e = edges
                .edge_between(*a, *b)
                .ok_or(MeshMorphError::UnknownEdge { a: *a, b: *b })?;
            need_mid[e] = true;
        }

        // -- patches ----------------------------------------------------------
        if change.n_patches() == 0 {
            for p in mesh.patches() {
                change.add_patch(p.spec());
            }
        }

        // -- dual points ------------------------------------------------------
        let cell_centres = mesh.cell_centres();
        let face_centres = mesh.face_centres();
        let points = mesh.points();

        let cc: Vec<PointId> = (0..mesh.n_cells())
            .map(|c| change.add_point(cell_centres[c], None, None))
            .collect();
        let mut fc: Vec<Option<PointId>> = vec![None; mesh.n_faces()];
        for fi in 0..mesh.n_faces() {
            if split_face[fi] {
                fc[fi] = Some(change.add_point(face_centres[fi], None, None));
            }
        }
        let mut em: Vec<Option<PointId>> = vec![None; edges.n_edges()];
        for e in 0..edges.n_edges() {
            if need_mid[e] {
                let (a, b) = edges.endpoints(e);
                em[e] = Some(change.add_point(
                    geometry::midpoint(points[a.index()], points[b.index()]),
                    None,
                    None,
                ));
            }
        }
        // Dual points at original point positions: boundary points close the
        // boundary corner faces, multi-cell points anchor the corner faces
        // separating their per-cell dual chunks.
        let mut bp: Vec<Option<PointId>> = vec![None; mesh.n_points()];
        for pi in 0..mesh.n_points() {
            let p = PointId::new(pi);
            if mesh.is_boundary_point(p) || multi_cell.contains(&p) {
                bp[pi] = Some(change.add_point(points[pi], None, None));
            }
        }

        // -- dual cells -------------------------------------------------------
        // One per point; multi-cell feature points get one per point-cell.
        let mut whole_cell: Vec<Option<CellId>> = vec![None; mesh.n_points()];
        let mut per_cell: HashMap<(PointId, CellId), CellId> = HashMap::new();
        for pi in 0..mesh.n_points() {
            let p = PointId::new(pi);
            if multi_cell.contains(&p) {
                for c in &mesh.point_cells()[pi] {
                    per_cell.insert((p, *c), change.add_cell(None, None));
                }
            } else {
                whole_cell[pi] = Some(change.add_cell(None, None));
            }
        }
        let dual_cell = |p: PointId, c: CellId| -> CellId {
            match whole_cell[p.index()] {
                Some(dc) => dc,
                None => per_cell[&(p, c)],
            }
        };

        // -- dual faces around each edge --------------------------------------
        for e in 0..edges.n_edges() {
            let (p, q) = edges.endpoints(e);
            let walk = self.walk_edge(e)?;
            let splits: Vec<usize> = walk
                .faces
                .iter()
                .enumerate()
                .filter_map(|(i, f)| split_face[f.index()].then_some(i))
                .collect();

            let dir = geometry::sub(points[q.index()], points[p.index()]);
            let mut emit = |verts: Vec<PointId>,
                            anchor_cell: CellId,
                            change: &mut TopoChange|
             -> Result<(), MeshMorphError> {
                if verts.len() < 3 {
                    return Err(MeshMorphError::DegenerateDualFace {
                        a: p,
                        b: q,
                        n_verts: verts.len(),
                    });
                }
                let owner = dual_cell(p, anchor_cell);
                let neighbour = dual_cell(q, anchor_cell);
                let positions: Vec<[f64; 3]> = verts
                    .iter()
                    .map(|v| change.point_position(*v))
                    .collect::<Result<_, _>>()?;
                let ids: Vec<PointId> = (0..verts.len()).map(PointId::new).collect();
                let normal = geometry::face_area_vector(&ids, &positions);
                let mut verts = verts;
                if geometry::dot(normal, dir) < 0.0 {
                    verts.reverse();
                }
                change.add_face(FaceDef::internal(verts, owner, neighbour));
                Ok(())
            };

            if walk.boundary {
                // Open path: both ends are boundary faces (always split);
                // close each segment through the edge midpoint.
                let mid = em[e].expect("boundary edge has midpoint");
                for w in splits.windows(2) {
                    let (i, j) = (w[0], w[1]);
                    let mut verts = vec![mid, fc[walk.faces[i].index()].expect("split")];
                    for c in &walk.cells[i..j] {
                        verts.push(cc[c.index()]);
                    }
                    verts.push(fc[walk.faces[j].index()].expect("split"));
                    emit(verts, walk.cells[i], change)?;
                }
            } else if splits.is_empty() {
                // Undisturbed interior edge: one ring of cell centres.
                let verts: Vec<PointId> =
                    walk.cells.iter().map(|c| cc[c.index()]).collect();
                emit(verts, walk.cells[0], change)?;
            } else if splits.len() == 1 {
                // One split face cannot cut the ring in two; its centre
                // simply joins the ring between the two adjacent cells.
                let i = splits[0];
                let n = walk.cells.len();
                let mut verts = vec![fc[walk.faces[i].index()].expect("split")];
                for k in 0..n {
                    verts.push(cc[walk.cells[(i + k) % n].index()]);
                }
                emit(verts, walk.cells[i], change)?;
            } else {
                // Split ring: one pie slice per consecutive pair of split
                // faces, closed through the edge midpoint.
                let mid = em[e].expect("split interior edge has midpoint");
                let n = walk.faces.len();
                for (si, &i) in splits.iter().enumerate() {
                    let j = splits[(si + 1) % splits.len()];
                    let mut verts = vec![mid, fc[walk.faces[i].index()].expect("split")];
                    let mut k = i;
                    loop {
                        verts.push(cc[walk.cells[k].index()]);
                        k = (k + 1) % n;
                        if k == j {
                            break;
                        }
                    }
                    verts.push(fc[walk.faces[j].index()].expect("split"));
                    emit(verts, walk.cells[i], change)?;
                }
            }
        }

        // -- boundary corner faces --------------------------------------------
        for fi in mesh.n_internal_faces()..mesh.n_faces() {
            let f = FaceId::new(fi);
            let patch = mesh.patch_of(f).expect("boundary face has patch");
            let owner = mesh.owner_of(f);
            let verts = mesh.face(f).verts();
            let n = verts.len();
            for i in 0..n {
                let p = verts[i];
                let next = verts[(i + 1) % n];
                let prev = verts[(i + n - 1) % n];
                let e_next = edges
                    .edge_between(p, next)
                    .expect("face edge in edge table");
                let e_prev = edges
                    .edge_between(prev, p)
                    .expect("face edge in edge table");
                let quad = vec![
                    bp[p.index()].expect("boundary point"),
                    em[e_next].expect("boundary edge midpoint"),
                    fc[fi].expect("boundary face centre"),
                    em[e_prev].expect("boundary edge midpoint"),
                ];
                change.add_face(FaceDef::boundary(quad, dual_cell(p, owner), patch));
            }
        }

        // -- corner faces of multi-cell points on internal feature faces ------
        // A multi-cell point's per-cell dual chunks meet across each split
        // face; the quad through the point, the two edge midpoints and the
        // face centre separates them.
        for fi in 0..mesh.n_internal_faces() {
            if !split_face[fi] {
                continue;
            }
            let f = FaceId::new(fi);
            let owner = mesh.owner_of(f);
            let neighbour = mesh.neighbour_of(f).expect("internal face");
            let verts = mesh.face(f).verts();
            let n = verts.len();
            for i in 0..n {
                let p = verts[i];
                if !multi_cell.contains(&p) {
                    continue;
                }
                let next = verts[(i + 1) % n];
                let prev = verts[(i + n - 1) % n];
                let e_next = edges
                    .edge_between(p, next)
                    .expect("face edge in edge table");
                let e_prev = edges
                    .edge_between(prev, p)
                    .expect("face edge in edge table");
                let quad = vec![
                    bp[p.index()].expect("multi-cell point"),
                    em[e_next].expect("split face edge midpoint"),
                    fc[fi].expect("split face centre"),
                    em[e_prev].expect("split face edge midpoint"),
                ];
                change.add_face(FaceDef::internal(
                    quad,
                    dual_cell(p, owner),
                    dual_cell(p, neighbour),
                ));
            }
        }

        log::debug!(
            "staged dual mesh: {} dual cells, {} dual points",
            change.n_cells(),
            change.n_points(),
        );
        Ok(())
    }

    fn walk_edge(&self, e: usize) -> Result<EdgeWalk, MeshMorphError> {
        let mesh = self.mesh;
        let edges = mesh.edges();
        let around = edges.edge_faces(e);
        let (a, b) = edges.endpoints(e);

        // Each cell on the edge has exactly two of the surrounding faces.
        let mut faces_of_cell: HashMap<CellId, Vec<FaceId>> = HashMap::new();
        let mut boundary_faces = Vec::new();
        for f in around {
            faces_of_cell
                .entry(mesh.owner_of(*f))
                .or_default()
                .push(*f);
            match mesh.neighbour_of(*f) {
                Some(n) => {
                    faces_of_cell.entry(n).or_default().push(*f);
                }
                None => boundary_faces.push(*f),
            }
        }
        for faces in faces_of_cell.values() {
            if faces.len() != 2 {
                return Err(MeshMorphError::DegenerateDualFace {
                    a,
                    b,
                    n_verts: faces.len(),
                });
            }
        }
        let boundary = !boundary_faces.is_empty();
        if boundary && boundary_faces.len() != 2 {
            return Err(MeshMorphError::DegenerateDualFace {
                a,
                b,
                n_verts: boundary_faces.len(),
            });
        }

        let start = if boundary { boundary_faces[0] } else { around[0] };
        let mut faces = vec![start];
        let mut cells = Vec::new();
        let mut cell = mesh.owner_of(start);
        loop {
            cells.push(cell);
            let pair = &faces_of_cell[&cell];
            let last = *faces.last().expect("walk has faces");
            let next = if pair[0] == last { pair[1] } else { pair[0] };
            if !boundary && next == start {
                break; // ring closed
            }
            faces.push(next);
            if boundary && mesh.neighbour_of(next).is_none() {
                break; // reached the far boundary face
            }
            let own = mesh.owner_of(next);
            cell = if own == cell {
                mesh.neighbour_of(next).expect("internal face")
            } else {
                own
            };
        }

        Ok(EdgeWalk {
            faces,
            cells,
            boundary,
        })
    }
}

/// Precondition pass over an accumulated request: every live staged face
/// must have at least three vertices, no repeated vertex, and only live
/// points. Cheaper than a commit and safe to run before one.
pub fn check_topo_change(change: &TopoChange) -> Result<(), MeshMorphError> {
    for fi in 0..change.n_faces() {
        let f = FaceId::new(fi);
        if change.is_face_removed(f) {
            continue;
        }
        let verts = change.face_verts(f)?;
        if verts.len() < 3 {
            return Err(MeshMorphError::DegenerateFace {
                face: f,
                n_verts: verts.len(),
            });
        }
        let mut sorted = verts.to_vec();
        sorted.sort_unstable();
        if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(MeshMorphError::DuplicateFaceVertex { face: f, point: w[0] });
        }
        for v in verts {
            if change.is_point_removed(*v) {
                return Err(MeshMorphError::DanglingPoint { face: f, point: *v });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::builder::{BlockMeshSpec, block_mesh};
    use crate::topo::CommitOptions;

    #[test]
    fn dual_of_single_hex_is_eight_octants() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(1)).unwrap();
        let mut change = TopoChange::new();
        DualMesher::new(&mesh)
            .set_refinement(&DualFeatures::default(), &mut change)
            .unwrap();
        check_topo_change(&change).unwrap();
        let (dual, _) = change.apply(&CommitOptions::default()).unwrap();

        assert_eq!(dual.n_cells(), 8);
        // 1 cell centre + 6 face centres + 12 edge midpoints + 8 corners.
        assert_eq!(dual.n_points(), 27);
        assert!((dual.total_volume() - 1.0).abs() < 1e-12);
        for v in dual.cell_volumes() {
            assert!((*v - 0.125).abs() < 1e-12);
        }
        crate::mesh::check::check_mesh(
            &dual,
            &crate::mesh::check::MeshCheckOptions::default(),
        )
        .unwrap();
    }

    #[test]
    fn walk_around_interior_edge_is_a_ring() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(2)).unwrap();
        let edges = mesh.edges();
        // The edge through the block centre along z.
        let centre = mesh
            .points()
            .iter()
            .position(|p| p == &[0.5, 0.5, 0.5])
            .map(PointId::new)
            .unwrap();
        let above = mesh
            .points()
            .iter()
            .position(|p| p == &[0.5, 0.5, 1.0])
            .map(PointId::new)
            .unwrap();
        let e = edges.edge_between(centre, above).unwrap();
        let walk = DualMesher::new(&mesh).walk_edge(e).unwrap();
        assert!(!walk.boundary);
        assert_eq!(walk.cells.len(), 4);
        assert_eq!(walk.faces.len(), 4);
    }
}
