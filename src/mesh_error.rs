//! MeshMorphError: unified error type for mesh-morph public APIs.
//!
//! Every fallible operation in the library reports through this enum; there
//! are no process-aborting error paths. Validation and precondition failures
//! carry the offending entity indices so callers can log and abort a single
//! topology-change step instead of the whole run.

use crate::mesh::ids::{CellId, FaceId, PatchId, PointId};
use thiserror::Error;

/// Unified error type for mesh-morph operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshMorphError {
    // --- index bounds -------------------------------------------------------
    /// A point index outside the addressed point range.
    #[error("point index {point} out of range (mesh/change has {n_points} points)")]
    PointOutOfRange { point: usize, n_points: usize },
    /// A face index outside the addressed face range.
    #[error("face index {face} out of range (mesh/change has {n_faces} faces)")]
    FaceOutOfRange { face: usize, n_faces: usize },
    /// A cell index outside the addressed cell range.
    #[error("cell index {cell} out of range (mesh/change has {n_cells} cells)")]
    CellOutOfRange { cell: usize, n_cells: usize },
    /// A patch index outside the declared patch table.
    #[error("patch index {patch} out of range ({n_patches} patches declared)")]
    PatchOutOfRange { patch: usize, n_patches: usize },
    /// A zone index outside the zone table.
    #[error("zone index {zone} out of range ({n_zones} zones)")]
    ZoneOutOfRange { zone: usize, n_zones: usize },

    // --- request validation (detected at commit) ----------------------------
    /// A face vertex loop references a removed point.
    #[error("face {face} references removed point {point}")]
    DanglingPoint { face: FaceId, point: PointId },
    /// A face's owner cell was removed without a merge target.
    #[error("face {face} owned by removed cell {cell}")]
    DanglingOwner { face: FaceId, cell: CellId },
    /// A face's neighbour cell was removed without a merge target.
    #[error("face {face} neighbours removed cell {cell}")]
    DanglingNeighbour { face: FaceId, cell: CellId },
    /// A face vertex loop with fewer than three distinct points.
    #[error("face {face} degenerate: {n_verts} distinct vertices (minimum 3)")]
    DegenerateFace { face: FaceId, n_verts: usize },
    /// A face vertex loop visiting the same point twice (non-consecutively).
    #[error("face {face} visits point {point} more than once")]
    DuplicateFaceVertex { face: FaceId, point: PointId },
    /// A face declaring both or neither of neighbour and patch.
    #[error("face {face} must have exactly one of neighbour (internal) or patch (boundary)")]
    FaceRegionConflict { face: FaceId },
    /// A face whose owner and neighbour resolve to the same cell.
    #[error("face {face} has cell {cell} on both sides after merge resolution")]
    SelfAdjacentFace { face: FaceId, cell: CellId },
    /// A merge chain that loops back on itself.
    #[error("{entity} {index}: merge chain contains a cycle")]
    MergeCycle { entity: &'static str, index: usize },
    /// A merge whose final target is itself removed.
    #[error("{entity} {index} merged into removed {entity} {target}")]
    MergeIntoRemoved {
        entity: &'static str,
        index: usize,
        target: usize,
    },
    /// A surviving cell bounded by fewer faces than a closed polyhedron needs.
    #[error("cell {cell} bounded by only {n_faces} faces (minimum 4)")]
    CellWithoutFaces { cell: CellId, n_faces: usize },
    /// Declared patch count disagrees with the described patch table.
    #[error("patch count {declared} declared but {described} patches described")]
    PatchTableMismatch { declared: usize, described: usize },
    /// A supplied old-to-new patch map of the wrong length.
    #[error("patch map covers {found} old patches, expected {expected}")]
    PatchMapMismatch { expected: usize, found: usize },

    // --- mesh construction ---------------------------------------------------
    /// Owner list length disagrees with the face list.
    #[error("owner list has {n_owner} entries for {n_faces} faces")]
    OwnerCountMismatch { n_owner: usize, n_faces: usize },
    /// Neighbour list longer than the face list.
    #[error("neighbour list has {n_neighbour} entries for {n_faces} faces")]
    NeighbourCountMismatch { n_neighbour: usize, n_faces: usize },
    /// Patch ranges must tile the boundary contiguously in patch order.
    #[error("patch {patch} starts at face {start}, expected {expected}")]
    PatchNotContiguous {
        patch: PatchId,
        start: usize,
        expected: usize,
    },
    /// Patch ranges do not cover the whole boundary.
    #[error("patches cover {covered} boundary faces of {n_boundary}")]
    BoundaryNotCovered { covered: usize, n_boundary: usize },
    /// A face zone whose flip list disagrees with its face list.
    #[error("face zone '{zone}': {faces} faces but {flips} flip flags")]
    ZoneLengthMismatch {
        zone: String,
        faces: usize,
        flips: usize,
    },

    // --- consistency checks --------------------------------------------------
    /// A cell whose face area vectors do not sum to (near) zero.
    #[error("cell {cell} not closed: residual area magnitude {closure}")]
    OpenCell { cell: CellId, closure: f64 },
    /// A cell with non-positive volume.
    #[error("cell {cell} has non-positive volume {volume}")]
    NegativeVolume { cell: CellId, volume: f64 },
    /// Total volume drifted across a topology change.
    #[error("volume not conserved: {before} before, {after} after")]
    VolumeNotConserved { before: f64, after: f64 },
    /// Two face-adjacent cells whose refinement levels differ too much.
    #[error(
        "refinement balance violated between cell {a} (level {level_a}) and cell {b} (level {level_b}), limit {limit}"
    )]
    BalanceViolation {
        a: CellId,
        b: CellId,
        level_a: u32,
        level_b: u32,
        limit: u32,
    },
    /// Internal faces not in upper-triangular (owner, neighbour) order.
    #[error("face {face} breaks upper-triangular internal face ordering")]
    NotUpperTriangular { face: FaceId },

    // --- refinement ----------------------------------------------------------
    /// A cell selected for 2x2x2 refinement that is not a hexahedron.
    #[error("cell {cell} is not topologically a hexahedron")]
    NotAHexahedron { cell: CellId },
    /// Anchor/midpoint pattern around a cell inconsistent with 2:1 balance.
    #[error("cell {cell}: split pattern around cell is not 2:1-consistent")]
    RefinementPattern { cell: CellId },
    /// A level array of the wrong length for the mesh it describes.
    #[error("{what} level list has {found} entries, mesh has {expected}")]
    LevelCountMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    /// A refiner already holds an uncommitted batch.
    #[error("refiner already has a pending batch; apply and update first")]
    PendingChangeInProgress,
    /// A point passed to unrefinement that is not a recorded split point.
    #[error("point {point} is not the centre of a complete split octet")]
    NotASplitPoint { point: PointId },

    // --- face/cell removal ---------------------------------------------------
    /// A boundary face passed where an internal face is required.
    #[error("face {face} is not an internal face")]
    NotInternalFace { face: FaceId },
    /// A face joining two cells of one merge region that was not scheduled.
    #[error("face {face} joins cells of one region but was not scheduled for removal")]
    RegionClosureBroken { face: FaceId },
    /// A point left with an impossible face-usage count after merging.
    #[error("point {point} used by {count} faces after merging")]
    PointUsage { point: PointId, count: usize },
    /// Exposed-face list and patch assignment list of different lengths.
    #[error("{faces} exposed faces but {patches} patch assignments")]
    ExposedPatchMismatch { faces: usize, patches: usize },

    // --- dualisation ---------------------------------------------------------
    /// An around-edge walk that would produce a face with too few vertices.
    #[error("dual face around edge ({a}, {b}) degenerate: {n_verts} vertices")]
    DegenerateDualFace {
        a: PointId,
        b: PointId,
        n_verts: usize,
    },
    /// A feature point that is not on the boundary.
    #[error("feature point {point} is not a boundary point")]
    FeaturePointNotBoundary { point: PointId },
    /// A multi-cell feature point surrounded by a non-feature internal face.
    #[error("multi-cell feature point {point}: internal face {face} is not a feature face")]
    MultiCellPointUnsplitFace { point: PointId, face: FaceId },
    /// An edge lookup for a point pair that is not a mesh edge.
    #[error("no mesh edge between points {a} and {b}")]
    UnknownEdge { a: PointId, b: PointId },

    // --- field mapping -------------------------------------------------------
    /// A field of the wrong length for its location.
    #[error("{location} field has {found} entries, expected {expected}")]
    FieldSizeMismatch {
        location: &'static str,
        expected: usize,
        found: usize,
    },

    // --- persistence ---------------------------------------------------------
    /// File-level failure while reading or writing persisted data.
    #[error("persistence failure for '{path}': {detail}")]
    Persistence { path: String, detail: String },
}
