//! # mesh-morph
//!
//! mesh-morph is a transactional topology-change engine for unstructured
//! polyhedral meshes, built for solvers that adapt their mesh while fields
//! live on it. It provides the mesh representation (owner/neighbour face
//! addressing, patches, zones), an arena-style change request that policies
//! fill without touching the live mesh, a commit engine that validates and
//! renumbers into a canonical layout, and the transfer maps that drive
//! field re-sampling afterwards.
//!
//! ## Subsystems
//! - [`mesh`]: `PolyMesh`, patches, zones, derived addressing and geometry
//!   behind invalidate-on-commit caches, consistency checks, a block-mesh
//!   builder.
//! - [`topo`]: `TopoChange` (the request), `TopoChange::apply` (the commit),
//!   `MeshMap` (the old↔new correspondence).
//! - [`refine`]: 2x2x2 hexahedral refinement with persistent levels, 2:1
//!   balancing, history-backed unrefinement, and multi-pass drivers.
//! - [`remove`]: face removal (cell merging) and cell removal (exposure).
//! - [`dual`]: mesh dualisation with feature handling.
//! - [`fields`]: re-sampling of cell/face/point fields through a `MeshMap`.
//! - [`comm`]: the collective-reduction façade making rank-synchronous
//!   operations explicit (`NoComm`, `LocalComm`, optional MPI backend).
//! - [`io`]: OBJ dumps of pending changes for diagnosing rejected requests.
//!
//! ## Transactional contract
//! A commit either fully validates and produces a new mesh plus its map, or
//! returns an error and leaves everything untouched. There are no aborts
//! and no partially mutated meshes; callers that want to survive a rejected
//! step just keep using the old mesh.
//!
//! ## Typical cycle
//! ```no_run
//! use mesh_morph::prelude::*;
//!
//! # fn run() -> Result<(), mesh_morph::mesh_error::MeshMorphError> {
//! let mut mesh = block_mesh(&BlockMeshSpec::unit_cube(4))?;
//! let mut refiner = HexRefiner::new(&mesh);
//!
//! let picked = vec![CellId::new(5), CellId::new(12)];
//! let set = refiner.consistent_refinement(&mesh, &picked, &NoComm, true, 2)?;
//!
//! let mut change = TopoChange::from_mesh(&mesh);
//! refiner.set_refinement(&mesh, &set, &mut change)?;
//! let (new_mesh, map) = change.apply(&CommitOptions::default())?;
//! refiner.update(&map)?;
//!
//! // Field re-sampling is the caller's job, through the map.
//! let volumes = mesh.cell_volumes().to_vec();
//! let field = vec![1.0f64; mesh.n_cells()];
//! let mapped = FieldMapper::new(&map)
//!     .with_cell_volumes(&volumes)
//!     .map_cell_scalar(&field)?;
//! # let _ = mapped;
//!
//! mesh = new_mesh;
//! if let Some(targets) = map.motion_points() {
//!     mesh.move_points(targets.to_vec())?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod comm;
pub mod debug_invariants;
pub mod dual;
pub mod fields;
pub mod io;
pub mod mesh;
pub mod mesh_error;
pub mod refine;
pub mod remove;
pub mod topo;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::comm::{Collective, LocalComm, NoComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::dual::{DualFeatures, DualMesher, check_topo_change};
    pub use crate::fields::{FieldLocation, FieldMapper};
    pub use crate::mesh::PolyMesh;
    pub use crate::mesh::builder::{BlockMeshSpec, block_mesh};
    pub use crate::mesh::check::{CheckHandling, MeshCheckOptions, check_mesh};
    pub use crate::mesh::face::Face;
    pub use crate::mesh::ids::{
        CellId, CellZoneId, FaceId, FaceZoneId, PatchId, PointId, PointZoneId,
    };
    pub use crate::mesh::patch::{Patch, PatchKind, PatchSpec};
    pub use crate::mesh::zone::{CellZone, FaceZone, PointZone};
    pub use crate::mesh_error::MeshMorphError;
    pub use crate::refine::{
        HexRefiner, RefineOptions, RefinementHistory, RefinementLevels, refine_cells_once,
        refine_to_levels,
    };
    pub use crate::remove::{CellRemover, FaceRemover, RemovalPlan, RemoveOptions};
    pub use crate::topo::{CommitOptions, FaceDef, MeshMap, TopoChange};
}
