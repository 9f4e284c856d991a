//! Face and cell removal policies.
//!
//! Both follow the two-phase pattern of the other policies: compute the
//! legal closure of the requested removal first, then emit the operations
//! into a [`TopoChange`](crate::topo::TopoChange) without touching the live
//! mesh.

pub mod cells;
pub mod faces;

pub use cells::CellRemover;
pub use faces::{FaceRemover, RemovalPlan, RemoveOptions};
