//! Hexahedral refinement: levels, history, the 2x2x2 policy, and drivers.

pub mod hex;
pub mod history;
pub mod levels;
pub mod multi;

pub use hex::{DEFAULT_LIMIT_DIFF, HexRefiner};
pub use history::{CellRef, CompleteOctet, RefinementHistory, SplitRecord};
pub use levels::RefinementLevels;
pub use multi::{RefineOptions, refine_cells_once, refine_to_levels};
