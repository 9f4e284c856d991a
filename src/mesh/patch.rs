//! Boundary patches: contiguous, named ranges of boundary faces.
//!
//! Patch behaviour is a closed set as far as the topology engine is
//! concerned: it only needs to know whether a patch couples to another
//! partition/patch and whether it constrains geometry, not how a boundary
//! condition evaluates. Open-ended patch registries live with the
//! discretization layer, outside this crate.

use crate::mesh::ids::PatchId;
use std::ops::Range;

/// The closed set of patch behaviours the topology engine distinguishes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatchKind {
    /// Plain boundary with no topological significance.
    Generic,
    /// Solid wall.
    Wall,
    /// Symmetry plane.
    Symmetry,
    /// Zero-thickness direction of a pseudo-2D mesh.
    Empty,
    /// Wedge face of an axisymmetric mesh.
    Wedge,
    /// One half of a cyclic (periodic) pair.
    Cyclic {
        /// The patch this one is coupled to.
        partner: PatchId,
    },
    /// Inter-partition boundary in a distributed run.
    Processor {
        /// Rank owning this side.
        my_rank: usize,
        /// Rank owning the other side.
        neighb_rank: usize,
    },
}

impl PatchKind {
    /// True for patches whose faces are duplicated on a coupled partner
    /// (cyclic halves, processor boundaries).
    pub fn is_coupled(&self) -> bool {
        matches!(
            self,
            PatchKind::Cyclic { .. } | PatchKind::Processor { .. }
        )
    }

    /// True for patches that constrain geometry rather than model a physical
    /// boundary (symmetry, empty, wedge).
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            PatchKind::Symmetry | PatchKind::Empty | PatchKind::Wedge
        )
    }

    /// True when points on this patch may be merged with points of a
    /// coupled partner during topology changes.
    pub fn merges_coupled_points(&self) -> bool {
        matches!(self, PatchKind::Processor { .. })
    }
}

/// Patch identity without a face range; used while a topology change is
/// pending and the final ranges are not yet known.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchSpec {
    pub name: String,
    pub kind: PatchKind,
}

impl PatchSpec {
    pub fn new(name: impl Into<String>, kind: PatchKind) -> Self {
        PatchSpec {
            name: name.into(),
            kind,
        }
    }
}

/// A committed patch: a named, contiguous range of boundary faces.
#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    pub name: String,
    pub kind: PatchKind,
    /// Global index of the first face of this patch.
    pub start: usize,
    /// Number of faces in this patch.
    pub len: usize,
}

impl Patch {
    pub fn new(name: impl Into<String>, kind: PatchKind, start: usize, len: usize) -> Self {
        Patch {
            name: name.into(),
            kind,
            start,
            len,
        }
    }

    /// The global face index range of this patch.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.len
    }

    /// True if global face index `face` lies in this patch.
    #[inline]
    pub fn contains(&self, face: usize) -> bool {
        self.range().contains(&face)
    }

    /// The patch identity without the range.
    pub fn spec(&self) -> PatchSpec {
        PatchSpec {
            name: self.name.clone(),
            kind: self.kind.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coupled_and_constraint_kinds() {
        assert!(PatchKind::Processor {
            my_rank: 0,
            neighb_rank: 1
        }
        .is_coupled());
        assert!(PatchKind::Cyclic {
            partner: PatchId::new(3)
        }
        .is_coupled());
        assert!(!PatchKind::Wall.is_coupled());
        assert!(PatchKind::Empty.is_constraint());
        assert!(!PatchKind::Generic.is_constraint());
    }

    #[test]
    fn range_membership() {
        let p = Patch::new("inlet", PatchKind::Generic, 10, 4);
        assert!(p.contains(10));
        assert!(p.contains(13));
        assert!(!p.contains(14));
    }
}
