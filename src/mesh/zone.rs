//! Zones: named, possibly overlapping, non-contiguous entity subsets.
//!
//! Zones are selection sets (source terms, MRF regions, monitoring surfaces)
//! and carry no boundary-condition meaning. Face zones additionally store a
//! per-member orientation flag relative to the zone's nominal direction.

use crate::mesh::ids::{CellId, FaceId, PointId};
use crate::mesh_error::MeshMorphError;

/// A named subset of cells.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CellZone {
    pub name: String,
    pub cells: Vec<CellId>,
}

impl CellZone {
    pub fn new(name: impl Into<String>, cells: Vec<CellId>) -> Self {
        CellZone {
            name: name.into(),
            cells,
        }
    }

    pub fn contains(&self, cell: CellId) -> bool {
        self.cells.contains(&cell)
    }
}

/// A named subset of faces with per-member orientation flags.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaceZone {
    pub name: String,
    pub faces: Vec<FaceId>,
    /// True where the mesh face points against the zone's nominal direction.
    pub flipped: Vec<bool>,
}

impl FaceZone {
    pub fn new(
        name: impl Into<String>,
        faces: Vec<FaceId>,
        flipped: Vec<bool>,
    ) -> Result<Self, MeshMorphError> {
        let name = name.into();
        if faces.len() != flipped.len() {
            return Err(MeshMorphError::ZoneLengthMismatch {
                zone: name,
                faces: faces.len(),
                flips: flipped.len(),
            });
        }
        Ok(FaceZone {
            name,
            faces,
            flipped,
        })
    }

    pub fn contains(&self, face: FaceId) -> bool {
        self.faces.contains(&face)
    }
}

/// A named subset of points.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointZone {
    pub name: String,
    pub points: Vec<PointId>,
}

impl PointZone {
    pub fn new(name: impl Into<String>, points: Vec<PointId>) -> Self {
        PointZone {
            name: name.into(),
            points,
        }
    }

    pub fn contains(&self, point: PointId) -> bool {
        self.points.contains(&point)
    }
}
