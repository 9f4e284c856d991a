//! Optional mesh consistency checks.
//!
//! These are the post-commit sanity passes: they never run implicitly, cost
//! a full sweep over the mesh, and report the first violated invariant with
//! the offending entity. Callers choose per check whether a violation is a
//! warning or an error.

use crate::mesh::PolyMesh;
use crate::mesh::geometry;
use crate::mesh::ids::{CellId, FaceId};
use crate::mesh_error::MeshMorphError;

/// Behaviour on a failed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckHandling {
    /// Skip the check.
    Ignore,
    /// Log a warning and continue.
    Warn,
    /// Return an error.
    Error,
}

/// Toggles for [`check_mesh`].
#[derive(Debug, Clone, Copy)]
pub struct MeshCheckOptions {
    /// Verify the structural layout (patch contiguity, face loops).
    pub layout: CheckHandling,
    /// Verify internal faces are in upper-triangular (owner, neighbour) order.
    pub ordering: CheckHandling,
    /// Verify every cell's face area vectors sum to (near) zero.
    pub closedness: CheckHandling,
    /// Verify every cell volume is positive.
    pub volumes: CheckHandling,
    /// Relative tolerance for the closedness residual.
    pub closedness_tol: f64,
}

impl Default for MeshCheckOptions {
    fn default() -> Self {
        MeshCheckOptions {
            layout: CheckHandling::Error,
            ordering: CheckHandling::Error,
            closedness: CheckHandling::Error,
            volumes: CheckHandling::Error,
            closedness_tol: 1e-9,
        }
    }
}

impl MeshCheckOptions {
    /// Geometry checks only (layout/ordering skipped).
    pub fn geometry_only() -> Self {
        MeshCheckOptions {
            layout: CheckHandling::Ignore,
            ordering: CheckHandling::Ignore,
            ..Self::default()
        }
    }
}

fn handle(
    handling: CheckHandling,
    result: Result<(), MeshMorphError>,
) -> Result<(), MeshMorphError> {
    match (handling, result) {
        (CheckHandling::Ignore, _) | (_, Ok(())) => Ok(()),
        (CheckHandling::Warn, Err(e)) => {
            log::warn!("mesh check failed: {e}");
            Ok(())
        }
        (CheckHandling::Error, Err(e)) => Err(e),
    }
}

/// Runs the configured checks, stopping at the first error-level failure.
pub fn check_mesh(mesh: &PolyMesh, options: &MeshCheckOptions) -> Result<(), MeshMorphError> {
    if options.layout != CheckHandling::Ignore {
        handle(options.layout, {
            use crate::debug_invariants::DebugInvariants;
            mesh.validate_invariants()
        })?;
    }
    if options.ordering != CheckHandling::Ignore {
        handle(options.ordering, check_upper_triangular(mesh))?;
    }
    if options.closedness != CheckHandling::Ignore {
        handle(
            options.closedness,
            check_closed_cells(mesh, options.closedness_tol),
        )?;
    }
    if options.volumes != CheckHandling::Ignore {
        handle(options.volumes, check_positive_volumes(mesh))?;
    }
    Ok(())
}

/// Internal faces must be sorted by (owner, neighbour) with owner < neighbour.
pub fn check_upper_triangular(mesh: &PolyMesh) -> Result<(), MeshMorphError> {
    let mut previous = (0usize, 0usize);
    for fi in 0..mesh.n_internal_faces() {
        let f = FaceId::new(fi);
        let own = mesh.owner_of(f).index();
        let nei = mesh
            .neighbour_of(f)
            .map(|c| c.index())
            .unwrap_or(usize::MAX);
        if own >= nei {
            return Err(MeshMorphError::NotUpperTriangular { face: f });
        }
        if (own, nei) < previous {
            return Err(MeshMorphError::NotUpperTriangular { face: f });
        }
        previous = (own, nei);
    }
    Ok(())
}

/// Every cell's face area vectors must sum to (near) zero.
pub fn check_closed_cells(mesh: &PolyMesh, rel_tol: f64) -> Result<(), MeshMorphError> {
    let areas = mesh.face_area_vectors();
    for (celli, faces) in mesh.cell_faces().iter().enumerate() {
        let mut residual = [0.0; 3];
        let mut scale = 0.0;
        for f in faces {
            let fi = f.index();
            let outward = if mesh.owner_of(*f).index() == celli {
                areas[fi]
            } else {
                geometry::scale(-1.0, areas[fi])
            };
            residual = geometry::add(residual, outward);
            scale += geometry::norm(areas[fi]);
        }
        let closure = geometry::norm(residual);
        if closure > rel_tol * scale.max(f64::MIN_POSITIVE) {
            return Err(MeshMorphError::OpenCell {
                cell: CellId::new(celli),
                closure,
            });
        }
    }
    Ok(())
}

/// Every cell must have strictly positive volume.
pub fn check_positive_volumes(mesh: &PolyMesh) -> Result<(), MeshMorphError> {
    for (celli, v) in mesh.cell_volumes().iter().enumerate() {
        if *v <= 0.0 {
            return Err(MeshMorphError::NegativeVolume {
                cell: CellId::new(celli),
                volume: *v,
            });
        }
    }
    Ok(())
}

/// Total volume must be conserved across a pure topology change.
pub fn check_volume_conserved(
    before: f64,
    after: f64,
    rel_tol: f64,
) -> Result<(), MeshMorphError> {
    let scale = before.abs().max(after.abs()).max(f64::MIN_POSITIVE);
    if (after - before).abs() > rel_tol * scale {
        return Err(MeshMorphError::VolumeNotConserved { before, after });
    }
    Ok(())
}

/// Face-adjacent cells may differ by at most `limit - 1` refinement levels.
pub fn check_level_balance(
    mesh: &PolyMesh,
    cell_levels: &[u32],
    limit: u32,
) -> Result<(), MeshMorphError> {
    if cell_levels.len() != mesh.n_cells() {
        return Err(MeshMorphError::LevelCountMismatch {
            what: "cell",
            expected: mesh.n_cells(),
            found: cell_levels.len(),
        });
    }
    for fi in 0..mesh.n_internal_faces() {
        let f = FaceId::new(fi);
        let a = mesh.owner_of(f);
        let b = mesh.neighbour_of(f).expect("internal face has neighbour");
        let la = cell_levels[a.index()];
        let lb = cell_levels[b.index()];
        if la.abs_diff(lb) >= limit {
            return Err(MeshMorphError::BalanceViolation {
                a,
                b,
                level_a: la,
                level_b: lb,
                limit,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::builder::{BlockMeshSpec, block_mesh};

    #[test]
    fn block_mesh_passes_all_checks() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(3)).unwrap();
        check_mesh(&mesh, &MeshCheckOptions::default()).unwrap();
    }

    #[test]
    fn balance_detects_jump() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(2)).unwrap();
        let mut levels = vec![0u32; mesh.n_cells()];
        check_level_balance(&mesh, &levels, 2).unwrap();
        levels[0] = 2; // two levels above its face neighbours
        let err = check_level_balance(&mesh, &levels, 2).unwrap_err();
        assert!(matches!(err, MeshMorphError::BalanceViolation { .. }));
    }

    #[test]
    fn conservation_tolerance() {
        check_volume_conserved(1.0, 1.0 + 1e-12, 1e-10).unwrap();
        assert!(check_volume_conserved(1.0, 1.01, 1e-10).is_err());
    }
}
