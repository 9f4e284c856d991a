//! Wavefront OBJ dumps of pending changes and mesh boundaries.
//!
//! A diagnostic side channel: when a commit rejects a request, dumping the
//! staged state (live faces over staged positions, removed entities as
//! comments) lets the offending geometry be inspected in any OBJ viewer.
//! Not part of the functional contract.

use crate::mesh::PolyMesh;
use crate::mesh::ids::{FaceId, PointId};
use crate::mesh_error::MeshMorphError;
use crate::topo::TopoChange;
use std::io::Write;
use std::path::Path;

/// Writes the staged state of `change` as OBJ: every staged point (removed
/// ones flagged in a comment), every live face as a polygon.
pub fn write_change<W: Write>(change: &TopoChange, w: &mut W) -> std::io::Result<()> {
    writeln!(w, "# mesh-morph pending topology change")?;
    writeln!(
        w,
        "# {} staged points, {} staged faces, {} staged cells",
        change.n_points(),
        change.n_faces(),
        change.n_cells()
    )?;
    for pi in 0..change.n_points() {
        let p = PointId::new(pi);
        let pos = change
            .point_position(p)
            .expect("staged point in range");
        if change.is_point_removed(p) {
            writeln!(w, "# removed point {pi}")?;
        }
        writeln!(w, "v {} {} {}", pos[0], pos[1], pos[2])?;
    }
    for fi in 0..change.n_faces() {
        let f = FaceId::new(fi);
        if change.is_face_removed(f) {
            writeln!(w, "# removed face {fi}")?;
            continue;
        }
        let verts = change.face_verts(f).expect("staged face in range");
        write!(w, "f")?;
        for v in verts {
            // OBJ indices are 1-based.
            write!(w, " {}", v.index() + 1)?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Writes the staged state of `change` to `path`.
pub fn dump_change(change: &TopoChange, path: impl AsRef<Path>) -> Result<(), MeshMorphError> {
    let path = path.as_ref();
    let mut file = std::fs::File::create(path).map_err(|e| MeshMorphError::Persistence {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    write_change(change, &mut file).map_err(|e| MeshMorphError::Persistence {
        path: path.display().to_string(),
        detail: e.to_string(),
    })
}

/// Writes the boundary faces of a mesh as OBJ, one group per patch.
pub fn write_boundary<W: Write>(mesh: &PolyMesh, w: &mut W) -> std::io::Result<()> {
    writeln!(w, "# mesh-morph boundary ({} patches)", mesh.n_patches())?;
    for p in mesh.points() {
        writeln!(w, "v {} {} {}", p[0], p[1], p[2])?;
    }
    for patch in mesh.patches() {
        writeln!(w, "g {}", patch.name)?;
        for fi in patch.range() {
            write!(w, "f")?;
            for v in mesh.face(FaceId::new(fi)).verts() {
                write!(w, " {}", v.index() + 1)?;
            }
            writeln!(w)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::builder::{BlockMeshSpec, block_mesh};

    #[test]
    fn change_dump_lists_points_and_faces() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(1)).unwrap();
        let mut change = TopoChange::from_mesh(&mesh);
        change.remove_point(PointId::new(0), Some(PointId::new(1))).unwrap();
        let mut out = Vec::new();
        write_change(&change, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let v_lines = text.lines().filter(|l| l.starts_with("v ")).count();
        let f_lines = text.lines().filter(|l| l.starts_with("f ")).count();
        assert_eq!(v_lines, mesh.n_points());
        assert_eq!(f_lines, mesh.n_faces());
        assert!(text.contains("# removed point 0"));
    }

    #[test]
    fn boundary_dump_groups_by_patch() {
        let mesh = block_mesh(&BlockMeshSpec::unit_cube(1)).unwrap();
        let mut out = Vec::new();
        write_boundary(&mesh, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("g x_min"));
        assert!(text.contains("g z_max"));
    }
}
