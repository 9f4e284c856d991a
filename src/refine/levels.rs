//! Persistent refinement levels.
//!
//! One level per cell (current split depth) and one per point (max level of
//! any cell that historically touched it). Levels are ordinary mesh data:
//! they persist as a small text file next to the mesh and load with
//! read-if-present semantics — an absent file means a never-refined mesh and
//! yields all-zero levels.

use crate::mesh::PolyMesh;
use crate::mesh_error::MeshMorphError;
use std::fmt::Write as _;
use std::path::Path;

const FORMAT_HEADER: &str = "mesh-morph refinement-levels 1";

/// Per-cell and per-point refinement levels.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RefinementLevels {
    pub cell: Vec<u32>,
    pub point: Vec<u32>,
}

impl RefinementLevels {
    /// All-zero levels for a never-refined mesh.
    pub fn zero(mesh: &PolyMesh) -> Self {
        RefinementLevels {
            cell: vec![0; mesh.n_cells()],
            point: vec![0; mesh.n_points()],
        }
    }

    /// Validates the lists against the mesh extents.
    pub fn validate(&self, mesh: &PolyMesh) -> Result<(), MeshMorphError> {
        if self.cell.len() != mesh.n_cells() {
            return Err(MeshMorphError::LevelCountMismatch {
                what: "cell",
                expected: mesh.n_cells(),
                found: self.cell.len(),
            });
        }
        if self.point.len() != mesh.n_points() {
            return Err(MeshMorphError::LevelCountMismatch {
                what: "point",
                expected: mesh.n_points(),
                found: self.point.len(),
            });
        }
        Ok(())
    }

    /// Loads levels from `path` if the file exists, otherwise returns
    /// all-zero levels. A present-but-unreadable or malformed file is an
    /// error; silence only covers absence.
    pub fn load_if_present(
        path: impl AsRef<Path>,
        mesh: &PolyMesh,
    ) -> Result<Self, MeshMorphError> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!(
                "refinement levels '{}' absent; starting at level 0",
                path.display()
            );
            return Ok(Self::zero(mesh));
        }
        let text = std::fs::read_to_string(path).map_err(|e| MeshMorphError::Persistence {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        let levels = Self::parse(&text).map_err(|detail| MeshMorphError::Persistence {
            path: path.display().to_string(),
            detail,
        })?;
        levels.validate(mesh)?;
        Ok(levels)
    }

    /// Writes levels to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MeshMorphError> {
        let path = path.as_ref();
        std::fs::write(path, self.serialise()).map_err(|e| MeshMorphError::Persistence {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    }

    fn serialise(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{FORMAT_HEADER}");
        let _ = writeln!(out, "cells {}", self.cell.len());
        for l in &self.cell {
            let _ = writeln!(out, "{l}");
        }
        let _ = writeln!(out, "points {}", self.point.len());
        for l in &self.point {
            let _ = writeln!(out, "{l}");
        }
        out
    }

    fn parse(text: &str) -> Result<Self, String> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().ok_or("empty file")?;
        if header.trim() != FORMAT_HEADER {
            return Err(format!("unexpected header '{header}'"));
        }
        let cell = Self::parse_section("cells", &mut lines)?;
        let point = Self::parse_section("points", &mut lines)?;
        Ok(RefinementLevels { cell, point })
    }

    fn parse_section<'a>(
        keyword: &str,
        lines: &mut impl Iterator<Item = &'a str>,
    ) -> Result<Vec<u32>, String> {
        let head = lines.next().ok_or_else(|| format!("missing '{keyword}'"))?;
        let mut parts = head.split_whitespace();
        let kw = parts.next().unwrap_or("");
        if kw != keyword {
            return Err(format!("expected '{keyword}', found '{kw}'"));
        }
        let count: usize = parts
            .next()
            .ok_or_else(|| format!("missing count after '{keyword}'"))?
            .parse()
            .map_err(|e| format!("bad count after '{keyword}': {e}"))?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let line = lines
                .next()
                .ok_or_else(|| format!("truncated '{keyword}' section"))?;
            values.push(
                line.trim()
                    .parse()
                    .map_err(|e| format!("bad level '{line}': {e}"))?,
            );
        }
        Ok(values)
    }
}
