//! Field re-sampling across a topology change.
//!
//! The commit engine never touches field data; after every commit the owning
//! application maps each registered field through the [`MeshMap`]. The
//! mappers here implement the location-specific rules: surviving entities
//! copy their value, created entities start from their master entity, and
//! merged entities average into the survivor (volume-weighted for cells when
//! old volumes are supplied). A uniform field therefore maps to the same
//! uniform field exactly.

use crate::mesh::ids::EntityIndex;
use crate::mesh_error::MeshMorphError;
use crate::topo::{EntityMap, MeshMap};
use hashbrown::HashMap;
use num_traits::Float;

/// Where a field lives on the mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldLocation {
    Cell,
    InternalFace,
    Point,
}

impl FieldLocation {
    fn name(self) -> &'static str {
        match self {
            FieldLocation::Cell => "cell",
            FieldLocation::InternalFace => "face",
            FieldLocation::Point => "point",
        }
    }
}

/// Maps scalar fields through one [`MeshMap`].
#[derive(Clone, Copy, Debug)]
pub struct FieldMapper<'a> {
    map: &'a MeshMap,
    old_cell_volumes: Option<&'a [f64]>,
}

impl<'a> FieldMapper<'a> {
    pub fn new(map: &'a MeshMap) -> Self {
        FieldMapper {
            map,
            old_cell_volumes: None,
        }
    }

    /// Supplies old cell volumes so merged cells average volume-weighted.
    pub fn with_cell_volumes(mut self, volumes: &'a [f64]) -> Self {
        self.old_cell_volumes = Some(volumes);
        self
    }

    /// Maps a per-cell scalar field.
    pub fn map_cell_scalar<T: Float>(&self, old: &[T]) -> Result<Vec<T>, MeshMorphError> {
        map_entity_scalar(
            self.map.cells(),
            old,
            FieldLocation::Cell,
            self.old_cell_volumes,
        )
    }

    /// Maps a per-point scalar field.
    pub fn map_point_scalar<T: Float>(&self, old: &[T]) -> Result<Vec<T>, MeshMorphError> {
        map_entity_scalar(self.map.points(), old, FieldLocation::Point, None)
    }

    /// Maps a per-face scalar field (all faces, internal first).
    pub fn map_face_scalar<T: Float>(&self, old: &[T]) -> Result<Vec<T>, MeshMorphError> {
        map_entity_scalar(self.map.faces(), old, FieldLocation::InternalFace, None)
    }

    /// Maps a per-face flux-like field: values negate across recorded
    /// orientation flips, and merged faces accumulate their slaves so the
    /// total flux through a fused surface is preserved.
    pub fn map_face_flux<T: Float>(&self, old: &[T]) -> Result<Vec<T>, MeshMorphError> {
        let faces = self.map.faces();
        if old.len() != faces.n_old() {
            return Err(MeshMorphError::FieldSizeMismatch {
                location: "face",
                expected: faces.n_old(),
                found: old.len(),
            });
        }
        let mut new = vec![T::zero(); faces.n_new()];
        for (newi, value) in new.iter_mut().enumerate() {
            let id = crate::mesh::ids::FaceId::new(newi);
            if let Some(old_id) = faces.new_to_old(id) {
                *value = old[old_id.index()];
            }
        }
        for (new_id, master) in faces.added_from() {
            if let Some(m) = master {
                new[new_id.index()] = old[m.index()];
            }
        }
        for (slave, target) in faces.merged() {
            let t = new[target.index()];
            new[target.index()] = t + old[slave.index()];
        }
        for (newi, value) in new.iter_mut().enumerate() {
            if self.map.face_flipped(crate::mesh::ids::FaceId::new(newi)) {
                *value = -*value;
            }
        }
        Ok(new)
    }
}

fn map_entity_scalar<I: EntityIndex, T: Float>(
    map: &EntityMap<I>,
    old: &[T],
    location: FieldLocation,
    weights: Option<&[f64]>,
) -> Result<Vec<T>, MeshMorphError> {
    if old.len() != map.n_old() {
        return Err(MeshMorphError::FieldSizeMismatch {
            location: location.name(),
            expected: map.n_old(),
            found: old.len(),
        });
    }
    if let Some(w) = weights {
        if w.len() != map.n_old() {
            return Err(MeshMorphError::FieldSizeMismatch {
                location: "cell volume",
                expected: map.n_old(),
                found: w.len(),
            });
        }
    }

    let mut new = vec![T::zero(); map.n_new()];
    for (newi, value) in new.iter_mut().enumerate() {
        if let Some(old_id) = map.new_to_old(I::from_index(newi)) {
            *value = old[old_id.index()];
        }
    }
    for (new_id, master) in map.added_from() {
        if let Some(m) = master {
            new[new_id.index()] = old[m.index()];
        }
    }

    // Merged groups average into the survivor: the survivor's own old value
    // plus every slave, weighted when volumes are available.
    if !map.merged().is_empty() {
        let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
        for (slave, target) in map.merged() {
            groups.entry(target.index()).or_default().push(slave.index());
        }
        for (target, slaves) in groups {
            let mut members = slaves;
            if let Some(own) = map.new_to_old(I::from_index(target)) {
                members.push(own.index());
            }
            let mut value_sum = 0.0f64;
            let mut weight_sum = 0.0f64;
            for m in members {
                let w = weights.map(|w| w[m]).unwrap_or(1.0);
                value_sum += old[m].to_f64().unwrap_or(0.0) * w;
                weight_sum += w;
            }
            if weight_sum > 0.0 {
                new[target] =
                    T::from(value_sum / weight_sum).unwrap_or_else(T::zero);
            }
        }
    }

    Ok(new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::ids::CellId;
    use crate::topo::EntityMap;

    #[test]
    fn identity_map_copies_field() {
        let map = EntityMap::<CellId>::identity(4);
        let old = vec![1.0f64, 2.0, 3.0, 4.0];
        let new = map_entity_scalar(&map, &old, FieldLocation::Cell, None).unwrap();
        assert_eq!(new, old);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let map = EntityMap::<CellId>::identity(4);
        let err =
            map_entity_scalar(&map, &[1.0f64; 3], FieldLocation::Cell, None).unwrap_err();
        assert!(matches!(err, MeshMorphError::FieldSizeMismatch { .. }));
    }
}
