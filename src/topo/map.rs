//! Old↔new entity correspondence produced by a topology commit.
//!
//! A commit renumbers everything; [`MeshMap`] is the only record of where
//! each entity went. Staged ids extend the old mesh's id space (old entities
//! keep their staged index), so one `staged_to_new` array answers both "where
//! did old entity i go" and "where did the entity I added land".

use crate::mesh::ids::{CellId, EntityIndex, FaceId, PatchId, PointId};

/// Transfer map for one entity kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EntityMap<I> {
    pub(crate) n_old: usize,
    /// Staged index → committed index (`None`: removed or merged away).
    pub(crate) staged_to_new: Vec<Option<I>>,
    /// Committed index → old index (`None`: created by this commit).
    pub(crate) new_to_old: Vec<Option<I>>,
    /// Created entities with their old master entity, when one exists.
    pub(crate) added_from: Vec<(I, Option<I>)>,
    /// Old entities merged away, with the committed index they merged into.
    pub(crate) merged: Vec<(I, I)>,
}

impl<I: EntityIndex> EntityMap<I> {
    /// Identity map over `n` entities.
    pub fn identity(n: usize) -> Self {
        EntityMap {
            n_old: n,
            staged_to_new: (0..n).map(|i| Some(I::from_index(i))).collect(),
            new_to_old: (0..n).map(|i| Some(I::from_index(i))).collect(),
            added_from: Vec::new(),
            merged: Vec::new(),
        }
    }

    /// Entity count before the commit.
    #[inline]
    pub fn n_old(&self) -> usize {
        self.n_old
    }

    /// Entity count after the commit.
    #[inline]
    pub fn n_new(&self) -> usize {
        self.new_to_old.len()
    }

    /// Staged entity count (old entities plus additions).
    #[inline]
    pub fn n_staged(&self) -> usize {
        self.staged_to_new.len()
    }

    /// Committed index of an old entity (`None`: removed or merged away).
    pub fn old_to_new(&self, old: I) -> Option<I> {
        if old.index() >= self.n_old {
            return None;
        }
        self.staged_to_new[old.index()]
    }

    /// Committed index of any staged entity.
    pub fn staged_to_new(&self, staged: I) -> Option<I> {
        self.staged_to_new.get(staged.index()).copied().flatten()
    }

    /// Old index of a committed entity (`None`: created by this commit).
    pub fn new_to_old(&self, new: I) -> Option<I> {
        self.new_to_old.get(new.index()).copied().flatten()
    }

    /// Created entities with their old master entity, when one exists.
    pub fn added_from(&self) -> &[(I, Option<I>)] {
        &self.added_from
    }

    /// Old entities merged away, with the committed index they merged into.
    pub fn merged(&self) -> &[(I, I)] {
        &self.merged
    }

    /// True when the map is the identity permutation.
    pub fn is_identity(&self) -> bool {
        self.n_old == self.new_to_old.len()
            && self.merged.is_empty()
            && self.added_from.is_empty()
            && self
                .new_to_old
                .iter()
                .enumerate()
                .all(|(i, o)| o.map(EntityIndex::index) == Some(i))
            && self
                .staged_to_new
                .iter()
                .enumerate()
                .all(|(i, n)| n.map(EntityIndex::index) == Some(i))
    }
}

/// The full old→new correspondence of one topology commit.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MeshMap {
    pub(crate) points: EntityMap<PointId>,
    pub(crate) faces: EntityMap<FaceId>,
    pub(crate) cells: EntityMap<CellId>,
    /// Per committed face: orientation flipped relative to its staged loop.
    pub(crate) face_flipped: Vec<bool>,
    /// Old patch index → new patch index.
    pub(crate) patch_map: Vec<Option<PatchId>>,
    /// Target positions for a follow-up `move_points`, when inflating.
    pub(crate) motion_points: Option<Vec<[f64; 3]>>,
}

impl MeshMap {
    /// Point correspondence.
    pub fn points(&self) -> &EntityMap<PointId> {
        &self.points
    }

    /// Face correspondence.
    pub fn faces(&self) -> &EntityMap<FaceId> {
        &self.faces
    }

    /// Cell correspondence.
    pub fn cells(&self) -> &EntityMap<CellId> {
        &self.cells
    }

    /// True if committed face `f` was flipped relative to its staged loop.
    pub fn face_flipped(&self, f: FaceId) -> bool {
        self.face_flipped.get(f.index()).copied().unwrap_or(false)
    }

    /// Old patch index → new patch index.
    pub fn patch_map(&self) -> &[Option<PatchId>] {
        &self.patch_map
    }

    /// Target point positions for `move_points`, when the commit inflated.
    pub fn motion_points(&self) -> Option<&[[f64; 3]]> {
        self.motion_points.as_deref()
    }

    /// True when the committed mesh still needs a `move_points` call.
    ///
    /// May be false even when the commit was requested with `inflate = true`:
    /// if no surviving point actually changes position there is nothing to
    /// move. Callers must branch on this, not on the flag they passed.
    pub fn has_motion_points(&self) -> bool {
        self.motion_points.is_some()
    }

    /// True when the commit changed anything at all.
    pub fn morphing(&self) -> bool {
        !self.is_identity()
    }

    /// True when every entity kind maps identically and no motion is pending.
    pub fn is_identity(&self) -> bool {
        self.points.is_identity()
            && self.faces.is_identity()
            && self.cells.is_identity()
            && self.motion_points.is_none()
            && self
                .patch_map
                .iter()
                .enumerate()
                .all(|(i, p)| p.map(PatchId::index) == Some(i))
            && !self.face_flipped.iter().any(|f| *f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_map_is_identity() {
        let m = EntityMap::<PointId>::identity(5);
        assert!(m.is_identity());
        assert_eq!(m.n_old(), 5);
        assert_eq!(m.n_new(), 5);
        assert_eq!(m.old_to_new(PointId::new(3)), Some(PointId::new(3)));
        assert_eq!(m.new_to_old(PointId::new(4)), Some(PointId::new(4)));
    }

    #[test]
    fn out_of_range_lookups_are_none() {
        let m = EntityMap::<CellId>::identity(2);
        assert_eq!(m.old_to_new(CellId::new(7)), None);
        assert_eq!(m.new_to_old(CellId::new(7)), None);
        assert_eq!(m.staged_to_new(CellId::new(7)), None);
    }
}
