//! Refinement history: the split-record forest behind unrefinement.
//!
//! Detecting a mergeable octet structurally is not safe: eight same-level
//! cells around an interior point may descend from eight different parents,
//! and merging them would invent a cell that never existed. Unrefinement is
//! therefore only offered through recorded splits: one [`SplitRecord`] per
//! refined cell, its children tracked as live cell ids or as references to
//! their own split records once they are refined further.

use crate::mesh::ids::{CellId, PointId};

/// A child slot of a split record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CellRef {
    /// A live leaf cell.
    Live(CellId),
    /// The child was refined further; index of its own record.
    Split(usize),
}

/// One 2x2x2 split: the parent's level, the cell-centre point created by the
/// split, and the eight children.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SplitRecord {
    /// Refinement level of the parent (children sit at `parent_level + 1`).
    pub parent_level: u32,
    /// The cell-centre point; identifies the octet for unrefinement.
    pub centre_point: Option<PointId>,
    pub children: [CellRef; 8],
}

/// A complete, live octet eligible for unrefinement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompleteOctet {
    /// Index of the record in the history.
    pub record: usize,
    pub parent_level: u32,
    pub centre_point: PointId,
    pub children: [CellId; 8],
}

/// The split-record forest.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RefinementHistory {
    pub(crate) records: Vec<Option<SplitRecord>>,
}

impl RefinementHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of record slots (including collapsed ones).
    pub fn n_records(&self) -> usize {
        self.records.len()
    }

    /// Number of live split records.
    pub fn n_active(&self) -> usize {
        self.records.iter().filter(|r| r.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.n_active() == 0
    }

    /// The record in slot `i`, if not collapsed.
    pub fn record(&self, i: usize) -> Option<&SplitRecord> {
        self.records.get(i).and_then(|r| r.as_ref())
    }

    pub(crate) fn add_record(&mut self, record: SplitRecord) -> usize {
        self.records.push(Some(record));
        self.records.len() - 1
    }

    /// Records whose eight children are all live leaves; these are the
    /// octets unrefinement may merge back.
    pub fn complete_octets(&self) -> Vec<CompleteOctet> {
        let mut out = Vec::new();
        for (ri, rec) in self.records.iter().enumerate() {
            let Some(rec) = rec else { continue };
            let Some(centre) = rec.centre_point else {
                continue;
            };
            let mut children = [CellId::new(0); 8];
            let mut complete = true;
            for (slot, child) in rec.children.iter().enumerate() {
                match child {
                    CellRef::Live(c) => children[slot] = *c,
                    CellRef::Split(_) => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                out.push(CompleteOctet {
                    record: ri,
                    parent_level: rec.parent_level,
                    centre_point: centre,
                    children,
                });
            }
        }
        out
    }

    /// Replaces every `Live(cell)` child entry with `Split(record)`.
    pub(crate) fn replace_live_with_split(&mut self, cell: CellId, record: usize) {
        for rec in self.records.iter_mut().flatten() {
            for child in &mut rec.children {
                if *child == CellRef::Live(cell) {
                    *child = CellRef::Split(record);
                }
            }
        }
    }

    /// Collapses record `i` back into the live cell `merged`: parents pointing
    /// at the record become `Live(merged)` and the slot is freed.
    pub(crate) fn collapse(&mut self, i: usize, merged: CellId) {
        for rec in self.records.iter_mut().flatten() {
            for child in &mut rec.children {
                if *child == CellRef::Split(i) {
                    *child = CellRef::Live(merged);
                }
            }
        }
        if let Some(slot) = self.records.get_mut(i) {
            *slot = None;
        }
    }

    /// Remaps all live ids through `translate`; records containing a child
    /// (or descendant record) that no longer exists are dropped, cascading
    /// upwards.
    pub(crate) fn remap_live(
        &mut self,
        mut translate_cell: impl FnMut(CellId) -> Option<CellId>,
        mut translate_point: impl FnMut(PointId) -> Option<PointId>,
    ) {
        let n = self.records.len();
        let mut dropped = vec![false; n];
        for (ri, slot) in self.records.iter_mut().enumerate() {
            let Some(rec) = slot else { continue };
            let mut dead = false;
            for child in &mut rec.children {
                if let CellRef::Live(c) = child {
                    match translate_cell(*c) {
                        Some(new) => *child = CellRef::Live(new),
                        None => {
                            dead = true;
                            break;
                        }
                    }
                }
            }
            if let Some(p) = rec.centre_point {
                rec.centre_point = translate_point(p);
            }
            if dead {
                *slot = None;
                dropped[ri] = true;
            }
        }

        // A dropped descendant poisons its ancestors.
        loop {
            let mut changed = false;
            for ri in 0..n {
                if self.records[ri].is_none() {
                    continue;
                }
                let dead = self.records[ri]
                    .as_ref()
                    .is_some_and(|rec| {
                        rec.children
                            .iter()
                            .any(|c| matches!(c, CellRef::Split(i) if dropped[*i]))
                    });
                if dead {
                    self.records[ri] = None;
                    dropped[ri] = true;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(base: usize) -> [CellRef; 8] {
        std::array::from_fn(|i| CellRef::Live(CellId::new(base + i)))
    }

    #[test]
    fn complete_octets_require_all_live() {
        let mut h = RefinementHistory::new();
        let r0 = h.add_record(SplitRecord {
            parent_level: 0,
            centre_point: Some(PointId::new(100)),
            children: cells(0),
        });
        assert_eq!(h.complete_octets().len(), 1);

        // Refine child 3 further: the octet is no longer complete.
        let r1 = h.add_record(SplitRecord {
            parent_level: 1,
            centre_point: Some(PointId::new(101)),
            children: cells(8),
        });
        h.replace_live_with_split(CellId::new(3), r1);
        let octets = h.complete_octets();
        assert_eq!(octets.len(), 1);
        assert_eq!(octets[0].record, r1);

        // Collapse the fine octet back: the coarse one is complete again.
        h.collapse(r1, CellId::new(3));
        let octets = h.complete_octets();
        assert_eq!(octets.len(), 1);
        assert_eq!(octets[0].record, r0);
    }

    #[test]
    fn remap_drops_records_with_vanished_children() {
        let mut h = RefinementHistory::new();
        h.add_record(SplitRecord {
            parent_level: 0,
            centre_point: Some(PointId::new(9)),
            children: cells(0),
        });
        h.remap_live(
            |c| if c.index() == 5 { None } else { Some(c) },
            |p| Some(p),
        );
        assert!(h.is_empty());
    }

    #[test]
    fn serde_round_trip() {
        let mut h = RefinementHistory::new();
        h.add_record(SplitRecord {
            parent_level: 2,
            centre_point: None,
            children: cells(4),
        });
        let json = serde_json::to_string(&h).unwrap();
        let back: RefinementHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
