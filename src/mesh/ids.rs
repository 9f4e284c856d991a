//! Typed, dense, zero-based indices for mesh entities.
//!
//! Every mesh entity (point, face, cell, patch, zone) is addressed by a
//! plain array index. Wrapping each index kind in its own newtype prevents
//! cross-type confusion (a `FaceId` can never be handed to a point lookup),
//! and "no entity" is spelled `Option<Id>` rather than a `-1` sentinel.
//!
//! Ids are `repr(transparent)` over `u32`: dense meshes beyond 2^32 entities
//! per rank are out of scope, and the narrower index halves the footprint of
//! the large adjacency tables.

use std::fmt;

/// Common behaviour of dense entity indices, used by the transfer maps.
pub trait EntityIndex: Copy + Eq + Ord + std::hash::Hash + fmt::Debug {
    /// Wraps a raw array index.
    fn from_index(index: usize) -> Self;
    /// Returns the raw array index.
    fn index(self) -> usize;
    /// Entity kind name for diagnostics.
    fn kind() -> &'static str;
}

macro_rules! define_index {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Wraps a raw array index.
            #[inline]
            pub fn new(index: usize) -> Self {
                debug_assert!(
                    index <= u32::MAX as usize,
                    concat!($kind, " index exceeds u32 range")
                );
                $name(index as u32)
            }

            /// Returns the raw array index.
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl EntityIndex for $name {
            #[inline]
            fn from_index(index: usize) -> Self {
                $name::new(index)
            }
            #[inline]
            fn index(self) -> usize {
                $name::index(self)
            }
            fn kind() -> &'static str {
                $kind
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.0).finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for usize {
            #[inline]
            fn from(id: $name) -> usize {
                id.index()
            }
        }
    };
}

define_index!(
    /// Index of a mesh point (vertex).
    PointId,
    "point"
);
define_index!(
    /// Index of a mesh face.
    FaceId,
    "face"
);
define_index!(
    /// Index of a mesh cell.
    CellId,
    "cell"
);
define_index!(
    /// Index of a boundary patch.
    PatchId,
    "patch"
);
define_index!(
    /// Index of a cell zone.
    CellZoneId,
    "cell zone"
);
define_index!(
    /// Index of a face zone.
    FaceZoneId,
    "face zone"
);
define_index!(
    /// Index of a point zone.
    PointZoneId,
    "point zone"
);

#[cfg(test)]
mod layout_tests {
    //! Compile-time assertion that ids have the same size as `u32`.
    use super::*;
    use static_assertions::assert_eq_size;

    // If this fails, our repr(transparent) guarantee is broken!
    assert_eq_size!(PointId, u32);
    assert_eq_size!(FaceId, u32);
    assert_eq_size!(CellId, u32);
    assert_eq_size!(Option<PointId>, u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_and_index() {
        let p = PointId::new(42);
        assert_eq!(p.index(), 42);
        assert_eq!(usize::from(p), 42);
    }

    #[test]
    fn debug_and_display() {
        let f = FaceId::new(7);
        assert_eq!(format!("{:?}", f), "FaceId(7)");
        assert_eq!(format!("{}", f), "7");
    }

    #[test]
    fn ordering_and_hash() {
        use std::collections::HashSet;
        let a = CellId::new(1);
        let b = CellId::new(2);
        assert!(a < b);
        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn serde_round_trip() {
        let p = PointId::new(123);
        let s = serde_json::to_string(&p).unwrap();
        let q: PointId = serde_json::from_str(&s).unwrap();
        assert_eq!(p, q);
    }
}
