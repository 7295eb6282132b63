//! Closed-interval unions on the age axis.
//!
//! The placement engine expresses "where may a new divergence land" as a
//! union of closed intervals, one per open edge. Taxonomic constraints
//! intersect and complement that union; `atomic_hull` then decides whether
//! the union collapses to a single admissible interval or the constraints
//! are mutually unsatisfiable.

use crate::PhyloError;

/// An ordered union of disjoint closed intervals `[lo, hi]` with `lo ≤ hi`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalUnion {
    /// Sorted by `lo`; pairwise disjoint (touching intervals coalesce).
    parts: Vec<(f64, f64)>,
}

impl IntervalUnion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn closed(lo: f64, hi: f64) -> Self {
        let mut u = Self::new();
        u.insert(lo, hi);
        u
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn parts(&self) -> &[(f64, f64)] {
        &self.parts
    }

    pub fn min(&self) -> Option<f64> {
        self.parts.first().map(|&(lo, _)| lo)
    }

    pub fn max(&self) -> Option<f64> {
        self.parts.last().map(|&(_, hi)| hi)
    }

    /// Total width of the union.
    pub fn measure(&self) -> f64 {
        self.parts.iter().map(|&(lo, hi)| hi - lo).sum()
    }

    pub fn contains(&self, x: f64) -> bool {
        self.parts.iter().any(|&(lo, hi)| lo <= x && x <= hi)
    }

    /// Union with `[lo, hi]`, coalescing any overlapping or touching parts.
    pub fn insert(&mut self, lo: f64, hi: f64) {
        if hi < lo {
            return;
        }
        let (mut lo, mut hi) = (lo, hi);
        let mut merged = Vec::with_capacity(self.parts.len() + 1);
        let mut placed = false;
        for &(a, b) in &self.parts {
            if b < lo {
                merged.push((a, b));
            } else if hi < a {
                if !placed {
                    merged.push((lo, hi));
                    placed = true;
                }
                merged.push((a, b));
            } else {
                lo = lo.min(a);
                hi = hi.max(b);
            }
        }
        if !placed {
            merged.push((lo, hi));
        }
        self.parts = merged;
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for &(lo, hi) in &other.parts {
            out.insert(lo, hi);
        }
        out
    }

    pub fn intersect(&self, other: &Self) -> Self {
        let mut out = Self::new();
        let (mut i, mut j) = (0, 0);
        while i < self.parts.len() && j < other.parts.len() {
            let (a1, b1) = self.parts[i];
            let (a2, b2) = other.parts[j];
            let lo = a1.max(a2);
            let hi = b1.min(b2);
            if lo <= hi {
                out.insert(lo, hi);
            }
            if b1 < b2 {
                i += 1;
            } else {
                j += 1;
            }
        }
        out
    }

    /// Complement within the bounding interval `[lo, hi]`.
    pub fn complement_within(&self, lo: f64, hi: f64) -> Self {
        let mut out = Self::new();
        let mut cursor = lo;
        for &(a, b) in &self.parts {
            if b < lo {
                continue;
            }
            if a > hi {
                break;
            }
            if a > cursor {
                out.insert(cursor, a.min(hi));
            }
            cursor = cursor.max(b);
        }
        if cursor < hi {
            out.insert(cursor, hi);
        }
        out
    }

    /// Reduce the union to its convex hull `[min, max]`, provided no
    /// internal gap of width ≥ `epsilon` exists. Narrower gaps are
    /// swallowed; a wide gap means the age constraints cannot be satisfied
    /// by a single divergence time.
    pub fn atomic_hull(&self, epsilon: f64) -> Result<(f64, f64), PhyloError> {
        let first = self
            .parts
            .first()
            .copied()
            .ok_or(PhyloError::DisjointConstraints {
                gap_lo: 0.0,
                gap_hi: 0.0,
            })?;
        let mut prev_hi = first.1;
        for &(lo, hi) in &self.parts[1..] {
            if lo - prev_hi >= epsilon {
                return Err(PhyloError::DisjointConstraints {
                    gap_lo: prev_hi,
                    gap_hi: lo,
                });
            }
            prev_hi = prev_hi.max(hi);
        }
        Ok((first.0, prev_hi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_coalesces_overlap() {
        let mut u = IntervalUnion::new();
        u.insert(0.0, 1.0);
        u.insert(2.0, 3.0);
        u.insert(0.5, 2.5);
        assert_eq!(u.parts(), &[(0.0, 3.0)]);
    }

    #[test]
    fn intersect_is_pointwise() {
        let a = IntervalUnion::closed(0.0, 2.0).union(&IntervalUnion::closed(3.0, 5.0));
        let b = IntervalUnion::closed(1.0, 4.0);
        let c = a.intersect(&b);
        assert_eq!(c.parts(), &[(1.0, 2.0), (3.0, 4.0)]);
    }

    #[test]
    fn complement_within_bounds() {
        let a = IntervalUnion::closed(1.0, 2.0);
        let c = a.complement_within(0.0, 3.0);
        assert_eq!(c.parts(), &[(0.0, 1.0), (2.0, 3.0)]);
    }

    #[test]
    fn atomic_hull_swallows_small_gaps() {
        let u = IntervalUnion::closed(0.0, 1.0).union(&IntervalUnion::closed(1.0005, 2.0));
        let (lo, hi) = u.atomic_hull(1e-2).unwrap();
        assert_eq!((lo, hi), (0.0, 2.0));
    }

    #[test]
    fn atomic_hull_rejects_wide_gaps() {
        let u = IntervalUnion::closed(0.0, 1.0).union(&IntervalUnion::closed(1.5, 2.0));
        assert!(matches!(
            u.atomic_hull(0.1),
            Err(PhyloError::DisjointConstraints { .. })
        ));
    }

    #[test]
    fn empty_union_has_no_hull() {
        assert!(IntervalUnion::new().atomic_hull(0.1).is_err());
    }
}
