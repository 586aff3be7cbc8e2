//! Index-range geometry of arrays and blocks.
//!
//! A [`Domain`] is an N-dimensional box expressed as one inclusive index
//! range per dimension. It is a pure value type: the whole array has a
//! domain, and so does every block of a partition.
//!
//! ## Invariants
//! * Every range is non-empty (`first <= last`).
//! * A block's domain is always a sub-box of its array's domain.
//! * The block domains of a partition tile the array domain exactly.

use std::fmt;

/// One inclusive index range `first..=last`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DimRange {
    /// First index in the range.
    pub first: usize,
    /// Last index in the range (inclusive).
    pub last: usize,
}

impl DimRange {
    /// Creates `first..=last`. Returns `None` for an empty range.
    pub fn new(first: usize, last: usize) -> Option<Self> {
        (first <= last).then_some(Self { first, last })
    }

    /// Number of indices in the range.
    #[inline]
    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }

    /// Ranges are never empty; provided for API symmetry.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns `true` if `i` falls in the range.
    #[inline]
    pub fn contains(&self, i: usize) -> bool {
        self.first <= i && i <= self.last
    }

    /// Returns `true` if `other` lies entirely inside this range.
    #[inline]
    pub fn covers(&self, other: &DimRange) -> bool {
        self.first <= other.first && other.last <= self.last
    }
}

impl fmt::Display for DimRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.first, self.last)
    }
}

/// N-dimensional box of inclusive index ranges.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Domain {
    ranges: Vec<DimRange>,
}

impl Domain {
    /// Builds a domain from its ranges.
    pub fn new(ranges: Vec<DimRange>) -> Self {
        Self { ranges }
    }

    /// Domain `0..=extent-1` in every dimension. Returns `None` when any
    /// extent is zero.
    pub fn from_shape(shape: &[usize]) -> Option<Self> {
        shape
            .iter()
            .map(|&extent| extent.checked_sub(1).and_then(|last| DimRange::new(0, last)))
            .collect::<Option<Vec<_>>>()
            .map(Self::new)
    }

    /// Per-dimension ranges.
    pub fn ranges(&self) -> &[DimRange] {
        &self.ranges
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.ranges.len()
    }

    /// Extent in each dimension.
    pub fn shape(&self) -> Vec<usize> {
        self.ranges.iter().map(DimRange::len).collect()
    }

    /// First index in each dimension.
    pub fn origin(&self) -> Vec<usize> {
        self.ranges.iter().map(|r| r.first).collect()
    }

    /// Number of elements in the box.
    pub fn volume(&self) -> usize {
        self.ranges.iter().map(DimRange::len).product()
    }

    /// Returns `true` if the multi-index lies in the box.
    pub fn contains(&self, index: &[usize]) -> bool {
        index.len() == self.rank() && self.ranges.iter().zip(index).all(|(r, &i)| r.contains(i))
    }

    /// Returns `true` if `other` is a sub-box of this domain.
    pub fn is_superset_of(&self, other: &Domain) -> bool {
        self.rank() == other.rank()
            && self.ranges.iter().zip(&other.ranges).all(|(a, b)| a.covers(b))
    }

    /// Returns `true` if the two boxes share at least one element.
    pub fn intersects(&self, other: &Domain) -> bool {
        self.rank() == other.rank()
            && self
                .ranges
                .iter()
                .zip(&other.ranges)
                .all(|(a, b)| a.first <= b.last && b.first <= a.last)
    }

    /// Domain with the given dimension collapsed to the single index `at`.
    pub fn collapse(&self, dim: usize, at: usize) -> Domain {
        let mut ranges = self.ranges.clone();
        ranges[dim] = DimRange { first: at, last: at };
        Domain { ranges }
    }

    /// Domain with dimensions `a` and `b` swapped.
    pub fn swap_axes(&self, a: usize, b: usize) -> Domain {
        let mut ranges = self.ranges.clone();
        ranges.swap(a, b);
        Domain { ranges }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (dim, range) in self.ranges.iter().enumerate() {
            if dim > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{range}")?;
        }
        f.write_str("]")
    }
}
