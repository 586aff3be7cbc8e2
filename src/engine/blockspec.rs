//! Block specifications and the partitions they produce.
//!
//! A [`BlockSpec`] says how to cut an array shape into rectangular blocks:
//! either explicit per-dimension block lengths, or [`BlockSpec::Auto`], which
//! derives lengths from the number of available processors.
//!
//! [`derive_blocks`] validates a spec against a shape and returns a
//! [`Partition`]: the resolved block lengths plus the shape of the
//! block-index grid. A partition answers every geometric question the rest of
//! the engine asks: the [`Domain`] of a block, which block owns an element,
//! and whether two arrays are partitioned identically.
//!
//! ## Remainders
//! When an extent is not a multiple of its block length, the last block in
//! that dimension is shorter. Domains are clipped to the array boundary,
//! never padded, so no element is dropped or duplicated.
//!
//! ## Automatic sizing
//! `Auto` searches per-dimension block counts whose product is as close as
//! possible to (without exceeding) the processor count. Among equally good
//! counts it prefers the tiling whose largest block is smallest (the most
//! even block volumes), then the squarest blocks, then the tiling that splits
//! leading dimensions first.

use crate::engine::domain::{DimRange, Domain};
use crate::engine::error::{BlockSpecError, BlockSpecReason};
use crate::engine::grid::MultiIndexIter;
use crate::engine::types::volume;

/// How to cut an array into blocks.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum BlockSpec {
    /// Derive block lengths from the available processor count.
    #[default]
    Auto,
    /// Explicit block length per dimension.
    Explicit(Vec<usize>),
}

impl BlockSpec {
    /// Explicit per-dimension block lengths.
    pub fn lengths(lengths: impl Into<Vec<usize>>) -> Self {
        BlockSpec::Explicit(lengths.into())
    }
}

/// A shape cut into blocks.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Partition {
    shape: Vec<usize>,
    block_lens: Vec<usize>,
    grid: Vec<usize>,
}

impl Partition {
    fn new(shape: Vec<usize>, block_lens: Vec<usize>) -> Self {
        let grid = shape.iter().zip(&block_lens).map(|(&s, &b)| s.div_ceil(b)).collect();
        Self { shape, block_lens, grid }
    }

    /// Array shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Nominal block length per dimension (edge blocks may be shorter).
    pub fn block_lens(&self) -> &[usize] {
        &self.block_lens
    }

    /// Number of blocks per dimension.
    pub fn grid_shape(&self) -> &[usize] {
        &self.grid
    }

    /// Array rank.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of blocks.
    pub fn block_count(&self) -> usize {
        volume(&self.grid)
    }

    /// Domain of the whole array.
    pub fn domain(&self) -> Domain {
        Domain::new(
            self.shape.iter().map(|&s| DimRange { first: 0, last: s - 1 }).collect(),
        )
    }

    /// Domain of the block at `index`, clipped to the array boundary.
    ///
    /// Returns `None` when `index` lies outside the block grid.
    pub fn block_domain(&self, index: &[usize]) -> Option<Domain> {
        if index.len() != self.rank() {
            return None;
        }
        let mut ranges = Vec::with_capacity(self.rank());
        for dim in 0..self.rank() {
            if index[dim] >= self.grid[dim] {
                return None;
            }
            let first = index[dim] * self.block_lens[dim];
            let last = (first + self.block_lens[dim]).min(self.shape[dim]) - 1;
            ranges.push(DimRange { first, last });
        }
        Some(Domain::new(ranges))
    }

    /// Block multi-indices in block-index order.
    pub fn block_indices(&self) -> MultiIndexIter {
        MultiIndexIter::new(&self.grid)
    }

    /// Block containing the element at `element`, and the element's offset
    /// inside that block.
    pub fn locate(&self, element: &[usize]) -> Option<(Vec<usize>, Vec<usize>)> {
        if element.len() != self.rank()
            || element.iter().zip(&self.shape).any(|(&i, &extent)| i >= extent)
        {
            return None;
        }
        let block = element.iter().zip(&self.block_lens).map(|(&i, &b)| i / b).collect();
        let offset = element.iter().zip(&self.block_lens).map(|(&i, &b)| i % b).collect();
        Some((block, offset))
    }

    /// Same partition with the given axis collapsed to extent 1.
    pub(crate) fn collapse_axis(&self, axis: usize) -> Partition {
        let mut shape = self.shape.clone();
        let mut lens = self.block_lens.clone();
        shape[axis] = 1;
        lens[axis] = 1;
        Partition::new(shape, lens)
    }

    /// Same partition with axes `a` and `b` swapped.
    pub(crate) fn swap_axes(&self, a: usize, b: usize) -> Partition {
        let mut shape = self.shape.clone();
        let mut lens = self.block_lens.clone();
        shape.swap(a, b);
        lens.swap(a, b);
        Partition::new(shape, lens)
    }
}

/// Validates `spec` against `shape` and resolves it into a [`Partition`].
///
/// `processor_count` is only consulted for [`BlockSpec::Auto`]; a count of
/// zero is treated as one.
pub fn derive_blocks(
    shape: &[usize],
    spec: &BlockSpec,
    processor_count: usize,
) -> Result<Partition, BlockSpecError> {
    if shape.is_empty() {
        return Err(BlockSpecReason::ZeroRank.into());
    }
    if let Some(dim) = shape.iter().position(|&extent| extent == 0) {
        return Err(BlockSpecReason::EmptyShape { dim }.into());
    }
    // Every block count and block volume below is bounded by this product.
    let elements = shape.iter().try_fold(1usize, |acc, &extent| acc.checked_mul(extent));
    if !elements.is_some_and(|count| count <= isize::MAX as usize) {
        return Err(BlockSpecReason::TooLarge.into());
    }

    let block_lens = match spec {
        BlockSpec::Explicit(lens) => {
            if lens.len() != shape.len() {
                return Err(BlockSpecReason::RankMismatch {
                    expected: shape.len(),
                    actual: lens.len(),
                }
                .into());
            }
            for (dim, (&len, &extent)) in lens.iter().zip(shape).enumerate() {
                if len == 0 {
                    return Err(BlockSpecReason::ZeroLength { dim }.into());
                }
                if len > extent {
                    return Err(BlockSpecReason::ExceedsExtent { dim, len, extent }.into());
                }
            }
            lens.clone()
        }
        BlockSpec::Auto => auto_block_lens(shape, processor_count.max(1)),
    };

    Ok(Partition::new(shape.to_vec(), block_lens))
}

/// Domain of the block at `index` for `partition`.
///
/// Free-function form of [`Partition::block_domain`].
pub fn block_domain(partition: &Partition, index: &[usize]) -> Option<Domain> {
    partition.block_domain(index)
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct AutoScore {
    blocks: usize,
    // Negated so that a larger score means a smaller largest block.
    neg_max_block: isize,
    // Negated longest block edge; favours squarer blocks among equal volumes.
    neg_max_edge: isize,
}

/// Chooses block lengths so the block count approaches `target` without
/// exceeding it.
fn auto_block_lens(shape: &[usize], target: usize) -> Vec<usize> {
    let mut best_lens = shape.to_vec();
    let mut best_score = score(shape, &best_lens);
    let mut counts = vec![1usize; shape.len()];
    search_counts(shape, target, 0, 1, &mut counts, &mut best_lens, &mut best_score);
    best_lens
}

fn lens_for_counts(shape: &[usize], counts: &[usize]) -> Vec<usize> {
    shape.iter().zip(counts).map(|(&s, &c)| s.div_ceil(c)).collect()
}

fn score(shape: &[usize], lens: &[usize]) -> AutoScore {
    let blocks = shape.iter().zip(lens).map(|(&s, &b)| s.div_ceil(b)).product();
    let max_block: usize = lens.iter().product();
    let max_edge = lens.iter().copied().max().unwrap_or(1);
    AutoScore {
        blocks,
        neg_max_block: -(max_block as isize),
        neg_max_edge: -(max_edge as isize),
    }
}

// Depth-first over per-dimension counts in descending order, so the first
// candidate reaching a score wins ties and leading dimensions split first.
fn search_counts(
    shape: &[usize],
    target: usize,
    dim: usize,
    product: usize,
    counts: &mut Vec<usize>,
    best_lens: &mut Vec<usize>,
    best_score: &mut AutoScore,
) {
    if dim == shape.len() {
        let lens = lens_for_counts(shape, counts);
        let candidate = score(shape, &lens);
        if candidate.blocks <= target && candidate > *best_score {
            *best_score = candidate;
            *best_lens = lens;
        }
        return;
    }
    let max_count = shape[dim].min(target / product);
    for count in (1..=max_count).rev() {
        counts[dim] = count;
        search_counts(shape, target, dim + 1, product * count, counts, best_lens, best_score);
    }
    counts[dim] = 1;
}
