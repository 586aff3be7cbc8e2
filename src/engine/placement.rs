//! Placement policies: which processor owns each block.
//!
//! [`assign`] maps every cell of a block-index grid to a processor, producing
//! a [`Grid<ProcessorID>`] of the same shape. Apart from
//! [`PlacementPolicy::Arbitrary`] the mapping is a pure function of the grid
//! shape, the policy and the processor list.
//!
//! ## Policies
//! * `Arbitrary`: any available processor, chosen pseudo-randomly.
//! * `BlockRow` / `BlockCol`: the row (first) or column (second) block
//!   dimension is cut into contiguous runs, one run per processor in list
//!   order. With `r` row-blocks and `p` processors the **first** `r mod p`
//!   processors receive `ceil(r / p)` row-blocks and the rest receive
//!   `floor(r / p)`. With fewer row-blocks than processors the first `r`
//!   processors receive one each and the rest receive none.
//! * `CyclicRow` / `CyclicCol`: row-block (column-block) `r` goes to
//!   `processors[r mod p]`.
//! * `ExplicitGrid`: a caller-supplied [`Assignment`] grid tiled periodically
//!   over the block grid. Block `(i1, ..., iN)` maps to
//!   `assignment[i1 mod size1, ..., iN mod sizeN]`.
//!
//! ## Errors
//! All checks happen here, before any block task is submitted:
//! * `BlockCol` / `CyclicCol` on a rank-1 grid and an `ExplicitGrid` whose
//!   rank differs from the block grid raise
//!   [`DArrayError::PlacementRankMismatch`].
//! * An assignment naming a processor or worker the cluster does not have
//!   raises [`DArrayError::UnknownProcessor`], even if that cell is never
//!   used by the current grid.
//! * Parsing an unrecognised policy name raises
//!   [`DArrayError::UnknownPlacementPolicy`].

use std::fmt;
use std::str::FromStr;

use crate::engine::context::default_processor;
use crate::engine::error::{DArrayError, DArrayResult, RankMismatchError};
use crate::engine::grid::Grid;
use crate::engine::random::tl_rand_index;
use crate::engine::types::{ProcessorID, ProcessorInfo, WorkerID};

/// One cell of an explicit assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlacementTarget {
    /// A specific processor.
    Processor(ProcessorID),
    /// A worker; resolves to that worker's default processor.
    Worker(WorkerID),
}

/// Caller-supplied grid of placement targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    grid: Grid<PlacementTarget>,
}

impl Assignment {
    /// Wraps a grid of targets. Returns `None` for a grid with no cells.
    pub fn new(grid: Grid<PlacementTarget>) -> Option<Self> {
        (!grid.is_empty()).then_some(Self { grid })
    }

    /// Row-major processor ids with the given dimensions.
    pub fn processors(dims: &[usize], ids: Vec<ProcessorID>) -> Option<Self> {
        let cells = ids.into_iter().map(PlacementTarget::Processor).collect();
        Grid::from_cells(dims.to_vec(), cells).and_then(Self::new)
    }

    /// Row-major worker ids with the given dimensions.
    pub fn workers(dims: &[usize], ids: Vec<WorkerID>) -> Option<Self> {
        let cells = ids.into_iter().map(PlacementTarget::Worker).collect();
        Grid::from_cells(dims.to_vec(), cells).and_then(Self::new)
    }

    /// Rank-2 processor assignment from rows. Ragged rows give `None`.
    pub fn from_rows<R: AsRef<[ProcessorID]>>(rows: &[R]) -> Option<Self> {
        let width = rows.first()?.as_ref().len();
        if rows.iter().any(|row| row.as_ref().len() != width) {
            return None;
        }
        let ids = rows.iter().flat_map(|row| row.as_ref().iter().copied()).collect();
        Self::processors(&[rows.len(), width], ids)
    }

    /// Assignment dimensions.
    pub fn dims(&self) -> &[usize] {
        self.grid.dims()
    }

    /// Assignment rank.
    pub fn rank(&self) -> usize {
        self.grid.rank()
    }

    /// Target at the wrapped position of block `index`.
    pub fn target_for(&self, index: &[usize]) -> Option<PlacementTarget> {
        let wrapped: Vec<usize> =
            index.iter().zip(self.grid.dims()).map(|(&i, &size)| i % size).collect();
        self.grid.get(&wrapped).copied()
    }

    fn resolve(&self, processors: &[ProcessorInfo]) -> DArrayResult<Grid<ProcessorID>> {
        Grid::try_from_fn(self.grid.dims(), |index| {
            match self.grid.get(index).copied() {
                Some(PlacementTarget::Processor(id)) if processors.iter().any(|p| p.id == id) => {
                    Ok(id)
                }
                Some(PlacementTarget::Processor(id)) => Err(DArrayError::UnknownProcessor(id)),
                Some(PlacementTarget::Worker(worker)) => default_processor(processors, worker)
                    .ok_or(DArrayError::UnknownProcessor(worker)),
                None => Err(DArrayError::NoProcessors),
            }
        })
    }
}

/// How blocks are mapped to processors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlacementPolicy {
    /// Any available processor.
    Arbitrary,
    /// Contiguous runs of row-blocks per processor.
    BlockRow,
    /// Contiguous runs of column-blocks per processor.
    BlockCol,
    /// Row-blocks dealt round-robin.
    CyclicRow,
    /// Column-blocks dealt round-robin.
    CyclicCol,
    /// Explicit assignment grid tiled over the block grid.
    ExplicitGrid(Assignment),
}

impl PlacementPolicy {
    /// Symbolic name of the policy.
    pub fn name(&self) -> &'static str {
        match self {
            PlacementPolicy::Arbitrary => "Arbitrary",
            PlacementPolicy::BlockRow => "BlockRow",
            PlacementPolicy::BlockCol => "BlockCol",
            PlacementPolicy::CyclicRow => "CyclicRow",
            PlacementPolicy::CyclicCol => "CyclicCol",
            PlacementPolicy::ExplicitGrid(_) => "ExplicitGrid",
        }
    }
}

impl fmt::Display for PlacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PlacementPolicy {
    type Err = DArrayError;

    /// Parses a symbolic policy name. Case, `_` and `-` are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "arbitrary" => Ok(PlacementPolicy::Arbitrary),
            "blockrow" => Ok(PlacementPolicy::BlockRow),
            "blockcol" => Ok(PlacementPolicy::BlockCol),
            "cyclicrow" => Ok(PlacementPolicy::CyclicRow),
            "cycliccol" => Ok(PlacementPolicy::CyclicCol),
            _ => Err(DArrayError::UnknownPlacementPolicy { name: s.to_string() }),
        }
    }
}

/// Maps every block of a grid with shape `grid_shape` to a processor.
///
/// ## Errors
/// See the module documentation. An empty processor list raises
/// [`DArrayError::NoProcessors`].
pub fn assign(
    grid_shape: &[usize],
    policy: &PlacementPolicy,
    processors: &[ProcessorInfo],
) -> DArrayResult<Grid<ProcessorID>> {
    if processors.is_empty() {
        return Err(DArrayError::NoProcessors);
    }
    let rank = grid_shape.len();
    let ids: Vec<ProcessorID> = processors.iter().map(|p| p.id).collect();
    let count = ids.len();

    match policy {
        PlacementPolicy::Arbitrary => {
            Ok(Grid::from_fn(grid_shape, |_| ids[tl_rand_index(count)]))
        }
        PlacementPolicy::BlockRow | PlacementPolicy::BlockCol => {
            let dim = axis_of(policy, rank)?;
            let runs = grid_shape[dim];
            Ok(Grid::from_fn(grid_shape, |index| ids[run_owner(index[dim], runs, count)]))
        }
        PlacementPolicy::CyclicRow | PlacementPolicy::CyclicCol => {
            let dim = axis_of(policy, rank)?;
            Ok(Grid::from_fn(grid_shape, |index| ids[index[dim] % count]))
        }
        PlacementPolicy::ExplicitGrid(assignment) => {
            if assignment.rank() != rank {
                return Err(RankMismatchError {
                    policy: policy.name().to_string(),
                    expected: rank,
                    actual: assignment.rank(),
                }
                .into());
            }
            let resolved = assignment.resolve(processors)?;
            Grid::try_from_fn(grid_shape, |index| {
                let wrapped: Vec<usize> =
                    index.iter().zip(resolved.dims()).map(|(&i, &size)| i % size).collect();
                resolved.get(&wrapped).copied().ok_or(DArrayError::NoProcessors)
            })
        }
    }
}

/// Block dimension a row/column policy distributes over.
fn axis_of(policy: &PlacementPolicy, rank: usize) -> DArrayResult<usize> {
    let dim = match policy {
        PlacementPolicy::BlockCol | PlacementPolicy::CyclicCol => 1,
        _ => 0,
    };
    if dim >= rank {
        return Err(RankMismatchError {
            policy: policy.name().to_string(),
            expected: dim + 1,
            actual: rank,
        }
        .into());
    }
    Ok(dim)
}

/// Position in the processor list owning run element `r` of `runs`, with the
/// first `runs mod procs` processors taking the longer runs.
fn run_owner(r: usize, runs: usize, procs: usize) -> usize {
    let base = runs / procs;
    let extra = runs % procs;
    let long_span = extra * (base + 1);
    if r < long_span {
        r / (base + 1)
    } else {
        extra + (r - long_span) / base
    }
}
