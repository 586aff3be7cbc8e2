//! Dense N-dimensional grids addressed by multi-index.
//!
//! A [`Grid<T>`] stores one value per cell of an N-dimensional box in
//! row-major order. The engine uses it for the block-index grid of a
//! partition: target processors produced by placement, slots of a block
//! directory, and explicit processor assignments.
//!
//! Iteration always proceeds in block-index order (row-major, last dimension
//! fastest), which keeps placement, failure reporting and reduction trees
//! reproducible.

use crate::engine::types::volume;

/// Row-major N-dimensional grid of values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grid<T> {
    dims: Vec<usize>,
    cells: Vec<T>,
}

impl<T> Grid<T> {
    /// Builds a grid by evaluating `f` at every multi-index in block-index order.
    pub fn from_fn(dims: &[usize], mut f: impl FnMut(&[usize]) -> T) -> Self {
        let mut cells = Vec::with_capacity(volume(dims));
        for index in MultiIndexIter::new(dims) {
            cells.push(f(&index));
        }
        Self { dims: dims.to_vec(), cells }
    }

    /// Like [`Grid::from_fn`] but stops at the first error.
    pub fn try_from_fn<E>(
        dims: &[usize],
        mut f: impl FnMut(&[usize]) -> Result<T, E>,
    ) -> Result<Self, E> {
        let mut cells = Vec::with_capacity(volume(dims));
        for index in MultiIndexIter::new(dims) {
            cells.push(f(&index)?);
        }
        Ok(Self { dims: dims.to_vec(), cells })
    }

    /// Wraps row-major cells. Returns `None` when the cell count does not
    /// match `dims`.
    pub fn from_cells(dims: Vec<usize>, cells: Vec<T>) -> Option<Self> {
        (volume(&dims) == cells.len()).then_some(Self { dims, cells })
    }

    /// Extent of the grid in each dimension.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns `true` if the grid has no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Row-major linear offset of `index`, or `None` when out of bounds.
    pub fn linear_index(&self, index: &[usize]) -> Option<usize> {
        linear_offset(&self.dims, index)
    }

    /// Multi-index of the cell at row-major `offset`.
    pub fn multi_index(&self, offset: usize) -> Vec<usize> {
        unravel(&self.dims, offset)
    }

    /// Cell at `index`.
    pub fn get(&self, index: &[usize]) -> Option<&T> {
        self.linear_index(index).map(|offset| &self.cells[offset])
    }

    /// Mutable cell at `index`.
    pub fn get_mut(&mut self, index: &[usize]) -> Option<&mut T> {
        let offset = self.linear_index(index)?;
        Some(&mut self.cells[offset])
    }

    /// Cells in block-index order.
    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    /// Iterates `(multi_index, cell)` pairs in block-index order.
    pub fn iter_indexed(&self) -> impl Iterator<Item = (Vec<usize>, &T)> + '_ {
        MultiIndexIter::new(&self.dims).zip(self.cells.iter())
    }

    /// Applies `f` to every cell, keeping the shape.
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Grid<U> {
        Grid { dims: self.dims.clone(), cells: self.cells.iter().map(f).collect() }
    }

    /// Consumes the grid, returning its cells in block-index order.
    pub fn into_cells(self) -> Vec<T> {
        self.cells
    }
}

/// Row-major linear offset of `index` within `dims`.
pub fn linear_offset(dims: &[usize], index: &[usize]) -> Option<usize> {
    if index.len() != dims.len() {
        return None;
    }
    let mut offset = 0usize;
    for (&i, &extent) in index.iter().zip(dims) {
        if i >= extent {
            return None;
        }
        offset = offset * extent + i;
    }
    Some(offset)
}

/// Multi-index of row-major `offset` within `dims`.
pub fn unravel(dims: &[usize], mut offset: usize) -> Vec<usize> {
    let mut index = vec![0; dims.len()];
    for (slot, &extent) in index.iter_mut().zip(dims).rev() {
        if extent == 0 {
            continue;
        }
        *slot = offset % extent;
        offset /= extent;
    }
    index
}

/// Iterator over every multi-index of a box in row-major order.
///
/// A box with any zero extent yields nothing; a rank-0 box yields the empty
/// index once.
pub struct MultiIndexIter {
    dims: Vec<usize>,
    next: Option<Vec<usize>>,
}

impl MultiIndexIter {
    /// Starts iteration at the all-zero index.
    pub fn new(dims: &[usize]) -> Self {
        let next = (!dims.contains(&0)).then(|| vec![0; dims.len()]);
        Self { dims: dims.to_vec(), next }
    }
}

impl Iterator for MultiIndexIter {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        let mut successor = current.clone();
        for dim in (0..self.dims.len()).rev() {
            successor[dim] += 1;
            if successor[dim] < self.dims[dim] {
                self.next = Some(successor);
                break;
            }
            successor[dim] = 0;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterates_row_major() {
        let order: Vec<Vec<usize>> = MultiIndexIter::new(&[2, 3]).collect();
        assert_eq!(
            order,
            vec![vec![0, 0], vec![0, 1], vec![0, 2], vec![1, 0], vec![1, 1], vec![1, 2]]
        );
    }

    #[test]
    fn linear_and_unravel_agree() {
        let dims = [3, 4, 5];
        for (offset, index) in MultiIndexIter::new(&dims).enumerate() {
            assert_eq!(linear_offset(&dims, &index), Some(offset));
            assert_eq!(unravel(&dims, offset), index);
        }
    }

    #[test]
    fn zero_extent_is_empty() {
        assert_eq!(MultiIndexIter::new(&[0, 4]).count(), 0);
        assert_eq!(MultiIndexIter::new(&[]).count(), 1);
    }
}
