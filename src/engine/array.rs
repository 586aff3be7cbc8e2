//! Owned, process-local N-dimensional arrays.
//!
//! [`LocalArray<T>`] is the value a distributed array is distributed *from*
//! and collected *into*, and the in-task representation of a single block.
//! Data is stored contiguously in row-major order.

use crate::engine::domain::Domain;
use crate::engine::element::Element;
use crate::engine::error::{DArrayError, DArrayResult};
use crate::engine::grid::{linear_offset, MultiIndexIter};
use crate::engine::types::volume;

/// Row-major N-dimensional array held in local memory.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalArray<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: Element> LocalArray<T> {
    /// Wraps row-major `data` with the given shape.
    ///
    /// ## Errors
    /// [`DArrayError::ShapeMismatch`] if `data.len()` differs from the shape's
    /// volume.
    pub fn from_vec(shape: &[usize], data: Vec<T>) -> DArrayResult<Self> {
        let expected = volume(shape);
        if data.len() != expected {
            return Err(DArrayError::ShapeMismatch { expected, actual: data.len() });
        }
        Ok(Self { shape: shape.to_vec(), data })
    }

    /// Array with every element set to `value`.
    pub fn filled(shape: &[usize], value: T) -> Self {
        Self { shape: shape.to_vec(), data: vec![value; volume(shape)] }
    }

    /// Array with element `i` set to `f(i)`.
    pub fn from_fn(shape: &[usize], mut f: impl FnMut(&[usize]) -> T) -> Self {
        let data = MultiIndexIter::new(shape).map(|index| f(&index)).collect();
        Self { shape: shape.to_vec(), data }
    }

    /// Extent per dimension.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row-major elements.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Consumes the array, returning its row-major elements.
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Element at `index`.
    pub fn get(&self, index: &[usize]) -> Option<&T> {
        linear_offset(&self.shape, index).map(|offset| &self.data[offset])
    }

    /// Copies the elements covered by `domain` into a new array.
    ///
    /// ## Errors
    /// [`DArrayError::OutOfBounds`] if `domain` leaves the array.
    pub fn extract(&self, domain: &Domain) -> DArrayResult<LocalArray<T>> {
        self.check_domain(domain)?;
        let origin = domain.origin();
        let shape = domain.shape();
        let mut data = Vec::with_capacity(domain.volume());
        let mut global = vec![0; self.rank()];
        for local in MultiIndexIter::new(&shape) {
            for (g, (&o, &l)) in global.iter_mut().zip(origin.iter().zip(&local)) {
                *g = o + l;
            }
            if let Some(offset) = linear_offset(&self.shape, &global) {
                data.push(self.data[offset]);
            }
        }
        Ok(LocalArray { shape, data })
    }

    /// Writes row-major `values` into the box covered by `domain`.
    ///
    /// ## Errors
    /// [`DArrayError::OutOfBounds`] if `domain` leaves the array and
    /// [`DArrayError::ShapeMismatch`] if `values` does not fill it exactly.
    pub fn insert(&mut self, domain: &Domain, values: &[T]) -> DArrayResult<()> {
        self.check_domain(domain)?;
        if values.len() != domain.volume() {
            return Err(DArrayError::ShapeMismatch {
                expected: domain.volume(),
                actual: values.len(),
            });
        }
        let origin = domain.origin();
        let mut global = vec![0; self.rank()];
        for (local, &value) in MultiIndexIter::new(&domain.shape()).zip(values) {
            for (g, (&o, &l)) in global.iter_mut().zip(origin.iter().zip(&local)) {
                *g = o + l;
            }
            if let Some(offset) = linear_offset(&self.shape, &global) {
                self.data[offset] = value;
            }
        }
        Ok(())
    }

    /// Transposed copy of a rank-2 array.
    ///
    /// ## Errors
    /// [`DArrayError::InvalidAxis`] for any rank other than 2.
    pub fn transpose(&self) -> DArrayResult<LocalArray<T>> {
        let &[rows, cols] = self.shape.as_slice() else {
            return Err(DArrayError::InvalidAxis { axis: 1, rank: self.rank() });
        };
        let mut data = Vec::with_capacity(self.data.len());
        for c in 0..cols {
            for r in 0..rows {
                data.push(self.data[r * cols + c]);
            }
        }
        Ok(LocalArray { shape: vec![cols, rows], data })
    }

    /// Applies `f` to every element.
    pub fn map(&self, f: impl Fn(T) -> T) -> LocalArray<T> {
        LocalArray { shape: self.shape.clone(), data: self.data.iter().map(|&v| f(v)).collect() }
    }

    fn check_domain(&self, domain: &Domain) -> DArrayResult<()> {
        let inside = domain.rank() == self.rank()
            && domain.ranges().iter().zip(&self.shape).all(|(r, &extent)| r.last < extent);
        if inside {
            Ok(())
        } else {
            Err(DArrayError::OutOfBounds { index: domain.origin(), shape: self.shape.clone() })
        }
    }
}
