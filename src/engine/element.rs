//! Element types that can live in a distributed array.
//!
//! Block data crosses the remote-memory boundary as raw bytes. An
//! [`Element`] is any plain-old-data value (`bytemuck::Pod`) so a block can be
//! cast to bytes without copying on the way out and decoded with a single
//! aligned copy on the way in.
//!
//! [`Numeric`] adds the arithmetic, ordering and algebraic identities used by
//! the built-in elementwise and reduction kernels.

use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Sub};

use bytes::Bytes;

use crate::engine::error::FetchError;
use crate::engine::types::ChunkID;

/// A value that can be stored in a distributed array block.
pub trait Element: bytemuck::Pod + Send + Sync + Debug + PartialEq + 'static {}

impl<T> Element for T where T: bytemuck::Pod + Send + Sync + Debug + PartialEq + 'static {}

/// Element types supported by the built-in numeric kernels.
pub trait Numeric:
    Element
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
{
    /// Additive identity.
    const ZERO: Self;
    /// Multiplicative identity.
    const ONE: Self;
    /// Identity of `min` (the greatest representable value).
    const MIN_IDENTITY: Self;
    /// Identity of `max` (the least representable value).
    const MAX_IDENTITY: Self;

    /// Smaller of two values.
    #[inline]
    fn min_of(self, other: Self) -> Self {
        if other < self { other } else { self }
    }

    /// Larger of two values.
    #[inline]
    fn max_of(self, other: Self) -> Self {
        if other > self { other } else { self }
    }
}

macro_rules! impl_numeric_float {
    ($($t:ty),*) => {$(
        impl Numeric for $t {
            const ZERO: Self = 0.0;
            const ONE: Self = 1.0;
            const MIN_IDENTITY: Self = <$t>::INFINITY;
            const MAX_IDENTITY: Self = <$t>::NEG_INFINITY;
        }
    )*};
}

macro_rules! impl_numeric_int {
    ($($t:ty),*) => {$(
        impl Numeric for $t {
            const ZERO: Self = 0;
            const ONE: Self = 1;
            const MIN_IDENTITY: Self = <$t>::MAX;
            const MAX_IDENTITY: Self = <$t>::MIN;
        }
    )*};
}

impl_numeric_float!(f32, f64);
impl_numeric_int!(i32, i64, u32, u64);

/// Encodes a row-major block as chunk bytes.
pub fn encode_block<T: Element>(values: &[T]) -> Bytes {
    Bytes::copy_from_slice(bytemuck::cast_slice(values))
}

/// Decodes chunk bytes back into a row-major block.
///
/// The bytes carry no alignment guarantee, so decoding always goes through a
/// copy into a correctly aligned `Vec<T>`.
pub fn decode_block<T: Element>(chunk: ChunkID, bytes: &[u8]) -> Result<Vec<T>, FetchError> {
    let elem_size = std::mem::size_of::<T>();
    if elem_size == 0 || bytes.len() % elem_size != 0 {
        return Err(FetchError::Corrupt { chunk, bytes: bytes.len(), elem_size });
    }
    Ok(bytemuck::pod_collect_to_vec::<u8, T>(bytes))
}

/// Decodes bytes handed to a task as input. Task inputs are not tied to a
/// chunk id, so the error only names the sizes.
pub fn decode_task_input<T: Element>(bytes: &[u8]) -> Result<Vec<T>, String> {
    let elem_size = std::mem::size_of::<T>();
    if elem_size == 0 || bytes.len() % elem_size != 0 {
        return Err(format!(
            "task input holds {} bytes, not a whole number of {elem_size}-byte elements",
            bytes.len()
        ));
    }
    Ok(bytemuck::pod_collect_to_vec::<u8, T>(bytes))
}
