//! Dense arrays with checked ownership transfer
//!
//! An [`Array`] is the only container `build` computes into. It comes in two
//! backing kinds that the engine treats identically:
//!
//! - **Linear** - a flat rank-1 buffer (see [`Array::linear`]).
//! - **Nested** - a rank-R container where indexing an axis yields a
//!   sub-container (see [`Array::from_shape`] and [`Array::from_nested`]).
//!   Storage is row-major.
//!
//! Both kinds are reached only through index tuples: [`Array::get`] and
//! [`Array::set`] address one element, [`Array::subvolume`] borrows the
//! sub-container under an index prefix.
//!
//! # Transfer
//!
//! A successful build moves the storage out of the source into a new
//! `Array`. The source stays behind as a *neutered* handle and every further
//! access to it fails with [`ArrayError::Neutered`]. A build that aborts
//! after the transfer leaves the source *poisoned* instead.
//!
//! # Example
//!
//! ```
//! use multicore::{Array, ArrayError};
//!
//! let grid = Array::from_shape(&[2, 3], vec![0, 1, 2, 3, 4, 5]).unwrap();
//! assert_eq!(grid.rank(), Ok(2));
//! assert_eq!(grid.get(&[1, 2]), Ok(&5));
//!
//! let row = grid.subvolume(&[1]).unwrap();
//! assert_eq!(row.as_slice(), &[3, 4, 5]);
//!
//! assert!(matches!(grid.get(&[2, 0]), Err(ArrayError::OutOfBounds { .. })));
//! ```

use std::ops::Deref;

use num_traits::Zero;
use thiserror::Error;

/// Element types a build can compute into; cleared storage is `T::zero()`
pub trait Element: Copy + Send + Sync + Zero {}

impl<T: Copy + Send + Sync + Zero> Element for T {}

/// Errors that can occur when constructing or accessing an array
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArrayError {
    #[error("array storage has been transferred to a build result")]
    Neutered,

    #[error("array was poisoned by an aborted build")]
    Poisoned,

    #[error("arrays must have rank >= 1")]
    ZeroRank,

    #[error("expected an index of rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    #[error("index {index} out of bounds for axis {axis} of length {len}")]
    OutOfBounds { axis: usize, index: usize, len: usize },

    #[error("data length {got} does not match shape product {expected}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("nested container is ragged at depth {depth}")]
    Ragged { depth: usize },
}

/// Backing kind of an array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    /// Flat rank-1 buffer
    Linear,
    /// Multi-dimensional container, row-major
    Nested,
}

/// A tree of values used to build a [`ArrayKind::Nested`] array structurally
#[derive(Debug, Clone, PartialEq)]
pub enum Nested<T> {
    Leaf(T),
    List(Vec<Nested<T>>),
}

impl<T> From<Vec<T>> for Nested<T> {
    fn from(values: Vec<T>) -> Self {
        Nested::List(values.into_iter().map(Nested::Leaf).collect())
    }
}

impl<T> Nested<T> {
    /// A rank-2 tree from a list of rows
    pub fn from_rows(rows: Vec<Vec<T>>) -> Self {
        Nested::List(rows.into_iter().map(Nested::from).collect())
    }
}

/// Owned storage of a live array
#[derive(Debug)]
pub(crate) struct Storage<T> {
    pub(crate) kind: ArrayKind,
    pub(crate) shape: Vec<usize>,
    pub(crate) data: Vec<T>,
}

#[derive(Debug)]
enum State<T> {
    Live(Storage<T>),
    Neutered,
    Poisoned,
}

/// A dense array of rank >= 1
#[derive(Debug)]
pub struct Array<T> {
    state: State<T>,
}

/// Row-major strides for `shape`
pub(crate) fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

/// Flat offset of a (possibly partial) index prefix, bounds-checked
fn prefix_offset(shape: &[usize], index: &[usize]) -> Result<usize, ArrayError> {
    if index.len() > shape.len() {
        return Err(ArrayError::RankMismatch {
            expected: shape.len(),
            got: index.len(),
        });
    }
    let strides = strides(shape);
    let mut offset = 0;
    for (axis, (&i, &len)) in index.iter().zip(shape).enumerate() {
        if i >= len {
            return Err(ArrayError::OutOfBounds {
                axis,
                index: i,
                len,
            });
        }
        offset += i * strides[axis];
    }
    Ok(offset)
}

/// Rank and lengths derived by walking first children until a leaf
fn nested_shape<T>(root: &Nested<T>) -> Vec<usize> {
    let mut shape = Vec::new();
    let mut node = root;
    while let Nested::List(items) = node {
        shape.push(items.len());
        match items.first() {
            Some(first) => node = first,
            None => break,
        }
    }
    shape
}

fn flatten<T>(
    node: Nested<T>,
    depth: usize,
    shape: &[usize],
    out: &mut Vec<T>,
) -> Result<(), ArrayError> {
    match node {
        Nested::Leaf(value) if depth == shape.len() => {
            out.push(value);
            Ok(())
        }
        Nested::List(items) if depth < shape.len() && items.len() == shape[depth] => {
            for item in items {
                flatten(item, depth + 1, shape, out)?;
            }
            Ok(())
        }
        _ => Err(ArrayError::Ragged { depth }),
    }
}

impl<T> Array<T> {
    /// Create a rank-1 linear array
    pub fn linear(data: Vec<T>) -> Self {
        Self::from_storage(Storage {
            kind: ArrayKind::Linear,
            shape: vec![data.len()],
            data,
        })
    }

    /// Create a nested array of the given shape from row-major data
    pub fn from_shape(shape: &[usize], data: Vec<T>) -> Result<Self, ArrayError> {
        if shape.is_empty() {
            return Err(ArrayError::ZeroRank);
        }
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ArrayError::ShapeMismatch {
                expected,
                got: data.len(),
            });
        }
        Ok(Self::from_storage(Storage {
            kind: ArrayKind::Nested,
            shape: shape.to_vec(),
            data,
        }))
    }

    /// Create a nested array from a tree of sub-containers
    ///
    /// The rank is found by following the first child of every list down to
    /// a leaf; every other branch must then have the same lengths.
    pub fn from_nested(root: Nested<T>) -> Result<Self, ArrayError> {
        let shape = nested_shape(&root);
        if shape.is_empty() {
            return Err(ArrayError::ZeroRank);
        }
        let mut data = Vec::with_capacity(shape.iter().product());
        flatten(root, 0, &shape, &mut data)?;
        Ok(Self::from_storage(Storage {
            kind: ArrayKind::Nested,
            shape,
            data,
        }))
    }

    pub(crate) fn from_storage(storage: Storage<T>) -> Self {
        Self {
            state: State::Live(storage),
        }
    }

    pub(crate) fn storage(&self) -> Result<&Storage<T>, ArrayError> {
        match &self.state {
            State::Live(storage) => Ok(storage),
            State::Neutered => Err(ArrayError::Neutered),
            State::Poisoned => Err(ArrayError::Poisoned),
        }
    }

    fn storage_mut(&mut self) -> Result<&mut Storage<T>, ArrayError> {
        match &mut self.state {
            State::Live(storage) => Ok(storage),
            State::Neutered => Err(ArrayError::Neutered),
            State::Poisoned => Err(ArrayError::Poisoned),
        }
    }

    /// Move the storage out, leaving this handle neutered
    pub(crate) fn transfer(&mut self) -> Result<Storage<T>, ArrayError> {
        self.storage()?;
        match std::mem::replace(&mut self.state, State::Neutered) {
            State::Live(storage) => Ok(storage),
            _ => Err(ArrayError::Neutered),
        }
    }

    pub(crate) fn poison(&mut self) {
        self.state = State::Poisoned;
    }

    /// Returns true if this handle still owns its storage
    pub fn is_live(&self) -> bool {
        matches!(self.state, State::Live(_))
    }

    /// Returns true if the storage was transferred to a build result
    pub fn is_neutered(&self) -> bool {
        matches!(self.state, State::Neutered)
    }

    /// Returns true if a build aborted after taking this array's storage
    pub fn is_poisoned(&self) -> bool {
        matches!(self.state, State::Poisoned)
    }

    /// Linear or nested representation
    pub fn kind(&self) -> Result<ArrayKind, ArrayError> {
        Ok(self.storage()?.kind)
    }

    /// Number of axes
    pub fn rank(&self) -> Result<usize, ArrayError> {
        Ok(self.storage()?.shape.len())
    }

    /// Per-axis lengths
    pub fn shape(&self) -> Result<&[usize], ArrayError> {
        Ok(&self.storage()?.shape)
    }

    /// Length of a single axis
    pub fn dim_len(&self, axis: usize) -> Result<usize, ArrayError> {
        let shape = self.shape()?;
        shape.get(axis).copied().ok_or(ArrayError::RankMismatch {
            expected: shape.len(),
            got: axis + 1,
        })
    }

    /// Total number of elements
    pub fn num_elements(&self) -> Result<usize, ArrayError> {
        Ok(self.storage()?.data.len())
    }

    /// Get the element at a full-rank index
    pub fn get(&self, index: &[usize]) -> Result<&T, ArrayError> {
        let storage = self.storage()?;
        let offset = full_offset(&storage.shape, index)?;
        Ok(&storage.data[offset])
    }

    /// Get a mutable reference to the element at a full-rank index
    pub fn get_mut(&mut self, index: &[usize]) -> Result<&mut T, ArrayError> {
        let storage = self.storage_mut()?;
        let offset = full_offset(&storage.shape, index)?;
        Ok(&mut storage.data[offset])
    }

    /// Store a value at a full-rank index
    pub fn set(&mut self, index: &[usize], value: T) -> Result<(), ArrayError> {
        *self.get_mut(index)? = value;
        Ok(())
    }

    /// Borrow the sub-container selected by an index prefix
    ///
    /// With an empty prefix this is the whole array; with a full-rank index
    /// it is a rank-0 volume holding one element.
    pub fn subvolume(&self, prefix: &[usize]) -> Result<Volume<'_, T>, ArrayError> {
        let storage = self.storage()?;
        let offset = prefix_offset(&storage.shape, prefix)?;
        let shape = storage.shape[prefix.len()..].to_vec();
        let len: usize = shape.iter().product();
        Ok(Volume {
            shape,
            data: &storage.data[offset..offset + len],
        })
    }

    /// Row-major view of all elements
    pub fn as_slice(&self) -> Result<&[T], ArrayError> {
        Ok(&self.storage()?.data)
    }

    /// Consume the array, returning its row-major elements
    pub fn into_vec(self) -> Result<Vec<T>, ArrayError> {
        match self.state {
            State::Live(storage) => Ok(storage.data),
            State::Neutered => Err(ArrayError::Neutered),
            State::Poisoned => Err(ArrayError::Poisoned),
        }
    }
}

impl<T: Clone> Array<T> {
    /// Copy all elements out in row-major order
    pub fn to_vec(&self) -> Result<Vec<T>, ArrayError> {
        Ok(self.as_slice()?.to_vec())
    }
}

impl<T: Zero + Clone> Array<T> {
    /// Create a zero-filled nested array
    pub fn zeros(shape: &[usize]) -> Result<Self, ArrayError> {
        let len = shape.iter().product();
        Self::from_shape(shape, vec![T::zero(); len])
    }
}

fn full_offset(shape: &[usize], index: &[usize]) -> Result<usize, ArrayError> {
    if index.len() != shape.len() {
        return Err(ArrayError::RankMismatch {
            expected: shape.len(),
            got: index.len(),
        });
    }
    prefix_offset(shape, index)
}

/// A read-only view of a contiguous sub-container
///
/// Returned by [`Array::subvolume`]; borrows from the array and cannot
/// outlive it.
#[derive(Debug)]
pub struct Volume<'a, T> {
    shape: Vec<usize>,
    data: &'a [T],
}

impl<'a, T> Volume<'a, T> {
    /// Per-axis lengths
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of axes
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns the data as a slice
    pub fn as_slice(&self) -> &'a [T] {
        self.data
    }

    /// Get element at a local index
    pub fn get(&self, index: &[usize]) -> Option<&'a T> {
        let offset = full_offset(&self.shape, index).ok()?;
        self.data.get(offset)
    }
}

impl<'a, T> Deref for Volume<'a, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        self.data
    }
}

impl<'a, T> AsRef<[T]> for Volume<'a, T> {
    fn as_ref(&self) -> &[T] {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_array() {
        let array = Array::linear(vec![1, 2, 3, 4, 5]);

        assert_eq!(array.kind(), Ok(ArrayKind::Linear));
        assert_eq!(array.rank(), Ok(1));
        assert_eq!(array.shape(), Ok(&[5][..]));
        assert_eq!(array.get(&[4]), Ok(&5));
    }

    #[test]
    fn test_from_shape_mismatch() {
        assert!(matches!(
            Array::from_shape(&[2, 3], vec![0; 5]),
            Err(ArrayError::ShapeMismatch {
                expected: 6,
                got: 5
            })
        ));
        assert!(matches!(
            Array::<i32>::from_shape(&[], vec![]),
            Err(ArrayError::ZeroRank)
        ));
    }

    #[test]
    fn test_strides() {
        assert_eq!(strides(&[4, 3, 2]), vec![6, 2, 1]);
        assert_eq!(strides(&[7]), vec![1]);
        assert_eq!(strides(&[]), Vec::<usize>::new());
    }

    #[test]
    fn test_get_set_row_major() {
        let mut array = Array::<i32>::zeros(&[3, 4]).unwrap();
        array.set(&[2, 1], 7).unwrap();

        assert_eq!(array.get(&[2, 1]), Ok(&7));
        assert_eq!(array.as_slice().unwrap()[2 * 4 + 1], 7);
    }

    #[test]
    fn test_index_errors() {
        let array = Array::<f64>::zeros(&[2, 2]).unwrap();

        assert!(matches!(
            array.get(&[0]),
            Err(ArrayError::RankMismatch {
                expected: 2,
                got: 1
            })
        ));
        assert!(matches!(
            array.get(&[0, 2]),
            Err(ArrayError::OutOfBounds {
                axis: 1,
                index: 2,
                len: 2
            })
        ));
    }

    #[test]
    fn test_from_nested_rank() {
        let rows = Nested::from_rows(vec![vec![1, 2, 3], vec![4, 5, 6]]);
        let array = Array::from_nested(rows).unwrap();

        assert_eq!(array.kind(), Ok(ArrayKind::Nested));
        assert_eq!(array.shape(), Ok(&[2, 3][..]));
        assert_eq!(array.to_vec(), Ok(vec![1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn test_from_nested_ragged() {
        let rows = Nested::from_rows(vec![vec![1, 2, 3], vec![4, 5]]);
        assert!(matches!(
            Array::from_nested(rows),
            Err(ArrayError::Ragged { depth: 1 })
        ));

        let mixed = Nested::List(vec![
            Nested::List(vec![Nested::Leaf(1)]),
            Nested::Leaf(2),
        ]);
        assert!(matches!(
            Array::from_nested(mixed),
            Err(ArrayError::Ragged { depth: 1 })
        ));

        assert!(matches!(
            Array::from_nested(Nested::Leaf(1)),
            Err(ArrayError::ZeroRank)
        ));
    }

    #[test]
    fn test_zero_length_axis() {
        let array = Array::<i32>::zeros(&[0, 5]).unwrap();
        assert_eq!(array.dim_len(1), Ok(5));
        assert_eq!(array.num_elements(), Ok(0));
    }

    #[test]
    fn test_subvolume() {
        let array = Array::from_shape(&[2, 2, 3], (0..12).collect()).unwrap();

        let plane = array.subvolume(&[1]).unwrap();
        assert_eq!(plane.shape(), &[2, 3]);
        assert_eq!(plane.get(&[1, 0]), Some(&9));

        let row = array.subvolume(&[0, 1]).unwrap();
        assert_eq!(row.as_slice(), &[3, 4, 5]);

        let cell = array.subvolume(&[1, 1, 2]).unwrap();
        assert_eq!(cell.rank(), 0);
        assert_eq!(cell.get(&[]), Some(&11));

        let sum: i32 = row.iter().sum();
        assert_eq!(sum, 12);
    }

    #[test]
    fn test_transfer_neuters_source() {
        let mut array = Array::linear(vec![1, 2, 3]);
        let storage = array.transfer().unwrap();
        assert_eq!(storage.data, vec![1, 2, 3]);

        assert!(array.is_neutered());
        assert!(matches!(array.get(&[0]), Err(ArrayError::Neutered)));
        assert!(matches!(array.set(&[0], 9), Err(ArrayError::Neutered)));
        assert!(matches!(array.shape(), Err(ArrayError::Neutered)));
        assert!(matches!(array.transfer(), Err(ArrayError::Neutered)));
    }

    #[test]
    fn test_poisoned_is_distinct() {
        let mut array = Array::linear(vec![1.0]);
        array.poison();

        assert!(array.is_poisoned());
        assert!(!array.is_neutered());
        assert!(matches!(array.as_slice(), Err(ArrayError::Poisoned)));
    }

    #[test]
    fn test_into_vec() {
        let array = Array::from_shape(&[2, 1], vec!['a', 'b']).unwrap();
        assert_eq!(array.into_vec(), Ok(vec!['a', 'b']));
    }
}
