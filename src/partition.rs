//! Strip and tile partitioning of an iteration space
//!
//! The leading `S` axes of an iteration space are cut into slices; trailing
//! axes stay whole. One split axis yields *strips*, two or more yield
//! *tiles*. Every combination of slice indices, enumerated row-major
//! (outermost axis slowest), is one [`WorkUnit`] described by its base
//! coordinates and per-axis lengths.
//!
//! Along a split axis with `range = hi - lo` and slice size `size`:
//!
//! - `slice_count = ceil(range / size)`
//! - `last_size = range % size`, or `size` when that is zero
//!
//! Work units never overlap and together cover the space exactly once, so
//! they can run on independent workers without coordination.
//!
//! # Example
//!
//! ```
//! use multicore::partition::{partition, Layout};
//!
//! // 10 elements in slices of 4: 0..4, 4..8, 8..10
//! let p = partition(&[0..10], &[4]).unwrap();
//! assert_eq!(p.layout(), Layout::Strip);
//! let lens: Vec<_> = p.iter().map(|u| u.len()[0]).collect();
//! assert_eq!(lens, vec![4, 4, 2]);
//! ```

use std::fmt;
use std::ops::Range;

use thiserror::Error;

/// Errors that can occur during partitioning
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("iteration space must have at least one axis")]
    NoAxes,

    #[error("{split} split axes requested for a space of rank {rank}")]
    TooManySplitAxes { split: usize, rank: usize },

    #[error("slice size must be greater than 0 on axis {axis}")]
    InvalidSliceSize { axis: usize },

    #[error("axis {axis} has inverted range {start}..{end}")]
    InvertedRange { axis: usize, start: usize, end: usize },
}

/// Shape class of the work units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Nothing split: a single unit spanning the whole space
    Whole,
    /// One leading axis split
    Strip,
    /// Two or more leading axes split
    Tile,
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Whole => write!(f, "whole"),
            Layout::Strip => write!(f, "strips"),
            Layout::Tile => write!(f, "tiles"),
        }
    }
}

/// How one axis is cut
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisSlicing {
    pub start: usize,
    pub range: usize,
    pub slice_size: usize,
    pub slice_count: usize,
    pub last_size: usize,
}

impl AxisSlicing {
    fn new(start: usize, range: usize, slice_size: usize) -> Self {
        if range == 0 {
            return Self {
                start,
                range,
                slice_size,
                slice_count: 0,
                last_size: 0,
            };
        }
        let slice_count = range.div_ceil(slice_size);
        let last_size = match range % slice_size {
            0 => slice_size,
            rem => rem,
        };
        Self {
            start,
            range,
            slice_size,
            slice_count,
            last_size,
        }
    }

    fn slice(&self, index: usize) -> (usize, usize) {
        let base = self.start + index * self.slice_size;
        let len = if index + 1 == self.slice_count {
            self.last_size
        } else {
            self.slice_size
        };
        (base, len)
    }

    /// Length of the longest slice
    fn max_len(&self) -> usize {
        match self.slice_count {
            0 => 0,
            1 => self.last_size,
            _ => self.slice_size,
        }
    }
}

/// One independent unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    id: usize,
    slice: Vec<usize>,
    base: Vec<usize>,
    len: Vec<usize>,
}

impl WorkUnit {
    /// Position in row-major enumeration order
    pub fn id(&self) -> usize {
        self.id
    }

    /// Slice index along each axis
    pub fn slice(&self) -> &[usize] {
        &self.slice
    }

    /// Storage coordinates of the unit's first point
    pub fn base(&self) -> &[usize] {
        &self.base
    }

    /// Extent along each axis
    pub fn len(&self) -> &[usize] {
        &self.len
    }

    /// Number of iteration points in this unit
    pub fn num_points(&self) -> usize {
        self.len.iter().product()
    }

    /// Returns true if the unit has no points
    pub fn is_empty(&self) -> bool {
        self.num_points() == 0
    }

    /// Per-axis storage ranges covered by this unit
    pub fn ranges(&self) -> Vec<Range<usize>> {
        self.base
            .iter()
            .zip(&self.len)
            .map(|(&b, &l)| b..b + l)
            .collect()
    }

    /// Returns true if `point` lies inside this unit
    pub fn contains(&self, point: &[usize]) -> bool {
        point.len() == self.base.len()
            && point
                .iter()
                .zip(self.ranges())
                .all(|(p, range)| range.contains(p))
    }
}

/// A complete partition of an iteration space
///
/// Units are not stored; each one is derived from its id on demand, so a
/// partition costs one [`AxisSlicing`] per axis however many units it has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    axes: Vec<AxisSlicing>,
    split_count: usize,
}

impl Partition {
    /// Per-axis slicing, split axes first
    pub fn axes(&self) -> &[AxisSlicing] {
        &self.axes
    }

    /// Number of leading axes that are cut into slices
    pub fn split_count(&self) -> usize {
        self.split_count
    }

    /// Strips, tiles, or a single whole unit
    pub fn layout(&self) -> Layout {
        match self.split_count {
            0 => Layout::Whole,
            1 => Layout::Strip,
            _ => Layout::Tile,
        }
    }

    /// Number of slices along each axis
    pub fn slice_counts(&self) -> Vec<usize> {
        self.axes.iter().map(|a| a.slice_count).collect()
    }

    /// Returns the number of work units
    pub fn num_units(&self) -> usize {
        self.axes.iter().map(|a| a.slice_count).product()
    }

    /// The work unit with the given id, if there is one
    pub fn unit(&self, id: usize) -> Option<WorkUnit> {
        if id >= self.num_units() {
            return None;
        }
        let mut slice = vec![0; self.axes.len()];
        let mut rest = id;
        for (index, axis) in slice.iter_mut().zip(&self.axes).rev() {
            *index = rest % axis.slice_count;
            rest /= axis.slice_count;
        }
        let (base, len) = slice
            .iter()
            .zip(&self.axes)
            .map(|(&index, axis)| axis.slice(index))
            .unzip();
        Some(WorkUnit {
            id,
            slice,
            base,
            len,
        })
    }

    /// Returns an iterator over the work units in enumeration order
    pub fn iter(&self) -> Units<'_> {
        Units {
            partition: self,
            next: 0,
            end: self.num_units(),
        }
    }

    /// Largest number of points in any one unit
    pub fn max_unit_points(&self) -> usize {
        self.axes.iter().map(AxisSlicing::max_len).product()
    }

    /// Verify that every point of the space is covered by exactly one unit
    pub fn is_disjoint_cover(&self) -> bool {
        let shape: Vec<usize> = self.axes.iter().map(|a| a.range).collect();
        let total: usize = shape.iter().product();
        let mut seen = vec![false; total];
        let strides = crate::array::strides(&shape);

        for unit in self {
            let local: Vec<Range<usize>> = unit
                .ranges()
                .into_iter()
                .zip(&self.axes)
                .map(|(r, a)| r.start - a.start..r.end - a.start)
                .collect();
            if local.iter().zip(&shape).any(|(r, &len)| r.end > len) {
                return false;
            }
            let mut ok = true;
            crate::view::for_each_point(&local, |point| {
                let offset: usize = point.iter().zip(&strides).map(|(p, s)| p * s).sum();
                if seen[offset] {
                    ok = false;
                }
                seen[offset] = true;
            });
            if !ok {
                return false;
            }
        }
        seen.iter().all(|&b| b)
    }
}

/// Iterator over the work units of a [`Partition`]
#[derive(Debug, Clone)]
pub struct Units<'a> {
    partition: &'a Partition,
    next: usize,
    end: usize,
}

impl<'a> Iterator for Units<'a> {
    type Item = WorkUnit;

    fn next(&mut self) -> Option<WorkUnit> {
        if self.next >= self.end {
            return None;
        }
        let unit = self.partition.unit(self.next);
        self.next += 1;
        unit
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.end - self.next;
        (n, Some(n))
    }
}

impl<'a> ExactSizeIterator for Units<'a> {}

impl<'a> IntoIterator for &'a Partition {
    type Item = WorkUnit;
    type IntoIter = Units<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Partition an iteration space
///
/// # Arguments
///
/// * `ranges` - storage range of every axis, outermost first
/// * `slice_sizes` - slice size for each of the leading split axes; axes
///   beyond `slice_sizes.len()` are kept whole
///
/// # Returns
///
/// The partition, whose units enumerate row-major. A space with an empty
/// axis has none.
pub fn partition(
    ranges: &[Range<usize>],
    slice_sizes: &[usize],
) -> Result<Partition, PartitionError> {
    if ranges.is_empty() {
        return Err(PartitionError::NoAxes);
    }
    if slice_sizes.len() > ranges.len() {
        return Err(PartitionError::TooManySplitAxes {
            split: slice_sizes.len(),
            rank: ranges.len(),
        });
    }

    let mut axes = Vec::with_capacity(ranges.len());
    for (axis, range) in ranges.iter().enumerate() {
        if range.start > range.end {
            return Err(PartitionError::InvertedRange {
                axis,
                start: range.start,
                end: range.end,
            });
        }
        let extent = range.end - range.start;
        let size = match slice_sizes.get(axis) {
            Some(0) => return Err(PartitionError::InvalidSliceSize { axis }),
            Some(&size) => size,
            None => extent.max(1),
        };
        axes.push(AxisSlicing::new(range.start, extent, size));
    }

    Ok(Partition {
        axes,
        split_count: slice_sizes.len(),
    })
}
