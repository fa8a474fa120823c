//! Mutable volumes over disjoint runs of storage
//!
//! A work unit's destination inside a row-major buffer is generally not
//! contiguous: a tile is one short run per row. [`VolumeMut`] stores those
//! runs as separate `&mut [T]` slices carved out of the buffer with
//! `split_at_mut`, so every unit receives an exclusive, zero-copy view and
//! many views over one buffer can be handed to independent workers.
//!
//! The leading `lead` axes of a volume select a run; the remaining axes
//! index inside it. Iterating runs in order visits elements in row-major
//! order of the volume's own shape.

use std::convert::Infallible;
use std::ops::{Index, IndexMut, Range};

use num_traits::Zero;

use crate::array::{strides, ArrayError};
use crate::partition::WorkUnit;

/// A mutable, origin-zero view of a subvolume
#[derive(Debug)]
pub struct VolumeMut<'a, T> {
    shape: Vec<usize>,
    lead: usize,
    runs: Vec<&'a mut [T]>,
}

impl<'a, T> VolumeMut<'a, T> {
    pub(crate) fn from_runs(shape: Vec<usize>, lead: usize, runs: Vec<&'a mut [T]>) -> Self {
        debug_assert!(lead <= shape.len());
        debug_assert_eq!(runs.len(), shape[..lead].iter().product::<usize>());
        Self { shape, lead, runs }
    }

    /// A volume over one contiguous run
    pub(crate) fn contiguous(shape: Vec<usize>, data: &'a mut [T]) -> Self {
        Self::from_runs(shape, 0, vec![data])
    }

    /// A volume over a contiguous buffer cut into equal runs
    pub(crate) fn chunked(shape: Vec<usize>, lead: usize, data: &'a mut [T]) -> Self {
        let count: usize = shape[..lead].iter().product();
        let run_len: usize = shape[lead..].iter().product();
        let runs = if run_len == 0 {
            (0..count).map(|_| <&mut [T]>::default()).collect()
        } else {
            data.chunks_mut(run_len).collect()
        };
        Self::from_runs(shape, lead, runs)
    }

    /// Per-axis lengths of the volume
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of axes
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// Returns true if the volume has no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn locate(&self, index: &[usize]) -> Result<(usize, usize), ArrayError> {
        if index.len() != self.shape.len() {
            return Err(ArrayError::RankMismatch {
                expected: self.shape.len(),
                got: index.len(),
            });
        }
        let mut run = 0;
        let mut offset = 0;
        for (axis, (&i, &len)) in index.iter().zip(&self.shape).enumerate() {
            if i >= len {
                return Err(ArrayError::OutOfBounds {
                    axis,
                    index: i,
                    len,
                });
            }
            if axis < self.lead {
                run = run * len + i;
            } else {
                offset = offset * len + i;
            }
        }
        Ok((run, offset))
    }

    /// Get element at a local index
    pub fn get(&self, index: &[usize]) -> Option<&T> {
        let (run, offset) = self.locate(index).ok()?;
        self.runs[run].get(offset)
    }

    /// Get a mutable reference to the element at a local index
    pub fn get_mut(&mut self, index: &[usize]) -> Option<&mut T> {
        let (run, offset) = self.locate(index).ok()?;
        self.runs[run].get_mut(offset)
    }

    /// Store a value at a local index
    pub fn set(&mut self, index: &[usize], value: T) -> Result<(), ArrayError> {
        let (run, offset) = self.locate(index)?;
        self.runs[run][offset] = value;
        Ok(())
    }

    /// Elements in row-major order
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.runs.iter().flat_map(|run| run.iter())
    }

    /// Mutable elements in row-major order
    pub fn iter_mut(&mut self) -> Box<dyn Iterator<Item = &mut T> + '_> {
        Box::new(self.runs.iter_mut().flat_map(|run| run.iter_mut()))
    }

    pub(crate) fn runs(&self) -> &[&'a mut [T]] {
        &self.runs
    }
}

impl<'a, T: Clone> VolumeMut<'a, T> {
    /// Set every element to `value`
    pub fn fill(&mut self, value: T) {
        for run in &mut self.runs {
            run.fill(value.clone());
        }
    }
}

impl<'a, T: Copy> VolumeMut<'a, T> {
    /// Copy every element of `src`, which must have the same geometry
    pub(crate) fn copy_from(&mut self, src: &VolumeMut<'_, T>) {
        debug_assert_eq!(self.shape, src.shape);
        debug_assert_eq!(self.lead, src.lead);
        for (dst, src) in self.runs.iter_mut().zip(src.runs()) {
            dst.copy_from_slice(src);
        }
    }
}

impl<'a, T: Zero + Clone> VolumeMut<'a, T> {
    pub(crate) fn clear(&mut self) {
        self.fill(T::zero());
    }
}

impl<'a, 'i, T> Index<&'i [usize]> for VolumeMut<'a, T> {
    type Output = T;

    fn index(&self, index: &'i [usize]) -> &T {
        match self.locate(index) {
            Ok((run, offset)) => &self.runs[run][offset],
            Err(e) => panic!("{e}"),
        }
    }
}

impl<'a, 'i, T> IndexMut<&'i [usize]> for VolumeMut<'a, T> {
    fn index_mut(&mut self, index: &'i [usize]) -> &mut T {
        match self.locate(index) {
            Ok((run, offset)) => &mut self.runs[run][offset],
            Err(e) => panic!("{e}"),
        }
    }
}

impl<'a, 'i, T, const N: usize> Index<&'i [usize; N]> for VolumeMut<'a, T> {
    type Output = T;

    fn index(&self, index: &'i [usize; N]) -> &T {
        &self[&index[..]]
    }
}

impl<'a, 'i, T, const N: usize> IndexMut<&'i [usize; N]> for VolumeMut<'a, T> {
    fn index_mut(&mut self, index: &'i [usize; N]) -> &mut T {
        &mut self[&index[..]]
    }
}

/// Visit every point of a box in row-major order, stopping at the first error
pub(crate) fn try_for_each_point<E, F>(ranges: &[Range<usize>], mut f: F) -> Result<(), E>
where
    F: FnMut(&[usize]) -> Result<(), E>,
{
    if ranges.iter().any(|r| r.start >= r.end) {
        return Ok(());
    }
    let mut point: Vec<usize> = ranges.iter().map(|r| r.start).collect();
    loop {
        f(&point)?;
        let mut axis = ranges.len();
        loop {
            if axis == 0 {
                return Ok(());
            }
            axis -= 1;
            point[axis] += 1;
            if point[axis] < ranges[axis].end {
                break;
            }
            point[axis] = ranges[axis].start;
        }
    }
}

/// Visit every point of a box in row-major order
pub(crate) fn for_each_point<F>(ranges: &[Range<usize>], mut f: F)
where
    F: FnMut(&[usize]),
{
    let _ = try_for_each_point::<Infallible, _>(ranges, |point| {
        f(point);
        Ok(())
    });
}

/// Shape of a unit's volume: its iterated extents followed by the full
/// inner axes of the array
pub(crate) fn unit_shape(unit: &WorkUnit, shape: &[usize], iter_rank: usize) -> Vec<usize> {
    unit.len()
        .iter()
        .chain(&shape[iter_rank..])
        .copied()
        .collect()
}

/// Carve one exclusive destination volume per work unit out of `data`
///
/// Each unit contributes one run per index of its leading `iter_rank - 1`
/// axes. The units are disjoint, so after sorting by offset the runs can be
/// split off the buffer in a single pass.
pub(crate) fn carve<'a, T>(
    data: &'a mut [T],
    shape: &[usize],
    iter_rank: usize,
    units: &[WorkUnit],
) -> Vec<VolumeMut<'a, T>> {
    let strides = strides(shape);
    let inner: usize = shape[iter_rank..].iter().product();
    let lead = iter_rank - 1;

    let mut segments = Vec::new();
    for (slot, unit) in units.iter().enumerate() {
        let run_len = unit.len()[lead] * inner;
        let rows: Vec<Range<usize>> = unit.ranges()[..lead].to_vec();
        let last_base = unit.base()[lead] * strides[lead];
        for_each_point(&rows, |row| {
            let offset: usize = row
                .iter()
                .zip(&strides)
                .map(|(i, s)| i * s)
                .sum::<usize>()
                + last_base;
            segments.push((offset, run_len, slot));
        });
    }
    segments.sort_unstable_by_key(|&(offset, len, _)| (offset, len));

    let mut per_unit: Vec<Vec<&'a mut [T]>> = units.iter().map(|_| Vec::new()).collect();
    let mut rest: &'a mut [T] = data;
    let mut consumed = 0;
    for (offset, len, slot) in segments {
        let tail = std::mem::take(&mut rest);
        let (_, tail) = tail.split_at_mut(offset - consumed);
        let (run, tail) = tail.split_at_mut(len);
        rest = tail;
        consumed = offset + len;
        per_unit[slot].push(run);
    }

    units
        .iter()
        .zip(per_unit)
        .map(|(unit, runs)| VolumeMut::from_runs(unit_shape(unit, shape, iter_rank), lead, runs))
        .collect()
}

/// Private zero-initialised staging buffer, reused while the unit shape
/// stays the same
#[derive(Debug)]
pub(crate) struct Scratch<T> {
    shape: Vec<usize>,
    buf: Vec<T>,
    allocations: u64,
}

impl<T: Zero + Clone> Scratch<T> {
    pub(crate) fn new() -> Self {
        Self {
            shape: Vec::new(),
            buf: Vec::new(),
            allocations: 0,
        }
    }

    pub(crate) fn prepare(&mut self, shape: &[usize], lead: usize) -> VolumeMut<'_, T> {
        if self.allocations == 0 || self.shape != shape {
            self.buf = vec![T::zero(); shape.iter().product()];
            self.shape = shape.to_vec();
            self.allocations += 1;
        } else {
            self.buf.fill(T::zero());
        }
        VolumeMut::chunked(self.shape.clone(), lead, &mut self.buf)
    }

    pub(crate) fn allocations(&self) -> u64 {
        self.allocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::partition;

    #[test]
    fn test_for_each_point_row_major() {
        let mut seen = Vec::new();
        for_each_point(&[1..3, 0..2], |p| seen.push(p.to_vec()));
        assert_eq!(
            seen,
            vec![vec![1, 0], vec![1, 1], vec![2, 0], vec![2, 1]]
        );
    }

    #[test]
    fn test_for_each_point_edges() {
        let mut count = 0;
        for_each_point(&[0..3, 2..2], |_| count += 1);
        assert_eq!(count, 0);

        let mut seen = Vec::new();
        for_each_point(&[], |p| seen.push(p.to_vec()));
        assert_eq!(seen, vec![Vec::<usize>::new()]);
    }

    #[test]
    fn test_try_for_each_point_stops() {
        let mut visited = 0;
        let result: Result<(), usize> = try_for_each_point(&[0..10], |p| {
            visited += 1;
            if p[0] == 3 {
                Err(p[0])
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err(3));
        assert_eq!(visited, 4);
    }

    #[test]
    fn test_contiguous_volume() {
        let mut data = vec![0; 6];
        {
            let mut volume = VolumeMut::contiguous(vec![2, 3], &mut data);
            volume[&[1, 2]] = 7;
            volume.set(&[0, 1], 3).unwrap();
            assert_eq!(volume.get(&[1, 2]), Some(&7));
            assert_eq!(volume.get(&[2, 0]), None);
            assert!(matches!(
                volume.set(&[0], 1),
                Err(ArrayError::RankMismatch { .. })
            ));
        }
        assert_eq!(data, vec![0, 3, 0, 0, 0, 7]);
    }

    #[test]
    fn test_chunked_volume_iterates_row_major() {
        let mut data: Vec<i32> = (0..12).collect();
        let volume = VolumeMut::chunked(vec![3, 4], 1, &mut data);
        assert_eq!(volume.runs().len(), 3);
        assert_eq!(volume[&[2, 1]], 9);
        let flat: Vec<i32> = volume.iter().copied().collect();
        assert_eq!(flat, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_carve_tiles_are_disjoint() {
        let shape = [4, 6];
        let mut data = vec![0usize; 24];
        let p = partition(&[0..4, 0..6], &[3, 4]).unwrap();

        let mut volumes = carve(&mut data, &shape, 2, &p.iter().collect::<Vec<_>>());
        assert_eq!(volumes.len(), 4);
        assert_eq!(volumes[3].shape(), &[1, 2]);
        for (id, volume) in volumes.iter_mut().enumerate() {
            volume.fill(id + 1);
        }
        drop(volumes);

        #[rustfmt::skip]
        let expected = vec![
            1, 1, 1, 1, 2, 2,
            1, 1, 1, 1, 2, 2,
            1, 1, 1, 1, 2, 2,
            3, 3, 3, 3, 4, 4,
        ];
        assert_eq!(data, expected);
    }

    #[test]
    fn test_carve_with_inner_axes() {
        // Strips over axis 0 of a 3-axis array, iterating only axis 0
        let shape = [4, 2, 2];
        let mut data = vec![0u8; 16];
        let p = partition(&[1..4], &[2]).unwrap();

        let mut volumes = carve(&mut data, &shape, 1, &p.iter().collect::<Vec<_>>());
        assert_eq!(volumes[0].shape(), &[2, 2, 2]);
        assert_eq!(volumes[1].shape(), &[1, 2, 2]);
        volumes[0][&[1, 1, 0]] = 5;
        volumes[1][&[0, 0, 1]] = 9;
        drop(volumes);

        assert_eq!(data[(2 * 2 + 1) * 2], 5);
        assert_eq!(data[3 * 4 + 1], 9);
        assert_eq!(data.iter().filter(|&&v| v != 0).count(), 2);
    }

    #[test]
    fn test_carve_partial_columns() {
        // Split axis 0 only; axis 1 iterates a sub-range so runs are not whole rows
        let shape = [3, 5];
        let mut data = vec![0i32; 15];
        let p = partition(&[0..3, 1..4], &[2]).unwrap();

        let mut volumes = carve(&mut data, &shape, 2, &p.iter().collect::<Vec<_>>());
        for volume in volumes.iter_mut() {
            volume.fill(1);
        }
        drop(volumes);

        #[rustfmt::skip]
        let expected = vec![
            0, 1, 1, 1, 0,
            0, 1, 1, 1, 0,
            0, 1, 1, 1, 0,
        ];
        assert_eq!(data, expected);
    }

    #[test]
    fn test_scratch_reuse() {
        let mut scratch = Scratch::<f64>::new();
        {
            let mut v = scratch.prepare(&[4], 0);
            v.fill(2.0);
        }
        {
            let v = scratch.prepare(&[4], 0);
            assert!(v.iter().all(|&x| x == 0.0));
        }
        assert_eq!(scratch.allocations(), 1);

        let v = scratch.prepare(&[2], 0);
        assert_eq!(v.len(), 2);
        assert_eq!(scratch.allocations(), 2);
    }

    #[test]
    fn test_iter_mut_row_major() {
        let mut data = vec![0u32; 6];
        {
            let mut volume = VolumeMut::chunked(vec![2, 3], 1, &mut data);
            for (i, x) in volume.iter_mut().enumerate() {
                *x = i as u32 * 2;
            }
        }
        assert_eq!(data, vec![0, 2, 4, 6, 8, 10]);
    }

    #[test]
    fn test_copy_from() {
        let mut src_data = vec![1, 2, 3, 4];
        let mut dst_data = vec![0; 4];
        let src = VolumeMut::chunked(vec![2, 2], 1, &mut src_data);
        let mut dst = VolumeMut::chunked(vec![2, 2], 1, &mut dst_data);
        dst.copy_from(&src);
        drop(dst);
        assert_eq!(dst_data, vec![1, 2, 3, 4]);
    }
}
