//! Argument validation and normalization
//!
//! [`normalize`] checks an iteration space and origin against the shape of
//! the source array and resolves them into storage bounds. Checks run in a
//! fixed order and the first failure wins:
//!
//! 1. iteration rank `I` must satisfy `1 <= I <= R`
//! 2. every axis descriptor is well formed, axis by axis
//! 3. the origin has length `R` and no negative entries
//! 4. effective bounds `lo + origin`, `hi + origin` lie within `0..=len`
//!
//! Nothing is mutated here.

use std::ops::Range;

use crate::error::BuildError;
use crate::space::{AxisDescriptor, Hint, Term};

/// A validated request, in storage coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Normalized {
    pub(crate) shape: Vec<usize>,
    /// Storage range of each iterated axis
    pub(crate) bounds: Vec<Range<usize>>,
    /// Slice size of each leading split axis
    pub(crate) slice_sizes: Vec<usize>,
    pub(crate) origin: Vec<usize>,
    pub(crate) hint: Hint,
}

impl Normalized {
    pub(crate) fn rank(&self) -> usize {
        self.shape.len()
    }

    pub(crate) fn iter_rank(&self) -> usize {
        self.bounds.len()
    }

    pub(crate) fn split_count(&self) -> usize {
        self.slice_sizes.len()
    }
}

/// One descriptor after its own checks, before the origin is applied
struct Axis {
    lo: i64,
    hi: i64,
    slice_size: Option<usize>,
}

fn check_axis(
    axis: usize,
    desc: &AxisDescriptor,
    prefix_split: bool,
    hint: Hint,
) -> Result<Axis, BuildError> {
    let terms = desc.terms();
    if !(2..=4).contains(&terms.len()) {
        return Err(BuildError::BadArrayLength(format!(
            "axis {axis} descriptor {desc} has {} terms, expected 2 to 4",
            terms.len()
        )));
    }

    let (lo, hi) = match (terms[0], terms[1]) {
        (Term::Int(lo), Term::Int(hi)) => (lo, hi),
        _ => {
            return Err(BuildError::BadValue(format!(
                "axis {axis} descriptor {desc} must start with two integer bounds"
            )))
        }
    };
    if lo > hi {
        return Err(BuildError::BadValue(format!(
            "axis {axis} has lo {lo} greater than hi {hi}"
        )));
    }

    let mut slice_size = None;
    if let Some(&marker) = terms.get(2) {
        if marker != Term::Split {
            return Err(BuildError::BadValue(format!(
                "axis {axis} descriptor {desc} has `{marker}` where SPLIT was expected"
            )));
        }
        if !prefix_split {
            return Err(BuildError::BadType(format!(
                "axis {axis} is split but a preceding axis is not"
            )));
        }
        let size = match terms.get(3) {
            None => hint.default_slice_size(),
            Some(&Term::Int(n)) if n > 0 => usize::try_from(n).map_err(|_| {
                BuildError::BadValue(format!("axis {axis} slice size {n} is too large"))
            })?,
            Some(term) => {
                return Err(BuildError::BadValue(format!(
                    "axis {axis} slice size `{term}` is not a positive integer"
                )))
            }
        };
        slice_size = Some(size);
    }

    Ok(Axis { lo, hi, slice_size })
}

fn check_origin(origin: Option<&[i64]>, rank: usize) -> Result<Vec<usize>, BuildError> {
    let Some(origin) = origin else {
        return Ok(vec![0; rank]);
    };
    if origin.len() != rank {
        return Err(BuildError::BadArrayLength(format!(
            "origin has length {}, array has rank {rank}",
            origin.len()
        )));
    }
    origin
        .iter()
        .enumerate()
        .map(|(axis, &o)| {
            usize::try_from(o).map_err(|_| {
                BuildError::BadType(format!(
                    "origin entry {o} on axis {axis} is not a non-negative integer"
                ))
            })
        })
        .collect()
}

/// Validate an iteration space against an array of the given shape
pub(crate) fn normalize(
    shape: &[usize],
    space: &[AxisDescriptor],
    origin: Option<&[i64]>,
    hint: Hint,
) -> Result<Normalized, BuildError> {
    let rank = shape.len();
    let iter_rank = space.len();
    if iter_rank == 0 || iter_rank > rank {
        return Err(BuildError::BadArrayLength(format!(
            "iteration space has {iter_rank} axes, expected 1 to {rank}"
        )));
    }

    let mut axes = Vec::with_capacity(iter_rank);
    let mut prefix_split = true;
    for (axis, desc) in space.iter().enumerate() {
        let checked = check_axis(axis, desc, prefix_split, hint)?;
        prefix_split = checked.slice_size.is_some();
        axes.push(checked);
    }

    let origin = check_origin(origin, rank)?;

    let mut bounds = Vec::with_capacity(iter_rank);
    for (axis, ((a, &o), &len)) in axes.iter().zip(&origin).zip(shape).enumerate() {
        let offset = i64::try_from(o).unwrap_or(i64::MAX);
        let lo = a.lo.saturating_add(offset);
        let hi = a.hi.saturating_add(offset);
        let out_of_bounds = BuildError::BadIndex { axis, lo, hi, len };
        let (Ok(start), Ok(end)) = (usize::try_from(lo), usize::try_from(hi)) else {
            return Err(out_of_bounds);
        };
        if end > len {
            return Err(out_of_bounds);
        }
        bounds.push(start..end);
    }

    Ok(Normalized {
        shape: shape.to_vec(),
        bounds,
        slice_sizes: axes.iter().filter_map(|a| a.slice_size).collect(),
        origin,
        hint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::space::{IterationAxis, SPLIT};

    fn axes<const N: usize>(descs: [AxisDescriptor; N]) -> Vec<AxisDescriptor> {
        descs.to_vec()
    }

    fn kind(result: Result<Normalized, BuildError>) -> ErrorKind {
        match result {
            Ok(n) => panic!("expected an error, got {n:?}"),
            Err(e) => e.kind(),
        }
    }

    #[test]
    fn test_simple_space() {
        let n = normalize(&[10], &axes([(0i64..10).into()]), None, Hint::Default).unwrap();
        assert_eq!(n.rank(), 1);
        assert_eq!(n.iter_rank(), 1);
        assert_eq!(n.bounds, vec![0..10]);
        assert_eq!(n.split_count(), 0);
        assert_eq!(n.origin, vec![0]);
    }

    #[test]
    fn test_origin_offsets_bounds() {
        let space = axes([(-1i64..2).into(), (0i64..3).into()]);
        let n = normalize(&[4, 4], &space, Some(&[1, 1]), Hint::Default).unwrap();
        assert_eq!(n.bounds, vec![0..3, 1..4]);
    }

    #[test]
    fn test_split_sizes_resolve_hint() {
        let space = axes([
            IterationAxis::new(0, 8).split().into(),
            IterationAxis::new(0, 8).split_by(3).into(),
        ]);
        let n = normalize(&[8, 8], &space, None, Hint::Fine).unwrap();
        assert_eq!(n.slice_sizes, vec![64, 3]);

        let n = normalize(&[8, 8], &space, None, Hint::Coarse).unwrap();
        assert_eq!(n.slice_sizes, vec![1, 3]);
    }

    #[test]
    fn test_iteration_rank_limits() {
        assert_eq!(
            kind(normalize(&[4], &[], None, Hint::Default)),
            ErrorKind::BadArrayLength
        );
        let space = axes([(0i64..1).into(), (0i64..1).into()]);
        assert_eq!(
            kind(normalize(&[4], &space, None, Hint::Default)),
            ErrorKind::BadArrayLength
        );
    }

    #[test]
    fn test_descriptor_length() {
        let short = axes([AxisDescriptor::new([0i64])]);
        assert_eq!(
            kind(normalize(&[4], &short, None, Hint::Default)),
            ErrorKind::BadArrayLength
        );
        let long = axes([AxisDescriptor::new([
            Term::Int(0),
            Term::Int(4),
            SPLIT,
            Term::Int(2),
            Term::Int(2),
        ])]);
        assert_eq!(
            kind(normalize(&[4], &long, None, Hint::Default)),
            ErrorKind::BadArrayLength
        );
    }

    #[test]
    fn test_bad_values() {
        let inverted = axes([AxisDescriptor::new([5i64, 2])]);
        assert_eq!(
            kind(normalize(&[10], &inverted, None, Hint::Default)),
            ErrorKind::BadValue
        );

        let split_bound = axes([AxisDescriptor::new([SPLIT, Term::Int(3)])]);
        assert_eq!(
            kind(normalize(&[10], &split_bound, None, Hint::Default)),
            ErrorKind::BadValue
        );

        let bad_marker = axes([AxisDescriptor::new([0i64, 4, 7])]);
        assert_eq!(
            kind(normalize(&[10], &bad_marker, None, Hint::Default)),
            ErrorKind::BadValue
        );

        for size in [Term::Int(0), Term::Int(-3), SPLIT] {
            let bad_size = axes([AxisDescriptor::new([Term::Int(0), Term::Int(4), SPLIT, size])]);
            assert_eq!(
                kind(normalize(&[10], &bad_size, None, Hint::Default)),
                ErrorKind::BadValue
            );
        }
    }

    #[test]
    fn test_split_must_be_prefix() {
        let space = axes([
            IterationAxis::new(0, 4).into(),
            IterationAxis::new(0, 4).split().into(),
        ]);
        assert_eq!(
            kind(normalize(&[4, 4], &space, None, Hint::Default)),
            ErrorKind::BadType
        );
    }

    #[test]
    fn test_origin_checks() {
        let space = axes([(0i64..2).into()]);
        assert_eq!(
            kind(normalize(&[4], &space, Some(&[-1]), Hint::Default)),
            ErrorKind::BadType
        );
        assert_eq!(
            kind(normalize(&[4], &space, Some(&[0, 0]), Hint::Default)),
            ErrorKind::BadArrayLength
        );
    }

    #[test]
    fn test_bounds_checks() {
        let space = axes([(0i64..5).into()]);
        assert!(matches!(
            normalize(&[4], &space, None, Hint::Default),
            Err(BuildError::BadIndex {
                axis: 0,
                lo: 0,
                hi: 5,
                len: 4
            })
        ));

        let negative = axes([(-2i64..2).into()]);
        assert!(matches!(
            normalize(&[4], &negative, Some(&[1]), Hint::Default),
            Err(BuildError::BadIndex { lo: -1, .. })
        ));

        let second = axes([(0i64..2).into(), (1i64..4).into()]);
        assert!(matches!(
            normalize(&[4, 3], &second, Some(&[0, 1]), Hint::Default),
            Err(BuildError::BadIndex { axis: 1, .. })
        ));
    }

    #[test]
    fn test_full_range_is_in_bounds() {
        let space = axes([(0i64..4).into(), (4i64..4).into()]);
        let n = normalize(&[4, 4], &space, None, Hint::Default).unwrap();
        assert_eq!(n.bounds, vec![0..4, 4..4]);
    }

    #[test]
    fn test_first_failure_wins() {
        // Descriptor errors are reported before origin and bounds errors
        let space = axes([AxisDescriptor::new([3i64, 1])]);
        assert_eq!(
            kind(normalize(&[2], &space, Some(&[-1]), Hint::Default)),
            ErrorKind::BadValue
        );
        // Origin errors are reported before bounds errors
        let space = axes([(0i64..9).into()]);
        assert_eq!(
            kind(normalize(&[2], &space, Some(&[-1]), Hint::Default)),
            ErrorKind::BadType
        );
    }
}
