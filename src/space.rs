//! Iteration-space descriptors
//!
//! Each logical axis of work is described by a short list of terms:
//!
//! ```text
//! [lo, hi]                 iterate lo..hi
//! [lo, hi, SPLIT]          ... and partition this axis using the hint's slice size
//! [lo, hi, SPLIT, size]    ... and partition into slices of `size`
//! ```
//!
//! [`AxisDescriptor`] carries that raw list unchecked so that malformed
//! inputs reach validation and fail with the proper error kind.
//! [`IterationAxis`] is the typed way to write a well-formed descriptor.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// Scheduling hint selecting the default slice size for split axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hint {
    /// Expensive elements: one element per slice
    Coarse,
    #[default]
    Default,
    /// Cheap elements: large slices
    Fine,
}

impl Hint {
    /// Slice size used for split axes that do not give their own
    pub fn default_slice_size(self) -> usize {
        match self {
            Hint::Coarse => 1,
            Hint::Default => 32,
            Hint::Fine => 64,
        }
    }
}

impl fmt::Display for Hint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hint::Coarse => write!(f, "coarse"),
            Hint::Default => write!(f, "default"),
            Hint::Fine => write!(f, "fine"),
        }
    }
}

impl FromStr for Hint {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coarse" => Ok(Hint::Coarse),
            "default" => Ok(Hint::Default),
            "fine" => Ok(Hint::Fine),
            other => Err(BuildError::BadValue(format!("unrecognized hint `{other}`"))),
        }
    }
}

/// One element of an axis descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Term {
    Int(i64),
    /// Partition this axis into work units
    Split,
}

/// Shorthand for [`Term::Split`]
pub const SPLIT: Term = Term::Split;

impl From<i64> for Term {
    fn from(value: i64) -> Self {
        Term::Int(value)
    }
}

impl From<i32> for Term {
    fn from(value: i32) -> Self {
        Term::Int(value.into())
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Int(v) => write!(f, "{v}"),
            Term::Split => write!(f, "SPLIT"),
        }
    }
}

/// Raw, unvalidated description of one iteration axis
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AxisDescriptor(Vec<Term>);

impl AxisDescriptor {
    /// Descriptor from raw terms, checked only when a build runs
    pub fn new<I, T>(terms: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Term>,
    {
        Self(terms.into_iter().map(Into::into).collect())
    }

    /// The raw terms in order
    pub fn terms(&self) -> &[Term] {
        &self.0
    }

    /// Number of terms
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no terms
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AxisDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, term) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{term}")?;
        }
        write!(f, "]")
    }
}

impl From<Vec<Term>> for AxisDescriptor {
    fn from(terms: Vec<Term>) -> Self {
        Self(terms)
    }
}

impl From<Range<i64>> for AxisDescriptor {
    fn from(range: Range<i64>) -> Self {
        Self(vec![Term::Int(range.start), Term::Int(range.end)])
    }
}

/// A well-formed iteration axis
///
/// ```
/// use multicore::{AxisDescriptor, IterationAxis, Term, SPLIT};
///
/// let axis = IterationAxis::new(0, 10).split_by(4);
/// assert_eq!(
///     AxisDescriptor::from(axis).terms(),
///     &[Term::Int(0), Term::Int(10), SPLIT, Term::Int(4)]
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IterationAxis {
    lo: i64,
    hi: i64,
    split: bool,
    slice_size: Option<i64>,
}

impl IterationAxis {
    /// Iterate `lo..hi` along this axis
    pub fn new(lo: i64, hi: i64) -> Self {
        Self {
            lo,
            hi,
            split: false,
            slice_size: None,
        }
    }

    /// Split this axis using the hint's default slice size
    pub fn split(mut self) -> Self {
        self.split = true;
        self
    }

    /// Split this axis into slices of `size` elements
    pub fn split_by(mut self, size: i64) -> Self {
        self.split = true;
        self.slice_size = Some(size);
        self
    }

    /// Inclusive lower bound, before the origin is applied
    pub fn lo(&self) -> i64 {
        self.lo
    }

    /// Exclusive upper bound, before the origin is applied
    pub fn hi(&self) -> i64 {
        self.hi
    }

    /// Returns true if the axis is cut into slices
    pub fn is_split(&self) -> bool {
        self.split
    }

    /// Explicit slice size; `None` defers to the build's hint
    pub fn slice_size(&self) -> Option<i64> {
        self.slice_size
    }
}

impl From<IterationAxis> for AxisDescriptor {
    fn from(axis: IterationAxis) -> Self {
        let mut terms = vec![Term::Int(axis.lo), Term::Int(axis.hi)];
        if axis.split {
            terms.push(Term::Split);
            if let Some(size) = axis.slice_size {
                terms.push(Term::Int(size));
            }
        }
        Self(terms)
    }
}

impl From<Range<i64>> for IterationAxis {
    fn from(range: Range<i64>) -> Self {
        Self::new(range.start, range.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_slice_sizes() {
        assert_eq!(Hint::Coarse.default_slice_size(), 1);
        assert_eq!(Hint::Default.default_slice_size(), 32);
        assert_eq!(Hint::Fine.default_slice_size(), 64);
        assert_eq!(Hint::default(), Hint::Default);
    }

    #[test]
    fn test_hint_parse() {
        assert_eq!("coarse".parse::<Hint>(), Ok(Hint::Coarse));
        assert_eq!(" FINE ".parse::<Hint>(), Ok(Hint::Fine));
        assert!(matches!(
            "medium".parse::<Hint>(),
            Err(BuildError::BadValue(_))
        ));
    }

    #[test]
    fn test_typed_axis_descriptor() {
        let plain = AxisDescriptor::from(IterationAxis::new(-2, 5));
        assert_eq!(plain.terms(), &[Term::Int(-2), Term::Int(5)]);

        let split = AxisDescriptor::from(IterationAxis::new(0, 8).split());
        assert_eq!(split.terms(), &[Term::Int(0), Term::Int(8), SPLIT]);
    }

    #[test]
    fn test_raw_descriptor() {
        let axis = AxisDescriptor::new([Term::Int(1), Term::Int(3), SPLIT]);
        assert_eq!(axis.len(), 3);
        assert_eq!(axis.to_string(), "[1, 3, SPLIT]");

        let from_ints = AxisDescriptor::new([0i64, 4]);
        assert_eq!(from_ints, AxisDescriptor::from(0i64..4));
    }
}
