//! Error taxonomy for `build`
//!
//! Every validation failure maps onto one of six closed kinds. They are all
//! raised before the source array is touched. The remaining variants
//! (`Computation`, `Cancelled`, `Pool`) can only occur once execution has
//! started, after the source has been transferred.

use thiserror::Error;

use crate::kernel::KernelFault;
use crate::partition::PartitionError;

/// Closed classification of [`BuildError`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required argument was not supplied
    MissingArgument,
    /// No computation, or one that does not fit the execution path
    NotCallable,
    /// Malformed source, origin or split ordering
    BadType,
    /// Wrong number of axes or descriptor terms
    BadArrayLength,
    /// Inverted bounds, bad split marker or slice size
    BadValue,
    /// Effective bounds fall outside the array
    BadIndex,
    /// The kernel reported a fault
    Computation,
    /// The build was cancelled
    Cancelled,
    /// The worker pool could not be built
    Pool,
}

/// Errors raised by [`build`](crate::build())
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("computation is not callable: {0}")]
    NotCallable(String),

    #[error("bad type: {0}")]
    BadType(String),

    #[error("bad array length: {0}")]
    BadArrayLength(String),

    #[error("bad value: {0}")]
    BadValue(String),

    #[error("bad index: axis {axis} spans {lo}..{hi}, outside 0..{len}")]
    BadIndex {
        axis: usize,
        lo: i64,
        hi: i64,
        len: usize,
    },

    #[error("computation failed at {at:?}: {fault}")]
    Computation {
        at: Vec<usize>,
        #[source]
        fault: KernelFault,
    },

    #[error("build cancelled before all work units committed")]
    Cancelled,

    #[error("worker pool unavailable: {0}")]
    Pool(String),
}

impl BuildError {
    /// Returns the taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::MissingArgument(_) => ErrorKind::MissingArgument,
            BuildError::NotCallable(_) => ErrorKind::NotCallable,
            BuildError::BadType(_) => ErrorKind::BadType,
            BuildError::BadArrayLength(_) => ErrorKind::BadArrayLength,
            BuildError::BadValue(_) => ErrorKind::BadValue,
            BuildError::BadIndex { .. } => ErrorKind::BadIndex,
            BuildError::Computation { .. } => ErrorKind::Computation,
            BuildError::Cancelled => ErrorKind::Cancelled,
            BuildError::Pool(_) => ErrorKind::Pool,
        }
    }

    /// True for the kinds that are raised before any mutation
    pub fn is_validation(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::Computation | ErrorKind::Cancelled | ErrorKind::Pool
        )
    }
}

impl From<PartitionError> for BuildError {
    fn from(err: PartitionError) -> Self {
        BuildError::BadValue(err.to_string())
    }
}
