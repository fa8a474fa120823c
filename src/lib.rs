//! Multicore: deterministic bulk-array builds over partitioned iteration spaces
//!
//! This crate applies a user computation across a rectangular iteration
//! space overlaid on a dense array. Leading axes of the space can be split
//! into strips or tiles; every work unit owns a disjoint region of the
//! result, so units run sequentially, in any order, or on a rayon pool and
//! commit bit-identical results.
//!
//! Storage is moved out of the source array into the result. The source is
//! left neutered and any further access to it is an error.

mod array;
mod build;
mod config;
mod dispatch;
mod error;
mod execute;
mod kernel;
pub mod partition;
mod plan;
mod space;
mod validate;
mod view;

// Re-export main types at crate root
pub use array::{Array, ArrayError, ArrayKind, Element, Nested, Volume};
pub use build::{build, Build};
pub use config::{BuildConfig, CancelToken, Schedule, Staging};
pub use dispatch::{Mode, Route};
pub use error::{BuildError, ErrorKind};
pub use execute::BuildDiagnostics;
pub use kernel::{Kernel, KernelFault, KernelResult};
pub use partition::{Layout, Partition, PartitionError, WorkUnit};
pub use plan::BuildPlan;
pub use space::{AxisDescriptor, Hint, IterationAxis, Term, SPLIT};
pub use view::VolumeMut;
