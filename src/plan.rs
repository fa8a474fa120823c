//! Build planning
//!
//! A [`BuildPlan`] is everything a build decides before it touches the
//! source: the execution path, the storage bounds, the work units and the
//! order they will run in. [`Build::plan`](crate::Build::plan) produces one
//! without neutering anything, so callers can inspect how the space will be
//! split and size temporary structures up front.
//!
//! ```
//! use multicore::{Array, Build, IterationAxis, Kernel};
//!
//! let source = Array::<u32>::zeros(&[10]).unwrap();
//! let plan = Build::new()
//!     .kernel(Kernel::element(|p: &[usize]| p[0] as u32))
//!     .space([IterationAxis::new(0, 10).split_by(4)])
//!     .plan(&source)
//!     .unwrap();
//!
//! assert_eq!(plan.num_units(), 3);
//! assert_eq!(plan.max_unit_elements(), 4);
//! assert!(source.is_live());
//! ```

use std::fmt;
use std::ops::Range;

use tracing::debug;

use crate::config::{BuildConfig, Schedule, Staging};
use crate::dispatch::{Dispatch, Mode, Route};
use crate::error::BuildError;
use crate::partition::{partition, Layout, Partition, WorkUnit};
use crate::space::Hint;
use crate::validate::Normalized;
use crate::view::unit_shape;

/// The resolved form of a build request
#[derive(Debug, Clone)]
pub struct BuildPlan {
    normalized: Normalized,
    dispatch: Dispatch,
    partition: Option<Partition>,
    staging: Staging,
    schedule: Schedule,
}

impl BuildPlan {
    pub(crate) fn new(
        normalized: Normalized,
        dispatch: Dispatch,
        config: &BuildConfig,
    ) -> Result<Self, BuildError> {
        let partition = match dispatch.route {
            Route::Direct => None,
            Route::Partitioned => Some(partition(&normalized.bounds, &normalized.slice_sizes)?),
        };
        if let Some(p) = &partition {
            debug!(
                layout = %p.layout(),
                units = p.num_units(),
                slice_counts = ?p.slice_counts(),
                "partitioned iteration space"
            );
        }
        let plan = Self {
            normalized,
            dispatch,
            partition,
            staging: config.staging,
            schedule: config.schedule.clone(),
        };
        plan.schedule.check(plan.num_units())?;
        Ok(plan)
    }

    /// Whether the kernel computes elements or fills subvolumes
    pub fn mode(&self) -> Mode {
        self.dispatch.mode
    }

    /// Whether the space runs as one unit or is partitioned
    pub fn route(&self) -> Route {
        self.dispatch.route
    }

    /// Rank of the array
    pub fn rank(&self) -> usize {
        self.normalized.rank()
    }

    /// Number of iterated axes
    pub fn iter_rank(&self) -> usize {
        self.normalized.iter_rank()
    }

    /// Per-axis lengths of the array
    pub fn shape(&self) -> &[usize] {
        &self.normalized.shape
    }

    /// Storage range of each iterated axis, origin applied
    pub fn bounds(&self) -> &[Range<usize>] {
        &self.normalized.bounds
    }

    /// Offset applied to the iteration bounds
    pub fn origin(&self) -> &[usize] {
        &self.normalized.origin
    }

    /// Slice-size hint for split axes without an explicit size
    pub fn hint(&self) -> Hint {
        self.normalized.hint
    }

    /// Resolved slice size of each split axis
    pub fn slice_sizes(&self) -> &[usize] {
        &self.normalized.slice_sizes
    }

    /// How unit destinations are staged
    pub fn staging(&self) -> Staging {
        self.staging
    }

    /// Order and placement of the work units
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Strips, tiles, or whole
    pub fn layout(&self) -> Layout {
        self.partition
            .as_ref()
            .map_or(Layout::Whole, Partition::layout)
    }

    /// The work units of a partitioned build
    pub fn partition(&self) -> Option<&Partition> {
        self.partition.as_ref()
    }

    /// Ids of the work units in the order they are dispatched
    ///
    /// A direct build over a non-empty space yields the single unit `0`.
    pub fn order(&self) -> impl Iterator<Item = usize> + '_ {
        let n = self.num_units();
        (0..n).map(move |position| self.schedule.unit_at(position, n))
    }

    /// Number of work units; a direct build over a non-empty space is one
    pub fn num_units(&self) -> usize {
        match &self.partition {
            Some(p) => p.num_units(),
            None if self.is_empty() => 0,
            None => 1,
        }
    }

    /// True if the iteration space has no points
    pub fn is_empty(&self) -> bool {
        self.normalized.bounds.iter().any(|r| r.is_empty())
    }

    /// Elements in the largest volume handed to one kernel call
    ///
    /// For a partitioned build this is the largest work unit including the
    /// inner axes, which is also the size of a worker's scratch buffer. For
    /// a direct inexact build it is one subvolume, and 1 for direct exact.
    pub fn max_unit_elements(&self) -> usize {
        let n = &self.normalized;
        match &self.partition {
            Some(p) => p.max_unit_points() * n.shape[n.iter_rank()..].iter().product::<usize>(),
            None if self.is_empty() => 0,
            None => n.shape[n.iter_rank()..].iter().product(),
        }
    }

    /// Shape of the volume a unit's kernel call receives
    pub fn unit_shape(&self, unit: &WorkUnit) -> Vec<usize> {
        unit_shape(unit, &self.normalized.shape, self.normalized.iter_rank())
    }
}

impl fmt::Display for BuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Build Plan")?;
        writeln!(f, "==========")?;
        writeln!(f)?;

        writeln!(f, "Summary:")?;
        writeln!(f, "  Shape:    {:?} (rank {})", self.shape(), self.rank())?;
        writeln!(f, "  Bounds:   {:?}", self.bounds())?;
        writeln!(f, "  Path:     {} {}", self.route(), self.mode())?;
        writeln!(f, "  Layout:   {}", self.layout())?;
        writeln!(f, "  Hint:     {}", self.hint())?;
        if !self.slice_sizes().is_empty() {
            writeln!(f, "  Slices:   {:?}", self.slice_sizes())?;
        }
        writeln!(f, "  Units:    {}", self.num_units())?;
        writeln!(f, "  Max unit: {} elements", self.max_unit_elements())?;

        let Some(partition) = &self.partition else {
            return Ok(());
        };
        writeln!(f)?;

        writeln!(f, "Work units:")?;
        writeln!(f, "{:<6} {:<6} {:<20} {:<20} Elements", "Order", "ID", "Base", "Len")?;
        writeln!(f, "{:-<64}", "")?;
        for (position, id) in self.order().enumerate() {
            let Some(unit) = partition.unit(id) else {
                continue;
            };
            writeln!(
                f,
                "{:<6} {:<6} {:<20} {:<20} {}",
                position,
                unit.id(),
                format!("{:?}", unit.base()),
                format!("{:?}", unit.len()),
                self.unit_shape(&unit).iter().product::<usize>()
            )?;
        }

        Ok(())
    }
}
