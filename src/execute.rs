//! Executors
//!
//! Direct builds walk the iteration space in row-major order. Partitioned
//! builds carve one exclusive destination volume per work unit out of the
//! result storage and run the units under the configured [`Schedule`]:
//!
//! - with [`Staging::Buffered`] the kernel fills a private zeroed scratch
//!   volume that is copied into the destination after it returns
//! - with [`Staging::InPlace`] the destination is cleared and handed to the
//!   kernel directly
//!
//! Units never share storage, so any order or interleaving commits the same
//! result.

use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::array::{strides, Element, Storage};
use crate::config::{BuildConfig, Schedule, Staging};
use crate::dispatch::{Mode, Route};
use crate::error::BuildError;
use crate::kernel::Kernel;
use crate::partition::{Partition, WorkUnit};
use crate::plan::BuildPlan;
use crate::view::{carve, try_for_each_point, Scratch, VolumeMut};

/// Counters collected while a build runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildDiagnostics {
    /// Number of work units executed
    pub work_units: u64,

    /// Number of kernel invocations
    pub kernel_calls: u64,

    /// Number of scratch buffers allocated across all workers
    pub scratch_allocations: u64,

    /// Total elements copied from scratch into the result
    pub staged_elements: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    work_units: AtomicU64,
    kernel_calls: AtomicU64,
    scratch_allocations: AtomicU64,
    staged_elements: AtomicU64,
}

impl Counters {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BuildDiagnostics {
        BuildDiagnostics {
            work_units: self.work_units.load(Ordering::Relaxed),
            kernel_calls: self.kernel_calls.load(Ordering::Relaxed),
            scratch_allocations: self.scratch_allocations.load(Ordering::Relaxed),
            staged_elements: self.staged_elements.load(Ordering::Relaxed),
        }
    }
}

/// Shared state of one partitioned run
struct UnitRunner<'r, 'k, T> {
    kernel: &'r Kernel<'k, T>,
    staging: Staging,
    config: &'r BuildConfig,
    counters: &'r Counters,
}

impl<'r, 'k, T: Element> UnitRunner<'r, 'k, T> {
    fn run(
        &self,
        unit: &WorkUnit,
        dest: &mut VolumeMut<'_, T>,
        scratch: &mut Scratch<T>,
    ) -> Result<(), BuildError> {
        if self.config.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        trace!(unit = unit.id(), base = ?unit.base(), len = ?unit.len(), "running work unit");
        Counters::add(&self.counters.work_units, 1);

        match self.staging {
            Staging::Buffered => {
                let before = scratch.allocations();
                let lead = unit.len().len() - 1;
                let mut staged = scratch.prepare(dest.shape(), lead);
                self.compute(unit, &mut staged)?;
                dest.copy_from(&staged);
                let allocated = scratch.allocations() - before;
                Counters::add(&self.counters.scratch_allocations, allocated);
                Counters::add(&self.counters.staged_elements, dest.len() as u64);
            }
            Staging::InPlace => {
                dest.clear();
                self.compute(unit, dest)?;
            }
        }
        Ok(())
    }

    fn compute(&self, unit: &WorkUnit, volume: &mut VolumeMut<'_, T>) -> Result<(), BuildError> {
        match self.kernel {
            Kernel::Element(f) => {
                let base = unit.base();
                let local: Vec<_> = unit.len().iter().map(|&l| 0..l).collect();
                let mut point = vec![0; base.len()];
                try_for_each_point(&local, |offset| {
                    for ((p, &b), &o) in point.iter_mut().zip(base).zip(offset) {
                        *p = b + o;
                    }
                    Counters::add(&self.counters.kernel_calls, 1);
                    let value = f(point.as_slice()).map_err(|fault| BuildError::Computation {
                        at: point.clone(),
                        fault,
                    })?;
                    if let Some(slot) = volume.get_mut(offset) {
                        *slot = value;
                    }
                    Ok(())
                })
            }
            Kernel::Volume(f) => {
                Counters::add(&self.counters.kernel_calls, 1);
                f(unit.base(), volume).map_err(|fault| BuildError::Computation {
                    at: unit.base().to_vec(),
                    fault,
                })
            }
        }
    }
}

/// Run a planned build over `storage`
pub(crate) fn execute<T: Element>(
    plan: &BuildPlan,
    kernel: &Kernel<'_, T>,
    storage: &mut Storage<T>,
    config: &BuildConfig,
    counters: &Counters,
) -> Result<(), BuildError> {
    if plan.is_empty() {
        debug!("iteration space is empty, nothing to compute");
        return Ok(());
    }
    match (plan.route(), plan.mode()) {
        (Route::Direct, Mode::Exact) => direct_exact(plan, kernel, storage, config, counters),
        (Route::Direct, Mode::Inexact) => direct_inexact(plan, kernel, storage, config, counters),
        (Route::Partitioned, _) => partitioned(plan, kernel, storage, config, counters),
    }
}

fn direct_exact<T: Element>(
    plan: &BuildPlan,
    kernel: &Kernel<'_, T>,
    storage: &mut Storage<T>,
    config: &BuildConfig,
    counters: &Counters,
) -> Result<(), BuildError> {
    let Kernel::Element(f) = kernel else {
        return Err(BuildError::NotCallable(
            "direct exact builds need an element kernel".into(),
        ));
    };
    if config.is_cancelled() {
        return Err(BuildError::Cancelled);
    }
    Counters::add(&counters.work_units, 1);
    let strides = strides(&storage.shape);
    try_for_each_point(plan.bounds(), |point| {
        Counters::add(&counters.kernel_calls, 1);
        let value = f(point).map_err(|fault| BuildError::Computation {
            at: point.to_vec(),
            fault,
        })?;
        let offset: usize = point.iter().zip(&strides).map(|(p, s)| p * s).sum();
        storage.data[offset] = value;
        Ok(())
    })
}

fn direct_inexact<T: Element>(
    plan: &BuildPlan,
    kernel: &Kernel<'_, T>,
    storage: &mut Storage<T>,
    config: &BuildConfig,
    counters: &Counters,
) -> Result<(), BuildError> {
    let Kernel::Volume(f) = kernel else {
        return Err(BuildError::NotCallable(
            "inexact builds need a volume kernel".into(),
        ));
    };
    if config.is_cancelled() {
        return Err(BuildError::Cancelled);
    }
    Counters::add(&counters.work_units, 1);
    let iter_rank = plan.iter_rank();
    let strides = strides(&storage.shape);
    let inner_shape = storage.shape[iter_rank..].to_vec();
    let inner_len: usize = inner_shape.iter().product();
    try_for_each_point(plan.bounds(), |point| {
        let offset: usize = point.iter().zip(&strides).map(|(p, s)| p * s).sum();
        let mut volume =
            VolumeMut::contiguous(inner_shape.clone(), &mut storage.data[offset..offset + inner_len]);
        volume.clear();
        Counters::add(&counters.kernel_calls, 1);
        f(point, &mut volume).map_err(|fault| BuildError::Computation {
            at: point.to_vec(),
            fault,
        })
    })
}

/// Work units carved per batch on each worker; bounds the number of live
/// destination views
const UNITS_PER_BATCH: usize = 64;

fn partitioned<T: Element>(
    plan: &BuildPlan,
    kernel: &Kernel<'_, T>,
    storage: &mut Storage<T>,
    config: &BuildConfig,
    counters: &Counters,
) -> Result<(), BuildError> {
    let Some(partition) = plan.partition() else {
        return Ok(());
    };
    let runner = UnitRunner {
        kernel,
        staging: plan.staging(),
        config,
        counters,
    };
    debug!(
        units = partition.num_units(),
        staging = ?plan.staging(),
        schedule = ?plan.schedule(),
        "executing work units"
    );

    match plan.schedule() {
        Schedule::Parallel { threads } => {
            let mut run_all = || {
                let batch = rayon::current_num_threads() * UNITS_PER_BATCH;
                run_batches(plan, partition, storage, batch, |units, volumes| {
                    volumes
                        .par_iter_mut()
                        .zip(units.par_iter())
                        .try_for_each_init(Scratch::new, |scratch, (dest, unit)| {
                            runner.run(unit, dest, scratch)
                        })
                })
            };
            match threads {
                None => run_all(),
                Some(n) => rayon::ThreadPoolBuilder::new()
                    .num_threads(*n)
                    .build()
                    .map_err(|e| BuildError::Pool(e.to_string()))?
                    .install(run_all),
            }
        }
        Schedule::Sequential | Schedule::Reversed | Schedule::Permuted(_) => {
            let mut scratch = Scratch::new();
            run_batches(plan, partition, storage, UNITS_PER_BATCH, |units, volumes| {
                for (unit, dest) in units.iter().zip(volumes.iter_mut()) {
                    runner.run(unit, dest, &mut scratch)?;
                }
                Ok(())
            })
        }
    }
}

/// Walk the plan's order `batch` units at a time, carving destination views
/// for one batch and handing them to `f` before moving to the next
fn run_batches<T, F>(
    plan: &BuildPlan,
    partition: &Partition,
    storage: &mut Storage<T>,
    batch: usize,
    mut f: F,
) -> Result<(), BuildError>
where
    F: FnMut(&[WorkUnit], &mut [VolumeMut<'_, T>]) -> Result<(), BuildError>,
{
    let mut order = plan.order();
    let mut units = Vec::with_capacity(batch);
    loop {
        units.clear();
        units.extend(order.by_ref().take(batch).filter_map(|id| partition.unit(id)));
        if units.is_empty() {
            return Ok(());
        }
        let mut volumes = carve(&mut storage.data, &storage.shape, plan.iter_rank(), &units);
        f(&units, &mut volumes)?;
    }
}
