//! The `build` entry point
//!
//! A build validates its arguments, plans the work, moves the storage out
//! of the source array and runs the kernel over the iteration space. The
//! populated storage is returned as a new [`Array`].
//!
//! - Validation failures leave the source untouched and live.
//! - On success the source is neutered.
//! - A kernel fault or cancellation after the transfer leaves the source
//!   poisoned and returns no result.
//!
//! # Example
//!
//! ```
//! use multicore::{build, Array, IterationAxis, Kernel};
//!
//! let mut source = Array::<u32>::zeros(&[4, 4]).unwrap();
//! let result = build(
//!     Kernel::element(|p: &[usize]| (p[0] + p[1]) as u32),
//!     &mut source,
//!     [IterationAxis::new(0, 4), IterationAxis::new(0, 4)],
//!     None,
//!     None,
//! )
//! .unwrap();
//!
//! assert_eq!(result.get(&[2, 3]), Ok(&5));
//! assert!(source.is_neutered());
//! ```

use tracing::debug;

use crate::array::{Array, Element};
use crate::config::BuildConfig;
use crate::dispatch::Dispatch;
use crate::error::BuildError;
use crate::execute::{execute, BuildDiagnostics, Counters};
use crate::kernel::Kernel;
use crate::plan::BuildPlan;
use crate::space::{AxisDescriptor, Hint};
use crate::validate::normalize;

/// A build request
///
/// ```
/// use multicore::{Array, Build, BuildConfig, IterationAxis, Kernel, Schedule, VolumeMut};
///
/// let mut source = Array::<f64>::zeros(&[6, 3]).unwrap();
/// let result = Build::new()
///     .kernel(Kernel::volume(|base: &[usize], rows: &mut VolumeMut<'_, f64>| {
///         for i in 0..rows.shape()[0] {
///             for j in 0..3 {
///                 rows[&[i, j]] = ((base[0] + i) * 3 + j) as f64;
///             }
///         }
///     }))
///     .space([IterationAxis::new(0, 6).split_by(4)])
///     .config(BuildConfig::default().with_schedule(Schedule::parallel()))
///     .run(&mut source)
///     .unwrap();
///
/// assert_eq!(result.get(&[5, 2]), Ok(&17.0));
/// ```
#[derive(Debug)]
pub struct Build<'k, T> {
    kernel: Option<Kernel<'k, T>>,
    space: Option<Vec<AxisDescriptor>>,
    origin: Option<Vec<i64>>,
    config: BuildConfig,
}

impl<'k, T> Default for Build<'k, T> {
    fn default() -> Self {
        Self {
            kernel: None,
            space: None,
            origin: None,
            config: BuildConfig::default(),
        }
    }
}

impl<'k, T: Element> Build<'k, T> {
    /// An empty request; a kernel and a space must be supplied
    pub fn new() -> Self {
        Self::default()
    }

    /// Computation applied across the space
    pub fn kernel(mut self, kernel: Kernel<'k, T>) -> Self {
        self.kernel = Some(kernel);
        self
    }

    /// Iteration space, outermost axis first
    pub fn space<I, A>(mut self, axes: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<AxisDescriptor>,
    {
        self.space = Some(axes.into_iter().map(Into::into).collect());
        self
    }

    /// Offset added to the iteration bounds on every axis of the array
    pub fn origin<I>(mut self, origin: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        self.origin = Some(origin.into_iter().collect());
        self
    }

    /// Slice-size hint for split axes without an explicit size
    pub fn hint(mut self, hint: Hint) -> Self {
        self.config.hint = hint;
        self
    }

    /// Replace the whole configuration, hint included
    pub fn config(mut self, config: BuildConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate and partition without touching `source`
    pub fn plan(&self, source: &Array<T>) -> Result<BuildPlan, BuildError> {
        let (_, plan) = self.prepare(source)?;
        Ok(plan)
    }

    /// Run the build, moving the storage of `source` into the result
    pub fn run(&self, source: &mut Array<T>) -> Result<Array<T>, BuildError> {
        self.run_with_diagnostics(source).map(|(result, _)| result)
    }

    /// Run the build and report execution counters
    pub fn run_with_diagnostics(
        &self,
        source: &mut Array<T>,
    ) -> Result<(Array<T>, BuildDiagnostics), BuildError> {
        let (kernel, plan) = self.prepare(source)?;
        let mut storage = source
            .transfer()
            .map_err(|e| BuildError::BadType(format!("source array is unusable: {e}")))?;
        let guard = PoisonGuard {
            source,
            committed: false,
        };

        let counters = Counters::default();
        let outcome = execute(&plan, kernel, &mut storage, &self.config, &counters);
        guard.finish(outcome.is_ok());
        match outcome {
            Ok(()) => {
                let diagnostics = counters.snapshot();
                debug!(?diagnostics, "build committed");
                Ok((Array::from_storage(storage), diagnostics))
            }
            Err(e) => {
                debug!(error = %e, "build aborted, source poisoned");
                Err(e)
            }
        }
    }

    fn prepare(&self, source: &Array<T>) -> Result<(&Kernel<'k, T>, BuildPlan), BuildError> {
        let space = self
            .space
            .as_deref()
            .ok_or(BuildError::MissingArgument("iteration space"))?;
        let kernel = self
            .kernel
            .as_ref()
            .ok_or_else(|| BuildError::NotCallable("no computation supplied".into()))?;
        let shape = source
            .shape()
            .map_err(|e| BuildError::BadType(format!("source array is unusable: {e}")))?;

        let normalized = normalize(shape, space, self.origin.as_deref(), self.config.hint)?;
        let dispatch = Dispatch::select(&normalized);
        dispatch.check_kernel(kernel)?;
        let plan = BuildPlan::new(normalized, dispatch, &self.config)?;
        Ok((kernel, plan))
    }
}

/// Poisons the source when a build ends without committing, including when
/// a kernel panics
struct PoisonGuard<'s, T> {
    source: &'s mut Array<T>,
    committed: bool,
}

impl<'s, T> PoisonGuard<'s, T> {
    fn finish(mut self, committed: bool) {
        self.committed = committed;
    }
}

impl<'s, T> Drop for PoisonGuard<'s, T> {
    fn drop(&mut self) {
        if !self.committed {
            self.source.poison();
        }
    }
}

/// Apply `kernel` across `space` over the storage of `source`
///
/// `origin` defaults to all zeros and `hint` to [`Hint::Default`]. See
/// [`Build`] for staging, scheduling and cancellation.
pub fn build<T, I, A>(
    kernel: Kernel<'_, T>,
    source: &mut Array<T>,
    space: I,
    origin: Option<&[i64]>,
    hint: Option<Hint>,
) -> Result<Array<T>, BuildError>
where
    T: Element,
    I: IntoIterator<Item = A>,
    A: Into<AxisDescriptor>,
{
    let mut request = Build::new()
        .kernel(kernel)
        .space(space)
        .hint(hint.unwrap_or_default());
    if let Some(origin) = origin {
        request = request.origin(origin.iter().copied());
    }
    request.run(source)
}
