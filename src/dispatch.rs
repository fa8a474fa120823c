//! Execution path selection
//!
//! A single generic executor handles every rank. What varies is the
//! [`Mode`] (whole elements or subvolumes per outer point) and the
//! [`Route`] (walk the space directly or through work units).

use std::fmt;

use tracing::debug;

use crate::error::BuildError;
use crate::kernel::Kernel;
use crate::validate::Normalized;

/// Per-point computation family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// `I == R`: one value per point
    Exact,
    /// `I < R`: one subvolume of rank `R - I` per outer point
    Inexact,
}

/// How the iteration space is walked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Row-major over every point, no work units
    Direct,
    /// Through the strip or tile partition of the leading split axes
    Partitioned,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Exact => write!(f, "exact"),
            Mode::Inexact => write!(f, "inexact"),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Direct => write!(f, "direct"),
            Route::Partitioned => write!(f, "partitioned"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Dispatch {
    pub(crate) mode: Mode,
    pub(crate) route: Route,
}

impl Dispatch {
    pub(crate) fn select(n: &Normalized) -> Self {
        let mode = if n.iter_rank() == n.rank() {
            Mode::Exact
        } else {
            Mode::Inexact
        };
        let route = if n.split_count() > 0 {
            Route::Partitioned
        } else {
            Route::Direct
        };
        debug!(
            rank = n.rank(),
            iter_rank = n.iter_rank(),
            split = n.split_count(),
            %mode,
            %route,
            "selected execution path"
        );
        Self { mode, route }
    }

    /// Reject kernels that cannot drive this path
    pub(crate) fn check_kernel<T>(&self, kernel: &Kernel<'_, T>) -> Result<(), BuildError> {
        let accepted = match (self.mode, self.route, kernel) {
            (Mode::Exact, _, Kernel::Element(_)) => true,
            (Mode::Exact, Route::Partitioned, Kernel::Volume(_)) => true,
            (Mode::Inexact, _, Kernel::Volume(_)) => true,
            _ => false,
        };
        if accepted {
            Ok(())
        } else {
            Err(BuildError::NotCallable(format!(
                "{} kernel cannot drive a {} {} build",
                kernel.describe(),
                self.route,
                self.mode
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;
    use crate::space::{AxisDescriptor, Hint, IterationAxis};
    use crate::validate::normalize;
    use crate::view::VolumeMut;

    fn dispatch(shape: &[usize], space: &[AxisDescriptor]) -> Dispatch {
        Dispatch::select(&normalize(shape, space, None, Hint::Default).unwrap())
    }

    fn element() -> Kernel<'static, i32> {
        Kernel::element(|_p: &[usize]| 0)
    }

    fn volume() -> Kernel<'static, i32> {
        Kernel::volume(|_c: &[usize], _v: &mut VolumeMut<'_, i32>| {})
    }

    #[test]
    fn test_select() {
        let d = dispatch(&[4, 4], &[(0i64..4).into(), (0i64..4).into()]);
        assert_eq!((d.mode, d.route), (Mode::Exact, Route::Direct));

        let d = dispatch(&[4, 4], &[(0i64..4).into()]);
        assert_eq!((d.mode, d.route), (Mode::Inexact, Route::Direct));

        let d = dispatch(&[4, 4], &[IterationAxis::new(0, 4).split().into()]);
        assert_eq!((d.mode, d.route), (Mode::Inexact, Route::Partitioned));

        let d = dispatch(&[8], &[IterationAxis::new(0, 8).split_by(2).into()]);
        assert_eq!((d.mode, d.route), (Mode::Exact, Route::Partitioned));
    }

    #[test]
    fn test_kernel_compatibility() {
        let exact = Dispatch {
            mode: Mode::Exact,
            route: Route::Direct,
        };
        let exact_split = Dispatch {
            mode: Mode::Exact,
            route: Route::Partitioned,
        };
        let inexact = Dispatch {
            mode: Mode::Inexact,
            route: Route::Direct,
        };

        assert!(exact.check_kernel(&element()).is_ok());
        assert!(matches!(
            exact.check_kernel(&volume()),
            Err(BuildError::NotCallable(_))
        ));
        assert!(exact_split.check_kernel(&element()).is_ok());
        assert!(exact_split.check_kernel(&volume()).is_ok());
        assert!(inexact.check_kernel(&volume()).is_ok());
        assert!(matches!(
            inexact.check_kernel(&element()),
            Err(BuildError::NotCallable(_))
        ));
    }
}
