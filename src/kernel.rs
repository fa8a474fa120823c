//! User computations
//!
//! A [`Kernel`] is either an *element* computation, returning the value for
//! one point, or a *volume* computation, filling a mutable subvolume.
//!
//! | Iteration                 | Element kernel | Volume kernel |
//! |---------------------------|----------------|---------------|
//! | I == R, nothing split     | yes            | no            |
//! | I == R, leading axes split| yes            | yes           |
//! | I < R                     | no             | yes           |
//!
//! A volume kernel is called with coordinates of length I: the outer point
//! when nothing is split, or the work unit's base when the space is
//! partitioned. The volume it receives is origin-zero. It should read only
//! positions it has already written during the same call.
//!
//! Kernels must be `Sync`: work units may run on several workers at once.

use thiserror::Error;

use crate::view::VolumeMut;

/// A failure raised by a user computation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct KernelFault {
    message: String,
}

impl KernelFault {
    /// A fault carrying `message`
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result of a fallible kernel
pub type KernelResult<T> = Result<T, KernelFault>;

type ElementFn<'k, T> = dyn Fn(&[usize]) -> KernelResult<T> + Sync + 'k;
type VolumeFn<'k, T> = dyn Fn(&[usize], &mut VolumeMut<'_, T>) -> KernelResult<()> + Sync + 'k;

/// The computation applied across an iteration space
pub enum Kernel<'k, T> {
    /// Returns the value at one point
    Element(Box<ElementFn<'k, T>>),
    /// Fills a subvolume given its coordinates
    Volume(Box<VolumeFn<'k, T>>),
}

impl<'k, T> Kernel<'k, T> {
    /// An infallible per-element computation
    pub fn element<F>(f: F) -> Self
    where
        F: Fn(&[usize]) -> T + Sync + 'k,
    {
        Kernel::Element(Box::new(move |point: &[usize]| Ok(f(point))))
    }

    /// A per-element computation that may fail
    pub fn try_element<F>(f: F) -> Self
    where
        F: Fn(&[usize]) -> KernelResult<T> + Sync + 'k,
    {
        Kernel::Element(Box::new(f))
    }

    /// An infallible subvolume computation
    pub fn volume<F>(f: F) -> Self
    where
        F: Fn(&[usize], &mut VolumeMut<'_, T>) + Sync + 'k,
    {
        Kernel::Volume(Box::new(move |coords: &[usize], volume: &mut VolumeMut<'_, T>| {
            f(coords, volume);
            Ok(())
        }))
    }

    /// A subvolume computation that may fail
    pub fn try_volume<F>(f: F) -> Self
    where
        F: Fn(&[usize], &mut VolumeMut<'_, T>) -> KernelResult<()> + Sync + 'k,
    {
        Kernel::Volume(Box::new(f))
    }

    /// Returns true for a per-element computation
    pub fn is_element(&self) -> bool {
        matches!(self, Kernel::Element(_))
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Kernel::Element(_) => "element",
            Kernel::Volume(_) => "volume",
        }
    }
}

impl<'k, T> std::fmt::Debug for Kernel<'k, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Kernel::{}", self.describe())
    }
}
