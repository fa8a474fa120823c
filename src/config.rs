//! Build configuration
//!
//! [`BuildConfig`] selects the default slice size ([`Hint`]), how work units
//! are staged ([`Staging`]) and in which order or on which workers they run
//! ([`Schedule`]). All choices produce bit-identical results for pure
//! kernels; they differ only in cost and concurrency.
//!
//! Defaults can be overridden from the environment with
//! [`BuildConfig::from_env`]:
//!
//! | Variable             | Values                                   |
//! |----------------------|------------------------------------------|
//! | `MULTICORE_HINT`     | `coarse`, `default`, `fine`              |
//! | `MULTICORE_STAGING`  | `buffered`, `in_place`                   |
//! | `MULTICORE_SCHEDULE` | `sequential`, `reversed`, `parallel`     |
//! | `MULTICORE_THREADS`  | worker count for `parallel`              |

use std::env;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::BuildError;
use crate::space::Hint;

/// Overrides [`BuildConfig::hint`]
pub const ENV_HINT: &str = "MULTICORE_HINT";
/// Overrides [`BuildConfig::staging`]
pub const ENV_STAGING: &str = "MULTICORE_STAGING";
/// Overrides [`BuildConfig::schedule`]: `sequential`, `reversed` or `parallel`
pub const ENV_SCHEDULE: &str = "MULTICORE_SCHEDULE";
/// Worker count for a parallel schedule
pub const ENV_THREADS: &str = "MULTICORE_THREADS";

/// How a work unit's destination is handed to the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Staging {
    /// Kernel fills a private zeroed scratch buffer, which is then copied
    /// into the result
    #[default]
    Buffered,
    /// Kernel writes straight into its exclusive region of the result
    InPlace,
}

impl FromStr for Staging {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buffered" => Ok(Staging::Buffered),
            "in_place" | "inplace" | "in-place" => Ok(Staging::InPlace),
            other => Err(BuildError::BadValue(format!("unrecognized staging `{other}`"))),
        }
    }
}

/// Order and placement of work units
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// One at a time, in row-major enumeration order
    #[default]
    Sequential,
    /// One at a time, last unit first
    Reversed,
    /// One at a time, in the given order of unit ids
    Permuted(Vec<usize>),
    /// On a rayon pool; `None` uses the global pool
    Parallel { threads: Option<usize> },
}

impl Schedule {
    /// Parallel on the global rayon pool
    pub fn parallel() -> Self {
        Schedule::Parallel { threads: None }
    }

    /// Returns true if units run on a rayon pool
    pub fn is_parallel(&self) -> bool {
        matches!(self, Schedule::Parallel { .. })
    }

    /// Check that this schedule can run `n` work units
    pub(crate) fn check(&self, n: usize) -> Result<(), BuildError> {
        let Schedule::Permuted(order) = self else {
            return Ok(());
        };
        if order.len() != n {
            return Err(BuildError::BadValue(format!(
                "schedule lists {} work units, build has {n}",
                order.len()
            )));
        }
        let mut seen = vec![false; n];
        for &id in order {
            if id >= n || seen[id] {
                return Err(BuildError::BadValue(format!(
                    "schedule is not a permutation of 0..{n}"
                )));
            }
            seen[id] = true;
        }
        Ok(())
    }

    /// Id of the unit visited at `position` out of `n` units
    pub(crate) fn unit_at(&self, position: usize, n: usize) -> usize {
        match self {
            Schedule::Sequential | Schedule::Parallel { .. } => position,
            Schedule::Reversed => n - 1 - position,
            Schedule::Permuted(order) => order[position],
        }
    }
}

impl FromStr for Schedule {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Schedule::Sequential),
            "reversed" => Ok(Schedule::Reversed),
            "parallel" => Ok(Schedule::parallel()),
            other => Err(BuildError::BadValue(format!("unrecognized schedule `{other}`"))),
        }
    }
}

/// Shared flag used to abort a running build
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not been cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; units not yet started will not run
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Configuration for a build
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Default slice size for split axes without an explicit size
    pub hint: Hint,
    /// How unit destinations are staged
    pub staging: Staging,
    /// Order and placement of work units
    pub schedule: Schedule,
    /// Checked before every work unit
    #[serde(skip)]
    pub cancel: Option<CancelToken>,
}

impl BuildConfig {
    /// Default configuration with environment overrides applied
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from a key lookup; unparseable values are ignored
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_HINT) {
            match value.parse() {
                Ok(hint) => self.hint = hint,
                Err(e) => warn!(key = ENV_HINT, %value, "ignoring override: {e}"),
            }
        }
        if let Some(value) = lookup(ENV_STAGING) {
            match value.parse() {
                Ok(staging) => self.staging = staging,
                Err(e) => warn!(key = ENV_STAGING, %value, "ignoring override: {e}"),
            }
        }
        if let Some(value) = lookup(ENV_SCHEDULE) {
            match value.parse() {
                Ok(schedule) => self.schedule = schedule,
                Err(e) => warn!(key = ENV_SCHEDULE, %value, "ignoring override: {e}"),
            }
        }
        if let Some(value) = lookup(ENV_THREADS) {
            match (value.trim().parse::<usize>(), &mut self.schedule) {
                (Ok(n), Schedule::Parallel { threads }) if n > 0 => *threads = Some(n),
                (Ok(_), Schedule::Parallel { .. }) | (Err(_), _) => {
                    warn!(key = ENV_THREADS, %value, "ignoring override: not a positive count")
                }
                (Ok(_), _) => {}
            }
        }
        self
    }

    /// Set the default slice-size hint
    pub fn with_hint(mut self, hint: Hint) -> Self {
        self.hint = hint;
        self
    }

    /// Set the staging mode
    pub fn with_staging(mut self, staging: Staging) -> Self {
        self.staging = staging;
        self
    }

    /// Set the schedule
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Attach a cancellation token
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BuildConfig::default();
        assert_eq!(config.hint, Hint::Default);
        assert_eq!(config.staging, Staging::Buffered);
        assert_eq!(config.schedule, Schedule::Sequential);
        assert!(!config.is_cancelled());
    }

    #[test]
    fn test_overrides() {
        let config = BuildConfig::default().with_overrides(lookup(&[
            (ENV_HINT, "fine"),
            (ENV_STAGING, "in_place"),
            (ENV_SCHEDULE, "parallel"),
            (ENV_THREADS, "3"),
        ]));
        assert_eq!(config.hint, Hint::Fine);
        assert_eq!(config.staging, Staging::InPlace);
        assert_eq!(config.schedule, Schedule::Parallel { threads: Some(3) });
    }

    #[test]
    fn test_bad_overrides_ignored() {
        let config = BuildConfig::default()
            .with_hint(Hint::Coarse)
            .with_overrides(lookup(&[
                (ENV_HINT, "huge"),
                (ENV_SCHEDULE, "random"),
                (ENV_THREADS, "4"),
            ]));
        assert_eq!(config.hint, Hint::Coarse);
        assert_eq!(config.schedule, Schedule::Sequential);
    }

    #[test]
    fn test_schedule_order() {
        let visit = |schedule: &Schedule, n: usize| -> Vec<usize> {
            (0..n).map(|i| schedule.unit_at(i, n)).collect()
        };
        assert_eq!(visit(&Schedule::Sequential, 3), vec![0, 1, 2]);
        assert_eq!(visit(&Schedule::Reversed, 3), vec![2, 1, 0]);
        assert_eq!(visit(&Schedule::Permuted(vec![1, 2, 0]), 3), vec![1, 2, 0]);
    }

    #[test]
    fn test_schedule_check() {
        assert_eq!(Schedule::Permuted(vec![1, 2, 0]).check(3), Ok(()));
        assert_eq!(Schedule::Reversed.check(0), Ok(()));
        assert!(matches!(
            Schedule::Permuted(vec![0, 0, 1]).check(3),
            Err(BuildError::BadValue(_))
        ));
        assert!(matches!(
            Schedule::Permuted(vec![0, 1]).check(3),
            Err(BuildError::BadValue(_))
        ));
        assert!(matches!(
            Schedule::Permuted(vec![7]).check(1),
            Err(BuildError::BadValue(_))
        ));
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let config = BuildConfig::default().with_cancel(token.clone());
        assert!(!config.is_cancelled());
        token.cancel();
        assert!(config.is_cancelled());
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = BuildConfig::default()
            .with_hint(Hint::Fine)
            .with_schedule(Schedule::Parallel { threads: Some(2) });
        let json = serde_json::to_string(&config).unwrap();
        let back: BuildConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.hint, Hint::Fine);
        assert_eq!(back.schedule, Schedule::Parallel { threads: Some(2) });
        assert!(back.cancel.is_none());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: BuildConfig =
            serde_json::from_str(r#"{"staging": "in_place", "schedule": "reversed"}"#).unwrap();
        assert_eq!(config.hint, Hint::Default);
        assert_eq!(config.staging, Staging::InPlace);
        assert_eq!(config.schedule, Schedule::Reversed);
    }
}
