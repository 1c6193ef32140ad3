//! Runtime knobs for the CPU kernels.
//!
//! Values live in process-wide atomics so kernels can read them without
//! threading a config handle through every call. Install a config with
//! [`RuntimeConfig::apply`] before running computations.

use crate::error::{Result, TensorError};
use std::sync::atomic::{AtomicUsize, Ordering};

const DEFAULT_MAX_ELEMENTS: usize = 100_000_000;
const DEFAULT_MATMUL_PAR_THRESHOLD: usize = 1 << 16;
const DEFAULT_BATCHED_MATMUL_PAR_THRESHOLD: usize = 4096;
const DEFAULT_SOFTMAX_PAR_THRESHOLD: usize = 4096;

/// Largest element count any single buffer may have.
pub(crate) static MAX_ELEMENTS: AtomicUsize = AtomicUsize::new(DEFAULT_MAX_ELEMENTS);

/// Work (m*k*n) above which the 2D matmul splits rows across rayon threads.
pub(crate) static MATMUL_PAR_THRESHOLD: AtomicUsize =
    AtomicUsize::new(DEFAULT_MATMUL_PAR_THRESHOLD);

/// Output element count above which batched matmul runs batches in parallel.
pub(crate) static BATCHED_MATMUL_PAR_THRESHOLD: AtomicUsize =
    AtomicUsize::new(DEFAULT_BATCHED_MATMUL_PAR_THRESHOLD);

/// Element count above which softmax over the last axis runs rows in parallel.
pub(crate) static SOFTMAX_PAR_THRESHOLD: AtomicUsize =
    AtomicUsize::new(DEFAULT_SOFTMAX_PAR_THRESHOLD);

/// Runtime configuration for parallelism and allocation limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Threads for the global rayon pool. 0 leaves rayon's default (all cores).
    pub num_threads: usize,
    /// Allocation guard; creating a buffer larger than this fails.
    pub max_elements: usize,
    pub matmul_par_threshold: usize,
    pub batched_matmul_par_threshold: usize,
    pub softmax_par_threshold: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            max_elements: DEFAULT_MAX_ELEMENTS,
            matmul_par_threshold: DEFAULT_MATMUL_PAR_THRESHOLD,
            batched_matmul_par_threshold: DEFAULT_BATCHED_MATMUL_PAR_THRESHOLD,
            softmax_par_threshold: DEFAULT_SOFTMAX_PAR_THRESHOLD,
        }
    }
}

impl RuntimeConfig {
    /// Read overrides from `VOLTA_*` environment variables on top of the defaults.
    ///
    /// Recognised: `VOLTA_NUM_THREADS`, `VOLTA_MAX_ELEMENTS`,
    /// `VOLTA_MATMUL_PAR_THRESHOLD`, `VOLTA_BATCHED_MATMUL_PAR_THRESHOLD`,
    /// `VOLTA_SOFTMAX_PAR_THRESHOLD`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str, default: usize| -> Result<usize> {
            match lookup(key) {
                None => Ok(default),
                Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                    TensorError::InvalidParameter(format!("{key}={raw:?} is not an unsigned integer"))
                }),
            }
        };
        let defaults = Self::default();
        Ok(Self {
            num_threads: read("VOLTA_NUM_THREADS", defaults.num_threads)?,
            max_elements: read("VOLTA_MAX_ELEMENTS", defaults.max_elements)?,
            matmul_par_threshold: read("VOLTA_MATMUL_PAR_THRESHOLD", defaults.matmul_par_threshold)?,
            batched_matmul_par_threshold: read(
                "VOLTA_BATCHED_MATMUL_PAR_THRESHOLD",
                defaults.batched_matmul_par_threshold,
            )?,
            softmax_par_threshold: read(
                "VOLTA_SOFTMAX_PAR_THRESHOLD",
                defaults.softmax_par_threshold,
            )?,
        })
    }

    /// Snapshot of the currently installed values.
    ///
    /// `num_threads` reports the live rayon pool size.
    pub fn current() -> Self {
        Self {
            num_threads: rayon::current_num_threads(),
            max_elements: MAX_ELEMENTS.load(Ordering::Relaxed),
            matmul_par_threshold: MATMUL_PAR_THRESHOLD.load(Ordering::Relaxed),
            batched_matmul_par_threshold: BATCHED_MATMUL_PAR_THRESHOLD.load(Ordering::Relaxed),
            softmax_par_threshold: SOFTMAX_PAR_THRESHOLD.load(Ordering::Relaxed),
        }
    }

    /// Install this configuration globally.
    ///
    /// The rayon pool can only be built once per process; a second attempt with
    /// `num_threads > 0` fails and leaves the thresholds untouched.
    pub fn apply(&self) -> Result<()> {
        if self.max_elements == 0 {
            return Err(TensorError::InvalidParameter(
                "max_elements must be positive".to_string(),
            ));
        }
        if self.num_threads > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(self.num_threads)
                .build_global()
                .map_err(|e| {
                    TensorError::InvalidParameter(format!("failed to set rayon thread pool: {e}"))
                })?;
        }

        MAX_ELEMENTS.store(self.max_elements, Ordering::Relaxed);
        MATMUL_PAR_THRESHOLD.store(self.matmul_par_threshold, Ordering::Relaxed);
        BATCHED_MATMUL_PAR_THRESHOLD.store(self.batched_matmul_par_threshold, Ordering::Relaxed);
        SOFTMAX_PAR_THRESHOLD.store(self.softmax_par_threshold, Ordering::Relaxed);

        log::info!(
            "runtime configured: threads={} max_elements={} matmul_par={} batched_par={} softmax_par={}",
            rayon::current_num_threads(),
            self.max_elements,
            self.matmul_par_threshold,
            self.batched_matmul_par_threshold,
            self.softmax_par_threshold
        );
        Ok(())
    }
}

/// Fail if a buffer of `requested` elements would exceed the allocation guard.
pub(crate) fn check_alloc(requested: usize) -> Result<()> {
    check_alloc_within(requested, MAX_ELEMENTS.load(Ordering::Relaxed))
}

fn check_alloc_within(requested: usize, limit: usize) -> Result<()> {
    if requested > limit {
        return Err(TensorError::AllocationLimit { requested, limit });
    }
    Ok(())
}

pub(crate) fn threshold(knob: &AtomicUsize) -> usize {
    knob.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default() {
        let config = RuntimeConfig::default();
        assert_eq!(config.num_threads, 0);
        assert_eq!(config.max_elements, 100_000_000);
        assert_eq!(config.batched_matmul_par_threshold, 4096);
        assert_eq!(config.softmax_par_threshold, 4096);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("VOLTA_MAX_ELEMENTS", "1024"),
            ("VOLTA_SOFTMAX_PAR_THRESHOLD", " 16 "),
        ]
        .into_iter()
        .collect();
        let config = RuntimeConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.max_elements, 1024);
        assert_eq!(config.softmax_par_threshold, 16);
        assert_eq!(config.matmul_par_threshold, DEFAULT_MATMUL_PAR_THRESHOLD);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let err = RuntimeConfig::from_lookup(|k| {
            (k == "VOLTA_NUM_THREADS").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, TensorError::InvalidParameter(_)));
    }

    #[test]
    fn test_check_alloc() {
        assert!(check_alloc(10).is_ok());
        let err = check_alloc(usize::MAX).unwrap_err();
        assert!(matches!(err, TensorError::AllocationLimit { .. }));
    }

    #[test]
    fn test_check_alloc_explicit_limit() {
        assert!(check_alloc_within(1000, 1000).is_ok());
        let err = check_alloc_within(10_000, 1000).unwrap_err();
        assert!(matches!(
            err,
            TensorError::AllocationLimit { requested: 10_000, limit: 1000 }
        ));
    }
}
