//! Run-level resource monitor.
//!
//! Tracks current memory usage and elapsed wall-clock time against
//! configured ceilings. The monitor is advisory: the engine consults it
//! between stages, it never interrupts a running operation itself.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Run-level ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceLimits {
    /// Maximum operations in flight at once for one run
    pub max_concurrent_operations: usize,
    /// Maximum memory usage in bytes
    pub max_memory_usage: u64,
    /// Maximum wall-clock time for the run
    #[serde(rename = "maxExecutionTimeMs", with = "strata_core::duration_ms")]
    pub max_execution_time: Duration,
}

impl ResourceLimits {
    /// Create limits with default values
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_concurrent_operations: 10,
            max_memory_usage: 512 * 1024 * 1024,
            max_execution_time: Duration::from_secs(300),
        }
    }

    /// Set max concurrent operations
    #[must_use]
    pub fn with_max_concurrent_operations(mut self, max: usize) -> Self {
        self.max_concurrent_operations = max;
        self
    }

    /// Set max memory usage in bytes
    #[must_use]
    pub fn with_max_memory_usage(mut self, bytes: u64) -> Self {
        self.max_memory_usage = bytes;
        self
    }

    /// Set max execution time
    #[must_use]
    pub fn with_max_execution_time(mut self, time: Duration) -> Self {
        self.max_execution_time = time;
        self
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of resource usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    /// Current memory usage in bytes
    pub memory_usage: u64,
    /// Highest memory usage reported since start or reset
    pub peak_memory_usage: u64,
    /// Elapsed time since start or reset
    #[serde(rename = "executionTimeMs", with = "strata_core::duration_ms")]
    pub execution_time: Duration,
}

/// A ceiling that was crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitViolation {
    /// Memory usage above the ceiling
    Memory {
        /// Observed bytes
        used: u64,
        /// Ceiling in bytes
        limit: u64,
    },
    /// Elapsed time above the ceiling
    ExecutionTime {
        /// Observed elapsed time
        elapsed: Duration,
        /// Ceiling
        limit: Duration,
    },
}

impl std::fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory { used, limit } => write!(
                f,
                "Memory limit exceeded: {} bytes used, limit is {} bytes",
                used, limit
            ),
            Self::ExecutionTime { elapsed, limit } => write!(
                f,
                "Execution time limit exceeded: {}ms elapsed, limit is {}ms",
                elapsed.as_millis(),
                limit.as_millis()
            ),
        }
    }
}

/// Result of a limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStatus {
    /// Every ceiling holds
    WithinLimits,
    /// A ceiling was crossed
    Exceeded(LimitViolation),
}

impl LimitStatus {
    /// Whether a ceiling was crossed
    #[must_use]
    pub fn is_exceeded(&self) -> bool {
        matches!(self, Self::Exceeded(_))
    }

    /// Human-readable reason naming the crossed ceiling
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::WithinLimits => None,
            Self::Exceeded(violation) => Some(violation.to_string()),
        }
    }
}

/// Resource monitor for one run
///
/// All methods take `&self`; share it through an `Arc` so an execution
/// routine can report memory while the engine checks limits.
#[derive(Debug)]
pub struct ResourceMonitor {
    limits: ResourceLimits,
    /// Fixed reference point; start offsets are measured from here
    epoch: Instant,
    /// Start of the current window, in nanoseconds after `epoch`
    start_offset_nanos: AtomicU64,
    memory_usage: AtomicU64,
    peak_memory_usage: AtomicU64,
}

impl ResourceMonitor {
    /// Create a monitor; the time window starts now
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            epoch: Instant::now(),
            start_offset_nanos: AtomicU64::new(0),
            memory_usage: AtomicU64::new(0),
            peak_memory_usage: AtomicU64::new(0),
        }
    }

    /// Configured limits
    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Set the current memory usage (absolute, not a delta)
    pub fn update_memory_usage(&self, bytes: u64) {
        self.memory_usage.store(bytes, Ordering::Release);
        self.peak_memory_usage.fetch_max(bytes, Ordering::AcqRel);
    }

    /// Elapsed time since construction or the last reset
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        let start = Duration::from_nanos(self.start_offset_nanos.load(Ordering::Acquire));
        self.epoch.elapsed().saturating_sub(start)
    }

    /// Compare usage against the configured ceilings
    ///
    /// Memory is checked before time.
    #[must_use]
    pub fn check_limits(&self) -> LimitStatus {
        let used = self.memory_usage.load(Ordering::Acquire);
        if used > self.limits.max_memory_usage {
            return LimitStatus::Exceeded(LimitViolation::Memory {
                used,
                limit: self.limits.max_memory_usage,
            });
        }

        let elapsed = self.elapsed();
        if elapsed > self.limits.max_execution_time {
            return LimitStatus::Exceeded(LimitViolation::ExecutionTime {
                elapsed,
                limit: self.limits.max_execution_time,
            });
        }

        LimitStatus::WithinLimits
    }

    /// Current usage snapshot
    #[must_use]
    pub fn usage(&self) -> ResourceUsage {
        ResourceUsage {
            memory_usage: self.memory_usage.load(Ordering::Acquire),
            peak_memory_usage: self.peak_memory_usage.load(Ordering::Acquire),
            execution_time: self.elapsed(),
        }
    }

    /// Zero the memory counters and restart the time window
    pub fn reset(&self) {
        let now = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.start_offset_nanos.store(now, Ordering::Release);
        self.memory_usage.store(0, Ordering::Release);
        self.peak_memory_usage.store(0, Ordering::Release);
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new(ResourceLimits::default())
    }
}
