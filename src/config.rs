use std::path::PathBuf;
use std::time::Duration;

use crate::foundation::error::{FrameforgeError, FrameforgeResult};

/// Read-only configuration shared by every worker.
///
/// Fully serializable: it is cloned into each worker's `Init` message and
/// never mutated after construction, so no cross-process synchronization is
/// needed.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RenderConfig {
    /// Directory artifacts are written into.
    pub out_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Trusted root for externally-supplied thumbnail assets. Paths in specs
    /// are validated against this root before any filesystem access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub art_root: Option<PathBuf>,
    /// Opaque background color.
    pub background: [u8; 4],
    /// Maximum number of bar rows drawn per chart frame.
    pub max_bars: usize,
}

impl RenderConfig {
    pub fn new(out_dir: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            out_dir: out_dir.into(),
            width,
            height,
            art_root: None,
            background: [18, 20, 28, 255],
            max_bars: 10,
        }
    }

    pub fn with_art_root(mut self, art_root: impl Into<PathBuf>) -> Self {
        self.art_root = Some(art_root.into());
        self
    }

    pub fn validate(&self) -> FrameforgeResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameforgeError::validation(
                "render width/height must be non-zero",
            ));
        }
        if self.width > 16_384 || self.height > 16_384 {
            return Err(FrameforgeError::validation(
                "render width/height must be <= 16384",
            ));
        }
        if self.out_dir.as_os_str().is_empty() {
            return Err(FrameforgeError::validation("out_dir must be non-empty"));
        }
        if self.max_bars == 0 {
            return Err(FrameforgeError::validation("max_bars must be >= 1"));
        }
        Ok(())
    }
}

/// Scheduling policy for the parallel render manager.
///
/// Every knob has a documented default; `Default` is the production policy.
#[derive(Clone, Debug)]
pub struct PoolOptions {
    /// Number of worker processes. Default: available parallelism.
    pub workers: usize,
    /// In-flight cap is `workers * backpressure_multiplier`. Default 2.
    pub backpressure_multiplier: usize,
    /// Total attempts allowed for a transiently failing task. Default 3.
    pub max_retries_transient: u32,
    /// Worker failures within `breaker_window` that trip the circuit breaker
    /// and abort the run. Default 3.
    pub circuit_breaker_threshold: u32,
    /// Wall-clock sliding window for the circuit breaker. Default 60 s.
    pub breaker_window: Duration,
    /// Scheduled worker recycling bound; a worker is retired after this many
    /// tasks regardless of failure history. Default 1000.
    pub max_tasks_per_worker: u32,
    /// Grace period in-flight tasks get after cancellation or a breaker trip
    /// before workers are force-terminated. Default 5 s.
    pub shutdown_grace: Duration,
    /// No completion for this long is treated as a `worker_fatal` signal
    /// against every stalled worker. Default 120 s.
    pub stall_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            backpressure_multiplier: 2,
            max_retries_transient: 3,
            circuit_breaker_threshold: 3,
            breaker_window: Duration::from_secs(60),
            max_tasks_per_worker: 1000,
            shutdown_grace: Duration::from_secs(5),
            stall_timeout: Duration::from_secs(120),
        }
    }
}

impl PoolOptions {
    pub fn validate(&self) -> FrameforgeResult<()> {
        if self.workers == 0 {
            return Err(FrameforgeError::validation("pool workers must be >= 1"));
        }
        if self.backpressure_multiplier == 0 {
            return Err(FrameforgeError::validation(
                "backpressure_multiplier must be >= 1",
            ));
        }
        if self.max_retries_transient == 0 {
            return Err(FrameforgeError::validation(
                "max_retries_transient must be >= 1 (it bounds total attempts)",
            ));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(FrameforgeError::validation(
                "circuit_breaker_threshold must be >= 1",
            ));
        }
        if self.breaker_window.is_zero() {
            return Err(FrameforgeError::validation("breaker_window must be > 0"));
        }
        if self.max_tasks_per_worker == 0 {
            return Err(FrameforgeError::validation(
                "max_tasks_per_worker must be >= 1",
            ));
        }
        if self.stall_timeout.is_zero() {
            return Err(FrameforgeError::validation("stall_timeout must be > 0"));
        }
        Ok(())
    }

    /// Maximum number of submitted-but-not-completed tasks.
    pub fn in_flight_cap(&self) -> usize {
        self.workers.saturating_mul(self.backpressure_multiplier)
    }
}
