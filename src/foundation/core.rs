use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Absolute 0-based index of a task in the rendered sequence.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

impl std::fmt::Display for FrameIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one worker incarnation.
///
/// Replacement workers (after a crash or a scheduled recycle) get a fresh id,
/// so per-task worker attribution distinguishes incarnations.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct WorkerId(pub u64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Zero-pad width for artifact file names.
///
/// Width is the digit count of the *total* task count, not `total - 1`, so the
/// padding stays consistent for any external tool that globs the output
/// directory.
pub fn pad_width_for_total(total: u64) -> usize {
    let mut width = 1;
    let mut v = total;
    while v >= 10 {
        width += 1;
        v /= 10;
    }
    width
}

/// Deterministic artifact file name for a sequence index.
pub fn artifact_file_name(index: FrameIndex, pad_width: usize) -> String {
    format!("frame_{:0width$}.png", index.0, width = pad_width)
}

/// Cooperative cancellation flag shared between a signal handler and the
/// scheduling loop.
///
/// Setting the flag is the only thing a handler may do; the loop polls it
/// before every scheduling decision. Lock-free on both sides.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
