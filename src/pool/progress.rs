use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

/// Read-mostly progress snapshot, recomputed by the coordinator on every
/// state transition.
#[derive(Clone, Debug)]
pub struct ProgressInfo {
    pub total: u64,
    pub completed: u64,
    pub skipped: u64,
    /// Submitted-but-not-completed tasks (dispatched or queued for dispatch).
    pub in_flight: u64,
    /// Tasks not yet pulled from the generator.
    pub pending: u64,
    pub elapsed: Duration,
    /// Completions per second, once at least one task completed.
    pub fps: Option<f64>,
    /// Throughput-based estimate for the remaining work.
    pub eta: Option<Duration>,
}

impl ProgressInfo {
    pub(crate) fn compute(
        total: u64,
        completed: u64,
        skipped: u64,
        in_flight: u64,
        pending: u64,
        elapsed: Duration,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        let fps = if completed > 0 && secs > 0.0 {
            Some(completed as f64 / secs)
        } else {
            None
        };
        let remaining = total.saturating_sub(completed + skipped);
        let eta = fps
            .filter(|f| *f > 0.0)
            .map(|f| Duration::from_secs_f64(remaining as f64 / f));
        Self {
            total,
            completed,
            skipped,
            in_flight,
            pending,
            elapsed,
            fps,
            eta,
        }
    }
}

pub type ProgressCallback = Box<dyn FnMut(ProgressInfo) + Send>;

/// Routes progress snapshots to an external callback without ever blocking
/// the scheduling loop.
///
/// The callback runs on its own thread behind a bounded channel; the hot path
/// uses a lossy `try_send`, so a slow or stuck callback drops intermediate
/// snapshots instead of stalling scheduling. The terminal snapshot is flushed
/// with a bounded deadline.
pub struct ProgressRouter {
    tx: Option<mpsc::SyncSender<ProgressInfo>>,
    thread: Option<JoinHandle<()>>,
}

const ROUTER_CAPACITY: usize = 32;

impl ProgressRouter {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        let Some(mut callback) = callback else {
            return Self {
                tx: None,
                thread: None,
            };
        };
        let (tx, rx) = mpsc::sync_channel::<ProgressInfo>(ROUTER_CAPACITY);
        let thread = std::thread::Builder::new()
            .name("frameforge-progress".to_string())
            .spawn(move || {
                while let Ok(info) = rx.recv() {
                    callback(info);
                }
            })
            .ok();
        Self {
            tx: Some(tx),
            thread,
        }
    }

    /// Lossy publish from the scheduling loop.
    pub fn publish(&self, info: ProgressInfo) {
        if let Some(tx) = &self.tx
            && tx.try_send(info).is_err()
        {
            debug!("progress callback lagging, snapshot dropped");
        }
    }

    /// Deliver the terminal snapshot if the callback catches up within
    /// `deadline`, then stop the callback thread.
    pub fn finish(mut self, info: ProgressInfo, deadline: Duration) {
        let end = Instant::now() + deadline;
        if let Some(tx) = self.tx.take() {
            let mut info = Some(info);
            while let Some(snapshot) = info.take() {
                match tx.try_send(snapshot) {
                    Ok(()) => break,
                    Err(mpsc::TrySendError::Full(back)) if Instant::now() < end => {
                        info = Some(back);
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
            drop(tx);
        }
        if let Some(thread) = self.thread.take() {
            // Bounded join: poll, then detach if the callback is stuck.
            while !thread.is_finished() && Instant::now() < end {
                std::thread::sleep(Duration::from_millis(5));
            }
            if thread.is_finished() {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for ProgressRouter {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take()
            && thread.is_finished()
        {
            let _ = thread.join();
        }
    }
}
