//! The parallel render manager: pulls specs from a generator, schedules them
//! onto a fixed pool of workers under a backpressure cap, classifies
//! failures, retries or skips, recycles workers, trips a circuit breaker on
//! systemic failure and drains cleanly on cancellation.
//!
//! All mutable run state (task contexts, counters, breaker window) is owned
//! by the single coordinator loop; workers only ever see immutable envelopes
//! and the shared read-only config, so nothing here needs a lock.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::PoolOptions;
use crate::foundation::core::{CancelToken, FrameIndex, WorkerId, pad_width_for_total};
use crate::foundation::error::{
    FailureClass, FrameforgeError, FrameforgeResult, RenderFailure,
};
use crate::generator::SpecSource;
use crate::pool::breaker::CircuitBreaker;
use crate::pool::progress::{ProgressCallback, ProgressInfo, ProgressRouter};
use crate::pool::protocol::TaskOutcome;
use crate::pool::{PoolEvent, WorkerBackend, WorkerHandle};
use crate::render::ArtifactHandle;
use crate::spec::{TaskEnvelope, TaskSpec};

/// Per-task state machine.
///
/// `Pending → Submitted → {Completed | Retrying | SkippedFatal}`;
/// `Retrying` goes back to `Submitted` until the attempt bound, then
/// `SkippedFatal`. `AbortedWorkerFatal` and `Cancelled` are the run-level
/// terminal states applied to tasks cut short by a breaker trip or shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    Pending,
    Submitted,
    Retrying,
    Completed,
    SkippedFatal,
    AbortedWorkerFatal,
    Cancelled,
}

impl FrameStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FrameStatus::Completed
                | FrameStatus::SkippedFatal
                | FrameStatus::AbortedWorkerFatal
                | FrameStatus::Cancelled
        )
    }
}

/// Final per-task record folded out of the manager's `TaskContext`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct FrameRecord {
    pub index: FrameIndex,
    pub status: FrameStatus,
    pub attempts: u32,
    pub worker: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RenderFailure>,
}

/// How the run ended.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Generator exhausted, every task terminal. Skips do not fail the run.
    Completed { rendered: u64, skipped: u64 },
    /// Circuit breaker tripped: `failures` worker failures inside the sliding
    /// window against a threshold of `threshold`.
    AbortedWorkerFatal { failures: u32, threshold: u32 },
    /// External cancellation. `completed` counts tasks that reached
    /// `Completed` (including during the drain grace period); `in_flight`
    /// counts tasks that were pulled from the generator but not completed,
    /// whether or not they were ever dispatched to a worker.
    Cancelled { completed: u64, in_flight: u64 },
}

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct RunStats {
    pub elapsed_ms: u64,
    pub retried: u64,
    pub worker_failures: u64,
    pub workers_recycled: u64,
    pub bytes_written: u64,
}

/// Everything the caller learns about a finished run.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// One record per task, in sequence-index order.
    pub records: Vec<FrameRecord>,
    pub stats: RunStats,
}

impl RunReport {
    /// Completed artifacts in sequence order; this is the reassembler's
    /// input.
    pub fn artifacts(&self) -> impl Iterator<Item = &ArtifactHandle> {
        self.records
            .iter()
            .filter(|r| r.status == FrameStatus::Completed)
            .filter_map(|r| r.artifact.as_ref())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &FrameRecord> {
        self.records
            .iter()
            .filter(|r| r.status == FrameStatus::SkippedFatal)
    }
}

struct TaskContext {
    spec: TaskSpec,
    status: FrameStatus,
    attempts: u32,
    worker: Option<WorkerId>,
    artifact: Option<ArtifactHandle>,
    failure: Option<RenderFailure>,
}

impl TaskContext {
    fn new(spec: TaskSpec) -> Self {
        Self {
            spec,
            status: FrameStatus::Pending,
            attempts: 0,
            worker: None,
            artifact: None,
            failure: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Starting,
    Idle,
    Busy(u64),
}

struct WorkerSlot {
    handle: Box<dyn WorkerHandle>,
    state: SlotState,
    tasks_done: u32,
}

enum Phase {
    Running,
    Draining {
        reason: DrainReason,
        deadline: Instant,
    },
}

enum DrainReason {
    Cancel,
    Abort { failures: u32, threshold: u32 },
}

impl DrainReason {
    fn terminal_status(&self) -> FrameStatus {
        match self {
            DrainReason::Cancel => FrameStatus::Cancelled,
            DrainReason::Abort { .. } => FrameStatus::AbortedWorkerFatal,
        }
    }
}

const EVENT_TICK: Duration = Duration::from_millis(25);

/// The orchestrator. Owns the worker pool for the duration of one `run`.
pub struct RenderPool {
    backend: Box<dyn WorkerBackend>,
    opts: PoolOptions,
    cancel: CancelToken,
    progress: Option<ProgressCallback>,
}

impl RenderPool {
    pub fn new(backend: Box<dyn WorkerBackend>, opts: PoolOptions) -> FrameforgeResult<Self> {
        opts.validate()?;
        Ok(Self {
            backend,
            opts,
            cancel: CancelToken::new(),
            progress: None,
        })
    }

    /// Callback invoked (off the hot path) after state transitions.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Clone of the cooperative cancellation flag; hand this to a signal
    /// handler.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Drive the full run: schedule every spec the source yields, wait for
    /// all in-flight work to reach a terminal state, shut the pool down.
    ///
    /// Task-level failures never surface here; only run-level conditions do
    /// (spawn failures, generator faults, a poisoned events channel).
    pub fn run(&mut self, source: &mut dyn SpecSource) -> FrameforgeResult<RunReport> {
        let started = Instant::now();
        let (_, total) = source.progress();
        let pad_width = pad_width_for_total(total);
        let cap = self.opts.in_flight_cap();

        info!(
            workers = self.opts.workers,
            cap, total, "starting parallel render run"
        );

        let (events_tx, events_rx) = mpsc::channel::<PoolEvent>();
        let mut next_worker = 1u64;
        let mut workers: HashMap<WorkerId, WorkerSlot> = HashMap::new();
        let mut retired: Vec<Box<dyn WorkerHandle>> = Vec::new();
        for _ in 0..self.opts.workers {
            spawn_worker(
                self.backend.as_ref(),
                &mut next_worker,
                &events_tx,
                &mut workers,
            )?;
        }

        let mut contexts: BTreeMap<u64, TaskContext> = BTreeMap::new();
        let mut ready: VecDeque<u64> = VecDeque::new();
        let mut exhausted = false;
        let mut last_index: Option<u64> = None;
        let mut breaker = CircuitBreaker::new(
            self.opts.circuit_breaker_threshold,
            self.opts.breaker_window,
        );
        let mut stats = RunStats::default();
        let mut completed = 0u64;
        let mut skipped = 0u64;
        let router = ProgressRouter::new(self.progress.take());
        let mut phase = Phase::Running;
        let mut last_activity = Instant::now();

        let outcome = loop {
            let now = Instant::now();

            if matches!(phase, Phase::Running) && self.cancel.is_cancelled() {
                let in_flight = ready.len() as u64 + busy_count(&workers);
                info!(in_flight, "cancellation observed, draining");
                phase = Phase::Draining {
                    reason: DrainReason::Cancel,
                    deadline: now + self.opts.shutdown_grace,
                };
            }

            match &phase {
                Phase::Running => {
                    // Backpressure: pull the next spec only while the number
                    // of live tasks stays under the cap.
                    while !exhausted && ready.len() as u64 + busy_count(&workers) < cap as u64 {
                        match source.next_spec()? {
                            Some(spec) => {
                                if let Some(last) = last_index
                                    && spec.index.0 <= last
                                {
                                    return Err(FrameforgeError::generator(format!(
                                        "spec index {} not strictly increasing",
                                        spec.index
                                    )));
                                }
                                last_index = Some(spec.index.0);
                                let idx = spec.index.0;
                                contexts.insert(idx, TaskContext::new(spec));
                                ready.push_back(idx);
                            }
                            None => {
                                exhausted = true;
                            }
                        }
                    }

                    // Dispatch to idle workers.
                    while !ready.is_empty() {
                        let Some(worker) = idle_worker(&workers) else {
                            break;
                        };
                        let Some(idx) = ready.pop_front() else {
                            break;
                        };
                        let Some(ctx) = contexts.get_mut(&idx) else {
                            continue;
                        };
                        ctx.attempts += 1;
                        ctx.status = FrameStatus::Submitted;
                        ctx.worker = Some(worker);
                        let envelope = TaskEnvelope {
                            spec: ctx.spec.clone(),
                            attempt: ctx.attempts,
                            pad_width,
                        };
                        let slot = workers
                            .get_mut(&worker)
                            .ok_or_else(|| FrameforgeError::pool("idle worker vanished (bug)"))?;
                        match slot.handle.submit(&envelope) {
                            Ok(()) => {
                                slot.state = SlotState::Busy(idx);
                                debug!(%worker, index = idx, attempt = ctx.attempts, "dispatched");
                            }
                            Err(e) => {
                                // The worker is broken but the task never
                                // ran: the attempt is not consumed.
                                warn!(%worker, index = idx, "submit failed: {e}");
                                ctx.attempts -= 1;
                                ctx.status = FrameStatus::Pending;
                                ctx.worker = None;
                                ready.push_front(idx);
                                stats.worker_failures += 1;
                                breaker.record(Instant::now());
                                retire(&mut workers, &mut retired, worker, true);
                                spawn_worker(
                                    self.backend.as_ref(),
                                    &mut next_worker,
                                    &events_tx,
                                    &mut workers,
                                )?;
                            }
                        }
                    }

                    if let Some(tripped) = breaker_trip(&mut breaker, Instant::now()) {
                        error!(
                            failures = tripped.0,
                            threshold = tripped.1,
                            "circuit breaker tripped, aborting run"
                        );
                        phase = Phase::Draining {
                            reason: DrainReason::Abort {
                                failures: tripped.0,
                                threshold: tripped.1,
                            },
                            deadline: Instant::now() + self.opts.shutdown_grace,
                        };
                        continue;
                    }

                    if exhausted && ready.is_empty() && busy_count(&workers) == 0 {
                        break RunOutcome::Completed {
                            rendered: completed,
                            skipped,
                        };
                    }
                }
                Phase::Draining { reason, deadline } => {
                    // Queued-but-never-dispatched tasks terminate immediately.
                    let status = reason.terminal_status();
                    while let Some(idx) = ready.pop_front() {
                        if let Some(ctx) = contexts.get_mut(&idx)
                            && !ctx.status.is_terminal()
                        {
                            ctx.status = status;
                        }
                    }

                    if now >= *deadline {
                        // Grace period over: force-terminate stragglers.
                        let busy: Vec<WorkerId> = workers
                            .iter()
                            .filter(|(_, s)| matches!(s.state, SlotState::Busy(_)))
                            .map(|(id, _)| *id)
                            .collect();
                        for worker in busy {
                            if let Some(slot) = workers.get(&worker)
                                && let SlotState::Busy(idx) = slot.state
                                && let Some(ctx) = contexts.get_mut(&idx)
                                && !ctx.status.is_terminal()
                            {
                                ctx.status = status;
                            }
                            warn!(%worker, "grace period expired, force-terminating");
                            retire(&mut workers, &mut retired, worker, true);
                        }
                    }

                    if busy_count(&workers) == 0 {
                        break match reason {
                            DrainReason::Cancel => {
                                let unfinished = contexts
                                    .values()
                                    .filter(|c| c.status == FrameStatus::Cancelled)
                                    .count() as u64;
                                RunOutcome::Cancelled {
                                    completed,
                                    in_flight: unfinished,
                                }
                            }
                            DrainReason::Abort {
                                failures,
                                threshold,
                            } => RunOutcome::AbortedWorkerFatal {
                                failures: *failures,
                                threshold: *threshold,
                            },
                        };
                    }
                }
            }

            // One snapshot per scheduling iteration: covers dispatch and
            // drain transitions, not just completions arriving as events.
            publish_progress(
                &router, source, started, total, completed, skipped, &ready, &workers,
            );

            match events_rx.recv_timeout(EVENT_TICK) {
                Ok(event) => {
                    last_activity = Instant::now();
                    self.handle_event(
                        event,
                        &mut workers,
                        &mut retired,
                        &mut contexts,
                        &mut ready,
                        &mut breaker,
                        &mut stats,
                        &mut completed,
                        &mut skipped,
                        &mut next_worker,
                        &events_tx,
                        matches!(phase, Phase::Running),
                    )?;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    // Stall watchdog: no completion for too long is a
                    // worker_fatal signal against every stalled worker.
                    if matches!(phase, Phase::Running)
                        && busy_count(&workers) > 0
                        && last_activity.elapsed() > self.opts.stall_timeout
                    {
                        let stalled: Vec<WorkerId> = workers
                            .iter()
                            .filter(|(_, s)| matches!(s.state, SlotState::Busy(_)))
                            .map(|(id, _)| *id)
                            .collect();
                        for worker in stalled {
                            error!(%worker, "stall watchdog fired, treating as worker_fatal");
                            if let Some(slot) = workers.get(&worker)
                                && let SlotState::Busy(idx) = slot.state
                                && let Some(ctx) = contexts.get_mut(&idx)
                                && !ctx.status.is_terminal()
                            {
                                ctx.status = FrameStatus::SkippedFatal;
                                ctx.failure = Some(RenderFailure::worker_fatal(format!(
                                    "no progress for {:?} (stall watchdog)",
                                    self.opts.stall_timeout
                                )));
                                skipped += 1;
                            }
                            stats.worker_failures += 1;
                            breaker.record(Instant::now());
                            retire(&mut workers, &mut retired, worker, true);
                            spawn_worker(
                                self.backend.as_ref(),
                                &mut next_worker,
                                &events_tx,
                                &mut workers,
                            )?;
                        }
                        last_activity = Instant::now();
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(FrameforgeError::pool(
                        "events channel disconnected unexpectedly",
                    ));
                }
            }
        };

        // Clean pool shutdown: graceful first, then force.
        for slot in workers.values_mut() {
            slot.handle.shutdown();
        }
        let deadline = Instant::now() + self.opts.shutdown_grace;
        for slot in workers.values_mut() {
            if !slot.handle.wait_exit(deadline) {
                slot.handle.force_terminate();
            }
        }
        for handle in &mut retired {
            if !handle.wait_exit(deadline) {
                handle.force_terminate();
            }
        }
        drop(workers);
        drop(retired);

        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        let records: Vec<FrameRecord> = contexts
            .into_values()
            .map(|ctx| FrameRecord {
                index: ctx.spec.index,
                status: ctx.status,
                attempts: ctx.attempts,
                worker: ctx.worker,
                artifact: ctx.artifact,
                failure: ctx.failure,
            })
            .collect();

        let (produced, _) = source.progress();
        router.finish(
            ProgressInfo::compute(
                total,
                completed,
                skipped,
                0,
                total.saturating_sub(produced),
                started.elapsed(),
            ),
            Duration::from_secs(1),
        );

        match &outcome {
            RunOutcome::Completed { rendered, skipped } => {
                info!(rendered, skipped, "run completed");
            }
            RunOutcome::AbortedWorkerFatal {
                failures,
                threshold,
            } => {
                error!(failures, threshold, "run aborted by circuit breaker");
            }
            RunOutcome::Cancelled {
                completed,
                in_flight,
            } => {
                info!(completed, in_flight, "run cancelled");
            }
        }

        Ok(RunReport {
            outcome,
            records,
            stats,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_event(
        &self,
        event: PoolEvent,
        workers: &mut HashMap<WorkerId, WorkerSlot>,
        retired: &mut Vec<Box<dyn WorkerHandle>>,
        contexts: &mut BTreeMap<u64, TaskContext>,
        ready: &mut VecDeque<u64>,
        breaker: &mut CircuitBreaker,
        stats: &mut RunStats,
        completed: &mut u64,
        skipped: &mut u64,
        next_worker: &mut u64,
        events_tx: &mpsc::Sender<PoolEvent>,
        running: bool,
    ) -> FrameforgeResult<()> {
        match event {
            PoolEvent::Ready { worker } => {
                if let Some(slot) = workers.get_mut(&worker)
                    && slot.state == SlotState::Starting
                {
                    slot.state = SlotState::Idle;
                    debug!(%worker, "worker ready");
                }
            }
            PoolEvent::Done {
                worker,
                index,
                attempt,
                outcome,
            } => {
                let Some(slot) = workers.get_mut(&worker) else {
                    // Late event from a retired worker.
                    return Ok(());
                };
                if slot.state != SlotState::Busy(index.0) {
                    return Ok(());
                }
                slot.state = SlotState::Idle;
                slot.tasks_done += 1;
                let recycle_due = slot.tasks_done >= self.opts.max_tasks_per_worker;

                let Some(ctx) = contexts.get_mut(&index.0) else {
                    return Ok(());
                };
                if ctx.status != FrameStatus::Submitted || ctx.attempts != attempt {
                    return Ok(());
                }

                let mut worker_failed = false;
                match outcome {
                    TaskOutcome::Rendered(artifact) => {
                        stats.bytes_written += artifact.bytes;
                        ctx.status = FrameStatus::Completed;
                        ctx.artifact = Some(artifact);
                        *completed += 1;
                    }
                    TaskOutcome::Failed(failure) => match failure.class {
                        FailureClass::Transient => {
                            if ctx.attempts < self.opts.max_retries_transient {
                                debug!(
                                    index = index.0,
                                    attempt, "transient failure, will retry: {}", failure.message
                                );
                                ctx.status = FrameStatus::Retrying;
                                ctx.failure = Some(failure);
                                stats.retried += 1;
                                ready.push_back(index.0);
                            } else {
                                warn!(
                                    index = index.0,
                                    attempts = ctx.attempts,
                                    "transient retries exhausted, skipping: {}",
                                    failure.message
                                );
                                ctx.status = FrameStatus::SkippedFatal;
                                ctx.failure = Some(failure);
                                *skipped += 1;
                            }
                        }
                        FailureClass::FrameFatal => {
                            warn!(index = index.0, "frame-fatal, skipping: {}", failure.message);
                            ctx.status = FrameStatus::SkippedFatal;
                            ctx.failure = Some(failure);
                            *skipped += 1;
                        }
                        FailureClass::WorkerFatal => {
                            warn!(
                                %worker,
                                index = index.0,
                                "worker-fatal, retiring worker: {}",
                                failure.message
                            );
                            ctx.status = FrameStatus::SkippedFatal;
                            ctx.failure = Some(failure);
                            *skipped += 1;
                            stats.worker_failures += 1;
                            breaker.record(Instant::now());
                            worker_failed = true;
                        }
                    },
                }

                if worker_failed {
                    retire(workers, retired, worker, true);
                    if running {
                        spawn_worker(self.backend.as_ref(), next_worker, events_tx, workers)?;
                    }
                } else if recycle_due {
                    // Scheduled replacement between tasks; never counted by
                    // the breaker.
                    info!(%worker, tasks = self.opts.max_tasks_per_worker, "recycling worker");
                    stats.workers_recycled += 1;
                    retire(workers, retired, worker, false);
                    if running {
                        spawn_worker(self.backend.as_ref(), next_worker, events_tx, workers)?;
                    }
                }
            }
            PoolEvent::Exited { worker } => {
                let Some(slot) = workers.get(&worker) else {
                    return Ok(());
                };
                let busy_index = match slot.state {
                    SlotState::Busy(idx) => Some(idx),
                    _ => None,
                };
                warn!(%worker, in_flight = ?busy_index, "worker exited unexpectedly");
                if let Some(idx) = busy_index
                    && let Some(ctx) = contexts.get_mut(&idx)
                    && !ctx.status.is_terminal()
                {
                    ctx.status = FrameStatus::SkippedFatal;
                    ctx.failure = Some(RenderFailure::worker_fatal("worker exited mid-task"));
                    *skipped += 1;
                }
                stats.worker_failures += 1;
                breaker.record(Instant::now());
                retire(workers, retired, worker, true);
                if running {
                    spawn_worker(self.backend.as_ref(), next_worker, events_tx, workers)?;
                }
            }
        }
        Ok(())
    }
}

fn spawn_worker(
    backend: &dyn WorkerBackend,
    next_worker: &mut u64,
    events_tx: &mpsc::Sender<PoolEvent>,
    workers: &mut HashMap<WorkerId, WorkerSlot>,
) -> FrameforgeResult<WorkerId> {
    let id = WorkerId(*next_worker);
    *next_worker += 1;
    let handle = backend.spawn(id, events_tx.clone())?;
    workers.insert(
        id,
        WorkerSlot {
            handle,
            state: SlotState::Starting,
            tasks_done: 0,
        },
    );
    debug!(worker = %id, "worker spawned");
    Ok(id)
}

fn retire(
    workers: &mut HashMap<WorkerId, WorkerSlot>,
    retired: &mut Vec<Box<dyn WorkerHandle>>,
    worker: WorkerId,
    force: bool,
) {
    if let Some(mut slot) = workers.remove(&worker) {
        if force {
            slot.handle.force_terminate();
        } else {
            slot.handle.shutdown();
        }
        retired.push(slot.handle);
    }
}

fn busy_count(workers: &HashMap<WorkerId, WorkerSlot>) -> u64 {
    workers
        .values()
        .filter(|s| matches!(s.state, SlotState::Busy(_)))
        .count() as u64
}

fn idle_worker(workers: &HashMap<WorkerId, WorkerSlot>) -> Option<WorkerId> {
    workers
        .iter()
        .find(|(_, s)| s.state == SlotState::Idle)
        .map(|(id, _)| *id)
}

fn breaker_trip(breaker: &mut CircuitBreaker, now: Instant) -> Option<(u32, u32)> {
    if breaker.tripped(now) {
        Some((breaker.count(now), breaker.threshold()))
    } else {
        None
    }
}

#[allow(clippy::too_many_arguments)]
fn publish_progress(
    router: &ProgressRouter,
    source: &dyn SpecSource,
    started: Instant,
    total: u64,
    completed: u64,
    skipped: u64,
    ready: &VecDeque<u64>,
    workers: &HashMap<WorkerId, WorkerSlot>,
) {
    let (produced, _) = source.progress();
    let in_flight = ready.len() as u64 + busy_count(workers);
    router.publish(ProgressInfo::compute(
        total,
        completed,
        skipped,
        in_flight,
        total.saturating_sub(produced),
        started.elapsed(),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConfig;
    use crate::generator::SequenceSource;
    use crate::pool::thread::ThreadBackend;
    use crate::render::ChartRenderer;
    use crate::spec::{FramePayload, TitleCard};
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("frameforge_manager_{}_{tag}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn card_specs(n: u64) -> Vec<TaskSpec> {
        (0..n)
            .map(|i| TaskSpec {
                index: FrameIndex(i),
                timestamp: Utc::now(),
                payload: FramePayload::Card(TitleCard {
                    title: "t".to_string(),
                    subtitle: String::new(),
                    progress: 1.0,
                }),
            })
            .collect()
    }

    fn small_opts(workers: usize) -> PoolOptions {
        let mut opts = PoolOptions::default();
        opts.workers = workers;
        opts.shutdown_grace = Duration::from_secs(2);
        opts.stall_timeout = Duration::from_secs(30);
        opts
    }

    #[test]
    fn empty_source_completes_with_zero() {
        let out = temp_dir("empty");
        let backend = ThreadBackend::new(
            Arc::new(ChartRenderer::new()),
            RenderConfig::new(&out, 16, 16),
        );
        let mut pool = RenderPool::new(Box::new(backend), small_opts(2)).unwrap();
        let mut source = SequenceSource::new(Vec::new());
        let report = pool.run(&mut source).unwrap();
        assert_eq!(
            report.outcome,
            RunOutcome::Completed {
                rendered: 0,
                skipped: 0
            }
        );
        assert!(report.records.is_empty());
        let _ = std::fs::remove_dir_all(&out);
    }

    #[test]
    fn small_run_renders_every_spec() {
        let out = temp_dir("small");
        let backend = ThreadBackend::new(
            Arc::new(ChartRenderer::new()),
            RenderConfig::new(&out, 16, 16),
        );
        let mut pool = RenderPool::new(Box::new(backend), small_opts(2)).unwrap();
        let mut source = SequenceSource::new(card_specs(5));
        let report = pool.run(&mut source).unwrap();
        assert_eq!(
            report.outcome,
            RunOutcome::Completed {
                rendered: 5,
                skipped: 0
            }
        );
        assert_eq!(report.artifacts().count(), 5);
        // Records come back in sequence order.
        let indices: Vec<u64> = report.records.iter().map(|r| r.index.0).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        let _ = std::fs::remove_dir_all(&out);
    }

    #[test]
    fn report_serializes_with_tagged_outcome() {
        let report = RunReport {
            outcome: RunOutcome::AbortedWorkerFatal {
                failures: 3,
                threshold: 3,
            },
            records: vec![],
            stats: RunStats::default(),
        };
        let s = serde_json::to_string(&report).unwrap();
        assert!(s.contains("\"outcome\":\"aborted_worker_fatal\""));
        let back: RunReport = serde_json::from_str(&s).unwrap();
        assert_eq!(back.outcome, report.outcome);
    }

    #[test]
    fn nonmonotonic_source_is_a_generator_error() {
        let out = temp_dir("nonmono");
        let backend = ThreadBackend::new(
            Arc::new(ChartRenderer::new()),
            RenderConfig::new(&out, 16, 16),
        );
        let mut pool = RenderPool::new(Box::new(backend), small_opts(1)).unwrap();
        let mut specs = card_specs(3);
        specs[2].index = FrameIndex(1);
        let mut source = SequenceSource::new(specs);
        assert!(pool.run(&mut source).is_err());
        let _ = std::fs::remove_dir_all(&out);
    }
}
