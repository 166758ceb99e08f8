use std::sync::mpsc;
use std::time::Instant;

use crate::foundation::core::{FrameIndex, WorkerId};
use crate::foundation::error::FrameforgeResult;
use crate::spec::TaskEnvelope;

pub mod breaker;
pub mod manager;
pub mod process;
pub mod progress;
pub mod protocol;
pub mod runtime;
pub mod thread;

pub use manager::{FrameRecord, FrameStatus, RenderPool, RunOutcome, RunReport, RunStats};
pub use process::ProcessBackend;
pub use progress::{ProgressCallback, ProgressInfo};
pub use protocol::TaskOutcome;
pub use thread::ThreadBackend;

/// Notifications worker transports deliver to the coordinator over one shared
/// events channel.
#[derive(Debug)]
pub enum PoolEvent {
    /// Worker finished its handshake and accepts tasks.
    Ready { worker: WorkerId },
    /// One task attempt finished (success or classified failure).
    Done {
        worker: WorkerId,
        index: FrameIndex,
        attempt: u32,
        outcome: TaskOutcome,
    },
    /// The transport ended (EOF, process exit, thread return). If a task was
    /// in flight the coordinator synthesizes a `worker_fatal` for it.
    Exited { worker: WorkerId },
}

/// Spawns worker incarnations. The manager is backend-agnostic: processes in
/// production, in-process threads for embedders and deterministic tests.
pub trait WorkerBackend: Send {
    fn spawn(
        &self,
        worker: WorkerId,
        events: mpsc::Sender<PoolEvent>,
    ) -> FrameforgeResult<Box<dyn WorkerHandle>>;
}

/// One live worker incarnation, owned exclusively by the coordinator.
pub trait WorkerHandle: Send {
    fn id(&self) -> WorkerId;

    /// Fire-and-forget task hand-off; completion arrives on the events
    /// channel.
    fn submit(&mut self, task: &TaskEnvelope) -> FrameforgeResult<()>;

    /// Ask for a clean exit after the current task.
    fn shutdown(&mut self);

    /// Terminate without waiting for the current task.
    fn force_terminate(&mut self);

    /// Wait until the worker exits or `deadline` passes; `true` if it exited.
    fn wait_exit(&mut self, deadline: Instant) -> bool;
}
