//! Thread-backed workers: same scheduling semantics as the process backend,
//! but in-process around a shared renderer. Used by embedders and by the
//! deterministic pool tests; crash containment requires the process backend.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::RenderConfig;
use crate::foundation::core::WorkerId;
use crate::foundation::error::{FrameforgeError, FrameforgeResult};
use crate::pool::protocol::TaskOutcome;
use crate::pool::{PoolEvent, WorkerBackend, WorkerHandle};
use crate::render::FrameRenderer;
use crate::spec::TaskEnvelope;

pub struct ThreadBackend {
    renderer: Arc<dyn FrameRenderer>,
    config: RenderConfig,
}

impl ThreadBackend {
    pub fn new(renderer: Arc<dyn FrameRenderer>, config: RenderConfig) -> Self {
        Self { renderer, config }
    }
}

enum ThreadMsg {
    Task(TaskEnvelope),
    Shutdown,
}

impl WorkerBackend for ThreadBackend {
    fn spawn(
        &self,
        worker: WorkerId,
        events: mpsc::Sender<PoolEvent>,
    ) -> FrameforgeResult<Box<dyn WorkerHandle>> {
        let (tx, rx) = mpsc::channel::<ThreadMsg>();
        let renderer = self.renderer.clone();
        let config = self.config.clone();

        let thread = std::thread::Builder::new()
            .name(format!("frameforge-{worker}"))
            .spawn(move || {
                if events.send(PoolEvent::Ready { worker }).is_err() {
                    return;
                }
                while let Ok(msg) = rx.recv() {
                    match msg {
                        ThreadMsg::Task(envelope) => {
                            let outcome = match renderer.render(&envelope, &config) {
                                Ok(artifact) => TaskOutcome::Rendered(artifact),
                                Err(failure) => TaskOutcome::Failed(failure),
                            };
                            let done = PoolEvent::Done {
                                worker,
                                index: envelope.spec.index,
                                attempt: envelope.attempt,
                                outcome,
                            };
                            if events.send(done).is_err() {
                                return;
                            }
                        }
                        ThreadMsg::Shutdown => break,
                    }
                }
                debug!(%worker, "thread worker exiting");
                let _ = events.send(PoolEvent::Exited { worker });
            })
            .map_err(|e| FrameforgeError::pool(format!("spawn worker thread: {e}")))?;

        Ok(Box::new(ThreadWorker {
            id: worker,
            tx: Some(tx),
            thread: Some(thread),
        }))
    }
}

struct ThreadWorker {
    id: WorkerId,
    tx: Option<mpsc::Sender<ThreadMsg>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle for ThreadWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn submit(&mut self, task: &TaskEnvelope) -> FrameforgeResult<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| FrameforgeError::worker(format!("worker {} detached", self.id)))?;
        tx.send(ThreadMsg::Task(task.clone()))
            .map_err(|_| FrameforgeError::worker(format!("submit to worker {}", self.id)))
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(ThreadMsg::Shutdown);
        }
    }

    /// Threads cannot be killed; the channel is closed and the thread is
    /// detached, exiting cooperatively after its current task.
    fn force_terminate(&mut self) {
        self.tx.take();
        self.thread.take();
    }

    fn wait_exit(&mut self, deadline: Instant) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                self.thread = Some(thread);
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let _ = thread.join();
        true
    }
}
