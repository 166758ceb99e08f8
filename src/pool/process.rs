//! Process-backed workers: one child process per worker incarnation, NDJSON
//! over stdin/stdout, stderr relayed into `tracing`.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::RenderConfig;
use crate::foundation::core::WorkerId;
use crate::foundation::error::{FrameforgeError, FrameforgeResult};
use crate::pool::protocol::{WorkerReply, WorkerRequest, decode_line, encode_line};
use crate::pool::{PoolEvent, WorkerBackend, WorkerHandle};
use crate::render::FaultPlan;
use crate::spec::TaskEnvelope;

/// Spawns `<current_exe> worker` (or an explicit command) per worker. The
/// production backend: a crashing renderer takes down its own process, never
/// the coordinator.
pub struct ProcessBackend {
    config: RenderConfig,
    fault_plan: Option<FaultPlan>,
    worker_command: Option<Vec<String>>,
}

impl ProcessBackend {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            fault_plan: None,
            worker_command: None,
        }
    }

    /// Scripted faults forwarded to every worker's `Init` message.
    pub fn with_fault_plan(mut self, plan: FaultPlan) -> Self {
        self.fault_plan = Some(plan);
        self
    }

    /// Override the worker command line (program + args). Defaults to the
    /// current executable in hidden `worker` mode.
    pub fn with_worker_command(mut self, command: Vec<String>) -> Self {
        self.worker_command = Some(command);
        self
    }
}

impl WorkerBackend for ProcessBackend {
    fn spawn(
        &self,
        worker: WorkerId,
        events: mpsc::Sender<PoolEvent>,
    ) -> FrameforgeResult<Box<dyn WorkerHandle>> {
        let (program, args) = match &self.worker_command {
            Some(cmd) if !cmd.is_empty() => (cmd[0].clone(), cmd[1..].to_vec()),
            _ => {
                let exe = std::env::current_exe().map_err(|e| {
                    FrameforgeError::pool(format!("resolve current executable: {e}"))
                })?;
                (exe.to_string_lossy().into_owned(), vec!["worker".to_string()])
            }
        };

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FrameforgeError::pool(format!("spawn worker '{program}': {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| FrameforgeError::pool("worker stdin unavailable (unexpected)"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FrameforgeError::pool("worker stdout unavailable (unexpected)"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FrameforgeError::pool("worker stderr unavailable (unexpected)"))?;

        let init = WorkerRequest::Init {
            worker,
            config: self.config.clone(),
            fault_plan: self.fault_plan.clone(),
        };
        let line = encode_line(&init)?;
        if let Err(e) = stdin.write_all(line.as_bytes()).and_then(|_| stdin.flush()) {
            let _ = child.kill();
            return Err(FrameforgeError::pool(format!(
                "write init to worker {worker}: {e}"
            )));
        }

        // One reader thread per worker feeds the shared events channel; EOF
        // or a malformed line becomes an `Exited` event the coordinator
        // interprets.
        let reply_events = events.clone();
        std::thread::Builder::new()
            .name(format!("frameforge-{worker}-out"))
            .spawn(move || {
                let reader = BufReader::new(stdout);
                for line in reader.lines() {
                    let Ok(line) = line else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let event = match decode_line::<WorkerReply>(&line) {
                        Ok(WorkerReply::Ready { worker, .. }) => PoolEvent::Ready { worker },
                        Ok(WorkerReply::Done {
                            index,
                            attempt,
                            outcome,
                        }) => PoolEvent::Done {
                            worker,
                            index,
                            attempt,
                            outcome,
                        },
                        Err(e) => {
                            warn!(%worker, "unreadable worker reply: {e}");
                            break;
                        }
                    };
                    if reply_events.send(event).is_err() {
                        return;
                    }
                }
                let _ = reply_events.send(PoolEvent::Exited { worker });
            })
            .map_err(|e| FrameforgeError::pool(format!("spawn reader thread: {e}")))?;

        std::thread::Builder::new()
            .name(format!("frameforge-{worker}-err"))
            .spawn(move || {
                let reader = BufReader::new(stderr);
                for line in reader.lines() {
                    let Ok(line) = line else { break };
                    debug!(target: "frameforge::worker", %worker, "{line}");
                }
            })
            .map_err(|e| FrameforgeError::pool(format!("spawn stderr thread: {e}")))?;

        Ok(Box::new(ProcessWorker {
            id: worker,
            child,
            stdin: Some(stdin),
        }))
    }
}

struct ProcessWorker {
    id: WorkerId,
    child: Child,
    stdin: Option<ChildStdin>,
}

impl WorkerHandle for ProcessWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn submit(&mut self, task: &TaskEnvelope) -> FrameforgeResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| FrameforgeError::worker(format!("worker {} stdin closed", self.id)))?;
        let line = encode_line(&WorkerRequest::Task {
            envelope: task.clone(),
        })?;
        stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.flush())
            .map_err(|e| FrameforgeError::worker(format!("submit to worker {}: {e}", self.id)))
    }

    fn shutdown(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            if let Ok(line) = encode_line(&WorkerRequest::Shutdown) {
                let _ = stdin.write_all(line.as_bytes());
                let _ = stdin.flush();
            }
            // Dropping stdin closes the pipe; the worker loop exits on EOF
            // even if it missed the shutdown line.
        }
    }

    fn force_terminate(&mut self) {
        self.stdin.take();
        let _ = self.child.kill();
    }

    fn wait_exit(&mut self, deadline: Instant) -> bool {
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(_) => return false,
            }
        }
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        // A worker that survived shutdown must not outlive the run.
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
