//! Worker-side loop. Runs inside the spawned `frameforge worker` process but
//! is generic over its transport so unit tests drive it through in-memory
//! pipes.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::foundation::error::{FrameforgeError, FrameforgeResult};
use crate::pool::protocol::{TaskOutcome, WorkerReply, WorkerRequest, decode_line, encode_line};
use crate::render::{ChartRenderer, FrameRenderer, ScriptedRenderer};

/// Read `Init`, answer `Ready`, then render `Task` lines until `Shutdown` or
/// EOF.
///
/// The renderer is rebuilt from the `Init` config alone; nothing survives
/// between invocations except the renderer value itself, which holds no
/// per-task state.
pub fn run_worker(input: impl BufRead, mut output: impl Write) -> FrameforgeResult<()> {
    let mut lines = input.lines();

    let first = lines
        .next()
        .ok_or_else(|| FrameforgeError::worker("stdin closed before init"))?
        .map_err(|e| FrameforgeError::worker(format!("read init line: {e}")))?;
    let (worker, config, renderer): (_, _, Arc<dyn FrameRenderer>) =
        match decode_line::<WorkerRequest>(&first)? {
            WorkerRequest::Init {
                worker,
                config,
                fault_plan,
            } => {
                config.validate()?;
                let base: Arc<dyn FrameRenderer> = Arc::new(ChartRenderer::new());
                let renderer: Arc<dyn FrameRenderer> = match fault_plan {
                    Some(plan) => Arc::new(ScriptedRenderer::hard_crashing(base, plan)),
                    None => base,
                };
                (worker, config, renderer)
            }
            other => {
                return Err(FrameforgeError::worker(format!(
                    "expected init as first message, got {other:?}"
                )));
            }
        };

    write_reply(
        &mut output,
        &WorkerReply::Ready {
            worker,
            pid: std::process::id(),
        },
    )?;
    info!(%worker, "worker ready");

    for line in lines {
        let line = line.map_err(|e| FrameforgeError::worker(format!("read task line: {e}")))?;
        if line.trim().is_empty() {
            continue;
        }
        match decode_line::<WorkerRequest>(&line)? {
            WorkerRequest::Task { envelope } => {
                let started = Instant::now();
                let outcome = match renderer.render(&envelope, &config) {
                    Ok(artifact) => TaskOutcome::Rendered(artifact),
                    Err(failure) => TaskOutcome::Failed(failure),
                };
                debug!(
                    %worker,
                    index = envelope.spec.index.0,
                    attempt = envelope.attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "task finished"
                );
                write_reply(
                    &mut output,
                    &WorkerReply::Done {
                        index: envelope.spec.index,
                        attempt: envelope.attempt,
                        outcome,
                    },
                )?;
            }
            WorkerRequest::Shutdown => {
                info!(%worker, "worker shutting down");
                break;
            }
            WorkerRequest::Init { .. } => {
                return Err(FrameforgeError::worker("duplicate init message"));
            }
        }
    }

    Ok(())
}

fn write_reply(output: &mut impl Write, reply: &WorkerReply) -> FrameforgeResult<()> {
    let line = encode_line(reply)?;
    output
        .write_all(line.as_bytes())
        .and_then(|_| output.flush())
        .map_err(|e| FrameforgeError::worker(format!("write reply: {e}")))
}
