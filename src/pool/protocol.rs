//! Newline-delimited JSON protocol between the coordinator and a worker
//! process.
//!
//! The coordinator writes one [`WorkerRequest`] per line to the worker's
//! stdin; the worker answers with [`WorkerReply`] lines on stdout. Everything
//! the worker needs arrives in the `Init` and `Task` messages; nothing is
//! looked up from ambient state.

use crate::config::RenderConfig;
use crate::foundation::core::{FrameIndex, WorkerId};
use crate::foundation::error::{FrameforgeError, FrameforgeResult, RenderFailure};
use crate::render::{ArtifactHandle, FaultPlan};
use crate::spec::TaskEnvelope;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// First message after spawn. Carries the full read-only config and the
    /// optional scripted fault plan for tests.
    Init {
        worker: WorkerId,
        config: RenderConfig,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fault_plan: Option<FaultPlan>,
    },
    Task {
        envelope: TaskEnvelope,
    },
    Shutdown,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    /// Handshake answer to `Init`.
    Ready { worker: WorkerId, pid: u32 },
    /// One task attempt finished.
    Done {
        index: FrameIndex,
        attempt: u32,
        outcome: TaskOutcome,
    },
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Rendered(ArtifactHandle),
    Failed(RenderFailure),
}

pub fn encode_line<T: serde::Serialize>(msg: &T) -> FrameforgeResult<String> {
    let mut line = serde_json::to_string(msg)
        .map_err(|e| FrameforgeError::worker(format!("encode protocol message: {e}")))?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<T: serde::de::DeserializeOwned>(line: &str) -> FrameforgeResult<T> {
    serde_json::from_str(line.trim())
        .map_err(|e| FrameforgeError::worker(format!("malformed protocol line: {e}")))
}
