use std::path::PathBuf;

use crate::config::RenderConfig;
use crate::foundation::error::RenderFailure;
use crate::spec::TaskEnvelope;

pub mod chart;
pub mod paths;
pub mod scripted;

pub use chart::ChartRenderer;
pub use scripted::{FaultAction, FaultPlan, FaultRule, ScriptedRenderer};

/// Output reference for one successfully rendered artifact.
///
/// Ownership moves to the reassembler once the manager records completion.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ArtifactHandle {
    pub path: PathBuf,
    pub bytes: u64,
    pub render_ms: u64,
}

/// Pure per-task render function, safe to run inside an isolated worker.
///
/// Contract: no shared mutable state between invocations, everything needed
/// arrives in the envelope or the read-only config, exactly one artifact file
/// is written at the deterministic path for the task's index, and every
/// acquired resource is released on every exit path. Failures come back
/// classified, never as panics.
pub trait FrameRenderer: Send + Sync {
    fn render(
        &self,
        task: &TaskEnvelope,
        config: &RenderConfig,
    ) -> Result<ArtifactHandle, RenderFailure>;
}
