use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::RenderConfig;
use crate::foundation::error::{FailureClass, RenderFailure};
use crate::render::{ArtifactHandle, FrameRenderer};
use crate::spec::TaskEnvelope;

/// Scripted per-index faults, serializable so integration tests can inject
/// failures across a real process boundary via the worker `Init` message.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct FaultPlan {
    pub rules: Vec<FaultRule>,
}

impl FaultPlan {
    pub fn rule_for(&self, index: u64, attempt: u32) -> Option<&FaultRule> {
        self.rules
            .iter()
            .find(|r| r.index == index && attempt <= r.first_attempts)
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct FaultRule {
    /// Sequence index the rule applies to.
    pub index: u64,
    /// The rule fires on attempts `1..=first_attempts`; later attempts pass
    /// through. Defaults to every attempt.
    #[serde(default = "always")]
    pub first_attempts: u32,
    pub action: FaultAction,
}

fn always() -> u32 {
    u32::MAX
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultAction {
    /// Return a classified failure without rendering.
    Fail { class: FailureClass },
    /// Kill the worker outright (process backend) or report `worker_fatal`
    /// (thread backend, where aborting would take the host down too).
    Crash,
    /// Sleep before delegating to the wrapped renderer.
    Delay { ms: u64 },
}

/// Wraps any renderer with a [`FaultPlan`]. Mirrors the fault-injection hooks
/// the production system exposes for soak testing.
pub struct ScriptedRenderer {
    inner: Arc<dyn FrameRenderer>,
    plan: FaultPlan,
    hard_crash: bool,
}

impl ScriptedRenderer {
    /// Crash rules report `worker_fatal` instead of aborting. For in-process
    /// backends and unit tests.
    pub fn new(inner: Arc<dyn FrameRenderer>, plan: FaultPlan) -> Self {
        Self {
            inner,
            plan,
            hard_crash: false,
        }
    }

    /// Crash rules abort the process. Only valid inside a worker process.
    pub fn hard_crashing(inner: Arc<dyn FrameRenderer>, plan: FaultPlan) -> Self {
        Self {
            inner,
            plan,
            hard_crash: true,
        }
    }
}

impl FrameRenderer for ScriptedRenderer {
    fn render(
        &self,
        task: &TaskEnvelope,
        config: &RenderConfig,
    ) -> Result<ArtifactHandle, RenderFailure> {
        match self.plan.rule_for(task.spec.index.0, task.attempt) {
            Some(FaultRule {
                action: FaultAction::Fail { class },
                ..
            }) => Err(RenderFailure {
                class: *class,
                message: format!(
                    "scripted {class} failure at index {} attempt {}",
                    task.spec.index, task.attempt
                ),
            }),
            Some(FaultRule {
                action: FaultAction::Crash,
                ..
            }) => {
                if self.hard_crash {
                    warn!(index = task.spec.index.0, "scripted crash, aborting worker");
                    std::process::abort();
                }
                Err(RenderFailure::worker_fatal(format!(
                    "scripted crash at index {}",
                    task.spec.index
                )))
            }
            Some(FaultRule {
                action: FaultAction::Delay { ms },
                ..
            }) => {
                std::thread::sleep(Duration::from_millis(*ms));
                self.inner.render(task, config)
            }
            None => self.inner.render(task, config),
        }
    }
}
