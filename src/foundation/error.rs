pub type FrameforgeResult<T> = Result<T, FrameforgeError>;

/// Crate-wide error type for run-level failures.
///
/// Per-task render failures are *data*, not control flow, and use
/// [`RenderFailure`] instead; only run-level conditions surface as this type.
#[derive(thiserror::Error, Debug)]
pub enum FrameforgeError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("generator error: {0}")]
    Generator(String),

    #[error("pool error: {0}")]
    Pool(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FrameforgeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn generator(msg: impl Into<String>) -> Self {
        Self::Generator(msg.into())
    }

    pub fn pool(msg: impl Into<String>) -> Self {
        Self::Pool(msg.into())
    }

    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }
}

/// Three-tier classification of a failed render attempt.
///
/// The class decides the manager's reaction: `Transient` is retried up to the
/// configured bound, `FrameFatal` skips the task immediately, `WorkerFatal`
/// retires the executing worker and counts toward the circuit breaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Transient,
    FrameFatal,
    WorkerFatal,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureClass::Transient => "transient",
            FailureClass::FrameFatal => "frame_fatal",
            FailureClass::WorkerFatal => "worker_fatal",
        };
        f.write_str(s)
    }
}

/// Classified outcome of one failed render attempt.
///
/// Crosses the worker wire, so it is plain serializable data.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RenderFailure {
    pub class: FailureClass,
    pub message: String,
}

impl RenderFailure {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            message: msg.into(),
        }
    }

    pub fn frame_fatal(msg: impl Into<String>) -> Self {
        Self {
            class: FailureClass::FrameFatal,
            message: msg.into(),
        }
    }

    pub fn worker_fatal(msg: impl Into<String>) -> Self {
        Self {
            class: FailureClass::WorkerFatal,
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for RenderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}
