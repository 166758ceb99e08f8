//! frameforge: parallel frame-render orchestration.
//!
//! A [`TimelineSpecGenerator`] turns a timeline into a stream of per-frame
//! task specs in constant memory; a [`RenderPool`] schedules them onto
//! isolated workers (child processes in production, threads for embedders)
//! with backpressure, classified failure handling, retries, worker recycling
//! and a circuit breaker; [`assemble_video`] reassembles the completed
//! artifacts in order.
//!
//! ```no_run
//! use frameforge::{
//!     ChartRenderer, PoolOptions, RenderConfig, RenderPool, ThreadBackend, Timeline,
//!     TimelineSpecGenerator,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> frameforge::FrameforgeResult<()> {
//! let timeline = Timeline::synthetic(12, 8, 10);
//! let mut source = TimelineSpecGenerator::new(timeline, 10)?;
//! let config = RenderConfig::new("frames", 1280, 720);
//! let backend = ThreadBackend::new(Arc::new(ChartRenderer::new()), config);
//! let mut pool = RenderPool::new(Box::new(backend), PoolOptions::default())?;
//! let report = pool.run(&mut source)?;
//! println!("{:?}", report.outcome);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod assemble;
pub mod config;
pub mod foundation;
pub mod generator;
pub mod pool;
pub mod render;
pub mod spec;
pub mod timeline;

pub use assemble::{VideoCodec, VideoSettings, assemble_video, ffmpeg_available};
pub use config::{PoolOptions, RenderConfig};
pub use foundation::core::{CancelToken, FrameIndex, WorkerId, artifact_file_name, pad_width_for_total};
pub use foundation::error::{FailureClass, FrameforgeError, FrameforgeResult, RenderFailure};
pub use generator::{SequenceSource, SpecSource, TimelineSpecGenerator};
pub use pool::runtime::run_worker;
pub use pool::{
    FrameRecord, FrameStatus, PoolEvent, ProcessBackend, ProgressCallback, ProgressInfo,
    RenderPool, RunOutcome, RunReport, RunStats, TaskOutcome, ThreadBackend, WorkerBackend,
    WorkerHandle,
};
pub use render::{
    ArtifactHandle, ChartRenderer, FaultAction, FaultPlan, FaultRule, FrameRenderer,
    ScriptedRenderer,
};
pub use spec::{BarRow, ChartFrame, FramePayload, Highlight, TaskEnvelope, TaskSpec, TitleCard};
pub use timeline::{EntityDef, IntroCard, Timeline, TimelineStep};
