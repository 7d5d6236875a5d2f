//! `pointreach-runtime` – the pixel-to-base-frame transform pipeline.
//!
//! # Modules
//!
//! - [`intake`] – [`RequestSlot`] and [`RequestIntake`]: validate inbound
//!   pixel messages and latch the newest one (last-write-wins).
//! - [`buffer`] – [`DepthBuffer`]: the most recent synchronised RGB-D frame.
//! - [`resolver`] – [`TransformResolver`]: live camera → base lookups that
//!   reject non-rigid transforms.
//! - [`pipeline`] – [`TransformPipeline`]: the Idle → Pending → Idle state
//!   machine run once per tick.
//! - [`runner`] – [`PipelineHandle`]: fixed-period ticking with graceful
//!   stop.
//! - [`telemetry`] – [`init_tracing`]: `tracing` subscriber with optional
//!   OTLP export.

pub mod buffer;
pub mod intake;
pub mod pipeline;
pub mod resolver;
pub mod runner;
pub mod telemetry;

pub use buffer::DepthBuffer;
pub use intake::{RequestIntake, RequestSlot, parse_request};
pub use pipeline::{
    DEFAULT_PERIOD, PipelineConfig, PipelineState, PipelineStats, TickOutcome, TransformPipeline,
};
pub use resolver::TransformResolver;
pub use runner::PipelineHandle;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
