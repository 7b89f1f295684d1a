// THEORY:
// This file is the main entry point for the `abyss_vision` library crate.
// It defines the public API handed to whatever host feeds the engine frames,
// be it a video decoder, a still-image sequencer or a test harness.
//
// The primary entry points are `EventPipeline` (synchronous, one frame at a
// time) and `ParallelPipeline` (async, with descriptor extraction on a worker
// pool). Both take frames plus the attention points and regions produced by an
// external segmenter, and turn them into tracked, classified events that the
// `reporting` module writes to disk.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod reporting;

pub use config::{DetectionParameters, KalmanParameters, TrackingMode};
pub use error::{EventError, Result};
pub use parallel_pipeline::ParallelPipeline;
pub use pipeline::{EventPipeline, FrameReport};
