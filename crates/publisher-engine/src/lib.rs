//! Publishing pipeline for H.264 elementary streams.
//!
//! A producer thread reads raw Annex-B bytes from a [`ChunkSource`],
//! splits them into NAL units and pushes them into a bounded queue that
//! drops the oldest unit when full. The consumer, running on the caller's
//! thread, drains the queue, waits for the parameter sets, sends the
//! metadata and sequence header once, then forwards every coded unit to a
//! transport session.

mod config;
mod error;
mod metrics;
mod pipeline;
mod session;
mod source;
mod state;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{PublishReport, Publisher, StopHandle};
pub use session::PublisherSession;
pub use source::{ChunkSource, FileSource, PushHandle, PushSource};
pub use state::{PublisherState, StopReason};

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Interval between consumer status lines, in seconds.
pub const STATS_LOG_INTERVAL_SECS: u64 = 5;
