//! # vidgraph
//!
//! Media pipeline graphs for capture, inference and streaming.
//!
//! A [`PipelineGraph`](pipeline::PipelineGraph) owns named stages joined by
//! links whose media types are checked when both ends are known and
//! resolved later when a stage only learns its output type at runtime (a
//! [`SourceBin`](elements::SourceBin) wrapping an auto-detecting decoder).
//! A [`ControlLoop`](pipeline::ControlLoop) consumes the graph's control bus
//! and tears everything down on end of stream, a fatal error or an
//! interrupt. An [`AnnotationProbe`](probe::AnnotationProbe) labels detected
//! objects as batches cross the inference stage.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vidgraph::prelude::*;
//! use vidgraph::pipeline::scenarios::{self, RelayOptions};
//!
//! # async fn run() -> vidgraph::Result<()> {
//! let registry = StageRegistry::deepstream();
//! let options = RelayOptions {
//!     rtsp_url: "rtsp://camera.local:8554/stream".into(),
//!     rtmp_url: "rtmp://server.local/live/stream".into(),
//!     bitrate_kbps: None,
//!     width: None,
//!     height: None,
//! };
//! let scenario = scenarios::rtsp_to_rtmp(&registry, &PipelineConfig::default(), &options)?;
//!
//! let mut control = ControlLoop::new(scenario.graph)?;
//! control.graph_mut().request_state(StageState::Playing)?;
//! let outcome = control.run(std::future::pending()).await;
//! std::process::exit(outcome.exit_code());
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod element;
pub mod elements;
pub mod error;
pub mod format;
pub mod observability;
pub mod pipeline;
pub mod probe;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::PipelineConfig;
    pub use crate::element::{Stage, StageKind, StageState};
    pub use crate::error::{Error, Result};
    pub use crate::format::Caps;
    pub use crate::pipeline::{ControlLoop, LoopOutcome, PipelineGraph, StageId, StageRegistry};
    pub use crate::probe::{AnnotationProbe, BufferProbe, FrameBatch, PadProbeReturn};
}

pub use error::{Error, Result};
