//! Graph construction and supervision.
//!
//! - [`PipelineGraph`]: stages, links and lifecycle
//! - [`StageRegistry`]: factories available in the environment
//! - [`ControlLoop`]: consumes the control bus until a terminal message
//! - [`scenarios`]: the standard capture and streaming graphs
//!
//! # Example
//!
//! ```rust,no_run
//! use vidgraph::element::StageState;
//! use vidgraph::pipeline::{ControlLoop, PipelineGraph, StageRegistry};
//!
//! # async fn run() -> vidgraph::Result<()> {
//! let registry = StageRegistry::deepstream();
//! let mut graph = PipelineGraph::from_description(
//!     &registry,
//!     "v4l2src device=/dev/video0 ! videoconvert ! autovideosink",
//! )?;
//! graph.request_state(StageState::Playing)?;
//!
//! let mut control = ControlLoop::new(graph)?;
//! let outcome = control.run(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await;
//! println!("{}", outcome);
//! # Ok(())
//! # }
//! ```

mod control;
mod events;
pub mod factory;
mod graph;
pub mod parser;
pub mod scenarios;

pub use control::{ControlLoop, ExitReason, LoopOutcome, Severity};
pub use events::{ControlMessage, MessageReceiver, MessageSender, message_bus};
pub use factory::{BackendConstructor, BitrateUnit, FactoryInfo, StageRegistry};
pub use graph::{Link, LinkId, LinkInfo, PadAnnouncement, PadRef, PipelineGraph, StageId};
pub use parser::{ParsedElement, ParsedPipeline, PropertyValue, parse_pipeline};
pub use scenarios::{
    Codec, InferenceEngine, RelayOptions, RtpPadOutcome, RtspAiOptions, Scenario, ScreenOptions,
    StreamOutput, UsbOptions,
};
