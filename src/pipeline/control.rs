//! Control loop: the single consumer of the control bus.
//!
//! The loop suspends until a bus message, a queued decode announcement or
//! the interrupt future is ready. Terminal conditions (end of stream, fatal
//! error, interrupt) all take the same teardown path and end the loop; only
//! the reported reason and severity differ.

use super::events::{ControlMessage, MessageReceiver};
use super::graph::{PipelineGraph, StageId};
use crate::element::StageState;
use crate::elements::DecodeEvent;
use crate::error::{Error, Result};
use crate::observability::span_pipeline;
use std::fmt;
use std::future::Future;
use tracing::Instrument;

/// Why the loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// End of stream.
    Eos,
    /// Fatal error with its diagnostic.
    Error(String),
    /// External interrupt.
    Interrupted,
}

/// Reporting severity of a loop outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Normal completion.
    Info,
    /// Stopped on request.
    Warning,
    /// Failed.
    Error,
}

/// Result of running the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Why the loop ended.
    pub reason: ExitReason,
    /// Severity for reporting.
    pub severity: Severity,
    /// Stage that triggered the end, if any.
    pub source: Option<String>,
}

impl LoopOutcome {
    fn eos(source: String) -> Self {
        Self {
            reason: ExitReason::Eos,
            severity: Severity::Info,
            source: Some(source),
        }
    }

    fn error(source: Option<String>, description: String) -> Self {
        Self {
            reason: ExitReason::Error(description),
            severity: Severity::Error,
            source,
        }
    }

    fn interrupted() -> Self {
        Self {
            reason: ExitReason::Interrupted,
            severity: Severity::Warning,
            source: None,
        }
    }

    /// Process exit status: 0 for end of stream and interrupts, 1 for errors.
    pub fn exit_code(&self) -> i32 {
        match self.reason {
            ExitReason::Error(_) => 1,
            ExitReason::Eos | ExitReason::Interrupted => 0,
        }
    }
}

impl fmt::Display for LoopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.reason, &self.source) {
            (ExitReason::Eos, Some(source)) => write!(f, "end of stream from {}", source),
            (ExitReason::Eos, None) => write!(f, "end of stream"),
            (ExitReason::Error(e), Some(source)) => write!(f, "error from {}: {}", source, e),
            (ExitReason::Error(e), None) => write!(f, "error: {}", e),
            (ExitReason::Interrupted, _) => write!(f, "interrupted"),
        }
    }
}

enum Wake {
    Interrupt,
    Message(ControlMessage),
    BusClosed,
    Decode(StageId, DecodeEvent),
    DecodeClosed,
}

/// Supervises a graph from its control bus.
pub struct ControlLoop {
    graph: PipelineGraph,
    bus: MessageReceiver,
    decode: Option<kanal::AsyncReceiver<(StageId, DecodeEvent)>>,
}

impl ControlLoop {
    /// Take ownership of a graph and its bus.
    ///
    /// Fails if the bus receiver was already taken.
    pub fn new(mut graph: PipelineGraph) -> Result<Self> {
        let bus = graph
            .take_bus()
            .ok_or_else(|| Error::NotFound(format!("control bus of '{}' already taken", graph.name())))?;
        let decode = graph.take_decode_receiver().map(|rx| rx.to_async());
        Ok(Self { graph, bus, decode })
    }

    /// The supervised graph.
    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    /// Mutable access, e.g. to start the graph before [`run`](Self::run).
    pub fn graph_mut(&mut self) -> &mut PipelineGraph {
        &mut self.graph
    }

    /// Give the graph back.
    pub fn into_graph(self) -> PipelineGraph {
        self.graph
    }

    /// Run until end of stream, a fatal error or `interrupt` completes.
    pub async fn run<F>(&mut self, interrupt: F) -> LoopOutcome
    where
        F: Future<Output = ()>,
    {
        let span = span_pipeline(self.graph.name());
        self.supervise(interrupt).instrument(span).await
    }

    async fn supervise<F>(&mut self, interrupt: F) -> LoopOutcome
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(interrupt);
        tracing::debug!(pipeline = %self.graph.name(), "control loop started");

        loop {
            let wake = tokio::select! {
                biased;
                _ = &mut interrupt => Wake::Interrupt,
                message = self.bus.recv() => match message {
                    Some(message) => Wake::Message(message),
                    None => Wake::BusClosed,
                },
                event = next_decode(&self.decode) => match event {
                    Some((stage, event)) => Wake::Decode(stage, event),
                    None => Wake::DecodeClosed,
                },
            };

            match wake {
                Wake::Interrupt => {
                    tracing::warn!(pipeline = %self.graph.name(), "interrupted, shutting down");
                    self.shutdown();
                    return LoopOutcome::interrupted();
                }
                Wake::Message(message) => {
                    if let Some(outcome) = self.handle_message(message) {
                        return outcome;
                    }
                }
                Wake::BusClosed => {
                    self.shutdown();
                    return LoopOutcome::error(None, "control bus closed".to_string());
                }
                Wake::Decode(stage, event) => {
                    if let Err(e) = self.graph.dispatch_decode_event(stage, event) {
                        tracing::warn!(error = %e, "dropping decode announcement");
                    }
                }
                Wake::DecodeClosed => self.decode = None,
            }
        }
    }

    /// React to one bus message. Returns the outcome if the run is over.
    pub fn handle_message(&mut self, message: ControlMessage) -> Option<LoopOutcome> {
        match message {
            ControlMessage::StateChanged { source, from, to } => {
                tracing::debug!(stage = %source, from = %from, to = %to, "state changed");
                None
            }
            ControlMessage::Warning {
                source,
                description,
            } => {
                tracing::warn!(stage = %source, "{}", description);
                None
            }
            ControlMessage::Error {
                source,
                description,
                fatal: false,
            } => {
                tracing::warn!(stage = %source, "non-fatal error: {}", description);
                None
            }
            ControlMessage::Error {
                source,
                description,
                fatal: true,
            } => {
                tracing::error!(stage = %source, "{}", description);
                self.shutdown();
                Some(LoopOutcome::error(Some(source), description))
            }
            ControlMessage::Eos { source } => {
                tracing::info!(stage = %source, "end of stream");
                self.shutdown();
                Some(LoopOutcome::eos(source))
            }
        }
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.graph.request_state(StageState::Null) {
            tracing::warn!(error = %e, "orderly stop failed, forcing teardown");
        }
        self.graph.teardown();
    }
}

impl fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlLoop")
            .field("graph", &self.graph)
            .field("decode", &self.decode.is_some())
            .finish()
    }
}

async fn next_decode(
    rx: &Option<kanal::AsyncReceiver<(StageId, DecodeEvent)>>,
) -> Option<(StageId, DecodeEvent)> {
    match rx {
        Some(rx) => rx.recv().await.ok(),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Stage, StageKind};

    fn playing_graph() -> PipelineGraph {
        let mut graph = PipelineGraph::new("test");
        let a = graph.add_stage(Stage::new("src", StageKind::Source)).unwrap();
        let b = graph.add_stage(Stage::new("sink", StageKind::Sink)).unwrap();
        graph.link(a, b).unwrap();
        graph.request_state(StageState::Playing).unwrap();
        graph
    }

    #[test]
    fn test_bus_taken_twice() {
        let mut graph = PipelineGraph::new("test");
        graph.take_bus();
        assert!(ControlLoop::new(graph).is_err());
    }

    #[test]
    fn test_warning_keeps_running() {
        let mut control = ControlLoop::new(playing_graph()).unwrap();
        assert!(control.handle_message(ControlMessage::warning("sink", "slow")).is_none());
        assert!(control.handle_message(ControlMessage::error("sink", "hiccup", false)).is_none());
        assert_eq!(control.graph().state(), StageState::Playing);
    }

    #[test]
    fn test_eos_and_error_severity_differ() {
        let mut control = ControlLoop::new(playing_graph()).unwrap();
        let eos = control.handle_message(ControlMessage::eos("src")).unwrap();
        assert_eq!(eos.severity, Severity::Info);
        assert_eq!(eos.exit_code(), 0);
        assert_eq!(control.graph().state(), StageState::Null);

        let mut control = ControlLoop::new(playing_graph()).unwrap();
        let err = control
            .handle_message(ControlMessage::error("sink", "refused", true))
            .unwrap();
        assert_eq!(err.severity, Severity::Error);
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.to_string(), "error from sink: refused");
    }

    #[tokio::test]
    async fn test_interrupt_tears_down() {
        let mut control = ControlLoop::new(playing_graph()).unwrap();
        let outcome = control.run(async {}).await;
        assert_eq!(outcome.reason, ExitReason::Interrupted);
        assert_eq!(outcome.severity, Severity::Warning);
        assert_eq!(control.graph().stage_by_name("src").unwrap().state(), StageState::Null);
    }
}
