//! Buffer probes: synchronous per-batch callbacks attached to pads.
//!
//! A probe runs on the data path for every [`FrameBatch`] crossing its pad,
//! before the batch continues downstream. Probes may rewrite annotation
//! fields but never reorder or remove frames.

mod annotate;
mod meta;

pub use annotate::{AnnotationProbe, LabelStyle, ProbeStats, TIMESTAMP_TARGET, format_capture_time};
pub use meta::{
    BoundingBox, ClassEntry, ClassTable, DetectionResult, FontParams, FrameBatch, FrameMeta,
    ObjectCounts, Rgba, TextParams,
};

use std::sync::Arc;

/// Disposition returned by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PadProbeReturn {
    /// Let the batch continue.
    #[default]
    Pass,
    /// Discard the batch.
    Drop,
    /// Report a data-path error.
    Error,
}

/// What a probe sees.
#[derive(Debug)]
pub struct ProbeInfo<'a> {
    /// Stage owning the pad.
    pub stage: &'a str,
    /// Pad name.
    pub pad: &'a str,
    /// The batch, mutable for annotation.
    pub batch: &'a mut FrameBatch,
}

/// A callback on a pad.
///
/// Implementations must be bounded-time and must not block: they run on
/// whichever worker thread is pushing data.
pub trait BufferProbe: Send + Sync {
    /// Observe and optionally mutate one batch.
    fn on_buffer(&self, info: &mut ProbeInfo<'_>) -> PadProbeReturn;
}

impl<F> BufferProbe for F
where
    F: Fn(&mut ProbeInfo<'_>) -> PadProbeReturn + Send + Sync,
{
    fn on_buffer(&self, info: &mut ProbeInfo<'_>) -> PadProbeReturn {
        self(info)
    }
}

/// Snapshot of the probes on one pad, detached from the graph.
///
/// Handed to data-path threads so they can run probes without touching
/// the graph itself.
#[derive(Clone, Default)]
pub struct ProbeChain {
    stage: String,
    pad: String,
    probes: Vec<Arc<dyn BufferProbe>>,
}

impl ProbeChain {
    pub(crate) fn new(stage: &str, pad: &str, probes: Vec<Arc<dyn BufferProbe>>) -> Self {
        Self {
            stage: stage.to_string(),
            pad: pad.to_string(),
            probes,
        }
    }

    /// Run every probe in attachment order.
    ///
    /// Stops at the first probe that does not return [`PadProbeReturn::Pass`].
    pub fn run(&self, batch: &mut FrameBatch) -> PadProbeReturn {
        let mut info = ProbeInfo {
            stage: &self.stage,
            pad: &self.pad,
            batch,
        };
        for probe in &self.probes {
            match probe.on_buffer(&mut info) {
                PadProbeReturn::Pass => {}
                other => return other,
            }
        }
        PadProbeReturn::Pass
    }

    /// Number of probes.
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    /// Whether no probe is attached.
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

impl std::fmt::Debug for ProbeChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeChain")
            .field("stage", &self.stage)
            .field("pad", &self.pad)
            .field("probes", &self.probes.len())
            .finish()
    }
}
