//! Source bin: a composite stage that hides source-format decoding.
//!
//! The bin wraps an auto-detecting decode stage behind a single output
//! [`GhostPad`] with no initial target. The decoder reports what it finds
//! as [`DecodeEvent`]s on a queue; the bin's transition function consumes
//! them one at a time:
//!
//! ```text
//! Empty --attach decoder--> Probing --video(memory:NVMM)--> Resolved
//!                              |
//!                              +--video(system memory) | eos | error--> Failed
//! ```
//!
//! Non-video announcements (audio, subtitles) are ignored while probing.
//! Anything announced after `Resolved` is ignored, so the first binding
//! always stands.

use crate::element::{GhostPad, PadTarget, Stage, StageKind};
use crate::format::{Caps, MediaCategory};
use crate::pipeline::StageId;
use std::collections::HashSet;
use std::fmt;

/// Name of the internal decode stage.
pub const DECODER_NAME: &str = "uri-decode-bin";

/// Name of the bin's ghost output pad.
pub const GHOST_PAD: &str = "src";

/// Diagnostic for a video pad that is not hardware-resident.
pub const NOT_ACCELERATED: &str = "decoder did not select accelerated path";

/// Source bin lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinState {
    /// No decoder attached.
    Empty,
    /// Decoder attached, waiting for a video pad.
    Probing,
    /// Ghost pad bound to a decoder output.
    Resolved,
    /// No usable pad will appear.
    Failed,
}

/// Element created inside the decode hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildInfo {
    /// Identity, unique for the lifetime of the run.
    pub id: u64,
    /// Element name, e.g. `decodebin0`, `source`.
    pub name: String,
    /// Elements already inside this one, if it is itself a bin.
    pub children: Vec<ChildInfo>,
}

impl ChildInfo {
    /// A leaf element.
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Add a nested child.
    pub fn with_child(mut self, child: ChildInfo) -> Self {
        self.children.push(child);
        self
    }

    /// Whether this element is a nested decode bin.
    pub fn is_decode_bin(&self) -> bool {
        self.name.contains("decodebin")
    }
}

/// Announcement from the internal decode hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeEvent {
    /// The decoder exposed an output pad with negotiated caps.
    PadAdded {
        /// Decoder pad name.
        pad: String,
        /// Negotiated caps.
        caps: Caps,
    },
    /// An element was added somewhere inside the hierarchy.
    ChildAdded(ChildInfo),
    /// The decoder ran out of data.
    Eos,
    /// The decoder failed.
    Error(String),
}

/// Result of feeding one [`DecodeEvent`] to a [`SourceBin`].
#[derive(Debug, Clone, PartialEq)]
pub enum BinTransition {
    /// The ghost pad now forwards to this target.
    Resolved(PadTarget),
    /// The bin can no longer produce video.
    Failed(String),
    /// Announcement was not video and was skipped.
    Ignored,
    /// Newly watched decode bins, in discovery order.
    Registered(Vec<String>),
    /// Stream ended after resolution.
    EndOfStream,
    /// Decoder error after resolution.
    StreamError(String),
    /// Nothing changed.
    Unchanged,
}

/// Handle the decode side uses to report announcements for one bin.
///
/// Cloneable and `Send`; events are queued and applied by the control path.
#[derive(Clone)]
pub struct DecodeEventSender {
    stage: StageId,
    sender: kanal::Sender<(StageId, DecodeEvent)>,
}

impl DecodeEventSender {
    pub(crate) fn new(stage: StageId, sender: kanal::Sender<(StageId, DecodeEvent)>) -> Self {
        Self { stage, sender }
    }

    /// Bin the events are for.
    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// Queue an event. Returns `false` once the graph is gone.
    pub fn send(&self, event: DecodeEvent) -> bool {
        self.sender.send((self.stage, event)).is_ok()
    }

    /// Announce a decoder output pad.
    pub fn pad_added(&self, pad: impl Into<String>, caps: Caps) -> bool {
        self.send(DecodeEvent::PadAdded {
            pad: pad.into(),
            caps,
        })
    }
}

impl fmt::Debug for DecodeEventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeEventSender")
            .field("stage", &self.stage)
            .finish()
    }
}

/// Composite source with dynamic output resolution.
pub struct SourceBin {
    index: u32,
    uri: String,
    state: BinState,
    ghost: GhostPad,
    decoder: Option<Stage>,
    watched: HashSet<u64>,
    watched_bins: Vec<String>,
    failure: Option<String>,
}

impl SourceBin {
    /// Create an empty bin named `source-bin-NN`.
    pub fn new(index: u32, uri: impl Into<String>) -> Self {
        Self {
            index,
            uri: uri.into(),
            state: BinState::Empty,
            ghost: GhostPad::new_no_target(GHOST_PAD),
            decoder: None,
            watched: HashSet::new(),
            watched_bins: Vec::new(),
            failure: None,
        }
    }

    /// Conventional name for the bin at `index`.
    pub fn bin_name(index: u32) -> String {
        format!("source-bin-{:02}", index)
    }

    /// Attach the internal decoder and start probing.
    ///
    /// Only the first decoder is kept.
    pub fn attach_decoder(&mut self, decoder: Stage) {
        if self.state != BinState::Empty {
            tracing::warn!(bin = %self.name(), "decoder already attached");
            return;
        }
        tracing::debug!(bin = %self.name(), uri = %self.uri, decoder = %decoder.name(), "probing");
        self.decoder = Some(decoder);
        self.state = BinState::Probing;
    }

    /// Builder form of [`attach_decoder`](Self::attach_decoder).
    pub fn with_decoder(mut self, decoder: Stage) -> Self {
        self.attach_decoder(decoder);
        self
    }

    /// Wrap the bin in a composite stage.
    pub fn into_stage(self) -> Stage {
        Stage::new(self.name(), StageKind::CompositeBin).with_bin(self)
    }

    /// Bin name.
    pub fn name(&self) -> String {
        Self::bin_name(self.index)
    }

    /// Source index in the batch.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Source locator.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Current state.
    pub fn state(&self) -> BinState {
        self.state
    }

    /// The ghost output pad.
    pub fn ghost_pad(&self) -> &GhostPad {
        &self.ghost
    }

    /// The internal decoder, once attached.
    pub fn decoder(&self) -> Option<&Stage> {
        self.decoder.as_ref()
    }

    pub(crate) fn decoder_mut(&mut self) -> Option<&mut Stage> {
        self.decoder.as_mut()
    }

    /// Why the bin failed.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Names of the nested decode bins being watched.
    pub fn watched_bins(&self) -> &[String] {
        &self.watched_bins
    }

    /// Apply one announcement.
    pub fn handle(&mut self, event: DecodeEvent) -> BinTransition {
        match event {
            DecodeEvent::PadAdded { pad, caps } => self.on_pad_added(pad, caps),
            DecodeEvent::ChildAdded(child) => self.on_child_added(child),
            DecodeEvent::Eos => match self.state {
                BinState::Probing => self.fail("end of stream before a video pad was announced"),
                BinState::Resolved => BinTransition::EndOfStream,
                _ => BinTransition::Unchanged,
            },
            DecodeEvent::Error(reason) => match self.state {
                BinState::Probing => self.fail(format!("decoder error while probing: {reason}")),
                BinState::Resolved => BinTransition::StreamError(reason),
                _ => BinTransition::Unchanged,
            },
        }
    }

    fn on_pad_added(&mut self, pad: String, caps: Caps) -> BinTransition {
        if self.state != BinState::Probing {
            tracing::debug!(bin = %self.name(), pad = %pad, caps = %caps, state = ?self.state, "late pad ignored");
            return BinTransition::Unchanged;
        }

        if caps.category() != MediaCategory::Video {
            tracing::debug!(bin = %self.name(), pad = %pad, caps = %caps, "non-video pad ignored");
            return BinTransition::Ignored;
        }

        if !caps.is_device_resident() {
            tracing::error!(bin = %self.name(), pad = %pad, caps = %caps, "{}", NOT_ACCELERATED);
            return self.fail(NOT_ACCELERATED);
        }

        let target = PadTarget {
            element: DECODER_NAME.to_string(),
            pad,
            caps,
        };
        if let Err(e) = self.ghost.set_target(target.clone()) {
            tracing::debug!(bin = %self.name(), error = %e, "binding kept");
            return BinTransition::Unchanged;
        }
        self.state = BinState::Resolved;
        tracing::info!(bin = %self.name(), pad = %target.pad, caps = %target.caps, "source resolved");
        BinTransition::Resolved(target)
    }

    /// Depth-first walk over the new subtree, watching each decode bin once.
    fn on_child_added(&mut self, child: ChildInfo) -> BinTransition {
        let mut registered = Vec::new();
        let mut stack = vec![child];

        while let Some(node) = stack.pop() {
            tracing::trace!(bin = %self.name(), child = %node.name, "child added");
            if node.is_decode_bin() && self.watched.insert(node.id) {
                self.watched_bins.push(node.name.clone());
                registered.push(node.name.clone());
            }
            // Reverse so siblings are visited in announcement order.
            stack.extend(node.children.into_iter().rev());
        }

        if registered.is_empty() {
            BinTransition::Unchanged
        } else {
            BinTransition::Registered(registered)
        }
    }

    fn fail(&mut self, reason: impl Into<String>) -> BinTransition {
        let reason = reason.into();
        self.state = BinState::Failed;
        self.failure = Some(reason.clone());
        BinTransition::Failed(reason)
    }
}

impl fmt::Debug for SourceBin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceBin")
            .field("name", &self.name())
            .field("uri", &self.uri)
            .field("state", &self.state)
            .field("ghost", &self.ghost)
            .finish()
    }
}
