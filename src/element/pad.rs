//! Pad abstraction for stage inputs and outputs.
//!
//! Pads represent the connection points of stages. Each stage can have
//! multiple input and output pads; a pad carries at most one link and an
//! optional negotiated media type (absent until negotiation completes for
//! dynamic pads).

use crate::error::{Error, Result};
use crate::format::Caps;
use crate::pipeline::LinkId;
use crate::probe::BufferProbe;
use std::sync::{Arc, OnceLock};

/// Direction of a pad (input or output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadDirection {
    /// An input pad (receives buffers from upstream).
    Input,
    /// An output pad (sends buffers downstream).
    Output,
}

/// Whether a pad is always present or created dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadPresence {
    /// Pad is always present on the stage.
    Always,
    /// Pad exists but its media type is only known once data is inspected.
    Sometimes,
    /// Pad is created when requested (e.g. muxer `sink_%u`).
    Request,
}

/// Template for creating pads.
///
/// Pad templates define the characteristics of pads that a stage can have.
/// They are used during graph construction to validate connections.
#[derive(Debug, Clone)]
pub struct PadTemplate {
    /// Name pattern for this pad (e.g., "src", "sink", "sink_%u").
    pub name: String,
    /// Direction of this pad.
    pub direction: PadDirection,
    /// Whether this pad is always present or created on demand.
    pub presence: PadPresence,
    /// Media type accepted or produced. `None` means "decided at run time".
    pub caps: Option<Caps>,
}

impl PadTemplate {
    /// Create a new pad template.
    pub fn new(
        name: impl Into<String>,
        direction: PadDirection,
        presence: PadPresence,
        caps: Option<Caps>,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            presence,
            caps,
        }
    }

    /// Create a template for an always-present input pad.
    pub fn input(name: impl Into<String>, caps: Caps) -> Self {
        Self::new(name, PadDirection::Input, PadPresence::Always, Some(caps))
    }

    /// Create a template for an always-present output pad.
    pub fn output(name: impl Into<String>, caps: Caps) -> Self {
        Self::new(name, PadDirection::Output, PadPresence::Always, Some(caps))
    }

    /// Create a template for a sometimes-present output pad with no known type.
    pub fn sometimes_output(name: impl Into<String>) -> Self {
        Self::new(name, PadDirection::Output, PadPresence::Sometimes, None)
    }

    /// Create a template for request input pads (`sink_%u`).
    pub fn request_input(name: impl Into<String>, caps: Caps) -> Self {
        Self::new(name, PadDirection::Input, PadPresence::Request, Some(caps))
    }

    /// Whether a concrete pad name is an instance of this template.
    pub fn matches(&self, pad_name: &str) -> bool {
        match self.name.split_once('%') {
            Some((prefix, _)) => pad_name
                .strip_prefix(prefix)
                .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())),
            None => self.name == pad_name,
        }
    }
}

/// A pad instance on a stage.
pub struct Pad {
    name: String,
    direction: PadDirection,
    presence: PadPresence,
    caps: Option<Caps>,
    link: Option<LinkId>,
    probes: Vec<Arc<dyn BufferProbe>>,
}

impl Pad {
    /// Create a new pad with no known media type.
    pub fn new(name: impl Into<String>, direction: PadDirection) -> Self {
        Self {
            name: name.into(),
            direction,
            presence: PadPresence::Always,
            caps: None,
            link: None,
            probes: Vec::new(),
        }
    }

    /// Create a pad from a template.
    pub fn from_template(template: &PadTemplate, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: template.direction,
            presence: template.presence,
            caps: template.caps.clone(),
            link: None,
            probes: Vec::new(),
        }
    }

    /// Create a standard input pad named "sink" accepting anything.
    pub fn sink() -> Self {
        Self::new("sink", PadDirection::Input).with_caps(Caps::any())
    }

    /// Create a standard output pad named "src" producing anything.
    pub fn src() -> Self {
        Self::new("src", PadDirection::Output).with_caps(Caps::any())
    }

    /// Set the pad's media type.
    pub fn with_caps(mut self, caps: Caps) -> Self {
        self.caps = Some(caps);
        self
    }

    /// Get the pad's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the pad's direction.
    pub fn direction(&self) -> PadDirection {
        self.direction
    }

    /// How the pad came to exist.
    pub fn presence(&self) -> PadPresence {
        self.presence
    }

    /// Check if this is an input pad.
    pub fn is_input(&self) -> bool {
        self.direction == PadDirection::Input
    }

    /// Check if this is an output pad.
    pub fn is_output(&self) -> bool {
        self.direction == PadDirection::Output
    }

    /// Negotiated (or template) media type, if known.
    pub fn caps(&self) -> Option<&Caps> {
        self.caps.as_ref()
    }

    /// The link attached to this pad.
    pub fn link(&self) -> Option<LinkId> {
        self.link
    }

    /// Whether a link is attached.
    pub fn is_linked(&self) -> bool {
        self.link.is_some()
    }

    /// Probes attached to this pad, in attachment order.
    pub fn probes(&self) -> &[Arc<dyn BufferProbe>] {
        &self.probes
    }

    pub(crate) fn set_caps(&mut self, caps: Caps) {
        self.caps = Some(caps);
    }

    pub(crate) fn set_link(&mut self, link: LinkId) {
        self.link = Some(link);
    }

    pub(crate) fn add_probe(&mut self, probe: Arc<dyn BufferProbe>) {
        self.probes.push(probe);
    }
}

impl std::fmt::Debug for Pad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pad")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("caps", &self.caps.as_ref().map(|c| c.to_string()))
            .field("linked", &self.link.is_some())
            .field("probes", &self.probes.len())
            .finish()
    }
}

/// Internal pad a ghost pad forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadTarget {
    /// Internal element owning the target pad.
    pub element: String,
    /// Target pad name.
    pub pad: String,
    /// Media type announced on the target.
    pub caps: Caps,
}

/// Externally visible pad of a composite stage.
///
/// A ghost pad starts without a target; while inert, all downstream data is
/// blocked. The target may be set at most once. Concurrent callers race on
/// a single-assignment cell: the first caller wins and later calls are
/// no-ops that report [`Error::InvalidLink`].
#[derive(Debug)]
pub struct GhostPad {
    name: String,
    target: OnceLock<PadTarget>,
}

impl GhostPad {
    /// Create a ghost pad with no target.
    pub fn new_no_target(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: OnceLock::new(),
        }
    }

    /// Get the pad's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind the ghost pad. Fails if a target is already set.
    pub fn set_target(&self, target: PadTarget) -> Result<()> {
        self.target.set(target).map_err(|rejected| {
            Error::InvalidLink(format!(
                "ghost pad '{}' is already linked, ignoring {}",
                self.name, rejected.pad
            ))
        })
    }

    /// Current target, if bound.
    pub fn target(&self) -> Option<&PadTarget> {
        self.target.get()
    }

    /// Whether the pad still blocks all data.
    pub fn is_inert(&self) -> bool {
        self.target.get().is_none()
    }
}
