//! Stages: named, typed processing units owned by a graph.

use super::{
    NullBackend, Pad, PadDirection, PadPresence, PadTemplate, StageBackend, StageConfig,
    StageContext, StageState,
};
use crate::elements::SourceBin;
use crate::error::{Error, Result};
use crate::format::Caps;
use crate::pipeline::parser::PropertyValue;
use std::fmt;

/// Kind of processing a stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Capture device or network receiver.
    Source,
    /// Container/codec decoder.
    Decoder,
    /// Colour/memory converter, parser or caps filter.
    Converter,
    /// Inference engine producing detection metadata.
    Inference,
    /// On-screen display rendering overlays.
    OverlayRender,
    /// Video encoder.
    Encoder,
    /// Stream batcher or container muxer.
    Muxer,
    /// Network, file or display output.
    Sink,
    /// Composite stage hiding an internal sub-graph.
    CompositeBin,
}

impl StageKind {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Source => "source",
            StageKind::Decoder => "decoder",
            StageKind::Converter => "converter",
            StageKind::Inference => "inference",
            StageKind::OverlayRender => "overlay-render",
            StageKind::Encoder => "encoder",
            StageKind::Muxer => "muxer",
            StageKind::Sink => "sink",
            StageKind::CompositeBin => "composite-bin",
        }
    }

    /// Pad layout used when no factory templates are given.
    pub fn default_templates(self) -> Vec<PadTemplate> {
        match self {
            StageKind::Source => vec![PadTemplate::output("src", Caps::any())],
            StageKind::Sink => vec![PadTemplate::input("sink", Caps::any())],
            StageKind::CompositeBin => vec![PadTemplate::sometimes_output("src")],
            _ => vec![
                PadTemplate::input("sink", Caps::any()),
                PadTemplate::output("src", Caps::any()),
            ],
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an ordered capability negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Factory that was adopted.
    pub chosen: String,
    /// Every candidate, in priority order.
    pub candidates: Vec<String>,
}

impl Selection {
    /// Candidates tried and rejected before the chosen one.
    pub fn skipped(&self) -> &[String] {
        let idx = self
            .candidates
            .iter()
            .position(|c| *c == self.chosen)
            .unwrap_or(0);
        &self.candidates[..idx]
    }
}

/// A processing stage.
pub struct Stage {
    name: String,
    factory: String,
    kind: StageKind,
    config: StageConfig,
    state: StageState,
    inputs: Vec<Pad>,
    outputs: Vec<Pad>,
    request_templates: Vec<PadTemplate>,
    backend: Box<dyn StageBackend>,
    bin: Option<Box<SourceBin>>,
    selection: Option<Selection>,
}

impl Stage {
    /// Create a stage with the kind's default pads and a no-op backend.
    pub fn new(name: impl Into<String>, kind: StageKind) -> Self {
        Self::from_templates(name, kind.as_str(), kind, &kind.default_templates())
    }

    /// Create a stage from factory pad templates.
    ///
    /// `Always` and `Sometimes` templates become pads immediately; `Request`
    /// templates are kept for [`request_pad`](Self::request_pad).
    pub fn from_templates(
        name: impl Into<String>,
        factory: impl Into<String>,
        kind: StageKind,
        templates: &[PadTemplate],
    ) -> Self {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut request_templates = Vec::new();

        for template in templates {
            if template.presence == PadPresence::Request {
                request_templates.push(template.clone());
                continue;
            }
            let pad = Pad::from_template(template, template.name.clone());
            match template.direction {
                PadDirection::Input => inputs.push(pad),
                PadDirection::Output => outputs.push(pad),
            }
        }

        Self {
            name: name.into(),
            factory: factory.into(),
            kind,
            config: StageConfig::new(kind),
            state: StageState::Null,
            inputs,
            outputs,
            request_templates,
            backend: Box::new(NullBackend),
            bin: None,
            selection: None,
        }
    }

    /// Replace the backend.
    pub fn with_backend(mut self, backend: Box<dyn StageBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Set a configuration option (builder form).
    pub fn with_property(mut self, key: &str, value: impl Into<PropertyValue>) -> Result<Self> {
        self.set_property(key, value)?;
        Ok(self)
    }

    pub(crate) fn with_bin(mut self, bin: SourceBin) -> Self {
        self.bin = Some(Box::new(bin));
        self
    }

    pub(crate) fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Unique name within the graph.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Factory the stage was made from.
    pub fn factory(&self) -> &str {
        &self.factory
    }

    /// Stage kind.
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StageState {
        self.state
    }

    /// Configuration.
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Set a configuration option, validated against the kind's schema.
    ///
    /// A `caps` option also constrains every pad of the stage.
    pub fn set_property(&mut self, key: &str, value: impl Into<PropertyValue>) -> Result<()> {
        let value = value.into();
        let caps = (key == "caps")
            .then(|| value.as_string().parse::<Caps>().ok())
            .flatten();
        self.config
            .set(key, value)
            .map_err(|e| Error::construction(&self.name, e.to_string()))?;
        if let Some(caps) = caps {
            for pad in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
                pad.set_caps(caps.clone());
            }
        }
        Ok(())
    }

    /// Ordered input pads.
    pub fn input_pads(&self) -> &[Pad] {
        &self.inputs
    }

    /// Ordered output pads.
    pub fn output_pads(&self) -> &[Pad] {
        &self.outputs
    }

    /// Find a pad by name in either direction.
    pub fn pad(&self, name: &str) -> Option<&Pad> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .find(|p| p.name() == name)
    }

    pub(crate) fn pad_mut(&mut self, name: &str) -> Option<&mut Pad> {
        self.inputs
            .iter_mut()
            .chain(self.outputs.iter_mut())
            .find(|p| p.name() == name)
    }

    /// Instantiate a pad from a request template (e.g. `sink_0` from `sink_%u`).
    ///
    /// Requesting an existing pad returns it unchanged.
    pub fn request_pad(&mut self, name: &str) -> Result<&Pad> {
        if self.pad(name).is_none() {
            let template = self
                .request_templates
                .iter()
                .find(|t| t.matches(name))
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "stage '{}' has no request template for pad '{}'",
                        self.name, name
                    ))
                })?;
            let pad = Pad::from_template(template, name);
            match pad.direction() {
                PadDirection::Input => self.inputs.push(pad),
                PadDirection::Output => self.outputs.push(pad),
            }
        }
        self.pad(name)
            .ok_or_else(|| Error::NotFound(format!("{}.{}", self.name, name)))
    }

    /// First unlinked output pad.
    pub(crate) fn free_output(&self) -> Option<String> {
        self.outputs
            .iter()
            .find(|p| !p.is_linked())
            .map(|p| p.name().to_string())
    }

    /// First unlinked input pad, requesting a new one if every pad is taken.
    pub(crate) fn free_input(&mut self) -> Option<String> {
        if let Some(pad) = self.inputs.iter().find(|p| !p.is_linked()) {
            return Some(pad.name().to_string());
        }
        let pattern = self
            .request_templates
            .iter()
            .find(|t| t.direction == PadDirection::Input && t.name.contains("%u"))?
            .name
            .clone();
        let name = (0u32..)
            .map(|i| pattern.replace("%u", &i.to_string()))
            .find(|n| self.pad(n).is_none())?;
        self.request_pad(&name).ok().map(|p| p.name().to_string())
    }

    /// The source bin, if this stage is composite.
    pub fn source_bin(&self) -> Option<&SourceBin> {
        self.bin.as_deref()
    }

    pub(crate) fn source_bin_mut(&mut self) -> Option<&mut SourceBin> {
        self.bin.as_deref_mut()
    }

    /// Fallback selection recorded at construction.
    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// Perform one adjacent transition, running the matching backend hook.
    ///
    /// Internal decode stages of a composite follow the composite.
    pub(crate) fn change_state(&mut self, to: StageState, ctx: &StageContext) -> Result<()> {
        let from = self.state;
        if from == to {
            return Ok(());
        }
        if !from.is_adjacent(to) {
            return Err(self.state_error(to, "transition skips a state"));
        }

        if let Some(decoder) = self.bin.as_deref_mut().and_then(SourceBin::decoder_mut) {
            decoder.change_state(to, ctx)?;
        }

        let hook = match (from, to) {
            (StageState::Null, StageState::Ready) => self.backend.acquire(&self.config, ctx),
            (StageState::Paused, StageState::Playing) => self.backend.start(ctx),
            (StageState::Playing, StageState::Paused) => self.backend.pause(ctx),
            (StageState::Ready, StageState::Null) => {
                self.backend.release(ctx);
                Ok(())
            }
            _ => Ok(()),
        };

        match hook {
            Ok(()) => {
                self.state = to;
                Ok(())
            }
            Err(e) => Err(self.state_error(to, e.to_string())),
        }
    }

    /// Walk down to `null` regardless of hook failures.
    ///
    /// Returns `true` if the stage was holding any state.
    pub(crate) fn force_null(&mut self, ctx: &StageContext) -> bool {
        let changed = self.state != StageState::Null;
        if let Some(decoder) = self.bin.as_deref_mut().and_then(SourceBin::decoder_mut) {
            decoder.force_null(ctx);
        }
        while let Some(next) = self.state.next_toward(StageState::Null) {
            match (self.state, next) {
                (StageState::Playing, StageState::Paused) => {
                    if let Err(e) = self.backend.pause(ctx) {
                        tracing::warn!(stage = %self.name, error = %e, "pause failed during teardown");
                    }
                }
                (StageState::Ready, StageState::Null) => self.backend.release(ctx),
                _ => {}
            }
            self.state = next;
        }
        changed
    }

    fn state_error(&self, to: StageState, reason: impl Into<String>) -> Error {
        Error::StateChange {
            stage: self.name.clone(),
            from: self.state,
            to,
            reason: reason.into(),
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("factory", &self.factory)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}
