//! Pipeline graph structure using daggy.

use super::events::{MessageReceiver, MessageSender, message_bus};
use super::factory::StageRegistry;
use super::parser::parse_pipeline;
use crate::element::{PadDirection, Selection, Stage, StageContext, StageState};
use crate::elements::{BinTransition, DecodeEvent, DecodeEventSender, GHOST_PAD};
use crate::error::{Error, Result};
use crate::format::Caps;
use crate::observability::span_stage;
use crate::probe::{BufferProbe, FrameBatch, PadProbeReturn, ProbeChain};
use daggy::petgraph::algo::toposort;
use daggy::{Dag, EdgeIndex, NodeIndex};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Unique identifier for a stage in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub(crate) NodeIndex);

impl StageId {
    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0.index()
    }
}

/// Unique identifier for a link in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub(crate) EdgeIndex);

impl LinkId {
    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0.index()
    }
}

/// A pad addressed by stage and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PadRef {
    /// Owning stage.
    pub stage: StageId,
    /// Pad name.
    pub pad: String,
}

impl PadRef {
    /// Address a pad.
    pub fn new(stage: StageId, pad: impl Into<String>) -> Self {
        Self {
            stage,
            pad: pad.into(),
        }
    }
}

/// A link between two pads.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    src_pad: String,
    sink_pad: String,
    dynamic: bool,
    resolved: bool,
    caps: Option<Caps>,
}

impl Link {
    fn resolved(src_pad: &str, sink_pad: &str, caps: Caps) -> Self {
        Self {
            src_pad: src_pad.to_string(),
            sink_pad: sink_pad.to_string(),
            dynamic: false,
            resolved: true,
            caps: Some(caps),
        }
    }

    fn pending(src_pad: &str, sink_pad: &str) -> Self {
        Self {
            src_pad: src_pad.to_string(),
            sink_pad: sink_pad.to_string(),
            dynamic: true,
            resolved: false,
            caps: None,
        }
    }

    /// Source pad name.
    pub fn src_pad(&self) -> &str {
        &self.src_pad
    }

    /// Sink pad name.
    pub fn sink_pad(&self) -> &str {
        &self.sink_pad
    }

    /// Whether the link was created before its media type was known.
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Whether both ends have agreed on a media type.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Media type carried once resolved.
    pub fn caps(&self) -> Option<&Caps> {
        self.caps.as_ref()
    }
}

/// Flattened link description.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkInfo {
    /// Link identifier.
    pub id: LinkId,
    /// Source as `stage.pad`.
    pub src: String,
    /// Sink as `stage.pad`.
    pub sink: String,
    /// Resolution flag.
    pub resolved: bool,
    /// Media type, once resolved.
    pub caps: Option<Caps>,
}

/// Result of a stage announcing a concrete output pad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PadAnnouncement {
    /// A pending dynamic link is now resolved.
    Linked(LinkId),
    /// The pad's link was already resolved; the announcement was ignored.
    AlreadyLinked,
    /// Downstream cannot accept the announced media type.
    Rejected(String),
    /// Nothing is linked to the pad yet.
    NoPendingLink,
}

type DecodeQueue = (
    kanal::Sender<(StageId, DecodeEvent)>,
    Option<kanal::Receiver<(StageId, DecodeEvent)>>,
);

/// A media graph owning its stages and links.
pub struct PipelineGraph {
    name: String,
    graph: Dag<Stage, Link>,
    stages_by_name: HashMap<String, StageId>,
    state: StageState,
    bus: MessageSender,
    bus_rx: Option<MessageReceiver>,
    decode: DecodeQueue,
    name_counter: u64,
}

impl PipelineGraph {
    /// Create an empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        let (bus, bus_rx) = message_bus();
        let (decode_tx, decode_rx) = kanal::unbounded();
        Self {
            name: name.into(),
            graph: Dag::new(),
            stages_by_name: HashMap::new(),
            state: StageState::Null,
            bus,
            bus_rx: Some(bus_rx),
            decode: (decode_tx, Some(decode_rx)),
            name_counter: 0,
        }
    }

    /// Build a graph from a launch description.
    pub fn from_description(registry: &StageRegistry, description: &str) -> Result<Self> {
        let mut graph = Self::new("pipeline");
        graph.extend_from_description(registry, description)?;
        Ok(graph)
    }

    /// Graph name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Aggregate lifecycle state.
    pub fn state(&self) -> StageState {
        self.state
    }

    /// Bus sender, for stages reporting from other threads.
    pub fn bus(&self) -> &MessageSender {
        &self.bus
    }

    /// Take the bus receiver. Only the first caller gets it.
    pub fn take_bus(&mut self) -> Option<MessageReceiver> {
        self.bus_rx.take()
    }

    /// Take the decode-announcement receiver. Only the first caller gets it.
    ///
    /// Until it is taken, [`drain_decode_events`](Self::drain_decode_events)
    /// applies queued announcements synchronously.
    pub fn take_decode_receiver(&mut self) -> Option<kanal::Receiver<(StageId, DecodeEvent)>> {
        self.decode.1.take()
    }

    /// Register a stage.
    pub fn add_stage(&mut self, stage: Stage) -> Result<StageId> {
        if self.stages_by_name.contains_key(stage.name()) {
            return Err(Error::DuplicateName(stage.name().to_string()));
        }
        let name = stage.name().to_string();
        let id = StageId(self.graph.add_node(stage));
        tracing::debug!(pipeline = %self.name, stage = %name, "stage added");
        self.stages_by_name.insert(name, id);
        Ok(id)
    }

    /// Stage by id.
    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.graph.node_weight(id.0)
    }

    /// Mutable stage by id.
    pub fn stage_mut(&mut self, id: StageId) -> Option<&mut Stage> {
        self.graph.node_weight_mut(id.0)
    }

    /// Stage id by name.
    pub fn stage_id(&self, name: &str) -> Option<StageId> {
        self.stages_by_name.get(name).copied()
    }

    /// Stage by name.
    pub fn stage_by_name(&self, name: &str) -> Option<&Stage> {
        self.stage_id(name).and_then(|id| self.stage(id))
    }

    /// Link by id.
    pub fn link_weight(&self, id: LinkId) -> Option<&Link> {
        self.graph.edge_weight(id.0)
    }

    /// Number of stages.
    pub fn stage_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of links.
    pub fn link_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Whether the graph has no stages.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Stages in insertion order.
    pub fn stages(&self) -> impl Iterator<Item = (StageId, &Stage)> {
        self.graph
            .graph()
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx).map(|s| (StageId(idx), s)))
    }

    /// Every link with endpoint names.
    pub fn links(&self) -> Vec<LinkInfo> {
        self.graph
            .graph()
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = self.graph.edge_endpoints(e)?;
                let link = self.graph.edge_weight(e)?;
                Some(LinkInfo {
                    id: LinkId(e),
                    src: format!("{}.{}", self.stage_name(StageId(a)), link.src_pad),
                    sink: format!("{}.{}", self.stage_name(StageId(b)), link.sink_pad),
                    resolved: link.resolved,
                    caps: link.caps.clone(),
                })
            })
            .collect()
    }

    /// Fallback decisions recorded at construction, as `(stage, selection)`.
    pub fn selections(&self) -> Vec<(&str, &Selection)> {
        self.stages()
            .filter_map(|(_, s)| s.selection().map(|sel| (s.name(), sel)))
            .collect()
    }

    /// Instantiate a request pad on a stage (e.g. `sink_0` on a muxer).
    pub fn request_pad(&mut self, stage: StageId, pad: &str) -> Result<()> {
        self.stage_mut(stage)
            .ok_or_else(|| Error::NotFound(format!("stage {}", stage.index())))?
            .request_pad(pad)
            .map(|_| ())
    }

    /// Link the first free output of `src` to the first free input of `sink`.
    pub fn link(&mut self, src: StageId, sink: StageId) -> Result<LinkId> {
        let src_pad = self
            .stage(src)
            .and_then(Stage::free_output)
            .ok_or_else(|| {
                Error::InvalidLink(format!("'{}' has no free output pad", self.stage_name(src)))
            })?;
        let sink_pad = self
            .stage_mut(sink)
            .and_then(Stage::free_input)
            .ok_or_else(|| {
                Error::InvalidLink(format!("'{}' has no free input pad", self.stage_name(sink)))
            })?;
        self.connect(src, &src_pad, sink, &sink_pad)
    }

    /// Link a chain of stages in order.
    pub fn link_many(&mut self, stages: &[StageId]) -> Result<Vec<LinkId>> {
        stages.windows(2).map(|w| self.link(w[0], w[1])).collect()
    }

    /// Connect two pads.
    ///
    /// If both pads have known media types the link is static and must be
    /// compatible. Otherwise the link is dynamic and stays unresolved until
    /// the upstream stage announces its pad via
    /// [`announce_pad`](Self::announce_pad). Missing pads matching a request
    /// template are instantiated.
    pub fn connect(
        &mut self,
        src: StageId,
        src_pad: &str,
        sink: StageId,
        sink_pad: &str,
    ) -> Result<LinkId> {
        if src == sink {
            return Err(Error::InvalidLink(format!(
                "cannot link '{}' to itself",
                self.stage_name(src)
            )));
        }

        self.ensure_pad(src, src_pad)?;
        self.ensure_pad(sink, sink_pad)?;
        let (src_label, src_caps) = self.link_end(src, src_pad, PadDirection::Output)?;
        let (sink_label, sink_caps) = self.link_end(sink, sink_pad, PadDirection::Input)?;

        let link = match (src_caps, sink_caps) {
            (Some(a), Some(b)) => {
                if !a.compatible(&b) {
                    return Err(Error::IncompatiblePad {
                        src: src_label,
                        sink: sink_label,
                        src_caps: a.to_string(),
                        sink_caps: b.to_string(),
                    });
                }
                Link::resolved(src_pad, sink_pad, negotiate(a, &b))
            }
            _ => Link::pending(src_pad, sink_pad),
        };
        let dynamic = link.dynamic;

        let edge = self.graph.add_edge(src.0, sink.0, link).map_err(|_| {
            Error::InvalidLink(format!(
                "linking {} -> {} would create a cycle",
                src_label, sink_label
            ))
        })?;
        let id = LinkId(edge);

        for (stage, pad) in [(src, src_pad), (sink, sink_pad)] {
            if let Some(pad) = self.stage_mut(stage).and_then(|s| s.pad_mut(pad)) {
                pad.set_link(id);
            }
        }

        tracing::debug!(
            pipeline = %self.name,
            src = %src_label,
            sink = %sink_label,
            dynamic,
            "linked"
        );
        Ok(id)
    }

    /// [`connect`](Self::connect) addressed by [`PadRef`]s.
    pub fn connect_pads(&mut self, src: &PadRef, sink: &PadRef) -> Result<LinkId> {
        self.connect(src.stage, &src.pad, sink.stage, &sink.pad)
    }

    /// A stage announces the concrete media type of one of its output pads.
    ///
    /// Resolves a pending dynamic link if downstream accepts the type;
    /// resolved links are left untouched.
    pub fn announce_pad(&mut self, stage: StageId, pad: &str, caps: Caps) -> Result<PadAnnouncement> {
        let stage_name = self.stage_name(stage);
        let src = self
            .stage_mut(stage)
            .and_then(|s| s.pad_mut(pad))
            .filter(|p| p.is_output())
            .ok_or_else(|| Error::NotFound(format!("output pad {}.{}", stage_name, pad)))?;

        let Some(link_id) = src.link() else {
            src.set_caps(caps);
            return Ok(PadAnnouncement::NoPendingLink);
        };

        let (sink, link) = match (
            self.graph.edge_endpoints(link_id.0),
            self.graph.edge_weight(link_id.0),
        ) {
            (Some((_, b)), Some(link)) => (StageId(b), link),
            _ => return Err(Error::NotFound(format!("link {}", link_id.index()))),
        };
        if link.resolved {
            return Ok(PadAnnouncement::AlreadyLinked);
        }

        let sink_pad = link.sink_pad.clone();
        let sink_caps = self
            .stage(sink)
            .and_then(|s| s.pad(&sink_pad))
            .and_then(|p| p.caps().cloned());

        if let Some(accepted) = sink_caps.as_ref().filter(|accepted| !caps.compatible(accepted)) {
            let reason = format!(
                "{}.{} announced {} but {}.{} accepts {}",
                stage_name,
                pad,
                caps,
                self.stage_name(sink),
                sink_pad,
                accepted
            );
            tracing::warn!(pipeline = %self.name, "{}", reason);
            return Ok(PadAnnouncement::Rejected(reason));
        }

        let negotiated = match sink_caps {
            Some(accepted) => negotiate(caps, &accepted),
            None => caps,
        };
        if let Some(link) = self.graph.edge_weight_mut(link_id.0) {
            link.resolved = true;
            link.caps = Some(negotiated.clone());
        }
        for (id, name) in [(stage, pad), (sink, sink_pad.as_str())] {
            if let Some(p) = self.stage_mut(id).and_then(|s| s.pad_mut(name)) {
                p.set_caps(negotiated.clone());
            }
        }

        tracing::info!(
            pipeline = %self.name,
            src = %format!("{}.{}", stage_name, pad),
            caps = %negotiated,
            "dynamic link resolved"
        );
        Ok(PadAnnouncement::Linked(link_id))
    }

    /// Handle for the decode side of a source bin.
    pub fn decode_sender(&self, stage: StageId) -> Result<DecodeEventSender> {
        match self.stage(stage) {
            Some(s) if s.source_bin().is_some() => {
                Ok(DecodeEventSender::new(stage, self.decode.0.clone()))
            }
            _ => Err(Error::NotFound(format!(
                "source bin {}",
                self.stage_name(stage)
            ))),
        }
    }

    /// Apply one decode announcement to a source bin.
    ///
    /// Resolution binds the bin's output link; failure, end of stream and
    /// stream errors are posted to the bus.
    pub fn dispatch_decode_event(&mut self, stage: StageId, event: DecodeEvent) -> Result<BinTransition> {
        let bin_name = self.stage_name(stage);
        let transition = self
            .stage_mut(stage)
            .and_then(Stage::source_bin_mut)
            .ok_or_else(|| Error::NotFound(format!("source bin {}", bin_name)))?
            .handle(event);

        match &transition {
            BinTransition::Resolved(target) => {
                match self.announce_pad(stage, GHOST_PAD, target.caps.clone())? {
                    PadAnnouncement::Rejected(reason) => {
                        let err = Error::negotiation(&bin_name, reason);
                        self.bus.post_error(&bin_name, err.to_string(), true);
                    }
                    PadAnnouncement::NoPendingLink => {
                        tracing::warn!(bin = %bin_name, "source resolved with nothing linked downstream");
                    }
                    PadAnnouncement::Linked(_) | PadAnnouncement::AlreadyLinked => {}
                }
            }
            BinTransition::Failed(reason) => {
                let err = Error::negotiation(&bin_name, reason.clone());
                tracing::error!(bin = %bin_name, error = %err, "source bin failed");
                self.bus.post_error(&bin_name, err.to_string(), true);
            }
            BinTransition::EndOfStream => self.bus.post_eos(&bin_name),
            BinTransition::StreamError(reason) => {
                let err = Error::Runtime {
                    stage: bin_name.clone(),
                    reason: reason.clone(),
                };
                self.bus.post_error(&bin_name, err.to_string(), true);
            }
            BinTransition::Registered(bins) => {
                tracing::debug!(bin = %bin_name, watched = ?bins, "watching nested decode bins");
            }
            BinTransition::Ignored | BinTransition::Unchanged => {}
        }
        Ok(transition)
    }

    /// Apply every queued decode announcement. Returns how many were applied.
    ///
    /// An announcement that cannot be dispatched is logged and dropped; the
    /// rest of the queue is still applied. Does nothing once the receiver
    /// has been taken.
    pub fn drain_decode_events(&mut self) -> usize {
        let mut pending = Vec::new();
        if let Some(rx) = &self.decode.1 {
            while let Ok(Some(item)) = rx.try_recv() {
                pending.push(item);
            }
        }

        let mut applied = 0;
        for (stage, event) in pending {
            match self.dispatch_decode_event(stage, event) {
                Ok(_) => applied += 1,
                Err(e) => tracing::warn!(pipeline = %self.name, error = %e, "dropping decode announcement"),
            }
        }
        applied
    }

    /// Attach a probe to a pad.
    pub fn add_probe(&mut self, stage: StageId, pad: &str, probe: Arc<dyn BufferProbe>) -> Result<()> {
        let stage_name = self.stage_name(stage);
        let target = self
            .stage_mut(stage)
            .and_then(|s| s.pad_mut(pad))
            .ok_or_else(|| Error::NotFound(format!("pad {}.{}", stage_name, pad)))?;
        target.add_probe(probe);
        tracing::debug!(pipeline = %self.name, stage = %stage_name, pad, "probe attached");
        Ok(())
    }

    /// Snapshot of the probes on a pad for a data-path thread.
    pub fn probe_chain(&self, stage: StageId, pad: &str) -> Result<ProbeChain> {
        let s = self
            .stage(stage)
            .ok_or_else(|| Error::NotFound(format!("stage {}", stage.index())))?;
        let p = s
            .pad(pad)
            .ok_or_else(|| Error::NotFound(format!("pad {}.{}", s.name(), pad)))?;
        Ok(ProbeChain::new(s.name(), pad, p.probes().to_vec()))
    }

    /// Run a batch through the probes of a pad.
    pub fn push_batch(&self, stage: StageId, pad: &str, batch: &mut FrameBatch) -> Result<PadProbeReturn> {
        Ok(self.probe_chain(stage, pad)?.run(batch))
    }

    /// Drive every stage to `target` through adjacent steps.
    ///
    /// Each stage walks from its own state, so stages added late or left
    /// behind by a failed request are caught up. Downward steps run first
    /// and visit sources first; upward steps visit sinks first so
    /// downstream is ready before data arrives. If a stage fails, a fatal
    /// error is posted, the stage keeps its state and the request stops
    /// there. The aggregate state becomes `target` only once every stage
    /// has reached it.
    pub fn request_state(&mut self, target: StageState) -> Result<()> {
        let (lowest, highest) = self
            .stages()
            .map(|(_, s)| s.state())
            .fold((target, target), |(lo, hi), s| (lo.min(s), hi.max(s)));

        let steps = highest.path_to(target).into_iter().chain(lowest.path_to(target));
        for (from, to) in steps {
            self.step_stages(from, to)?;
            if self.state == from {
                self.state = to;
                self.bus.post_state_changed(&self.name, from, to);
                tracing::info!(pipeline = %self.name, from = %from, to = %to, "state changed");
            }
        }

        if self.state != target {
            let before = self.state;
            self.state = target;
            self.bus.post_state_changed(&self.name, before, target);
            tracing::info!(pipeline = %self.name, from = %before, to = %target, "state changed");
        }
        Ok(())
    }

    /// Move every stage currently in `from` one step to `to`.
    fn step_stages(&mut self, from: StageState, to: StageState) -> Result<()> {
        let mut order = self.source_first_order();
        if to > from {
            order.reverse();
        }

        for idx in order {
            let bus = self.bus.clone();
            let Some(stage) = self.graph.node_weight_mut(idx) else {
                continue;
            };
            if stage.state() != from {
                continue;
            }
            let _span = span_stage(&self.name, stage.name(), stage.factory()).entered();
            let ctx = StageContext::new(stage.name(), bus.clone());
            if let Err(e) = stage.change_state(to, &ctx) {
                tracing::error!(
                    pipeline = %self.name,
                    stage = %stage.name(),
                    from = %from,
                    to = %to,
                    error = %e,
                    "state change failed"
                );
                bus.post_error(stage.name(), e.to_string(), true);
                return Err(e);
            }
            bus.post_state_changed(stage.name(), from, to);
        }
        Ok(())
    }

    /// Force every stage to `null`, releasing what each acquired.
    ///
    /// Safe to call repeatedly and after a failed
    /// [`request_state`](Self::request_state); returns how many stages
    /// released something.
    pub fn teardown(&mut self) -> usize {
        let mut released = 0;
        for idx in self.source_first_order() {
            let bus = self.bus.clone();
            let Some(stage) = self.graph.node_weight_mut(idx) else {
                continue;
            };
            let before = stage.state();
            let ctx = StageContext::new(stage.name(), bus.clone());
            if stage.force_null(&ctx) {
                released += 1;
                bus.post_state_changed(stage.name(), before, StageState::Null);
            }
        }

        if self.state != StageState::Null || released > 0 {
            let before = self.state;
            self.state = StageState::Null;
            self.bus.post_state_changed(&self.name, before, StageState::Null);
            tracing::info!(pipeline = %self.name, released, "torn down");
        }
        released
    }

    /// Parse a launch description and append its stages as a linked chain.
    ///
    /// Every stage is constructed before any is added, so a missing factory
    /// or bad option leaves the graph untouched. A link failure removes the
    /// stages added by this call.
    pub fn extend_from_description(
        &mut self,
        registry: &StageRegistry,
        description: &str,
    ) -> Result<Vec<StageId>> {
        let parsed = parse_pipeline(description)?;

        let mut stages = Vec::with_capacity(parsed.elements.len());
        for element in &parsed.elements {
            let name = match element.stage_name() {
                Some(name) => name,
                None => self.auto_name(&element.name),
            };
            if self.stages_by_name.contains_key(&name) || stages.iter().any(|s: &Stage| s.name() == name) {
                return Err(Error::DuplicateName(name));
            }
            let mut stage = registry.make(&element.name, &name)?;
            for (key, value) in element.options() {
                stage.set_property(key, value.clone())?;
            }
            stages.push(stage);
        }

        let mut added = Vec::with_capacity(stages.len());
        for stage in stages {
            added.push(self.add_stage(stage)?);
        }

        if let Err(e) = self.link_many(&added) {
            self.rollback(&added);
            return Err(e);
        }
        Ok(added)
    }

    fn rollback(&mut self, added: &[StageId]) {
        // Newest first: removing the highest index never renumbers survivors.
        for id in added.iter().rev() {
            if let Some(stage) = self.graph.remove_node(id.0) {
                self.stages_by_name.remove(stage.name());
            }
        }
    }

    fn auto_name(&mut self, factory: &str) -> String {
        loop {
            let name = format!("{}{}", factory, self.name_counter);
            self.name_counter += 1;
            if !self.stages_by_name.contains_key(&name) {
                return name;
            }
        }
    }

    fn stage_name(&self, id: StageId) -> String {
        self.stage(id)
            .map(|s| s.name().to_string())
            .unwrap_or_else(|| format!("#{}", id.index()))
    }

    fn ensure_pad(&mut self, stage: StageId, pad: &str) -> Result<()> {
        let name = self.stage_name(stage);
        let s = self
            .stage_mut(stage)
            .ok_or_else(|| Error::InvalidLink(format!("unknown stage {}", name)))?;
        if s.pad(pad).is_none() {
            s.request_pad(pad)
                .map_err(|_| Error::InvalidLink(format!("stage '{}' has no pad '{}'", name, pad)))?;
        }
        Ok(())
    }

    fn link_end(&self, stage: StageId, pad: &str, direction: PadDirection) -> Result<(String, Option<Caps>)> {
        let s = self
            .stage(stage)
            .ok_or_else(|| Error::InvalidLink(format!("unknown stage {}", stage.index())))?;
        let label = format!("{}.{}", s.name(), pad);
        let p = s
            .pad(pad)
            .ok_or_else(|| Error::InvalidLink(format!("no pad {}", label)))?;
        if p.direction() != direction {
            return Err(Error::InvalidLink(format!("{} is not an {:?} pad", label, direction)));
        }
        if p.is_linked() {
            return Err(Error::InvalidLink(format!("{} is already linked", label)));
        }
        Ok((label, p.caps().cloned()))
    }

    fn source_first_order(&self) -> Vec<NodeIndex> {
        toposort(self.graph.graph(), None)
            .unwrap_or_else(|_| self.graph.graph().node_indices().collect())
    }
}

/// Refinement of two descriptors already checked compatible.
fn negotiate(a: Caps, b: &Caps) -> Caps {
    a.intersect(b).unwrap_or(a)
}

impl Default for PipelineGraph {
    fn default() -> Self {
        Self::new("pipeline")
    }
}

impl Drop for PipelineGraph {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("name", &self.name)
            .field("stages", &self.stage_count())
            .field("links", &self.link_count())
            .field("state", &self.state)
            .finish()
    }
}

impl fmt::Display for PipelineGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pipeline '{}' [{}]", self.name, self.state)?;
        for (_, stage) in self.stages() {
            write!(f, "  {} ({}, {})", stage.name(), stage.factory(), stage.kind())?;
            if let Some(sel) = stage.selection().filter(|sel| !sel.skipped().is_empty()) {
                write!(f, " fallback over {}", sel.skipped().join(", "))?;
            }
            writeln!(f)?;
        }
        for link in self.links() {
            let state = match (&link.caps, link.resolved) {
                (Some(caps), true) => caps.to_string(),
                _ => "pending".to_string(),
            };
            writeln!(f, "  {} -> {} [{}]", link.src, link.sink, state)?;
        }
        Ok(())
    }
}
