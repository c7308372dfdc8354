//! Stage registry: what the environment can instantiate.
//!
//! The registry maps factory names to a stage kind, pad templates and a
//! backend constructor. Missing factories are construction errors;
//! [`StageRegistry::make_first`] resolves an ordered fallback list once
//! and records which candidate won.

use crate::config::SourceConfig;
use crate::element::{NullBackend, PadTemplate, Selection, Stage, StageBackend, StageKind};
use crate::elements::{DECODER_NAME, SourceBin};
use crate::error::{Error, Result};
use crate::format::Caps;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Constructor for a stage backend.
pub type BackendConstructor = Arc<dyn Fn() -> Box<dyn StageBackend> + Send + Sync>;

/// Unit an encoder expects its `bitrate` option in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitrateUnit {
    /// Bits per second.
    BitsPerSecond,
    /// Kilobits per second.
    KilobitsPerSecond,
}

impl BitrateUnit {
    /// Convert a bit/s value into this unit.
    pub fn from_bps(self, bps: u64) -> u64 {
        match self {
            BitrateUnit::BitsPerSecond => bps,
            BitrateUnit::KilobitsPerSecond => bps / 1000,
        }
    }

    /// Convert a kbit/s value into this unit.
    pub fn from_kbps(self, kbps: u64) -> u64 {
        match self {
            BitrateUnit::BitsPerSecond => kbps.saturating_mul(1000),
            BitrateUnit::KilobitsPerSecond => kbps,
        }
    }
}

/// Everything needed to instantiate one factory.
#[derive(Clone)]
pub struct FactoryInfo {
    kind: StageKind,
    templates: Vec<PadTemplate>,
    bitrate_unit: Option<BitrateUnit>,
    backend: BackendConstructor,
}

impl FactoryInfo {
    /// Factory producing `kind` stages with the given pads and a no-op backend.
    pub fn new(kind: StageKind, templates: Vec<PadTemplate>) -> Self {
        Self {
            kind,
            templates,
            bitrate_unit: None,
            backend: Arc::new(|| -> Box<dyn StageBackend> { Box::new(NullBackend) }),
        }
    }

    /// Mark as an encoder taking bitrate in `unit`.
    pub fn with_bitrate_unit(mut self, unit: BitrateUnit) -> Self {
        self.bitrate_unit = Some(unit);
        self
    }

    /// Use a custom backend.
    pub fn with_backend<F>(mut self, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn StageBackend> + Send + Sync + 'static,
    {
        self.backend = Arc::new(constructor);
        self
    }

    /// Stage kind.
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Pad templates.
    pub fn templates(&self) -> &[PadTemplate] {
        &self.templates
    }

    /// Bitrate unit, for encoders.
    pub fn bitrate_unit(&self) -> Option<BitrateUnit> {
        self.bitrate_unit
    }
}

impl fmt::Debug for FactoryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryInfo")
            .field("kind", &self.kind)
            .field("templates", &self.templates.len())
            .field("bitrate_unit", &self.bitrate_unit)
            .finish()
    }
}

/// Registry of available stage factories.
#[derive(Debug, Clone, Default)]
pub struct StageRegistry {
    factories: HashMap<String, FactoryInfo>,
}

impl StageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the standard capture, inference, encode and output factories.
    pub fn deepstream() -> Self {
        let device = Caps::device_video;
        let raw = || Caps::new("video/x-raw");
        let h264 = || Caps::new("video/x-h264");
        let h265 = || Caps::new("video/x-h265");
        let flv = || Caps::new("video/x-flv");
        let rtp = || Caps::new("application/x-rtp");
        let mpeg4 = || Caps::new("video/mpeg").with_field("mpegversion", "4");
        let filter = |input: Caps, output: Caps| {
            vec![PadTemplate::input("sink", input), PadTemplate::output("src", output)]
        };

        let mut registry = Self::new();

        // Sources
        registry.register(
            "v4l2src",
            FactoryInfo::new(StageKind::Source, vec![PadTemplate::output("src", raw())]),
        );
        registry.register("uridecodebin", FactoryInfo::new(StageKind::Decoder, Vec::new()));
        // Streams appear as sometimes pads once the session is described.
        registry.register(
            "rtspsrc",
            FactoryInfo::new(StageKind::Source, vec![PadTemplate::sometimes_output("src")]),
        );

        // Depayload, parse, decode
        registry.register("rtpmp4vdepay", FactoryInfo::new(StageKind::Converter, filter(rtp(), mpeg4())));
        registry.register("mpeg4videoparse", FactoryInfo::new(StageKind::Converter, filter(mpeg4(), mpeg4())));
        registry.register("avdec_mpeg4", FactoryInfo::new(StageKind::Decoder, filter(mpeg4(), raw())));
        registry.register(
            "nvv4l2decoder",
            FactoryInfo::new(StageKind::Decoder, filter(Caps::any(), device())),
        );

        // Batching and inference
        registry.register(
            "nvstreammux",
            FactoryInfo::new(
                StageKind::Muxer,
                vec![
                    PadTemplate::request_input("sink_%u", device()),
                    PadTemplate::output("src", device()),
                ],
            ),
        );
        for name in ["nvinfer", "nvinferserver"] {
            registry.register(name, FactoryInfo::new(StageKind::Inference, filter(device(), device())));
        }
        registry.register(
            "nvdsosd",
            FactoryInfo::new(StageKind::OverlayRender, filter(device(), device())),
        );

        // Conversion
        registry.register("capsfilter", FactoryInfo::new(StageKind::Converter, filter(Caps::any(), Caps::any())));
        registry.register("queue", FactoryInfo::new(StageKind::Converter, filter(Caps::any(), Caps::any())));
        registry.register("videoconvert", FactoryInfo::new(StageKind::Converter, filter(raw(), raw())));
        // Moves frames between system and device memory in either direction.
        registry.register(
            "nvvideoconvert",
            FactoryInfo::new(StageKind::Converter, filter(Caps::any(), Caps::any())),
        );

        // Encoders
        registry.register(
            "nvv4l2h264enc",
            FactoryInfo::new(StageKind::Encoder, filter(device(), h264()))
                .with_bitrate_unit(BitrateUnit::BitsPerSecond),
        );
        registry.register(
            "nvv4l2h265enc",
            FactoryInfo::new(StageKind::Encoder, filter(device(), h265()))
                .with_bitrate_unit(BitrateUnit::BitsPerSecond),
        );
        registry.register(
            "nvh264enc",
            FactoryInfo::new(StageKind::Encoder, filter(raw(), h264()))
                .with_bitrate_unit(BitrateUnit::KilobitsPerSecond),
        );
        registry.register(
            "x264enc",
            FactoryInfo::new(StageKind::Encoder, filter(raw(), h264()))
                .with_bitrate_unit(BitrateUnit::KilobitsPerSecond),
        );

        // Parsers and muxers
        registry.register("h264parse", FactoryInfo::new(StageKind::Converter, filter(h264(), h264())));
        registry.register("h265parse", FactoryInfo::new(StageKind::Converter, filter(h265(), h265())));
        registry.register(
            "flvmux",
            FactoryInfo::new(
                StageKind::Muxer,
                vec![PadTemplate::input("video", h264()), PadTemplate::output("src", flv())],
            ),
        );

        // Outputs
        registry.register(
            "rtmpsink",
            FactoryInfo::new(StageKind::Sink, vec![PadTemplate::input("sink", flv())]),
        );
        registry.register(
            "rtspclientsink",
            FactoryInfo::new(StageKind::Sink, vec![PadTemplate::request_input("sink_%u", Caps::any())]),
        );
        registry.register(
            "autovideosink",
            FactoryInfo::new(StageKind::Sink, vec![PadTemplate::input("sink", raw())]),
        );
        registry.register(
            "fakesink",
            FactoryInfo::new(StageKind::Sink, vec![PadTemplate::input("sink", Caps::any())]),
        );

        registry
    }

    /// Register (or replace) a factory.
    pub fn register(&mut self, name: &str, info: FactoryInfo) {
        self.factories.insert(name.to_string(), info);
    }

    /// Remove a factory, as if the environment lacked its plugin.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.factories.remove(name).is_some()
    }

    /// Whether a factory is available.
    pub fn is_available(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Factory details.
    pub fn info(&self, name: &str) -> Option<&FactoryInfo> {
        self.factories.get(name)
    }

    /// Bitrate unit of an encoder factory.
    pub fn bitrate_unit(&self, name: &str) -> Option<BitrateUnit> {
        self.info(name).and_then(FactoryInfo::bitrate_unit)
    }

    /// Instantiate a stage.
    pub fn make(&self, factory: &str, name: &str) -> Result<Stage> {
        let info = self.factories.get(factory).ok_or_else(|| {
            Error::construction(name, format!("factory '{}' is not available", factory))
        })?;
        tracing::debug!(factory, stage = name, kind = %info.kind, "making stage");
        Ok(Stage::from_templates(name, factory, info.kind, &info.templates).with_backend((info.backend)()))
    }

    /// Instantiate the first available candidate, in priority order.
    ///
    /// The stage records the decision; it fails only if no candidate exists.
    pub fn make_first(&self, candidates: &[&str], name: &str) -> Result<Stage> {
        let chosen = candidates
            .iter()
            .find(|c| self.is_available(c))
            .ok_or_else(|| {
                Error::construction(
                    name,
                    format!("none of [{}] is available", candidates.join(", ")),
                )
            })?;

        for skipped in candidates.iter().take_while(|c| *c != chosen) {
            tracing::warn!(stage = name, candidate = %skipped, "candidate unavailable, falling back");
        }
        tracing::info!(stage = name, factory = %chosen, "selected");

        let selection = Selection {
            chosen: chosen.to_string(),
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
        };
        Ok(self.make(chosen, name)?.with_selection(selection))
    }

    /// Build a source bin around an auto-detecting decoder for `uri`.
    pub fn make_source_bin(&self, index: u32, uri: &str, config: &SourceConfig) -> Result<Stage> {
        let mut decoder = self.make("uridecodebin", DECODER_NAME)?;
        decoder.set_property("uri", uri)?;
        decoder.set_property("buffer-size", config.buffer_size)?;
        decoder.set_property("buffer-duration", config.buffer_duration_ns)?;

        let bin = SourceBin::new(index, uri).with_decoder(decoder);
        tracing::info!(bin = %bin.name(), uri, "source bin created");
        Ok(bin.into_stage())
    }

    /// Sorted factory names.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}
