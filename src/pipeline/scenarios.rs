//! Standard capture and streaming graphs.
//!
//! Each builder constructs every stage before adding any, so a missing
//! factory or a rejected option returns an error and no graph at all.
//! Encoders go through [`StageRegistry::make_first`]; the chosen
//! candidate's bitrate unit and tuning options are applied afterwards.

use super::factory::{BitrateUnit, StageRegistry};
use super::graph::{Link, PadAnnouncement, PipelineGraph, StageId};
use crate::config::{EncoderConfig, PipelineConfig};
use crate::element::{Pad, Stage};
use crate::elements::GHOST_PAD;
use crate::error::{Error, Result};
use crate::format::Caps;
use crate::probe::{AnnotationProbe, ClassTable};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Hardware H.264 first, then discrete GPU, then software.
pub const H264_ENCODERS: &[&str] = &["nvv4l2h264enc", "nvh264enc", "x264enc"];

/// MPEG-4 part 2 decoders, software first.
pub const MPEG4_DECODERS: &[&str] = &["avdec_mpeg4", "nvv4l2decoder"];

/// Output pad of the RTSP receiver in [`rtsp_to_screen`].
pub const RECEIVER_PAD: &str = "src";

/// Caps forced ahead of the hardware encoder in the inference graph.
pub const ENCODER_INPUT_CAPS: &str = "video/x-raw(memory:NVMM), format=I420";

/// Inference stage implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InferenceEngine {
    /// Local TensorRT engine.
    #[default]
    Nvinfer,
    /// Triton inference server.
    Nvinferserver,
}

impl InferenceEngine {
    /// Factory name.
    pub fn factory(self) -> &'static str {
        match self {
            InferenceEngine::Nvinfer => "nvinfer",
            InferenceEngine::Nvinferserver => "nvinferserver",
        }
    }
}

impl FromStr for InferenceEngine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nvinfer" => Ok(InferenceEngine::Nvinfer),
            "nvinferserver" => Ok(InferenceEngine::Nvinferserver),
            other => Err(Error::Parse(format!(
                "unknown inference engine '{}', expected nvinfer or nvinferserver",
                other
            ))),
        }
    }
}

impl fmt::Display for InferenceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.factory())
    }
}

/// Output codec of the inference graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// H.264 / AVC.
    #[default]
    H264,
    /// H.265 / HEVC.
    H265,
}

impl Codec {
    /// Hardware encoder factory.
    pub fn encoder(self) -> &'static str {
        match self {
            Codec::H264 => "nvv4l2h264enc",
            Codec::H265 => "nvv4l2h265enc",
        }
    }

    /// Bitstream parser factory.
    pub fn parser(self) -> &'static str {
        match self {
            Codec::H264 => "h264parse",
            Codec::H265 => "h265parse",
        }
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "H264" => Ok(Codec::H264),
            "H265" => Ok(Codec::H265),
            other => Err(Error::Parse(format!(
                "unknown codec '{}', expected H264 or H265",
                other
            ))),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::H264 => f.write_str("H264"),
            Codec::H265 => f.write_str("H265"),
        }
    }
}

/// Inputs of [`rtsp_ai_to_rtsp`].
#[derive(Debug, Clone, PartialEq)]
pub struct RtspAiOptions {
    /// Source locator (`rtsp://`, `file://`, ...).
    pub input_uri: String,
    /// RTSP publish address.
    pub output_uri: String,
    /// Inference configuration file.
    pub inference_config: String,
    /// Inference implementation.
    pub engine: InferenceEngine,
    /// Output codec.
    pub codec: Codec,
    /// Bitrate in bit/s; `None` uses the configured default.
    pub bitrate_bps: Option<u64>,
    /// Log the capture time of each frame and keep sender timestamps.
    pub report_timestamps: bool,
}

/// Inputs of [`rtsp_to_rtmp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    /// Source locator.
    pub rtsp_url: String,
    /// RTMP publish address.
    pub rtmp_url: String,
    /// Bitrate in kbit/s; `None` uses the configured default.
    pub bitrate_kbps: Option<u64>,
    /// Output width; `None` uses the muxer default.
    pub width: Option<u32>,
    /// Output height; `None` uses the muxer default.
    pub height: Option<u32>,
}

/// Inputs of [`rtsp_to_screen`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenOptions {
    /// RTSP address of an MPEG-4 stream.
    pub rtsp_url: String,
    /// Receiver latency in milliseconds; `None` uses the configured default.
    pub latency_ms: Option<u32>,
}

/// What became of a pad announced by the RTSP receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtpPadOutcome {
    /// The pad now feeds the depayloader.
    Linked,
    /// The depayloader is already fed; the pad was ignored.
    AlreadyLinked,
    /// Not an RTP stream; the pad was ignored.
    NotRtp,
    /// The depayloader refused the stream.
    Rejected(String),
}

/// Where a capture graph publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutput {
    /// FLV over RTMP.
    Rtmp(String),
    /// RTSP publish.
    Rtsp(String),
}

/// Inputs of [`usb_to_stream`] and [`usb_to_screen`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbOptions {
    /// Capture device path, e.g. `/dev/video0`.
    pub device: String,
    /// Frame width; `None` uses the capture default.
    pub width: Option<u32>,
    /// Frame height; `None` uses the capture default.
    pub height: Option<u32>,
    /// Frame rate; `None` uses the capture default.
    pub fps: Option<u32>,
    /// Bitrate in kbit/s; `None` uses the configured default.
    pub bitrate_kbps: Option<u64>,
}

/// A built graph plus the handles callers need while it runs.
#[derive(Debug)]
pub struct Scenario {
    /// The graph, in `null`.
    pub graph: PipelineGraph,
    /// Stage whose output appears at run time: a source bin awaiting decode
    /// announcements, or the RTSP receiver of [`rtsp_to_screen`].
    pub source: Option<StageId>,
    /// Annotation probe attached to the inference output, if any.
    pub probe: Option<Arc<AnnotationProbe>>,
}

impl Scenario {
    fn new(graph: PipelineGraph) -> Self {
        Self {
            graph,
            source: None,
            probe: None,
        }
    }
}

/// Network source, detector, overlay, hardware encoder, RTSP publish.
pub fn rtsp_ai_to_rtsp(
    registry: &StageRegistry,
    config: &PipelineConfig,
    options: &RtspAiOptions,
) -> Result<Scenario> {
    let bitrate = options
        .bitrate_bps
        .unwrap_or(config.encoder.inference_bitrate_bps);

    let source = registry.make_source_bin(0, &options.input_uri, &config.source)?;

    let mut muxer = registry.make("nvstreammux", "stream-muxer")?;
    muxer.set_property("width", config.muxer.width)?;
    muxer.set_property("height", config.muxer.height)?;
    muxer.set_property("batch-size", config.muxer.batch_size)?;
    muxer.set_property("batched-push-timeout", config.muxer.inference_push_timeout_us)?;
    if options.report_timestamps {
        // Keep the sender's capture time instead of the local clock.
        muxer.set_property("attach-sys-ts", 0)?;
    }

    let mut inference = registry.make(options.engine.factory(), "primary-inference")?;
    inference.set_property("config-file-path", options.inference_config.as_str())?;

    let converter = registry.make("nvvideoconvert", "converter")?;

    let mut osd = registry.make("nvdsosd", "onscreendisplay")?;
    osd.set_property("process-mode", config.osd.process_mode)?;
    osd.set_property("display-text", config.osd.display_text)?;

    let post_osd = registry.make("nvvideoconvert", "convertor-postosd")?;

    let caps: Caps = ENCODER_INPUT_CAPS.parse()?;
    let filter = registry
        .make("capsfilter", "capsfilter")?
        .with_property("caps", &caps)?;

    let encoder = make_encoder(
        registry,
        &[options.codec.encoder()],
        Bitrate::Bps(bitrate),
        &config.encoder,
    )?;
    let parser = registry.make(options.codec.parser(), "parser")?;

    let mut sink = registry.make("rtspclientsink", "rtsp-sink")?;
    sink.set_property("location", options.output_uri.as_str())?;

    let mut graph = PipelineGraph::new("rtsp-ai-to-rtsp");
    let ids = add_all(
        &mut graph,
        vec![
            source, muxer, inference, converter, osd, post_osd, filter, encoder, parser, sink,
        ],
    )?;
    attach_source(&mut graph, ids[0], ids[1])?;
    graph.link_many(&ids[1..])?;

    let probe = Arc::new(
        AnnotationProbe::new(ClassTable::default_detector())
            .with_timestamps(options.report_timestamps),
    );
    graph.add_probe(ids[2], "src", probe.clone())?;

    tracing::info!(
        input = %options.input_uri,
        output = %options.output_uri,
        engine = %options.engine,
        codec = %options.codec,
        bitrate,
        "inference graph built"
    );

    let mut scenario = Scenario::new(graph);
    scenario.source = Some(ids[0]);
    scenario.probe = Some(probe);
    Ok(scenario)
}

/// Network source re-encoded and published over RTMP.
pub fn rtsp_to_rtmp(
    registry: &StageRegistry,
    config: &PipelineConfig,
    options: &RelayOptions,
) -> Result<Scenario> {
    let bitrate = options
        .bitrate_kbps
        .unwrap_or(config.encoder.relay_bitrate_kbps);

    let source = registry.make_source_bin(0, &options.rtsp_url, &config.source)?;

    let mut muxer = registry.make("nvstreammux", "stream-muxer")?;
    muxer.set_property("width", options.width.unwrap_or(config.muxer.width))?;
    muxer.set_property("height", options.height.unwrap_or(config.muxer.height))?;
    muxer.set_property("batch-size", config.muxer.batch_size)?;
    muxer.set_property("batched-push-timeout", config.muxer.relay_push_timeout_us)?;
    muxer.set_property("buffer-pool-size", config.muxer.buffer_pool_size)?;

    let converter = registry.make("nvvideoconvert", "converter")?;
    let encoder = make_encoder(registry, H264_ENCODERS, Bitrate::Kbps(bitrate), &config.encoder)?;
    let parser = registry.make("h264parse", "parser")?;
    let flvmux = registry.make("flvmux", "flvmux")?;
    let mut sink = registry.make("rtmpsink", "rtmp-sink")?;
    sink.set_property("location", options.rtmp_url.as_str())?;

    let mut graph = PipelineGraph::new("rtsp-to-rtmp");
    let ids = add_all(
        &mut graph,
        vec![source, muxer, converter, encoder, parser, flvmux, sink],
    )?;
    attach_source(&mut graph, ids[0], ids[1])?;
    graph.link_many(&ids[1..])?;

    tracing::info!(
        input = %options.rtsp_url,
        output = %options.rtmp_url,
        bitrate_kbps = bitrate,
        "relay graph built"
    );

    let mut scenario = Scenario::new(graph);
    scenario.source = Some(ids[0]);
    Ok(scenario)
}

/// MPEG-4 stream received over RTSP, decoded and shown in a window.
///
/// The receiver's output stays unlinked until it announces an RTP pad;
/// feed its announcements to [`link_rtp_pad`].
pub fn rtsp_to_screen(
    registry: &StageRegistry,
    config: &PipelineConfig,
    options: &ScreenOptions,
) -> Result<Scenario> {
    let rtsp = &config.source;
    let latency = options.latency_ms.unwrap_or(rtsp.rtsp_latency_ms);

    let mut source = registry.make("rtspsrc", "source")?;
    source.set_property("location", options.rtsp_url.as_str())?;
    source.set_property("latency", latency)?;
    source.set_property("protocols", rtsp.rtsp_protocols)?;
    source.set_property("buffer-mode", rtsp.rtsp_buffer_mode)?;
    source.set_property("retry", rtsp.rtsp_retry)?;
    source.set_property("timeout", rtsp.rtsp_timeout_us)?;

    let decoder = registry.make_first(MPEG4_DECODERS, "decoder")?;
    let device_output = decoder
        .pad("src")
        .and_then(Pad::caps)
        .is_some_and(Caps::is_device_resident);

    let mut chain = vec![
        registry.make("rtpmp4vdepay", "depay")?,
        registry.make("mpeg4videoparse", "parse")?,
        decoder,
    ];
    if device_output {
        // Hardware decoders hand out device memory.
        chain.push(registry.make("nvvideoconvert", "decoder-convert")?);
    }
    chain.push(registry.make("videoconvert", "videoconvert")?);
    chain.push(registry.make("autovideosink", "sink")?);

    let mut graph = PipelineGraph::new("rtsp-to-screen");
    let source = graph.add_stage(source)?;
    let ids = add_all(&mut graph, chain)?;
    graph.connect(source, RECEIVER_PAD, ids[0], "sink")?;
    graph.link_many(&ids)?;

    tracing::info!(input = %options.rtsp_url, latency_ms = latency, "display graph built");

    let mut scenario = Scenario::new(graph);
    scenario.source = Some(source);
    Ok(scenario)
}

/// Offer a pad announced by the RTSP receiver to the depayloader.
///
/// Only `application/x-rtp` pads are linked, and only the first one; once
/// the depayloader is fed every later pad is ignored.
pub fn link_rtp_pad(
    graph: &mut PipelineGraph,
    receiver: StageId,
    pad: &str,
    caps: Caps,
) -> Result<RtpPadOutcome> {
    let link = graph
        .stage(receiver)
        .and_then(|s| s.pad(RECEIVER_PAD))
        .and_then(Pad::link)
        .ok_or_else(|| Error::NotFound(format!("receiver output for pad {}", pad)))?;

    if graph.link_weight(link).is_some_and(Link::is_resolved) {
        tracing::debug!(pad, "receiver already linked, ignoring pad");
        return Ok(RtpPadOutcome::AlreadyLinked);
    }
    if !caps.name().starts_with("application/x-rtp") {
        tracing::debug!(pad, caps = %caps, "not an RTP stream, ignoring pad");
        return Ok(RtpPadOutcome::NotRtp);
    }

    let encoding = caps.field("encoding-name").unwrap_or("unknown").to_string();
    match graph.announce_pad(receiver, RECEIVER_PAD, caps)? {
        PadAnnouncement::Linked(_) => {
            tracing::info!(pad, encoding = %encoding, "receiver linked");
            Ok(RtpPadOutcome::Linked)
        }
        PadAnnouncement::AlreadyLinked => Ok(RtpPadOutcome::AlreadyLinked),
        PadAnnouncement::Rejected(reason) => Ok(RtpPadOutcome::Rejected(reason)),
        PadAnnouncement::NoPendingLink => Err(Error::NotFound(format!(
            "receiver output for pad {}",
            pad
        ))),
    }
}

/// Local capture device encoded and published.
pub fn usb_to_stream(
    registry: &StageRegistry,
    config: &PipelineConfig,
    options: &UsbOptions,
    output: &StreamOutput,
) -> Result<Scenario> {
    let bitrate = options
        .bitrate_kbps
        .unwrap_or(config.encoder.relay_bitrate_kbps);

    let mut stages = capture_front(registry, config, options)?;
    stages.push(registry.make("nvvideoconvert", "nvvidconv")?);
    stages.push(make_encoder(
        registry,
        H264_ENCODERS,
        Bitrate::Kbps(bitrate),
        &config.encoder,
    )?);
    stages.push(registry.make("h264parse", "parser")?);

    let name = match output {
        StreamOutput::Rtmp(url) => {
            stages.push(registry.make("flvmux", "flvmux")?);
            let mut sink = registry.make("rtmpsink", "rtmp-sink")?;
            sink.set_property("location", url.as_str())?;
            stages.push(sink);
            "usb-to-rtmp"
        }
        StreamOutput::Rtsp(url) => {
            let mut sink = registry.make("rtspclientsink", "rtsp-sink")?;
            sink.set_property("location", url.as_str())?;
            stages.push(sink);
            "usb-to-rtsp"
        }
    };

    let mut graph = PipelineGraph::new(name);
    let ids = add_all(&mut graph, stages)?;
    graph.link_many(&ids)?;

    tracing::info!(device = %options.device, output = ?output, bitrate_kbps = bitrate, "capture graph built");
    Ok(Scenario::new(graph))
}

/// Local capture device shown in a window.
///
/// Frames go straight from the converter to the display; there is no encode
/// and decode round trip in between.
pub fn usb_to_screen(
    registry: &StageRegistry,
    config: &PipelineConfig,
    options: &UsbOptions,
) -> Result<Scenario> {
    let mut stages = capture_front(registry, config, options)?;
    stages.push(registry.make("autovideosink", "sink")?);

    let mut graph = PipelineGraph::new("usb-to-screen");
    let ids = add_all(&mut graph, stages)?;
    graph.link_many(&ids)?;

    tracing::info!(device = %options.device, "display graph built");
    Ok(Scenario::new(graph))
}

/// `v4l2src ! capsfilter ! videoconvert`, shared by the capture graphs.
fn capture_front(
    registry: &StageRegistry,
    config: &PipelineConfig,
    options: &UsbOptions,
) -> Result<Vec<Stage>> {
    let width = options.width.unwrap_or(config.capture.width);
    let height = options.height.unwrap_or(config.capture.height);
    let fps = options.fps.unwrap_or(config.capture.fps);

    let mut source = registry.make("v4l2src", "source")?;
    source.set_property("device", options.device.as_str())?;

    let caps = Caps::new("video/x-raw")
        .with_field("width", width.to_string())
        .with_field("height", height.to_string())
        .with_field("framerate", format!("{}/1", fps));
    let filter = registry
        .make("capsfilter", "capsfilter")?
        .with_property("caps", &caps)?;

    let convert = registry.make("videoconvert", "convertor-src")?;
    Ok(vec![source, filter, convert])
}

#[derive(Debug, Clone, Copy)]
enum Bitrate {
    Bps(u64),
    Kbps(u64),
}

impl Bitrate {
    fn in_unit(self, unit: BitrateUnit) -> u64 {
        match self {
            Bitrate::Bps(v) => unit.from_bps(v),
            Bitrate::Kbps(v) => unit.from_kbps(v),
        }
    }
}

/// First available encoder, tuned for whichever candidate won.
fn make_encoder(
    registry: &StageRegistry,
    candidates: &[&str],
    bitrate: Bitrate,
    config: &EncoderConfig,
) -> Result<Stage> {
    let mut encoder = registry.make_first(candidates, "encoder")?;
    let unit = registry
        .bitrate_unit(encoder.factory())
        .unwrap_or(BitrateUnit::KilobitsPerSecond);
    encoder.set_property("bitrate", bitrate.in_unit(unit))?;

    match encoder.factory() {
        "nvh264enc" => {
            // medium preset, constant bitrate
            encoder.set_property("preset", 1)?;
            encoder.set_property("rc-mode", 1)?;
        }
        "x264enc" => {
            encoder.set_property("speed-preset", config.speed_preset.as_str())?;
            encoder.set_property("tune", config.tune.as_str())?;
        }
        _ => {
            if config.integrated_gpu {
                encoder.set_property("preset-level", 1)?;
                encoder.set_property("insert-sps-pps", 1)?;
            }
        }
    }
    Ok(encoder)
}

fn add_all(graph: &mut PipelineGraph, stages: Vec<Stage>) -> Result<Vec<StageId>> {
    stages.into_iter().map(|s| graph.add_stage(s)).collect()
}

/// Bind the source bin's ghost pad to the muxer's first batch slot.
fn attach_source(graph: &mut PipelineGraph, source: StageId, muxer: StageId) -> Result<()> {
    graph.request_pad(muxer, "sink_0")?;
    graph.connect(source, GHOST_PAD, muxer, "sink_0")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::StageState;

    fn ai_options() -> RtspAiOptions {
        RtspAiOptions {
            input_uri: "rtsp://cam/1".to_string(),
            output_uri: "rtsp://server:8554/out".to_string(),
            inference_config: "config_infer_primary.txt".to_string(),
            engine: InferenceEngine::Nvinfer,
            codec: Codec::H264,
            bitrate_bps: None,
            report_timestamps: true,
        }
    }

    fn usb_options() -> UsbOptions {
        UsbOptions {
            device: "/dev/video0".to_string(),
            width: None,
            height: None,
            fps: None,
            bitrate_kbps: None,
        }
    }

    #[test]
    fn test_inference_graph_shape() {
        let registry = StageRegistry::deepstream();
        let scenario = rtsp_ai_to_rtsp(&registry, &PipelineConfig::default(), &ai_options()).unwrap();
        let graph = &scenario.graph;

        assert_eq!(graph.stage_count(), 10);
        assert_eq!(graph.link_count(), 9);
        assert_eq!(graph.state(), StageState::Null);

        let muxer = graph.stage_by_name("stream-muxer").unwrap();
        assert_eq!(muxer.config().get_u64("batched-push-timeout"), Some(33_000));
        assert_eq!(muxer.config().get_u64("attach-sys-ts"), Some(0));
        // Only the relay graph sizes the surface pool.
        assert_eq!(muxer.config().get_u64("buffer-pool-size"), None);

        let encoder = graph.stage_by_name("encoder").unwrap();
        assert_eq!(encoder.factory(), "nvv4l2h264enc");
        assert_eq!(encoder.config().get_u64("bitrate"), Some(4_000_000));

        let pending: Vec<_> = graph.links().into_iter().filter(|l| !l.resolved).collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].src, "source-bin-00.src");
        assert_eq!(pending[0].sink, "stream-muxer.sink_0");

        assert!(scenario.probe.as_ref().unwrap().reports_timestamps());
        let inference = graph.stage_id("primary-inference").unwrap();
        assert_eq!(graph.probe_chain(inference, "src").unwrap().len(), 1);
    }

    #[test]
    fn test_inference_graph_h265_server() {
        let registry = StageRegistry::deepstream();
        let mut options = ai_options();
        options.codec = Codec::H265;
        options.engine = InferenceEngine::Nvinferserver;
        options.report_timestamps = false;
        let scenario = rtsp_ai_to_rtsp(&registry, &PipelineConfig::default(), &options).unwrap();
        let graph = &scenario.graph;

        assert_eq!(graph.stage_by_name("primary-inference").unwrap().factory(), "nvinferserver");
        assert_eq!(graph.stage_by_name("encoder").unwrap().factory(), "nvv4l2h265enc");
        assert_eq!(graph.stage_by_name("parser").unwrap().factory(), "h265parse");
        let muxer = graph.stage_by_name("stream-muxer").unwrap();
        assert_eq!(muxer.config().get("attach-sys-ts"), None);
    }

    #[test]
    fn test_missing_plugin_builds_nothing() {
        let mut registry = StageRegistry::deepstream();
        registry.unregister("nvdsosd");
        let err = rtsp_ai_to_rtsp(&registry, &PipelineConfig::default(), &ai_options()).unwrap_err();
        assert!(err.is_construction());
        assert!(err.to_string().contains("nvdsosd"));
    }

    #[test]
    fn test_relay_falls_back_to_software_encoder() {
        let mut registry = StageRegistry::deepstream();
        registry.unregister("nvv4l2h264enc");
        registry.unregister("nvh264enc");
        let options = RelayOptions {
            rtsp_url: "rtsp://cam/1".to_string(),
            rtmp_url: "rtmp://server/live/stream".to_string(),
            bitrate_kbps: Some(3000),
            width: Some(1280),
            height: None,
        };
        let scenario = rtsp_to_rtmp(&registry, &PipelineConfig::default(), &options).unwrap();
        let graph = &scenario.graph;

        let encoder = graph.stage_by_name("encoder").unwrap();
        assert_eq!(encoder.factory(), "x264enc");
        assert_eq!(encoder.config().get_u64("bitrate"), Some(3000));
        assert_eq!(encoder.config().get_string("tune").as_deref(), Some("zerolatency"));
        assert_eq!(encoder.selection().unwrap().skipped().len(), 2);

        let muxer = graph.stage_by_name("stream-muxer").unwrap();
        assert_eq!(muxer.config().get_u64("width"), Some(1280));
        assert_eq!(muxer.config().get_u64("height"), Some(1080));
        assert_eq!(muxer.config().get_u64("batched-push-timeout"), Some(10_000));
    }

    #[test]
    fn test_relay_hardware_encoder_takes_bits() {
        let registry = StageRegistry::deepstream();
        let options = RelayOptions {
            rtsp_url: "rtsp://cam/1".to_string(),
            rtmp_url: "rtmp://server/live/stream".to_string(),
            bitrate_kbps: None,
            width: None,
            height: None,
        };
        let scenario = rtsp_to_rtmp(&registry, &PipelineConfig::default(), &options).unwrap();
        let encoder = scenario.graph.stage_by_name("encoder").unwrap();
        assert_eq!(encoder.config().get_u64("bitrate"), Some(2_000_000));
        assert!(encoder.selection().unwrap().skipped().is_empty());
    }

    #[test]
    fn test_integrated_gpu_options() {
        let registry = StageRegistry::deepstream();
        let mut config = PipelineConfig::default();
        config.encoder.integrated_gpu = true;
        let scenario = usb_to_stream(
            &registry,
            &config,
            &usb_options(),
            &StreamOutput::Rtsp("rtsp://server/cam".to_string()),
        )
        .unwrap();
        let encoder = scenario.graph.stage_by_name("encoder").unwrap();
        assert_eq!(encoder.config().get_u64("preset-level"), Some(1));
        assert_eq!(encoder.config().get_u64("insert-sps-pps"), Some(1));
        assert_eq!(scenario.graph.name(), "usb-to-rtsp");
        assert!(scenario.graph.links().iter().all(|l| l.resolved));
    }

    #[test]
    fn test_usb_rtmp_chain() {
        let mut registry = StageRegistry::deepstream();
        registry.unregister("nvv4l2h264enc");
        let scenario = usb_to_stream(
            &registry,
            &PipelineConfig::default(),
            &usb_options(),
            &StreamOutput::Rtmp("rtmp://server/live/cam".to_string()),
        )
        .unwrap();
        let graph = &scenario.graph;
        assert_eq!(graph.stage_count(), 8);
        assert!(scenario.source.is_none());

        let encoder = graph.stage_by_name("encoder").unwrap();
        assert_eq!(encoder.factory(), "nvh264enc");
        assert_eq!(encoder.config().get_u64("rc-mode"), Some(1));

        let filter = graph.stage_by_name("capsfilter").unwrap();
        let caps = filter.pad("src").unwrap().caps().unwrap();
        assert_eq!(caps.field("width"), Some("640"));
        assert_eq!(caps.field("framerate"), Some("30/1"));
    }

    fn screen_options() -> ScreenOptions {
        ScreenOptions {
            rtsp_url: "rtsp://192.168.1.222:8554/test_stream1".to_string(),
            latency_ms: None,
        }
    }

    fn rtp_video() -> Caps {
        "application/x-rtp, media=video, encoding-name=MP4V-ES, clock-rate=90000"
            .parse()
            .unwrap()
    }

    #[test]
    fn test_screen_graph_shape() {
        let registry = StageRegistry::deepstream();
        let scenario = rtsp_to_screen(&registry, &PipelineConfig::default(), &screen_options()).unwrap();
        let graph = &scenario.graph;

        assert_eq!(graph.name(), "rtsp-to-screen");
        assert_eq!(graph.stage_count(), 6);
        assert_eq!(graph.link_count(), 5);

        let source = graph.stage_by_name("source").unwrap();
        assert_eq!(source.config().get_u64("latency"), Some(0));
        assert_eq!(source.config().get_u64("protocols"), Some(4));
        assert_eq!(source.config().get_u64("timeout"), Some(5_000_000));
        assert_eq!(graph.stage_by_name("decoder").unwrap().factory(), "avdec_mpeg4");

        let pending: Vec<_> = graph.links().into_iter().filter(|l| !l.resolved).collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].src, "source.src");
        assert_eq!(pending[0].sink, "depay.sink");
        assert_eq!(scenario.source, graph.stage_id("source"));
    }

    #[test]
    fn test_screen_falls_back_to_hardware_decoder() {
        let mut registry = StageRegistry::deepstream();
        registry.unregister("avdec_mpeg4");
        let scenario = rtsp_to_screen(&registry, &PipelineConfig::default(), &screen_options()).unwrap();
        let graph = &scenario.graph;

        let decoder = graph.stage_by_name("decoder").unwrap();
        assert_eq!(decoder.factory(), "nvv4l2decoder");
        assert_eq!(decoder.selection().unwrap().skipped(), &["avdec_mpeg4"]);
        // Device memory is brought back to the host before display.
        assert!(graph.stage_by_name("decoder-convert").is_some());
        assert_eq!(graph.stage_count(), 7);

        registry.unregister("nvv4l2decoder");
        let err = rtsp_to_screen(&registry, &PipelineConfig::default(), &screen_options()).unwrap_err();
        assert!(err.is_construction());
    }

    #[test]
    fn test_receiver_links_rtp_only() {
        let registry = StageRegistry::deepstream();
        let mut scenario = rtsp_to_screen(&registry, &PipelineConfig::default(), &screen_options()).unwrap();
        let receiver = scenario.source.unwrap();
        let graph = &mut scenario.graph;

        let audio = link_rtp_pad(graph, receiver, "recv_rtp_src_1", "audio/x-raw".parse().unwrap()).unwrap();
        assert_eq!(audio, RtpPadOutcome::NotRtp);
        assert!(graph.links().iter().any(|l| !l.resolved));

        let video = link_rtp_pad(graph, receiver, "recv_rtp_src_0", rtp_video()).unwrap();
        assert_eq!(video, RtpPadOutcome::Linked);
        let link = graph.links().into_iter().find(|l| l.src == "source.src").unwrap();
        assert!(link.resolved);
        assert_eq!(link.caps.unwrap().field("encoding-name"), Some("MP4V-ES"));
    }

    #[test]
    fn test_receiver_ignores_pads_once_linked() {
        let registry = StageRegistry::deepstream();
        let mut scenario = rtsp_to_screen(&registry, &PipelineConfig::default(), &screen_options()).unwrap();
        let receiver = scenario.source.unwrap();
        let graph = &mut scenario.graph;

        assert_eq!(
            link_rtp_pad(graph, receiver, "recv_rtp_src_0", rtp_video()).unwrap(),
            RtpPadOutcome::Linked
        );
        let second: Caps = "application/x-rtp, media=video, encoding-name=H264".parse().unwrap();
        assert_eq!(
            link_rtp_pad(graph, receiver, "recv_rtp_src_2", second).unwrap(),
            RtpPadOutcome::AlreadyLinked
        );
        assert_eq!(
            link_rtp_pad(graph, receiver, "recv_rtp_src_3", "audio/x-raw".parse().unwrap()).unwrap(),
            RtpPadOutcome::AlreadyLinked
        );

        let link = graph.links().into_iter().find(|l| l.src == "source.src").unwrap();
        assert_eq!(link.caps.unwrap().field("encoding-name"), Some("MP4V-ES"));
    }

    #[test]
    fn test_usb_screen() {
        let registry = StageRegistry::deepstream();
        let mut options = usb_options();
        options.width = Some(1280);
        let scenario = usb_to_screen(&registry, &PipelineConfig::default(), &options).unwrap();
        assert_eq!(scenario.graph.stage_count(), 4);
        assert_eq!(scenario.graph.link_count(), 3);
        let filter = scenario.graph.stage_by_name("capsfilter").unwrap();
        assert_eq!(filter.pad("sink").unwrap().caps().unwrap().field("width"), Some("1280"));
    }

    #[test]
    fn test_parse_choices() {
        assert_eq!("h265".parse::<Codec>().unwrap(), Codec::H265);
        assert_eq!("NvInferServer".parse::<InferenceEngine>().unwrap(), InferenceEngine::Nvinferserver);
        assert!("vp9".parse::<Codec>().is_err());
    }
}
