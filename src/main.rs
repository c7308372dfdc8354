//! `vidgraph` command line: build one of the standard graphs, start it and
//! supervise it until end of stream, a fatal error or Ctrl-C.

use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use vidgraph::config::PipelineConfig;
use vidgraph::element::StageState;
use vidgraph::observability::{TracingConfig, init_tracing};
use vidgraph::pipeline::scenarios::{
    self, Codec, InferenceEngine, RelayOptions, RtspAiOptions, Scenario, ScreenOptions, StreamOutput,
    UsbOptions,
};
use vidgraph::pipeline::{ControlLoop, LoopOutcome, PipelineGraph, StageRegistry};

#[derive(Parser)]
#[command(name = "vidgraph")]
#[command(about = "Capture, inference and streaming media graphs")]
#[command(version)]
struct Cli {
    /// TOML file overriding the built-in defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Build the graph, print it and exit without starting it
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run object detection on a network stream and republish it over RTSP
    RtspAi {
        /// Input locator (rtsp://, file://, ...)
        #[arg(long = "input-rtsp")]
        input: String,

        /// RTSP publish address
        #[arg(long = "output-rtsp")]
        output: String,

        /// Inference configuration file
        #[arg(long, default_value = "dstest1_pgie_config.txt")]
        config_file: String,

        /// Inference engine: nvinfer or nvinferserver
        #[arg(long, default_value = "nvinfer")]
        gie: InferenceEngine,

        /// Output codec: H264 or H265
        #[arg(long, default_value = "H264")]
        codec: Codec,

        /// Bitrate in bit/s
        #[arg(long)]
        bitrate: Option<u64>,

        /// Log per-frame capture times from the sender's clock
        #[arg(long)]
        rtsp_ts: bool,
    },

    /// Re-encode a network stream and publish it over RTMP
    Relay {
        /// Source locator
        #[arg(long)]
        rtsp_url: String,

        /// RTMP publish address
        #[arg(long)]
        rtmp_url: String,

        /// Bitrate in kbit/s
        #[arg(long)]
        bitrate: Option<u64>,

        /// Output width
        #[arg(long)]
        width: Option<u32>,

        /// Output height
        #[arg(long)]
        height: Option<u32>,
    },

    /// Show an MPEG-4 network stream in a local window
    RtspScreen {
        /// Source address
        #[arg(long)]
        rtsp_url: String,

        /// Receiver latency in milliseconds
        #[arg(long)]
        latency: Option<u32>,
    },

    /// Stream or display a local capture device
    Usb(UsbArgs),

    /// Build a graph from a launch description
    Launch {
        /// Description, e.g. `v4l2src device=/dev/video0 ! videoconvert ! autovideosink`
        #[arg(required = true, num_args = 1..)]
        description: Vec<String>,
    },
}

#[derive(Args)]
struct UsbArgs {
    /// Capture device, e.g. /dev/video0
    #[arg(long)]
    device: Option<String>,

    /// Publish over RTMP
    #[arg(long)]
    rtmp: bool,

    /// RTMP publish address
    #[arg(long)]
    rtmp_url: Option<String>,

    /// Publish over RTSP
    #[arg(long)]
    rtsp: bool,

    /// RTSP publish address
    #[arg(long)]
    rtsp_url: Option<String>,

    /// Show in a local window
    #[arg(long)]
    screen: bool,

    /// Frame width
    #[arg(long)]
    width: Option<u32>,

    /// Frame height
    #[arg(long)]
    height: Option<u32>,

    /// Frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Bitrate in kbit/s
    #[arg(long)]
    bitrate: Option<u64>,
}

#[derive(Debug)]
enum UsbMode {
    Stream(StreamOutput),
    Screen,
}

impl UsbArgs {
    /// Check the output flags before anything is constructed.
    fn validate(&self) -> Result<(UsbOptions, UsbMode), String> {
        let selected = [self.rtmp, self.rtsp, self.screen]
            .iter()
            .filter(|flag| **flag)
            .count();
        if selected != 1 {
            return Err("exactly one of --rtmp, --rtsp or --screen is required".to_string());
        }

        let device = self
            .device
            .clone()
            .ok_or_else(|| "--device is required, e.g. --device /dev/video0".to_string())?;

        let mode = if self.rtmp {
            let url = self.rtmp_url.clone().ok_or("--rtmp requires --rtmp-url")?;
            UsbMode::Stream(StreamOutput::Rtmp(url))
        } else if self.rtsp {
            let url = self.rtsp_url.clone().ok_or("--rtsp requires --rtsp-url")?;
            UsbMode::Stream(StreamOutput::Rtsp(url))
        } else {
            UsbMode::Screen
        };

        let options = UsbOptions {
            device,
            width: self.width,
            height: self.height,
            fps: self.fps,
            bitrate_kbps: self.bitrate,
        };
        Ok((options, mode))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set RUST_LOG to override, e.g. RUST_LOG=debug or RUST_LOG=vidgraph::timestamp=info
    init_tracing(&TracingConfig::default());

    let config = match &cli.config {
        Some(path) => match PipelineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => PipelineConfig::default(),
    };

    let registry = StageRegistry::deepstream();
    let scenario = match build(&cli.command, &registry, &config) {
        Ok(scenario) => scenario,
        Err(e) => {
            tracing::error!(error = %e, "failed to build pipeline");
            return ExitCode::FAILURE;
        }
    };

    if cli.dry_run {
        print!("{}", scenario.graph);
        return ExitCode::SUCCESS;
    }

    match supervise(scenario).await {
        Ok(outcome) => exit_code(&outcome),
        Err(e) => {
            tracing::error!(error = %e, "control loop could not start");
            ExitCode::FAILURE
        }
    }
}

fn build(command: &Commands, registry: &StageRegistry, config: &PipelineConfig) -> vidgraph::Result<Scenario> {
    match command {
        Commands::RtspAi {
            input,
            output,
            config_file,
            gie,
            codec,
            bitrate,
            rtsp_ts,
        } => {
            let options = RtspAiOptions {
                input_uri: input.clone(),
                output_uri: output.clone(),
                inference_config: config_file.clone(),
                engine: *gie,
                codec: *codec,
                bitrate_bps: *bitrate,
                report_timestamps: *rtsp_ts,
            };
            scenarios::rtsp_ai_to_rtsp(registry, config, &options)
        }
        Commands::Relay {
            rtsp_url,
            rtmp_url,
            bitrate,
            width,
            height,
        } => {
            let options = RelayOptions {
                rtsp_url: rtsp_url.clone(),
                rtmp_url: rtmp_url.clone(),
                bitrate_kbps: *bitrate,
                width: *width,
                height: *height,
            };
            scenarios::rtsp_to_rtmp(registry, config, &options)
        }
        Commands::RtspScreen { rtsp_url, latency } => {
            let options = ScreenOptions {
                rtsp_url: rtsp_url.clone(),
                latency_ms: *latency,
            };
            scenarios::rtsp_to_screen(registry, config, &options)
        }
        Commands::Usb(args) => {
            let (options, mode) = match args.validate() {
                Ok(valid) => valid,
                Err(msg) => Cli::command().error(ErrorKind::MissingRequiredArgument, msg).exit(),
            };
            match mode {
                UsbMode::Stream(output) => scenarios::usb_to_stream(registry, config, &options, &output),
                UsbMode::Screen => scenarios::usb_to_screen(registry, config, &options),
            }
        }
        Commands::Launch { description } => {
            let graph = PipelineGraph::from_description(registry, &description.join(" "))?;
            Ok(Scenario {
                graph,
                source: None,
                probe: None,
            })
        }
    }
}

async fn supervise(scenario: Scenario) -> vidgraph::Result<LoopOutcome> {
    let Scenario { graph, probe, .. } = scenario;
    let mut control = ControlLoop::new(graph)?;

    // A failed start posts a fatal error; the loop reports it and tears down.
    if let Err(e) = control.graph_mut().request_state(StageState::Playing) {
        tracing::debug!(error = %e, "start failed");
    }

    let outcome = control
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    if let Some(probe) = probe {
        let stats = probe.stats();
        tracing::info!(
            batches = stats.batches,
            frames = stats.frames,
            objects = stats.objects,
            "annotation totals"
        );
    }
    Ok(outcome)
}

fn exit_code(outcome: &LoopOutcome) -> ExitCode {
    match outcome.exit_code() {
        0 => {
            tracing::info!("{}", outcome);
            ExitCode::SUCCESS
        }
        code => {
            tracing::error!("{}", outcome);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(flags: &[&str]) -> UsbArgs {
        let mut argv = vec!["vidgraph", "usb"];
        argv.extend_from_slice(flags);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Usb(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_usb_requires_device_for_streaming() {
        let err = usb(&["--rtmp", "--rtmp-url", "rtmp://server/live"]).validate();
        assert!(err.unwrap_err().contains("--device"));
    }

    #[test]
    fn test_usb_requires_one_mode() {
        assert!(usb(&["--device", "/dev/video0"]).validate().is_err());
        assert!(usb(&["--device", "/dev/video0", "--rtmp", "--screen"]).validate().is_err());
    }

    #[test]
    fn test_usb_url_per_mode() {
        let err = usb(&["--device", "/dev/video0", "--rtsp"]).validate().unwrap_err();
        assert!(err.contains("--rtsp-url"));

        let (options, mode) = usb(&["--device", "/dev/video0", "--screen", "--fps", "15"])
            .validate()
            .unwrap();
        assert_eq!(options.fps, Some(15));
        assert!(matches!(mode, UsbMode::Screen));
    }

    #[test]
    fn test_rtsp_ai_choices() {
        let cli = Cli::try_parse_from([
            "vidgraph",
            "--dry-run",
            "rtsp-ai",
            "--input-rtsp",
            "rtsp://cam/1",
            "--output-rtsp",
            "rtsp://server/out",
            "--codec",
            "H265",
            "--rtsp-ts",
        ])
        .unwrap();
        assert!(cli.dry_run);
        match cli.command {
            Commands::RtspAi { codec, gie, rtsp_ts, .. } => {
                assert_eq!(codec, Codec::H265);
                assert_eq!(gie, InferenceEngine::Nvinfer);
                assert!(rtsp_ts);
            }
            _ => unreachable!(),
        }
        assert!(Cli::try_parse_from(["vidgraph", "rtsp-ai", "--input-rtsp", "a", "--output-rtsp", "b", "--codec", "VP9"]).is_err());
    }

    #[test]
    fn test_rtsp_screen_builds_display_graph() {
        let cli = Cli::try_parse_from([
            "vidgraph",
            "rtsp-screen",
            "--rtsp-url",
            "rtsp://192.168.1.222:8554/test_stream1",
            "--latency",
            "200",
        ])
        .unwrap();

        let scenario = build(&cli.command, &StageRegistry::deepstream(), &PipelineConfig::default()).unwrap();
        assert_eq!(scenario.graph.name(), "rtsp-to-screen");
        assert!(scenario.source.is_some());
        let source = scenario.graph.stage_by_name("source").unwrap();
        assert_eq!(source.config().get_u64("latency"), Some(200));

        assert!(Cli::try_parse_from(["vidgraph", "rtsp-screen"]).is_err());
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }
}
