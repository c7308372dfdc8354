//! Control loop supervision: terminal conditions and the decode queue.

use std::io::Write;
use std::time::Duration;
use vidgraph::config::PipelineConfig;
use vidgraph::element::StageState;
use vidgraph::elements::DecodeEvent;
use vidgraph::format::Caps;
use vidgraph::pipeline::scenarios::{self, RelayOptions};
use vidgraph::pipeline::{ControlLoop, ExitReason, Scenario, Severity, StageRegistry};

fn relay_options() -> RelayOptions {
    RelayOptions {
        rtsp_url: "rtsp://192.168.1.123:8554/stream".to_string(),
        rtmp_url: "rtmp://192.168.1.123/live/stream".to_string(),
        bitrate_kbps: None,
        width: None,
        height: None,
    }
}

fn relay(config: &PipelineConfig) -> Scenario {
    scenarios::rtsp_to_rtmp(&StageRegistry::deepstream(), config, &relay_options()).unwrap()
}

fn nvmm() -> Caps {
    "video/x-raw(memory:NVMM), format=NV12".parse().unwrap()
}

#[tokio::test]
async fn test_decode_queue_resolves_then_ends() {
    let scenario = relay(&PipelineConfig::default());
    let source = scenario.source.unwrap();
    let sender = scenario.graph.decode_sender(source).unwrap();

    let mut control = ControlLoop::new(scenario.graph).unwrap();
    control.graph_mut().request_state(StageState::Playing).unwrap();

    // Announcements arrive from a decoder thread.
    let decoder = std::thread::spawn(move || {
        assert!(sender.pad_added("src_0", nvmm()));
        assert!(sender.send(DecodeEvent::Eos));
    });

    let outcome = control.run(std::future::pending()).await;
    decoder.join().unwrap();

    assert_eq!(outcome.reason, ExitReason::Eos);
    assert_eq!(outcome.severity, Severity::Info);
    assert_eq!(outcome.source.as_deref(), Some("source-bin-00"));
    assert_eq!(outcome.exit_code(), 0);

    let graph = control.graph();
    assert!(graph.links().iter().all(|l| l.resolved));
    assert!(graph.stages().all(|(_, s)| s.state() == StageState::Null));
}

#[tokio::test]
async fn test_unsupported_stream_is_fatal() {
    let scenario = relay(&PipelineConfig::default());
    let sender = scenario.graph.decode_sender(scenario.source.unwrap()).unwrap();
    let mut control = ControlLoop::new(scenario.graph).unwrap();
    control.graph_mut().request_state(StageState::Playing).unwrap();

    sender.pad_added("src_0", "video/x-raw, format=I420".parse().unwrap());
    let outcome = control.run(std::future::pending()).await;

    assert_eq!(outcome.severity, Severity::Error);
    assert_eq!(outcome.exit_code(), 1);
    match &outcome.reason {
        ExitReason::Error(description) => assert!(description.contains("negotiation failed")),
        other => panic!("unexpected reason {:?}", other),
    }
    assert_eq!(control.graph().state(), StageState::Null);
}

#[tokio::test]
async fn test_runtime_error_while_playing() {
    let scenario = relay(&PipelineConfig::default());
    let mut control = ControlLoop::new(scenario.graph).unwrap();
    control.graph_mut().request_state(StageState::Playing).unwrap();

    let bus = control.graph().bus().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        bus.post_error("rtmp-sink", "could not connect to server", true);
    });

    let outcome = control.run(std::future::pending()).await;
    assert_eq!(outcome.reason, ExitReason::Error("could not connect to server".to_string()));
    assert_eq!(outcome.to_string(), "error from rtmp-sink: could not connect to server");

    // The loop already tore down; a second teardown has nothing left to release.
    let mut graph = control.into_graph();
    assert_eq!(graph.teardown(), 0);
    assert_eq!(graph.state(), StageState::Null);
}

#[tokio::test]
async fn test_interrupt_stops_playing_graph() {
    let scenario = relay(&PipelineConfig::default());
    let mut control = ControlLoop::new(scenario.graph).unwrap();
    control.graph_mut().request_state(StageState::Playing).unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _ = tx.send(());
    });

    let outcome = control
        .run(async {
            let _ = rx.await;
        })
        .await;
    assert_eq!(outcome.reason, ExitReason::Interrupted);
    assert_eq!(outcome.severity, Severity::Warning);
    assert_eq!(outcome.exit_code(), 0);
    assert!(control.graph().stages().all(|(_, s)| s.state() == StageState::Null));
}

#[test]
fn test_relay_without_flv_muxer() {
    let mut registry = StageRegistry::deepstream();
    registry.unregister("flvmux");
    let err = scenarios::rtsp_to_rtmp(&registry, &PipelineConfig::default(), &relay_options()).unwrap_err();
    assert!(err.is_construction());
}

#[tokio::test]
async fn test_error_queued_before_run() {
    let scenario = relay(&PipelineConfig::default());
    let mut control = ControlLoop::new(scenario.graph).unwrap();
    control
        .graph()
        .bus()
        .post_error("stream-muxer", "no surfaces available", true);
    let outcome = control.run(std::future::pending()).await;
    assert_eq!(outcome.severity, Severity::Error);
    assert_eq!(outcome.source.as_deref(), Some("stream-muxer"));
}

#[test]
fn test_config_file_overrides_graph() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[muxer]
width = 1280
height = 720
relay_push_timeout_us = 20000

[encoder]
relay_bitrate_kbps = 1500
"#
    )
    .unwrap();

    let config = PipelineConfig::load(file.path()).unwrap();
    let scenario = relay(&config);
    let muxer = scenario.graph.stage_by_name("stream-muxer").unwrap();
    assert_eq!(muxer.config().get_u64("width"), Some(1280));
    assert_eq!(muxer.config().get_u64("height"), Some(720));
    assert_eq!(muxer.config().get_u64("batched-push-timeout"), Some(20_000));

    let encoder = scenario.graph.stage_by_name("encoder").unwrap();
    assert_eq!(encoder.config().get_u64("bitrate"), Some(1_500_000));
}

#[test]
fn test_config_file_missing_or_invalid() {
    let dir = tempfile::tempdir().unwrap();
    assert!(PipelineConfig::load(dir.path().join("absent.toml")).is_err());

    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[muxer]\nwidth = -5\n").unwrap();
    assert!(PipelineConfig::load(&path).is_err());
}
