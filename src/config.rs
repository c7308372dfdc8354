//! Pipeline configuration.
//!
//! Defaults reproduce the stock capture and streaming setup. Any subset of
//! fields can be overridden from a TOML file:
//!
//! ```toml
//! [muxer]
//! width = 1280
//! height = 720
//!
//! [encoder]
//! integrated_gpu = true
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Batching stage.
    pub muxer: MuxerConfig,
    /// Network source buffering.
    pub source: SourceConfig,
    /// Encoder tuning.
    pub encoder: EncoderConfig,
    /// On-screen display.
    pub osd: OsdConfig,
    /// Local capture device.
    pub capture: CaptureConfig,
}

impl PipelineConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Batching stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxerConfig {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Frames per batch.
    pub batch_size: u32,
    /// Batch push timeout for inference graphs, in microseconds.
    pub inference_push_timeout_us: u32,
    /// Batch push timeout for relay graphs, in microseconds.
    pub relay_push_timeout_us: u32,
    /// Surfaces in the output pool, set by the relay graph.
    pub buffer_pool_size: u32,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            batch_size: 1,
            inference_push_timeout_us: 33_000,
            relay_push_timeout_us: 10_000,
            buffer_pool_size: 8,
        }
    }
}

/// Source buffering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Network buffer size in bytes.
    pub buffer_size: u64,
    /// Buffered duration in nanoseconds.
    pub buffer_duration_ns: u64,
    /// Jitter buffer of the direct RTSP receiver, in milliseconds.
    pub rtsp_latency_ms: u32,
    /// Allowed RTSP lower transports as a bitmask (4 = TCP only).
    pub rtsp_protocols: u32,
    /// Jitter buffer mode; 0 disables buffering.
    pub rtsp_buffer_mode: u32,
    /// Connection attempts before the receiver gives up.
    pub rtsp_retry: u32,
    /// Receive timeout in microseconds.
    pub rtsp_timeout_us: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            buffer_duration_ns: 500_000_000,
            rtsp_latency_ms: 0,
            rtsp_protocols: 4,
            rtsp_buffer_mode: 0,
            rtsp_retry: 10,
            rtsp_timeout_us: 5_000_000,
        }
    }
}

/// Encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Default bitrate for inference graphs, in bit/s.
    pub inference_bitrate_bps: u64,
    /// Default bitrate for relay and capture graphs, in kbit/s.
    pub relay_bitrate_kbps: u64,
    /// Running on an integrated GPU (Jetson), which needs extra encoder options.
    pub integrated_gpu: bool,
    /// Software encoder speed preset.
    pub speed_preset: String,
    /// Software encoder tuning.
    pub tune: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            inference_bitrate_bps: 4_000_000,
            relay_bitrate_kbps: 2000,
            integrated_gpu: false,
            speed_preset: "medium".to_string(),
            tune: "zerolatency".to_string(),
        }
    }
}

/// On-screen display settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsdConfig {
    /// Processing mode (0 = CPU, 1 = GPU).
    pub process_mode: i64,
    /// Whether labels are drawn (0 or 1).
    pub display_text: i64,
}

impl Default for OsdConfig {
    fn default() -> Self {
        Self {
            process_mode: 0,
            display_text: 1,
        }
    }
}

/// Local capture defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Frame width.
    pub width: u32,
    /// Frame height.
    pub height: u32,
    /// Frames per second.
    pub fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.muxer.width, 1920);
        assert_eq!(config.muxer.inference_push_timeout_us, 33_000);
        assert_eq!(config.source.buffer_size, 4096);
        assert_eq!(config.source.rtsp_protocols, 4);
        assert_eq!(config.source.rtsp_timeout_us, 5_000_000);
        assert_eq!(config.encoder.relay_bitrate_kbps, 2000);
        assert_eq!(config.capture.fps, 30);
    }

    #[test]
    fn test_partial_override() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [muxer]
            width = 1280

            [encoder]
            integrated_gpu = true
            "#,
        )
        .unwrap();
        assert_eq!(config.muxer.width, 1280);
        assert_eq!(config.muxer.height, 1080);
        assert!(config.encoder.integrated_gpu);
        assert_eq!(config.encoder.tune, "zerolatency");
    }

    #[test]
    fn test_rejects_bad_types() {
        let err = PipelineConfig::from_toml_str("[muxer]\nwidth = \"wide\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = PipelineConfig::default();
        config.osd.process_mode = 1;
        let text = config.to_toml_string().unwrap();
        assert_eq!(PipelineConfig::from_toml_str(&text).unwrap(), config);
    }
}
