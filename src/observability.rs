//! Tracing integration: subscriber setup and the spans the control path
//! runs under.
//!
//! Per-frame capture times are emitted under [`TIMESTAMP_TARGET`], so they
//! can be enabled on their own:
//!
//! ```text
//! RUST_LOG=warn,vidgraph::timestamp=info vidgraph rtsp-ai ...
//! ```
//!
//! [`TIMESTAMP_TARGET`]: crate::probe::TIMESTAMP_TARGET

use tracing::{Level, Span, span};
use tracing_subscriber::EnvFilter;

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Filter used when `RUST_LOG` is unset or invalid.
    pub default_directive: String,
    /// Print the event target.
    pub show_target: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".to_string(),
            show_target: true,
        }
    }
}

impl TracingConfig {
    /// Only warnings and errors, plus per-frame capture times.
    pub fn quiet() -> Self {
        Self {
            default_directive: format!("warn,{}=info", crate::probe::TIMESTAMP_TARGET),
            show_target: false,
        }
    }

    /// The filter this config resolves to, honouring `RUST_LOG`.
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))
    }
}

/// Install the global fmt subscriber.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(config: &TracingConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_target(config.show_target)
        .with_level(true)
        .try_init()
        .is_ok()
}

/// Span covering one graph's supervision.
#[inline]
pub fn span_pipeline(name: &str) -> Span {
    span!(Level::INFO, "pipeline", name = %name)
}

/// Span covering one stage's state change.
#[inline]
pub fn span_stage(pipeline: &str, stage: &str, factory: &str) -> Span {
    span!(
        Level::DEBUG,
        "stage",
        pipeline = %pipeline,
        stage = %stage,
        factory = %factory
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_keeps_timestamps() {
        let config = TracingConfig::quiet();
        assert!(config.default_directive.starts_with("warn"));
        assert!(config.default_directive.contains("vidgraph::timestamp=info"));
    }

    #[test]
    fn test_span_creation() {
        let _span = span_pipeline("test-pipeline");
        let _span = span_stage("test-pipeline", "encoder", "x264enc");
    }
}
