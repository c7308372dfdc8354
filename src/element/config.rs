//! Stage configuration validated against a kind-specific schema.

use super::StageKind;
use crate::error::{Error, Result};
use crate::format::Caps;
use crate::pipeline::parser::PropertyValue;
use std::collections::BTreeMap;

/// Codec selections accepted by encoders.
pub const CODECS: &[&str] = &["H264", "H265"];

const SPEED_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

/// Type expected for a configuration option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Free-form string (addresses, URIs, paths).
    Str,
    /// Integer greater than zero.
    PositiveInt,
    /// Any integer.
    Int,
    /// Boolean.
    Bool,
    /// A caps string such as `video/x-raw(memory:NVMM), format=I420`.
    Caps,
    /// One of a fixed set of names (case-insensitive).
    Choice(&'static [&'static str]),
}

/// One entry in a stage kind's schema.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    /// Option name.
    pub name: &'static str,
    /// Expected value type.
    pub kind: ValueKind,
}

const fn opt(name: &'static str, kind: ValueKind) -> OptionSpec {
    OptionSpec { name, kind }
}

const SOURCE: &[OptionSpec] = &[
    opt("location", ValueKind::Str),
    opt("uri", ValueKind::Str),
    opt("device", ValueKind::Str),
    opt("buffer-size", ValueKind::PositiveInt),
    opt("buffer-duration", ValueKind::PositiveInt),
    opt("latency", ValueKind::Int),
    opt("protocols", ValueKind::Int),
    opt("buffer-mode", ValueKind::Int),
    opt("retry", ValueKind::Int),
    opt("timeout", ValueKind::PositiveInt),
    opt("do-timestamp", ValueKind::Bool),
];

const DECODER: &[OptionSpec] = &[
    opt("uri", ValueKind::Str),
    opt("buffer-size", ValueKind::PositiveInt),
    opt("buffer-duration", ValueKind::PositiveInt),
    opt("codec", ValueKind::Choice(CODECS)),
];

const CONVERTER: &[OptionSpec] = &[
    opt("caps", ValueKind::Caps),
    opt("config-interval", ValueKind::Int),
];

const INFERENCE: &[OptionSpec] = &[
    opt("config-file-path", ValueKind::Str),
    opt("batch-size", ValueKind::PositiveInt),
    opt("unique-id", ValueKind::Int),
];

const OVERLAY: &[OptionSpec] = &[
    opt("process-mode", ValueKind::Int),
    opt("display-text", ValueKind::Int),
];

const ENCODER: &[OptionSpec] = &[
    opt("bitrate", ValueKind::PositiveInt),
    opt("codec", ValueKind::Choice(CODECS)),
    opt("preset", ValueKind::Int),
    opt("rc-mode", ValueKind::Int),
    opt("preset-level", ValueKind::Int),
    opt("insert-sps-pps", ValueKind::Int),
    opt("iframeinterval", ValueKind::PositiveInt),
    opt("speed-preset", ValueKind::Choice(SPEED_PRESETS)),
    opt("tune", ValueKind::Str),
];

const MUXER: &[OptionSpec] = &[
    opt("width", ValueKind::PositiveInt),
    opt("height", ValueKind::PositiveInt),
    opt("batch-size", ValueKind::PositiveInt),
    opt("batched-push-timeout", ValueKind::PositiveInt),
    opt("buffer-pool-size", ValueKind::PositiveInt),
    opt("attach-sys-ts", ValueKind::Int),
    opt("live-source", ValueKind::Int),
    opt("streamable", ValueKind::Bool),
];

const SINK: &[OptionSpec] = &[
    opt("location", ValueKind::Str),
    opt("buffer-size", ValueKind::PositiveInt),
    opt("sync", ValueKind::Bool),
    opt("async", ValueKind::Bool),
    opt("latency", ValueKind::Int),
];

const COMPOSITE: &[OptionSpec] = &[
    opt("uri", ValueKind::Str),
    opt("buffer-size", ValueKind::PositiveInt),
    opt("buffer-duration", ValueKind::PositiveInt),
];

/// Schema of options recognised by a stage kind.
pub fn schema(kind: StageKind) -> &'static [OptionSpec] {
    match kind {
        StageKind::Source => SOURCE,
        StageKind::Decoder => DECODER,
        StageKind::Converter => CONVERTER,
        StageKind::Inference => INFERENCE,
        StageKind::OverlayRender => OVERLAY,
        StageKind::Encoder => ENCODER,
        StageKind::Muxer => MUXER,
        StageKind::Sink => SINK,
        StageKind::CompositeBin => COMPOSITE,
    }
}

/// Option name → value mapping for one stage.
#[derive(Debug, Clone)]
pub struct StageConfig {
    kind: StageKind,
    values: BTreeMap<String, PropertyValue>,
}

impl StageConfig {
    /// Empty configuration for a stage kind.
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            values: BTreeMap::new(),
        }
    }

    /// Set an option, rejecting names outside the schema and mistyped values.
    pub fn set(&mut self, key: &str, value: impl Into<PropertyValue>) -> Result<()> {
        let value = value.into();
        let spec = schema(self.kind)
            .iter()
            .find(|s| s.name == key)
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown option '{}' for {} stage",
                    key,
                    self.kind.as_str()
                ))
            })?;
        check(spec, &value)?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    /// Raw value of an option.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.values.get(key)
    }

    /// Option as a string.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).map(PropertyValue::as_string)
    }

    /// Option as an unsigned integer.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(PropertyValue::as_u64)
    }

    /// Option as a boolean.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(PropertyValue::as_bool)
    }

    /// Iterate over configured options in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of configured options.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing is configured.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn check(spec: &OptionSpec, value: &PropertyValue) -> Result<()> {
    let ok = match spec.kind {
        ValueKind::Str => true,
        ValueKind::PositiveInt => value.as_i64().is_some_and(|v| v > 0),
        ValueKind::Int => value.as_i64().is_some(),
        ValueKind::Bool => value.as_bool().is_some(),
        ValueKind::Caps => value.as_string().parse::<Caps>().is_ok(),
        ValueKind::Choice(choices) => {
            let s = value.as_string();
            choices.iter().any(|c| c.eq_ignore_ascii_case(&s))
        }
    };
    if ok {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "option '{}' expects {:?}, got '{}'",
            spec.name,
            spec.kind,
            value.as_string()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_schema() {
        let mut config = StageConfig::new(StageKind::Encoder);
        config.set("bitrate", 4_000_000u64).unwrap();
        config.set("codec", "h265").unwrap();
        assert_eq!(config.get_u64("bitrate"), Some(4_000_000));
        assert_eq!(config.len(), 2);
    }

    #[test]
    fn test_rejects_non_positive_bitrate() {
        let mut config = StageConfig::new(StageKind::Encoder);
        assert!(config.set("bitrate", 0i64).is_err());
        assert!(config.set("bitrate", "fast").is_err());
        assert!(config.is_empty());
    }

    #[test]
    fn test_rejects_unknown_option() {
        let mut config = StageConfig::new(StageKind::Sink);
        let err = config.set("bitrate", 100i64).unwrap_err();
        assert!(err.to_string().contains("unknown option 'bitrate'"));
    }

    #[test]
    fn test_rejects_unknown_codec() {
        let mut config = StageConfig::new(StageKind::Encoder);
        assert!(config.set("codec", "VP9").is_err());
    }

    #[test]
    fn test_caps_option_must_parse() {
        let mut config = StageConfig::new(StageKind::Converter);
        config
            .set("caps", "video/x-raw(memory:NVMM), format=I420")
            .unwrap();
        assert!(config.set("caps", "").is_err());
    }
}
