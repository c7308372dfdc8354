//! Media type descriptors ("caps") negotiated on pads.
//!
//! A [`Caps`] value is a structure name (`video/x-raw`, `application/x-rtp`),
//! an optional set of memory features (`memory:NVMM`) and a list of fields.
//! The textual form follows the familiar caps-string layout:
//!
//! ```text
//! video/x-raw(memory:NVMM), format=I420, width=1920
//! application/x-rtp, media=video, encoding-name=MP4V-ES
//! ```

use crate::error::{Error, Result};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;
use winnow::Parser;
use winnow::ascii::multispace0;
use winnow::combinator::{alt, delimited, opt, repeat};
use winnow::error::ContextError;
use winnow::token::{take_till, take_while};

type WResult<T> = std::result::Result<T, ContextError>;

/// Feature tag for buffers resident in accelerator (NVMM) memory.
pub const FEATURE_DEVICE_MEMORY: &str = "memory:NVMM";

/// Feature tag for ordinary system memory.
pub const FEATURE_SYSTEM_MEMORY: &str = "memory:SystemMemory";

/// Primary category of a media type, derived from its structure name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaCategory {
    /// `video/...`
    Video,
    /// `audio/...`
    Audio,
    /// `application/...` (RTP, FLV, MPEG-TS, ...)
    Application,
    /// Anything else, including `ANY`.
    Other,
}

impl MediaCategory {
    fn of(name: &str) -> Self {
        match name.split('/').next() {
            Some("video") => Self::Video,
            Some("audio") => Self::Audio,
            Some("application") => Self::Application,
            _ => Self::Other,
        }
    }
}

/// Memory feature attached to a media type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CapsFeature {
    /// Plain host memory.
    SystemMemory,
    /// Hardware-resident buffer (`memory:NVMM`).
    DeviceMemory,
    /// Any other feature tag, kept verbatim.
    Other(String),
}

impl CapsFeature {
    /// Parse a feature tag.
    pub fn parse(tag: &str) -> Self {
        match tag.trim() {
            FEATURE_DEVICE_MEMORY => Self::DeviceMemory,
            FEATURE_SYSTEM_MEMORY => Self::SystemMemory,
            other => Self::Other(other.to_string()),
        }
    }

    /// The textual tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::SystemMemory => FEATURE_SYSTEM_MEMORY,
            Self::DeviceMemory => FEATURE_DEVICE_MEMORY,
            Self::Other(s) => s,
        }
    }
}

/// A negotiated or template media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caps {
    name: String,
    features: SmallVec<[CapsFeature; 1]>,
    fields: SmallVec<[(String, String); 4]>,
}

impl Caps {
    /// Create caps with the given structure name and no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            features: SmallVec::new(),
            fields: SmallVec::new(),
        }
    }

    /// Wildcard caps, compatible with everything.
    pub fn any() -> Self {
        Self::new("ANY")
    }

    /// Raw video in hardware-resident memory.
    pub fn device_video() -> Self {
        Self::new("video/x-raw").with_feature(CapsFeature::DeviceMemory)
    }

    /// Add a memory feature.
    pub fn with_feature(mut self, feature: CapsFeature) -> Self {
        if !self.features.contains(&feature) {
            self.features.push(feature);
        }
        self
    }

    /// Add or replace a field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
        self
    }

    /// Structure name, e.g. `video/x-raw`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Primary category.
    pub fn category(&self) -> MediaCategory {
        MediaCategory::of(&self.name)
    }

    /// Whether this is the `ANY` wildcard.
    pub fn is_any(&self) -> bool {
        self.name == "ANY"
    }

    /// Declared memory features.
    pub fn features(&self) -> &[CapsFeature] {
        &self.features
    }

    /// Whether the given feature is present.
    pub fn has_feature(&self, feature: &CapsFeature) -> bool {
        self.features.contains(feature)
    }

    /// Whether buffers of this type live in accelerator memory.
    pub fn is_device_resident(&self) -> bool {
        self.has_feature(&CapsFeature::DeviceMemory)
    }

    /// Look up a field value.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Check compatibility (can data flow between these types?).
    ///
    /// Two descriptors are compatible if either is `ANY`, or they share the
    /// structure name and memory features and agree on every field both
    /// declare. Fields set on only one side are unconstrained.
    pub fn compatible(&self, other: &Caps) -> bool {
        if self.is_any() || other.is_any() {
            return true;
        }
        if self.name != other.name || !self.same_memory(other) {
            return false;
        }
        self.fields
            .iter()
            .all(|(k, v)| other.field(k).is_none_or(|o| o == v))
    }

    /// The common refinement of two compatible descriptors.
    ///
    /// `ANY` yields the other side. Otherwise the result carries the union
    /// of both field sets, ordered by field name, so the outcome does not
    /// depend on argument order. Returns `None` if the two are incompatible.
    pub fn intersect(&self, other: &Caps) -> Option<Caps> {
        if self.is_any() {
            return Some(other.clone());
        }
        if other.is_any() {
            return Some(self.clone());
        }
        if !self.compatible(other) {
            return None;
        }

        let mut merged = self.clone();
        if merged.features.is_empty() {
            merged.features = other.features.clone();
        }
        for (k, v) in &other.fields {
            if merged.field(k).is_none() {
                merged.fields.push((k.clone(), v.clone()));
            }
        }
        merged.fields.sort_by(|a, b| a.0.cmp(&b.0));
        Some(merged)
    }

    fn same_memory(&self, other: &Caps) -> bool {
        let mine = self.effective_features();
        let theirs = other.effective_features();
        mine.iter().all(|f| theirs.contains(f)) && theirs.iter().all(|f| mine.contains(f))
    }

    fn effective_features(&self) -> SmallVec<[CapsFeature; 1]> {
        if self.features.is_empty() {
            smallvec::smallvec![CapsFeature::SystemMemory]
        } else {
            self.features.clone()
        }
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.features.is_empty() {
            f.write_str("(")?;
            for (i, feature) in self.features.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                f.write_str(feature.as_str())?;
            }
            f.write_str(")")?;
        }
        for (k, v) in &self.fields {
            write!(f, ", {}={}", k, v)?;
        }
        Ok(())
    }
}

impl FromStr for Caps {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        caps.parse(s.trim())
            .map_err(|e| Error::Parse(format!("invalid caps '{s}': {e}")))
    }
}

fn caps(input: &mut &str) -> WResult<Caps> {
    let name: &str = structure_name.parse_next(input)?;
    let features: Option<&str> = opt(feature_list).parse_next(input)?;
    let fields: Vec<(String, String)> = repeat(0.., field).parse_next(input)?;

    multispace0.parse_next(input)?;
    if !input.is_empty() {
        return Err(ContextError::new());
    }

    let mut caps = Caps::new(name);
    if let Some(list) = features {
        for tag in list.split(',').filter(|t| !t.trim().is_empty()) {
            caps = caps.with_feature(CapsFeature::parse(tag));
        }
    }
    for (k, v) in fields {
        caps = caps.with_field(k, v);
    }
    Ok(caps)
}

fn structure_name<'a>(input: &mut &'a str) -> WResult<&'a str> {
    take_while(1.., |c: char| {
        c.is_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '+')
    })
    .parse_next(input)
}

fn feature_list<'a>(input: &mut &'a str) -> WResult<&'a str> {
    delimited('(', take_till(0.., ')'), ')').parse_next(input)
}

fn field_key<'a>(input: &mut &'a str) -> WResult<&'a str> {
    take_while(1.., |c: char| c.is_alphanumeric() || c == '-' || c == '_').parse_next(input)
}

/// GStreamer-style type annotation, e.g. `(string)`.
fn type_cast<'a>(input: &mut &'a str) -> WResult<&'a str> {
    delimited('(', take_till(0.., ')'), ')').parse_next(input)
}

fn field_value<'a>(input: &mut &'a str) -> WResult<&'a str> {
    alt((
        delimited('"', take_till(0.., '"'), '"'),
        take_while(1.., |c: char| c != ',' && !c.is_whitespace()),
    ))
    .parse_next(input)
}

fn field(input: &mut &str) -> WResult<(String, String)> {
    multispace0.parse_next(input)?;
    ','.parse_next(input)?;
    multispace0.parse_next(input)?;
    let key: &str = field_key.parse_next(input)?;
    multispace0.parse_next(input)?;
    '='.parse_next(input)?;
    multispace0.parse_next(input)?;
    let _cast: Option<&str> = opt(type_cast).parse_next(input)?;
    let value: &str = field_value.parse_next(input)?;
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_caps() {
        let caps: Caps = "video/x-raw(memory:NVMM), format=I420".parse().unwrap();
        assert_eq!(caps.name(), "video/x-raw");
        assert_eq!(caps.category(), MediaCategory::Video);
        assert!(caps.is_device_resident());
        assert_eq!(caps.field("format"), Some("I420"));
    }

    #[test]
    fn test_parse_typed_and_quoted_fields() {
        let caps: Caps = r#"application/x-rtp, media=(string)video, encoding-name="MP4V-ES""#
            .parse()
            .unwrap();
        assert_eq!(caps.category(), MediaCategory::Application);
        assert_eq!(caps.field("media"), Some("video"));
        assert_eq!(caps.field("encoding-name"), Some("MP4V-ES"));
    }

    #[test]
    fn test_parse_bare_name() {
        let caps: Caps = "audio/x-raw".parse().unwrap();
        assert_eq!(caps.category(), MediaCategory::Audio);
        assert!(caps.features().is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Caps>().is_err());
        assert!("video/x-raw, =broken".parse::<Caps>().is_err());
    }

    #[test]
    fn test_display_roundtrip_shape() {
        let caps = Caps::device_video().with_field("format", "NV12");
        assert_eq!(caps.to_string(), "video/x-raw(memory:NVMM), format=NV12");
    }

    #[test]
    fn test_compatibility() {
        let nvmm = Caps::device_video();
        let nvmm_i420 = Caps::device_video().with_field("format", "I420");
        let nvmm_nv12 = Caps::device_video().with_field("format", "NV12");
        let sys = Caps::new("video/x-raw");

        assert!(nvmm.compatible(&nvmm_i420));
        assert!(!nvmm_i420.compatible(&nvmm_nv12));
        assert!(!nvmm.compatible(&sys));
        assert!(Caps::any().compatible(&sys));
        assert!(sys.compatible(&Caps::any()));
        assert!(!sys.compatible(&Caps::new("audio/x-raw")));
    }

    #[test]
    fn test_intersect_merges_fields() {
        let sized: Caps = "video/x-raw(memory:NVMM), width=1920, height=1080".parse().unwrap();
        let formatted: Caps = "video/x-raw(memory:NVMM), format=NV12".parse().unwrap();

        let merged = sized.intersect(&formatted).unwrap();
        assert_eq!(merged.field("format"), Some("NV12"));
        assert_eq!(merged.field("width"), Some("1920"));
        assert_eq!(merged.field("height"), Some("1080"));
        assert!(merged.is_device_resident());
        assert_eq!(formatted.intersect(&sized), Some(merged));

        assert_eq!(Caps::any().intersect(&formatted), Some(formatted.clone()));
        let i420: Caps = "video/x-raw(memory:NVMM), format=I420".parse().unwrap();
        assert!(formatted.intersect(&i420).is_none());
    }

    #[test]
    fn test_system_memory_feature_matches_plain() {
        let explicit = Caps::new("video/x-raw").with_feature(CapsFeature::SystemMemory);
        assert!(explicit.compatible(&Caps::new("video/x-raw")));
    }
}
