//! Launch-description parser using winnow.
//!
//! Parses linear graph descriptions:
//!
//! ```text
//! uridecodebin uri=rtsp://cam/stream ! nvstreammux name=mux batch-size=1 ! fakesink
//! v4l2src device=/dev/video0 ! video/x-raw, width=640, height=480 ! autovideosink
//! ```
//!
//! # Syntax
//!
//! - Stages are separated by `!`
//! - Options are `key=value` after the factory name
//! - `name=<id>` sets the stage name instead of configuring an option
//! - Values are quoted strings, numbers, booleans or bare words
//! - A bare caps string (`type/subtype, k=v`) becomes a `capsfilter`

use crate::error::{Error, Result};
use crate::format::Caps;
use winnow::Parser;
use winnow::ascii::{alpha1, digit1, multispace0};
use winnow::combinator::{alt, delimited, opt, repeat, separated};
use winnow::error::ContextError;
use winnow::token::{take_till, take_while};

type WResult<T> = std::result::Result<T, ContextError>;

/// Factory used for bare caps strings in a description.
pub const CAPS_FILTER: &str = "capsfilter";

/// A parsed stage with its factory and options.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedElement {
    /// Factory name (e.g. "nvstreammux", "x264enc").
    pub name: String,
    /// Options as key-value pairs, in description order.
    pub properties: Vec<(String, PropertyValue)>,
}

impl ParsedElement {
    /// Explicit stage name given with `name=`.
    pub fn stage_name(&self) -> Option<String> {
        self.properties
            .iter()
            .find(|(k, _)| k == "name")
            .map(|(_, v)| v.as_string())
    }

    /// Options other than `name`.
    pub fn options(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.properties
            .iter()
            .filter(|(k, _)| k != "name")
            .map(|(k, v)| (k.as_str(), v))
    }
}

/// An option value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A string value (quoted or unquoted).
    String(String),
    /// An integer value.
    Integer(i64),
    /// A floating-point value.
    Float(f64),
    /// A boolean value.
    Bool(bool),
}

impl PropertyValue {
    /// Get as a string, converting if necessary.
    pub fn as_string(&self) -> String {
        match self {
            PropertyValue::String(s) => s.clone(),
            PropertyValue::Integer(i) => i.to_string(),
            PropertyValue::Float(f) => f.to_string(),
            PropertyValue::Bool(b) => b.to_string(),
        }
    }

    /// Try to get as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get as a u64.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|i| u64::try_from(i).ok())
    }

    /// Try to get as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Integer(i) => Some(*i as f64),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            PropertyValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            PropertyValue::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<&String> for PropertyValue {
    fn from(value: &String) -> Self {
        PropertyValue::String(value.clone())
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

macro_rules! integer_property {
    ($($t:ty),*) => {
        $(
            impl From<$t> for PropertyValue {
                fn from(value: $t) -> Self {
                    PropertyValue::Integer(i64::from(value))
                }
            }
        )*
    };
}

integer_property!(i32, u32, i64);

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        // Values above i64::MAX keep their digits and fail integer checks.
        match i64::try_from(value) {
            Ok(v) => PropertyValue::Integer(v),
            Err(_) => PropertyValue::String(value.to_string()),
        }
    }
}

impl From<&Caps> for PropertyValue {
    fn from(value: &Caps) -> Self {
        PropertyValue::String(value.to_string())
    }
}

/// A parsed launch description.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPipeline {
    /// The stages in order from source to sink.
    pub elements: Vec<ParsedElement>,
}

/// Parse a launch description.
///
/// # Example
///
/// ```rust
/// use vidgraph::pipeline::parser::parse_pipeline;
///
/// let parsed = parse_pipeline("v4l2src device=/dev/video0 ! videoconvert ! autovideosink").unwrap();
/// assert_eq!(parsed.elements.len(), 3);
/// assert_eq!(parsed.elements[0].name, "v4l2src");
/// ```
pub fn parse_pipeline(input: &str) -> Result<ParsedPipeline> {
    pipeline
        .parse(input.trim())
        .map_err(|e| Error::Parse(format!("invalid launch description: {e}")))
}

fn pipeline(input: &mut &str) -> WResult<ParsedPipeline> {
    let elements = separated(1.., alt((caps_element, element)), link_separator).parse_next(input)?;

    multispace0.parse_next(input)?;
    if !input.is_empty() {
        return Err(ContextError::new());
    }

    Ok(ParsedPipeline { elements })
}

fn element(input: &mut &str) -> WResult<ParsedElement> {
    let _ = multispace0.parse_next(input)?;
    let name: &str = identifier.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;

    let properties: Vec<(String, PropertyValue)> = repeat(0.., property).parse_next(input)?;

    Ok(ParsedElement {
        name: name.to_string(),
        properties,
    })
}

/// A bare caps string such as `video/x-raw(memory:NVMM), format=I420`.
fn caps_element(input: &mut &str) -> WResult<ParsedElement> {
    let _ = multispace0.parse_next(input)?;
    let checkpoint = *input;

    let _ = identifier.parse_next(input)?;
    if !input.starts_with('/') {
        *input = checkpoint;
        return Err(ContextError::new());
    }
    *input = checkpoint;

    let text: &str = take_till(1.., '!').parse_next(input)?;
    let caps: Caps = match text.trim().parse() {
        Ok(caps) => caps,
        Err(_) => {
            *input = checkpoint;
            return Err(ContextError::new());
        }
    };

    Ok(ParsedElement {
        name: CAPS_FILTER.to_string(),
        properties: vec![("caps".to_string(), PropertyValue::from(&caps))],
    })
}

fn link_separator(input: &mut &str) -> WResult<()> {
    let _ = multispace0.parse_next(input)?;
    let _ = '!'.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    Ok(())
}

fn identifier<'a>(input: &mut &'a str) -> WResult<&'a str> {
    (
        alt((alpha1::<_, ContextError>, "_")),
        take_while(0.., |c: char| c.is_alphanumeric() || c == '_' || c == '-'),
    )
        .take()
        .parse_next(input)
}

fn property(input: &mut &str) -> WResult<(String, PropertyValue)> {
    let _ = multispace0.parse_next(input)?;

    // Only an identifier followed by `=` is an option; otherwise consume nothing.
    let checkpoint = *input;

    let key: &str = match identifier.parse_next(input) {
        Ok(k) => k,
        Err(_) => {
            *input = checkpoint;
            return Err(ContextError::new());
        }
    };

    let _ = multispace0.parse_next(input)?;

    if input.starts_with('=') {
        let _ = '='.parse_next(input)?;
    } else {
        *input = checkpoint;
        return Err(ContextError::new());
    }

    let _ = multispace0.parse_next(input)?;
    let value = property_value.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;

    Ok((key.to_string(), value))
}

fn property_value(input: &mut &str) -> WResult<PropertyValue> {
    alt((
        quoted_string.map(PropertyValue::String),
        boolean.map(PropertyValue::Bool),
        float.map(PropertyValue::Float),
        integer.map(PropertyValue::Integer),
        bare_string.map(PropertyValue::String),
    ))
    .parse_next(input)
}

fn quoted_string(input: &mut &str) -> WResult<String> {
    alt((
        delimited('"', take_till(0.., '"'), '"'),
        delimited('\'', take_till(0.., '\''), '\''),
    ))
    .map(|s: &str| s.to_string())
    .parse_next(input)
}

/// A boolean; must not be the prefix of a longer word.
fn boolean(input: &mut &str) -> WResult<bool> {
    let checkpoint = *input;
    let value = alt((
        "true".map(|_| true),
        "false".map(|_| false),
        "yes".map(|_| true),
        "no".map(|_| false),
    ))
    .parse_next(input)?;

    if input.starts_with(|c: char| !c.is_whitespace() && c != '!') {
        *input = checkpoint;
        return Err(ContextError::new());
    }
    Ok(value)
}

fn integer(input: &mut &str) -> WResult<i64> {
    let negative = opt('-').parse_next(input)?;
    let digits: &str = digit1.parse_next(input)?;

    // A trailing `.` means float; any other non-separator means a bare word.
    if input.starts_with(|c: char| !c.is_whitespace() && c != '!') {
        return Err(ContextError::new());
    }

    let value: i64 = digits.parse().map_err(|_| ContextError::new())?;

    Ok(if negative.is_some() { -value } else { value })
}

fn float(input: &mut &str) -> WResult<f64> {
    let negative = opt('-').parse_next(input)?;
    let int_part: &str = digit1.parse_next(input)?;
    let _ = '.'.parse_next(input)?;
    let frac_part: &str = digit1.parse_next(input)?;

    if input.starts_with(|c: char| !c.is_whitespace() && c != '!') {
        return Err(ContextError::new());
    }

    let s = format!(
        "{}{}.{}",
        if negative.is_some() { "-" } else { "" },
        int_part,
        frac_part
    );
    s.parse().map_err(|_| ContextError::new())
}

/// A bare value; stops at whitespace or `!`.
fn bare_string(input: &mut &str) -> WResult<String> {
    take_while(1.., |c: char| !c.is_whitespace() && c != '!')
        .map(|s: &str| s.to_string())
        .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_element() {
        let result = parse_pipeline("fakesink").unwrap();
        assert_eq!(result.elements.len(), 1);
        assert_eq!(result.elements[0].name, "fakesink");
        assert!(result.elements[0].properties.is_empty());
    }

    #[test]
    fn test_parse_chain() {
        let result = parse_pipeline("v4l2src ! videoconvert ! autovideosink").unwrap();
        let names: Vec<_> = result.elements.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["v4l2src", "videoconvert", "autovideosink"]);
    }

    #[test]
    fn test_parse_uri_option() {
        let result =
            parse_pipeline("uridecodebin uri=rtsp://10.0.0.5:554/live?ch=1 ! fakesink").unwrap();
        assert_eq!(
            result.elements[0].properties[0],
            (
                "uri".to_string(),
                PropertyValue::String("rtsp://10.0.0.5:554/live?ch=1".to_string())
            )
        );
    }

    #[test]
    fn test_parse_named_stage() {
        let result = parse_pipeline("nvstreammux name=mux batch-size=1 width=1920").unwrap();
        let mux = &result.elements[0];
        assert_eq!(mux.stage_name().as_deref(), Some("mux"));
        let options: Vec<_> = mux.options().map(|(k, _)| k).collect();
        assert_eq!(options, ["batch-size", "width"]);
    }

    #[test]
    fn test_parse_quoted_string() {
        let result =
            parse_pipeline(r#"nvinfer config-file-path="/opt/models/yolo v8.txt""#).unwrap();
        assert_eq!(
            result.elements[0].properties[0].1,
            PropertyValue::String("/opt/models/yolo v8.txt".to_string())
        );
    }

    #[test]
    fn test_parse_bare_caps_becomes_capsfilter() {
        let result = parse_pipeline(
            "nvvideoconvert ! video/x-raw(memory:NVMM), format=I420 ! nvv4l2h264enc",
        )
        .unwrap();
        assert_eq!(result.elements.len(), 3);
        let filter = &result.elements[1];
        assert_eq!(filter.name, CAPS_FILTER);
        let caps: Caps = filter.properties[0].1.as_string().parse().unwrap();
        assert!(caps.is_device_resident());
        assert_eq!(caps.field("format"), Some("I420"));
    }

    #[test]
    fn test_parse_typed_values() {
        let result =
            parse_pipeline("element sync=false offset=-100 rate=1.5 tune=zerolatency").unwrap();
        let props = &result.elements[0].properties;
        assert_eq!(props[0].1, PropertyValue::Bool(false));
        assert_eq!(props[1].1, PropertyValue::Integer(-100));
        assert_eq!(props[2].1, PropertyValue::Float(1.5));
        assert_eq!(props[3].1, PropertyValue::String("zerolatency".to_string()));
    }

    #[test]
    fn test_word_prefixed_by_boolean_stays_string() {
        let result = parse_pipeline("x264enc tune=normal").unwrap();
        assert_eq!(
            result.elements[0].properties[0].1,
            PropertyValue::String("normal".to_string())
        );
    }

    #[test]
    fn test_parse_no_spaces() {
        let result = parse_pipeline("a!b!c").unwrap();
        assert_eq!(result.elements.len(), 3);
    }

    #[test]
    fn test_property_value_conversions() {
        let int_val = PropertyValue::from(42u32);
        assert_eq!(int_val.as_i64(), Some(42));
        assert_eq!(int_val.as_f64(), Some(42.0));
        assert_eq!(int_val.as_string(), "42");

        let str_val = PropertyValue::from("100");
        assert_eq!(str_val.as_u64(), Some(100));

        assert_eq!(PropertyValue::from(u64::MAX).as_i64(), None);
        assert_eq!(PropertyValue::Integer(0).as_bool(), Some(false));
    }

    #[test]
    fn test_parse_empty_fails() {
        assert!(matches!(parse_pipeline(""), Err(Error::Parse(_))));
        assert!(parse_pipeline("!").is_err());
        assert!(parse_pipeline("a ! ! b").is_err());
    }
}
