//! Payload checks applied before a trace is streamed.

use serde_json::{Map, Value};

/// Checks traces and layouts before they are written to a stream.
///
/// Errors are plain messages; the caller wraps them with the trace type.
pub trait Validator: Send + Sync {
    /// Checks that `trace` is a well-formed trace of `trace_type`.
    fn validate(&self, trace: &Map<String, Value>, trace_type: &str) -> Result<(), String>;

    /// Checks that `trace` only uses attributes the server can stream.
    fn validate_stream(&self, trace: &Map<String, Value>, trace_type: &str)
        -> Result<(), String>;

    /// Checks a layout object sent alongside a trace.
    fn validate_layout(&self, layout: &Value) -> Result<(), String>;
}

const TRACE_TYPES: &[&str] = &[
    "scatter",
    "scattergl",
    "bar",
    "box",
    "heatmap",
    "contour",
    "histogram",
    "histogram2d",
    "histogram2dcontour",
    "area",
    "pie",
    "scatter3d",
    "surface",
    "mesh3d",
    "scattergeo",
    "choropleth",
];

const STREAMABLE_TYPES: &[&str] = &[
    "scatter",
    "bar",
    "box",
    "heatmap",
    "contour",
    "histogram",
    "histogram2d",
    "histogram2dcontour",
    "area",
    "scatter3d",
    "surface",
];

const STREAMABLE_KEYS: &[&str] = &[
    "x", "y", "z", "r", "t", "text", "name", "marker", "line", "opacity", "visible",
];

const DATA_KEYS: &[&str] = &["x", "y", "z", "r", "t", "text"];
const STYLE_KEYS: &[&str] = &["marker", "line"];

/// Default validator: known trace types, array-or-scalar data fields and
/// object-valued style fields; streaming is limited to a fixed attribute set.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamableValidator;

impl Validator for StreamableValidator {
    fn validate(&self, trace: &Map<String, Value>, trace_type: &str) -> Result<(), String> {
        if !TRACE_TYPES.contains(&trace_type) {
            return Err(format!("'{trace_type}' is not a known trace type"));
        }
        for key in DATA_KEYS {
            if let Some(Value::Object(_)) = trace.get(*key) {
                return Err(format!("'{key}' must be a value or an array, not an object"));
            }
        }
        for key in STYLE_KEYS {
            match trace.get(*key) {
                None | Some(Value::Object(_)) => {}
                Some(_) => return Err(format!("'{key}' must be an object")),
            }
        }
        Ok(())
    }

    fn validate_stream(
        &self,
        trace: &Map<String, Value>,
        trace_type: &str,
    ) -> Result<(), String> {
        if !STREAMABLE_TYPES.contains(&trace_type) {
            return Err(format!("'{trace_type}' traces cannot be streamed"));
        }
        let mut rejected: Vec<&str> = trace
            .keys()
            .map(String::as_str)
            .filter(|key| !STREAMABLE_KEYS.contains(key))
            .collect();
        if rejected.is_empty() {
            return Ok(());
        }
        rejected.sort_unstable();
        Err(format!("attributes not streamable: {}", rejected.join(", ")))
    }

    fn validate_layout(&self, layout: &Value) -> Result<(), String> {
        match layout {
            Value::Object(_) => Ok(()),
            _ => Err("layout must be an object".to_owned()),
        }
    }
}
