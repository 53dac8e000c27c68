//! Detector parameter bags.
//!
//! Detectors are configured through a flat key/value mapping whose values are
//! dynamically typed scalars. External collaborators (settings UI, config
//! files) write into the bag; detectors read it back through a typed accessor
//! with a default value at the start of every detection pass. Unknown keys
//! are ignored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A dynamically typed scalar parameter value.
///
/// Serialization is untagged so a parameter bag round-trips as plain JSON
/// (`{"sensitivity": 75, "contrast": 0.3, "useGabor": true}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
}

impl ParamValue {
    /// Returns the value as f64 if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as i64 if it is numeric (floats are truncated).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// Conversion from a [`ParamValue`] into a concrete parameter type.
///
/// Numeric conversions coerce between integer and float representations so a
/// config file may write `5` where a detector reads an `f64`.
pub trait FromParamValue: Sized {
    /// Attempts the conversion, returning `None` on a type mismatch.
    fn from_value(value: &ParamValue) -> Option<Self>;
}

impl FromParamValue for bool {
    fn from_value(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromParamValue for i64 {
    fn from_value(value: &ParamValue) -> Option<Self> {
        value.as_i64()
    }
}

impl FromParamValue for i32 {
    fn from_value(value: &ParamValue) -> Option<Self> {
        value.as_i64().map(|v| v as i32)
    }
}

impl FromParamValue for u32 {
    fn from_value(value: &ParamValue) -> Option<Self> {
        value.as_i64().and_then(|v| u32::try_from(v).ok())
    }
}

impl FromParamValue for f64 {
    fn from_value(value: &ParamValue) -> Option<Self> {
        value.as_f64()
    }
}

impl FromParamValue for f32 {
    fn from_value(value: &ParamValue) -> Option<Self> {
        value.as_f64().map(|v| v as f32)
    }
}

impl FromParamValue for String {
    fn from_value(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Text(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// A flat key/value parameter bag.
///
/// Keys use the external camelCase convention (`minLength`, `useGabor`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamMap(pub BTreeMap<String, ParamValue>);

impl ParamMap {
    /// Creates an empty parameter bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any previous value for the key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the raw value for a key.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    /// Typed accessor with a default: returns the stored value converted to
    /// `T`, or `default` when the key is absent or has an incompatible type.
    pub fn get_or<T: FromParamValue>(&self, key: &str, default: T) -> T {
        self.0
            .get(key)
            .and_then(T::from_value)
            .unwrap_or(default)
    }

    /// Returns true when the bag holds no parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, ParamValue)> for ParamMap {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessor_returns_default_for_missing_and_mismatched_keys() {
        let mut params = ParamMap::new();
        params.set("sensitivity", 80);
        params.set("name", "gauge");

        assert_eq!(params.get_or("sensitivity", 75i64), 80);
        assert_eq!(params.get_or("missing", 75i64), 75);
        // Text cannot convert to integer, fall back to the default.
        assert_eq!(params.get_or("name", 3i64), 3);
    }

    #[test]
    fn numeric_coercion_between_int_and_float() {
        let mut params = ParamMap::new();
        params.set("tolerance", 2i64);
        params.set("minArea", 20.0);

        assert_eq!(params.get_or("tolerance", 0.0f64), 2.0);
        assert_eq!(params.get_or("minArea", 0i64), 20);
    }

    #[test]
    fn json_round_trip_preserves_types() {
        let mut params = ParamMap::new();
        params.set("useGabor", true);
        params.set("threshold", 80);
        params.set("contrast", 0.3);
        params.set("modelPath", "models/det.onnx");

        let json = serde_json::to_string(&params).unwrap();
        let back: ParamMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
        assert!(back.get_or("useGabor", false));
        assert_eq!(back.get_or("contrast", 0.0), 0.3);
    }
}
