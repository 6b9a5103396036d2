//! Values exchanged with interpreter sessions.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A value crossing the host/interpreter boundary.
///
/// Primitives map onto their native literal syntax in every interpreter
/// family. Arrays and objects travel as `Json` and are rendered as the
/// family's list/dict equivalents.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// An explicit absent value (`None`, `NULL`, empty output).
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Structured data (arrays, objects, nested structures).
    Json(serde_json::Value),
}

impl Value {
    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the integer payload, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Interpret raw interpreter output.
    ///
    /// Empty output is `Null`. Output that parses as JSON becomes the
    /// corresponding value; anything else is kept verbatim as a string.
    pub fn from_output(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(json) => json_to_value(json),
            Err(_) => Value::String(trimmed.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        json_to_value(json)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Json(json) => write!(f, "{json}"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        value_to_json(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(json_to_value(json))
    }
}

/// Convert `serde_json::Value` into a [`Value`].
///
/// Arrays and objects are preserved as `Value::Json`.
pub fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                Value::String(n.to_string())
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => Value::Json(json),
    }
}

/// Convert a [`Value`] to `serde_json::Value`. NaN and infinities become null.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Json(json) => json.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_output_is_null() {
        assert_eq!(Value::from_output(""), Value::Null);
        assert_eq!(Value::from_output("  \n"), Value::Null);
    }

    #[test]
    fn json_output_is_structured() {
        assert_eq!(Value::from_output("2"), Value::Int(2));
        assert_eq!(Value::from_output("\"ok\""), Value::String("ok".into()));
        assert_eq!(Value::from_output("1.5"), Value::Float(1.5));
        let list = Value::from_output("[1, 2]");
        assert_eq!(list, Value::Json(serde_json::json!([1, 2])));
    }

    #[test]
    fn plain_text_output_is_string() {
        assert_eq!(
            Value::from_output("hello world\n"),
            Value::String("hello world".into())
        );
    }

    #[test]
    fn nan_serializes_as_null() {
        assert_eq!(value_to_json(&Value::Float(f64::NAN)), serde_json::Value::Null);
    }

    #[test]
    fn serde_uses_plain_json() {
        let value = Value::Json(serde_json::json!({"a": [1, true]}));
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(text, r#"{"a":[1,true]}"#);
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, value);
    }
}
