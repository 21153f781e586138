//! Values carried by record tree nodes.

use serde_json::Value as Json;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    /// Opaque payload bytes. Shared so forks never copy the content.
    Bytes(Arc<[u8]>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_bytes(&self) -> bool {
        matches!(self, Value::Bytes(_))
    }

    /// Structural export. Opaque bytes and non-finite floats have no
    /// structural form and yield `None`.
    pub fn to_json(&self) -> Option<Json> {
        match self {
            Value::Bool(b) => Some(Json::Bool(*b)),
            Value::Int(i) => Some(Json::from(*i)),
            // NaN and infinities have no JSON form and are omitted like bytes.
            Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number),
            Value::Text(s) => Some(Json::String(s.clone())),
            Value::List(items) => Some(Json::Array(
                items.iter().filter_map(Value::to_json).collect(),
            )),
            Value::Bytes(_) => None,
        }
    }

    /// Flat text rendering for delimited export. Lists are joined with ','.
    pub fn to_flat(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::List(items) => items
                .iter()
                .map(Value::to_flat)
                .collect::<Vec<_>>()
                .join(","),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(Arc::from(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn bytes_have_no_structural_form() {
        assert_eq!(Value::from(b"abc".to_vec()).to_json(), None);
        assert_eq!(Value::from(b"abc".to_vec()).to_flat(), "<3 bytes>");
    }

    #[test]
    fn non_finite_floats_are_omitted_not_nulled() {
        assert_eq!(Value::Float(f64::NAN).to_json(), None);
        assert_eq!(Value::Float(f64::INFINITY).to_json(), None);
        assert_eq!(Value::Float(1.5).to_json(), Some(json!(1.5)));
        let v = Value::List(vec![Value::Float(f64::NAN), Value::Int(1)]);
        assert_eq!(v.to_json(), Some(json!([1])));
    }

    #[test]
    fn lists_export_nested() {
        let v = Value::List(vec![Value::from("a"), Value::Int(2)]);
        assert_eq!(v.to_json(), Some(json!(["a", 2])));
        assert_eq!(v.to_flat(), "a,2");
    }
}
