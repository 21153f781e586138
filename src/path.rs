//! Field paths addressing nodes inside a record tree.
//!
//! Example: "payload/body/string"  =>  FieldPath(vec!["payload", "body", "string"])
//!
//! Segments are stored as a Vec<String> and ordering is derived so paths can
//! be used as BTreeMap keys. The empty path addresses the root node.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Name of the root child holding the lazily fetched payload bytes.
pub const PAYLOAD: &str = "payload";

/// Name of the root child holding the original metadata fields.
pub const RECORD: &str = "record";

pub const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FieldPath(pub Vec<String>);

impl FieldPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn payload() -> Self {
        Self(vec![PAYLOAD.to_string()])
    }

    /// Path of a metadata field, e.g. `record/status`.
    pub fn record(field: &str) -> Self {
        Self(vec![RECORD.to_string(), field.to_string()])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_payload(&self) -> bool {
        self.0.len() == 1 && self.0[0] == PAYLOAD
    }

    /// True for a metadata field itself, e.g. `record/status`. Fields derived
    /// below one (`record/status/class`) are ordinary derived fields.
    pub fn is_record_field(&self) -> bool {
        self.0.len() == 2 && self.0[0] == RECORD
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Last segment, i.e. the field name of the addressed node.
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<FieldPath> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn child(&self, name: &str) -> FieldPath {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl FromStr for FieldPath {
    type Err = anyhow::Error;

    /// Parse "a/b/c". Leading/trailing separators are ignored; empty inner
    /// segments ("a//b") are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_matches(SEPARATOR);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for part in trimmed.split(SEPARATOR) {
            let p = part.trim();
            if p.is_empty() {
                anyhow::bail!("empty segment in field path {:?}", s);
            }
            segments.push(p.to_string());
        }
        Ok(Self(segments))
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
