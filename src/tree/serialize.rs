//! Structural export of a record tree.
//!
//! Leaves map to their value. A node with children maps to an object of its
//! children; if it also holds an exportable value, that value is stored under
//! the `_` key. Absent nodes, opaque bytes with nothing derived from them and
//! empty containers are omitted.

use super::{RecordTree, ValueNode};
use crate::path::FieldPath;

use serde_json::{Map, Value as Json};

/// Key under which a node's own value is exported when it also has children.
pub const SELF_KEY: &str = "_";

impl RecordTree {
    pub fn to_json(&self) -> Json {
        node_to_json(self.root()).unwrap_or_else(|| Json::Object(Map::new()))
    }

    /// Export only the subtree at `path` (`None` if nothing exportable there).
    pub fn subtree_json(&self, path: &FieldPath) -> Option<Json> {
        match self.resolve(path) {
            super::Lookup::Present(node) => node_to_json(node),
            _ => None,
        }
    }
}

fn node_to_json(node: &ValueNode) -> Option<Json> {
    if node.is_absent() {
        return None;
    }

    let own = node.value().and_then(|v| v.to_json());

    let mut map = Map::new();
    for child in node.children() {
        if let Some(json) = node_to_json(child) {
            map.insert(child.name().to_string(), json);
        }
    }

    if map.is_empty() {
        return own;
    }
    if let Some(own) = own {
        map.insert(SELF_KEY.to_string(), own);
    }
    Some(Json::Object(map))
}
