use crate::enrich::FunctionId;
use crate::value::Value;

use std::sync::Arc;

/// What a node holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// Pure container for named children.
    Internal,
    /// Shared so path copies made by forks never duplicate the content.
    Value(Arc<Value>),
    /// Derivation ran and produced nothing. Everything below is absent too.
    Absent,
}

/// One addressable field. Children are shared with forks until written.
#[derive(Debug, Clone)]
pub struct ValueNode {
    pub(crate) name: String,
    pub(crate) slot: Slot,
    pub(crate) producer: Option<FunctionId>,
    pub(crate) is_multi: bool,
    pub(crate) children: Vec<Arc<ValueNode>>,
}

impl ValueNode {
    pub(crate) fn internal(name: &str) -> Self {
        Self {
            name: name.to_string(),
            slot: Slot::Internal,
            producer: None,
            is_multi: false,
            children: Vec::new(),
        }
    }

    pub(crate) fn leaf(name: &str, slot: Slot) -> Self {
        Self {
            slot,
            ..Self::internal(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot(&self) -> &Slot {
        &self.slot
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.slot {
            Slot::Value(v) => Some(v.as_ref()),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        self.slot == Slot::Absent
    }

    /// Set on nodes written as one of several fork siblings.
    pub fn is_multi(&self) -> bool {
        self.is_multi
    }

    /// Function that wrote this node, `None` for metadata and the payload.
    pub fn producer(&self) -> Option<FunctionId> {
        self.producer
    }

    /// Children in derivation order.
    pub fn children(&self) -> impl Iterator<Item = &ValueNode> {
        self.children.iter().map(|c| c.as_ref())
    }

    pub fn child(&self, name: &str) -> Option<&ValueNode> {
        self.children
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.as_ref())
    }

    pub(crate) fn child_index(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|c| c.name == name)
    }
}
