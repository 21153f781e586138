//! Record trees: the nested value structure rooted at one CDX record.
//!
//! Nodes are reference-counted and copied on write, so cloning a tree (a
//! fork) is O(1) and a later write copies only the spine from the root to the
//! written node. Siblings of a fork keep sharing everything they did not
//! write.

mod node;
mod serialize;

pub use node::{Slot, ValueNode};

use crate::cdx::CdxRecord;
use crate::context::RootContext;
use crate::enrich::FunctionId;
use crate::path::{FieldPath, RECORD};
use crate::value::Value;

use std::sync::Arc;

/// Result of a path lookup.
#[derive(Debug, Clone, Copy)]
pub enum Lookup<'a> {
    Present(&'a ValueNode),
    /// The path or one of its ancestors was marked absent.
    Absent,
    NotCached,
}

impl Lookup<'_> {
    pub fn is_present(&self) -> bool {
        matches!(self, Lookup::Present(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Lookup::Absent)
    }
}

#[derive(Debug, Clone)]
pub struct RecordTree {
    root: Arc<ValueNode>,
    context: RootContext,
}

impl RecordTree {
    /// Wrap a metadata record. Its fields become leaves under `record`.
    pub fn new(record: CdxRecord) -> Self {
        let mut root = ValueNode::internal("");
        let mut meta = ValueNode::internal(RECORD);
        for (name, value) in record.fields() {
            meta.children
                .push(Arc::new(ValueNode::leaf(name, Slot::Value(Arc::new(value)))));
        }
        root.children.push(Arc::new(meta));

        Self {
            root: Arc::new(root),
            context: RootContext::new(record),
        }
    }

    pub fn context(&self) -> &RootContext {
        &self.context
    }

    pub fn original(&self) -> &CdxRecord {
        self.context.original()
    }

    pub fn root(&self) -> &ValueNode {
        &self.root
    }

    pub fn resolve(&self, path: &FieldPath) -> Lookup<'_> {
        let mut node: &ValueNode = &self.root;
        for seg in path.segments() {
            if node.is_absent() {
                return Lookup::Absent;
            }
            match node.child(seg) {
                Some(child) => node = child,
                None => return Lookup::NotCached,
            }
        }
        if node.is_absent() {
            Lookup::Absent
        } else {
            Lookup::Present(node)
        }
    }

    /// Value at `path`, if one was materialized there.
    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        match self.resolve(path) {
            Lookup::Present(node) => node.value(),
            _ => None,
        }
    }

    /// Insert a value, creating missing intermediate nodes.
    ///
    /// Returns false (and leaves the tree untouched) if a value or absence
    /// marker already exists at `path`, or if an ancestor is absent.
    pub fn set(&mut self, path: &FieldPath, value: Value) -> bool {
        self.write(path, Slot::Value(Arc::new(value)), None, false)
    }

    /// Record that `path` has no value for this record.
    pub fn mark_absent(&mut self, path: &FieldPath) -> bool {
        self.write(path, Slot::Absent, None, false)
    }

    pub(crate) fn write(
        &mut self,
        path: &FieldPath,
        slot: Slot,
        producer: Option<FunctionId>,
        is_multi: bool,
    ) -> bool {
        if path.is_root() || !self.writable(path) {
            return false;
        }
        write_at(
            Arc::make_mut(&mut self.root),
            path.segments(),
            slot,
            producer,
            is_multi,
        );
        true
    }

    fn writable(&self, path: &FieldPath) -> bool {
        match self.resolve(path) {
            Lookup::NotCached => true,
            Lookup::Absent => false,
            // Implicit intermediates may still receive their own value once.
            Lookup::Present(node) => *node.slot() == Slot::Internal && node.producer().is_none(),
        }
    }

    /// Paths of every node holding a value, in depth-first derivation order.
    pub fn value_paths(&self) -> Vec<FieldPath> {
        fn walk(node: &ValueNode, here: &FieldPath, out: &mut Vec<FieldPath>) {
            for child in node.children() {
                if child.is_absent() {
                    continue;
                }
                let path = here.child(child.name());
                if child.value().is_some() {
                    out.push(path.clone());
                }
                walk(child, &path, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &FieldPath::root(), &mut out);
        out
    }

    /// True if both trees still share the node at `path` (same allocation).
    pub fn shares_node(&self, other: &RecordTree, path: &FieldPath) -> bool {
        match (self.resolve(path), other.resolve(path)) {
            (Lookup::Present(a), Lookup::Present(b)) => std::ptr::eq(a, b),
            _ => false,
        }
    }
}

fn write_at(
    parent: &mut ValueNode,
    segments: &[String],
    slot: Slot,
    producer: Option<FunctionId>,
    is_multi: bool,
) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    let idx = match parent.child_index(head) {
        Some(i) => i,
        None => {
            parent.children.push(Arc::new(ValueNode::internal(head)));
            parent.children.len() - 1
        }
    };
    let child = Arc::make_mut(&mut parent.children[idx]);
    if rest.is_empty() {
        child.slot = slot;
        child.producer = producer;
        child.is_multi = is_multi;
    } else {
        write_at(child, rest, slot, producer, is_multi);
    }
}
