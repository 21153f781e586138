//! Enrich functions: declarative derivation steps.
//!
//! A function names the field it depends on, the field it produces below
//! that dependency, and whether it yields one value or forks the record into
//! one tree per output value. Functions are plain data, cheap to clone, and
//! identified by a [`FunctionId`] that survives cloning but not rebinding.

pub mod builtins;

use crate::context::RootContext;
use crate::path::FieldPath;
use crate::value::Value;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pure mapping from a dependency value to zero or more outputs.
///
/// Must be deterministic for a given input and root context; the engine
/// caches its result and never calls it twice for the same field.
pub type Derive = Arc<dyn Fn(&Value, &RootContext) -> Vec<Value> + Send + Sync>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one function definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionId(u64);

impl FunctionId {
    fn fresh() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplicity {
    /// At most one output; written in place.
    Single,
    /// Any number of outputs; each one forks the record.
    Multi,
}

#[derive(Clone)]
pub struct EnrichFunction {
    id: FunctionId,
    name: String,
    dependency: FieldPath,
    multiplicity: Multiplicity,
    derive: Derive,
}

impl EnrichFunction {
    /// Single-valued function depending on the payload. Returning `None`
    /// marks the field absent.
    pub fn single<F>(name: &str, derive: F) -> Self
    where
        F: Fn(&Value, &RootContext) -> Option<Value> + Send + Sync + 'static,
    {
        Self::raw(
            name,
            Multiplicity::Single,
            Arc::new(move |v: &Value, ctx: &RootContext| -> Vec<Value> {
                derive(v, ctx).into_iter().collect()
            }),
        )
    }

    /// Multi-valued function depending on the payload.
    pub fn multi<F>(name: &str, derive: F) -> Self
    where
        F: Fn(&Value, &RootContext) -> Vec<Value> + Send + Sync + 'static,
    {
        Self::raw(name, Multiplicity::Multi, Arc::new(derive))
    }

    /// Build from an already type-erased derive body.
    pub fn raw(name: &str, multiplicity: Multiplicity, derive: Derive) -> Self {
        Self {
            id: FunctionId::fresh(),
            name: name.to_string(),
            dependency: FieldPath::payload(),
            multiplicity,
            derive,
        }
    }

    /// Rebind to another dependency. The result is a new definition.
    pub fn on(mut self, dependency: FieldPath) -> Self {
        self.dependency = dependency;
        self.id = FunctionId::fresh();
        self
    }

    /// Chain after `upstream`: depend on the field it produces.
    pub fn after(self, upstream: &EnrichFunction) -> Self {
        self.on(upstream.result_path())
    }

    /// Rename the produced field. The result is a new definition.
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self.id = FunctionId::fresh();
        self
    }

    pub fn id(&self) -> FunctionId {
        self.id
    }

    /// Name of the produced field.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependency(&self) -> &FieldPath {
        &self.dependency
    }

    pub fn multiplicity(&self) -> Multiplicity {
        self.multiplicity
    }

    pub fn is_multi(&self) -> bool {
        self.multiplicity == Multiplicity::Multi
    }

    /// Where the output lands: `dependency/name`.
    pub fn result_path(&self) -> FieldPath {
        self.dependency.child(&self.name)
    }

    pub fn derive(&self, input: &Value, ctx: &RootContext) -> Vec<Value> {
        (self.derive)(input, ctx)
    }
}

impl fmt::Debug for EnrichFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrichFunction")
            .field("id", &self.id)
            .field("result", &self.result_path().to_string())
            .field("multiplicity", &self.multiplicity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper() -> EnrichFunction {
        EnrichFunction::single("upper", |v, _| v.as_str().map(|s| Value::text(s.to_uppercase())))
    }

    #[test]
    fn defaults_to_payload_dependency() {
        let f = upper();
        assert!(f.dependency().is_payload());
        assert_eq!(f.result_path().to_string(), "payload/upper");
        assert_eq!(f.multiplicity(), Multiplicity::Single);
    }

    #[test]
    fn clones_keep_identity_rebinding_does_not() {
        let f = upper();
        assert_eq!(f.clone().id(), f.id());

        let g = f.clone().on(FieldPath::record("mime"));
        assert_ne!(g.id(), f.id());
        assert_eq!(g.result_path().to_string(), "record/mime/upper");

        let h = upper().after(&g).named("again");
        assert_eq!(h.result_path().to_string(), "record/mime/upper/again");
    }

    #[test]
    fn single_maps_none_to_no_outputs() {
        let f = upper();
        let ctx = RootContext::new(
            crate::cdx::parse_cdx_line("a 2020 b - - - - - - - -").unwrap(),
        );
        assert!(f.derive(&Value::Int(1), &ctx).is_empty());
        assert_eq!(f.derive(&Value::from("x"), &ctx), vec![Value::from("X")]);
    }
}
