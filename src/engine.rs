//! Derivation engine: lazy, cached, fork-aware field resolution.
//!
//! Materializing a field works backward through its dependency chain until a
//! cached value (or the payload, or a metadata field) is found, then derives
//! forward, writing every intermediate result into the tree. Trees are taken
//! by reference and copied on write, so a failed derivation leaves the
//! caller's tree untouched and retryable.

use crate::diagnostics;
use crate::enrich::{EnrichFunction, Multiplicity};
use crate::error::{ConfigError, DerivationError};
use crate::path::FieldPath;
use crate::pipeline::Pipeline;
use crate::store::PayloadStore;
use crate::tree::{Lookup, RecordTree, Slot};
use crate::value::Value;

use std::sync::Arc;

type Result<T> = std::result::Result<T, DerivationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPresence {
    Present,
    /// Not an error: the chain ran and produced nothing for this record.
    Absent,
}

/// One output stream position of a materialization.
#[derive(Debug, Clone)]
pub struct Derived {
    pub tree: RecordTree,
    pub presence: FieldPresence,
}

impl Derived {
    fn present(tree: RecordTree) -> Self {
        Self {
            tree,
            presence: FieldPresence::Present,
        }
    }

    fn absent(tree: RecordTree) -> Self {
        Self {
            tree,
            presence: FieldPresence::Absent,
        }
    }

    pub fn is_present(&self) -> bool {
        self.presence == FieldPresence::Present
    }
}

/// Resolves fields of record trees against one pipeline and payload store.
///
/// Holds no per-record state; one engine may serve any number of trees, and
/// distinct trees may be materialized concurrently.
#[derive(Clone, Copy)]
pub struct Engine<'a> {
    pipeline: &'a Pipeline,
    store: &'a dyn PayloadStore,
}

impl<'a> Engine<'a> {
    pub fn new(pipeline: &'a Pipeline, store: &'a dyn PayloadStore) -> Self {
        Self { pipeline, store }
    }

    pub fn pipeline(&self) -> &'a Pipeline {
        self.pipeline
    }

    /// Materialize the output of `f` on `tree`.
    ///
    /// Returns one `Derived` per resulting stream position: a single one
    /// unless `f` or something upstream of it is multi-valued and forked.
    ///
    /// On success `tree` keeps everything derived before the last fork (all
    /// of it when nothing forked), so asking again does not recompute. On
    /// error `tree` is left as it was.
    pub fn materialize(&self, tree: &mut RecordTree, f: &EnrichFunction) -> Result<Vec<Derived>> {
        self.pipeline.check_registered(f)?;
        let mut shared = None;
        let out = self.derive_field(tree.clone(), f, &mut shared)?;
        if let Some(prefix) = shared {
            *tree = prefix;
        }
        Ok(out)
    }

    /// Materialize whatever lives at `path`: the payload, a metadata field or
    /// the output of a registered function. Writes back like [`Self::materialize`].
    pub fn materialize_path(&self, tree: &mut RecordTree, path: &FieldPath) -> Result<Vec<Derived>> {
        let mut shared = None;
        let out = self.resolve(tree.clone(), path, &mut shared)?;
        if let Some(prefix) = shared {
            *tree = prefix;
        }
        Ok(out)
    }

    fn resolve(
        &self,
        tree: RecordTree,
        path: &FieldPath,
        shared: &mut Option<RecordTree>,
    ) -> Result<Vec<Derived>> {
        let out = self.resolve_uncached(tree, path, shared)?;
        Ok(settle(out, shared))
    }

    fn resolve_uncached(
        &self,
        mut tree: RecordTree,
        path: &FieldPath,
        shared: &mut Option<RecordTree>,
    ) -> Result<Vec<Derived>> {
        match tree.resolve(path) {
            Lookup::Absent => return Ok(vec![Derived::absent(tree)]),
            Lookup::Present(node) if node.value().is_some() => {
                return Ok(vec![Derived::present(tree)]);
            }
            _ => {}
        }

        if path.is_payload() {
            let bytes = tree.context().payload(self.store)?;
            tree.write(path, Slot::Value(Arc::new(Value::Bytes(bytes))), None, false);
            return Ok(vec![Derived::present(tree)]);
        }

        if path.is_record_field() {
            // Metadata is complete at construction; a missing field stays missing.
            tree.mark_absent(path);
            return Ok(vec![Derived::absent(tree)]);
        }

        let f = self
            .pipeline
            .producer(path)
            .ok_or_else(|| ConfigError::UnknownField(path.clone()))?;
        self.derive_field(tree, f, shared)
    }

    fn derive_field(
        &self,
        tree: RecordTree,
        f: &EnrichFunction,
        shared: &mut Option<RecordTree>,
    ) -> Result<Vec<Derived>> {
        let target = f.result_path();

        // 1) Cache check.
        match tree.resolve(&target) {
            Lookup::Absent => {
                tracing::trace!(field = %target, "cached absence");
                return Ok(settle(vec![Derived::absent(tree)], shared));
            }
            Lookup::Present(node) if node.producer().is_some() || node.value().is_some() => {
                if node.producer() != Some(f.id()) {
                    return Err(ConfigError::NameCollision {
                        path: target.clone(),
                        first: match node.producer() {
                            Some(id) => format!("function {}", id),
                            None => "a direct write".to_string(),
                        },
                        second: format!("{} {}", f.name(), f.id()),
                    }
                    .into());
                }
                tracing::trace!(field = %target, "cache hit");
                return Ok(settle(vec![Derived::present(tree)], shared));
            }
            _ => {}
        }

        // 2) Dependency, possibly forking upstream.
        let upstream = self.resolve(tree, f.dependency(), shared)?;

        // 3-5) Derive per upstream position.
        let mut out = Vec::with_capacity(upstream.len());
        for d in upstream {
            if d.is_present() {
                out.extend(self.apply(d.tree, f)?);
            } else {
                out.push(d);
            }
        }
        Ok(settle(out, shared))
    }

    /// Run `f` on a tree whose dependency is resolved and write its output.
    fn apply(&self, mut tree: RecordTree, f: &EnrichFunction) -> Result<Vec<Derived>> {
        let target = f.result_path();

        let mut outputs = match tree.get(f.dependency()) {
            Some(input) => f.derive(input, tree.context()),
            // Container without a value of its own: nothing to derive from.
            None => Vec::new(),
        };

        match (f.multiplicity(), outputs.len()) {
            (_, 0) => {
                tree.mark_absent(&target);
                Ok(vec![Derived::absent(tree)])
            }
            (Multiplicity::Single, 1) => {
                let value = outputs.remove(0);
                tree.write(&target, Slot::Value(Arc::new(value)), Some(f.id()), false);
                Ok(vec![Derived::present(tree)])
            }
            (Multiplicity::Single, count) => Err(DerivationError::ContractViolation {
                function: target.to_string(),
                count,
            }),
            (Multiplicity::Multi, count) => {
                tracing::debug!(field = %target, count, "fork");
                let mut forks = Vec::with_capacity(count);
                for value in outputs {
                    let mut fork = tree.clone();
                    fork.write(&target, Slot::Value(Arc::new(value)), Some(f.id()), true);
                    forks.push(Derived::present(fork));
                }
                Ok(forks)
            }
        }
    }

    /// Apply `f` to every tree of a collection, flattening forks.
    ///
    /// Trees whose payload cannot be fetched are dropped from the output with
    /// a warning; the rest proceed. Trees where the field is absent are kept.
    /// Input trees keep their shared prefix as with [`Self::materialize`].
    pub fn enrich_collection(
        &self,
        trees: &mut [RecordTree],
        f: &EnrichFunction,
    ) -> Result<Vec<RecordTree>> {
        self.pipeline.check_registered(f)?;
        self.collect(trees, &f.result_path(), |tree, shared| {
            self.derive_field(tree, f, shared)
        })
    }

    /// Like [`Self::enrich_collection`] for any resolvable path, including
    /// the payload and metadata fields.
    pub fn enrich_collection_path(
        &self,
        trees: &mut [RecordTree],
        path: &FieldPath,
    ) -> Result<Vec<RecordTree>> {
        self.collect(trees, path, |tree, shared| self.resolve(tree, path, shared))
    }

    fn collect<F>(&self, trees: &mut [RecordTree], field: &FieldPath, mut derive: F) -> Result<Vec<RecordTree>>
    where
        F: FnMut(RecordTree, &mut Option<RecordTree>) -> Result<Vec<Derived>>,
    {
        let input = trees.len();
        let mut out = Vec::with_capacity(input);
        let mut excluded = 0usize;
        for tree in trees.iter_mut() {
            let mut shared = None;
            match derive(tree.clone(), &mut shared) {
                Ok(derived) => {
                    if let Some(prefix) = shared {
                        *tree = prefix;
                    }
                    out.extend(derived.into_iter().map(|d| d.tree));
                }
                Err(DerivationError::Fetch(err)) => {
                    excluded += 1;
                    diagnostics::warn(format!(
                        "excluding record {} {}: {}",
                        tree.original().timestamp,
                        tree.original().original_url,
                        err
                    ));
                }
                Err(err) => return Err(err),
            }
        }

        tracing::debug!(
            field = %field,
            input,
            output = out.len(),
            excluded,
            "collection enriched"
        );
        Ok(out)
    }
}

/// Remember the latest single-position state as the caller's shared prefix.
fn settle(out: Vec<Derived>, shared: &mut Option<RecordTree>) -> Vec<Derived> {
    if let [only] = out.as_slice() {
        *shared = Some(only.tree.clone());
    }
    out
}

/// Keep only trees where `path` holds a value.
pub fn filter_present(trees: Vec<RecordTree>, path: &FieldPath) -> Vec<RecordTree> {
    trees.into_iter().filter(|t| t.get(path).is_some()).collect()
}

/// Values at `path` across a collection, skipping trees without one.
pub fn values_of(trees: &[RecordTree], path: &FieldPath) -> Vec<Value> {
    trees.iter().filter_map(|t| t.get(path).cloned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdx::{CdxRecord, Locator, parse_cdx_line};
    use crate::enrich::builtins;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(filename: &str) -> CdxRecord {
        parse_cdx_line(&format!(
            "org,example)/ 20200101000000 http://example.org/ text/html 200 D - - 11 0 {}",
            filename
        ))
        .unwrap()
    }

    fn store(payloads: &[(&str, &str)]) -> MemoryStore {
        let mut store = MemoryStore::new();
        for (filename, body) in payloads {
            store.insert(
                Locator {
                    filename: filename.to_string(),
                    offset: 0,
                    length: 11,
                },
                body.as_bytes().to_vec(),
            );
        }
        store
    }

    fn p(s: &str) -> FieldPath {
        s.parse().unwrap()
    }

    /// `string` -> `lowercase` -> multi `terms`, each with a call counter.
    struct Chain {
        pipeline: Pipeline,
        text: EnrichFunction,
        lower: EnrichFunction,
        terms: EnrichFunction,
        lower_calls: Arc<AtomicUsize>,
    }

    fn chain() -> Chain {
        let lower_calls = Arc::new(AtomicUsize::new(0));
        let calls = lower_calls.clone();

        let text = builtins::utf8();
        let lower = EnrichFunction::single("lowercase", move |v, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            v.as_str().map(|s| Value::text(s.to_lowercase()))
        })
        .after(&text);
        let terms = builtins::words(Multiplicity::Multi).after(&lower);

        let pipeline = Pipeline::builder()
            .add(text.clone())
            .add(lower.clone())
            .add(terms.clone())
            .build()
            .unwrap();
        Chain {
            pipeline,
            text,
            lower,
            terms,
            lower_calls,
        }
    }

    #[test]
    fn caches_every_intermediate_and_computes_once() {
        let c = chain();
        let store = store(&[("a.warc", "HELLO WORLD")]);
        let engine = Engine::new(&c.pipeline, &store);
        let mut tree = RecordTree::new(record("a.warc"));

        let first = engine.materialize(&mut tree, &c.lower).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(tree.get(&c.text.result_path()), Some(&Value::from("HELLO WORLD")));
        assert_eq!(tree.get(&c.lower.result_path()), Some(&Value::from("hello world")));

        let again = engine.materialize(&mut tree, &c.lower).unwrap();
        assert_eq!(again.len(), 1);
        assert!(again[0].is_present());
        assert_eq!(
            again[0].tree.get(&c.lower.result_path()),
            first[0].tree.get(&c.lower.result_path())
        );
        assert_eq!(c.lower_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.fetch_count(), 1);
    }

    #[test]
    fn multi_forks_share_root_and_fetch_once() {
        let c = chain();
        let store = store(&[("a.warc", "HELLO WORLD")]);
        let engine = Engine::new(&c.pipeline, &store);
        let mut tree = RecordTree::new(record("a.warc"));

        let forks = engine.materialize(&mut tree, &c.terms).unwrap();
        let terms: Vec<Value> = forks
            .iter()
            .map(|d| d.tree.get(&c.terms.result_path()).unwrap().clone())
            .collect();
        assert_eq!(terms, vec![Value::from("hello"), Value::from("world")]);

        for d in &forks {
            assert!(d.is_present());
            assert!(Arc::ptr_eq(d.tree.context().original(), tree.context().original()));
            assert_eq!(d.tree.get(&p("record/status")), Some(&Value::Int(200)));
            let node = match d.tree.resolve(&c.terms.result_path()) {
                Lookup::Present(n) => n,
                other => panic!("unexpected {:?}", other),
            };
            assert!(node.is_multi());
        }
        // Shared prefix was derived once, before the fork.
        assert!(forks[0].tree.shares_node(&forks[1].tree, &p("record")));
        assert_eq!(forks[0].tree.get(&c.text.result_path()), Some(&Value::from("HELLO WORLD")));
        assert_eq!(c.lower_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.fetch_count(), 1);

        // The caller keeps the prefix shared by all forks, not the forks.
        assert_eq!(tree.get(&c.lower.result_path()), Some(&Value::from("hello world")));
        assert!(matches!(tree.resolve(&c.terms.result_path()), Lookup::NotCached));
        engine.materialize(&mut tree, &c.lower).unwrap();
        assert_eq!(c.lower_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_multi_result_is_absent_not_forked_away() {
        let c = chain();
        let store = store(&[("a.warc", "  ,,  !!  ")]);
        let engine = Engine::new(&c.pipeline, &store);

        let out = engine.materialize(&mut RecordTree::new(record("a.warc")), &c.terms).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].presence, FieldPresence::Absent);
        assert!(out[0].tree.resolve(&c.terms.result_path()).is_absent());
    }

    #[test]
    fn absence_propagates_without_invoking_derive() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let redirect_host = EnrichFunction::single("host", move |v, _| {
            counted.fetch_add(1, Ordering::SeqCst);
            v.as_str().map(Value::from)
        })
        .on(FieldPath::record("redirect_url"));
        let upper = EnrichFunction::single("upper", |v, _| {
            v.as_str().map(|s| Value::text(s.to_uppercase()))
        })
        .after(&redirect_host);

        let pipeline = Pipeline::builder()
            .add(redirect_host.clone())
            .add(upper.clone())
            .build()
            .unwrap();
        let store = MemoryStore::new();
        let engine = Engine::new(&pipeline, &store);

        let out = engine.materialize(&mut RecordTree::new(record("a.warc")), &upper).unwrap();
        assert_eq!(out[0].presence, FieldPresence::Absent);
        assert!(out[0].tree.resolve(&upper.result_path()).is_absent());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.fetch_count(), 0);
    }

    #[test]
    fn derive_reads_root_context() {
        let status_class = EnrichFunction::single("class", |_, ctx| {
            ctx.original().status.map(|s| Value::Int(i64::from(s / 100)))
        })
        .on(FieldPath::record("mime"));
        let pipeline = Pipeline::builder().add(status_class.clone()).build().unwrap();
        let store = MemoryStore::new();
        let engine = Engine::new(&pipeline, &store);

        let out = engine
            .materialize(&mut RecordTree::new(record("a.warc")), &status_class)
            .unwrap();
        assert_eq!(out[0].tree.get(&p("record/mime/class")), Some(&Value::Int(2)));
    }

    #[test]
    fn fetch_error_leaves_tree_retryable() {
        let c = chain();
        let store = store(&[("a.warc", "HELLO WORLD")]);
        let engine = Engine::new(&c.pipeline, &store);
        let mut tree = RecordTree::new(record("a.warc"));

        store.set_failing(true);
        let err = engine.materialize(&mut tree, &c.lower).unwrap_err();
        assert!(err.is_fetch());
        assert!(matches!(tree.resolve(&FieldPath::payload()), Lookup::NotCached));
        assert_eq!(c.lower_calls.load(Ordering::SeqCst), 0);

        store.set_failing(false);
        let out = engine.materialize(&mut tree, &c.lower).unwrap();
        assert_eq!(out[0].tree.get(&c.lower.result_path()), Some(&Value::from("hello world")));
    }

    #[test]
    fn rejects_unregistered_and_colliding_functions() {
        let c = chain();
        let store = store(&[("a.warc", "HELLO WORLD")]);
        let engine = Engine::new(&c.pipeline, &store);
        let mut tree = RecordTree::new(record("a.warc"));

        let impostor = builtins::lowercase().after(&c.text);
        assert!(matches!(
            engine.materialize(&mut tree, &impostor),
            Err(DerivationError::Config(ConfigError::NameCollision { .. }))
        ));
        assert!(matches!(
            engine.materialize(&mut tree, &builtins::distinct()),
            Err(DerivationError::Config(ConfigError::Unregistered(_)))
        ));
    }

    #[test]
    fn cached_field_from_another_instance_is_a_collision() {
        let c = chain();
        let store = store(&[("a.warc", "HELLO WORLD")]);
        let engine = Engine::new(&c.pipeline, &store);
        let mut carried = RecordTree::new(record("a.warc"));
        engine.materialize(&mut carried, &c.lower).unwrap();

        // Same output path, different definition, registered elsewhere.
        let other = builtins::lowercase().after(&c.text);
        let other_pipeline = Pipeline::builder()
            .add(c.text.clone())
            .add(other.clone())
            .build()
            .unwrap();
        let other_engine = Engine::new(&other_pipeline, &store);
        assert!(matches!(
            other_engine.materialize(&mut carried, &other),
            Err(DerivationError::Config(ConfigError::NameCollision { .. }))
        ));
    }

    #[test]
    fn single_function_returning_many_is_a_contract_violation() {
        let bad = EnrichFunction::raw(
            "bad",
            Multiplicity::Single,
            Arc::new(|_: &Value, _: &crate::context::RootContext| vec![Value::Int(1), Value::Int(2)]),
        )
        .on(FieldPath::record("mime"));
        let pipeline = Pipeline::builder().add(bad.clone()).build().unwrap();
        let store = MemoryStore::new();
        let engine = Engine::new(&pipeline, &store);

        assert!(matches!(
            engine.materialize(&mut RecordTree::new(record("a.warc")), &bad),
            Err(DerivationError::ContractViolation { count: 2, .. })
        ));
    }

    #[test]
    fn materialize_path_resolves_sources_and_outputs() {
        let c = chain();
        let store = store(&[("a.warc", "HELLO WORLD")]);
        let engine = Engine::new(&c.pipeline, &store);
        let mut tree = RecordTree::new(record("a.warc"));

        let payload = engine.materialize_path(&mut tree, &FieldPath::payload()).unwrap();
        assert_eq!(
            payload[0].tree.get(&FieldPath::payload()).and_then(Value::as_bytes),
            Some(&b"HELLO WORLD"[..])
        );
        let missing = engine.materialize_path(&mut tree, &FieldPath::record("meta")).unwrap();
        assert_eq!(missing[0].presence, FieldPresence::Absent);
        assert!(matches!(
            engine.materialize_path(&mut tree, &p("payload/nothing")),
            Err(DerivationError::Config(ConfigError::UnknownField(_)))
        ));
        let lowered = engine.materialize_path(&mut tree, &c.lower.result_path()).unwrap();
        assert!(lowered[0].is_present());
    }

    #[test]
    fn collection_excludes_failed_fetches_and_flattens_forks() {
        let c = chain();
        let store = store(&[("a.warc", "HELLO WORLD"), ("b.warc", "ONE")]);
        let engine = Engine::new(&c.pipeline, &store);
        let mut trees = vec![
            RecordTree::new(record("a.warc")),
            RecordTree::new(record("missing.warc")),
            RecordTree::new(record("b.warc")),
        ];

        let out = engine.enrich_collection(&mut trees, &c.terms).unwrap();
        assert_eq!(
            values_of(&out, &c.terms.result_path()),
            vec![Value::from("hello"), Value::from("world"), Value::from("one")]
        );
        assert_eq!(filter_present(out, &c.terms.result_path()).len(), 3);

        assert_eq!(trees[0].get(&c.lower.result_path()), Some(&Value::from("hello world")));
        assert!(matches!(trees[1].resolve(&FieldPath::payload()), Lookup::NotCached));
        engine.enrich_collection(&mut trees, &c.terms).unwrap();
        assert_eq!(c.lower_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn collection_by_path_covers_payload_and_metadata() {
        let c = chain();
        let store = store(&[("a.warc", "HELLO WORLD")]);
        let engine = Engine::new(&c.pipeline, &store);
        let mut trees = vec![RecordTree::new(record("a.warc"))];

        let out = engine.enrich_collection_path(&mut trees, &FieldPath::payload()).unwrap();
        assert_eq!(
            out[0].get(&FieldPath::payload()).and_then(Value::as_bytes),
            Some(&b"HELLO WORLD"[..])
        );
        assert!(trees[0].get(&FieldPath::payload()).is_some());

        let out = engine
            .enrich_collection_path(&mut trees, &FieldPath::record("status"))
            .unwrap();
        assert_eq!(values_of(&out, &FieldPath::record("status")), vec![Value::Int(200)]);
        assert_eq!(store.fetch_count(), 1);
    }
}
