//! Lazy enrichment of archived web records.
//!
//! A [`RecordTree`] wraps one CDX index record. Fields below it are produced
//! on demand by [`EnrichFunction`]s registered in a [`Pipeline`]; the
//! [`Engine`] resolves dependency chains, fetches the payload at most once
//! per record and caches every intermediate field in the tree.

pub mod cdx;
pub mod context;
pub mod dedup;
pub mod diagnostics;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod export;
pub mod path;
pub mod pipeline;
pub mod store;
pub mod tree;
pub mod value;

pub use cdx::{CdxRecord, Locator};
pub use context::RootContext;
pub use engine::{Derived, Engine, FieldPresence};
pub use enrich::{Derive, EnrichFunction, FunctionId, Multiplicity};
pub use error::{ConfigError, DerivationError, FetchError};
pub use path::FieldPath;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineSpec};
pub use store::{FileStore, MemoryStore, PayloadStore};
pub use tree::{Lookup, RecordTree, ValueNode};
pub use value::Value;

pub type Result<T> = anyhow::Result<T>;
