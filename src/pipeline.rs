//! Pipeline assembly: a validated registry of enrich functions.
//!
//! Pipelines are built either in code through [`PipelineBuilder`] or from a
//! JSON file through [`PipelineSpec`]:
//! {
//!   "steps": [
//!     { "name": "body",      "function": "http_body" },
//!     { "name": "string",    "function": "utf8",      "on": "payload/body" },
//!     { "name": "lowercase", "function": "lowercase", "on": "payload/body/string" },
//!     { "name": "terms",     "function": "words",     "on": "payload/body/string/lowercase", "multi": true },
//!     { "name": "links",     "function": "regex",     "on": "payload/body/string",
//!       "pattern": "href=\"([^\"]+)\"", "group": 1, "multi": true }
//!   ]
//! }
//!
//! Every dependency must be the payload, a metadata field (`record/...`) or
//! the output of another step; each output path has exactly one producer.

use crate::Result;
use crate::diagnostics;
use crate::enrich::{EnrichFunction, Multiplicity, builtins};
use crate::error::ConfigError;
use crate::path::{FieldPath, SEPARATOR};

use anyhow::Context;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;

#[derive(Debug, Clone)]
pub struct Pipeline {
    functions: Vec<EnrichFunction>,
    by_path: BTreeMap<FieldPath, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    functions: Vec<EnrichFunction>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, f: EnrichFunction) -> Self {
        self.functions.push(f);
        self
    }

    pub fn push(&mut self, f: EnrichFunction) {
        self.functions.push(f);
    }

    /// Index functions by output path and check that every dependency chain
    /// bottoms out at the payload or a metadata field.
    pub fn build(self) -> std::result::Result<Pipeline, ConfigError> {
        // Phase 1: one producer per output path. Registering the same
        // definition twice is harmless.
        let mut functions: Vec<EnrichFunction> = Vec::new();
        let mut by_path: BTreeMap<FieldPath, usize> = BTreeMap::new();
        for f in self.functions {
            if f.dependency().is_root() {
                return Err(ConfigError::InvalidStep {
                    step: f.name().to_string(),
                    message: "cannot depend on the tree root".to_string(),
                });
            }
            if f.name().is_empty() || f.name().contains(SEPARATOR) {
                return Err(ConfigError::InvalidStep {
                    step: f.name().to_string(),
                    message: "result name must be a single non-empty segment".to_string(),
                });
            }

            let path = f.result_path();
            if let Some(&idx) = by_path.get(&path) {
                let prev = &functions[idx];
                if prev.id() == f.id() {
                    continue;
                }
                return Err(ConfigError::NameCollision {
                    path,
                    first: format!("{} {}", prev.name(), prev.id()),
                    second: format!("{} {}", f.name(), f.id()),
                });
            }
            by_path.insert(path, functions.len());
            functions.push(f);
        }

        // Phase 2: every dependency is declared somewhere.
        for f in &functions {
            let dep = f.dependency();
            if dep.is_payload() || dep.is_record_field() || by_path.contains_key(dep) {
                continue;
            }
            return Err(ConfigError::UnknownDependency {
                step: f.name().to_string(),
                dependency: dep.clone(),
            });
        }

        // Result paths strictly extend their dependency, so the graph is
        // acyclic by construction.
        tracing::debug!(steps = functions.len(), "pipeline assembled");

        Ok(Pipeline { functions, by_path })
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Registration order.
    pub fn functions(&self) -> &[EnrichFunction] {
        &self.functions
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Function producing `path`, if any.
    pub fn producer(&self, path: &FieldPath) -> Option<&EnrichFunction> {
        self.by_path.get(path).map(|&i| &self.functions[i])
    }

    /// Check `f` is the registered producer of its output path.
    pub fn check_registered(&self, f: &EnrichFunction) -> std::result::Result<(), ConfigError> {
        match self.producer(&f.result_path()) {
            Some(registered) if registered.id() == f.id() => Ok(()),
            Some(registered) => Err(ConfigError::NameCollision {
                path: f.result_path(),
                first: format!("{} {}", registered.name(), registered.id()),
                second: format!("{} {}", f.name(), f.id()),
            }),
            None => Err(ConfigError::Unregistered(f.result_path().to_string())),
        }
    }

    /// The producers needed to reach `path`, upstream first.
    pub fn chain(&self, path: &FieldPath) -> std::result::Result<Vec<&EnrichFunction>, ConfigError> {
        let mut out = Vec::new();
        let mut cur = path.clone();
        loop {
            if cur.is_payload() || cur.is_record_field() {
                break;
            }
            let f = self
                .producer(&cur)
                .ok_or_else(|| ConfigError::UnknownField(cur.clone()))?;
            out.push(f);
            cur = f.dependency().clone();
        }
        out.reverse();
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// JSON pipeline files
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSpec {
    #[serde(default)]
    pub steps: Vec<RawStep>,
}

/// Raw step shape as it appears in pipeline.json.
#[derive(Debug, Clone, Deserialize)]
pub struct RawStep {
    /// Output field name.
    pub name: String,

    /// Built-in function name.
    pub function: String,

    /// Dependency path. Defaults to the payload.
    #[serde(default)]
    pub on: Option<FieldPath>,

    #[serde(default)]
    pub multi: bool,

    /// `regex` only.
    #[serde(default)]
    pub pattern: Option<String>,

    /// `regex` only; capture group, defaults to the whole match.
    #[serde(default)]
    pub group: Option<usize>,
}

impl PipelineSpec {
    pub fn from_file(path: &str) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| diagnostics::error_message(format!("read pipeline file {}", path)))?;
        Self::from_json(&text)
            .with_context(|| diagnostics::error_message(format!("parse pipeline file {}", path)))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Resolve built-ins, reject duplicate outputs, then validate the graph.
    pub fn validate_and_build(&self) -> Result<Pipeline> {
        let mut seen: BTreeMap<FieldPath, &str> = BTreeMap::new();
        let mut builder = PipelineBuilder::new();

        for raw in &self.steps {
            let f = resolve_builtin(raw)
                .with_context(|| diagnostics::error_message("invalid pipeline step"))?;

            if seen.insert(f.result_path(), &raw.name).is_some() {
                return Err(ConfigError::DuplicateStep(f.result_path().to_string()))
                    .with_context(|| diagnostics::error_message("invalid pipeline"));
            }
            builder.push(f);
        }

        builder
            .build()
            .with_context(|| diagnostics::error_message("invalid pipeline"))
    }
}

fn resolve_builtin(raw: &RawStep) -> std::result::Result<EnrichFunction, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidStep {
        step: raw.name.clone(),
        message: message.to_string(),
    };
    let multiplicity = if raw.multi {
        Multiplicity::Multi
    } else {
        Multiplicity::Single
    };

    let f = match raw.function.as_str() {
        "words" => builtins::words(multiplicity),
        "regex" => {
            let pattern = raw
                .pattern
                .as_deref()
                .ok_or_else(|| invalid("regex step requires a pattern"))?;
            let re = Regex::new(pattern).map_err(|e| invalid(&format!("bad pattern: {}", e)))?;
            let group = raw.group.unwrap_or(0);
            if group >= re.captures_len() {
                return Err(invalid(&format!("pattern has no capture group {}", group)));
            }
            builtins::regex(&raw.name, re, group, multiplicity)
        }
        single => {
            if raw.multi {
                return Err(invalid(&format!("function '{}' is single-valued", single)));
            }
            match single {
                "http_body" => builtins::http_body(),
                "http_headers" => builtins::http_headers(),
                "utf8" => builtins::utf8(),
                "lowercase" => builtins::lowercase(),
                "distinct" => builtins::distinct(),
                other => {
                    return Err(ConfigError::UnknownFunction {
                        step: raw.name.clone(),
                        function: other.to_string(),
                    });
                }
            }
        }
    };

    let f = f.named(&raw.name);
    Ok(match &raw.on {
        Some(dep) => f.on(dep.clone()),
        None => f,
    })
}
