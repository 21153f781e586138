//! Payload stores: resolve a locator to raw payload bytes.

use crate::cdx::Locator;
use crate::error::FetchError;

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// The one expensive operation in the system.
pub trait PayloadStore: Send + Sync {
    fn fetch(&self, locator: &Locator) -> Result<Vec<u8>, FetchError>;
}

/// Reads byte ranges from container files below a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PayloadStore for FileStore {
    fn fetch(&self, locator: &Locator) -> Result<Vec<u8>, FetchError> {
        let io = |source: std::io::Error| FetchError::Io {
            locator: locator.to_string(),
            source,
        };

        let relative = Path::new(&locator.filename);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !plain || locator.filename.is_empty() {
            return Err(FetchError::OutsideDataDir(locator.to_string()));
        }

        let mut file = File::open(self.root.join(relative)).map_err(io)?;
        file.seek(SeekFrom::Start(locator.offset)).map_err(io)?;

        // Grown by the read; the length column is not trusted for allocation.
        let mut buf = Vec::new();
        let got = file
            .by_ref()
            .take(locator.length)
            .read_to_end(&mut buf)
            .map_err(io)? as u64;
        if got != locator.length {
            return Err(FetchError::Truncated {
                locator: locator.to_string(),
                expected: locator.length,
                got,
            });
        }

        tracing::debug!(locator = %locator, bytes = got, "payload fetched");
        Ok(buf)
    }
}

/// In-memory store keyed by locator. Counts fetches, and can be told to fail.
#[derive(Debug, Default)]
pub struct MemoryStore {
    payloads: HashMap<Locator, Vec<u8>>,
    fetches: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, locator: Locator, payload: impl Into<Vec<u8>>) {
        self.payloads.insert(locator, payload.into());
    }

    /// Number of `fetch` calls so far, successful or not.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// While set, every fetch fails with an I/O error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl PayloadStore for MemoryStore {
    fn fetch(&self, locator: &Locator) -> Result<Vec<u8>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Io {
                locator: locator.to_string(),
                source: std::io::Error::other("store unavailable"),
            });
        }
        self.payloads
            .get(locator)
            .cloned()
            .ok_or_else(|| FetchError::Missing(locator.to_string()))
    }
}
