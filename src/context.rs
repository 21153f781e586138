//! Root context shared by a record tree and every fork derived from it.

use crate::cdx::CdxRecord;
use crate::error::FetchError;
use crate::store::PayloadStore;

use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Handle to the original metadata and the memoized payload of one record.
///
/// Cloning is cheap and every clone points at the same cell, so a fetch done
/// through any fork is visible to all of them.
#[derive(Debug, Clone)]
pub struct RootContext {
    original: Arc<CdxRecord>,
    payload: Arc<OnceCell<Arc<[u8]>>>,
}

impl RootContext {
    pub fn new(original: CdxRecord) -> Self {
        Self {
            original: Arc::new(original),
            payload: Arc::new(OnceCell::new()),
        }
    }

    /// Original metadata, identical for the whole fork family.
    pub fn original(&self) -> &Arc<CdxRecord> {
        &self.original
    }

    /// Fetch the payload on first use and reuse it afterwards.
    ///
    /// A failed fetch leaves the cell empty so a later call can retry.
    pub fn payload(&self, store: &dyn PayloadStore) -> Result<Arc<[u8]>, FetchError> {
        self.payload
            .get_or_try_init(|| {
                let locator = self
                    .original
                    .locator
                    .as_ref()
                    .ok_or_else(|| FetchError::Missing(self.original.original_url.clone()))?;
                tracing::debug!(url = %self.original.original_url, %locator, "fetching payload");
                store.fetch(locator).map(Arc::from)
            })
            .cloned()
    }

    pub fn payload_loaded(&self) -> bool {
        self.payload.get().is_some()
    }

    /// True if both handles belong to the same fork family.
    pub fn same_root(&self, other: &RootContext) -> bool {
        Arc::ptr_eq(&self.original, &other.original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdx::{Locator, parse_cdx_line};
    use crate::store::MemoryStore;

    fn record() -> CdxRecord {
        parse_cdx_line("org,example)/ 20200101000000 http://example.org/ text/html 200 D - - 5 0 a.warc")
            .unwrap()
    }

    fn store_with_payload() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.insert(
            Locator {
                filename: "a.warc".to_string(),
                offset: 0,
                length: 5,
            },
            b"HELLO".to_vec(),
        );
        store
    }

    #[test]
    fn payload_is_fetched_once_across_clones() {
        let store = store_with_payload();
        let ctx = RootContext::new(record());
        let clone = ctx.clone();

        assert!(!clone.payload_loaded());
        assert_eq!(&*ctx.payload(&store).unwrap(), b"HELLO");
        assert!(clone.payload_loaded());
        assert_eq!(&*clone.payload(&store).unwrap(), b"HELLO");
        assert_eq!(store.fetch_count(), 1);
        assert!(ctx.same_root(&clone));
    }

    #[test]
    fn failed_fetch_is_retried() {
        let store = store_with_payload();
        let ctx = RootContext::new(record());

        store.set_failing(true);
        assert!(ctx.payload(&store).is_err());
        assert!(!ctx.payload_loaded());

        store.set_failing(false);
        assert!(ctx.payload(&store).is_ok());
        assert_eq!(store.fetch_count(), 2);
    }

    #[test]
    fn record_without_locator_cannot_fetch() {
        let mut r = record();
        r.locator = None;
        let ctx = RootContext::new(r);
        assert!(matches!(
            ctx.payload(&MemoryStore::new()),
            Err(FetchError::Missing(_))
        ));
    }

    #[test]
    fn separate_records_do_not_share_roots() {
        assert!(!RootContext::new(record()).same_root(&RootContext::new(record())));
    }
}
