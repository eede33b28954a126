//! External segment cache collaborator
//!
//! The coordinator only needs to ask whether a segment is durably cached,
//! write resolved segments through, and drop flushed ones. Reading bodies
//! back is done by whoever owns an external load.

use dashmap::DashMap;
use eyre::Result;
use tracing::debug;

use crate::segment::{SegmentBody, SegmentHeader};

/// A durable (or at least out-of-process) store of segment bodies keyed by header
///
/// Called from the actor thread, so implementations should answer promptly.
pub trait SegmentCache: Send + Sync {
    fn contains(&self, header: &SegmentHeader) -> Result<bool>;

    fn get(&self, header: &SegmentHeader) -> Result<Option<SegmentBody>>;

    /// Returns whether the body was stored
    fn put(&self, header: &SegmentHeader, body: SegmentBody) -> Result<bool>;

    /// Returns whether an entry was removed
    fn remove(&self, header: &SegmentHeader) -> Result<bool>;
}

/// Cache that holds nothing; used when no external cache is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpSegmentCache;

impl SegmentCache for NoOpSegmentCache {
    fn contains(&self, _header: &SegmentHeader) -> Result<bool> {
        Ok(false)
    }

    fn get(&self, _header: &SegmentHeader) -> Result<Option<SegmentBody>> {
        Ok(None)
    }

    fn put(&self, _header: &SegmentHeader, _body: SegmentBody) -> Result<bool> {
        Ok(false)
    }

    fn remove(&self, _header: &SegmentHeader) -> Result<bool> {
        Ok(false)
    }
}

/// In-process [`SegmentCache`], shared between coordinators in the same process
#[derive(Debug, Default)]
pub struct MemorySegmentCache {
    entries: DashMap<SegmentHeader, SegmentBody>,
}

impl MemorySegmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SegmentCache for MemorySegmentCache {
    fn contains(&self, header: &SegmentHeader) -> Result<bool> {
        Ok(self.entries.contains_key(header))
    }

    fn get(&self, header: &SegmentHeader) -> Result<Option<SegmentBody>> {
        Ok(self.entries.get(header).map(|entry| entry.value().clone()))
    }

    fn put(&self, header: &SegmentHeader, body: SegmentBody) -> Result<bool> {
        debug!(%header, cells = body.cells.len(), "MemorySegmentCache::put: called");
        self.entries.insert(header.clone(), body);
        Ok(true)
    }

    fn remove(&self, header: &SegmentHeader) -> Result<bool> {
        debug!(%header, "MemorySegmentCache::remove: called");
        Ok(self.entries.remove(header).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{CellValue, ColumnValue, Segment, SegmentAxis};

    fn header_and_body() -> (SegmentHeader, SegmentBody) {
        let header = Segment::builder("sales", "unit_sales").build().unwrap().header();
        let body = SegmentBody {
            axes: vec![SegmentAxis::new("year", [ColumnValue::Int(1997)])],
            cells: vec![(vec![0], CellValue::Int(10))],
        };
        (header, body)
    }

    #[test]
    fn test_noop_cache_stores_nothing() {
        let (header, body) = header_and_body();
        let cache = NoOpSegmentCache;
        assert!(!cache.put(&header, body).unwrap());
        assert!(!cache.contains(&header).unwrap());
        assert!(cache.get(&header).unwrap().is_none());
    }

    #[test]
    fn test_memory_cache_put_get_remove() {
        let (header, body) = header_and_body();
        let cache = MemorySegmentCache::new();
        assert!(cache.put(&header, body.clone()).unwrap());
        assert!(cache.contains(&header).unwrap());
        assert_eq!(cache.get(&header).unwrap(), Some(body));
        assert!(cache.remove(&header).unwrap());
        assert!(!cache.remove(&header).unwrap());
        assert!(cache.is_empty());
    }
}
