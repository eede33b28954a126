//! Handler: the coordination state the actor operates on
//!
//! Owns the pending-load registry, the in-memory segment index and the
//! record of what the external cache holds. Only the actor thread ever
//! touches a handler, so none of this is locked.
//!
//! Per segment header:
//!
//! ```text
//! (absent) --request--> Requested --LoadSucceeded--> indexed, waiters get data
//!                                 \--LoadFailed----> removed, waiters get cause
//! ```
//!
//! Resolution removes the registry entry before any waiter is notified. Waiters
//! are released in registration order, the load owner first. A later miss
//! for the same header after a failure starts a fresh load.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::messages::{CoordinatorMetrics, HandlerId, LoadSource, SegmentEvent};
use crate::cache::SegmentCache;
use crate::error::{CoordinatorError, CoordinatorResult, LoadError};
use crate::future::{LoadResult, SegmentFuture, Waiter};
use crate::region::CacheRegion;
use crate::segment::{Segment, SegmentBody, SegmentDataset, SegmentHeader, SegmentWithData};

/// Outcome of requesting a segment
#[derive(Debug)]
pub enum Acquisition {
    /// Resident in memory
    Hit(Arc<SegmentWithData>),

    /// The caller now owns the load of `segment` and must report exactly one
    /// success or failure for it. `future` resolves with that outcome.
    Load {
        segment: Arc<Segment>,
        source: LoadSource,
        future: SegmentFuture,
    },

    /// Someone else is loading it
    Wait(SegmentFuture),
}

/// What a flush removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FlushSummary {
    pub evicted: usize,
    pub external_removed: usize,
    pub stale_loads: usize,
}

struct PendingLoad {
    segment: Arc<Segment>,
    source: LoadSource,
    waiters: Vec<Waiter>,
    /// Flushed while in flight: release waiters but do not cache the result
    stale: bool,
    requested_at: Instant,
}

/// Per-session coordination state
pub struct Handler {
    id: HandlerId,
    external: Arc<dyn SegmentCache>,
    pending: HashMap<SegmentHeader, PendingLoad>,
    index: HashMap<SegmentHeader, Arc<SegmentWithData>>,
    external_index: HashSet<SegmentHeader>,
    metrics: CoordinatorMetrics,
}

impl Handler {
    pub(crate) fn new(external: Arc<dyn SegmentCache>) -> Self {
        let id = HandlerId::generate();
        debug!(%id, "Handler::new: called");
        Self {
            id,
            external,
            pending: HashMap::new(),
            index: HashMap::new(),
            external_index: HashSet::new(),
            metrics: CoordinatorMetrics::default(),
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Whether a load of `header` is in flight
    pub fn is_pending(&self, header: &SegmentHeader) -> bool {
        self.pending.contains_key(header)
    }

    /// Resolve a request: hit, take ownership of a new load, or join an in-flight one
    pub fn request(&mut self, segment: Arc<Segment>) -> Acquisition {
        let header = segment.header();
        debug!(handler = %self.id, segment_id = %segment.id(), %header, "Handler::request: called");

        if let Some(found) = self.index.get(&header) {
            self.metrics.cache_hits += 1;
            return Acquisition::Hit(Arc::clone(found));
        }

        if let Some(pending) = self.pending.get_mut(&header) {
            let (waiter, future) = SegmentFuture::channel(header);
            pending.waiters.push(waiter);
            self.metrics.waiters_joined += 1;
            debug!(
                owner = %pending.segment.id(),
                waiters = pending.waiters.len(),
                "Handler::request: joined in-flight load"
            );
            return Acquisition::Wait(future);
        }

        let source = if self.is_external(&header) {
            LoadSource::External
        } else {
            LoadSource::Backend
        };
        let (waiter, future) = SegmentFuture::channel(header.clone());
        self.pending.insert(
            header,
            PendingLoad {
                segment: Arc::clone(&segment),
                source,
                waiters: vec![waiter],
                stale: false,
                requested_at: Instant::now(),
            },
        );
        self.metrics.loads_started += 1;
        debug!(segment_id = %segment.id(), %source, "Handler::request: caller owns new load");
        Acquisition::Load {
            segment,
            source,
            future,
        }
    }

    pub fn lookup(&self, header: &SegmentHeader) -> Option<Arc<SegmentWithData>> {
        self.index.get(header).cloned()
    }

    /// Evict indexed and externally cached segments matching `region`; mark matching loads stale
    pub fn flush(&mut self, region: &dyn CacheRegion) -> FlushSummary {
        let mut summary = FlushSummary::default();

        let before = self.index.len();
        self.index.retain(|header, _| !region.matches(header));
        summary.evicted = before - self.index.len();

        let doomed: Vec<SegmentHeader> = self
            .external_index
            .iter()
            .filter(|header| region.matches(header))
            .cloned()
            .collect();
        for header in doomed {
            self.external_index.remove(&header);
            if let Err(e) = self.external.remove(&header) {
                warn!(%header, error = %e, "Failed to remove flushed segment from external cache");
            }
            summary.external_removed += 1;
        }

        for (header, pending) in self.pending.iter_mut() {
            if !pending.stale && region.matches(header) {
                pending.stale = true;
                summary.stale_loads += 1;
            }
        }

        info!(
            handler = %self.id,
            evicted = summary.evicted,
            external_removed = summary.external_removed,
            stale_loads = summary.stale_loads,
            "Flushed region"
        );
        summary
    }

    pub fn metrics(&self) -> CoordinatorMetrics {
        CoordinatorMetrics {
            pending_loads: self.pending.len(),
            indexed_segments: self.index.len(),
            external_segments: self.external_index.len(),
            ..self.metrics.clone()
        }
    }

    /// Apply one event
    pub(crate) fn apply(&mut self, event: SegmentEvent) -> CoordinatorResult<()> {
        match event {
            SegmentEvent::LoadSucceeded {
                segment,
                dataset,
                source,
            } => self.load_succeeded(segment, dataset, source),
            SegmentEvent::LoadFailed { segment, cause } => self.load_failed(segment, cause),
            SegmentEvent::ExternalSegmentCreated { header } => {
                debug!(%header, "External segment created");
                self.external_index.insert(header);
                Ok(())
            }
            SegmentEvent::ExternalSegmentDeleted { header } => {
                debug!(%header, "External segment deleted");
                self.external_index.remove(&header);
                Ok(())
            }
        }
    }

    fn load_succeeded(
        &mut self,
        segment: Arc<Segment>,
        dataset: SegmentDataset,
        source: LoadSource,
    ) -> CoordinatorResult<()> {
        let header = segment.header();
        let pending = self.take_pending(&segment, &header)?;

        let resolved = match segment.with_data(dataset) {
            Ok(resolved) => Arc::new(resolved),
            Err(e) => {
                self.metrics.loads_failed += 1;
                self.release(&header, pending.waiters, Err(LoadError::Failed(e.to_string())));
                return Err(e);
            }
        };

        if source != pending.source {
            warn!(
                %header,
                reported = %source,
                registered = %pending.source,
                "Load source mismatch; using registered source"
            );
        }
        let source = pending.source;

        if pending.stale {
            debug!(%header, "Load resolved after flush; not caching");
        } else {
            self.index.insert(header.clone(), Arc::clone(&resolved));
            if source == LoadSource::Backend {
                self.write_through(&header, &resolved);
            }
        }

        self.metrics.loads_succeeded += 1;
        debug!(
            %header,
            %source,
            elapsed_ms = pending.requested_at.elapsed().as_millis() as u64,
            "Segment load succeeded"
        );
        self.release(&header, pending.waiters, Ok(resolved));
        Ok(())
    }

    fn load_failed(&mut self, segment: Arc<Segment>, cause: LoadError) -> CoordinatorResult<()> {
        let header = segment.header();
        let pending = self.take_pending(&segment, &header)?;
        self.metrics.loads_failed += 1;
        warn!(%header, %cause, "Segment load failed");
        self.release(&header, pending.waiters, Err(cause));
        Ok(())
    }

    /// Remove the registry entry owned by `segment`
    ///
    /// An entry owned by a different segment (an earlier or later load of the
    /// same header) is left in place.
    fn take_pending(&mut self, segment: &Segment, header: &SegmentHeader) -> CoordinatorResult<PendingLoad> {
        match self.pending.remove(header) {
            Some(pending) if pending.segment.id() == segment.id() => Ok(pending),
            other => {
                if let Some(pending) = other {
                    self.pending.insert(header.clone(), pending);
                }
                self.metrics.duplicate_resolutions += 1;
                Err(CoordinatorError::DuplicateResolution {
                    segment_id: segment.id(),
                    header: header.clone(),
                })
            }
        }
    }

    fn release(&mut self, header: &SegmentHeader, waiters: Vec<Waiter>, result: LoadResult) {
        let total = waiters.len();
        let mut released = 0;
        for waiter in waiters {
            if waiter.send(result.clone()).is_ok() {
                released += 1;
            }
        }
        let abandoned = total - released;
        self.metrics.waiters_released += released as u64;
        self.metrics.waiters_abandoned += abandoned as u64;
        debug!(%header, released, abandoned, "Released waiters");
    }

    fn write_through(&mut self, header: &SegmentHeader, resolved: &SegmentWithData) {
        match self.external.put(header, SegmentBody::from(resolved.dataset())) {
            Ok(true) => {
                self.external_index.insert(header.clone());
            }
            Ok(false) => {}
            Err(e) => warn!(%header, error = %e, "Failed to write segment to external cache"),
        }
    }

    fn is_external(&mut self, header: &SegmentHeader) -> bool {
        if self.external_index.contains(header) {
            return true;
        }
        match self.external.contains(header) {
            Ok(true) => {
                self.external_index.insert(header.clone());
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(%header, error = %e, "External cache presence check failed; treating as absent");
                false
            }
        }
    }
}

impl Drop for Handler {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(handler = %self.id, pending = self.pending.len(), "Handler dropped with loads in flight");
        }
    }
}
