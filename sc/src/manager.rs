//! SegmentCacheManager - the public entry point to the segment cache
//!
//! Each manager attaches its own handler to a shared actor. Commands block
//! for their result; notifications are queued and return immediately.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::SegmentCache;
use crate::coordinator::{
    Acquisition, ActorHandle, Command, CoordinatorMetrics, FlushRegion, FlushSummary, GetMetrics, Handler, HandlerId,
    LoadSource, LookupSegment, RequestSegment, SegmentEvent,
};
use crate::error::{CoordinatorResult, LoadError};
use crate::region::CacheRegion;
use crate::segment::{Segment, SegmentBody, SegmentDataset, SegmentHeader, SegmentWithData};

/// Handle for the rest of the engine to request and publish segments
///
/// Dropping the manager detaches its handler from the actor; loads still in
/// flight for it then resolve to [`LoadError::Dropped`].
pub struct SegmentCacheManager {
    actor: ActorHandle,
    handler: HandlerId,
    external: Arc<dyn SegmentCache>,
}

impl SegmentCacheManager {
    /// Attach a fresh handler backed by `external` to the actor
    pub fn new(actor: &ActorHandle, external: Arc<dyn SegmentCache>) -> CoordinatorResult<Self> {
        let handler = Handler::new(Arc::clone(&external));
        let id = handler.id();
        debug!(handler = %id, "SegmentCacheManager::new: called");
        actor.attach(handler)?;
        Ok(Self {
            actor: actor.clone(),
            handler: id,
            external,
        })
    }

    pub fn handler_id(&self) -> HandlerId {
        self.handler
    }

    /// The external cache this manager's handler writes through to
    pub fn external_cache(&self) -> &Arc<dyn SegmentCache> {
        &self.external
    }

    /// Run `command` on the actor; blocks until it has executed
    pub fn execute<C: Command>(&self, command: C) -> CoordinatorResult<C::Output> {
        self.actor.execute(self.handler, command)
    }

    /// Run `command`, waiting at most `timeout` for its result
    pub fn execute_timeout<C: Command>(&self, command: C, timeout: Duration) -> CoordinatorResult<C::Output> {
        self.actor.execute_timeout(self.handler, command, timeout)
    }

    /// Run `command` from async code without blocking the runtime
    pub async fn execute_async<C: Command>(&self, command: C) -> CoordinatorResult<C::Output> {
        debug!(handler = %self.handler, command = command.name(), "SegmentCacheManager::execute_async: called");
        let actor = self.actor.clone();
        let handler = self.handler;
        tokio::task::spawn_blocking(move || actor.execute(handler, command)).await?
    }

    /// Get a resident segment, or become (or wait on) the owner of its load
    pub fn request_segment(&self, segment: Arc<Segment>) -> CoordinatorResult<Acquisition> {
        self.execute(RequestSegment { segment })
    }

    pub fn lookup_segment(&self, header: &SegmentHeader) -> CoordinatorResult<Option<Arc<SegmentWithData>>> {
        self.execute(LookupSegment { header: header.clone() })
    }

    /// Invalidate cached segments after the source data in `region` changed
    pub fn flush(&self, region: impl CacheRegion) -> CoordinatorResult<FlushSummary> {
        self.execute(FlushRegion {
            region: Box::new(region),
        })
    }

    pub fn metrics(&self) -> CoordinatorResult<CoordinatorMetrics> {
        self.execute(GetMetrics)
    }

    /// Report that a backend load of `segment` produced `dataset`
    pub fn notify_load_succeeded(&self, segment: Arc<Segment>, dataset: SegmentDataset) -> CoordinatorResult<()> {
        debug!(segment_id = %segment.id(), cells = dataset.len(), "SegmentCacheManager::notify_load_succeeded: called");
        self.actor.event(
            self.handler,
            SegmentEvent::LoadSucceeded {
                segment,
                dataset,
                source: LoadSource::Backend,
            },
        )
    }

    /// Report that `segment` was read back from the external cache
    ///
    /// A body that does not form a valid dataset fails the load instead.
    pub fn notify_external_load_succeeded(&self, segment: Arc<Segment>, body: SegmentBody) -> CoordinatorResult<()> {
        debug!(segment_id = %segment.id(), "SegmentCacheManager::notify_external_load_succeeded: called");
        let event = match SegmentDataset::try_from(body) {
            Ok(dataset) => SegmentEvent::LoadSucceeded {
                segment,
                dataset,
                source: LoadSource::External,
            },
            Err(e) => {
                warn!(segment_id = %segment.id(), error = %e, "Malformed segment body from external cache");
                SegmentEvent::LoadFailed {
                    segment,
                    cause: LoadError::Failed(e.to_string()),
                }
            }
        };
        self.actor.event(self.handler, event)
    }

    /// Report that loading `segment` failed; everyone waiting on it gets `cause`
    pub fn notify_load_failed(&self, segment: Arc<Segment>, cause: impl Display) -> CoordinatorResult<()> {
        debug!(segment_id = %segment.id(), %cause, "SegmentCacheManager::notify_load_failed: called");
        self.actor.event(
            self.handler,
            SegmentEvent::LoadFailed {
                segment,
                cause: LoadError::Failed(cause.to_string()),
            },
        )
    }

    pub fn notify_external_segment_available(&self, header: SegmentHeader) -> CoordinatorResult<()> {
        debug!(%header, "SegmentCacheManager::notify_external_segment_available: called");
        self.actor
            .event(self.handler, SegmentEvent::ExternalSegmentCreated { header })
    }

    pub fn notify_external_segment_removed(&self, header: SegmentHeader) -> CoordinatorResult<()> {
        debug!(%header, "SegmentCacheManager::notify_external_segment_removed: called");
        self.actor
            .event(self.handler, SegmentEvent::ExternalSegmentDeleted { header })
    }
}

impl Drop for SegmentCacheManager {
    fn drop(&mut self) {
        self.actor.detach(self.handler);
    }
}
