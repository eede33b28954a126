//! Message types for the segment cache actor
//!
//! A message is either a command (one caller waits for its typed result) or
//! an event (a completed fact, no result). Events form a closed set and are
//! applied to the handler with an exhaustive match.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::correlator::Ticket;
use super::handler::{Acquisition, FlushSummary, Handler};
use crate::error::LoadError;
use crate::region::CacheRegion;
use crate::segment::{Segment, SegmentDataset, SegmentHeader, SegmentWithData};

/// Identifies one handler attached to the actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerId(Uuid);

impl HandlerId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request executed on the actor thread against a handler's state
///
/// Each submitted command is executed at most once. An error (or panic) is
/// reported to the waiting caller instead of reaching the actor loop.
pub trait Command: Send + 'static {
    type Output: Send + 'static;

    /// Name used in logs and errors
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn call(self, handler: &mut Handler) -> eyre::Result<Self::Output>;
}

/// Object-safe form of [`Command`], as carried on the inbound queue
pub(crate) trait DynCommand: Send {
    fn command_name(&self) -> &'static str;
    fn call_boxed(self: Box<Self>, handler: &mut Handler) -> eyre::Result<Box<dyn Any + Send>>;
}

impl<C: Command> DynCommand for C {
    fn command_name(&self) -> &'static str {
        Command::name(self)
    }

    fn call_boxed(self: Box<Self>, handler: &mut Handler) -> eyre::Result<Box<dyn Any + Send>> {
        Command::call(*self, handler).map(|output| Box::new(output) as Box<dyn Any + Send>)
    }
}

/// Where the owner of a load is expected to fetch the segment from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadSource {
    /// Compute it with a backend query
    Backend,
    /// Read it from the external segment cache
    External,
}

impl fmt::Display for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadSource::Backend => write!(f, "backend"),
            LoadSource::External => write!(f, "external"),
        }
    }
}

/// Completed facts reported to the actor
#[derive(Debug)]
pub enum SegmentEvent {
    /// A load finished and produced `dataset`
    LoadSucceeded {
        segment: Arc<Segment>,
        dataset: SegmentDataset,
        source: LoadSource,
    },

    /// A load failed; everyone waiting on the segment gets `cause`
    LoadFailed { segment: Arc<Segment>, cause: LoadError },

    /// The external cache now holds `header`
    ExternalSegmentCreated { header: SegmentHeader },

    /// The external cache no longer holds `header`
    ExternalSegmentDeleted { header: SegmentHeader },
}

impl SegmentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SegmentEvent::LoadSucceeded { .. } => "load-succeeded",
            SegmentEvent::LoadFailed { .. } => "load-failed",
            SegmentEvent::ExternalSegmentCreated { .. } => "external-segment-created",
            SegmentEvent::ExternalSegmentDeleted { .. } => "external-segment-deleted",
        }
    }
}

/// Why a command produced no value
#[derive(Debug)]
pub(crate) enum Failure {
    UnknownHandler,
    Failed(String),
}

/// What the actor publishes through the correlator for each command
pub(crate) type Response = Result<Box<dyn Any + Send>, Failure>;

/// Entries of the actor's inbound queue
pub(crate) enum Message {
    Attach(Box<Handler>),
    Detach(HandlerId),
    Command {
        handler: HandlerId,
        ticket: Ticket,
        command: Box<dyn DynCommand>,
    },
    Event {
        handler: HandlerId,
        event: SegmentEvent,
    },
    Shutdown {
        ticket: Ticket,
    },
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Attach(handler) => write!(f, "Attach({})", handler.id()),
            Message::Detach(id) => write!(f, "Detach({})", id),
            Message::Command { handler, ticket, command } => {
                write!(f, "Command({} -> {}, ticket {})", command.command_name(), handler, ticket)
            }
            Message::Event { handler, event } => write!(f, "Event({} -> {})", event.kind(), handler),
            Message::Shutdown { ticket } => write!(f, "Shutdown(ticket {})", ticket),
        }
    }
}

/// Ask for a segment: returns it if resident, otherwise registers the caller
/// as owner of the load or as a waiter on an in-flight one
#[derive(Debug)]
pub struct RequestSegment {
    pub segment: Arc<Segment>,
}

impl Command for RequestSegment {
    type Output = Acquisition;

    fn name(&self) -> &'static str {
        "request-segment"
    }

    fn call(self, handler: &mut Handler) -> eyre::Result<Acquisition> {
        Ok(handler.request(self.segment))
    }
}

/// Peek at the in-memory index without registering interest
#[derive(Debug)]
pub struct LookupSegment {
    pub header: SegmentHeader,
}

impl Command for LookupSegment {
    type Output = Option<Arc<SegmentWithData>>;

    fn name(&self) -> &'static str {
        "lookup-segment"
    }

    fn call(self, handler: &mut Handler) -> eyre::Result<Self::Output> {
        Ok(handler.lookup(&self.header))
    }
}

/// Invalidate everything matching a region after the source data changed
pub struct FlushRegion {
    pub region: Box<dyn CacheRegion>,
}

impl Command for FlushRegion {
    type Output = FlushSummary;

    fn name(&self) -> &'static str {
        "flush-region"
    }

    fn call(self, handler: &mut Handler) -> eyre::Result<FlushSummary> {
        Ok(handler.flush(self.region.as_ref()))
    }
}

/// Snapshot the handler's metrics
#[derive(Debug)]
pub struct GetMetrics;

impl Command for GetMetrics {
    type Output = CoordinatorMetrics;

    fn name(&self) -> &'static str {
        "get-metrics"
    }

    fn call(self, handler: &mut Handler) -> eyre::Result<CoordinatorMetrics> {
        Ok(handler.metrics())
    }
}

/// Per-handler metrics for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CoordinatorMetrics {
    pub pending_loads: usize,
    pub indexed_segments: usize,
    pub external_segments: usize,
    pub cache_hits: u64,
    pub loads_started: u64,
    pub loads_succeeded: u64,
    pub loads_failed: u64,
    pub waiters_joined: u64,
    pub waiters_released: u64,
    pub waiters_abandoned: u64,
    pub duplicate_resolutions: u64,
}
