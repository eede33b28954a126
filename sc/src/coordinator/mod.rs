//! Segment cache coordinator
//!
//! All mutable coordination state (pending loads, the segment index, the
//! record of externally cached segments) lives in [`Handler`]s owned by a
//! single actor thread. Callers reach it through:
//! - **Commands:** executed on the actor, typed result returned via the response correlator
//! - **Events:** completed facts (load succeeded or failed, external cache changes), no reply
//! - **Shutdown:** acknowledged, after which every submission fails with `ShutDown`

mod config;
mod core;
mod correlator;
mod handle;
mod handler;
mod messages;

pub use config::CoordinatorConfig;
pub use core::{Actor, ActorStats};
pub use correlator::{Responder, ResponseCorrelator, Ticket, response_channel};
pub use handle::ActorHandle;
pub use handler::{Acquisition, FlushSummary, Handler};
pub use messages::{
    Command, CoordinatorMetrics, FlushRegion, GetMetrics, HandlerId, LoadSource, LookupSegment, RequestSegment,
    SegmentEvent,
};
