//! SegCache - segment cache coordination for an OLAP engine
//!
//! Decides, for every segment of pre-aggregated data a query needs, whether
//! it is resident in memory, already being loaded, available in an external
//! cache, or must be computed by a backend query. Each segment is loaded at
//! most once at a time and the result is published to every party waiting
//! on it.
//!
//! # Core Concepts
//!
//! - **Single writer**: all coordination state lives on one actor thread
//! - **Commands and events**: commands return a value to one caller; events report completed facts
//! - **Load ownership**: the first requester of a missing segment owns its load; later ones wait
//! - **Bounded queues**: overload shows up as latency, never as unbounded memory
//!
//! # Modules
//!
//! - [`segment`] - Segment, header and dataset types
//! - [`coordinator`] - Actor, handler, messages and response correlator
//! - [`manager`] - The facade the rest of the engine calls
//! - [`cache`] - External segment cache collaborator
//! - [`region`] - Regions for flushing stale segments
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface of the `sc` binary

pub mod cache;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod future;
pub mod manager;
pub mod region;
pub mod segment;

// Re-export commonly used types
pub use cache::{MemorySegmentCache, NoOpSegmentCache, SegmentCache};
pub use config::Config;
pub use coordinator::{
    Acquisition, Actor, ActorHandle, ActorStats, Command, CoordinatorConfig, CoordinatorMetrics, FlushSummary, Handler,
    HandlerId, LoadSource, SegmentEvent,
};
pub use error::{CoordinatorError, CoordinatorResult, CorrelatorError, LoadError};
pub use future::{LoadResult, SegmentFuture};
pub use manager::SegmentCacheManager;
pub use region::{CacheRegion, StarRegion};
pub use segment::{
    CellValue, ColumnValue, ConstrainedColumn, Segment, SegmentAxis, SegmentBody, SegmentDataset, SegmentHeader,
    SegmentId, SegmentWithData,
};
