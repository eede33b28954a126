//! Error types for the segment cache coordinator

use std::time::Duration;

use thiserror::Error;

use crate::coordinator::HandlerId;
use crate::segment::{SegmentHeader, SegmentId};

/// Errors surfaced by the coordinator to its callers
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Invalid segment: {0}")]
    InvalidSegment(String),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Segment cache actor is shut down")]
    ShutDown,

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: &'static str, message: String },

    #[error("Wait for command '{command}' abandoned after {timeout:?}")]
    Abandoned { command: &'static str, timeout: Duration },

    #[error("Handler {0} is not attached to the actor")]
    UnknownHandler(HandlerId),

    #[error("Unexpected response type for command '{0}'")]
    ResponseType(&'static str),

    #[error("Segment {segment_id} ({header}) is not awaiting resolution")]
    DuplicateResolution { segment_id: SegmentId, header: SegmentHeader },

    #[error("Failed to spawn actor thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Actor thread panicked")]
    ActorPanicked,

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CoordinatorError {
    /// Check if the error means the actor is no longer accepting work
    pub fn is_shutdown(&self) -> bool {
        matches!(self, CoordinatorError::ShutDown)
    }
}

/// Result alias used throughout the coordinator API
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors from the response correlator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelatorError {
    #[error("Response channel closed")]
    Closed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Why a segment did not resolve to data
///
/// Cloned once per waiter, so every party awaiting the segment sees the same cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("Segment load failed: {0}")]
    Failed(String),

    #[error("Segment load was dropped before it resolved")]
    Dropped,
}
