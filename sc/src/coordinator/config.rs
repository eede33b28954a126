//! Actor configuration

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoordinatorError, CoordinatorResult};

/// Segment cache actor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bound of the inbound message queue; submitters block while it is full
    #[serde(rename = "inbound-capacity", default = "default_inbound_capacity")]
    pub inbound_capacity: usize,

    /// Bound of the response channel feeding the correlator
    #[serde(rename = "response-capacity", default = "default_response_capacity")]
    pub response_capacity: usize,

    /// Name given to the actor thread
    #[serde(rename = "thread-name", default = "default_thread_name")]
    pub thread_name: String,
}

fn default_inbound_capacity() -> usize {
    debug!("default_inbound_capacity: called");
    1000
}

fn default_response_capacity() -> usize {
    debug!("default_response_capacity: called");
    1000
}

fn default_thread_name() -> String {
    debug!("default_thread_name: called");
    "segment-cache".to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        debug!("CoordinatorConfig::default: called");
        Self {
            inbound_capacity: default_inbound_capacity(),
            response_capacity: default_response_capacity(),
            thread_name: default_thread_name(),
        }
    }
}

impl CoordinatorConfig {
    /// Reject settings the actor cannot run with
    pub fn validate(&self) -> CoordinatorResult<()> {
        debug!(?self, "CoordinatorConfig::validate: called");
        if self.inbound_capacity == 0 {
            return Err(CoordinatorError::InvalidConfig("inbound-capacity must be at least 1".to_string()));
        }
        if self.response_capacity == 0 {
            return Err(CoordinatorError::InvalidConfig(
                "response-capacity must be at least 1".to_string(),
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(CoordinatorError::InvalidConfig("thread-name must not be empty".to_string()));
        }
        Ok(())
    }
}
