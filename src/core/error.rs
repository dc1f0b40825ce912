//! Error kinds for a convergence run.
//!
//! Every variant except the event-log path is fatal to the run: the engine
//! is single-pass and non-transactional, so resources created by earlier
//! stages remain and a re-run is the only recovery.

use crate::cloud::CloudError;
use std::time::Duration;
use thiserror::Error;

/// Errors that abort a convergence run.
#[derive(Error, Debug)]
pub enum CastError {
    /// The declared document could not be read or parsed.
    #[error("document error: {0}")]
    Document(String),

    /// The declared document parsed but failed validation.
    #[error("invalid document: {}", .0.join("; "))]
    Invalid(Vec<String>),

    /// A control-plane call failed.
    #[error("{action} failed: {source}")]
    Cloud {
        action: String,
        #[source]
        source: CloudError,
    },

    /// A mutation reported success but the re-fetched collection does not show it.
    #[error("{kind} {key} not visible after creation")]
    Unconfirmed { kind: &'static str, key: String },

    /// A referenced resource does not exist.
    #[error("{kind} {name} does not exist")]
    Missing { kind: &'static str, name: String },

    /// A precondition this engine cannot fix.
    #[error("prerequisite violated: {0}")]
    Prerequisite(String),

    /// A bounded wait expired.
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    /// The run was cancelled while waiting.
    #[error("cancelled while waiting for {0}")]
    Cancelled(String),

    /// The stage graph was violated.
    #[error("stage order violated: {0}")]
    StageOrder(String),

    /// The persisted simulated cloud could not be loaded or saved.
    #[error("cloud snapshot error: {0}")]
    Snapshot(String),
}

impl CastError {
    /// Wrap a control-plane failure with the action that was attempted.
    pub fn cloud(action: impl Into<String>, source: CloudError) -> Self {
        Self::Cloud {
            action: action.into(),
            source,
        }
    }
}

/// Result alias for convergence operations.
pub type Result<T> = std::result::Result<T, CastError>;
