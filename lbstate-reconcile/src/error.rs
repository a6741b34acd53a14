//! Reconciliation errors

use std::time::Duration;

use lbstate_core::{ApiError, ResourceRef};
use thiserror::Error;

fn describe_last(status: &Option<String>) -> &str {
    status.as_deref().unwrap_or("none")
}

fn describe_reason(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {}", r))
        .unwrap_or_default()
}

/// Errors surfaced by waits, refreshes, dependency resolution and retried mutations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    /// The object does not exist and the wait did not target its deletion
    #[error("{resource} not found")]
    NotFound { resource: ResourceRef },

    /// The status stayed in the pending set for the whole budget
    #[error(
        "Timeout while waiting for {resource} to become {target} (last status: {}, timeout: {timeout:?})",
        describe_last(.last_status)
    )]
    Timeout {
        resource: ResourceRef,
        target: String,
        last_status: Option<String>,
        timeout: Duration,
    },

    /// The caller cancelled the wait or mutation
    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    /// The backend reported ERROR for the object
    #[error("{resource} went into ERROR while waiting for {target}{}", describe_reason(.reason))]
    ErrorStatus {
        resource: ResourceRef,
        target: String,
        reason: Option<String>,
    },

    /// The status left the pending set for something that is neither the target nor ERROR
    #[error(
        "Unexpected status {status} for {resource}, wanted {target}{}",
        describe_reason(.reason)
    )]
    UnexpectedStatus {
        resource: ResourceRef,
        target: String,
        status: String,
        reason: Option<String>,
    },

    /// The owning load balancer could not be determined
    #[error("Unable to determine the load balancer of {resource}")]
    DependencyUnresolved { resource: ResourceRef },

    /// A transient error persisted until the retry budget ran out
    #[error("{operation} still failing after {attempts} attempts: {source}")]
    TransientConflict {
        operation: String,
        attempts: u32,
        source: ApiError,
    },

    /// A mutation failed with a non-retryable error
    #[error("{operation} failed: {source}")]
    Fatal { operation: String, source: ApiError },

    /// The retry budget ran out before any attempt completed
    #[error("{operation} did not complete within {timeout:?}")]
    MutationTimeout { operation: String, timeout: Duration },

    /// Any other backend failure while reading status
    #[error("Failed to read status of {resource}: {source}")]
    Api {
        resource: ResourceRef,
        source: ApiError,
    },
}

impl ReconcileError {
    pub fn api(resource: ResourceRef, source: ApiError) -> Self {
        Self::Api { resource, source }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::MutationTimeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The backend error behind this one, if any
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::TransientConflict { source, .. }
            | Self::Fatal { source, .. }
            | Self::Api { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
