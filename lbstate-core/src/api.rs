//! Api - Trait abstracting the load balancer backend
//!
//! The engine never talks HTTP itself. A backend implements [`LoadBalancerApi`]
//! on top of its REST client and maps transport failures into [`ApiError`].

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::resource::{Resource, ResourceKind};
use crate::tree::StatusTree;

/// Errors returned by a backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The object does not exist (HTTP 404)
    #[error("{kind} {id} not found")]
    NotFound { kind: ResourceKind, id: String },

    /// The backend rejected a concurrent write (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other non-success response
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The response could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The backend does not offer this operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl ApiError {
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Map a response status code onto the error taxonomy
    pub fn from_status(
        kind: ResourceKind,
        id: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        match status {
            404 => Self::not_found(kind, id),
            409 => Self::Conflict(message.into()),
            _ => Self::Http {
                status,
                message: message.into(),
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether retrying the same request later may succeed
    ///
    /// Conflicts come from a parent object being mid-transition; 500/502/503/504
    /// are gateway or service hiccups.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Http { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            _ => false,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Operations the engine needs from a load balancer backend
#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    /// Read one object
    ///
    /// `parent_id` is required for members (pool ID) and L7 rules (policy ID).
    async fn get(
        &self,
        kind: ResourceKind,
        id: &str,
        parent_id: Option<&str>,
    ) -> ApiResult<Resource>;

    /// List every load balancer visible to the caller
    async fn list_load_balancers(&self) -> ApiResult<Vec<Resource>>;

    /// Fetch the aggregate status tree of a load balancer
    ///
    /// Returns `None` when the backend answers with a null document.
    async fn status_tree(&self, load_balancer_id: &str) -> ApiResult<Option<StatusTree>>;

    /// Create an object from a draft; the backend assigns the ID if the draft has none
    async fn create(&self, draft: &Resource) -> ApiResult<Resource>;

    /// Update an existing object in place
    async fn update(&self, resource: &Resource) -> ApiResult<Resource>;

    /// Delete an object
    async fn delete(
        &self,
        kind: ResourceKind,
        id: &str,
        parent_id: Option<&str>,
    ) -> ApiResult<()>;
}

#[async_trait]
impl<T: LoadBalancerApi + ?Sized> LoadBalancerApi for Arc<T> {
    async fn get(
        &self,
        kind: ResourceKind,
        id: &str,
        parent_id: Option<&str>,
    ) -> ApiResult<Resource> {
        (**self).get(kind, id, parent_id).await
    }

    async fn list_load_balancers(&self) -> ApiResult<Vec<Resource>> {
        (**self).list_load_balancers().await
    }

    async fn status_tree(&self, load_balancer_id: &str) -> ApiResult<Option<StatusTree>> {
        (**self).status_tree(load_balancer_id).await
    }

    async fn create(&self, draft: &Resource) -> ApiResult<Resource> {
        (**self).create(draft).await
    }

    async fn update(&self, resource: &Resource) -> ApiResult<Resource> {
        (**self).update(resource).await
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        id: &str,
        parent_id: Option<&str>,
    ) -> ApiResult<()> {
        (**self).delete(kind, id, parent_id).await
    }
}
