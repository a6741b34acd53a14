//! Reconciler - Entry point for CRUD handlers
//!
//! Ties the resolver, the refresh factory, the waiter and the retry wrapper to
//! one backend and one [`ReconcileConfig`]. A typical create handler:
//!
//! ```ignore
//! let pool = reconciler
//!     .retry_mutation(&cancel, timeout, "create pool", || api.create(&draft))
//!     .await?;
//! reconciler
//!     .wait_for(&cancel, &pool, ACTIVE, &StatusSet::pending(), timeout)
//!     .await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lbstate_core::status::is_deletion_target;
use lbstate_core::{ApiResult, LoadBalancerApi, Resource, StatusSet};
use log::debug;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::config::ReconcileConfig;
use crate::error::{ReconcileError, ReconcileResult};
use crate::refresh::{RefreshStrategy, Refresher};
use crate::resolver::DependencyResolver;
use crate::retry;
use crate::waiter::{self, Settled, deadline_after};

pub struct Reconciler {
    api: Arc<dyn LoadBalancerApi>,
    resolver: DependencyResolver,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(api: Arc<dyn LoadBalancerApi>, config: ReconcileConfig) -> Self {
        Self {
            resolver: DependencyResolver::new(api.clone()),
            api,
            config,
        }
    }

    pub fn api(&self) -> &Arc<dyn LoadBalancerApi> {
        &self.api
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    /// Build the refresh function for an object
    ///
    /// `resource` should be the object as last returned by the backend: whether
    /// it carries a provisioning status decides the strategy under
    /// [`StatusProtocol::Auto`](crate::config::StatusProtocol::Auto).
    pub async fn make_refresh(&self, resource: &Resource) -> ReconcileResult<Refresher> {
        let lb_id = self.resolver.resolve_load_balancer_id(resource).await?;
        let strategy = RefreshStrategy::select(self.config.protocol, resource);
        debug!(
            "Refreshing {} via load balancer {} ({:?})",
            resource.to_ref(),
            lb_id,
            strategy
        );
        Ok(Refresher::new(self.api.clone(), resource, lb_id, strategy))
    }

    /// Wait until `resource` reaches `target`, using the configured poll timings
    ///
    /// `timeout` covers resolving the owning load balancer as well as polling.
    /// When waiting for [`DELETED`](lbstate_core::status::DELETED), an object
    /// that no longer resolves to any load balancer counts as gone.
    pub async fn wait_for(
        &self,
        cancel: &CancellationToken,
        resource: &Resource,
        target: &str,
        pending: &StatusSet,
        timeout: Duration,
    ) -> ReconcileResult<Settled> {
        let deadline = deadline_after(timeout);
        let timed_out = |last_status: Option<String>| ReconcileError::Timeout {
            resource: resource.to_ref(),
            target: target.to_string(),
            last_status,
            timeout,
        };

        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ReconcileError::Cancelled {
                    operation: format!("resolve load balancer of {}", resource.to_ref()),
                });
            }
            _ = sleep_until(deadline) => return Err(timed_out(None)),
            refresh = self.make_refresh(resource) => refresh,
        };
        let refresh = match resolved {
            Ok(refresh) => refresh,
            Err(ReconcileError::DependencyUnresolved { .. }) if is_deletion_target(target) => {
                debug!("{} belongs to no load balancer, treating it as gone", resource.to_ref());
                self.resolver.forget(resource);
                return Ok(Settled::Gone);
            }
            Err(err) => return Err(err),
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        let config = self.config.wait.clone().with_timeout(remaining);
        let settled = waiter::wait_for(cancel, &refresh, target, pending, &config)
            .await
            .map_err(|err| match err {
                ReconcileError::Timeout { last_status, .. } => timed_out(last_status),
                other => other,
            })?;
        if is_deletion_target(target) {
            self.resolver.forget(resource);
        }
        Ok(settled)
    }

    /// Retry a mutation with the configured backoff
    pub async fn retry_mutation<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        operation_name: &str,
        operation: F,
    ) -> ReconcileResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        retry::retry_mutation(cancel, timeout, &self.config.retry, operation_name, operation).await
    }

    pub async fn resolve_load_balancer_id(&self, resource: &Resource) -> ReconcileResult<String> {
        self.resolver.resolve_load_balancer_id(resource).await
    }

    pub async fn resolve_parent_listener_id(&self, policy_id: &str) -> ReconcileResult<String> {
        self.resolver.resolve_parent_listener_id(policy_id).await
    }
}
