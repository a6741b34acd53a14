//! Refresh - Per-object status reads over the two reporting protocols
//!
//! Backends either report `provisioning_status` on every object (direct) or
//! only in an aggregate tree rooted at the load balancer (tree). The strategy
//! is picked once per [`Refresher`] and never changes afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use lbstate_core::status::ACTIVE;
use lbstate_core::{ApiResult, LoadBalancerApi, Resource, ResourceKind, ResourceRef, StatusSet};
use log::debug;

use crate::config::StatusProtocol;
use crate::waiter::{Observation, Refresh};

/// How a [`Refresher`] reads status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStrategy {
    /// Read `provisioning_status` from the load balancer, then from the object
    Direct,
    /// Read the load balancer status tree
    Tree,
}

impl RefreshStrategy {
    /// Direct when the backend reported a status for this object, tree otherwise
    pub fn detect(resource: &Resource) -> Self {
        if resource.direct_status().is_some() {
            RefreshStrategy::Direct
        } else {
            RefreshStrategy::Tree
        }
    }

    pub fn select(protocol: StatusProtocol, resource: &Resource) -> Self {
        match protocol {
            StatusProtocol::Auto => Self::detect(resource),
            StatusProtocol::Direct => RefreshStrategy::Direct,
            StatusProtocol::Tree => RefreshStrategy::Tree,
        }
    }
}

/// Refresh function for one object of a known load balancer
///
/// Both strategies report the load balancer's own status while it is outside
/// the stable set, so children are not polled during a load balancer
/// transition.
pub struct Refresher {
    api: Arc<dyn LoadBalancerApi>,
    subject: ResourceRef,
    parent_id: Option<String>,
    load_balancer_id: String,
    strategy: RefreshStrategy,
    stable: StatusSet,
}

impl Refresher {
    pub fn new(
        api: Arc<dyn LoadBalancerApi>,
        resource: &Resource,
        load_balancer_id: impl Into<String>,
        strategy: RefreshStrategy,
    ) -> Self {
        Self {
            api,
            subject: resource.to_ref(),
            parent_id: resource.addressing_parent().map(str::to_string),
            load_balancer_id: load_balancer_id.into(),
            strategy,
            stable: StatusSet::stable(),
        }
    }

    pub fn strategy(&self) -> RefreshStrategy {
        self.strategy
    }

    pub fn load_balancer_id(&self) -> &str {
        &self.load_balancer_id
    }

    fn is_load_balancer(&self) -> bool {
        self.subject.kind == ResourceKind::LoadBalancer
    }

    async fn get_subject(&self) -> ApiResult<Resource> {
        self.api
            .get(
                self.subject.kind,
                &self.subject.id,
                self.parent_id.as_deref(),
            )
            .await
    }

    async fn refresh_direct(&self) -> ApiResult<Observation> {
        let lb = self
            .api
            .get(ResourceKind::LoadBalancer, &self.load_balancer_id, None)
            .await?;
        let lb_status = lb.direct_status().unwrap_or_default().to_string();

        if self.is_load_balancer() {
            return Ok(Observation::new(lb, lb_status));
        }
        if !self.stable.contains(&lb_status) {
            debug!(
                "Load balancer {} is {}, not polling {}",
                self.load_balancer_id, lb_status, self.subject
            );
            return Ok(Observation::new(lb, lb_status));
        }

        let resource = self.get_subject().await?;
        let status = resource.direct_status().unwrap_or_default().to_string();
        Ok(Observation::new(resource, status))
    }

    async fn refresh_tree(&self) -> ApiResult<Observation> {
        let tree = self
            .api
            .status_tree(&self.load_balancer_id)
            .await?
            .unwrap_or_default();

        // A null tree carries no status, so there is nothing to short-circuit on
        if tree.loadbalancer.is_some() && !self.stable.contains(tree.root_status()) {
            let root_status = tree.root_status();
            debug!(
                "Load balancer {} is {}, not looking up {}",
                self.load_balancer_id, root_status, self.subject
            );
            let lb = Resource::new(ResourceKind::LoadBalancer, self.load_balancer_id.clone())
                .with_status(root_status);
            return Ok(Observation::new(lb, root_status));
        }

        if let Some(entry) = tree.find(
            self.subject.kind,
            &self.subject.id,
            self.parent_id.as_deref(),
        ) && !entry.provisioning_status.is_empty()
        {
            let mut resource = Resource::new(self.subject.kind, self.subject.id.clone())
                .with_status(entry.provisioning_status);
            resource.parent_id = self.parent_id.clone();
            return Ok(Observation::new(resource, entry.provisioning_status));
        }

        // Legacy backends leave some objects out of the tree; existence implies ACTIVE
        let resource = self.get_subject().await?;
        debug!(
            "{} not in the status tree of {}, assuming {}",
            self.subject, self.load_balancer_id, ACTIVE
        );
        Ok(Observation::new(resource, ACTIVE))
    }
}

#[async_trait]
impl Refresh for Refresher {
    fn subject(&self) -> ResourceRef {
        self.subject.clone()
    }

    async fn refresh(&self) -> ApiResult<Observation> {
        match self.strategy {
            RefreshStrategy::Direct => self.refresh_direct().await,
            RefreshStrategy::Tree => self.refresh_tree().await,
        }
    }
}
