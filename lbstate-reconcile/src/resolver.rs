//! Resolver - Find the load balancer that owns an object
//!
//! Cheapest first:
//!
//! 1. the object's own `load_balancers` list
//! 2. the parent chain (pool to listener, member to pool, ...), one `get` per hop
//! 3. the cache filled by earlier scans
//! 4. a scan of every load balancer's status tree
//!
//! A scan records every object of each tree it fetches, so importing the
//! remaining objects of the same load balancer does not scan again. Members
//! and L7 rules are recorded under their parent, since their IDs are only
//! unique within it.

use std::sync::Arc;

use dashmap::DashMap;
use lbstate_core::{LoadBalancerApi, Resource, ResourceKind, ResourceRef, StatusTree};
use log::{debug, info};

use crate::error::{ReconcileError, ReconcileResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: ResourceKind,
    parent: Option<String>,
    id: String,
}

impl CacheKey {
    fn new(kind: ResourceKind, id: &str, parent_id: Option<&str>) -> Self {
        Self {
            kind,
            parent: if kind.requires_parent() {
                parent_id.map(str::to_string)
            } else {
                None
            },
            id: id.to_string(),
        }
    }

    /// Whether a lookup without a known parent may stand for this key
    fn loosely_matches(&self, kind: ResourceKind, id: &str) -> bool {
        self.kind == kind && self.id == id
    }
}

pub struct DependencyResolver {
    api: Arc<dyn LoadBalancerApi>,
    /// Object to owning load balancer ID
    cache: DashMap<CacheKey, String>,
}

impl DependencyResolver {
    pub fn new(api: Arc<dyn LoadBalancerApi>) -> Self {
        Self {
            api,
            cache: DashMap::new(),
        }
    }

    /// Cached owner of an object, if a scan has seen it
    ///
    /// A member or L7 rule looked up without its parent only resolves when a
    /// single cached object has that ID.
    pub fn cached(
        &self,
        kind: ResourceKind,
        id: &str,
        parent_id: Option<&str>,
    ) -> Option<String> {
        let key = CacheKey::new(kind, id, parent_id);
        if let Some(entry) = self.cache.get(&key) {
            return Some(entry.value().clone());
        }
        if !kind.requires_parent() || parent_id.is_some() {
            return None;
        }

        let mut owners = self
            .cache
            .iter()
            .filter(|entry| entry.key().loosely_matches(kind, id))
            .map(|entry| entry.value().clone());
        match (owners.next(), owners.next()) {
            (Some(lb_id), None) => Some(lb_id),
            _ => None,
        }
    }

    /// Drop an object from the cache; for a load balancer, also every object it owned
    ///
    /// A member or L7 rule without a parent drops every entry with its ID.
    pub fn forget(&self, resource: &Resource) {
        let key = CacheKey::new(resource.kind, &resource.id, resource.addressing_parent());
        if key.kind.requires_parent() && key.parent.is_none() {
            self.cache
                .retain(|cached, _| !cached.loosely_matches(key.kind, &key.id));
        } else {
            self.cache.remove(&key);
        }
        if resource.kind == ResourceKind::LoadBalancer {
            self.cache.retain(|_, lb_id| *lb_id != resource.id);
        }
    }

    pub async fn resolve_load_balancer_id(&self, resource: &Resource) -> ReconcileResult<String> {
        if resource.kind == ResourceKind::LoadBalancer {
            return Ok(resource.id.clone());
        }

        let mut current = resource.clone();
        // Bounded by the depth of the object hierarchy
        for _ in 0..ResourceKind::ALL.len() {
            if let Some(lb_id) = current.load_balancers.first() {
                return Ok(lb_id.clone());
            }
            let Some(parent) = current.parent_ref() else {
                break;
            };
            debug!("Resolving {} through {}", resource.to_ref(), parent);
            match self.api.get(parent.kind, &parent.id, None).await {
                Ok(found) => current = found,
                Err(err) if err.is_not_found() => {
                    debug!("{} of {} not found", parent, resource.to_ref());
                    break;
                }
                Err(err) => return Err(ReconcileError::api(parent, err)),
            }
        }

        if let Some(lb_id) = self.cached(resource.kind, &resource.id, resource.addressing_parent())
        {
            debug!("{} owned by {} (cached)", resource.to_ref(), lb_id);
            return Ok(lb_id);
        }
        self.scan_for(resource).await
    }

    /// Listener that owns an L7 policy
    pub async fn resolve_parent_listener_id(&self, policy_id: &str) -> ReconcileResult<String> {
        let subject = ResourceRef::new(ResourceKind::L7Policy, policy_id);
        match self.api.get(ResourceKind::L7Policy, policy_id, None).await {
            Ok(policy) => {
                if let Some(listener_id) = policy.parent_id {
                    return Ok(listener_id);
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(ReconcileError::api(subject, err)),
        }

        for (_, tree) in self.trees(&subject).await? {
            if let Some(listener_id) = tree.listener_of_policy(policy_id) {
                info!("Found {} under listener {}", subject, listener_id);
                return Ok(listener_id.to_string());
            }
        }
        Err(ReconcileError::DependencyUnresolved { resource: subject })
    }

    async fn scan_for(&self, resource: &Resource) -> ReconcileResult<String> {
        let subject = resource.to_ref();
        debug!("Scanning every load balancer for {}", subject);

        let lbs = self
            .api
            .list_load_balancers()
            .await
            .map_err(|err| ReconcileError::api(subject.clone(), err))?;
        for lb in lbs {
            let Some(tree) = self.tree(&lb.id, &subject).await? else {
                continue;
            };
            self.remember(&lb.id, &tree);
            if tree
                .find(resource.kind, &resource.id, resource.addressing_parent())
                .is_some()
            {
                info!("Found {} under load balancer {}", subject, lb.id);
                return Ok(lb.id);
            }
        }
        Err(ReconcileError::DependencyUnresolved { resource: subject })
    }

    /// Status trees of every load balancer, skipping ones that vanished mid-scan
    async fn trees(&self, subject: &ResourceRef) -> ReconcileResult<Vec<(String, StatusTree)>> {
        let lbs = self
            .api
            .list_load_balancers()
            .await
            .map_err(|err| ReconcileError::api(subject.clone(), err))?;
        let mut trees = Vec::with_capacity(lbs.len());
        for lb in lbs {
            if let Some(tree) = self.tree(&lb.id, subject).await? {
                self.remember(&lb.id, &tree);
                trees.push((lb.id, tree));
            }
        }
        Ok(trees)
    }

    async fn tree(
        &self,
        lb_id: &str,
        subject: &ResourceRef,
    ) -> ReconcileResult<Option<StatusTree>> {
        match self.api.status_tree(lb_id).await {
            Ok(tree) => Ok(tree),
            Err(err) if err.is_not_found() => {
                debug!("Load balancer {} disappeared during scan", lb_id);
                Ok(None)
            }
            Err(err) => Err(ReconcileError::api(subject.clone(), err)),
        }
    }

    fn remember(&self, lb_id: &str, tree: &StatusTree) {
        for entry in tree.entries().into_iter().skip(1) {
            if entry.id.is_empty() {
                continue;
            }
            self.cache.insert(
                CacheKey::new(entry.kind, entry.id, entry.parent_id),
                lb_id.to_string(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lbstate_core::ApiError;
    use lbstate_core::status::ACTIVE;
    use lbstate_memory::{MemoryBackend, Operation, StatusReporting, StatusScript};

    /// lb-1 owns lst-1, pool-1 (via lst-1), mem-1 and pol-1; lb-2 owns pool-2
    fn backend() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new(StatusReporting::Tree));
        let objects = [
            Resource::new(ResourceKind::LoadBalancer, "lb-1"),
            Resource::new(ResourceKind::LoadBalancer, "lb-2"),
            Resource::new(ResourceKind::Listener, "lst-1").with_load_balancer("lb-1"),
            Resource::new(ResourceKind::Pool, "pool-1").with_listener("lst-1"),
            Resource::new(ResourceKind::Pool, "pool-2").with_load_balancer("lb-2"),
            Resource::new(ResourceKind::Member, "mem-1").with_parent("pool-1"),
            Resource::new(ResourceKind::L7Policy, "pol-1").with_parent("lst-1"),
        ];
        for object in objects {
            backend.insert(object, StatusScript::hold(ACTIVE));
        }
        backend
    }

    fn resolver(backend: &Arc<MemoryBackend>) -> DependencyResolver {
        DependencyResolver::new(backend.clone())
    }

    #[tokio::test]
    async fn test_own_load_balancer_list() {
        let backend = backend();
        let resolver = resolver(&backend);

        let pool = Resource::new(ResourceKind::Pool, "pool-2").with_load_balancer("lb-2");
        assert_eq!(resolver.resolve_load_balancer_id(&pool).await.unwrap(), "lb-2");

        let lb = Resource::new(ResourceKind::LoadBalancer, "lb-1");
        assert_eq!(resolver.resolve_load_balancer_id(&lb).await.unwrap(), "lb-1");
        assert_eq!(backend.calls(Operation::Get), 0);
    }

    #[tokio::test]
    async fn test_walks_parent_chain() {
        let backend = backend();
        let resolver = resolver(&backend);

        let pool = Resource::new(ResourceKind::Pool, "pool-1").with_listener("lst-1");
        assert_eq!(resolver.resolve_load_balancer_id(&pool).await.unwrap(), "lb-1");
        assert_eq!(backend.calls(Operation::Get), 1);

        let member = Resource::new(ResourceKind::Member, "mem-1").with_parent("pool-1");
        assert_eq!(
            resolver.resolve_load_balancer_id(&member).await.unwrap(),
            "lb-1"
        );
        assert_eq!(backend.calls(Operation::Get), 3);
        assert_eq!(backend.calls(Operation::List), 0);
    }

    #[tokio::test]
    async fn test_scan_when_links_missing() {
        let backend = backend();
        let resolver = resolver(&backend);

        // Imported with nothing but its ID
        let member = Resource::new(ResourceKind::Member, "mem-1");
        assert_eq!(
            resolver.resolve_load_balancer_id(&member).await.unwrap(),
            "lb-1"
        );
        assert_eq!(backend.calls(Operation::List), 1);
        assert_eq!(
            resolver
                .cached(ResourceKind::Pool, "pool-1", None)
                .as_deref(),
            Some("lb-1")
        );

        // Siblings seen by the scan resolve from the cache
        let policy = Resource::new(ResourceKind::L7Policy, "pol-1");
        assert_eq!(
            resolver.resolve_load_balancer_id(&policy).await.unwrap(),
            "lb-1"
        );
        assert_eq!(backend.calls(Operation::List), 1);
    }

    #[tokio::test]
    async fn test_scan_skips_vanished_load_balancer() {
        let backend = backend();
        let resolver = resolver(&backend);
        backend.fail_next(
            Operation::StatusTree,
            ApiError::not_found(ResourceKind::LoadBalancer, "lb-1"),
            1,
        );

        let pool = Resource::new(ResourceKind::Pool, "pool-2");
        assert_eq!(resolver.resolve_load_balancer_id(&pool).await.unwrap(), "lb-2");
    }

    #[tokio::test]
    async fn test_unresolvable() {
        let backend = backend();
        let resolver = resolver(&backend);

        let orphan = Resource::new(ResourceKind::Monitor, "mon-9").with_pool("pool-9");
        let err = resolver.resolve_load_balancer_id(&orphan).await.unwrap_err();
        assert_eq!(
            err,
            ReconcileError::DependencyUnresolved {
                resource: ResourceRef::new(ResourceKind::Monitor, "mon-9")
            }
        );
    }

    #[tokio::test]
    async fn test_parent_lookup_errors_propagate() {
        let backend = backend();
        let resolver = resolver(&backend);
        backend.fail_next(
            Operation::Get,
            ApiError::Http {
                status: 500,
                message: "down".to_string(),
            },
            1,
        );

        let pool = Resource::new(ResourceKind::Pool, "pool-1").with_listener("lst-1");
        let err = resolver.resolve_load_balancer_id(&pool).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Api { .. }));
    }

    #[tokio::test]
    async fn test_forget() {
        let backend = backend();
        let resolver = resolver(&backend);
        // Fails after scanning every tree
        let orphan = Resource::new(ResourceKind::Pool, "pool-9");
        assert!(resolver.resolve_load_balancer_id(&orphan).await.is_err());
        let cached = |kind, id| resolver.cached(kind, id, None);
        assert_eq!(cached(ResourceKind::Listener, "lst-1").as_deref(), Some("lb-1"));

        resolver.forget(&Resource::new(ResourceKind::Listener, "lst-1"));
        assert_eq!(cached(ResourceKind::Listener, "lst-1"), None);
        assert_eq!(cached(ResourceKind::Pool, "pool-1").as_deref(), Some("lb-1"));

        resolver.forget(&Resource::new(ResourceKind::LoadBalancer, "lb-1"));
        assert_eq!(cached(ResourceKind::Pool, "pool-1"), None);
        assert_eq!(cached(ResourceKind::Member, "mem-1"), None);
        assert_eq!(cached(ResourceKind::Pool, "pool-2").as_deref(), Some("lb-2"));
    }

    #[tokio::test]
    async fn test_cache_keeps_members_apart_by_pool() {
        let backend = backend();
        backend.insert(
            Resource::new(ResourceKind::Member, "mem-1").with_parent("pool-2"),
            StatusScript::hold(ACTIVE),
        );
        let resolver = resolver(&backend);

        // An unknown object makes the scan visit every tree
        let orphan = Resource::new(ResourceKind::Pool, "pool-9");
        assert!(resolver.resolve_load_balancer_id(&orphan).await.is_err());

        let in_pool = |pool| resolver.cached(ResourceKind::Member, "mem-1", Some(pool));
        assert_eq!(in_pool("pool-1").as_deref(), Some("lb-1"));
        assert_eq!(in_pool("pool-2").as_deref(), Some("lb-2"));
        // Ambiguous without the pool
        assert_eq!(resolver.cached(ResourceKind::Member, "mem-1", None), None);

        resolver.forget(&Resource::new(ResourceKind::Member, "mem-1").with_parent("pool-1"));
        assert_eq!(in_pool("pool-1"), None);
        assert_eq!(in_pool("pool-2").as_deref(), Some("lb-2"));
        assert_eq!(
            resolver
                .cached(ResourceKind::Member, "mem-1", None)
                .as_deref(),
            Some("lb-2")
        );

        let member = Resource::new(ResourceKind::Member, "mem-1").with_parent("pool-2");
        assert_eq!(
            resolver.resolve_load_balancer_id(&member).await.unwrap(),
            "lb-2"
        );
    }

    #[tokio::test]
    async fn test_parent_listener_of_policy() {
        let backend = backend();
        let resolver = resolver(&backend);
        assert_eq!(
            resolver.resolve_parent_listener_id("pol-1").await.unwrap(),
            "lst-1"
        );
        assert_eq!(backend.calls(Operation::List), 0);

        // Direct read unavailable: fall back to the trees
        backend.fail_next(
            Operation::Get,
            ApiError::not_found(ResourceKind::L7Policy, "pol-1"),
            1,
        );
        assert_eq!(
            resolver.resolve_parent_listener_id("pol-1").await.unwrap(),
            "lst-1"
        );
        assert_eq!(backend.calls(Operation::List), 1);

        let err = resolver.resolve_parent_listener_id("pol-9").await.unwrap_err();
        assert!(matches!(err, ReconcileError::DependencyUnresolved { .. }));
    }
}
