//! In-memory load balancer backend

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use lbstate_core::tree::{
    L7PolicyStatus, L7RuleStatus, ListenerStatus, LoadBalancerStatus, MemberStatus,
    MonitorStatus, PoolStatus,
};
use lbstate_core::{ApiError, ApiResult, LoadBalancerApi, Resource, ResourceKind, StatusTree};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::script::StatusScript;

/// How the simulated backend reports provisioning status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusReporting {
    /// Every object carries its own `provisioning_status`
    #[default]
    Direct,
    /// Objects carry no status; only the load balancer status tree does
    Tree,
}

/// Backend operations, for fault injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    List,
    StatusTree,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    kind: ResourceKind,
    parent: Option<String>,
    id: String,
}

impl Key {
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

    fn of(resource: &Resource) -> Self {
        Self::new(resource.kind, &resource.id, resource.parent_id.as_deref())
    }
}

#[derive(Debug)]
struct Entry {
    resource: Resource,
    script: StatusScript,
    /// Whether the status tree reports this object
    tracked: bool,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<Key, Entry>,
    faults: HashMap<Operation, VecDeque<ApiError>>,
    calls: HashMap<Operation, usize>,
    null_trees: HashSet<String>,
    stalled: HashSet<Operation>,
}

impl Inner {
    /// Count the call and pop an injected fault, if any
    fn enter(&mut self, operation: Operation) -> ApiResult<()> {
        *self.calls.entry(operation).or_default() += 1;
        match self
            .faults
            .get_mut(&operation)
            .and_then(|queue| queue.pop_front())
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn find_key(&self, kind: ResourceKind, id: &str, parent_id: Option<&str>) -> Option<Key> {
        let key = Key::new(kind, id, parent_id);
        if self.objects.contains_key(&key) {
            return Some(key);
        }
        // Members and rules read without a parent: first match wins
        if kind.requires_parent() && parent_id.is_none() {
            return self
                .objects
                .keys()
                .find(|k| k.kind == kind && k.id == id)
                .cloned();
        }
        None
    }

    /// Consume one status step; a vanished object is removed
    fn observe(&mut self, key: &Key) -> Option<String> {
        let status = self.objects.get_mut(key)?.script.observe();
        if status.is_none() {
            debug!("{} {} vanished", key.kind, key.id);
            self.objects.remove(key);
        }
        status
    }

    /// Drop the object if its script has already run out
    fn is_gone(&mut self, key: &Key) -> bool {
        let gone = match self.objects.get(key) {
            Some(entry) => entry.script.peek().is_none(),
            None => true,
        };
        if gone {
            self.objects.remove(key);
        }
        gone
    }

    fn owning_load_balancer(&self, resource: &Resource) -> Option<String> {
        let mut current = resource.clone();
        for _ in 0..ResourceKind::ALL.len() {
            if current.kind == ResourceKind::LoadBalancer {
                return Some(current.id);
            }
            if let Some(lb_id) = current.load_balancers.first() {
                return Some(lb_id.clone());
            }
            let parent = current.parent_ref()?;
            current = self
                .objects
                .get(&Key::new(parent.kind, &parent.id, None))?
                .resource
                .clone();
        }
        None
    }

    /// Put the owning load balancer through an update cycle
    fn touch_owner(&mut self, resource: &Resource) {
        if resource.kind == ResourceKind::LoadBalancer {
            return;
        }
        if let Some(lb_id) = self.owning_load_balancer(resource)
            && let Some(entry) = self
                .objects
                .get_mut(&Key::new(ResourceKind::LoadBalancer, &lb_id, None))
        {
            entry.script = StatusScript::updating();
        }
    }

    fn build_tree(&mut self, lb_id: &str) -> ApiResult<StatusTree> {
        let lb_key = Key::new(ResourceKind::LoadBalancer, lb_id, None);
        if !self.objects.contains_key(&lb_key) {
            return Err(ApiError::not_found(ResourceKind::LoadBalancer, lb_id));
        }

        let keys: Vec<Key> = self
            .objects
            .iter()
            .filter(|(_, entry)| entry.tracked)
            .filter(|(_, entry)| {
                self.owning_load_balancer(&entry.resource).as_deref() == Some(lb_id)
            })
            .map(|(key, _)| key.clone())
            .collect();

        let mut observed: Vec<(Resource, String)> = Vec::new();
        for key in keys {
            let resource = match self.objects.get(&key) {
                Some(entry) => entry.resource.clone(),
                None => continue,
            };
            if let Some(status) = self.observe(&key) {
                observed.push((resource, status));
            }
        }

        let Some((lb, lb_status)) = observed
            .iter()
            .find(|(r, _)| r.kind == ResourceKind::LoadBalancer)
        else {
            return Err(ApiError::not_found(ResourceKind::LoadBalancer, lb_id));
        };

        let of_kind = |kind: ResourceKind| observed.iter().filter(move |(r, _)| r.kind == kind);
        let child_of = |kind: ResourceKind, parent: &str| {
            let parent = parent.to_string();
            observed.iter().filter(move |(r, _)| {
                r.kind == kind && r.parent_id.as_deref() == Some(parent.as_str())
            })
        };

        let listeners = of_kind(ResourceKind::Listener)
            .map(|(listener, status)| ListenerStatus {
                id: listener.id.clone(),
                name: listener.name.clone(),
                provisioning_status: status.clone(),
                l7_policies: child_of(ResourceKind::L7Policy, &listener.id)
                    .map(|(policy, status)| L7PolicyStatus {
                        id: policy.id.clone(),
                        name: policy.name.clone(),
                        provisioning_status: status.clone(),
                        rules: child_of(ResourceKind::L7Rule, &policy.id)
                            .map(|(rule, status)| L7RuleStatus {
                                id: rule.id.clone(),
                                provisioning_status: status.clone(),
                                ..Default::default()
                            })
                            .collect(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            })
            .collect();

        let pools = of_kind(ResourceKind::Pool)
            .map(|(pool, status)| PoolStatus {
                id: pool.id.clone(),
                name: pool.name.clone(),
                provisioning_status: status.clone(),
                monitor: of_kind(ResourceKind::Monitor)
                    .find(|(monitor, _)| monitor.pools.contains(&pool.id))
                    .map(|(monitor, status)| MonitorStatus {
                        id: monitor.id.clone(),
                        provisioning_status: status.clone(),
                        ..Default::default()
                    }),
                members: child_of(ResourceKind::Member, &pool.id)
                    .map(|(member, status)| MemberStatus {
                        id: member.id.clone(),
                        name: member.name.clone(),
                        provisioning_status: status.clone(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            })
            .collect();

        Ok(StatusTree {
            loadbalancer: Some(LoadBalancerStatus {
                id: lb.id.clone(),
                name: lb.name.clone(),
                provisioning_status: lb_status.clone(),
                listeners,
                pools,
                ..Default::default()
            }),
        })
    }
}

/// Scriptable in-memory backend
///
/// Status reads consume one step of the object's [`StatusScript`]: `get` in
/// [`StatusReporting::Direct`] mode, `status_tree` in both modes (for every
/// object in the tree). Listing load balancers never consumes a step.
#[derive(Debug)]
pub struct MemoryBackend {
    reporting: StatusReporting,
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    pub fn new(reporting: StatusReporting) -> Self {
        Self {
            reporting,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn reporting(&self) -> StatusReporting {
        self.reporting
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self, resource: &Resource, status: Option<String>) -> Resource {
        let mut snapshot = resource.clone();
        snapshot.provisioning_status = match self.reporting {
            StatusReporting::Direct => status,
            StatusReporting::Tree => None,
        };
        snapshot
    }

    /// Add an object whose statuses follow `script`
    pub fn insert(&self, resource: Resource, script: StatusScript) {
        let mut stored = resource;
        stored.provisioning_status = None;
        self.lock().objects.insert(
            Key::of(&stored),
            Entry {
                resource: stored,
                script,
                tracked: true,
            },
        );
    }

    /// Replace the script of an existing object; false if it does not exist
    pub fn script(
        &self,
        kind: ResourceKind,
        id: &str,
        parent_id: Option<&str>,
        script: StatusScript,
    ) -> bool {
        let mut inner = self.lock();
        let Some(key) = inner.find_key(kind, id, parent_id) else {
            return false;
        };
        match inner.objects.get_mut(&key) {
            Some(entry) => {
                entry.script = script;
                true
            }
            None => false,
        }
    }

    /// Leave the object out of status trees, like a legacy backend that does not track it
    pub fn hide_from_tree(&self, kind: ResourceKind, id: &str, parent_id: Option<&str>) {
        let mut inner = self.lock();
        if let Some(key) = inner.find_key(kind, id, parent_id)
            && let Some(entry) = inner.objects.get_mut(&key)
        {
            entry.tracked = false;
        }
    }

    /// Answer status tree requests for this load balancer with a null document
    pub fn set_null_tree(&self, load_balancer_id: &str) {
        self.lock().null_trees.insert(load_balancer_id.to_string());
    }

    /// Fail the next `times` calls of `operation` with `error`
    pub fn fail_next(&self, operation: Operation, error: ApiError, times: usize) {
        let mut inner = self.lock();
        let queue = inner.faults.entry(operation).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Make every later call of `operation` hang, like a backend that stopped answering
    pub fn stall(&self, operation: Operation) {
        self.lock().stalled.insert(operation);
    }

    /// Park a stalled call forever; the call still counts
    async fn hang_if_stalled(&self, operation: Operation) {
        let stalled = {
            let mut inner = self.lock();
            let stalled = inner.stalled.contains(&operation);
            if stalled {
                *inner.calls.entry(operation).or_default() += 1;
            }
            stalled
        };
        if stalled {
            debug!("{:?} stalled", operation);
            std::future::pending::<()>().await;
        }
    }

    /// Number of calls made to `operation`, including failed ones
    pub fn calls(&self, operation: Operation) -> usize {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    pub fn contains(&self, kind: ResourceKind, id: &str, parent_id: Option<&str>) -> bool {
        let inner = self.lock();
        inner
            .find_key(kind, id, parent_id)
            .and_then(|key| inner.objects.get(&key))
            .is_some_and(|entry| entry.script.peek().is_some())
    }

    /// The status the next read would report, without consuming it
    pub fn peek_status(
        &self,
        kind: ResourceKind,
        id: &str,
        parent_id: Option<&str>,
    ) -> Option<String> {
        let inner = self.lock();
        let key = inner.find_key(kind, id, parent_id)?;
        inner
            .objects
            .get(&key)
            .and_then(|entry| entry.script.peek())
            .map(str::to_string)
    }
}

#[async_trait]
impl LoadBalancerApi for MemoryBackend {
    async fn get(
        &self,
        kind: ResourceKind,
        id: &str,
        parent_id: Option<&str>,
    ) -> ApiResult<Resource> {
        self.hang_if_stalled(Operation::Get).await;
        let mut inner = self.lock();
        inner.enter(Operation::Get)?;

        let key = inner
            .find_key(kind, id, parent_id)
            .ok_or_else(|| ApiError::not_found(kind, id))?;
        let resource = match inner.objects.get(&key) {
            Some(entry) => entry.resource.clone(),
            None => return Err(ApiError::not_found(kind, id)),
        };

        let status = match self.reporting {
            StatusReporting::Direct => inner.observe(&key),
            StatusReporting::Tree => {
                if inner.is_gone(&key) {
                    None
                } else {
                    Some(String::new())
                }
            }
        };
        match status {
            Some(status) => Ok(self.snapshot(&resource, Some(status))),
            None => Err(ApiError::not_found(kind, id)),
        }
    }

    async fn list_load_balancers(&self) -> ApiResult<Vec<Resource>> {
        self.hang_if_stalled(Operation::List).await;
        let mut inner = self.lock();
        inner.enter(Operation::List)?;

        Ok(inner
            .objects
            .iter()
            .filter(|(key, _)| key.kind == ResourceKind::LoadBalancer)
            .filter_map(|(_, entry)| {
                let status = entry.script.peek()?;
                Some(self.snapshot(&entry.resource, Some(status.to_string())))
            })
            .collect())
    }

    async fn status_tree(&self, load_balancer_id: &str) -> ApiResult<Option<StatusTree>> {
        self.hang_if_stalled(Operation::StatusTree).await;
        let mut inner = self.lock();
        inner.enter(Operation::StatusTree)?;

        if inner.null_trees.contains(load_balancer_id) {
            return Ok(None);
        }
        inner.build_tree(load_balancer_id).map(Some)
    }

    async fn create(&self, draft: &Resource) -> ApiResult<Resource> {
        self.hang_if_stalled(Operation::Create).await;
        let mut inner = self.lock();
        inner.enter(Operation::Create)?;

        let mut resource = draft.clone();
        resource.provisioning_status = None;
        if resource.id.is_empty() {
            resource.id = uuid::Uuid::new_v4().to_string();
        }
        if resource.kind.requires_parent() && resource.parent_id.is_none() {
            return Err(ApiError::Http {
                status: 400,
                message: format!("{} requires a parent ID", resource.kind),
            });
        }
        let key = Key::of(&resource);
        if inner.objects.contains_key(&key) {
            return Err(ApiError::Http {
                status: 400,
                message: format!("{} {} already exists", resource.kind, resource.id),
            });
        }

        let script = StatusScript::creating();
        let status = script.peek().map(str::to_string);
        inner.touch_owner(&resource);
        inner.objects.insert(
            key,
            Entry {
                resource: resource.clone(),
                script,
                tracked: true,
            },
        );
        debug!("Created {} {}", resource.kind, resource.id);

        Ok(self.snapshot(&resource, status))
    }

    async fn update(&self, resource: &Resource) -> ApiResult<Resource> {
        self.hang_if_stalled(Operation::Update).await;
        let mut inner = self.lock();
        inner.enter(Operation::Update)?;

        let key = inner
            .find_key(resource.kind, &resource.id, resource.parent_id.as_deref())
            .ok_or_else(|| ApiError::not_found(resource.kind, &resource.id))?;
        if inner.is_gone(&key) {
            return Err(ApiError::not_found(resource.kind, &resource.id));
        }

        let mut updated = resource.clone();
        updated.provisioning_status = None;
        let script = StatusScript::updating();
        let status = script.peek().map(str::to_string);
        if let Some(entry) = inner.objects.get_mut(&key) {
            entry.resource = updated.clone();
            entry.script = script;
        }
        inner.touch_owner(&updated);
        debug!("Updated {} {}", updated.kind, updated.id);

        Ok(self.snapshot(&updated, status))
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        id: &str,
        parent_id: Option<&str>,
    ) -> ApiResult<()> {
        self.hang_if_stalled(Operation::Delete).await;
        let mut inner = self.lock();
        inner.enter(Operation::Delete)?;

        let key = inner
            .find_key(kind, id, parent_id)
            .ok_or_else(|| ApiError::not_found(kind, id))?;
        if inner.is_gone(&key) {
            return Err(ApiError::not_found(kind, id));
        }

        let resource = match inner.objects.get_mut(&key) {
            Some(entry) => {
                entry.script = StatusScript::deleting();
                entry.resource.clone()
            }
            None => return Err(ApiError::not_found(kind, id)),
        };
        inner.touch_owner(&resource);
        debug!("Deleting {} {}", kind, id);

        Ok(())
    }
}
