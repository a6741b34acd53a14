//! Resource - Load balancer objects and the links between them

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of load balancer object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    LoadBalancer,
    Listener,
    Pool,
    Monitor,
    Member,
    L7Policy,
    L7Rule,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::LoadBalancer,
        ResourceKind::Listener,
        ResourceKind::Pool,
        ResourceKind::Monitor,
        ResourceKind::Member,
        ResourceKind::L7Policy,
        ResourceKind::L7Rule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::LoadBalancer => "loadbalancer",
            ResourceKind::Listener => "listener",
            ResourceKind::Pool => "pool",
            ResourceKind::Monitor => "monitor",
            ResourceKind::Member => "member",
            ResourceKind::L7Policy => "l7policy",
            ResourceKind::L7Rule => "l7rule",
        }
    }

    /// Whether the object can only be addressed through its parent (a pool or an L7 policy)
    pub fn requires_parent(&self) -> bool {
        matches!(self, ResourceKind::Member | ResourceKind::L7Rule)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind and ID of an object, carried in errors and log lines
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// A load balancer object as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: ResourceKind,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Empty or absent when the backend does not report it for this object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    /// Owning load balancers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_balancers: Vec<String>,
    /// Owning listeners (pools)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<String>,
    /// Owning pools (monitors)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pools: Vec<String>,
    /// Addressing parent: the pool of a member, the listener of an L7 policy,
    /// the L7 policy of an L7 rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Resource {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            name: String::new(),
            provisioning_status: None,
            status_reason: None,
            load_balancers: Vec::new(),
            listeners: Vec::new(),
            pools: Vec::new(),
            parent_id: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.provisioning_status = Some(status.into());
        self
    }

    pub fn with_status_reason(mut self, reason: impl Into<String>) -> Self {
        self.status_reason = Some(reason.into());
        self
    }

    pub fn with_load_balancer(mut self, id: impl Into<String>) -> Self {
        self.load_balancers.push(id.into());
        self
    }

    pub fn with_listener(mut self, id: impl Into<String>) -> Self {
        self.listeners.push(id.into());
        self
    }

    pub fn with_pool(mut self, id: impl Into<String>) -> Self {
        self.pools.push(id.into());
        self
    }

    pub fn with_parent(mut self, id: impl Into<String>) -> Self {
        self.parent_id = Some(id.into());
        self
    }

    pub fn to_ref(&self) -> ResourceRef {
        ResourceRef::new(self.kind, self.id.clone())
    }

    /// The provisioning status, if the backend reported one directly
    pub fn direct_status(&self) -> Option<&str> {
        self.provisioning_status
            .as_deref()
            .filter(|status| !status.is_empty())
    }

    /// The next object on the path towards the owning load balancer
    ///
    /// Returns `None` for load balancers and listeners, and for objects whose
    /// parent link is missing (e.g. after an import with partial data).
    pub fn parent_ref(&self) -> Option<ResourceRef> {
        let (kind, id) = match self.kind {
            ResourceKind::LoadBalancer | ResourceKind::Listener => return None,
            ResourceKind::Pool => (ResourceKind::Listener, self.listeners.first()?),
            ResourceKind::Monitor => (ResourceKind::Pool, self.pools.first()?),
            ResourceKind::Member => (ResourceKind::Pool, self.parent_id.as_ref()?),
            ResourceKind::L7Policy => (ResourceKind::Listener, self.parent_id.as_ref()?),
            ResourceKind::L7Rule => (ResourceKind::L7Policy, self.parent_id.as_ref()?),
        };
        Some(ResourceRef::new(kind, id.clone()))
    }

    /// Parent ID needed to address the object itself (members and L7 rules)
    pub fn addressing_parent(&self) -> Option<&str> {
        if self.kind.requires_parent() {
            self.parent_id.as_deref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display_matches_serde() {
        for kind in ResourceKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }

    #[test]
    fn test_direct_status_ignores_empty() {
        let pool = Resource::new(ResourceKind::Pool, "pool-1").with_status("");
        assert_eq!(pool.direct_status(), None);

        let pool = pool.with_status("ACTIVE");
        assert_eq!(pool.direct_status(), Some("ACTIVE"));
    }

    #[test]
    fn test_parent_ref_per_kind() {
        let pool = Resource::new(ResourceKind::Pool, "pool-1").with_listener("lst-1");
        assert_eq!(
            pool.parent_ref(),
            Some(ResourceRef::new(ResourceKind::Listener, "lst-1"))
        );

        let monitor = Resource::new(ResourceKind::Monitor, "mon-1").with_pool("pool-1");
        assert_eq!(
            monitor.parent_ref(),
            Some(ResourceRef::new(ResourceKind::Pool, "pool-1"))
        );

        let rule = Resource::new(ResourceKind::L7Rule, "rule-1").with_parent("pol-1");
        assert_eq!(
            rule.parent_ref(),
            Some(ResourceRef::new(ResourceKind::L7Policy, "pol-1"))
        );

        let listener = Resource::new(ResourceKind::Listener, "lst-1");
        assert_eq!(listener.parent_ref(), None);

        let orphan = Resource::new(ResourceKind::Member, "mem-1");
        assert_eq!(orphan.parent_ref(), None);
    }

    #[test]
    fn test_addressing_parent_only_for_members_and_rules() {
        let policy = Resource::new(ResourceKind::L7Policy, "pol-1").with_parent("lst-1");
        assert_eq!(policy.addressing_parent(), None);

        let member = Resource::new(ResourceKind::Member, "mem-1").with_parent("pool-1");
        assert_eq!(member.addressing_parent(), Some("pool-1"));
    }

    #[test]
    fn test_resource_deserializes_with_defaults() {
        let json = r#"{"kind": "listener", "id": "lst-1", "load_balancers": ["lb-1"]}"#;
        let listener: Resource = serde_json::from_str(json).unwrap();
        assert_eq!(listener.kind, ResourceKind::Listener);
        assert_eq!(listener.load_balancers, vec!["lb-1".to_string()]);
        assert!(listener.provisioning_status.is_none());
        assert!(listener.name.is_empty());
    }
}
