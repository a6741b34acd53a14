//! Status tree - Aggregate provisioning status rooted at a load balancer
//!
//! Backends that do not report `provisioning_status` on each object expose a
//! single nested document per load balancer instead. A null document, or a
//! document with a null root, means "no status known" and is not an error.

use serde::{Deserialize, Deserializer, Serialize};

use crate::resource::ResourceKind;

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusTree {
    #[serde(default)]
    pub loadbalancer: Option<LoadBalancerStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerStatus {
    #[serde(default, deserialize_with = "nullable")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub provisioning_status: String,
    #[serde(default, deserialize_with = "nullable")]
    pub operating_status: String,
    #[serde(default, deserialize_with = "nullable")]
    pub listeners: Vec<ListenerStatus>,
    #[serde(default, deserialize_with = "nullable")]
    pub pools: Vec<PoolStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListenerStatus {
    #[serde(default, deserialize_with = "nullable")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub provisioning_status: String,
    #[serde(default, deserialize_with = "nullable")]
    pub operating_status: String,
    #[serde(rename = "l7policies", default, deserialize_with = "nullable")]
    pub l7_policies: Vec<L7PolicyStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct L7PolicyStatus {
    #[serde(default, deserialize_with = "nullable")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub provisioning_status: String,
    #[serde(default, deserialize_with = "nullable")]
    pub operating_status: String,
    #[serde(default, deserialize_with = "nullable")]
    pub rules: Vec<L7RuleStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct L7RuleStatus {
    #[serde(default, deserialize_with = "nullable")]
    pub id: String,
    #[serde(rename = "type", default, deserialize_with = "nullable")]
    pub rule_type: String,
    #[serde(default, deserialize_with = "nullable")]
    pub provisioning_status: String,
    #[serde(default, deserialize_with = "nullable")]
    pub operating_status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStatus {
    #[serde(default, deserialize_with = "nullable")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub provisioning_status: String,
    #[serde(default, deserialize_with = "nullable")]
    pub operating_status: String,
    #[serde(rename = "healthmonitor", default)]
    pub monitor: Option<MonitorStatus>,
    #[serde(default, deserialize_with = "nullable")]
    pub members: Vec<MemberStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    #[serde(default, deserialize_with = "nullable")]
    pub id: String,
    #[serde(rename = "type", default, deserialize_with = "nullable")]
    pub monitor_type: String,
    #[serde(default, deserialize_with = "nullable")]
    pub provisioning_status: String,
    #[serde(default, deserialize_with = "nullable")]
    pub operating_status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberStatus {
    #[serde(default, deserialize_with = "nullable")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub address: String,
    #[serde(default)]
    pub protocol_port: Option<u16>,
    #[serde(default, deserialize_with = "nullable")]
    pub provisioning_status: String,
    #[serde(default, deserialize_with = "nullable")]
    pub operating_status: String,
}

/// One node of a status tree, flattened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEntry<'a> {
    pub kind: ResourceKind,
    pub id: &'a str,
    pub provisioning_status: &'a str,
    pub operating_status: &'a str,
    /// Pool of a member, listener of an L7 policy, L7 policy of an L7 rule
    pub parent_id: Option<&'a str>,
}

impl<'a> StatusEntry<'a> {
    fn new(
        kind: ResourceKind,
        id: &'a str,
        provisioning_status: &'a str,
        operating_status: &'a str,
    ) -> Self {
        Self {
            kind,
            id,
            provisioning_status,
            operating_status,
            parent_id: None,
        }
    }

    fn under(mut self, parent_id: &'a str) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// Wire envelope: `{"statuses": {"loadbalancer": {...}}}`, where `statuses` may be null
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    statuses: Option<StatusTree>,
}

impl StatusTree {
    /// Parse a status document, with or without the `statuses` envelope
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if value.is_null() {
            return Ok(Self::default());
        }
        if value.get("statuses").is_some() {
            let envelope: Envelope = serde_json::from_value(value)?;
            return Ok(envelope.statuses.unwrap_or_default());
        }
        serde_json::from_value(value)
    }

    /// Status of the root load balancer, empty when unknown
    pub fn root_status(&self) -> &str {
        self.loadbalancer
            .as_ref()
            .map(|lb| lb.provisioning_status.as_str())
            .unwrap_or("")
    }

    /// Find an object by kind and ID
    ///
    /// For members and L7 rules, `parent_id` restricts the search to that pool
    /// or L7 policy, since their IDs are only unique within the parent.
    pub fn find(
        &self,
        kind: ResourceKind,
        id: &str,
        parent_id: Option<&str>,
    ) -> Option<StatusEntry<'_>> {
        let lb = self.loadbalancer.as_ref()?;
        let parent_matches = |candidate: &str| parent_id.is_none_or(|p| p == candidate);

        match kind {
            ResourceKind::LoadBalancer => (lb.id == id).then(|| {
                StatusEntry::new(kind, &lb.id, &lb.provisioning_status, &lb.operating_status)
            }),
            ResourceKind::Listener => lb.listeners.iter().find(|l| l.id == id).map(|l| {
                StatusEntry::new(kind, &l.id, &l.provisioning_status, &l.operating_status)
            }),
            ResourceKind::Pool => lb.pools.iter().find(|p| p.id == id).map(|p| {
                StatusEntry::new(kind, &p.id, &p.provisioning_status, &p.operating_status)
            }),
            ResourceKind::Monitor => lb
                .pools
                .iter()
                .filter_map(|p| p.monitor.as_ref())
                .find(|m| m.id == id)
                .map(|m| {
                    StatusEntry::new(kind, &m.id, &m.provisioning_status, &m.operating_status)
                }),
            ResourceKind::Member => lb
                .pools
                .iter()
                .filter(|p| parent_matches(p.id.as_str()))
                .flat_map(|p| p.members.iter().map(move |m| (p, m)))
                .find(|(_, m)| m.id == id)
                .map(|(p, m)| {
                    StatusEntry::new(kind, &m.id, &m.provisioning_status, &m.operating_status)
                        .under(&p.id)
                }),
            ResourceKind::L7Policy => lb
                .listeners
                .iter()
                .flat_map(|l| l.l7_policies.iter().map(move |p| (l, p)))
                .find(|(_, p)| p.id == id)
                .map(|(l, p)| {
                    StatusEntry::new(kind, &p.id, &p.provisioning_status, &p.operating_status)
                        .under(&l.id)
                }),
            ResourceKind::L7Rule => lb
                .listeners
                .iter()
                .flat_map(|l| l.l7_policies.iter())
                .filter(|p| parent_matches(p.id.as_str()))
                .flat_map(|p| p.rules.iter().map(move |r| (p, r)))
                .find(|(_, r)| r.id == id)
                .map(|(p, r)| {
                    StatusEntry::new(kind, &r.id, &r.provisioning_status, &r.operating_status)
                        .under(&p.id)
                }),
        }
    }

    /// Every node of the tree, root first
    pub fn entries(&self) -> Vec<StatusEntry<'_>> {
        let mut entries = Vec::new();
        let Some(lb) = self.loadbalancer.as_ref() else {
            return entries;
        };

        entries.push(StatusEntry::new(
            ResourceKind::LoadBalancer,
            &lb.id,
            &lb.provisioning_status,
            &lb.operating_status,
        ));
        for listener in &lb.listeners {
            entries.push(StatusEntry::new(
                ResourceKind::Listener,
                &listener.id,
                &listener.provisioning_status,
                &listener.operating_status,
            ));
            for policy in &listener.l7_policies {
                entries.push(
                    StatusEntry::new(
                        ResourceKind::L7Policy,
                        &policy.id,
                        &policy.provisioning_status,
                        &policy.operating_status,
                    )
                    .under(&listener.id),
                );
                for rule in &policy.rules {
                    entries.push(
                        StatusEntry::new(
                            ResourceKind::L7Rule,
                            &rule.id,
                            &rule.provisioning_status,
                            &rule.operating_status,
                        )
                        .under(&policy.id),
                    );
                }
            }
        }
        for pool in &lb.pools {
            entries.push(StatusEntry::new(
                ResourceKind::Pool,
                &pool.id,
                &pool.provisioning_status,
                &pool.operating_status,
            ));
            if let Some(monitor) = &pool.monitor {
                entries.push(StatusEntry::new(
                    ResourceKind::Monitor,
                    &monitor.id,
                    &monitor.provisioning_status,
                    &monitor.operating_status,
                ));
            }
            for member in &pool.members {
                entries.push(
                    StatusEntry::new(
                        ResourceKind::Member,
                        &member.id,
                        &member.provisioning_status,
                        &member.operating_status,
                    )
                    .under(&pool.id),
                );
            }
        }
        entries
    }

    /// Whether any node below the root has this ID
    pub fn contains_descendant(&self, id: &str) -> bool {
        self.entries()
            .iter()
            .skip(1)
            .any(|entry| entry.id == id)
    }

    /// IDs of every node below the root
    pub fn descendant_ids(&self) -> Vec<&str> {
        self.entries()
            .into_iter()
            .skip(1)
            .map(|entry| entry.id)
            .filter(|id| !id.is_empty())
            .collect()
    }

    /// ID of the listener that owns an L7 policy
    pub fn listener_of_policy(&self, policy_id: &str) -> Option<&str> {
        self.loadbalancer
            .as_ref()?
            .listeners
            .iter()
            .find(|l| l.l7_policies.iter().any(|p| p.id == policy_id))
            .map(|l| l.id.as_str())
    }
}
