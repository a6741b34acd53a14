//! Provisioning status vocabulary
//!
//! Status strings are whatever the backend returns; the constants below are the
//! ones the engine needs to name. Sets are plain values handed to each wait, so
//! callers decide which statuses count as "still settling" for a given operation.

use std::fmt;

pub const ACTIVE: &str = "ACTIVE";
pub const ERROR: &str = "ERROR";
pub const PENDING_CREATE: &str = "PENDING_CREATE";
pub const PENDING_UPDATE: &str = "PENDING_UPDATE";
pub const PENDING_DELETE: &str = "PENDING_DELETE";

/// Target meaning "the object is gone"; a `NotFound` read satisfies it
pub const DELETED: &str = "DELETED";

/// Whether `target` is the deletion sentinel
pub fn is_deletion_target(target: &str) -> bool {
    target == DELETED
}

/// An explicit set of provisioning statuses
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusSet {
    statuses: Vec<String>,
}

impl StatusSet {
    pub fn new<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for status in statuses {
            set.insert(status);
        }
        set
    }

    /// Statuses of an object that is still being provisioned
    pub fn pending() -> Self {
        Self::new([PENDING_CREATE, PENDING_UPDATE, PENDING_DELETE])
    }

    /// Statuses in which a load balancer accepts child reads
    pub fn stable() -> Self {
        Self::new([ACTIVE, ERROR])
    }

    /// Statuses tolerated while waiting for a child object to disappear
    pub fn pending_delete() -> Self {
        Self::new([ERROR, PENDING_UPDATE, PENDING_DELETE, ACTIVE])
    }

    pub fn insert(&mut self, status: impl Into<String>) {
        let status = status.into();
        if !self.contains(&status) {
            self.statuses.push(status);
        }
    }

    pub fn contains(&self, status: &str) -> bool {
        self.statuses.iter().any(|s| s == status)
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.statuses.iter().map(String::as_str)
    }
}

impl fmt::Display for StatusSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.statuses.join(", "))
    }
}

impl<S: Into<String>> FromIterator<S> for StatusSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}
