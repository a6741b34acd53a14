//! JSON fixtures describing a memory backend
//!
//! A fixture lists the reporting mode and every object with its status script:
//!
//! ```json
//! {
//!   "reporting": "tree",
//!   "objects": [
//!     {"resource": {"kind": "loadbalancer", "id": "lb-1"}, "script": {"then": {"hold": "ACTIVE"}}},
//!     {"resource": {"kind": "pool", "id": "pool-1", "load_balancers": ["lb-1"]},
//!      "script": {"steps": ["PENDING_UPDATE"], "then": {"hold": "ACTIVE"}},
//!      "tracked": false}
//!   ],
//!   "null_trees": []
//! }
//! ```

use std::path::Path;

use lbstate_core::Resource;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{MemoryBackend, StatusReporting};
use crate::script::StatusScript;

/// Errors that can occur when loading a fixture
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Invalid fixture: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureObject {
    pub resource: Resource,
    pub script: StatusScript,
    /// Whether status trees report the object
    #[serde(default = "default_tracked")]
    pub tracked: bool,
}

fn default_tracked() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub reporting: StatusReporting,
    #[serde(default)]
    pub objects: Vec<FixtureObject>,
    /// Load balancers whose status tree is a null document
    #[serde(default)]
    pub null_trees: Vec<String>,
}

impl Fixture {
    pub fn from_json(json: &str) -> Result<Self, FixtureError> {
        serde_json::from_str(json).map_err(|e| FixtureError::Parse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FixtureError::Io(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn into_backend(self) -> MemoryBackend {
        let backend = MemoryBackend::new(self.reporting);
        for object in self.objects {
            let (kind, id, parent) = (
                object.resource.kind,
                object.resource.id.clone(),
                object.resource.parent_id.clone(),
            );
            backend.insert(object.resource, object.script);
            if !object.tracked {
                backend.hide_from_tree(kind, &id, parent.as_deref());
            }
        }
        for lb_id in &self.null_trees {
            backend.set_null_tree(lb_id);
        }
        backend
    }
}

impl MemoryBackend {
    /// Build a backend from a JSON fixture file
    pub fn from_fixture_file(path: &Path) -> Result<Self, FixtureError> {
        Ok(Fixture::load(path)?.into_backend())
    }
}
