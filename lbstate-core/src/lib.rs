//! lbstate Core
//!
//! Resource model, provisioning status vocabulary and the backend interface
//! shared by the load balancer reconciliation engine and its backends.

pub mod api;
pub mod resource;
pub mod status;
pub mod tree;

pub use api::{ApiError, ApiResult, LoadBalancerApi};
pub use resource::{Resource, ResourceKind, ResourceRef};
pub use status::StatusSet;
pub use tree::{StatusEntry, StatusTree};
