//! lbstate Reconcile
//!
//! Tracks load balancer objects through their provisioning lifecycle.
//!
//! # Overview
//!
//! - **DependencyResolver**: finds the load balancer that owns an object
//! - **Refresher**: reads an object's status over the direct or tree protocol
//! - **wait_for**: polls a refresh function until a target status is reached
//! - **retry_mutation**: retries writes rejected by a busy load balancer
//! - **Reconciler**: all of the above bound to one backend and configuration

pub mod config;
pub mod error;
pub mod reconciler;
pub mod refresh;
pub mod resolver;
pub mod retry;
pub mod waiter;

pub use config::{ConfigError, ReconcileConfig, RetryConfig, StatusProtocol, WaitConfig};
pub use error::{ReconcileError, ReconcileResult};
pub use reconciler::Reconciler;
pub use refresh::{RefreshStrategy, Refresher};
pub use resolver::DependencyResolver;
pub use retry::retry_mutation;
pub use waiter::{Observation, Refresh, Settled, wait_for};
