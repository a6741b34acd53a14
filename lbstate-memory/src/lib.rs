//! lbstate Memory Backend
//!
//! An in-memory implementation of [`lbstate_core::LoadBalancerApi`] whose
//! provisioning statuses follow scripts instead of a real control plane.
//!
//! # Overview
//!
//! - **StatusScript**: the sequence of statuses an object reports, one per read
//! - **MemoryBackend**: the backend itself, in either status reporting mode
//! - **Fixture**: a JSON description of a backend, loadable from a file
//!
//! # Example
//!
//! ```ignore
//! use lbstate_memory::{MemoryBackend, StatusReporting, StatusScript};
//!
//! let backend = MemoryBackend::new(StatusReporting::Tree);
//! backend.insert(
//!     Resource::new(ResourceKind::LoadBalancer, "lb-1"),
//!     StatusScript::hold("ACTIVE"),
//! );
//! let tree = backend.status_tree("lb-1").await?;
//! ```

pub mod backend;
pub mod fixture;
pub mod script;

pub use backend::{MemoryBackend, Operation, StatusReporting};
pub use fixture::{Fixture, FixtureError};
pub use script::{Settle, StatusScript};
