//! Role assignment module
//!
//! Durable group/user -> role mappings (global and per-application) and the
//! read-side [`RoleDirectory`] seam used by the enforcement façade.

pub mod persistence;
pub mod store;

pub use persistence::{migrate_legacy, Migration, RoleAssignments};
pub use store::{RoleDirectory, RoleStore};
