//! Enforcement module
//!
//! Request-time authorization: principal resolution, throttled policy reload,
//! allow/deny decisions, denial auditing and UI permission summaries.

pub mod audit;
pub mod facade;

pub use audit::{AuditSink, DenialRecord, JsonlAuditLog, MemoryAuditSink, TracingAuditSink, AUDIT_TARGET};
pub use facade::{Enforcer, ResourcePermissions};
