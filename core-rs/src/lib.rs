//! # Self-Service RBAC Core
//!
//! Authorization core of the Kubernetes self-service backend. Every endpoint
//! that reads or writes application, namespace, IP allocation or firewall
//! requests asks this crate one question: may this user perform this action on
//! this resource within this application?
//!
//! ## Components
//!
//! - **Role Assignment Store** ([`roles`]) - users/groups to global and
//!   per-application roles, persisted as flat YAML files
//! - **Policy Engine** ([`policy`]) - declarative (subject, object, action,
//!   app-scope) rows evaluated with allow-if-any semantics
//! - **Enforcement Façade** ([`enforcer`]) - principal resolution, throttled
//!   policy reload, denial auditing, `canView`/`canManage` summaries
//!
//! ## Architecture
//!
//! ```text
//!   HTTP layer ──user id──▶ Enforcer ──groups/roles──▶ RoleStore ──▶ roles/*.yaml
//!        ▲                     │
//!        │                     ├──evaluate──▶ PolicyEngine ──▶ rbac/model.yaml
//!        │                     │                             └▶ rbac/policy.csv
//!        └──Ok / Forbidden─────┴──denials──▶ AuditSink (tracing, JSONL)
//! ```

pub mod config;
pub mod context;
pub mod enforcer;
pub mod errors;
pub mod policy;
pub mod roles;

pub use config::RbacConfig;
pub use context::PrincipalContext;
pub use enforcer::{AuditSink, DenialRecord, Enforcer, JsonlAuditLog, MemoryAuditSink, ResourcePermissions};
pub use errors::{Forbidden, RbacError, Result};
pub use policy::{Pattern, PolicyEngine, PolicyModel, PolicyRule, RuleSet};
pub use roles::{RoleAssignments, RoleDirectory, RoleStore};
