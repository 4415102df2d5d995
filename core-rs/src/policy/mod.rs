//! Policy module
//!
//! Declarative access rules: a model describing the row layout and matching
//! modes, a policy table of (subject, object, action, app-scope) rows, and the
//! engine that evaluates requests against them.

pub mod engine;
pub mod model;
pub mod pattern;

pub use engine::{parse_policy, PolicyEngine, PolicyRule, RuleSet, APP_PLACEHOLDER};
pub use model::{ActionMatch, Effect, Field, ObjectMatch, PolicyModel, DEFAULT_MODEL};
pub use pattern::Pattern;
