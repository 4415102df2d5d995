//! Wildcard patterns used in policy rows

use std::fmt;

/// A compiled match pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// `*`
    Any,
    /// Literal value
    Exact(String),
    /// `abc*` - any value starting with `abc`
    Prefix(String),
    /// `/base/*` - `/base` itself and every path below it
    Subtree(String),
}

impl Pattern {
    /// Glob-style pattern for identifiers (app scope): `*`, `prefix*`, or exact.
    pub fn glob(raw: &str) -> Pattern {
        let raw = raw.trim();
        if raw == "*" {
            Pattern::Any
        } else if let Some(prefix) = raw.strip_suffix('*') {
            Pattern::Prefix(prefix.to_string())
        } else {
            Pattern::Exact(raw.to_string())
        }
    }

    /// Hierarchical pattern for resource paths.
    ///
    /// `*` and `/*` match everything; `/apps/*` matches `/apps`, `/apps/foo`
    /// and `/apps/foo/namespaces`; `/apps/foo*` is a raw prefix.
    pub fn key(raw: &str) -> Pattern {
        let raw = raw.trim();
        if raw == "*" || raw == "/*" {
            return Pattern::Any;
        }
        if let Some(base) = raw.strip_suffix("/*") {
            return Pattern::Subtree(base.to_string());
        }
        Pattern::glob(raw)
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Exact(expected) => value == expected,
            Pattern::Prefix(prefix) => value.starts_with(prefix.as_str()),
            Pattern::Subtree(base) => {
                value == base
                    || value
                        .strip_prefix(base.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => write!(f, "*"),
            Pattern::Exact(value) => write!(f, "{}", value),
            Pattern::Prefix(prefix) => write!(f, "{}*", prefix),
            Pattern::Subtree(base) => write!(f, "{}/*", base),
        }
    }
}
