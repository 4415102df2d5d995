//! Error types for the RBAC core

use serde::Serialize;
use thiserror::Error;

/// Payload of an authorization denial.
///
/// Serializes to the JSON body the HTTP layer returns with a 403.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Forbidden {
    pub message: String,
    pub username: String,
    pub roles: Vec<String>,
    pub resource: String,
    pub action: String,
}

impl Forbidden {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": "forbidden",
            "message": self.message,
            "username": self.username,
            "roles": self.roles,
            "resource": self.resource,
            "action": self.action,
        })
    }
}

#[derive(Error, Debug)]
pub enum RbacError {
    #[error("Forbidden: {}", .0.message)]
    Forbidden(Box<Forbidden>),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Policy parse error: {0}")]
    PolicyParse(String),

    #[error("Policy model error: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl RbacError {
    /// HTTP status the calling layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            RbacError::Forbidden(_) => 403,
            RbacError::Validation(_) => 400,
            _ => 500,
        }
    }

    pub fn as_forbidden(&self) -> Option<&Forbidden> {
        match self {
            RbacError::Forbidden(f) => Some(f),
            _ => None,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for RbacError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        RbacError::LockPoisoned(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RbacError>;
