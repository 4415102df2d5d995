/**
 * config.rs
 * Runtime configuration for the RBAC core (YAML file + environment overrides)
 *
 * Format:
 * ```yaml
 * configDir: /srv/selfservice/config
 * demoSubdir: demo
 * policyModel: /srv/selfservice/config/rbac/model.yaml
 * policyFile: /srv/selfservice/config/rbac/policy.csv
 * refreshIntervalSecs: 1800
 * apiPrefix: /api/v1
 * auditLog: /var/log/selfservice/audit.jsonl
 * viewActions: [GET]
 * manageActions: [PUT, DELETE, POST]
 * ```
 *
 * Every key is optional. Environment variables override the file.
 */

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{RbacError, Result};

pub const ENV_CONFIG_DIR: &str = "SELFSERVICE_CONFIG_DIR";
pub const ENV_DEMO_MODE: &str = "SELFSERVICE_DEMO_MODE";
pub const ENV_POLICY_MODEL: &str = "SELFSERVICE_POLICY_MODEL";
pub const ENV_POLICY_FILE: &str = "SELFSERVICE_POLICY_FILE";
pub const ENV_REFRESH_SECS: &str = "SELFSERVICE_POLICY_REFRESH_SECS";
pub const ENV_AUDIT_LOG: &str = "SELFSERVICE_AUDIT_LOG";

/// Default policy refresh interval (30 minutes)
pub const DEFAULT_REFRESH_SECS: u64 = 1800;

pub const DEFAULT_API_PREFIX: &str = "/api/v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RbacConfig {
    /// Root of the configuration tree (roles/ and rbac/ live below it)
    pub config_dir: PathBuf,
    /// Subtree of `config_dir` used instead of it when demo mode is on
    pub demo_subdir: String,
    /// Pinned demo mode. `None` means "ask the environment at resolve time".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demo_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_model: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_file: Option<PathBuf>,
    pub refresh_interval_secs: u64,
    pub api_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
    pub view_actions: Vec<String>,
    pub manage_actions: Vec<String>,
}

impl Default for RbacConfig {
    fn default() -> Self {
        RbacConfig {
            config_dir: PathBuf::from("config"),
            demo_subdir: "demo".to_string(),
            demo_mode: None,
            policy_model: None,
            policy_file: None,
            refresh_interval_secs: DEFAULT_REFRESH_SECS,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            audit_log: None,
            view_actions: vec!["GET".to_string()],
            manage_actions: vec!["PUT".to_string(), "DELETE".to_string(), "POST".to_string()],
        }
    }
}

impl RbacConfig {
    /// Config rooted at `config_dir` with every other setting at its default.
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        RbacConfig {
            config_dir: config_dir.into(),
            ..RbacConfig::default()
        }
    }

    /// Parse a YAML config file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            RbacError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let mut config: RbacConfig = serde_yaml::from_str(&content)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = RbacConfig::default();
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = env::var(ENV_CONFIG_DIR) {
            self.config_dir = PathBuf::from(dir);
        }
        if let Ok(model) = env::var(ENV_POLICY_MODEL) {
            self.policy_model = Some(PathBuf::from(model));
        }
        if let Ok(policy) = env::var(ENV_POLICY_FILE) {
            self.policy_file = Some(PathBuf::from(policy));
        }
        if let Ok(secs) = env::var(ENV_REFRESH_SECS) {
            self.refresh_interval_secs = secs.trim().parse().map_err(|_| {
                RbacError::Config(format!("{} must be a number of seconds, got '{}'", ENV_REFRESH_SECS, secs))
            })?;
        }
        if let Ok(audit) = env::var(ENV_AUDIT_LOG) {
            self.audit_log = Some(PathBuf::from(audit));
        }
        Ok(())
    }

    /// Whether the demo subtree is active. Re-read from the environment on
    /// every call unless pinned in the config.
    pub fn demo_mode(&self) -> bool {
        match self.demo_mode {
            Some(pinned) => pinned,
            None => env::var(ENV_DEMO_MODE).map(|v| parse_flag(&v)).unwrap_or(false),
        }
    }

    /// Effective config root, honoring demo mode.
    pub fn effective_dir(&self) -> PathBuf {
        if self.demo_mode() {
            self.config_dir.join(&self.demo_subdir)
        } else {
            self.config_dir.clone()
        }
    }

    /// Directory holding the role assignment files.
    pub fn roles_dir(&self) -> PathBuf {
        self.effective_dir().join("roles")
    }

    pub fn policy_model_path(&self) -> PathBuf {
        self.policy_model
            .clone()
            .unwrap_or_else(|| self.config_dir.join("rbac").join("model.yaml"))
    }

    pub fn policy_file_path(&self) -> PathBuf {
        self.policy_file
            .clone()
            .unwrap_or_else(|| self.config_dir.join("rbac").join("policy.csv"))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
