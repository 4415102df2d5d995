//! Security audit trail for authorization denials
//!
//! Every denied request produces one [`DenialRecord`]. The record always goes
//! to the tracing sink (target `rbac::audit`, warn level); deployments can add
//! an append-only JSONL file and embedders can collect records in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::warn;
use uuid::Uuid;

use crate::context::PrincipalContext;
use crate::errors::{RbacError, Result};

pub const AUDIT_TARGET: &str = "rbac::audit";

/// One denied request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenialRecord {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub username: String,
    pub roles: Vec<String>,
    pub groups: Vec<String>,
    pub app_roles: BTreeMap<String, Vec<String>>,
    pub resource: String,
    pub action: String,
    pub app: String,
}

impl DenialRecord {
    pub fn new(ctx: &PrincipalContext, resource: &str, action: &str, app: &str) -> Self {
        DenialRecord {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            username: ctx.username.clone(),
            roles: ctx.global_roles.clone(),
            groups: ctx.groups.clone(),
            app_roles: ctx.app_roles.clone(),
            resource: resource.to_string(),
            action: action.to_string(),
            app: app.to_string(),
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &DenialRecord) -> Result<()>;
}

/// Emits one warn-level event per denial.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: &DenialRecord) -> Result<()> {
        warn!(
            target: AUDIT_TARGET,
            event_id = %entry.event_id,
            username = %entry.username,
            roles = ?entry.roles,
            groups = ?entry.groups,
            app_roles = ?entry.app_roles,
            resource = %entry.resource,
            action = %entry.action,
            app = %entry.app,
            "Authorization denied"
        );
        Ok(())
    }
}

/// Append-only JSONL audit file with size-based rotation.
pub struct JsonlAuditLog {
    log_path: PathBuf,
    max_log_size: u64, // bytes
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            log_path,
            max_log_size: 10_000_000, // 10MB default
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_log_size = bytes;
        self
    }

    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }

    /// Rotate the log file if it exceeds max size
    pub fn rotate_if_needed(&self) -> Result<bool> {
        if !self.log_path.exists() {
            return Ok(false);
        }

        let metadata = fs::metadata(&self.log_path)?;
        if metadata.len() <= self.max_log_size {
            return Ok(false);
        }

        let timestamp = Utc::now().format("%Y%m%d-%H%M%S%.3f");
        let rotated_path = self.log_path.with_extension(format!("jsonl.{}", timestamp));
        fs::rename(&self.log_path, &rotated_path)?;
        Ok(true)
    }

    /// Read back every entry in the current file.
    pub fn entries(&self) -> Result<Vec<DenialRecord>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.log_path)?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(RbacError::from))
            .collect()
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&self, entry: &DenialRecord) -> Result<()> {
        let _guard = self.write_lock.lock()?;

        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.rotate_if_needed()?;

        let json = serde_json::to_string(entry)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn record(&self, entry: &DenialRecord) -> Result<()> {
        (**self).record(entry)
    }
}

/// Collects records in memory.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<DenialRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DenialRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: &DenialRecord) -> Result<()> {
        self.records.lock()?.push(entry.clone());
        Ok(())
    }
}
