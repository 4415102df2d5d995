//! Enforcement façade
//!
//! The single request-time entry point: resolve who the caller is, keep the
//! policy fresh, decide, and on denial audit and raise a structured error.
//!
//! ```text
//! UNAUTHENTICATED -> CONTEXT_RESOLVED -> POLICY_EVALUATED -> ALLOWED
//!                                                        \-> DENIED (audit + Forbidden)
//! ```

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::RbacConfig;
use crate::context::PrincipalContext;
use crate::enforcer::audit::{AuditSink, DenialRecord, JsonlAuditLog, TracingAuditSink};
use crate::errors::{Forbidden, RbacError, Result};
use crate::policy::PolicyEngine;
use crate::roles::{RoleDirectory, RoleStore};

/// UI-facing capability flags for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePermissions {
    pub can_view: bool,
    pub can_manage: bool,
}

pub struct Enforcer {
    engine: PolicyEngine,
    directory: Arc<dyn RoleDirectory>,
    sinks: Vec<Box<dyn AuditSink>>,
    api_prefix: String,
    refresh_interval: Duration,
    view_actions: Vec<String>,
    manage_actions: Vec<String>,
    /// Time of the last successful policy load; also serializes reload decisions.
    last_reload: Mutex<Instant>,
}

impl Enforcer {
    pub fn new(config: &RbacConfig, engine: PolicyEngine, directory: Arc<dyn RoleDirectory>) -> Self {
        Enforcer {
            engine,
            directory,
            sinks: vec![Box::new(TracingAuditSink)],
            api_prefix: canonical_prefix(&config.api_prefix),
            refresh_interval: config.refresh_interval(),
            view_actions: config.view_actions.clone(),
            manage_actions: config.manage_actions.clone(),
            last_reload: Mutex::new(Instant::now()),
        }
    }

    /// Wire up store, file-backed engine and configured audit sinks.
    pub fn from_config(config: &RbacConfig, store: Arc<RoleStore>) -> Self {
        let engine = PolicyEngine::from_files(config.policy_model_path(), config.policy_file_path());
        let mut enforcer = Enforcer::new(config, engine, store);
        if let Some(path) = &config.audit_log {
            enforcer = enforcer.with_audit_sink(Box::new(JsonlAuditLog::new(path.clone())));
        }
        enforcer
    }

    /// Add a sink. The tracing sink is always present.
    pub fn with_audit_sink(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    pub fn directory(&self) -> &Arc<dyn RoleDirectory> {
        &self.directory
    }

    // ========================================================================
    // CONTEXT RESOLUTION
    // ========================================================================

    /// Resolve groups, global roles and app roles for `user_id`.
    ///
    /// Any lookup failure yields a context with no groups and no roles.
    pub fn get_user_context(&self, user_id: &str) -> PrincipalContext {
        let username = user_id.trim();
        match self.resolve(username) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(user = %username, error = %e, "Failed to resolve principal, treating as no roles");
                PrincipalContext::anonymous(username)
            }
        }
    }

    fn resolve(&self, username: &str) -> Result<PrincipalContext> {
        let groups = self.directory.groups_of(username)?;
        let global_roles = self.directory.global_roles_of(username, &groups)?;
        let app_roles = self.directory.app_roles_of(&groups)?;
        Ok(PrincipalContext {
            username: username.to_string(),
            groups,
            global_roles,
            app_roles,
        })
    }

    // ========================================================================
    // DECISIONS
    // ========================================================================

    /// Allow silently, or audit and return [`RbacError::Forbidden`].
    pub fn enforce_request(&self, ctx: &PrincipalContext, object: &str, action: &str, app: &str) -> Result<()> {
        let resource = self.normalize_path(object);
        if self.evaluate(ctx, &resource, action, app) {
            return Ok(());
        }

        let record = DenialRecord::new(ctx, &resource, action, app);
        for sink in &self.sinks {
            if let Err(e) = sink.record(&record) {
                warn!(error = %e, event_id = %record.event_id, "Failed to write audit record");
            }
        }

        Err(RbacError::Forbidden(Box::new(Forbidden {
            message: format!(
                "User '{}' is not allowed to {} {}",
                ctx.username, action, resource
            ),
            username: ctx.username.clone(),
            roles: ctx.all_roles(),
            resource,
            action: action.to_string(),
        })))
    }

    /// Resolve the context for `user_id` and enforce.
    pub fn enforce_for_user(&self, user_id: &str, object: &str, action: &str, app: &str) -> Result<()> {
        let ctx = self.get_user_context(user_id);
        self.enforce_request(&ctx, object, action, app)
    }

    /// Same decision as [`Enforcer::enforce_request`], as a boolean.
    pub fn check_permission(&self, ctx: &PrincipalContext, object: &str, action: &str, app: &str) -> bool {
        let resource = self.normalize_path(object);
        self.evaluate(ctx, &resource, action, app)
    }

    /// `canView` / `canManage` for a resource. `None` uses the configured
    /// default action sets.
    pub fn calculate_resource_permissions(
        &self,
        ctx: &PrincipalContext,
        resource_path: &str,
        app: &str,
        view_actions: Option<&[String]>,
        manage_actions: Option<&[String]>,
    ) -> ResourcePermissions {
        let view_actions = view_actions.unwrap_or(self.view_actions.as_slice());
        let manage_actions = manage_actions.unwrap_or(self.manage_actions.as_slice());

        let allowed_any = |actions: &[String]| {
            actions
                .iter()
                .any(|action| self.check_permission(ctx, resource_path, action, app))
        };

        ResourcePermissions {
            can_view: allowed_any(view_actions),
            can_manage: allowed_any(manage_actions),
        }
    }

    fn evaluate(&self, ctx: &PrincipalContext, resource: &str, action: &str, app: &str) -> bool {
        self.maybe_reload();
        let allowed = self.engine.enforce(ctx, resource, action, app);
        debug!(user = %ctx.username, resource, action, app, allowed, "Policy evaluated");
        allowed
    }

    /// Reload the policy inline when the refresh interval has elapsed.
    ///
    /// The lock is held across the check and the reload so concurrent callers
    /// never reload twice. A failed reload keeps the current rules and does
    /// not advance the timestamp.
    fn maybe_reload(&self) {
        let mut last_reload = match self.last_reload.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if last_reload.elapsed() < self.refresh_interval {
            return;
        }
        match self.engine.load_policy() {
            Ok(()) => *last_reload = Instant::now(),
            Err(e) => warn!(error = %e, "Policy reload failed, keeping previous rules"),
        }
    }

    /// Canonicalize the path and strip the API version prefix.
    ///
    /// Empty and `.` segments are dropped, `..` removes the previous segment
    /// and never climbs above the root. `/api/v1/apps/foo/` -> `/apps/foo`,
    /// `/apps/bar/../foo` -> `/apps/foo`, `/api/v1` -> `/`.
    pub fn normalize_path(&self, object: &str) -> String {
        let mut segments: Vec<&str> = Vec::new();
        for segment in object.trim().split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                segment => segments.push(segment),
            }
        }
        let canonical = format!("/{}", segments.join("/"));

        if self.api_prefix.is_empty() {
            return canonical;
        }
        match canonical.strip_prefix(self.api_prefix.as_str()) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => canonical,
        }
    }
}

/// `api/v1/` -> `/api/v1`; blank -> no prefix.
fn canonical_prefix(prefix: &str) -> String {
    let prefix = prefix.trim().trim_matches('/');
    if prefix.is_empty() {
        String::new()
    } else {
        format!("/{}", prefix)
    }
}
