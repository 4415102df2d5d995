//! Policy Engine
//!
//! Evaluates a request (principal, object path, action, app) against the active
//! rule set. The rule set is an immutable snapshot behind an `Arc`; reloads
//! build a complete new snapshot and swap it in, so an evaluation sees either
//! the old or the new rules, never a mix.
//!
//! Policy table format (casbin-style CSV, columns ordered by the model):
//!
//! ```text
//! # sub,        obj,           act,               app
//! p, admin,     *,             *,                 *
//! p, viewall,   /apps/*,       GET,               *
//! p, viewer,    /apps/{app}/*, GET,               *
//! p, manager,   /apps/{app}/*, GET|PUT|POST|DELETE, *
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::context::PrincipalContext;
use crate::errors::{RbacError, Result};
use crate::policy::model::{ActionMatch, Field, ObjectMatch, PolicyModel};
use crate::policy::pattern::Pattern;

/// Placeholder in object patterns replaced by the request's app id.
pub const APP_PLACEHOLDER: &str = "{app}";

/// One policy row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    /// Role name, `user:<name>`, `group:<name>` or `*`
    pub subject: String,
    /// Object pattern as written (may contain `{app}`)
    pub object: String,
    pub actions: Vec<Pattern>,
    pub app: Pattern,
    object_pattern: Option<Pattern>,
}

impl PolicyRule {
    pub fn new(model: &PolicyModel, subject: &str, object: &str, action: &str, app: &str) -> Self {
        let object = object.trim().to_string();
        let object_pattern = if object.contains(APP_PLACEHOLDER) {
            None
        } else {
            Some(compile_object(model, &object))
        };
        PolicyRule {
            subject: subject.trim().to_string(),
            actions: compile_actions(model, action),
            app: Pattern::glob(app),
            object,
            object_pattern,
        }
    }

    fn object_matches(&self, model: &PolicyModel, object: &str, app: &str) -> bool {
        match &self.object_pattern {
            Some(pattern) => pattern.matches(object),
            None if app.is_empty() => false,
            None => compile_object(model, &self.object.replace(APP_PLACEHOLDER, app)).matches(object),
        }
    }

    fn action_matches(&self, model: &PolicyModel, action: &str) -> bool {
        let action = match model.action_match {
            ActionMatch::Token => action.trim().to_ascii_uppercase(),
            ActionMatch::Exact => action.to_string(),
        };
        self.actions.iter().any(|p| p.matches(&action))
    }

    /// Subject match through global roles or identity. App scope is ignored.
    fn matches_globally(&self, ctx: &PrincipalContext) -> bool {
        if self.subject == "*" || ctx.has_global_role(&self.subject) {
            return true;
        }
        if let Some(user) = self.subject.strip_prefix("user:") {
            return user == ctx.username;
        }
        if let Some(group) = self.subject.strip_prefix("group:") {
            return ctx.in_group(group);
        }
        false
    }

    /// Subject match through a role granted for `app`, which must fall in scope.
    fn matches_in_app(&self, ctx: &PrincipalContext, app: &str) -> bool {
        !app.is_empty() && self.app.matches(app) && ctx.has_app_role(app, &self.subject)
    }

    pub fn matches(&self, model: &PolicyModel, ctx: &PrincipalContext, object: &str, action: &str, app: &str) -> bool {
        (self.matches_globally(ctx) || self.matches_in_app(ctx, app))
            && self.action_matches(model, action)
            && self.object_matches(model, object, app)
    }
}

fn compile_object(model: &PolicyModel, raw: &str) -> Pattern {
    match model.object_match {
        ObjectMatch::KeyMatch => Pattern::key(raw),
        ObjectMatch::Exact => Pattern::Exact(raw.to_string()),
    }
}

fn compile_actions(model: &PolicyModel, raw: &str) -> Vec<Pattern> {
    match model.action_match {
        ActionMatch::Token => raw
            .split('|')
            .map(|token| token.trim())
            .filter(|token| !token.is_empty())
            .map(|token| {
                if token == "*" {
                    Pattern::Any
                } else {
                    Pattern::Exact(token.to_ascii_uppercase())
                }
            })
            .collect(),
        ActionMatch::Exact => vec![Pattern::Exact(raw.trim().to_string())],
    }
}

/// Parse a policy table. `p` rows become rules; other row tags are skipped.
pub fn parse_policy(content: &str, model: &PolicyModel) -> Result<Vec<PolicyRule>> {
    let mut rules = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();
        if fields[0] != "p" {
            warn!(line = index + 1, tag = fields[0], "Skipping unsupported policy row");
            continue;
        }
        let columns = &fields[1..];
        if columns.len() != 4 {
            return Err(RbacError::PolicyParse(format!(
                "line {}: expected 4 columns after 'p', found {}",
                index + 1,
                columns.len()
            )));
        }
        if columns.iter().any(|c| c.is_empty()) {
            return Err(RbacError::PolicyParse(format!("line {}: empty column", index + 1)));
        }
        rules.push(PolicyRule::new(
            model,
            columns[model.column(Field::Sub)],
            columns[model.column(Field::Obj)],
            columns[model.column(Field::Act)],
            columns[model.column(Field::App)],
        ));
    }

    Ok(rules)
}

/// An immutable, fully loaded model + rules pair.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub model: PolicyModel,
    pub rules: Vec<PolicyRule>,
}

impl RuleSet {
    pub fn new(model: PolicyModel, rules: Vec<PolicyRule>) -> Self {
        RuleSet { model, rules }
    }

    pub fn load(model_path: &Path, policy_path: &Path) -> Result<Self> {
        let model = PolicyModel::load(model_path)?;
        let content = fs::read_to_string(policy_path).map_err(|e| {
            RbacError::PolicyParse(format!("Failed to read policy {}: {}", policy_path.display(), e))
        })?;
        let rules = parse_policy(&content, &model)?;
        Ok(RuleSet { model, rules })
    }

    /// First rule allowing the request, if any.
    pub fn first_match(&self, ctx: &PrincipalContext, object: &str, action: &str, app: &str) -> Option<&PolicyRule> {
        self.rules
            .iter()
            .find(|rule| rule.matches(&self.model, ctx, object, action, app))
    }

    pub fn evaluate(&self, ctx: &PrincipalContext, object: &str, action: &str, app: &str) -> bool {
        self.first_match(ctx, object, action, app).is_some()
    }
}

#[derive(Debug, Clone)]
enum PolicySource {
    Files { model: PathBuf, policy: PathBuf },
    InMemory,
}

pub struct PolicyEngine {
    source: PolicySource,
    active: RwLock<Arc<RuleSet>>,
    reloads: AtomicU64,
}

impl PolicyEngine {
    /// Engine backed by model and policy files. A failed initial load leaves
    /// an empty rule set, which denies everything.
    pub fn from_files(model: impl Into<PathBuf>, policy: impl Into<PathBuf>) -> Self {
        let engine = PolicyEngine {
            source: PolicySource::Files {
                model: model.into(),
                policy: policy.into(),
            },
            active: RwLock::new(Arc::new(RuleSet::default())),
            reloads: AtomicU64::new(0),
        };
        if let Err(e) = engine.load_policy() {
            warn!(error = %e, "Initial policy load failed, denying all requests until reload");
        }
        engine
    }

    /// Engine over a fixed rule set. `load_policy` is a no-op.
    pub fn from_rules(rules: RuleSet) -> Self {
        PolicyEngine {
            source: PolicySource::InMemory,
            active: RwLock::new(Arc::new(rules)),
            reloads: AtomicU64::new(0),
        }
    }

    /// Re-read the backing files and swap the active rule set. On error the
    /// previous rule set stays active.
    pub fn load_policy(&self) -> Result<()> {
        let PolicySource::Files { model, policy } = &self.source else {
            return Ok(());
        };
        let rules = RuleSet::load(model, policy)?;
        let count = rules.rules.len();
        *self.active.write()? = Arc::new(rules);
        let reloads = self.reloads.fetch_add(1, Ordering::SeqCst) + 1;
        info!(rules = count, reloads, policy = %policy.display(), "Policy loaded");
        Ok(())
    }

    /// Snapshot of the active rule set.
    pub fn rule_set(&self) -> Arc<RuleSet> {
        match self.active.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn enforce(&self, ctx: &PrincipalContext, object: &str, action: &str, app: &str) -> bool {
        let rules = self.rule_set();
        match rules.first_match(ctx, object, action, app) {
            Some(rule) => {
                debug!(user = %ctx.username, subject = %rule.subject, object, action, app, "Policy row matched");
                true
            }
            None => false,
        }
    }

    /// Number of successful file loads so far.
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::SeqCst)
    }

    /// Distinct subjects named by the active policy.
    pub fn roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = Vec::new();
        for rule in &self.rule_set().rules {
            if !roles.contains(&rule.subject) {
                roles.push(rule.subject.clone());
            }
        }
        roles
    }
}
