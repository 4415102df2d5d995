//! Role Assignment Store
//!
//! Process-wide cache of who holds which role, backed by the four YAML files in
//! [`super::persistence`]. Every mutation runs under a single mutex as
//! clone -> mutate -> persist -> commit, so readers never observe an in-memory
//! state that is not on disk, and a failed write leaves the store unchanged.

use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::RbacConfig;
use crate::errors::{RbacError, Result};
use crate::roles::persistence::{migrate_legacy, Migration, RoleAssignments};

static ROLE_STORE_INSTANCE: OnceCell<Arc<RoleStore>> = OnceCell::new();

/// Read-side view of role assignments consumed by the enforcement façade.
///
/// Implemented by [`RoleStore`]; alternative directories (LDAP mirrors, test
/// doubles) plug in here.
pub trait RoleDirectory: Send + Sync {
    fn groups_of(&self, user_id: &str) -> Result<Vec<String>>;
    fn global_roles_of(&self, user_id: &str, groups: &[String]) -> Result<Vec<String>>;
    fn app_roles_of(&self, groups: &[String]) -> Result<BTreeMap<String, Vec<String>>>;
}

struct StoreState {
    roles_dir: PathBuf,
    assignments: RoleAssignments,
}

pub struct RoleStore {
    config: RbacConfig,
    state: Mutex<StoreState>,
}

impl RoleStore {
    /// Open the store described by `config`.
    ///
    /// Runs the legacy-file migration once, then loads the four relations.
    /// Load problems degrade to empty relations; only a failed migration write
    /// is reported.
    pub fn open(config: RbacConfig) -> Result<Self> {
        let roles_dir = config.roles_dir();
        if let Migration::Migrated { from } = migrate_legacy(&roles_dir)? {
            info!(legacy = %from.display(), dir = %roles_dir.display(), "Role store migrated at startup");
        }
        let assignments = RoleAssignments::load(&roles_dir);
        debug!(dir = %roles_dir.display(), "Role store loaded");

        Ok(RoleStore {
            config,
            state: Mutex::new(StoreState { roles_dir, assignments }),
        })
    }

    /// Process-wide instance, configured from the environment on first call.
    pub fn get_instance() -> Result<Arc<RoleStore>> {
        ROLE_STORE_INSTANCE
            .get_or_try_init(|| RoleStore::open(RbacConfig::from_env()?).map(Arc::new))
            .cloned()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        Ok(self.state.lock()?)
    }

    /// Reload from disk when `force` is set, re-resolving the directory so a
    /// demo-mode switch takes effect. No-op otherwise.
    pub fn update_roles(&self, force: bool) -> Result<()> {
        if !force {
            return Ok(());
        }
        let mut state = self.lock()?;
        let roles_dir = self.config.roles_dir();
        state.assignments = RoleAssignments::load(&roles_dir);
        if state.roles_dir != roles_dir {
            info!(from = %state.roles_dir.display(), to = %roles_dir.display(), "Role store directory changed");
        }
        state.roles_dir = roles_dir;
        Ok(())
    }

    pub fn refresh(&self) -> Result<()> {
        self.update_roles(true)
    }

    pub fn roles_dir(&self) -> Result<PathBuf> {
        Ok(self.lock()?.roles_dir.clone())
    }

    pub fn snapshot(&self) -> Result<RoleAssignments> {
        Ok(self.lock()?.assignments.clone())
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn get_user_groups(&self, user_id: &str) -> Result<Vec<String>> {
        let state = self.lock()?;
        Ok(state
            .assignments
            .user_groups
            .get(user_id.trim())
            .cloned()
            .unwrap_or_default())
    }

    /// Direct roles of the user followed by each group's global roles, in group
    /// order, without duplicates.
    pub fn get_user_roles(&self, user_id: &str, groups: &[String]) -> Result<Vec<String>> {
        let state = self.lock()?;
        let assignments = &state.assignments;
        let mut roles = Vec::new();

        if let Some(direct) = assignments.user_global_roles.get(user_id.trim()) {
            extend_unique(&mut roles, direct);
        }
        for group in groups {
            if let Some(granted) = assignments.group_global_roles.get(group.trim()) {
                extend_unique(&mut roles, granted);
            }
        }
        Ok(roles)
    }

    pub fn get_app_roles(&self, groups: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
        let state = self.lock()?;
        let mut app_roles: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for group in groups {
            if let Some(apps) = state.assignments.group_app_roles.get(group.trim()) {
                for (app, roles) in apps {
                    extend_unique(app_roles.entry(app.clone()).or_default(), roles);
                }
            }
        }
        Ok(app_roles)
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    pub fn add_grp2apps2roles(&self, group: &str, app: &str, role: &str) -> Result<()> {
        let (group, app, role) = (required("group", group)?, required("app", app)?, required("role", role)?);
        self.mutate(|a| {
            let roles = a
                .group_app_roles
                .entry(group.to_string())
                .or_default()
                .entry(app.to_string())
                .or_default();
            push_unique(roles, role)
        })
    }

    pub fn del_grp2apps2roles(&self, group: &str, app: &str, role: &str) -> Result<()> {
        let (group, app, role) = (required("group", group)?, required("app", app)?, required("role", role)?);
        self.mutate(|a| {
            let Some(apps) = a.group_app_roles.get_mut(group) else {
                return false;
            };
            let Some(roles) = apps.get_mut(app) else {
                return false;
            };
            let removed = remove_role(roles, role);
            if roles.is_empty() {
                apps.remove(app);
            }
            if apps.is_empty() {
                a.group_app_roles.remove(group);
            }
            removed
        })
    }

    pub fn add_grp2globalroles(&self, group: &str, role: &str) -> Result<()> {
        let (group, role) = (required("group", group)?, required("role", role)?);
        self.mutate(|a| push_unique(a.group_global_roles.entry(group.to_string()).or_default(), role))
    }

    pub fn del_grp2globalroles(&self, group: &str, role: &str) -> Result<()> {
        let (group, role) = (required("group", group)?, required("role", role)?);
        self.mutate(|a| remove_keyed(&mut a.group_global_roles, group, role))
    }

    pub fn add_users2globalroles(&self, user: &str, role: &str) -> Result<()> {
        let (user, role) = (required("user", user)?, required("role", role)?);
        self.mutate(|a| push_unique(a.user_global_roles.entry(user.to_string()).or_default(), role))
    }

    pub fn del_users2globalroles(&self, user: &str, role: &str) -> Result<()> {
        let (user, role) = (required("user", user)?, required("role", role)?);
        self.mutate(|a| remove_keyed(&mut a.user_global_roles, user, role))
    }

    /// Apply `change` to a copy of the relations, persist the changed
    /// relations, then commit.
    ///
    /// `change` returns whether anything changed; a no-op skips the write. A
    /// failed write leaves both memory and the role files as they were.
    fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut RoleAssignments) -> bool,
    {
        let mut state = self.lock()?;
        let mut next = state.assignments.clone();
        if !change(&mut next) {
            return Ok(());
        }
        if let Err(e) = next.save_changed(Some(&state.assignments), &state.roles_dir) {
            warn!(dir = %state.roles_dir.display(), error = %e, "Failed to persist role assignments");
            return Err(e);
        }
        state.assignments = next;
        Ok(())
    }
}

impl RoleDirectory for RoleStore {
    fn groups_of(&self, user_id: &str) -> Result<Vec<String>> {
        self.get_user_groups(user_id)
    }

    fn global_roles_of(&self, user_id: &str, groups: &[String]) -> Result<Vec<String>> {
        self.get_user_roles(user_id, groups)
    }

    fn app_roles_of(&self, groups: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
        self.get_app_roles(groups)
    }
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RbacError::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed)
}

fn extend_unique(target: &mut Vec<String>, source: &[String]) {
    for item in source {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

fn push_unique(roles: &mut Vec<String>, role: &str) -> bool {
    if roles.iter().any(|r| r == role) {
        return false;
    }
    roles.push(role.to_string());
    true
}

fn remove_role(roles: &mut Vec<String>, role: &str) -> bool {
    let before = roles.len();
    roles.retain(|r| r != role);
    roles.len() != before
}

fn remove_keyed(map: &mut BTreeMap<String, Vec<String>>, key: &str, role: &str) -> bool {
    let Some(roles) = map.get_mut(key) else {
        return false;
    };
    let removed = remove_role(roles, role);
    if roles.is_empty() {
        map.remove(key);
    }
    removed
}
