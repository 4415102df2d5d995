//! Principal context: the resolved identity an authorization decision is made for

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity plus role/group membership, computed per request from the role store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalContext {
    pub username: String,
    pub groups: Vec<String>,
    /// Direct user roles followed by group-inherited roles, de-duplicated
    pub global_roles: Vec<String>,
    /// app -> roles granted through group membership
    pub app_roles: BTreeMap<String, Vec<String>>,
}

impl PrincipalContext {
    /// Context with no groups and no roles. Used when resolution fails.
    pub fn anonymous(username: impl Into<String>) -> Self {
        PrincipalContext {
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn has_global_role(&self, role: &str) -> bool {
        self.global_roles.iter().any(|r| r == role)
    }

    pub fn has_app_role(&self, app: &str, role: &str) -> bool {
        self.app_roles
            .get(app)
            .is_some_and(|roles| roles.iter().any(|r| r == role))
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Global roles plus every app-scoped role, de-duplicated. Reported in
    /// denial errors so the caller sees everything the principal holds.
    pub fn all_roles(&self) -> Vec<String> {
        let mut roles = self.global_roles.clone();
        for app_roles in self.app_roles.values() {
            for role in app_roles {
                if !roles.contains(role) {
                    roles.push(role.clone());
                }
            }
        }
        roles
    }
}
