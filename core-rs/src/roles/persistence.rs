//! On-disk layout of the role assignment relations
//!
//! Four YAML files, one per relation:
//!
//! ```text
//! roles/
//! ├── grp2apps2roles.yaml     group -> app -> [role]
//! ├── grp2globalroles.yaml    group -> [role]
//! ├── users2globalroles.yaml  user  -> [role]
//! └── users2groups.yaml       user  -> [group]   (maintained externally)
//! ```
//!
//! `roles.yaml` is the legacy combined layout, read once by [`migrate_legacy`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::errors::Result;

pub const GRP_APP_ROLES_FILE: &str = "grp2apps2roles.yaml";
pub const GRP_GLOBAL_ROLES_FILE: &str = "grp2globalroles.yaml";
pub const USER_GLOBAL_ROLES_FILE: &str = "users2globalroles.yaml";
pub const USER_GROUPS_FILE: &str = "users2groups.yaml";
pub const LEGACY_FILE: &str = "roles.yaml";

const RELATION_FILES: [&str; 4] = [GRP_APP_ROLES_FILE, GRP_GLOBAL_ROLES_FILE, USER_GLOBAL_ROLES_FILE, USER_GROUPS_FILE];

/// group -> app -> roles
pub type GroupAppRoles = BTreeMap<String, BTreeMap<String, Vec<String>>>;
/// key -> roles (or user -> groups)
pub type KeyedRoles = BTreeMap<String, Vec<String>>;

/// Full snapshot of the four relations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleAssignments {
    pub group_app_roles: GroupAppRoles,
    pub group_global_roles: KeyedRoles,
    pub user_global_roles: KeyedRoles,
    pub user_groups: KeyedRoles,
}

impl RoleAssignments {
    /// Read all four files. Missing, unreadable or malformed files yield an
    /// empty relation and a warning.
    pub fn load(dir: &Path) -> Self {
        RoleAssignments {
            group_app_roles: read_relation(&dir.join(GRP_APP_ROLES_FILE)),
            group_global_roles: read_relation(&dir.join(GRP_GLOBAL_ROLES_FILE)),
            user_global_roles: read_relation(&dir.join(USER_GLOBAL_ROLES_FILE)),
            user_groups: read_relation(&dir.join(USER_GROUPS_FILE)),
        }
        .normalized()
    }

    /// Trim keys and values, drop empties and duplicates. Hand-edited files
    /// may violate the invariants the store's API maintains.
    pub fn normalized(self) -> Self {
        let group_app_roles = self
            .group_app_roles
            .into_iter()
            .filter_map(|(group, apps)| {
                let apps: BTreeMap<String, Vec<String>> = normalize_keyed(apps);
                non_empty_key(&group).filter(|_| !apps.is_empty()).map(|g| (g, apps))
            })
            .collect();

        RoleAssignments {
            group_app_roles,
            group_global_roles: normalize_keyed(self.group_global_roles),
            user_global_roles: normalize_keyed(self.user_global_roles),
            user_groups: normalize_keyed(self.user_groups),
        }
    }

    /// Write all four files.
    pub fn save(&self, dir: &Path) -> Result<()> {
        self.save_changed(None, dir)
    }

    /// Write the relations that differ from `previous`, or all four when
    /// `previous` is `None`.
    ///
    /// Every temp file is written before any is renamed into place, so a
    /// failed write leaves the directory untouched. If a rename fails after
    /// others succeeded, the renamed files are rewritten from `previous`.
    pub fn save_changed(&self, previous: Option<&RoleAssignments>, dir: &Path) -> Result<()> {
        let files = self.changed_files(previous);
        if files.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(dir)?;

        let mut staged: Vec<(&str, PathBuf)> = Vec::with_capacity(files.len());
        for name in files {
            match self.relation_yaml(name).and_then(|yaml| stage(&dir.join(name), &yaml)) {
                Ok(tmp) => staged.push((name, tmp)),
                Err(e) => {
                    discard(&staged);
                    return Err(e);
                }
            }
        }

        for (index, (name, tmp)) in staged.iter().enumerate() {
            if let Err(e) = fs::rename(tmp, dir.join(name)) {
                discard(&staged[index..]);
                if let Some(previous) = previous {
                    for (renamed, _) in &staged[..index] {
                        previous.restore(dir, renamed);
                    }
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn changed_files(&self, previous: Option<&RoleAssignments>) -> Vec<&'static str> {
        let Some(previous) = previous else {
            return RELATION_FILES.to_vec();
        };
        let mut files = Vec::new();
        if self.group_app_roles != previous.group_app_roles {
            files.push(GRP_APP_ROLES_FILE);
        }
        if self.group_global_roles != previous.group_global_roles {
            files.push(GRP_GLOBAL_ROLES_FILE);
        }
        if self.user_global_roles != previous.user_global_roles {
            files.push(USER_GLOBAL_ROLES_FILE);
        }
        if self.user_groups != previous.user_groups {
            files.push(USER_GROUPS_FILE);
        }
        files
    }

    fn relation_yaml(&self, name: &str) -> Result<String> {
        let yaml = match name {
            GRP_APP_ROLES_FILE => serde_yaml::to_string(&self.group_app_roles)?,
            GRP_GLOBAL_ROLES_FILE => serde_yaml::to_string(&self.group_global_roles)?,
            USER_GLOBAL_ROLES_FILE => serde_yaml::to_string(&self.user_global_roles)?,
            _ => serde_yaml::to_string(&self.user_groups)?,
        };
        Ok(yaml)
    }

    fn restore(&self, dir: &Path, name: &str) {
        let path = dir.join(name);
        let restored = self
            .relation_yaml(name)
            .and_then(|yaml| stage(&path, &yaml))
            .and_then(|tmp| Ok(fs::rename(tmp, &path)?));
        if let Err(e) = restored {
            warn!(path = %path.display(), error = %e, "Failed to restore role file after aborted save");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.group_app_roles.is_empty()
            && self.group_global_roles.is_empty()
            && self.user_global_roles.is_empty()
            && self.user_groups.is_empty()
    }
}

/// Whether any of the four split files exists in `dir`.
pub fn has_split_layout(dir: &Path) -> bool {
    RELATION_FILES.iter().any(|name| dir.join(name).exists())
}

/// Outcome of [`migrate_legacy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Migration {
    /// Split layout already present (or nothing to migrate from)
    NotNeeded,
    /// Legacy file converted into the split layout
    Migrated { from: PathBuf },
}

/// One-shot conversion of the legacy combined `roles.yaml` into the four-file
/// layout. Runs only when none of the split files exist.
///
/// An unreadable legacy file is logged and skipped so startup still proceeds
/// with empty relations; a failed write of the split layout is returned.
pub fn migrate_legacy(dir: &Path) -> Result<Migration> {
    let legacy = dir.join(LEGACY_FILE);
    if has_split_layout(dir) || !legacy.exists() {
        return Ok(Migration::NotNeeded);
    }

    let content = match fs::read_to_string(&legacy) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %legacy.display(), error = %e, "Failed to read legacy role file, skipping migration");
            return Ok(Migration::NotNeeded);
        }
    };
    let assignments: RoleAssignments = match serde_yaml::from_str(&content) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(path = %legacy.display(), error = %e, "Malformed legacy role file, skipping migration");
            return Ok(Migration::NotNeeded);
        }
    };

    let assignments = assignments.normalized();
    assignments.save(dir)?;
    info!(
        path = %legacy.display(),
        groups = assignments.group_app_roles.len() + assignments.group_global_roles.len(),
        users = assignments.user_global_roles.len(),
        "Migrated legacy role file to split layout"
    );
    Ok(Migration::Migrated { from: legacy })
}

fn non_empty_key(key: &str) -> Option<String> {
    let trimmed = key.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn normalize_keyed(map: KeyedRoles) -> KeyedRoles {
    let mut out = KeyedRoles::new();
    for (key, values) in map {
        let Some(key) = non_empty_key(&key) else {
            continue;
        };
        let entry = out.entry(key).or_default();
        for value in values {
            if let Some(value) = non_empty_key(&value) {
                if !entry.contains(&value) {
                    entry.push(value);
                }
            }
        }
    }
    out.retain(|_, values| !values.is_empty());
    out
}

fn read_relation<T: DeserializeOwned + Default>(path: &Path) -> T {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read role file, using empty relation");
            return T::default();
        }
    };
    if content.trim().is_empty() {
        return T::default();
    }
    match serde_yaml::from_str::<Option<T>>(&content) {
        Ok(parsed) => parsed.unwrap_or_default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Malformed role file, using empty relation");
            T::default()
        }
    }
}

/// Write `yaml` next to `path` and return the temp file.
fn stage(path: &Path, yaml: &str) -> Result<PathBuf> {
    let tmp = path.with_extension("yaml.tmp");
    let written = fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(yaml.as_bytes())?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(tmp)
}

fn discard(staged: &[(&str, PathBuf)]) {
    for (_, tmp) in staged {
        let _ = fs::remove_file(tmp);
    }
}
