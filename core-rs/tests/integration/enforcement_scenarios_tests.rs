//! Integration tests for end-to-end authorization decisions
//!
//! Exercises the full path a request takes:
//! - Role assignments written through the store
//! - Policy files loaded from a config tree
//! - Principal resolution, decision, denial audit

use selfservice_rbac::{Enforcer, JsonlAuditLog, PrincipalContext, RbacConfig, RbacError, RoleStore, RuleSet};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const POLICY: &str = r#"# sub, obj, act, app
p, admin, *, *, *
p, viewall, /apps/*, GET, *
p, viewer, /apps/{app}/*, GET, *
p, manager, /apps/{app}/*, GET|PUT|POST|DELETE, *
"#;

fn setup(refresh_secs: u64) -> (TempDir, RbacConfig, Arc<RoleStore>) {
    let temp = TempDir::new().unwrap();
    let rbac_dir = temp.path().join("rbac");
    fs::create_dir_all(&rbac_dir).unwrap();
    fs::write(rbac_dir.join("policy.csv"), POLICY).unwrap();

    let config = RbacConfig {
        demo_mode: Some(false),
        refresh_interval_secs: refresh_secs,
        audit_log: Some(temp.path().join("audit/denials.jsonl")),
        ..RbacConfig::with_config_dir(temp.path())
    };
    let store = Arc::new(RoleStore::open(config.clone()).unwrap());
    (temp, config, store)
}

#[test]
fn test_scenario_global_viewall_can_get_app() {
    let (_temp, config, store) = setup(1800);
    store.add_users2globalroles("alice", "viewall").unwrap();
    let enforcer = Enforcer::from_config(&config, Arc::clone(&store));

    let ctx = enforcer.get_user_context("alice");
    assert!(ctx.app_roles.is_empty());
    assert!(enforcer.check_permission(&ctx, "/apps/foo", "GET", ""));
    assert!(enforcer.check_permission(&ctx, "/api/v1/apps/foo", "GET", "foo"));
}

#[test]
fn test_scenario_app_viewer_cannot_delete() {
    let (temp, config, store) = setup(1800);
    store.add_grp2apps2roles("foo-devs", "foo", "viewer").unwrap();
    let roles_dir = temp.path().join("roles");
    fs::write(roles_dir.join("users2groups.yaml"), "bob: [foo-devs]\n").unwrap();
    store.refresh().unwrap();

    let enforcer = Enforcer::from_config(&config, Arc::clone(&store));
    let ctx = enforcer.get_user_context("bob");
    assert_eq!(ctx.groups, vec!["foo-devs"]);

    let err = enforcer.enforce_request(&ctx, "/apps/foo", "DELETE", "foo").unwrap_err();
    match err {
        RbacError::Forbidden(denied) => {
            assert_eq!(denied.action, "DELETE");
            assert_eq!(denied.resource, "/apps/foo");
            assert_eq!(denied.username, "bob");
            assert_eq!(denied.roles, vec!["viewer"]);
        }
        other => panic!("Expected Forbidden, got {:?}", other),
    }

    // Viewing is still fine
    assert!(enforcer.enforce_request(&ctx, "/apps/foo", "GET", "foo").is_ok());
}

#[test]
fn test_scenario_manager_can_view_and_manage() {
    let (temp, config, store) = setup(1800);
    store.add_grp2apps2roles("bar-leads", "bar", "manager").unwrap();
    fs::write(temp.path().join("roles/users2groups.yaml"), "carol: [bar-leads]\n").unwrap();
    store.refresh().unwrap();

    let enforcer = Enforcer::from_config(&config, Arc::clone(&store));
    let ctx = enforcer.get_user_context("carol");
    let permissions = enforcer.calculate_resource_permissions(&ctx, "/apps/bar", "bar", None, None);

    assert_eq!(
        serde_json::to_value(permissions).unwrap(),
        serde_json::json!({"canView": true, "canManage": true})
    );

    // Manager on bar has nothing on foo
    let other = enforcer.calculate_resource_permissions(&ctx, "/apps/foo", "foo", None, None);
    assert!(!other.can_view);
    assert!(!other.can_manage);
}

#[test]
fn test_scenario_empty_group_is_validation_error() {
    let (_temp, _config, store) = setup(1800);
    let err = store.add_grp2apps2roles("", "bar", "viewer").unwrap_err();
    assert!(matches!(err, RbacError::Validation(_)));
    assert_eq!(err.status_code(), 400);
}

#[test]
fn test_path_traversal_is_denied_and_audited_canonically() {
    let (temp, config, store) = setup(1800);
    store.add_grp2apps2roles("bar-leads", "bar", "manager").unwrap();
    fs::write(temp.path().join("roles/users2groups.yaml"), "carol: [bar-leads]\n").unwrap();
    store.refresh().unwrap();
    let enforcer = Enforcer::from_config(&config, Arc::clone(&store));

    // 1. The manager of bar reaches foo only through a dot segment; denied
    let err = enforcer
        .enforce_for_user("carol", "/api/v1/apps/bar/../foo", "DELETE", "bar")
        .unwrap_err();
    assert_eq!(err.as_forbidden().unwrap().resource, "/apps/foo");

    // 2. Their own app is untouched
    assert!(enforcer.enforce_for_user("carol", "/api/v1/apps/bar/./", "DELETE", "bar").is_ok());

    // 3. The audit log holds the resolved path
    let entries = JsonlAuditLog::new(temp.path().join("audit/denials.jsonl")).entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].resource, "/apps/foo");
    assert_eq!(entries[0].username, "carol");
}

#[test]
fn test_denials_are_written_to_audit_log() {
    let (temp, config, store) = setup(1800);
    let enforcer = Enforcer::from_config(&config, Arc::clone(&store));
    let ctx = enforcer.get_user_context("mallory");

    assert!(enforcer.enforce_request(&ctx, "/apps/foo", "DELETE", "foo").is_err());
    assert!(enforcer.enforce_request(&ctx, "/apps/bar", "GET", "bar").is_err());
    // check_permission never audits
    assert!(!enforcer.check_permission(&ctx, "/apps/baz", "GET", "baz"));

    let log = JsonlAuditLog::new(temp.path().join("audit/denials.jsonl"));
    let entries = log.entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].username, "mallory");
    assert_eq!(entries[0].resource, "/apps/foo");
    assert_eq!(entries[0].action, "DELETE");
    assert_eq!(entries[0].app, "foo");
    assert_eq!(entries[1].resource, "/apps/bar");
}

#[test]
fn test_policy_reload_is_throttled() {
    let (temp, config, store) = setup(1800);
    store.add_users2globalroles("alice", "viewall").unwrap();
    let enforcer = Enforcer::from_config(&config, Arc::clone(&store));
    assert_eq!(enforcer.engine().reload_count(), 1);

    // Widen viewall on disk; within the interval the change is not picked up
    fs::write(temp.path().join("rbac/policy.csv"), "p, viewall, /apps/*, *, *\n").unwrap();
    let ctx = enforcer.get_user_context("alice");
    assert!(enforcer.enforce_request(&ctx, "/apps/foo", "GET", "").is_ok());
    assert!(enforcer.enforce_request(&ctx, "/apps/foo", "DELETE", "").is_err());
    assert_eq!(enforcer.engine().reload_count(), 1);
}

#[test]
fn test_policy_reload_when_interval_elapsed() {
    let (temp, config, store) = setup(0);
    store.add_users2globalroles("alice", "viewall").unwrap();
    let enforcer = Enforcer::from_config(&config, Arc::clone(&store));

    fs::write(temp.path().join("rbac/policy.csv"), "p, viewall, /apps/*, *, *\n").unwrap();
    let ctx = enforcer.get_user_context("alice");
    assert!(enforcer.enforce_request(&ctx, "/apps/foo", "DELETE", "").is_ok());
    assert!(enforcer.engine().reload_count() >= 2);
}

#[test]
fn test_broken_policy_reload_keeps_previous_rules() {
    let (temp, config, store) = setup(0);
    store.add_users2globalroles("alice", "viewall").unwrap();
    let enforcer = Enforcer::from_config(&config, Arc::clone(&store));

    fs::write(temp.path().join("rbac/policy.csv"), "p, viewall\n").unwrap();
    let ctx = enforcer.get_user_context("alice");
    assert!(enforcer.check_permission(&ctx, "/apps/foo", "GET", ""));
    assert_eq!(enforcer.engine().reload_count(), 1);
}

#[test]
fn test_store_changes_visible_to_next_request() {
    let (_temp, config, store) = setup(1800);
    let enforcer = Enforcer::from_config(&config, Arc::clone(&store));

    assert!(enforcer.enforce_for_user("dave", "/apps/foo", "PUT", "").is_err());
    store.add_users2globalroles("dave", "admin").unwrap();
    assert!(enforcer.enforce_for_user("dave", "/apps/foo", "PUT", "").is_ok());
    store.del_users2globalroles("dave", "admin").unwrap();
    assert!(enforcer.enforce_for_user("dave", "/apps/foo", "PUT", "").is_err());
}

#[test]
fn test_concurrent_enforcement() {
    let (_temp, config, store) = setup(0);
    store.add_users2globalroles("alice", "viewall").unwrap();
    let enforcer = Arc::new(Enforcer::from_config(&config, Arc::clone(&store)));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let enforcer = Arc::clone(&enforcer);
            std::thread::spawn(move || {
                let ctx = enforcer.get_user_context("alice");
                for _ in 0..20 {
                    assert!(enforcer.check_permission(&ctx, "/apps/foo", "GET", ""));
                    assert!(!enforcer.check_permission(&ctx, "/apps/foo", "DELETE", ""));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_sample_policy_confines_app_managers() {
    let sample = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/rbac");
    let rules = RuleSet::load(&sample.join("model.yaml"), &sample.join("policy.csv")).unwrap();

    let mut ctx = PrincipalContext::anonymous("carol");
    ctx.app_roles.insert("bar".to_string(), vec!["manager".to_string()]);

    assert!(rules.evaluate(&ctx, "/ipallocations/bar", "POST", "bar"));
    assert!(rules.evaluate(&ctx, "/firewallrequests/bar/req-1", "GET", "bar"));
    assert!(!rules.evaluate(&ctx, "/ipallocations/foo", "POST", "bar"));
    assert!(!rules.evaluate(&ctx, "/firewallrequests", "GET", "bar"));
    assert!(!rules.evaluate(&ctx, "/ipallocations/bar", "DELETE", "bar"));
}
