//! Enforcement Contract Tests
//!
//! These tests verify INVARIANTS of authorization decisions that MUST NEVER
//! BREAK regardless of how policy evaluation is implemented.
//!
//! **Problem**: "Simplifying" the matcher quietly widens or narrows access
//! **Solution**: Contract tests that fail with clear explanation of what's being sacrificed

use selfservice_rbac::policy::parse_policy;
use selfservice_rbac::{
    Enforcer, MemoryAuditSink, PolicyEngine, PolicyModel, PrincipalContext, RbacConfig, RbacError, Result,
    RoleDirectory, RuleSet,
};
use std::collections::BTreeMap;
use std::sync::Arc;

const POLICY: &str = "\
p, admin, *, *, *
p, viewall, /apps/*, GET, *
p, viewer, /apps/{app}/*, GET, *
p, manager, /apps/{app}/*, GET|PUT|POST|DELETE, *
";

/// Directory that knows nobody. Contexts are built by hand.
struct EmptyDirectory;

impl RoleDirectory for EmptyDirectory {
    fn groups_of(&self, _user_id: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
    fn global_roles_of(&self, _user_id: &str, _groups: &[String]) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
    fn app_roles_of(&self, _groups: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(BTreeMap::new())
    }
}

/// Directory whose backing store is unavailable.
struct BrokenDirectory;

impl RoleDirectory for BrokenDirectory {
    fn groups_of(&self, _user_id: &str) -> Result<Vec<String>> {
        Ok(vec!["admins".to_string()])
    }
    fn global_roles_of(&self, _user_id: &str, _groups: &[String]) -> Result<Vec<String>> {
        Ok(vec!["admin".to_string()])
    }
    fn app_roles_of(&self, _groups: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
        Err(RbacError::LockPoisoned("role store".to_string()))
    }
}

fn enforcer(directory: Arc<dyn RoleDirectory>) -> Enforcer {
    let model = PolicyModel::default();
    let rules = parse_policy(POLICY, &model).unwrap();
    let config = RbacConfig {
        demo_mode: Some(false),
        ..RbacConfig::default()
    };
    Enforcer::new(&config, PolicyEngine::from_rules(RuleSet::new(model, rules)), directory)
}

/// `app_roles` is a list of (app, role) grants.
fn context(global: &[&str], app_roles: &[(&str, &str)]) -> PrincipalContext {
    let mut ctx = PrincipalContext::anonymous("bob");
    ctx.global_roles = global.iter().map(|r| r.to_string()).collect();
    for (app, role) in app_roles {
        ctx.app_roles.entry(app.to_string()).or_default().push(role.to_string());
    }
    ctx
}

const REQUESTS: &[(&str, &str, &str)] = &[
    ("/apps/foo", "GET", "foo"),
    ("/apps/foo", "DELETE", "foo"),
    ("/apps/foo/deployments/web", "PUT", "foo"),
    ("/apps/bar", "GET", "bar"),
    ("/apps/bar", "POST", "bar"),
    ("/apps", "GET", ""),
    ("/clusters/prod", "DELETE", ""),
];

/// WHY: Granting an extra role never revokes a permission
/// REASON: The policy is allow-only; there are no deny rows
/// BREAKS: Role composition (adding "viewer" to a manager must not lock them out)
/// SACRIFICES: If this fails, you've introduced deny semantics nobody asked for
#[test]
fn decisions_are_monotonic_in_roles() {
    let enforcer = enforcer(Arc::new(EmptyDirectory));

    let smaller = context(&["viewall"], &[("foo", "viewer")]);
    let larger = context(&["viewall", "operator"], &[("foo", "viewer"), ("foo", "manager"), ("bar", "viewer")]);

    for (object, action, app) in REQUESTS {
        if enforcer.check_permission(&smaller, object, action, app) {
            assert!(
                enforcer.check_permission(&larger, object, action, app),
                "superset of roles lost {} {} (app {:?})",
                action,
                object,
                app
            );
        }
    }
}

/// WHY: App-scoped roles never leak to other applications
/// REASON: Tenants share one cluster; app roles are the isolation boundary
/// BREAKS: Tenant isolation (a manager of bar could delete foo)
/// SACRIFICES: If this fails, every app role is effectively global
#[test]
fn app_roles_are_confined_to_their_app() {
    let enforcer = enforcer(Arc::new(EmptyDirectory));
    let ctx = context(&[], &[("bar", "manager")]);

    assert!(enforcer.check_permission(&ctx, "/apps/bar", "DELETE", "bar"));
    assert!(!enforcer.check_permission(&ctx, "/apps/foo", "DELETE", "foo"));
    // Claiming the wrong app for a path does not help
    assert!(!enforcer.check_permission(&ctx, "/apps/foo", "DELETE", "bar"));
    // No app, no app-scoped grants
    assert!(!enforcer.check_permission(&ctx, "/apps/bar", "GET", ""));
    // Dot segments cannot walk out of the granted subtree
    assert!(!enforcer.check_permission(&ctx, "/api/v1/apps/bar/../foo", "DELETE", "bar"));
    assert!(!enforcer.check_permission(&ctx, "/apps/bar/./../foo/deployments", "PUT", "bar"));
    assert!(!enforcer.check_permission(&ctx, "/apps/bar/deployments/../../foo", "DELETE", "bar"));
    // Traversal that stays inside bar is still bar
    assert!(enforcer.check_permission(&ctx, "/apps/bar/deployments/../services", "DELETE", "bar"));
}

/// WHY: Every denial through enforce_request produces exactly one audit record
/// REASON: Security reviews reconstruct incidents from the denial log
/// BREAKS: Incident forensics (missing or doubled entries skew the timeline)
/// SACRIFICES: If this fails, denials happen that nobody can account for
#[test]
fn every_denial_is_audited_exactly_once() {
    let sink = Arc::new(MemoryAuditSink::new());
    let enforcer = enforcer(Arc::new(EmptyDirectory)).with_audit_sink(Box::new(Arc::clone(&sink)));
    let mut ctx = context(&["viewall"], &[("foo", "viewer")]);
    ctx.groups.push("foo-devs".to_string());

    let mut denials = 0;
    for (object, action, app) in REQUESTS {
        if enforcer.enforce_request(&ctx, object, action, app).is_err() {
            denials += 1;
        }
    }
    // Allowed checks never reach the sink
    assert!(enforcer.check_permission(&ctx, "/apps/foo", "GET", "foo"));

    let records = sink.records();
    assert_eq!(records.len(), denials);
    assert!(denials > 0);
    for record in &records {
        assert_eq!(record.username, "bob");
        assert_eq!(record.groups, vec!["foo-devs"]);
        assert_eq!(record.roles, vec!["viewall"]);
        assert_eq!(record.app_roles["foo"], vec!["viewer"]);
        assert!(!record.resource.is_empty());
        assert!(!record.action.is_empty());
    }

    let ids: std::collections::HashSet<_> = records.iter().map(|r| r.event_id.clone()).collect();
    assert_eq!(ids.len(), records.len());
}

/// WHY: Forbidden carries the normalized resource, the action and the roles held
/// REASON: The HTTP layer renders the 403 body straight from the error
/// BREAKS: Client error messages, support triage ("which role am I missing?")
/// SACRIFICES: If this fails, callers see a bare 403 with no explanation
#[test]
fn forbidden_describes_the_request() {
    let enforcer = enforcer(Arc::new(EmptyDirectory));
    let ctx = context(&["viewall"], &[("foo", "viewer")]);

    let err = enforcer
        .enforce_request(&ctx, "/api/v1/apps/foo/", "DELETE", "foo")
        .unwrap_err();
    assert_eq!(err.status_code(), 403);

    let forbidden = err.as_forbidden().unwrap();
    assert_eq!(forbidden.username, "bob");
    assert_eq!(forbidden.resource, "/apps/foo");
    assert_eq!(forbidden.action, "DELETE");
    assert_eq!(forbidden.roles, vec!["viewall", "viewer"]);
    assert!(forbidden.message.contains("DELETE"));
    assert!(forbidden.message.contains("/apps/foo"));
}

/// WHY: A principal that cannot be resolved has no roles
/// REASON: Store outages must not turn into open doors
/// BREAKS: Fail-closed authorization (partial contexts keep stale privileges)
/// SACRIFICES: If this fails, an outage grants whatever half-loaded roles exist
#[test]
fn unresolvable_principal_fails_closed() {
    let enforcer = enforcer(Arc::new(BrokenDirectory));

    let ctx = enforcer.get_user_context("root");
    assert_eq!(ctx, PrincipalContext::anonymous("root"));
    assert!(ctx.all_roles().is_empty());

    let err = enforcer.enforce_for_user("root", "/apps/foo", "GET", "foo").unwrap_err();
    assert!(matches!(err, RbacError::Forbidden(_)));
}

/// WHY: An empty rule set denies everything
/// REASON: A missing or broken policy file at startup must not allow traffic
/// BREAKS: Default-deny (a deploy without policy.csv would be wide open)
/// SACRIFICES: If this fails, misconfiguration becomes privilege escalation
#[test]
fn empty_rule_set_denies_everything() {
    let enforcer = Enforcer::new(
        &RbacConfig::default(),
        PolicyEngine::from_rules(RuleSet::default()),
        Arc::new(EmptyDirectory),
    );
    let ctx = context(&["admin"], &[("foo", "manager")]);

    for (object, action, app) in REQUESTS {
        assert!(!enforcer.check_permission(&ctx, object, action, app));
    }
}
