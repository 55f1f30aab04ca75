//! Integration tests for the appvirt-sandbox crate.
//!
//! Drive the engine the way the service layer does: seed it from a config,
//! authorize calls in order, register created resources and tear down.

use std::sync::Arc;
use std::thread;

use appvirt_sandbox::{
    CallCheck, DenialReason, OpKind, ResourceRef, ResourceRule, SandboxConfig, SandboxEngine,
    SandboxError, SandboxSettings, UsageLimit,
};

fn call<'a>(
    service: &'a str,
    method: &'a str,
    kind: OpKind,
    resource: Option<&'a ResourceRef>,
) -> CallCheck<'a> {
    CallCheck {
        service,
        method,
        kind: Some(kind),
        resource,
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Resource access
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn created_resource_is_fully_accessible_foreign_one_is_not() {
    let engine = SandboxEngine::new(SandboxConfig::new());
    engine.track_created("Drive", "r1", "file");

    let r1 = ResourceRef::new("r1");
    engine
        .authorize(&call("Drive", "updateFile", OpKind::Write, Some(&r1)))
        .unwrap();
    engine
        .authorize(&call("Drive", "trashFile", OpKind::Delete, Some(&r1)))
        .unwrap();

    let r2 = ResourceRef::new("r2");
    let err = engine
        .authorize(&call("Drive", "getFileById", OpKind::Read, Some(&r2)))
        .unwrap_err();
    assert!(matches!(
        err,
        SandboxError::AccessDenied {
            reason: DenialReason::NoMatchingRule,
            ..
        }
    ));
}

#[test]
fn read_only_rule_blocks_writes_but_not_reads() {
    let config = SandboxConfig::new().with_service(
        "Drive",
        SandboxSettings::new().with_rule(ResourceRule::read_only("r2")),
    );
    let engine = SandboxEngine::new(config);
    let r2 = ResourceRef::new("r2");

    engine
        .authorize(&call("Drive", "getFileById", OpKind::Read, Some(&r2)))
        .unwrap();
    let err = engine
        .authorize(&call("Drive", "updateFile", OpKind::Write, Some(&r2)))
        .unwrap_err();
    match err {
        SandboxError::AccessDenied {
            resource,
            capability,
            reason,
            ..
        } => {
            assert_eq!(resource, "r2");
            assert_eq!(capability, OpKind::Write);
            assert_eq!(reason, DenialReason::Denied);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn any_matching_rule_may_grant() {
    let settings = SandboxSettings::new()
        .with_rule(ResourceRule::read_only("shared"))
        .with_rule(ResourceRule::new("shared").with_write(true));
    let engine = SandboxEngine::new(SandboxConfig::new().with_service("Drive", settings));

    let shared = ResourceRef::new("shared");
    engine
        .check_access("Drive", "updateFile", &shared, OpKind::Write)
        .unwrap();
    assert!(
        engine
            .check_access("Drive", "trashFile", &shared, OpKind::Delete)
            .is_err()
    );
}

#[test]
fn strict_off_allows_foreign_resources() {
    let engine = SandboxEngine::new(SandboxConfig::new().with_strict(false));
    let foreign = ResourceRef::new("foreign");
    engine
        .authorize(&call("Drive", "trashFile", OpKind::Delete, Some(&foreign)))
        .unwrap();

    engine.set_strict(true);
    assert!(
        engine
            .authorize(&call("Drive", "trashFile", OpKind::Delete, Some(&foreign)))
            .is_err()
    );
}

// ═══════════════════════════════════════════════════════════════════════
//  Check ordering
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn first_failing_check_wins() {
    let settings = SandboxSettings::new()
        .with_enabled(false)
        .with_methods(["other"])
        .with_usage_limit(UsageLimit::Total(0));
    let engine = SandboxEngine::new(SandboxConfig::new().with_service("Drive", settings));
    let foreign = ResourceRef::new("foreign");
    let check = call("Drive", "updateFile", OpKind::Write, Some(&foreign));

    assert!(matches!(
        engine.authorize(&check),
        Err(SandboxError::ServiceDisabled { .. })
    ));

    engine.update("Drive", |s| s.enabled = true);
    assert!(matches!(
        engine.authorize(&check),
        Err(SandboxError::MethodNotAllowed { .. })
    ));

    engine.update("Drive", |s| s.method_whitelist = None);
    assert!(matches!(
        engine.authorize(&check),
        Err(SandboxError::AccessDenied { .. })
    ));

    engine.track_created("Drive", "foreign", "file");
    assert!(matches!(
        engine.authorize(&check),
        Err(SandboxError::UsageLimitExceeded { .. })
    ));
}

// ═══════════════════════════════════════════════════════════════════════
//  Quotas
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn quota_scenario_total_of_two() {
    let engine = SandboxEngine::new(
        SandboxConfig::new()
            .with_service("X", SandboxSettings::new().with_usage_limit(UsageLimit::Total(2))),
    );

    engine.authorize(&call("X", "get", OpKind::Read, None)).unwrap();
    engine.authorize(&call("X", "get", OpKind::Read, None)).unwrap();
    let err = engine
        .authorize(&call("X", "get", OpKind::Read, None))
        .unwrap_err();
    assert!(matches!(err, SandboxError::UsageLimitExceeded { used: 2, limit: 2, .. }));
    assert_eq!(engine.settings("X").usage(OpKind::Read), 2);

    engine.reset_usage("X");
    engine.authorize(&call("X", "get", OpKind::Read, None)).unwrap();
}

#[test]
fn per_kind_limits_are_independent() {
    let limit = UsageLimit::per_kind([(OpKind::Write, 1), (OpKind::Delete, 0)]);
    let engine = SandboxEngine::new(
        SandboxConfig::new().with_defaults(SandboxSettings::new().with_usage_limit(limit)),
    );

    for _ in 0..10 {
        engine.authorize(&call("Sheets", "get", OpKind::Read, None)).unwrap();
    }
    engine.authorize(&call("Sheets", "set", OpKind::Write, None)).unwrap();
    assert!(engine.authorize(&call("Sheets", "set", OpKind::Write, None)).is_err());
    assert!(engine.authorize(&call("Sheets", "remove", OpKind::Delete, None)).is_err());

    // Services are seeded separately and count separately.
    engine.authorize(&call("Docs", "set", OpKind::Write, None)).unwrap();
}

#[test]
fn concurrent_callers_never_exceed_the_limit() {
    let engine = Arc::new(SandboxEngine::new(
        SandboxConfig::new()
            .with_service("X", SandboxSettings::new().with_usage_limit(UsageLimit::Total(50))),
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                (0..20)
                    .filter(|_| engine.authorize(&call("X", "get", OpKind::Read, None)).is_ok())
                    .count()
            })
        })
        .collect();

    let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(allowed, 50);
    assert_eq!(engine.settings("X").total_usage(), 50);
}

// ═══════════════════════════════════════════════════════════════════════
//  Teardown
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn teardown_scenario_with_one_failure() {
    let engine = SandboxEngine::default();
    engine.track_created("Drive", "folder-1", "folder");
    engine.track_created("Drive", "file-1", "file");
    engine.track_created("Drive", "file-2", "file");

    let report = engine.trash(|r| {
        if r.id == "file-1" {
            Err(format!("{} is locked", r.id))
        } else {
            Ok(())
        }
    });

    let trashed: Vec<_> = report.trashed.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(trashed, vec!["file-2", "folder-1"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].reason, "file-1 is locked");
    assert!(engine.session().contains("file-1"));
    assert_eq!(engine.session().len(), 1);
    engine
        .check_access("Drive", "trashFile", &ResourceRef::new("file-1"), OpKind::Delete)
        .unwrap();
    assert!(
        engine
            .check_access("Drive", "trashFile", &ResourceRef::new("file-2"), OpKind::Delete)
            .is_err()
    );

    // A second pass retries only what is left.
    let report = engine.trash(|_| Ok::<(), String>(()));
    let trashed: Vec<_> = report.trashed.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(trashed, vec!["file-1"]);
    assert!(engine.session().is_empty());

    // Teardown bypasses the sandbox: a disabled service is still cleaned.
    engine.update("Drive", |s| s.enabled = false);
    engine.track_created("Drive", "late", "file");
    let report = engine.trash(|_| Ok::<(), String>(()));
    assert_eq!(report.trashed.len(), 1);
}

#[test]
fn teardown_skips_opted_out_services() {
    let config = SandboxConfig::new()
        .with_service("Calendar", SandboxSettings::new().with_cleanup(false));
    let engine = SandboxEngine::new(config);
    engine.track_created("Calendar", "cal-1", "calendar");
    engine.track_created("Drive", "f-1", "file");

    let mut seen = Vec::new();
    let report = engine.trash(|r| {
        seen.push(r.service.clone());
        Ok::<(), String>(())
    });

    assert_eq!(seen, vec!["Drive"]);
    assert_eq!(report.skipped_services, vec!["Calendar"]);
    assert!(engine.session().contains("cal-1"));
}
