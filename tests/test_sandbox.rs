use std::sync::Arc;
use std::time::Duration;

use similar_asserts::assert_eq;

use terrarium::audit::{AuditEventKind, AuditManager, MemorySink};
use terrarium::sandbox::{SecurityPolicy, Severity, ViolationKind};
use terrarium::{context, Environment, ErrorKind};

fn sandboxed(policy: SecurityPolicy) -> Environment {
    let mut env = Environment::new();
    env.set_security_policy(policy);
    env
}

#[test]
fn test_filter_whitelist_blocks_others() {
    // only `upper` is whitelisted, everything else must be denied
    let env = sandboxed(SecurityPolicy::builder("test").filter_whitelist(["upper"]).build());
    assert_eq!(
        env.render_str("{{ 'x'|upper }}", context! {}).unwrap(),
        "X"
    );
    let err = env.render_str("{{ 'x'|lower }}", context! {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SecurityError);
    let violation = err.violation().expect("violation record attached");
    assert_eq!(violation.kind, ViolationKind::FilterAccess);
    assert_eq!(violation.severity, Severity::Medium);
    assert_eq!(violation.resource, "lower");
}

#[test]
fn test_blacklisted_filter_is_high_severity() {
    let env = sandboxed(SecurityPolicy::builder("test").block_filters(["upper"]).build());
    let err = env.render_str("{{ 'x'|upper }}", context! {}).unwrap_err();
    let violation = err.violation().unwrap();
    assert_eq!(violation.severity, Severity::High);
}

#[test]
fn test_function_and_test_gates() {
    let env = sandboxed(
        SecurityPolicy::builder("test")
            .function_whitelist(["dict"])
            .test_whitelist(["defined"])
            .build(),
    );
    assert!(env.render_str("{{ dict(a=1).a }}", context! {}).is_ok());
    let err = env.render_str("{{ range(3) }}", context! {}).unwrap_err();
    assert_eq!(err.violation().unwrap().kind, ViolationKind::FunctionAccess);
    let err = env.render_str("{{ 1 is odd }}", context! {}).unwrap_err();
    assert_eq!(err.violation().unwrap().kind, ViolationKind::TestAccess);
}

#[test]
fn test_attribute_gate_with_pattern() {
    let env = sandboxed(
        SecurityPolicy::builder("test")
            .attribute_whitelist(["user.name"])
            .attribute_pattern(r"^user\.public_.*$")
            .build(),
    );
    let ctx = context! {
        user => context!(name => "n", public_bio => "b", secret => "s"),
    };
    assert_eq!(
        env.render_str("{{ user.name }}", ctx.clone()).unwrap(),
        "n"
    );
    assert_eq!(
        env.render_str("{{ user.public_bio }}", ctx.clone()).unwrap(),
        "b"
    );
    let err = env.render_str("{{ user.secret }}", ctx).unwrap_err();
    assert_eq!(err.violation().unwrap().kind, ViolationKind::AttributeAccess);
}

#[test]
fn test_block_all_methods() {
    let env = sandboxed(SecurityPolicy::builder("test").block_all_methods(true).build());
    let err = env
        .render_str("{{ {'a': 1}.items() }}", context! {})
        .unwrap_err();
    assert_eq!(err.violation().unwrap().kind, ViolationKind::MethodAccess);
}

#[test]
fn test_template_gate_applies_to_includes() {
    let mut env = sandboxed(
        SecurityPolicy::builder("test")
            .template_whitelist(["main.txt", "allowed.txt"])
            .build(),
    );
    env.add_template("main.txt", "{% include 'allowed.txt' %}").unwrap();
    env.add_template("allowed.txt", "ok").unwrap();
    env.add_template("secret.txt", "no").unwrap();
    assert_eq!(
        env.get_template("main.txt").unwrap().render(context! {}).unwrap(),
        "ok"
    );

    env.add_template("main2.txt", "{% include 'secret.txt' %}").unwrap();
    let err = env
        .get_template("main2.txt")
        .unwrap()
        .render(context! {})
        .unwrap_err();
    // main2.txt itself is not whitelisted either, but the violation fires
    // before any output is produced
    assert_eq!(err.kind(), ErrorKind::SecurityError);
}

#[test]
fn test_recursion_limit() {
    let env = sandboxed(SecurityPolicy::builder("test").max_recursion_depth(3).build());
    let err = env
        .render_str(
            "{% macro r(n) %}{% if n > 0 %}{{ r(n - 1) }}{% endif %}{% endmacro %}{{ r(10) }}",
            context! {},
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecursionLimitExceeded);
    assert_eq!(err.violation().unwrap().kind, ViolationKind::RecursionLimit);
}

#[test]
fn test_output_limit() {
    let env = sandboxed(SecurityPolicy::builder("test").max_output_size(64).build());
    let err = env
        .render_str(
            "{% for i in range(100) %}0123456789{% endfor %}",
            context! {},
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutputLimitExceeded);
}

#[test]
fn test_memory_limit() {
    let env = sandboxed(SecurityPolicy::builder("test").max_memory_usage(256).build());
    let err = env
        .render_str("{% for i in range(10000) %}{% endfor %}", context! {})
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MemoryLimitExceeded);
}

#[test]
fn test_execution_deadline() {
    let env = sandboxed(
        SecurityPolicy::builder("test")
            .max_execution_time(Duration::from_millis(0))
            .build(),
    );
    let err = env
        .render_str("{% for i in range(10) %}x{% endfor %}", context! {})
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExecutionTimeout);
}

#[test]
fn test_non_blocking_policy_records_violations() {
    let sink = Arc::new(MemorySink::new(64));
    let manager = Arc::new(AuditManager::new(sink.clone()));
    manager.set_min_level(terrarium::audit::AuditLevel::Debug);

    let mut env = Environment::new();
    env.set_security_policy(
        SecurityPolicy::builder("observe")
            .filter_whitelist(["upper"])
            .block_on_violation(false)
            .build(),
    );
    env.set_audit_manager(manager);

    // the render completes even though a violation was recorded
    assert_eq!(
        env.render_str("{{ 'X'|lower }}", context! {}).unwrap(),
        "x"
    );
    let events = sink.events();
    assert!(events
        .iter()
        .any(|e| e.kind == AuditEventKind::SecurityViolation));
}

#[test]
fn test_audit_lifecycle_events() {
    let sink = Arc::new(MemorySink::new(64));
    let manager = Arc::new(AuditManager::new(sink.clone()));

    let mut env = Environment::new();
    env.set_audit_manager(manager);
    env.render_str("ok", context! {}).unwrap();

    let events = sink.events();
    assert!(events
        .iter()
        .any(|e| e.kind == AuditEventKind::ExecutionStart));
    let end = events
        .iter()
        .find(|e| e.kind == AuditEventKind::ExecutionEnd)
        .expect("execution end event");
    assert!(end.success);
    assert!(end.duration_ms.is_some());

    // event ids are assigned monotonically
    let ids: Vec<u64> = events.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn test_failed_render_audits_error() {
    let sink = Arc::new(MemorySink::new(64));
    let manager = Arc::new(AuditManager::new(sink.clone()));

    let mut env = Environment::new();
    env.set_audit_manager(manager);
    assert!(env.render_str("{{ 1 / 0 }}", context! {}).is_err());

    let end = sink
        .events()
        .into_iter()
        .find(|e| e.kind == AuditEventKind::ExecutionEnd)
        .unwrap();
    assert!(!end.success);
    assert!(end.error_message.unwrap().contains("division by zero"));
}

#[test]
fn test_input_validation() {
    let env = sandboxed(
        SecurityPolicy::builder("test")
            .validate_all_inputs(true)
            .input_pattern(r"^[a-z {}\r\n]+$")
            .build(),
    );
    assert_eq!(env.render_str("hello", context! {}).unwrap(), "hello");
    let err = env.render_str("HELLO", context! {}).unwrap_err();
    assert_eq!(err.violation().unwrap().kind, ViolationKind::InputValidation);
}

#[test]
fn test_input_length_limit() {
    let env = sandboxed(
        SecurityPolicy::builder("test")
            .validate_all_inputs(true)
            .max_input_length(8)
            .build(),
    );
    let err = env
        .render_str("this source is longer than eight bytes", context! {})
        .unwrap_err();
    assert_eq!(err.violation().unwrap().kind, ViolationKind::InputValidation);
}

#[test]
fn test_escape_output_policy() {
    let env = sandboxed(SecurityPolicy::builder("test").escape_output(true).build());
    // plain text template names normally do not escape; the policy forces it
    assert_eq!(
        env.render_str("{{ v }}", context!(v => "<x>")).unwrap(),
        "&lt;x&gt;"
    );
}

#[test]
fn test_interrupt_callback() {
    let mut env = Environment::new();
    env.set_interrupt_callback(|| true);
    let err = env.render_str("hello", context! {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SecurityError);
}

#[test]
fn test_strict_preset() {
    let env = sandboxed(SecurityPolicy::strict("strict"));
    assert_eq!(
        env.render_str("{{ 'x'|upper }}", context! {}).unwrap(),
        "X"
    );
    assert!(env.render_str("{{ 'x'|urlize }}", context! {}).is_err());
}
