//! Sandbox policy enforcement.
//!
//! A [`SecurityPolicy`] is an immutable snapshot of access gates and resource
//! limits.  Binding a policy to a render produces a [`SecurityContext`]
//! which accumulates violations and counters for that render only.  The
//! evaluator consults the context before every filter, function, test,
//! attribute, method and template dispatch and at every statement boundary.
//!
//! ```
//! # use terrarium::{Environment, sandbox::SecurityPolicy};
//! let mut env = Environment::new();
//! env.set_security_policy(
//!     SecurityPolicy::builder("example")
//!         .filter_whitelist(["upper", "join"])
//!         .max_recursion_depth(64)
//!         .build(),
//! );
//! ```

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use time::OffsetDateTime;

use crate::audit::{AuditEvent, AuditEventKind, AuditLevel, AuditManager};
use crate::error::{Error, ErrorKind};

/// The category of a recorded sandbox violation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A filter was denied.
    FilterAccess,
    /// A function was denied.
    FunctionAccess,
    /// A test was denied.
    TestAccess,
    /// An attribute lookup was denied.
    AttributeAccess,
    /// A method call was denied.
    MethodAccess,
    /// A template load was denied.
    TemplateAccess,
    /// Input content failed validation.
    InputValidation,
    /// The execution deadline passed.
    ExecutionTimeout,
    /// The memory budget was exhausted.
    MemoryLimit,
    /// The output budget was exhausted.
    OutputLimit,
    /// The recursion limit was exceeded.
    RecursionLimit,
}

impl ViolationKind {
    fn audit_kind(self) -> AuditEventKind {
        match self {
            ViolationKind::FilterAccess => AuditEventKind::FilterAccess,
            ViolationKind::FunctionAccess => AuditEventKind::FunctionAccess,
            ViolationKind::TestAccess => AuditEventKind::TestAccess,
            ViolationKind::AttributeAccess => AuditEventKind::AttributeAccess,
            ViolationKind::MethodAccess => AuditEventKind::MethodAccess,
            ViolationKind::TemplateAccess => AuditEventKind::TemplateAccess,
            ViolationKind::InputValidation => AuditEventKind::InputValidation,
            ViolationKind::ExecutionTimeout => AuditEventKind::ExecutionTimeout,
            ViolationKind::MemoryLimit => AuditEventKind::MemoryLimitExceeded,
            ViolationKind::OutputLimit => AuditEventKind::OutputLimitExceeded,
            ViolationKind::RecursionLimit => AuditEventKind::RecursionLimitExceeded,
        }
    }

    fn error_kind(self) -> ErrorKind {
        match self {
            ViolationKind::ExecutionTimeout => ErrorKind::ExecutionTimeout,
            ViolationKind::MemoryLimit => ErrorKind::MemoryLimitExceeded,
            ViolationKind::OutputLimit => ErrorKind::OutputLimitExceeded,
            ViolationKind::RecursionLimit => ErrorKind::RecursionLimitExceeded,
            _ => ErrorKind::SecurityError,
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ViolationKind::FilterAccess => "filter_access",
            ViolationKind::FunctionAccess => "function_access",
            ViolationKind::TestAccess => "test_access",
            ViolationKind::AttributeAccess => "attribute_access",
            ViolationKind::MethodAccess => "method_access",
            ViolationKind::TemplateAccess => "template_access",
            ViolationKind::InputValidation => "input_validation",
            ViolationKind::ExecutionTimeout => "execution_timeout",
            ViolationKind::MemoryLimit => "memory_limit",
            ViolationKind::OutputLimit => "output_limit",
            ViolationKind::RecursionLimit => "recursion_limit",
        })
    }
}

/// The severity of a violation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Low,
    /// A denied operation in whitelist mode.
    Medium,
    /// A blacklisted operation or exceeded resource limit.
    High,
    /// Reserved for multiple repeated violations.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        })
    }
}

/// A structured record of a policy denial.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    /// The category of the violation.
    pub kind: ViolationKind,
    /// How severe the violation is.
    pub severity: Severity,
    /// Human readable description.
    pub message: String,
    /// The denied resource (filter name, template name, ...).
    pub resource: String,
    /// When the violation was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Violation {
    fn new(kind: ViolationKind, severity: Severity, resource: &str, message: String) -> Violation {
        Violation {
            kind,
            severity,
            message,
            resource: resource.to_string(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// A white/black list over names.
#[derive(Debug, Clone, Default)]
pub struct AccessList {
    whitelist_mode: bool,
    allowed: BTreeSet<String>,
    blocked: BTreeSet<String>,
}

impl AccessList {
    /// True when the list runs in whitelist mode.
    pub fn is_whitelist(&self) -> bool {
        self.whitelist_mode
    }
}

/// An immutable snapshot of sandbox gates and resource limits.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    name: String,
    filters: AccessList,
    functions: AccessList,
    tests: AccessList,
    attributes: AccessList,
    methods: AccessList,
    templates: AccessList,
    attribute_patterns: Vec<regex::Regex>,
    template_patterns: Vec<regex::Regex>,
    input_patterns: Vec<regex::Regex>,
    block_all_methods: bool,
    max_execution_time: Option<Duration>,
    max_recursion_depth: Option<usize>,
    max_memory_usage: Option<usize>,
    max_output_size: Option<usize>,
    max_input_length: Option<usize>,
    block_on_violation: bool,
    enable_audit_logging: bool,
    log_allowed_operations: bool,
    escape_output: bool,
    validate_all_inputs: bool,
    allow_html: bool,
    allow_javascript: bool,
    allow_css: bool,
}

impl SecurityPolicy {
    /// Starts building a policy with the given name.
    pub fn builder(name: &str) -> SecurityPolicyBuilder {
        SecurityPolicyBuilder {
            policy: SecurityPolicy::permissive(name),
        }
    }

    /// A policy that allows everything and enforces no limits.
    pub fn permissive(name: &str) -> SecurityPolicy {
        SecurityPolicy {
            name: name.to_string(),
            filters: AccessList::default(),
            functions: AccessList::default(),
            tests: AccessList::default(),
            attributes: AccessList::default(),
            methods: AccessList::default(),
            templates: AccessList::default(),
            attribute_patterns: Vec::new(),
            template_patterns: Vec::new(),
            input_patterns: Vec::new(),
            block_all_methods: false,
            max_execution_time: None,
            max_recursion_depth: None,
            max_memory_usage: None,
            max_output_size: None,
            max_input_length: None,
            block_on_violation: true,
            enable_audit_logging: true,
            log_allowed_operations: false,
            escape_output: false,
            validate_all_inputs: false,
            allow_html: true,
            allow_javascript: true,
            allow_css: true,
        }
    }

    /// A restrictive preset: whitelisted string/sequence filters, no method
    /// calls, conservative resource limits.
    pub fn strict(name: &str) -> SecurityPolicy {
        SecurityPolicy::builder(name)
            .filter_whitelist([
                "upper", "lower", "capitalize", "title", "trim", "length", "count", "first",
                "last", "join", "default", "d", "escape", "e", "safe", "int", "float", "abs",
                "round", "list", "sort", "reverse",
            ])
            .test_whitelist([
                "defined", "undefined", "none", "string", "number", "sequence", "mapping",
                "odd", "even", "eq", "ne", "lt", "le", "gt", "ge",
            ])
            .function_whitelist(["range", "dict", "namespace"])
            .block_all_methods(true)
            .max_execution_time(Duration::from_secs(5))
            .max_recursion_depth(64)
            .max_memory_usage(8 * 1024 * 1024)
            .max_output_size(1024 * 1024)
            .max_input_length(256 * 1024)
            .escape_output(true)
            .allow_javascript(false)
            .allow_css(false)
            .build()
    }

    /// The name of the policy.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether denied operations abort the render.
    pub fn block_on_violation(&self) -> bool {
        self.block_on_violation
    }

    /// Whether HTML escaping is forced on unescaped templates.
    pub fn escape_output(&self) -> bool {
        self.escape_output
    }

    /// Whether the render should validate inputs against the input patterns.
    pub fn validate_all_inputs(&self) -> bool {
        self.validate_all_inputs
    }

    /// The configured recursion limit.
    pub fn max_recursion_depth(&self) -> Option<usize> {
        self.max_recursion_depth
    }

    /// The configured input length limit.
    pub fn max_input_length(&self) -> Option<usize> {
        self.max_input_length
    }
}

/// Builder for [`SecurityPolicy`].
pub struct SecurityPolicyBuilder {
    policy: SecurityPolicy,
}

macro_rules! list_methods {
    ($allow:ident, $block:ident, $whitelist:ident, $field:ident) => {
        /// Adds names to the allow list of this category.
        pub fn $allow<I, S>(mut self, names: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.policy
                .$field
                .allowed
                .extend(names.into_iter().map(Into::into));
            self
        }

        /// Adds names to the block list of this category.
        pub fn $block<I, S>(mut self, names: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.policy
                .$field
                .blocked
                .extend(names.into_iter().map(Into::into));
            self
        }

        /// Switches this category to whitelist mode with the given names.
        pub fn $whitelist<I, S>(mut self, names: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.policy.$field.whitelist_mode = true;
            self.policy
                .$field
                .allowed
                .extend(names.into_iter().map(Into::into));
            self
        }
    };
}

impl SecurityPolicyBuilder {
    list_methods!(allow_filters, block_filters, filter_whitelist, filters);
    list_methods!(allow_functions, block_functions, function_whitelist, functions);
    list_methods!(allow_tests, block_tests, test_whitelist, tests);
    list_methods!(allow_attributes, block_attributes, attribute_whitelist, attributes);
    list_methods!(allow_methods, block_methods, method_whitelist, methods);
    list_methods!(allow_templates, block_templates, template_whitelist, templates);

    /// Adds a regex pattern that additionally admits attribute paths.
    pub fn attribute_pattern(mut self, pattern: &str) -> Self {
        if let Ok(re) = regex::Regex::new(pattern) {
            self.policy.attribute_patterns.push(re);
        }
        self
    }

    /// Adds a regex pattern that additionally admits template names.
    pub fn template_pattern(mut self, pattern: &str) -> Self {
        if let Ok(re) = regex::Regex::new(pattern) {
            self.policy.template_patterns.push(re);
        }
        self
    }

    /// Adds an input allowlist pattern; validated input must match at least
    /// one configured pattern.
    pub fn input_pattern(mut self, pattern: &str) -> Self {
        if let Ok(re) = regex::Regex::new(pattern) {
            self.policy.input_patterns.push(re);
        }
        self
    }

    /// Blocks every method call regardless of the method list.
    pub fn block_all_methods(mut self, yes: bool) -> Self {
        self.policy.block_all_methods = yes;
        self
    }

    /// Sets the wall clock budget for a render.
    pub fn max_execution_time(mut self, limit: Duration) -> Self {
        self.policy.max_execution_time = Some(limit);
        self
    }

    /// Sets the evaluator recursion limit.
    pub fn max_recursion_depth(mut self, limit: usize) -> Self {
        self.policy.max_recursion_depth = Some(limit);
        self
    }

    /// Sets the memory budget in bytes.
    pub fn max_memory_usage(mut self, limit: usize) -> Self {
        self.policy.max_memory_usage = Some(limit);
        self
    }

    /// Sets the output budget in bytes.
    pub fn max_output_size(mut self, limit: usize) -> Self {
        self.policy.max_output_size = Some(limit);
        self
    }

    /// Sets the maximum length of validated inputs.
    pub fn max_input_length(mut self, limit: usize) -> Self {
        self.policy.max_input_length = Some(limit);
        self
    }

    /// Whether denied operations abort the render (default true).
    pub fn block_on_violation(mut self, yes: bool) -> Self {
        self.policy.block_on_violation = yes;
        self
    }

    /// Whether violations are forwarded to the audit manager (default true).
    pub fn enable_audit_logging(mut self, yes: bool) -> Self {
        self.policy.enable_audit_logging = yes;
        self
    }

    /// Also audit operations that were allowed.
    pub fn log_allowed_operations(mut self, yes: bool) -> Self {
        self.policy.log_allowed_operations = yes;
        self
    }

    /// Force HTML auto escaping when the template would render unescaped.
    pub fn escape_output(mut self, yes: bool) -> Self {
        self.policy.escape_output = yes;
        self
    }

    /// Validate template source and root context strings on render start.
    pub fn validate_all_inputs(mut self, yes: bool) -> Self {
        self.policy.validate_all_inputs = yes;
        self
    }

    /// Whether raw HTML content is acceptable input.
    pub fn allow_html(mut self, yes: bool) -> Self {
        self.policy.allow_html = yes;
        self
    }

    /// Whether script content is acceptable input.
    pub fn allow_javascript(mut self, yes: bool) -> Self {
        self.policy.allow_javascript = yes;
        self
    }

    /// Whether style content is acceptable input.
    pub fn allow_css(mut self, yes: bool) -> Self {
        self.policy.allow_css = yes;
        self
    }

    /// Finishes the policy.
    pub fn build(self) -> SecurityPolicy {
        self.policy
    }
}

enum Gate {
    Filter,
    Function,
    Test,
    Attribute,
    Method,
    Template,
}

impl Gate {
    fn violation_kind(&self) -> ViolationKind {
        match self {
            Gate::Filter => ViolationKind::FilterAccess,
            Gate::Function => ViolationKind::FunctionAccess,
            Gate::Test => ViolationKind::TestAccess,
            Gate::Attribute => ViolationKind::AttributeAccess,
            Gate::Method => ViolationKind::MethodAccess,
            Gate::Template => ViolationKind::TemplateAccess,
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            Gate::Filter => "filter",
            Gate::Function => "function",
            Gate::Test => "test",
            Gate::Attribute => "attribute",
            Gate::Method => "method",
            Gate::Template => "template",
        }
    }
}

/// Binds a [`SecurityPolicy`] to a single render.
///
/// The context carries the per-render mutable state: the violation log, the
/// recursion counter, the start timestamp and the memory and output byte
/// counters.  It is not shared across renders.
pub struct SecurityContext {
    policy: Arc<SecurityPolicy>,
    audit: Option<Arc<AuditManager>>,
    template_name: String,
    start: Instant,
    violations: RefCell<Vec<Violation>>,
    recursion_depth: Cell<usize>,
    memory_used: Cell<usize>,
}

impl SecurityContext {
    /// Creates a context for one render.
    pub fn new(
        policy: Arc<SecurityPolicy>,
        audit: Option<Arc<AuditManager>>,
        template_name: &str,
    ) -> SecurityContext {
        SecurityContext {
            policy,
            audit,
            template_name: template_name.to_string(),
            start: Instant::now(),
            violations: RefCell::new(Vec::new()),
            recursion_depth: Cell::new(0),
            memory_used: Cell::new(0),
        }
    }

    /// The bound policy.
    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// The violations recorded so far.
    pub fn violations(&self) -> Vec<Violation> {
        self.violations.borrow().clone()
    }

    /// Time elapsed since the render started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn record(&self, violation: &Violation) {
        self.violations.borrow_mut().push(violation.clone());
        if self.policy.enable_audit_logging {
            if let Some(ref audit) = self.audit {
                audit.record(
                    AuditEvent::new(
                        AuditLevel::Warning,
                        AuditEventKind::SecurityViolation,
                        violation.message.clone(),
                    )
                    .with_template(&self.template_name)
                    .with_resource(&violation.resource)
                    .with_policy(&self.policy.name)
                    .with_violation(violation.clone())
                    .with_success(false),
                );
            }
        }
    }

    fn log_allowed(&self, gate: &Gate, name: &str) {
        if self.policy.log_allowed_operations {
            if let Some(ref audit) = self.audit {
                audit.record(
                    AuditEvent::new(
                        AuditLevel::Debug,
                        gate.violation_kind().audit_kind(),
                        format!("{} {:?} allowed", gate.noun(), name),
                    )
                    .with_template(&self.template_name)
                    .with_resource(name)
                    .with_policy(&self.policy.name),
                );
            }
        }
    }

    fn deny(&self, violation: Violation) -> Result<(), Error> {
        self.record(&violation);
        if self.policy.block_on_violation {
            Err(Error::new(
                violation.kind.error_kind(),
                violation.message.clone(),
            )
            .with_violation(violation))
        } else {
            Ok(())
        }
    }

    fn check_gate(
        &self,
        gate: Gate,
        list: &AccessList,
        patterns: &[regex::Regex],
        name: &str,
    ) -> Result<(), Error> {
        if list.blocked.contains(name) {
            return self.deny(Violation::new(
                gate.violation_kind(),
                Severity::High,
                name,
                format!("{} {:?} is blacklisted", gate.noun(), name),
            ));
        }
        if list.whitelist_mode
            && !list.allowed.contains(name)
            && !patterns.iter().any(|re| re.is_match(name))
        {
            return self.deny(Violation::new(
                gate.violation_kind(),
                Severity::Medium,
                name,
                format!("{} {:?} is not whitelisted", gate.noun(), name),
            ));
        }
        self.log_allowed(&gate, name);
        Ok(())
    }

    /// Gates a filter dispatch.
    pub fn check_filter(&self, name: &str) -> Result<(), Error> {
        self.check_gate(Gate::Filter, &self.policy.filters, &[], name)
    }

    /// Gates a function call.
    pub fn check_function(&self, name: &str) -> Result<(), Error> {
        self.check_gate(Gate::Function, &self.policy.functions, &[], name)
    }

    /// Gates a test dispatch.
    pub fn check_test(&self, name: &str) -> Result<(), Error> {
        self.check_gate(Gate::Test, &self.policy.tests, &[], name)
    }

    /// Gates an attribute lookup by dotted path.
    pub fn check_attribute(&self, path: &str) -> Result<(), Error> {
        self.check_gate(
            Gate::Attribute,
            &self.policy.attributes,
            &self.policy.attribute_patterns,
            path,
        )
    }

    /// Gates a method call.
    pub fn check_method(&self, name: &str) -> Result<(), Error> {
        if self.policy.block_all_methods {
            return self.deny(Violation::new(
                ViolationKind::MethodAccess,
                Severity::High,
                name,
                format!("method {name:?} denied, method calls are blocked"),
            ));
        }
        self.check_gate(Gate::Method, &self.policy.methods, &[], name)
    }

    /// Gates a template load.
    pub fn check_template(&self, name: &str) -> Result<(), Error> {
        self.check_gate(
            Gate::Template,
            &self.policy.templates,
            &self.policy.template_patterns,
            name,
        )
    }

    /// Validates input content against the configured allowlist patterns.
    ///
    /// Inputs longer than `max_input_length` are rejected outright; when
    /// patterns are configured the input must match at least one of them.
    pub fn check_input(&self, text: &str, input_type: &str) -> Result<(), Error> {
        if let Some(limit) = self.policy.max_input_length {
            if text.len() > limit {
                return self.deny(Violation::new(
                    ViolationKind::InputValidation,
                    Severity::High,
                    input_type,
                    format!(
                        "{input_type} input of {} bytes exceeds limit of {limit} bytes",
                        text.len()
                    ),
                ));
            }
        }
        if !self.policy.input_patterns.is_empty()
            && !self.policy.input_patterns.iter().any(|re| re.is_match(text))
        {
            return self.deny(Violation::new(
                ViolationKind::InputValidation,
                Severity::Medium,
                input_type,
                format!("{input_type} input does not match any allowed pattern"),
            ));
        }
        if !self.policy.allow_javascript && text.to_ascii_lowercase().contains("<script") {
            return self.deny(Violation::new(
                ViolationKind::InputValidation,
                Severity::High,
                input_type,
                format!("{input_type} input contains script content"),
            ));
        }
        // markup checks apply to variable inputs only; template source is
        // expected to contain markup
        if input_type != "template" {
            if !self.policy.allow_html && text.contains('<') {
                return self.deny(Violation::new(
                    ViolationKind::InputValidation,
                    Severity::Medium,
                    input_type,
                    format!("{input_type} input contains markup"),
                ));
            }
            if !self.policy.allow_css && text.to_ascii_lowercase().contains("<style") {
                return self.deny(Violation::new(
                    ViolationKind::InputValidation,
                    Severity::Medium,
                    input_type,
                    format!("{input_type} input contains style content"),
                ));
            }
        }
        Ok(())
    }

    /// Checks the wall clock budget.
    pub fn check_deadline(&self) -> Result<(), Error> {
        if let Some(limit) = self.policy.max_execution_time {
            if self.start.elapsed() > limit {
                return self.deny(Violation::new(
                    ViolationKind::ExecutionTimeout,
                    Severity::High,
                    &self.template_name,
                    format!("render exceeded execution budget of {limit:?}"),
                ));
            }
        }
        Ok(())
    }

    /// Checks the output byte budget against the bytes written so far.
    pub fn check_output(&self, written: usize) -> Result<(), Error> {
        if let Some(limit) = self.policy.max_output_size {
            if written > limit {
                return self.deny(Violation::new(
                    ViolationKind::OutputLimit,
                    Severity::High,
                    &self.template_name,
                    format!("render produced {written} bytes, limit is {limit} bytes"),
                ));
            }
        }
        Ok(())
    }

    /// Accounts allocated bytes against the memory budget.
    pub fn track_memory(&self, bytes: usize) -> Result<(), Error> {
        let used = self.memory_used.get().saturating_add(bytes);
        self.memory_used.set(used);
        if let Some(limit) = self.policy.max_memory_usage {
            if used > limit {
                return self.deny(Violation::new(
                    ViolationKind::MemoryLimit,
                    Severity::High,
                    &self.template_name,
                    format!("render allocated {used} bytes, limit is {limit} bytes"),
                ));
            }
        }
        Ok(())
    }

    /// Increments the recursion counter.
    ///
    /// Callers must pair this with [`leave_recursion`](Self::leave_recursion)
    /// on every exit path.
    pub fn enter_recursion(&self) -> Result<(), Error> {
        let depth = self.recursion_depth.get() + 1;
        self.recursion_depth.set(depth);
        if let Some(limit) = self.policy.max_recursion_depth {
            if depth > limit {
                return self.deny(Violation::new(
                    ViolationKind::RecursionLimit,
                    Severity::High,
                    &self.template_name,
                    format!("render nested {depth} levels deep, limit is {limit}"),
                ));
            }
        }
        Ok(())
    }

    /// Decrements the recursion counter.
    pub fn leave_recursion(&self) {
        self.recursion_depth
            .set(self.recursion_depth.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_blacklist() {
        let policy = Arc::new(
            SecurityPolicy::builder("t")
                .block_filters(["dangerous"])
                .build(),
        );
        let ctx = SecurityContext::new(policy, None, "test.html");
        assert!(ctx.check_filter("upper").is_ok());
        let err = ctx.check_filter("dangerous").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SecurityError);
        let violations = ctx.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::FilterAccess);
        assert_eq!(violations[0].severity, Severity::High);
    }

    #[test]
    fn test_whitelist() {
        let policy = Arc::new(
            SecurityPolicy::builder("t")
                .filter_whitelist(["upper"])
                .build(),
        );
        let ctx = SecurityContext::new(policy, None, "test.html");
        assert!(ctx.check_filter("upper").is_ok());
        let err = ctx.check_filter("lower").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SecurityError);
        assert_eq!(ctx.violations()[0].severity, Severity::Medium);
    }

    #[test]
    fn test_non_blocking_policy_records_only() {
        let policy = Arc::new(
            SecurityPolicy::builder("t")
                .filter_whitelist(["upper"])
                .block_on_violation(false)
                .build(),
        );
        let ctx = SecurityContext::new(policy, None, "test.html");
        assert!(ctx.check_filter("lower").is_ok());
        assert_eq!(ctx.violations().len(), 1);
    }

    #[test]
    fn test_recursion_limit() {
        let policy = Arc::new(
            SecurityPolicy::builder("t").max_recursion_depth(2).build(),
        );
        let ctx = SecurityContext::new(policy, None, "test.html");
        assert!(ctx.enter_recursion().is_ok());
        assert!(ctx.enter_recursion().is_ok());
        let err = ctx.enter_recursion().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecursionLimitExceeded);
    }

    #[test]
    fn test_template_pattern() {
        let policy = Arc::new(
            SecurityPolicy::builder("t")
                .template_whitelist(["base.html"])
                .template_pattern(r"^partials/.*\.html$")
                .build(),
        );
        let ctx = SecurityContext::new(policy, None, "test.html");
        assert!(ctx.check_template("base.html").is_ok());
        assert!(ctx.check_template("partials/nav.html").is_ok());
        assert!(ctx.check_template("secret.txt").is_err());
    }
}
