use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::defaults;
use crate::error::{Error, ErrorKind};
use crate::eval::State;
use crate::expression::Expression;
use crate::loader::{FnLoader, Loader};
use crate::sandbox::SecurityPolicy;
use crate::syntax::parser::parse_expr;
use crate::template::{CompiledTemplate, Template};
use crate::utils::AutoEscape;
use crate::value::{Namespace, Value};
use crate::audit::AuditManager;

type AutoEscapeFunc = dyn Fn(&str) -> AutoEscape + Sync + Send;
type FinalizeFunc = dyn Fn(&State, &Value) -> Result<Value, Error> + Sync + Send;
type InterruptFunc = dyn Fn() -> bool + Sync + Send;

/// The uniform filter signature.
///
/// Filters receive the render state, the input value and the evaluated
/// arguments; keyword arguments travel as a trailing kwargs map.
pub type FilterFunc =
    Arc<dyn Fn(&State, &Value, &[Value]) -> Result<Value, Error> + Sync + Send>;

/// The uniform test signature.
pub type TestFunc = Arc<dyn Fn(&State, &Value, &[Value]) -> Result<bool, Error> + Sync + Send>;

/// The sequence written for newlines by filters that produce them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum NewlineSequence {
    /// Unix newlines (the default).
    #[default]
    Lf,
    /// Windows newlines.
    CrLf,
    /// Old MacOS newlines.
    Cr,
}

impl NewlineSequence {
    /// The sequence as string.
    pub fn as_str(self) -> &'static str {
        match self {
            NewlineSequence::Lf => "\n",
            NewlineSequence::CrLf => "\r\n",
            NewlineSequence::Cr => "\r",
        }
    }
}

const KNOWN_EXTENSIONS: &[&str] = &["i18n", "do", "loopcontrols", "autoescape"];

/// An abstraction that holds the engine configuration.
///
/// This object holds the central configuration state for templates and is
/// also the container for all loaded templates.  It is cheap enough to
/// clone and is safe to share across threads: concurrent renders read it
/// while configuration writes happen through `&mut self` before sharing.
///
/// There are two ways to construct an environment:
///
/// * [`Environment::new`] creates an environment preconfigured with sensible
///   defaults.  It will contain all built-in filters, tests and globals as
///   well as a callback for auto escaping based on file extension.
/// * [`Environment::empty`] creates a completely blank environment.
pub struct Environment {
    templates: TemplateStore,
    filters: BTreeMap<String, FilterFunc>,
    tests: BTreeMap<String, TestFunc>,
    globals: BTreeMap<String, Value>,
    policies: BTreeMap<String, Value>,
    macro_registry: Arc<RwLock<BTreeMap<String, Value>>>,
    default_auto_escape: Arc<AutoEscapeFunc>,
    finalize: Option<Arc<FinalizeFunc>>,
    interrupt: Option<Arc<InterruptFunc>>,
    newline_sequence: NewlineSequence,
    keep_trailing_newline: bool,
    extensions: BTreeSet<String>,
    security_policy: Option<Arc<SecurityPolicy>>,
    audit: Option<Arc<AuditManager>>,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::empty()
    }
}

impl Clone for Environment {
    fn clone(&self) -> Self {
        Environment {
            templates: self.templates.clone(),
            filters: self.filters.clone(),
            tests: self.tests.clone(),
            globals: self.globals.clone(),
            policies: self.policies.clone(),
            macro_registry: self.macro_registry.clone(),
            default_auto_escape: self.default_auto_escape.clone(),
            finalize: self.finalize.clone(),
            interrupt: self.interrupt.clone(),
            newline_sequence: self.newline_sequence,
            keep_trailing_newline: self.keep_trailing_newline,
            extensions: self.extensions.clone(),
            security_policy: self.security_policy.clone(),
            audit: self.audit.clone(),
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("globals", &self.globals.keys().collect::<Vec<_>>())
            .field("tests", &self.tests.keys().collect::<Vec<_>>())
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .field("templates", &self.templates)
            .finish()
    }
}

impl Environment {
    /// Creates a new environment with sensible defaults.
    ///
    /// This environment does not yet contain any templates but it will have
    /// all the default filters, tests and globals loaded.  If you do not
    /// want any default configuration you can use the alternative
    /// [`empty`](Environment::empty) method.
    pub fn new() -> Environment {
        Environment {
            templates: TemplateStore::default(),
            filters: defaults::get_builtin_filters(),
            tests: defaults::get_builtin_tests(),
            globals: defaults::get_globals(),
            policies: BTreeMap::new(),
            macro_registry: Arc::new(RwLock::new(BTreeMap::new())),
            default_auto_escape: Arc::new(defaults::default_auto_escape_callback),
            finalize: None,
            interrupt: None,
            newline_sequence: NewlineSequence::default(),
            keep_trailing_newline: false,
            extensions: BTreeSet::new(),
            security_policy: None,
            audit: None,
        }
    }

    /// Creates a completely empty environment.
    ///
    /// This environment has no filters, no templates, no globals and no
    /// default logic for auto escaping configured.
    pub fn empty() -> Environment {
        Environment {
            templates: TemplateStore::default(),
            filters: BTreeMap::new(),
            tests: BTreeMap::new(),
            globals: BTreeMap::new(),
            policies: BTreeMap::new(),
            macro_registry: Arc::new(RwLock::new(BTreeMap::new())),
            default_auto_escape: Arc::new(defaults::no_auto_escape),
            finalize: None,
            interrupt: None,
            newline_sequence: NewlineSequence::default(),
            keep_trailing_newline: false,
            extensions: BTreeSet::new(),
            security_policy: None,
            audit: None,
        }
    }

    /// Loads a template from a string into the environment.
    ///
    /// The `name` parameter defines the name of the template which
    /// identifies it.  To look up a loaded template use the
    /// [`get_template`](Self::get_template) method.
    ///
    /// ```
    /// # use terrarium::Environment;
    /// let mut env = Environment::new();
    /// env.add_template("index.html", "Hello {{ name }}!").unwrap();
    /// ```
    pub fn add_template(&mut self, name: &str, source: &str) -> Result<(), Error> {
        let compiled = ok!(self.compile(name, source));
        self.templates.insert(name, compiled);
        Ok(())
    }

    /// Removes a template by name.
    pub fn remove_template(&mut self, name: &str) {
        self.templates.remove(name);
    }

    /// Removes all stored templates.
    ///
    /// This method is mainly useful when combined with a loader as it
    /// causes the loader to "reload" templates.
    pub fn clear_templates(&mut self) {
        self.templates.clear();
    }

    /// Registers a template loader.
    ///
    /// When a loader is registered the environment gains the ability to
    /// dynamically load templates.  Once loaded, a template stays cached
    /// until its up-to-date checker reports staleness.
    pub fn set_loader<L: Loader + 'static>(&mut self, loader: L) {
        self.templates.loader = Some(Arc::new(loader));
    }

    /// Registers a closure as template loader.
    ///
    /// ```
    /// # use terrarium::Environment;
    /// let mut env = Environment::new();
    /// env.set_loader_fn(|name| {
    ///     if name == "layout.html" {
    ///         Ok(Some("...".into()))
    ///     } else {
    ///         Ok(None)
    ///     }
    /// });
    /// ```
    pub fn set_loader_fn<F>(&mut self, f: F)
    where
        F: Fn(&str) -> Result<Option<String>, Error> + Send + Sync + 'static,
    {
        self.set_loader(FnLoader::new(f));
    }

    /// Fetches a template by name.
    ///
    /// This requires that the template has been loaded with
    /// [`add_template`](Environment::add_template) beforehand.  If the
    /// template was not loaded an error of kind `TemplateNotFound` is
    /// returned.  If a loader was registered this can also dynamically load
    /// templates.
    pub fn get_template(&self, name: &str) -> Result<Template<'_>, Error> {
        self.fetch_template(name)
            .map(|compiled| Template::new(self, compiled))
    }

    /// Parses a template from a string without storing it.
    ///
    /// ```
    /// # use terrarium::{Environment, context};
    /// let env = Environment::new();
    /// let tmpl = env.parse("Hello {{ name }}", "greeting.txt").unwrap();
    /// assert_eq!(tmpl.render(context! { name => "World" }).unwrap(), "Hello World");
    /// ```
    pub fn parse(&self, source: &str, name: &str) -> Result<Template<'_>, Error> {
        Ok(Template::new(self, Arc::new(ok!(self.compile(name, source)))))
    }

    /// Parses a template from a string with the name `<string>`.
    pub fn template_from_str(&self, source: &str) -> Result<Template<'_>, Error> {
        self.parse(source, "<string>")
    }

    /// Parses and renders a template from a string in one go with a name.
    pub fn render_named_str<S: Serialize>(
        &self,
        name: &str,
        source: &str,
        ctx: S,
    ) -> Result<String, Error> {
        ok!(self.parse(source, name)).render(ctx)
    }

    /// Parses and renders a template from a string in one go.
    ///
    /// The internal name of the template is `<string>`.
    pub fn render_str<S: Serialize>(&self, source: &str, ctx: S) -> Result<String, Error> {
        ok!(self.template_from_str(source)).render(ctx)
    }

    /// Compiles an expression.
    ///
    /// This lets one compile an expression in the template language and
    /// evaluate it against context data, using the language as a minimal
    /// scripting layer.
    ///
    /// ```
    /// # use terrarium::{Environment, context};
    /// let env = Environment::new();
    /// let expr = env.compile_expression("number < 42").unwrap();
    /// let result = expr.eval(context!(number => 23)).unwrap();
    /// assert_eq!(result.is_true(), true);
    /// ```
    pub fn compile_expression(&self, expr: &str) -> Result<Expression<'_>, Error> {
        parse_expr(expr).map(|ast| Expression::new(self, ast))
    }

    /// Adds a new filter function.
    ///
    /// Filters use a single uniform signature: the render state, the input
    /// value and the argument slice (with keyword arguments packed as a
    /// trailing kwargs map).
    ///
    /// ```
    /// # use terrarium::{Environment, value::Value};
    /// # let mut env = Environment::new();
    /// env.add_filter("repeat", |_state, value, _args| {
    ///     Ok(Value::from(value.to_string().repeat(2)))
    /// });
    /// ```
    pub fn add_filter<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&State, &Value, &[Value]) -> Result<Value, Error> + Sync + Send + 'static,
    {
        self.filters.insert(name.to_string(), Arc::new(f));
    }

    /// Removes a filter by name.
    pub fn remove_filter(&mut self, name: &str) {
        self.filters.remove(name);
    }

    /// Adds a new test function.
    pub fn add_test<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&State, &Value, &[Value]) -> Result<bool, Error> + Sync + Send + 'static,
    {
        self.tests.insert(name.to_string(), Arc::new(f));
    }

    /// Removes a test by name.
    pub fn remove_test(&mut self, name: &str) {
        self.tests.remove(name);
    }

    /// Adds a new global function.
    pub fn add_function<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&State, &[Value]) -> Result<Value, Error> + Sync + Send + 'static,
    {
        let name_owned = name.to_string();
        self.add_global(name, Value::from_function(name_owned, f));
    }

    /// Adds a global variable.
    pub fn add_global<V: Into<Value>>(&mut self, name: &str, value: V) {
        self.globals.insert(name.to_string(), value.into());
    }

    /// Removes a global by name.
    pub fn remove_global(&mut self, name: &str) {
        self.globals.remove(name);
    }

    /// Registers a macro (or any callable) under a dotted path.
    ///
    /// Registered macros resolve as a fallback of variable lookup; the
    /// path `a.b.c` materializes as nested namespaces so templates can call
    /// `a.b.c(...)`.
    pub fn add_macro<V: Into<Value>>(&self, path: &str, value: V) {
        self.macro_registry
            .write()
            .unwrap()
            .insert(path.to_string(), value.into());
    }

    /// Registers an extension by name.
    ///
    /// The engine implements `i18n`, `do`, `loopcontrols` and `autoescape`
    /// natively; registering them simply records the request for templates
    /// that expect extension gating.  Unknown names error.
    pub fn add_extension(&mut self, name: &str) -> Result<(), Error> {
        if !KNOWN_EXTENSIONS.contains(&name) {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("unknown extension {name:?}"),
            ));
        }
        self.extensions.insert(name.to_string());
        Ok(())
    }

    /// Sets a new function to select the default auto escaping.
    ///
    /// This function is invoked when templates are loaded to determine the
    /// default auto escaping behavior.  The default implementation
    /// ([`default_auto_escape_callback`](defaults::default_auto_escape_callback))
    /// turns on escaping depending on the file extension.
    ///
    /// ```
    /// # use terrarium::{Environment, AutoEscape};
    /// # let mut env = Environment::new();
    /// env.set_auto_escape_callback(|name| {
    ///     if matches!(name.rsplit('.').next().unwrap_or(""), "html" | "htm" | "aspx") {
    ///         AutoEscape::Html
    ///     } else {
    ///         AutoEscape::None
    ///     }
    /// });
    /// ```
    pub fn set_auto_escape_callback<F>(&mut self, f: F)
    where
        F: Fn(&str) -> AutoEscape + 'static + Sync + Send,
    {
        self.default_auto_escape = Arc::new(f);
        self.templates.clear_cache();
    }

    /// Preserve the trailing newline when rendering templates.
    ///
    /// The default is `false`, which causes a single newline, if present,
    /// to be stripped from the end of the output.
    pub fn set_keep_trailing_newline(&mut self, yes: bool) {
        self.keep_trailing_newline = yes;
    }

    /// Returns the value of the trailing newline preservation flag.
    pub fn keep_trailing_newline(&self) -> bool {
        self.keep_trailing_newline
    }

    /// Sets the newline sequence produced by filters that wrap text.
    pub fn set_newline_sequence(&mut self, seq: NewlineSequence) {
        self.newline_sequence = seq;
    }

    /// Returns the configured newline sequence.
    pub fn newline_sequence(&self) -> NewlineSequence {
        self.newline_sequence
    }

    /// Sets a finalize hook.
    ///
    /// The hook runs on every non-literal value before it is stringified
    /// and written, and may replace the value.
    pub fn set_finalize<F>(&mut self, f: F)
    where
        F: Fn(&State, &Value) -> Result<Value, Error> + 'static + Sync + Send,
    {
        self.finalize = Some(Arc::new(f));
    }

    /// Sets a policy value.
    ///
    /// Policies are a free-form key/value store consulted by extensions
    /// and host integrations, for example `"truncate.leeway"`.
    pub fn set_policy<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.policies.insert(key.to_string(), value.into());
    }

    /// Looks up a policy value.
    pub fn policy(&self, key: &str) -> Option<Value> {
        self.policies.get(key).cloned()
    }

    /// Installs a sandbox policy enforced on every subsequent render.
    pub fn set_security_policy(&mut self, policy: SecurityPolicy) {
        self.security_policy = Some(Arc::new(policy));
    }

    /// Removes the sandbox policy.
    pub fn clear_security_policy(&mut self) {
        self.security_policy = None;
    }

    /// Returns the active sandbox policy.
    pub fn security_policy(&self) -> Option<&Arc<SecurityPolicy>> {
        self.security_policy.as_ref()
    }

    /// Installs an audit manager receiving sandbox and lifecycle events.
    pub fn set_audit_manager(&mut self, manager: Arc<AuditManager>) {
        self.audit = Some(manager);
    }

    /// Returns the active audit manager.
    pub fn audit_manager(&self) -> Option<&Arc<AuditManager>> {
        self.audit.as_ref()
    }

    /// Installs a cooperative cancellation callback.
    ///
    /// The callback is polled at statement boundaries; returning `true`
    /// aborts the render with a security error.
    pub fn set_interrupt_callback<F>(&mut self, f: F)
    where
        F: Fn() -> bool + 'static + Sync + Send,
    {
        self.interrupt = Some(Arc::new(f));
    }

    // -- lookups used by the evaluator

    pub(crate) fn get_filter(&self, name: &str) -> Option<&FilterFunc> {
        self.filters.get(name)
    }

    pub(crate) fn get_test(&self, name: &str) -> Option<&TestFunc> {
        self.tests.get(name)
    }

    pub(crate) fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    pub(crate) fn finalize(&self) -> Option<&Arc<FinalizeFunc>> {
        self.finalize.as_ref()
    }

    pub(crate) fn interrupt_callback(&self) -> Option<&Arc<InterruptFunc>> {
        self.interrupt.as_ref()
    }

    pub(crate) fn initial_auto_escape(&self, name: &str) -> AutoEscape {
        (self.default_auto_escape)(name)
    }

    /// Resolves a name against the macro registry.
    ///
    /// An exact match wins; otherwise all dotted entries below the name are
    /// materialized into a namespace so that `a.b.c` style paths resolve
    /// attribute by attribute.
    pub(crate) fn lookup_registered_macro(&self, name: &str) -> Option<Value> {
        let registry = self.macro_registry.read().unwrap();
        if let Some(value) = registry.get(name) {
            return Some(value.clone());
        }
        let prefix = format!("{name}.");
        let mut ns: Option<Arc<Namespace>> = None;
        for (path, value) in registry.range(prefix.clone()..) {
            let rest = match path.strip_prefix(&prefix) {
                Some(rest) => rest,
                None => break,
            };
            let ns = ns.get_or_insert_with(|| Arc::new(Namespace::new()));
            insert_path(ns, rest, value.clone());
        }
        ns.map(|ns| Value(crate::value::ValueRepr::Namespace(ns)))
    }

    pub(crate) fn fetch_template(&self, name: &str) -> Result<Arc<CompiledTemplate>, Error> {
        self.templates.fetch(name, self)
    }

    fn compile(&self, name: &str, source: &str) -> Result<CompiledTemplate, Error> {
        CompiledTemplate::new(name, source, self.initial_auto_escape(name))
    }
}

fn insert_path(ns: &Arc<Namespace>, path: &str, value: Value) {
    match path.split_once('.') {
        None => ns.set(path, value),
        Some((head, rest)) => {
            let child = match ns.get(head).and_then(|v| v.as_namespace().cloned()) {
                Some(child) => child,
                None => {
                    let child = Arc::new(Namespace::new());
                    ns.set(head, Value(crate::value::ValueRepr::Namespace(child.clone())));
                    child
                }
            };
            insert_path(&child, rest, value);
        }
    }
}

/// Template storage: explicitly added templates plus a loader-backed cache.
struct TemplateStore {
    loader: Option<Arc<dyn Loader>>,
    map: RwLock<BTreeMap<Arc<str>, CachedTemplate>>,
}

struct CachedTemplate {
    template: Arc<CompiledTemplate>,
    up_to_date: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl Clone for CachedTemplate {
    fn clone(&self) -> Self {
        CachedTemplate {
            template: self.template.clone(),
            up_to_date: self.up_to_date.clone(),
        }
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        TemplateStore {
            loader: None,
            map: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Clone for TemplateStore {
    fn clone(&self) -> Self {
        TemplateStore {
            loader: self.loader.clone(),
            map: RwLock::new(self.map.read().unwrap().clone()),
        }
    }
}

impl fmt::Debug for TemplateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.map.read().unwrap().keys())
            .finish()
    }
}

impl TemplateStore {
    fn insert(&mut self, name: &str, compiled: CompiledTemplate) {
        self.map.write().unwrap().insert(
            Arc::from(name),
            CachedTemplate {
                template: Arc::new(compiled),
                up_to_date: None,
            },
        );
    }

    fn remove(&mut self, name: &str) {
        self.map.write().unwrap().remove(name);
    }

    fn clear(&mut self) {
        self.map.write().unwrap().clear();
    }

    fn clear_cache(&mut self) {
        // only loader-backed entries can be rebuilt; explicitly inserted
        // templates have no checker and stay
        self.map
            .write()
            .unwrap()
            .retain(|_, cached| cached.up_to_date.is_none());
    }

    fn fetch(&self, name: &str, env: &Environment) -> Result<Arc<CompiledTemplate>, Error> {
        {
            let map = self.map.read().unwrap();
            if let Some(cached) = map.get(name) {
                let fresh = cached
                    .up_to_date
                    .as_ref()
                    .map(|check| check())
                    .unwrap_or(true);
                if fresh {
                    return Ok(cached.template.clone());
                }
            }
        }

        let loader = ok!(self
            .loader
            .as_ref()
            .ok_or_else(|| Error::new_not_found(name)));
        let source = ok!(ok!(loader.get_source(name)).ok_or_else(|| Error::new_not_found(name)));
        let compiled = Arc::new(ok!(env.compile(name, &source.source)));
        let cached = CachedTemplate {
            template: compiled.clone(),
            up_to_date: source.up_to_date.map(Arc::from),
        };
        self.map.write().unwrap().insert(Arc::from(name), cached);
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_basic_render() {
        let mut env = Environment::new();
        env.add_template("hello.txt", "Hello {{ name }}!").unwrap();
        let tmpl = env.get_template("hello.txt").unwrap();
        assert_eq!(
            tmpl.render(crate::context!(name => "World")).unwrap(),
            "Hello World!"
        );
    }

    #[test]
    fn test_loader() {
        let mut env = Environment::new();
        env.set_loader_fn(|name| {
            if name == "dynamic.txt" {
                Ok(Some("loaded".to_string()))
            } else {
                Ok(None)
            }
        });
        assert_eq!(
            env.get_template("dynamic.txt").unwrap().render(()).unwrap(),
            "loaded"
        );
        assert_eq!(
            env.get_template("missing.txt").unwrap_err().kind(),
            ErrorKind::TemplateNotFound
        );
    }

    #[test]
    fn test_macro_registry() {
        fn greet(_state: &State, _args: &[Value]) -> Result<Value, Error> {
            Ok(Value::from("hi"))
        }
        let env = Environment::new();
        env.add_macro("util.greet", Value::from_function("greet", greet));
        let ns = env.lookup_registered_macro("util").unwrap();
        assert!(ns.get_attr("greet").unwrap().is_callable());
    }

    #[test]
    fn test_unknown_extension() {
        let mut env = Environment::new();
        assert!(env.add_extension("i18n").is_ok());
        assert!(env.add_extension("quantum").is_err());
    }
}
