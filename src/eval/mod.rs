//! The tree-walking evaluator.
//!
//! The engine executes the parsed AST directly: statements write their
//! effects through an [`Output`], expressions compute [`Value`]s.  Break and
//! continue travel as control signals returned from statement execution and
//! are captured by the nearest enclosing loop.  The evaluator consults the
//! scope stack for variable lookups, the environment for filters and tests,
//! and the sandbox context before every dispatch.

pub(crate) mod context;
pub(crate) mod loop_object;
pub(crate) mod macro_object;

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use crate::audit::{AuditEvent, AuditEventKind, AuditLevel};
use crate::environment::Environment;
use crate::error::{Error, ErrorKind};
use crate::eval::context::{Context, Frame};
use crate::eval::loop_object::{Loop, LoopState, RecursiveCtx};
use crate::eval::macro_object::MacroData;
use crate::output::Output;
use crate::sandbox::SecurityContext;
use crate::syntax::ast::{self, Spanned};
use crate::template::CompiledTemplate;
use crate::utils::{write_escaped, AutoEscape, HtmlEscape};
use crate::value::{
    ops, Key, MapType, Namespace, Value, ValueMap, ValueRepr,
};

/// A control-flow signal produced by statement execution.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ControlFlow {
    Normal,
    Break,
    Continue,
}

/// One level of an inheritance block stack.
///
/// Layers are ordered most-derived first; `depth` tracks how far `super()`
/// has descended.
pub(crate) struct BlockStack {
    layers: Vec<Spanned<ast::Block>>,
    depth: usize,
}

impl BlockStack {
    fn new() -> BlockStack {
        BlockStack {
            layers: Vec::new(),
            depth: 0,
        }
    }
}

/// The state of one render.
///
/// A state is never shared across concurrent renders.  Filters, tests and
/// functions receive a shared reference to it to access the environment,
/// the active auto escape mode and the sandbox.
pub struct State<'env> {
    env: &'env Environment,
    pub(crate) ctx: Context,
    pub(crate) auto_escape: AutoEscape,
    pub(crate) name: Arc<str>,
    pub(crate) current_block: Option<String>,
    pub(crate) blocks: BTreeMap<String, BlockStack>,
    pub(crate) security: Option<Rc<SecurityContext>>,
}

impl<'env> State<'env> {
    pub(crate) fn new(
        env: &'env Environment,
        base: Value,
        name: Arc<str>,
        auto_escape: AutoEscape,
        security: Option<Rc<SecurityContext>>,
    ) -> State<'env> {
        State {
            env,
            ctx: Context::new(base),
            auto_escape,
            name,
            current_block: None,
            blocks: BTreeMap::new(),
            security,
        }
    }

    /// Returns the environment of the state.
    pub fn env(&self) -> &'env Environment {
        self.env
    }

    /// Returns the name of the current template.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current auto escape mode.
    pub fn auto_escape(&self) -> AutoEscape {
        self.auto_escape
    }

    /// Returns the name of the innermost block being rendered, if any.
    pub fn current_block(&self) -> Option<&str> {
        self.current_block.as_deref()
    }

    /// Looks up a variable, falling back to globals and registered macros.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.ctx
            .load(name)
            .or_else(|| self.env.get_global(name))
            .or_else(|| self.env.lookup_registered_macro(name))
    }

    /// Applies a named filter to a value.
    ///
    /// This is also the dispatch point used by filters such as `map` that
    /// invoke other filters.
    pub fn apply_filter(&self, name: &str, value: &Value, args: &[Value]) -> Result<Value, Error> {
        let filter = ok!(self.env.get_filter(name).ok_or_else(|| Error::new(
            ErrorKind::UnknownFilter,
            format!("filter {name} is unknown"),
        )));
        if let Some(ref sec) = self.security {
            ok!(sec.check_deadline());
            ok!(sec.check_filter(name));
        }
        filter(self, value, args).map_err(|err| {
            if err.kind().is_security() {
                err
            } else {
                let detail = err.detail().unwrap_or("invocation failed").to_string();
                Error::new(ErrorKind::FilterError, format!("Filter '{name}': {detail}"))
                    .with_source(err)
            }
        })
    }

    /// Performs a named test against a value.
    pub fn perform_test(&self, name: &str, value: &Value, args: &[Value]) -> Result<bool, Error> {
        let test = ok!(self.env.get_test(name).ok_or_else(|| Error::new(
            ErrorKind::UnknownTest,
            format!("test {name} is unknown"),
        )));
        if let Some(ref sec) = self.security {
            ok!(sec.check_deadline());
            ok!(sec.check_test(name));
        }
        test(self, value, args).map_err(|err| {
            if err.kind().is_security() {
                err
            } else {
                let detail = err.detail().unwrap_or("invocation failed").to_string();
                Error::new(ErrorKind::TestError, format!("Test '{name}': {detail}"))
                    .with_source(err)
            }
        })
    }

    /// The sandbox context bound to this render, if any.
    pub(crate) fn security(&self) -> Option<&Rc<SecurityContext>> {
        self.security.as_ref()
    }
}

fn undefined_value_error(value: &Value, what: &str) -> Error {
    match value.undefined_name() {
        Some(name) => Error::new(
            ErrorKind::UndefinedError,
            format!("{name:?} is undefined while {what}"),
        ),
        None => Error::new(ErrorKind::UndefinedError, format!("value is undefined while {what}")),
    }
}

fn control_leak_error() -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        "break or continue used outside of a loop",
    )
}

/// Renders a template (with its inheritance chain) into an output.
pub(crate) fn render_main(
    env: &Environment,
    compiled: Arc<CompiledTemplate>,
    root: Value,
    out: &mut Output,
) -> Result<(), Error> {
    let security = env.security_policy().map(|policy| {
        Rc::new(SecurityContext::new(
            policy.clone(),
            env.audit_manager().cloned(),
            &compiled.name,
        ))
    });
    let start = Instant::now();
    if let Some(audit) = env.audit_manager() {
        audit.record(
            AuditEvent::new(
                AuditLevel::Info,
                AuditEventKind::ExecutionStart,
                format!("render of {:?} started", &compiled.name[..]),
            )
            .with_template(&compiled.name),
        );
    }
    let rv = render_main_inner(env, compiled.clone(), root, out, security);
    if let Some(audit) = env.audit_manager() {
        let mut event = AuditEvent::new(
            AuditLevel::Info,
            AuditEventKind::ExecutionEnd,
            format!("render of {:?} finished", &compiled.name[..]),
        )
        .with_template(&compiled.name)
        .with_duration(start.elapsed());
        if let Err(ref err) = rv {
            event = event.with_error(&err.to_string());
        }
        audit.record(event);
    }
    rv
}

fn render_main_inner(
    env: &Environment,
    compiled: Arc<CompiledTemplate>,
    root: Value,
    out: &mut Output,
    security: Option<Rc<SecurityContext>>,
) -> Result<(), Error> {
    if let Some(ref sec) = security {
        ok!(sec.check_template(&compiled.name));
        if sec.policy().validate_all_inputs() {
            ok!(sec.check_input(&compiled.source, "template"));
            if let Some(items) = root.map_items() {
                for (_, value) in items {
                    if let Some(s) = value.as_str() {
                        ok!(sec.check_input(s, "variable"));
                    }
                }
            }
        }
    }

    let mut auto_escape = compiled.initial_auto_escape;
    if let Some(ref sec) = security {
        if sec.policy().escape_output() && auto_escape == AutoEscape::None {
            auto_escape = AutoEscape::Html;
        }
    }

    let mut state = State::new(env, root, compiled.name.clone(), auto_escape, security);
    let vm = Vm { env };
    let chain = ok!(vm.resolve_chain(compiled, &mut state));
    install_blocks(&chain, &mut state);
    let base = chain.last().unwrap().clone();
    match ok!(vm.eval_stmts(&base.root, &mut state, out)) {
        ControlFlow::Normal => Ok(()),
        _ => Err(control_leak_error()),
    }
}

fn install_blocks(chain: &[Arc<CompiledTemplate>], state: &mut State) {
    for tmpl in chain {
        for (name, block) in &tmpl.blocks {
            state
                .blocks
                .entry(name.clone())
                .or_insert_with(BlockStack::new)
                .layers
                .push(block.clone());
        }
    }
}

/// Calls a macro body with bound arguments, capturing its output.
pub(crate) fn call_macro(
    state: &State,
    data: &MacroData,
    bindings: Vec<(String, Value)>,
    caller: Option<Value>,
) -> Result<Value, Error> {
    let env = state.env;
    if let Some(sec) = state.security() {
        ok!(sec.enter_recursion());
    }
    let base = Value(ValueRepr::Namespace(data.closure.clone()));
    let mut inner = State::new(
        env,
        base,
        data.template_name.clone(),
        data.auto_escape,
        state.security.clone(),
    );
    for (key, value) in bindings {
        inner.ctx.store(&key, value);
    }
    if let Some(caller) = caller {
        inner.ctx.store("caller", caller);
    }
    let mut buf = String::new();
    let rv = {
        let mut out = Output::with_string(&mut buf);
        Vm { env }.eval_stmts(&data.body, &mut inner, &mut out)
    };
    if let Some(sec) = state.security() {
        sec.leave_recursion();
    }
    match ok!(rv) {
        ControlFlow::Normal => {}
        _ => return Err(control_leak_error()),
    }
    if let Some(sec) = state.security() {
        ok!(sec.track_memory(buf.len()));
    }
    Ok(Value::from_safe_string(buf))
}

/// Evaluates an expression against a macro closure.  Used for default
/// argument expressions which evaluate at invocation time in the macro's
/// defining environment.
pub(crate) fn eval_in_closure(
    state: &State,
    closure: &Arc<Namespace>,
    template_name: &Arc<str>,
    expr: &ast::Expr,
) -> Result<Value, Error> {
    let env = state.env;
    let base = Value(ValueRepr::Namespace(closure.clone()));
    let mut inner = State::new(
        env,
        base,
        template_name.clone(),
        state.auto_escape,
        state.security.clone(),
    );
    Vm { env }.eval_expr(expr, &mut inner)
}

/// Re-enters a recursive loop body with a new iterable.
pub(crate) fn recurse_loop(
    state: &State,
    rctx: &RecursiveCtx,
    depth: usize,
    iterable: &Value,
) -> Result<Value, Error> {
    let env = state.env;
    if iterable.is_undefined() {
        return Err(undefined_value_error(iterable, "iterating"));
    }
    let items = ok!(iterable.try_to_vec());
    let base = Value(ValueRepr::Map(
        Arc::new(rctx.closure_vars.clone()),
        MapType::Normal,
    ));
    let mut inner = State::new(
        env,
        base,
        rctx.template_name.clone(),
        rctx.auto_escape,
        state.security.clone(),
    );
    let mut buf = String::new();
    let rv = {
        let mut out = Output::with_string(&mut buf);
        Vm { env }.execute_loop(
            &mut inner,
            &mut out,
            &rctx.target,
            &rctx.body,
            &[],
            items,
            depth,
            Some(rctx.clone()),
        )
    };
    ok!(rv);
    if let Some(sec) = state.security() {
        ok!(sec.track_memory(buf.len()));
    }
    Ok(Value::from_safe_string(buf))
}

/// Evaluates a standalone expression against a root context.
pub(crate) fn eval_expression(
    env: &Environment,
    expr: &ast::Expr,
    root: Value,
) -> Result<Value, Error> {
    let security = env.security_policy().map(|policy| {
        Rc::new(SecurityContext::new(
            policy.clone(),
            env.audit_manager().cloned(),
            "<expression>",
        ))
    });
    let mut state = State::new(
        env,
        root,
        Arc::from("<expression>"),
        AutoEscape::None,
        security,
    );
    Vm { env }.eval_expr(expr, &mut state)
}

pub(crate) struct Vm<'env> {
    pub(crate) env: &'env Environment,
}

impl<'env> Vm<'env> {
    /// Resolves the extends chain of a template, most derived first.
    fn resolve_chain(
        &self,
        compiled: Arc<CompiledTemplate>,
        state: &mut State<'env>,
    ) -> Result<Vec<Arc<CompiledTemplate>>, Error> {
        let mut chain = vec![compiled];
        loop {
            let cur = chain.last().unwrap().clone();
            let extends = match cur.extends {
                Some(ref expr) => expr.clone(),
                None => break,
            };
            let name_val = ok!(self.eval_expr(&extends, state));
            let name = ok!(name_val.as_str().ok_or_else(|| Error::new(
                ErrorKind::InvalidOperation,
                "template name of extends must be a string",
            )));
            if chain.iter().any(|t| &*t.name == name) {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    format!("cycle in template inheritance involving {name:?}"),
                ));
            }
            if let Some(sec) = state.security() {
                ok!(sec.check_template(name));
            }
            chain.push(ok!(self.env.fetch_template(name)));
        }
        Ok(chain)
    }

    /// Per-statement sandbox checkpoint.
    fn checkpoint(&self, state: &State, out: &Output) -> Result<(), Error> {
        if let Some(interrupt) = self.env.interrupt_callback() {
            if interrupt() {
                return Err(Error::new(ErrorKind::SecurityError, "render was cancelled"));
            }
        }
        if let Some(sec) = state.security() {
            ok!(sec.check_deadline());
            ok!(sec.check_output(out.bytes_written()));
        }
        Ok(())
    }

    pub(crate) fn eval_stmts(
        &self,
        stmts: &[ast::Stmt],
        state: &mut State<'env>,
        out: &mut Output,
    ) -> Result<ControlFlow, Error> {
        for stmt in stmts {
            match ok!(self.eval_stmt(stmt, state, out)) {
                ControlFlow::Normal => {}
                signal => return Ok(signal),
            }
        }
        Ok(ControlFlow::Normal)
    }

    fn eval_stmt(
        &self,
        stmt: &ast::Stmt,
        state: &mut State<'env>,
        out: &mut Output,
    ) -> Result<ControlFlow, Error> {
        ok!(self.checkpoint(state, out));
        self.eval_stmt_inner(stmt, state, out).map_err(|mut err| {
            err.if_unset_set_filename_and_span(&state.name.clone(), stmt.span());
            err
        })
    }

    fn eval_stmt_inner(
        &self,
        stmt: &ast::Stmt,
        state: &mut State<'env>,
        out: &mut Output,
    ) -> Result<ControlFlow, Error> {
        match stmt {
            ast::Stmt::Template(node) => self.eval_stmts(&node.children, state, out),
            ast::Stmt::EmitRaw(node) => {
                ok!(out.write_str(&node.raw).map_err(Error::from));
                Ok(ControlFlow::Normal)
            }
            ast::Stmt::EmitExpr(node) => {
                ok!(self.emit_expr(&node.expr, state, out));
                Ok(ControlFlow::Normal)
            }
            ast::Stmt::ForLoop(node) => self.eval_for_loop(node, state, out),
            ast::Stmt::IfCond(node) => {
                let test = ok!(self.eval_expr(&node.expr, state));
                if test.is_true() {
                    self.eval_stmts(&node.true_body, state, out)
                } else {
                    self.eval_stmts(&node.false_body, state, out)
                }
            }
            ast::Stmt::WithBlock(node) => {
                ok!(state.ctx.push_frame(Frame::default()));
                let rv = (|| -> Result<ControlFlow, Error> {
                    for (target, expr) in &node.assignments {
                        let value = ok!(self.eval_expr(expr, state));
                        ok!(self.assign_target(target, value, state));
                    }
                    self.eval_stmts(&node.body, state, out)
                })();
                state.ctx.pop_frame();
                rv
            }
            ast::Stmt::Set(node) => {
                let value = ok!(self.eval_expr(&node.expr, state));
                ok!(self.assign_target(&node.target, value, state));
                Ok(ControlFlow::Normal)
            }
            ast::Stmt::SetBlock(node) => {
                out.begin_capture();
                let rv = self.eval_stmts(&node.body, state, out);
                let captured = out.end_capture(state.auto_escape);
                let signal = ok!(rv);
                let value = match node.filter {
                    Some(ref chain) => ok!(self.apply_filter_chain(chain, captured, state)),
                    None => captured,
                };
                ok!(self.assign_target(&node.target, value, state));
                Ok(signal)
            }
            ast::Stmt::AutoEscape(node) => {
                let enabled = ok!(self.eval_expr(&node.enabled, state));
                let old = state.auto_escape;
                state.auto_escape = ok!(derive_auto_escape(&enabled));
                let rv = self.eval_stmts(&node.body, state, out);
                state.auto_escape = old;
                rv
            }
            ast::Stmt::FilterBlock(node) => {
                out.begin_capture();
                let rv = self.eval_stmts(&node.body, state, out);
                let captured = out.end_capture(state.auto_escape);
                let signal = ok!(rv);
                let value = ok!(self.apply_filter_chain(&node.filter, captured, state));
                ok!(write_escaped(out, state.auto_escape, &value));
                Ok(signal)
            }
            ast::Stmt::Spaceless(node) => {
                out.begin_capture();
                let rv = self.eval_stmts(&node.body, state, out);
                let captured = out.end_capture_str();
                let signal = ok!(rv);
                ok!(out
                    .write_str(&collapse_spaceless(&captured))
                    .map_err(Error::from));
                Ok(signal)
            }
            ast::Stmt::Block(node) => {
                if !state.blocks.contains_key(&node.name) {
                    // a block rendered outside of any inheritance context
                    state.blocks.insert(
                        node.name.clone(),
                        BlockStack {
                            layers: vec![node.clone()],
                            depth: 0,
                        },
                    );
                }
                ok!(self.render_block(&node.name, state, out));
                Ok(ControlFlow::Normal)
            }
            // the extends chain is resolved before rendering starts
            ast::Stmt::Extends(_) => Ok(ControlFlow::Normal),
            ast::Stmt::Include(node) => {
                ok!(self.perform_include(node, state, out));
                Ok(ControlFlow::Normal)
            }
            ast::Stmt::Import(node) => {
                let module = ok!(self.load_module(&node.expr, state, node.with_context));
                state.ctx.store(&node.name, module);
                Ok(ControlFlow::Normal)
            }
            ast::Stmt::FromImport(node) => {
                let module = ok!(self.load_module(&node.expr, state, node.with_context));
                let ns = module.as_namespace().unwrap().clone();
                for (name, alias) in &node.names {
                    let value = ok!(ns.get(name).ok_or_else(|| Error::new(
                        ErrorKind::ImportError,
                        format!("imported template does not export {name:?}"),
                    )));
                    state.ctx.store(alias.as_deref().unwrap_or(name), value);
                }
                Ok(ControlFlow::Normal)
            }
            ast::Stmt::Macro(node) => {
                let value = self.declare_macro(node, state);
                state.ctx.store(&node.name, value);
                Ok(ControlFlow::Normal)
            }
            ast::Stmt::CallBlock(node) => {
                let closure = state.ctx.closure();
                let caller = Value::from_object(MacroData {
                    name: "caller".to_string(),
                    args: node.macro_decl.args.clone(),
                    defaults: node.macro_decl.defaults.clone(),
                    varargs: node.macro_decl.varargs.clone(),
                    varkwargs: node.macro_decl.varkwargs.clone(),
                    body: node.macro_decl.body.clone(),
                    closure,
                    template_name: state.name.clone(),
                    auto_escape: state.auto_escape,
                    is_caller: true,
                });
                let rv = ok!(self.eval_call(&node.call, state, Some(("caller", caller))));
                ok!(write_escaped(out, state.auto_escape, &rv));
                Ok(ControlFlow::Normal)
            }
            ast::Stmt::Do(node) => {
                ok!(self.eval_expr(&node.expr, state));
                Ok(ControlFlow::Normal)
            }
            ast::Stmt::Break(_) => Ok(ControlFlow::Break),
            ast::Stmt::Continue(_) => Ok(ControlFlow::Continue),
            ast::Stmt::Trans(node) => {
                ok!(self.perform_trans(node, state, out));
                Ok(ControlFlow::Normal)
            }
        }
    }

    fn emit_expr(
        &self,
        expr: &ast::Expr,
        state: &mut State<'env>,
        out: &mut Output,
    ) -> Result<(), Error> {
        let value = ok!(self.eval_expr(expr, state));
        if value.is_undefined() {
            return Err(undefined_value_error(&value, "printing"));
        }
        let value = match self.env.finalize() {
            Some(finalize) => ok!(finalize(state, &value)),
            None => value,
        };
        write_escaped(out, state.auto_escape, &value)
    }

    fn eval_for_loop(
        &self,
        node: &Spanned<ast::ForLoop>,
        state: &mut State<'env>,
        out: &mut Output,
    ) -> Result<ControlFlow, Error> {
        let iterable = ok!(self.eval_expr(&node.iter, state));
        if iterable.is_undefined() {
            return Err(undefined_value_error(&iterable, "iterating"));
        }
        let mut items = ok!(iterable.try_to_vec());
        if let Some(sec) = state.security() {
            ok!(sec.track_memory(items.len() * std::mem::size_of::<Value>()));
        }

        if let Some(ref filter) = node.filter_expr {
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                ok!(state.ctx.push_frame(Frame::default()));
                let rv = self
                    .assign_target(&node.target, item.clone(), state)
                    .and_then(|_| self.eval_expr(filter, state));
                state.ctx.pop_frame();
                if ok!(rv).is_true() {
                    kept.push(item);
                }
            }
            items = kept;
        }

        let recursive_ctx = if node.recursive {
            Some(RecursiveCtx {
                target: node.target.clone(),
                body: node.body.clone(),
                closure_vars: state.ctx.flatten(),
                template_name: state.name.clone(),
                auto_escape: state.auto_escape,
            })
        } else {
            None
        };

        self.execute_loop(
            state,
            out,
            &node.target,
            &node.body,
            &node.else_body,
            items,
            0,
            recursive_ctx,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn execute_loop(
        &self,
        state: &mut State<'env>,
        out: &mut Output,
        target: &ast::Expr,
        body: &[ast::Stmt],
        else_body: &[ast::Stmt],
        items: Vec<Value>,
        depth: usize,
        recursive_ctx: Option<RecursiveCtx>,
    ) -> Result<ControlFlow, Error> {
        let loop_obj = Arc::new(Loop::new(items.len(), depth, recursive_ctx));
        let mut frame = Frame::default();
        frame.current_loop = Some(LoopState {
            object: loop_obj.clone(),
        });
        ok!(state.ctx.push_frame(frame));
        if let Some(sec) = state.security.clone() {
            if let Err(err) = sec.enter_recursion() {
                sec.leave_recursion();
                state.ctx.pop_frame();
                return Err(err);
            }
        }

        let mut broke = false;
        let mut rv = Ok(ControlFlow::Normal);
        for (idx, item) in items.iter().enumerate() {
            let previtem = if idx == 0 {
                Value::UNDEFINED
            } else {
                items[idx - 1].clone()
            };
            let nextitem = items.get(idx + 1).cloned().unwrap_or(Value::UNDEFINED);
            loop_obj.set_iteration(idx, previtem, nextitem);
            if let Err(err) = self.assign_target(target, item.clone(), state) {
                rv = Err(err);
                break;
            }
            match self.eval_stmts(body, state, out) {
                Ok(ControlFlow::Normal) | Ok(ControlFlow::Continue) => {}
                Ok(ControlFlow::Break) => {
                    broke = true;
                    break;
                }
                Err(err) => {
                    rv = Err(err);
                    break;
                }
            }
        }

        // following Python semantics the else block runs whenever the loop
        // was not left through break, which includes the empty iterable; it
        // still sees the loop frame
        if rv.is_ok() && !broke {
            rv = self.eval_stmts(else_body, state, out);
        }

        if let Some(sec) = state.security() {
            sec.leave_recursion();
        }
        state.ctx.pop_frame();
        rv
    }

    fn declare_macro(&self, node: &Spanned<ast::Macro>, state: &mut State<'env>) -> Value {
        let closure = state.ctx.closure();
        Value::from_object(MacroData {
            name: node.name.clone(),
            args: node.args.clone(),
            defaults: node.defaults.clone(),
            varargs: node.varargs.clone(),
            varkwargs: node.varkwargs.clone(),
            body: node.body.clone(),
            closure,
            template_name: state.name.clone(),
            auto_escape: state.auto_escape,
            is_caller: false,
        })
    }

    fn render_block(
        &self,
        name: &str,
        state: &mut State<'env>,
        out: &mut Output,
    ) -> Result<(), Error> {
        let block = {
            let stack = ok!(state.blocks.get(name).ok_or_else(|| Error::new(
                ErrorKind::InvalidOperation,
                format!("block {name:?} is not defined"),
            )));
            stack.layers[stack.depth].clone()
        };
        let old_block = state.current_block.replace(name.to_string());
        // scoped blocks run in their own scope frame, assignments of
        // unscoped blocks are visible to the surrounding code
        if block.scoped {
            ok!(state.ctx.push_frame(Frame::default()));
        }
        let rv = self.eval_stmts(&block.body, state, out);
        if block.scoped {
            state.ctx.pop_frame();
        }
        state.current_block = old_block;
        match ok!(rv) {
            ControlFlow::Normal => Ok(()),
            _ => Err(control_leak_error()),
        }
    }

    fn perform_super(&self, state: &mut State<'env>, out: &mut Output) -> Result<Value, Error> {
        let name = ok!(state.current_block.clone().ok_or_else(|| Error::new(
            ErrorKind::InvalidOperation,
            "cannot call super() outside of a block",
        )));
        {
            let stack = state.blocks.get_mut(&name).unwrap();
            if stack.depth + 1 >= stack.layers.len() {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    format!("no parent block exists for {name:?}"),
                ));
            }
            stack.depth += 1;
        }
        out.begin_capture();
        let rv = self.render_block(&name, state, out);
        let captured = out.end_capture_str();
        if let Some(stack) = state.blocks.get_mut(&name) {
            stack.depth -= 1;
        }
        ok!(rv);
        Ok(Value::from_safe_string(captured))
    }

    fn perform_include(
        &self,
        node: &Spanned<ast::Include>,
        state: &mut State<'env>,
        out: &mut Output,
    ) -> Result<(), Error> {
        let name_val = ok!(self.eval_expr(&node.name, state));
        let choices: Vec<String> = match name_val.0 {
            ValueRepr::Seq(ref items) => items.iter().map(|x| x.to_string()).collect(),
            _ => vec![name_val.to_string()],
        };

        let mut tried = Vec::new();
        for name in &choices {
            if let Some(sec) = state.security() {
                ok!(sec.check_template(name));
            }
            match self.env.fetch_template(name) {
                Ok(tmpl) => {
                    return self.render_included(tmpl, state, out, node.with_context);
                }
                Err(err) if err.kind() == ErrorKind::TemplateNotFound => {
                    tried.push(name.clone());
                }
                Err(err) => return Err(err),
            }
        }

        if node.ignore_missing {
            Ok(())
        } else if tried.len() == 1 {
            Err(Error::new_not_found(&tried[0]))
        } else {
            Err(Error::new(
                ErrorKind::TemplatesNotFound,
                format!("none of the templates exist: {}", tried.join(", ")),
            ))
        }
    }

    fn render_included(
        &self,
        compiled: Arc<CompiledTemplate>,
        state: &mut State<'env>,
        out: &mut Output,
        with_context: bool,
    ) -> Result<(), Error> {
        let chain = ok!(self.resolve_chain(compiled.clone(), state));

        let old_name = std::mem::replace(&mut state.name, compiled.name.clone());
        let old_auto_escape =
            std::mem::replace(&mut state.auto_escape, compiled.initial_auto_escape);
        let old_blocks = std::mem::take(&mut state.blocks);
        let old_block = state.current_block.take();
        let old_ctx = if with_context {
            None
        } else {
            Some(std::mem::replace(
                &mut state.ctx,
                Context::new(Value::UNDEFINED),
            ))
        };
        if with_context {
            ok!(state.ctx.push_frame(Frame::default()));
        }

        install_blocks(&chain, state);
        let base = chain.last().unwrap().clone();
        let rv = self.eval_stmts(&base.root, state, out);

        if with_context {
            state.ctx.pop_frame();
        }
        if let Some(ctx) = old_ctx {
            state.ctx = ctx;
        }
        state.name = old_name;
        state.auto_escape = old_auto_escape;
        state.blocks = old_blocks;
        state.current_block = old_block;

        match ok!(rv) {
            ControlFlow::Normal => Ok(()),
            _ => Err(control_leak_error()),
        }
    }

    fn load_module(
        &self,
        expr: &ast::Expr,
        state: &mut State<'env>,
        with_context: bool,
    ) -> Result<Value, Error> {
        let name_val = ok!(self.eval_expr(expr, state));
        let name = ok!(name_val.as_str().ok_or_else(|| Error::new(
            ErrorKind::ImportError,
            "imported template name must be a string",
        )));
        if let Some(sec) = state.security() {
            ok!(sec.check_template(name));
        }
        let compiled = ok!(self.env.fetch_template(name).map_err(|err| {
            if err.kind() == ErrorKind::TemplateNotFound {
                Error::new(
                    ErrorKind::ImportError,
                    format!("could not import template {name:?}"),
                )
                .with_source(err)
            } else {
                err
            }
        }));

        let base = if with_context {
            Value(ValueRepr::Map(
                Arc::new(state.ctx.flatten()),
                MapType::Normal,
            ))
        } else {
            Value::UNDEFINED
        };
        let mut module_state = State::new(
            self.env,
            base,
            compiled.name.clone(),
            self.env.initial_auto_escape(&compiled.name),
            state.security.clone(),
        );
        let mut discard = String::new();
        {
            let mut module_out = Output::with_string(&mut discard);
            match ok!(self.eval_stmts(&compiled.root, &mut module_state, &mut module_out)) {
                ControlFlow::Normal => {}
                _ => return Err(control_leak_error()),
            }
        }

        let mut exports = ValueMap::new();
        for (key, value) in module_state.ctx.exports() {
            exports.insert(Key::from(key.as_str()), value.clone());
        }
        Ok(Value(ValueRepr::Namespace(Arc::new(Namespace::from_map(
            exports,
        )))))
    }

    fn perform_trans(
        &self,
        node: &Spanned<ast::Trans>,
        state: &mut State<'env>,
        out: &mut Output,
    ) -> Result<(), Error> {
        let mut vars = ValueMap::new();
        for (name, expr) in &node.assignments {
            let value = ok!(self.eval_expr(expr, state));
            vars.insert(Key::from(name.as_str()), value);
        }
        let var_value = |name: &str, state: &State| -> Value {
            vars.get(&Key::from(name))
                .cloned()
                .or_else(|| state.lookup(name))
                .unwrap_or(Value::UNDEFINED)
        };

        let msgid = trans_parts_to_string(&node.singular);
        let translated = match node.plural {
            Some(ref plural_parts) => {
                let count_name = node.count_name.as_deref().unwrap_or("count");
                let count_val = var_value(count_name, state);
                let count = count_val.try_to_i64().unwrap_or(1);
                let msgid_plural = trans_parts_to_string(plural_parts);
                match state.lookup("ngettext") {
                    Some(func) if func.is_callable() => {
                        let args = [
                            Value::from(msgid.as_str()),
                            Value::from(msgid_plural.as_str()),
                            Value::from(count),
                        ];
                        ok!(self.call_value(&func, state, &args)).to_string()
                    }
                    _ => {
                        if count == 1 {
                            msgid
                        } else {
                            msgid_plural
                        }
                    }
                }
            }
            None => match state.lookup("gettext") {
                Some(func) if func.is_callable() => {
                    let args = [Value::from(msgid.as_str())];
                    ok!(self.call_value(&func, state, &args)).to_string()
                }
                _ => msgid,
            },
        };

        // interpolate %(name)s placeholders
        let re = trans_placeholder_re();
        let mut rv = String::with_capacity(translated.len());
        let mut last = 0;
        for caps in re.captures_iter(&translated) {
            let whole = caps.get(0).unwrap();
            rv.push_str(&translated[last..whole.start()]);
            let value = var_value(&caps[1], state);
            if matches!(state.auto_escape, AutoEscape::Html) && !value.is_safe() {
                rv.push_str(&HtmlEscape(&value.to_string()).to_string());
            } else {
                rv.push_str(&value.to_string());
            }
            last = whole.end();
        }
        rv.push_str(&translated[last..]);
        out.write_str(&rv).map_err(Error::from)
    }

    fn assign_target(
        &self,
        target: &ast::Expr,
        value: Value,
        state: &mut State<'env>,
    ) -> Result<(), Error> {
        match target {
            ast::Expr::Var(var) => {
                state.ctx.store(&var.id, value);
                Ok(())
            }
            ast::Expr::GetAttr(attr) => {
                let base = ok!(self.eval_expr(&attr.expr, state));
                match base.as_namespace() {
                    Some(ns) => {
                        ns.set(&attr.name, value);
                        Ok(())
                    }
                    None => Err(Error::new(
                        ErrorKind::InvalidAssignment,
                        format!(
                            "can only assign attributes of namespaces, not {}",
                            base.kind()
                        ),
                    )),
                }
            }
            ast::Expr::List(list) => {
                let items = ok!(value.try_to_vec().map_err(|_| Error::new(
                    ErrorKind::InvalidAssignment,
                    "cannot unpack non-sequence value",
                )));
                if items.len() != list.items.len() {
                    return Err(Error::new(
                        ErrorKind::InvalidAssignment,
                        format!(
                            "cannot unpack {} value(s) into {} target(s)",
                            items.len(),
                            list.items.len()
                        ),
                    ));
                }
                for (target, item) in list.items.iter().zip(items) {
                    ok!(self.assign_target(target, item, state));
                }
                Ok(())
            }
            _ => Err(Error::new(
                ErrorKind::InvalidAssignment,
                "invalid assignment target",
            )),
        }
    }

    fn apply_filter_chain(
        &self,
        expr: &ast::Expr,
        input: Value,
        state: &mut State<'env>,
    ) -> Result<Value, Error> {
        match expr {
            ast::Expr::Filter(node) => {
                let inner = match node.expr {
                    Some(ref inner) => ok!(self.apply_filter_chain(inner, input, state)),
                    None => input,
                };
                let args = ok!(self.eval_call_args(&node.args, state, None));
                state.apply_filter(&node.name, &inner, &args)
            }
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                "expected a filter expression",
            )),
        }
    }

    pub(crate) fn eval_expr(
        &self,
        expr: &ast::Expr,
        state: &mut State<'env>,
    ) -> Result<Value, Error> {
        self.eval_expr_inner(expr, state).map_err(|mut err| {
            err.if_unset_set_filename_and_span(&state.name.clone(), expr.span());
            err
        })
    }

    fn eval_expr_inner(
        &self,
        expr: &ast::Expr,
        state: &mut State<'env>,
    ) -> Result<Value, Error> {
        match expr {
            ast::Expr::Var(node) => Ok(self.lookup_name(&node.id, state)),
            ast::Expr::Const(node) => Ok(node.value.clone()),
            ast::Expr::List(node) => {
                let mut items = Vec::with_capacity(node.items.len());
                for item in &node.items {
                    items.push(ok!(self.eval_expr(item, state)));
                }
                Ok(Value::from(items))
            }
            ast::Expr::Map(node) => {
                let mut rv = ValueMap::new();
                for (key_expr, value_expr) in node.keys.iter().zip(node.values.iter()) {
                    let key = ok!(Key::try_from(ok!(self.eval_expr(key_expr, state))));
                    let value = ok!(self.eval_expr(value_expr, state));
                    rv.insert(key, value);
                }
                Ok(Value(ValueRepr::Map(Arc::new(rv), MapType::Normal)))
            }
            ast::Expr::UnaryOp(node) => {
                let value = ok!(self.eval_expr(&node.expr, state));
                match node.op {
                    ast::UnaryOpKind::Not => Ok(Value::from(!value.is_true())),
                    ast::UnaryOpKind::Neg => {
                        if value.is_undefined() {
                            Err(undefined_value_error(&value, "negating"))
                        } else {
                            ops::neg(&value)
                        }
                    }
                }
            }
            ast::Expr::BinOp(node) => self.eval_bin_op(node, state),
            ast::Expr::Compare(node) => self.eval_compare(node, state),
            ast::Expr::IfExpr(node) => {
                let test = ok!(self.eval_expr(&node.test_expr, state));
                if test.is_true() {
                    self.eval_expr(&node.true_expr, state)
                } else {
                    match node.false_expr {
                        Some(ref false_expr) => self.eval_expr(false_expr, state),
                        None => Ok(Value::UNDEFINED),
                    }
                }
            }
            ast::Expr::GetAttr(node) => {
                let value = ok!(self.eval_expr(&node.expr, state));
                if value.is_undefined() {
                    return Err(undefined_value_error(
                        &value,
                        &format!("looking up attribute {:?}", node.name),
                    ));
                }
                if let Some(sec) = state.security() {
                    ok!(sec.check_deadline());
                    ok!(sec.check_attribute(&attribute_path(node)));
                }
                Ok(value
                    .get_attr(&node.name)
                    .unwrap_or_else(|| Value::undefined_named(&node.name)))
            }
            ast::Expr::GetItem(node) => {
                let value = ok!(self.eval_expr(&node.expr, state));
                let key = ok!(self.eval_expr(&node.subscript_expr, state));
                if value.is_undefined() {
                    return Err(undefined_value_error(&value, "looking up an item"));
                }
                Ok(value
                    .get_item(&key)
                    .unwrap_or_else(|| Value::undefined_named(&key.to_string())))
            }
            ast::Expr::Slice(node) => {
                let value = ok!(self.eval_expr(&node.expr, state));
                let start = ok!(self.eval_opt_expr(&node.start, state));
                let stop = ok!(self.eval_opt_expr(&node.stop, state));
                let step = ok!(self.eval_opt_expr(&node.step, state));
                ops::slice(value, start, stop, step)
            }
            ast::Expr::Filter(node) => {
                let input = match node.expr {
                    Some(ref input) => ok!(self.eval_expr(input, state)),
                    None => {
                        return Err(Error::new(
                            ErrorKind::InvalidOperation,
                            "filter is missing its input",
                        ))
                    }
                };
                let args = ok!(self.eval_call_args(&node.args, state, None));
                state.apply_filter(&node.name, &input, &args)
            }
            ast::Expr::Test(node) => {
                let input = ok!(self.eval_expr(&node.expr, state));
                let args = ok!(self.eval_call_args(&node.args, state, None));
                Ok(Value::from(ok!(state.perform_test(
                    &node.name, &input, &args
                ))))
            }
            ast::Expr::Call(node) => self.eval_call(node, state, None),
        }
    }

    fn eval_opt_expr(
        &self,
        expr: &Option<ast::Expr>,
        state: &mut State<'env>,
    ) -> Result<Value, Error> {
        match expr {
            Some(expr) => self.eval_expr(expr, state),
            None => Ok(Value::from(())),
        }
    }

    fn lookup_name(&self, name: &str, state: &State<'env>) -> Value {
        state
            .lookup(name)
            .unwrap_or_else(|| Value::undefined_named(name))
    }

    fn eval_bin_op(
        &self,
        node: &Spanned<ast::BinOp>,
        state: &mut State<'env>,
    ) -> Result<Value, Error> {
        match node.op {
            // short circuiting operators return the deciding operand
            ast::BinOpKind::ScAnd => {
                let left = ok!(self.eval_expr(&node.left, state));
                if !left.is_true() {
                    Ok(left)
                } else {
                    self.eval_expr(&node.right, state)
                }
            }
            ast::BinOpKind::ScOr => {
                let left = ok!(self.eval_expr(&node.left, state));
                if left.is_true() {
                    Ok(left)
                } else {
                    self.eval_expr(&node.right, state)
                }
            }
            _ => {
                let left = ok!(self.eval_expr(&node.left, state));
                let right = ok!(self.eval_expr(&node.right, state));
                match node.op {
                    ast::BinOpKind::Add => ops::add(&left, &right),
                    ast::BinOpKind::Sub => ops::sub(&left, &right),
                    ast::BinOpKind::Mul => ops::mul(&left, &right),
                    ast::BinOpKind::Div => ops::div(&left, &right),
                    ast::BinOpKind::FloorDiv => ops::int_div(&left, &right),
                    ast::BinOpKind::Rem => ops::rem(&left, &right),
                    ast::BinOpKind::Pow => ops::pow(&left, &right),
                    ast::BinOpKind::Concat => ops::string_concat(&left, &right),
                    ast::BinOpKind::ScAnd | ast::BinOpKind::ScOr => unreachable!(),
                }
            }
        }
    }

    fn eval_compare(
        &self,
        node: &Spanned<ast::Compare>,
        state: &mut State<'env>,
    ) -> Result<Value, Error> {
        let mut left = ok!(self.eval_expr(&node.expr, state));
        for (op, right_expr) in &node.ops {
            let right = ok!(self.eval_expr(right_expr, state));
            let holds = match op {
                ast::CompareOp::Eq => left == right,
                ast::CompareOp::Ne => left != right,
                ast::CompareOp::Lt | ast::CompareOp::Lte | ast::CompareOp::Gt
                | ast::CompareOp::Gte => {
                    let ordering = ok!(left.partial_cmp(&right).ok_or_else(|| Error::new(
                        ErrorKind::InvalidOperation,
                        format!("cannot compare {} with {}", left.kind(), right.kind()),
                    )));
                    match op {
                        ast::CompareOp::Lt => ordering.is_lt(),
                        ast::CompareOp::Lte => ordering.is_le(),
                        ast::CompareOp::Gt => ordering.is_gt(),
                        ast::CompareOp::Gte => ordering.is_ge(),
                        _ => unreachable!(),
                    }
                }
                ast::CompareOp::In => ok!(ops::contains(&right, &left)).is_true(),
                ast::CompareOp::NotIn => !ok!(ops::contains(&right, &left)).is_true(),
            };
            if !holds {
                return Ok(Value::from(false));
            }
            left = right;
        }
        Ok(Value::from(true))
    }

    fn eval_call(
        &self,
        call: &Spanned<ast::Call>,
        state: &mut State<'env>,
        extra_kwarg: Option<(&str, Value)>,
    ) -> Result<Value, Error> {
        match call.identify_call() {
            ast::CallType::Function(name) if name == "super" => {
                if !call.args.is_empty() {
                    return Err(Error::new(
                        ErrorKind::InvalidOperation,
                        "super() takes no arguments",
                    ));
                }
                let mut buf = String::new();
                let mut out = Output::with_string(&mut buf);
                self.perform_super(state, &mut out)
            }
            ast::CallType::Function(name) => {
                let func = self.lookup_name(name, state);
                if func.is_undefined() {
                    return Err(Error::new(
                        ErrorKind::UndefinedError,
                        format!("{name:?} is undefined and cannot be called"),
                    ));
                }
                if let Some(sec) = state.security() {
                    ok!(sec.check_deadline());
                    ok!(sec.check_function(name));
                }
                let args = ok!(self.eval_call_args(&call.args, state, extra_kwarg));
                self.call_value(&func, state, &args)
            }
            ast::CallType::Block(name) => {
                let name = name.to_string();
                out_of_band_block_render(self, &name, state)
            }
            ast::CallType::Method(obj_expr, name) => {
                let obj = ok!(self.eval_expr(obj_expr, state));
                if obj.is_undefined() {
                    return Err(undefined_value_error(
                        &obj,
                        &format!("calling method {name:?}"),
                    ));
                }
                if let Some(sec) = state.security() {
                    ok!(sec.check_deadline());
                    ok!(sec.check_method(name));
                }
                let args = ok!(self.eval_call_args(&call.args, state, extra_kwarg));
                self.call_method(&obj, name, &args, state)
            }
            ast::CallType::Object(expr) => {
                let func = ok!(self.eval_expr(expr, state));
                let args = ok!(self.eval_call_args(&call.args, state, extra_kwarg));
                self.call_value(&func, state, &args)
            }
        }
    }

    pub(crate) fn call_value(
        &self,
        func: &Value,
        state: &State<'env>,
        args: &[Value],
    ) -> Result<Value, Error> {
        match func.0 {
            ValueRepr::Object(ref obj) => obj.call(state, args),
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("value of type {} is not callable", func.kind()),
            )),
        }
    }

    fn call_method(
        &self,
        obj: &Value,
        name: &str,
        args: &[Value],
        state: &State<'env>,
    ) -> Result<Value, Error> {
        match obj.0 {
            ValueRepr::Object(ref dyn_obj) => dyn_obj.call_method(state, name, args),
            ValueRepr::Map(ref map, _) => match name {
                "items" => Ok(Value::from(
                    map.iter()
                        .map(|(k, v)| Value::from(vec![k.as_value(), v.clone()]))
                        .collect::<Vec<_>>(),
                )),
                "keys" => Ok(Value::from(
                    map.keys().map(|k| k.as_value()).collect::<Vec<_>>(),
                )),
                "values" => Ok(Value::from(map.values().cloned().collect::<Vec<_>>())),
                "get" => {
                    let key = ok!(args.first().cloned().ok_or_else(|| Error::new(
                        ErrorKind::InvalidOperation,
                        "get() requires a key argument",
                    )));
                    Ok(obj
                        .get_item(&key)
                        .or_else(|| args.get(1).cloned())
                        .unwrap_or(Value::from(())))
                }
                other => match obj.get_attr(other) {
                    Some(func) if func.is_callable() => self.call_value(&func, state, args),
                    _ => Err(Error::new(
                        ErrorKind::InvalidOperation,
                        format!("map has no method named {other}"),
                    )),
                },
            },
            ValueRepr::Namespace(ref ns) => match ns.get(name) {
                Some(func) if func.is_callable() => self.call_value(&func, state, args),
                _ => Err(Error::new(
                    ErrorKind::InvalidOperation,
                    format!("namespace has no method named {name}"),
                )),
            },
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("value of type {} has no method {name}", obj.kind()),
            )),
        }
    }

    fn eval_call_args(
        &self,
        args: &[ast::CallArg],
        state: &mut State<'env>,
        extra_kwarg: Option<(&str, Value)>,
    ) -> Result<Vec<Value>, Error> {
        let mut rv = Vec::with_capacity(args.len());
        let mut kwargs = ValueMap::new();
        for arg in args {
            match arg {
                ast::CallArg::Pos(expr) => rv.push(ok!(self.eval_expr(expr, state))),
                ast::CallArg::Kwarg(name, expr) => {
                    kwargs.insert(Key::from(name.as_str()), ok!(self.eval_expr(expr, state)));
                }
                ast::CallArg::PosSplat(expr) => {
                    let value = ok!(self.eval_expr(expr, state));
                    for item in ok!(value.try_to_vec()) {
                        rv.push(item);
                    }
                }
                ast::CallArg::KwargSplat(expr) => {
                    let value = ok!(self.eval_expr(expr, state));
                    match value.map_items() {
                        Some(items) => {
                            for (key, item) in items {
                                kwargs.insert(ok!(Key::try_from(key)), item);
                            }
                        }
                        None => {
                            return Err(Error::new(
                                ErrorKind::InvalidOperation,
                                "** expansion requires a map",
                            ))
                        }
                    }
                }
            }
        }
        if let Some((key, value)) = extra_kwarg {
            kwargs.insert(Key::from(key), value);
        }
        if !kwargs.is_empty() {
            rv.push(Value(ValueRepr::Map(Arc::new(kwargs), MapType::Kwargs)));
        }
        Ok(rv)
    }
}

fn out_of_band_block_render<'env>(
    vm: &Vm<'env>,
    name: &str,
    state: &mut State<'env>,
) -> Result<Value, Error> {
    let mut buf = String::new();
    {
        let mut out = Output::with_string(&mut buf);
        ok!(vm.render_block(name, state, &mut out));
    }
    Ok(Value::from_safe_string(buf))
}

fn attribute_path(node: &Spanned<ast::GetAttr>) -> String {
    fn walk(expr: &ast::Expr, parts: &mut Vec<String>) -> bool {
        match expr {
            ast::Expr::Var(var) => {
                parts.push(var.id.clone());
                true
            }
            ast::Expr::GetAttr(attr) => {
                if walk(&attr.expr, parts) {
                    parts.push(attr.name.clone());
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }
    let mut parts = Vec::new();
    if walk(&node.expr, &mut parts) {
        parts.push(node.name.clone());
        parts.join(".")
    } else {
        node.name.clone()
    }
}

fn derive_auto_escape(value: &Value) -> Result<AutoEscape, Error> {
    match value.as_str() {
        Some("html") => Ok(AutoEscape::Html),
        Some("json") => Ok(AutoEscape::Json),
        Some("none") => Ok(AutoEscape::None),
        None if value.kind() == crate::value::ValueKind::Bool => {
            if value.is_true() {
                Ok(AutoEscape::Html)
            } else {
                Ok(AutoEscape::None)
            }
        }
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            "invalid value to autoescape tag",
        )),
    }
}

fn trans_parts_to_string(parts: &[ast::TransPart]) -> String {
    let mut rv = String::new();
    for part in parts {
        match part {
            ast::TransPart::Text(text) => rv.push_str(text),
            ast::TransPart::Placeholder(name) => {
                rv.push_str("%(");
                rv.push_str(name);
                rv.push_str(")s");
            }
        }
    }
    rv
}

fn trans_placeholder_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"%\((\w+)\)s").unwrap())
}

fn collapse_spaceless(captured: &str) -> String {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r">\s+<").unwrap());
    re.replace_all(captured.trim(), "><").into_owned()
}
