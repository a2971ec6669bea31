use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::environment::Environment;
use crate::error::Error;
use crate::eval;
use crate::output::Output;
use crate::stream::TemplateStream;
use crate::syntax::ast::{self, Spanned};
use crate::syntax::parser::parse;
use crate::utils::AutoEscape;
use crate::value::Value;

/// An immutable parsed template.
///
/// Holds the owned AST, the table of block definitions (collected
/// recursively so inheritance can stack overrides) and the extends target.
pub(crate) struct CompiledTemplate {
    pub name: Arc<str>,
    pub source: Arc<str>,
    pub root: Vec<ast::Stmt>,
    pub blocks: BTreeMap<String, Spanned<ast::Block>>,
    pub extends: Option<ast::Expr>,
    pub initial_auto_escape: AutoEscape,
}

impl fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("name", &self.name)
            .field("blocks", &self.blocks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CompiledTemplate {
    pub fn new(
        name: &str,
        source: &str,
        initial_auto_escape: AutoEscape,
    ) -> Result<CompiledTemplate, Error> {
        let root_stmt = ok!(parse(source, name));
        let root = match root_stmt {
            ast::Stmt::Template(node) => node.children.clone(),
            _ => unreachable!("parser always returns a template node"),
        };

        let mut blocks = BTreeMap::new();
        let mut extends = None;
        collect_template_info(&root, &mut blocks, &mut extends);

        Ok(CompiledTemplate {
            name: Arc::from(name),
            source: Arc::from(source),
            root,
            blocks,
            extends,
            initial_auto_escape,
        })
    }
}

/// Collects block definitions (recursively) and the extends target.
fn collect_template_info(
    stmts: &[ast::Stmt],
    blocks: &mut BTreeMap<String, Spanned<ast::Block>>,
    extends: &mut Option<ast::Expr>,
) {
    for stmt in stmts {
        match stmt {
            ast::Stmt::Block(block) => {
                blocks.insert(block.name.clone(), block.clone());
                collect_template_info(&block.body, blocks, extends);
            }
            ast::Stmt::Extends(node) => {
                if extends.is_none() {
                    *extends = Some(node.name.clone());
                }
            }
            ast::Stmt::IfCond(node) => {
                collect_template_info(&node.true_body, blocks, extends);
                collect_template_info(&node.false_body, blocks, extends);
            }
            ast::Stmt::ForLoop(node) => {
                collect_template_info(&node.body, blocks, extends);
                collect_template_info(&node.else_body, blocks, extends);
            }
            ast::Stmt::WithBlock(node) => {
                collect_template_info(&node.body, blocks, extends);
            }
            ast::Stmt::AutoEscape(node) => {
                collect_template_info(&node.body, blocks, extends);
            }
            ast::Stmt::FilterBlock(node) => {
                collect_template_info(&node.body, blocks, extends);
            }
            ast::Stmt::Spaceless(node) => {
                collect_template_info(&node.body, blocks, extends);
            }
            _ => {}
        }
    }
}

/// A handle to a template.
///
/// Templates are loaded from an [`Environment`] and are immutable; rendering
/// the same template with the same variables and configuration always
/// produces the same output.
#[derive(Clone)]
pub struct Template<'env> {
    env: &'env Environment,
    compiled: Arc<CompiledTemplate>,
}

impl fmt::Debug for Template<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name())
            .finish()
    }
}

impl<'env> Template<'env> {
    pub(crate) fn new(env: &'env Environment, compiled: Arc<CompiledTemplate>) -> Template<'env> {
        Template { env, compiled }
    }

    /// Returns the name of the template.
    pub fn name(&self) -> &str {
        &self.compiled.name
    }

    /// Returns the source code of the template.
    pub fn source(&self) -> &str {
        &self.compiled.source
    }

    /// Renders the template into a string.
    ///
    /// The provided value is the root context; anything serializable works,
    /// though the common case is the [`context!`](crate::context!) macro:
    ///
    /// ```
    /// # use terrarium::{Environment, context};
    /// let mut env = Environment::new();
    /// env.add_template("hello", "Hello {{ name }}!").unwrap();
    /// let tmpl = env.get_template("hello").unwrap();
    /// println!("{}", tmpl.render(context!(name => "John")).unwrap());
    /// ```
    pub fn render<S: Serialize>(&self, ctx: S) -> Result<String, Error> {
        self._render(Value::from_serialize(&ctx))
    }

    fn _render(&self, root: Value) -> Result<String, Error> {
        let mut rv = String::with_capacity(self.compiled.source.len());
        {
            let mut out = Output::with_string(&mut rv);
            ok!(eval::render_main(
                self.env,
                self.compiled.clone(),
                root,
                &mut out
            ));
        }
        if !self.env.keep_trailing_newline() {
            strip_trailing_newline(&mut rv);
        }
        Ok(rv)
    }

    /// Renders the template into a [`fmt::Write`].
    ///
    /// Output already written stays in place when rendering fails midway.
    pub fn render_to<W: fmt::Write, S: Serialize>(&self, w: &mut W, ctx: S) -> Result<(), Error> {
        let rendered = ok!(self.render(ctx));
        w.write_str(&rendered).map_err(Error::from)
    }

    /// Renders the template as a lazy stream of fragments.
    ///
    /// Rendering runs on a producer task that blocks when the consumer is
    /// slow; see [`TemplateStream`].
    pub fn generate<S: Serialize>(&self, ctx: S) -> TemplateStream {
        TemplateStream::spawn(
            self.env.clone(),
            self.compiled.clone(),
            Value::from_serialize(&ctx),
        )
    }
}

/// Removes one final `\n` or `\r\n` (the trailing-newline policy).
pub(crate) fn strip_trailing_newline(s: &mut String) {
    if s.ends_with('\n') {
        s.pop();
        if s.ends_with('\r') {
            s.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_strip_trailing_newline() {
        let mut s = "hello\n".to_string();
        strip_trailing_newline(&mut s);
        assert_eq!(s, "hello");

        let mut s = "hello\r\n".to_string();
        strip_trailing_newline(&mut s);
        assert_eq!(s, "hello");

        let mut s = "hello\n\n".to_string();
        strip_trailing_newline(&mut s);
        assert_eq!(s, "hello\n");

        let mut s = "hello".to_string();
        strip_trailing_newline(&mut s);
        assert_eq!(s, "hello");
    }
}
