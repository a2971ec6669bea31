use std::fmt;

use serde::Serialize;

use crate::environment::Environment;
use crate::error::Error;
use crate::eval;
use crate::syntax::ast;
use crate::value::Value;

/// A compiled expression.
///
/// Expressions let the template language double as a small data language:
/// parse once with [`Environment::compile_expression`], evaluate against
/// different contexts with [`eval`](Expression::eval).
pub struct Expression<'env> {
    env: &'env Environment,
    ast: ast::Expr,
}

impl fmt::Debug for Expression<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression").finish()
    }
}

impl<'env> Expression<'env> {
    pub(crate) fn new(env: &'env Environment, ast: ast::Expr) -> Expression<'env> {
        Expression { env, ast }
    }

    /// Evaluates the expression with some context.
    pub fn eval<S: Serialize>(&self, ctx: S) -> Result<Value, Error> {
        eval::eval_expression(self.env, &self.ast, Value::from_serialize(&ctx))
    }
}
