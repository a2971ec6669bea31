use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::syntax::tokens::Span;
use crate::value::Value;

/// Container for nodes with location info.
///
/// This container fulfills two purposes: it adds location information to
/// nodes, and it makes nodes cheaply cloneable.  Macro bodies and block
/// bodies are shared between the template, macro values and inheritance
/// block stacks, so nodes sit behind an `Arc` rather than a `Box`.
pub struct Spanned<T> {
    node: Arc<T>,
    span: Span,
}

impl<T> Spanned<T> {
    /// Creates a new spanned node.
    pub fn new(node: T, span: Span) -> Spanned<T> {
        Spanned {
            node: Arc::new(node),
            span,
        }
    }

    /// Accesses the span.
    pub fn span(&self) -> Span {
        self.span
    }
}

impl<T> Clone for Spanned<T> {
    fn clone(&self) -> Self {
        Spanned {
            node: self.node.clone(),
            span: self.span,
        }
    }
}

impl<T> Deref for Spanned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.node
    }
}

impl<T: fmt::Debug> fmt::Debug for Spanned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        ok!(fmt::Debug::fmt(&self.node, f));
        write!(f, "{:?}", self.span)
    }
}

/// A statement node.
#[derive(Debug, Clone)]
pub enum Stmt {
    Template(Spanned<Template>),
    EmitExpr(Spanned<EmitExpr>),
    EmitRaw(Spanned<EmitRaw>),
    ForLoop(Spanned<ForLoop>),
    IfCond(Spanned<IfCond>),
    WithBlock(Spanned<WithBlock>),
    Set(Spanned<Set>),
    SetBlock(Spanned<SetBlock>),
    AutoEscape(Spanned<AutoEscape>),
    FilterBlock(Spanned<FilterBlock>),
    Spaceless(Spanned<Spaceless>),
    Block(Spanned<Block>),
    Extends(Spanned<Extends>),
    Include(Spanned<Include>),
    Import(Spanned<Import>),
    FromImport(Spanned<FromImport>),
    Macro(Spanned<Macro>),
    CallBlock(Spanned<CallBlock>),
    Do(Spanned<Do>),
    Break(Spanned<Break>),
    Continue(Spanned<Continue>),
    Trans(Spanned<Trans>),
}

impl Stmt {
    /// The span of the statement.
    pub fn span(&self) -> Span {
        match self {
            Stmt::Template(s) => s.span(),
            Stmt::EmitExpr(s) => s.span(),
            Stmt::EmitRaw(s) => s.span(),
            Stmt::ForLoop(s) => s.span(),
            Stmt::IfCond(s) => s.span(),
            Stmt::WithBlock(s) => s.span(),
            Stmt::Set(s) => s.span(),
            Stmt::SetBlock(s) => s.span(),
            Stmt::AutoEscape(s) => s.span(),
            Stmt::FilterBlock(s) => s.span(),
            Stmt::Spaceless(s) => s.span(),
            Stmt::Block(s) => s.span(),
            Stmt::Extends(s) => s.span(),
            Stmt::Include(s) => s.span(),
            Stmt::Import(s) => s.span(),
            Stmt::FromImport(s) => s.span(),
            Stmt::Macro(s) => s.span(),
            Stmt::CallBlock(s) => s.span(),
            Stmt::Do(s) => s.span(),
            Stmt::Break(s) => s.span(),
            Stmt::Continue(s) => s.span(),
            Stmt::Trans(s) => s.span(),
        }
    }
}

/// An expression node.
#[derive(Debug, Clone)]
pub enum Expr {
    Var(Spanned<Var>),
    Const(Spanned<Const>),
    Slice(Spanned<Slice>),
    UnaryOp(Spanned<UnaryOp>),
    BinOp(Spanned<BinOp>),
    Compare(Spanned<Compare>),
    IfExpr(Spanned<IfExpr>),
    Filter(Spanned<Filter>),
    Test(Spanned<Test>),
    GetAttr(Spanned<GetAttr>),
    GetItem(Spanned<GetItem>),
    Call(Spanned<Call>),
    List(Spanned<List>),
    Map(Spanned<Map>),
}

impl Expr {
    /// The span of the expression.
    pub fn span(&self) -> Span {
        match self {
            Expr::Var(s) => s.span(),
            Expr::Const(s) => s.span(),
            Expr::Slice(s) => s.span(),
            Expr::UnaryOp(s) => s.span(),
            Expr::BinOp(s) => s.span(),
            Expr::Compare(s) => s.span(),
            Expr::IfExpr(s) => s.span(),
            Expr::Filter(s) => s.span(),
            Expr::Test(s) => s.span(),
            Expr::GetAttr(s) => s.span(),
            Expr::GetItem(s) => s.span(),
            Expr::Call(s) => s.span(),
            Expr::List(s) => s.span(),
            Expr::Map(s) => s.span(),
        }
    }

    /// A short human readable description of the expression.
    pub fn description(&self) -> &'static str {
        match self {
            Expr::Var(_) => "variable",
            Expr::Const(_) => "constant",
            Expr::Slice(_) => "slice",
            Expr::UnaryOp(_) => "unary operator",
            Expr::BinOp(_) => "binary operator",
            Expr::Compare(_) => "comparison",
            Expr::IfExpr(_) => "if expression",
            Expr::Filter(_) => "filter expression",
            Expr::Test(_) => "test expression",
            Expr::GetAttr(_) => "attribute lookup",
            Expr::GetItem(_) => "item lookup",
            Expr::Call(_) => "call",
            Expr::List(_) => "list literal",
            Expr::Map(_) => "map literal",
        }
    }
}

/// Root template node.
#[derive(Debug)]
pub struct Template {
    pub children: Vec<Stmt>,
}

/// A for loop.
#[derive(Debug)]
pub struct ForLoop {
    pub target: Expr,
    pub iter: Expr,
    pub filter_expr: Option<Expr>,
    pub recursive: bool,
    pub body: Vec<Stmt>,
    pub else_body: Vec<Stmt>,
}

/// An if/else condition.
#[derive(Debug)]
pub struct IfCond {
    pub expr: Expr,
    pub true_body: Vec<Stmt>,
    pub false_body: Vec<Stmt>,
}

/// A with block.
#[derive(Debug)]
pub struct WithBlock {
    pub assignments: Vec<(Expr, Expr)>,
    pub body: Vec<Stmt>,
}

/// A set statement.
#[derive(Debug)]
pub struct Set {
    pub target: Expr,
    pub expr: Expr,
}

/// A set capture statement.
#[derive(Debug)]
pub struct SetBlock {
    pub target: Expr,
    pub filter: Option<Expr>,
    pub body: Vec<Stmt>,
}

/// A block for inheritance elements.
#[derive(Debug)]
pub struct Block {
    pub name: String,
    pub scoped: bool,
    pub body: Vec<Stmt>,
}

/// An extends statement.
#[derive(Debug)]
pub struct Extends {
    pub name: Expr,
}

/// An include statement.
#[derive(Debug)]
pub struct Include {
    pub name: Expr,
    pub ignore_missing: bool,
    pub with_context: bool,
}

/// A full module import.
#[derive(Debug)]
pub struct Import {
    pub expr: Expr,
    pub name: String,
    pub with_context: bool,
}

/// A "from" import.
#[derive(Debug)]
pub struct FromImport {
    pub expr: Expr,
    pub names: Vec<(String, Option<String>)>,
    pub with_context: bool,
}

/// An auto escape control block.
#[derive(Debug)]
pub struct AutoEscape {
    pub enabled: Expr,
    pub body: Vec<Stmt>,
}

/// Applies filters to a block.
#[derive(Debug)]
pub struct FilterBlock {
    pub filter: Expr,
    pub body: Vec<Stmt>,
}

/// Strips whitespace between HTML tags in the body.
#[derive(Debug)]
pub struct Spaceless {
    pub body: Vec<Stmt>,
}

/// Declares a macro.
#[derive(Debug)]
pub struct Macro {
    pub name: String,
    pub args: Vec<String>,
    pub defaults: Vec<Expr>,
    pub varargs: Option<String>,
    pub varkwargs: Option<String>,
    pub body: Vec<Stmt>,
}

/// A `{% call %}` block invoking a callable with a caller macro.
#[derive(Debug)]
pub struct CallBlock {
    pub call: Spanned<Call>,
    pub macro_decl: Spanned<Macro>,
}

/// Evaluates an expression for its side effects.
#[derive(Debug)]
pub struct Do {
    pub expr: Expr,
}

/// Breaks out of the innermost loop.
#[derive(Debug)]
pub struct Break;

/// Continues with the next loop iteration.
#[derive(Debug)]
pub struct Continue;

/// A fragment of a translation block body.
#[derive(Debug, Clone)]
pub enum TransPart {
    Text(String),
    Placeholder(String),
}

/// A translation block.
#[derive(Debug)]
pub struct Trans {
    pub assignments: Vec<(String, Expr)>,
    pub singular: Vec<TransPart>,
    pub plural: Option<Vec<TransPart>>,
    pub count_name: Option<String>,
}

/// Outputs the expression.
#[derive(Debug)]
pub struct EmitExpr {
    pub expr: Expr,
}

/// Outputs raw template code.
#[derive(Debug)]
pub struct EmitRaw {
    pub raw: String,
}

/// Looks up a variable.
#[derive(Debug)]
pub struct Var {
    pub id: String,
}

/// Loads a constant.
#[derive(Debug)]
pub struct Const {
    pub value: Value,
}

/// Represents a slice.
#[derive(Debug)]
pub struct Slice {
    pub expr: Expr,
    pub start: Option<Expr>,
    pub stop: Option<Expr>,
    pub step: Option<Expr>,
}

/// A kind of unary operator.
#[derive(Debug)]
pub enum UnaryOpKind {
    Not,
    Neg,
}

/// An unary operator expression.
#[derive(Debug)]
pub struct UnaryOp {
    pub op: UnaryOpKind,
    pub expr: Expr,
}

/// A kind of binary operator.
#[derive(Debug)]
pub enum BinOpKind {
    ScAnd,
    ScOr,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
    Pow,
    Concat,
}

/// A binary operator expression.
#[derive(Debug)]
pub struct BinOp {
    pub op: BinOpKind,
    pub left: Expr,
    pub right: Expr,
}

/// A comparison operator.
#[derive(Debug, Copy, Clone)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
}

/// A chained comparison (`a < b <= c`).
///
/// Middle expressions evaluate exactly once.
#[derive(Debug)]
pub struct Compare {
    pub expr: Expr,
    pub ops: Vec<(CompareOp, Expr)>,
}

/// An if expression.
#[derive(Debug)]
pub struct IfExpr {
    pub test_expr: Expr,
    pub true_expr: Expr,
    pub false_expr: Option<Expr>,
}

/// A filter expression.
#[derive(Debug)]
pub struct Filter {
    pub name: String,
    pub expr: Option<Expr>,
    pub args: Vec<CallArg>,
}

/// A test expression.
#[derive(Debug)]
pub struct Test {
    pub name: String,
    pub expr: Expr,
    pub args: Vec<CallArg>,
}

/// An attribute lookup expression.
#[derive(Debug)]
pub struct GetAttr {
    pub expr: Expr,
    pub name: String,
}

/// An item lookup expression.
#[derive(Debug)]
pub struct GetItem {
    pub expr: Expr,
    pub subscript_expr: Expr,
}

/// An argument to a call.
#[derive(Debug, Clone)]
pub enum CallArg {
    Pos(Expr),
    Kwarg(String, Expr),
    PosSplat(Expr),
    KwargSplat(Expr),
}

/// Calls something.
#[derive(Debug)]
pub struct Call {
    pub expr: Expr,
    pub args: Vec<CallArg>,
}

/// Defines the specific type of call.
#[derive(Debug)]
pub enum CallType<'ast> {
    Function(&'ast str),
    Method(&'ast Expr, &'ast str),
    Block(&'ast str),
    Object(&'ast Expr),
}

impl Call {
    /// Try to isolate a method call.
    ///
    /// Name + call and attribute lookup + call are method calls which are
    /// easier to handle for the evaluator as a separate thing.
    pub fn identify_call(&self) -> CallType<'_> {
        match self.expr {
            Expr::Var(ref var) => CallType::Function(&var.id),
            Expr::GetAttr(ref attr) => {
                if let Expr::Var(ref var) = attr.expr {
                    if var.id == "self" {
                        return CallType::Block(&attr.name);
                    }
                }
                CallType::Method(&attr.expr, &attr.name)
            }
            _ => CallType::Object(&self.expr),
        }
    }
}

/// Creates a list of values.
#[derive(Debug)]
pub struct List {
    pub items: Vec<Expr>,
}

/// Creates a map of values.
#[derive(Debug)]
pub struct Map {
    pub keys: Vec<Expr>,
    pub values: Vec<Expr>,
}
