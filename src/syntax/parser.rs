use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, ErrorKind};
use crate::syntax::ast::{self, Spanned};
use crate::syntax::lexer::Tokenizer;
use crate::syntax::tokens::{Span, Token};
use crate::value::Value;

const MAX_RECURSION: usize = 150;
const RESERVED_NAMES: [&str; 8] = [
    "true", "True", "false", "False", "none", "None", "loop", "self",
];

fn unexpected<D: fmt::Display>(unexpected: D, expected: &str) -> Error {
    Error::new(
        ErrorKind::SyntaxError,
        format!("unexpected {unexpected}, expected {expected}"),
    )
}

fn unexpected_eof(expected: &str) -> Error {
    unexpected("end of input", expected)
}

fn make_const(value: Value, span: Span) -> ast::Expr {
    ast::Expr::Const(Spanned::new(ast::Const { value }, span))
}

fn syntax_error(msg: Cow<'static, str>) -> Error {
    Error::new(ErrorKind::SyntaxError, msg)
}

macro_rules! syntax_error {
    ($msg:expr) => {{
        return Err(syntax_error(Cow::Borrowed($msg)));
    }};
    ($msg:expr, $($tt:tt)*) => {{
        return Err(syntax_error(Cow::Owned(format!($msg, $($tt)*))));
    }};
}

macro_rules! expect_token {
    ($parser:expr, $expectation:expr) => {{
        match ok!($parser.stream.next()) {
            Some(rv) => rv,
            None => return Err(unexpected_eof($expectation)),
        }
    }};
    ($parser:expr, $match:pat, $expectation:expr) => {{
        match ok!($parser.stream.next()) {
            Some((token @ $match, span)) => (token, span),
            Some((token, _)) => return Err(unexpected(token, $expectation)),
            None => return Err(unexpected_eof($expectation)),
        }
    }};
    ($parser:expr, $match:pat => $target:expr, $expectation:expr) => {{
        match ok!($parser.stream.next()) {
            Some(($match, span)) => ($target, span),
            Some((token, _)) => return Err(unexpected(token, $expectation)),
            None => return Err(unexpected_eof($expectation)),
        }
    }};
}

macro_rules! matches_token {
    ($p:expr, $match:pat) => {
        match $p.stream.current() {
            Err(err) => return Err(err),
            Ok(Some(($match, _))) => true,
            _ => false,
        }
    };
}

macro_rules! skip_token {
    ($p:expr, $match:pat) => {
        match $p.stream.current() {
            Err(err) => return Err(err),
            Ok(Some(($match, _))) => {
                let _ = $p.stream.next();
                true
            }
            _ => false,
        }
    };
}

macro_rules! matches_ident {
    ($p:expr, $kw:expr) => {
        match $p.stream.current() {
            Err(err) => return Err(err),
            Ok(Some((tok, _))) => tok.is_ident($kw),
            _ => false,
        }
    };
}

macro_rules! skip_ident {
    ($p:expr, $kw:expr) => {
        if matches_ident!($p, $kw) {
            let _ = $p.stream.next();
            true
        } else {
            false
        }
    };
}

macro_rules! expect_keyword {
    ($p:expr, $kw:expr) => {
        if !skip_ident!($p, $kw) {
            match ok!($p.stream.next()) {
                Some((token, _)) => return Err(unexpected(token, $kw)),
                None => return Err(unexpected_eof($kw)),
            }
        }
    };
}

enum SetParseResult {
    Set(ast::Set),
    SetBlock(ast::SetBlock),
}

struct TokenStream<'s> {
    tokenizer: Tokenizer<'s>,
    current: Option<Result<(Token, Span), Error>>,
    last_span: Span,
}

impl<'s> TokenStream<'s> {
    pub fn new(source: &'s str, in_expr: bool) -> TokenStream<'s> {
        let mut tokenizer = Tokenizer::new(source, in_expr);
        let current = tokenizer.next_token().transpose();
        TokenStream {
            tokenizer,
            current,
            last_span: Span::default(),
        }
    }

    /// Advance the stream.
    pub fn next(&mut self) -> Result<Option<(Token, Span)>, Error> {
        let rv = self.current.take();
        self.current = self.tokenizer.next_token().transpose();
        if let Some(Ok((_, span))) = rv {
            self.last_span = span;
        }
        rv.transpose()
    }

    /// Look at the current token.
    pub fn current(&mut self) -> Result<Option<(&Token, Span)>, Error> {
        match self.current {
            Some(Ok(ref tok)) => Ok(Some((&tok.0, tok.1))),
            Some(Err(_)) => Err(self.current.take().unwrap().unwrap_err()),
            None => Ok(None),
        }
    }

    /// Expands the span to the last seen one.
    #[inline(always)]
    pub fn expand_span(&self, mut span: Span) -> Span {
        span.end_line = self.last_span.end_line;
        span.end_col = self.last_span.end_col;
        span.end_offset = self.last_span.end_offset;
        span
    }

    /// Returns the current span.
    #[inline(always)]
    pub fn current_span(&self) -> Span {
        if let Some(Ok((_, span))) = self.current {
            span
        } else {
            self.last_span
        }
    }

    /// Returns the last seen span.
    #[inline(always)]
    pub fn last_span(&self) -> Span {
        self.last_span
    }
}

struct Parser<'s> {
    stream: TokenStream<'s>,
    filename: String,
    in_macro: bool,
    in_loop: bool,
    blocks: BTreeSet<String>,
    depth: usize,
}

macro_rules! binop {
    ($func:ident, $next:ident, { $($tok:tt)* }) => {
        fn $func(&mut self) -> Result<ast::Expr, Error> {
            let span = self.stream.current_span();
            let mut left = ok!(self.$next());
            loop {
                let op = match ok!(self.stream.current()) {
                    $($tok)*
                    _ => break,
                };
                ok!(self.stream.next());
                let right = ok!(self.$next());
                left = ast::Expr::BinOp(Spanned::new(
                    ast::BinOp { op, left, right, },
                    self.stream.expand_span(span),
                ));
            }
            Ok(left)
        }
    };
}

macro_rules! with_recursion_guard {
    ($parser:expr, $expr:expr) => {{
        $parser.depth += 1;
        if $parser.depth > MAX_RECURSION {
            return Err(syntax_error(Cow::Borrowed(
                "template exceeds maximum recursion limits",
            )));
        }
        let rv = $expr;
        $parser.depth -= 1;
        rv
    }};
}

impl<'s> Parser<'s> {
    pub fn new(source: &'s str, filename: &str, in_expr: bool) -> Parser<'s> {
        Parser {
            stream: TokenStream::new(source, in_expr),
            filename: filename.to_string(),
            in_macro: false,
            in_loop: false,
            blocks: BTreeSet::new(),
            depth: 0,
        }
    }

    /// Parses a template.
    pub fn parse(&mut self) -> Result<ast::Stmt, Error> {
        let span = self.stream.last_span();
        self.subparse(&|_| false)
            .map(|children| {
                ast::Stmt::Template(Spanned::new(
                    ast::Template { children },
                    self.stream.expand_span(span),
                ))
            })
            .map_err(|err| self.attach_location_to_error(err))
    }

    /// Parses an expression and asserts that there is no more input after it.
    pub fn parse_standalone_expr(&mut self) -> Result<ast::Expr, Error> {
        self.parse_expr()
            .and_then(|result| {
                if ok!(self.stream.next()).is_some() {
                    syntax_error!("unexpected input after expression")
                } else {
                    Ok(result)
                }
            })
            .map_err(|err| self.attach_location_to_error(err))
    }

    fn parse_ifexpr(&mut self) -> Result<ast::Expr, Error> {
        let mut span = self.stream.last_span();
        let mut expr = ok!(self.parse_or());
        loop {
            if skip_ident!(self, "if") {
                let expr2 = ok!(self.parse_or());
                let expr3 = if skip_ident!(self, "else") {
                    Some(ok!(self.parse_ifexpr()))
                } else {
                    None
                };
                expr = ast::Expr::IfExpr(Spanned::new(
                    ast::IfExpr {
                        test_expr: expr2,
                        true_expr: expr,
                        false_expr: expr3,
                    },
                    self.stream.expand_span(span),
                ));
                span = self.stream.last_span();
            } else {
                break;
            }
        }
        Ok(expr)
    }

    binop!(parse_or, parse_and, {
        Some((tok, _)) if tok.is_ident("or") => ast::BinOpKind::ScOr,
    });
    binop!(parse_and, parse_not, {
        Some((tok, _)) if tok.is_ident("and") => ast::BinOpKind::ScAnd,
    });

    fn parse_not(&mut self) -> Result<ast::Expr, Error> {
        let span = self.stream.current_span();
        if matches_ident!(self, "not") {
            ok!(self.stream.next());
            return Ok(ast::Expr::UnaryOp(Spanned::new(
                ast::UnaryOp {
                    op: ast::UnaryOpKind::Not,
                    expr: ok!(self.parse_not()),
                },
                self.stream.expand_span(span),
            )));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<ast::Expr, Error> {
        let span = self.stream.last_span();
        let expr = ok!(self.parse_math1());
        let mut ops = Vec::new();
        loop {
            let op = match ok!(self.stream.current()) {
                Some((Token::Eq, _)) => ast::CompareOp::Eq,
                Some((Token::Ne, _)) => ast::CompareOp::Ne,
                Some((Token::Lt, _)) => ast::CompareOp::Lt,
                Some((Token::Lte, _)) => ast::CompareOp::Lte,
                Some((Token::Gt, _)) => ast::CompareOp::Gt,
                Some((Token::Gte, _)) => ast::CompareOp::Gte,
                Some((tok, _)) if tok.is_ident("in") => ast::CompareOp::In,
                Some((tok, _)) if tok.is_ident("not") => {
                    ok!(self.stream.next());
                    expect_keyword!(self, "in");
                    ops.push((ast::CompareOp::NotIn, ok!(self.parse_math1())));
                    continue;
                }
                _ => break,
            };
            ok!(self.stream.next());
            ops.push((op, ok!(self.parse_math1())));
        }
        if ops.is_empty() {
            Ok(expr)
        } else {
            Ok(ast::Expr::Compare(Spanned::new(
                ast::Compare { expr, ops },
                self.stream.expand_span(span),
            )))
        }
    }

    binop!(parse_math1, parse_concat, {
        Some((Token::Plus, _)) => ast::BinOpKind::Add,
        Some((Token::Minus, _)) => ast::BinOpKind::Sub,
    });
    binop!(parse_concat, parse_math2, {
        Some((Token::Tilde, _)) => ast::BinOpKind::Concat,
    });
    binop!(parse_math2, parse_pow, {
        Some((Token::Mul, _)) => ast::BinOpKind::Mul,
        Some((Token::Div, _)) => ast::BinOpKind::Div,
        Some((Token::FloorDiv, _)) => ast::BinOpKind::FloorDiv,
        Some((Token::Mod, _)) => ast::BinOpKind::Rem,
    });
    binop!(parse_pow, parse_unary, {
        Some((Token::Pow, _)) => ast::BinOpKind::Pow,
    });

    fn parse_unary_only(&mut self) -> Result<ast::Expr, Error> {
        let span = self.stream.current_span();
        if matches_token!(self, Token::Minus) {
            ok!(self.stream.next());
            return Ok(ast::Expr::UnaryOp(Spanned::new(
                ast::UnaryOp {
                    op: ast::UnaryOpKind::Neg,
                    expr: ok!(self.parse_unary_only()),
                },
                self.stream.expand_span(span),
            )));
        }
        if matches_token!(self, Token::Plus) {
            ok!(self.stream.next());
            return self.parse_unary_only();
        }
        self.parse_primary()
    }

    fn parse_unary(&mut self) -> Result<ast::Expr, Error> {
        let span = self.stream.current_span();
        let mut expr = ok!(self.parse_unary_only());
        expr = ok!(self.parse_postfix(expr, span));
        self.parse_filter_expr(expr)
    }

    fn parse_postfix(&mut self, expr: ast::Expr, mut span: Span) -> Result<ast::Expr, Error> {
        let mut expr = expr;
        loop {
            let next_span = self.stream.current_span();
            match ok!(self.stream.current()) {
                Some((Token::Dot, _)) => {
                    ok!(self.stream.next());
                    let (name, _) =
                        expect_token!(self, Token::Ident(name) => name, "identifier");
                    expr = ast::Expr::GetAttr(Spanned::new(
                        ast::GetAttr { name, expr },
                        self.stream.expand_span(span),
                    ));
                }
                Some((Token::BracketOpen, _)) => {
                    ok!(self.stream.next());

                    let mut start = None;
                    let mut stop = None;
                    let mut step = None;
                    let mut is_slice = false;

                    if !matches_token!(self, Token::Colon) {
                        start = Some(ok!(self.parse_expr()));
                    }
                    if skip_token!(self, Token::Colon) {
                        is_slice = true;
                        if !matches_token!(self, Token::BracketClose | Token::Colon) {
                            stop = Some(ok!(self.parse_expr()));
                        }
                        if skip_token!(self, Token::Colon)
                            && !matches_token!(self, Token::BracketClose)
                        {
                            step = Some(ok!(self.parse_expr()));
                        }
                    }
                    expect_token!(self, Token::BracketClose, "`]`");

                    if !is_slice {
                        expr = ast::Expr::GetItem(Spanned::new(
                            ast::GetItem {
                                expr,
                                subscript_expr: ok!(start.ok_or_else(|| {
                                    syntax_error(Cow::Borrowed("empty subscript"))
                                })),
                            },
                            self.stream.expand_span(span),
                        ));
                    } else {
                        expr = ast::Expr::Slice(Spanned::new(
                            ast::Slice {
                                expr,
                                start,
                                stop,
                                step,
                            },
                            self.stream.expand_span(span),
                        ));
                    }
                }
                Some((Token::ParenOpen, _)) => {
                    let args = ok!(self.parse_args());
                    expr = ast::Expr::Call(Spanned::new(
                        ast::Call { expr, args },
                        self.stream.expand_span(span),
                    ));
                }
                _ => break,
            }
            span = next_span;
        }
        Ok(expr)
    }

    fn parse_filter_expr(&mut self, expr: ast::Expr) -> Result<ast::Expr, Error> {
        let mut expr = expr;
        loop {
            match ok!(self.stream.current()) {
                Some((Token::Pipe, _)) => {
                    ok!(self.stream.next());
                    let (name, span) =
                        expect_token!(self, Token::Ident(name) => name, "identifier");
                    let args = if matches_token!(self, Token::ParenOpen) {
                        ok!(self.parse_args())
                    } else {
                        Vec::new()
                    };
                    expr = ast::Expr::Filter(Spanned::new(
                        ast::Filter {
                            name,
                            expr: Some(expr),
                            args,
                        },
                        self.stream.expand_span(span),
                    ));
                }
                Some((tok, _)) if tok.is_ident("is") => {
                    ok!(self.stream.next());
                    let negated = skip_ident!(self, "not");
                    let (name, span) =
                        expect_token!(self, Token::Ident(name) => name, "identifier");
                    let args = if matches_token!(self, Token::ParenOpen) {
                        ok!(self.parse_args())
                    } else if ok!(self.test_arg_follows()) {
                        let span = self.stream.current_span();
                        let mut arg = ok!(self.parse_unary_only());
                        arg = ok!(self.parse_postfix(arg, span));
                        vec![ast::CallArg::Pos(arg)]
                    } else {
                        Vec::new()
                    };
                    expr = ast::Expr::Test(Spanned::new(
                        ast::Test { name, expr, args },
                        self.stream.expand_span(span),
                    ));
                    if negated {
                        expr = ast::Expr::UnaryOp(Spanned::new(
                            ast::UnaryOp {
                                op: ast::UnaryOpKind::Not,
                                expr,
                            },
                            self.stream.expand_span(span),
                        ));
                    }
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Checks if a parenthesis-less test argument follows (`x is divisibleby 3`).
    fn test_arg_follows(&mut self) -> Result<bool, Error> {
        Ok(match ok!(self.stream.current()) {
            Some((Token::Ident(ident), _)) => {
                !matches!(ident.as_str(), "and" | "or" | "else" | "is" | "not" | "in")
            }
            Some((
                Token::Str(_)
                | Token::Int(_)
                | Token::Float(_)
                | Token::Plus
                | Token::Minus
                | Token::BracketOpen
                | Token::BraceOpen,
                _,
            )) => true,
            _ => false,
        })
    }

    fn parse_args(&mut self) -> Result<Vec<ast::CallArg>, Error> {
        let mut args = Vec::new();
        let mut has_kwargs = false;

        enum ArgType {
            Regular,
            Splat,
            KwargsSplat,
        }

        expect_token!(self, Token::ParenOpen, "`(`");
        loop {
            if skip_token!(self, Token::ParenClose) {
                break;
            }
            if !args.is_empty() {
                expect_token!(self, Token::Comma, "`,`");
                if skip_token!(self, Token::ParenClose) {
                    break;
                }
            }

            let arg_type = if skip_token!(self, Token::Pow) {
                ArgType::KwargsSplat
            } else if skip_token!(self, Token::Mul) {
                ArgType::Splat
            } else {
                ArgType::Regular
            };

            let expr = ok!(self.parse_expr());

            match arg_type {
                ArgType::Regular => match expr {
                    ast::Expr::Var(ref var) if skip_token!(self, Token::Assign) => {
                        has_kwargs = true;
                        let name = var.id.clone();
                        args.push(ast::CallArg::Kwarg(name, ok!(self.parse_expr_noif())));
                    }
                    _ if has_kwargs => {
                        return Err(syntax_error(Cow::Borrowed(
                            "non-keyword arg after keyword arg",
                        )));
                    }
                    _ => {
                        args.push(ast::CallArg::Pos(expr));
                    }
                },
                ArgType::Splat => {
                    args.push(ast::CallArg::PosSplat(expr));
                }
                ArgType::KwargsSplat => {
                    args.push(ast::CallArg::KwargSplat(expr));
                    has_kwargs = true;
                }
            }

            if args.len() > 2000 {
                syntax_error!("too many arguments in function call")
            }
        }

        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<ast::Expr, Error> {
        with_recursion_guard!(self, self.parse_primary_impl())
    }

    fn parse_primary_impl(&mut self) -> Result<ast::Expr, Error> {
        let (token, span) = expect_token!(self, "expression");
        macro_rules! const_val {
            ($expr:expr) => {
                make_const(Value::from($expr), self.stream.expand_span(span))
            };
        }

        match token {
            Token::Ident(ident) => match ident.as_str() {
                "true" | "True" => Ok(const_val!(true)),
                "false" | "False" => Ok(const_val!(false)),
                "none" | "None" => Ok(const_val!(())),
                _ => Ok(ast::Expr::Var(Spanned::new(ast::Var { id: ident }, span))),
            },
            Token::Str(val) => {
                let mut buf = val;
                loop {
                    match ok!(self.stream.current()) {
                        Some((Token::Str(s), _)) => buf.push_str(s),
                        _ => break,
                    }
                    ok!(self.stream.next());
                }
                Ok(const_val!(buf))
            }
            Token::Int(val) => Ok(const_val!(val)),
            Token::Float(val) => Ok(const_val!(val)),
            Token::ParenOpen => self.parse_tuple_or_expression(span),
            Token::BracketOpen => self.parse_list_expr(span),
            Token::BraceOpen => self.parse_map_expr(span),
            token => syntax_error!("unexpected {}", token),
        }
    }

    fn parse_list_expr(&mut self, span: Span) -> Result<ast::Expr, Error> {
        let mut items = Vec::new();
        loop {
            if skip_token!(self, Token::BracketClose) {
                break;
            }
            if !items.is_empty() {
                expect_token!(self, Token::Comma, "`,`");
                if skip_token!(self, Token::BracketClose) {
                    break;
                }
            }
            items.push(ok!(self.parse_expr()));
        }
        Ok(ast::Expr::List(Spanned::new(
            ast::List { items },
            self.stream.expand_span(span),
        )))
    }

    fn parse_map_expr(&mut self, span: Span) -> Result<ast::Expr, Error> {
        let mut keys = Vec::new();
        let mut values = Vec::new();
        loop {
            if skip_token!(self, Token::BraceClose) {
                break;
            }
            if !keys.is_empty() {
                expect_token!(self, Token::Comma, "`,`");
                if skip_token!(self, Token::BraceClose) {
                    break;
                }
            }
            keys.push(ok!(self.parse_expr()));
            expect_token!(self, Token::Colon, "`:`");
            values.push(ok!(self.parse_expr()));
        }
        Ok(ast::Expr::Map(Spanned::new(
            ast::Map { keys, values },
            self.stream.expand_span(span),
        )))
    }

    fn parse_tuple_or_expression(&mut self, span: Span) -> Result<ast::Expr, Error> {
        // tuple syntax is treated the same as lists
        if skip_token!(self, Token::ParenClose) {
            return Ok(ast::Expr::List(Spanned::new(
                ast::List { items: vec![] },
                self.stream.expand_span(span),
            )));
        }
        let mut expr = ok!(self.parse_expr());
        if matches_token!(self, Token::Comma) {
            let mut items = vec![expr];
            loop {
                if skip_token!(self, Token::ParenClose) {
                    break;
                }
                expect_token!(self, Token::Comma, "`,`");
                if skip_token!(self, Token::ParenClose) {
                    break;
                }
                items.push(ok!(self.parse_expr()));
            }
            expr = ast::Expr::List(Spanned::new(
                ast::List { items },
                self.stream.expand_span(span),
            ));
        } else {
            expect_token!(self, Token::ParenClose, "`)`");
        }
        Ok(expr)
    }

    fn parse_expr(&mut self) -> Result<ast::Expr, Error> {
        with_recursion_guard!(self, self.parse_ifexpr())
    }

    fn parse_expr_noif(&mut self) -> Result<ast::Expr, Error> {
        self.parse_or()
    }

    fn parse_stmt(&mut self) -> Result<ast::Stmt, Error> {
        with_recursion_guard!(self, self.parse_stmt_unprotected())
    }

    fn parse_stmt_unprotected(&mut self) -> Result<ast::Stmt, Error> {
        let (token, span) = expect_token!(self, "block keyword");

        macro_rules! respan {
            ($expr:expr) => {
                Spanned::new($expr, self.stream.expand_span(span))
            };
        }

        let ident = match token {
            Token::Ident(ident) => ident,
            token => syntax_error!("unknown {}, expected statement", token),
        };

        Ok(match ident.as_str() {
            "for" => ast::Stmt::ForLoop(respan!(ok!(self.parse_for_stmt()))),
            "if" => ast::Stmt::IfCond(respan!(ok!(self.parse_if_cond()))),
            "with" => ast::Stmt::WithBlock(respan!(ok!(self.parse_with_block()))),
            "set" => match ok!(self.parse_set()) {
                SetParseResult::Set(rv) => ast::Stmt::Set(respan!(rv)),
                SetParseResult::SetBlock(rv) => ast::Stmt::SetBlock(respan!(rv)),
            },
            "autoescape" => ast::Stmt::AutoEscape(respan!(ok!(self.parse_auto_escape()))),
            "filter" => ast::Stmt::FilterBlock(respan!(ok!(self.parse_filter_block()))),
            "spaceless" => ast::Stmt::Spaceless(respan!(ok!(self.parse_spaceless()))),
            "block" => ast::Stmt::Block(respan!(ok!(self.parse_block()))),
            "extends" => ast::Stmt::Extends(respan!(ok!(self.parse_extends()))),
            "include" => ast::Stmt::Include(respan!(ok!(self.parse_include()))),
            "import" => ast::Stmt::Import(respan!(ok!(self.parse_import()))),
            "from" => ast::Stmt::FromImport(respan!(ok!(self.parse_from_import()))),
            "macro" => ast::Stmt::Macro(respan!(ok!(self.parse_macro()))),
            "call" => ast::Stmt::CallBlock(respan!(ok!(self.parse_call_block()))),
            "trans" => ast::Stmt::Trans(respan!(ok!(self.parse_trans()))),
            "do" => ast::Stmt::Do(respan!(ast::Do {
                expr: ok!(self.parse_expr()),
            })),
            "continue" => {
                if !self.in_loop {
                    syntax_error!("'continue' must be placed inside a loop");
                }
                ast::Stmt::Continue(respan!(ast::Continue))
            }
            "break" => {
                if !self.in_loop {
                    syntax_error!("'break' must be placed inside a loop");
                }
                ast::Stmt::Break(respan!(ast::Break))
            }
            name => syntax_error!("unknown statement {}", name),
        })
    }

    fn parse_assign_name(&mut self, dotted: bool) -> Result<ast::Expr, Error> {
        let (id, span) = expect_token!(self, Token::Ident(name) => name, "identifier");
        if RESERVED_NAMES.contains(&id.as_str()) {
            syntax_error!("cannot assign to reserved variable name {}", id);
        }
        let mut rv = ast::Expr::Var(ast::Spanned::new(ast::Var { id }, span));
        if dotted {
            while skip_token!(self, Token::Dot) {
                let (attr, span) = expect_token!(self, Token::Ident(name) => name, "identifier");
                rv = ast::Expr::GetAttr(ast::Spanned::new(
                    ast::GetAttr {
                        expr: rv,
                        name: attr,
                    },
                    span,
                ));
            }
        }
        Ok(rv)
    }

    fn parse_assignment(&mut self) -> Result<ast::Expr, Error> {
        let span = self.stream.current_span();
        let mut items = Vec::new();
        let mut is_tuple = false;

        loop {
            if !items.is_empty() {
                expect_token!(self, Token::Comma, "`,`");
            }
            if matches_token!(
                self,
                Token::ParenClose | Token::VariableEnd | Token::BlockEnd
            ) || matches_ident!(self, "in")
            {
                break;
            }
            items.push(if skip_token!(self, Token::ParenOpen) {
                let rv = ok!(self.parse_assignment());
                expect_token!(self, Token::ParenClose, "`)`");
                rv
            } else {
                ok!(self.parse_assign_name(false))
            });
            if matches_token!(self, Token::Comma) {
                is_tuple = true;
            } else {
                break;
            }
        }

        if !is_tuple && items.len() == 1 {
            Ok(items.into_iter().next().unwrap())
        } else {
            Ok(ast::Expr::List(Spanned::new(
                ast::List { items },
                self.stream.expand_span(span),
            )))
        }
    }

    fn parse_for_stmt(&mut self) -> Result<ast::ForLoop, Error> {
        let old_in_loop = std::mem::replace(&mut self.in_loop, true);
        let target = ok!(self.parse_assignment());
        expect_keyword!(self, "in");
        let iter = ok!(self.parse_expr_noif());
        let filter_expr = if skip_ident!(self, "if") {
            Some(ok!(self.parse_expr()))
        } else {
            None
        };
        let recursive = skip_ident!(self, "recursive");
        expect_token!(self, Token::BlockEnd, "end of block");
        let body =
            ok!(self.subparse(&|tok| tok.is_ident("endfor") || tok.is_ident("else")));
        let else_body = if skip_ident!(self, "else") {
            expect_token!(self, Token::BlockEnd, "end of block");
            ok!(self.subparse(&|tok| tok.is_ident("endfor")))
        } else {
            Vec::new()
        };
        ok!(self.stream.next());
        self.in_loop = old_in_loop;
        Ok(ast::ForLoop {
            target,
            iter,
            filter_expr,
            recursive,
            body,
            else_body,
        })
    }

    fn parse_if_cond(&mut self) -> Result<ast::IfCond, Error> {
        let expr = ok!(self.parse_expr_noif());
        expect_token!(self, Token::BlockEnd, "end of block");
        let true_body = ok!(self.subparse(
            &|tok| tok.is_ident("endif") || tok.is_ident("else") || tok.is_ident("elif")
        ));
        let false_body = match ok!(self.stream.next()) {
            Some((tok, _)) if tok.is_ident("else") => {
                expect_token!(self, Token::BlockEnd, "end of block");
                let rv = ok!(self.subparse(&|tok| tok.is_ident("endif")));
                ok!(self.stream.next());
                rv
            }
            Some((tok, span)) if tok.is_ident("elif") => vec![ast::Stmt::IfCond(Spanned::new(
                ok!(self.parse_if_cond()),
                self.stream.expand_span(span),
            ))],
            _ => Vec::new(),
        };

        Ok(ast::IfCond {
            expr,
            true_body,
            false_body,
        })
    }

    fn parse_with_block(&mut self) -> Result<ast::WithBlock, Error> {
        let mut assignments = Vec::new();

        while !matches_token!(self, Token::BlockEnd) {
            if !assignments.is_empty() {
                expect_token!(self, Token::Comma, "comma");
            }
            let target = if skip_token!(self, Token::ParenOpen) {
                let assign = ok!(self.parse_assignment());
                expect_token!(self, Token::ParenClose, "`)`");
                assign
            } else {
                ok!(self.parse_assign_name(false))
            };
            expect_token!(self, Token::Assign, "assignment operator");
            let expr = ok!(self.parse_expr());
            assignments.push((target, expr));
        }

        expect_token!(self, Token::BlockEnd, "end of block");
        let body = ok!(self.subparse(&|tok| tok.is_ident("endwith")));
        ok!(self.stream.next());
        Ok(ast::WithBlock { assignments, body })
    }

    fn parse_set(&mut self) -> Result<SetParseResult, Error> {
        let (target, in_paren) = if skip_token!(self, Token::ParenOpen) {
            let assign = ok!(self.parse_assignment());
            expect_token!(self, Token::ParenClose, "`)`");
            (assign, true)
        } else {
            (ok!(self.parse_assign_name(true)), false)
        };

        if !in_paren && matches_token!(self, Token::BlockEnd | Token::Pipe) {
            let filter = if skip_token!(self, Token::Pipe) {
                Some(ok!(self.parse_filter_chain()))
            } else {
                None
            };
            expect_token!(self, Token::BlockEnd, "end of block");
            let body = ok!(self.subparse(&|tok| tok.is_ident("endset")));
            ok!(self.stream.next());
            Ok(SetParseResult::SetBlock(ast::SetBlock {
                target,
                filter,
                body,
            }))
        } else {
            expect_token!(self, Token::Assign, "assignment operator");
            let expr = ok!(self.parse_expr());
            Ok(SetParseResult::Set(ast::Set { target, expr }))
        }
    }

    fn parse_block(&mut self) -> Result<ast::Block, Error> {
        if self.in_macro {
            syntax_error!("block tags in macros are not allowed");
        }
        let old_in_loop = std::mem::replace(&mut self.in_loop, false);
        let (name, _) = expect_token!(self, Token::Ident(name) => name, "identifier");
        if !self.blocks.insert(name.clone()) {
            syntax_error!("block '{}' defined twice", name);
        }
        let scoped = skip_ident!(self, "scoped");

        expect_token!(self, Token::BlockEnd, "end of block");
        let body = ok!(self.subparse(&|tok| tok.is_ident("endblock")));
        ok!(self.stream.next());

        if let Some((Token::Ident(trailing_name), _)) = ok!(self.stream.current()) {
            if *trailing_name != name {
                syntax_error!(
                    "mismatching name on block. Got `{}`, expected `{}`",
                    trailing_name,
                    name
                );
            }
            ok!(self.stream.next());
        }
        self.in_loop = old_in_loop;

        Ok(ast::Block { name, scoped, body })
    }

    fn parse_auto_escape(&mut self) -> Result<ast::AutoEscape, Error> {
        let enabled = ok!(self.parse_expr());
        expect_token!(self, Token::BlockEnd, "end of block");
        let body = ok!(self.subparse(&|tok| tok.is_ident("endautoescape")));
        ok!(self.stream.next());
        Ok(ast::AutoEscape { enabled, body })
    }

    fn parse_filter_chain(&mut self) -> Result<ast::Expr, Error> {
        let mut filter = None;

        while !matches_token!(self, Token::BlockEnd) {
            if filter.is_some() {
                expect_token!(self, Token::Pipe, "`|`");
            }
            let (name, span) = expect_token!(self, Token::Ident(name) => name, "identifier");
            let args = if matches_token!(self, Token::ParenOpen) {
                ok!(self.parse_args())
            } else {
                Vec::new()
            };
            filter = Some(ast::Expr::Filter(Spanned::new(
                ast::Filter {
                    name,
                    expr: filter,
                    args,
                },
                self.stream.expand_span(span),
            )));
        }

        filter.ok_or_else(|| syntax_error(Cow::Borrowed("expected a filter")))
    }

    fn parse_filter_block(&mut self) -> Result<ast::FilterBlock, Error> {
        let filter = ok!(self.parse_filter_chain());
        expect_token!(self, Token::BlockEnd, "end of block");
        let body = ok!(self.subparse(&|tok| tok.is_ident("endfilter")));
        ok!(self.stream.next());
        Ok(ast::FilterBlock { filter, body })
    }

    fn parse_spaceless(&mut self) -> Result<ast::Spaceless, Error> {
        expect_token!(self, Token::BlockEnd, "end of block");
        let body = ok!(self.subparse(&|tok| tok.is_ident("endspaceless")));
        ok!(self.stream.next());
        Ok(ast::Spaceless { body })
    }

    fn parse_extends(&mut self) -> Result<ast::Extends, Error> {
        let name = ok!(self.parse_expr());
        Ok(ast::Extends { name })
    }

    /// Parses the optional `with context` / `without context` marker.
    ///
    /// Returns `Some(flag)` when a marker was present.
    fn parse_context_marker(&mut self) -> Result<Option<bool>, Error> {
        if skip_ident!(self, "with") {
            expect_keyword!(self, "context");
            Ok(Some(true))
        } else if skip_ident!(self, "without") {
            expect_keyword!(self, "context");
            Ok(Some(false))
        } else {
            Ok(None)
        }
    }

    fn parse_include(&mut self) -> Result<ast::Include, Error> {
        let name = ok!(self.parse_expr());
        let mut ignore_missing = false;
        let mut with_context = true;

        loop {
            if skip_ident!(self, "ignore") {
                expect_keyword!(self, "missing");
                ignore_missing = true;
            } else if let Some(flag) = ok!(self.parse_context_marker()) {
                with_context = flag;
            } else {
                break;
            }
        }

        Ok(ast::Include {
            name,
            ignore_missing,
            with_context,
        })
    }

    fn parse_import(&mut self) -> Result<ast::Import, Error> {
        let expr = ok!(self.parse_expr());
        expect_keyword!(self, "as");
        let (name, _) = expect_token!(self, Token::Ident(name) => name, "identifier");
        let with_context = ok!(self.parse_context_marker()).unwrap_or(false);
        Ok(ast::Import {
            expr,
            name,
            with_context,
        })
    }

    fn parse_from_import(&mut self) -> Result<ast::FromImport, Error> {
        let expr = ok!(self.parse_expr());
        let mut names = Vec::new();
        let mut with_context = false;
        expect_keyword!(self, "import");
        loop {
            if matches_token!(self, Token::BlockEnd) {
                break;
            }
            if let Some(flag) = ok!(self.parse_context_marker()) {
                with_context = flag;
                break;
            }
            if !names.is_empty() {
                expect_token!(self, Token::Comma, "`,`");
            }
            if matches_token!(self, Token::BlockEnd) {
                break;
            }
            if let Some(flag) = ok!(self.parse_context_marker()) {
                with_context = flag;
                break;
            }
            let (name, _) = expect_token!(self, Token::Ident(name) => name, "identifier");
            let alias = if skip_ident!(self, "as") {
                let (alias, _) = expect_token!(self, Token::Ident(name) => name, "identifier");
                Some(alias)
            } else {
                None
            };
            names.push((name, alias));
        }
        Ok(ast::FromImport {
            expr,
            names,
            with_context,
        })
    }

    fn parse_macro_args_and_defaults(
        &mut self,
        args: &mut Vec<String>,
        defaults: &mut Vec<ast::Expr>,
        varargs: &mut Option<String>,
        varkwargs: &mut Option<String>,
    ) -> Result<(), Error> {
        let mut first = true;
        loop {
            if skip_token!(self, Token::ParenClose) {
                break;
            }
            if !first {
                expect_token!(self, Token::Comma, "`,`");
                if skip_token!(self, Token::ParenClose) {
                    break;
                }
            }
            first = false;
            if skip_token!(self, Token::Pow) {
                if varkwargs.is_some() {
                    syntax_error!("only one keyword argument collector is allowed");
                }
                let (name, _) = expect_token!(self, Token::Ident(name) => name, "identifier");
                *varkwargs = Some(name);
            } else if skip_token!(self, Token::Mul) {
                if varargs.is_some() || varkwargs.is_some() {
                    syntax_error!("variadic collector must come before keyword collector");
                }
                let (name, _) = expect_token!(self, Token::Ident(name) => name, "identifier");
                *varargs = Some(name);
            } else {
                if varargs.is_some() || varkwargs.is_some() {
                    syntax_error!("regular parameters cannot follow argument collectors");
                }
                let (name, _) = expect_token!(self, Token::Ident(name) => name, "identifier");
                if RESERVED_NAMES.contains(&name.as_str()) {
                    syntax_error!("cannot use reserved variable name {} as parameter", name);
                }
                args.push(name);
                if skip_token!(self, Token::Assign) {
                    defaults.push(ok!(self.parse_expr()));
                } else if !defaults.is_empty() {
                    expect_token!(self, Token::Assign, "`=`");
                }
            }
        }
        Ok(())
    }

    fn parse_macro_or_call_block_body(
        &mut self,
        args: Vec<String>,
        defaults: Vec<ast::Expr>,
        varargs: Option<String>,
        varkwargs: Option<String>,
        name: Option<String>,
    ) -> Result<ast::Macro, Error> {
        expect_token!(self, Token::BlockEnd, "end of block");
        let old_in_loop = std::mem::replace(&mut self.in_loop, false);
        let old_in_macro = std::mem::replace(&mut self.in_macro, true);
        let is_macro = name.is_some();
        let end_check = move |tok: &Token| {
            if is_macro {
                tok.is_ident("endmacro")
            } else {
                tok.is_ident("endcall")
            }
        };
        let body = ok!(self.subparse(&end_check));
        self.in_macro = old_in_macro;
        self.in_loop = old_in_loop;
        ok!(self.stream.next());
        Ok(ast::Macro {
            name: name.unwrap_or_else(|| "caller".to_string()),
            args,
            defaults,
            varargs,
            varkwargs,
            body,
        })
    }

    fn parse_macro(&mut self) -> Result<ast::Macro, Error> {
        let (name, _) = expect_token!(self, Token::Ident(name) => name, "identifier");
        expect_token!(self, Token::ParenOpen, "`(`");
        let mut args = Vec::new();
        let mut defaults = Vec::new();
        let mut varargs = None;
        let mut varkwargs = None;
        ok!(self.parse_macro_args_and_defaults(
            &mut args,
            &mut defaults,
            &mut varargs,
            &mut varkwargs
        ));
        self.parse_macro_or_call_block_body(args, defaults, varargs, varkwargs, Some(name))
    }

    fn parse_call_block(&mut self) -> Result<ast::CallBlock, Error> {
        let span = self.stream.last_span();
        let mut args = Vec::new();
        let mut defaults = Vec::new();
        let mut varargs = None;
        let mut varkwargs = None;
        if skip_token!(self, Token::ParenOpen) {
            ok!(self.parse_macro_args_and_defaults(
                &mut args,
                &mut defaults,
                &mut varargs,
                &mut varkwargs
            ));
        }
        let call = match ok!(self.parse_expr()) {
            ast::Expr::Call(call) => call,
            expr => syntax_error!(
                "expected call expression in call block, got {}",
                expr.description()
            ),
        };
        let macro_decl =
            ok!(self.parse_macro_or_call_block_body(args, defaults, varargs, varkwargs, None));
        Ok(ast::CallBlock {
            call,
            macro_decl: Spanned::new(macro_decl, self.stream.expand_span(span)),
        })
    }

    fn parse_trans(&mut self) -> Result<ast::Trans, Error> {
        let mut assignments = Vec::new();
        while !matches_token!(self, Token::BlockEnd) {
            if !assignments.is_empty() {
                skip_token!(self, Token::Comma);
                if matches_token!(self, Token::BlockEnd) {
                    break;
                }
            }
            let (name, _) = expect_token!(self, Token::Ident(name) => name, "identifier");
            expect_token!(self, Token::Assign, "assignment operator");
            let expr = ok!(self.parse_expr());
            assignments.push((name, expr));
        }
        expect_token!(self, Token::BlockEnd, "end of block");

        let mut singular = Vec::new();
        let mut plural: Option<Vec<ast::TransPart>> = None;
        let mut count_name = None;
        let mut in_plural = false;

        loop {
            match ok!(self.stream.next()) {
                Some((Token::TemplateData(text), _)) => {
                    let target = if in_plural {
                        plural.get_or_insert_with(Vec::new)
                    } else {
                        &mut singular
                    };
                    target.push(ast::TransPart::Text(text));
                }
                Some((Token::VariableStart, _)) => {
                    let (name, _) =
                        expect_token!(self, Token::Ident(name) => name, "identifier");
                    expect_token!(self, Token::VariableEnd, "end of variable block");
                    let target = if in_plural {
                        plural.get_or_insert_with(Vec::new)
                    } else {
                        &mut singular
                    };
                    target.push(ast::TransPart::Placeholder(name));
                }
                Some((Token::BlockStart, _)) => {
                    let (name, _) =
                        expect_token!(self, Token::Ident(name) => name, "identifier");
                    match name.as_str() {
                        "endtrans" => break,
                        "pluralize" => {
                            if in_plural {
                                syntax_error!("translation block has two pluralize sections");
                            }
                            if let Some((Token::Ident(count), _)) = ok!(self.stream.current()) {
                                count_name = Some(count.clone());
                                ok!(self.stream.next());
                            }
                            expect_token!(self, Token::BlockEnd, "end of block");
                            in_plural = true;
                            plural = Some(Vec::new());
                        }
                        other => {
                            syntax_error!("unexpected block '{}' in translation block", other)
                        }
                    }
                }
                Some((token, _)) => {
                    return Err(unexpected(token, "translatable text"));
                }
                None => return Err(unexpected_eof("end of translation block")),
            }
        }

        Ok(ast::Trans {
            assignments,
            singular,
            plural,
            count_name,
        })
    }

    fn subparse(&mut self, end_check: &dyn Fn(&Token) -> bool) -> Result<Vec<ast::Stmt>, Error> {
        let mut rv = Vec::new();
        while let Some((token, span)) = ok!(self.stream.next()) {
            match token {
                Token::TemplateData(raw) => {
                    rv.push(ast::Stmt::EmitRaw(Spanned::new(ast::EmitRaw { raw }, span)))
                }
                Token::VariableStart => {
                    let expr = ok!(self.parse_expr());
                    rv.push(ast::Stmt::EmitExpr(Spanned::new(
                        ast::EmitExpr { expr },
                        self.stream.expand_span(span),
                    )));
                    expect_token!(self, Token::VariableEnd, "end of variable block");
                }
                Token::BlockStart => {
                    let tok = match ok!(self.stream.current()) {
                        Some((tok, _)) => tok,
                        None => syntax_error!("unexpected end of input, expected keyword"),
                    };
                    if end_check(tok) {
                        return Ok(rv);
                    }
                    rv.push(ok!(self.parse_stmt()));
                    expect_token!(self, Token::BlockEnd, "end of block");
                }
                _ => unreachable!("lexer produced garbage"),
            }
        }
        Ok(rv)
    }

    #[inline]
    fn attach_location_to_error(&mut self, mut err: Error) -> Error {
        err.if_unset_set_filename_and_span(&self.filename, self.stream.last_span());
        err
    }
}

/// Parses a template.
pub fn parse(source: &str, filename: &str) -> Result<ast::Stmt, Error> {
    Parser::new(source, filename, false).parse()
}

/// Parses a standalone expression.
pub fn parse_expr(source: &str) -> Result<ast::Expr, Error> {
    Parser::new(source, "<expression>", true).parse_standalone_expr()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let stmt = parse("Hello {{ name }}!", "test.txt").unwrap();
        match stmt {
            ast::Stmt::Template(t) => assert_eq!(t.children.len(), 3),
            _ => panic!("expected template"),
        }
    }

    #[test]
    fn test_parse_for_else() {
        let stmt = parse("{% for x in items %}{{ x }}{% else %}none{% endfor %}", "t").unwrap();
        match stmt {
            ast::Stmt::Template(t) => match &t.children[0] {
                ast::Stmt::ForLoop(f) => {
                    assert!(!f.recursive);
                    assert_eq!(f.else_body.len(), 1);
                }
                _ => panic!("expected for loop"),
            },
            _ => panic!("expected template"),
        }
    }

    #[test]
    fn test_parse_macro_collectors() {
        let stmt = parse(
            "{% macro g(a, b='B', *rest, **kw) %}x{% endmacro %}",
            "t",
        )
        .unwrap();
        match stmt {
            ast::Stmt::Template(t) => match &t.children[0] {
                ast::Stmt::Macro(m) => {
                    assert_eq!(m.args, vec!["a".to_string(), "b".to_string()]);
                    assert_eq!(m.defaults.len(), 1);
                    assert_eq!(m.varargs.as_deref(), Some("rest"));
                    assert_eq!(m.varkwargs.as_deref(), Some("kw"));
                }
                _ => panic!("expected macro"),
            },
            _ => panic!("expected template"),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("{% if x %}", "t").is_err());
        assert!(parse("{{ }", "t").is_err());
        assert!(parse("{% break %}", "t").is_err());
        assert!(parse("{% for a in b %}{% break %}{% endfor %}", "t").is_ok());
    }

    #[test]
    fn test_parse_trans() {
        let stmt = parse(
            "{% trans count=n %}{{ count }} item{% pluralize %}{{ count }} items{% endtrans %}",
            "t",
        )
        .unwrap();
        match stmt {
            ast::Stmt::Template(t) => match &t.children[0] {
                ast::Stmt::Trans(tr) => {
                    assert_eq!(tr.assignments.len(), 1);
                    assert!(tr.plural.is_some());
                }
                _ => panic!("expected trans"),
            },
            _ => panic!("expected template"),
        }
    }
}
