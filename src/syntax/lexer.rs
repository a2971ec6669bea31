use crate::error::{Error, ErrorKind};
use crate::syntax::tokens::{Span, Token};
use crate::utils::{memchr, memstr, unescape};

enum LexerState {
    Template,
    InVariable,
    InBlock,
}

/// Utility enum that defines a marker.
#[derive(Debug, Copy, Clone)]
enum StartMarker {
    Variable,
    Block,
    Comment,
}

fn find_start_marker(a: &str) -> Option<(usize, bool)> {
    let bytes = a.as_bytes();
    let mut offset = 0;
    loop {
        let idx = match memchr(&bytes[offset..], b'{') {
            Some(idx) => idx,
            None => return None,
        };
        if let Some(b'{' | b'%' | b'#') = bytes.get(offset + idx + 1).copied() {
            return Some((
                offset + idx,
                bytes.get(offset + idx + 2).copied() == Some(b'-'),
            ));
        }
        offset += idx + 1;
    }
}

fn match_start_marker(rest: &str) -> Option<(StartMarker, usize)> {
    match rest.get(..2) {
        Some("{{") => Some((StartMarker::Variable, 2)),
        Some("{%") => Some((StartMarker::Block, 2)),
        Some("{#") => Some((StartMarker::Comment, 2)),
        _ => None,
    }
}

fn lex_identifier(s: &str) -> usize {
    s.as_bytes()
        .iter()
        .enumerate()
        .take_while(|&(idx, &c)| {
            if c == b'_' {
                true
            } else if idx == 0 {
                c.is_ascii_alphabetic()
            } else {
                c.is_ascii_alphanumeric()
            }
        })
        .count()
}

/// Matches a tag like `{% raw %}` without fully tokenizing it.
fn skip_basic_tag(block_str: &str, name: &str, block_end: &str) -> Option<(usize, bool)> {
    let mut ptr = block_str;
    let mut trim = false;

    if let Some(rest) = ptr.strip_prefix('-') {
        ptr = rest;
    }
    while let Some(rest) = ptr.strip_prefix(|x: char| x.is_ascii_whitespace()) {
        ptr = rest;
    }

    ptr = match ptr.strip_prefix(name) {
        Some(ptr) => ptr,
        None => return None,
    };

    while let Some(rest) = ptr.strip_prefix(|x: char| x.is_ascii_whitespace()) {
        ptr = rest;
    }
    if let Some(rest) = ptr.strip_prefix('-') {
        ptr = rest;
        trim = true;
    }
    ptr = match ptr.strip_prefix(block_end) {
        Some(ptr) => ptr,
        None => return None,
    };

    Some((block_str.len() - ptr.len(), trim))
}

/// Tokenizes template source into a stream of tokens with spans.
pub struct Tokenizer<'s> {
    rest: &'s str,
    stack: Vec<LexerState>,
    failed: bool,
    current_line: u32,
    current_col: u32,
    current_offset: u32,
    trim_leading_whitespace: bool,
}

impl<'s> Tokenizer<'s> {
    /// Creates a tokenizer over a source string.
    ///
    /// When `in_expr` is set the tokenizer starts out inside an expression
    /// rather than in template context.
    pub fn new(input: &'s str, in_expr: bool) -> Tokenizer<'s> {
        Tokenizer {
            rest: input,
            stack: vec![if in_expr {
                LexerState::InVariable
            } else {
                LexerState::Template
            }],
            failed: false,
            current_line: 1,
            current_col: 0,
            current_offset: 0,
            trim_leading_whitespace: false,
        }
    }

    fn advance(&mut self, bytes: usize) -> &'s str {
        let (skipped, new_rest) = self.rest.split_at(bytes);
        for c in skipped.chars() {
            match c {
                '\n' => {
                    self.current_line += 1;
                    self.current_col = 0;
                }
                _ => self.current_col += 1,
            }
        }
        self.current_offset += bytes as u32;
        self.rest = new_rest;
        skipped
    }

    #[inline(always)]
    fn loc(&self) -> (u32, u32, u32) {
        (self.current_line, self.current_col, self.current_offset)
    }

    fn span(&self, start: (u32, u32, u32)) -> Span {
        let (start_line, start_col, start_offset) = start;
        Span {
            start_line,
            start_col,
            start_offset,
            end_line: self.current_line,
            end_col: self.current_col,
            end_offset: self.current_offset,
        }
    }

    fn syntax_error(&mut self, msg: &'static str) -> Error {
        self.failed = true;
        Error::new(ErrorKind::SyntaxError, msg)
    }

    fn eat_number(&mut self) -> Result<(Token, Span), Error> {
        #[derive(Copy, Clone)]
        enum State {
            Integer,      // 123
            Fraction,     // .123
            Exponent,     // E | e
            ExponentSign, // +|-
        }

        let old_loc = self.loc();
        let mut state = State::Integer;
        let mut num_len = self
            .rest
            .as_bytes()
            .iter()
            .take_while(|&c| c.is_ascii_digit())
            .count();
        for c in self.rest.as_bytes()[num_len..].iter().copied() {
            state = match (c, state) {
                (b'.', State::Integer) => State::Fraction,
                (b'E' | b'e', State::Integer | State::Fraction) => State::Exponent,
                (b'+' | b'-', State::Exponent) => State::ExponentSign,
                (b'0'..=b'9', State::Exponent) => State::ExponentSign,
                (b'0'..=b'9', state) => state,
                _ => break,
            };
            num_len += 1;
        }
        let is_float = !matches!(state, State::Integer);

        let num = self.advance(num_len);
        Ok((
            ok!(if is_float {
                num.parse()
                    .map(Token::Float)
                    .map_err(|_| self.syntax_error("invalid float"))
            } else {
                num.parse()
                    .map(Token::Int)
                    .map_err(|_| self.syntax_error("invalid integer"))
            }),
            self.span(old_loc),
        ))
    }

    fn eat_identifier(&mut self) -> Result<(Token, Span), Error> {
        let ident_len = lex_identifier(self.rest);
        if ident_len > 0 {
            let old_loc = self.loc();
            let ident = self.advance(ident_len);
            Ok((Token::Ident(ident.to_string()), self.span(old_loc)))
        } else {
            Err(self.syntax_error("unexpected character"))
        }
    }

    fn eat_string(&mut self, delim: u8) -> Result<(Token, Span), Error> {
        let old_loc = self.loc();
        let mut escaped = false;
        let mut has_escapes = false;
        let str_len = self
            .rest
            .as_bytes()
            .iter()
            .skip(1)
            .take_while(|&&c| match (escaped, c) {
                (true, _) => {
                    escaped = false;
                    true
                }
                (_, b'\\') => {
                    escaped = true;
                    has_escapes = true;
                    true
                }
                (_, c) if c == delim => false,
                _ => true,
            })
            .count();
        if escaped || self.rest.as_bytes().get(str_len + 1) != Some(&delim) {
            return Err(self.syntax_error("unexpected end of string"));
        }
        let s = self.advance(str_len + 2);
        let contents = &s[1..s.len() - 1];
        if has_escapes {
            Ok((Token::Str(ok!(unescape(contents))), self.span(old_loc)))
        } else {
            Ok((Token::Str(contents.to_string()), self.span(old_loc)))
        }
    }

    fn skip_whitespace(&mut self) {
        let skip = self
            .rest
            .chars()
            .map_while(|c| c.is_whitespace().then(|| c.len_utf8()))
            .sum::<usize>();
        if skip > 0 {
            self.advance(skip);
        }
    }

    /// Produces the next token, or `None` at the end of input.
    pub fn next_token(&mut self) -> Result<Option<(Token, Span)>, Error> {
        loop {
            if self.rest.is_empty() || self.failed {
                return Ok(None);
            }

            let mut old_loc = self.loc();
            match self.stack.last() {
                Some(LexerState::Template) => {
                    match match_start_marker(self.rest) {
                        Some((StartMarker::Comment, skip)) => {
                            if let Some(end) = memstr(&self.rest.as_bytes()[skip..], b"#}") {
                                if self
                                    .rest
                                    .as_bytes()
                                    .get(end.saturating_sub(1) + skip)
                                    .copied()
                                    == Some(b'-')
                                {
                                    self.trim_leading_whitespace = true;
                                }
                                self.advance(end + skip + 2);
                                continue;
                            } else {
                                return Err(self.syntax_error("unexpected end of comment"));
                            }
                        }
                        Some((StartMarker::Variable, skip)) => {
                            if self.rest.as_bytes().get(skip) == Some(&b'-') {
                                self.advance(skip + 1);
                            } else {
                                self.advance(skip);
                            }
                            self.stack.push(LexerState::InVariable);
                            return Ok(Some((Token::VariableStart, self.span(old_loc))));
                        }
                        Some((StartMarker::Block, skip)) => {
                            // raw blocks are handled in the lexer.  If we are at the
                            // beginning of a raw block we skip everything until
                            // {% endraw %} ignoring interior syntax and emit the
                            // entire raw block as template data.
                            if let Some((raw, trim_start)) =
                                skip_basic_tag(&self.rest[skip..], "raw", "%}")
                            {
                                self.advance(raw + skip);
                                let mut ptr = 0;
                                while let Some(block) =
                                    memstr(&self.rest.as_bytes()[ptr..], b"{%")
                                {
                                    ptr += block + 2;
                                    let trim_end = self.rest.as_bytes().get(ptr) == Some(&b'-');
                                    if let Some((endraw, trim_next)) =
                                        skip_basic_tag(&self.rest[ptr..], "endraw", "%}")
                                    {
                                        let mut result = &self.rest[..ptr - 2];
                                        if trim_start {
                                            result = result.trim_start();
                                        }
                                        if trim_end {
                                            result = result.trim_end();
                                        }
                                        let result = result.to_string();
                                        self.advance(ptr + endraw);
                                        self.trim_leading_whitespace = trim_next;
                                        return Ok(Some((
                                            Token::TemplateData(result),
                                            self.span(old_loc),
                                        )));
                                    }
                                }
                                return Err(self.syntax_error("unexpected end of raw block"));
                            }

                            if self.rest.as_bytes().get(skip) == Some(&b'-') {
                                self.advance(skip + 1);
                            } else {
                                self.advance(skip);
                            }

                            self.stack.push(LexerState::InBlock);
                            return Ok(Some((Token::BlockStart, self.span(old_loc))));
                        }
                        None => {}
                    }

                    if self.trim_leading_whitespace {
                        self.trim_leading_whitespace = false;
                        self.skip_whitespace();
                    }
                    old_loc = self.loc();

                    let (lead, span) = match find_start_marker(self.rest) {
                        Some((start, false)) => {
                            (self.advance(start).to_string(), self.span(old_loc))
                        }
                        Some((start, _)) => {
                            let peeked = &self.rest[..start];
                            let trimmed = peeked.trim_end();
                            let trimmed_len = trimmed.len();
                            let peeked_len = peeked.len();
                            let lead = self.advance(trimmed_len).to_string();
                            let span = self.span(old_loc);
                            self.advance(peeked_len - trimmed_len);
                            (lead, span)
                        }
                        None => {
                            let rest_len = self.rest.len();
                            (self.advance(rest_len).to_string(), self.span(old_loc))
                        }
                    };
                    if lead.is_empty() {
                        continue;
                    }
                    return Ok(Some((Token::TemplateData(lead), span)));
                }
                Some(LexerState::InBlock | LexerState::InVariable) => {
                    // in blocks whitespace is generally ignored, skip it.
                    match self
                        .rest
                        .as_bytes()
                        .iter()
                        .position(|&x| !x.is_ascii_whitespace())
                    {
                        Some(0) => {}
                        None => {
                            let rest_len = self.rest.len();
                            self.advance(rest_len);
                            continue;
                        }
                        Some(offset) => {
                            self.advance(offset);
                            continue;
                        }
                    }

                    // look out for the end of blocks
                    if let Some(&LexerState::InBlock) = self.stack.last() {
                        if self.rest.get(..3) == Some("-%}") {
                            self.stack.pop();
                            self.trim_leading_whitespace = true;
                            self.advance(3);
                            return Ok(Some((Token::BlockEnd, self.span(old_loc))));
                        }
                        if self.rest.get(..2) == Some("%}") {
                            self.stack.pop();
                            self.advance(2);
                            return Ok(Some((Token::BlockEnd, self.span(old_loc))));
                        }
                    } else {
                        if self.rest.get(..3) == Some("-}}") {
                            self.stack.pop();
                            self.advance(3);
                            self.trim_leading_whitespace = true;
                            return Ok(Some((Token::VariableEnd, self.span(old_loc))));
                        }
                        if self.rest.get(..2) == Some("}}") {
                            self.stack.pop();
                            self.advance(2);
                            return Ok(Some((Token::VariableEnd, self.span(old_loc))));
                        }
                    }

                    // two character operators
                    let op = match self.rest.as_bytes().get(..2) {
                        Some(b"//") => Some(Token::FloorDiv),
                        Some(b"**") => Some(Token::Pow),
                        Some(b"==") => Some(Token::Eq),
                        Some(b"!=") => Some(Token::Ne),
                        Some(b">=") => Some(Token::Gte),
                        Some(b"<=") => Some(Token::Lte),
                        _ => None,
                    };
                    if let Some(op) = op {
                        self.advance(2);
                        return Ok(Some((op, self.span(old_loc))));
                    }

                    // single character operators (and strings)
                    let op = match self.rest.as_bytes().first() {
                        Some(b'+') => Some(Token::Plus),
                        Some(b'-') => Some(Token::Minus),
                        Some(b'*') => Some(Token::Mul),
                        Some(b'/') => Some(Token::Div),
                        Some(b'%') => Some(Token::Mod),
                        Some(b'!') => Some(Token::Bang),
                        Some(b'.') => Some(Token::Dot),
                        Some(b',') => Some(Token::Comma),
                        Some(b':') => Some(Token::Colon),
                        Some(b'~') => Some(Token::Tilde),
                        Some(b'|') => Some(Token::Pipe),
                        Some(b'=') => Some(Token::Assign),
                        Some(b'>') => Some(Token::Gt),
                        Some(b'<') => Some(Token::Lt),
                        Some(b'(') => Some(Token::ParenOpen),
                        Some(b')') => Some(Token::ParenClose),
                        Some(b'[') => Some(Token::BracketOpen),
                        Some(b']') => Some(Token::BracketClose),
                        Some(b'{') => Some(Token::BraceOpen),
                        Some(b'}') => Some(Token::BraceClose),
                        Some(b'\'') => {
                            return self.eat_string(b'\'').map(Some);
                        }
                        Some(b'"') => {
                            return self.eat_string(b'"').map(Some);
                        }
                        Some(c) if c.is_ascii_digit() => return self.eat_number().map(Some),
                        _ => None,
                    };
                    if let Some(op) = op {
                        self.advance(1);
                        return Ok(Some((op, self.span(old_loc))));
                    }

                    return self.eat_identifier().map(Some);
                }
                None => unreachable!("empty lexer state"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    fn collect(source: &str) -> Vec<Token> {
        let mut tokenizer = Tokenizer::new(source, false);
        let mut rv = Vec::new();
        while let Some((token, _)) = tokenizer.next_token().unwrap() {
            rv.push(token);
        }
        rv
    }

    #[test]
    fn test_find_marker() {
        assert!(find_start_marker("{").is_none());
        assert!(find_start_marker("foo").is_none());
        assert!(find_start_marker("foo {").is_none());
        assert_eq!(find_start_marker("foo {{"), Some((4, false)));
        assert_eq!(find_start_marker("foo {{-"), Some((4, true)));
    }

    #[test]
    fn test_is_basic_tag() {
        assert_eq!(skip_basic_tag(" raw %}", "raw", "%}"), Some((7, false)));
        assert_eq!(skip_basic_tag(" raw %}", "endraw", "%}"), None);
        assert_eq!(skip_basic_tag("  raw  %}", "raw", "%}"), Some((9, false)));
        assert_eq!(skip_basic_tag("-  raw  -%}", "raw", "%}"), Some((11, true)));
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            collect("a {{ b }} c"),
            vec![
                Token::TemplateData("a ".into()),
                Token::VariableStart,
                Token::Ident("b".into()),
                Token::VariableEnd,
                Token::TemplateData(" c".into()),
            ]
        );
    }

    #[test]
    fn test_whitespace_control() {
        assert_eq!(
            collect("a   {{- b -}}   c"),
            vec![
                Token::TemplateData("a".into()),
                Token::VariableStart,
                Token::Ident("b".into()),
                Token::VariableEnd,
                Token::TemplateData("c".into()),
            ]
        );
    }

    #[test]
    fn test_raw_block() {
        assert_eq!(
            collect("{% raw %}{{ not evaluated }}{% endraw %}"),
            vec![Token::TemplateData("{{ not evaluated }}".into())]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            collect(r#"{{ "a\nb" }}"#),
            vec![
                Token::VariableStart,
                Token::Str("a\nb".into()),
                Token::VariableEnd,
            ]
        );
    }
}
