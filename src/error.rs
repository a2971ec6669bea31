use std::borrow::Cow;
use std::fmt;

use crate::sandbox::Violation;
use crate::syntax::tokens::Span;

/// Represents template errors.
///
/// Errors carry a kind, an optional detail message, the name of the template
/// and the span the error originated from as well as an optional source
/// error for chained failures (imports, includes, filter internals).
pub struct Error {
    repr: Box<ErrorRepr>,
}

struct ErrorRepr {
    kind: ErrorKind,
    detail: Option<Cow<'static, str>>,
    name: Option<String>,
    span: Option<Span>,
    violation: Option<Violation>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind()
    }
}

/// An enum describing the error kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A generic invalid operation (unknown operator, type mismatch, ...).
    InvalidOperation,
    /// The template has a syntax error.
    SyntaxError,
    /// A variable, attribute or item is undefined.
    UndefinedError,
    /// A filter with this name does not exist.
    UnknownFilter,
    /// A test with this name does not exist.
    UnknownTest,
    /// A filter failed while being applied.
    FilterError,
    /// A test failed while being performed.
    TestError,
    /// An assignment target is invalid or incompatible.
    InvalidAssignment,
    /// Macro argument binding or recursion failed.
    MacroError,
    /// A template could not be loaded during import.
    ImportError,
    /// A template does not exist.
    TemplateNotFound,
    /// None of a list of templates exists.
    TemplatesNotFound,
    /// A string contains an invalid escape sequence.
    BadEscape,
    /// A value could not be serialized into the internal format.
    BadSerialization,
    /// The sandbox policy denied an operation.
    SecurityError,
    /// The render exceeded the policy's execution deadline.
    ExecutionTimeout,
    /// The render exceeded the policy's memory budget.
    MemoryLimitExceeded,
    /// The render produced more output than the policy allows.
    OutputLimitExceeded,
    /// The render nested deeper than the policy allows.
    RecursionLimitExceeded,
}

impl ErrorKind {
    fn description(self) -> &'static str {
        match self {
            ErrorKind::InvalidOperation => "invalid operation",
            ErrorKind::SyntaxError => "syntax error",
            ErrorKind::UndefinedError => "undefined value",
            ErrorKind::UnknownFilter => "unknown filter",
            ErrorKind::UnknownTest => "unknown test",
            ErrorKind::FilterError => "filter error",
            ErrorKind::TestError => "test error",
            ErrorKind::InvalidAssignment => "invalid assignment",
            ErrorKind::MacroError => "macro error",
            ErrorKind::ImportError => "import error",
            ErrorKind::TemplateNotFound => "template not found",
            ErrorKind::TemplatesNotFound => "templates not found",
            ErrorKind::BadEscape => "bad string escape",
            ErrorKind::BadSerialization => "could not serialize to value",
            ErrorKind::SecurityError => "security policy violation",
            ErrorKind::ExecutionTimeout => "execution timed out",
            ErrorKind::MemoryLimitExceeded => "memory limit exceeded",
            ErrorKind::OutputLimitExceeded => "output limit exceeded",
            ErrorKind::RecursionLimitExceeded => "recursion limit exceeded",
        }
    }

    /// True if this kind is one of the sandbox error kinds.
    pub fn is_security(self) -> bool {
        matches!(
            self,
            ErrorKind::SecurityError
                | ErrorKind::ExecutionTimeout
                | ErrorKind::MemoryLimitExceeded
                | ErrorKind::OutputLimitExceeded
                | ErrorKind::RecursionLimitExceeded
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref detail) = self.repr.detail {
            ok!(write!(f, "{}: {}", self.kind(), detail));
        } else {
            ok!(write!(f, "{}", self.kind()));
        }
        if let Some(ref name) = self.repr.name {
            ok!(write!(f, " (in {}:{})", name, self.line().unwrap_or(0)));
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut err = f.debug_struct("Error");
        err.field("kind", &self.kind());
        if let Some(ref detail) = self.repr.detail {
            err.field("detail", detail);
        }
        if let Some(ref name) = self.repr.name {
            err.field("name", name);
        }
        if let Some(line) = self.line() {
            err.field("line", &line);
        }
        if let Some(ref source) = std::error::Error::source(self) {
            err.field("source", source);
        }
        err.finish()
    }
}

impl Error {
    /// Creates a new error with kind and detail.
    pub fn new<D: Into<Cow<'static, str>>>(kind: ErrorKind, detail: D) -> Error {
        Error {
            repr: Box::new(ErrorRepr {
                kind,
                detail: Some(detail.into()),
                name: None,
                span: None,
                violation: None,
                source: None,
            }),
        }
    }

    /// Creates an error for a template that was not found.
    pub(crate) fn new_not_found(name: &str) -> Error {
        Error::new(
            ErrorKind::TemplateNotFound,
            format!("template {name:?} does not exist"),
        )
    }

    pub(crate) fn set_filename_and_span(&mut self, filename: &str, span: Span) {
        self.repr.name = Some(filename.into());
        self.repr.span = Some(span);
    }

    pub(crate) fn if_unset_set_filename_and_span(&mut self, filename: &str, span: Span) {
        if self.repr.name.is_none() {
            self.set_filename_and_span(filename, span);
        }
    }

    /// Attaches another error as source to this error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.repr.source = Some(Box::new(source));
        self
    }

    /// Attaches a sandbox violation record to this error.
    pub(crate) fn with_violation(mut self, violation: Violation) -> Self {
        self.repr.violation = Some(violation);
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.repr.kind
    }

    /// Returns the detail message if available.
    pub fn detail(&self) -> Option<&str> {
        self.repr.detail.as_deref()
    }

    /// Returns the name of the template that caused the error.
    pub fn name(&self) -> Option<&str> {
        self.repr.name.as_deref()
    }

    /// Returns the line of the error if known.
    pub fn line(&self) -> Option<usize> {
        self.repr.span.map(|x| x.start_line as usize)
    }

    /// Returns the byte range of the error within the source if known.
    pub fn range(&self) -> Option<std::ops::Range<usize>> {
        self.repr
            .span
            .map(|x| x.start_offset as usize..x.end_offset as usize)
    }

    /// Returns the violation record attached to a sandbox error.
    pub fn violation(&self) -> Option<&Violation> {
        self.repr.violation.as_ref()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.repr.source.as_ref().map(|err| err.as_ref() as _)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            repr: Box::new(ErrorRepr {
                kind,
                detail: None,
                name: None,
                span: None,
                violation: None,
                source: None,
            }),
        }
    }
}

impl From<fmt::Error> for Error {
    fn from(_: fmt::Error) -> Self {
        Error::new(ErrorKind::InvalidOperation, "formatting failed")
    }
}

impl serde::ser::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: fmt::Display,
    {
        Error::new(ErrorKind::BadSerialization, msg.to_string())
    }
}
