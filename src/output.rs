use std::fmt;

use crate::utils::AutoEscape;
use crate::value::Value;

/// An abstraction over [`Write`](std::fmt::Write) for the rendering.
///
/// This is a utility type used in the engine which can be written into like
/// one can write into an [`std::fmt::Write`] value.  It keeps a stack of
/// capture buffers so that block capture (`{% filter %}`, `{% set x %}...`,
/// macro bodies, `{% spaceless %}`) can temporarily redirect all writes and
/// read back the produced text.
///
/// The output counts every byte that passes through it, including captured
/// bytes; the sandbox checks that counter against its output budget.
pub struct Output<'a> {
    w: &'a mut (dyn fmt::Write + 'a),
    capture_stack: Vec<String>,
    bytes_written: usize,
}

impl<'a> Output<'a> {
    /// Creates an output writing to a string.
    pub(crate) fn with_string(buf: &'a mut String) -> Self {
        Self {
            w: buf,
            capture_stack: Vec::new(),
            bytes_written: 0,
        }
    }

    /// Creates an output writing to an arbitrary writer.
    pub(crate) fn with_write(w: &'a mut (dyn fmt::Write + 'a)) -> Self {
        Self {
            w,
            capture_stack: Vec::new(),
            bytes_written: 0,
        }
    }

    /// Begins capturing into a string.
    pub(crate) fn begin_capture(&mut self) {
        self.capture_stack.push(String::new());
    }

    /// Ends capturing and returns the captured text.
    #[track_caller]
    pub(crate) fn end_capture_str(&mut self) -> String {
        self.capture_stack.pop().unwrap()
    }

    /// Ends capturing and returns the captured string as value.
    ///
    /// When autoescaping is active the captured text has already been
    /// escaped on the way in and must not be escaped again, so it comes
    /// back marked safe.
    pub(crate) fn end_capture(&mut self, auto_escape: AutoEscape) -> Value {
        let captured = self.end_capture_str();
        if !matches!(auto_escape, AutoEscape::None) {
            Value::from_safe_string(captured)
        } else {
            Value::from(captured)
        }
    }

    fn target(&mut self) -> &mut dyn fmt::Write {
        match self.capture_stack.last_mut() {
            Some(stream) => stream as _,
            None => self.w,
        }
    }

    /// Total bytes written through this output so far.
    pub(crate) fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Writes some data to the underlying buffer contained within this output.
    #[inline]
    pub fn write_str(&mut self, s: &str) -> fmt::Result {
        self.bytes_written += s.len();
        self.target().write_str(s)
    }

    /// Writes some formatted information into this instance.
    #[inline]
    pub fn write_fmt(&mut self, a: fmt::Arguments<'_>) -> fmt::Result {
        fmt::Write::write_fmt(self, a)
    }
}

impl fmt::Write for Output<'_> {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Output::write_str(self, s)
    }

    #[inline]
    fn write_char(&mut self, c: char) -> fmt::Result {
        self.bytes_written += c.len_utf8();
        self.target().write_char(c)
    }
}
