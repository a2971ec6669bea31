//! Streaming rendering.
//!
//! [`TemplateStream`] is a producer/consumer channel of rendered fragments.
//! Rendering runs on a producer thread that pushes fragments into a bounded
//! channel as the evaluator writes them; when the consumer is slow the
//! producer blocks on the channel send.  Dropping the stream cancels the
//! producer cooperatively: its next write fails and the render unwinds.

use std::fmt;
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;

use crate::environment::Environment;
use crate::error::Error;
use crate::eval;
use crate::output::Output;
use crate::template::CompiledTemplate;
use crate::value::Value;

/// Upper bound of fragments buffered between producer and consumer.
const CHANNEL_CAPACITY: usize = 32;

/// Fragment size the producer aims for before sending.
const CHUNK_SIZE: usize = 8 * 1024;

type Fragment = Result<String, Error>;

/// A lazy stream of rendered template fragments.
///
/// Consume it with [`next`](TemplateStream::next) (or the [`Iterator`]
/// implementation), [`collect_string`](TemplateStream::collect_string) or
/// [`write_to`](TemplateStream::write_to).  A render failure is delivered
/// as the next fragment after the already produced ones; output delivered
/// before the failure is not rolled back.
pub struct TemplateStream {
    rx: Receiver<Fragment>,
    tail: String,
    keep_trailing_newline: bool,
    pending_error: Option<Error>,
    done: bool,
}

impl TemplateStream {
    pub(crate) fn spawn(
        env: Environment,
        compiled: Arc<CompiledTemplate>,
        root: Value,
    ) -> TemplateStream {
        let (tx, rx) = std::sync::mpsc::sync_channel(CHANNEL_CAPACITY);
        let keep_trailing_newline = env.keep_trailing_newline();
        std::thread::spawn(move || {
            let mut writer = ChannelWriter {
                tx,
                buf: String::new(),
            };
            let result = {
                let mut out = Output::with_write(&mut writer);
                eval::render_main(&env, compiled, root, &mut out)
            };
            let ChannelWriter { tx, buf } = writer;
            if !buf.is_empty() {
                let _ = tx.send(Ok(buf));
            }
            if let Err(err) = result {
                let _ = tx.send(Err(err));
            }
            // dropping the sender closes the stream
        });
        TemplateStream {
            rx,
            tail: String::new(),
            keep_trailing_newline,
            pending_error: None,
            done: false,
        }
    }

    /// Returns the next fragment, or `None` once the stream is exhausted.
    pub fn next(&mut self) -> Option<Fragment> {
        loop {
            if let Some(err) = self.pending_error.take() {
                self.done = true;
                return Some(Err(err));
            }
            if self.done {
                return None;
            }
            match self.rx.recv() {
                Ok(Ok(chunk)) => {
                    if self.keep_trailing_newline {
                        if chunk.is_empty() {
                            continue;
                        }
                        return Some(Ok(chunk));
                    }
                    // hold back the bytes that could form the final trailing
                    // newline; they are resolved at end of stream
                    let mut buf = std::mem::take(&mut self.tail);
                    buf.push_str(&chunk);
                    let holdback = newline_suffix_len(&buf);
                    self.tail = buf.split_off(buf.len() - holdback);
                    if buf.is_empty() {
                        continue;
                    }
                    return Some(Ok(buf));
                }
                Ok(Err(err)) => {
                    // a render failure does not complete the output, so the
                    // held back bytes are real output and flush first
                    if self.tail.is_empty() {
                        self.done = true;
                        return Some(Err(err));
                    }
                    self.pending_error = Some(err);
                    return Some(Ok(std::mem::take(&mut self.tail)));
                }
                Err(_) => {
                    self.done = true;
                    let tail = std::mem::take(&mut self.tail);
                    if tail.is_empty() || tail == "\n" || tail == "\r\n" {
                        return None;
                    }
                    return Some(Ok(tail));
                }
            }
        }
    }

    /// Collects the whole stream into a string.
    pub fn collect_string(mut self) -> Result<String, Error> {
        let mut rv = String::new();
        while let Some(fragment) = self.next() {
            rv.push_str(&ok!(fragment));
        }
        Ok(rv)
    }

    /// Writes the whole stream into a writer.
    pub fn write_to<W: fmt::Write>(mut self, w: &mut W) -> Result<(), Error> {
        while let Some(fragment) = self.next() {
            ok!(w.write_str(&ok!(fragment)).map_err(Error::from));
        }
        Ok(())
    }
}

impl Iterator for TemplateStream {
    type Item = Fragment;

    fn next(&mut self) -> Option<Fragment> {
        TemplateStream::next(self)
    }
}

/// Length of the suffix that could still become the final trailing newline.
fn newline_suffix_len(buf: &str) -> usize {
    if buf.ends_with("\r\n") {
        2
    } else if buf.ends_with('\n') || buf.ends_with('\r') {
        1
    } else {
        0
    }
}

struct ChannelWriter {
    tx: SyncSender<Fragment>,
    buf: String,
}

impl fmt::Write for ChannelWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buf.push_str(s);
        if self.buf.len() >= CHUNK_SIZE {
            let chunk = std::mem::take(&mut self.buf);
            // a dropped receiver cancels the render
            self.tx.send(Ok(chunk)).map_err(|_| fmt::Error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_newline_suffix() {
        assert_eq!(newline_suffix_len("abc"), 0);
        assert_eq!(newline_suffix_len("abc\n"), 1);
        assert_eq!(newline_suffix_len("abc\r\n"), 2);
        assert_eq!(newline_suffix_len("abc\r"), 1);
    }
}
