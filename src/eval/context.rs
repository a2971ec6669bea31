use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::eval::loop_object::LoopState;
use crate::value::{Namespace, Value, ValueMap};

/// Upper bound for scope nesting independent of any sandbox policy.  This
/// protects the native stack of the tree walker.
const MAX_DEPTH: usize = 500;

type Locals = BTreeMap<String, Value>;

pub(crate) struct Frame {
    pub(crate) locals: Locals,
    /// The base context value of this frame.  Lookups that miss the locals
    /// fall through to attributes of this value.
    pub(crate) base: Option<Value>,
    pub(crate) current_loop: Option<LoopState>,

    // Normally a frame does not carry a closure, but it does once a macro is
    // declared in it.  From then on all writes to the frame's locals are
    // duplicated into the closure so that sibling macros and the macro itself
    // can observe each other.  This emulates the behavior of closures in
    // Jinja2.
    pub(crate) closure: Option<Arc<Namespace>>,
}

impl Default for Frame {
    fn default() -> Frame {
        Frame::new(None)
    }
}

impl Frame {
    pub fn new(base: Option<Value>) -> Frame {
        Frame {
            locals: Locals::new(),
            base,
            current_loop: None,
            closure: None,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_map();
        m.entries(self.locals.iter());
        if let Some(ref base) = self.base {
            m.entry(&"<base>", base);
        }
        m.finish()
    }
}

/// The scope stack of one render.
pub(crate) struct Context {
    stack: Vec<Frame>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stack.iter()).finish()
    }
}

impl Context {
    /// Creates a context with a root frame over the given base value.
    pub fn new(base: Value) -> Context {
        Context {
            stack: vec![Frame::new(if base.is_undefined() {
                None
            } else {
                Some(base)
            })],
        }
    }

    /// Stores a variable in the innermost frame.
    pub fn store(&mut self, key: &str, value: Value) {
        let top = self.stack.last_mut().unwrap();
        if let Some(ref closure) = top.closure {
            closure.set(key, value.clone());
        }
        top.locals.insert(key.to_string(), value);
    }

    /// Looks up a variable innermost-out.
    pub fn load(&self, key: &str) -> Option<Value> {
        for frame in self.stack.iter().rev() {
            // look at locals first
            if let Some(value) = frame.locals.get(key) {
                return Some(value.clone());
            }

            // if we are a loop, check if we are looking up the special loop var
            if let Some(ref l) = frame.current_loop {
                if key == "loop" {
                    return Some(Value::from_dyn_object(l.object.clone()));
                }
            }

            if let Some(ref base) = frame.base {
                if let Some(rv) = base.get_attr(key) {
                    return Some(rv);
                }
            }
        }
        None
    }

    /// Pushes a new frame.
    pub fn push_frame(&mut self, frame: Frame) -> Result<(), Error> {
        if self.stack.len() >= MAX_DEPTH {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                "recursion limit exceeded",
            ));
        }
        self.stack.push(frame);
        Ok(())
    }

    /// Pops the topmost frame.
    ///
    /// Callers maintain balance on every exit path, including errors.
    #[track_caller]
    pub fn pop_frame(&mut self) -> Frame {
        self.stack.pop().unwrap()
    }

    /// Returns the locals of the root frame, which double as the exports of
    /// an imported module.
    pub fn exports(&self) -> &Locals {
        &self.stack.first().unwrap().locals
    }

    /// Returns the innermost loop state.
    pub fn current_loop(&mut self) -> Option<&LoopState> {
        self.stack
            .iter()
            .rev()
            .filter_map(|x| x.current_loop.as_ref())
            .next()
    }

    /// Ensures the innermost frame carries a closure and returns it.
    ///
    /// On creation the closure is seeded with a snapshot of everything
    /// currently visible so that a declared macro sees its surroundings.
    pub fn closure(&mut self) -> Arc<Namespace> {
        if self.stack.last().unwrap().closure.is_none() {
            let snapshot = self.flatten();
            let closure = Arc::new(Namespace::from_map(snapshot));
            self.stack.last_mut().unwrap().closure = Some(closure);
        }
        self.stack.last().unwrap().closure.as_ref().unwrap().clone()
    }

    /// Flattens all visible variables into a single map, outer frames first
    /// so that inner definitions win.
    pub fn flatten(&self) -> ValueMap {
        let mut rv = ValueMap::new();
        for frame in self.stack.iter() {
            if let Some(ref base) = frame.base {
                if let Some(items) = base.map_items() {
                    for (key, value) in items {
                        if let Ok(key) = crate::value::Key::try_from(key) {
                            rv.insert(key, value);
                        }
                    }
                }
            }
            for (key, value) in frame.locals.iter() {
                rv.insert(crate::value::Key::from(key.as_str()), value.clone());
            }
        }
        rv
    }

    /// The current stack depth.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_scope_shadowing() {
        let mut ctx = Context::new(Value::UNDEFINED);
        ctx.store("a", Value::from(1));
        ctx.push_frame(Frame::default()).unwrap();
        ctx.store("a", Value::from(2));
        assert_eq!(ctx.load("a"), Some(Value::from(2)));
        ctx.pop_frame();
        assert_eq!(ctx.load("a"), Some(Value::from(1)));
    }

    #[test]
    fn test_base_lookup() {
        let ctx = Context::new(crate::context! { name => "Peter" });
        assert_eq!(ctx.load("name"), Some(Value::from("Peter")));
        assert_eq!(ctx.load("missing"), None);
    }
}
