use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, ErrorKind};
use crate::eval::State;
use crate::syntax::ast;
use crate::utils::AutoEscape;
use crate::value::{Object, Value, ValueMap};

pub(crate) struct LoopState {
    pub object: Arc<Loop>,
}

/// Everything a `{% for ... recursive %}` loop needs to re-enter its body
/// when `loop(iterable)` is called.
#[derive(Clone)]
pub(crate) struct RecursiveCtx {
    pub target: ast::Expr,
    pub body: Vec<ast::Stmt>,
    pub closure_vars: ValueMap,
    pub template_name: Arc<str>,
    pub auto_escape: AutoEscape,
}

/// The `loop` variable of the innermost `for` loop.
pub(crate) struct Loop {
    pub len: usize,
    pub idx: AtomicUsize,
    pub depth: usize,
    pub last_changed_value: Mutex<Option<Vec<Value>>>,
    pub adjacent: Mutex<(Value, Value)>,
    pub recursive: Option<RecursiveCtx>,
}

impl Loop {
    pub fn new(len: usize, depth: usize, recursive: Option<RecursiveCtx>) -> Loop {
        Loop {
            len,
            idx: AtomicUsize::new(0),
            depth,
            last_changed_value: Mutex::new(None),
            adjacent: Mutex::new((Value::UNDEFINED, Value::UNDEFINED)),
            recursive,
        }
    }

    pub fn set_iteration(&self, idx: usize, previtem: Value, nextitem: Value) {
        self.idx.store(idx, Ordering::Relaxed);
        *self.adjacent.lock().unwrap() = (previtem, nextitem);
    }
}

impl fmt::Debug for Loop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Loop");
        for attr in self.attributes() {
            s.field(attr, &self.get_attr(attr).unwrap_or(Value::UNDEFINED));
        }
        s.finish()
    }
}

impl fmt::Display for Loop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<loop {}/{}>",
            self.idx.load(Ordering::Relaxed),
            self.len
        )
    }
}

impl Object for Loop {
    fn attributes(&self) -> &[&str] {
        &[
            "index0", "index", "length", "revindex", "revindex0", "first", "last", "previtem",
            "nextitem", "depth", "depth0",
        ]
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        let idx = self.idx.load(Ordering::Relaxed) as u64;
        let len = self.len as u64;
        match name {
            "index0" => Some(Value::from(idx)),
            "index" => Some(Value::from(idx + 1)),
            "length" => Some(Value::from(len)),
            "revindex" => Some(Value::from(len.saturating_sub(idx))),
            "revindex0" => Some(Value::from(len.saturating_sub(idx).saturating_sub(1))),
            "first" => Some(Value::from(idx == 0)),
            "last" => Some(Value::from(len == 0 || idx == len - 1)),
            "previtem" => Some(self.adjacent.lock().unwrap().0.clone()),
            "nextitem" => Some(self.adjacent.lock().unwrap().1.clone()),
            "depth" => Some(Value::from(self.depth + 1)),
            "depth0" => Some(Value::from(self.depth)),
            _ => None,
        }
    }

    fn call(&self, state: &State, args: &[Value]) -> Result<Value, Error> {
        match self.recursive {
            Some(ref ctx) => {
                if args.len() != 1 {
                    return Err(Error::new(
                        ErrorKind::InvalidOperation,
                        "a recursive loop takes exactly one iterable argument",
                    ));
                }
                crate::eval::recurse_loop(state, ctx, self.depth + 1, &args[0])
            }
            None => Err(Error::new(
                ErrorKind::InvalidOperation,
                "loop is not recursive and cannot be called",
            )),
        }
    }

    fn call_method(&self, _state: &State, name: &str, args: &[Value]) -> Result<Value, Error> {
        if name == "changed" {
            let mut last_changed_value = self.last_changed_value.lock().unwrap();
            let value = args.to_owned();
            let changed = last_changed_value.as_ref() != Some(&value);
            if changed {
                *last_changed_value = Some(value);
                Ok(Value::from(true))
            } else {
                Ok(Value::from(false))
            }
        } else if name == "cycle" {
            if args.is_empty() {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    "loop.cycle requires at least one value",
                ));
            }
            let idx = self.idx.load(Ordering::Relaxed);
            match args.get(idx % args.len()) {
                Some(arg) => Ok(arg.clone()),
                None => Ok(Value::UNDEFINED),
            }
        } else {
            Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("loop object has no method named {name}"),
            ))
        }
    }
}
