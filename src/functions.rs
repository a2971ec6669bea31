//! Built-in global functions.
//!
//! Functions share the calling convention of every callable in the engine:
//! they receive the render [`State`] and the evaluated arguments, keyword
//! arguments arriving as a trailing kwargs map.  Custom functions are
//! registered with [`add_function`](crate::Environment::add_function).

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::eval::State;
use crate::value::{split_kwargs, Key, MapType, Namespace, Object, Value, ValueMap, ValueRepr};

const MAX_RANGE: i64 = 100_000;

/// Returns a list of numbers in a half-open range.
///
/// `range(stop)`, `range(start, stop)` or `range(start, stop, step)`.
pub fn range(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let (args, _) = split_kwargs(args);
    let (start, stop, step) = match args {
        [stop] => (0, ok!(stop.try_to_i64()), 1),
        [start, stop] => (ok!(start.try_to_i64()), ok!(stop.try_to_i64()), 1),
        [start, stop, step] => (
            ok!(start.try_to_i64()),
            ok!(stop.try_to_i64()),
            ok!(step.try_to_i64()),
        ),
        _ => {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                "range takes one to three arguments",
            ))
        }
    };
    if step == 0 {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "range step must not be zero",
        ));
    }
    let mut rv = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        rv.push(Value::from(current));
        if rv.len() as i64 > MAX_RANGE {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                "range has too many elements",
            ));
        }
        current += step;
    }
    Ok(Value::from(rv))
}

/// Creates a map from keyword arguments: `dict(a=1, b=2)`.
pub fn dict(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let (pos, kwargs) = split_kwargs(args);
    let mut rv = ValueMap::new();
    if let Some(first) = pos.first() {
        match first.map_items() {
            Some(items) => {
                for (key, value) in items {
                    rv.insert(ok!(Key::try_from(key)), value);
                }
            }
            None => {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    "dict argument must be a map",
                ))
            }
        }
    }
    if let Some(kwargs) = kwargs {
        for (key, value) in kwargs.iter() {
            rv.insert(key.clone(), value.clone());
        }
    }
    Ok(Value(ValueRepr::Map(Arc::new(rv), MapType::Normal)))
}

/// Creates a mutable namespace: `{% set ns = namespace(count=0) %}`.
pub fn namespace(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let (pos, kwargs) = split_kwargs(args);
    if !pos.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "namespace takes only keyword arguments",
        ));
    }
    let ns = match kwargs {
        Some(kwargs) => Namespace::from_map(kwargs.clone()),
        None => Namespace::new(),
    };
    Ok(Value(ValueRepr::Namespace(Arc::new(ns))))
}

/// A cycler created by the `cycler()` function.
///
/// `next()` returns the next value in the ring, `reset()` rewinds and the
/// `current` attribute peeks without advancing.
pub(crate) struct Cycler {
    items: Vec<Value>,
    pos: AtomicUsize,
}

impl fmt::Debug for Cycler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<cycler over {} items>", self.items.len())
    }
}

impl fmt::Display for Cycler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Object for Cycler {
    fn attributes(&self) -> &[&str] {
        &["current"]
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "current" => Some(
                self.items
                    .get(self.pos.load(Ordering::Relaxed) % self.items.len())
                    .cloned()
                    .unwrap_or(Value::UNDEFINED),
            ),
            _ => None,
        }
    }

    fn call_method(&self, _state: &State, name: &str, _args: &[Value]) -> Result<Value, Error> {
        match name {
            "next" => {
                let pos = self.pos.fetch_add(1, Ordering::Relaxed);
                Ok(self.items[pos % self.items.len()].clone())
            }
            "reset" => {
                self.pos.store(0, Ordering::Relaxed);
                Ok(Value::from(()))
            }
            other => Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("cycler has no method named {other}"),
            )),
        }
    }
}

/// Creates a cycler that endlessly cycles between the given values.
pub fn cycler(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let (items, _) = split_kwargs(args);
    if items.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "cycler requires at least one value",
        ));
    }
    Ok(Value::from_object(Cycler {
        items: items.to_vec(),
        pos: AtomicUsize::new(0),
    }))
}

/// A joiner created by the `joiner()` function.
///
/// The first call returns an empty string, every later call the separator.
/// Useful to join loop output without trailing separators.
pub(crate) struct Joiner {
    sep: String,
    used: AtomicUsize,
}

impl fmt::Debug for Joiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<joiner {:?}>", self.sep)
    }
}

impl fmt::Display for Joiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Object for Joiner {
    fn call(&self, _state: &State, _args: &[Value]) -> Result<Value, Error> {
        if self.used.fetch_add(1, Ordering::Relaxed) == 0 {
            Ok(Value::from(""))
        } else {
            Ok(Value::from(self.sep.as_str()))
        }
    }

    fn is_callable(&self) -> bool {
        true
    }
}

/// Creates a joiner with the given separator (default `", "`).
pub fn joiner(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let (pos, kwargs) = split_kwargs(args);
    let sep = pos
        .first()
        .cloned()
        .or_else(|| crate::value::get_kwarg(kwargs, "sep"))
        .map(|v| v.to_string())
        .unwrap_or_else(|| ", ".to_string());
    Ok(Value::from_object(Joiner {
        sep,
        used: AtomicUsize::new(0),
    }))
}

#[cfg(test)]
mod tests {
    use crate::context;
    use similar_asserts::assert_eq;

    fn apply(expr: &str) -> String {
        crate::Environment::new().render_str(expr, context! {}).unwrap()
    }

    #[test]
    fn test_range() {
        assert_eq!(apply("{{ range(3)|join(',') }}"), "0,1,2");
        assert_eq!(apply("{{ range(1, 4)|join(',') }}"), "1,2,3");
        assert_eq!(apply("{{ range(6, 0, -2)|join(',') }}"), "6,4,2");
    }

    #[test]
    fn test_dict() {
        assert_eq!(apply("{{ dict(a=1).a }}"), "1");
    }

    #[test]
    fn test_namespace_mutation() {
        assert_eq!(
            apply("{% set ns = namespace(c=0) %}{% for x in range(3) %}{% set ns.c = ns.c + x %}{% endfor %}{{ ns.c }}"),
            "3"
        );
    }

    #[test]
    fn test_cycler() {
        assert_eq!(
            apply("{% set c = cycler('a', 'b') %}{{ c.next() }}{{ c.next() }}{{ c.next() }}"),
            "aba"
        );
    }

    #[test]
    fn test_joiner() {
        assert_eq!(
            apply("{% set pipe = joiner('|') %}{% for x in range(3) %}{{ pipe() }}{{ x }}{% endfor %}"),
            "0|1|2"
        );
    }
}
