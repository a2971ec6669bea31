use std::fmt;
use std::sync::Mutex;

use crate::value::{Value, ValueMap};

/// A mutable attribute container.
///
/// Namespaces are created by the `namespace()` function or by imports and
/// are the one place where templates can mutate state across scopes
/// (`{% set ns.counter = ns.counter + 1 %}`).  Attribute writes from inner
/// scopes target the shared container rather than a scope-local copy.
pub struct Namespace {
    attrs: Mutex<ValueMap>,
}

impl Namespace {
    /// Creates an empty namespace.
    pub fn new() -> Namespace {
        Namespace {
            attrs: Mutex::new(ValueMap::new()),
        }
    }

    /// Creates a namespace from initial attributes.
    pub fn from_map(map: ValueMap) -> Namespace {
        Namespace {
            attrs: Mutex::new(map),
        }
    }

    /// Looks up an attribute.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.attrs
            .lock()
            .unwrap()
            .get(&crate::value::Key::from(name))
            .cloned()
    }

    /// Sets an attribute.
    pub fn set(&self, name: &str, value: Value) {
        self.attrs
            .lock()
            .unwrap()
            .insert(crate::value::Key::from(name), value);
    }

    /// Returns the attribute names currently set.
    pub fn attribute_names(&self) -> Vec<String> {
        self.attrs
            .lock()
            .unwrap()
            .keys()
            .filter_map(|k| k.as_str().map(|x| x.to_string()))
            .collect()
    }
}

impl Default for Namespace {
    fn default() -> Namespace {
        Namespace::new()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attrs = self.attrs.lock().unwrap();
        let mut m = f.debug_map();
        for (key, value) in attrs.iter() {
            m.entry(&key.to_string(), value);
        }
        m.finish()
    }
}
