//! Provides a dynamic value type abstraction.
//!
//! This module gives access to a dynamically typed value which is used by
//! the template engine during execution.
//!
//! For the most part the existence of the value type can be ignored as
//! [`render`](crate::Template::render) accepts any
//! [`serde::Serialize`] context and the engine converts values internally.
//! The [`context!`](crate::context!) macro is the easiest way to build one.
//!
//! # Basic Value Conversions
//!
//! Values can be constructed from basic Rust types via [`From`] and from
//! arbitrary serializable data via [`Value::from_serialize`]:
//!
//! ```
//! # use terrarium::value::Value;
//! let int_value = Value::from(42);
//! let none_value = Value::from(());
//! let true_value = Value::from(true);
//! ```
//!
//! # Dynamic Objects
//!
//! Values can also hold "dynamic" objects.  These are objects which implement
//! the [`Object`] trait.  This is how the engine's own macros, loop
//! controllers and registered functions are represented.
mod namespace;
pub(crate) mod ops;
mod serialize;

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::eval::State;

pub use self::namespace::Namespace;
pub use self::serialize::ValueSerializer;

/// The type of map used by values.
///
/// Map keys sort and compare structurally, so iteration order over a value
/// map is deterministic and independent of insertion order.
pub type ValueMap = BTreeMap<Key, Value>;

/// Marks a string as regular or safe from auto escaping.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StringType {
    /// A regular string subject to auto escaping.
    Normal,
    /// A string that must not be escaped again ("markup").
    Safe,
}

/// Distinguishes plain maps from keyword-argument maps.
///
/// By convention keyword arguments travel to callables, filters and tests as
/// a trailing positional argument holding a map tagged [`MapType::Kwargs`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MapType {
    /// A regular map literal or converted mapping.
    Normal,
    /// A map holding the keyword arguments of a call.
    Kwargs,
}

/// An opaque float usable as map key.
///
/// Equality and hashing go through the bit representation, ordering through
/// [`f64::total_cmp`].
#[derive(Debug, Copy, Clone)]
pub struct KeyFloat(pub f64);

impl PartialEq for KeyFloat {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for KeyFloat {}

impl std::hash::Hash for KeyFloat {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state)
    }
}

impl PartialOrd for KeyFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyFloat {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Represents a hashable map key.
///
/// Keys are restricted to the hashable subset of values: none, booleans,
/// integers, floats and strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// The none key.
    None,
    /// A boolean key.
    Bool(bool),
    /// An integer key.
    I64(i64),
    /// A float key.
    F64(KeyFloat),
    /// A string key.
    Str(Arc<str>),
}

impl Key {
    /// Returns the string value if this is a string key.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Converts the key back into a value.
    pub fn as_value(&self) -> Value {
        match self {
            Key::None => Value::from(()),
            Key::Bool(b) => Value::from(*b),
            Key::I64(v) => Value::from(*v),
            Key::F64(v) => Value::from(v.0),
            Key::Str(s) => Value(ValueRepr::String(s.clone(), StringType::Normal)),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_value(), f)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Key {
        Key::Str(Arc::from(value))
    }
}

impl From<String> for Key {
    fn from(value: String) -> Key {
        Key::Str(Arc::from(value))
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Key {
        Key::I64(value)
    }
}

impl From<bool> for Key {
    fn from(value: bool) -> Key {
        Key::Bool(value)
    }
}

impl TryFrom<Value> for Key {
    type Error = Error;

    fn try_from(value: Value) -> Result<Key, Error> {
        match value.0 {
            ValueRepr::None => Ok(Key::None),
            ValueRepr::Bool(b) => Ok(Key::Bool(b)),
            ValueRepr::I64(v) => Ok(Key::I64(v)),
            ValueRepr::F64(v) => Ok(Key::F64(KeyFloat(v))),
            ValueRepr::String(s, _) => Ok(Key::Str(s)),
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("value of type {} is not hashable", value.kind()),
            )),
        }
    }
}

/// Describes the kind of value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueKind {
    /// The value is undefined.
    Undefined,
    /// The value is the none singleton.
    None,
    /// The value is a boolean.
    Bool,
    /// The value is a number (integer or float).
    Number,
    /// The value is a string.
    String,
    /// The value is a sequence.
    Seq,
    /// The value is a map.
    Map,
    /// The value is a namespace.
    Namespace,
    /// The value is a dynamic object (function, macro, loop controller, ...).
    Object,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            ValueKind::Undefined => "undefined",
            ValueKind::None => "none",
            ValueKind::Bool => "bool",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Seq => "sequence",
            ValueKind::Map => "map",
            ValueKind::Namespace => "namespace",
            ValueKind::Object => "object",
        })
    }
}

/// A trait for dynamic template objects.
///
/// This is the capability surface the engine uses instead of reflection:
/// attribute lookup, calls and method calls all go through this trait.  User
/// types that want richer template behavior than plain value conversion can
/// implement it and enter the engine via [`Value::from_object`].
pub trait Object: fmt::Display + fmt::Debug + Send + Sync {
    /// Invoked to look up an attribute on the object.
    fn get_attr(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Returns the names of the attributes the object exposes.
    fn attributes(&self) -> &[&str] {
        &[]
    }

    /// Calls the object as function.
    fn call(&self, _state: &State, _args: &[Value]) -> Result<Value, Error> {
        Err(Error::new(
            ErrorKind::InvalidOperation,
            "value is not callable",
        ))
    }

    /// Calls a method on the object.
    fn call_method(&self, _state: &State, name: &str, _args: &[Value]) -> Result<Value, Error> {
        Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("object has no method named {name}"),
        ))
    }

    /// Whether this object can be called as a function.
    fn is_callable(&self) -> bool {
        false
    }
}

type FuncImpl = dyn Fn(&State, &[Value]) -> Result<Value, Error> + Send + Sync;

pub(crate) struct FuncObject {
    name: Cow<'static, str>,
    f: Box<FuncImpl>,
}

impl fmt::Debug for FuncObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

impl fmt::Display for FuncObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

impl Object for FuncObject {
    fn call(&self, state: &State, args: &[Value]) -> Result<Value, Error> {
        (self.f)(state, args)
    }

    fn is_callable(&self) -> bool {
        true
    }
}

/// The internal value representation.
#[derive(Clone)]
pub(crate) enum ValueRepr {
    None,
    Undefined(Option<Arc<str>>),
    Bool(bool),
    I64(i64),
    F64(f64),
    String(Arc<str>, StringType),
    Seq(Arc<Vec<Value>>),
    Map(Arc<ValueMap>, MapType),
    Namespace(Arc<Namespace>),
    Object(Arc<dyn Object>),
}

/// Represents a dynamically typed value in the template engine.
#[derive(Clone)]
pub struct Value(pub(crate) ValueRepr);

impl Default for Value {
    fn default() -> Value {
        Value(ValueRepr::Undefined(None))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ValueRepr::None | ValueRepr::Undefined(_) => Ok(()),
            ValueRepr::Bool(b) => f.write_str(if b { "True" } else { "False" }),
            ValueRepr::I64(v) => write!(f, "{v}"),
            ValueRepr::F64(v) => fmt_float(f, v),
            ValueRepr::String(ref s, _) => f.write_str(s),
            ValueRepr::Seq(_) | ValueRepr::Map(..) => fmt_repr(f, self),
            ValueRepr::Namespace(_) => f.write_str("<namespace>"),
            ValueRepr::Object(ref obj) => fmt::Display::fmt(obj, f),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_repr(f, self)
    }
}

fn fmt_float(f: &mut fmt::Formatter<'_>, v: f64) -> fmt::Result {
    if v.is_nan() {
        f.write_str("nan")
    } else if v.is_infinite() {
        write!(f, "{}inf", if v < 0.0 { "-" } else { "" })
    } else if v == v.trunc() && v.abs() < 1e16 {
        write!(f, "{:.1}", v)
    } else {
        write!(f, "{v}")
    }
}

/// Python-style repr used for container stringification and debugging.
fn fmt_repr(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value.0 {
        ValueRepr::None => f.write_str("None"),
        ValueRepr::Undefined(_) => f.write_str("Undefined"),
        ValueRepr::String(ref s, _) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        ValueRepr::Seq(ref items) => {
            ok!(f.write_str("["));
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    ok!(f.write_str(", "));
                }
                ok!(fmt_repr(f, item));
            }
            f.write_str("]")
        }
        ValueRepr::Map(ref m, _) => {
            ok!(f.write_str("{"));
            for (idx, (key, item)) in m.iter().enumerate() {
                if idx > 0 {
                    ok!(f.write_str(", "));
                }
                ok!(fmt_repr(f, &key.as_value()));
                ok!(f.write_str(": "));
                ok!(fmt_repr(f, item));
            }
            f.write_str("}")
        }
        _ => fmt::Display::fmt(value, f),
    }
}

impl Value {
    /// The undefined value.
    pub const UNDEFINED: Value = Value(ValueRepr::Undefined(None));

    /// Creates an undefined value that remembers the name it came from.
    pub(crate) fn undefined_named(name: &str) -> Value {
        Value(ValueRepr::Undefined(Some(Arc::from(name))))
    }

    /// Creates a value from a safe string.
    ///
    /// A safe string is one that will bypass auto escaping.  For instance if
    /// you want to have the template engine render some HTML without the
    /// need for the `|safe` filter, you can use a value of this sort instead.
    pub fn from_safe_string(value: String) -> Value {
        Value(ValueRepr::String(Arc::from(value), StringType::Safe))
    }

    /// Creates a value from a dynamic object.
    pub fn from_object<T: Object + 'static>(value: T) -> Value {
        Value(ValueRepr::Object(Arc::new(value)))
    }

    /// Creates a value from an already boxed dynamic object.
    pub fn from_dyn_object(value: Arc<dyn Object>) -> Value {
        Value(ValueRepr::Object(value))
    }

    /// Creates a callable value from a Rust function.
    ///
    /// The function receives the current render [`State`] and the evaluated
    /// arguments.  Keyword arguments, when present, arrive as a trailing map
    /// tagged as kwargs (see [`Value::kwargs`]).
    pub fn from_function<F>(name: impl Into<Cow<'static, str>>, f: F) -> Value
    where
        F: Fn(&State, &[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        Value::from_object(FuncObject {
            name: name.into(),
            f: Box::new(f),
        })
    }

    /// Creates a kwargs map value from pairs.
    pub fn kwargs<I>(pairs: I) -> Value
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let map: ValueMap = pairs
            .into_iter()
            .map(|(k, v)| (Key::from(k), v))
            .collect();
        Value(ValueRepr::Map(Arc::new(map), MapType::Kwargs))
    }

    /// Returns the kind of the value.
    pub fn kind(&self) -> ValueKind {
        match self.0 {
            ValueRepr::None => ValueKind::None,
            ValueRepr::Undefined(_) => ValueKind::Undefined,
            ValueRepr::Bool(_) => ValueKind::Bool,
            ValueRepr::I64(_) | ValueRepr::F64(_) => ValueKind::Number,
            ValueRepr::String(..) => ValueKind::String,
            ValueRepr::Seq(_) => ValueKind::Seq,
            ValueRepr::Map(..) => ValueKind::Map,
            ValueRepr::Namespace(_) => ValueKind::Namespace,
            ValueRepr::Object(_) => ValueKind::Object,
        }
    }

    /// Returns true if the value is undefined.
    pub fn is_undefined(&self) -> bool {
        matches!(self.0, ValueRepr::Undefined(_))
    }

    /// Returns true if the value is none.
    pub fn is_none(&self) -> bool {
        matches!(self.0, ValueRepr::None)
    }

    /// Returns true if the value is a string marked safe from auto escaping.
    pub fn is_safe(&self) -> bool {
        matches!(self.0, ValueRepr::String(_, StringType::Safe))
    }

    /// Returns true if the value is a number.
    pub fn is_number(&self) -> bool {
        matches!(self.0, ValueRepr::I64(_) | ValueRepr::F64(_))
    }

    /// Returns true if the value can be called.
    pub fn is_callable(&self) -> bool {
        match self.0 {
            ValueRepr::Object(ref obj) => obj.is_callable(),
            _ => false,
        }
    }

    /// The name the undefined value was created for, if any.
    pub(crate) fn undefined_name(&self) -> Option<&str> {
        match self.0 {
            ValueRepr::Undefined(Some(ref name)) => Some(name),
            _ => None,
        }
    }

    /// Returns the truthiness of the value.
    pub fn is_true(&self) -> bool {
        match self.0 {
            ValueRepr::None | ValueRepr::Undefined(_) => false,
            ValueRepr::Bool(b) => b,
            ValueRepr::I64(v) => v != 0,
            ValueRepr::F64(v) => v != 0.0,
            ValueRepr::String(ref s, _) => !s.is_empty(),
            ValueRepr::Seq(ref items) => !items.is_empty(),
            ValueRepr::Map(ref m, _) => !m.is_empty(),
            ValueRepr::Namespace(_) => true,
            ValueRepr::Object(_) => true,
        }
    }

    /// If the value is a string, returns it.
    pub fn as_str(&self) -> Option<&str> {
        match self.0 {
            ValueRepr::String(ref s, _) => Some(s),
            _ => None,
        }
    }

    /// If the value is a dynamic object, returns it.
    pub fn as_object(&self) -> Option<&Arc<dyn Object>> {
        match self.0 {
            ValueRepr::Object(ref obj) => Some(obj),
            _ => None,
        }
    }

    /// If the value is a namespace, returns it.
    pub fn as_namespace(&self) -> Option<&Arc<Namespace>> {
        match self.0 {
            ValueRepr::Namespace(ref ns) => Some(ns),
            _ => None,
        }
    }

    /// True if the value is a kwargs map.
    pub(crate) fn is_kwargs(&self) -> bool {
        matches!(self.0, ValueRepr::Map(_, MapType::Kwargs))
    }

    /// Returns the length of the contained value.
    pub fn len(&self) -> Option<usize> {
        match self.0 {
            ValueRepr::String(ref s, _) => Some(s.chars().count()),
            ValueRepr::Seq(ref items) => Some(items.len()),
            ValueRepr::Map(ref m, _) => Some(m.len()),
            _ => None,
        }
    }

    /// Returns true if the length is zero or unknown.
    pub fn is_empty(&self) -> bool {
        self.len().map_or(true, |x| x == 0)
    }

    /// Converts the value to an `i64` following template coercion rules.
    ///
    /// Booleans become 0/1, integral floats truncate, numeric strings parse
    /// in base 10.
    pub fn try_to_i64(&self) -> Result<i64, Error> {
        match self.0 {
            ValueRepr::Bool(b) => Ok(b as i64),
            ValueRepr::I64(v) => Ok(v),
            ValueRepr::F64(v) => Ok(v as i64),
            ValueRepr::String(ref s, _) => s.trim().parse().map_err(|_| {
                Error::new(
                    ErrorKind::InvalidOperation,
                    format!("cannot convert {s:?} to integer"),
                )
            }),
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("cannot convert value of type {} to integer", self.kind()),
            )),
        }
    }

    /// Converts the value to an `f64` following template coercion rules.
    pub fn try_to_f64(&self) -> Result<f64, Error> {
        match self.0 {
            ValueRepr::Bool(b) => Ok(b as i64 as f64),
            ValueRepr::I64(v) => Ok(v as f64),
            ValueRepr::F64(v) => Ok(v),
            ValueRepr::String(ref s, _) => s.trim().parse().map_err(|_| {
                Error::new(
                    ErrorKind::InvalidOperation,
                    format!("cannot convert {s:?} to float"),
                )
            }),
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("cannot convert value of type {} to float", self.kind()),
            )),
        }
    }

    /// Returns the value as usize if it is a non-negative integer.
    pub fn as_usize(&self) -> Option<usize> {
        match self.0 {
            ValueRepr::I64(v) => usize::try_from(v).ok(),
            ValueRepr::Bool(b) => Some(b as usize),
            _ => None,
        }
    }

    /// Looks up an attribute by name.
    ///
    /// Attributes resolve against map keys, namespace attributes and dynamic
    /// object attributes, in that order of applicability.
    pub fn get_attr(&self, name: &str) -> Option<Value> {
        match self.0 {
            ValueRepr::Map(ref m, _) => m.get(&Key::Str(Arc::from(name))).cloned(),
            ValueRepr::Namespace(ref ns) => ns.get(name),
            ValueRepr::Object(ref obj) => obj.get_attr(name),
            _ => None,
        }
    }

    /// Looks up an item by key value.
    ///
    /// Sequences support negative indices, maps support any hashable key and
    /// strings index to single characters.
    pub fn get_item(&self, key: &Value) -> Option<Value> {
        match self.0 {
            ValueRepr::Seq(ref items) => {
                let idx = some!(seq_index(key, items.len()));
                items.get(idx).cloned()
            }
            ValueRepr::String(ref s, _) => {
                let chars = s.chars().collect::<Vec<_>>();
                let idx = some!(seq_index(key, chars.len()));
                chars.get(idx).map(|c| Value::from(c.to_string()))
            }
            ValueRepr::Map(ref m, _) => {
                let key = some!(Key::try_from(key.clone()).ok());
                m.get(&key).cloned()
            }
            ValueRepr::Namespace(ref ns) => key.as_str().and_then(|name| ns.get(name)),
            ValueRepr::Object(ref obj) => key.as_str().and_then(|name| obj.get_attr(name)),
            _ => None,
        }
    }

    /// Looks up an item by integer index.
    pub fn get_item_by_index(&self, idx: usize) -> Option<Value> {
        self.get_item(&Value::from(idx as i64))
    }

    /// Iterates over the value.
    ///
    /// Sequences yield their items, maps their keys and strings their
    /// characters.  Undefined and none iterate as empty.
    pub fn try_iter(&self) -> Result<ValueIter, Error> {
        match self.0 {
            ValueRepr::None | ValueRepr::Undefined(_) => Ok(ValueIter {
                inner: ValueIterImpl::Empty,
            }),
            ValueRepr::Seq(ref items) => Ok(ValueIter {
                inner: ValueIterImpl::Seq(items.clone(), 0),
            }),
            ValueRepr::Map(ref m, _) => Ok(ValueIter {
                inner: ValueIterImpl::Keys(m.keys().cloned().collect(), 0),
            }),
            ValueRepr::String(ref s, _) => Ok(ValueIter {
                inner: ValueIterImpl::Chars(s.clone(), 0),
            }),
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("value of type {} is not iterable", self.kind()),
            )),
        }
    }

    /// Materializes the value into a vector of items.
    pub fn try_to_vec(&self) -> Result<Vec<Value>, Error> {
        Ok(ok!(self.try_iter()).collect())
    }

    /// Returns key/value pairs if the value is a map.
    pub(crate) fn map_items(&self) -> Option<Vec<(Value, Value)>> {
        match self.0 {
            ValueRepr::Map(ref m, _) => Some(
                m.iter()
                    .map(|(k, v)| (k.as_value(), v.clone()))
                    .collect(),
            ),
            _ => None,
        }
    }
}

fn seq_index(key: &Value, len: usize) -> Option<usize> {
    let idx = match key.0 {
        ValueRepr::I64(idx) => idx,
        ValueRepr::Bool(b) => b as i64,
        _ => return None,
    };
    if idx < 0 {
        usize::try_from(len as i64 + idx).ok()
    } else {
        Some(idx as usize)
    }
}

/// Splits a trailing kwargs map off an argument slice.
pub(crate) fn split_kwargs(args: &[Value]) -> (&[Value], Option<&ValueMap>) {
    match args.last() {
        Some(last) if last.is_kwargs() => (
            &args[..args.len() - 1],
            match last.0 {
                ValueRepr::Map(ref m, _) => Some(m),
                _ => unreachable!(),
            },
        ),
        _ => (args, None),
    }
}

/// Looks up a keyword argument by name.
pub(crate) fn get_kwarg(kwargs: Option<&ValueMap>, name: &str) -> Option<Value> {
    kwargs.and_then(|m| m.get(&Key::Str(Arc::from(name))).cloned())
}

/// Iterates over a value.
pub struct ValueIter {
    inner: ValueIterImpl,
}

enum ValueIterImpl {
    Empty,
    Seq(Arc<Vec<Value>>, usize),
    Keys(Vec<Key>, usize),
    Chars(Arc<str>, usize),
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self.inner {
            ValueIterImpl::Empty => None,
            ValueIterImpl::Seq(ref items, ref mut idx) => {
                let rv = some!(items.get(*idx)).clone();
                *idx += 1;
                Some(rv)
            }
            ValueIterImpl::Keys(ref keys, ref mut idx) => {
                let rv = some!(keys.get(*idx)).as_value();
                *idx += 1;
                Some(rv)
            }
            ValueIterImpl::Chars(ref s, ref mut offset) => {
                let c = some!(s[*offset..].chars().next());
                *offset += c.len_utf8();
                Some(Value::from(c.to_string()))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.inner {
            ValueIterImpl::Empty => (0, Some(0)),
            ValueIterImpl::Seq(ref items, idx) => {
                let rest = items.len() - idx;
                (rest, Some(rest))
            }
            ValueIterImpl::Keys(ref keys, idx) => {
                let rest = keys.len() - idx;
                (rest, Some(rest))
            }
            ValueIterImpl::Chars(ref s, offset) => (0, Some(s.len() - offset)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (ValueRepr::None, ValueRepr::None) => true,
            (ValueRepr::Undefined(_), ValueRepr::Undefined(_)) => true,
            (ValueRepr::Seq(a), ValueRepr::Seq(b)) => a == b,
            (ValueRepr::Map(a, _), ValueRepr::Map(b, _)) => a == b,
            (ValueRepr::Namespace(a), ValueRepr::Namespace(b)) => Arc::ptr_eq(a, b),
            (ValueRepr::Object(a), ValueRepr::Object(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const u8, Arc::as_ptr(b) as *const u8)
            }
            _ => match ops::coerce(self, other) {
                Some(ops::CoerceResult::I64(a, b)) => a == b,
                Some(ops::CoerceResult::F64(a, b)) => a == b,
                Some(ops::CoerceResult::Str(a, b)) => a == b,
                None => false,
            },
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (&self.0, &other.0) {
            (ValueRepr::Seq(a), ValueRepr::Seq(b)) => a.partial_cmp(b),
            _ => match ops::coerce(self, other) {
                Some(ops::CoerceResult::I64(a, b)) => a.partial_cmp(&b),
                Some(ops::CoerceResult::F64(a, b)) => a.partial_cmp(&b),
                Some(ops::CoerceResult::Str(a, b)) => a.partial_cmp(b),
                None => None,
            },
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value(ValueRepr::None)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value(ValueRepr::Bool(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value(ValueRepr::I64(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value(ValueRepr::I64(value as i64))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value(ValueRepr::I64(value as i64))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value(ValueRepr::I64(i64::try_from(value).unwrap_or(i64::MAX)))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value(ValueRepr::I64(i64::try_from(value).unwrap_or(i64::MAX)))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value(ValueRepr::F64(value))
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value(ValueRepr::F64(value as f64))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value(ValueRepr::String(Arc::from(value), StringType::Normal))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value(ValueRepr::String(Arc::from(value), StringType::Normal))
    }
}

impl From<Arc<str>> for Value {
    fn from(value: Arc<str>) -> Self {
        Value(ValueRepr::String(value, StringType::Normal))
    }
}

impl From<char> for Value {
    fn from(value: char) -> Self {
        Value::from(value.to_string())
    }
}

impl From<Key> for Value {
    fn from(value: Key) -> Self {
        value.as_value()
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value(ValueRepr::Seq(Arc::new(
            value.into_iter().map(Into::into).collect(),
        )))
    }
}

impl<K: Into<Key>, V: Into<Value>> From<BTreeMap<K, V>> for Value {
    fn from(value: BTreeMap<K, V>) -> Self {
        Value(ValueRepr::Map(
            Arc::new(
                value
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            MapType::Normal,
        ))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Value(ValueRepr::None),
        }
    }
}

impl<'a> From<Cow<'a, str>> for Value {
    fn from(value: Cow<'a, str>) -> Self {
        match value {
            Cow::Borrowed(s) => Value::from(s),
            Cow::Owned(s) => Value::from(s),
        }
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Value(ValueRepr::Seq(Arc::new(iter.into_iter().collect())))
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<i64, Error> {
        match value.0 {
            ValueRepr::I64(v) => Ok(v),
            ValueRepr::Bool(b) => Ok(b as i64),
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("cannot convert value of type {} to integer", value.kind()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_stringification() {
        assert_eq!(Value::from(true).to_string(), "True");
        assert_eq!(Value::from(false).to_string(), "False");
        assert_eq!(Value::from(()).to_string(), "");
        assert_eq!(Value::from(42).to_string(), "42");
        assert_eq!(Value::from(42.0).to_string(), "42.0");
        assert_eq!(Value::from(42.5).to_string(), "42.5");
        assert_eq!(
            Value::from(vec![Value::from(1), Value::from("x")]).to_string(),
            "[1, 'x']"
        );
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::from(()).is_true());
        assert!(!Value::UNDEFINED.is_true());
        assert!(!Value::from(0).is_true());
        assert!(!Value::from(0.0).is_true());
        assert!(!Value::from("").is_true());
        assert!(!Value::from(Vec::<Value>::new()).is_true());
        assert!(Value::from(1).is_true());
        assert!(Value::from("x").is_true());
    }

    #[test]
    fn test_number_equality() {
        assert_eq!(Value::from(1), Value::from(1.0));
        assert_eq!(Value::from(true), Value::from(1));
        assert!(Value::from(1) < Value::from(2.5));
    }

    #[test]
    fn test_items() {
        let v = Value::from(vec![1i64, 2, 3]);
        assert_eq!(v.get_item(&Value::from(-1)), Some(Value::from(3)));
        assert_eq!(v.get_item(&Value::from(5)), None);
        assert_eq!(v.len(), Some(3));
    }
}
