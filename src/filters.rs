//! Built-in filter functions.
//!
//! Filters are functions applied to values with the pipe operator:
//! `{{ 42|filter(23) }}` invokes `filter` with the input `42` and the
//! argument `23`.  All filters share one uniform signature — render state,
//! input value and an argument slice whose trailing element may be a
//! keyword-argument map — and are registered with
//! [`add_filter`](crate::Environment::add_filter).
//!
//! ```
//! # use terrarium::{Environment, value::Value};
//! # let mut env = Environment::new();
//! env.add_filter("slugify", |_state, value, _args| {
//!     Ok(Value::from(
//!         value
//!             .to_string()
//!             .to_lowercase()
//!             .split_whitespace()
//!             .collect::<Vec<_>>()
//!             .join("-"),
//!     ))
//! });
//! ```

use std::cmp::Ordering;
use std::fmt::Write;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Error, ErrorKind};
use crate::eval::State;
use crate::utils::HtmlEscape;
use crate::value::{
    get_kwarg, split_kwargs, Key, MapType, Value, ValueKind, ValueMap, ValueRepr,
};

/// Evaluated filter arguments with the kwargs map split off.
pub(crate) struct FilterArgs<'a> {
    pos: &'a [Value],
    kwargs: Option<&'a ValueMap>,
}

impl<'a> FilterArgs<'a> {
    pub fn new(args: &'a [Value]) -> FilterArgs<'a> {
        let (pos, kwargs) = split_kwargs(args);
        FilterArgs { pos, kwargs }
    }

    /// Fetches an argument by position or keyword name.
    pub fn get(&self, idx: usize, name: &str) -> Option<Value> {
        self.pos
            .get(idx)
            .cloned()
            .or_else(|| get_kwarg(self.kwargs, name))
            .filter(|value| !value.is_undefined())
    }
}

fn string_input(value: &Value) -> Result<String, Error> {
    if value.is_undefined() {
        return Err(Error::new(
            ErrorKind::UndefinedError,
            "filter input is undefined",
        ));
    }
    Ok(value.to_string())
}

fn lookup_attr_path(value: &Value, path: &str) -> Value {
    let mut rv = value.clone();
    for part in path.split('.') {
        rv = match rv.get_attr(part) {
            Some(value) => value,
            None => return Value::UNDEFINED,
        };
    }
    rv
}

fn cmp_values(a: &Value, b: &Value) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

fn sort_key(value: &Value, case_sensitive: bool) -> Value {
    if !case_sensitive {
        if let Some(s) = value.as_str() {
            return Value::from(s.to_lowercase());
        }
    }
    value.clone()
}

/// Marks a value as safe from auto escaping.
pub fn safe(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from_safe_string(ok!(string_input(value))))
}

/// HTML escapes a string.
///
/// Values already marked safe pass through unchanged.  By default this
/// filter is also registered under the alias `e`.
pub fn escape(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    if value.is_safe() {
        Ok(value.clone())
    } else {
        Ok(Value::from_safe_string(
            HtmlEscape(&ok!(string_input(value))).to_string(),
        ))
    }
}

/// HTML escapes a string even if it was already marked safe.
pub fn forceescape(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from_safe_string(
        HtmlEscape(&ok!(string_input(value))).to_string(),
    ))
}

/// Converts a value to uppercase.
pub fn upper(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(ok!(string_input(value)).to_uppercase()))
}

/// Converts a value to lowercase.
pub fn lower(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(ok!(string_input(value)).to_lowercase()))
}

/// Capitalizes a string: first character upper case, the rest lower case.
pub fn capitalize(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    let s = ok!(string_input(value));
    let mut chars = s.chars();
    Ok(Value::from(match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }))
}

/// Converts a string to title case.
pub fn title(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    let s = ok!(string_input(value));
    let mut rv = String::with_capacity(s.len());
    let mut capitalize_next = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            if capitalize_next {
                rv.extend(c.to_uppercase());
                capitalize_next = false;
            } else {
                rv.extend(c.to_lowercase());
            }
        } else {
            rv.push(c);
            capitalize_next = true;
        }
    }
    Ok(Value::from(rv))
}

/// Trims leading and trailing whitespace or the given characters.
pub fn trim(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let s = ok!(string_input(value));
    let args = FilterArgs::new(args);
    Ok(Value::from(match args.get(0, "chars") {
        Some(chars) => {
            let chars = chars.to_string().chars().collect::<Vec<_>>();
            s.trim_matches(&chars[..]).to_string()
        }
        None => s.trim().to_string(),
    }))
}

/// Strips SGML/XML tags and collapses adjacent whitespace to one space.
pub fn striptags(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"<[^>]*>").unwrap());
    let s = ok!(string_input(value));
    let stripped = re.replace_all(&s, "");
    Ok(Value::from(
        stripped.split_whitespace().collect::<Vec<_>>().join(" "),
    ))
}

/// Replaces occurrences of a substring, all or the first `count`.
pub fn replace(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let s = ok!(string_input(value));
    let args = FilterArgs::new(args);
    let old = ok!(args.get(0, "old").ok_or_else(|| Error::new(
        ErrorKind::InvalidOperation,
        "replace requires the substring to replace",
    )))
    .to_string();
    let new = args.get(1, "new").unwrap_or_else(|| Value::from("")).to_string();
    Ok(Value::from(match args.get(2, "count") {
        Some(count) => s.replacen(&old, &new, ok!(count.try_to_i64()).max(0) as usize),
        None => s.replace(&old, &new),
    }))
}

/// Truncates a string to `length` characters, appending an ellipsis.
pub fn truncate(state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let s = ok!(string_input(value));
    let args = FilterArgs::new(args);
    let length = args
        .get(0, "length")
        .map(|v| v.try_to_i64())
        .transpose()?
        .unwrap_or(255)
        .max(0) as usize;
    let killwords = args.get(1, "killwords").map(|v| v.is_true()).unwrap_or(false);
    let end = args
        .get(2, "end")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "...".to_string());
    let leeway = args
        .get(3, "leeway")
        .map(|v| v.try_to_i64())
        .transpose()?
        .unwrap_or_else(|| {
            state
                .env()
                .policy("truncate.leeway")
                .and_then(|v| v.try_to_i64().ok())
                .unwrap_or(5)
        })
        .max(0) as usize;

    let chars = s.chars().count();
    if chars <= length + leeway {
        return Ok(Value::from(s));
    }
    let cut = length.saturating_sub(end.chars().count());
    let truncated: String = s.chars().take(cut).collect();
    let truncated = if killwords {
        truncated
    } else {
        match truncated.rfind(' ') {
            Some(idx) => truncated[..idx].to_string(),
            None => truncated,
        }
    };
    Ok(Value::from(truncated + &end))
}

/// Counts the words in a string.
pub fn wordcount(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(
        ok!(string_input(value)).split_whitespace().count(),
    ))
}

/// Reverses a string or sequence.
pub fn reverse(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    if let Some(s) = value.as_str() {
        Ok(Value::from(s.chars().rev().collect::<String>()))
    } else if value.kind() == ValueKind::Seq {
        let mut items = ok!(value.try_to_vec());
        items.reverse();
        Ok(Value::from(items))
    } else {
        Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot reverse value of type {}", value.kind()),
        ))
    }
}

/// Centers a string in a field of the given width.
pub fn center(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let s = ok!(string_input(value));
    let args = FilterArgs::new(args);
    let width = args
        .get(0, "width")
        .map(|v| v.try_to_i64())
        .transpose()?
        .unwrap_or(80)
        .max(0) as usize;
    let len = s.chars().count();
    if len >= width {
        return Ok(Value::from(s));
    }
    let total = width - len;
    let left = total / 2;
    Ok(Value::from(format!(
        "{}{}{}",
        " ".repeat(left),
        s,
        " ".repeat(total - left)
    )))
}

/// Indents every line of the string with the given number of spaces.
///
/// The first line and blank lines are left alone unless `first` or `blank`
/// say otherwise.
pub fn indent(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let s = ok!(string_input(value));
    let args = FilterArgs::new(args);
    let width = args
        .get(0, "width")
        .map(|v| v.try_to_i64())
        .transpose()?
        .unwrap_or(4)
        .max(0) as usize;
    let indent_first = args.get(1, "first").map(|v| v.is_true()).unwrap_or(false);
    let indent_blank = args.get(2, "blank").map(|v| v.is_true()).unwrap_or(false);

    let pad = " ".repeat(width);
    let mut rv = String::with_capacity(s.len());
    for (idx, line) in s.split('\n').enumerate() {
        if idx > 0 {
            rv.push('\n');
        }
        let blank = line.trim().is_empty();
        let indent_this = if idx == 0 {
            indent_first
        } else if blank {
            indent_blank
        } else {
            true
        };
        if indent_this && !line.is_empty() {
            rv.push_str(&pad);
        }
        rv.push_str(line);
    }
    Ok(Value::from(rv))
}

fn break_word(
    word: &str,
    width: usize,
    break_long_words: bool,
    break_on_hyphens: bool,
) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    if break_on_hyphens {
        let mut start = 0;
        for (idx, c) in word.char_indices() {
            if c == '-' {
                let end = idx + c.len_utf8();
                if end > start {
                    parts.push(word[start..end].to_string());
                }
                start = end;
            }
        }
        if start < word.len() {
            parts.push(word[start..].to_string());
        }
    } else {
        parts.push(word.to_string());
    }
    if break_long_words {
        parts = parts
            .into_iter()
            .flat_map(|part| {
                let mut chunks = Vec::new();
                let mut current = String::new();
                for c in part.chars() {
                    if current.chars().count() >= width {
                        chunks.push(std::mem::take(&mut current));
                    }
                    current.push(c);
                }
                if !current.is_empty() {
                    chunks.push(current);
                }
                chunks
            })
            .collect();
    }
    parts.retain(|p| !p.is_empty());
    parts
}

/// Wraps text to the given width.
///
/// Defaults to a width of 79, breaks long words and breaks on hyphens; the
/// wrap string defaults to the environment's newline sequence.
pub fn wordwrap(state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let s = ok!(string_input(value));
    let args = FilterArgs::new(args);
    let width = args
        .get(0, "width")
        .map(|v| v.try_to_i64())
        .transpose()?
        .unwrap_or(79)
        .max(1) as usize;
    let break_long_words = args
        .get(1, "break_long_words")
        .map(|v| v.is_true())
        .unwrap_or(true);
    let wrapstring = args
        .get(2, "wrapstring")
        .filter(|v| !v.is_none())
        .map(|v| v.to_string())
        .unwrap_or_else(|| state.env().newline_sequence().as_str().to_string());
    let break_on_hyphens = args
        .get(3, "break_on_hyphens")
        .map(|v| v.is_true())
        .unwrap_or(true);

    let mut lines: Vec<String> = Vec::new();
    for line in s.split('\n') {
        if line.chars().count() <= width {
            lines.push(line.to_string());
            continue;
        }
        let mut cur = String::new();
        for word in line.split_whitespace() {
            if word.chars().count() <= width {
                let cur_len = cur.chars().count();
                if cur.is_empty() {
                    cur = word.to_string();
                } else if cur_len + 1 + word.chars().count() <= width {
                    cur.push(' ');
                    cur.push_str(word);
                } else {
                    lines.push(std::mem::take(&mut cur));
                    cur = word.to_string();
                }
            } else {
                if !cur.is_empty() {
                    lines.push(std::mem::take(&mut cur));
                }
                for frag in break_word(word, width, break_long_words, break_on_hyphens) {
                    let joinable = cur.ends_with('-')
                        && cur.chars().count() + frag.chars().count() <= width;
                    if joinable {
                        cur.push_str(&frag);
                    } else {
                        if !cur.is_empty() {
                            lines.push(std::mem::take(&mut cur));
                        }
                        cur = frag;
                    }
                }
            }
        }
        if !cur.is_empty() {
            lines.push(cur);
        }
    }
    Ok(Value::from(lines.join(&wrapstring)))
}

/// Rounds a number to the given precision.
///
/// The method can be `"common"` (the default), `"ceil"` or `"floor"`.
pub fn round(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let v = ok!(value.try_to_f64());
    let args = FilterArgs::new(args);
    let precision = args
        .get(0, "precision")
        .map(|v| v.try_to_i64())
        .transpose()?
        .unwrap_or(0);
    let method = args
        .get(1, "method")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "common".to_string());
    let factor = 10f64.powi(precision as i32);
    let scaled = v * factor;
    let rounded = match method.as_str() {
        "common" => scaled.round(),
        "ceil" => scaled.ceil(),
        "floor" => scaled.floor(),
        other => {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("unknown rounding method {other:?}"),
            ))
        }
    };
    Ok(Value::from(rounded / factor))
}

/// Returns the absolute value of a number.
pub fn abs(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    match value.0 {
        ValueRepr::I64(v) => Ok(Value::from(v.wrapping_abs())),
        ValueRepr::F64(v) => Ok(Value::from(v.abs())),
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot take absolute value of type {}", value.kind()),
        )),
    }
}

/// Converts the value to an integer; on failure the default (0) is used.
pub fn int(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    Ok(match value.try_to_i64() {
        Ok(v) => Value::from(v),
        Err(_) => args.get(0, "default").unwrap_or_else(|| Value::from(0)),
    })
}

/// Converts the value to a float; on failure the default (0.0) is used.
pub fn float(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    Ok(match value.try_to_f64() {
        Ok(v) => Value::from(v),
        Err(_) => args.get(0, "default").unwrap_or_else(|| Value::from(0.0)),
    })
}

/// Returns the input unless it is undefined, in which case the fallback is
/// returned.  With `boolean=true` any falsy value is replaced.
///
/// By default this filter is also registered under the alias `d`.
pub fn default(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let fallback = args
        .get(0, "default_value")
        .unwrap_or_else(|| Value::from(""));
    let boolean = args.get(1, "boolean").map(|v| v.is_true()).unwrap_or(false);
    let replace = if boolean {
        !value.is_true()
    } else {
        value.is_undefined()
    };
    Ok(if replace { fallback } else { value.clone() })
}

/// Returns the length of the value.
///
/// By default this filter is also registered under the alias `count`.
pub fn length(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    value.len().map(Value::from).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot calculate length of value of type {}", value.kind()),
        )
    })
}

/// Returns the first item of a sequence or string.
pub fn first(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(ok!(value.try_iter()).next().unwrap_or(Value::UNDEFINED))
}

/// Returns the last item of a sequence or string.
pub fn last(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(ok!(value.try_iter()).last().unwrap_or(Value::UNDEFINED))
}

/// Joins a sequence with a separator, optionally by attribute.
pub fn join(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    if value.is_undefined() || value.is_none() {
        return Ok(Value::from(""));
    }
    let args = FilterArgs::new(args);
    let joiner = args.get(0, "d").map(|v| v.to_string()).unwrap_or_default();
    let attribute = args.get(1, "attribute").map(|v| v.to_string());

    let mut rv = String::new();
    for item in ok!(value.try_iter()) {
        if !rv.is_empty() {
            rv.push_str(&joiner);
        }
        let item = match attribute {
            Some(ref attr) => lookup_attr_path(&item, attr),
            None => item,
        };
        ok!(write!(rv, "{item}").map_err(Error::from));
    }
    Ok(Value::from(rv))
}

/// Sorts a sequence, optionally by attribute.
///
/// Strings compare case insensitively unless `case_sensitive` is set.
pub fn sort(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let mut items = ok!(value.try_to_vec());
    let args = FilterArgs::new(args);
    let reverse = args.get(0, "reverse").map(|v| v.is_true()).unwrap_or(false);
    let case_sensitive = args
        .get(1, "case_sensitive")
        .map(|v| v.is_true())
        .unwrap_or(false);
    let attribute = args.get(2, "attribute").map(|v| v.to_string());

    items.sort_by(|a, b| {
        let (ka, kb) = match attribute {
            Some(ref attr) => (lookup_attr_path(a, attr), lookup_attr_path(b, attr)),
            None => (a.clone(), b.clone()),
        };
        cmp_values(
            &sort_key(&ka, case_sensitive),
            &sort_key(&kb, case_sensitive),
        )
    });
    if reverse {
        items.reverse();
    }
    Ok(Value::from(items))
}

/// Removes duplicates from a sequence, preserving order.
pub fn unique(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let case_sensitive = args
        .get(0, "case_sensitive")
        .map(|v| v.is_true())
        .unwrap_or(false);
    let attribute = args.get(1, "attribute").map(|v| v.to_string());

    let mut seen: Vec<Value> = Vec::new();
    let mut rv = Vec::new();
    for item in ok!(value.try_iter()) {
        let key = match attribute {
            Some(ref attr) => lookup_attr_path(&item, attr),
            None => item.clone(),
        };
        let key = sort_key(&key, case_sensitive);
        if !seen.iter().any(|s| s == &key) {
            seen.push(key);
            rv.push(item);
        }
    }
    Ok(Value::from(rv))
}

/// Returns the smallest item of a sequence.
pub fn min(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    let items = ok!(value.try_to_vec());
    Ok(items
        .into_iter()
        .min_by(cmp_values)
        .unwrap_or(Value::UNDEFINED))
}

/// Returns the largest item of a sequence.
pub fn max(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    let items = ok!(value.try_to_vec());
    Ok(items
        .into_iter()
        .max_by(cmp_values)
        .unwrap_or(Value::UNDEFINED))
}

/// Sums up a sequence, optionally by attribute and with a start value.
pub fn sum(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let attribute = args.get(0, "attribute").map(|v| v.to_string());
    let mut rv = args.get(1, "start").unwrap_or_else(|| Value::from(0));
    for item in ok!(value.try_iter()) {
        let item = match attribute {
            Some(ref attr) => lookup_attr_path(&item, attr),
            None => item,
        };
        rv = ok!(crate::value::ops::add(&rv, &item));
    }
    Ok(rv)
}

/// Converts the value into a list.
pub fn list(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(ok!(value.try_to_vec())))
}

/// Returns the key/value pairs of a map as a list of pairs.
pub fn items(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    match value.map_items() {
        Some(items) => Ok(Value::from(
            items
                .into_iter()
                .map(|(k, v)| Value::from(vec![k, v]))
                .collect::<Vec<_>>(),
        )),
        None => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot get items of value of type {}", value.kind()),
        )),
    }
}

/// Slices a sequence into `count` columns, optionally filling them up.
pub fn slice(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let items = ok!(value.try_to_vec());
    let args = FilterArgs::new(args);
    let count = ok!(args
        .get(0, "slices")
        .map(|v| v.try_to_i64())
        .transpose())
    .unwrap_or(1)
    .max(1) as usize;
    let fill_with = args.get(1, "fill_with");

    let per_slice = items.len() / count;
    let with_extra = items.len() % count;
    let mut rv = Vec::with_capacity(count);
    let mut offset = 0;
    for idx in 0..count {
        let size = per_slice + if idx < with_extra { 1 } else { 0 };
        let mut group: Vec<Value> = items[offset..offset + size].to_vec();
        if let Some(ref fill) = fill_with {
            if idx >= with_extra && with_extra > 0 {
                group.push(fill.clone());
            }
        }
        offset += size;
        rv.push(Value::from(group));
    }
    Ok(Value::from(rv))
}

/// Batches items into lists of the given size.
///
/// The final batch is padded with `fill_with` when provided.
pub fn batch(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let items = ok!(value.try_to_vec());
    let args = FilterArgs::new(args);
    let count = ok!(args
        .get(0, "linecount")
        .map(|v| v.try_to_i64())
        .transpose())
    .unwrap_or(1)
    .max(1) as usize;
    let fill_with = args.get(1, "fill_with");

    let mut rv = Vec::new();
    let mut batch = Vec::with_capacity(count);
    for item in items {
        if batch.len() == count {
            rv.push(Value::from(std::mem::take(&mut batch)));
        }
        batch.push(item);
    }
    if !batch.is_empty() {
        if let Some(ref fill) = fill_with {
            while batch.len() < count {
                batch.push(fill.clone());
            }
        }
        rv.push(Value::from(batch));
    }
    Ok(Value::from(rv))
}

/// Groups a sequence of objects by an attribute.
///
/// Returns a sorted list of `{grouper, list}` pairs.
pub fn groupby(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let attribute = ok!(args.get(0, "attribute").ok_or_else(|| Error::new(
        ErrorKind::InvalidOperation,
        "groupby requires an attribute",
    )))
    .to_string();

    let mut items = ok!(value.try_to_vec());
    items.sort_by(|a, b| {
        cmp_values(
            &lookup_attr_path(a, &attribute),
            &lookup_attr_path(b, &attribute),
        )
    });

    let mut rv: Vec<Value> = Vec::new();
    let mut current_key: Option<Value> = None;
    let mut bucket: Vec<Value> = Vec::new();
    for item in items {
        let key = lookup_attr_path(&item, &attribute);
        if current_key.as_ref() != Some(&key) {
            if let Some(grouper) = current_key.take() {
                rv.push(make_group(grouper, std::mem::take(&mut bucket)));
            }
            current_key = Some(key);
        }
        bucket.push(item);
    }
    if let Some(grouper) = current_key {
        rv.push(make_group(grouper, bucket));
    }
    Ok(Value::from(rv))
}

fn make_group(grouper: Value, items: Vec<Value>) -> Value {
    let mut map = ValueMap::new();
    map.insert(Key::from("grouper"), grouper);
    map.insert(Key::from("list"), Value::from(items));
    Value(ValueRepr::Map(Arc::new(map), MapType::Normal))
}

/// Sorts a map and returns a list of key/value pairs.
pub fn dictsort(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let mut pairs = ok!(value.map_items().ok_or_else(|| Error::new(
        ErrorKind::InvalidOperation,
        "cannot convert value into pair list",
    )));
    let args = FilterArgs::new(args);
    let case_sensitive = args
        .get(0, "case_sensitive")
        .map(|v| v.is_true())
        .unwrap_or(false);
    let by = args
        .get(1, "by")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "key".to_string());
    let reverse = args.get(2, "reverse").map(|v| v.is_true()).unwrap_or(false);

    let by_value = match by.as_str() {
        "key" => false,
        "value" => true,
        other => {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("dictsort can only sort by key or value, not {other:?}"),
            ))
        }
    };
    pairs.sort_by(|a, b| {
        let (ka, kb) = if by_value {
            (&a.1, &b.1)
        } else {
            (&a.0, &b.0)
        };
        cmp_values(
            &sort_key(ka, case_sensitive),
            &sort_key(kb, case_sensitive),
        )
    });
    if reverse {
        pairs.reverse();
    }
    Ok(Value::from(
        pairs
            .into_iter()
            .map(|(k, v)| Value::from(vec![k, v]))
            .collect::<Vec<_>>(),
    ))
}

/// URL encodes a value.
///
/// Maps encode into a query string, everything else percent-encodes its
/// string form.
pub fn urlencode(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    const SET: &percent_encoding::AsciiSet =
        &percent_encoding::NON_ALPHANUMERIC.remove(b'/').add(b' ');

    match value.0 {
        ValueRepr::None | ValueRepr::Undefined(_) => Ok(Value::from("")),
        ValueRepr::Map(..) => {
            let mut rv = String::new();
            for (idx, (key, item)) in value.map_items().unwrap().into_iter().enumerate() {
                if idx > 0 {
                    rv.push('&');
                }
                ok!(write!(
                    rv,
                    "{}={}",
                    percent_encoding::utf8_percent_encode(&key.to_string(), SET),
                    percent_encoding::utf8_percent_encode(&item.to_string(), SET)
                )
                .map_err(Error::from));
            }
            Ok(Value::from(rv))
        }
        _ => Ok(Value::from(
            percent_encoding::utf8_percent_encode(&value.to_string(), SET).to_string(),
        )),
    }
}

/// Escapes a string for use in JavaScript string literals.
pub fn escapejs(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    let s = ok!(string_input(value));
    let mut rv = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => rv.push_str("\\u005C"),
            '\'' => rv.push_str("\\u0027"),
            '"' => rv.push_str("\\u0022"),
            '>' => rv.push_str("\\u003E"),
            '<' => rv.push_str("\\u003C"),
            '&' => rv.push_str("\\u0026"),
            '=' => rv.push_str("\\u003D"),
            '-' => rv.push_str("\\u002D"),
            ';' => rv.push_str("\\u003B"),
            '`' => rv.push_str("\\u0060"),
            '\u{2028}' => rv.push_str("\\u2028"),
            '\u{2029}' => rv.push_str("\\u2029"),
            c if (c as u32) < 0x20 => {
                ok!(write!(rv, "\\u{:04X}", c as u32).map_err(Error::from));
            }
            c => rv.push(c),
        }
    }
    Ok(Value::from_safe_string(rv))
}

/// Formats a size in bytes as a human readable string.
///
/// Decimal prefixes are used by default (kB, MB, ...); passing `true` as
/// argument switches to binary prefixes (KiB, MiB, ...).
pub fn filesizeformat(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    const BIN_PREFIXES: &[&str] = &["KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];
    const SI_PREFIXES: &[&str] = &["kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

    let bytes = ok!(value.try_to_f64());
    let args = FilterArgs::new(args);
    let binary = args.get(0, "binary").map(|v| v.is_true()).unwrap_or(false);
    let (prefixes, base) = if binary {
        (BIN_PREFIXES, 1024.0f64)
    } else {
        (SI_PREFIXES, 1000.0f64)
    };

    if bytes == 1.0 {
        return Ok(Value::from("1 Byte"));
    }
    let (sign, bytes) = if bytes < 0.0 {
        ("-", -bytes)
    } else {
        ("", bytes)
    };

    if bytes < base {
        Ok(Value::from(format!("{}{} Bytes", sign, bytes as i64)))
    } else {
        for (idx, prefix) in prefixes.iter().enumerate() {
            let unit = base.powf(idx as f64 + 2.0);
            if bytes < unit || idx == prefixes.len() - 1 {
                return Ok(Value::from(format!(
                    "{}{:.1} {}",
                    sign,
                    base * bytes / unit,
                    prefix
                )));
            }
        }
        unreachable!();
    }
}

/// Formats a float to a fixed number of decimal places.
///
/// With a negative precision the decimals are only shown when the value is
/// not integral.
pub fn floatformat(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let v = ok!(value.try_to_f64());
    let args = FilterArgs::new(args);
    let precision = args
        .get(0, "precision")
        .map(|x| x.try_to_i64())
        .transpose()?
        .unwrap_or(-1);
    let digits = precision.unsigned_abs().min(17) as usize;
    let formatted = format!("{v:.digits$}");
    if precision < 0 {
        let rounded: f64 = formatted.parse().unwrap_or(v);
        if rounded == rounded.trunc() {
            return Ok(Value::from(format!("{}", rounded.trunc() as i64)));
        }
    }
    Ok(Value::from(formatted))
}

/// Pretty prints a value for debugging.
pub fn pprint(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(format!("{value:?}")))
}

/// Applies printf-style formatting: `{{ "%s - %s"|format(a, b) }}`.
pub fn format(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let fmt = ok!(string_input(value));
    let (pos, _) = split_kwargs(args);
    let mut rv = String::with_capacity(fmt.len());
    let mut arg_idx = 0;
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            rv.push(c);
            continue;
        }
        let spec = ok!(chars.next().ok_or_else(|| Error::new(
            ErrorKind::InvalidOperation,
            "incomplete format specifier",
        )));
        if spec == '%' {
            rv.push('%');
            continue;
        }
        let arg = ok!(pos.get(arg_idx).ok_or_else(|| Error::new(
            ErrorKind::InvalidOperation,
            "not enough arguments for format string",
        )));
        arg_idx += 1;
        match spec {
            's' => ok!(write!(rv, "{arg}").map_err(Error::from)),
            'd' | 'i' => ok!(write!(rv, "{}", ok!(arg.try_to_i64())).map_err(Error::from)),
            'f' => ok!(write!(rv, "{:.6}", ok!(arg.try_to_f64())).map_err(Error::from)),
            'x' => ok!(write!(rv, "{:x}", ok!(arg.try_to_i64())).map_err(Error::from)),
            'o' => ok!(write!(rv, "{:o}", ok!(arg.try_to_i64())).map_err(Error::from)),
            other => {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    format!("unsupported format specifier %{other}"),
                ))
            }
        }
    }
    Ok(Value::from(rv))
}

fn default_urlize_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(URLIZE_PATTERN).unwrap())
}

const URLIZE_PATTERN: &str = r#"(?xi)
    \b(
        (?:https?://|www\.)[^\s<>"']+
      | [\w.+-]+@[\w-]+(?:\.[\w-]+)+
      | [\w-]+(?:\.[\w-]+)*\.(?:com|net|org)(?:/[^\s<>"']*)?
    )"#;

/// Converts URLs and email addresses in text into clickable links.
///
/// Recognizes `http`/`https` URLs, `www.` prefixes, bare domains and email
/// addresses.  Extra URI schemes can be passed via `extra_schemes`.
pub fn urlize(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let s = ok!(string_input(value));
    let args = FilterArgs::new(args);
    let trim_url_limit = args
        .get(0, "trim_url_limit")
        .map(|v| v.try_to_i64())
        .transpose()?
        .map(|v| v.max(0) as usize);
    let nofollow = args.get(1, "nofollow").map(|v| v.is_true()).unwrap_or(false);
    let target = args.get(2, "target").map(|v| v.to_string());
    let extra_schemes: Vec<String> = match args.get(3, "extra_schemes") {
        Some(schemes) => ok!(schemes.try_to_vec())
            .into_iter()
            .map(|v| v.to_string())
            .collect(),
        None => Vec::new(),
    };

    let compiled;
    let re = if extra_schemes.is_empty() {
        default_urlize_re()
    } else {
        let alternation = extra_schemes
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = URLIZE_PATTERN.replacen(
            "https?://|www\\.",
            &format!("https?://|www\\.|{alternation}"),
            1,
        );
        compiled = ok!(regex::Regex::new(&pattern).map_err(|err| Error::new(
            ErrorKind::InvalidOperation,
            "invalid extra scheme for urlize",
        )
        .with_source(err)));
        &compiled
    };

    // the result is marked safe, so everything that is not a link must be
    // escaped here
    let escaped = |text: &str| -> String { HtmlEscape(text).to_string() };

    let mut rv = String::with_capacity(s.len());
    let mut last = 0;
    for m in re.find_iter(&s) {
        rv.push_str(&escaped(&s[last..m.start()]));
        let mut link = m.as_str();
        // trailing punctuation belongs to the prose, not the link
        while let Some(stripped) = link.strip_suffix(&['.', ',', ':', ';', '!', '?'][..]) {
            link = stripped;
        }
        let trailing = &m.as_str()[link.len()..];

        let href = if link.contains('@') && !link.contains("//") {
            format!("mailto:{link}")
        } else if !link.contains("://") {
            format!("https://{link}")
        } else {
            link.to_string()
        };
        let display = match trim_url_limit {
            Some(limit) if link.chars().count() > limit => {
                format!("{}...", link.chars().take(limit).collect::<String>())
            }
            _ => link.to_string(),
        };

        rv.push_str("<a href=\"");
        rv.push_str(&escaped(&href));
        rv.push('"');
        if nofollow {
            rv.push_str(" rel=\"nofollow\"");
        }
        if let Some(ref target) = target {
            ok!(write!(rv, " target=\"{}\"", escaped(target)).map_err(Error::from));
        }
        rv.push('>');
        rv.push_str(&escaped(&display));
        rv.push_str("</a>");
        rv.push_str(&escaped(trailing));
        last = m.end();
    }
    rv.push_str(&escaped(&s[last..]));
    Ok(Value::from_safe_string(rv))
}

/// Creates an XML/HTML attribute string from a map.
///
/// Keys sort alphabetically, `none` and undefined values are skipped and a
/// leading space is prepended unless `autospace` is disabled.
pub fn xmlattr(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let items = ok!(value.map_items().ok_or_else(|| Error::new(
        ErrorKind::InvalidOperation,
        "xmlattr requires a map of attributes",
    )));
    let args = FilterArgs::new(args);
    let autospace = args.get(0, "autospace").map(|v| v.is_true()).unwrap_or(true);

    let mut pairs: Vec<(String, Value)> = items
        .into_iter()
        .filter(|(_, v)| !v.is_none() && !v.is_undefined())
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut rv = String::new();
    for (idx, (key, item)) in pairs.into_iter().enumerate() {
        if idx > 0 {
            rv.push(' ');
        }
        ok!(write!(
            rv,
            "{}=\"{}\"",
            HtmlEscape(&key),
            HtmlEscape(&item.to_string())
        )
        .map_err(Error::from));
    }
    if autospace && !rv.is_empty() {
        rv.insert(0, ' ');
    }
    Ok(Value::from_safe_string(rv))
}

/// Returns a copy of the sequence in random order.
pub fn shuffle(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    let mut items = ok!(value.try_to_vec());
    items.shuffle(&mut rand::thread_rng());
    Ok(Value::from(items))
}

/// Chooses a random element from a sequence or string.
pub fn random(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    let items = ok!(value.try_to_vec());
    if items.is_empty() {
        return Ok(Value::UNDEFINED);
    }
    let idx = rand::thread_rng().gen_range(0..items.len());
    Ok(items[idx].clone())
}

fn json_safe(serialized: String) -> Value {
    let mut rv = String::with_capacity(serialized.len());
    for c in serialized.chars() {
        match c {
            '<' => rv.push_str("\\u003c"),
            '>' => rv.push_str("\\u003e"),
            '&' => rv.push_str("\\u0026"),
            '\'' => rv.push_str("\\u0027"),
            _ => rv.push(c),
        }
    }
    Value::from_safe_string(rv)
}

/// Dumps a value to JSON.
///
/// The result is safe to embed in HTML because the relevant characters are
/// escaped as unicode sequences.  Passing `indent` pretty prints.
pub fn tojson(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let pretty = args
        .get(0, "indent")
        .map(|v| v.is_true())
        .unwrap_or(false);
    let serialized = ok!(if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|err| {
        Error::new(ErrorKind::BadSerialization, "cannot serialize to JSON").with_source(err)
    }));
    Ok(json_safe(serialized))
}

/// Parses a JSON string into a value.
pub fn fromjson(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    let s = ok!(string_input(value));
    let parsed: serde_json::Value = ok!(serde_json::from_str(&s).map_err(|err| {
        Error::new(ErrorKind::BadSerialization, "invalid JSON").with_source(err)
    }));
    Ok(Value::from_serialize(&parsed))
}

/// Looks up an attribute on the value without falling back to items.
pub fn attr(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let name = ok!(args.get(0, "name").ok_or_else(|| Error::new(
        ErrorKind::InvalidOperation,
        "attr requires an attribute name",
    )))
    .to_string();
    Ok(value.get_attr(&name).unwrap_or(Value::UNDEFINED))
}

/// Applies a filter or attribute lookup to every item of a sequence.
///
/// `{{ users|map(attribute='name') }}` or `{{ names|map('upper') }}`.
pub fn map(state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let (pos, kwargs) = split_kwargs(args);
    let mut rv = Vec::new();
    if let Some(attribute) = get_kwarg(kwargs, "attribute") {
        let path = attribute.to_string();
        let default = get_kwarg(kwargs, "default");
        for item in ok!(value.try_iter()) {
            let mut looked_up = lookup_attr_path(&item, &path);
            if looked_up.is_undefined() {
                if let Some(ref default) = default {
                    looked_up = default.clone();
                }
            }
            rv.push(looked_up);
        }
    } else {
        let filter_name = ok!(pos.first().ok_or_else(|| Error::new(
            ErrorKind::InvalidOperation,
            "map requires a filter name or attribute",
        )))
        .to_string();
        for item in ok!(value.try_iter()) {
            rv.push(ok!(state.apply_filter(&filter_name, &item, &pos[1..])));
        }
    }
    Ok(Value::from(rv))
}

fn select_or_reject(
    state: &State,
    value: &Value,
    args: &[Value],
    keep_matching: bool,
    by_attribute: bool,
) -> Result<Value, Error> {
    let (pos, _) = split_kwargs(args);
    let mut pos = pos;
    let attribute = if by_attribute {
        let attr = ok!(pos.first().ok_or_else(|| Error::new(
            ErrorKind::InvalidOperation,
            "attribute name is required",
        )))
        .to_string();
        pos = &pos[1..];
        Some(attr)
    } else {
        None
    };
    let test_name = pos.first().map(|v| v.to_string());
    let test_args = if pos.is_empty() { &[][..] } else { &pos[1..] };

    let mut rv = Vec::new();
    for item in ok!(value.try_iter()) {
        let subject = match attribute {
            Some(ref path) => lookup_attr_path(&item, path),
            None => item.clone(),
        };
        let matched = match test_name {
            Some(ref name) => ok!(state.perform_test(name, &subject, test_args)),
            None => subject.is_true(),
        };
        if matched == keep_matching {
            rv.push(item);
        }
    }
    Ok(Value::from(rv))
}

/// Keeps the items passing a test (or truthy items without a test).
pub fn select(state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    select_or_reject(state, value, args, true, false)
}

/// Drops the items passing a test (or truthy items without a test).
pub fn reject(state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    select_or_reject(state, value, args, false, false)
}

/// Keeps the items whose attribute passes a test.
pub fn selectattr(state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    select_or_reject(state, value, args, true, true)
}

/// Drops the items whose attribute passes a test.
pub fn rejectattr(state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    select_or_reject(state, value, args, false, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    fn state() -> crate::Environment {
        crate::Environment::new()
    }

    fn apply(env: &crate::Environment, expr: &str) -> String {
        env.render_str(expr, crate::context! {}).unwrap()
    }

    #[test]
    fn test_string_filters() {
        let env = state();
        assert_eq!(apply(&env, "{{ 'hello'|upper }}"), "HELLO");
        assert_eq!(apply(&env, "{{ 'HELLO'|lower }}"), "hello");
        assert_eq!(apply(&env, "{{ 'hello world'|title }}"), "Hello World");
        assert_eq!(apply(&env, "{{ 'hello WORLD'|capitalize }}"), "Hello world");
        assert_eq!(apply(&env, "{{ '  x  '|trim }}"), "x");
        assert_eq!(apply(&env, "{{ 'a-b-c'|replace('-', '.') }}"), "a.b.c");
        assert_eq!(apply(&env, "{{ 'one two three'|wordcount }}"), "3");
        assert_eq!(apply(&env, "{{ 'ab'|center(6) }}"), "  ab  ");
        assert_eq!(apply(&env, "{{ '<p>hi  there</p>'|striptags }}"), "hi there");
    }

    #[test]
    fn test_filesizeformat() {
        let env = state();
        assert_eq!(apply(&env, "{{ 2048|filesizeformat }}"), "2.0 kB");
        assert_eq!(apply(&env, "{{ 2048|filesizeformat(true) }}"), "2.0 KiB");
        assert_eq!(apply(&env, "{{ 1|filesizeformat }}"), "1 Byte");
        assert_eq!(apply(&env, "{{ 999|filesizeformat }}"), "999 Bytes");
        assert_eq!(apply(&env, "{{ 3000000|filesizeformat }}"), "3.0 MB");
    }

    #[test]
    fn test_sequence_filters() {
        let env = state();
        assert_eq!(apply(&env, "{{ [3, 1, 2]|sort|join(',') }}"), "1,2,3");
        assert_eq!(apply(&env, "{{ [1, 2, 3]|reverse|join(',') }}"), "3,2,1");
        assert_eq!(apply(&env, "{{ [1, 1, 2]|unique|join(',') }}"), "1,2");
        assert_eq!(apply(&env, "{{ [1, 2, 3]|sum }}"), "6");
        assert_eq!(apply(&env, "{{ [4, 2, 9]|min }}"), "2");
        assert_eq!(apply(&env, "{{ [4, 2, 9]|max }}"), "9");
        assert_eq!(apply(&env, "{{ [1, 2, 3]|first }}"), "1");
        assert_eq!(apply(&env, "{{ [1, 2, 3]|last }}"), "3");
        assert_eq!(apply(&env, "{{ [1, 2, 3]|length }}"), "3");
    }

    #[test]
    fn test_batch_and_slice() {
        let env = state();
        assert_eq!(
            apply(&env, "{{ [1, 2, 3, 4, 5]|batch(2)|tojson }}"),
            "[[1,2],[3,4],[5]]"
        );
        assert_eq!(
            apply(&env, "{{ [1, 2, 3, 4, 5]|batch(2, 0)|tojson }}"),
            "[[1,2],[3,4],[5,0]]"
        );
        assert_eq!(
            apply(&env, "{{ [1, 2, 3, 4, 5]|slice(2)|tojson }}"),
            "[[1,2,3],[4,5]]"
        );
    }

    #[test]
    fn test_default_filter() {
        let env = state();
        assert_eq!(apply(&env, "{{ missing|default('x') }}"), "x");
        assert_eq!(apply(&env, "{{ ''|default('x') }}"), "");
        assert_eq!(apply(&env, "{{ ''|default('x', true) }}"), "x");
        assert_eq!(apply(&env, "{{ 'y'|default('x') }}"), "y");
    }

    #[test]
    fn test_select_map() {
        let env = state();
        assert_eq!(
            apply(&env, "{{ [1, 2, 3, 4]|select('odd')|join(',') }}"),
            "1,3"
        );
        assert_eq!(
            apply(&env, "{{ [1, 2, 3, 4]|reject('odd')|join(',') }}"),
            "2,4"
        );
        assert_eq!(
            apply(&env, "{{ ['a', 'b']|map('upper')|join(',') }}"),
            "A,B"
        );
        assert_eq!(
            apply(
                &env,
                "{{ [{'n': 1}, {'n': 2}]|map(attribute='n')|join(',') }}"
            ),
            "1,2"
        );
        assert_eq!(
            apply(
                &env,
                "{{ [{'n': 1}, {'n': 2}]|selectattr('n', 'eq', 2)|map(attribute='n')|join(',') }}"
            ),
            "2"
        );
    }

    #[test]
    fn test_xmlattr() {
        let env = state();
        assert_eq!(
            apply(
                &env,
                "{{ {'b': 1, 'a': 'x', 'c': none}|xmlattr }}"
            ),
            " a=\"x\" b=\"1\""
        );
    }

    #[test]
    fn test_wordwrap() {
        let env = state();
        assert_eq!(
            apply(&env, "{{ 'aaa bbb ccc'|wordwrap(7) }}"),
            "aaa bbb\nccc"
        );
        assert_eq!(
            apply(&env, "{{ 'aaaaaaaaaa'|wordwrap(4) }}"),
            "aaaa\naaaa\naa"
        );
    }

    #[test]
    fn test_urlize() {
        let env = state();
        assert_eq!(
            apply(&env, "{{ 'see https://example.com for info'|urlize }}"),
            "see <a href=\"https://example.com\">https://example.com</a> for info"
        );
        assert_eq!(
            apply(&env, "{{ 'mail me@example.com now'|urlize }}"),
            "mail <a href=\"mailto:me@example.com\">me@example.com</a> now"
        );
    }

    #[test]
    fn test_json_roundtrip() {
        let env = state();
        assert_eq!(
            apply(&env, "{{ '{\"a\": 1}'|fromjson|tojson }}"),
            "{\"a\":1}"
        );
    }

    #[test]
    fn test_numeric_filters() {
        let env = state();
        assert_eq!(apply(&env, "{{ -3|abs }}"), "3");
        assert_eq!(apply(&env, "{{ 2.75|round(1) }}"), "2.8");
        assert_eq!(apply(&env, "{{ 2.1|round(0, 'ceil') }}"), "3.0");
        assert_eq!(apply(&env, "{{ '42'|int }}"), "42");
        assert_eq!(apply(&env, "{{ 'x'|int }}"), "0");
        assert_eq!(apply(&env, "{{ '1.5'|float }}"), "1.5");
        assert_eq!(apply(&env, "{{ 1.0|floatformat }}"), "1");
        assert_eq!(apply(&env, "{{ 1.25|floatformat(1) }}"), "1.2");
    }

    #[test]
    fn test_groupby() {
        let env = state();
        assert_eq!(
            apply(
                &env,
                "{% for g in [{'k': 'a', 'v': 1}, {'k': 'b', 'v': 2}, {'k': 'a', 'v': 3}]|groupby('k') %}{{ g.grouper }}:{{ g.list|map(attribute='v')|join('+') }} {% endfor %}"
            ),
            "a:1+3 b:2 "
        );
    }
}
