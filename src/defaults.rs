use std::collections::BTreeMap;
use std::sync::Arc;

use crate::environment::{FilterFunc, TestFunc};
use crate::filters;
use crate::functions;
use crate::tests;
use crate::utils::AutoEscape;
use crate::value::Value;

pub(crate) fn no_auto_escape(_: &str) -> AutoEscape {
    AutoEscape::None
}

/// The default logic for auto escaping based on file extension.
///
/// * [`Html`](AutoEscape::Html): `.html`, `.htm`, `.xml`
/// * [`Json`](AutoEscape::Json): `.json`, `.js`, `.yaml`, `.yml`
/// * [`None`](AutoEscape::None): _all others_
pub fn default_auto_escape_callback(name: &str) -> AutoEscape {
    match name.rsplit('.').next() {
        Some("html" | "htm" | "xml") => AutoEscape::Html,
        Some("json" | "js" | "yaml" | "yml") => AutoEscape::Json,
        _ => AutoEscape::None,
    }
}

/// Creates an autoescape selector from extension lists.
///
/// Templates whose extension appears in `enabled_extensions` escape as
/// HTML, ones in `disabled_extensions` never escape.  `default_for_string`
/// applies to nameless templates (`<string>`, `<expression>`), `default`
/// to everything else.
///
/// ```
/// # use terrarium::{Environment, select_autoescape};
/// let mut env = Environment::new();
/// env.set_auto_escape_callback(select_autoescape(
///     &["html", "htm", "xml"],
///     &["txt"],
///     false,
///     false,
/// ));
/// ```
pub fn select_autoescape(
    enabled_extensions: &[&str],
    disabled_extensions: &[&str],
    default_for_string: bool,
    default: bool,
) -> impl Fn(&str) -> AutoEscape + Send + Sync + 'static {
    fn normalize(extensions: &[&str]) -> Vec<String> {
        extensions
            .iter()
            .map(|x| x.trim_start_matches('.').to_ascii_lowercase())
            .collect()
    }
    let enabled = normalize(enabled_extensions);
    let disabled = normalize(disabled_extensions);
    move |name: &str| -> AutoEscape {
        if name.starts_with('<') && name.ends_with('>') {
            return if default_for_string {
                AutoEscape::Html
            } else {
                AutoEscape::None
            };
        }
        let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        if enabled.iter().any(|x| *x == ext) {
            AutoEscape::Html
        } else if disabled.iter().any(|x| *x == ext) {
            AutoEscape::None
        } else if default {
            AutoEscape::Html
        } else {
            AutoEscape::None
        }
    }
}

macro_rules! filter_entry {
    ($rv:expr, $name:expr, $func:path) => {
        $rv.insert(
            $name.to_string(),
            Arc::new($func) as FilterFunc,
        );
    };
}

pub(crate) fn get_builtin_filters() -> BTreeMap<String, FilterFunc> {
    let mut rv = BTreeMap::new();
    filter_entry!(rv, "safe", filters::safe);
    filter_entry!(rv, "escape", filters::escape);
    filter_entry!(rv, "e", filters::escape);
    filter_entry!(rv, "forceescape", filters::forceescape);
    filter_entry!(rv, "lower", filters::lower);
    filter_entry!(rv, "upper", filters::upper);
    filter_entry!(rv, "capitalize", filters::capitalize);
    filter_entry!(rv, "title", filters::title);
    filter_entry!(rv, "trim", filters::trim);
    filter_entry!(rv, "striptags", filters::striptags);
    filter_entry!(rv, "replace", filters::replace);
    filter_entry!(rv, "truncate", filters::truncate);
    filter_entry!(rv, "wordcount", filters::wordcount);
    filter_entry!(rv, "reverse", filters::reverse);
    filter_entry!(rv, "center", filters::center);
    filter_entry!(rv, "indent", filters::indent);
    filter_entry!(rv, "wordwrap", filters::wordwrap);
    filter_entry!(rv, "round", filters::round);
    filter_entry!(rv, "abs", filters::abs);
    filter_entry!(rv, "int", filters::int);
    filter_entry!(rv, "float", filters::float);
    filter_entry!(rv, "default", filters::default);
    filter_entry!(rv, "d", filters::default);
    filter_entry!(rv, "length", filters::length);
    filter_entry!(rv, "count", filters::length);
    filter_entry!(rv, "first", filters::first);
    filter_entry!(rv, "last", filters::last);
    filter_entry!(rv, "join", filters::join);
    filter_entry!(rv, "sort", filters::sort);
    filter_entry!(rv, "unique", filters::unique);
    filter_entry!(rv, "min", filters::min);
    filter_entry!(rv, "max", filters::max);
    filter_entry!(rv, "sum", filters::sum);
    filter_entry!(rv, "list", filters::list);
    filter_entry!(rv, "items", filters::items);
    filter_entry!(rv, "slice", filters::slice);
    filter_entry!(rv, "batch", filters::batch);
    filter_entry!(rv, "groupby", filters::groupby);
    filter_entry!(rv, "dictsort", filters::dictsort);
    filter_entry!(rv, "urlencode", filters::urlencode);
    filter_entry!(rv, "escapejs", filters::escapejs);
    filter_entry!(rv, "filesizeformat", filters::filesizeformat);
    filter_entry!(rv, "floatformat", filters::floatformat);
    filter_entry!(rv, "pprint", filters::pprint);
    filter_entry!(rv, "format", filters::format);
    filter_entry!(rv, "urlize", filters::urlize);
    filter_entry!(rv, "xmlattr", filters::xmlattr);
    filter_entry!(rv, "shuffle", filters::shuffle);
    filter_entry!(rv, "random", filters::random);
    filter_entry!(rv, "tojson", filters::tojson);
    filter_entry!(rv, "fromjson", filters::fromjson);
    filter_entry!(rv, "attr", filters::attr);
    filter_entry!(rv, "map", filters::map);
    filter_entry!(rv, "select", filters::select);
    filter_entry!(rv, "reject", filters::reject);
    filter_entry!(rv, "selectattr", filters::selectattr);
    filter_entry!(rv, "rejectattr", filters::rejectattr);
    rv
}

macro_rules! test_entry {
    ($rv:expr, $name:expr, $func:path) => {
        $rv.insert($name.to_string(), Arc::new($func) as TestFunc);
    };
}

pub(crate) fn get_builtin_tests() -> BTreeMap<String, TestFunc> {
    let mut rv = BTreeMap::new();
    test_entry!(rv, "defined", tests::is_defined);
    test_entry!(rv, "undefined", tests::is_undefined);
    test_entry!(rv, "none", tests::is_none);
    test_entry!(rv, "safe", tests::is_safe);
    test_entry!(rv, "escaped", tests::is_safe);
    test_entry!(rv, "odd", tests::is_odd);
    test_entry!(rv, "even", tests::is_even);
    test_entry!(rv, "divisibleby", tests::is_divisibleby);
    test_entry!(rv, "number", tests::is_number);
    test_entry!(rv, "integer", tests::is_integer);
    test_entry!(rv, "float", tests::is_float);
    test_entry!(rv, "string", tests::is_string);
    test_entry!(rv, "boolean", tests::is_boolean);
    test_entry!(rv, "true", tests::is_true);
    test_entry!(rv, "false", tests::is_false);
    test_entry!(rv, "sequence", tests::is_sequence);
    test_entry!(rv, "iterable", tests::is_iterable);
    test_entry!(rv, "mapping", tests::is_mapping);
    test_entry!(rv, "callable", tests::is_callable);
    test_entry!(rv, "startingwith", tests::is_startingwith);
    test_entry!(rv, "endingwith", tests::is_endingwith);
    test_entry!(rv, "lower", tests::is_lower);
    test_entry!(rv, "upper", tests::is_upper);
    test_entry!(rv, "sameas", tests::is_sameas);
    test_entry!(rv, "eq", tests::is_eq);
    test_entry!(rv, "equalto", tests::is_eq);
    test_entry!(rv, "==", tests::is_eq);
    test_entry!(rv, "ne", tests::is_ne);
    test_entry!(rv, "!=", tests::is_ne);
    test_entry!(rv, "lt", tests::is_lt);
    test_entry!(rv, "lessthan", tests::is_lt);
    test_entry!(rv, "<", tests::is_lt);
    test_entry!(rv, "le", tests::is_le);
    test_entry!(rv, "<=", tests::is_le);
    test_entry!(rv, "gt", tests::is_gt);
    test_entry!(rv, "greaterthan", tests::is_gt);
    test_entry!(rv, ">", tests::is_gt);
    test_entry!(rv, "ge", tests::is_ge);
    test_entry!(rv, ">=", tests::is_ge);
    test_entry!(rv, "in", tests::is_in);
    rv
}

pub(crate) fn get_globals() -> BTreeMap<String, Value> {
    let mut rv = BTreeMap::new();
    rv.insert(
        "range".to_string(),
        Value::from_function("range", functions::range),
    );
    rv.insert(
        "dict".to_string(),
        Value::from_function("dict", functions::dict),
    );
    rv.insert(
        "namespace".to_string(),
        Value::from_function("namespace", functions::namespace),
    );
    rv.insert(
        "cycler".to_string(),
        Value::from_function("cycler", functions::cycler),
    );
    rv.insert(
        "joiner".to_string(),
        Value::from_function("joiner", functions::joiner),
    );
    rv
}
