use similar_asserts::assert_eq;

use terrarium::value::Value;
use terrarium::{context, Environment, ErrorKind};

fn render(source: &str) -> String {
    Environment::new().render_str(source, context! {}).unwrap()
}

fn render_ctx(source: &str, ctx: Value) -> String {
    Environment::new().render_str(source, ctx).unwrap()
}

#[test]
fn test_basic_expressions() {
    assert_eq!(render("{{ 1 + 2 }}"), "3");
    assert_eq!(render("{{ 7 // 2 }}"), "3");
    assert_eq!(render("{{ 7 / 2 }}"), "3.5");
    assert_eq!(render("{{ 2 ** 8 }}"), "256");
    assert_eq!(render("{{ 7 % 3 }}"), "1");
    assert_eq!(render("{{ -(3) }}"), "-3");
    assert_eq!(render("{{ 'a' ~ 1 }}"), "a1");
    assert_eq!(render("{{ 1 + 1.5 }}"), "2.5");
    assert_eq!(render("{{ 'ab' * 2 }}"), "abab");
}

#[test]
fn test_short_circuit_returns_deciding_operand() {
    assert_eq!(render("{{ 0 or 'x' }}"), "x");
    assert_eq!(render("{{ 'a' and 'b' }}"), "b");
    assert_eq!(render("{{ false and undefined_thing }}"), "False");
    assert_eq!(render("{{ true or undefined_thing }}"), "True");
    assert_eq!(render("{{ not 0 }}"), "True");
}

#[test]
fn test_chained_comparisons() {
    assert_eq!(render("{{ 1 < 2 < 3 }}"), "True");
    assert_eq!(render("{{ 1 < 2 < 2 }}"), "False");
    assert_eq!(render("{{ 3 >= 3 > 2 }}"), "True");
    assert_eq!(render("{{ 1 == 1.0 }}"), "True");
    assert_eq!(render("{{ 2 in [1, 2] }}"), "True");
    assert_eq!(render("{{ 3 not in [1, 2] }}"), "True");
    assert_eq!(render("{{ 'ell' in 'hello' }}"), "True");
    assert_eq!(render("{{ 'a' in {'a': 1} }}"), "True");
}

#[test]
fn test_slicing() {
    assert_eq!(render("{{ 'abcdef'[1:4] }}"), "bcd");
    assert_eq!(render("{{ 'abcdef'[-2:] }}"), "ef");
    assert_eq!(render("{{ 'abc'[-1] }}"), "c");
    assert_eq!(render("{{ [1, 2, 3, 4][::2]|join(',') }}"), "1,3");
    assert_eq!(render("{{ [1, 2, 3][::-1]|join(',') }}"), "3,2,1");
}

#[test]
fn test_conditionals() {
    assert_eq!(render("{% if 1 > 2 %}a{% elif 1 == 1 %}b{% else %}c{% endif %}"), "b");
    assert_eq!(render("{{ 'yes' if true else 'no' }}"), "yes");
    assert_eq!(render("{{ 'yes' if false else 'no' }}"), "no");
}

#[test]
fn test_for_loop_and_loop_variable() {
    assert_eq!(
        render("{% for x in [10, 20] %}{{ loop.index }}:{{ x }} {% endfor %}"),
        "1:10 2:20 "
    );
    assert_eq!(
        render("{% for c in 'ab' %}{{ loop.first }},{{ loop.last }};{% endfor %}"),
        "True,False;False,True;"
    );
    assert_eq!(
        render("{% for x in [1, 2, 3] %}{{ loop.revindex }}{% endfor %}"),
        "321"
    );
    assert_eq!(
        render("{% for x in [1, 2] %}{{ loop.previtem|default('-') }}{{ loop.nextitem|default('-') }} {% endfor %}"),
        "-2 1- "
    );
}

#[test]
fn test_for_loop_tuple_unpacking() {
    assert_eq!(
        render("{% for k, v in [['a', 1], ['b', 2]] %}{{ k }}={{ v }} {% endfor %}"),
        "a=1 b=2 "
    );
    assert_eq!(
        render("{% for k in {'b': 2, 'a': 1} %}{{ k }}{% endfor %}"),
        "ab"
    );
}

#[test]
fn test_for_loop_filter_and_cycle() {
    assert_eq!(
        render("{% for x in [1, 2, 3, 4] if x is even %}{{ x }}:{{ loop.index }} {% endfor %}"),
        "2:1 4:2 "
    );
    assert_eq!(
        render("{% for x in [1, 2, 3] %}{{ loop.cycle('a', 'b') }}{% endfor %}"),
        "aba"
    );
    assert_eq!(
        render("{% for x in [1, 1, 2] %}{{ loop.changed(x) }} {% endfor %}"),
        "True False True "
    );
}

#[test]
fn test_for_else_semantics() {
    // empty iterables run the else block and no iterations
    assert_eq!(render("{% for x in [] %}x{% else %}none{% endfor %}"), "none");
    // normal completion also runs else
    assert_eq!(render("{% for x in [1] %}a{% else %}b{% endfor %}"), "ab");
    // break suppresses else
    assert_eq!(
        render("{% for x in [1, 2, 3] %}{{ x }}{% if x == 2 %}{% break %}{% endif %}{% else %}!{% endfor %}"),
        "12"
    );
    // continue skips the remaining body, index keeps counting
    assert_eq!(
        render("{% for x in [1, 2, 3] %}{% if x == 2 %}{% continue %}{% endif %}{{ x }}{% else %}.{% endfor %}"),
        "13."
    );
}

#[test]
fn test_recursive_loop() {
    let tree = context! {
        tree => vec![
            context!(name => "a", children => vec![
                context!(name => "b"),
                context!(name => "c"),
            ]),
            context!(name => "d"),
        ]
    };
    assert_eq!(
        render_ctx(
            "{% for item in tree recursive %}{{ item.name }}{% if item.children %}({{ loop(item.children) }}){% endif %}{% endfor %}",
            tree
        ),
        "a(bc)d"
    );
}

#[test]
fn test_set_and_scoping() {
    assert_eq!(render("{% set x = 1 %}{{ x }}"), "1");
    assert_eq!(
        render("{% set (a, b) = [1, 2] %}{{ a }}{{ b }}"),
        "12"
    );
    assert_eq!(
        render("{% with a = 1 %}{{ a }}{% endwith %}{{ a is defined }}"),
        "1False"
    );
    assert_eq!(
        render("{% set x %}captured{% endset %}{{ x }}"),
        "captured"
    );
    assert_eq!(
        render("{% set x | upper %}abc{% endset %}{{ x }}"),
        "ABC"
    );
}

#[test]
fn test_namespace_assignment() {
    assert_eq!(
        render("{% set ns = namespace(found=false) %}{% for x in [1, 2] %}{% set ns.found = true %}{% endfor %}{{ ns.found }}"),
        "True"
    );
}

#[test]
fn test_filter_and_spaceless_blocks() {
    assert_eq!(render("{% filter upper %}ab{% endfilter %}"), "AB");
    assert_eq!(
        render("{% filter lower|trim %}  AB  {% endfilter %}"),
        "ab"
    );
    assert_eq!(
        render("{% spaceless %} <p> a </p>   <p>b</p> {% endspaceless %}"),
        "<p> a </p><p>b</p>"
    );
}

#[test]
fn test_do_statement() {
    assert_eq!(render("a{% do 'x'|upper %}b"), "ab");
    assert_eq!(
        render("{% set c = cycler('x', 'y') %}{% do c.next() %}{{ c.next() }}"),
        "y"
    );
}

#[test]
fn test_macros_with_defaults_and_collectors() {
    assert_eq!(
        render(
            "{% macro g(a, b='B', *rest, **kw) %}{{ a }}-{{ b }}-{{ rest|join(',') }}-{{ kw.x }}{% endmacro %}{{ g(1, 2, 3, 4, x='X') }}"
        ),
        "1-2-3,4-X"
    );
    assert_eq!(
        render("{% macro g(a, b='B') %}{{ a }}{{ b }}{% endmacro %}{{ g(1) }}"),
        "1B"
    );
    assert_eq!(
        render("{% macro g(a) %}{{ a }}{% endmacro %}{{ g(a=5) }}"),
        "5"
    );
}

#[test]
fn test_macro_binding_errors() {
    let env = Environment::new();
    let err = env
        .render_str("{% macro g(a) %}{{ a }}{% endmacro %}{{ g() }}", context! {})
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MacroError);
    assert!(err.to_string().contains("missing required argument 'a'"));

    let err = env
        .render_str("{% macro g(a) %}{{ a }}{% endmacro %}{{ g(1, 2) }}", context! {})
        .unwrap_err();
    assert!(err.to_string().contains("too many positional arguments"));

    let err = env
        .render_str(
            "{% macro g(a) %}{{ a }}{% endmacro %}{{ g(1, a=2) }}",
            context! {},
        )
        .unwrap_err();
    assert!(err.to_string().contains("multiple values for argument 'a'"));

    let err = env
        .render_str(
            "{% macro g(a) %}{{ a }}{% endmacro %}{{ g(1, b=2) }}",
            context! {},
        )
        .unwrap_err();
    assert!(err.to_string().contains("unexpected keyword argument 'b'"));
}

#[test]
fn test_macro_recursion() {
    assert_eq!(
        render(
            "{% macro countdown(n) %}{{ n }}{% if n > 0 %} {{ countdown(n - 1) }}{% endif %}{% endmacro %}{{ countdown(3) }}"
        ),
        "3 2 1 0"
    );
}

#[test]
fn test_call_blocks() {
    assert_eq!(
        render(
            "{% macro dialog() %}<<{{ caller() }}>>{% endmacro %}{% call dialog() %}hi{% endcall %}"
        ),
        "<<hi>>"
    );
    assert_eq!(
        render(
            "{% macro each(items) %}{% for i in items %}{{ caller(i) }}{% endfor %}{% endmacro %}{% call(item) each([1, 2]) %}[{{ item }}]{% endcall %}"
        ),
        "[1][2]"
    );
}

#[test]
fn test_inheritance_with_super() {
    // super() renders the parent definition in place
    let mut env = Environment::new();
    env.add_template("parent", "<p>{% block body %}PARENT{% endblock %}</p>")
        .unwrap();
    env.add_template(
        "child",
        "{% extends \"parent\" %}{% block body %}{{ super() }} + CHILD{% endblock %}",
    )
    .unwrap();
    assert_eq!(
        env.get_template("child").unwrap().render(context! {}).unwrap(),
        "<p>PARENT + CHILD</p>"
    );
}

#[test]
fn test_inheritance_three_levels() {
    let mut env = Environment::new();
    env.add_template("base", "[{% block b %}base{% endblock %}]")
        .unwrap();
    env.add_template(
        "mid",
        "{% extends 'base' %}{% block b %}mid({{ super() }}){% endblock %}",
    )
    .unwrap();
    env.add_template(
        "leaf",
        "{% extends 'mid' %}{% block b %}leaf({{ super() }}){% endblock %}",
    )
    .unwrap();
    assert_eq!(
        env.get_template("leaf").unwrap().render(context! {}).unwrap(),
        "[leaf(mid(base))]"
    );
}

#[test]
fn test_inheritance_cycle_detected() {
    let mut env = Environment::new();
    env.add_template("a", "{% extends 'b' %}").unwrap();
    env.add_template("b", "{% extends 'a' %}").unwrap();
    let err = env.get_template("a").unwrap().render(context! {}).unwrap_err();
    assert!(err.to_string().contains("cycle"));
}

#[test]
fn test_blocks_see_context() {
    let mut env = Environment::new();
    env.add_template("parent", "{% block b %}{% endblock %}").unwrap();
    env.add_template(
        "child",
        "{% extends 'parent' %}{% block b %}{{ v }}!{% endblock %}",
    )
    .unwrap();
    assert_eq!(
        env.get_template("child")
            .unwrap()
            .render(context!(v => 1))
            .unwrap(),
        "1!"
    );
}

#[test]
fn test_autoescape_and_markup() {
    // an escaped variable next to a safe value
    let env = Environment::new();
    let rv = env
        .render_named_str(
            "t.html",
            "{{ a }}|{{ b }}",
            context! {
                a => "<x>",
                b => Value::from_safe_string("<y>".to_string()),
            },
        )
        .unwrap();
    assert_eq!(rv, "&lt;x&gt;|<y>");
}

#[test]
fn test_autoescape_idempotent_through_escape_filter() {
    let env = Environment::new();
    // escape(escape(x)) == escape(x)
    assert_eq!(
        env.render_named_str("t.html", "{{ v|escape|escape }}", context!(v => "<"))
            .unwrap(),
        "&lt;"
    );
    // forceescape does escape twice
    assert_eq!(
        env.render_named_str("t.html", "{{ v|escape|forceescape }}", context!(v => "<"))
            .unwrap(),
        "&amp;lt;"
    );
}

#[test]
fn test_autoescape_block() {
    assert_eq!(
        render("{% autoescape true %}{{ '<' }}{% endautoescape %}{{ '<' }}"),
        "&lt;<"
    );
    let env = Environment::new();
    assert_eq!(
        env.render_named_str(
            "t.html",
            "{% autoescape false %}{{ v }}{% endautoescape %}",
            context!(v => "<")
        )
        .unwrap(),
        "<"
    );
}

#[test]
fn test_include_with_fallback_list() {
    // the first existing template of a list is included
    let mut env = Environment::new();
    env.add_template("partial.html", "<p>fallback</p>").unwrap();
    assert_eq!(
        env.render_str(
            "{% include [\"missing.html\", \"partial.html\"] %}",
            context! {}
        )
        .unwrap(),
        "<p>fallback</p>"
    );
}

#[test]
fn test_include_modes() {
    let mut env = Environment::new();
    env.add_template("show_x", "{{ x|default('?') }}").unwrap();
    assert_eq!(
        env.render_str("{% set x = 1 %}{% include 'show_x' %}", context! {})
            .unwrap(),
        "1"
    );
    assert_eq!(
        env.render_str(
            "{% set x = 1 %}{% include 'show_x' without context %}",
            context! {}
        )
        .unwrap(),
        "?"
    );
    // ignore missing swallows only TemplateNotFound
    assert_eq!(
        env.render_str("{% include 'nope' ignore missing %}!", context! {})
            .unwrap(),
        "!"
    );
    let err = env
        .render_str("{% include ['a', 'b'] %}", context! {})
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplatesNotFound);
    assert!(err.to_string().contains('a') && err.to_string().contains('b'));
}

#[test]
fn test_imports() {
    let mut env = Environment::new();
    env.add_template("helpers", "{% macro wrap(x) %}[{{ x }}]{% endmacro %}")
        .unwrap();
    assert_eq!(
        env.render_str("{% import 'helpers' as h %}{{ h.wrap(1) }}", context! {})
            .unwrap(),
        "[1]"
    );
    assert_eq!(
        env.render_str(
            "{% from 'helpers' import wrap as w %}{{ w(2) }}",
            context! {}
        )
        .unwrap(),
        "[2]"
    );
    let err = env
        .render_str("{% from 'helpers' import nope %}", context! {})
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImportError);
}

#[test]
fn test_trans_blocks() {
    let env = Environment::new();
    assert_eq!(
        env.render_str(
            "{% trans %}Hello {{ user }}!{% endtrans %}",
            context!(user => "Pete")
        )
        .unwrap(),
        "Hello Pete!"
    );
    assert_eq!(
        env.render_str(
            "{% trans count=n %}{{ count }} item{% pluralize %}{{ count }} items{% endtrans %}",
            context!(n => 2)
        )
        .unwrap(),
        "2 items"
    );
    assert_eq!(
        env.render_str(
            "{% trans count=n %}{{ count }} item{% pluralize %}{{ count }} items{% endtrans %}",
            context!(n => 1)
        )
        .unwrap(),
        "1 item"
    );

    // a gettext callable takes over the lookup
    fn gettext(_state: &terrarium::State, args: &[Value]) -> Result<Value, terrarium::Error> {
        let msgid = args[0].to_string();
        Ok(Value::from(if msgid == "Hi %(user)s" {
            "Hallo %(user)s".to_string()
        } else {
            msgid
        }))
    }
    let mut env = Environment::new();
    env.add_function("gettext", gettext);
    assert_eq!(
        env.render_str(
            "{% trans %}Hi {{ user }}{% endtrans %}",
            context!(user => "Pete")
        )
        .unwrap(),
        "Hallo Pete"
    );
}

#[test]
fn test_raw_and_comments() {
    assert_eq!(render("{% raw %}{{ not rendered }}{% endraw %}"), "{{ not rendered }}");
    assert_eq!(render("a{# comment #}b"), "ab");
    assert_eq!(render("a   {{- 'b' -}}   c"), "abc");
}

#[test]
fn test_undefined_behavior() {
    let env = Environment::new();
    let err = env.render_str("{{ missing }}", context! {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedError);

    let err = env.render_str("{{ missing + 1 }}", context! {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedError);
    assert!(err.to_string().contains("missing"));

    // recoverable through default/defined/undefined
    assert_eq!(
        env.render_str("{{ missing|default('x') }}", context! {}).unwrap(),
        "x"
    );
    assert_eq!(
        env.render_str("{{ missing is undefined }}", context! {}).unwrap(),
        "True"
    );
}

#[test]
fn test_division_by_zero() {
    let env = Environment::new();
    let err = env.render_str("{{ 1 / 0 }}", context! {}).unwrap_err();
    assert!(err.to_string().contains("division by zero"));
    let err = env.render_str("{{ 1 // 0 }}", context! {}).unwrap_err();
    assert!(err.to_string().contains("division by zero"));
}

#[test]
fn test_error_location() {
    let mut env = Environment::new();
    env.add_template("boom.txt", "line one\n{{ 1 / 0 }}").unwrap();
    let err = env
        .get_template("boom.txt")
        .unwrap()
        .render(context! {})
        .unwrap_err();
    assert_eq!(err.name(), Some("boom.txt"));
    assert_eq!(err.line(), Some(2));
}

#[test]
fn test_trailing_newline_policy() {
    let mut env = Environment::new();
    env.add_template("t", "hello\n").unwrap();
    assert_eq!(env.get_template("t").unwrap().render(context! {}).unwrap(), "hello");

    env.set_keep_trailing_newline(true);
    env.add_template("t2", "hello\n").unwrap();
    assert_eq!(
        env.get_template("t2").unwrap().render(context! {}).unwrap(),
        "hello\n"
    );
}

#[test]
fn test_finalize_hook() {
    let mut env = Environment::new();
    env.set_finalize(|_state, value| {
        if value.is_none() {
            Ok(Value::from("-"))
        } else {
            Ok(value.clone())
        }
    });
    assert_eq!(env.render_str("{{ none }}|{{ 1 }}", context! {}).unwrap(), "-|1");
}

#[test]
fn test_registered_macros_resolve_namespaced() {
    fn shout(_state: &terrarium::State, args: &[Value]) -> Result<Value, terrarium::Error> {
        Ok(Value::from(args[0].to_string().to_uppercase()))
    }
    let env = Environment::new();
    env.add_macro("util.text.shout", Value::from_function("shout", shout));
    assert_eq!(
        env.render_str("{{ util.text.shout('hi') }}", context! {}).unwrap(),
        "HI"
    );
}

#[test]
fn test_expression_api() {
    let env = Environment::new();
    let expr = env.compile_expression("number < 42").unwrap();
    assert!(expr.eval(context!(number => 23)).unwrap().is_true());
    assert!(!expr.eval(context!(number => 66)).unwrap().is_true());
}

#[test]
fn test_render_is_deterministic() {
    let env = Environment::new();
    let source = "{% for x in [3, 1, 2]|sort %}{{ x }}{% endfor %}";
    let first = env.render_str(source, context! {}).unwrap();
    for _ in 0..3 {
        assert_eq!(env.render_str(source, context! {}).unwrap(), first);
    }
}
