use similar_asserts::assert_eq;

use terrarium::{context, Environment};

#[test]
fn test_stream_matches_render() {
    let mut env = Environment::new();
    env.add_template(
        "t",
        "{% for x in range(100) %}line {{ x }}\n{% endfor %}",
    )
    .unwrap();
    let tmpl = env.get_template("t").unwrap();
    let rendered = tmpl.render(context! {}).unwrap();
    let streamed = tmpl.generate(context! {}).collect_string().unwrap();
    assert_eq!(streamed, rendered);
}

#[test]
fn test_stream_strips_trailing_newline() {
    let mut env = Environment::new();
    env.add_template("t", "hello\nworld\n").unwrap();
    let tmpl = env.get_template("t").unwrap();
    assert_eq!(
        tmpl.generate(context! {}).collect_string().unwrap(),
        "hello\nworld"
    );
}

#[test]
fn test_stream_keeps_trailing_newline_when_configured() {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.add_template("t", "hello\r\n").unwrap();
    let tmpl = env.get_template("t").unwrap();
    assert_eq!(
        tmpl.generate(context! {}).collect_string().unwrap(),
        "hello\r\n"
    );
}

#[test]
fn test_stream_strips_crlf() {
    let mut env = Environment::new();
    env.add_template("t", "hello\r\n").unwrap();
    let tmpl = env.get_template("t").unwrap();
    assert_eq!(tmpl.generate(context! {}).collect_string().unwrap(), "hello");
}

#[test]
fn test_stream_delivers_error_after_output() {
    let mut env = Environment::new();
    env.add_template("t", "before {{ 1 / 0 }}").unwrap();
    let tmpl = env.get_template("t").unwrap();

    let mut stream = tmpl.generate(context! {});
    let mut output = String::new();
    let mut saw_error = false;
    for fragment in &mut stream {
        match fragment {
            Ok(chunk) => output.push_str(&chunk),
            Err(err) => {
                assert!(err.to_string().contains("division by zero"));
                saw_error = true;
                break;
            }
        }
    }
    assert!(saw_error);
    assert_eq!(output, "before ");
}

#[test]
fn test_stream_write_to() {
    let mut env = Environment::new();
    env.add_template("t", "a{{ 1 + 1 }}c").unwrap();
    let tmpl = env.get_template("t").unwrap();
    let mut rv = String::new();
    tmpl.generate(context! {}).write_to(&mut rv).unwrap();
    assert_eq!(rv, "a2c");
}

#[test]
fn test_stream_drop_cancels_producer() {
    let mut env = Environment::new();
    env.add_template("t", "{% for x in range(100000) %}xxxxxxxxxx{% endfor %}")
        .unwrap();
    let tmpl = env.get_template("t").unwrap();
    let mut stream = tmpl.generate(context! {});
    // consume one fragment, then drop the stream; the producer thread must
    // notice the closed channel and unwind instead of rendering everything
    let first = stream.next().unwrap().unwrap();
    assert!(!first.is_empty());
    drop(stream);
}

#[test]
fn test_render_to_writer() {
    let mut env = Environment::new();
    env.add_template("t", "x = {{ x }}").unwrap();
    let mut rv = String::new();
    env.get_template("t")
        .unwrap()
        .render_to(&mut rv, context!(x => 7))
        .unwrap();
    assert_eq!(rv, "x = 7");
}
