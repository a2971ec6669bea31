//! <div align=center>
//!   <p><strong>Terrarium: a sandboxed Jinja2-compatible template engine</strong></p>
//! </div>
//!
//! Terrarium renders [Jinja2](https://jinja.palletsprojects.com/) templates
//! with a tree-walking evaluator and puts a security policy between the
//! template and the host: filters, functions, tests, attributes, methods
//! and template loads are gated, resource limits (time, memory, output,
//! recursion) are enforced per render, and every decision can be streamed
//! to pluggable audit sinks.
//!
//! ```jinja
//! {% for user in users %}
//!   <li>{{ user.name }}</li>
//! {% endfor %}
//! ```
//!
//! # Template Usage
//!
//! To use the engine one creates an [`Environment`] and populates it with
//! templates.  Afterwards templates can be loaded and rendered.  To pass
//! data one can pass any serde serializable value.  The [`context!`] macro
//! is the easiest way to build one:
//!
//! ```
//! use terrarium::{Environment, context};
//!
//! let mut env = Environment::new();
//! env.add_template("hello", "Hello {{ name }}!").unwrap();
//! let tmpl = env.get_template("hello").unwrap();
//! println!("{}", tmpl.render(context!(name => "John")).unwrap());
//! ```
//!
//! ```plain
//! Hello John!
//! ```
//!
//! # Sandboxing
//!
//! A [`SecurityPolicy`](sandbox::SecurityPolicy) snapshot can be installed
//! on the environment.  Every render then runs inside a fresh
//! `SecurityContext` that records violations and enforces the policy's
//! gates and limits:
//!
//! ```
//! use terrarium::{Environment, sandbox::SecurityPolicy};
//!
//! let mut env = Environment::new();
//! env.set_security_policy(
//!     SecurityPolicy::builder("web")
//!         .filter_whitelist(["upper", "lower", "join", "escape", "e"])
//!         .max_recursion_depth(64)
//!         .build(),
//! );
//! env.add_template("page.html", "{{ title|upper }}").unwrap();
//! ```
//!
//! # Streaming
//!
//! [`Template::generate`] returns a [`TemplateStream`], a lazy channel of
//! rendered fragments with cooperative back-pressure; consumers pull with
//! `next()`, `collect_string()` or `write_to()`.
//!
//! # Error Handling
//!
//! The engine tries to give good errors out of the box.  If you use
//! includes or template inheritance your experience will improve greatly if
//! you ensure to render chained errors, see [`Error`] for details.
#![deny(missing_docs)]
#![allow(clippy::get_first)]

#[macro_use]
mod macros;

mod defaults;
mod environment;
mod error;
mod eval;
mod expression;
mod output;
mod stream;
mod syntax;
mod template;
mod utils;

pub mod audit;
pub mod filters;
pub mod functions;
pub mod loader;
pub mod sandbox;
pub mod tests;
pub mod value;

pub use self::defaults::{default_auto_escape_callback, select_autoescape};
pub use self::environment::{Environment, NewlineSequence};
pub use self::error::{Error, ErrorKind};
pub use self::eval::State;
pub use self::expression::Expression;
pub use self::output::Output;
pub use self::stream::TemplateStream;
pub use self::template::Template;
pub use self::utils::{AutoEscape, HtmlEscape};

pub use self::macros::__context;
