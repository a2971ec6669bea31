use std::fmt;
use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::eval::State;
use crate::syntax::ast;
use crate::utils::AutoEscape;
use crate::value::{split_kwargs, Namespace, Object, Value, ValueRepr};

/// A macro value.
///
/// Macros close over the frame they were declared in (see
/// [`Context::closure`](crate::eval::context)) and render their body into a
/// capture buffer; the buffered text is returned as a safe string.
pub(crate) struct MacroData {
    pub name: String,
    pub args: Vec<String>,
    pub defaults: Vec<ast::Expr>,
    pub varargs: Option<String>,
    pub varkwargs: Option<String>,
    pub body: Vec<ast::Stmt>,
    pub closure: Arc<Namespace>,
    pub template_name: Arc<str>,
    pub auto_escape: AutoEscape,
    /// Set for the synthesized `caller` macro of a `{% call %}` block.
    pub is_caller: bool,
}

impl fmt::Debug for MacroData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<macro {}>", self.name)
    }
}

impl fmt::Display for MacroData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<macro {}>", self.name)
    }
}

fn macro_error(name: &str, detail: String) -> Error {
    Error::new(ErrorKind::MacroError, format!("macro '{name}': {detail}"))
}

impl MacroData {
    /// Binds call arguments following the Jinja2 rules.
    ///
    /// Returns the parameter bindings in declaration order plus the `caller`
    /// value when one was passed.
    fn bind_args(
        &self,
        state: &State,
        args: &[Value],
    ) -> Result<(Vec<(String, Value)>, Option<Value>), Error> {
        let (positional, kwargs) = split_kwargs(args);
        let mut bindings: Vec<(String, Option<Value>)> =
            self.args.iter().map(|name| (name.clone(), None)).collect();
        let mut caller = None;
        let mut rest = Vec::new();
        let mut collected_kwargs = crate::value::ValueMap::new();

        // positional arguments bind left to right, extras overflow into the
        // variadic collector
        for (idx, value) in positional.iter().enumerate() {
            if idx < bindings.len() {
                bindings[idx].1 = Some(value.clone());
            } else if self.varargs.is_some() {
                rest.push(value.clone());
            } else {
                return Err(macro_error(&self.name, "too many positional arguments".into()));
            }
        }

        if let Some(kwargs) = kwargs {
            for (key, value) in kwargs.iter() {
                let key_name = match key.as_str() {
                    Some(name) => name,
                    None => continue,
                };
                if key_name == "caller" && !self.args.iter().any(|x| x == "caller") {
                    caller = Some(value.clone());
                    continue;
                }
                let param_idx = bindings
                    .iter()
                    .position(|(name, _)| name.as_str() == key_name);
                match param_idx {
                    Some(idx) => {
                        if bindings[idx].1.is_some() {
                            return Err(macro_error(
                                &self.name,
                                format!("multiple values for argument '{key_name}'"),
                            ));
                        }
                        bindings[idx].1 = Some(value.clone());
                    }
                    None => {
                        if self.varkwargs.is_some() {
                            collected_kwargs.insert(key.clone(), value.clone());
                        } else {
                            return Err(macro_error(
                                &self.name,
                                format!("unexpected keyword argument '{key_name}'"),
                            ));
                        }
                    }
                }
            }
        }

        // defaults are right-aligned over the parameter list and evaluated
        // at invocation time
        let defaults_offset = self.args.len() - self.defaults.len().min(self.args.len());
        let mut rv = Vec::with_capacity(bindings.len() + 2);
        for (idx, (name, slot)) in bindings.into_iter().enumerate() {
            let value = match slot {
                Some(value) => value,
                None => {
                    if idx >= defaults_offset {
                        let default_expr = &self.defaults[idx - defaults_offset];
                        ok!(crate::eval::eval_in_closure(
                            state,
                            &self.closure,
                            &self.template_name,
                            default_expr,
                        ))
                    } else {
                        return Err(macro_error(
                            &self.name,
                            format!("missing required argument '{name}'"),
                        ));
                    }
                }
            };
            rv.push((name, value));
        }

        if let Some(ref varargs) = self.varargs {
            rv.push((varargs.clone(), Value::from(rest)));
        }
        if let Some(ref varkwargs) = self.varkwargs {
            rv.push((
                varkwargs.clone(),
                Value(ValueRepr::Map(
                    Arc::new(collected_kwargs),
                    crate::value::MapType::Normal,
                )),
            ));
        }

        Ok((rv, caller))
    }
}

impl Object for MacroData {
    fn attributes(&self) -> &[&str] {
        &["name", "arguments", "caller"]
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::from(self.name.as_str())),
            "arguments" => Some(Value::from(
                self.args
                    .iter()
                    .map(|x| Value::from(x.as_str()))
                    .collect::<Vec<_>>(),
            )),
            "caller" => Some(Value::from(self.is_caller)),
            _ => None,
        }
    }

    fn call(&self, state: &State, args: &[Value]) -> Result<Value, Error> {
        let (bindings, caller) = ok!(self.bind_args(state, args));
        crate::eval::call_macro(state, self, bindings, caller)
    }

    fn is_callable(&self) -> bool {
        true
    }
}
