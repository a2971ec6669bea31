//! Built-in test functions.
//!
//! Tests are applied with the `is` operator (`{{ 42 is even }}`) and share
//! the same uniform signature as filters, returning a boolean.  Custom
//! tests are registered with [`add_test`](crate::Environment::add_test).

use crate::error::{Error, ErrorKind};
use crate::eval::State;
use crate::value::{Value, ValueKind, ValueRepr};

fn first_arg(args: &[Value], what: &'static str) -> Result<Value, Error> {
    args.first()
        .cloned()
        .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, what))
}

/// Checks if a value is defined.
pub fn is_defined(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(!value.is_undefined())
}

/// Checks if a value is undefined.
pub fn is_undefined(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(value.is_undefined())
}

/// Checks if a value is none.
pub fn is_none(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(value.is_none())
}

/// Checks if a value is a string marked safe from escaping.
pub fn is_safe(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(value.is_safe())
}

/// Checks if a value is odd.
pub fn is_odd(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(value.try_to_i64().map(|v| v.rem_euclid(2) == 1).unwrap_or(false))
}

/// Checks if a value is even.
pub fn is_even(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(value.try_to_i64().map(|v| v.rem_euclid(2) == 0).unwrap_or(false))
}

/// Checks if a value is divisible by another number.
pub fn is_divisibleby(_state: &State, value: &Value, args: &[Value]) -> Result<bool, Error> {
    let divisor = ok!(ok!(first_arg(args, "divisibleby requires a divisor")).try_to_i64());
    if divisor == 0 {
        return Ok(false);
    }
    Ok(value.try_to_i64().map(|v| v % divisor == 0).unwrap_or(false))
}

/// Checks if a value is a number.
///
/// Booleans count as numbers here, mirroring Python where `bool` is an
/// `int` subclass.
pub fn is_number(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(matches!(value.kind(), ValueKind::Number | ValueKind::Bool))
}

/// Checks if a value is an integer.
///
/// Unlike `number` this excludes booleans.
pub fn is_integer(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(matches!(value.0, ValueRepr::I64(_)))
}

/// Checks if a value is a float.
pub fn is_float(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(matches!(value.0, ValueRepr::F64(_)))
}

/// Checks if a value is a string.
pub fn is_string(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(value.kind() == ValueKind::String)
}

/// Checks if a value is a boolean.
pub fn is_boolean(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(value.kind() == ValueKind::Bool)
}

/// Checks if a value is true.
pub fn is_true(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(matches!(value.0, ValueRepr::Bool(true)))
}

/// Checks if a value is false.
pub fn is_false(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(matches!(value.0, ValueRepr::Bool(false)))
}

/// Checks if a value is a sequence.
pub fn is_sequence(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(matches!(value.kind(), ValueKind::Seq | ValueKind::String))
}

/// Checks if a value can be iterated.
pub fn is_iterable(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(matches!(
        value.kind(),
        ValueKind::Seq | ValueKind::Map | ValueKind::String
    ))
}

/// Checks if a value is a mapping.
pub fn is_mapping(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(matches!(value.kind(), ValueKind::Map | ValueKind::Namespace))
}

/// Checks if a value can be called.
pub fn is_callable(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    Ok(value.is_callable())
}

/// Checks if a string starts with another string.
pub fn is_startingwith(_state: &State, value: &Value, args: &[Value]) -> Result<bool, Error> {
    let prefix = ok!(first_arg(args, "startingwith requires a prefix")).to_string();
    Ok(value.to_string().starts_with(&prefix))
}

/// Checks if a string ends with another string.
pub fn is_endingwith(_state: &State, value: &Value, args: &[Value]) -> Result<bool, Error> {
    let suffix = ok!(first_arg(args, "endingwith requires a suffix")).to_string();
    Ok(value.to_string().ends_with(&suffix))
}

/// Checks if a string is all lowercase.
pub fn is_lower(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    let s = value.to_string();
    Ok(!s.is_empty() && !s.chars().any(|c| c.is_uppercase()))
}

/// Checks if a string is all uppercase.
pub fn is_upper(_state: &State, value: &Value, _args: &[Value]) -> Result<bool, Error> {
    let s = value.to_string();
    Ok(!s.is_empty() && !s.chars().any(|c| c.is_lowercase()))
}

/// Checks if two values are the same object or equal primitives.
pub fn is_sameas(_state: &State, value: &Value, args: &[Value]) -> Result<bool, Error> {
    let other = ok!(first_arg(args, "sameas requires a value"));
    Ok(value == &other)
}

/// Checks two values for equality (operator form of `==`).
pub fn is_eq(_state: &State, value: &Value, args: &[Value]) -> Result<bool, Error> {
    Ok(value == &ok!(first_arg(args, "eq requires a value")))
}

/// Checks two values for inequality (operator form of `!=`).
pub fn is_ne(_state: &State, value: &Value, args: &[Value]) -> Result<bool, Error> {
    Ok(value != &ok!(first_arg(args, "ne requires a value")))
}

/// Operator form of `<`.
pub fn is_lt(_state: &State, value: &Value, args: &[Value]) -> Result<bool, Error> {
    let other = ok!(first_arg(args, "lt requires a value"));
    Ok(matches!(
        value.partial_cmp(&other),
        Some(std::cmp::Ordering::Less)
    ))
}

/// Operator form of `<=`.
pub fn is_le(_state: &State, value: &Value, args: &[Value]) -> Result<bool, Error> {
    let other = ok!(first_arg(args, "le requires a value"));
    Ok(value
        .partial_cmp(&other)
        .map(|o| o.is_le())
        .unwrap_or(false))
}

/// Operator form of `>`.
pub fn is_gt(_state: &State, value: &Value, args: &[Value]) -> Result<bool, Error> {
    let other = ok!(first_arg(args, "gt requires a value"));
    Ok(matches!(
        value.partial_cmp(&other),
        Some(std::cmp::Ordering::Greater)
    ))
}

/// Operator form of `>=`.
pub fn is_ge(_state: &State, value: &Value, args: &[Value]) -> Result<bool, Error> {
    let other = ok!(first_arg(args, "ge requires a value"));
    Ok(value
        .partial_cmp(&other)
        .map(|o| o.is_ge())
        .unwrap_or(false))
}

/// Operator form of `in`.
pub fn is_in(_state: &State, value: &Value, args: &[Value]) -> Result<bool, Error> {
    let container = ok!(first_arg(args, "in requires a container"));
    Ok(ok!(crate::value::ops::contains(&container, value)).is_true())
}

#[cfg(test)]
mod tests {
    use crate::context;
    use similar_asserts::assert_eq;

    fn apply(expr: &str) -> String {
        crate::Environment::new()
            .render_str(expr, context! { x => 42 })
            .unwrap()
    }

    #[test]
    fn test_defined() {
        assert_eq!(apply("{{ x is defined }}"), "True");
        assert_eq!(apply("{{ y is defined }}"), "False");
        assert_eq!(apply("{{ y is undefined }}"), "True");
    }

    #[test]
    fn test_numbers() {
        assert_eq!(apply("{{ 42 is number }}"), "True");
        assert_eq!(apply("{{ true is number }}"), "True");
        assert_eq!(apply("{{ 42 is integer }}"), "True");
        assert_eq!(apply("{{ true is integer }}"), "False");
        assert_eq!(apply("{{ 42.0 is float }}"), "True");
        assert_eq!(apply("{{ 3 is odd }}"), "True");
        assert_eq!(apply("{{ 4 is even }}"), "True");
        assert_eq!(apply("{{ 9 is divisibleby 3 }}"), "True");
    }

    #[test]
    fn test_is_not() {
        assert_eq!(apply("{{ 3 is not even }}"), "True");
        assert_eq!(apply("{{ 'a' is not number }}"), "True");
    }

    #[test]
    fn test_shapes() {
        assert_eq!(apply("{{ [1] is sequence }}"), "True");
        assert_eq!(apply("{{ {'a': 1} is mapping }}"), "True");
        assert_eq!(apply("{{ 'x' is string }}"), "True");
        assert_eq!(apply("{{ none is none }}"), "True");
    }
}
