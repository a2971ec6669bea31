use crate::error::{Error, ErrorKind};
use crate::value::{Key, Value, ValueRepr};

pub enum CoerceResult<'a> {
    I64(i64, i64),
    F64(f64, f64),
    Str(&'a str, &'a str),
}

fn as_f64(value: &Value) -> Option<f64> {
    Some(match value.0 {
        ValueRepr::Bool(x) => x as i64 as f64,
        ValueRepr::I64(x) => x as f64,
        ValueRepr::F64(x) => x,
        _ => return None,
    })
}

pub fn coerce<'x>(a: &'x Value, b: &'x Value) -> Option<CoerceResult<'x>> {
    match (&a.0, &b.0) {
        // equal mappings are trivial
        (ValueRepr::String(a, _), ValueRepr::String(b, _)) => Some(CoerceResult::Str(a, b)),
        (ValueRepr::I64(a), ValueRepr::I64(b)) => Some(CoerceResult::I64(*a, *b)),
        (ValueRepr::Bool(a), ValueRepr::Bool(b)) => {
            Some(CoerceResult::I64(*a as i64, *b as i64))
        }
        (ValueRepr::F64(a), ValueRepr::F64(b)) => Some(CoerceResult::F64(*a, *b)),

        // are floats involved?
        (ValueRepr::F64(a), _) => Some(CoerceResult::F64(*a, some!(as_f64(b)))),
        (_, ValueRepr::F64(b)) => Some(CoerceResult::F64(some!(as_f64(a)), *b)),

        // everything else goes through i64
        (ValueRepr::Bool(a), ValueRepr::I64(b)) => Some(CoerceResult::I64(*a as i64, *b)),
        (ValueRepr::I64(a), ValueRepr::Bool(b)) => Some(CoerceResult::I64(*a, *b as i64)),
        _ => None,
    }
}

fn impossible_op(op: &str, lhs: &Value, rhs: &Value) -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        format!(
            "tried to use {} operator on unsupported types {} and {}",
            op,
            lhs.kind(),
            rhs.kind()
        ),
    )
}

fn failed_op(op: &str, lhs: &Value, rhs: &Value) -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        format!("unable to calculate {lhs} {op} {rhs}"),
    )
}

fn division_by_zero() -> Error {
    Error::new(ErrorKind::InvalidOperation, "division by zero")
}

/// Arithmetic on an undefined value surfaces the missing name.
fn check_defined(lhs: &Value, rhs: &Value) -> Result<(), Error> {
    for value in [lhs, rhs] {
        if value.is_undefined() {
            return Err(match value.undefined_name() {
                Some(name) => Error::new(
                    ErrorKind::UndefinedError,
                    format!("{name:?} is undefined"),
                ),
                None => Error::from(ErrorKind::UndefinedError),
            });
        }
    }
    Ok(())
}

macro_rules! math_binop {
    ($name:ident, $int:ident, $float:tt) => {
        pub fn $name(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
            ok!(check_defined(lhs, rhs));
            match coerce(lhs, rhs) {
                Some(CoerceResult::I64(a, b)) => match a.$int(b) {
                    Some(val) => Ok(Value::from(val)),
                    None => Err(failed_op(stringify!($float), lhs, rhs))
                },
                Some(CoerceResult::F64(a, b)) => Ok((a $float b).into()),
                _ => Err(impossible_op(stringify!($float), lhs, rhs))
            }
        }
    }
}

pub fn add(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    ok!(check_defined(lhs, rhs));
    if let (ValueRepr::Seq(a), ValueRepr::Seq(b)) = (&lhs.0, &rhs.0) {
        return Ok(Value::from(
            a.iter().chain(b.iter()).cloned().collect::<Vec<_>>(),
        ));
    }
    match coerce(lhs, rhs) {
        Some(CoerceResult::I64(a, b)) => a
            .checked_add(b)
            .ok_or_else(|| failed_op("+", lhs, rhs))
            .map(Value::from),
        Some(CoerceResult::F64(a, b)) => Ok((a + b).into()),
        Some(CoerceResult::Str(a, b)) => Ok(Value::from([a, b].concat())),
        _ => Err(impossible_op("+", lhs, rhs)),
    }
}

math_binop!(sub, checked_sub, -);

pub fn mul(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    ok!(check_defined(lhs, rhs));
    if let Some((s, n)) = lhs
        .as_str()
        .map(|s| (s, rhs))
        .or_else(|| rhs.as_str().map(|s| (s, lhs)))
    {
        return Ok(Value::from(s.repeat(ok!(n.as_usize().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                "strings can only be multiplied with integers",
            )
        })))));
    }
    if let (ValueRepr::Seq(items), Some(n)) = (&lhs.0, rhs.as_usize()) {
        let mut rv = Vec::with_capacity(items.len() * n);
        for _ in 0..n {
            rv.extend(items.iter().cloned());
        }
        return Ok(Value::from(rv));
    }
    match coerce(lhs, rhs) {
        Some(CoerceResult::I64(a, b)) => match a.checked_mul(b) {
            Some(val) => Ok(Value::from(val)),
            None => Err(failed_op("*", lhs, rhs)),
        },
        Some(CoerceResult::F64(a, b)) => Ok((a * b).into()),
        _ => Err(impossible_op("*", lhs, rhs)),
    }
}

/// True division always yields a float.
pub fn div(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    ok!(check_defined(lhs, rhs));
    let a = ok!(as_f64(lhs).ok_or_else(|| impossible_op("/", lhs, rhs)));
    let b = ok!(as_f64(rhs).ok_or_else(|| impossible_op("/", lhs, rhs)));
    if b == 0.0 {
        return Err(division_by_zero());
    }
    Ok((a / b).into())
}

pub fn int_div(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    ok!(check_defined(lhs, rhs));
    match coerce(lhs, rhs) {
        Some(CoerceResult::I64(a, b)) => {
            if b == 0 {
                Err(division_by_zero())
            } else {
                a.checked_div_euclid(b)
                    .ok_or_else(|| failed_op("//", lhs, rhs))
                    .map(Value::from)
            }
        }
        Some(CoerceResult::F64(a, b)) => {
            if b == 0.0 {
                Err(division_by_zero())
            } else {
                Ok(a.div_euclid(b).into())
            }
        }
        _ => Err(impossible_op("//", lhs, rhs)),
    }
}

pub fn rem(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    ok!(check_defined(lhs, rhs));
    match coerce(lhs, rhs) {
        Some(CoerceResult::I64(a, b)) => {
            if b == 0 {
                Err(division_by_zero())
            } else {
                a.checked_rem_euclid(b)
                    .ok_or_else(|| failed_op("%", lhs, rhs))
                    .map(Value::from)
            }
        }
        Some(CoerceResult::F64(a, b)) => {
            if b == 0.0 {
                Err(division_by_zero())
            } else {
                Ok(a.rem_euclid(b).into())
            }
        }
        _ => Err(impossible_op("%", lhs, rhs)),
    }
}

pub fn pow(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    ok!(check_defined(lhs, rhs));
    match coerce(lhs, rhs) {
        Some(CoerceResult::I64(a, b)) => {
            if b < 0 {
                Ok(((a as f64).powf(b as f64)).into())
            } else {
                match u32::try_from(b).ok().and_then(|b| a.checked_pow(b)) {
                    Some(val) => Ok(Value::from(val)),
                    None => Err(failed_op("**", lhs, rhs)),
                }
            }
        }
        Some(CoerceResult::F64(a, b)) => Ok((a.powf(b)).into()),
        _ => Err(impossible_op("**", lhs, rhs)),
    }
}

/// Implements an unary `neg` operation on value.
pub fn neg(val: &Value) -> Result<Value, Error> {
    match val.0 {
        ValueRepr::I64(x) => x
            .checked_neg()
            .map(Value::from)
            .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "overflow")),
        ValueRepr::F64(x) => Ok((-x).into()),
        ValueRepr::Bool(x) => Ok(Value::from(-(x as i64))),
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot negate value of type {}", val.kind()),
        )),
    }
}

/// Attempts a string concatenation.
pub fn string_concat(left: &Value, right: &Value) -> Result<Value, Error> {
    ok!(check_defined(left, right));
    Ok(Value::from(format!("{left}{right}")))
}

/// Implements a containment operation on values.
pub fn contains(container: &Value, value: &Value) -> Result<Value, Error> {
    // an undefined container cannot hold values
    if container.is_undefined() {
        return Ok(Value::from(false));
    }
    let rv = match container.0 {
        ValueRepr::String(ref s, _) => {
            if let Some(s2) = value.as_str() {
                s.contains(s2)
            } else {
                s.contains(&value.to_string())
            }
        }
        ValueRepr::Seq(ref items) => items.iter().any(|x| x == value),
        ValueRepr::Map(ref m, _) => match Key::try_from(value.clone()) {
            Ok(key) => m.contains_key(&key),
            Err(_) => false,
        },
        _ => {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                "cannot perform a containment check on this value",
            ))
        }
    };
    Ok(Value::from(rv))
}

fn get_offset_and_len<F: FnOnce() -> usize>(
    start: Option<i64>,
    stop: Option<i64>,
    end: F,
) -> (usize, usize) {
    let start = start.unwrap_or(0);
    if start < 0 || stop.map_or(true, |x| x < 0) {
        let end = end();
        let start = if start < 0 {
            std::cmp::max(0, end as i64 + start) as usize
        } else {
            start as usize
        };
        let stop = match stop {
            None => end,
            Some(x) if x < 0 => std::cmp::max(0, end as i64 + x) as usize,
            Some(x) => x as usize,
        };
        (start, stop.saturating_sub(start))
    } else {
        (
            start as usize,
            (stop.unwrap() as usize).saturating_sub(start as usize),
        )
    }
}

fn range_step_backwards(
    start: Option<i64>,
    stop: Option<i64>,
    step: usize,
    end: usize,
) -> impl Iterator<Item = usize> {
    let start = match start {
        None => end.saturating_sub(1),
        Some(start) if start >= end as i64 => end.saturating_sub(1),
        Some(start) if start >= 0 => start as usize,
        Some(start) => (end as i64 + start).max(0) as usize,
    };
    let stop = match stop {
        None => 0,
        Some(stop) if stop < 0 => (end as i64 + stop).max(0) as usize,
        Some(stop) => stop as usize,
    };
    let length = if stop == 0 {
        (start + step) / step
    } else if start >= stop {
        (start - stop + step - 1) / step
    } else {
        0
    };
    (stop..=start).rev().step_by(step).take(length)
}

/// Slices a value with Python `[start:stop:step]` semantics.
pub fn slice(value: Value, start: Value, stop: Value, step: Value) -> Result<Value, Error> {
    let start: Option<i64> = if start.is_none() {
        None
    } else {
        Some(ok!(start.try_to_i64()))
    };
    let stop = if stop.is_none() {
        None
    } else {
        Some(ok!(stop.try_to_i64()))
    };
    let step = if step.is_none() {
        1i64
    } else {
        ok!(step.try_to_i64())
    };
    if step == 0 {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "cannot slice by step size of 0",
        ));
    }

    match value.0 {
        ValueRepr::String(ref s, _) => {
            if step > 0 {
                let (start, len) = get_offset_and_len(start, stop, || s.chars().count());
                Ok(Value::from(
                    s.chars()
                        .skip(start)
                        .take(len)
                        .step_by(step as usize)
                        .collect::<String>(),
                ))
            } else {
                let chars: Vec<char> = s.chars().collect();
                Ok(Value::from(
                    range_step_backwards(start, stop, -step as usize, chars.len())
                        .map(|i| chars[i])
                        .collect::<String>(),
                ))
            }
        }
        ValueRepr::Undefined(_) | ValueRepr::None => Ok(Value::from(Vec::<Value>::new())),
        ValueRepr::Seq(ref items) => {
            if step > 0 {
                let (start, len) = get_offset_and_len(start, stop, || items.len());
                Ok(Value::from(
                    items
                        .iter()
                        .skip(start)
                        .take(len)
                        .step_by(step as usize)
                        .cloned()
                        .collect::<Vec<_>>(),
                ))
            } else {
                Ok(Value::from(
                    range_step_backwards(start, stop, -step as usize, items.len())
                        .map(|i| items[i].clone())
                        .collect::<Vec<_>>(),
                ))
            }
        }
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("value of type {} cannot be sliced", value.kind()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_adding() {
        let err = add(&Value::from("a"), &Value::from(42)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid operation: tried to use + operator on unsupported types string and number"
        );

        assert_eq!(
            add(&Value::from(1), &Value::from(2)).unwrap(),
            Value::from(3)
        );
        assert_eq!(
            add(&Value::from("foo"), &Value::from("bar")).unwrap(),
            Value::from("foobar")
        );
    }

    #[test]
    fn test_dividing() {
        assert_eq!(
            div(&Value::from(100), &Value::from(2)).unwrap(),
            Value::from(50.0)
        );
        assert_eq!(
            int_div(&Value::from(5), &Value::from(2)).unwrap(),
            Value::from(2)
        );
        let err = div(&Value::from(1), &Value::from(0)).unwrap_err();
        assert_eq!(err.to_string(), "invalid operation: division by zero");
    }

    #[test]
    fn test_promotion() {
        assert_eq!(
            add(&Value::from(1), &Value::from(1.5)).unwrap(),
            Value::from(2.5)
        );
        assert_eq!(
            mul(&Value::from(2), &Value::from(2)).unwrap(),
            Value::from(4)
        );
    }

    #[test]
    fn test_concat() {
        assert_eq!(
            string_concat(&Value::from("foo"), &Value::from(42)).unwrap(),
            Value::from("foo42")
        );
        assert_eq!(
            string_concat(&Value::from(23), &Value::from(42)).unwrap(),
            Value::from("2342")
        );
    }

    #[test]
    fn test_slicing() {
        let v = Value::from(vec![0i64, 1, 2, 3, 4, 5, 6, 7, 8, 9]);

        assert_eq!(
            slice(v.clone(), Value::from(()), Value::from(()), Value::from(2)).unwrap(),
            Value::from(vec![0i64, 2, 4, 6, 8])
        );
        assert_eq!(
            slice(v.clone(), Value::from(()), Value::from(()), Value::from(-2)).unwrap(),
            Value::from(vec![9i64, 7, 5, 3, 1])
        );
        assert_eq!(
            slice(v.clone(), Value::from(-8), Value::from(()), Value::from(())).unwrap(),
            Value::from(vec![2i64, 3, 4, 5, 6, 7, 8, 9])
        );
        assert_eq!(
            slice(
                Value::from("abcdefghij"),
                Value::from(()),
                Value::from(()),
                Value::from(-2)
            )
            .unwrap(),
            Value::from("jhfdb")
        );
    }

    #[test]
    fn test_undefined_op() {
        let err = add(&Value::undefined_named("user"), &Value::from(1)).unwrap_err();
        assert_eq!(err.to_string(), "undefined value: \"user\" is undefined");
    }
}
