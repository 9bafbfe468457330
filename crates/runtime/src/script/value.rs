//! Operations on action values.
//!
//! Every value in action code is a `serde_json::Value`. Integers stay
//! integers until an operation needs a float (`/`, mixing with a float),
//! and a float result that is not finite is an error since JSON cannot hold
//! it.

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

use super::ast::BinOp;

/// Longest list or string an operation may build.
pub const MAX_SEQUENCE_LEN: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

pub fn as_num(value: &Value) -> Option<Num> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(Num::Int(i)),
            None => n.as_f64().map(Num::Float),
        },
        _ => None,
    }
}

pub fn as_int(value: &Value) -> Option<i64> {
    match as_num(value) {
        Some(Num::Int(i)) => Some(i),
        _ => None,
    }
}

pub fn float_value(f: f64) -> Result<Value, String> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| "numeric result is not a finite number".to_string())
}

pub fn num_value(n: Num) -> Result<Value, String> {
    match n {
        Num::Int(i) => Ok(Value::from(i)),
        Num::Float(f) => float_value(f),
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "None",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(_) => as_num(value).is_some_and(|n| n.as_f64() != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// `str(value)`: strings print bare, scalars the way the language spells
/// them, containers as JSON.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Structural equality where `1 == 1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => match (as_num(a), as_num(b)) {
            (Some(Num::Int(x)), Some(Num::Int(y))) => x == y,
            (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
            _ => a == b,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering, String> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => match (as_num(a), as_num(b)) {
            (Some(Num::Int(x)), Some(Num::Int(y))) => Ok(x.cmp(&y)),
            (Some(x), Some(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .ok_or_else(|| "cannot compare non-finite numbers".to_string()),
            _ => Err("cannot compare numbers".to_string()),
        },
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(y)),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_values(l, r)?;
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => Err(format!(
            "comparison not supported between '{}' and '{}'",
            type_name(a),
            type_name(b)
        )),
    }
}

pub fn binary_op(op: BinOp, left: &Value, right: &Value) -> Result<Value, String> {
    if let (Some(l), Some(r)) = (as_num(left), as_num(right)) {
        return numeric(op, l, r);
    }
    match (op, left, right) {
        (BinOp::Add, Value::String(l), Value::String(r)) => {
            check_len(l.len() + r.len())?;
            Ok(Value::String(format!("{l}{r}")))
        }
        (BinOp::Add, Value::Array(l), Value::Array(r)) => {
            check_len(l.len() + r.len())?;
            Ok(Value::Array(l.iter().chain(r).cloned().collect()))
        }
        (BinOp::Mul, Value::String(s), n) | (BinOp::Mul, n, Value::String(s))
            if as_int(n).is_some() =>
        {
            let times = repeat_count(n)?;
            check_len(s.len().saturating_mul(times))?;
            Ok(Value::String(s.repeat(times)))
        }
        (BinOp::Mul, Value::Array(items), n) | (BinOp::Mul, n, Value::Array(items))
            if as_int(n).is_some() =>
        {
            let times = repeat_count(n)?;
            check_len(items.len().saturating_mul(times))?;
            let mut out = Vec::with_capacity(items.len() * times);
            for _ in 0..times {
                out.extend(items.iter().cloned());
            }
            Ok(Value::Array(out))
        }
        (BinOp::Mod, Value::String(_), _) => {
            Err("'%' string formatting is not supported, use an f-string".to_string())
        }
        _ => Err(format!(
            "unsupported operand types for {}: '{}' and '{}'",
            op.symbol(),
            type_name(left),
            type_name(right)
        )),
    }
}

fn repeat_count(n: &Value) -> Result<usize, String> {
    Ok(as_int(n).unwrap_or(0).max(0) as usize)
}

pub fn check_len(len: usize) -> Result<(), String> {
    if len > MAX_SEQUENCE_LEN {
        Err(format!("result too large ({len} items, limit {MAX_SEQUENCE_LEN})"))
    } else {
        Ok(())
    }
}

fn numeric(op: BinOp, l: Num, r: Num) -> Result<Value, String> {
    let overflow = || format!("integer overflow in '{}'", op.symbol());
    match (l, r) {
        (Num::Int(a), Num::Int(b)) => match op {
            BinOp::Add => a.checked_add(b).map(Value::from).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Value::from).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Value::from).ok_or_else(overflow),
            BinOp::Div => {
                if b == 0 {
                    return Err("division by zero".to_string());
                }
                float_value(a as f64 / b as f64)
            }
            BinOp::FloorDiv => {
                if b == 0 {
                    return Err("integer division or modulo by zero".to_string());
                }
                let q = a.checked_div(b).ok_or_else(overflow)?;
                let floored = if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q };
                Ok(Value::from(floored))
            }
            BinOp::Mod => {
                if b == 0 {
                    return Err("integer division or modulo by zero".to_string());
                }
                let r = a.checked_rem(b).ok_or_else(overflow)?;
                let m = if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r };
                Ok(Value::from(m))
            }
            BinOp::Pow => {
                if b < 0 {
                    return float_value((a as f64).powf(b as f64));
                }
                let exp = u32::try_from(b).map_err(|_| overflow())?;
                a.checked_pow(exp).map(Value::from).ok_or_else(overflow)
            }
        },
        (a, b) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            let result = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => {
                    if b == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    a / b
                }
                BinOp::FloorDiv => {
                    if b == 0.0 {
                        return Err("float floor division by zero".to_string());
                    }
                    (a / b).floor()
                }
                BinOp::Mod => {
                    if b == 0.0 {
                        return Err("float modulo by zero".to_string());
                    }
                    a - b * (a / b).floor()
                }
                BinOp::Pow => a.powf(b),
            };
            float_value(result)
        }
    }
}

pub fn negate(value: &Value) -> Result<Value, String> {
    match as_num(value) {
        Some(Num::Int(i)) => i
            .checked_neg()
            .map(Value::from)
            .ok_or_else(|| "integer overflow in negation".to_string()),
        Some(Num::Float(f)) => float_value(-f),
        None => Err(format!("bad operand type for unary -: '{}'", type_name(value))),
    }
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, String> {
    match container {
        Value::String(s) => match item {
            Value::String(needle) => Ok(s.contains(needle.as_str())),
            other => Err(format!(
                "'in <string>' requires string as left operand, not {}",
                type_name(other)
            )),
        },
        Value::Array(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Object(map) => Ok(map_key(item).is_ok_and(|k| map.contains_key(&k))),
        other => Err(format!("argument of type '{}' is not iterable", type_name(other))),
    }
}

/// Map keys are strings; integers are accepted and converted.
pub fn map_key(key: &Value) -> Result<String, String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) if as_int(key).is_some() => Ok(n.to_string()),
        other => Err(format!("map keys must be strings, not {}", type_name(other))),
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if index < 0 { index + len } else { index };
    (0..len).contains(&i).then_some(i as usize)
}

pub fn get_index(base: &Value, index: &Value) -> Result<Value, String> {
    match base {
        Value::Array(items) => {
            let i = as_int(index).ok_or_else(|| {
                format!("list indices must be integers, not {}", type_name(index))
            })?;
            normalize_index(i, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| "list index out of range".to_string())
        }
        Value::String(s) => {
            let i = as_int(index).ok_or_else(|| {
                format!("string indices must be integers, not {}", type_name(index))
            })?;
            let count = s.chars().count();
            normalize_index(i, count)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .ok_or_else(|| "string index out of range".to_string())
        }
        Value::Object(map) => {
            let key = map_key(index)?;
            map.get(&key).cloned().ok_or_else(|| format!("KeyError: '{key}'"))
        }
        other => Err(format!("'{}' object is not subscriptable", type_name(other))),
    }
}

/// Write `value` at `index` inside `base`.
pub fn set_index(base: &mut Value, index: &Value, value: Value) -> Result<(), String> {
    match base {
        Value::Array(items) => {
            let i = as_int(index).ok_or_else(|| {
                format!("list indices must be integers, not {}", type_name(index))
            })?;
            let i = normalize_index(i, items.len())
                .ok_or_else(|| "list assignment index out of range".to_string())?;
            items[i] = value;
            Ok(())
        }
        Value::Object(map) => {
            map.insert(map_key(index)?, value);
            Ok(())
        }
        other => Err(format!(
            "'{}' object does not support item assignment",
            type_name(other)
        )),
    }
}

/// Mutable access to `base[index]`, for nested assignment.
pub fn index_mut<'a>(base: &'a mut Value, index: &Value) -> Result<&'a mut Value, String> {
    match base {
        Value::Array(items) => {
            let i = as_int(index).ok_or_else(|| {
                format!("list indices must be integers, not {}", type_name(index))
            })?;
            match normalize_index(i, items.len()) {
                Some(i) => Ok(&mut items[i]),
                None => Err("list index out of range".to_string()),
            }
        }
        Value::Object(map) => {
            let key = map_key(index)?;
            map.get_mut(&key).ok_or_else(|| format!("KeyError: '{key}'"))
        }
        other => Err(format!("'{}' object is not subscriptable", type_name(other))),
    }
}

fn slice_bounds(start: Option<i64>, end: Option<i64>, len: usize) -> (usize, usize) {
    let len = len as i64;
    let clamp = |i: i64| -> i64 {
        let i = if i < 0 { i + len } else { i };
        i.clamp(0, len)
    };
    let s = start.map(clamp).unwrap_or(0);
    let e = end.map(clamp).unwrap_or(len);
    (s as usize, e.max(s) as usize)
}

pub fn slice(base: &Value, start: Option<&Value>, end: Option<&Value>) -> Result<Value, String> {
    let bound = |v: Option<&Value>| -> Result<Option<i64>, String> {
        match v {
            None | Some(Value::Null) => Ok(None),
            Some(v) => as_int(v)
                .map(Some)
                .ok_or_else(|| "slice indices must be integers".to_string()),
        }
    };
    let (start, end) = (bound(start)?, bound(end)?);
    match base {
        Value::Array(items) => {
            let (s, e) = slice_bounds(start, end, items.len());
            Ok(Value::Array(items[s..e].to_vec()))
        }
        Value::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let (s, e) = slice_bounds(start, end, chars.len());
            Ok(Value::String(chars[s..e].iter().collect()))
        }
        other => Err(format!("'{}' object is not sliceable", type_name(other))),
    }
}

/// The items a `for` loop or comprehension walks: list items, string
/// characters, or map keys.
pub fn iterate(value: &Value) -> Result<Vec<Value>, String> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        Value::Object(map) => Ok(map.keys().map(|k| Value::String(k.clone())).collect()),
        other => Err(format!("'{}' object is not iterable", type_name(other))),
    }
}

pub fn map_from_pairs(pairs: &[Value]) -> Result<Map<String, Value>, String> {
    let mut map = Map::new();
    for pair in pairs {
        match pair {
            Value::Array(kv) if kv.len() == 2 => {
                map.insert(map_key(&kv[0])?, kv[1].clone());
            }
            _ => return Err("dict() needs a list of [key, value] pairs".to_string()),
        }
    }
    Ok(map)
}

// ─── Format specs ────────────────────────────────────────────────────

/// Apply a format spec such as `.2f`, `>8`, `,d` or `.1%`.
pub fn format_with_spec(value: &Value, spec: &str) -> Result<String, String> {
    if spec.is_empty() {
        return Ok(display(value));
    }
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let mut fill = ' ';
    let mut align: Option<char> = None;
    if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
        fill = chars[0];
        align = Some(chars[1]);
        i = 2;
    } else if matches!(chars.first(), Some('<' | '>' | '^')) {
        align = Some(chars[0]);
        i = 1;
    }
    let plus = chars.get(i) == Some(&'+');
    if plus {
        i += 1;
    }
    if chars.get(i) == Some(&'0') && align.is_none() {
        fill = '0';
        align = Some('>');
        i += 1;
    }
    let mut width = 0usize;
    while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
        width = width * 10 + d as usize;
        i += 1;
    }
    let grouping = chars.get(i) == Some(&',');
    if grouping {
        i += 1;
    }
    let mut precision: Option<usize> = None;
    if chars.get(i) == Some(&'.') {
        i += 1;
        let mut p = 0usize;
        while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
            p = p * 10 + d as usize;
            i += 1;
        }
        precision = Some(p);
    }
    let kind = chars.get(i).copied();
    if i + usize::from(kind.is_some()) != chars.len() {
        return Err(format!("invalid format specifier '{spec}'"));
    }

    let number = as_num(value);
    let not_a_number = || format!("format code requires a number, got '{}'", type_name(value));
    let mut body = match kind {
        Some('f' | 'F') => {
            let n = number.ok_or_else(not_a_number)?;
            format!("{:.*}", precision.unwrap_or(6), n.as_f64())
        }
        Some('%') => {
            let n = number.ok_or_else(not_a_number)?;
            format!("{:.*}%", precision.unwrap_or(6), n.as_f64() * 100.0)
        }
        Some('e' | 'E') => {
            let n = number.ok_or_else(not_a_number)?;
            format!("{:.*e}", precision.unwrap_or(6), n.as_f64())
        }
        Some('d') => match number {
            Some(Num::Int(n)) => n.to_string(),
            _ => return Err(format!("format code 'd' requires an int, got '{}'", type_name(value))),
        },
        Some('s') => display(value),
        None => match (number, precision) {
            (Some(n), Some(p)) => format!("{:.*}", p, n.as_f64()),
            _ => {
                let text = display(value);
                match precision {
                    Some(p) => text.chars().take(p).collect(),
                    None => text,
                }
            }
        },
        Some(other) => return Err(format!("unknown format code '{other}'")),
    };

    if number.is_some() {
        if grouping {
            body = group_thousands(&body);
        }
        if plus && !body.starts_with('-') {
            body.insert(0, '+');
        }
    }

    let len = body.chars().count();
    if len >= width {
        return Ok(body);
    }
    let pad = width - len;
    let align = align.unwrap_or(if number.is_some() { '>' } else { '<' });
    let padding = |n: usize| fill.to_string().repeat(n);
    Ok(match align {
        '<' => format!("{body}{}", padding(pad)),
        '^' => format!("{}{body}{}", padding(pad / 2), padding(pad - pad / 2)),
        _ => {
            if fill == '0' && (body.starts_with('-') || body.starts_with('+')) {
                let (sign, rest) = body.split_at(1);
                format!("{sign}{}{rest}", padding(pad))
            } else {
                format!("{}{body}", padding(pad))
            }
        }
    })
}

fn group_thousands(body: &str) -> String {
    let (sign, rest) = match body.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", body),
    };
    let (int_part, tail) = match rest.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => rest.split_at(pos),
        None => (rest, ""),
    };
    let digits: Vec<char> = int_part.chars().collect();
    let mut grouped = String::new();
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*c);
    }
    format!("{sign}{grouped}{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_arithmetic_stays_integral() {
        assert_eq!(binary_op(BinOp::Add, &json!(2), &json!(2)).unwrap(), json!(4));
        assert_eq!(binary_op(BinOp::Pow, &json!(2), &json!(10)).unwrap(), json!(1024));
        assert_eq!(binary_op(BinOp::Div, &json!(7), &json!(2)).unwrap(), json!(3.5));
        assert_eq!(binary_op(BinOp::FloorDiv, &json!(-7), &json!(2)).unwrap(), json!(-4));
        assert_eq!(binary_op(BinOp::Mod, &json!(-7), &json!(3)).unwrap(), json!(2));
        assert_eq!(binary_op(BinOp::Add, &json!(1), &json!(0.5)).unwrap(), json!(1.5));
    }

    #[test]
    fn arithmetic_errors() {
        assert!(binary_op(BinOp::Div, &json!(1), &json!(0)).is_err());
        assert!(binary_op(BinOp::Mul, &json!(i64::MAX), &json!(2)).is_err());
        let err = binary_op(BinOp::Add, &json!(1), &json!("a")).unwrap_err();
        assert!(err.contains("'int' and 'str'"), "{err}");
    }

    #[test]
    fn sequences() {
        assert_eq!(binary_op(BinOp::Add, &json!("ab"), &json!("c")).unwrap(), json!("abc"));
        assert_eq!(binary_op(BinOp::Mul, &json!(3), &json!("ab")).unwrap(), json!("ababab"));
        assert_eq!(binary_op(BinOp::Add, &json!([1]), &json!([2])).unwrap(), json!([1, 2]));
        assert!(binary_op(BinOp::Mul, &json!("x"), &json!(10_000_000)).is_err());
    }

    #[test]
    fn equality_and_ordering() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!({"a": [1, 2]}), &json!({"a": [1.0, 2]})));
        assert_eq!(compare_values(&json!("a"), &json!("b")).unwrap(), Ordering::Less);
        assert_eq!(compare_values(&json!([1, 2]), &json!([1])).unwrap(), Ordering::Greater);
        assert!(compare_values(&json!(1), &json!("1")).is_err());
    }

    #[test]
    fn membership() {
        assert!(contains(&json!("hello"), &json!("ell")).unwrap());
        assert!(contains(&json!([1, 2]), &json!(2.0)).unwrap());
        assert!(contains(&json!({"k": 1}), &json!("k")).unwrap());
        assert!(contains(&json!(5), &json!(1)).is_err());
    }

    #[test]
    fn indexing_and_slicing() {
        assert_eq!(get_index(&json!([1, 2, 3]), &json!(-1)).unwrap(), json!(3));
        assert_eq!(get_index(&json!("héllo"), &json!(1)).unwrap(), json!("é"));
        assert_eq!(get_index(&json!({"a": 1}), &json!("a")).unwrap(), json!(1));
        assert!(get_index(&json!({"a": 1}), &json!("b")).unwrap_err().contains("KeyError"));
        assert_eq!(slice(&json!([1, 2, 3, 4]), Some(&json!(1)), None).unwrap(), json!([2, 3, 4]));
        assert_eq!(slice(&json!("abcdef"), None, Some(&json!(-2))).unwrap(), json!("abcd"));
        assert_eq!(slice(&json!([1, 2]), Some(&json!(5)), None).unwrap(), json!([]));
    }

    #[test]
    fn truthiness_and_display() {
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!([0])));
        assert_eq!(display(&json!(null)), "None");
        assert_eq!(display(&json!(true)), "True");
        assert_eq!(display(&json!("x")), "x");
        assert_eq!(display(&json!([1, "a"])), "[1,\"a\"]");
    }

    #[test]
    fn format_specs() {
        assert_eq!(format_with_spec(&json!(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_with_spec(&json!(0.256), ".1%").unwrap(), "25.6%");
        assert_eq!(format_with_spec(&json!(1234567), ",d").unwrap(), "1,234,567");
        assert_eq!(format_with_spec(&json!(42), ">5").unwrap(), "   42");
        assert_eq!(format_with_spec(&json!(7), "03d").unwrap(), "007");
        assert_eq!(format_with_spec(&json!("ab"), "*^6").unwrap(), "**ab**");
        assert!(format_with_spec(&json!("ab"), ".2f").is_err());
    }
}
