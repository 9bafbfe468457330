//! Built-in functions and value methods.
//!
//! Everything here is pure: `print` and the task-control functions
//! (`complete`, `abort`, `continue_task`) need interpreter state and are
//! handled by the interpreter itself.

use serde_json::{Map, Value};

use super::value::{
    MAX_SEQUENCE_LEN, Num, as_int, as_num, binary_op, check_len, compare_values, display,
    float_value, format_with_spec, iterate, map_from_pairs, map_key, truthy, type_name,
    values_equal,
};
use super::ast::BinOp;

/// Functions handled by the interpreter rather than [`call_builtin`].
pub const CONTROL_BUILTINS: &[&str] = &["print", "complete", "abort", "continue_task"];

pub const PURE_BUILTINS: &[&str] = &[
    "len", "str", "int", "float", "bool", "range", "list", "dict", "keys", "values", "items",
    "enumerate", "zip", "sum", "min", "max", "abs", "round", "sorted", "reversed", "any", "all",
    "type",
];

pub fn is_builtin(name: &str) -> bool {
    PURE_BUILTINS.contains(&name) || CONTROL_BUILTINS.contains(&name)
}

type Kwargs = [(String, Value)];

fn kwarg<'a>(kwargs: &'a Kwargs, name: &str) -> Option<&'a Value> {
    kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

fn only_kwargs(func: &str, kwargs: &Kwargs, allowed: &[&str]) -> Result<(), String> {
    match kwargs.iter().find(|(k, _)| !allowed.contains(&k.as_str())) {
        Some((k, _)) => Err(format!("{func}() got an unexpected keyword argument '{k}'")),
        None => Ok(()),
    }
}

fn arity(func: &str, args: &[Value], min: usize, max: usize) -> Result<(), String> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(format!(
            "{func}() takes {expected} positional arguments but {} were given",
            args.len()
        ));
    }
    Ok(())
}

/// The single iterable argument, or all positional arguments when there are
/// several (`max(a, b)` vs `max([a, b])`).
fn items_arg(func: &str, args: &[Value]) -> Result<Vec<Value>, String> {
    match args {
        [] => Err(format!("{func}() expected at least 1 argument, got 0")),
        [single] => iterate(single),
        many => Ok(many.to_vec()),
    }
}

pub fn call_builtin(name: &str, args: &[Value], kwargs: &Kwargs) -> Result<Value, String> {
    match name {
        "len" => {
            arity(name, args, 1, 1)?;
            only_kwargs(name, kwargs, &[])?;
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                other => return Err(format!("object of type '{}' has no len()", type_name(other))),
            };
            Ok(Value::from(n))
        }
        "str" => {
            arity(name, args, 0, 1)?;
            Ok(Value::String(args.first().map(display).unwrap_or_default()))
        }
        "int" => {
            arity(name, args, 0, 1)?;
            args.first().map(to_int).unwrap_or(Ok(Value::from(0)))
        }
        "float" => {
            arity(name, args, 0, 1)?;
            args.first().map(to_float).unwrap_or(Ok(Value::from(0.0)))
        }
        "bool" => {
            arity(name, args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(truthy)))
        }
        "range" => range(args),
        "list" => {
            arity(name, args, 0, 1)?;
            Ok(Value::Array(match args.first() {
                Some(v) => iterate(v)?,
                None => Vec::new(),
            }))
        }
        "dict" => {
            arity(name, args, 0, 1)?;
            let mut map = match args.first() {
                Some(Value::Object(m)) => m.clone(),
                Some(Value::Array(pairs)) => map_from_pairs(pairs)?,
                Some(other) => return Err(format!("cannot convert '{}' to dict", type_name(other))),
                None => Map::new(),
            };
            for (k, v) in kwargs {
                map.insert(k.clone(), v.clone());
            }
            Ok(Value::Object(map))
        }
        "keys" | "values" | "items" => {
            arity(name, args, 1, 1)?;
            let Value::Object(map) = &args[0] else {
                return Err(format!("{name}() expects a dict, got '{}'", type_name(&args[0])));
            };
            Ok(map_view(map, name))
        }
        "enumerate" => {
            arity(name, args, 1, 2)?;
            let start = match args.get(1).or_else(|| kwarg(kwargs, "start")) {
                Some(v) => as_int(v).ok_or("enumerate() start must be an integer")?,
                None => 0,
            };
            let items = iterate(&args[0])?;
            Ok(Value::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::Array(vec![Value::from(start + i as i64), v]))
                    .collect(),
            ))
        }
        "zip" => {
            let lists = args.iter().map(iterate).collect::<Result<Vec<_>, _>>()?;
            let shortest = lists.iter().map(|l| l.len()).min().unwrap_or(0);
            Ok(Value::Array(
                (0..shortest)
                    .map(|i| Value::Array(lists.iter().map(|l| l[i].clone()).collect()))
                    .collect(),
            ))
        }
        "sum" => {
            arity(name, args, 1, 2)?;
            let mut total = args
                .get(1)
                .or_else(|| kwarg(kwargs, "start"))
                .cloned()
                .unwrap_or(Value::from(0));
            for item in iterate(&args[0])? {
                total = binary_op(BinOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        "min" | "max" => {
            only_kwargs(name, kwargs, &["default"])?;
            let items = items_arg(name, args)?;
            let mut best: Option<Value> = None;
            for item in items {
                best = Some(match best {
                    None => item,
                    Some(current) => {
                        let ord = compare_values(&item, &current)?;
                        let better = if name == "min" { ord.is_lt() } else { ord.is_gt() };
                        if better { item } else { current }
                    }
                });
            }
            match (best, kwarg(kwargs, "default")) {
                (Some(v), _) => Ok(v),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(format!("{name}() arg is an empty sequence")),
            }
        }
        "abs" => {
            arity(name, args, 1, 1)?;
            match as_num(&args[0]) {
                Some(Num::Int(i)) => i
                    .checked_abs()
                    .map(Value::from)
                    .ok_or_else(|| "integer overflow in abs()".to_string()),
                Some(Num::Float(f)) => float_value(f.abs()),
                None => Err(format!("bad operand type for abs(): '{}'", type_name(&args[0]))),
            }
        }
        "round" => {
            arity(name, args, 1, 2)?;
            let digits = args.get(1).or_else(|| kwarg(kwargs, "ndigits"));
            round(&args[0], digits)
        }
        "sorted" => {
            arity(name, args, 1, 1)?;
            only_kwargs(name, kwargs, &["reverse"])?;
            let mut items = iterate(&args[0])?;
            sort_values(&mut items, kwarg(kwargs, "reverse").is_some_and(truthy))?;
            Ok(Value::Array(items))
        }
        "reversed" => {
            arity(name, args, 1, 1)?;
            let mut items = iterate(&args[0])?;
            items.reverse();
            Ok(Value::Array(items))
        }
        "any" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Bool(iterate(&args[0])?.iter().any(truthy)))
        }
        "all" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Bool(iterate(&args[0])?.iter().all(truthy)))
        }
        "type" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(type_name(&args[0]).to_string()))
        }
        other => Err(format!("name '{other}' is not defined")),
    }
}

fn map_view(map: &Map<String, Value>, view: &str) -> Value {
    Value::Array(match view {
        "keys" => map.keys().map(|k| Value::String(k.clone())).collect(),
        "values" => map.values().cloned().collect(),
        _ => map
            .iter()
            .map(|(k, v)| Value::Array(vec![Value::String(k.clone()), v.clone()]))
            .collect(),
    })
}

fn to_int(value: &Value) -> Result<Value, String> {
    match value {
        Value::Bool(b) => Ok(Value::from(i64::from(*b))),
        Value::Number(_) => match as_num(value) {
            Some(Num::Int(i)) => Ok(Value::from(i)),
            Some(Num::Float(f)) if f.is_finite() && f.abs() < 9.2e18 => Ok(Value::from(f.trunc() as i64)),
            _ => Err("cannot convert float to integer".to_string()),
        },
        Value::String(s) => s
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("invalid literal for int(): '{s}'")),
        other => Err(format!("int() argument must be a string or a number, not '{}'", type_name(other))),
    }
}

fn to_float(value: &Value) -> Result<Value, String> {
    match value {
        Value::Bool(b) => Ok(Value::from(if *b { 1.0 } else { 0.0 })),
        Value::Number(_) => float_value(as_num(value).map(Num::as_f64).unwrap_or(0.0)),
        Value::String(s) => {
            let parsed: f64 = s
                .trim()
                .parse()
                .map_err(|_| format!("could not convert string to float: '{s}'"))?;
            float_value(parsed)
        }
        other => Err(format!("float() argument must be a string or a number, not '{}'", type_name(other))),
    }
}

fn range(args: &[Value]) -> Result<Value, String> {
    arity("range", args, 1, 3)?;
    let ints = args
        .iter()
        .map(|v| as_int(v).ok_or_else(|| format!("'{}' object cannot be interpreted as an integer", type_name(v))))
        .collect::<Result<Vec<i64>, String>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err("range() expects 1 to 3 arguments".to_string()),
    };
    if step == 0 {
        return Err("range() arg 3 must not be zero".to_string());
    }
    let span = if step > 0 {
        (stop as i128 - start as i128 + step as i128 - 1) / step as i128
    } else {
        (start as i128 - stop as i128 - step as i128 - 1) / (-(step as i128))
    };
    let count = span.max(0) as usize;
    if count > MAX_SEQUENCE_LEN {
        return Err(format!("range too large ({count} items, limit {MAX_SEQUENCE_LEN})"));
    }
    Ok(Value::Array(
        (0..count as i64).map(|i| Value::from(start + i * step)).collect(),
    ))
}

fn round(value: &Value, digits: Option<&Value>) -> Result<Value, String> {
    let digits = match digits {
        None | Some(Value::Null) => None,
        Some(d) => Some(as_int(d).ok_or("round() ndigits must be an integer")?),
    };
    match (as_num(value), digits) {
        (Some(Num::Int(i)), _) => Ok(Value::from(i)),
        (Some(Num::Float(f)), None) => to_int(&float_value(f.round_ties_even())?),
        (Some(Num::Float(f)), Some(d)) => {
            let factor = 10f64.powi(d.clamp(-300, 300) as i32);
            float_value((f * factor).round_ties_even() / factor)
        }
        (None, _) => Err(format!("type '{}' doesn't define __round__", type_name(value))),
    }
}

pub fn sort_values(items: &mut [Value], reverse: bool) -> Result<(), String> {
    let mut error: Option<String> = None;
    items.sort_by(|a, b| {
        compare_values(a, b).unwrap_or_else(|e| {
            error.get_or_insert(e);
            std::cmp::Ordering::Equal
        })
    });
    if let Some(e) = error {
        return Err(e);
    }
    if reverse {
        items.reverse();
    }
    Ok(())
}

// ─── Methods ─────────────────────────────────────────────────────────

/// The result of calling a method: its return value and, for mutating
/// methods such as `append`, the updated receiver.
pub struct MethodOutcome {
    pub value: Value,
    pub updated: Option<Value>,
}

impl MethodOutcome {
    fn pure(value: Value) -> Self {
        Self { value, updated: None }
    }

    fn mutated(value: Value, receiver: Value) -> Self {
        Self {
            value,
            updated: Some(receiver),
        }
    }
}

pub fn call_method(
    receiver: &Value,
    method: &str,
    args: &[Value],
    kwargs: &Kwargs,
) -> Result<MethodOutcome, String> {
    match receiver {
        Value::String(s) => string_method(s, method, args, kwargs).map(MethodOutcome::pure),
        Value::Array(items) => list_method(items, method, args, kwargs),
        Value::Object(map) => map_method(map, method, args),
        other => Err(format!(
            "'{}' object has no attribute '{method}'",
            type_name(other)
        )),
    }
}

fn str_arg<'a>(func: &str, args: &'a [Value], index: usize) -> Result<&'a str, String> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(format!("{func}() argument must be str, not '{}'", type_name(other))),
        None => Err(format!("{func}() missing required argument")),
    }
}

fn string_method(s: &str, method: &str, args: &[Value], kwargs: &Kwargs) -> Result<Value, String> {
    let text = |t: String| Ok(Value::String(t));
    match method {
        "upper" => text(s.to_uppercase()),
        "lower" => text(s.to_lowercase()),
        "title" => text(
            s.split(' ')
                .map(|w| {
                    let mut c = w.chars();
                    match c.next() {
                        Some(first) => first.to_uppercase().chain(c.flat_map(|x| x.to_lowercase())).collect(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<String>>()
                .join(" "),
        ),
        "capitalize" => {
            let mut c = s.chars();
            text(match c.next() {
                Some(first) => first.to_uppercase().chain(c.flat_map(|x| x.to_lowercase())).collect(),
                None => String::new(),
            })
        }
        "strip" | "lstrip" | "rstrip" => {
            let chars: Option<Vec<char>> = match args.first() {
                Some(Value::String(set)) => Some(set.chars().collect()),
                _ => None,
            };
            let matches = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            text(match method {
                "strip" => s.trim_matches(matches).to_string(),
                "lstrip" => s.trim_start_matches(matches).to_string(),
                _ => s.trim_end_matches(matches).to_string(),
            })
        }
        "split" => {
            let sep = args.first().or_else(|| kwarg(kwargs, "sep"));
            let parts: Vec<Value> = match sep {
                None | Some(Value::Null) => s.split_whitespace().map(|p| Value::String(p.into())).collect(),
                Some(Value::String(sep)) if sep.is_empty() => return Err("empty separator".to_string()),
                Some(Value::String(sep)) => s.split(sep.as_str()).map(|p| Value::String(p.into())).collect(),
                Some(other) => return Err(format!("must be str or None, not '{}'", type_name(other))),
            };
            Ok(Value::Array(parts))
        }
        "splitlines" => Ok(Value::Array(s.lines().map(|l| Value::String(l.into())).collect())),
        "join" => {
            arity("join", args, 1, 1)?;
            let parts = iterate(&args[0])?
                .iter()
                .map(|v| match v {
                    Value::String(p) => Ok(p.clone()),
                    other => Err(format!(
                        "sequence item: expected str instance, '{}' found",
                        type_name(other)
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?;
            text(parts.join(s))
        }
        "replace" => {
            let (old, new) = (str_arg("replace", args, 0)?, str_arg("replace", args, 1)?);
            text(s.replace(old, new))
        }
        "startswith" | "endswith" => {
            let candidates: Vec<String> = match args.first() {
                Some(Value::String(p)) => vec![p.clone()],
                Some(Value::Array(ps)) => ps.iter().filter_map(|p| p.as_str().map(String::from)).collect(),
                _ => return Err(format!("{method}() expects a string or list of strings")),
            };
            let hit = candidates.iter().any(|p| {
                if method == "startswith" {
                    s.starts_with(p.as_str())
                } else {
                    s.ends_with(p.as_str())
                }
            });
            Ok(Value::Bool(hit))
        }
        "find" | "index" => {
            let needle = str_arg(method, args, 0)?;
            match s.find(needle) {
                Some(byte) => Ok(Value::from(s[..byte].chars().count())),
                None if method == "find" => Ok(Value::from(-1)),
                None => Err("substring not found".to_string()),
            }
        }
        "count" => Ok(Value::from(s.matches(str_arg("count", args, 0)?).count())),
        "isdigit" | "isnumeric" => Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))),
        "isalpha" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic))),
        "isspace" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace))),
        "format" => format_method(s, args, kwargs),
        "encode" | "decode" => Err(format!("'str' object has no attribute '{method}' in action code")),
        other => Err(format!("'str' object has no attribute '{other}'")),
    }
}

/// `"{} and {name:.2f}".format(a, name=b)`
fn format_method(template: &str, args: &[Value], kwargs: &Kwargs) -> Result<Value, String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut auto_index = 0usize;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                out.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                out.push('}');
                i += 2;
            }
            '{' => {
                let close = chars[i..]
                    .iter()
                    .position(|&c| c == '}')
                    .map(|p| p + i)
                    .ok_or("single '{' encountered in format string")?;
                let field: String = chars[i + 1..close].iter().collect();
                let (key, spec) = match field.split_once(':') {
                    Some((k, s)) => (k.trim().to_string(), s.to_string()),
                    None => (field.trim().to_string(), String::new()),
                };
                let value = if key.is_empty() {
                    let v = args
                        .get(auto_index)
                        .ok_or("Replacement index out of range for positional args")?;
                    auto_index += 1;
                    v
                } else if let Ok(index) = key.parse::<usize>() {
                    args.get(index)
                        .ok_or("Replacement index out of range for positional args")?
                } else {
                    kwarg(kwargs, &key).ok_or_else(|| format!("KeyError: '{key}'"))?
                };
                out.push_str(&format_with_spec(value, &spec)?);
                i = close + 1;
            }
            '}' => return Err("single '}' encountered in format string".to_string()),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(Value::String(out))
}

fn list_method(
    items: &[Value],
    method: &str,
    args: &[Value],
    kwargs: &Kwargs,
) -> Result<MethodOutcome, String> {
    let mut list = items.to_vec();
    match method {
        "append" => {
            arity("append", args, 1, 1)?;
            check_len(list.len() + 1)?;
            list.push(args[0].clone());
            Ok(MethodOutcome::mutated(Value::Null, Value::Array(list)))
        }
        "extend" => {
            arity("extend", args, 1, 1)?;
            let extra = iterate(&args[0])?;
            check_len(list.len() + extra.len())?;
            list.extend(extra);
            Ok(MethodOutcome::mutated(Value::Null, Value::Array(list)))
        }
        "insert" => {
            arity("insert", args, 2, 2)?;
            let at = as_int(&args[0]).ok_or("insert() index must be an integer")?;
            let len = list.len() as i64;
            let at = (if at < 0 { (at + len).max(0) } else { at.min(len) }) as usize;
            list.insert(at, args[1].clone());
            Ok(MethodOutcome::mutated(Value::Null, Value::Array(list)))
        }
        "pop" => {
            arity("pop", args, 0, 1)?;
            if list.is_empty() {
                return Err("pop from empty list".to_string());
            }
            let len = list.len() as i64;
            let at = match args.first() {
                Some(v) => as_int(v).ok_or("pop() index must be an integer")?,
                None => len - 1,
            };
            let at = if at < 0 { at + len } else { at };
            if !(0..len).contains(&at) {
                return Err("pop index out of range".to_string());
            }
            let removed = list.remove(at as usize);
            Ok(MethodOutcome::mutated(removed, Value::Array(list)))
        }
        "remove" => {
            arity("remove", args, 1, 1)?;
            let at = list
                .iter()
                .position(|v| values_equal(v, &args[0]))
                .ok_or("list.remove(x): x not in list")?;
            list.remove(at);
            Ok(MethodOutcome::mutated(Value::Null, Value::Array(list)))
        }
        "clear" => Ok(MethodOutcome::mutated(Value::Null, Value::Array(Vec::new()))),
        "sort" => {
            only_kwargs("sort", kwargs, &["reverse"])?;
            sort_values(&mut list, kwarg(kwargs, "reverse").is_some_and(truthy))?;
            Ok(MethodOutcome::mutated(Value::Null, Value::Array(list)))
        }
        "reverse" => {
            list.reverse();
            Ok(MethodOutcome::mutated(Value::Null, Value::Array(list)))
        }
        "index" => {
            arity("index", args, 1, 1)?;
            list.iter()
                .position(|v| values_equal(v, &args[0]))
                .map(|i| MethodOutcome::pure(Value::from(i)))
                .ok_or_else(|| format!("{} is not in list", display(&args[0])))
        }
        "count" => {
            arity("count", args, 1, 1)?;
            let n = list.iter().filter(|v| values_equal(v, &args[0])).count();
            Ok(MethodOutcome::pure(Value::from(n)))
        }
        "copy" => Ok(MethodOutcome::pure(Value::Array(list))),
        other => Err(format!("'list' object has no attribute '{other}'")),
    }
}

fn map_method(map: &Map<String, Value>, method: &str, args: &[Value]) -> Result<MethodOutcome, String> {
    match method {
        "get" => {
            arity("get", args, 1, 2)?;
            let key = map_key(&args[0])?;
            Ok(MethodOutcome::pure(
                map.get(&key)
                    .cloned()
                    .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::Null)),
            ))
        }
        "keys" | "values" | "items" => Ok(MethodOutcome::pure(map_view(map, method))),
        "copy" => Ok(MethodOutcome::pure(Value::Object(map.clone()))),
        "update" => {
            arity("update", args, 1, 1)?;
            let Value::Object(other) = &args[0] else {
                return Err(format!("update() expects a dict, got '{}'", type_name(&args[0])));
            };
            let mut updated = map.clone();
            for (k, v) in other {
                updated.insert(k.clone(), v.clone());
            }
            Ok(MethodOutcome::mutated(Value::Null, Value::Object(updated)))
        }
        "pop" => {
            arity("pop", args, 1, 2)?;
            let key = map_key(&args[0])?;
            let mut updated = map.clone();
            let removed = match (updated.remove(&key), args.get(1)) {
                (Some(v), _) => v,
                (None, Some(default)) => default.clone(),
                (None, None) => return Err(format!("KeyError: '{key}'")),
            };
            Ok(MethodOutcome::mutated(removed, Value::Object(updated)))
        }
        "setdefault" => {
            arity("setdefault", args, 1, 2)?;
            let key = map_key(&args[0])?;
            if let Some(existing) = map.get(&key) {
                return Ok(MethodOutcome::pure(existing.clone()));
            }
            let default = args.get(1).cloned().unwrap_or(Value::Null);
            let mut updated = map.clone();
            updated.insert(key, default.clone());
            Ok(MethodOutcome::mutated(default, Value::Object(updated)))
        }
        "clear" => Ok(MethodOutcome::mutated(Value::Null, Value::Object(Map::new()))),
        other => Err(format!("'dict' object has no attribute '{other}'")),
    }
}
