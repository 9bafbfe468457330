//! Importable modules.
//!
//! Only these exist; importing anything else fails even when the allowlist
//! permits it.

use chrono::Utc;
use serde_json::Value;
use std::time::Duration;

use super::value::{Num, as_int, as_num, display, float_value, type_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Math,
    Text,
    Json,
    Time,
}

pub const AVAILABLE_MODULES: &[&str] = &["math", "text", "json", "time"];

impl Module {
    pub fn from_name(name: &str) -> Option<Module> {
        match name {
            "math" => Some(Module::Math),
            "text" => Some(Module::Text),
            "json" => Some(Module::Json),
            "time" => Some(Module::Time),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Module::Math => "math",
            Module::Text => "text",
            Module::Json => "json",
            Module::Time => "time",
        }
    }

    pub fn functions(&self) -> &'static [&'static str] {
        match self {
            Module::Math => &[
                "sqrt", "pow", "exp", "log", "log10", "log2", "sin", "cos", "tan", "asin", "acos",
                "atan", "atan2", "hypot", "floor", "ceil", "trunc", "fabs", "factorial", "gcd",
                "degrees", "radians", "isclose",
            ],
            Module::Text => &[
                "upper", "lower", "strip", "split", "join", "replace", "contains", "startswith",
                "endswith", "words", "lines", "length", "truncate",
            ],
            Module::Json => &["dumps", "loads"],
            Module::Time => &["time", "now", "today", "sleep"],
        }
    }

    /// A non-callable attribute such as `math.pi`.
    pub fn attribute(&self, name: &str) -> Result<Value, String> {
        let constant = match (self, name) {
            (Module::Math, "pi") => std::f64::consts::PI,
            (Module::Math, "e") => std::f64::consts::E,
            (Module::Math, "tau") => std::f64::consts::TAU,
            _ => {
                return Err(if self.functions().contains(&name) {
                    format!("{}.{name} is a function; call it", self.name())
                } else {
                    format!("module '{}' has no attribute '{name}'", self.name())
                });
            }
        };
        float_value(constant)
    }

    pub async fn call(&self, name: &str, args: &[Value], kwargs: &[(String, Value)]) -> Result<Value, String> {
        if !self.functions().contains(&name) {
            return Err(format!("module '{}' has no attribute '{name}'", self.name()));
        }
        match self {
            Module::Math => math(name, args),
            Module::Text => text(name, args),
            Module::Json => json(name, args, kwargs),
            Module::Time => time(name, args).await,
        }
    }
}

fn number(func: &str, args: &[Value], index: usize) -> Result<f64, String> {
    match args.get(index) {
        Some(v) => as_num(v)
            .map(Num::as_f64)
            .ok_or_else(|| format!("{func}() must be a real number, not '{}'", type_name(v))),
        None => Err(format!("{func}() missing required argument {}", index + 1)),
    }
}

fn string<'a>(func: &str, args: &'a [Value], index: usize) -> Result<&'a str, String> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(format!("{func}() expects a string, not '{}'", type_name(other))),
        None => Err(format!("{func}() missing required argument {}", index + 1)),
    }
}

fn int_result(f: f64) -> Result<Value, String> {
    if f.is_finite() && f.abs() < 9.2e18 {
        Ok(Value::from(f as i64))
    } else {
        Err("cannot convert non-finite value to integer".to_string())
    }
}

fn math(name: &str, args: &[Value]) -> Result<Value, String> {
    let x = || number(name, args, 0);
    let y = || number(name, args, 1);
    let domain = |ok: bool| if ok { Ok(()) } else { Err("math domain error".to_string()) };
    let result = match name {
        "sqrt" => {
            let x = x()?;
            domain(x >= 0.0)?;
            x.sqrt()
        }
        "pow" => x()?.powf(y()?),
        "exp" => x()?.exp(),
        "log" => {
            let x = x()?;
            domain(x > 0.0)?;
            match args.get(1) {
                Some(_) => {
                    let base = y()?;
                    domain(base > 0.0 && base != 1.0)?;
                    x.log(base)
                }
                None => x.ln(),
            }
        }
        "log10" | "log2" => {
            let x = x()?;
            domain(x > 0.0)?;
            if name == "log10" { x.log10() } else { x.log2() }
        }
        "sin" => x()?.sin(),
        "cos" => x()?.cos(),
        "tan" => x()?.tan(),
        "asin" | "acos" => {
            let x = x()?;
            domain((-1.0..=1.0).contains(&x))?;
            if name == "asin" { x.asin() } else { x.acos() }
        }
        "atan" => x()?.atan(),
        "atan2" => x()?.atan2(y()?),
        "hypot" => x()?.hypot(y()?),
        "floor" => return int_result(x()?.floor()),
        "ceil" => return int_result(x()?.ceil()),
        "trunc" => return int_result(x()?.trunc()),
        "fabs" => x()?.abs(),
        "degrees" => x()?.to_degrees(),
        "radians" => x()?.to_radians(),
        "isclose" => return Ok(Value::Bool((x()? - y()?).abs() <= 1e-9 * x()?.abs().max(y()?.abs()).max(1e-300))),
        "factorial" => {
            let n = args
                .first()
                .and_then(as_int)
                .filter(|n| *n >= 0)
                .ok_or("factorial() only accepts non-negative integers")?;
            let mut acc: i64 = 1;
            for i in 2..=n {
                acc = acc.checked_mul(i).ok_or("factorial() result is too large")?;
            }
            return Ok(Value::from(acc));
        }
        "gcd" => {
            let (mut a, mut b) = match (args.first().and_then(as_int), args.get(1).and_then(as_int)) {
                (Some(a), Some(b)) => (a.unsigned_abs(), b.unsigned_abs()),
                _ => return Err("gcd() expects two integers".to_string()),
            };
            while b != 0 {
                (a, b) = (b, a % b);
            }
            return i64::try_from(a).map(Value::from).map_err(|_| "gcd() result is too large".to_string());
        }
        other => return Err(format!("module 'math' has no attribute '{other}'")),
    };
    float_value(result)
}

fn text(name: &str, args: &[Value]) -> Result<Value, String> {
    let s = string(name, args, 0);
    let strings = |v: Vec<&str>| Value::Array(v.into_iter().map(|p| Value::String(p.to_string())).collect());
    Ok(match name {
        "upper" => Value::String(s?.to_uppercase()),
        "lower" => Value::String(s?.to_lowercase()),
        "strip" => Value::String(s?.trim().to_string()),
        "split" => match args.get(1) {
            Some(Value::String(sep)) if !sep.is_empty() => strings(s?.split(sep.as_str()).collect()),
            _ => strings(s?.split_whitespace().collect()),
        },
        "words" => strings(s?.split_whitespace().collect()),
        "lines" => strings(s?.lines().collect()),
        "join" => {
            let Some(Value::Array(items)) = args.first() else {
                return Err("join() expects a list as its first argument".to_string());
            };
            let sep = match args.get(1) {
                Some(Value::String(sep)) => sep.as_str(),
                _ => "",
            };
            Value::String(items.iter().map(display).collect::<Vec<_>>().join(sep))
        }
        "replace" => Value::String(s?.replace(string(name, args, 1)?, string(name, args, 2)?)),
        "contains" => Value::Bool(s?.contains(string(name, args, 1)?)),
        "startswith" => Value::Bool(s?.starts_with(string(name, args, 1)?)),
        "endswith" => Value::Bool(s?.ends_with(string(name, args, 1)?)),
        "length" => Value::from(s?.chars().count()),
        "truncate" => {
            let s = s?;
            let max = args
                .get(1)
                .and_then(as_int)
                .filter(|n| *n >= 0)
                .ok_or("truncate() expects a non-negative length")? as usize;
            if s.chars().count() <= max {
                Value::String(s.to_string())
            } else {
                let mut cut: String = s.chars().take(max).collect();
                cut.push_str("...");
                Value::String(cut)
            }
        }
        other => return Err(format!("module 'text' has no attribute '{other}'")),
    })
}

fn json(name: &str, args: &[Value], kwargs: &[(String, Value)]) -> Result<Value, String> {
    match name {
        "dumps" => {
            let value = args.first().ok_or("dumps() missing required argument")?;
            let indent = kwargs.iter().find(|(k, _)| k == "indent").map(|(_, v)| v);
            let rendered = match indent {
                Some(v) if as_int(v).is_some_and(|n| n > 0) => serde_json::to_string_pretty(value),
                _ => serde_json::to_string(value),
            };
            rendered.map(Value::String).map_err(|e| e.to_string())
        }
        "loads" => {
            let text = string(name, args, 0)?;
            serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))
        }
        other => Err(format!("module 'json' has no attribute '{other}'")),
    }
}

async fn time(name: &str, args: &[Value]) -> Result<Value, String> {
    match name {
        "time" => float_value(Utc::now().timestamp_millis() as f64 / 1000.0),
        "now" => Ok(Value::String(Utc::now().to_rfc3339())),
        "today" => Ok(Value::String(Utc::now().date_naive().to_string())),
        "sleep" => {
            let secs = number(name, args, 0)?;
            if secs < 0.0 {
                return Err("sleep length must be non-negative".to_string());
            }
            tokio::time::sleep(Duration::from_secs_f64(secs.min(86_400.0))).await;
            Ok(Value::Null)
        }
        other => Err(format!("module 'time' has no attribute '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn math_functions() {
        let m = Module::Math;
        assert_eq!(m.call("sqrt", &[json!(16)], &[]).await.unwrap(), json!(4.0));
        assert_eq!(m.call("floor", &[json!(2.7)], &[]).await.unwrap(), json!(2));
        assert_eq!(m.call("factorial", &[json!(5)], &[]).await.unwrap(), json!(120));
        assert_eq!(m.call("gcd", &[json!(12), json!(18)], &[]).await.unwrap(), json!(6));
        assert!(m.call("sqrt", &[json!(-1)], &[]).await.unwrap_err().contains("domain"));
        assert!(m.call("nope", &[], &[]).await.is_err());
        assert!((m.attribute("pi").unwrap().as_f64().unwrap() - std::f64::consts::PI).abs() < 1e-12);
    }

    #[tokio::test]
    async fn text_and_json() {
        assert_eq!(
            Module::Text.call("words", &[json!("a  b c")], &[]).await.unwrap(),
            json!(["a", "b", "c"])
        );
        assert_eq!(
            Module::Text.call("truncate", &[json!("abcdef"), json!(3)], &[]).await.unwrap(),
            json!("abc...")
        );
        let parsed = Module::Json.call("loads", &[json!("{\"a\": [1, 2]}")], &[]).await.unwrap();
        assert_eq!(parsed, json!({"a": [1, 2]}));
        assert_eq!(
            Module::Json.call("dumps", &[json!({"a": 1})], &[]).await.unwrap(),
            json!("{\"a\":1}")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn time_sleep_advances_clock() {
        let start = tokio::time::Instant::now();
        Module::Time.call("sleep", &[json!(2)], &[]).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn only_known_modules_exist() {
        assert_eq!(Module::from_name("math"), Some(Module::Math));
        assert!(Module::from_name("os").is_none());
        assert!(AVAILABLE_MODULES.iter().all(|m| Module::from_name(m).is_some()));
    }
}
