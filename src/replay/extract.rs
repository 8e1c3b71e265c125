//! Extraction expressions applied to replay responses.
//!
//! Two forms: a JSON path subset (`$`, `.field`, `["field"]`, `[n]`, `[*]`,
//! `.*`) for structured bodies, and `re:<pattern>` for any body. A regex
//! with a capture group yields the first group of each match.

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

const REGEX_PREFIX: &str = "re:";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("invalid expression: {0}")]
    InvalidExpression(String),
    #[error("expression matched nothing")]
    NoMatch,
    #[error("body is not JSON")]
    BodyNotJson,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Step {
    Field(String),
    Index(usize),
    Wildcard,
}

fn parse_path(expr: &str) -> Result<Vec<Step>, ExtractError> {
    let invalid = |msg: &str| ExtractError::InvalidExpression(format!("{msg} in '{expr}'"));
    let rest = expr.trim();
    let rest = rest.strip_prefix('$').unwrap_or(rest);
    let chars: Vec<char> = rest.chars().collect();
    let mut steps = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '.' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != '.' && chars[end] != '[' {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                match name.as_str() {
                    "" => return Err(invalid("empty field")),
                    "*" => steps.push(Step::Wildcard),
                    _ => steps.push(Step::Field(name)),
                }
                i = end;
            }
            '[' => {
                let close = chars[i..]
                    .iter()
                    .position(|c| *c == ']')
                    .map(|p| i + p)
                    .ok_or_else(|| invalid("unclosed bracket"))?;
                let inner: String = chars[i + 1..close].iter().collect();
                let inner = inner.trim();
                if inner == "*" {
                    steps.push(Step::Wildcard);
                } else if let Some(quoted) = inner
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .or_else(|| inner.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                {
                    steps.push(Step::Field(quoted.to_string()));
                } else {
                    let index = inner
                        .parse::<usize>()
                        .map_err(|_| invalid("bad index"))?;
                    steps.push(Step::Index(index));
                }
                i = close + 1;
            }
            _ if i == 0 => {
                // Bare leading field: `items[0]` reads as `$.items[0]`.
                let mut end = i;
                while end < chars.len() && chars[end] != '.' && chars[end] != '[' {
                    end += 1;
                }
                steps.push(Step::Field(chars[i..end].iter().collect()));
                i = end;
            }
            other => return Err(invalid(&format!("unexpected '{other}'"))),
        }
    }
    Ok(steps)
}

fn descend<'a>(step: &Step, value: &'a Value) -> Vec<&'a Value> {
    match (step, value) {
        (Step::Field(name), Value::Object(map)) => map.get(name).into_iter().collect(),
        (Step::Index(idx), Value::Array(items)) => items.get(*idx).into_iter().collect(),
        (Step::Wildcard, Value::Array(items)) => items.iter().collect(),
        (Step::Wildcard, Value::Object(map)) => map.values().collect(),
        _ => Vec::new(),
    }
}

pub fn eval_json_path(expr: &str, root: &Value) -> Result<Value, ExtractError> {
    let steps = parse_path(expr)?;
    let fans_out = steps.contains(&Step::Wildcard);
    let mut current: Vec<&Value> = vec![root];
    for step in &steps {
        current = current
            .into_iter()
            .flat_map(|value| descend(step, value))
            .collect();
    }
    if fans_out {
        return Ok(Value::Array(current.into_iter().cloned().collect()));
    }
    current.first().map(|v| (*v).clone()).ok_or(ExtractError::NoMatch)
}

pub fn eval_regex(pattern: &str, text: &str) -> Result<Value, ExtractError> {
    let re = Regex::new(pattern).map_err(|err| ExtractError::InvalidExpression(err.to_string()))?;
    let group = usize::from(re.captures_len() > 1);
    let found: Vec<Value> = re
        .captures_iter(text)
        .filter_map(|caps| caps.get(group).map(|m| Value::String(m.as_str().to_string())))
        .collect();
    if found.is_empty() {
        return Err(ExtractError::NoMatch);
    }
    Ok(Value::Array(found))
}

/// Applies `expr` to a response body. `parsed` is the body already parsed
/// as JSON, when it is JSON.
pub fn extract(expr: &str, body: &str, parsed: Option<&Value>) -> Result<Value, ExtractError> {
    if let Some(pattern) = expr.strip_prefix(REGEX_PREFIX) {
        return eval_regex(pattern, body);
    }
    let owned;
    let root = match parsed {
        Some(value) => value,
        None => {
            owned = serde_json::from_str::<Value>(body).map_err(|_| ExtractError::BodyNotJson)?;
            &owned
        }
    };
    eval_json_path(expr, root)
}
