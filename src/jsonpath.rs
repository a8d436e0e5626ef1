//! The JSONPath subset accepted by `wait_for_upsert` conditions.
//!
//! Supported forms, optionally wrapped in `{...}` and prefixed with `$`:
//!
//! - `.status.phase` or `status.phase`
//! - `.status.conditions[0].type`
//! - `.metadata.annotations['example.com/ready']`
//! - `.status.conditions[?(@.type=='Ready')].status`

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Index(usize),
    Filter { path: Vec<String>, value: String },
}

/// A parsed JSONPath expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Resolve the path against `doc`, taking the first match of any filter.
    pub fn find<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        let mut current = doc;
        for segment in &self.segments {
            current = match segment {
                Segment::Field(name) => current.get(name)?,
                Segment::Index(index) => current.get(*index)?,
                Segment::Filter { path, value } => current.as_array()?.iter().find(|item| {
                    lookup(item, path).map(render).as_deref() == Some(value.as_str())
                })?,
            };
        }
        Some(current)
    }

    /// Whether the value at this path renders to `expected`.
    pub fn matches(&self, doc: &Value, expected: &str) -> bool {
        self.find(doc).map(render).as_deref() == Some(expected)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for JsonPath {
    type Err = ProviderError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            raw: raw.to_string(),
            segments: parse(raw)?,
        })
    }
}

/// Render a scalar the way `kubectl get -o jsonpath` prints it.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn lookup<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |current, name| current.get(name))
}

fn invalid(raw: &str, reason: &str) -> ProviderError {
    ProviderError::Validation(format!("invalid JSONPath {:?}: {}", raw, reason))
}

fn parse(raw: &str) -> Result<Vec<Segment>, ProviderError> {
    let mut rest = raw.trim();
    if let Some(inner) = rest.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
        rest = inner.trim();
    }
    rest = rest.strip_prefix('$').unwrap_or(rest);
    if rest.is_empty() {
        return Err(invalid(raw, "empty path"));
    }

    let mut segments = Vec::new();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('[') {
            let (segment, remaining) = parse_bracket(raw, after)?;
            segments.push(segment);
            rest = remaining;
            continue;
        }

        let after = match rest.strip_prefix('.') {
            Some(after) => after,
            None if segments.is_empty() => rest,
            None => return Err(invalid(raw, "expected '.' or '['")),
        };
        let end = after.find(|c| c == '.' || c == '[').unwrap_or(after.len());
        let name = &after[..end];
        if name.is_empty() {
            return Err(invalid(raw, "empty field name"));
        }
        if name == "*" {
            return Err(invalid(raw, "wildcards are not supported"));
        }
        if name
            .chars()
            .any(|c| matches!(c, ']' | '(' | ')' | '\'' | '"') || c.is_whitespace())
        {
            return Err(invalid(raw, "unexpected character in field name"));
        }
        segments.push(Segment::Field(name.to_string()));
        rest = &after[end..];
    }
    Ok(segments)
}

fn parse_bracket<'a>(raw: &str, after: &'a str) -> Result<(Segment, &'a str), ProviderError> {
    if let Some(filter) = after.strip_prefix("?(") {
        let end = filter
            .find(")]")
            .ok_or_else(|| invalid(raw, "unterminated filter"))?;
        let (left, right) = filter[..end]
            .split_once("==")
            .ok_or_else(|| invalid(raw, "filters must compare with '=='"))?;
        let path = left
            .trim()
            .strip_prefix("@.")
            .ok_or_else(|| invalid(raw, "filter must start with '@.'"))?;
        let path: Vec<String> = path.split('.').map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(invalid(raw, "empty field name in filter"));
        }
        let value = unquote(right.trim()).unwrap_or(right.trim()).to_string();
        return Ok((Segment::Filter { path, value }, &filter[end + 2..]));
    }

    let end = after
        .find(']')
        .ok_or_else(|| invalid(raw, "unterminated '['"))?;
    let inner = after[..end].trim();
    let segment = match unquote(inner) {
        Some(key) => Segment::Field(key.to_string()),
        None => Segment::Index(
            inner
                .parse()
                .map_err(|_| invalid(raw, "index must be a non-negative integer"))?,
        ),
    };
    Ok((segment, &after[end + 1..]))
}

fn unquote(s: &str) -> Option<&str> {
    s.strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|r| r.strip_suffix('"')))
}
