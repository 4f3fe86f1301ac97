//! Dotted path queries over JSON documents.
//!
//! Paths address nested values with `.` separators: `user.name`,
//! `items.0.id`. A numeric segment indexes into an array (or names an object
//! key), `#` yields the length of an array, and `\.` escapes a literal dot in
//! a key.
//!
//! Values stringify the way operators write expectations: strings without
//! quotes, numbers and booleans as literal text, `null` and missing paths as
//! the empty string, objects and arrays as compact raw JSON.

use serde_json::Value;

/// A value found at a path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathValue(Value);

impl PathValue {
    /// The underlying JSON value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Consumes the wrapper.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Scalar-or-raw string form used for equality checks.
    #[must_use]
    pub fn as_string(&self) -> String {
        match &self.0 {
            Value::Null => String::new(),
            Value::String(text) => text.clone(),
            Value::Bool(flag) => flag.to_string(),
            Value::Number(number) => number.to_string(),
            raw @ (Value::Array(_) | Value::Object(_)) => raw.to_string(),
        }
    }

    /// Raw JSON text of the value.
    #[must_use]
    pub fn raw(&self) -> String {
        self.0.to_string()
    }

    /// Integer view: numbers are truncated, numeric strings parsed, booleans map to 1/0.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match &self.0 {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|f| f as i64)),
            Value::String(text) => text.trim().parse().ok(),
            Value::Bool(flag) => Some(i64::from(*flag)),
            _ => None,
        }
    }

    /// Float view: numbers as-is, numeric strings parsed, booleans map to 1/0.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match &self.0 {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse().ok(),
            Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Boolean view: booleans as-is, `"true"`/`"false"` strings, non-zero numbers.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match &self.0 {
            Value::Bool(flag) => Some(*flag),
            Value::String(text) => text.parse().ok(),
            Value::Number(number) => number.as_f64().map(|f| f != 0.0),
            _ => None,
        }
    }
}

/// Evaluates `path` against a raw document.
///
/// Returns `None` when the document is not JSON or the path does not resolve.
#[must_use]
pub fn query(document: &[u8], path: &str) -> Option<PathValue> {
    let root: Value = serde_json::from_slice(document).ok()?;
    query_value(&root, path)
}

/// Evaluates `path` against an already-parsed document.
#[must_use]
pub fn query_value(root: &Value, path: &str) -> Option<PathValue> {
    if path.is_empty() {
        return None;
    }
    let mut current = root;
    let segments = split_path(path);
    let last = segments.len() - 1;
    for (position, segment) in segments.iter().enumerate() {
        if segment == "#" && position == last {
            return current
                .as_array()
                .map(|items| PathValue(Value::from(items.len())));
        }
        current = step(current, segment)?;
    }
    Some(PathValue(current.clone()))
}

/// Stringified value at `path`, or the empty string when it does not resolve.
#[must_use]
pub fn query_string(document: &[u8], path: &str) -> String {
    query(document, path)
        .map(|value| value.as_string())
        .unwrap_or_default()
}

fn step<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '.' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}
