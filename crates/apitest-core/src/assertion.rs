//! Check evaluation against an HTTP response
//!
//! A check is judged against `(status, headers, decoded body)`. Expectations
//! on the expected side may be sentinels (`exists`, `!empty`, `/regex/`,
//! `len OP N`) or literals compared with numeric coercion.

use http::HeaderMap;
use serde_json::Value;

use crate::config::{BodyBlock, Check, StructuredCheck};
use crate::jsonpath::{self, PathError};

#[derive(Debug, thiserror::Error)]
pub enum AssertError {
    #[error("status mismatch: expected {expected}, got {actual}")]
    StatusMismatch { expected: i64, actual: u16 },
    #[error("check string must be a status code or map, got {0:?}")]
    BadCheckString(String),
    #[error("{label} expected to exist")]
    Missing { label: String },
    #[error("{label} expected non-empty value")]
    Empty { label: String },
    #[error("{label} has invalid regex {pattern:?}: {reason}")]
    BadRegex {
        label: String,
        pattern: String,
        reason: String,
    },
    #[error("{label} regex {pattern:?} did not match {actual:?}")]
    RegexMismatch {
        label: String,
        pattern: String,
        actual: String,
    },
    #[error("{label} length assertion failed: got {got}, expected {op} {want}")]
    LenMismatch {
        label: String,
        got: usize,
        op: String,
        want: i64,
    },
    #[error("{label} not found")]
    NotFound { label: String },
    #[error("{label} mismatch: expected {expected}, got {actual}")]
    ValueMismatch {
        label: String,
        expected: String,
        actual: String,
    },
    #[error("body check list item requires path")]
    RowMissingPath,
    #[error("unsupported body operator {0:?}")]
    UnsupportedOperator(String),
    #[error(transparent)]
    Path(#[from] PathError),
}

/// Judge a check against a response. `None` means "status must be 200".
///
/// # Errors
///
/// Returns the first failed expectation; evaluation order is status,
/// headers, body block, inline `$…` keys.
pub fn evaluate(
    check: Option<&Check>,
    status: u16,
    headers: &HeaderMap,
    body: &Value,
) -> Result<(), AssertError> {
    match check {
        None => assert_status(200, status),
        Some(Check::Status(number)) => assert_status(number_as_int(number), status),
        Some(Check::Text(raw)) => {
            let expected: i64 = raw
                .trim()
                .parse()
                .map_err(|_| AssertError::BadCheckString(raw.clone()))?;
            assert_status(expected, status)
        }
        Some(Check::Structured(sc)) => evaluate_structured(sc, status, headers, body),
    }
}

fn evaluate_structured(
    check: &StructuredCheck,
    status: u16,
    headers: &HeaderMap,
    body: &Value,
) -> Result<(), AssertError> {
    let expected_status = check.status.as_ref().map_or(200, |v| to_int(v, 200));
    assert_status(expected_status, status)?;

    if let Some(header_checks) = &check.headers {
        for (name, expected) in header_checks {
            let actual = Value::String(header_value(headers, name));
            evaluate_expectation(&format!("header[{name}]"), &actual, expected, true)?;
        }
    }

    if let Some(block) = &check.body {
        evaluate_body_block(block, body)?;
    }

    for (key, expected) in &check.extra {
        if key.starts_with('$') {
            assert_path(key, expected, body)?;
        }
    }

    Ok(())
}

fn evaluate_body_block(block: &BodyBlock, body: &Value) -> Result<(), AssertError> {
    match block {
        BodyBlock::Paths(map) => {
            for (path, expected) in map {
                assert_path(path, expected, body)?;
            }
            Ok(())
        }
        BodyBlock::Rows(rows) => {
            for row in rows {
                if row.path.trim().is_empty() {
                    return Err(AssertError::RowMissingPath);
                }
                if let Some(op) = row.operator.as_deref().map(str::trim) {
                    if !op.is_empty() && !op.eq_ignore_ascii_case("eq") {
                        return Err(AssertError::UnsupportedOperator(op.to_string()));
                    }
                }
                assert_path(&row.path, &row.value, body)?;
            }
            Ok(())
        }
    }
}

fn assert_path(path: &str, expected: &Value, body: &Value) -> Result<(), AssertError> {
    let extracted = jsonpath::extract(path, body)?;
    let found = extracted.is_some();
    let actual = extracted.unwrap_or(Value::Null);
    evaluate_expectation(path, &actual, expected, found)
}

/// Judge one expectation. Sentinels are tried first when the expected side
/// is a string; `exists`/`!empty` consult `found`, regex and length
/// predicates run on the actual value either way.
fn evaluate_expectation(
    label: &str,
    actual: &Value,
    expected: &Value,
    found: bool,
) -> Result<(), AssertError> {
    if let Value::String(raw) = expected {
        let trimmed = raw.trim();
        match trimmed {
            "exists" => {
                if !found {
                    return Err(AssertError::Missing {
                        label: label.to_string(),
                    });
                }
                return Ok(());
            }
            "!empty" => {
                if !found || is_empty(actual) {
                    return Err(AssertError::Empty {
                        label: label.to_string(),
                    });
                }
                return Ok(());
            }
            _ => {}
        }

        if trimmed.len() > 2 && trimmed.starts_with('/') && trimmed.ends_with('/') {
            let pattern = &trimmed[1..trimmed.len() - 1];
            let re = regex::Regex::new(pattern).map_err(|e| AssertError::BadRegex {
                label: label.to_string(),
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
            let text = crate::expand::stringify(actual);
            if !re.is_match(&text) {
                return Err(AssertError::RegexMismatch {
                    label: label.to_string(),
                    pattern: pattern.to_string(),
                    actual: text,
                });
            }
            return Ok(());
        }

        if let Some((op, want)) = parse_len_expr(trimmed) {
            let got = value_len(actual);
            if !eval_len(&op, got, want) {
                return Err(AssertError::LenMismatch {
                    label: label.to_string(),
                    got,
                    op,
                    want,
                });
            }
            return Ok(());
        }
    }

    if !found {
        return Err(AssertError::NotFound {
            label: label.to_string(),
        });
    }
    if !values_equal(actual, expected) {
        return Err(AssertError::ValueMismatch {
            label: label.to_string(),
            expected: describe(expected),
            actual: describe(actual),
        });
    }
    Ok(())
}

fn assert_status(expected: i64, actual: u16) -> Result<(), AssertError> {
    if expected != i64::from(actual) {
        return Err(AssertError::StatusMismatch { expected, actual });
    }
    Ok(())
}

/// Case-insensitive header lookup; multi-value headers join with `,`.
fn header_value(headers: &HeaderMap, name: &str) -> String {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    values.join(",")
}

/// Structural equality with numeric coercion: ints, floats and numeric
/// strings compare by float value, recursively through containers.
#[must_use]
pub fn values_equal(actual: &Value, expected: &Value) -> bool {
    if let (Some(a), Some(b)) = (to_float(actual), to_float(expected)) {
        return a == b;
    }
    match (actual, expected) {
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, va)| b.get(k).is_some_and(|vb| values_equal(va, vb)))
        }
        _ => actual == expected,
    }
}

fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number_as_int(n: &serde_json::Number) -> i64 {
    if let Some(i) = n.as_i64() {
        return i;
    }
    n.as_f64().map_or(0, |f| f as i64)
}

fn to_int(value: &Value, fallback: i64) -> i64 {
    match value {
        Value::Number(n) => number_as_int(n),
        Value::String(s) => s.trim().parse().unwrap_or(fallback),
        _ => fallback,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}

fn value_len(value: &Value) -> usize {
    match value {
        Value::String(s) => s.len(),
        Value::Array(a) => a.len(),
        Value::Object(m) => m.len(),
        _ => 0,
    }
}

fn parse_len_expr(raw: &str) -> Option<(String, i64)> {
    let lowered = raw.to_lowercase();
    let parts: Vec<&str> = lowered.split_whitespace().collect();
    if parts.len() != 3 || parts[0] != "len" {
        return None;
    }
    if !matches!(parts[1], "==" | "!=" | ">" | ">=" | "<" | "<=") {
        return None;
    }
    let want: i64 = parts[2].parse().ok()?;
    Some((parts[1].to_string(), want))
}

fn eval_len(op: &str, got: usize, want: i64) -> bool {
    let got = got as i64;
    match op {
        "==" => got == want,
        "!=" => got != want,
        ">" => got > want,
        ">=" => got >= want,
        "<" => got < want,
        "<=" => got <= want,
        _ => false,
    }
}

/// `7 (number)` / `"x" (string)`, as shown in mismatch messages.
fn describe(value: &Value) -> String {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("{value} ({kind})")
}
