//! `${name}` placeholder expansion against the variable store
//!
//! Names match `[A-Za-z0-9_.-]+`. Every missing name in a string is
//! collected before failing so the error lists them all at once.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::config::{BodyBlock, Check, StructuredCheck};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_.-]+)\}").expect("placeholder pattern"));

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExpandError {
    #[error("missing vars: {}", .0.join(", "))]
    MissingVars(Vec<String>),
}

/// Replace every `${name}` in `input` with the stringified variable value.
///
/// # Errors
///
/// Returns [`ExpandError::MissingVars`] listing the deduplicated unknown
/// names when any placeholder cannot be resolved.
pub fn expand_string(input: &str, vars: &HashMap<String, Value>) -> Result<String, ExpandError> {
    if input.is_empty() {
        return Ok(String::new());
    }
    let mut missing: Vec<String> = Vec::new();
    let out = PLACEHOLDER.replace_all(input, |caps: &Captures| {
        let name = &caps[1];
        match vars.get(name) {
            Some(value) => stringify(value),
            None => {
                missing.push(name.to_string());
                caps[0].to_string()
            }
        }
    });
    if missing.is_empty() {
        Ok(out.into_owned())
    } else {
        Err(ExpandError::MissingVars(unique(missing)))
    }
}

/// Expand a value tree: strings via [`expand_string`], sequences and mapping
/// values element-wise. Mapping keys and non-string scalars pass through.
///
/// # Errors
///
/// Propagates the first [`ExpandError`] hit while walking.
pub fn expand_value(value: &Value, vars: &HashMap<String, Value>) -> Result<Value, ExpandError> {
    match value {
        Value::String(s) => Ok(Value::String(expand_string(s, vars)?)),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(expand_value(item, vars)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), expand_value(v, vars)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Expand every string inside a decoded check, including body-row paths.
///
/// # Errors
///
/// Propagates the first [`ExpandError`] hit while walking.
pub fn expand_check(check: &Check, vars: &HashMap<String, Value>) -> Result<Check, ExpandError> {
    match check {
        Check::Status(n) => Ok(Check::Status(n.clone())),
        Check::Text(s) => Ok(Check::Text(expand_string(s, vars)?)),
        Check::Structured(sc) => {
            let status = sc
                .status
                .as_ref()
                .map(|v| expand_value(v, vars))
                .transpose()?;
            let headers = match &sc.headers {
                None => None,
                Some(map) => {
                    let mut out = HashMap::with_capacity(map.len());
                    for (k, v) in map {
                        out.insert(k.clone(), expand_value(v, vars)?);
                    }
                    Some(out)
                }
            };
            let body = match &sc.body {
                None => None,
                Some(BodyBlock::Paths(map)) => {
                    let mut out = serde_json::Map::with_capacity(map.len());
                    for (k, v) in map {
                        out.insert(k.clone(), expand_value(v, vars)?);
                    }
                    Some(BodyBlock::Paths(out))
                }
                Some(BodyBlock::Rows(rows)) => {
                    let mut out = Vec::with_capacity(rows.len());
                    for row in rows {
                        let mut expanded = row.clone();
                        expanded.path = expand_string(&row.path, vars)?;
                        expanded.value = expand_value(&row.value, vars)?;
                        out.push(expanded);
                    }
                    Some(BodyBlock::Rows(out))
                }
            };
            let mut extra = serde_json::Map::with_capacity(sc.extra.len());
            for (k, v) in &sc.extra {
                extra.insert(k.clone(), expand_value(v, vars)?);
            }
            Ok(Check::Structured(StructuredCheck {
                status,
                headers,
                body,
                extra,
            }))
        }
    }
}

/// Render a value the way placeholders and captures see it: null as empty,
/// integral floats without the fraction, composites as compact JSON.
#[must_use]
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return i.to_string();
            }
            if let Some(u) = n.as_u64() {
                return u.to_string();
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    (f as i64).to_string()
                }
                Some(f) => f.to_string(),
                None => n.to_string(),
            }
        }
        composite => composite.to_string(),
    }
}

fn unique(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn expands_single_placeholder() {
        let v = vars(&[("token", json!("T"))]);
        assert_eq!(expand_string("Bearer ${token}", &v).unwrap(), "Bearer T");
    }

    #[test]
    fn round_trips_stringify() {
        let v = vars(&[("n", json!(42))]);
        assert_eq!(expand_string("${n}", &v).unwrap(), stringify(&json!(42)));
    }

    #[test]
    fn missing_names_deduplicated_in_order() {
        let v = vars(&[]);
        let err = expand_string("${b}/${a}/${b}", &v).unwrap_err();
        assert_eq!(
            err,
            ExpandError::MissingVars(vec!["b".to_string(), "a".to_string()])
        );
        assert_eq!(err.to_string(), "missing vars: b, a");
    }

    #[test]
    fn unknown_name_chars_left_alone() {
        let v = vars(&[]);
        assert_eq!(expand_string("${not valid}", &v).unwrap(), "${not valid}");
    }

    #[test]
    fn stringify_scalars() {
        assert_eq!(stringify(&Value::Null), "");
        assert_eq!(stringify(&json!(true)), "true");
        assert_eq!(stringify(&json!(7)), "7");
        assert_eq!(stringify(&json!(3.0)), "3");
        assert_eq!(stringify(&json!(3.5)), "3.5");
        assert_eq!(stringify(&json!("s")), "s");
        assert_eq!(stringify(&json!([1, "a"])), r#"[1,"a"]"#);
        assert_eq!(stringify(&json!({"k": 1})), r#"{"k":1}"#);
    }

    #[test]
    fn expand_value_recurses_without_touching_keys() {
        let v = vars(&[("user", json!("alice"))]);
        let input = json!({"${user}": ["${user}", 1], "nested": {"who": "${user}"}});
        let out = expand_value(&input, &v).unwrap();
        assert_eq!(
            out,
            json!({"${user}": ["alice", 1], "nested": {"who": "alice"}})
        );
    }

    #[test]
    fn expansion_is_idempotent_after_first_pass() {
        let v = vars(&[("a", json!("x"))]);
        let once = expand_value(&json!({"k": "${a}-${a}"}), &v).unwrap();
        let twice = expand_value(&once, &v).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn expand_check_walks_rows_and_inline_paths() {
        let v = vars(&[("id", json!(9)), ("status", json!(201))]);
        let check: Check = serde_yml::from_str(
            "status: \"${status}\"\nbody:\n  - path: $.items[${id}].id\n    value: \"${id}\"\n$.ok: \"${id}\"\n",
        )
        .unwrap();
        let Check::Structured(sc) = expand_check(&check, &v).unwrap() else {
            panic!("expected structured check");
        };
        assert_eq!(sc.status, Some(json!("201")));
        let Some(BodyBlock::Rows(rows)) = sc.body else {
            panic!("expected rows");
        };
        assert_eq!(rows[0].path, "$.items[9].id");
        assert_eq!(rows[0].value, json!("9"));
        assert_eq!(sc.extra.get("$.ok"), Some(&json!("9")));
    }
}
