//! Minimal JSON-path dialect: `$`, `.field`, `[n]`, `['key']`
//!
//! Lookup misses (absent key, wrong container kind, out-of-range index) are
//! not errors; only a malformed expression is.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Field(String),
    Index(i64),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    #[error("jsonpath must start with '$': {0}")]
    MissingRoot(String),
    #[error("invalid jsonpath segment in {0:?}")]
    EmptySegment(String),
    #[error("unterminated jsonpath key in {0:?}")]
    UnterminatedKey(String),
    #[error("invalid jsonpath key bracket in {0:?}")]
    BadKeyBracket(String),
    #[error("unterminated jsonpath index in {0:?}")]
    UnterminatedIndex(String),
    #[error("invalid jsonpath index {0:?}")]
    BadIndex(String),
    #[error("unexpected token {token:?} in jsonpath {path:?}")]
    UnexpectedToken { token: char, path: String },
}

/// Evaluate `path` against `root`, returning the value when the walk lands.
///
/// `Ok(None)` means the path parsed but did not resolve; a found JSON null
/// comes back as `Ok(Some(Value::Null))`.
///
/// # Errors
///
/// Returns [`PathError`] when the expression itself is malformed.
pub fn extract(path: &str, root: &Value) -> Result<Option<Value>, PathError> {
    let tokens = parse(path)?;
    let mut current = root;
    for token in &tokens {
        match token {
            Token::Field(name) => match current.as_object().and_then(|m| m.get(name)) {
                Some(value) => current = value,
                None => return Ok(None),
            },
            Token::Index(idx) => {
                let Some(items) = current.as_array() else {
                    return Ok(None);
                };
                let Ok(idx) = usize::try_from(*idx) else {
                    return Ok(None);
                };
                match items.get(idx) {
                    Some(value) => current = value,
                    None => return Ok(None),
                }
            }
        }
    }
    Ok(Some(current.clone()))
}

fn parse(path: &str) -> Result<Vec<Token>, PathError> {
    let trimmed = path.trim();
    if trimmed == "$" {
        return Ok(Vec::new());
    }
    if !trimmed.starts_with('$') {
        return Err(PathError::MissingRoot(path.to_string()));
    }

    let bytes = trimmed.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                i += 1;
                let start = i;
                while i < bytes.len() && bytes[i] != b'.' && bytes[i] != b'[' {
                    i += 1;
                }
                if start == i {
                    return Err(PathError::EmptySegment(path.to_string()));
                }
                tokens.push(Token::Field(lossy(&bytes[start..i])));
            }
            b'[' => {
                i += 1;
                if i >= bytes.len() {
                    return Err(PathError::UnterminatedIndex(path.to_string()));
                }
                if bytes[i] == b'\'' || bytes[i] == b'"' {
                    let quote = bytes[i];
                    i += 1;
                    let start = i;
                    while i < bytes.len() && bytes[i] != quote {
                        i += 1;
                    }
                    if i >= bytes.len() {
                        return Err(PathError::UnterminatedKey(path.to_string()));
                    }
                    let key = lossy(&bytes[start..i]);
                    i += 1;
                    if i >= bytes.len() || bytes[i] != b']' {
                        return Err(PathError::BadKeyBracket(path.to_string()));
                    }
                    i += 1;
                    tokens.push(Token::Field(key));
                    continue;
                }
                let start = i;
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(PathError::UnterminatedIndex(path.to_string()));
                }
                let raw = lossy(&bytes[start..i]);
                i += 1;
                let idx: i64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| PathError::BadIndex(raw.trim().to_string()))?;
                tokens.push(Token::Index(idx));
            }
            other => {
                return Err(PathError::UnexpectedToken {
                    token: char::from(other),
                    path: path.to_string(),
                });
            }
        }
    }
    Ok(tokens)
}

// Slice boundaries always sit on ASCII delimiters, so this never actually
// replaces anything.
fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body() -> Value {
        json!({
            "token": "T",
            "items": [{"id": 7}, {"id": 8}],
            "meta": {"page.size": 20, "nil": null}
        })
    }

    #[test]
    fn root_returns_whole_body() {
        assert_eq!(extract("$", &body()).unwrap(), Some(body()));
    }

    #[test]
    fn dotted_fields_and_index() {
        assert_eq!(extract("$.items[1].id", &body()).unwrap(), Some(json!(8)));
    }

    #[test]
    fn quoted_keys() {
        assert_eq!(
            extract("$.meta['page.size']", &body()).unwrap(),
            Some(json!(20))
        );
        assert_eq!(
            extract("$[\"meta\"][\"nil\"]", &body()).unwrap(),
            Some(Value::Null)
        );
    }

    #[test]
    fn found_null_is_some_null() {
        assert_eq!(extract("$.meta.nil", &body()).unwrap(), Some(Value::Null));
    }

    #[test]
    fn absent_key_is_not_found() {
        assert_eq!(extract("$.nope", &body()).unwrap(), None);
        assert_eq!(extract("$.token.deeper", &body()).unwrap(), None);
    }

    #[test]
    fn index_misses_are_not_found() {
        assert_eq!(extract("$.items[5]", &body()).unwrap(), None);
        assert_eq!(extract("$.items[-1]", &body()).unwrap(), None);
        assert_eq!(extract("$.token[0]", &body()).unwrap(), None);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            extract("items", &body()).unwrap_err(),
            PathError::MissingRoot("items".to_string())
        );
        assert_eq!(
            extract("$..x", &body()).unwrap_err(),
            PathError::EmptySegment("$..x".to_string())
        );
        assert!(matches!(
            extract("$.items[", &body()).unwrap_err(),
            PathError::UnterminatedIndex(_)
        ));
        assert!(matches!(
            extract("$.items[x]", &body()).unwrap_err(),
            PathError::BadIndex(_)
        ));
        assert!(matches!(
            extract("$['key'", &body()).unwrap_err(),
            PathError::UnterminatedKey(_)
        ));
        assert!(matches!(
            extract("$['key'x", &body()).unwrap_err(),
            PathError::BadKeyBracket(_)
        ));
        assert!(matches!(
            extract("$x", &body()).unwrap_err(),
            PathError::UnexpectedToken { token: 'x', .. }
        ));
    }

    #[test]
    fn extraction_is_deterministic() {
        let b = body();
        let first = extract("$.items[0].id", &b).unwrap();
        for _ in 0..10 {
            assert_eq!(extract("$.items[0].id", &b).unwrap(), first);
        }
    }
}
