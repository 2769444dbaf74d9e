//! OpenAPI → suite generator
//!
//! Turns every path/operation pair of a spec into one test skeleton with
//! the first declared 2xx response as its check.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

const METHODS: [&str; 7] = ["get", "post", "put", "patch", "delete", "head", "options"];

/// Generate a suite document next to the spec (or at `output`) and return
/// the path written.
pub fn generate_from_file(spec_path: &str, output: Option<&str>) -> Result<String> {
    let content = std::fs::read_to_string(spec_path)
        .with_context(|| format!("read openapi spec {spec_path}"))?;
    let spec = parse_spec(Path::new(spec_path), &content)?;
    let document = build_suite(&spec)?;
    let yaml = serde_yml::to_string(&document).context("encode suite document")?;

    let target = match output.map(str::trim).filter(|o| !o.is_empty()) {
        Some(path) => path.to_string(),
        None => {
            let stem = Path::new(spec_path)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("openapi");
            format!("{stem}.tests.yaml")
        }
    };
    std::fs::write(&target, yaml).with_context(|| format!("write {target}"))?;
    Ok(target)
}

/// Parse a spec as JSON or YAML: extension first, then content sniffing
/// (leading `{` means JSON).
fn parse_spec(path: &Path, content: &str) -> Result<Value> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "json" => serde_json::from_str(content).context("invalid JSON spec")?,
        "yaml" | "yml" => serde_yml::from_str(content).context("invalid YAML spec")?,
        _ => {
            if content.trim_start().starts_with('{') {
                serde_json::from_str(content).context("invalid JSON spec")?
            } else {
                serde_yml::from_str(content).context("invalid YAML spec")?
            }
        }
    };
    Ok(parsed)
}

/// Build the suite document value from a parsed spec.
fn build_suite(spec: &Value) -> Result<Value> {
    let Some(paths) = spec.get("paths").and_then(Value::as_object) else {
        bail!("openapi spec has no paths");
    };
    if paths.is_empty() {
        bail!("openapi spec has no paths");
    }

    let mut path_keys: Vec<&String> = paths.keys().collect();
    path_keys.sort_unstable();

    let mut tests = Vec::new();
    for path in path_keys {
        let Some(operations) = paths[path].as_object() else {
            continue;
        };
        for method in METHODS {
            let Some(op) = operations.get(method).and_then(Value::as_object) else {
                continue;
            };
            let name = op
                .get("summary")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .or_else(|| {
                    op.get("operationId")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                })
                .map(String::from)
                .unwrap_or_else(|| format!("{} {path}", method.to_ascii_uppercase()));

            let mut test = json!({
                "name": name,
                "method": method.to_ascii_uppercase(),
                "path": path,
                "check": pick_status(op),
            });
            if let Some(tags) = op.get("tags").and_then(Value::as_array) {
                if !tags.is_empty() {
                    test["tags"] = Value::Array(tags.clone());
                }
            }
            tests.push(test);
        }
    }

    if tests.is_empty() {
        bail!("openapi spec had paths but no operations");
    }

    Ok(json!({
        "base": pick_base_url(spec),
        "timeout": 5000,
        "retries": 0,
        "tests": tests,
    }))
}

fn pick_base_url(spec: &Value) -> String {
    spec.get("servers")
        .and_then(Value::as_array)
        .and_then(|servers| servers.first())
        .and_then(|server| server.get("url"))
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .unwrap_or("http://localhost:8080")
        .to_string()
}

/// Lowest-sorted 2xx response code, else the first declared, else 200.
fn pick_status(op: &serde_json::Map<String, Value>) -> i64 {
    let Some(responses) = op.get("responses").and_then(Value::as_object) else {
        return 200;
    };
    if responses.is_empty() {
        return 200;
    }
    let mut keys: Vec<&String> = responses.keys().collect();
    keys.sort_unstable();
    for key in &keys {
        if key.starts_with('2') {
            return key.parse().unwrap_or(200);
        }
    }
    keys[0].parse().unwrap_or(200)
}
