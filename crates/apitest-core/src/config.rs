//! Suite configuration: document model and YAML decoding
//!
//! A suite document is decoded once into typed values; the polymorphic
//! `check` field becomes a tagged [`Check`] here rather than being probed at
//! evaluation time. Unknown keys are ignored.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A whole suite document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Base URL prefix joined with every non-absolute test path
    #[serde(default)]
    pub base: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: i64,

    /// Extra attempts after the first, applied to transport and assertion
    /// failures alike
    #[serde(default)]
    pub retries: i64,

    /// Seed values for the variable store
    #[serde(default)]
    pub vars: HashMap<String, Value>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named per-environment overrides, applied with `--env`
    #[serde(default)]
    pub envs: HashMap<String, EnvOverride>,

    #[serde(default)]
    pub tests: Vec<TestCase>,

    #[serde(default)]
    pub load: Option<LoadConfig>,

    #[serde(default)]
    pub mock: Option<MockConfig>,
}

/// Suite-wide request defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub auth: String,
}

/// One environment override block under `envs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvOverride {
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub retries: Option<i64>,
    #[serde(default)]
    pub vars: HashMap<String, Value>,
    #[serde(default)]
    pub defaults: Option<Defaults>,
}

/// One declarative test case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub name: String,

    /// HTTP verb, uppercased at load time; empty means GET
    #[serde(default)]
    pub method: String,

    /// Request path, may contain `${…}` placeholders; absolute URLs bypass
    /// `base`
    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Query parameters; sequence values produce repeated parameters
    #[serde(default)]
    pub query: HashMap<String, Value>,

    #[serde(default)]
    pub body: Option<Value>,

    /// `"bearer <token>"` or `"basic <user:pass>"`; falls back to
    /// `defaults.auth`
    #[serde(default)]
    pub auth: String,

    #[serde(default, deserialize_with = "de_tags")]
    pub tags: Vec<String>,

    /// Expected outcome; absent means status 200
    #[serde(default)]
    pub check: Option<Check>,

    /// capture-name → JSON path, applied in insertion order after a pass
    #[serde(default)]
    pub capture: IndexMap<String, String>,

    /// Name of a test that must pass before this one runs
    #[serde(default)]
    pub after: Option<String>,

    #[serde(default)]
    pub snapshot: Option<SnapshotSpec>,

    /// Route served for this test by `apitest mock`
    #[serde(default)]
    pub mock: Option<MockRoute>,

    #[serde(default)]
    pub retries: Option<i64>,

    /// Per-test timeout in milliseconds
    #[serde(default)]
    pub timeout: Option<i64>,
}

/// Expected outcome of a test, decoded once at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Check {
    /// Bare status code, e.g. `check: 201`
    Status(serde_json::Number),
    /// Status code spelled as a string, e.g. `check: "201"`
    Text(String),
    /// Structured status/headers/body expectations
    Structured(StructuredCheck),
}

/// The mapping form of a check.
///
/// Any extra key starting with `$` is an inline JSON-path expectation; other
/// extra keys are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuredCheck {
    /// Expected status; int, float or numeric string. Defaults to 200.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,

    /// header-name → expectation, matched case-insensitively
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyBlock>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Body expectations: either a path → expectation mapping or a row list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BodyBlock {
    Paths(serde_json::Map<String, Value>),
    Rows(Vec<BodyRow>),
}

/// One row of the verbose body-check form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BodyRow {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub value: Value,
    /// Only `eq` is supported; anything else fails the assertion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

/// `snapshot: true` uses the test name; a string picks the baseline name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotSpec {
    Enabled(bool),
    Name(String),
}

/// Load-test block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(default = "default_users")]
    pub users: i64,
    /// Wall-clock duration, e.g. `"30s"`
    #[serde(default)]
    pub duration: String,
    /// Worker start times are spread linearly over this window
    #[serde(default)]
    pub ramp_up: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub query: HashMap<String, Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub check: Option<Check>,
    #[serde(default, deserialize_with = "de_tags")]
    pub tags: Vec<String>,
}

/// Mock-server block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockConfig {
    #[serde(default)]
    pub routes: Vec<MockRoute>,
    /// Default response delay, e.g. `"50ms"`
    #[serde(default)]
    pub delay: String,
}

/// One mock route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockRoute {
    #[serde(default)]
    pub name: String,
    /// Empty matches any method
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_status")]
    pub status: i64,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    /// Expected query parameters; all must match exactly
    #[serde(default)]
    pub query: HashMap<String, Value>,
    #[serde(default)]
    pub delay: String,
}

fn default_timeout() -> i64 {
    5000
}

fn default_users() -> i64 {
    1
}

fn default_status() -> i64 {
    200
}

/// Tags accept a sequence or a comma-separated string.
fn de_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TagSpec {
        Csv(String),
        List(Vec<String>),
    }

    let tags = match Option::<TagSpec>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(TagSpec::Csv(raw)) => raw
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
        Some(TagSpec::List(items)) => items,
    };
    Ok(tags)
}

impl Config {
    /// Load a suite document from disk and apply the named environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or when `env`
    /// names an environment the document does not declare.
    pub fn load(path: &Path, env: Option<&str>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
        let mut cfg = Self::from_yaml(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;

        if let Some(env) = env.map(str::trim).filter(|e| !e.is_empty()) {
            cfg.apply_env(env)?;
        }
        cfg.normalize();
        Ok(cfg)
    }

    /// Decode a suite document from YAML text. No environment overlay or
    /// normalization is applied; [`Config::load`] does both.
    ///
    /// # Errors
    ///
    /// Returns the underlying YAML error on malformed input.
    pub fn from_yaml(content: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(content)
    }

    /// Overlay one `envs` entry onto the base document.
    fn apply_env(&mut self, env: &str) -> Result<(), ConfigError> {
        let Some(over) = self.envs.get(env).cloned() else {
            let mut available: Vec<&str> = self.envs.keys().map(String::as_str).collect();
            available.sort_unstable();
            return Err(ConfigError::UnknownEnv {
                env: env.to_string(),
                available: available.join(", "),
            });
        };

        if !over.base.is_empty() {
            self.base = over.base;
        }
        if let Some(timeout) = over.timeout {
            self.timeout = timeout;
        }
        if let Some(retries) = over.retries {
            self.retries = retries;
        }
        for (k, v) in over.vars {
            self.vars.insert(k, v);
        }
        if let Some(defaults) = over.defaults {
            for (k, v) in defaults.headers {
                self.defaults.headers.insert(k, v);
            }
            if !defaults.auth.is_empty() {
                self.defaults.auth = defaults.auth;
            }
        }
        Ok(())
    }

    /// Load-time normalization: uppercase methods, drop blank `after` links.
    fn normalize(&mut self) {
        for test in &mut self.tests {
            test.method = test.method.trim().to_ascii_uppercase();
            if test
                .after
                .as_deref()
                .is_some_and(|after| after.trim().is_empty())
            {
                test.after = None;
            }
        }
        if let Some(load) = &mut self.load {
            load.method = load.method.trim().to_ascii_uppercase();
        }
        if let Some(mock) = &mut self.mock {
            for route in &mut mock.routes {
                route.method = route.method.trim().to_ascii_uppercase();
            }
        }
    }
}

impl SnapshotSpec {
    /// Resolve the baseline name, or `None` when snapshotting is disabled.
    #[must_use]
    pub fn name<'a>(&'a self, test_name: &'a str) -> Option<&'a str> {
        match self {
            Self::Enabled(false) => None,
            Self::Enabled(true) => Some(test_name),
            Self::Name(name) => {
                let trimmed = name.trim();
                if trimmed.is_empty() {
                    Some(test_name)
                } else {
                    Some(trimmed)
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config {}: {}", .0.display(), .1)]
    Io(PathBuf, String),
    #[error("parse config {}: {}", .0.display(), .1)]
    Parse(PathBuf, String),
    #[error("env {env:?} not found (available: {available})")]
    UnknownEnv { env: String, available: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Config {
        let mut cfg = Config::from_yaml(yaml).unwrap();
        cfg.normalize();
        cfg
    }

    #[test]
    fn minimal_document() {
        let cfg = parse("base: http://localhost:3000\n");
        assert_eq!(cfg.base, "http://localhost:3000");
        assert_eq!(cfg.timeout, 5000);
        assert_eq!(cfg.retries, 0);
        assert!(cfg.tests.is_empty());
        assert!(cfg.load.is_none());
        assert!(cfg.mock.is_none());
    }

    #[test]
    fn full_test_case() {
        let cfg = parse(
            r#"
base: http://localhost:3000
timeout: 2000
retries: 1
vars:
  user: alice
defaults:
  headers:
    X-Client: apitest
  auth: bearer seed-token
tests:
  - name: create user
    method: post
    path: /users
    headers:
      X-Trace: "1"
    query:
      verbose: true
    body:
      name: ${user}
    check: 201
    capture:
      id: $.id
    tags: smoke, users
  - name: fetch user
    path: /users/${id}
    after: create user
    check:
      status: 200
      headers:
        Content-Type: application/json
      body:
        $.name: alice
"#,
        );
        assert_eq!(cfg.timeout, 2000);
        assert_eq!(cfg.tests.len(), 2);

        let create = &cfg.tests[0];
        assert_eq!(create.method, "POST");
        assert_eq!(create.tags, vec!["smoke", "users"]);
        assert!(matches!(create.check, Some(Check::Status(_))));
        assert_eq!(create.capture.get_index(0).unwrap().0, "id");

        let fetch = &cfg.tests[1];
        assert_eq!(fetch.method, "");
        assert_eq!(fetch.after.as_deref(), Some("create user"));
        let Some(Check::Structured(check)) = &fetch.check else {
            panic!("expected structured check");
        };
        assert!(check.headers.is_some());
        assert!(matches!(check.body, Some(BodyBlock::Paths(_))));
    }

    #[test]
    fn tags_accept_list_form() {
        let cfg = parse("tests:\n  - name: t\n    path: /\n    tags: [a, b]\n");
        assert_eq!(cfg.tests[0].tags, vec!["a", "b"]);
    }

    #[test]
    fn blank_after_becomes_none() {
        let cfg = parse("tests:\n  - name: t\n    path: /\n    after: \"  \"\n");
        assert_eq!(cfg.tests[0].after, None);
    }

    #[test]
    fn check_text_form() {
        let cfg = parse("tests:\n  - name: t\n    path: /\n    check: \"204\"\n");
        assert!(matches!(&cfg.tests[0].check, Some(Check::Text(s)) if s == "204"));
    }

    #[test]
    fn check_body_rows() {
        let cfg = parse(
            r#"
tests:
  - name: t
    path: /
    check:
      body:
        - path: $.id
          value: 7
        - path: $.name
          value: x
          operator: eq
"#,
        );
        let Some(Check::Structured(check)) = &cfg.tests[0].check else {
            panic!("expected structured check");
        };
        let Some(BodyBlock::Rows(rows)) = &check.body else {
            panic!("expected row form");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].operator.as_deref(), Some("eq"));
    }

    #[test]
    fn inline_path_keys_land_in_extra() {
        let cfg = parse("tests:\n  - name: t\n    path: /\n    check:\n      status: 200\n      $.ok: true\n");
        let Some(Check::Structured(check)) = &cfg.tests[0].check else {
            panic!("expected structured check");
        };
        assert_eq!(check.extra.get("$.ok"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn snapshot_spec_forms() {
        let cfg = parse(
            "tests:\n  - name: a\n    path: /\n    snapshot: true\n  - name: b\n    path: /\n    snapshot: baseline\n  - name: c\n    path: /\n    snapshot: false\n",
        );
        assert_eq!(cfg.tests[0].snapshot.as_ref().unwrap().name("a"), Some("a"));
        assert_eq!(
            cfg.tests[1].snapshot.as_ref().unwrap().name("b"),
            Some("baseline")
        );
        assert_eq!(cfg.tests[2].snapshot.as_ref().unwrap().name("c"), None);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let cfg = parse("base: http://h\nnot_a_key: 1\ntests:\n  - name: t\n    path: /\n    bogus: x\n");
        assert_eq!(cfg.tests.len(), 1);
    }

    #[test]
    fn env_overlay() {
        let yaml = r#"
base: http://localhost:3000
timeout: 1000
vars:
  user: alice
defaults:
  headers:
    X-Env: dev
envs:
  staging:
    base: https://staging.example.com
    timeout: 9000
    retries: 2
    vars:
      user: bob
    defaults:
      headers:
        X-Env: staging
      auth: bearer staging-token
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.yaml");
        std::fs::write(&path, yaml).unwrap();

        let cfg = Config::load(&path, Some("staging")).unwrap();
        assert_eq!(cfg.base, "https://staging.example.com");
        assert_eq!(cfg.timeout, 9000);
        assert_eq!(cfg.retries, 2);
        assert_eq!(cfg.vars.get("user"), Some(&serde_json::json!("bob")));
        assert_eq!(
            cfg.defaults.headers.get("X-Env"),
            Some(&"staging".to_string())
        );
        assert_eq!(cfg.defaults.auth, "bearer staging-token");
    }

    #[test]
    fn unknown_env_lists_available() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.yaml");
        std::fs::write(&path, "base: http://h\nenvs:\n  dev: {}\n  prod: {}\n").unwrap();

        let err = Config::load(&path, Some("qa")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("\"qa\" not found"), "{msg}");
        assert!(msg.contains("dev, prod"), "{msg}");
    }

    #[test]
    fn method_uppercased_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.yaml");
        std::fs::write(&path, "base: http://h\ntests:\n  - name: t\n    path: /\n    method: delete\n")
            .unwrap();
        let cfg = Config::load(&path, None).unwrap();
        assert_eq!(cfg.tests[0].method, "DELETE");
    }
}
