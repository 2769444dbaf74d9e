//! Single-test execution
//!
//! The contract, in order: snapshot the variable store, expand every request
//! field against that snapshot, merge defaults, issue the request with
//! retries (transport and assertion failures both retry), then apply
//! captures and the snapshot baseline. Expansion failures report
//! `attempts = 0`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

use apitest_core::{expand_check, expand_string, expand_value, jsonpath, stringify};
use apitest_core::{Check, Config, TestCase, TestResult, TestStatus};

use crate::http::{effective_method, join_url, Driver, HttpResponse, RequestSpec};
use crate::snapshot::SnapshotStore;
use crate::vars::VarStore;

/// Everything a test needs besides itself.
pub struct ExecContext<'a> {
    pub file: &'a str,
    pub config: &'a Config,
    pub vars: &'a VarStore,
    pub driver: &'a dyn Driver,
    /// Absent during flaky-detection reruns so baselines are never rewritten
    pub snapshots: Option<&'a SnapshotStore>,
    pub update_snapshots: bool,
}

/// Run one test case to completion. The bool reports whether a snapshot
/// baseline was written.
pub fn execute_test(test: &TestCase, ctx: &ExecContext<'_>) -> (TestResult, bool) {
    let started = Instant::now();
    let mut result = TestResult::pending(&test.name, &effective_method(&test.method), &test.path);

    let vars = ctx.vars.snapshot();

    let expanded = match expand_request(test, ctx.config, &vars) {
        Ok(expanded) => expanded,
        Err(e) => return (finish(result, e.to_string(), started), false),
    };
    result.path.clone_from(&expanded.path);

    let retries = test.retries.unwrap_or(ctx.config.retries).max(0);
    let timeout_ms = test.timeout.unwrap_or(ctx.config.timeout);
    let spec = RequestSpec {
        method: result.method.clone(),
        url: join_url(&ctx.config.base, &expanded.path),
        headers: expanded.headers,
        query: expanded.query,
        body: expanded.body,
        auth: expanded.auth,
        timeout: Duration::from_millis(timeout_ms.max(0) as u64),
    };

    let mut attempts: u32 = 0;
    let mut last_err: Option<String> = None;
    let mut last_resp: Option<HttpResponse> = None;
    for _ in 0..=retries as u64 {
        attempts += 1;
        match ctx.driver.send(&spec) {
            Err(e) => {
                last_err = Some(e.to_string());
                last_resp = None;
            }
            Ok(resp) => {
                match apitest_core::evaluate(
                    expanded.check.as_ref(),
                    resp.status,
                    &resp.headers,
                    &resp.body_json,
                ) {
                    Err(e) => {
                        last_err = Some(e.to_string());
                        last_resp = Some(resp);
                    }
                    Ok(()) => {
                        last_err = None;
                        last_resp = Some(resp);
                        break;
                    }
                }
            }
        }
    }

    result.attempts = attempts;
    result.status_code = last_resp.as_ref().map(|r| r.status);

    if let Some(why) = last_err {
        return (finish(result, why, started), false);
    }
    let Some(resp) = last_resp else {
        // retries >= 0 guarantees at least one attempt
        return (finish(result, "no request was issued".to_string(), started), false);
    };

    for (name, path) in &test.capture {
        match jsonpath::extract(path, &resp.body_json) {
            Err(e) => {
                return (finish(result, format!("capture {name}: {e}"), started), false);
            }
            Ok(None) => {
                let why = format!("capture {name} path not found: {path}");
                return (finish(result, why, started), false);
            }
            Ok(Some(value)) => {
                ctx.vars.set(name, value.clone());
                result.captures.insert(name.clone(), stringify(&value));
            }
        }
    }

    let mut saved = false;
    if let (Some(store), Some(spec)) = (ctx.snapshots, &test.snapshot) {
        match store.evaluate(
            ctx.file,
            &test.name,
            spec,
            &resp.body_json,
            ctx.update_snapshots,
        ) {
            Ok(wrote) => saved = wrote,
            Err(e) => return (finish(result, e.to_string(), started), false),
        }
    }

    result.status = TestStatus::Pass;
    (finish(result, "ok".to_string(), started), saved)
}

struct ExpandedRequest {
    path: String,
    auth: String,
    headers: HashMap<String, String>,
    query: HashMap<String, Value>,
    body: Option<Value>,
    check: Option<Check>,
}

fn expand_request(
    test: &TestCase,
    config: &Config,
    vars: &HashMap<String, Value>,
) -> Result<ExpandedRequest, apitest_core::ExpandError> {
    let path = expand_string(&test.path, vars)?;

    let auth_raw = if test.auth.trim().is_empty() {
        config.defaults.auth.as_str()
    } else {
        test.auth.as_str()
    };
    let auth = expand_string(auth_raw, vars)?;

    let mut headers = merge_headers(&config.defaults.headers, &test.headers);
    for value in headers.values_mut() {
        *value = expand_string(value, vars)?;
    }

    let mut query = HashMap::with_capacity(test.query.len());
    for (key, value) in &test.query {
        query.insert(key.clone(), expand_value(value, vars)?);
    }

    let body = test
        .body
        .as_ref()
        .map(|b| expand_value(b, vars))
        .transpose()?;

    let check = test
        .check
        .as_ref()
        .map(|c| expand_check(c, vars))
        .transpose()?;

    Ok(ExpandedRequest {
        path,
        auth,
        headers,
        query,
        body,
        check,
    })
}

/// Suite defaults first, test headers win on conflict.
pub(crate) fn merge_headers(
    defaults: &HashMap<String, String>,
    test: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut out = defaults.clone();
    for (k, v) in test {
        out.insert(k.clone(), v.clone());
    }
    out
}

fn finish(mut result: TestResult, message: String, started: Instant) -> TestResult {
    result.message = message;
    result.duration_ms = started.elapsed().as_millis() as u64;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{json_response, ScriptedDriver};
    use serde_json::json;

    fn config(yaml: &str) -> Config {
        Config::from_yaml(yaml).unwrap()
    }

    fn test_case(yaml: &str) -> TestCase {
        serde_yml::from_str(yaml).unwrap()
    }

    fn ctx<'a>(cfg: &'a Config, vars: &'a VarStore, driver: &'a dyn Driver) -> ExecContext<'a> {
        ExecContext {
            file: "suite.yaml",
            config: cfg,
            vars,
            driver,
            snapshots: None,
            update_snapshots: false,
        }
    }

    #[test]
    fn passes_with_default_check() {
        let cfg = config("base: http://h\n");
        let driver = ScriptedDriver::default();
        let vars = VarStore::new(&cfg.vars);
        let test = test_case("name: ping\npath: /ping\n");

        let (result, _) = execute_test(&test, &ctx(&cfg, &vars, &driver));
        assert_eq!(result.status, TestStatus::Pass);
        assert_eq!(result.message, "ok");
        assert_eq!(result.attempts, 1);
        assert_eq!(result.status_code, Some(200));
    }

    #[test]
    fn expansion_failure_reports_zero_attempts() {
        let cfg = config("base: http://h\n");
        let driver = ScriptedDriver::default();
        let vars = VarStore::new(&cfg.vars);
        let test = test_case("name: t\npath: /users/${missing}\n");

        let (result, _) = execute_test(&test, &ctx(&cfg, &vars, &driver));
        assert_eq!(result.status, TestStatus::Fail);
        assert_eq!(result.attempts, 0);
        assert_eq!(result.message, "missing vars: missing");
        assert!(driver.requests().is_empty());
    }

    #[test]
    fn retries_cover_transport_then_success() {
        let cfg = config("base: http://h\nretries: 2\n");
        let driver = ScriptedDriver::default();
        driver.script(
            "http://h/flaky",
            vec![
                Err("connection refused".to_string()),
                Ok(json_response(200, json!({}))),
            ],
        );
        let vars = VarStore::new(&cfg.vars);
        let test = test_case("name: t\npath: /flaky\n");

        let (result, _) = execute_test(&test, &ctx(&cfg, &vars, &driver));
        assert_eq!(result.status, TestStatus::Pass);
        assert_eq!(result.attempts, 2);
    }

    #[test]
    fn assertion_failures_also_retry() {
        let cfg = config("base: http://h\n");
        let driver = ScriptedDriver::default();
        driver.script(
            "http://h/eventually",
            vec![
                Ok(json_response(500, json!({}))),
                Ok(json_response(200, json!({}))),
            ],
        );
        let vars = VarStore::new(&cfg.vars);
        let test = test_case("name: t\npath: /eventually\nretries: 1\n");

        let (result, _) = execute_test(&test, &ctx(&cfg, &vars, &driver));
        assert_eq!(result.status, TestStatus::Pass);
        assert_eq!(result.attempts, 2);
    }

    #[test]
    fn zero_retries_single_transport_error_fails() {
        let cfg = config("base: http://h\n");
        let driver = ScriptedDriver::default();
        driver.script("http://h/down", vec![Err("connect timeout".to_string())]);
        let vars = VarStore::new(&cfg.vars);
        let test = test_case("name: t\npath: /down\n");

        let (result, _) = execute_test(&test, &ctx(&cfg, &vars, &driver));
        assert_eq!(result.status, TestStatus::Fail);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.message, "connect timeout");
        assert_eq!(result.status_code, None);
    }

    #[test]
    fn failed_assertion_keeps_last_status_code() {
        let cfg = config("base: http://h\n");
        let driver = ScriptedDriver::default();
        driver.script("http://h/teapot", vec![Ok(json_response(418, json!({})))]);
        let vars = VarStore::new(&cfg.vars);
        let test = test_case("name: t\npath: /teapot\n");

        let (result, _) = execute_test(&test, &ctx(&cfg, &vars, &driver));
        assert_eq!(result.status, TestStatus::Fail);
        assert_eq!(result.status_code, Some(418));
        assert_eq!(result.message, "status mismatch: expected 200, got 418");
    }

    #[test]
    fn captures_write_through_to_the_store() {
        let cfg = config("base: http://h\n");
        let driver = ScriptedDriver::default();
        driver.script(
            "http://h/login",
            vec![Ok(json_response(200, json!({"token": "T", "user": {"id": 9}})))],
        );
        let vars = VarStore::new(&cfg.vars);
        let test = test_case(
            "name: login\nmethod: POST\npath: /login\ncapture:\n  token: $.token\n  uid: $.user.id\n",
        );

        let (result, _) = execute_test(&test, &ctx(&cfg, &vars, &driver));
        assert_eq!(result.status, TestStatus::Pass);
        assert_eq!(result.captures.get("token"), Some(&"T".to_string()));
        assert_eq!(result.captures.get("uid"), Some(&"9".to_string()));
        assert_eq!(vars.snapshot().get("token"), Some(&json!("T")));
        assert_eq!(vars.snapshot().get("uid"), Some(&json!(9)));
    }

    #[test]
    fn capture_miss_fails_the_test() {
        let cfg = config("base: http://h\n");
        let driver = ScriptedDriver::default();
        driver.script("http://h/login", vec![Ok(json_response(200, json!({})))]);
        let vars = VarStore::new(&cfg.vars);
        let test = test_case("name: login\npath: /login\ncapture:\n  token: $.token\n");

        let (result, _) = execute_test(&test, &ctx(&cfg, &vars, &driver));
        assert_eq!(result.status, TestStatus::Fail);
        assert_eq!(result.message, "capture token path not found: $.token");
    }

    #[test]
    fn capture_parse_error_names_the_capture() {
        let cfg = config("base: http://h\n");
        let driver = ScriptedDriver::default();
        driver.script("http://h/login", vec![Ok(json_response(200, json!({})))]);
        let vars = VarStore::new(&cfg.vars);
        let test = test_case("name: login\npath: /login\ncapture:\n  token: token\n");

        let (result, _) = execute_test(&test, &ctx(&cfg, &vars, &driver));
        assert_eq!(result.status, TestStatus::Fail);
        assert!(result.message.starts_with("capture token:"), "{}", result.message);
    }

    #[test]
    fn defaults_merge_and_expand() {
        let cfg = config(
            "base: http://h\nvars:\n  token: T\ndefaults:\n  headers:\n    X-Common: base\n    X-Auth: \"Bearer ${token}\"\n  auth: \"bearer ${token}\"\n",
        );
        let driver = ScriptedDriver::default();
        let vars = VarStore::new(&cfg.vars);
        let test = test_case("name: t\npath: /me\nheaders:\n  X-Common: override\n");

        let (result, _) = execute_test(&test, &ctx(&cfg, &vars, &driver));
        assert_eq!(result.status, TestStatus::Pass);

        let sent = driver.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].headers.get("X-Common"), Some(&"override".to_string()));
        assert_eq!(sent[0].headers.get("X-Auth"), Some(&"Bearer T".to_string()));
        assert_eq!(sent[0].auth, "bearer T");
    }

    #[test]
    fn absolute_paths_skip_the_base() {
        let cfg = config("base: http://h\n");
        let driver = ScriptedDriver::default();
        driver.script("https://elsewhere/ping", vec![Ok(json_response(200, json!({})))]);
        let vars = VarStore::new(&cfg.vars);
        let test = test_case("name: t\npath: https://elsewhere/ping\n");

        let (result, _) = execute_test(&test, &ctx(&cfg, &vars, &driver));
        assert_eq!(result.status, TestStatus::Pass);
        assert_eq!(driver.requests()[0].url, "https://elsewhere/ping");
    }
}
