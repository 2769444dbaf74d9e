//! Dependency-aware scheduling of one document
//!
//! Tests run in ready batches: a test is ready when it has no `after` link
//! or its dependency already passed. Failed or skipped dependencies skip
//! their dependants; when a pass makes no progress and frees nothing, the
//! remaining tests form a cycle and fail. Batches execute on a bounded
//! worker pool; the report always lists tests in document order.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Instant;

use apitest_core::{Config, FileReport, TestCase, TestResult, TestStatus};

use crate::executor::{execute_test, ExecContext};
use crate::http::{effective_method, Driver};
use crate::snapshot::SnapshotStore;
use crate::vars::VarStore;

/// One document scheduled against a driver.
pub struct FileRun<'a> {
    pub file: &'a str,
    pub config: &'a Config,
    /// Tag selection; empty selects everything
    pub tags: &'a [String],
    pub parallel: usize,
    pub driver: &'a dyn Driver,
    pub snapshots: Option<&'a SnapshotStore>,
    pub update_snapshots: bool,
}

/// Scheduling result for one document.
pub struct FileRunOutcome {
    pub report: FileReport,
    pub snapshots_saved: usize,
}

impl FileRun<'_> {
    /// Execute every selected test and assemble the per-document report.
    #[must_use]
    pub fn run(&self) -> FileRunOutcome {
        let started = Instant::now();
        let tests = filter_by_tags(&self.config.tests, self.tags);

        let mut report = FileReport {
            file: self.file.to_string(),
            ..FileReport::default()
        };
        if tests.is_empty() {
            report.duration_ms = started.elapsed().as_millis() as u64;
            return FileRunOutcome {
                report,
                snapshots_saved: 0,
            };
        }

        let order: Vec<&str> = tests.iter().map(|t| t.name.as_str()).collect();
        let by_name: HashMap<&str, &TestCase> =
            tests.iter().map(|t| (t.name.as_str(), *t)).collect();
        let mut unresolved: HashSet<&str> = order.iter().copied().collect();
        let mut results: HashMap<String, TestResult> = HashMap::new();

        let vars = VarStore::new(&self.config.vars);
        let ctx = ExecContext {
            file: self.file,
            config: self.config,
            vars: &vars,
            driver: self.driver,
            snapshots: self.snapshots,
            update_snapshots: self.update_snapshots,
        };

        let mut snapshots_saved = 0;
        while !unresolved.is_empty() {
            let mut ready: Vec<&TestCase> = Vec::new();
            let mut progress = false;

            for name in &order {
                if !unresolved.contains(name) {
                    continue;
                }
                let test = by_name[name];
                let Some(after) = test.after.as_deref() else {
                    ready.push(test);
                    continue;
                };

                match results.get(after) {
                    None if unresolved.contains(after) => {} // dependency still pending
                    None => {
                        results.insert(
                            test.name.clone(),
                            skip_result(
                                test,
                                format!("dependency {after:?} is not selected in this run"),
                            ),
                        );
                        unresolved.remove(name);
                        progress = true;
                    }
                    Some(dep) if dep.status == TestStatus::Pass => ready.push(test),
                    Some(_) => {
                        results.insert(
                            test.name.clone(),
                            skip_result(test, format!("dependency {after:?} did not pass")),
                        );
                        unresolved.remove(name);
                        progress = true;
                    }
                }
            }

            if ready.is_empty() {
                if !progress {
                    for name in &order {
                        if !unresolved.remove(name) {
                            continue;
                        }
                        let test = by_name[name];
                        let mut result = TestResult::pending(
                            &test.name,
                            &effective_method(&test.method),
                            &test.path,
                        );
                        result.message = "dependency cycle detected".to_string();
                        results.insert(test.name.clone(), result);
                    }
                }
                continue;
            }

            let batch = run_batch(&ready, self.parallel.max(1), |test| {
                execute_test(test, &ctx)
            });
            for (result, saved) in batch {
                snapshots_saved += usize::from(saved);
                unresolved.remove(result.name.as_str());
                results.insert(result.name.clone(), result);
            }
        }

        for name in order {
            if let Some(result) = results.remove(name) {
                report.tests.push(result);
            }
        }
        report.retally();
        report.duration_ms = started.elapsed().as_millis() as u64;
        FileRunOutcome {
            report,
            snapshots_saved,
        }
    }
}

fn skip_result(test: &TestCase, message: String) -> TestResult {
    let mut result = TestResult::pending(&test.name, &effective_method(&test.method), &test.path);
    result.status = TestStatus::Skip;
    result.message = message;
    result
}

/// Run a ready batch on up to `parallel` workers, preserving batch order.
fn run_batch<'t, F>(tests: &[&'t TestCase], parallel: usize, run: F) -> Vec<(TestResult, bool)>
where
    F: Fn(&'t TestCase) -> (TestResult, bool) + Sync,
{
    if parallel <= 1 || tests.len() <= 1 {
        return tests.iter().map(|t| run(*t)).collect();
    }

    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();
    std::thread::scope(|scope| {
        for _ in 0..parallel.min(tests.len()) {
            let tx = tx.clone();
            let next = &next;
            let run = &run;
            scope.spawn(move || loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                if i >= tests.len() {
                    break;
                }
                let _ = tx.send((i, run(tests[i])));
            });
        }
        drop(tx);
    });

    let mut ordered: Vec<Option<(TestResult, bool)>> = tests.iter().map(|_| None).collect();
    for (i, item) in rx {
        ordered[i] = Some(item);
    }
    ordered.into_iter().flatten().collect()
}

/// Empty selection keeps everything; otherwise untagged tests stay in and
/// tagged tests need at least one tag in common.
fn filter_by_tags<'a>(tests: &'a [TestCase], selected: &[String]) -> Vec<&'a TestCase> {
    let need: HashSet<&str> = selected
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if need.is_empty() {
        return tests.iter().collect();
    }
    tests
        .iter()
        .filter(|t| t.tags.is_empty() || t.tags.iter().any(|tag| need.contains(tag.as_str())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{json_response, ScriptedDriver};
    use serde_json::json;

    fn config(yaml: &str) -> Config {
        Config::from_yaml(yaml).unwrap()
    }

    fn run(cfg: &Config, driver: &ScriptedDriver, tags: &[String], parallel: usize) -> FileReport {
        FileRun {
            file: "suite.yaml",
            config: cfg,
            tags,
            parallel,
            driver,
            snapshots: None,
            update_snapshots: false,
        }
        .run()
        .report
    }

    #[test]
    fn empty_suite_reports_zero() {
        let cfg = config("base: http://h\n");
        let driver = ScriptedDriver::default();
        let report = run(&cfg, &driver, &[], 1);
        assert_eq!(report.total, 0);
        assert!(report.tests.is_empty());
    }

    #[test]
    fn basic_pass() {
        let cfg = config("base: http://h\ntests:\n  - name: ping\n    path: /ping\n");
        let driver = ScriptedDriver::default();
        let report = run(&cfg, &driver, &[], 1);
        assert_eq!((report.total, report.passed, report.failed), (1, 1, 0));
    }

    #[test]
    fn capture_flows_to_dependant_header() {
        let cfg = config(
            r#"
base: http://h
tests:
  - name: login
    method: POST
    path: /login
    capture:
      token: $.token
  - name: me
    path: /me
    after: login
    headers:
      Authorization: "Bearer ${token}"
"#,
        );
        let driver = ScriptedDriver::default();
        driver.script(
            "http://h/login",
            vec![Ok(json_response(200, json!({"token": "T"})))],
        );
        let report = run(&cfg, &driver, &[], 4);
        assert_eq!(report.passed, 2);

        let me = driver
            .requests()
            .into_iter()
            .find(|r| r.url == "http://h/me")
            .expect("dependant request sent");
        assert_eq!(me.headers.get("Authorization"), Some(&"Bearer T".to_string()));
    }

    #[test]
    fn failed_dependency_skips_dependant() {
        let cfg = config(
            "base: http://h\ntests:\n  - name: A\n    path: /a\n  - name: B\n    path: /b\n    after: A\n",
        );
        let driver = ScriptedDriver::default();
        driver.script("http://h/a", vec![Ok(json_response(500, json!({})))]);
        let report = run(&cfg, &driver, &[], 2);

        assert_eq!(report.tests[0].status, TestStatus::Fail);
        assert_eq!(report.tests[1].status, TestStatus::Skip);
        assert_eq!(report.tests[1].message, "dependency \"A\" did not pass");
        assert_eq!(report.tests[1].attempts, 0);
        // B never reached the driver
        assert!(driver.requests().iter().all(|r| r.url != "http://h/b"));
    }

    #[test]
    fn skipped_dependency_cascades() {
        let cfg = config(
            "base: http://h\ntests:\n  - name: A\n    path: /a\n  - name: B\n    path: /b\n    after: A\n  - name: C\n    path: /c\n    after: B\n",
        );
        let driver = ScriptedDriver::default();
        driver.script("http://h/a", vec![Ok(json_response(500, json!({})))]);
        let report = run(&cfg, &driver, &[], 1);
        assert_eq!(report.tests[2].status, TestStatus::Skip);
        assert_eq!(report.tests[2].message, "dependency \"B\" did not pass");
    }

    #[test]
    fn unselected_dependency_skips_with_message() {
        let cfg = config(
            "base: http://h\ntests:\n  - name: A\n    path: /a\n    tags: [other]\n  - name: B\n    path: /b\n    after: A\n    tags: [smoke]\n",
        );
        let driver = ScriptedDriver::default();
        let report = run(&cfg, &driver, &["smoke".to_string()], 1);

        assert_eq!(report.total, 1);
        assert_eq!(report.tests[0].name, "B");
        assert_eq!(report.tests[0].status, TestStatus::Skip);
        assert_eq!(
            report.tests[0].message,
            "dependency \"A\" is not selected in this run"
        );
    }

    #[test]
    fn cycle_fails_every_member() {
        let cfg = config(
            "base: http://h\ntests:\n  - name: A\n    path: /a\n    after: B\n  - name: B\n    path: /b\n    after: A\n",
        );
        let driver = ScriptedDriver::default();
        let report = run(&cfg, &driver, &[], 2);

        assert_eq!(report.total, 2);
        assert_eq!(report.failed, 2);
        for test in &report.tests {
            assert_eq!(test.status, TestStatus::Fail);
            assert_eq!(test.message, "dependency cycle detected");
        }
        assert!(driver.requests().is_empty());
    }

    #[test]
    fn tag_filter_keeps_untagged_tests() {
        let cfg = config(
            "base: http://h\ntests:\n  - name: tagged\n    path: /a\n    tags: [smoke]\n  - name: other\n    path: /b\n    tags: [slow]\n  - name: untagged\n    path: /c\n",
        );
        let driver = ScriptedDriver::default();
        let report = run(&cfg, &driver, &["smoke".to_string()], 1);

        let names: Vec<&str> = report.tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["tagged", "untagged"]);
    }

    #[test]
    fn tag_filter_excluding_everything() {
        let cfg = config("base: http://h\ntests:\n  - name: a\n    path: /a\n    tags: [x]\n");
        let driver = ScriptedDriver::default();
        let report = run(&cfg, &driver, &["y".to_string()], 1);
        assert_eq!(report.total, 0);
    }

    #[test]
    fn report_order_matches_document_order_under_parallelism() {
        let names: Vec<String> = (0..12).map(|i| format!("t{i:02}")).collect();
        let mut yaml = String::from("base: http://h\ntests:\n");
        for name in &names {
            yaml.push_str(&format!("  - name: {name}\n    path: /{name}\n"));
        }
        let cfg = config(&yaml);
        let driver = ScriptedDriver::default();
        let report = run(&cfg, &driver, &[], 8);

        let got: Vec<String> = report.tests.iter().map(|t| t.name.clone()).collect();
        assert_eq!(got, names);
        assert_eq!(report.passed, 12);
    }

    #[test]
    fn chains_serialize_execution() {
        let cfg = config(
            r#"
base: http://h
tests:
  - name: first
    method: POST
    path: /step
    capture:
      v: $.n
  - name: second
    path: "/after/${v}"
    after: first
"#,
        );
        let driver = ScriptedDriver::default();
        driver.script(
            "http://h/step",
            vec![Ok(json_response(200, json!({"n": 41})))],
        );
        driver.script("http://h/after/41", vec![Ok(json_response(200, json!({})))]);
        let report = run(&cfg, &driver, &[], 4);
        assert_eq!(report.passed, 2);

        let urls: Vec<String> = driver.requests().iter().map(|r| r.url.clone()).collect();
        assert_eq!(urls, vec!["http://h/step", "http://h/after/41"]);
    }
}
