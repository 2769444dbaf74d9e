//! Result and report model
//!
//! This is the stable machine-readable surface: `apitest schema` exports the
//! JSON Schema generated from these types.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Outcome of one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
    /// Mixed pass/fail across flaky-detection reruns
    Flaky,
}

impl TestStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Flaky => "flaky",
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One test's result as it appears in reports.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TestResult {
    pub name: String,
    pub method: String,
    pub path: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub duration_ms: u64,
    /// Request invocations actually made; 0 means expansion failed before
    /// any request
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub captures: BTreeMap<String, String>,
}

impl TestResult {
    /// Skeleton result for a test that has not produced a response.
    #[must_use]
    pub fn pending(name: &str, method: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            status: TestStatus::Fail,
            message: String::new(),
            duration_ms: 0,
            attempts: 0,
            status_code: None,
            captures: BTreeMap::new(),
        }
    }
}

/// Per-document report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct FileReport {
    pub file: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub tests: Vec<TestResult>,
}

impl FileReport {
    /// Recount the pass/fail/skip totals from the test list. Flaky counts as
    /// failed in the numbers.
    pub fn retally(&mut self) {
        self.total = self.tests.len();
        self.passed = 0;
        self.failed = 0;
        self.skipped = 0;
        for test in &self.tests {
            match test.status {
                TestStatus::Pass => self.passed += 1,
                TestStatus::Fail | TestStatus::Flaky => self.failed += 1,
                TestStatus::Skip => self.skipped += 1,
            }
        }
    }
}

/// One failure line, also used for CI annotations.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FailureEntry {
    pub file: String,
    pub test: String,
    pub why: String,
}

/// Load-test summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LoadSummary {
    pub method: String,
    pub path: String,
    pub users: i64,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_ms: f64,
    pub p95_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub duration_ms: u64,
}

/// The aggregated run report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    /// RFC 3339
    pub started_at: String,
    /// RFC 3339
    pub finished_at: String,
    pub duration_ms: u64,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// `file::test` keys of tests with mixed pass/fail across reruns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flaky: Vec<String>,
    pub files: Vec<FileReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureEntry>,
    pub generated_by: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub snapshots_saved: usize,
}

impl RunReport {
    /// True when the run should exit non-zero.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || !self.flaky.is_empty()
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &usize) -> bool {
    *n == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_are_omitted() {
        let result = TestResult {
            message: "ok".to_string(),
            status: TestStatus::Pass,
            ..TestResult::pending("t", "GET", "/")
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("status_code").is_none());
        assert!(json.get("captures").is_none());
        assert_eq!(json["status"], "pass");
    }

    #[test]
    fn retally_counts_flaky_as_failed() {
        let mut report = FileReport {
            file: "suite.yaml".to_string(),
            tests: vec![
                TestResult {
                    status: TestStatus::Pass,
                    ..TestResult::pending("a", "GET", "/")
                },
                TestResult {
                    status: TestStatus::Flaky,
                    ..TestResult::pending("b", "GET", "/")
                },
                TestResult {
                    status: TestStatus::Skip,
                    ..TestResult::pending("c", "GET", "/")
                },
            ],
            ..FileReport::default()
        };
        report.retally();
        assert_eq!(
            (report.total, report.passed, report.failed, report.skipped),
            (3, 1, 1, 1)
        );
    }

    #[test]
    fn has_failures_considers_flaky() {
        let mut report = RunReport::default();
        assert!(!report.has_failures());
        report.flaky.push("suite.yaml::t".to_string());
        assert!(report.has_failures());
    }
}
