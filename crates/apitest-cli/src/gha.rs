//! GitHub Actions integration: failure annotations and workflow scaffolding

use std::path::{Path, PathBuf};

/// Annotations are on when the flag is set or the workflow environment
/// already says so.
pub fn enabled(flag: bool) -> bool {
    flag || std::env::var("GITHUB_ACTIONS").is_ok_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Escape the characters the annotation format reserves.
fn escape(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
        .replace(':', "%3A")
        .replace(',', "%2C")
}

/// One `::error` line for a failed test, printable to standard output.
pub fn failure_annotation(file: &str, test: &str, message: &str) -> String {
    let title = escape(&format!("apitest {test}"));
    let msg = escape(message);
    if file.trim().is_empty() {
        format!("::error title={title}::{msg}")
    } else {
        format!("::error file={},title={title}::{msg}", escape(file))
    }
}

/// Write a ready-to-run workflow file; empty path picks the default
/// location. Returns the path written.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn write_workflow(path: &str) -> std::io::Result<PathBuf> {
    let target = if path.trim().is_empty() {
        Path::new(".github").join("workflows").join("apitest.yml")
    } else {
        PathBuf::from(path.trim())
    };

    let content = "\
name: api-tests
on:
  pull_request:
  push:
    branches: [main]
jobs:
  api-tests:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - uses: dtolnay/rust-toolchain@stable
      - name: Build apitest
        run: cargo build --release
      - name: Run API tests
        run: ./target/release/apitest run tests.yaml --report-json reports/apitest.json --report-html reports/apitest.html --github-actions
      - name: Upload reports
        uses: actions/upload-artifact@v4
        with:
          name: apitest-report
          path: reports/
";

    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&target, content)?;
    Ok(target)
}
