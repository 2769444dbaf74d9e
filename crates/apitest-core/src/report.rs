//! Report writers: pretty JSON and a self-contained HTML page

use std::io;
use std::path::{Path, PathBuf};

use crate::model::RunReport;

/// Write the machine report as pretty-printed JSON.
///
/// # Errors
///
/// Returns the underlying I/O error; serialization of [`RunReport`] itself
/// cannot fail.
pub fn write_json(path: &Path, report: &RunReport) -> io::Result<()> {
    ensure_parent(path)?;
    let mut content =
        serde_json::to_vec_pretty(report).map_err(|e| io::Error::other(e.to_string()))?;
    content.push(b'\n');
    std::fs::write(path, content)
}

/// Write a single-file HTML rendering of the report.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn write_html(path: &Path, report: &RunReport) -> io::Result<()> {
    ensure_parent(path)?;
    std::fs::write(path, render_html(report))
}

/// Resolve a report path relative to the directory of the first input file,
/// the way the CLI documents it. Absolute paths pass through.
#[must_use]
pub fn resolve_output_path(base_file: &str, output: &str) -> PathBuf {
    let output_path = Path::new(output);
    if output.is_empty() || output_path.is_absolute() {
        return output_path.to_path_buf();
    }
    match Path::new(base_file).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(output_path),
        _ => output_path.to_path_buf(),
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn render_html(report: &RunReport) -> String {
    let mut b = String::with_capacity(4096);
    b.push_str("<!doctype html><html><head><meta charset=\"utf-8\">");
    b.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">");
    b.push_str("<title>apitest report</title>");
    b.push_str("<style>");
    b.push_str("body{font-family:Segoe UI,Arial,sans-serif;background:#f5f7fb;color:#172033;padding:20px;}");
    b.push_str(".card{background:#fff;border-radius:12px;padding:16px;margin-bottom:16px;box-shadow:0 8px 24px rgba(20,30,60,.08);}");
    b.push_str("table{width:100%;border-collapse:collapse;}th,td{padding:8px;border-bottom:1px solid #e5e7ef;text-align:left;}");
    b.push_str(".pass{color:#0a7b35;font-weight:600}.fail{color:#a40f2c;font-weight:600}.skip{color:#8a6c00;font-weight:600}.flaky{color:#8a6c00;font-weight:600}");
    b.push_str("</style></head><body>");
    b.push_str("<h1>apitest run report</h1>");

    b.push_str("<div class=\"card\">");
    b.push_str(&format!(
        "<p><strong>Total:</strong> {} | <strong>Pass:</strong> {} | <strong>Fail:</strong> {} | <strong>Skip:</strong> {}</p>",
        report.total, report.passed, report.failed, report.skipped
    ));
    b.push_str(&format!(
        "<p><strong>Duration:</strong> {} ms</p>",
        report.duration_ms
    ));
    if !report.flaky.is_empty() {
        b.push_str(&format!(
            "<p><strong>Flaky:</strong> {}</p>",
            escape(&report.flaky.join(", "))
        ));
    }
    b.push_str("</div>");

    for file in &report.files {
        b.push_str("<div class=\"card\">");
        b.push_str(&format!("<h2>{}</h2>", escape(&file.file)));
        b.push_str("<table><thead><tr><th>Test</th><th>Method</th><th>Path</th><th>Status</th><th>Message</th><th>Duration (ms)</th></tr></thead><tbody>");
        for test in &file.tests {
            let status = test.status.as_str();
            b.push_str("<tr>");
            b.push_str(&format!("<td>{}</td>", escape(&test.name)));
            b.push_str(&format!("<td>{}</td>", escape(&test.method)));
            b.push_str(&format!("<td>{}</td>", escape(&test.path)));
            b.push_str(&format!("<td class=\"{status}\">{status}</td>"));
            b.push_str(&format!("<td>{}</td>", escape(&test.message)));
            b.push_str(&format!("<td>{}</td>", test.duration_ms));
            b.push_str("</tr>");
        }
        b.push_str("</tbody></table>");
        b.push_str("</div>");
    }

    if let Some(load) = &report.load {
        b.push_str("<div class=\"card\">");
        b.push_str("<h2>Load test</h2>");
        b.push_str(&format!(
            "<p>{} {} | users={} | requests={} | success={} | fail={}</p>",
            escape(&load.method),
            escape(&load.path),
            load.users,
            load.requests,
            load.successes,
            load.failures
        ));
        b.push_str(&format!(
            "<p>avg={:.2}ms p95={:.2}ms min={:.2}ms max={:.2}ms</p>",
            load.avg_ms, load.p95_ms, load.min_ms, load.max_ms
        ));
        b.push_str("</div>");
    }

    b.push_str("</body></html>");
    b
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
