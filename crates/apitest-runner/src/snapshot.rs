//! Response snapshot baselines
//!
//! Baselines live under `<base>/<suite>/<name>.json`, where the suite is the
//! sanitized file stem of the document. A missing baseline (or an update
//! run) writes the current body; otherwise the normalized forms must match.

use std::path::{Path, PathBuf};

use serde_json::Value;

use apitest_core::SnapshotSpec;

const DEFAULT_DIR: &str = ".apitest_snapshots";

#[derive(Debug)]
pub struct SnapshotStore {
    base_dir: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("create snapshot dir: {0}")]
    CreateDir(std::io::Error),
    #[error("write snapshot: {0}")]
    Write(std::io::Error),
    #[error("snapshot mismatch for {} ({})", .test, .path.display())]
    Mismatch { test: String, path: PathBuf },
}

impl SnapshotStore {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir: PathBuf = base_dir.into();
        let base_dir = if base_dir.as_os_str().is_empty() {
            PathBuf::from(DEFAULT_DIR)
        } else {
            base_dir
        };
        Self { base_dir }
    }

    /// Compare `body` against the baseline for `(file, test)`, writing it
    /// when absent or when `update` is set. Returns whether a baseline was
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Mismatch`] on divergence, or an I/O variant
    /// when the baseline cannot be stored.
    pub fn evaluate(
        &self,
        file: &str,
        test_name: &str,
        spec: &SnapshotSpec,
        body: &Value,
        update: bool,
    ) -> Result<bool, SnapshotError> {
        let Some(name) = spec.name(test_name) else {
            return Ok(false);
        };

        let suite = sanitize_file_name(file_stem(file));
        let dir = self.base_dir.join(suite);
        std::fs::create_dir_all(&dir).map_err(SnapshotError::CreateDir)?;

        let target = dir.join(format!("{}.json", sanitize_file_name(name)));
        let current = normalize(body);

        let existing = std::fs::read_to_string(&target);
        if existing.is_err() || update {
            std::fs::write(&target, &current).map_err(SnapshotError::Write)?;
            return Ok(true);
        }

        let existing = existing.unwrap_or_default();
        if existing.trim() != current.trim() {
            return Err(SnapshotError::Mismatch {
                test: test_name.to_string(),
                path: target,
            });
        }
        Ok(false)
    }
}

/// Canonical text form of a body: strings that hold JSON re-indent, other
/// strings pass through, everything else pretty-prints.
fn normalize(body: &Value) -> String {
    match body {
        Value::Null => "null\n".to_string(),
        Value::String(raw) => {
            let trimmed = raw.trim();
            match serde_json::from_str::<Value>(trimmed) {
                Ok(parsed) => pretty(&parsed),
                Err(_) => format!("{trimmed}\n"),
            }
        }
        other => pretty(other),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn file_stem(file: &str) -> &str {
    Path::new(file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file)
}

fn sanitize_file_name(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }
    trimmed
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            other => other,
        })
        .collect()
}
