//! Run orchestrator and flaky detector
//!
//! One round = every selected test across every input document, documents
//! in parallel up to the worker bound. Flaky detection reruns the whole set
//! against a fresh variable store per round and rewrites round-1 results for
//! tests that both passed and failed. A document that fails to parse or
//! validate contributes a failure entry without aborting its peers.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

use chrono::{SecondsFormat, Utc};

use apitest_core::{
    expand_string, expand_value, validate, Config, FailureEntry, FileReport, LoadSummary,
    RunReport, TestStatus,
};

use crate::executor::merge_headers;
use crate::http::Driver;
use crate::load::{self, LoadOptions};
use crate::scheduler::FileRun;
use crate::snapshot::SnapshotStore;

/// Label used in failure entries for document-scope errors.
const CONFIG_FAILURE: &str = "(config)";

/// Everything one `run` invocation needs.
pub struct SuiteRunner<D> {
    driver: D,
    env: Option<String>,
    tags: Vec<String>,
    parallel: usize,
    detect_flaky_runs: u32,
    update_snapshots: bool,
    run_load: bool,
    snapshot_dir: PathBuf,
}

struct DocumentRun {
    file: String,
    outcome: Result<DocumentReport, String>,
}

struct DocumentReport {
    report: FileReport,
    load: Option<LoadSummary>,
    snapshots_saved: usize,
}

impl<D: Driver> SuiteRunner<D> {
    #[must_use]
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            env: None,
            tags: Vec::new(),
            parallel: default_parallel(),
            detect_flaky_runs: 1,
            update_snapshots: false,
            run_load: true,
            snapshot_dir: PathBuf::from(".apitest_snapshots"),
        }
    }

    #[must_use]
    pub fn with_env(mut self, env: Option<String>) -> Self {
        self.env = env.map(|e| e.trim().to_string()).filter(|e| !e.is_empty());
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel.max(1);
        self
    }

    #[must_use]
    pub fn with_detect_flaky_runs(mut self, runs: u32) -> Self {
        self.detect_flaky_runs = runs.max(1);
        self
    }

    #[must_use]
    pub fn with_update_snapshots(mut self, update: bool) -> Self {
        self.update_snapshots = update;
        self
    }

    #[must_use]
    pub fn with_run_load(mut self, run_load: bool) -> Self {
        self.run_load = run_load;
        self
    }

    #[must_use]
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = dir.into();
        self
    }

    /// Run every document, detect flakiness, aggregate the report.
    #[must_use]
    pub fn run(&self, files: &[String]) -> RunReport {
        let started = Utc::now();
        let t0 = std::time::Instant::now();
        let snapshots = SnapshotStore::new(self.snapshot_dir.clone());

        let mut round1 = self.run_round(files, Some(&snapshots), true);

        let mut flaky_keys: HashSet<String> = HashSet::new();
        if self.detect_flaky_runs > 1 {
            let mut history: HashMap<String, HashSet<TestStatus>> = HashMap::new();
            record_history(&mut history, &round1);
            for _ in 2..=self.detect_flaky_runs {
                let rerun = self.run_round(files, None, false);
                record_history(&mut history, &rerun);
            }
            for (key, statuses) in history {
                if statuses.contains(&TestStatus::Pass) && statuses.contains(&TestStatus::Fail) {
                    flaky_keys.insert(key);
                }
            }
        }

        let mut flaky_names: Vec<String> = Vec::new();
        for doc in &mut round1 {
            let Ok(doc_report) = &mut doc.outcome else {
                continue;
            };
            let report = &mut doc_report.report;
            for test in &mut report.tests {
                let key = flaky_key(&report.file, &test.name);
                if flaky_keys.contains(&key) {
                    test.status = TestStatus::Flaky;
                    test.message = "flaky: mixed pass/fail across reruns".to_string();
                    flaky_names.push(key);
                }
            }
            report.retally();
        }
        flaky_names.sort_unstable();

        let mut out = RunReport {
            started_at: started.to_rfc3339_opts(SecondsFormat::Millis, true),
            generated_by: "apitest".to_string(),
            flaky: flaky_names,
            ..RunReport::default()
        };

        let mut loads: Vec<LoadSummary> = Vec::new();
        for doc in round1 {
            match doc.outcome {
                Err(why) => {
                    out.failed += 1;
                    out.failures.push(FailureEntry {
                        file: doc.file.clone(),
                        test: CONFIG_FAILURE.to_string(),
                        why,
                    });
                    out.files.push(FileReport {
                        file: doc.file,
                        ..FileReport::default()
                    });
                }
                Ok(doc_report) => {
                    out.total += doc_report.report.total;
                    out.snapshots_saved += doc_report.snapshots_saved;
                    for test in &doc_report.report.tests {
                        match test.status {
                            TestStatus::Pass => out.passed += 1,
                            TestStatus::Fail | TestStatus::Flaky => {
                                out.failed += 1;
                                out.failures.push(FailureEntry {
                                    file: doc_report.report.file.clone(),
                                    test: test.name.clone(),
                                    why: test.message.clone(),
                                });
                            }
                            TestStatus::Skip => out.skipped += 1,
                        }
                    }
                    if let Some(load) = doc_report.load {
                        loads.push(load);
                    }
                    out.files.push(doc_report.report);
                }
            }
        }

        if loads.len() == 1 {
            out.load = loads.pop();
        }

        let finished = Utc::now();
        out.finished_at = finished.to_rfc3339_opts(SecondsFormat::Millis, true);
        out.duration_ms = t0.elapsed().as_millis() as u64;
        out
    }

    /// One pass over every document, documents running in parallel.
    fn run_round(
        &self,
        files: &[String],
        snapshots: Option<&SnapshotStore>,
        include_load: bool,
    ) -> Vec<DocumentRun> {
        if files.len() <= 1 || self.parallel <= 1 {
            return files
                .iter()
                .map(|file| self.run_document(file, snapshots, include_load))
                .collect();
        }

        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel();
        std::thread::scope(|scope| {
            for _ in 0..self.parallel.min(files.len()) {
                let tx = tx.clone();
                let next = &next;
                scope.spawn(move || loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    if i >= files.len() {
                        break;
                    }
                    let _ = tx.send((i, self.run_document(&files[i], snapshots, include_load)));
                });
            }
            drop(tx);
        });

        let mut ordered: Vec<Option<DocumentRun>> = files.iter().map(|_| None).collect();
        for (i, item) in rx {
            ordered[i] = Some(item);
        }
        ordered.into_iter().flatten().collect()
    }

    fn run_document(
        &self,
        file: &str,
        snapshots: Option<&SnapshotStore>,
        include_load: bool,
    ) -> DocumentRun {
        let cfg = match Config::load(Path::new(file), self.env.as_deref()) {
            Ok(cfg) => cfg,
            Err(e) => {
                return DocumentRun {
                    file: file.to_string(),
                    outcome: Err(e.to_string()),
                }
            }
        };
        let issues = validate(&cfg);
        if !issues.is_empty() {
            let joined = issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return DocumentRun {
                file: file.to_string(),
                outcome: Err(joined),
            };
        }

        let outcome = FileRun {
            file,
            config: &cfg,
            tags: &self.tags,
            parallel: self.parallel,
            driver: &self.driver,
            snapshots,
            update_snapshots: self.update_snapshots,
        }
        .run();

        let mut load_summary = None;
        if include_load && self.run_load {
            if let Some(load_cfg) = &cfg.load {
                if allow_by_tags(&load_cfg.tags, &self.tags) {
                    match self.run_load_block(&cfg, load_cfg) {
                        Ok(summary) => load_summary = Some(summary),
                        Err(why) => {
                            return DocumentRun {
                                file: file.to_string(),
                                outcome: Err(why),
                            }
                        }
                    }
                }
            }
        }

        DocumentRun {
            file: file.to_string(),
            outcome: Ok(DocumentReport {
                report: outcome.report,
                load: load_summary,
                snapshots_saved: outcome.snapshots_saved,
            }),
        }
    }

    /// Expand the load block against the document vars, then drive it.
    fn run_load_block(
        &self,
        cfg: &Config,
        load_cfg: &apitest_core::LoadConfig,
    ) -> Result<LoadSummary, String> {
        let mut expanded = load_cfg.clone();
        expanded.path = expand_string(&load_cfg.path, &cfg.vars).map_err(|e| e.to_string())?;
        for value in expanded.query.values_mut() {
            *value = expand_value(value, &cfg.vars).map_err(|e| e.to_string())?;
        }
        if let Some(body) = &mut expanded.body {
            *body = expand_value(body, &cfg.vars).map_err(|e| e.to_string())?;
        }
        if let Some(check) = expanded.check.take() {
            expanded.check =
                Some(apitest_core::expand_check(&check, &cfg.vars).map_err(|e| e.to_string())?);
        }

        let mut headers = merge_headers(&cfg.defaults.headers, &load_cfg.headers);
        for value in headers.values_mut() {
            *value = expand_string(value, &cfg.vars).map_err(|e| e.to_string())?;
        }

        let opts = LoadOptions {
            base_url: cfg.base.clone(),
            headers,
            auth: cfg.defaults.auth.clone(),
            timeout_ms: cfg.timeout,
            retries: cfg.retries,
        };
        load::run(&expanded, &opts, &self.driver).map_err(|e| e.to_string())
    }
}

fn record_history(history: &mut HashMap<String, HashSet<TestStatus>>, round: &[DocumentRun]) {
    for doc in round {
        let Ok(doc_report) = &doc.outcome else {
            continue;
        };
        for test in &doc_report.report.tests {
            history
                .entry(flaky_key(&doc_report.report.file, &test.name))
                .or_default()
                .insert(test.status);
        }
    }
}

fn flaky_key(file: &str, test: &str) -> String {
    format!("{file}::{test}")
}

/// A load block with tags only runs when it shares a tag with the selection
/// (or when nothing is selected).
fn allow_by_tags(item_tags: &[String], selected: &[String]) -> bool {
    if selected.is_empty() || item_tags.is_empty() {
        return true;
    }
    item_tags.iter().any(|tag| selected.contains(tag))
}

fn default_parallel() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
