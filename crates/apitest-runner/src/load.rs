//! Load generator for the optional `load` block
//!
//! Spawns `users` workers with linearly ramped start offsets; each loops
//! until the wall-clock deadline, pushing latencies under a mutex and
//! bumping atomic counters. p95 is `sorted[floor(0.95 * (N-1))]`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;

use apitest_core::{LoadConfig, LoadSummary};

use crate::http::{effective_method, join_url, Driver, HttpError, HttpResponse, RequestSpec};

/// Suite-level context the load block inherits.
pub struct LoadOptions {
    pub base_url: String,
    /// Already merged with suite defaults and expanded
    pub headers: HashMap<String, String>,
    pub auth: String,
    pub timeout_ms: i64,
    pub retries: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("invalid load.duration {0:?}: {1}")]
    BadDuration(String, String),
}

/// Run the load block until its deadline and summarize latencies.
///
/// # Errors
///
/// Returns [`LoadError::BadDuration`] when the duration does not parse.
pub fn run(load: &LoadConfig, opts: &LoadOptions, driver: &dyn Driver) -> Result<LoadSummary, LoadError> {
    let method = effective_method(&load.method);
    let duration = parse_duration(load.duration.trim())
        .map_err(|why| LoadError::BadDuration(load.duration.clone(), why))?;
    let ramp_up = parse_duration(load.ramp_up.trim()).unwrap_or(Duration::ZERO);

    let users = load.users.max(1) as usize;
    let spec = RequestSpec {
        method: method.clone(),
        url: join_url(&opts.base_url, &load.path),
        headers: opts.headers.clone(),
        query: load.query.clone(),
        body: load.body.clone(),
        auth: opts.auth.clone(),
        timeout: Duration::from_millis(opts.timeout_ms.max(0) as u64),
    };

    let started = Instant::now();
    let deadline = started + duration;

    let requests = AtomicU64::new(0);
    let successes = AtomicU64::new(0);
    let failures = AtomicU64::new(0);
    let latencies: Mutex<Vec<f64>> = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for worker in 0..users {
            let spec = &spec;
            let load = &load;
            let requests = &requests;
            let successes = &successes;
            let failures = &failures;
            let latencies = &latencies;
            scope.spawn(move || {
                if !ramp_up.is_zero() && users > 1 {
                    let offset = ramp_up.mul_f64(worker as f64 / (users - 1) as f64);
                    std::thread::sleep(offset);
                }
                while Instant::now() < deadline {
                    let req_start = Instant::now();
                    let outcome = with_retries(opts.retries, driver, spec);
                    let elapsed = req_start.elapsed().as_secs_f64() * 1000.0;

                    latencies
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(elapsed);
                    requests.fetch_add(1, Ordering::Relaxed);

                    let resp = match outcome {
                        Ok(resp) => resp,
                        Err(_) => {
                            failures.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                    };
                    if apitest_core::evaluate(
                        load.check.as_ref(),
                        resp.status,
                        &resp.headers,
                        &resp.body_json,
                    )
                    .is_err()
                    {
                        failures.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    successes.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    let stats = summarize(
        &mut latencies
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner),
    );
    Ok(LoadSummary {
        method,
        path: load.path.clone(),
        users: users as i64,
        requests: requests.into_inner(),
        successes: successes.into_inner(),
        failures: failures.into_inner(),
        avg_ms: stats.avg,
        p95_ms: stats.p95,
        min_ms: stats.min,
        max_ms: stats.max,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

fn with_retries(
    retries: i64,
    driver: &dyn Driver,
    spec: &RequestSpec,
) -> Result<HttpResponse, HttpError> {
    let mut last = driver.send(spec);
    for _ in 0..retries.max(0) {
        if last.is_ok() {
            break;
        }
        last = driver.send(spec);
    }
    last
}

struct LatencyStats {
    min: f64,
    max: f64,
    avg: f64,
    p95: f64,
}

fn summarize(values: &mut [f64]) -> LatencyStats {
    if values.is_empty() {
        return LatencyStats {
            min: 0.0,
            max: 0.0,
            avg: 0.0,
            p95: 0.0,
        };
    }
    values.sort_by(f64::total_cmp);
    let sum: f64 = values.iter().sum();
    let p95_index = ((values.len() - 1) as f64 * 0.95) as usize;
    LatencyStats {
        min: values[0],
        max: values[values.len() - 1],
        avg: sum / values.len() as f64,
        p95: values[p95_index],
    }
}

/// Single-unit durations: `250ms`, `30s`, `1.5m`, `1h`.
pub(crate) fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }
    let (number, unit) = match raw.find(|c: char| c.is_ascii_alphabetic()) {
        Some(split) => raw.split_at(split),
        None => return Err(format!("missing unit in {raw:?}")),
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("bad number in {raw:?}"))?;
    if value < 0.0 {
        return Err(format!("negative duration {raw:?}"));
    }
    let ms = match unit {
        "ms" => value,
        "s" => value * 1000.0,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        _ => return Err(format!("unknown unit {unit:?}")),
    };
    Ok(Duration::from_secs_f64(ms / 1000.0))
}
