//! Pre-execution validation of a loaded suite document

use std::collections::HashSet;

use crate::config::Config;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidateError {
    #[error("base is required")]
    MissingBase,
    #[error("timeout must be > 0")]
    BadTimeout,
    #[error("retries must be >= 0")]
    BadRetries,
    #[error("tests[{0}].name is required")]
    MissingTestName(usize),
    #[error("duplicate test name {0:?}")]
    DuplicateTestName(String),
    #[error("tests[{0}].path is required")]
    MissingTestPath(usize),
    #[error("tests[{0}].retries must be >= 0")]
    BadTestRetries(usize),
    #[error("tests[{0}].timeout must be > 0")]
    BadTestTimeout(usize),
    #[error("test {test:?} depends on unknown test {after:?}")]
    UnknownDependency { test: String, after: String },
    #[error("load.users must be > 0")]
    BadLoadUsers,
    #[error("load.duration is required")]
    MissingLoadDuration,
    #[error("mock.routes[{0}].path is required")]
    MissingMockPath(usize),
    #[error("mock.routes[{0}].status must be > 0")]
    BadMockStatus(usize),
}

/// Collect every validation issue in one pass; an empty vec means the
/// document is runnable.
#[must_use]
pub fn validate(cfg: &Config) -> Vec<ValidateError> {
    let mut errs = Vec::new();

    if cfg.base.trim().is_empty() {
        errs.push(ValidateError::MissingBase);
    }
    if cfg.timeout <= 0 {
        errs.push(ValidateError::BadTimeout);
    }
    if cfg.retries < 0 {
        errs.push(ValidateError::BadRetries);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for (i, test) in cfg.tests.iter().enumerate() {
        if test.name.trim().is_empty() {
            errs.push(ValidateError::MissingTestName(i));
        } else if !seen.insert(test.name.as_str()) {
            errs.push(ValidateError::DuplicateTestName(test.name.clone()));
        }
        if test.path.trim().is_empty() {
            errs.push(ValidateError::MissingTestPath(i));
        }
        if test.retries.is_some_and(|r| r < 0) {
            errs.push(ValidateError::BadTestRetries(i));
        }
        if test.timeout.is_some_and(|t| t <= 0) {
            errs.push(ValidateError::BadTestTimeout(i));
        }
    }

    for test in &cfg.tests {
        if let Some(after) = &test.after {
            if !seen.contains(after.as_str()) {
                errs.push(ValidateError::UnknownDependency {
                    test: test.name.clone(),
                    after: after.clone(),
                });
            }
        }
    }

    if let Some(load) = &cfg.load {
        if load.users <= 0 {
            errs.push(ValidateError::BadLoadUsers);
        }
        if load.duration.trim().is_empty() {
            errs.push(ValidateError::MissingLoadDuration);
        }
    }

    if let Some(mock) = &cfg.mock {
        for (i, route) in mock.routes.iter().enumerate() {
            if route.path.trim().is_empty() {
                errs.push(ValidateError::MissingMockPath(i));
            }
            if route.status <= 0 {
                errs.push(ValidateError::BadMockStatus(i));
            }
        }
    }

    errs
}
