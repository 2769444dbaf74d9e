//! apitest-core: config model, assertion language and report types
//!
//! Everything in this crate is pure: decoding a suite document, expanding
//! `${name}` placeholders, walking JSON paths and judging a response against
//! a check. Execution (HTTP, scheduling, flaky reruns) lives in
//! `apitest-runner`.

pub mod assertion;
pub mod config;
pub mod expand;
pub mod jsonpath;
pub mod model;
pub mod report;
pub mod validate;

pub use assertion::{evaluate, values_equal, AssertError};
pub use config::{
    BodyBlock, BodyRow, Check, Config, ConfigError, Defaults, EnvOverride, LoadConfig, MockConfig,
    MockRoute, SnapshotSpec, StructuredCheck, TestCase,
};
pub use expand::{expand_check, expand_string, expand_value, stringify, ExpandError};
pub use jsonpath::{extract, PathError};
pub use model::{FailureEntry, FileReport, LoadSummary, RunReport, TestResult, TestStatus};
pub use validate::{validate, ValidateError};
