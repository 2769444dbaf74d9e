//! apitest-runner: suite execution
//!
//! Drives the dependency-aware scheduler over parsed suite documents using
//! a pluggable blocking [`Driver`], with retries, captured-variable
//! threading and flaky-detection reruns on top.

pub mod executor;
pub mod http;
pub mod load;
pub mod mock;
pub mod scheduler;
pub mod snapshot;
pub mod suite;
pub mod vars;

#[cfg(test)]
pub(crate) mod testutil;

pub use http::{Driver, HttpError, HttpResponse, ReqwestDriver, RequestSpec};
pub use scheduler::{FileRun, FileRunOutcome};
pub use snapshot::{SnapshotError, SnapshotStore};
pub use suite::SuiteRunner;
pub use vars::VarStore;
