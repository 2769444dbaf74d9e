//! Shared variable store for one document round
//!
//! Readers take a whole-map snapshot at test start; captures write single
//! keys under the exclusive lock. The store lives for one round and is
//! rebuilt from `config.vars` for every flaky-detection rerun.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde_json::Value;

#[derive(Debug, Default)]
pub struct VarStore {
    inner: RwLock<HashMap<String, Value>>,
}

impl VarStore {
    #[must_use]
    pub fn new(seed: &HashMap<String, Value>) -> Self {
        Self {
            inner: RwLock::new(seed.clone()),
        }
    }

    /// Consistent copy of the whole store.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Assign one captured value.
    pub fn set(&self, name: &str, value: Value) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value);
    }
}
