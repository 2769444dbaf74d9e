//! Scripted driver double for engine tests. No network involved.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use crate::http::{Driver, HttpError, HttpResponse, RequestSpec};

/// Replays per-URL response scripts in order; unscripted URLs get 200 `{}`.
/// Every request is recorded for assertions.
#[derive(Default)]
pub(crate) struct ScriptedDriver {
    scripts: Mutex<HashMap<String, VecDeque<Result<HttpResponse, String>>>>,
    requests: Mutex<Vec<RequestSpec>>,
}

impl ScriptedDriver {
    pub(crate) fn script(&self, url: &str, responses: Vec<Result<HttpResponse, String>>) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), responses.into());
    }

    pub(crate) fn requests(&self) -> Vec<RequestSpec> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Driver for ScriptedDriver {
    fn send(&self, spec: &RequestSpec) -> Result<HttpResponse, HttpError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(spec.clone());

        let next = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&spec.url)
            .and_then(VecDeque::pop_front);

        match next {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(why)) => Err(HttpError::Transport(why)),
            None => Ok(json_response(200, serde_json::json!({}))),
        }
    }
}

pub(crate) fn json_response(status: u16, body: Value) -> HttpResponse {
    let body_text = body.to_string();
    let mut headers = http::HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    HttpResponse {
        status,
        headers,
        body_bytes: body_text.clone().into_bytes(),
        body_json: body,
        body_text,
    }
}
