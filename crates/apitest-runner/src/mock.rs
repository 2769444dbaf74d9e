//! Mock HTTP server for the `mock` subcommand
//!
//! Serves the document's `mock.routes` plus any per-test `mock:` blocks.
//! Matching is first-declared-wins on exact path, method (empty route
//! method matches anything) and exact query parameters. Unmatched requests
//! get a JSON 404.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::Value;

use apitest_core::{Config, MockRoute};

use crate::load::parse_duration;

pub struct MockOptions {
    pub port: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum MockError {
    #[error("no mock routes found (add mock.routes or a test mock block)")]
    NoRoutes,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

struct MockState {
    routes: Vec<MockRoute>,
    default_delay: Duration,
}

/// Serve the document's mock routes until the process is interrupted.
///
/// # Errors
///
/// Returns [`MockError::NoRoutes`] when the document declares none, or the
/// underlying I/O error from binding/serving.
pub fn serve(cfg: &Config, opts: MockOptions) -> Result<(), MockError> {
    let routes = build_routes(cfg);
    if routes.is_empty() {
        return Err(MockError::NoRoutes);
    }

    let port = if opts.port == 0 { 8080 } else { opts.port };
    let default_delay = cfg
        .mock
        .as_ref()
        .and_then(|m| parse_duration(m.delay.trim()).ok())
        .unwrap_or(Duration::ZERO);

    let state = Arc::new(MockState {
        routes,
        default_delay,
    });
    let route_count = state.routes.len();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
        println!("Mock server listening on http://localhost:{port} with {route_count} routes");
        axum::serve(listener, app).await?;
        Ok(())
    })
}

async fn handle(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(route) = match_route(&state.routes, &method, &uri, &params) else {
        return (
            StatusCode::NOT_FOUND,
            [("content-type", "application/json")],
            r#"{"error":"mock route not found"}"#,
        )
            .into_response();
    };

    let delay = parse_duration(route.delay.trim()).unwrap_or(state.default_delay);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let status = u16::try_from(route.status)
        .ok()
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::OK);

    let body = render_body(route.body.as_ref());
    let mut response = (status, body).into_response();
    for (key, value) in &route.headers {
        if let (Ok(name), Ok(value)) = (
            key.parse::<HeaderName>(),
            value.parse::<HeaderValue>(),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    if !response.headers().contains_key("content-type") {
        response.headers_mut().insert(
            "content-type",
            HeaderValue::from_static("application/json"),
        );
    }
    response
}

/// Config-level routes first, then per-test routes, in declaration order.
fn build_routes(cfg: &Config) -> Vec<MockRoute> {
    let mut out = Vec::new();
    if let Some(mock) = &cfg.mock {
        out.extend(mock.routes.iter().cloned());
    }
    for test in &cfg.tests {
        let Some(route) = &test.mock else { continue };
        let mut route = route.clone();
        if route.method.trim().is_empty() {
            route.method.clone_from(&test.method);
        }
        if route.path.trim().is_empty() {
            route.path.clone_from(&test.path);
        }
        out.push(route);
    }
    out
}

fn match_route<'a>(
    routes: &'a [MockRoute],
    method: &Method,
    uri: &Uri,
    params: &HashMap<String, String>,
) -> Option<&'a MockRoute> {
    routes.iter().find(|route| {
        route.path == uri.path()
            && method_matches(&route.method, method)
            && query_matches(&route.query, params)
    })
}

fn method_matches(expected: &str, actual: &Method) -> bool {
    let expected = expected.trim();
    expected.is_empty() || expected.eq_ignore_ascii_case(actual.as_str())
}

fn query_matches(expected: &HashMap<String, Value>, params: &HashMap<String, String>) -> bool {
    expected.iter().all(|(key, value)| {
        params
            .get(key)
            .is_some_and(|actual| *actual == apitest_core::stringify(value))
    })
}

fn render_body(body: Option<&Value>) -> String {
    match body {
        None => "{}".to_string(),
        Some(Value::String(raw)) => raw.clone(),
        Some(other) => serde_json::to_string(other)
            .unwrap_or_else(|_| r#"{"error":"invalid mock body"}"#.to_string()),
    }
}
