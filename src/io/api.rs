//! Visitor HTTP API - routing, parameter parsing and JSON responses
//!
//! Resident endpoints live under `/api/resident`, security endpoints under
//! `/api/security`. Routing is a plain match on method and path segments;
//! `route` is synchronous and independent of hyper's connection types so it
//! can be exercised directly in tests.

use crate::domain::credentials::CredentialIssuer;
use crate::domain::error::VisitorError;
use crate::domain::types::{NewVisitor, VisitorId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::infra::store::VisitorStore;
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::{SecurityDesk, VisitorDirectory};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ALLOW, CONTENT_TYPE,
};
use hyper::{Method, Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::form_urlencoded;

/// Largest request body accepted (visitor payloads are a few hundred bytes)
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared state handed to every request
pub struct ApiState {
    directory: VisitorDirectory,
    security: SecurityDesk,
    metrics: Arc<Metrics>,
    site_id: String,
}

impl ApiState {
    pub fn new(config: &Config, store: Arc<dyn VisitorStore>, metrics: Arc<Metrics>) -> Self {
        let issuer = CredentialIssuer::new(config.otp_digits(), config.max_issue_attempts());
        Self {
            directory: VisitorDirectory::new(store.clone(), issuer, metrics.clone()),
            security: SecurityDesk::new(store, metrics.clone()),
            metrics,
            site_id: config.site_id().to_string(),
        }
    }

    pub fn directory(&self) -> &VisitorDirectory {
        &self.directory
    }

    pub fn security(&self) -> &SecurityDesk {
        &self.security
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Errors translated into HTTP responses at the API boundary
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::MethodNotAllowed(_) => "method_not_allowed",
            ApiError::Conflict(_) => "conflict",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::MethodNotAllowed(msg)
            | ApiError::Conflict(msg)
            | ApiError::Unavailable(msg)
            | ApiError::Internal(msg) => msg,
        }
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        let body = json!({
            "error": {
                "type": self.error_type(),
                "message": self.message(),
            }
        });
        let mut response = bytes_response(
            self.status(),
            "application/json",
            Bytes::from(body.to_string()),
        );
        if let ApiError::MethodNotAllowed(_) = self {
            response.headers_mut().insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
        }
        response
    }
}

impl From<VisitorError> for ApiError {
    fn from(e: VisitorError) -> Self {
        match e {
            VisitorError::NotFound(msg) => ApiError::NotFound(msg),
            VisitorError::Conflict { .. } => ApiError::Conflict(e.to_string()),
            VisitorError::CredentialsExhausted { .. } => ApiError::Unavailable(e.to_string()),
            VisitorError::Store(store_error) => {
                error!(error = %store_error, "visitor_store_error");
                ApiError::Internal(store_error.to_string())
            }
        }
    }
}

const ALLOWED_METHODS: &str = "GET, POST, PUT, OPTIONS";

/// The parts of an HTTP request the router looks at
#[derive(Debug, Clone, Copy)]
pub struct ApiRequest<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub body: &'a [u8],
}

impl<'a> ApiRequest<'a> {
    pub fn new(method: &'a Method, path: &'a str) -> Self {
        Self { method, path, query: None, body: &[] }
    }

    pub fn with_query(mut self, query: &'a str) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_body(mut self, body: &'a [u8]) -> Self {
        self.body = body;
        self
    }

    /// Query-string parameter
    fn query_param(&self, key: &str) -> Option<String> {
        self.query.and_then(|query| form_param(query.as_bytes(), key))
    }

    /// Query-string parameter, falling back to an urlencoded form body
    fn query_or_form_param(&self, key: &str) -> Option<String> {
        self.query_param(key).or_else(|| form_param(self.body, key))
    }
}

fn form_param(source: &[u8], key: &str) -> Option<String> {
    form_urlencoded::parse(source).find(|(k, _)| k == key).map(|(_, v)| v.into_owned())
}

fn required(value: Option<String>, key: &str) -> Result<String, ApiError> {
    value.ok_or_else(|| ApiError::BadRequest(format!("missing required parameter '{key}'")))
}

fn bytes_response(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json_response<T: Serialize>(value: &T) -> Result<Response<Full<Bytes>>, ApiError> {
    let body = serde_json::to_vec(value)
        .map_err(|e| ApiError::Internal(format!("response encoding failed: {e}")))?;
    Ok(bytes_response(StatusCode::OK, "application/json", Bytes::from(body)))
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn preflight_response() -> Response<Full<Bytes>> {
    let mut response = empty_response(StatusCode::OK);
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
    response
}

/// Route a request to its handler and render the response
pub fn route(state: &ApiState, request: &ApiRequest<'_>) -> Response<Full<Bytes>> {
    let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();

    let result = match (request.method, segments.as_slice()) {
        (&Method::GET, ["health"]) => {
            Ok(bytes_response(StatusCode::OK, "text/plain", Bytes::from_static(b"ok")))
        }
        (&Method::GET, ["metrics"]) => Ok(bytes_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            Bytes::from(format_prometheus_metrics(&state.metrics, &state.site_id)),
        )),
        (&Method::OPTIONS, ["api", ..]) => Ok(preflight_response()),
        (&Method::GET, ["api", "security", "scan", token]) => scan(state, token),
        (&Method::POST, ["api", "security", "validateOtp"]) => validate_otp(state, request),
        (&Method::PUT, ["api", "security", "markArrived", id]) => mark_arrived(state, id),
        (&Method::GET, ["api", "security", "search"]) => search(state, request),
        (&Method::GET, ["api", "security", "searchAll"]) => search_all(state, request),
        (&Method::POST, ["api", "resident", "addVisitor"]) => add_visitor(state, request),
        (&Method::GET, ["api", "resident", "viewVisitors"]) => json_response(&state.directory.list_visitors()),
        (method, segments) if is_known_route(segments) => {
            Err(ApiError::MethodNotAllowed(format!("{method} {}", request.path)))
        }
        _ => Err(ApiError::NotFound(format!("no route for {}", request.path))),
    };

    let mut response = result.unwrap_or_else(ApiError::into_response);
    response.headers_mut().insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

fn is_known_route(segments: &[&str]) -> bool {
    matches!(
        segments,
        ["health"]
            | ["metrics"]
            | ["api", "security", "scan", _]
            | ["api", "security", "validateOtp"]
            | ["api", "security", "markArrived", _]
            | ["api", "security", "search"]
            | ["api", "security", "searchAll"]
            | ["api", "resident", "addVisitor"]
            | ["api", "resident", "viewVisitors"]
    )
}

/// GET /api/security/scan/{token}
fn scan(state: &ApiState, raw_token: &str) -> Result<Response<Full<Bytes>>, ApiError> {
    let token = percent_decode_str(raw_token)
        .decode_utf8()
        .map_err(|_| ApiError::BadRequest("token is not valid UTF-8".to_string()))?;

    match state.security.find_by_token(&token) {
        Some(visitor) => json_response(&visitor),
        None => Err(ApiError::NotFound("no visitor for this QR token".to_string())),
    }
}

/// POST /api/security/validateOtp?otp=...
fn validate_otp(state: &ApiState, request: &ApiRequest<'_>) -> Result<Response<Full<Bytes>>, ApiError> {
    let otp = required(request.query_or_form_param("otp"), "otp")?;

    match state.security.find_by_otp(&otp) {
        Some(visitor) => json_response(&visitor),
        None => Err(ApiError::NotFound("no visitor for this OTP".to_string())),
    }
}

/// PUT /api/security/markArrived/{id}
fn mark_arrived(state: &ApiState, raw_id: &str) -> Result<Response<Full<Bytes>>, ApiError> {
    let id: VisitorId = match raw_id.parse() {
        Ok(id) => id,
        // A well-formed but negative id can never match a visitor
        Err(_) if raw_id.parse::<i64>().is_ok() => {
            return Err(ApiError::NotFound(format!("no visitor with id {raw_id}")))
        }
        Err(_) => return Err(ApiError::BadRequest(format!("invalid visitor id '{raw_id}'"))),
    };

    state.security.confirm_arrival(id)?;
    Ok(empty_response(StatusCode::OK))
}

/// GET /api/security/search?name=...
fn search(state: &ApiState, request: &ApiRequest<'_>) -> Result<Response<Full<Bytes>>, ApiError> {
    let name = required(request.query_param("name"), "name")?;

    match state.security.search_by_name(&name) {
        Some(visitor) => json_response(&visitor),
        None => Err(ApiError::NotFound(format!("no visitor matching '{name}'"))),
    }
}

/// GET /api/security/searchAll?name=...
fn search_all(state: &ApiState, request: &ApiRequest<'_>) -> Result<Response<Full<Bytes>>, ApiError> {
    let name = required(request.query_param("name"), "name")?;
    json_response(&state.security.search_all_by_name(&name))
}

/// POST /api/resident/addVisitor
fn add_visitor(state: &ApiState, request: &ApiRequest<'_>) -> Result<Response<Full<Bytes>>, ApiError> {
    let payload: NewVisitor = serde_json::from_slice(request.body)
        .map_err(|e| ApiError::BadRequest(format!("malformed visitor payload: {e}")))?;

    let visitor = state.directory.add_visitor(payload)?;
    json_response(&visitor)
}

/// hyper service entry point: read the body, route, record metrics
pub async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ApiState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let start = Instant::now();
    let (parts, body) = req.into_parts();
    let path = parts.uri.path();

    let response = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => {
            let body = collected.to_bytes();
            let request = ApiRequest {
                method: &parts.method,
                path,
                query: parts.uri.query(),
                body: &body,
            };
            route(&state, &request)
        }
        Err(e) => {
            let mut response =
                ApiError::BadRequest(format!("request body rejected: {e}")).into_response();
            response.headers_mut().insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
            response
        }
    };

    let latency_us = start.elapsed().as_micros() as u64;
    let status = response.status();
    state.metrics.record_request(status.as_u16(), latency_us);

    if status.is_server_error() {
        warn!(method = %parts.method, path = %path, status = %status.as_u16(), latency_us = %latency_us, "api_request");
    } else {
        debug!(method = %parts.method, path = %path, status = %status.as_u16(), latency_us = %latency_us, "api_request");
    }

    Ok(response)
}
