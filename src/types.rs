//! Request/response context types shared between the dispatcher, the MITM
//! loops, and the observer interface.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hyper::{HeaderMap, Method, StatusCode};
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

/// Carries everything an observer needs to know about a forwarded request.
///
/// One instance is created immediately before a request is forwarded and is
/// handed to [`crate::observer::ProxyObserver::on_request`] before the
/// outbound call is made.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: Uuid,
    pub method: Method,
    /// Absolute target URL (`http://` or `https://`) the request is forwarded to.
    pub target_url: String,
    pub headers: HeaderMap,
    pub started_at: DateTime<Utc>,
    /// True once the request is flowing through a MITM-terminated TLS tunnel.
    pub is_mitm: bool,
    /// Set once 4.D/4.G's SSE-candidate heuristic matches the request.
    pub is_sse_candidate: bool,
    /// Opaque bag observers may use to stash per-request state.
    pub user_data: HashMap<String, serde_json::Value>,
    #[doc(hidden)]
    pub(crate) start: Instant,
}

impl RequestContext {
    pub fn new(id: Uuid, method: Method, target_url: String, headers: HeaderMap, is_mitm: bool) -> Self {
        Self {
            id,
            method,
            target_url,
            headers,
            started_at: Utc::now(),
            is_mitm,
            is_sse_candidate: false,
            user_data: HashMap::new(),
            start: Instant::now(),
        }
    }
}

/// Carries everything an observer needs to know about a forwarded response.
///
/// Created once response headers have been parsed (but before any body
/// bytes reach the client) and handed to
/// [`crate::observer::ProxyObserver::on_response`].
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub request_id: Uuid,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub is_sse: bool,
    pub user_data: HashMap<String, serde_json::Value>,
    #[doc(hidden)]
    pub(crate) start: Instant,
}

impl ResponseContext {
    pub fn new(request_id: Uuid, status: StatusCode, headers: HeaderMap, is_sse: bool, start: Instant) -> Self {
        Self {
            request_id,
            status,
            headers,
            is_sse,
            user_data: HashMap::new(),
            start,
        }
    }

    /// Milliseconds elapsed between the matching request's creation and now.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// A single complete SSE event, accumulated up to (and including) its
/// terminating blank line, as handed to
/// [`crate::observer::ProxyObserver::on_sse`].
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub raw: Bytes,
}
