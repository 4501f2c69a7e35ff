//! Event observer interface (component C).
//!
//! A single sink may be registered on a [`crate::server::ProxyServer`]; if
//! none is registered, every notification is a no-op. Fan-out across
//! multiple interested parties is the sink's responsibility, not the core's.
//!
//! Every method here is synchronous on purpose: the core invokes these
//! callbacks inline on the forwarding task, and spec.md §4.C/§5 requires
//! that they never block. Making the trait `async` would let an
//! implementation await arbitrarily long; a plain `fn` forces a sink that
//! needs to do async work to hand it off (e.g. to an `mpsc` channel) and
//! return immediately.

use crate::types::{RequestContext, ResponseContext, SseEvent};
use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::{Request, Response};

pub type BoxBody = UnsyncBoxBody<Bytes, hyper::Error>;

/// Sink for request/response/tunnel/SSE/error notifications.
///
/// All methods have a default implementation so sinks only override the
/// events they care about. `on_request`/`on_response` may substitute the
/// request/response that continues through the pipeline; the default just
/// hands back what it was given.
pub trait ProxyObserver: Send + Sync {
    /// Invoked after a `RequestContext` is built and before the outbound
    /// request is sent. May substitute the outbound request.
    fn on_request(&self, _ctx: &RequestContext, req: Request<BoxBody>) -> Request<BoxBody> {
        req
    }

    /// Invoked after response headers are parsed and before any response
    /// bytes reach the client. May substitute the response.
    fn on_response(&self, _ctx: &ResponseContext, resp: Response<BoxBody>) -> Response<BoxBody> {
        resp
    }

    /// Invoked whenever a request/response cycle aborts with an error.
    fn on_error(&self, _err: &anyhow::Error, _ctx: Option<&RequestContext>) {}

    /// Invoked once per CONNECT, before tunneling/MITM begins.
    fn on_tunnel(&self, _host_port: &str, _intercepted: bool) {}

    /// Invoked once per complete SSE event (accumulated up to its
    /// terminating blank line).
    fn on_sse(&self, _event: &SseEvent, _ctx: &ResponseContext) {}
}

/// The default no-op sink used when nothing is registered.
pub struct NullObserver;

impl ProxyObserver for NullObserver {}
