//! Plain-HTTP dispatcher (component D) and the shared forwarding pipeline
//! reused by the MITM HTTP/1 loop (F) and the MITM HTTP/2 handler (G).

use crate::body::read_and_restore_body;
use crate::content::decode_response_body;
use crate::server::ProxyState;
use crate::sse::{ensure_sse_headers, is_sse_content_type, stream_sse_response};
use crate::types::{RequestContext, ResponseContext};
use crate::writer::{bad_gateway, full, ResponseBody};
use anyhow::{Context, Result};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{HeaderMap, Method, Request, Response, Uri};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Paths whose presence marks a request as an SSE candidate before a
/// response has even arrived, per spec.md §4.D step 4.
const SSE_PATH_HINTS: &[&str] = &["/events", "/stream", "/sse", "/chat/completions"];

/// Entry point for every non-CONNECT request landing on the listener.
pub async fn handle(req: Request<Incoming>, state: Arc<ProxyState>) -> Result<Response<ResponseBody>, Infallible> {
    if req.method() == Method::CONNECT {
        return crate::connect::handle_connect(req, state).await;
    }

    let target_url = compose_target_url(&req);
    let protocol = protocol_label(req.version());
    let method = req.method().clone();
    let headers = req.headers().clone();
    let (_, body) = req.into_parts();

    match forward_request(method, target_url, headers, body, false, protocol, &state).await {
        Ok(resp) => Ok(resp),
        Err(err) => {
            tracing::error!("forwarding failed: {err:#}");
            state.notify_error(&err, None);
            Ok(bad_gateway(err.to_string()))
        }
    }
}

/// Absolute target URL for a non-CONNECT request, per spec.md §4.D step 2.
fn compose_target_url(req: &Request<Incoming>) -> String {
    if req.uri().scheme().is_some() {
        return req.uri().to_string();
    }

    let host = req
        .headers()
        .get(hyper::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let path_and_query = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("http://{host}{path_and_query}")
}

/// Absolute target URL for a request arriving over an already-terminated
/// MITM TLS connection, where `req.uri()` carries only the path.
pub(crate) fn compose_mitm_target_url(host_port: &str, uri: &Uri) -> String {
    let host = host_port.strip_suffix(":443").unwrap_or(host_port);
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("https://{host}{path_and_query}")
}

/// Label for the synthetic `X-Protocol` response header, per spec.md §4.D
/// step 8 / §6 and scenarios 1 & 3 — echoes the protocol the client used to
/// talk to the proxy, not the protocol used to reach the origin.
pub(crate) fn protocol_label(version: hyper::Version) -> &'static str {
    match version {
        hyper::Version::HTTP_09 => "HTTP/0.9",
        hyper::Version::HTTP_10 => "HTTP/1.0",
        hyper::Version::HTTP_11 => "HTTP/1.1",
        hyper::Version::HTTP_2 => "HTTP/2.0",
        hyper::Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

fn insert_protocol_header(headers: &mut HeaderMap, protocol: &str) -> Result<()> {
    headers.insert(
        hyper::header::HeaderName::from_static("x-protocol"),
        hyper::header::HeaderValue::from_str(protocol).context("building X-Protocol header value")?,
    );
    Ok(())
}

fn is_sse_candidate(target_url: &str, headers: &HeaderMap) -> bool {
    let path_lower = Uri::try_from(target_url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_default();
    if SSE_PATH_HINTS.iter().any(|hint| path_lower.contains(hint)) {
        return true;
    }
    headers
        .get(hyper::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("text/event-stream"))
        .unwrap_or(false)
}

/// The shared forwarding pipeline: build contexts, notify observers, send
/// through the transport factory, and return a response body ready for
/// whichever writer adapter (native, TLS, or HTTP/2 stream) is driving this
/// connection.
pub async fn forward_request(
    method: Method,
    target_url: String,
    mut headers: HeaderMap,
    body: Incoming,
    is_mitm: bool,
    protocol: &str,
    state: &ProxyState,
) -> Result<Response<ResponseBody>> {
    let request_id = Uuid::new_v4();
    let sse_candidate = is_sse_candidate(&target_url, &headers);

    if sse_candidate {
        headers.insert(hyper::header::ACCEPT, hyper::header::HeaderValue::from_static("text/event-stream"));
        headers.insert(hyper::header::CACHE_CONTROL, hyper::header::HeaderValue::from_static("no-cache"));
        headers.insert(hyper::header::CONNECTION, hyper::header::HeaderValue::from_static("keep-alive"));
    }

    let mut ctx = RequestContext::new(request_id, method.clone(), target_url.clone(), headers.clone(), is_mitm);
    ctx.is_sse_candidate = sse_candidate;

    let (body_bytes, read_err) = read_and_restore_body(body).await;
    if let Some(err) = read_err {
        return Err(err).context("reading request body");
    }

    let mut outbound = Request::builder().method(method).uri(&target_url);
    for (name, value) in headers.iter() {
        outbound = outbound.header(name, value);
    }
    let outbound = outbound.body(full(body_bytes)).context("building outbound request")?;

    let observer = state.observer();
    let outbound = observer.on_request(&ctx, outbound);

    let client = state
        .transport_factory
        .new_transport(is_mitm)
        .context("building outbound transport")?;

    let timeout = if sse_candidate { None } else { Some(Duration::from_secs(30)) };

    let send = client.request(outbound);
    let result = match timeout {
        Some(d) => tokio::time::timeout(d, send).await.context("upstream request timed out")?,
        None => send.await,
    };

    let resp = match result {
        Ok(resp) => resp,
        Err(err) => {
            let wrapped = anyhow::anyhow!("forwarding to {target_url} failed: {err}");
            observer.on_error(&wrapped, Some(&ctx));
            return Err(wrapped);
        }
    };

    let (parts, incoming) = resp.into_parts();
    let response_ctx = ResponseContext::new(request_id, parts.status, parts.headers.clone(), false, ctx.start);
    let is_sse = is_sse_content_type(parts.headers.get(hyper::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()));

    if is_sse {
        let mut response_headers = parts.headers;
        ensure_sse_headers(&mut response_headers);
        insert_protocol_header(&mut response_headers, protocol)?;
        if is_mitm {
            // spec.md §4.F step 4: the MITM HTTP/1 loop must return once an
            // SSE response completes rather than keep serving requests on
            // the same TLS-terminated socket.
            response_headers.insert(hyper::header::CONNECTION, hyper::header::HeaderValue::from_static("close"));
        }

        let mut response_ctx = response_ctx;
        response_ctx.is_sse = true;

        let body = stream_sse_response(incoming, response_ctx.clone(), observer.clone());

        let mut builder = Response::builder().status(parts.status);
        for (name, value) in response_headers.iter() {
            builder = builder.header(name, value);
        }
        let response = builder.body(body)?;
        return Ok(observer.on_response(&response_ctx, response));
    }

    let body_bytes = incoming.collect().await.context("reading response body")?.to_bytes();

    let content_type = parts.headers.get(hyper::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(str::to_string);
    let content_encoding = parts
        .headers
        .get(hyper::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut response_headers = parts.headers;
    insert_protocol_header(&mut response_headers, protocol)?;
    let final_bytes = match decode_response_body(body_bytes.clone(), content_type.as_deref(), content_encoding.as_deref()) {
        Ok(decoded) if decoded.uncompressed => {
            response_headers.remove(hyper::header::CONTENT_ENCODING);
            response_headers.remove(hyper::header::TRANSFER_ENCODING);
            response_headers.insert(
                hyper::header::CONTENT_LENGTH,
                hyper::header::HeaderValue::from_str(&decoded.bytes.len().to_string())?,
            );
            decoded.bytes
        }
        Ok(decoded) => decoded.bytes,
        Err(err) => {
            tracing::debug!("content decode skipped: {err}");
            body_bytes
        }
    };

    let mut builder = Response::builder().status(parts.status);
    for (name, value) in response_headers.iter() {
        builder = builder.header(name, value);
    }
    let response = builder.body(full(final_bytes))?;
    Ok(observer.on_response(&response_ctx, response))
}
