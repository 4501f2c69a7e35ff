//! MITM HTTP/1 loop (component F): serves the hijacked, TLS-terminated
//! connection as HTTP/1.1, routing every request through the shared
//! forwarding pipeline with `is_mitm = true`. An SSE response carries a
//! `Connection: close` header (added in `dispatch::forward_request`), so
//! hyper's connection driver returns from `serve_connection` once it's
//! flushed instead of waiting for another request on the same socket.

use crate::dispatch::{compose_mitm_target_url, forward_request, protocol_label};
use crate::server::ProxyState;
use crate::writer::bad_gateway;
use anyhow::{Context, Result};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

pub async fn serve<S>(stream: S, host_port: String, state: Arc<ProxyState>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
        let host_port = host_port.clone();
        let state = state.clone();
        async move {
            let target_url = compose_mitm_target_url(&host_port, req.uri());
            let protocol = protocol_label(req.version());
            let method = req.method().clone();
            let headers = req.headers().clone();
            let (_, body) = req.into_parts();

            match forward_request(method, target_url, headers, body, true, protocol, &state).await {
                Ok(resp) => Ok::<_, std::convert::Infallible>(resp),
                Err(err) => {
                    tracing::error!("MITM forwarding failed for {host_port}: {err:#}");
                    state.notify_error(&err, None);
                    Ok(bad_gateway(err.to_string()))
                }
            }
        }
    });

    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(io, service)
        .await
        .context("serving MITM HTTP/1 connection")?;

    Ok(())
}
