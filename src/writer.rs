//! Response writer adapters (component K).
//!
//! spec.md describes three writer adapters (native HTTP response writer,
//! a manual TLS status-line writer, and an HTTP/2 stream writer) unified
//! behind one `Header()/Write/WriteHeader/Flush` interface. In this crate
//! that interface is `hyper::Response<BoxBody>` returned from a
//! `service_fn`: hyper's HTTP/1 and HTTP/2 connection drivers already
//! compose the status line/headers and flush each body chunk to the
//! socket as soon as it's produced (see `sse.rs`), which is exactly the
//! "flush must reach the client immediately" invariant spec.md §4.K
//! requires. The one place a status line is still composed by hand is the
//! CONNECT-established preamble (`write_connect_established`), because it
//! precedes any HTTP framing on the hijacked socket.

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::{Response, StatusCode};
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub type ResponseBody = UnsyncBoxBody<Bytes, hyper::Error>;

pub fn full<T: Into<Bytes>>(chunk: T) -> ResponseBody {
    Full::new(chunk.into()).map_err(|never| match never {}).boxed_unsync()
}

/// Build a `502 Bad Gateway` response for a failed forward, per spec.md
/// §4.D step 6 / §7's forwarding-error contract.
pub fn bad_gateway(message: impl Into<String>) -> Response<ResponseBody> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .body(full(message.into()))
        .expect("status and body are always valid")
}

/// Write `"<proto> 200 Connection Established\r\n\r\n"` directly onto a
/// hijacked socket, per spec.md §4.E steps 2c/3a. Called before any TLS or
/// HTTP framing exists on the connection, so it can't go through hyper.
pub async fn write_connect_established<W: AsyncWrite + Unpin>(writer: &mut W, http_version_label: &str) -> std::io::Result<()> {
    let line = format!("{http_version_label} 200 Connection Established\r\n\r\n");
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
