//! Server-Sent Events streaming path (component H).
//!
//! Detection is a single rule: a response `Content-Type` containing
//! `text/event-stream`. Once detected, the body is never buffered or
//! decompressed; it's read line-by-line and each line is forwarded to the
//! client as an individual body frame so the writer can flush it
//! immediately (spec.md §4.H / §4.K's flush invariant). Lines accumulate
//! into the current event until a blank line terminates it, at which
//! point the observer is notified once per event.

use crate::observer::ProxyObserver;
use crate::types::{ResponseContext, SseEvent};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::HeaderMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

pub type ResponseBody = UnsyncBoxBody<Bytes, hyper::Error>;

/// True when `content_type` names the SSE media type, per spec.md §4.H
/// detection rule 1.
pub fn is_sse_content_type(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.to_ascii_lowercase().contains("text/event-stream"))
        .unwrap_or(false)
}

/// Headers to add (without clobbering any already present) for an SSE
/// response, per spec.md §4.H.
pub fn ensure_sse_headers(headers: &mut HeaderMap) {
    headers
        .entry(hyper::header::CONTENT_TYPE)
        .or_insert(hyper::header::HeaderValue::from_static("text/event-stream"));
    headers
        .entry(hyper::header::CACHE_CONTROL)
        .or_insert(hyper::header::HeaderValue::from_static("no-cache"));
    headers
        .entry(hyper::header::CONNECTION)
        .or_insert(hyper::header::HeaderValue::from_static("keep-alive"));
}

/// Turn an origin's SSE body into a client-facing body: each `\n`-delimited
/// line is forwarded as its own frame, and each complete event (lines up to
/// a blank line) is handed to the observer via `on_sse`.
pub fn stream_sse_response(body: Incoming, ctx: ResponseContext, observer: Arc<dyn ProxyObserver>) -> ResponseBody {
    let (tx, rx) = mpsc::channel::<Result<Frame<Bytes>, hyper::Error>>(32);

    tokio::spawn(async move {
        let byte_stream = http_body_util::BodyStream::new(body).filter_map(|result| async move {
            match result {
                Ok(frame) => frame.into_data().ok().map(Ok::<_, std::io::Error>),
                Err(err) => Some(Err(std::io::Error::new(std::io::ErrorKind::Other, err))),
            }
        });

        let reader = StreamReader::new(byte_stream);
        let mut buf_reader = BufReader::new(reader);
        let mut event_buf = BytesMut::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            let read = buf_reader.read_until(b'\n', &mut line).await;
            let n = match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };
            let chunk = Bytes::copy_from_slice(&line[..n]);

            if tx.send(Ok(Frame::data(chunk.clone()))).await.is_err() {
                break;
            }

            event_buf.extend_from_slice(&chunk);

            let is_blank_line = chunk.as_ref() == b"\n" || chunk.as_ref() == b"\r\n";
            if is_blank_line && !event_buf.is_empty() {
                let raw = event_buf.split().freeze();
                observer.on_sse(&SseEvent { raw }, &ctx);
            }
        }

        if !event_buf.is_empty() {
            let raw = event_buf.split().freeze();
            observer.on_sse(&SseEvent { raw }, &ctx);
        }
    });

    StreamBody::new(ReceiverStream::new(rx)).boxed_unsync()
}
