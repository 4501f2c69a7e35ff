//! Body utilities (component J): the only sanctioned way to peek a
//! streaming body without losing its contents.

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;

/// Read `body` fully to `Bytes`, returning an empty body in its place on
/// failure so a caller never forwards a half-consumed stream.
///
/// This mirrors spec.md §4.J's `readAndRestoreBody`: the original reader is
/// always considered consumed after this call: replace whatever holds it
/// with a fresh `Full<Bytes>` built from the returned bytes (or, on error,
/// an empty one).
pub async fn read_and_restore_body(body: Incoming) -> (Bytes, Option<hyper::Error>) {
    match body.collect().await {
        Ok(collected) => (collected.to_bytes(), None),
        Err(err) => (Bytes::new(), Some(err)),
    }
}
