//! Compression and content-type classification (component I).
//!
//! Response bodies are decoded only when both the MIME type is textual and
//! a `Content-Encoding` is present; binary and already-plain bodies pass
//! through untouched.

use crate::error::ContentError;
use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::io::Read;

/// Result of running the decompression pipeline over a response body.
pub struct DecodedBody {
    pub bytes: Bytes,
    /// True if at least one encoding layer was actually removed.
    pub uncompressed: bool,
}

/// Decode `body` according to the comma-separated `Content-Encoding` header
/// value, applied right-to-left (the order encodings were applied in).
/// Returns the original body unchanged, with `uncompressed: false`, if
/// `content_type` isn't textual or `content_encoding` is empty.
pub fn decode_response_body(
    body: Bytes,
    content_type: Option<&str>,
    content_encoding: Option<&str>,
) -> Result<DecodedBody, ContentError> {
    let encoding = content_encoding.unwrap_or("").trim();
    let is_textual = content_type.map(is_text_content_type).unwrap_or(false);

    if !is_textual || encoding.is_empty() {
        return Ok(DecodedBody {
            bytes: body,
            uncompressed: false,
        });
    }

    let mut current = body.clone();
    for layer in encoding.split(',').map(str::trim).rev() {
        current = decode_layer(&current, layer)?;
    }

    Ok(DecodedBody {
        bytes: current,
        uncompressed: true,
    })
}

fn decode_layer(data: &Bytes, encoding: &str) -> Result<Bytes, ContentError> {
    match encoding.to_ascii_lowercase().as_str() {
        "identity" | "" => Ok(data.clone()),
        "gzip" | "x-gzip" => {
            if data.len() < 2 || data[0] != 0x1f || data[1] != 0x8b {
                return Err(ContentError::UnsupportedEncoding(encoding.to_string()));
            }
            let mut decoder = GzDecoder::new(&data[..]);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(ContentError::Gzip)?;
            Ok(Bytes::from(out))
        }
        "deflate" => {
            let mut zlib_out = Vec::new();
            let zlib_result = ZlibDecoder::new(&data[..]).read_to_end(&mut zlib_out);
            if zlib_result.is_ok() {
                return Ok(Bytes::from(zlib_out));
            }

            let mut raw_out = Vec::new();
            DeflateDecoder::new(&data[..])
                .read_to_end(&mut raw_out)
                .map_err(ContentError::Deflate)?;
            Ok(Bytes::from(raw_out))
        }
        other => Err(ContentError::UnsupportedEncoding(other.to_string())),
    }
}

const TEXT_EXACT: &[&str] = &[
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-javascript",
    "application/ecmascript",
    "application/x-www-form-urlencoded",
    "application/xhtml+xml",
    "application/atom+xml",
    "application/rss+xml",
    "application/soap+xml",
    "application/x-yaml",
    "application/yaml",
    "application/graphql",
    "message/rfc822",
];

/// Mirrors spec.md §4.I's `isTextContentType`.
pub fn is_text_content_type(content_type: &str) -> bool {
    let ct = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();

    if ct.starts_with("text/") {
        return true;
    }
    if TEXT_EXACT.contains(&ct.as_str()) {
        return true;
    }
    if ct.ends_with("+json") || ct.ends_with("+xml") || ct.ends_with("+text") {
        return true;
    }

    matches!(
        ct.as_str(),
        "application/x-patch"
            | "application/vnd.api+json"
            | "text/csv"
            | "application/csv"
            | "application/sql"
    )
}

const BINARY_PREFIXES: &[&str] = &["image/", "audio/", "video/", "font/", "model/"];

const BINARY_EXACT: &[&str] = &[
    "application/octet-stream",
    "application/pdf",
    "application/zip",
    "application/x-gzip",
    "application/x-tar",
    "application/x-7z-compressed",
    "application/x-rar-compressed",
    "application/x-msdownload",
];

/// Mirrors spec.md §4.I's `isBinaryContent`: a content-type allowlist first,
/// then a UTF-8-validity + control-character heuristic over a sample.
pub fn is_binary_content(data: &[u8], content_type: Option<&str>) -> bool {
    if let Some(ct) = content_type {
        let ct = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        if BINARY_PREFIXES.iter().any(|p| ct.starts_with(p))
            || BINARY_EXACT.contains(&ct.as_str())
            || ct.starts_with("application/vnd.ms-")
            || ct.starts_with("application/vnd.openxmlformats-")
        {
            return true;
        }
    }

    let sample = &data[..data.len().min(1024)];
    if std::str::from_utf8(sample).is_err() {
        return true;
    }

    if sample.is_empty() {
        return false;
    }

    let control_count = sample
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
        .count();

    (control_count as f64 / sample.len() as f64) > 0.15
}
