//! Common utilities for benchmarks

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use tempfile::TempDir;

/// Create a temporary cert directory for a benchmark-scoped `CertificateAuthority`.
pub fn create_bench_cert_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp dir")
}

/// Gzip-compress `data`, for feeding `content::decode_response_body` benchmarks.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

/// A JSON-ish payload of roughly `size` bytes, repeating a small record.
pub fn json_payload(size: usize) -> Vec<u8> {
    let record = br#"{"id":1,"name":"example","value":3.14,"tags":["a","b","c"]},"#;
    record.iter().cycle().take(size).copied().collect()
}
