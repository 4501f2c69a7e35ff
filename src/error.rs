//! Typed error kinds for the CA manager and content classifier.
//!
//! Most of the crate propagates `anyhow::Error` across orchestration
//! boundaries (connection handling, server setup) the way the teacher does,
//! but the CA manager and compression pipeline need callers to match on a
//! specific failure kind, so those two surfaces get their own `thiserror`
//! enums instead.

use thiserror::Error;

/// Errors raised by [`crate::ca::CertificateAuthority`].
#[derive(Debug, Error)]
pub enum CaError {
    #[error("CA I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported private key type, expected RSA")]
    KeyTypeMismatch,

    #[error("certificate public key does not match the supplied private key")]
    Mismatch,

    #[error("certificate generation failed: {0}")]
    Rcgen(#[from] rcgen::Error),

    #[error("invalid hostname for certificate: {0}")]
    InvalidHostname(String),

    #[error("RSA key generation failed: {0}")]
    RsaKeyGen(String),
}

/// Errors raised by [`crate::content`] during response decompression.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("unsupported content encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("gzip decode failed: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("deflate decode failed: {0}")]
    Deflate(#[source] std::io::Error),
}
