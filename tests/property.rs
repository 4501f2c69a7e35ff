//! Property-based tests over the content-decoding and certificate-minting
//! paths, where hand-picked examples are easy to miss edge cases for.

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use proptest::prelude::*;
use proxycraft::ca::CertificateAuthority;
use proxycraft::content::{decode_response_body, is_binary_content, is_text_content_type};
use std::io::Write;
use tempfile::TempDir;

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

proptest! {
    #[test]
    fn gzip_round_trips_through_decode_response_body(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let compressed = gzip(&data);
        let decoded = decode_response_body(Bytes::from(compressed), Some("application/json"), Some("gzip")).unwrap();
        prop_assert_eq!(decoded.bytes.as_ref(), data.as_slice());
        prop_assert!(decoded.uncompressed);
    }

    #[test]
    fn non_textual_content_types_are_never_decoded(
        data in proptest::collection::vec(any::<u8>(), 0..256),
        ct in prop::sample::select(vec!["image/png", "application/octet-stream", "video/mp4", "font/woff2"]),
    ) {
        let compressed = gzip(&data);
        let decoded = decode_response_body(Bytes::from(compressed.clone()), Some(ct), Some("gzip")).unwrap();
        prop_assert!(!decoded.uncompressed);
        prop_assert_eq!(decoded.bytes.as_ref(), compressed.as_slice());
    }

    #[test]
    fn is_text_content_type_never_panics(ct in "[a-zA-Z0-9/+.;=_-]{0,64}") {
        let _ = is_text_content_type(&ct);
    }

    #[test]
    fn is_binary_content_never_panics(data in proptest::collection::vec(any::<u8>(), 0..512), ct in "[a-zA-Z0-9/+.;=_-]{0,64}") {
        let _ = is_binary_content(&data, Some(&ct));
    }

    #[test]
    fn leaf_certs_are_minted_for_arbitrary_valid_hostnames(
        label in "[a-z]{1,10}",
        suffix in prop::sample::select(vec!["com", "org", "internal", "test"]),
    ) {
        let hostname = format!("{label}.example.{suffix}");
        let dir = TempDir::new().unwrap();
        let ca = CertificateAuthority::initialize(
            dir.path().join("ca.pem"),
            dir.path().join("ca-key.pem"),
        ).unwrap();

        let rt = tokio::runtime::Runtime::new().unwrap();
        let (chain, _key) = rt.block_on(ca.generate_server_cert(&hostname)).unwrap();
        prop_assert_eq!(chain.len(), 1);
    }
}
