//! Outbound transport factory (component B).
//!
//! Builds a short-lived HTTP(S) client per forwarded request. TLS bounds
//! are pinned to a modern AEAD cipher suite set, HTTP/2 is always enabled,
//! compression is never negotiated at the transport level (critical for
//! SSE: nothing below the dispatcher may buffer the body), and an optional
//! upstream proxy is honored by redirecting the underlying TCP connect.

use anyhow::{Context, Result};
use http_body_util::combinators::UnsyncBoxBody;
use bytes::Bytes;
use hyper::Uri;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tower_service::Service;

pub type BoxBody = UnsyncBoxBody<Bytes, hyper::Error>;
pub type HttpClient = Client<TimeoutConnector<HttpsConnector<ProxyRedirect<HttpConnector>>>, BoxBody>;

/// Dialer connect timeout, per spec.md §4.B / §5 resource limits.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// TLS handshake timeout, per spec.md §4.B / §5 resource limits.
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_MAX_IDLE_PER_HOST: usize = 100;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Produces outbound transports per spec.md §4.B.
pub struct TransportFactory {
    upstream_proxy: Option<Uri>,
}

impl TransportFactory {
    pub fn new(upstream_proxy: Option<Uri>) -> Self {
        Self { upstream_proxy }
    }

    /// Build a transport. When `is_for_mitm` is set the origin's
    /// certificate is never verified: the client already trusts the
    /// locally forged leaf, so pinning the outbound leg to a real CA chain
    /// buys nothing and would only make MITM of self-signed/internal
    /// origins impossible.
    pub fn new_transport(&self, is_for_mitm: bool) -> Result<HttpClient> {
        let tls_config = if is_for_mitm {
            insecure_tls_config()
        } else {
            verified_tls_config()?
        };

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(CONNECT_TIMEOUT));
        let connector = ProxyRedirect {
            inner: http,
            proxy_uri: self.upstream_proxy.clone(),
        };

        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(connector);

        let timed = TimeoutConnector {
            inner: https,
            timeout: CONNECT_TIMEOUT + TLS_HANDSHAKE_TIMEOUT,
        };

        Ok(Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build(timed))
    }
}

fn verified_tls_config() -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().context("loading native root certificates")? {
        roots.add(cert).context("adding native root certificate")?;
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

fn insecure_tls_config() -> ClientConfig {
    let mut config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    config
}

/// Skips origin certificate verification for MITM-forwarded requests.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// Wraps an `HttpConnector`, redirecting every connect to the configured
/// upstream proxy's address when one is set. The request itself still
/// carries the original absolute-form URI, matching classic forward-proxy
/// chaining.
#[derive(Clone)]
pub struct ProxyRedirect<C> {
    inner: C,
    proxy_uri: Option<Uri>,
}

impl<C> Service<Uri> for ProxyRedirect<C>
where
    C: Service<Uri> + Send + 'static,
    C::Future: Send + 'static,
{
    type Response = C::Response;
    type Error = C::Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let target = self.proxy_uri.clone().unwrap_or(uri);
        let fut = self.inner.call(target);
        Box::pin(fut)
    }
}

/// Bounds the combined TCP-connect-plus-TLS-handshake time of the wrapped
/// connector. `HttpConnector::set_connect_timeout` only covers the TCP
/// dial; this covers the handshake that follows it inside `HttpsConnector`.
#[derive(Clone)]
pub struct TimeoutConnector<C> {
    inner: C,
    timeout: Duration,
}

impl<C> Service<Uri> for TimeoutConnector<C>
where
    C: Service<Uri> + Send + 'static,
    C::Future: Send + 'static,
    C::Response: Send + 'static,
    C::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
{
    type Response = C::Response;
    type Error = std::io::Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.into()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let fut = self.inner.call(uri);
        let timeout = self.timeout;
        Box::pin(async move {
            match tokio::time::timeout(timeout, fut).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => Err(std::io::Error::new(std::io::ErrorKind::Other, err.into())),
                Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect + TLS handshake timed out")),
            }
        })
    }
}
