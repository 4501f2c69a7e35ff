//! Orchestration: owns the CA, transport factory, observer registration
//! slot, and the accept loop, mirroring the teacher's `ProxyServer`.

use crate::ca::CertificateAuthority;
use crate::config::ProxyConfig;
use crate::observer::{NullObserver, ProxyObserver};
use crate::transport::TransportFactory;
use anyhow::{Context, Result};
use hyper::service::service_fn;
use hyper::Uri;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Shared state handed to every per-connection task.
pub struct ProxyState {
    pub(crate) config: ProxyConfig,
    pub(crate) ca: CertificateAuthority,
    pub(crate) transport_factory: TransportFactory,
    observer: RwLock<Arc<dyn ProxyObserver>>,
}

impl ProxyState {
    pub(crate) fn observer(&self) -> Arc<dyn ProxyObserver> {
        self.observer.try_read().map(|g| g.clone()).unwrap_or_else(|_| Arc::new(NullObserver))
    }

    pub(crate) fn notify_error(&self, err: &anyhow::Error, ctx: Option<&crate::types::RequestContext>) {
        self.observer().on_error(err, ctx);
    }

    pub(crate) fn notify_tunnel(&self, host_port: &str, intercepted: bool) {
        self.observer().on_tunnel(host_port, intercepted);
    }
}

/// The proxy server: one process-lifetime instance owning the CA and
/// listener. Create once, optionally register an observer, then `run`.
pub struct ProxyServer {
    state: Arc<ProxyState>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let ca = if let (Some(cert), Some(key)) = (&config.tls.custom_ca_cert, &config.tls.custom_ca_key) {
            CertificateAuthority::load_custom_ca(cert, key).context("loading custom root CA")?
        } else {
            CertificateAuthority::initialize(config.ca_cert_path(), config.ca_key_path())
                .context("initializing root CA")?
        };

        let upstream_proxy = config
            .upstream_proxy
            .as_ref()
            .map(|s| s.parse::<Uri>())
            .transpose()
            .context("parsing upstream proxy URL")?;
        let transport_factory = TransportFactory::new(upstream_proxy);

        let state = Arc::new(ProxyState {
            config,
            ca,
            transport_factory,
            observer: RwLock::new(Arc::new(NullObserver)),
        });

        Ok(Self { state })
    }

    /// Register the single observer sink. Replaces any previously
    /// registered observer; fan-out is the sink's own responsibility.
    pub async fn set_observer(&self, observer: Arc<dyn ProxyObserver>) {
        *self.state.observer.write().await = observer;
    }

    /// PEM text of the root CA certificate clients must trust to see
    /// decrypted HTTPS traffic.
    pub fn ca_cert_pem(&self) -> String {
        self.state.ca.ca_cert_pem()
    }

    /// Bind the configured listen address, returning the listener and the
    /// address actually bound (useful when `listen_port` is `0`).
    pub async fn bind(&self) -> Result<(TcpListener, SocketAddr)> {
        let addr = SocketAddr::new(self.state.config.listen_addr, self.state.config.listen_port);
        let listener = TcpListener::bind(addr).await.context("binding proxy listener")?;
        let bound = listener.local_addr()?;
        Ok((listener, bound))
    }

    pub async fn run(&self) -> Result<()> {
        let (listener, addr) = self.bind().await?;

        tracing::info!("proxy listening on {addr}");
        tracing::info!("set environment variables:");
        tracing::info!("  export HTTP_PROXY=http://{addr}");
        tracing::info!("  export HTTPS_PROXY=http://{addr}");

        self.serve(listener).await
    }

    /// Drive the accept loop over an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            tracing::debug!("accepted connection from {peer_addr}");

            let state = self.state.clone();
            tokio::spawn(async move {
                if let Err(err) = Self::handle_connection(stream, state).await {
                    tracing::error!("connection error: {err:#}");
                }
            });
        }
    }

    async fn handle_connection(stream: tokio::net::TcpStream, state: Arc<ProxyState>) -> Result<()> {
        let io = TokioIo::new(stream);

        let service = service_fn(move |req| {
            let state = state.clone();
            async move { crate::dispatch::handle(req, state).await }
        });

        hyper::server::conn::http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(io, service)
            .with_upgrades()
            .await
            .context("serving connection")?;

        Ok(())
    }
}
