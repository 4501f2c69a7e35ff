//! CONNECT session handler (component E): hijack, tunnel-vs-MITM branch,
//! TLS handshake, ALPN dispatch.

use crate::dispatch::protocol_label;
use crate::server::ProxyState;
use crate::writer::{full, write_connect_established, ResponseBody};
use anyhow::{Context, Result};
use hyper::body::Incoming;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use rustls::ServerConfig;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

pub async fn handle_connect(req: Request<Incoming>, state: Arc<ProxyState>) -> Result<Response<ResponseBody>, Infallible> {
    let host_port = match normalize_authority(&req) {
        Ok(hp) => hp,
        Err(err) => {
            tracing::error!("CONNECT missing authority: {err}");
            return Ok(Response::builder()
                .status(hyper::StatusCode::BAD_REQUEST)
                .body(full("missing CONNECT authority"))
                .unwrap());
        }
    };

    let intercepted = state.config.mitm_enabled;
    state.notify_tunnel(&host_port, intercepted);

    let client_protocol = protocol_label(req.version());
    let upgrade = hyper::upgrade::on(req);
    let state = state.clone();
    tokio::spawn(async move {
        match upgrade.await {
            Ok(upgraded) => {
                let result = if intercepted {
                    mitm_session(upgraded, host_port.clone(), client_protocol, state).await
                } else {
                    passthrough_session(upgraded, host_port.clone(), client_protocol, state).await
                };
                if let Err(err) = result {
                    tracing::error!("CONNECT session for {host_port} ended with an error: {err:#}");
                }
            }
            Err(err) => tracing::error!("CONNECT upgrade failed for {host_port}: {err}"),
        }
    });

    Ok(Response::new(full("")))
}

fn normalize_authority(req: &Request<Incoming>) -> Result<String> {
    let authority = req
        .uri()
        .authority()
        .context("CONNECT request has no authority")?
        .to_string();

    if authority.contains(':') {
        Ok(authority)
    } else {
        Ok(format!("{authority}:443"))
    }
}

/// Non-MITM path: dial the origin (or the configured upstream proxy) and
/// copy bytes bidirectionally, per spec.md §4.E step 2.
async fn passthrough_session(upgraded: Upgraded, host_port: String, client_protocol: &str, state: Arc<ProxyState>) -> Result<()> {
    let mut client = TokioIo::new(upgraded);

    let mut origin = match &state.config.upstream_proxy {
        Some(proxy_url) => dial_through_upstream_proxy(proxy_url, &host_port).await?,
        None => TcpStream::connect(&host_port).await.context("dialing origin")?,
    };

    write_connect_established(&mut client, client_protocol).await?;

    let (mut client_read, mut client_write) = tokio::io::split(&mut client);
    let (mut origin_read, mut origin_write) = origin.split();

    let client_to_origin = tokio::io::copy(&mut client_read, &mut origin_write);
    let origin_to_client = tokio::io::copy(&mut origin_read, &mut client_write);

    tokio::try_join!(client_to_origin, origin_to_client)?;
    Ok(())
}

/// Dial an upstream proxy and perform a nested `CONNECT host:port` through
/// it, verifying `200`, per spec.md §4.E step 2b.
async fn dial_through_upstream_proxy(proxy_url: &str, host_port: &str) -> Result<TcpStream> {
    let proxy_uri: hyper::Uri = proxy_url.parse().context("parsing upstream proxy URL")?;
    let proxy_authority = proxy_uri.authority().context("upstream proxy URL has no authority")?.to_string();

    let mut stream = TcpStream::connect(&proxy_authority).await.context("dialing upstream proxy")?;
    let connect_request = format!("CONNECT {host_port} HTTP/1.1\r\nHost: {host_port}\r\n\r\n");
    stream.write_all(connect_request.as_bytes()).await?;

    let mut buf = [0u8; 512];
    let n = stream.read(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf[..n]);
    if !response.starts_with("HTTP/1.1 200") && !response.starts_with("HTTP/1.0 200") {
        anyhow::bail!("upstream proxy CONNECT to {host_port} failed: {response}");
    }

    Ok(stream)
}

/// MITM path: hijack, TLS handshake with ALPN advertising `h2`/`http/1.1`,
/// then branch into the HTTP/1 or HTTP/2 loop, per spec.md §4.E step 3.
async fn mitm_session(upgraded: Upgraded, host_port: String, client_protocol: &str, state: Arc<ProxyState>) -> Result<()> {
    let mut client = TokioIo::new(upgraded);
    write_connect_established(&mut client, client_protocol).await?;

    let hostname = host_port.rsplit_once(':').map(|(h, _)| h).unwrap_or(&host_port).to_string();
    let (certs, key) = state.ca.generate_server_cert(&hostname).await.context("minting leaf certificate")?;

    let mut tls_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building TLS server config")?;
    tls_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    let acceptor = TlsAcceptor::from(Arc::new(tls_config));
    let tls_stream = match acceptor.accept(client).await {
        Ok(stream) => stream,
        Err(err) => {
            let msg = err.to_string();
            if msg.contains("bad certificate") {
                tracing::error!(
                    "TLS handshake with client failed (bad certificate) for {host_port} \
                     -- is the ProxyCraft root CA installed in the client's trust store?"
                );
            }
            return Err(err).context("TLS handshake with client failed");
        }
    };

    let alpn = tls_stream.get_ref().1.alpn_protocol().map(|p| p.to_vec());

    match alpn.as_deref() {
        Some(b"h2") => crate::mitm_h2::serve(tls_stream, host_port, state).await,
        _ => crate::mitm_h1::serve(tls_stream, host_port, state).await,
    }
}
