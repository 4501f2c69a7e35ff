//! End-to-end proxy tests: a plain-HTTP forward, a non-MITM CONNECT tunnel,
//! and a full MITM TLS round trip against a self-signed test origin.

#[path = "../common/mod.rs"]
mod common;

use bytes::Bytes;
use common::{spawn_echo_origin, spawn_proxy, spawn_sse_origin, test_config, RecordingObserver};
use http_body_util::{BodyExt, Empty};
use hyper::{Request, Uri};
use hyper_util::rt::TokioIo;
use rcgen::{CertificateParams, KeyPair, SanType};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

#[tokio::test]
async fn plain_http_request_is_forwarded_and_observed() {
    let origin_addr = spawn_echo_origin().await;

    let dir = TempDir::new().unwrap();
    let observer = Arc::new(RecordingObserver::default());
    let proxy_addr = spawn_proxy(test_config(dir.path()), observer.clone()).await;

    let stream = TcpStream::connect(proxy_addr).await.unwrap();
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await.unwrap();
    tokio::spawn(conn);

    let uri: Uri = format!("http://{origin_addr}/hello").parse().unwrap();
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .header("Host", origin_addr.to_string())
        .body(Empty::<Bytes>::new())
        .unwrap();

    let resp = sender.send_request(req).await.unwrap();
    assert!(resp.status().is_success());
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), b"GET /hello");

    assert_eq!(observer.requests.lock().unwrap().len(), 1);
    assert_eq!(observer.responses.lock().unwrap().as_slice(), &[200]);
}

#[tokio::test]
async fn connect_tunnel_relays_raw_bytes_without_interception() {
    let origin_addr = spawn_echo_origin().await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.mitm_enabled = false;
    let observer = Arc::new(RecordingObserver::default());
    let proxy_addr = spawn_proxy(config, observer.clone()).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let connect_req = format!("CONNECT {origin_addr} HTTP/1.1\r\nHost: {origin_addr}\r\n\r\n");
    client.write_all(connect_req.as_bytes()).await.unwrap();

    let mut buf = [0u8; 256];
    let n = client.read(&mut buf).await.unwrap();
    let preamble = String::from_utf8_lossy(&buf[..n]);
    assert!(preamble.starts_with("HTTP/1.1 200 Connection Established"));

    let request = format!("GET /tunneled HTTP/1.1\r\nHost: {origin_addr}\r\nConnection: close\r\n\r\n");
    client.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.ends_with("GET /tunneled"));

    // mitm_enabled=false: the tunnel is transparent, so no request/response
    // observer events fire, only the tunnel notification itself.
    assert_eq!(observer.tunnels.lock().unwrap().len(), 1);
    assert!(!observer.tunnels.lock().unwrap()[0].1);
    assert!(observer.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn mitm_https_request_is_decrypted_forwarded_and_reencrypted() {
    let origin_addr = spawn_self_signed_tls_echo_origin().await;

    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let observer = Arc::new(RecordingObserver::default());
    let proxy = proxycraft::ProxyServer::new(config).unwrap();
    proxy.set_observer(observer.clone()).await;
    let proxy = Arc::new(proxy);

    let (listener, proxy_addr) = proxy.bind().await.unwrap();
    let proxy_for_task = proxy.clone();
    tokio::spawn(async move {
        let _ = proxy_for_task.serve(listener).await;
    });

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let target_host_port = origin_addr.to_string();
    let connect_req = format!("CONNECT {target_host_port} HTTP/1.1\r\nHost: {target_host_port}\r\n\r\n");
    client.write_all(connect_req.as_bytes()).await.unwrap();

    let mut preamble_buf = [0u8; 256];
    let n = client.read(&mut preamble_buf).await.unwrap();
    let preamble = String::from_utf8_lossy(&preamble_buf[..n]);
    assert!(preamble.starts_with("HTTP/1.1 200 Connection Established"));

    let mut roots = RootCertStore::empty();
    for pem in rustls_pemfile::certs(&mut proxy.ca_cert_pem().as_bytes()) {
        roots.add(pem.unwrap()).unwrap();
    }
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from("127.0.0.1").unwrap();

    let mut tls = connector.connect(server_name, client).await.unwrap();

    let request = "GET /secure HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n";
    tls.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    tls.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.contains("GET /secure"));

    assert_eq!(observer.requests.lock().unwrap().len(), 1);
    assert_eq!(observer.responses.lock().unwrap().as_slice(), &[200]);
    let tunnels = observer.tunnels.lock().unwrap();
    assert!(tunnels[0].1);
}

#[tokio::test]
async fn sse_response_streams_events_with_flush_before_next_read() {
    let delay = Duration::from_millis(60);
    let origin_addr = spawn_sse_origin(vec!["first".to_string(), "second".to_string(), "third".to_string()], delay).await;

    let dir = TempDir::new().unwrap();
    let observer = Arc::new(RecordingObserver::default());
    let proxy_addr = spawn_proxy(test_config(dir.path()), observer.clone()).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let request = format!("GET /events HTTP/1.1\r\nHost: {origin_addr}\r\nAccept: text/event-stream\r\n\r\n");
    client.write_all(request.as_bytes()).await.unwrap();

    let start = Instant::now();
    let mut received = Vec::new();
    let mut buf = [0u8; 512];
    let mut first_event_elapsed = None;
    loop {
        let n = client.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        received.extend_from_slice(&buf[..n]);
        if first_event_elapsed.is_none() && received.windows(b"data: first".len()).any(|w| w == b"data: first") {
            first_event_elapsed = Some(start.elapsed());
        }
    }

    let body = String::from_utf8_lossy(&received);
    assert!(body.contains("text/event-stream"));
    assert!(body.contains("data: first"));
    assert!(body.contains("data: second"));
    assert!(body.contains("data: third"));

    let first_event_elapsed = first_event_elapsed.expect("first event never arrived at the client");
    // the first event reaches the client well before the origin has even
    // produced the third one, which would not hold if the proxy buffered the
    // whole SSE body before forwarding any of it.
    assert!(first_event_elapsed < delay * 3);

    assert_eq!(observer.sse_events.lock().unwrap().len(), 3);
    assert_eq!(observer.responses.lock().unwrap().as_slice(), &[200]);
}

/// Spawns a TLS echo origin signed by a fresh throwaway self-signed cert for
/// `127.0.0.1`, mirroring what a real HTTPS site would present.
async fn spawn_self_signed_tls_echo_origin() -> std::net::SocketAddr {
    let mut params = CertificateParams::new(vec!["127.0.0.1".to_string()]).unwrap();
    params.subject_alt_names = vec![SanType::IpAddress("127.0.0.1".parse().unwrap())];
    let key_pair = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();

    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::try_from(key_pair.serialize_der()).unwrap();

    let tls_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(stream).await else { return };
                let mut buf = [0u8; 1024];
                let Ok(n) = tls.read(&mut buf).await else { return };
                let request = String::from_utf8_lossy(&buf[..n]);
                let first_line = request.lines().next().unwrap_or("");
                let body = first_line.to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = tls.write_all(response.as_bytes()).await;
                let _ = tls.shutdown().await;
            });
        }
    });

    addr
}
