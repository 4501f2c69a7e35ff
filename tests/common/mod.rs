//! Shared test helpers: a minimal plain-HTTP/TLS origin, an observer that
//! records every event it's handed, and a config builder rooted in a
//! temporary cert directory.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use proxycraft::observer::BoxBody;
use proxycraft::types::{RequestContext, ResponseContext, SseEvent};
use proxycraft::{ProxyConfig, ProxyObserver, ProxyServer};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub fn test_config(cert_dir: &Path) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listen_addr = "127.0.0.1".parse().unwrap();
    config.listen_port = 0;
    config.tls.cert_dir = cert_dir.to_path_buf();
    config
}

#[allow(dead_code)]
fn full_body(bytes: Bytes) -> BoxBody {
    Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

/// Starts a plain HTTP/1.1 echo origin on loopback: every request is
/// answered with a 200 whose body is `method path`.
pub async fn spawn_echo_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(|req: Request<Incoming>| async move {
                    let body = format!("{} {}", req.method(), req.uri().path());
                    Ok::<_, std::convert::Infallible>(Response::new(full_body(Bytes::from(body))))
                });
                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    });

    addr
}

/// Starts a raw-TCP SSE origin on loopback: writes the event-stream header,
/// then emits one `data: <event>\n\n` frame per entry in `events`, sleeping
/// `delay` before each so a client reading incrementally can observe frames
/// arriving one at a time rather than all at once.
pub async fn spawn_sse_origin(events: Vec<String>, delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { return };
            let events = events.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let Ok(_) = stream.read(&mut buf).await else { return };

                let header = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";
                if stream.write_all(header.as_bytes()).await.is_err() {
                    return;
                }

                for event in events {
                    tokio::time::sleep(delay).await;
                    let frame = format!("data: {event}\n\n");
                    if stream.write_all(frame.as_bytes()).await.is_err() {
                        return;
                    }
                }

                let _ = stream.shutdown().await;
            });
        }
    });

    addr
}

/// Records every observer callback invocation for later assertion.
#[derive(Default)]
pub struct RecordingObserver {
    pub requests: Mutex<Vec<String>>,
    pub responses: Mutex<Vec<u16>>,
    pub tunnels: Mutex<Vec<(String, bool)>>,
    pub errors: Mutex<Vec<String>>,
    pub sse_events: Mutex<Vec<Bytes>>,
}

impl ProxyObserver for RecordingObserver {
    fn on_request(&self, ctx: &RequestContext, req: Request<BoxBody>) -> Request<BoxBody> {
        self.requests.lock().unwrap().push(ctx.target_url.clone());
        req
    }

    fn on_response(&self, ctx: &ResponseContext, resp: Response<BoxBody>) -> Response<BoxBody> {
        self.responses.lock().unwrap().push(ctx.status.as_u16());
        resp
    }

    fn on_error(&self, err: &anyhow::Error, _ctx: Option<&RequestContext>) {
        self.errors.lock().unwrap().push(err.to_string());
    }

    fn on_tunnel(&self, host_port: &str, intercepted: bool) {
        self.tunnels.lock().unwrap().push((host_port.to_string(), intercepted));
    }

    fn on_sse(&self, event: &SseEvent, _ctx: &ResponseContext) {
        self.sse_events.lock().unwrap().push(event.raw.clone());
    }
}

/// Builds a `ProxyServer`, binds it to an ephemeral port, registers
/// `observer`, and spawns the accept loop. Returns the bound address.
pub async fn spawn_proxy(config: ProxyConfig, observer: Arc<dyn ProxyObserver>) -> SocketAddr {
    let server = Arc::new(ProxyServer::new(config).expect("building proxy server"));
    server.set_observer(observer).await;

    let (listener, addr) = server.bind().await.expect("binding proxy listener");
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    addr
}
