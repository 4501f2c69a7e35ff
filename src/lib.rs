//! ProxyCraft library components: an intercepting HTTP/HTTPS proxy core
//! usable as a library (register an observer, drive the accept loop
//! yourself) or through the bundled CLI in `main.rs`.

pub mod body;
pub mod ca;
pub mod config;
pub mod connect;
pub mod content;
pub mod dispatch;
pub mod error;
pub mod mitm_h1;
pub mod mitm_h2;
pub mod observer;
pub mod server;
pub mod sse;
pub mod transport;
pub mod types;
pub mod writer;

pub use ca::CertificateAuthority;
pub use config::ProxyConfig;
pub use observer::{NullObserver, ProxyObserver};
pub use server::ProxyServer;
pub use types::{RequestContext, ResponseContext, SseEvent};
