//! ProxyCraft - an intercepting HTTP/HTTPS proxy
//!
//! ## Usage
//!
//! ```bash
//! proxycraft run
//! # then:
//! export HTTPS_PROXY=http://127.0.0.1:8080
//! export HTTP_PROXY=http://127.0.0.1:8080
//! ```
//!
//! The first run generates a root CA under the configured cert directory;
//! install it into the client's trust store to intercept HTTPS traffic.

mod body;
mod ca;
mod config;
mod connect;
mod content;
mod dispatch;
mod error;
mod mitm_h1;
mod mitm_h2;
mod observer;
mod server;
mod sse;
mod transport;
mod types;
mod writer;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::ProxyConfig;
use server::ProxyServer;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "proxycraft")]
#[command(about = "An intercepting HTTP/HTTPS MITM proxy", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the proxy (default)
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Listen address (overrides config)
        #[arg(long)]
        addr: Option<IpAddr>,
        /// Listen port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Directory holding the root CA and leaf certificate material
        #[arg(long)]
        cert_dir: Option<PathBuf>,
        /// Upstream proxy URL to chain through (overrides config)
        #[arg(long)]
        upstream_proxy: Option<String>,
        /// Disable MITM interception; tunnel CONNECT sessions transparently
        #[arg(long)]
        no_mitm: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async move {
            match cli.command {
                Some(Commands::Run { config, addr, port, cert_dir, upstream_proxy, no_mitm }) => {
                    run(config, addr, port, cert_dir, upstream_proxy, no_mitm).await
                }
                None => run(None, None, None, None, None, false).await,
            }
        })
}

async fn run(
    config_path: Option<PathBuf>,
    addr: Option<IpAddr>,
    port: Option<u16>,
    cert_dir: Option<PathBuf>,
    upstream_proxy: Option<String>,
    no_mitm: bool,
) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let mut config = if let Some(path) = config_path {
        ProxyConfig::from_file(path)?
    } else {
        ProxyConfig::from_env()
    };

    if let Some(a) = addr {
        config.listen_addr = a;
    }
    if let Some(p) = port {
        config.listen_port = p;
    }
    if let Some(dir) = cert_dir {
        config.tls.cert_dir = dir;
    }
    if let Some(proxy) = upstream_proxy {
        config.upstream_proxy = Some(proxy);
    }
    if no_mitm {
        config.mitm_enabled = false;
    }

    let server = ProxyServer::new(config)?;
    server.run().await
}
