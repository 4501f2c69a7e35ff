//! Configuration for the proxy server: listen address, TLS/CA settings,
//! MITM toggle, and optional upstream proxy, loadable from a TOML file or
//! environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: IpAddr,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default)]
    pub tls: TlsConfig,

    /// When `false`, CONNECT sessions are transparently tunneled instead of
    /// intercepted (spec.md §4.E step 2).
    #[serde(default = "default_true")]
    pub mitm_enabled: bool,

    /// `http://host:port` of an upstream proxy to dial through, for both
    /// plain requests and CONNECT tunnels.
    #[serde(default)]
    pub upstream_proxy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default = "default_cert_dir")]
    pub cert_dir: PathBuf,

    /// Path to an externally supplied CA certificate; when set together
    /// with `custom_ca_key`, loaded instead of the generated root CA.
    #[serde(default)]
    pub custom_ca_cert: Option<PathBuf>,

    #[serde(default)]
    pub custom_ca_key: Option<PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
            tls: TlsConfig::default(),
            mitm_enabled: true,
            upstream_proxy: None,
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_dir: default_cert_dir(),
            custom_ca_cert: None,
            custom_ca_key: None,
        }
    }
}

impl ProxyConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .context("Failed to read configuration file")?;
        let config: ProxyConfig =
            toml::from_str(&contents).context("Failed to parse configuration file")?;
        Ok(config)
    }

    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("PROXYCRAFT_ADDR") {
            if let Ok(ip) = addr.parse() {
                config.listen_addr = ip;
            }
        }

        if let Ok(port) = std::env::var("PROXYCRAFT_PORT") {
            if let Ok(p) = port.parse() {
                config.listen_port = p;
            }
        }

        if let Ok(dir) = std::env::var("PROXYCRAFT_CERT_DIR") {
            config.tls.cert_dir = PathBuf::from(dir);
        }

        if let Ok(upstream) = std::env::var("PROXYCRAFT_UPSTREAM_PROXY") {
            config.upstream_proxy = Some(upstream);
        }

        if let Ok(mitm) = std::env::var("PROXYCRAFT_MITM") {
            if let Ok(enabled) = mitm.parse() {
                config.mitm_enabled = enabled;
            }
        }

        config
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path.as_ref(), contents).context("Failed to write configuration file")?;
        Ok(())
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.tls.cert_dir.join("proxycraft-ca.pem")
    }

    pub fn ca_key_path(&self) -> PathBuf {
        self.tls.cert_dir.join("proxycraft-ca-key.pem")
    }
}

fn default_listen_addr() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_cert_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".proxycraft")
        .join("certs")
}

fn default_true() -> bool {
    true
}
