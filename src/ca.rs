//! Root CA management and on-demand leaf certificate minting (component A).
//!
//! A [`CertificateAuthority`] is created once per process: either a root CA
//! is loaded from the configured paths, or a fresh one is generated and
//! persisted immediately. Leaf certificates for intercepted hosts are then
//! minted lazily and cached for the process lifetime, with SAN expansion,
//! IP-literal SANs, and a custom-CA loading path with mismatch detection.

use crate::error::CaError;
use rcgen::{
    Certificate, CertificateParams, DistinguishedName, DnType, Ia5String, KeyPair, SanType,
    SerialNumber,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A signed leaf certificate plus its private key, ready to build a
/// `rustls::ServerConfig` from.
pub type LeafCert = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

/// Manages the root CA and the cache of per-host leaf certificates.
pub struct CertificateAuthority {
    root_cert: Certificate,
    root_key: KeyPair,
    cache: Arc<RwLock<HashMap<String, LeafCert>>>,
}

impl CertificateAuthority {
    /// Load the root CA from `cert_path`/`key_path`, generating and
    /// persisting a new one if either file is missing.
    pub fn initialize(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self, CaError> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        if let Some(parent) = cert_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let (root_cert, root_key) = if cert_path.exists() && key_path.exists() {
            tracing::info!("Loading existing root CA from {:?}", cert_path);
            Self::load_pair(cert_path, key_path)?
        } else {
            tracing::info!("Generating new root CA");
            let (cert, key) = Self::generate_root_ca()?;
            Self::save_pair(&cert, &key, cert_path, key_path)?;
            tracing::info!("Root CA saved to {:?}", cert_path);
            tracing::warn!("Install the root CA certificate to trust intercepted HTTPS traffic:");
            tracing::warn!("  macOS: sudo security add-trusted-cert -d -r trustRoot -k /Library/Keychains/System.keychain {:?}", cert_path);
            tracing::warn!("  Linux: sudo cp {:?} /usr/local/share/ca-certificates/ && sudo update-ca-certificates", cert_path);
            (cert, key)
        };

        Ok(Self {
            root_cert,
            root_key,
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Load an externally supplied CA, accepting both PKCS#8 (`PRIVATE KEY`)
    /// and PKCS#1 (`RSA PRIVATE KEY`) PEM key blocks, and verifying that the
    /// certificate's public key matches the private key.
    pub fn load_custom_ca(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self, CaError> {
        let (root_cert, root_key) = Self::load_pair(cert_path.as_ref(), key_path.as_ref())?;

        if !Self::public_keys_match(&root_cert, &root_key) {
            return Err(CaError::Mismatch);
        }

        Ok(Self {
            root_cert,
            root_key,
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn load_pair(cert_path: &Path, key_path: &Path) -> Result<(Certificate, KeyPair), CaError> {
        let cert_pem = fs::read_to_string(cert_path)?;
        let key_pem = fs::read_to_string(key_path)?;

        let key_pair = KeyPair::from_pem(&key_pem).map_err(|_| CaError::KeyTypeMismatch)?;
        let rsa_algorithms = [
            &rcgen::PKCS_RSA_SHA256,
            &rcgen::PKCS_RSA_SHA384,
            &rcgen::PKCS_RSA_SHA512,
        ];
        if !rsa_algorithms.contains(&key_pair.algorithm()) {
            // rcgen infers the signature algorithm from the key; a non-RSA
            // key (e.g. ECDSA) parses fine but fails the "RSA only" invariant
            // for a custom root CA.
            return Err(CaError::KeyTypeMismatch);
        }

        let params = CertificateParams::from_ca_cert_pem(&cert_pem).map_err(CaError::Rcgen)?;
        let cert = params.self_signed(&key_pair).map_err(CaError::Rcgen)?;

        Ok((cert, key_pair))
    }

    /// Compare the certificate's subjectPublicKey bit string against the
    /// supplied key pair's public key, byte for byte.
    fn public_keys_match(cert: &Certificate, key_pair: &KeyPair) -> bool {
        let Ok((_, parsed)) = x509_parser::parse_x509_certificate(cert.der()) else {
            return false;
        };
        parsed.public_key().subject_public_key.data.as_ref() == key_pair.public_key_raw()
    }

    fn generate_root_ca() -> Result<(Certificate, KeyPair), CaError> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "ProxyCraft Root CA");
        params.distinguished_name = dn;

        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.key_usages = vec![
            rcgen::KeyUsagePurpose::KeyCertSign,
            rcgen::KeyUsagePurpose::CrlSign,
        ];

        let now = OffsetDateTime::now_utc();
        params.not_before = now.checked_sub(Duration::hours(1)).unwrap_or(now);
        params.not_after = now.checked_add(Duration::days(365 * 10)).unwrap_or(now);
        params.serial_number = Some(random_serial());

        let key_pair = generate_rsa_key_pair()?;
        let cert = params.self_signed(&key_pair)?;
        Ok((cert, key_pair))
    }

    fn save_pair(cert: &Certificate, key_pair: &KeyPair, cert_path: &Path, key_path: &Path) -> Result<(), CaError> {
        fs::write(cert_path, cert.pem())?;
        fs::write(key_path, key_pair.serialize_pem())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(cert_path, fs::Permissions::from_mode(0o644))?;
            fs::set_permissions(key_path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Get or generate (and cache) a leaf certificate for `host`, which may
    /// carry a trailing `:port`.
    pub async fn generate_server_cert(&self, host: &str) -> Result<LeafCert, CaError> {
        let hostname = strip_port(host);

        {
            let cache = self.cache.read().await;
            if let Some(leaf) = cache.get(hostname) {
                tracing::debug!("Using cached certificate for {}", hostname);
                return Ok((leaf.0.clone(), leaf.1.clone_key()));
            }
        }

        tracing::debug!("Generating new leaf certificate for {}", hostname);
        let leaf = self.mint_leaf(hostname)?;

        let mut cache = self.cache.write().await;
        cache
            .entry(hostname.to_string())
            .or_insert_with(|| (leaf.0.clone(), leaf.1.clone_key()));
        let cached = cache.get(hostname).unwrap();
        Ok((cached.0.clone(), cached.1.clone_key()))
    }

    fn mint_leaf(&self, hostname: &str) -> Result<LeafCert, CaError> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, hostname);
        params.distinguished_name = dn;

        params.subject_alt_names = build_subject_alt_names(hostname)?;
        params.key_usages = vec![
            rcgen::KeyUsagePurpose::KeyEncipherment,
            rcgen::KeyUsagePurpose::DigitalSignature,
        ];
        params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];

        let now = OffsetDateTime::now_utc();
        params.not_before = now.checked_sub(Duration::hours(1)).unwrap_or(now);
        params.not_after = now.checked_add(Duration::days(365)).unwrap_or(now);
        params.serial_number = Some(random_serial());

        let key_pair = generate_rsa_key_pair()?;
        let cert = params.signed_by(&key_pair, &self.root_cert, &self.root_key)?;

        let cert_der = CertificateDer::from(cert.der().to_vec());
        let key_der = PrivateKeyDer::try_from(key_pair.serialize_der())
            .map_err(|_| CaError::KeyTypeMismatch)?;

        Ok((vec![cert_der], key_der))
    }

    /// PEM-encode the root CA certificate to `path`. The only
    /// platform-trust-store touchpoint this crate exposes; installing the
    /// result into a system/browser trust store is left to the operator.
    pub fn export_cert(&self, path: impl AsRef<Path>) -> Result<(), CaError> {
        fs::write(path, self.root_cert.pem())?;
        Ok(())
    }

    /// PEM text of the root CA certificate, for embedding in diagnostics or tests.
    pub fn ca_cert_pem(&self) -> String {
        self.root_cert.pem()
    }
}

fn random_serial() -> SerialNumber {
    SerialNumber::from(Uuid::new_v4().as_bytes().to_vec())
}

/// Generate a fresh RSA-2048 key pair and hand it to rcgen via PEM. rcgen's
/// own `KeyPair::generate()` only ever produces ECDSA P-256 keys, so an RSA
/// key has to be built independently and loaded rather than generated
/// in-place.
fn generate_rsa_key_pair() -> Result<KeyPair, CaError> {
    let rsa_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048)
        .map_err(|err| CaError::RsaKeyGen(err.to_string()))?;
    let pem = rsa_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|err| CaError::RsaKeyGen(err.to_string()))?;
    KeyPair::from_pem(&pem).map_err(CaError::Rcgen)
}

/// Strip a trailing `:port` from a `host` or `host:port` string.
fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => h,
        _ => host,
    }
}

/// Build the SAN list for a host per spec.md §4.A:
/// - if the host parses as an IP literal, a single IP SAN;
/// - otherwise: the hostname, `www.<host>` (unless already `www.`-prefixed),
///   `*.<host minus its first label>` when the host has ≥3 labels, and
///   `*.<host>`.
fn build_subject_alt_names(hostname: &str) -> Result<Vec<SanType>, CaError> {
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return Ok(vec![SanType::IpAddress(ip)]);
    }

    let mut names = Vec::new();
    names.push(hostname.to_string());

    if !hostname.starts_with("www.") {
        names.push(format!("www.{hostname}"));
    }

    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.len() >= 3 {
        names.push(format!("*.{}", labels[1..].join(".")));
    }

    names.push(format!("*.{hostname}"));

    names
        .into_iter()
        .map(|n| {
            Ia5String::try_from(n.clone())
                .map(SanType::DnsName)
                .map_err(|_| CaError::InvalidHostname(n))
        })
        .collect()
}
