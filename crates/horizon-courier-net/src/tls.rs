//! TLS trust configuration for the session.
//!
//! The session trusts the platform's built-in roots by default. Applications
//! talking to servers with private or self-signed CAs add those CAs here,
//! optionally dropping the built-in roots entirely:
//!
//! ```ignore
//! use horizon_courier_net::tls::{Certificate, TlsConfig};
//!
//! let tls = TlsConfig::default()
//!     .with_root(Certificate::from_pem_file("/etc/courier/private-ca.pem")?)
//!     .only_custom_roots();
//! ```

use std::io::{BufReader, Cursor};
use std::path::Path;

use rustls_pki_types::CertificateDer;

use crate::error::{NetworkError, Result};

/// Minimum TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    /// TLS 1.2 (default minimum).
    #[default]
    Tls1_2,
    /// TLS 1.3 only.
    Tls1_3,
}

impl TlsVersion {
    pub(crate) fn to_reqwest_version(self) -> reqwest::tls::Version {
        match self {
            TlsVersion::Tls1_2 => reqwest::tls::Version::TLS_1_2,
            TlsVersion::Tls1_3 => reqwest::tls::Version::TLS_1_3,
        }
    }
}

/// One or more trusted certificates in DER form.
#[derive(Clone)]
pub struct Certificate {
    der_certs: Vec<CertificateDer<'static>>,
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("cert_count", &self.der_certs.len())
            .finish()
    }
}

impl Certificate {
    /// Parse every certificate found in PEM-encoded bytes.
    ///
    /// Fails if the data holds no certificate at all.
    pub fn from_pem(pem_data: impl AsRef<[u8]>) -> Result<Self> {
        let der_certs = parse_pem_certs(pem_data.as_ref())?;
        if der_certs.is_empty() {
            return Err(NetworkError::Tls(
                "no certificates found in PEM data".to_string(),
            ));
        }
        Ok(Self { der_certs })
    }

    /// Read and parse a PEM file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_pem(read_trust_file(path.as_ref())?)
    }

    /// Wrap a single DER-encoded certificate.
    pub fn from_der(der_data: impl Into<Vec<u8>>) -> Self {
        Self {
            der_certs: vec![CertificateDer::from(der_data.into())],
        }
    }

    /// Read a DER-encoded certificate file.
    pub fn from_der_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_der(read_trust_file(path.as_ref())?))
    }

    /// Number of certificates held.
    pub fn len(&self) -> usize {
        self.der_certs.len()
    }

    /// Whether no certificate is held.
    pub fn is_empty(&self) -> bool {
        self.der_certs.is_empty()
    }

    pub(crate) fn to_reqwest_certificates(&self) -> Result<Vec<reqwest::Certificate>> {
        self.der_certs
            .iter()
            .map(|cert| {
                reqwest::Certificate::from_der(cert.as_ref())
                    .map_err(|e| NetworkError::Tls(format!("unusable trust root: {e}")))
            })
            .collect()
    }
}

fn parse_pem_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(Cursor::new(pem));
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| NetworkError::Tls(format!("failed to parse PEM certificate: {e}")))
}

fn read_trust_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        NetworkError::Tls(format!(
            "failed to read trust file '{}': {e}",
            path.display()
        ))
    })
}

/// TLS settings applied when the session's connection pool is created.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Additional trusted root certificates.
    pub root_certificates: Vec<Certificate>,
    /// Trust only `root_certificates`, ignoring the built-in roots.
    pub use_only_custom_roots: bool,
    /// Minimum protocol version.
    pub min_version: TlsVersion,
    /// Skip certificate verification. Testing only.
    pub danger_accept_invalid_certs: bool,
}

impl TlsConfig {
    /// Add a trusted root.
    pub fn with_root(mut self, certificate: Certificate) -> Self {
        self.root_certificates.push(certificate);
        self
    }

    /// Ignore the built-in roots.
    pub fn only_custom_roots(mut self) -> Self {
        self.use_only_custom_roots = true;
        self
    }

    /// Apply these settings to a reqwest client builder.
    pub(crate) fn apply(
        &self,
        mut builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder> {
        for certificate in &self.root_certificates {
            for root in certificate.to_reqwest_certificates()? {
                builder = builder.add_root_certificate(root);
            }
        }
        if self.use_only_custom_roots {
            builder = builder.tls_built_in_root_certs(false);
        }
        builder = builder.min_tls_version(self.min_version.to_reqwest_version());
        if self.danger_accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(builder)
    }
}
