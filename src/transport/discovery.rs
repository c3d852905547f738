//! Certificate discovery
//!
//! Opens a raw TLS connection with chain verification disabled and reads the
//! leaf certificate the server presents. The discovery connection is used for
//! nothing else and is shut down before the certificate is returned.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::certificate::Certificate;

/// Default timeout for each discovery step (TCP connect, TLS handshake).
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while discovering a remote certificate.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The URL has no host component.
    #[error("URL {0} has no host")]
    MissingHost(String),

    /// The URL has no explicit port and its scheme has no default one.
    #[error("URL {0} has no known port")]
    MissingPort(String),

    /// The host is not a valid TLS server name.
    #[error("invalid server name {0}")]
    InvalidServerName(String),

    /// The TCP connection could not be opened.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// host:port
        address: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The TLS handshake failed.
    #[error("TLS handshake with {address} failed: {source}")]
    Handshake {
        /// host:port
        address: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// A discovery step took too long.
    #[error("timed out talking to {0}")]
    Timeout(String),

    /// The server completed the handshake without a certificate.
    #[error("{0} presented no certificate")]
    NoCertificate(String),

    /// The TLS client could not be configured.
    #[error("TLS configuration failed: {0}")]
    Config(#[from] rustls::Error),
}

/// Host and port to open the discovery connection to, using the scheme's
/// default port when the URL has none.
pub fn discovery_target(url: &Url) -> Result<(String, u16), DiscoveryError> {
    let host = url
        .host_str()
        .ok_or_else(|| DiscoveryError::MissingHost(url.to_string()))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| DiscoveryError::MissingPort(url.to_string()))?;
    Ok((host, port))
}

/// Reads the leaf certificate of a TLS server.
#[async_trait]
pub trait CertificateFetcher: Send + Sync {
    /// Connects to `host:port` and returns the presented leaf certificate.
    async fn fetch(&self, host: &str, port: u16) -> Result<Certificate, DiscoveryError>;
}

/// tokio-rustls based fetcher.
#[derive(Debug, Clone)]
pub struct TlsCertificateFetcher {
    timeout: Duration,
}

impl Default for TlsCertificateFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_DISCOVERY_TIMEOUT)
    }
}

impl TlsCertificateFetcher {
    /// Creates a fetcher with the given per-step timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The per-step timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl CertificateFetcher for TlsCertificateFetcher {
    async fn fetch(&self, host: &str, port: u16) -> Result<Certificate, DiscoveryError> {
        let address = format!("{}:{}", host, port);
        let server_name = ServerName::try_from(host)
            .map(|name| name.to_owned())
            .map_err(|_| DiscoveryError::InvalidServerName(host.to_string()))?;
        let connector = TlsConnector::from(Arc::new(discovery_config()?));

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| DiscoveryError::Timeout(address.clone()))?
            .map_err(|source| DiscoveryError::Connect {
                address: address.clone(),
                source,
            })?;

        let mut tls = tokio::time::timeout(self.timeout, connector.connect(server_name, stream))
            .await
            .map_err(|_| DiscoveryError::Timeout(address.clone()))?
            .map_err(|source| DiscoveryError::Handshake {
                address: address.clone(),
                source,
            })?;

        let leaf = tls
            .get_ref()
            .1
            .peer_certificates()
            .and_then(|chain| chain.first())
            .map(|der| Certificate::from_der(der.as_ref()));

        if let Err(error) = tls.shutdown().await {
            tracing::debug!(%address, %error, "discovery connection shutdown failed");
        }

        let certificate = leaf.ok_or(DiscoveryError::NoCertificate(address.clone()))?;
        tracing::debug!(
            %address,
            fingerprint = certificate.fingerprint(),
            "discovered server certificate"
        );
        Ok(certificate)
    }
}

fn discovery_config() -> Result<ClientConfig, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = Arc::new(AcceptAnyServerCertificate {
        algorithms: provider.signature_verification_algorithms,
    });

    Ok(ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth())
}

/// Accepts any certificate chain but still checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCertificate {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AcceptAnyServerCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
