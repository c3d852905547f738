//! HTTP transports handed to integration probes
//!
//! The default transport trusts the bundled roots plus the configured CA
//! bundle. A transport built with explicit anchors pins those certificates:
//! a server presenting exactly one of them is accepted as is, whether it is a
//! self-signed CA or a leaf issued by a private CA. Every other server still
//! goes through regular webpki verification.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{VerifierBuilderError, WebPkiServerVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use thiserror::Error;

use super::certificate::{BuiltInRoots, CaBundleProvider, Certificate};
use crate::error::BoxError;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while building a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A trust anchor could not be loaded into the client.
    #[error("invalid trust anchor {fingerprint}: {source}")]
    InvalidAnchor {
        /// Fingerprint of the rejected certificate
        fingerprint: String,
        /// Underlying error
        #[source]
        source: BoxError,
    },

    /// The certificate verifier could not be built.
    #[error("failed to build certificate verifier: {0}")]
    Verifier(#[from] VerifierBuilderError),

    /// The TLS client could not be configured.
    #[error("TLS configuration failed: {0}")]
    Tls(#[from] rustls::Error),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

impl TransportError {
    fn invalid_anchor(certificate: &Certificate, source: impl Into<BoxError>) -> Self {
        TransportError::InvalidAnchor {
            fingerprint: certificate.fingerprint().to_string(),
            source: source.into(),
        }
    }
}

/// An HTTP client plus the explicit trust anchors it was built with.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    anchors: Vec<Certificate>,
}

impl Transport {
    /// Wraps an already configured client.
    pub fn new(client: reqwest::Client, anchors: Vec<Certificate>) -> Self {
        Self { client, anchors }
    }

    /// The HTTP client to issue requests with.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Certificates trusted explicitly for this transport only.
    pub fn anchors(&self) -> &[Certificate] {
        &self.anchors
    }

    /// Returns true if this transport trusts anything beyond the default bundle.
    pub fn has_explicit_anchors(&self) -> bool {
        !self.anchors.is_empty()
    }
}

/// Builds transports, optionally trusting extra certificates.
pub trait TransportFactory: Send + Sync {
    /// Creates a transport. An empty `anchors` slice means the default bundle only.
    fn create(&self, anchors: &[Certificate]) -> Result<Transport, TransportError>;
}

/// reqwest + rustls transport factory.
pub struct ReqwestTransportFactory {
    bundle: Arc<dyn CaBundleProvider>,
    timeout: Duration,
    user_agent: String,
}

impl Default for ReqwestTransportFactory {
    fn default() -> Self {
        Self::new(Arc::new(BuiltInRoots))
    }
}

impl ReqwestTransportFactory {
    /// Creates a factory trusting the given bundle by default.
    pub fn new(bundle: Arc<dyn CaBundleProvider>) -> Self {
        Self {
            bundle,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: format!("integration-kit/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the user agent header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// The configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl TransportFactory for ReqwestTransportFactory {
    fn create(&self, anchors: &[Certificate]) -> Result<Transport, TransportError> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone());

        if anchors.is_empty() {
            builder = builder.use_rustls_tls();
            for certificate in self.bundle.certificates() {
                let root = reqwest::Certificate::from_pem(certificate.pem().as_bytes())
                    .map_err(|source| TransportError::invalid_anchor(&certificate, source))?;
                builder = builder.add_root_certificate(root);
            }
        } else {
            builder = builder.use_preconfigured_tls(self.pinned_tls_config(anchors)?);
        }

        let client = builder.build().map_err(TransportError::Build)?;
        Ok(Transport::new(client, anchors.to_vec()))
    }
}

impl ReqwestTransportFactory {
    fn pinned_tls_config(&self, anchors: &[Certificate]) -> Result<ClientConfig, TransportError> {
        let verifier = self.pinned_verifier(anchors)?;
        Ok(ClientConfig::builder_with_provider(verifier.crypto_provider())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth())
    }

    fn pinned_verifier(
        &self,
        anchors: &[Certificate],
    ) -> Result<PinnedCertificateVerifier, TransportError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        for certificate in self.bundle.certificates() {
            let der = certificate
                .der()
                .map_err(|source| TransportError::invalid_anchor(&certificate, source))?;
            roots
                .add(CertificateDer::from(der))
                .map_err(|source| TransportError::invalid_anchor(&certificate, source))?;
        }
        let webpki =
            WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone()).build()?;

        let pinned = anchors
            .iter()
            .map(|certificate| {
                certificate
                    .der()
                    .map_err(|source| TransportError::invalid_anchor(certificate, source))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PinnedCertificateVerifier {
            pinned,
            webpki,
            provider,
        })
    }
}

/// Accepts an end-entity certificate equal to a pinned one, otherwise defers
/// to webpki. Handshake signatures are always checked.
#[derive(Debug)]
struct PinnedCertificateVerifier {
    pinned: Vec<Vec<u8>>,
    webpki: Arc<WebPkiServerVerifier>,
    provider: Arc<CryptoProvider>,
}

impl PinnedCertificateVerifier {
    fn crypto_provider(&self) -> Arc<CryptoProvider> {
        self.provider.clone()
    }

    fn is_pinned(&self, end_entity: &CertificateDer<'_>) -> bool {
        self.pinned
            .iter()
            .any(|der| der.as_slice() == end_entity.as_ref())
    }
}

impl ServerCertVerifier for PinnedCertificateVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if self.is_pinned(end_entity) {
            tracing::debug!(server = ?server_name, "server presented a pinned certificate");
            return Ok(ServerCertVerified::assertion());
        }
        self.webpki
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.webpki.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_anchors() {
        let transport = Transport::new(reqwest::Client::new(), vec![]);
        assert!(!transport.has_explicit_anchors());

        let anchor = Certificate::from_der(b"leaf");
        let transport = Transport::new(reqwest::Client::new(), vec![anchor.clone()]);
        assert!(transport.has_explicit_anchors());
        assert_eq!(transport.anchors(), &[anchor]);
    }

    #[test]
    fn test_factory_defaults() {
        let factory = ReqwestTransportFactory::default();
        assert_eq!(factory.timeout(), DEFAULT_REQUEST_TIMEOUT);
        assert!(factory.user_agent.starts_with("integration-kit/"));
    }

    #[test]
    fn test_factory_builder() {
        let factory = ReqwestTransportFactory::default()
            .with_timeout(Duration::from_secs(3))
            .with_user_agent("probe/1.0");
        assert_eq!(factory.timeout(), Duration::from_secs(3));
        assert_eq!(factory.user_agent, "probe/1.0");
    }

    #[test]
    fn test_factory_creates_default_transport() {
        let transport = ReqwestTransportFactory::default().create(&[]).unwrap();
        assert!(!transport.has_explicit_anchors());
    }

    #[test]
    fn test_factory_creates_pinned_transport() {
        let anchor = Certificate::from_der(b"self-signed leaf");
        let transport = ReqwestTransportFactory::default()
            .create(std::slice::from_ref(&anchor))
            .unwrap();
        assert_eq!(transport.anchors(), &[anchor]);
    }

    fn pinned_verifier(pinned: &[u8]) -> PinnedCertificateVerifier {
        ReqwestTransportFactory::default()
            .pinned_verifier(&[Certificate::from_der(pinned)])
            .unwrap()
    }

    #[test]
    fn test_pinned_certificate_is_accepted() {
        let verifier = pinned_verifier(b"self-signed leaf");
        let server_name = ServerName::try_from("nas.local").unwrap();

        let result = verifier.verify_server_cert(
            &CertificateDer::from(b"self-signed leaf".to_vec()),
            &[],
            &server_name,
            &[],
            UnixTime::now(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_other_certificates_are_verified() {
        let verifier = pinned_verifier(b"self-signed leaf");
        let server_name = ServerName::try_from("nas.local").unwrap();

        let result = verifier.verify_server_cert(
            &CertificateDer::from(b"some other certificate".to_vec()),
            &[],
            &server_name,
            &[],
            UnixTime::now(),
        );
        assert!(matches!(result, Err(rustls::Error::InvalidCertificate(_))));
    }

    #[test]
    fn test_invalid_bundle_certificate_is_rejected() {
        let factory = ReqwestTransportFactory::new(Arc::new(crate::transport::PemBundle::new(
            vec![Certificate::from_der(b"not a certificate")],
        )));
        let result = factory.create(&[Certificate::from_der(b"self-signed leaf")]);
        assert!(matches!(result, Err(TransportError::InvalidAnchor { .. })));
    }
}
