//! Certificates and trust anchor sources

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";
const PEM_LINE_WIDTH: usize = 64;

/// Errors raised while reading PEM encoded certificates.
#[derive(Debug, Error)]
pub enum PemError {
    /// No certificate block was found.
    #[error("no PEM certificate found")]
    NoCertificate,

    /// A certificate block was opened but never closed.
    #[error("unterminated PEM certificate block")]
    Unterminated,

    /// The certificate body is not valid base64.
    #[error("invalid certificate encoding: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    /// The bundle file could not be read.
    #[error("failed to read certificate bundle {path}: {source}")]
    Io {
        /// Bundle path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// An X.509 certificate as presented by a remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pem: String,
    fingerprint: String,
}

impl Certificate {
    /// Builds a certificate from its DER encoding.
    pub fn from_der(der: &[u8]) -> Self {
        Self {
            pem: encode_pem(der),
            fingerprint: hex::encode(Sha256::digest(der)),
        }
    }

    /// Parses the first certificate of a PEM document.
    pub fn from_pem(pem: &str) -> Result<Self, PemError> {
        Self::parse_bundle(pem)?
            .into_iter()
            .next()
            .ok_or(PemError::NoCertificate)
    }

    /// Parses every certificate block of a PEM document.
    pub fn parse_bundle(pem: &str) -> Result<Vec<Self>, PemError> {
        let mut certificates = Vec::new();
        let mut body: Option<String> = None;

        for line in pem.lines().map(str::trim) {
            if line == PEM_BEGIN {
                body = Some(String::new());
            } else if line == PEM_END {
                let encoded = body.take().ok_or(PemError::NoCertificate)?;
                let der = STANDARD.decode(encoded)?;
                certificates.push(Self::from_der(&der));
            } else if let Some(body) = body.as_mut() {
                body.push_str(line);
            }
        }

        if body.is_some() {
            return Err(PemError::Unterminated);
        }
        if certificates.is_empty() {
            return Err(PemError::NoCertificate);
        }
        Ok(certificates)
    }

    /// PEM encoding.
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// Lowercase hex SHA-256 of the DER encoding.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// DER encoding, decoded from the PEM body.
    pub fn der(&self) -> Result<Vec<u8>, PemError> {
        let body: String = self
            .pem
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && *line != PEM_BEGIN && *line != PEM_END)
            .collect();
        Ok(STANDARD.decode(body)?)
    }
}

fn encode_pem(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = String::with_capacity(encoded.len() + 64);
    pem.push_str(PEM_BEGIN);
    pem.push('\n');
    for chunk in encoded.as_bytes().chunks(PEM_LINE_WIDTH) {
        // base64 output is ASCII
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str(PEM_END);
    pem.push('\n');
    pem
}

/// Supplies the default trust anchors used when no explicit anchor is given.
pub trait CaBundleProvider: Send + Sync {
    /// Certificates to trust in addition to the client's built-in roots.
    fn certificates(&self) -> Vec<Certificate>;
}

/// Only the roots bundled with the HTTP client.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltInRoots;

impl CaBundleProvider for BuiltInRoots {
    fn certificates(&self) -> Vec<Certificate> {
        Vec::new()
    }
}

/// Extra roots read from a PEM bundle file.
#[derive(Debug, Clone, Default)]
pub struct PemBundle {
    certificates: Vec<Certificate>,
}

impl PemBundle {
    /// Creates a bundle from already parsed certificates.
    pub fn new(certificates: Vec<Certificate>) -> Self {
        Self { certificates }
    }

    /// Loads every certificate from a PEM file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PemError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| PemError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let certificates = Certificate::parse_bundle(&contents)?;
        tracing::debug!(
            path = %path.display(),
            count = certificates.len(),
            "loaded CA bundle"
        );
        Ok(Self { certificates })
    }

    /// Number of certificates in the bundle.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Returns true if the bundle holds no certificates.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

impl CaBundleProvider for PemBundle {
    fn certificates(&self) -> Vec<Certificate> {
        self.certificates.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn test_from_der_fingerprint_and_pem() {
        let cert = Certificate::from_der(b"abc");
        assert_eq!(cert.fingerprint(), ABC_SHA256);
        assert_eq!(
            cert.pem(),
            "-----BEGIN CERTIFICATE-----\nYWJj\n-----END CERTIFICATE-----\n"
        );
    }

    #[test]
    fn test_der_round_trip() {
        let der = vec![3u8; 200];
        let cert = Certificate::from_der(&der);
        assert_eq!(cert.der().unwrap(), der);
    }

    #[test]
    fn test_pem_lines_are_wrapped() {
        let cert = Certificate::from_der(&[7u8; 100]);
        for line in cert.pem().lines() {
            assert!(line.len() <= 64);
        }
    }

    #[test]
    fn test_from_pem_matches_der() {
        let der = vec![42u8; 300];
        let original = Certificate::from_der(&der);
        let parsed = Certificate::from_pem(original.pem()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_parse_bundle_multiple() {
        let bundle = format!(
            "{}\nsome comment\n{}",
            Certificate::from_der(b"one").pem(),
            Certificate::from_der(b"two").pem()
        );
        let certs = Certificate::parse_bundle(&bundle).unwrap();
        assert_eq!(certs.len(), 2);
        assert_eq!(certs[1], Certificate::from_der(b"two"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Certificate::from_pem("nothing here"),
            Err(PemError::NoCertificate)
        ));
        assert!(matches!(
            Certificate::from_pem("-----BEGIN CERTIFICATE-----\nYWJj\n"),
            Err(PemError::Unterminated)
        ));
        assert!(matches!(
            Certificate::from_pem(
                "-----BEGIN CERTIFICATE-----\n!!!\n-----END CERTIFICATE-----\n"
            ),
            Err(PemError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_certificate_serialize() {
        let cert = Certificate::from_der(b"abc");
        let json = serde_json::to_value(&cert).unwrap();
        assert_eq!(json["fingerprint"], ABC_SHA256);
        assert!(json["pem"].as_str().unwrap().starts_with(PEM_BEGIN));
    }

    #[test]
    fn test_built_in_roots_add_nothing() {
        assert!(BuiltInRoots.certificates().is_empty());
    }

    #[test]
    fn test_pem_bundle_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{}{}",
            Certificate::from_der(b"root-a").pem(),
            Certificate::from_der(b"root-b").pem()
        )
        .unwrap();

        let bundle = PemBundle::load(file.path()).unwrap();
        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.certificates().len(), 2);
    }

    #[test]
    fn test_pem_bundle_missing_file() {
        let result = PemBundle::load("/nonexistent/bundle.pem");
        assert!(matches!(result, Err(PemError::Io { .. })));
    }
}
