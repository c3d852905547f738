//! Error taxonomy shared by every integration
//!
//! Failures coming out of an integration are normalized into one of four causes:
//! request (transport level), response (non-success HTTP status), parse (the body
//! did not match the expected shape) and unknown. Request causes carry a nested
//! reason so that, for example, a refused connection can be told apart from a
//! timed-out one or from an untrusted certificate.

use std::error::Error as StdError;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque error value produced by an integration operation.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Who an error belongs to. Used for attribution only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationIdentity {
    /// Stable integration id
    pub id: String,
    /// Display name
    pub name: String,
    /// Base URL of the remote service
    pub url: String,
}

impl IntegrationIdentity {
    /// Creates a new identity.
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Why a TLS handshake rejected the remote certificate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CertificateReason {
    /// The certificate is past its expiry date.
    Expired,
    /// The certificate does not cover the requested host name.
    HostnameMismatch,
    /// The certificate is not valid yet.
    NotYetValid,
    /// The certificate does not chain to a trusted root (self-signed, unknown issuer).
    Untrusted,
    /// The certificate was rejected for any other reason (bad encoding, bad
    /// signature, revoked, wrong key usage).
    Invalid,
}

/// Why a TCP connection could not be established or was lost.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionReason {
    /// No route to the host.
    HostUnreachable,
    /// The network itself is unreachable.
    NetworkUnreachable,
    /// The remote actively refused the connection.
    Refused,
    /// The connection was reset by the peer.
    Reset,
}

/// Why the host name could not be resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DnsReason {
    /// The name does not exist.
    NotFound,
    /// The resolver did not answer in time.
    Timeout,
    /// The name exists but has no usable address.
    NoAnswer,
}

/// Why a request did not complete in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeoutReason {
    /// The operation was aborted before it completed.
    Aborted,
    /// The operation exceeded its deadline.
    Timeout,
}

/// Transport level failure reason, grouped by failure family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "reason", rename_all = "camelCase")]
pub enum RequestErrorReason {
    /// TLS certificate verification failed.
    Certificate(CertificateReason),
    /// TCP connection failure.
    Connection(ConnectionReason),
    /// Host name resolution failure.
    Dns(DnsReason),
    /// Timeout or abort.
    Timeout(TimeoutReason),
}

impl RequestErrorReason {
    /// Returns true for any certificate verification failure.
    pub fn is_certificate(&self) -> bool {
        matches!(self, RequestErrorReason::Certificate(_))
    }
}

impl fmt::Display for RequestErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RequestErrorReason::Certificate(CertificateReason::Expired) => "certificate expired",
            RequestErrorReason::Certificate(CertificateReason::HostnameMismatch) => {
                "certificate hostname mismatch"
            }
            RequestErrorReason::Certificate(CertificateReason::NotYetValid) => {
                "certificate not yet valid"
            }
            RequestErrorReason::Certificate(CertificateReason::Untrusted) => "certificate untrusted",
            RequestErrorReason::Certificate(CertificateReason::Invalid) => "certificate invalid",
            RequestErrorReason::Connection(ConnectionReason::HostUnreachable) => "host unreachable",
            RequestErrorReason::Connection(ConnectionReason::NetworkUnreachable) => {
                "network unreachable"
            }
            RequestErrorReason::Connection(ConnectionReason::Refused) => "connection refused",
            RequestErrorReason::Connection(ConnectionReason::Reset) => "connection reset",
            RequestErrorReason::Dns(DnsReason::NotFound) => "host not found",
            RequestErrorReason::Dns(DnsReason::Timeout) => "dns lookup timed out",
            RequestErrorReason::Dns(DnsReason::NoAnswer) => "dns returned no answer",
            RequestErrorReason::Timeout(TimeoutReason::Aborted) => "request aborted",
            RequestErrorReason::Timeout(TimeoutReason::Timeout) => "request timed out",
        };
        f.write_str(text)
    }
}

/// The typed cause of an integration failure. Exactly one variant per occurrence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ErrorCause {
    /// Network or transport level failure.
    Request {
        /// Normalized reason
        reason: RequestErrorReason,
        /// Lower-level identifier that was recognized
        code: String,
    },
    /// The remote answered with a non-success status.
    #[serde(rename_all = "camelCase")]
    Response {
        /// HTTP status code
        status_code: u16,
        /// URL that produced the status
        url: String,
    },
    /// The response body did not match the expected shape.
    Parse {
        /// What went wrong while parsing
        details: String,
    },
    /// None of the recognizers matched. The original value is kept as the error source.
    Unknown,
}

impl ErrorCause {
    /// Shorthand for a request cause.
    pub fn request(reason: RequestErrorReason, code: impl Into<String>) -> Self {
        ErrorCause::Request {
            reason,
            code: code.into(),
        }
    }

    /// Shorthand for a response cause.
    pub fn response(status_code: u16, url: impl Into<String>) -> Self {
        ErrorCause::Response {
            status_code,
            url: url.into(),
        }
    }

    /// Shorthand for a parse cause.
    pub fn parse(details: impl Into<String>) -> Self {
        ErrorCause::Parse {
            details: details.into(),
        }
    }

    /// Returns the request reason, if this is a request cause.
    pub fn request_reason(&self) -> Option<RequestErrorReason> {
        match self {
            ErrorCause::Request { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Returns true if this is a TLS certificate verification failure.
    pub fn is_certificate_error(&self) -> bool {
        self.request_reason()
            .map(|reason| reason.is_certificate())
            .unwrap_or(false)
    }

    fn describe(&self, integration: &str) -> String {
        match self {
            ErrorCause::Request { reason, .. } => {
                format!("Request to integration '{}' failed: {}", integration, reason)
            }
            ErrorCause::Response { status_code, .. } => format!(
                "Integration '{}' responded with status {}",
                integration, status_code
            ),
            ErrorCause::Parse { details } => format!(
                "Failed to parse response from integration '{}': {}",
                integration, details
            ),
            ErrorCause::Unknown => format!("Unknown error in integration '{}'", integration),
        }
    }
}

/// A classified failure attributed to one integration.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct IntegrationError {
    identity: IntegrationIdentity,
    cause: ErrorCause,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl IntegrationError {
    /// Creates a new integration error, keeping the original error for diagnostics.
    pub fn new(identity: IntegrationIdentity, cause: ErrorCause, source: Option<BoxError>) -> Self {
        let message = cause.describe(&identity.name);
        Self {
            identity,
            cause,
            message,
            source,
        }
    }

    /// Wraps an unrecognized error as an unknown cause.
    pub fn unknown(identity: IntegrationIdentity, source: BoxError) -> Self {
        Self::new(identity, ErrorCause::Unknown, Some(source))
    }

    /// The integration this error belongs to.
    pub fn identity(&self) -> &IntegrationIdentity {
        &self.identity
    }

    /// The typed cause.
    pub fn cause(&self) -> &ErrorCause {
        &self.cause
    }

    /// Human readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The original error, for logging only.
    pub fn underlying(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Returns true if the cause is a TLS certificate verification failure.
    pub fn is_certificate_error(&self) -> bool {
        self.cause.is_certificate_error()
    }
}

/// A non-success HTTP status observed by an integration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("HTTP {status_code} returned by {url}")]
pub struct ResponseError {
    /// HTTP status code
    pub status_code: u16,
    /// URL that produced the status
    pub url: String,
}

impl ResponseError {
    /// Creates a new response error.
    pub fn new(status_code: u16, url: impl Into<String>) -> Self {
        Self {
            status_code,
            url: url.into(),
        }
    }
}

/// Turns a non-success response into a [`ResponseError`].
pub fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ResponseError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ResponseError::new(status.as_u16(), response.url().as_str()))
    }
}

/// A response body that decoded but did not match the expected schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{details}")]
pub struct ParseError {
    /// What did not match
    pub details: String,
}

impl ParseError {
    /// Creates a new parse error.
    pub fn new(details: impl Into<String>) -> Self {
        Self {
            details: details.into(),
        }
    }
}

/// Decodes a JSON body, reporting malformed or mismatching input as a [`ParseError`].
pub fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ParseError> {
    serde_json::from_slice(bytes).map_err(|e| ParseError::new(e.to_string()))
}
