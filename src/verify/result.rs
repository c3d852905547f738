//! Connection test results
//!
//! [`TestingResult`] is the serialization-safe outcome of one connection test.
//! It is meant to cross a process boundary as JSON:
//!
//! ```json
//! {"success": false, "error": {"type": "statusCode", "data": {"statusCode": 500, ...}}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::status::StatusReason;
use crate::error::{ErrorCause, IntegrationError, RequestErrorReason};
use crate::transport::Certificate;

/// Transport level failure details exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestErrorData {
    pub reason: RequestErrorReason,
    pub code: String,
}

/// Body validation failure details exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseErrorData {
    pub details: String,
}

/// Why a connection test failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum TestConnectionError {
    /// Nothing more specific is known.
    Unknown,

    /// The service rejected the configured credentials (HTTP 401).
    Unauthorized,

    /// The service answered with a non-success status.
    #[serde(rename_all = "camelCase")]
    StatusCode {
        status_code: u16,
        reason: StatusReason,
        url: String,
    },

    /// The service is reachable but its certificate is not trusted by
    /// default. Trusting `certificate` explicitly would make it work.
    #[serde(rename_all = "camelCase")]
    Certificate {
        certificate: Certificate,
        underlying_request_error: RequestErrorData,
    },

    #[serde(rename_all = "camelCase")]
    Request {
        underlying_request_error: RequestErrorData,
    },

    #[serde(rename_all = "camelCase")]
    Parse {
        underlying_parse_error: ParseErrorData,
    },
}

impl TestConnectionError {
    /// Maps a non-success status. 401 is always unauthorized.
    pub fn from_status(status_code: u16, url: impl Into<String>) -> Self {
        if status_code == 401 {
            return TestConnectionError::Unauthorized;
        }
        TestConnectionError::StatusCode {
            status_code,
            reason: StatusReason::from_status(status_code),
            url: url.into(),
        }
    }

    /// Folds a classified integration error into a result error.
    ///
    /// Certificate-kind request causes map to `Request` here; only the
    /// connection verifier, which holds the discovered certificate, produces
    /// `Certificate`.
    pub fn from_integration_error(error: &IntegrationError) -> Self {
        match error.cause() {
            ErrorCause::Request { reason, code } => TestConnectionError::Request {
                underlying_request_error: RequestErrorData {
                    reason: *reason,
                    code: code.clone(),
                },
            },
            ErrorCause::Response { status_code, url } => Self::from_status(*status_code, url.clone()),
            ErrorCause::Parse { details } => TestConnectionError::Parse {
                underlying_parse_error: ParseErrorData {
                    details: details.clone(),
                },
            },
            ErrorCause::Unknown => TestConnectionError::Unknown,
        }
    }

    /// Serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            TestConnectionError::Unknown => "unknown",
            TestConnectionError::Unauthorized => "unauthorized",
            TestConnectionError::StatusCode { .. } => "statusCode",
            TestConnectionError::Certificate { .. } => "certificate",
            TestConnectionError::Request { .. } => "request",
            TestConnectionError::Parse { .. } => "parse",
        }
    }
}

impl fmt::Display for TestConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestConnectionError::Unknown => write!(f, "unknown error"),
            TestConnectionError::Unauthorized => write!(f, "unauthorized"),
            TestConnectionError::StatusCode {
                status_code,
                reason,
                url,
            } => write!(f, "HTTP {} ({}) from {}", status_code, reason, url),
            TestConnectionError::Certificate { certificate, .. } => write!(
                f,
                "untrusted certificate (sha256 {})",
                certificate.fingerprint()
            ),
            TestConnectionError::Request {
                underlying_request_error,
            } => write!(f, "request failed: {}", underlying_request_error.reason),
            TestConnectionError::Parse {
                underlying_parse_error,
            } => write!(f, "invalid response: {}", underlying_parse_error.details),
        }
    }
}

/// Outcome of one connection test. Never an error itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "TestingResultRepr", from = "TestingResultRepr")]
pub enum TestingResult {
    Success,
    Failure(TestConnectionError),
}

impl TestingResult {
    /// A failed verification.
    pub fn failure(error: TestConnectionError) -> Self {
        TestingResult::Failure(error)
    }

    /// Returns true if the connection works with the default trust store.
    pub fn is_success(&self) -> bool {
        matches!(self, TestingResult::Success)
    }

    /// The failure, if any.
    pub fn error(&self) -> Option<&TestConnectionError> {
        match self {
            TestingResult::Success => None,
            TestingResult::Failure(error) => Some(error),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct TestingResultRepr {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<TestConnectionError>,
}

impl From<TestingResult> for TestingResultRepr {
    fn from(result: TestingResult) -> Self {
        match result {
            TestingResult::Success => Self {
                success: true,
                error: None,
            },
            TestingResult::Failure(error) => Self {
                success: false,
                error: Some(error),
            },
        }
    }
}

impl From<TestingResultRepr> for TestingResult {
    fn from(repr: TestingResultRepr) -> Self {
        if repr.success {
            TestingResult::Success
        } else {
            TestingResult::Failure(repr.error.unwrap_or(TestConnectionError::Unknown))
        }
    }
}
