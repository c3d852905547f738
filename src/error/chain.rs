//! Error classifier chain
//!
//! Different HTTP client libraries report the same failure in structurally
//! different ways. The chain holds an ordered list of recognizers, each one
//! specialized to a single error shape, and asks them in order until one
//! produces an [`ErrorCause`].

use std::error::Error as StdError;
use std::fmt;
use std::io;

use regex::Regex;

use super::classification::{
    BoxError, CertificateReason, ConnectionReason, DnsReason, ErrorCause, IntegrationError,
    IntegrationIdentity, ParseError, RequestErrorReason, ResponseError, TimeoutReason,
};

/// Upper bound on how deep a source chain is followed.
const MAX_CHAIN_DEPTH: usize = 32;

/// Iterator over an error and its sources.
///
/// `std::io::Error` does not report a wrapped custom error through `source()`,
/// so the wrapped value is reached through `get_ref()` instead.
pub struct ErrorChain<'a> {
    next: Option<&'a (dyn StdError + 'static)>,
    depth: usize,
}

impl<'a> Iterator for ErrorChain<'a> {
    type Item = &'a (dyn StdError + 'static);

    fn next(&mut self) -> Option<Self::Item> {
        if self.depth >= MAX_CHAIN_DEPTH {
            return None;
        }
        let current = self.next.take()?;
        self.depth += 1;
        self.next = match current.downcast_ref::<io::Error>() {
            Some(io_error) => io_error
                .get_ref()
                .map(|inner| inner as &(dyn StdError + 'static)),
            None => current.source(),
        };
        Some(current)
    }
}

/// Walks `error` and everything it wraps, outermost first.
pub fn error_chain<'a>(error: &'a (dyn StdError + 'static)) -> ErrorChain<'a> {
    ErrorChain {
        next: Some(error),
        depth: 0,
    }
}

/// Finds the first error of type `E` anywhere in the chain.
pub fn find_in_chain<'a, E: StdError + 'static>(
    error: &'a (dyn StdError + 'static),
) -> Option<&'a E> {
    error_chain(error).find_map(|e| e.downcast_ref::<E>())
}

type Recognizer = dyn Fn(&(dyn StdError + 'static)) -> Option<ErrorCause> + Send + Sync;

/// A named, pure recognizer for one error shape.
pub struct ErrorHandler {
    name: &'static str,
    recognize: Box<Recognizer>,
}

impl ErrorHandler {
    /// Creates a handler from a matcher function.
    pub fn new<F>(name: &'static str, recognize: F) -> Self
    where
        F: Fn(&(dyn StdError + 'static)) -> Option<ErrorCause> + Send + Sync + 'static,
    {
        Self {
            name,
            recognize: Box::new(recognize),
        }
    }

    /// Handler name, used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns a cause if this handler understands the error.
    pub fn recognize(&self, error: &(dyn StdError + 'static)) -> Option<ErrorCause> {
        (self.recognize)(error)
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Ordered list of recognizers. The first one that returns a cause wins.
#[derive(Debug)]
pub struct ClassifierChain {
    handlers: Vec<ErrorHandler>,
}

impl Default for ClassifierChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassifierChain {
    /// Creates a chain with the default handlers for the HTTP stack in use.
    pub fn new() -> Self {
        Self {
            handlers: default_handlers(),
        }
    }

    /// Creates a chain with a caller-supplied handler order.
    pub fn with_handlers(handlers: Vec<ErrorHandler>) -> Self {
        Self { handlers }
    }

    /// Appends a handler after the existing ones.
    pub fn add_handler(&mut self, handler: ErrorHandler) {
        self.handlers.push(handler);
    }

    /// The configured handlers, in evaluation order.
    pub fn handlers(&self) -> &[ErrorHandler] {
        &self.handlers
    }

    /// Runs the handlers in order and returns the first cause produced.
    pub fn recognize(&self, error: &(dyn StdError + 'static)) -> Option<ErrorCause> {
        self.handlers.iter().find_map(|handler| {
            let cause = handler.recognize(error)?;
            tracing::trace!(handler = handler.name(), ?cause, "error recognized");
            Some(cause)
        })
    }

    /// Classifies an error for the given integration.
    ///
    /// An error that already is an [`IntegrationError`] is returned unchanged.
    /// When no handler recognizes the error it is handed back in `Err` so the
    /// caller can decide on a fallback.
    pub fn classify(
        &self,
        error: BoxError,
        identity: &IntegrationIdentity,
    ) -> Result<IntegrationError, BoxError> {
        let error = match error.downcast::<IntegrationError>() {
            Ok(existing) => return Ok(*existing),
            Err(error) => error,
        };

        let cause = {
            let view: &(dyn StdError + 'static) = &*error;
            self.recognize(view)
        };

        match cause {
            Some(cause) => Ok(IntegrationError::new(identity.clone(), cause, Some(error))),
            None => Err(error),
        }
    }

    /// Classifies an error, falling back to an unknown cause.
    pub fn classify_or_unknown(
        &self,
        error: BoxError,
        identity: &IntegrationIdentity,
    ) -> IntegrationError {
        self.classify(error, identity).unwrap_or_else(|error| {
            tracing::debug!(
                integration = %identity.name,
                error = %error,
                "no handler recognized error, treating as unknown"
            );
            IntegrationError::unknown(identity.clone(), error)
        })
    }
}

/// Default handler order: status, parse, TLS, io, reqwest, message text.
pub fn default_handlers() -> Vec<ErrorHandler> {
    let patterns = MessagePatterns::new();
    vec![
        ErrorHandler::new("response", recognize_response),
        ErrorHandler::new("parse", recognize_parse),
        ErrorHandler::new("tls", recognize_tls),
        ErrorHandler::new("io", recognize_io),
        ErrorHandler::new("reqwest", recognize_reqwest),
        ErrorHandler::new("message_patterns", move |error| patterns.recognize(error)),
    ]
}

/// Non-success HTTP statuses, either ours or reqwest's `error_for_status`.
pub fn recognize_response(error: &(dyn StdError + 'static)) -> Option<ErrorCause> {
    error_chain(error).find_map(|e| {
        if let Some(response) = e.downcast_ref::<ResponseError>() {
            return Some(ErrorCause::response(
                response.status_code,
                response.url.clone(),
            ));
        }
        let reqwest_error = e.downcast_ref::<reqwest::Error>()?;
        let status = reqwest_error.status()?;
        let url = reqwest_error
            .url()
            .map(|url| url.to_string())
            .unwrap_or_default();
        Some(ErrorCause::response(status.as_u16(), url))
    })
}

/// Malformed JSON or schema mismatches.
pub fn recognize_parse(error: &(dyn StdError + 'static)) -> Option<ErrorCause> {
    error_chain(error).find_map(|e| {
        if let Some(parse) = e.downcast_ref::<ParseError>() {
            return Some(ErrorCause::parse(parse.details.clone()));
        }
        if let Some(json) = e.downcast_ref::<serde_json::Error>() {
            return Some(ErrorCause::parse(json.to_string()));
        }
        match e.downcast_ref::<reqwest::Error>() {
            Some(reqwest_error) if reqwest_error.is_decode() => {
                Some(ErrorCause::parse(reqwest_error.to_string()))
            }
            _ => None,
        }
    })
}

/// Certificate verification failures reported by rustls.
pub fn recognize_tls(error: &(dyn StdError + 'static)) -> Option<ErrorCause> {
    let rustls::Error::InvalidCertificate(certificate_error) =
        find_in_chain::<rustls::Error>(error)?
    else {
        return None;
    };

    use rustls::CertificateError;
    let reason = match certificate_error {
        CertificateError::Expired | CertificateError::ExpiredContext { .. } => {
            CertificateReason::Expired
        }
        CertificateError::NotValidYet | CertificateError::NotValidYetContext { .. } => {
            CertificateReason::NotYetValid
        }
        CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. } => {
            CertificateReason::HostnameMismatch
        }
        CertificateError::UnknownIssuer => CertificateReason::Untrusted,
        CertificateError::Other(other) => other_certificate_reason(other),
        _ => CertificateReason::Invalid,
    };

    Some(ErrorCause::request(
        RequestErrorReason::Certificate(reason),
        variant_name(certificate_error),
    ))
}

/// webpki rejections meaning the chain does not lead to a trust anchor.
/// rustls forwards these as `CertificateError::Other`, displayed by name.
const UNTRUSTED_CHAIN_ERRORS: &[&str] = &[
    "CaUsedAsEndEntity",
    "UnknownIssuer",
    "MaximumPathDepthExceeded",
    "MaximumPathBuildCallsExceeded",
];

fn other_certificate_reason(error: &rustls::OtherError) -> CertificateReason {
    let name = error.to_string();
    if UNTRUSTED_CHAIN_ERRORS
        .iter()
        .any(|untrusted| name.starts_with(untrusted))
    {
        CertificateReason::Untrusted
    } else {
        CertificateReason::Invalid
    }
}

/// Socket level failures by `std::io::ErrorKind`.
pub fn recognize_io(error: &(dyn StdError + 'static)) -> Option<ErrorCause> {
    error_chain(error).find_map(|e| {
        let kind = e.downcast_ref::<io::Error>()?.kind();
        let reason = match kind {
            io::ErrorKind::ConnectionRefused => {
                RequestErrorReason::Connection(ConnectionReason::Refused)
            }
            io::ErrorKind::ConnectionReset => RequestErrorReason::Connection(ConnectionReason::Reset),
            io::ErrorKind::HostUnreachable => {
                RequestErrorReason::Connection(ConnectionReason::HostUnreachable)
            }
            io::ErrorKind::NetworkUnreachable => {
                RequestErrorReason::Connection(ConnectionReason::NetworkUnreachable)
            }
            io::ErrorKind::ConnectionAborted => RequestErrorReason::Timeout(TimeoutReason::Aborted),
            io::ErrorKind::TimedOut => RequestErrorReason::Timeout(TimeoutReason::Timeout),
            _ => return None,
        };
        Some(ErrorCause::request(reason, format!("{:?}", kind)))
    })
}

/// reqwest's own timeout, which carries no io error.
pub fn recognize_reqwest(error: &(dyn StdError + 'static)) -> Option<ErrorCause> {
    error_chain(error).find_map(|e| {
        let reqwest_error = e.downcast_ref::<reqwest::Error>()?;
        if reqwest_error.is_timeout() {
            Some(ErrorCause::request(
                RequestErrorReason::Timeout(TimeoutReason::Timeout),
                "Timeout",
            ))
        } else {
            None
        }
    })
}

/// Debug name of an enum variant without its fields.
fn variant_name<T: fmt::Debug>(value: &T) -> String {
    let debug = format!("{:?}", value);
    debug
        .split(|c: char| c == '(' || c == '{' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_string()
}

/// A text pattern mapped to a request reason.
#[derive(Debug)]
pub struct MessagePattern {
    regex: Regex,
    reason: RequestErrorReason,
}

impl MessagePattern {
    /// Creates a new pattern.
    ///
    /// # Panics
    /// Panics if the regex pattern is invalid.
    pub fn new(pattern: &str, reason: RequestErrorReason) -> Self {
        Self {
            regex: Regex::new(pattern).expect("Invalid regex pattern"),
            reason,
        }
    }

    /// The reason assigned on match.
    pub fn reason(&self) -> RequestErrorReason {
        self.reason
    }

    /// Returns the matched text, if any.
    pub fn find<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.regex.find(text).map(|m| m.as_str())
    }
}

/// Recognizes transport failures from error text.
///
/// Some client libraries only expose a message (or an errno-style code inside
/// one). Patterns are tried in order against every element of the error chain.
#[derive(Debug)]
pub struct MessagePatterns {
    patterns: Vec<MessagePattern>,
}

impl Default for MessagePatterns {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagePatterns {
    /// Creates the default pattern set.
    pub fn new() -> Self {
        use RequestErrorReason::{Certificate, Connection, Dns, Timeout};

        Self {
            patterns: vec![
                MessagePattern::new(
                    r"(?i)\b(ENOTFOUND|EAI_NONAME)\b|dns error|failed to lookup address|name or service not known|no such host|nodename nor servname",
                    Dns(DnsReason::NotFound),
                ),
                MessagePattern::new(
                    r"(?i)\bEAI_AGAIN\b|temporary failure in name resolution",
                    Dns(DnsReason::Timeout),
                ),
                MessagePattern::new(
                    r"(?i)\bENODATA\b|no address associated with hostname",
                    Dns(DnsReason::NoAnswer),
                ),
                MessagePattern::new(
                    r"(?i)\bCERT_HAS_EXPIRED\b|certificate (has )?expired",
                    Certificate(CertificateReason::Expired),
                ),
                MessagePattern::new(
                    r"(?i)\bCERT_NOT_YET_VALID\b|certificate is not yet valid",
                    Certificate(CertificateReason::NotYetValid),
                ),
                MessagePattern::new(
                    r"(?i)\bERR_TLS_CERT_ALTNAME_INVALID\b|hostname mismatch|not valid for name",
                    Certificate(CertificateReason::HostnameMismatch),
                ),
                MessagePattern::new(
                    r"(?i)\b(DEPTH_ZERO_SELF_SIGNED_CERT|SELF_SIGNED_CERT_IN_CHAIN|UNABLE_TO_VERIFY_LEAF_SIGNATURE|UNABLE_TO_GET_ISSUER_CERT(_LOCALLY)?)\b|self[- ]signed certificate|unknown ?issuer|certificate verify failed",
                    Certificate(CertificateReason::Untrusted),
                ),
                MessagePattern::new(
                    r"(?i)\bECONNREFUSED\b|connection refused",
                    Connection(ConnectionReason::Refused),
                ),
                MessagePattern::new(
                    r"(?i)\bECONNRESET\b|connection reset",
                    Connection(ConnectionReason::Reset),
                ),
                MessagePattern::new(
                    r"(?i)\bEHOSTUNREACH\b|host is unreachable|no route to host",
                    Connection(ConnectionReason::HostUnreachable),
                ),
                MessagePattern::new(
                    r"(?i)\bENETUNREACH\b|network is unreachable",
                    Connection(ConnectionReason::NetworkUnreachable),
                ),
                MessagePattern::new(
                    r"(?i)\bECONNABORTED\b|connection aborted|operation was aborted",
                    Timeout(TimeoutReason::Aborted),
                ),
                MessagePattern::new(
                    r"(?i)\bETIMEDOUT\b|timed out",
                    Timeout(TimeoutReason::Timeout),
                ),
            ],
        }
    }

    /// Creates a pattern set from explicit patterns.
    pub fn with_patterns(patterns: Vec<MessagePattern>) -> Self {
        Self { patterns }
    }

    /// Number of configured patterns.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Matches a single message against the patterns in order.
    pub fn recognize_text(&self, text: &str) -> Option<ErrorCause> {
        self.patterns.iter().find_map(|pattern| {
            pattern
                .find(text)
                .map(|matched| ErrorCause::request(pattern.reason, matched))
        })
    }

    /// Matches every element of the error chain, outermost first.
    pub fn recognize(&self, error: &(dyn StdError + 'static)) -> Option<ErrorCause> {
        error_chain(error).find_map(|e| self.recognize_text(&e.to_string()))
    }
}
