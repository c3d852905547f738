//! Error taxonomy and classification
//!
//! This module normalizes failures thrown by the many HTTP client stacks used
//! by integrations into a small typed taxonomy (request, response, parse,
//! unknown), attributed to the integration that produced them.

pub mod chain;
pub mod classification;

// Re-export main types for convenient access
pub use chain::{
    default_handlers, error_chain, find_in_chain, ClassifierChain, ErrorHandler, MessagePattern,
    MessagePatterns,
};
pub use classification::{
    check_status, parse_json, BoxError, CertificateReason, ConnectionReason, DnsReason, ErrorCause,
    IntegrationError, IntegrationIdentity, ParseError, RequestErrorReason, ResponseError,
    TimeoutReason,
};
