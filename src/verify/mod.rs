//! Connection verification
//!
//! The [`ConnectionVerifier`] is the single entry point for testing whether an
//! integration can reach its service. Its outcome, a [`TestingResult`], is a
//! plain tagged value meant to be serialized and shown to a user.

pub mod result;
pub mod status;
pub mod verifier;

pub use result::{ParseErrorData, RequestErrorData, TestConnectionError, TestingResult};
pub use status::StatusReason;
pub use verifier::ConnectionVerifier;
