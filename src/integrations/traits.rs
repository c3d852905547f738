//! Integration traits
//!
//! This module defines the trait every service integration implements and the
//! explicit list of operations an integration registers for error interception.

use async_trait::async_trait;

use super::context::IntegrationContext;
use crate::error::BoxError;
use crate::transport::Transport;

/// Name of the probe operation every integration provides.
pub const TEST_CONNECTION: &str = "testConnection";

/// Ordered list of operation names registered for interception.
///
/// A name is stored once. Registering a name that is already present (for
/// example a concrete integration overriding a base operation) keeps the
/// original position and does not add a second entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Operations {
    names: Vec<&'static str>,
}

impl Operations {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations shared by every integration.
    pub fn base() -> Self {
        Self::new().with(TEST_CONNECTION)
    }

    /// Registers an operation name.
    pub fn with(mut self, name: &'static str) -> Self {
        if !self.contains(name) {
            self.names.push(name);
        }
        self
    }

    /// Registers every name of `other` that is not already present.
    pub fn extend(self, other: &Operations) -> Self {
        other.names.iter().fold(self, |ops, name| ops.with(*name))
    }

    /// Returns true if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| *n == name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> &[&'static str] {
        &self.names
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Trait for self-hosted service integrations
///
/// Implementations are thin clients for one vendor API. Their operations
/// return opaque errors; wrapping an integration in
/// [`Intercepted`](super::Intercepted) turns every failure into a typed
/// [`IntegrationError`](crate::error::IntegrationError).
#[async_trait]
pub trait Integration: Send + Sync {
    /// Identity, base URL, secrets and session capability of this instance.
    fn context(&self) -> &IntegrationContext;

    /// Operations this integration registers for interception.
    ///
    /// Implementations that add operations should start from
    /// [`Operations::base`].
    fn operations(&self) -> Operations {
        Operations::base()
    }

    /// Lightweight call verifying reachability and credentials.
    ///
    /// All requests must go through `transport` so the connection verifier can
    /// retry with an explicitly trusted certificate.
    async fn probe(&self, transport: &Transport) -> Result<(), BoxError>;
}

#[async_trait]
impl<T: Integration + ?Sized> Integration for Box<T> {
    fn context(&self) -> &IntegrationContext {
        (**self).context()
    }

    fn operations(&self) -> Operations {
        (**self).operations()
    }

    async fn probe(&self, transport: &Transport) -> Result<(), BoxError> {
        (**self).probe(transport).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_operations() {
        let ops = Operations::base();
        assert_eq!(ops.names(), &[TEST_CONNECTION]);
        assert!(ops.contains("testConnection"));
        assert!(!ops.contains("getStatus"));
    }

    #[test]
    fn test_with_deduplicates() {
        let ops = Operations::base()
            .with("getStatus")
            .with(TEST_CONNECTION)
            .with("getStatus");
        assert_eq!(ops.names(), &[TEST_CONNECTION, "getStatus"]);
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn test_extend_keeps_first_position() {
        let base = Operations::base().with("getVersion");
        let concrete = Operations::new()
            .with("getVersion")
            .with("pause")
            .extend(&base);
        assert_eq!(concrete.names(), &["getVersion", "pause", TEST_CONNECTION]);
    }

    #[test]
    fn test_empty_operations() {
        let ops = Operations::new();
        assert!(ops.is_empty());
        assert_eq!(ops.len(), 0);
    }
}
