//! Error interception for integration operations
//!
//! [`Intercepted`] wraps an integration and routes every failure of its
//! operations through the [`ClassifierChain`], so callers only ever observe
//! [`IntegrationError`] values carrying the integration's identity. Successful
//! results pass through untouched.

use std::future::Future;
use std::sync::Arc;

use super::traits::{Integration, Operations, TEST_CONNECTION};
use crate::error::{BoxError, ClassifierChain, IntegrationError, IntegrationIdentity};
use crate::transport::Transport;

/// An integration whose operations report typed errors.
pub struct Intercepted<I> {
    inner: I,
    identity: IntegrationIdentity,
    operations: Operations,
    chain: Arc<ClassifierChain>,
}

impl<I: Integration> Intercepted<I> {
    /// Wraps `inner`. The operation list is read once, here.
    pub fn new(inner: I, chain: Arc<ClassifierChain>) -> Self {
        let identity = inner.context().identity().clone();
        let operations = inner.operations();
        tracing::debug!(
            integration = %identity.name,
            operations = ?operations.names(),
            "intercepting integration operations"
        );
        Self {
            inner,
            identity,
            operations,
            chain,
        }
    }

    /// The wrapped integration.
    pub fn inner(&self) -> &I {
        &self.inner
    }

    /// Identity attached to every classified error.
    pub fn identity(&self) -> &IntegrationIdentity {
        &self.identity
    }

    /// Operations registered for interception.
    pub fn operations(&self) -> &Operations {
        &self.operations
    }

    /// Runs a synchronous operation, classifying its failure.
    pub fn call_sync<T, F>(&self, operation: &str, f: F) -> Result<T, IntegrationError>
    where
        F: FnOnce(&I) -> Result<T, BoxError>,
    {
        f(&self.inner).map_err(|error| self.intercept(operation, error))
    }

    /// Runs an asynchronous operation, classifying its failure.
    pub async fn call<'a, T, F, Fut>(&'a self, operation: &str, f: F) -> Result<T, IntegrationError>
    where
        F: FnOnce(&'a I) -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        f(&self.inner)
            .await
            .map_err(|error| self.intercept(operation, error))
    }

    /// Runs the integration's connection probe through `transport`.
    pub async fn probe(&self, transport: &Transport) -> Result<(), IntegrationError> {
        self.call(TEST_CONNECTION, |inner| inner.probe(transport))
            .await
    }

    fn intercept(&self, operation: &str, error: BoxError) -> IntegrationError {
        if !self.operations.contains(operation) {
            tracing::warn!(
                integration = %self.identity.name,
                operation,
                "operation is not registered for interception"
            );
        }

        let error = self.chain.classify_or_unknown(error, &self.identity);
        tracing::debug!(
            integration = %self.identity.name,
            operation,
            cause = ?error.cause(),
            "integration operation failed"
        );
        error
    }
}
