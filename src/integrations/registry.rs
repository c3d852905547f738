//! Integration registry
//!
//! Keeps the configured integrations, each already wrapped for error
//! interception, keyed by integration id. Registration order is preserved so
//! listings and bulk connection tests are deterministic.

use std::sync::Arc;

use super::intercept::Intercepted;
use super::traits::Integration;
use crate::error::ClassifierChain;

/// A type-erased intercepted integration.
pub type SharedIntegration = Arc<Intercepted<Box<dyn Integration>>>;

/// Registry for managing configured integrations
///
/// Every integration is wrapped with the registry's classifier chain when it
/// is registered, so anything handed out by [`IntegrationRegistry::get`]
/// already reports typed errors.
pub struct IntegrationRegistry {
    chain: Arc<ClassifierChain>,
    integrations: Vec<SharedIntegration>,
}

impl Default for IntegrationRegistry {
    fn default() -> Self {
        Self::new(Arc::new(ClassifierChain::new()))
    }
}

impl IntegrationRegistry {
    /// Create an empty registry sharing `chain` across all integrations
    pub fn new(chain: Arc<ClassifierChain>) -> Self {
        Self {
            chain,
            integrations: Vec::new(),
        }
    }

    /// Register a new integration
    ///
    /// If an integration with the same id already exists, it is replaced in
    /// place.
    ///
    /// # Returns
    /// The id of the registered integration
    pub fn register(&mut self, integration: Box<dyn Integration>) -> String {
        let wrapped = Arc::new(Intercepted::new(integration, self.chain.clone()));
        let id = wrapped.identity().id.clone();

        match self.position(&id) {
            Some(index) => {
                tracing::debug!(integration = %id, "replacing registered integration");
                self.integrations[index] = wrapped;
            }
            None => self.integrations.push(wrapped),
        }
        id
    }

    /// Get an integration by id
    pub fn get(&self, id: &str) -> Option<SharedIntegration> {
        self.position(id).map(|index| self.integrations[index].clone())
    }

    /// Check if an integration is registered
    pub fn has(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Remove an integration from the registry
    ///
    /// # Returns
    /// The removed integration if it existed
    pub fn remove(&mut self, id: &str) -> Option<SharedIntegration> {
        self.position(id).map(|index| self.integrations.remove(index))
    }

    /// All registered ids in registration order
    pub fn ids(&self) -> Vec<&str> {
        self.integrations
            .iter()
            .map(|integration| integration.identity().id.as_str())
            .collect()
    }

    /// Iterate over registered integrations in registration order
    pub fn iter(&self) -> impl Iterator<Item = &SharedIntegration> {
        self.integrations.iter()
    }

    pub fn len(&self) -> usize {
        self.integrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.integrations
            .iter()
            .position(|integration| integration.identity().id == id)
    }
}
