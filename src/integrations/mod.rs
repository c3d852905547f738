//! Integrations module
//!
//! This module contains the integration trait, the per-instance context
//! (secrets, URL, session capability), the interception wrapper that turns
//! every operation failure into a typed error, and the registry.

pub mod context;
pub mod health;
pub mod intercept;
pub mod registry;
pub mod session;
pub mod traits;

pub use context::{
    ContextError, IntegrationContext, MissingSecretError, PlainSecrets, Secret, SecretDecryptor,
    SecretKind,
};
pub use health::{HealthCheckConfig, HealthCheckIntegration, HealthReport, GET_HEALTH};
pub use intercept::Intercepted;
pub use registry::{IntegrationRegistry, SharedIntegration};
pub use session::{MemorySessionStore, SessionHandle, SessionStore};
pub use traits::{Integration, Operations, TEST_CONNECTION};
