//! Connection descriptor shared by every integration
//!
//! An [`IntegrationContext`] holds the identity of one configured integration,
//! its base URL, its decrypted secrets and the session capability injected for
//! it. Integrations read secrets and build request URLs through it.

use std::fmt;
use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::session::{SessionHandle, SessionStore};
use crate::error::{BoxError, IntegrationIdentity};

/// Kinds of secrets an integration can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecretKind {
    /// Login name
    Username,
    /// Login password
    Password,
    /// Static API key
    ApiKey,
    /// Bearer or session token
    Token,
    /// Identifier of an API token (paired with `ApiKey` or `Token`)
    TokenId,
    /// Authentication realm
    Realm,
    /// Personal access token
    PersonalAccessToken,
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretKind::Username => write!(f, "username"),
            SecretKind::Password => write!(f, "password"),
            SecretKind::ApiKey => write!(f, "apiKey"),
            SecretKind::Token => write!(f, "token"),
            SecretKind::TokenId => write!(f, "tokenId"),
            SecretKind::Realm => write!(f, "realm"),
            SecretKind::PersonalAccessToken => write!(f, "personalAccessToken"),
        }
    }
}

/// A decrypted secret value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    /// What the secret is
    pub kind: SecretKind,
    /// Plain value
    pub value: String,
}

impl Secret {
    /// Creates a new secret.
    pub fn new(kind: SecretKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("kind", &self.kind)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Decrypts stored secret values. Storage and key management live elsewhere.
pub trait SecretDecryptor: Send + Sync {
    /// Returns the plain value of an encrypted secret.
    fn decrypt(&self, value: &str) -> Result<String, BoxError>;
}

/// Decryptor for secrets that are stored in plain text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainSecrets;

impl SecretDecryptor for PlainSecrets {
    fn decrypt(&self, value: &str) -> Result<String, BoxError> {
        Ok(value.to_string())
    }
}

/// A secret an operation needed but the integration was not configured with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("integration '{integration}' has no secret of kind {kind}")]
pub struct MissingSecretError {
    /// Integration name
    pub integration: String,
    /// Requested kind
    pub kind: SecretKind,
}

/// Errors raised while building an integration context.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The base URL or a derived URL is not valid.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// Parser message
        reason: String,
    },

    /// A secret could not be decrypted.
    #[error("failed to decrypt {kind} secret: {source}")]
    Decrypt {
        /// Secret kind
        kind: SecretKind,
        /// Underlying error
        #[source]
        source: BoxError,
    },
}

fn parse_url(url: &str) -> Result<Url, ContextError> {
    Url::parse(url).map_err(|e| ContextError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Everything an integration instance needs to talk to its service.
#[derive(Clone)]
pub struct IntegrationContext {
    identity: IntegrationIdentity,
    base_url: Url,
    secrets: Vec<Secret>,
    session: SessionHandle,
}

impl IntegrationContext {
    /// Creates a context from already decrypted secrets.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        url: &str,
        secrets: Vec<Secret>,
        session: Arc<dyn SessionStore>,
    ) -> Result<Self, ContextError> {
        let base_url = parse_url(url)?;
        let identity = IntegrationIdentity::new(id, name, base_url.as_str());
        let session = SessionHandle::new(session, identity.id.clone());
        Ok(Self {
            identity,
            base_url,
            secrets,
            session,
        })
    }

    /// Creates a context, decrypting each stored secret first.
    pub fn from_encrypted(
        id: impl Into<String>,
        name: impl Into<String>,
        url: &str,
        encrypted: Vec<(SecretKind, String)>,
        decryptor: &dyn SecretDecryptor,
        session: Arc<dyn SessionStore>,
    ) -> Result<Self, ContextError> {
        let secrets = encrypted
            .into_iter()
            .map(|(kind, value)| {
                decryptor
                    .decrypt(&value)
                    .map(|plain| Secret::new(kind, plain))
                    .map_err(|source| ContextError::Decrypt { kind, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(id, name, url, secrets, session)
    }

    /// Identity used for error attribution.
    pub fn identity(&self) -> &IntegrationIdentity {
        &self.identity
    }

    /// Base URL of the service.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the first secret of the given kind.
    pub fn secret(&self, kind: SecretKind) -> Result<&str, MissingSecretError> {
        self.secrets
            .iter()
            .find(|secret| secret.kind == kind)
            .map(|secret| secret.value.as_str())
            .ok_or_else(|| MissingSecretError {
                integration: self.identity.name.clone(),
                kind,
            })
    }

    /// Returns true if a secret of the given kind is configured.
    pub fn has_secret(&self, kind: SecretKind) -> bool {
        self.secrets.iter().any(|secret| secret.kind == kind)
    }

    /// Builds a URL below the base URL.
    ///
    /// `path` is appended to the base path (a trailing slash on the base is
    /// dropped first) and `query` pairs are appended in order.
    pub fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, ContextError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = if path.is_empty() || path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        let mut url = parse_url(&format!("{}{}", base, path))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        Ok(url)
    }

    /// Session capability scoped to this integration.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }
}

impl fmt::Debug for IntegrationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrationContext")
            .field("identity", &self.identity)
            .field("secrets", &self.secrets)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::session::MemorySessionStore;

    fn context(url: &str, secrets: Vec<Secret>) -> IntegrationContext {
        IntegrationContext::new(
            "pihole-1",
            "Pi-hole",
            url,
            secrets,
            Arc::new(MemorySessionStore::new()),
        )
        .unwrap()
    }

    struct ReversingDecryptor;

    impl SecretDecryptor for ReversingDecryptor {
        fn decrypt(&self, value: &str) -> Result<String, BoxError> {
            if value.is_empty() {
                return Err("empty ciphertext".into());
            }
            Ok(value.chars().rev().collect())
        }
    }

    #[test]
    fn test_secret_lookup() {
        let ctx = context(
            "http://pihole.local",
            vec![
                Secret::new(SecretKind::ApiKey, "first"),
                Secret::new(SecretKind::ApiKey, "second"),
            ],
        );
        assert_eq!(ctx.secret(SecretKind::ApiKey).unwrap(), "first");
        assert!(ctx.has_secret(SecretKind::ApiKey));
        assert!(!ctx.has_secret(SecretKind::Password));
    }

    #[test]
    fn test_missing_secret() {
        let ctx = context("http://pihole.local", vec![]);
        let err = ctx.secret(SecretKind::Password).unwrap_err();
        assert_eq!(err.kind, SecretKind::Password);
        assert_eq!(
            err.to_string(),
            "integration 'Pi-hole' has no secret of kind password"
        );
    }

    #[test]
    fn test_url_building() {
        let ctx = context("http://pihole.local/admin/", vec![]);
        assert_eq!(
            ctx.url("/api/summary", &[]).unwrap().as_str(),
            "http://pihole.local/admin/api/summary"
        );
        assert_eq!(
            ctx.url("api/summary", &[("auth", "abc"), ("full", "1")])
                .unwrap()
                .as_str(),
            "http://pihole.local/admin/api/summary?auth=abc&full=1"
        );
    }

    #[test]
    fn test_identity_uses_normalized_url() {
        let ctx = context("https://pihole.local:8443", vec![]);
        assert_eq!(ctx.identity().id, "pihole-1");
        assert_eq!(ctx.identity().name, "Pi-hole");
        assert_eq!(ctx.identity().url, "https://pihole.local:8443/");
    }

    #[test]
    fn test_invalid_base_url() {
        let result = IntegrationContext::new(
            "x",
            "X",
            "not a url",
            vec![],
            Arc::new(MemorySessionStore::new()),
        );
        assert!(matches!(result, Err(ContextError::InvalidUrl { .. })));
    }

    #[test]
    fn test_from_encrypted() {
        let ctx = IntegrationContext::from_encrypted(
            "x",
            "X",
            "http://x.local",
            vec![(SecretKind::Username, "nimda".to_string())],
            &ReversingDecryptor,
            Arc::new(MemorySessionStore::new()),
        )
        .unwrap();
        assert_eq!(ctx.secret(SecretKind::Username).unwrap(), "admin");
    }

    #[test]
    fn test_from_encrypted_failure() {
        let result = IntegrationContext::from_encrypted(
            "x",
            "X",
            "http://x.local",
            vec![(SecretKind::Token, String::new())],
            &ReversingDecryptor,
            Arc::new(MemorySessionStore::new()),
        );
        match result {
            Err(ContextError::Decrypt { kind, .. }) => assert_eq!(kind, SecretKind::Token),
            other => panic!("Expected Decrypt error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_plain_secrets() {
        assert_eq!(PlainSecrets.decrypt("value").unwrap(), "value");
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new(SecretKind::Password, "hunter2");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("redacted"));
    }
}
