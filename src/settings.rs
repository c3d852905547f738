//! Settings for the connection tester.
//!
//! Settings are loaded from a TOML file and can be overridden through
//! environment variables prefixed with `INTEGRATION_KIT`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::integrations::{
    ContextError, HealthCheckConfig, IntegrationContext, SecretDecryptor, SecretKind,
    SessionStore,
};
use crate::transport::{
    BuiltInRoots, CaBundleProvider, PemBundle, PemError, ReqwestTransportFactory,
    TlsCertificateFetcher,
};

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_discovery_timeout_secs() -> u64 {
    5
}

/// Errors that can occur when loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// The settings file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] ConfigError),

    /// The settings file path is invalid.
    #[error("invalid configuration path: {0}")]
    InvalidPath(String),

    /// Two integrations share an id.
    #[error("duplicate integration id: {0}")]
    DuplicateId(String),
}

/// Transport and discovery settings.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifierSettings {
    /// Per-request timeout for probes, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Per-step timeout for certificate discovery, in seconds
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,

    /// PEM bundle trusted in addition to the built-in roots
    #[serde(default)]
    pub ca_bundle: Option<PathBuf>,

    /// User agent sent with probe requests
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            discovery_timeout_secs: default_discovery_timeout_secs(),
            ca_bundle: None,
            user_agent: None,
        }
    }
}

impl VerifierSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    /// Builds the transport factory these settings describe.
    pub fn transport_factory(&self) -> Result<ReqwestTransportFactory, PemError> {
        let bundle: Arc<dyn CaBundleProvider> = match &self.ca_bundle {
            Some(path) => Arc::new(PemBundle::load(path)?),
            None => Arc::new(BuiltInRoots),
        };

        let factory = ReqwestTransportFactory::new(bundle).with_timeout(self.request_timeout());
        Ok(match &self.user_agent {
            Some(user_agent) => factory.with_user_agent(user_agent.clone()),
            None => factory,
        })
    }

    pub fn certificate_fetcher(&self) -> TlsCertificateFetcher {
        TlsCertificateFetcher::new(self.discovery_timeout())
    }
}

/// One configured secret.
#[derive(Debug, Clone, Deserialize)]
pub struct SecretSettings {
    pub kind: SecretKind,
    pub value: String,
}

/// One configured integration.
#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationSettings {
    /// Stable id
    pub id: String,
    /// Display name
    pub name: String,
    /// Base URL of the service
    pub url: String,
    /// Stored (possibly encrypted) secrets
    #[serde(default)]
    pub secrets: Vec<SecretSettings>,
    /// Health endpoint description
    #[serde(default)]
    pub health: HealthCheckConfig,
}

impl IntegrationSettings {
    /// Builds the integration context, decrypting the stored secrets.
    pub fn context(
        &self,
        decryptor: &dyn SecretDecryptor,
        session: Arc<dyn SessionStore>,
    ) -> Result<IntegrationContext, ContextError> {
        let encrypted = self
            .secrets
            .iter()
            .map(|secret| (secret.kind, secret.value.clone()))
            .collect();
        IntegrationContext::from_encrypted(
            self.id.clone(),
            self.name.clone(),
            &self.url,
            encrypted,
            decryptor,
            session,
        )
    }
}

/// Root settings structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub verifier: VerifierSettings,

    /// Configured integrations, in file order
    #[serde(default)]
    pub integrations: Vec<IntegrationSettings>,
}

impl Settings {
    /// Load settings from a file path.
    ///
    /// Environment variables override file values using the format
    /// `INTEGRATION_KIT__<SECTION>__<KEY>`
    /// (e.g. `INTEGRATION_KIT__VERIFIER__REQUEST_TIMEOUT_SECS=30`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, cannot be parsed, or
    /// declares the same integration id twice.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();

        let path_str = path
            .to_str()
            .ok_or_else(|| SettingsError::InvalidPath(format!("{:?}", path)))?;

        if !path.exists() {
            return Err(SettingsError::FileNotFound(path_str.to_string()));
        }

        let config = Config::builder()
            .add_source(File::with_name(path_str))
            .add_source(
                Environment::with_prefix("INTEGRATION_KIT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        tracing::debug!(
            path = %path.display(),
            integrations = settings.integrations.len(),
            "settings loaded"
        );
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let mut seen = HashSet::new();
        match self
            .integrations
            .iter()
            .find(|integration| !seen.insert(integration.id.as_str()))
        {
            Some(duplicate) => Err(SettingsError::DuplicateId(duplicate.id.clone())),
            None => Ok(()),
        }
    }

    /// Get an integration by id.
    pub fn integration(&self, id: &str) -> Option<&IntegrationSettings> {
        self.integrations.iter().find(|integration| integration.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::{MemorySessionStore, PlainSecrets};
    use std::io::Write;

    const SAMPLE: &str = r#"
        [verifier]
        discovery_timeout_secs = 2

        [[integrations]]
        id = "kuma-1"
        name = "Uptime Kuma"
        url = "https://kuma.local:3001"

        [[integrations.secrets]]
        kind = "apiKey"
        value = "s3cret"

        [integrations.health]
        path = "/api/status-page/heartbeat"
        expect_json = true
        required_fields = ["heartbeatList"]

        [[integrations]]
        id = "pihole-1"
        name = "Pi-hole"
        url = "http://pi.hole"
    "#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_deserialize_settings() {
        let settings: Settings = toml::from_str(SAMPLE).unwrap();

        assert_eq!(settings.verifier.discovery_timeout(), Duration::from_secs(2));
        assert_eq!(settings.verifier.request_timeout_secs, 10);
        assert_eq!(settings.integrations.len(), 2);

        let kuma = settings.integration("kuma-1").unwrap();
        assert_eq!(kuma.secrets[0].kind, SecretKind::ApiKey);
        assert_eq!(kuma.health.path, "/api/status-page/heartbeat");
        assert_eq!(kuma.health.required_fields, vec!["heartbeatList"]);

        let pihole = settings.integration("pihole-1").unwrap();
        assert!(pihole.secrets.is_empty());
        assert_eq!(pihole.health, HealthCheckConfig::default());
    }

    #[test]
    fn test_empty_settings_use_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert!(settings.integrations.is_empty());
        assert_eq!(settings.verifier.request_timeout(), Duration::from_secs(10));
        assert_eq!(settings.verifier.discovery_timeout(), Duration::from_secs(5));
        assert!(settings.verifier.ca_bundle.is_none());
    }

    #[test]
    fn test_load_file_not_found() {
        let result = Settings::load("nonexistent/path/integrations.toml");
        assert!(matches!(result, Err(SettingsError::FileNotFound(_))));
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(SAMPLE);
        let settings = Settings::load(file.path()).unwrap();

        let ids: Vec<&str> = settings.integrations.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["kuma-1", "pihole-1"]);
        assert!(settings.integration("kuma-1").unwrap().health.expect_json);
    }

    #[test]
    fn test_load_rejects_duplicate_ids() {
        let file = write_config(
            r#"
            [[integrations]]
            id = "dup"
            name = "A"
            url = "http://a.local"

            [[integrations]]
            id = "dup"
            name = "B"
            url = "http://b.local"
            "#,
        );
        match Settings::load(file.path()) {
            Err(SettingsError::DuplicateId(id)) => assert_eq!(id, "dup"),
            other => panic!("Expected DuplicateId, got {:?}", other),
        }
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = write_config("[[integrations]\nid = ");
        assert!(matches!(
            Settings::load(file.path()),
            Err(SettingsError::ParseError(_))
        ));
    }

    #[test]
    fn test_integration_context() {
        let settings: Settings = toml::from_str(SAMPLE).unwrap();
        let kuma = settings.integration("kuma-1").unwrap();
        let context = kuma
            .context(&PlainSecrets, Arc::new(MemorySessionStore::new()))
            .unwrap();

        assert_eq!(context.identity().id, "kuma-1");
        assert_eq!(context.secret(SecretKind::ApiKey).unwrap(), "s3cret");
    }

    #[test]
    fn test_transport_factory_with_missing_bundle() {
        let verifier = VerifierSettings {
            ca_bundle: Some(PathBuf::from("/nonexistent/bundle.pem")),
            ..Default::default()
        };
        assert!(matches!(
            verifier.transport_factory(),
            Err(PemError::Io { .. })
        ));
    }

    #[test]
    fn test_transport_factory_applies_settings() {
        let verifier = VerifierSettings {
            request_timeout_secs: 3,
            ..Default::default()
        };
        let factory = verifier.transport_factory().unwrap();
        assert_eq!(factory.timeout(), Duration::from_secs(3));
        assert_eq!(verifier.certificate_fetcher().timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_error_display() {
        let err = SettingsError::FileNotFound("test.toml".to_string());
        assert_eq!(err.to_string(), "configuration file not found: test.toml");

        let err = SettingsError::DuplicateId("kuma-1".to_string());
        assert_eq!(err.to_string(), "duplicate integration id: kuma-1");
    }
}
