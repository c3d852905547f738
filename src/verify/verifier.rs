//! Connection verifier
//!
//! Runs an integration's probe and folds the outcome into a [`TestingResult`].
//! When the probe fails because the server certificate is not trusted, the
//! verifier discovers the certificate the server presents, retries the probe
//! with that certificate as an explicit trust anchor and, if the server is
//! reachable that way, reports the certificate so a user can decide to trust it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use reqwest::Url;

use super::result::{RequestErrorData, TestConnectionError, TestingResult};
use crate::error::{BoxError, ErrorCause, IntegrationError};
use crate::integrations::{Integration, Intercepted};
use crate::transport::{
    discovery_target, Certificate, CertificateFetcher, Transport, TransportFactory,
};

/// Tests integration connections, negotiating certificate trust when needed.
#[derive(Clone)]
pub struct ConnectionVerifier {
    transports: Arc<dyn TransportFactory>,
    fetcher: Arc<dyn CertificateFetcher>,
}

impl ConnectionVerifier {
    /// Creates a verifier from its transport and discovery collaborators.
    pub fn new(transports: Arc<dyn TransportFactory>, fetcher: Arc<dyn CertificateFetcher>) -> Self {
        Self {
            transports,
            fetcher,
        }
    }

    /// Tests the connection of one integration. Never fails; every outcome,
    /// including a panicking probe, is a [`TestingResult`].
    pub async fn test_connection<I: Integration>(&self, integration: &Intercepted<I>) -> TestingResult {
        let name = integration.identity().name.as_str();
        tracing::info!(integration = %name, "testing connection");

        let transport = match self.transports.create(&[]) {
            Ok(transport) => transport,
            Err(error) => {
                tracing::warn!(integration = %name, %error, "failed to build default transport");
                return TestingResult::failure(TestConnectionError::Unknown);
            }
        };

        let error = match self.probe(integration, &transport).await {
            Ok(()) => {
                tracing::info!(integration = %name, "connection test succeeded");
                return TestingResult::Success;
            }
            Err(error) => error,
        };

        let request_error = match error.cause() {
            ErrorCause::Request { reason, code } if reason.is_certificate() => RequestErrorData {
                reason: *reason,
                code: code.clone(),
            },
            _ => return self.fail(name, TestConnectionError::from_integration_error(&error)),
        };

        tracing::info!(
            integration = %name,
            reason = %request_error.reason,
            "certificate not trusted, discovering server certificate"
        );
        let certificate = match self.discover(&integration.identity().url).await {
            Ok(certificate) => certificate,
            Err(error) => {
                tracing::warn!(integration = %name, %error, "certificate discovery failed");
                return self.fail(name, TestConnectionError::Unknown);
            }
        };

        let trusted = match self.transports.create(std::slice::from_ref(&certificate)) {
            Ok(transport) => transport,
            Err(error) => {
                tracing::warn!(integration = %name, %error, "failed to build trusting transport");
                return self.fail(name, TestConnectionError::Unknown);
            }
        };

        tracing::debug!(
            integration = %name,
            fingerprint = certificate.fingerprint(),
            "retrying probe with discovered certificate"
        );
        match self.probe(integration, &trusted).await {
            Err(retry) if retry.cause().request_reason() != Some(request_error.reason) => {
                tracing::debug!(
                    integration = %name,
                    cause = ?retry.cause(),
                    "retry failed for another reason"
                );
                self.fail(name, TestConnectionError::from_integration_error(&retry))
            }
            _ => self.fail(
                name,
                TestConnectionError::Certificate {
                    certificate,
                    underlying_request_error: request_error,
                },
            ),
        }
    }

    async fn probe<I: Integration>(
        &self,
        integration: &Intercepted<I>,
        transport: &Transport,
    ) -> Result<(), IntegrationError> {
        match AssertUnwindSafe(integration.probe(transport))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(integration = %integration.identity().name, "probe panicked");
                Err(IntegrationError::unknown(
                    integration.identity().clone(),
                    "probe panicked".into(),
                ))
            }
        }
    }

    async fn discover(&self, url: &str) -> Result<Certificate, BoxError> {
        let url = Url::parse(url)?;
        let (host, port) = discovery_target(&url)?;
        Ok(self.fetcher.fetch(&host, port).await?)
    }

    fn fail(&self, integration: &str, error: TestConnectionError) -> TestingResult {
        tracing::info!(
            integration = %integration,
            kind = error.kind(),
            %error,
            "connection test failed"
        );
        TestingResult::failure(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{
        CertificateReason, ClassifierChain, ParseError, RequestErrorReason, ResponseError,
    };
    use crate::integrations::{IntegrationContext, MemorySessionStore, Operations};
    use crate::transport::{DiscoveryError, TransportError};
    use crate::verify::StatusReason;
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Builds plain clients and remembers the anchors it was asked for.
    #[derive(Default)]
    struct RecordingFactory {
        requests: Mutex<Vec<Vec<Certificate>>>,
    }

    impl TransportFactory for RecordingFactory {
        fn create(&self, anchors: &[Certificate]) -> Result<Transport, TransportError> {
            self.requests.lock().unwrap().push(anchors.to_vec());
            Ok(Transport::new(reqwest::Client::new(), anchors.to_vec()))
        }
    }

    struct FixedFetcher {
        result: fn() -> Result<Certificate, DiscoveryError>,
        calls: AtomicUsize,
        target: Mutex<Option<(String, u16)>>,
    }

    impl FixedFetcher {
        fn new(result: fn() -> Result<Certificate, DiscoveryError>) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
                target: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl CertificateFetcher for FixedFetcher {
        async fn fetch(&self, host: &str, port: u16) -> Result<Certificate, DiscoveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.target.lock().unwrap() = Some((host.to_string(), port));
            (self.result)()
        }
    }

    fn leaf() -> Result<Certificate, DiscoveryError> {
        Ok(Certificate::from_der(b"self-signed leaf"))
    }

    fn unreachable() -> Result<Certificate, DiscoveryError> {
        Err(DiscoveryError::Connect {
            address: "nas.local:8443".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        })
    }

    /// Probe outcome as a function of the transport's explicit anchors.
    type Behavior = fn(&Transport) -> Result<(), BoxError>;

    struct ScriptedIntegration {
        context: IntegrationContext,
        behavior: Behavior,
    }

    #[async_trait]
    impl Integration for ScriptedIntegration {
        fn context(&self) -> &IntegrationContext {
            &self.context
        }

        fn operations(&self) -> Operations {
            Operations::base()
        }

        async fn probe(&self, transport: &Transport) -> Result<(), BoxError> {
            (self.behavior)(transport)
        }
    }

    fn untrusted() -> BoxError {
        Box::new(rustls::Error::InvalidCertificate(
            rustls::CertificateError::UnknownIssuer,
        ))
    }

    fn scripted(behavior: Behavior) -> Intercepted<ScriptedIntegration> {
        let context = IntegrationContext::new(
            "nas-1",
            "Synology",
            "https://nas.local:8443",
            vec![],
            Arc::new(MemorySessionStore::new()),
        )
        .unwrap();
        Intercepted::new(
            ScriptedIntegration { context, behavior },
            Arc::new(ClassifierChain::new()),
        )
    }

    async fn run(
        behavior: Behavior,
        fetcher: fn() -> Result<Certificate, DiscoveryError>,
    ) -> (TestingResult, Arc<RecordingFactory>, Arc<FixedFetcher>) {
        let factory = Arc::new(RecordingFactory::default());
        let fetcher = Arc::new(FixedFetcher::new(fetcher));
        let verifier = ConnectionVerifier::new(factory.clone(), fetcher.clone());
        let result = verifier.test_connection(&scripted(behavior)).await;
        (result, factory, fetcher)
    }

    #[tokio::test]
    async fn test_success() {
        let (result, factory, fetcher) = run(|_| Ok(()), leaf).await;
        assert_eq!(result, TestingResult::Success);
        assert_eq!(factory.requests.lock().unwrap().len(), 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let (result, _, fetcher) = run(
            |_| Err(Box::new(io::Error::from(io::ErrorKind::ConnectionRefused))),
            leaf,
        )
        .await;
        assert_eq!(result.error().map(|e| e.kind()), Some("request"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_server_error() {
        let (result, _, _) = run(
            |_| Err(Box::new(ResponseError::new(500, "https://nas.local:8443/"))),
            leaf,
        )
        .await;
        assert_eq!(
            result,
            TestingResult::Failure(TestConnectionError::StatusCode {
                status_code: 500,
                reason: StatusReason::InternalServerError,
                url: "https://nas.local:8443/".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_unauthorized() {
        let (result, _, _) = run(
            |_| Err(Box::new(ResponseError::new(401, "https://nas.local:8443/"))),
            leaf,
        )
        .await;
        assert_eq!(result, TestingResult::Failure(TestConnectionError::Unauthorized));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let (result, _, _) = run(|_| Err(Box::new(ParseError::new("missing field `uptime`"))), leaf).await;
        assert_eq!(result.error().map(|e| e.kind()), Some("parse"));
    }

    #[tokio::test]
    async fn test_unrecognized_failure() {
        let (result, _, _) = run(|_| Err("strange".into()), leaf).await;
        assert_eq!(result, TestingResult::Failure(TestConnectionError::Unknown));
    }

    #[tokio::test]
    async fn test_certificate_round_trip() {
        let (result, factory, fetcher) = run(
            |transport| {
                if transport.has_explicit_anchors() {
                    Ok(())
                } else {
                    Err(untrusted())
                }
            },
            leaf,
        )
        .await;

        let expected = Certificate::from_der(b"self-signed leaf");
        match result.error() {
            Some(TestConnectionError::Certificate {
                certificate,
                underlying_request_error,
            }) => {
                assert_eq!(certificate, &expected);
                assert!(underlying_request_error.reason.is_certificate());
                assert_eq!(underlying_request_error.code, "UnknownIssuer");
            }
            other => panic!("Expected certificate result, got {:?}", other),
        }

        assert_eq!(
            *fetcher.target.lock().unwrap(),
            Some(("nas.local".to_string(), 8443))
        );
        let requests = factory.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].is_empty());
        assert_eq!(requests[1], vec![expected]);
    }

    #[tokio::test]
    async fn test_certificate_still_untrusted_after_retry() {
        let (result, factory, _) = run(|_| Err(untrusted()), leaf).await;
        assert_eq!(result.error().map(|e| e.kind()), Some("certificate"));
        assert_eq!(factory.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_fails_for_another_reason() {
        let (result, _, _) = run(
            |transport| {
                if transport.has_explicit_anchors() {
                    Err(Box::new(ResponseError::new(401, "https://nas.local:8443/")))
                } else {
                    Err(untrusted())
                }
            },
            leaf,
        )
        .await;
        assert_eq!(result, TestingResult::Failure(TestConnectionError::Unauthorized));
    }

    #[tokio::test]
    async fn test_retry_fails_with_another_certificate_reason() {
        let (result, _, _) = run(
            |transport| {
                if transport.has_explicit_anchors() {
                    Err(Box::new(rustls::Error::InvalidCertificate(
                        rustls::CertificateError::Expired,
                    )))
                } else {
                    Err(untrusted())
                }
            },
            leaf,
        )
        .await;

        match result.error() {
            Some(TestConnectionError::Request {
                underlying_request_error,
            }) => {
                assert_eq!(
                    underlying_request_error.reason,
                    RequestErrorReason::Certificate(CertificateReason::Expired)
                );
                assert_eq!(underlying_request_error.code, "Expired");
            }
            other => panic!("Expected request error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_discovery_failure_is_unknown() {
        let (result, factory, fetcher) = run(|_| Err(untrusted()), unreachable).await;
        assert_eq!(result, TestingResult::Failure(TestConnectionError::Unknown));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(factory.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_probe_is_unknown() {
        let (result, _, _) = run(|_| panic!("probe exploded"), leaf).await;
        assert_eq!(result, TestingResult::Failure(TestConnectionError::Unknown));
    }

    #[tokio::test]
    async fn test_certificate_result_json() {
        let (result, _, _) = run(
            |transport| {
                if transport.has_explicit_anchors() {
                    Ok(())
                } else {
                    Err(untrusted())
                }
            },
            leaf,
        )
        .await;

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["type"], "certificate");
        assert!(value["error"]["data"]["certificate"].is_object());
    }
}
