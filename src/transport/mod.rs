//! Transport collaborators
//!
//! Integrations issue their requests through a [`Transport`] built by a
//! [`TransportFactory`]. The default transport trusts the configured CA bundle;
//! the connection verifier can ask for one that additionally trusts a
//! certificate discovered through a [`CertificateFetcher`].

pub mod certificate;
pub mod client;
pub mod discovery;

pub use certificate::{BuiltInRoots, CaBundleProvider, Certificate, PemBundle, PemError};
pub use client::{
    ReqwestTransportFactory, Transport, TransportError, TransportFactory, DEFAULT_REQUEST_TIMEOUT,
};
pub use discovery::{
    discovery_target, CertificateFetcher, DiscoveryError, TlsCertificateFetcher,
    DEFAULT_DISCOVERY_TIMEOUT,
};
