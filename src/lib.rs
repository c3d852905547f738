//! Integration kit - typed errors and connection verification for
//! self-hosted service integrations.
//!
//! The [`error`] module normalizes failures from many HTTP stacks into one
//! taxonomy, [`integrations`] wraps every integration so its operations only
//! fail with that taxonomy, and [`verify`] tests connections, negotiating
//! trust for self-signed certificates along the way.

pub mod error;
pub mod integrations;
pub mod logging;
pub mod settings;
pub mod transport;
pub mod verify;
