//! vault-client - keeps HashiCorp Vault tokens and leases alive
//!
//! Register a token or lease once; the client renews it immediately and then
//! again at half of every lifetime Vault grants, until tracking is stopped.
//! Renewal failures are delivered through the [`RenewalHandle`] returned at
//! registration.

mod backend;
mod client;
mod error;
mod models;
mod renewal;

pub use backend::{HttpBackend, SecretsBackend};
pub use client::{VaultClient, VaultClientBuilder, parse_ttl};
pub use error::VaultError;
pub use models::{Secret, SecretAuth, TokenCreateRequest, WrapInfo};
pub use renewal::{RenewalHandle, RenewalKind};
