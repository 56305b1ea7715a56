#[cfg(test)]
pub(crate) mod fake;
mod http;

pub use http::HttpBackend;

use crate::VaultError;
use crate::models::Secret;
use async_trait::async_trait;
use std::time::Duration;

/// Operations the client needs from the secrets backend
#[async_trait]
pub trait SecretsBackend: Send + Sync {
    /// Extend a token by `increment`, returning the new total lifetime
    async fn renew_token(&self, token: &str, increment: Duration) -> Result<Duration, VaultError>;

    /// Extend a lease by `increment`, returning the new total lifetime
    async fn renew_lease(&self, lease_id: &str, increment: Duration)
    -> Result<Duration, VaultError>;

    /// Create a fresh renewable child token with the given policies
    async fn derive_token(&self, policies: &[String], ttl: Duration) -> Result<String, VaultError>;

    /// Read whatever lives at `path`, authenticated as `token`
    async fn read_secret(&self, token: &str, path: &str) -> Result<Secret, VaultError>;
}
