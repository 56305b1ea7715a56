use crate::backend::{HttpBackend, SecretsBackend};
use crate::error::VaultError;
use crate::models::Secret;
use crate::renewal::{RenewalHandle, RenewalKind, RenewalRequest, RenewalScheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_TASK_TOKEN_TTL: Duration = Duration::from_secs(72 * 3600);
const DEFAULT_DERIVED_TOKEN_TTL: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POLICY: &str = "default";

pub struct VaultClientBuilder {
    base_url: Option<String>,
    token: Option<String>,
    task_token_ttl: Option<Duration>,
    derive_policies: Option<Vec<String>>,
    derived_token_ttl: Duration,
    retry_interval: Duration,
    request_timeout: Duration,
    application_name: Option<String>,
    backend: Option<Arc<dyn SecretsBackend>>,
}

impl Default for VaultClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VaultClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            token: None,
            task_token_ttl: None,
            derive_policies: None,
            derived_token_ttl: DEFAULT_DERIVED_TOKEN_TTL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            application_name: None,
            backend: None,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Root (periodic) token used for renewals and token derivation
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Increment requested on every token renewal
    pub fn task_token_ttl(mut self, ttl: Duration) -> Self {
        self.task_token_ttl = Some(ttl);
        self
    }

    pub fn derive_policies<I, S>(mut self, policies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.derive_policies = Some(policies.into_iter().map(Into::into).collect());
        self
    }

    pub fn derived_token_ttl(mut self, ttl: Duration) -> Self {
        self.derived_token_ttl = ttl;
        self
    }

    /// Delay before a failed scheduled renewal is attempted again.
    /// `Duration::ZERO` retries on the very next loop iteration.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Use a custom backend instead of the Vault HTTP API
    pub fn backend(mut self, backend: Arc<dyn SecretsBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    fn resolve_config(self) -> Result<ResolvedConfig, VaultError> {
        let task_token_ttl = match self.task_token_ttl {
            Some(ttl) => ttl,
            None => match std::env::var("VAULT_TASK_TOKEN_TTL") {
                Ok(raw) => parse_ttl(&raw)?,
                Err(_) => DEFAULT_TASK_TOKEN_TTL,
            },
        };

        let derive_policies = self
            .derive_policies
            .or_else(|| {
                std::env::var("VAULT_DERIVE_POLICIES")
                    .ok()
                    .map(|raw| split_policies(&raw))
            })
            .filter(|policies| !policies.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_POLICY.to_string()]);

        let backend: Arc<dyn SecretsBackend> = match self.backend {
            Some(backend) => backend,
            None => {
                let base_url = self
                    .base_url
                    .or_else(|| std::env::var("VAULT_ADDR").ok())
                    .ok_or(VaultError::VaultNotDetected)?;

                let token = self
                    .token
                    .or_else(|| std::env::var("VAULT_TOKEN").ok())
                    .filter(|token| !token.is_empty())
                    .ok_or_else(|| VaultError::InvalidConfig("periodic token not set".to_string()))?;

                let mut backend = HttpBackend::new(base_url, token, self.request_timeout)?;
                if let Some(name) = self.application_name {
                    backend = backend.with_application_name(name);
                }
                Arc::new(backend)
            }
        };

        Ok(ResolvedConfig {
            backend,
            task_token_ttl,
            derive_policies,
            derived_token_ttl: self.derived_token_ttl,
            retry_interval: self.retry_interval,
        })
    }

    pub fn build(self) -> Result<VaultClient, VaultError> {
        let config = self.resolve_config()?;
        let scheduler = RenewalScheduler::new(Arc::clone(&config.backend), config.retry_interval);

        Ok(VaultClient {
            backend: config.backend,
            scheduler: Arc::new(scheduler),
            task_token_ttl: config.task_token_ttl,
            derive_policies: config.derive_policies,
            derived_token_ttl: config.derived_token_ttl,
        })
    }
}

struct ResolvedConfig {
    backend: Arc<dyn SecretsBackend>,
    task_token_ttl: Duration,
    derive_policies: Vec<String>,
    derived_token_ttl: Duration,
    retry_interval: Duration,
}

/// Parse a TTL such as `"3600"`, `"30m"`, `"72h"` or `"7d"`.
pub fn parse_ttl(raw: &str) -> Result<Duration, VaultError> {
    let raw = raw.trim();
    let invalid = || VaultError::InvalidConfig(format!("invalid TTL: {:?}", raw));

    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return Err(invalid()),
    };

    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

fn split_policies(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Vault client that keeps registered tokens and leases renewed.
///
/// Clones share the same renewal engine. Call [`VaultClient::start`] to run
/// scheduled renewals and [`VaultClient::stop`] before dropping the last clone.
#[derive(Clone)]
pub struct VaultClient {
    backend: Arc<dyn SecretsBackend>,
    scheduler: Arc<RenewalScheduler>,
    task_token_ttl: Duration,
    derive_policies: Vec<String>,
    derived_token_ttl: Duration,
}

impl VaultClient {
    pub fn from_env() -> Result<Self, VaultError> {
        VaultClientBuilder::new().build()
    }

    pub fn builder() -> VaultClientBuilder {
        VaultClientBuilder::new()
    }

    pub async fn start(&self) {
        self.scheduler.start().await;
    }

    pub async fn stop(&self) {
        self.scheduler.stop().await;
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler.is_running().await
    }

    /// Create a wrapped child token and return it unwrapped
    pub async fn derive_token(&self) -> Result<String, VaultError> {
        let token = self
            .backend
            .derive_token(&self.derive_policies, self.derived_token_ttl)
            .await?;
        tracing::info!(policies = ?self.derive_policies, "Derived vault token");
        Ok(token)
    }

    pub async fn read_secret(&self, token: &str, path: &str) -> Result<Secret, VaultError> {
        if token.is_empty() {
            return Err(VaultError::MissingToken);
        }
        if path.is_empty() {
            return Err(VaultError::MissingPath);
        }

        tracing::debug!(path = %path, "Reading secret");
        self.backend.read_secret(token, path).await
    }

    /// Renew `token` now and keep renewing it at half of each granted lifetime.
    ///
    /// The first renewal completes before this returns. Its failure, like any
    /// later one, is delivered through the returned handle.
    pub async fn renew_token(&self, token: &str) -> Result<RenewalHandle, VaultError> {
        if token.is_empty() {
            return Err(VaultError::MissingToken);
        }

        let (request, handle) = RenewalRequest::new(token, RenewalKind::Token, self.task_token_ttl);
        self.scheduler.renew(request).await;
        Ok(handle)
    }

    pub async fn stop_renew_token(&self, token: &str) -> Result<(), VaultError> {
        self.scheduler.untrack(token).await
    }

    /// Renew `lease_id` by `increment` now and keep it renewed.
    pub async fn renew_lease(
        &self,
        lease_id: &str,
        increment: Duration,
    ) -> Result<RenewalHandle, VaultError> {
        if lease_id.is_empty() {
            return Err(VaultError::MissingLeaseId);
        }
        if increment.as_secs() == 0 {
            return Err(VaultError::MissingLeaseDuration);
        }

        let (request, handle) = RenewalRequest::new(lease_id, RenewalKind::Lease, increment);
        self.scheduler.renew(request).await;
        Ok(handle)
    }

    pub async fn stop_renew_lease(&self, lease_id: &str) -> Result<(), VaultError> {
        self.scheduler.untrack(lease_id).await
    }

    pub async fn is_tracked(&self, id: &str) -> bool {
        self.scheduler.is_tracked(id).await
    }

    pub async fn tracked_count(&self) -> usize {
        self.scheduler.len().await
    }

    /// When `id` is next due, if it is tracked and scheduled
    pub async fn next_renewal(&self, id: &str) -> Option<Instant> {
        self.scheduler.next_renewal(id).await
    }
}
