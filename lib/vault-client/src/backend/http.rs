use super::SecretsBackend;
use crate::VaultError;
use crate::models::{Secret, TokenCreateRequest};
use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use std::time::Duration;

const TOKEN_HEADER: &str = "X-Vault-Token";
const WRAP_TTL_HEADER: &str = "X-Vault-Wrap-TTL";
const DERIVE_WRAP_TTL: &str = "60s";
const DERIVED_DISPLAY_NAME: &str = "derived-for-task";

#[derive(Serialize)]
struct TokenRenewRequest<'a> {
    token: &'a str,
    increment: u64,
}

#[derive(Serialize)]
struct LeaseRenewRequest<'a> {
    lease_id: &'a str,
    increment: u64,
}

/// Vault HTTP API backend, authenticated with a root (periodic) token
pub struct HttpBackend {
    base_url: String,
    token: String,
    application_name: Option<String>,
    http: reqwest::Client,
}

impl HttpBackend {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, VaultError> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            application_name: None,
            http,
        })
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    fn request(&self, method: Method, path: &str, token: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self.http.request(method, url).header(TOKEN_HEADER, token);

        if let Some(ref app_name) = self.application_name {
            request = request.header("User-Agent", app_name);
        }

        request
    }

    async fn send(request: reqwest::RequestBuilder) -> Result<Secret, VaultError> {
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(VaultError::ClientError {
                status,
                message: body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| VaultError::RequestError(format!("Invalid response: {}", e)))
    }
}

#[async_trait]
impl SecretsBackend for HttpBackend {
    async fn renew_token(&self, token: &str, increment: Duration) -> Result<Duration, VaultError> {
        let request = self
            .request(Method::POST, "auth/token/renew", &self.token)
            .json(&TokenRenewRequest {
                token,
                increment: increment.as_secs(),
            });

        let auth = Self::send(request).await?.auth.ok_or_else(|| {
            VaultError::RequestError("failed to renew the vault token: no auth data".to_string())
        })?;

        Ok(Duration::from_secs(auth.lease_duration))
    }

    async fn renew_lease(
        &self,
        lease_id: &str,
        increment: Duration,
    ) -> Result<Duration, VaultError> {
        let request = self
            .request(Method::PUT, "sys/leases/renew", &self.token)
            .json(&LeaseRenewRequest {
                lease_id,
                increment: increment.as_secs(),
            });

        let secret = Self::send(request).await?;
        Ok(Duration::from_secs(secret.lease_duration))
    }

    async fn derive_token(&self, policies: &[String], ttl: Duration) -> Result<String, VaultError> {
        let request = self
            .request(Method::POST, "auth/token/create", &self.token)
            .header(WRAP_TTL_HEADER, DERIVE_WRAP_TTL)
            .json(&TokenCreateRequest {
                policies: policies.to_vec(),
                ttl: format!("{}s", ttl.as_secs()),
                display_name: DERIVED_DISPLAY_NAME.to_string(),
                renewable: true,
            });

        let wrapped = Self::send(request)
            .await?
            .wrap_info
            .filter(|w| !w.token.is_empty() && !w.wrapped_accessor.is_empty())
            .ok_or_else(|| {
                VaultError::RequestError("failed to derive a wrapped vault token".to_string())
            })?;

        let unwrapped = Self::send(self.request(Method::POST, "sys/wrapping/unwrap", &wrapped.token))
            .await?
            .auth
            .map(|auth| auth.client_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| VaultError::RequestError("failed to unwrap the token".to_string()))?;

        tracing::debug!(accessor = %wrapped.wrapped_accessor, "Derived wrapped token");
        Ok(unwrapped)
    }

    async fn read_secret(&self, token: &str, path: &str) -> Result<Secret, VaultError> {
        match Self::send(self.request(Method::GET, path, token)).await {
            Err(VaultError::ClientError { status: 404, .. }) => Err(VaultError::SecretNotFound {
                path: path.to_string(),
            }),
            other => other,
        }
    }
}
