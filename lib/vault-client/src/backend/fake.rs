use super::SecretsBackend;
use crate::VaultError;
use crate::models::Secret;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// In-memory backend that records every renewal call
pub(crate) struct FakeBackend {
    default_lifetime: Duration,
    lifetimes: Mutex<HashMap<String, Duration>>,
    failing: AtomicBool,
    calls: Mutex<Vec<String>>,
    called: Notify,
}

impl FakeBackend {
    pub(crate) fn new(default_lifetime: Duration) -> Self {
        Self {
            default_lifetime,
            lifetimes: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            called: Notify::new(),
        }
    }

    pub(crate) fn with_lifetime(self, id: &str, lifetime: Duration) -> Self {
        self.lifetimes.lock().unwrap().insert(id.to_string(), lifetime);
        self
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_for(&self, id: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == id).count()
    }

    /// Wait until `id` has been renewed at least `n` times
    pub(crate) async fn wait_for_calls(&self, id: &str, n: usize) {
        loop {
            let notified = self.called.notified();
            if self.calls_for(id) >= n {
                return;
            }
            notified.await;
        }
    }

    fn renew(&self, id: &str) -> Result<Duration, VaultError> {
        self.calls.lock().unwrap().push(id.to_string());
        self.called.notify_waiters();

        if self.failing.load(Ordering::SeqCst) {
            return Err(VaultError::ClientError {
                status: 503,
                message: "vault is sealed".to_string(),
            });
        }

        let lifetimes = self.lifetimes.lock().unwrap();
        Ok(lifetimes.get(id).copied().unwrap_or(self.default_lifetime))
    }
}

#[async_trait]
impl SecretsBackend for FakeBackend {
    async fn renew_token(&self, token: &str, _increment: Duration) -> Result<Duration, VaultError> {
        self.renew(token)
    }

    async fn renew_lease(
        &self,
        lease_id: &str,
        _increment: Duration,
    ) -> Result<Duration, VaultError> {
        self.renew(lease_id)
    }

    async fn derive_token(&self, policies: &[String], _ttl: Duration) -> Result<String, VaultError> {
        Ok(format!("s.derived-{}", policies.join("-")))
    }

    async fn read_secret(&self, token: &str, path: &str) -> Result<Secret, VaultError> {
        let mut data = HashMap::new();
        data.insert("path".to_string(), serde_json::json!(path));
        data.insert("token".to_string(), serde_json::json!(token));
        Ok(Secret {
            data,
            ..Secret::default()
        })
    }
}
