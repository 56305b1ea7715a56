//! Background renewal of tokens and leases.
//!
//! Every tracked item lives in an indexed min-heap keyed by its next renewal
//! instant. A single loop sleeps until the earliest instant, renews that item and
//! reschedules it at half of the lifetime the backend granted.

mod executor;
mod heap;
mod scheduler;

pub(crate) use scheduler::RenewalScheduler;

use crate::VaultError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalKind {
    Token,
    Lease,
}

impl fmt::Display for RenewalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenewalKind::Token => f.write_str("token"),
            RenewalKind::Lease => f.write_str("lease"),
        }
    }
}

/// A single item to keep alive, plus the channel its first failure goes to
pub(crate) struct RenewalRequest {
    pub(crate) id: String,
    pub(crate) kind: RenewalKind,
    pub(crate) increment: Duration,
    failure_tx: Option<oneshot::Sender<VaultError>>,
}

impl RenewalRequest {
    pub(crate) fn new(
        id: impl Into<String>,
        kind: RenewalKind,
        increment: Duration,
    ) -> (Self, RenewalHandle) {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        let request = Self {
            id: id.clone(),
            kind,
            increment,
            failure_tx: Some(tx),
        };
        (request, RenewalHandle { id, rx })
    }

    /// Hand the error to the registering caller. Only the first failure is
    /// delivered; returns false when it was swallowed.
    pub(crate) fn report_failure(&mut self, err: VaultError) -> bool {
        match self.failure_tx.take() {
            Some(tx) => tx.send(err).is_ok(),
            None => false,
        }
    }

    /// Identifier safe to put in logs and errors
    pub(crate) fn log_id(&self) -> String {
        match self.kind {
            RenewalKind::Lease => self.id.clone(),
            RenewalKind::Token => redact(&self.id),
        }
    }
}

fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{}***", prefix)
}

/// Receives the first renewal failure of a registered token or lease.
///
/// Resolves to `Some(err)` when a renewal fails, and to `None` once the
/// registration can no longer fail: tracking was stopped, the same id was
/// registered again (the newer handle takes over) or the client was dropped.
/// While renewals keep succeeding the future stays pending, so callers that
/// await it should apply their own timeout.
#[derive(Debug)]
pub struct RenewalHandle {
    id: String,
    rx: oneshot::Receiver<VaultError>,
}

impl RenewalHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Non-blocking check for a delivered failure
    pub fn try_failure(&mut self) -> Option<VaultError> {
        self.rx.try_recv().ok()
    }
}

impl Future for RenewalHandle {
    type Output = Option<VaultError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}
