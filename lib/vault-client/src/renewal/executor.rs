use super::{RenewalKind, RenewalRequest};
use crate::VaultError;
use crate::backend::SecretsBackend;
use std::time::Duration;
use tokio::time::Instant;

/// Renew one item and work out when it should be renewed again.
///
/// A zero lifetime means the credential does not expire, so nothing is scheduled.
pub(crate) async fn renew(
    backend: &dyn SecretsBackend,
    request: &RenewalRequest,
) -> Result<Option<Instant>, VaultError> {
    let result = match request.kind {
        RenewalKind::Token => backend.renew_token(&request.id, request.increment).await,
        RenewalKind::Lease => backend.renew_lease(&request.id, request.increment).await,
    };

    let lifetime = result.map_err(|e| VaultError::RenewalFailed {
        id: request.log_id(),
        source: Box::new(e),
    })?;

    Ok(next_renewal_at(Instant::now(), lifetime))
}

/// Next renewal lands at half of the granted lifetime. Lifetimes too large to
/// place on the clock are left unscheduled like zero ones.
pub(crate) fn next_renewal_at(now: Instant, lifetime: Duration) -> Option<Instant> {
    if lifetime.is_zero() {
        return None;
    }
    now.checked_add(lifetime / 2)
}
