use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Vault not detected: VAULT_ADDR not set")]
    VaultNotDetected,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("missing token")]
    MissingToken,

    #[error("missing lease ID")]
    MissingLeaseId,

    #[error("missing lease duration")]
    MissingLeaseDuration,

    #[error("missing vault path")]
    MissingPath,

    #[error("Secret not found: {path}")]
    SecretNotFound { path: String },

    #[error("Vault client error ({status}): {message}")]
    ClientError { status: u16, message: String },

    #[error("Vault request error: {0}")]
    RequestError(String),

    #[error("entry {id} is already tracked")]
    AlreadyTracked { id: String },

    #[error("no entry tracked for {id}")]
    NotTracked { id: String },

    #[error("renewal of {id} failed: {source}")]
    RenewalFailed {
        id: String,
        #[source]
        source: Box<VaultError>,
    },
}

impl From<reqwest::Error> for VaultError {
    fn from(e: reqwest::Error) -> Self {
        VaultError::RequestError(e.to_string())
    }
}
