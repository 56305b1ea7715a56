use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Generic Vault API response envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Secret {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub lease_id: String,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: HashMap<String, serde_json::Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub auth: Option<SecretAuth>,
    #[serde(default)]
    pub wrap_info: Option<WrapInfo>,
}

/// Auth block returned by token create/renew/unwrap
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretAuth {
    #[serde(default)]
    pub client_token: String,
    #[serde(default)]
    pub accessor: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub policies: Vec<String>,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
}

/// Response-wrapping metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WrapInfo {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub accessor: String,
    #[serde(default)]
    pub ttl: u64,
    #[serde(default)]
    pub wrapped_accessor: String,
}

/// Body of `auth/token/create`
#[derive(Debug, Clone, Serialize)]
pub struct TokenCreateRequest {
    pub policies: Vec<String>,
    pub ttl: String,
    pub display_name: String,
    pub renewable: bool,
}

// Vault sends explicit nulls for empty maps and lists.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
