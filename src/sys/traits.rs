// src/sys/traits.rs

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::BackendError;
use crate::sys::secrets::Credential;

// ==============================================================================
// 1. Wire Shapes (Backend & Broker)
// ==============================================================================

/// Envelope returned by every Vault v1 endpoint the agent talks to. All fields are
/// optional because unwrap, read, renew and lookup each fill a different subset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VaultResponse {
    #[serde(default)]
    pub lease_id: Option<String>,
    #[serde(default)]
    pub lease_duration: Option<u64>,
    #[serde(default)]
    pub renewable: Option<bool>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub auth: Option<AuthInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthInfo {
    pub client_token: String,
    #[serde(default)]
    pub accessor: Option<String>,
    #[serde(default)]
    pub lease_duration: Option<u64>,
    #[serde(default)]
    pub renewable: Option<bool>,
}

impl VaultResponse {
    /// A string field under `data`, if present.
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.as_ref()?.get(field)?.as_str()
    }
}

/// Broker reply to a token request. Anything but `ok == true` with a token is a denial.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerReply {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub token: Option<String>,
    /// Raw body as received, already scrubbed; carried into `BootstrapDenied`.
    #[serde(skip)]
    pub body: String,
}

// ==============================================================================
// 2. Broker Abstraction (Bootstrap Trust)
// ==============================================================================

#[async_trait]
pub trait TokenBroker: Send + Sync {
    /// Presents the scheduler task identity and returns the broker's verdict.
    async fn request_wrapped_token(&self, task_id: &str) -> Result<BrokerReply, BackendError>;
}

// ==============================================================================
// 3. Secret Backend Abstraction (Session-Scoped Calls)
// ==============================================================================

/// Stateless view of the backend: every authenticated call takes the session token
/// explicitly so the supervisor stays the only owner of the session.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Presents the single-use wrapped token as the bearer credential.
    async fn unwrap(&self, wrapped: &Credential) -> Result<VaultResponse, BackendError>;

    async fn lookup_self(&self, token: &Credential) -> Result<VaultResponse, BackendError>;

    async fn read(&self, token: &Credential, path: &str) -> Result<VaultResponse, BackendError>;

    async fn renew_lease(
        &self,
        token: &Credential,
        lease_id: &str,
        increment: u64,
    ) -> Result<VaultResponse, BackendError>;

    async fn renew_self(
        &self,
        token: &Credential,
        increment: u64,
    ) -> Result<VaultResponse, BackendError>;

    async fn revoke_self(&self, token: &Credential) -> Result<(), BackendError>;
}
