// src/sys/bootstrap.rs

use crate::error::{AgentError, Result};
use crate::sys::catalog::{BackendKind, Secret};
use crate::sys::secrets::Credential;
use crate::sys::traits::{SecretBackend, TokenBroker};

/// The agent's own authenticated identity. Exactly one per run; revoked once at shutdown.
#[derive(Debug)]
pub struct Session {
    secret: Secret,
    token: Credential,
}

impl Session {
    /// Wraps an already-populated unwrapped-token secret.
    pub fn from_secret(secret: Secret) -> Option<Self> {
        let token = secret.token()?.clone();
        Some(Self { secret, token })
    }

    pub fn token(&self) -> &Credential {
        &self.token
    }

    pub fn lease_duration(&self) -> u64 {
        self.secret.lease_duration.unwrap_or_default()
    }

    pub fn renewable(&self) -> bool {
        self.secret.renewable
    }

    pub fn update_lease(&mut self, lease_duration: u64) {
        self.secret.update_lease(None, lease_duration);
    }
}

/// Presents the task identity to the broker and returns the single-use wrapped token.
pub async fn fetch_wrapped_token(broker: &dyn TokenBroker, task_id: &str) -> Result<Credential> {
    let reply = broker
        .request_wrapped_token(task_id)
        .await
        .map_err(|e| AgentError::BootstrapDenied { body: e.to_string() })?;

    match reply.token {
        Some(token) if reply.ok && !token.is_empty() => Ok(Credential::new(token)),
        _ => Err(AgentError::BootstrapDenied { body: reply.body }),
    }
}

/// Unwrap failed. When the failure came from the post-unwrap self-check, the token may
/// still be live at the backend and rides along so the caller can revoke it.
#[derive(Debug)]
pub struct UnwrapFailure {
    pub error: AgentError,
    pub session: Option<Session>,
}

impl UnwrapFailure {
    fn rejected(message: impl Into<String>) -> Self {
        Self { error: AgentError::UnwrapFailed { message: message.into() }, session: None }
    }
}

/// Exchanges the wrapped token for a live session and proves it with a self-lookup.
pub async fn unwrap_token(
    backend: &dyn SecretBackend,
    wrapped: &Credential,
) -> std::result::Result<Session, UnwrapFailure> {
    let response = backend
        .unwrap(wrapped)
        .await
        .map_err(|e| UnwrapFailure::rejected(e.to_string()))?;

    let mut secret = Secret::new("vault_token", BackendKind::UnwrappedToken, "sys/wrapping/unwrap");
    secret
        .apply_retrieval_response(&response)
        .map_err(|e| UnwrapFailure::rejected(e.to_string()))?;

    let session = Session::from_secret(secret)
        .ok_or_else(|| UnwrapFailure::rejected("unwrap yielded no client token"))?;

    if let Err(e) = backend.lookup_self(session.token()).await {
        return Err(UnwrapFailure {
            error: AgentError::AuthenticationFailed { message: e.to_string() },
            session: Some(session),
        });
    }
    Ok(session)
}
