// src/sys/vault.rs

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::json;

use crate::error::BackendError;
use crate::sys::secrets::Credential;
use crate::sys::traits::{SecretBackend, VaultResponse};

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Vault v1 HTTP API over rustls.
pub struct HttpVaultClient {
    http: Client,
    base_url: String,
}

impl HttpVaultClient {
    /// `request_timeout` bounds every call so a hung backend cannot stall the renewal loop.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, BackendError> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }

    fn request(&self, method: Method, path: &str, token: &Credential) -> RequestBuilder {
        let url = format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'));
        token.use_secret(|t| self.http.request(method, url).header(TOKEN_HEADER, t))
    }

    async fn expect_success(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::status(status.as_u16(), &body))
    }

    async fn send_json(request: RequestBuilder) -> Result<VaultResponse, BackendError> {
        let response = Self::expect_success(request.send().await?).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(VaultResponse::default());
        }
        serde_json::from_slice(&bytes).map_err(|e| BackendError::decode(e.to_string()))
    }
}

#[async_trait]
impl SecretBackend for HttpVaultClient {
    async fn unwrap(&self, wrapped: &Credential) -> Result<VaultResponse, BackendError> {
        Self::send_json(self.request(Method::POST, "sys/wrapping/unwrap", wrapped)).await
    }

    async fn lookup_self(&self, token: &Credential) -> Result<VaultResponse, BackendError> {
        Self::send_json(self.request(Method::GET, "auth/token/lookup-self", token)).await
    }

    async fn read(&self, token: &Credential, path: &str) -> Result<VaultResponse, BackendError> {
        Self::send_json(self.request(Method::GET, path, token)).await
    }

    async fn renew_lease(
        &self,
        token: &Credential,
        lease_id: &str,
        increment: u64,
    ) -> Result<VaultResponse, BackendError> {
        let body = json!({ "lease_id": lease_id, "increment": increment });
        Self::send_json(self.request(Method::PUT, "sys/leases/renew", token).json(&body)).await
    }

    async fn renew_self(
        &self,
        token: &Credential,
        increment: u64,
    ) -> Result<VaultResponse, BackendError> {
        let body = json!({ "increment": increment });
        Self::send_json(self.request(Method::POST, "auth/token/renew-self", token).json(&body))
            .await
    }

    async fn revoke_self(&self, token: &Credential) -> Result<(), BackendError> {
        let response = self.request(Method::POST, "auth/token/revoke-self", token).send().await?;
        Self::expect_success(response).await?;
        Ok(())
    }
}
