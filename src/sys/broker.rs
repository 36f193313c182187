// src/sys/broker.rs

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::error::{scrub_tokens, BackendError};
use crate::sys::traits::{BrokerReply, TokenBroker};

/// Client for the broker's `/token` endpoint.
pub struct HttpBroker {
    http: Client,
    base_url: String,
}

impl HttpBroker {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, BackendError> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }
}

#[async_trait]
impl TokenBroker for HttpBroker {
    async fn request_wrapped_token(&self, task_id: &str) -> Result<BrokerReply, BackendError> {
        let response = self
            .http
            .post(format!("{}/token", self.base_url))
            .json(&json!({ "task_id": task_id }))
            .send()
            .await?;

        // A refusal is still a reply: the status code and body travel back as a denial
        // instead of a transport error.
        let status = response.status();
        let body = response.text().await?;
        let scrubbed = scrub_tokens(&body);

        let mut reply = match serde_json::from_str::<BrokerReply>(&body) {
            Ok(reply) if status.is_success() => reply,
            _ => BrokerReply { ok: false, token: None, body: String::new() },
        };
        reply.body = if scrubbed.is_empty() { format!("HTTP {}", status.as_u16()) } else { scrubbed };
        Ok(reply)
    }
}
