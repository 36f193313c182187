//! Fake backend and broker for integration tests.
//!
//! Both are wiremock servers. The fake backend tracks revocation so a revoked session
//! token stops passing `lookup-self`, like the real thing.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use vaultkeeper::config::{AgentConfig, LogFormat};
use vaultkeeper::sys::catalog::{parse_catalog, Catalog, Declaration};

pub const TASK_ID: &str = "purple-rain-486-ab24134bed3423f124937";
pub const WRAPPED_TOKEN: &str = "10000000-1000-1000-1000-100000000000";
pub const SESSION_TOKEN: &str = "00000000-0000-0000-0000-000000000001";

pub const DB_PATH: &str = "database/creds/postgresql_myschema_readonly";
pub const DB_LEASE: &str = "database/creds/postgresql_myschema_readonly/lease-id1";
pub const MQ_PATH: &str = "rabbitmq/creds/jobs";
pub const MQ_LEASE: &str = "rabbitmq/creds/jobs/lease-id2";
pub const STATIC_PATH: &str = "secret/static";

fn token_of(req: &Request) -> Option<&str> {
    req.headers.get("x-vault-token").and_then(|v| v.to_str().ok())
}

fn vault_error(status: u16, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({ "errors": [message] }))
}

pub struct FakeVault {
    pub server: MockServer,
    revoked: Arc<AtomicBool>,
}

impl FakeVault {
    /// Starts a backend that knows one wrapped token and three secret paths. Tests
    /// override individual routes by mounting mocks with a higher priority.
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let revoked = Arc::new(AtomicBool::new(false));

        Mock::given(method("POST"))
            .and(path("/v1/sys/wrapping/unwrap"))
            .respond_with(|req: &Request| match token_of(req) {
                Some(WRAPPED_TOKEN) => ResponseTemplate::new(200).set_body_json(json!({
                    "request_id": "",
                    "lease_id": "",
                    "lease_duration": 0,
                    "renewable": false,
                    "data": null,
                    "auth": {
                        "client_token": SESSION_TOKEN,
                        "accessor": "accessor-1",
                        "policies": ["default", "django-consumer"],
                        "lease_duration": 2592000,
                        "renewable": true
                    }
                })),
                _ => vault_error(400, "wrapping token is not valid or does not exist"),
            })
            .mount(&server)
            .await;

        let lookup_revoked = revoked.clone();
        Mock::given(method("GET"))
            .and(path("/v1/auth/token/lookup-self"))
            .respond_with(move |req: &Request| {
                if token_of(req) == Some(SESSION_TOKEN) && !lookup_revoked.load(Ordering::SeqCst) {
                    ResponseTemplate::new(200)
                        .set_body_json(json!({ "data": { "policies": ["default", "django-consumer"] } }))
                } else {
                    vault_error(403, "permission denied")
                }
            })
            .mount(&server)
            .await;

        let revoke_flag = revoked.clone();
        Mock::given(method("POST"))
            .and(path("/v1/auth/token/revoke-self"))
            .respond_with(move |req: &Request| {
                if token_of(req) == Some(SESSION_TOKEN) && !revoke_flag.swap(true, Ordering::SeqCst) {
                    ResponseTemplate::new(204)
                } else {
                    vault_error(403, "permission denied")
                }
            })
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/auth/token/renew-self"))
            .and(header("x-vault-token", SESSION_TOKEN))
            .respond_with(|req: &Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);
                let increment = body["increment"].as_u64().unwrap_or(0);
                ResponseTemplate::new(200).set_body_json(json!({
                    "auth": {
                        "client_token": SESSION_TOKEN,
                        "lease_duration": increment,
                        "renewable": true
                    }
                }))
            })
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/v1/sys/leases/renew"))
            .and(header("x-vault-token", SESSION_TOKEN))
            .respond_with(|req: &Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);
                ResponseTemplate::new(200).set_body_json(json!({
                    "lease_id": body["lease_id"],
                    "lease_duration": body["increment"].as_u64().unwrap_or(0) + 30,
                    "renewable": true
                }))
            })
            .mount(&server)
            .await;

        let secrets = [
            (DB_PATH, json!({
                "lease_id": DB_LEASE, "lease_duration": 100, "renewable": true,
                "data": { "username": "testuser1", "password": "testpass1" }
            })),
            (MQ_PATH, json!({
                "lease_id": MQ_LEASE, "lease_duration": 300, "renewable": true,
                "data": { "username": "mquser", "password": "mqpass" }
            })),
            (STATIC_PATH, json!({
                "lease_id": "", "lease_duration": 2764800, "renewable": false,
                "data": { "api_key": "static-key" }
            })),
        ];
        for (secret_path, body) in secrets {
            Mock::given(method("GET"))
                .and(path(format!("/v1/{}", secret_path)))
                .and(header("x-vault-token", SESSION_TOKEN))
                .respond_with(ResponseTemplate::new(200).set_body_json(body))
                .mount(&server)
                .await;
        }

        Self { server, revoked }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    /// Requests received for `method` + `path`.
    pub async fn count(&self, verb: &str, route: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == verb && r.url.path() == route)
            .count()
    }

    /// Lease-renewal requests that named `lease_id`.
    pub async fn lease_renewals(&self, lease_id: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/v1/sys/leases/renew")
            .filter(|r| {
                serde_json::from_slice::<Value>(&r.body)
                    .map(|b| b["lease_id"] == lease_id)
                    .unwrap_or(false)
            })
            .count()
    }
}

pub struct FakeBroker {
    pub server: MockServer,
}

impl FakeBroker {
    /// Authorises task ids under the `purple-rain-486` application, like the broker's
    /// policy table.
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(|req: &Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);
                let authorised = body["task_id"]
                    .as_str()
                    .is_some_and(|id| id.starts_with("purple-rain-486"));
                if authorised {
                    ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "token": WRAPPED_TOKEN }))
                } else {
                    ResponseTemplate::new(401)
                }
            })
            .mount(&server)
            .await;
        Self { server }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }
}

pub fn catalog(declarations: Value) -> Catalog {
    let decls: Vec<Declaration> = serde_json::from_value(declarations).expect("declarations");
    parse_catalog(decls).expect("catalog")
}

/// Database (renewable), RabbitMQ (renewable) and a static generic secret (not renewable).
pub fn standard_catalog() -> Catalog {
    catalog(json!([
        {
            "id": "creds1",
            "backend": "database",
            "endpoint": "https://test-postgres-instance.net",
            "vault_path": DB_PATH,
            "schema": "myschema",
            "policy": "read"
        },
        { "id": "queue", "backend": "rabbitmq", "vault_path": MQ_PATH, "vhost": "/jobs" },
        { "id": "static", "backend": "generic", "vault_path": STATIC_PATH },
    ]))
}

pub fn sh(script: &str) -> Vec<String> {
    vec!["/bin/sh".into(), "-c".into(), script.into()]
}

pub fn config(
    vault: &FakeVault,
    broker: &FakeBroker,
    output: &Path,
    entry_cmd: Vec<String>,
    refresh_interval: Duration,
) -> AgentConfig {
    AgentConfig {
        task_id: TASK_ID.into(),
        app_name: Some("purple-rain-486".into()),
        vault_addr: vault.uri(),
        broker_addr: broker.uri(),
        secrets_path: output.with_file_name("secrets.json"),
        credential_path: output.to_path_buf(),
        working_directory: output.parent().map(Path::to_path_buf),
        entry_cmd,
        refresh_interval,
        renewal_grace: Duration::from_secs(1),
        request_timeout: Duration::from_secs(5),
        log_format: LogFormat::Text,
    }
}
