// src/sys/catalog.rs

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};
use crate::sys::secrets::Credential;
use crate::sys::traits::VaultResponse;

/// Secret id → Secret. Iteration follows first declaration; a redeclared id keeps its slot.
pub type Catalog = IndexMap<String, Secret>;

/// Flat, backend-agnostic rendering of a secret.
pub type Printable = Map<String, Value>;

// ==============================================================================
// 1. Backend Registry
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Generic,
    Token,
    UnwrappedToken,
    Database,
    PostgreSql,
    RabbitMq,
    Aws,
}

/// Catalog tag → variant. Adding a backend is one row here plus its arms below.
const REGISTRY: &[(&str, BackendKind)] = &[
    ("generic", BackendKind::Generic),
    ("token", BackendKind::Token),
    ("unwrapped_token", BackendKind::UnwrappedToken),
    ("database", BackendKind::Database),
    ("postgresql", BackendKind::PostgreSql),
    ("rabbitmq", BackendKind::RabbitMq),
    ("aws", BackendKind::Aws),
];

impl BackendKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        REGISTRY.iter().find(|(name, _)| *name == tag).map(|(_, kind)| *kind)
    }

    pub fn tag(self) -> &'static str {
        REGISTRY.iter().find(|(_, kind)| *kind == self).map_or("unknown", |(name, _)| *name)
    }

    /// Creation parameters the declaration must carry for this variant.
    fn required_params(self) -> &'static [&'static str] {
        match self {
            Self::Generic | Self::Token | Self::UnwrappedToken => &[],
            Self::Database => &["schema"],
            Self::PostgreSql => &["schema", "set_role"],
            Self::RabbitMq => &["vhost"],
            Self::Aws => &["region"],
        }
    }

    fn empty_payload(self) -> Payload {
        match self {
            Self::Generic => Payload::Generic { value: None },
            Self::Token | Self::UnwrappedToken => Payload::Token { token: None },
            Self::Database | Self::PostgreSql | Self::RabbitMq => {
                Payload::Login { username: None, password: None }
            }
            Self::Aws => Payload::Aws { access_key: None, secret_key: None, security_token: None },
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ==============================================================================
// 2. Secret Model
// ==============================================================================

/// Values fetched from the backend, shaped per variant family.
#[derive(Debug, Clone)]
enum Payload {
    /// Whole `data` object, kept as serialized JSON so it can live in a `Credential`.
    Generic { value: Option<Credential> },
    Token { token: Option<Credential> },
    Login { username: Option<Credential>, password: Option<Credential> },
    Aws {
        access_key: Option<Credential>,
        secret_key: Option<Credential>,
        security_token: Option<Credential>,
    },
}

#[derive(Debug, Clone)]
pub struct Secret {
    pub id: String,
    pub backend: BackendKind,
    pub endpoint: Option<String>,
    pub vault_path: String,
    pub policy: Option<String>,
    pub lease_id: Option<String>,
    pub lease_duration: Option<u64>,
    pub renewable: bool,
    pub last_renewed: Option<DateTime<Utc>>,
    /// Variant creation parameters (schema, set_role, vhost, region), in registry order.
    params: Vec<(&'static str, String)>,
    payload: Payload,
}

impl Secret {
    /// A bare secret of `backend` kind; nothing is populated until creation params and a
    /// retrieval response are applied.
    pub fn new(id: impl Into<String>, backend: BackendKind, vault_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            backend,
            endpoint: None,
            vault_path: vault_path.into(),
            policy: None,
            lease_id: None,
            lease_duration: None,
            renewable: false,
            last_renewed: None,
            params: Vec::new(),
            payload: backend.empty_payload(),
        }
    }

    /// One-time injection of the declaration's shared and variant-specific fields.
    pub fn apply_creation_params(&mut self, params: &Map<String, Value>) -> Result<()> {
        self.endpoint = optional_str(params, "endpoint");
        self.policy = optional_str(params, "policy");

        let mut injected = Vec::new();
        for field in self.backend.required_params() {
            let value = optional_str(params, field)
                .ok_or_else(|| AgentError::missing_field(&self.id, *field))?;
            injected.push((*field, value));
        }
        self.params = injected;
        Ok(())
    }

    /// Maps a backend response into lease fields and the variant payload.
    pub fn apply_retrieval_response(&mut self, response: &VaultResponse) -> Result<()> {
        let id = self.id.clone();
        let required = |field: &str| -> Result<Credential> {
            response
                .data_str(field)
                .map(Credential::from)
                .ok_or_else(|| AgentError::malformed(&id, format!("data.{field}")))
        };

        let payload = match self.backend {
            BackendKind::Generic => {
                let data = response
                    .data
                    .as_ref()
                    .ok_or_else(|| AgentError::malformed(&id, "data"))?;
                Payload::Generic { value: Some(Credential::new(data.to_string())) }
            }
            BackendKind::Token => Payload::Token { token: Some(required("token")?) },
            BackendKind::UnwrappedToken => {
                return self.apply_unwrap_response(response);
            }
            BackendKind::Database | BackendKind::PostgreSql | BackendKind::RabbitMq => {
                Payload::Login {
                    username: Some(required("username")?),
                    password: Some(required("password")?),
                }
            }
            BackendKind::Aws => Payload::Aws {
                access_key: Some(required("access_key")?),
                secret_key: Some(required("secret_key")?),
                security_token: response.data_str("security_token").map(Credential::from),
            },
        };

        self.payload = payload;
        self.lease_id = Some(response.lease_id.clone().unwrap_or_default());
        self.lease_duration = Some(response.lease_duration.unwrap_or_default());
        self.renewable = response.renewable.unwrap_or(false);
        Ok(())
    }

    /// Unwrap responses carry the session token either under `auth` or directly in
    /// `data.token` with top-level lease metadata, depending on backend version.
    fn apply_unwrap_response(&mut self, response: &VaultResponse) -> Result<()> {
        let (token, lease_duration, renewable, accessor) = match &response.auth {
            Some(auth) => (
                Credential::from(auth.client_token.as_str()),
                auth.lease_duration.or(response.lease_duration),
                auth.renewable.or(response.renewable),
                auth.accessor.clone(),
            ),
            None => (
                response
                    .data_str("token")
                    .map(Credential::from)
                    .ok_or_else(|| AgentError::malformed(&self.id, "auth.client_token"))?,
                response.lease_duration,
                response.renewable,
                None,
            ),
        };
        if token.is_empty() {
            return Err(AgentError::malformed(&self.id, "auth.client_token"));
        }

        self.payload = Payload::Token { token: Some(token) };
        self.lease_id = Some(accessor.or_else(|| response.lease_id.clone()).unwrap_or_default());
        self.lease_duration = Some(lease_duration.unwrap_or_default());
        self.renewable = renewable.unwrap_or(false);
        Ok(())
    }

    /// Records a successful renewal.
    pub fn update_lease(&mut self, lease_id: Option<String>, lease_duration: u64) {
        if let Some(lease_id) = lease_id.filter(|l| !l.is_empty()) {
            self.lease_id = Some(lease_id);
        }
        self.lease_duration = Some(lease_duration);
        self.last_renewed = Some(Utc::now());
    }

    /// A secret with no lease id has never been fetched.
    pub fn is_fetched(&self) -> bool {
        self.lease_id.is_some()
    }

    /// Renewal needs a renewable grant and an actual lease id to name it by.
    pub fn needs_renewal(&self) -> bool {
        self.renewable && self.lease_id.as_deref().is_some_and(|l| !l.is_empty())
    }

    /// Token value for token-bearing variants.
    pub fn token(&self) -> Option<&Credential> {
        match &self.payload {
            Payload::Token { token } => token.as_ref(),
            _ => None,
        }
    }

    fn param(&self, field: &str) -> Option<&str> {
        self.params.iter().find(|(name, _)| *name == field).map(|(_, value)| value.as_str())
    }

    /// Shared fields plus variant payload, omitting anything still unset.
    pub fn to_printable(&self) -> Printable {
        let mut out = Map::new();
        out.insert("id".into(), Value::from(self.id.clone()));
        out.insert("backend".into(), Value::from(self.backend.tag()));
        put(&mut out, "endpoint", self.endpoint.clone().map(Value::from));
        out.insert("vault_path".into(), Value::from(self.vault_path.clone()));
        put(&mut out, "policy", self.policy.clone().map(Value::from));

        if self.is_fetched() {
            out.insert("renewable".into(), Value::from(self.renewable));
            put(&mut out, "lease_id", self.lease_id.clone().map(Value::from));
            put(&mut out, "lease_duration", self.lease_duration.map(Value::from));
        }
        put(&mut out, "last_renewed", self.last_renewed.map(|t| Value::from(t.to_rfc3339())));

        // Only the role survives into output; schema, vhost and region are creation state.
        if self.backend == BackendKind::PostgreSql {
            put(&mut out, "set_role", self.param("set_role").map(Value::from));
        }

        match &self.payload {
            Payload::Generic { value } => {
                let parsed = value.as_ref().map(|v| {
                    v.use_secret(|raw| {
                        serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw))
                    })
                });
                put(&mut out, "secret_value", parsed);
            }
            Payload::Token { token } => put(&mut out, "token_value", exposed(token)),
            Payload::Login { username, password } => {
                put(&mut out, "username", exposed(username));
                put(&mut out, "password", exposed(password));
            }
            Payload::Aws { access_key, secret_key, security_token } => {
                put(&mut out, "access_key", exposed(access_key));
                put(&mut out, "secret_key", exposed(secret_key));
                put(&mut out, "security_token", exposed(security_token));
            }
        }
        out
    }
}

fn optional_str(params: &Map<String, Value>, field: &str) -> Option<String> {
    params.get(field).and_then(Value::as_str).map(str::to_owned)
}

fn exposed(cred: &Option<Credential>) -> Option<Value> {
    cred.as_ref().map(|c| Value::from(c.expose()))
}

fn put(out: &mut Printable, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        out.insert(key.into(), value);
    }
}

// ==============================================================================
// 3. Catalog Parsing
// ==============================================================================

/// One entry of the secrets file.
#[derive(Debug, Clone, Deserialize)]
pub struct Declaration {
    pub id: String,
    pub backend: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Builds the catalog, failing on the first unregistered backend or missing field.
pub fn parse_catalog(declarations: Vec<Declaration>) -> Result<Catalog> {
    let mut catalog = Catalog::new();
    for decl in declarations {
        let kind = BackendKind::from_tag(&decl.backend).ok_or_else(|| {
            AgentError::UnknownBackendKind { id: decl.id.clone(), backend: decl.backend.clone() }
        })?;
        let vault_path = optional_str(&decl.fields, "vault_path")
            .ok_or_else(|| AgentError::missing_field(&decl.id, "vault_path"))?;

        let mut secret = Secret::new(decl.id.clone(), kind, vault_path);
        secret.apply_creation_params(&decl.fields)?;

        if catalog.insert(decl.id.clone(), secret).is_some() {
            tracing::warn!(secret_id = %decl.id, "Duplicate secret id in catalog; last declaration wins");
        }
    }
    Ok(catalog)
}

/// Reads and parses a JSON array of declarations from disk.
pub fn load_catalog(path: &Path) -> Result<Catalog> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AgentError::config(format!("cannot read secrets file {}: {}", path.display(), e))
    })?;
    let declarations: Vec<Declaration> = serde_json::from_str(&raw).map_err(|e| {
        AgentError::config(format!("invalid secrets file {}: {}", path.display(), e))
    })?;
    parse_catalog(declarations)
}
