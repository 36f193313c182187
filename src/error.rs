// src/error.rs

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

/// A single exchange with the broker or the backend failed.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection refused, TLS failure, or the request-level timeout fired.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The remote answered with a non-success status. The body is already scrubbed.
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("undecodable response: {message}")]
    Decode { message: String },
}

impl BackendError {
    pub fn status(status: u16, body: &str) -> Self {
        Self::Status { status, body: scrub_tokens(body) }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode { message: message.into() }
    }
}

/// Every way the agent itself can fail. Workload exit codes are never errors.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("secret '{id}' declares unknown backend '{backend}'")]
    UnknownBackendKind { id: String, backend: String },

    #[error("secret '{id}' is missing required field '{field}'")]
    MissingField { id: String, field: String },

    #[error("response for secret '{id}' lacks field '{field}'")]
    MalformedResponse { id: String, field: String },

    #[error("broker refused to issue a wrapped token: {body}")]
    BootstrapDenied { body: String },

    #[error("backend rejected the wrapped token: {message}")]
    UnwrapFailed { message: String },

    #[error("session failed its self-check after unwrap: {message}")]
    AuthenticationFailed { message: String },

    #[error("session is not authenticated")]
    NotAuthenticated,

    #[error("failed to retrieve secret '{id}': {cause}")]
    RetrievalFailed {
        id: String,
        #[source]
        cause: BackendError,
    },

    #[error("secret '{id}' was never fetched")]
    Unfetched { id: String },

    #[error("failed to write credentials to {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn workload '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait on workload: {0}")]
    Wait(#[source] std::io::Error),
}

impl AgentError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn missing_field(id: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField { id: id.into(), field: field.into() }
    }

    pub fn malformed(id: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MalformedResponse { id: id.into(), field: field.into() }
    }

    pub fn write_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFailed { path: path.into(), source }
    }

    /// The lifecycle phase this error aborted, as reported in the fatal log line.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Config { .. } | Self::UnknownBackendKind { .. } | Self::MissingField { .. } => {
                "config"
            }
            Self::BootstrapDenied { .. }
            | Self::UnwrapFailed { .. }
            | Self::AuthenticationFailed { .. } => "bootstrap",
            Self::NotAuthenticated
            | Self::MalformedResponse { .. }
            | Self::RetrievalFailed { .. }
            | Self::Unfetched { .. }
            | Self::WriteFailed { .. } => "retrieval",
            Self::SpawnFailed { .. } | Self::Wait(_) => "workload",
        }
    }

    /// Exit-code class for agent-side failures, kept apart from the workload's own codes
    /// (sysexits.h values).
    pub fn exit_code(&self) -> u8 {
        match self.phase() {
            "config" => 78,
            "bootstrap" => 77,
            "retrieval" => 74,
            _ => 71,
        }
    }
}

static TOKEN_FIELDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"("(?:token|client_token|accessor|password|secret_key|security_token)"\s*:\s*)"[^"]*""#,
    )
    .expect("token scrubber pattern is valid")
});

/// 🛡️ Redacts token-bearing JSON string values before a body reaches a log or an error.
pub fn scrub_tokens(body: &str) -> String {
    TOKEN_FIELDS.replace_all(body, r#"$1"[REDACTED]""#).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubber_redacts_token_values() {
        let body = r#"{"ok": false, "token": "s.abc123", "auth": {"client_token":"s.xyz"}}"#;
        let scrubbed = scrub_tokens(body);
        assert!(!scrubbed.contains("s.abc123"));
        assert!(!scrubbed.contains("s.xyz"));
        assert!(scrubbed.contains(r#""token": "[REDACTED]""#));
        assert!(scrubbed.contains(r#""ok": false"#));
    }

    #[test]
    fn scrubber_leaves_plain_bodies_alone() {
        let body = r#"{"errors":["permission denied"]}"#;
        assert_eq!(scrub_tokens(body), body);
    }

    #[test]
    fn status_error_is_scrubbed_on_construction() {
        let err = BackendError::status(403, r#"{"password":"hunter2"}"#);
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn phases_map_to_distinct_exit_codes() {
        let config = AgentError::config("bad");
        let bootstrap = AgentError::BootstrapDenied { body: "{}".into() };
        let retrieval = AgentError::NotAuthenticated;
        let workload = AgentError::Wait(std::io::Error::other("gone"));

        assert_eq!((config.phase(), config.exit_code()), ("config", 78));
        assert_eq!((bootstrap.phase(), bootstrap.exit_code()), ("bootstrap", 77));
        assert_eq!((retrieval.phase(), retrieval.exit_code()), ("retrieval", 74));
        assert_eq!((workload.phase(), workload.exit_code()), ("workload", 71));
    }

    #[test]
    fn retrieval_failure_names_the_secret() {
        let err = AgentError::RetrievalFailed {
            id: "creds1".into(),
            cause: BackendError::status(404, "{}"),
        };
        let msg = err.to_string();
        assert!(msg.contains("creds1"));
        assert!(msg.contains("404"));
    }
}
