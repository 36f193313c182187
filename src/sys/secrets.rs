// src/sys/secrets.rs

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

/// Credential is the in-memory home of every token and payload value the agent handles:
/// the wrapped bootstrap token, the session token, and each fetched username, password
/// or key.
///
/// 1. It cannot be accidentally logged (`{:?}` prints `[REDACTED]`).
/// 2. When it goes out of scope the heap allocation is zeroized.
pub struct Credential {
    value: SecretString,
}

impl Credential {
    /// Takes ownership of the plaintext so no second copy is left behind on the heap.
    pub fn new(raw: String) -> Self {
        Self { value: SecretString::new(raw) }
    }

    /// Hands the plaintext to `action` only; the borrow cannot outlive the call.
    pub fn use_secret<F, R>(&self, action: F) -> R
    where
        F: FnOnce(&str) -> R,
    {
        action(self.value.expose_secret())
    }

    /// Plaintext access for header construction and the credential document.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        Self::new(self.expose().to_owned())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl From<&str> for Credential {
    fn from(raw: &str) -> Self {
        Self::new(raw.to_owned())
    }
}
