// src/sys/retrieval.rs

use std::fs::{self, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use crate::error::{AgentError, Result};
use crate::sys::bootstrap::Session;
use crate::sys::catalog::Catalog;
use crate::sys::traits::SecretBackend;

/// Populates every secret in the catalog. All-or-nothing: the first failed read aborts and
/// the catalog must then be treated as unpopulated.
pub async fn retrieve_all(
    backend: &dyn SecretBackend,
    session: &Session,
    catalog: &mut Catalog,
) -> Result<()> {
    if backend.lookup_self(session.token()).await.is_err() {
        return Err(AgentError::NotAuthenticated);
    }

    for (id, secret) in catalog.iter_mut() {
        let response = backend
            .read(session.token(), &secret.vault_path)
            .await
            .map_err(|cause| AgentError::RetrievalFailed { id: id.clone(), cause })?;
        secret.apply_retrieval_response(&response)?;
        tracing::debug!(secret_id = %id, backend = %secret.backend, "Secret retrieved");
    }
    Ok(())
}

/// Writes the printable form of every secret, in catalog order, to `path`.
///
/// 🛡️ The document is staged in a 0600 temp file in the target directory and renamed into
/// place, so the workload never observes a partial file.
pub fn materialize(catalog: &Catalog, path: &Path) -> Result<()> {
    let mut documents = Vec::with_capacity(catalog.len());
    for secret in catalog.values() {
        if !secret.is_fetched() {
            return Err(AgentError::Unfetched { id: secret.id.clone() });
        }
        documents.push(secret.to_printable());
    }

    let bytes = Zeroizing::new(serde_json::to_vec_pretty(&documents).map_err(|e| {
        AgentError::write_failed(path, std::io::Error::other(e))
    })?);
    // Drop the plaintext maps as soon as the bytes exist.
    drop(documents);

    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| AgentError::write_failed(path, e))?;

    let mut staged = NamedTempFile::new_in(parent).map_err(|e| AgentError::write_failed(path, e))?;
    staged
        .as_file()
        .set_permissions(Permissions::from_mode(0o600))
        .map_err(|e| AgentError::write_failed(path, e))?;
    staged.write_all(&bytes).map_err(|e| AgentError::write_failed(path, e))?;
    staged.as_file().sync_all().map_err(|e| AgentError::write_failed(path, e))?;
    staged.persist(path).map_err(|e| AgentError::write_failed(path, e.error))?;
    Ok(())
}
