//! Client identity that survives restarts.

use crate::config::ClientConfig;
use crate::core::Result;
use std::fs;
use uuid::Uuid;

/// The configured id, else the one stored in the id file, else a fresh
/// UUID v4 (written to the id file when one is configured).
pub fn resolve_client_id(config: &ClientConfig) -> Result<String> {
    if let Some(id) = &config.client_id {
        return Ok(id.clone());
    }

    let Some(path) = &config.id_file else {
        return Ok(Uuid::new_v4().to_string());
    };

    if path.exists() {
        let stored = fs::read_to_string(path)?;
        let stored = stored.trim();
        if !stored.is_empty() {
            return Ok(stored.to_string());
        }
    }

    let id = Uuid::new_v4().to_string();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &id)?;
    tracing::debug!(client_id = %id, path = %path.display(), "stored new client id");
    Ok(id)
}
