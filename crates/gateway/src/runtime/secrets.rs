//! Secrets store — a `key=value` file loaded at startup and on explicit
//! reload. Values are only ever consumed by the template resolver; every
//! API surface sees key names at most.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;

use hb_domain::{Error, Result};

pub struct SecretStore {
    path: PathBuf,
    values: RwLock<HashMap<String, String>>,
}

impl SecretStore {
    /// Load the secrets file. A missing file is not an error — the store
    /// starts empty and can be populated by a later reload.
    pub fn load(path: PathBuf) -> Result<Self> {
        let store = Self {
            path,
            values: RwLock::new(HashMap::new()),
        };
        match store.reload() {
            Ok(count) => {
                tracing::info!(count, "secrets loaded");
            }
            Err(Error::NotFound(_)) => {
                tracing::warn!(path = %store.path.display(), "secrets file missing, starting empty");
            }
            Err(e) => return Err(e),
        }
        Ok(store)
    }

    /// Re-read the file. Returns the number of keys loaded.
    pub fn reload(&self) -> Result<usize> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!(
                    "secrets file '{}' does not exist",
                    self.path.display()
                ))
            } else {
                Error::Internal(format!("reading secrets file: {e}"))
            }
        })?;

        let parsed = parse_secrets(&raw)?;
        let count = parsed.len();
        *self.values.write() = parsed;
        Ok(count)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    /// Key names only, sorted. Values never leave this module.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

fn parse_secrets(raw: &str) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::InvalidParameter(format!(
                "secrets file line {}: expected KEY=value",
                lineno + 1
            )));
        };
        let key = key.trim();
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::InvalidParameter(format!(
                "secrets file line {}: key must be an ASCII identifier",
                lineno + 1
            )));
        }
        out.insert(key.to_owned(), value.to_owned());
    }
    Ok(out)
}
