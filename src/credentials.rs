//! Credential storage for the exchange API key pair.
//!
//! Environment variables take precedence (`SCALPER_API_KEY` /
//! `SCALPER_API_SECRET`), falling back to a plain JSON store beside the
//! preset. On first run the operator is prompted once and the pair is
//! persisted. Secrets are wrapped in `secrecy` so they never hit the logs.

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::storage;

/// Service identifier under which credentials are stored.
pub const SERVICE: &str = "scalper";

const CREDENTIALS_FILE: &str = "credentials.json";

/// Exchange API key pair.
pub struct ApiCredentials {
    pub key: SecretString,
    pub secret: SecretString,
}

/// A named secret store: `get(service, name)` / `set(service, name, value)`.
pub trait CredentialStore {
    fn get(&self, service: &str, name: &str) -> Result<Option<SecretString>>;
    fn set(&mut self, service: &str, name: &str, value: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Environment store
// ---------------------------------------------------------------------------

/// Read-only store over process environment variables, looked up as
/// `{SERVICE}_{NAME}` uppercased (e.g. `SCALPER_API_KEY`).
#[derive(Debug, Default)]
pub struct EnvCredentialStore;

impl CredentialStore for EnvCredentialStore {
    fn get(&self, service: &str, name: &str) -> Result<Option<SecretString>> {
        let var = format!("{}_{}", service.to_uppercase(), name.to_uppercase());
        Ok(std::env::var(var).ok().map(SecretString::new))
    }

    fn set(&mut self, _service: &str, _name: &str, _value: &str) -> Result<()> {
        bail!("environment credential store is read-only")
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// JSON-file-backed store at `<config dir>/credentials.json`, keyed
/// `service/name`.
pub struct FileCredentialStore {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl FileCredentialStore {
    /// Open the store, loading existing entries if the file exists.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => storage::config_dir()?.join(CREDENTIALS_FILE),
        };

        let entries = if path.exists() {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read credentials from {}", path.display()))?;
            serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse credentials from {}", path.display()))?
        } else {
            HashMap::new()
        };

        Ok(Self { path, entries })
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)
            .context("Failed to serialise credentials")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write credentials to {}", self.path.display()))?;

        // Owner-only on unix; the file holds a live API secret.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to restrict {}", self.path.display()))?;
        }

        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, service: &str, name: &str) -> Result<Option<SecretString>> {
        Ok(self
            .entries
            .get(&format!("{service}/{name}"))
            .cloned()
            .map(SecretString::new))
    }

    fn set(&mut self, service: &str, name: &str, value: &str) -> Result<()> {
        self.entries
            .insert(format!("{service}/{name}"), value.to_string());
        self.persist()
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve the API key pair: environment first, then the persistent
/// store, prompting (and saving) on first run.
pub fn obtain(store: &mut dyn CredentialStore) -> Result<ApiCredentials> {
    let env = EnvCredentialStore;
    if let (Some(key), Some(secret)) = (env.get(SERVICE, "api_key")?, env.get(SERVICE, "api_secret")?)
    {
        info!("Using API credentials from environment");
        return Ok(ApiCredentials { key, secret });
    }

    if let (Some(key), Some(secret)) =
        (store.get(SERVICE, "api_key")?, store.get(SERVICE, "api_secret")?)
    {
        return Ok(ApiCredentials { key, secret });
    }

    println!("🔑 Enter your Kraken API credentials:");
    let key = prompt_secret("  API Key: ")?;
    let secret = prompt_secret("  API Secret: ")?;
    store.set(SERVICE, "api_key", &key)?;
    store.set(SERVICE, "api_secret", &secret)?;
    info!("Credentials saved");

    Ok(ApiCredentials {
        key: SecretString::new(key),
        secret: SecretString::new(secret),
    })
}

fn prompt_secret(label: &str) -> Result<String> {
    print!("{label}");
    std::io::stdout().flush().context("Failed to flush stdout")?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read credential from stdin")?;
    Ok(line.trim().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
