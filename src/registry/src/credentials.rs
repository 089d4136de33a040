//! Per-registry credentials from the engine's user config file.
//!
//! Reads `~/.docker/config.json` once at startup. A missing, unreadable, or
//! malformed file yields an empty store, not an error. Explicit credentials
//! from environment or flags are layered on top with `add`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

/// Credentials for one registry host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub registry: String,
    pub username: String,
    pub password: String,
}

impl Credential {
    /// `base64(user:pass)` for an `Authorization: Basic` header.
    pub fn basic_auth(&self) -> String {
        STANDARD.encode(format!("{}:{}", self.username, self.password))
    }

    /// The engine's `X-Registry-Auth` header value: base64 over a JSON
    /// credential blob.
    pub fn registry_auth_header(&self) -> String {
        let blob = serde_json::json!({
            "username": self.username,
            "password": self.password,
            "serveraddress": self.registry,
        });
        STANDARD.encode(blob.to_string())
    }
}

/// On-disk schema of the engine's user config. Any other fields are ignored.
#[derive(Debug, Default, Deserialize)]
struct EngineUserConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
}

/// Read-only credential store keyed by registry host.
#[derive(Debug, Default)]
pub struct CredentialStore {
    entries: HashMap<String, Credential>,
}

impl CredentialStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from the default path (`~/.docker/config.json`).
    pub fn load_default() -> Self {
        match dirs::home_dir() {
            Some(home) => Self::load(&home.join(".docker").join("config.json")),
            None => {
                tracing::warn!("cannot determine home directory, starting with no credentials");
                Self::new()
            }
        }
    }

    /// Load from a specific config file. Any failure is logged and yields an
    /// empty store.
    pub fn load(path: &Path) -> Self {
        let mut store = Self::new();
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "cannot read credential file");
                }
                return store;
            }
        };
        let config: EngineUserConfig = match serde_json::from_str(&data) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "malformed credential file");
                return store;
            }
        };

        for (host, entry) in config.auths {
            let Some(auth) = entry.auth else { continue };
            match decode_auth(&auth) {
                Some((username, password)) => {
                    let registry = normalize_registry(&host);
                    store.entries.insert(
                        registry.clone(),
                        Credential {
                            registry,
                            username,
                            password,
                        },
                    );
                }
                None => {
                    tracing::warn!(registry = %host, "skipping undecodable auth entry");
                }
            }
        }

        tracing::debug!(
            path = %path.display(),
            registries = store.entries.len(),
            "loaded registry credentials"
        );
        store
    }

    /// Default config file path, if a home directory exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".docker").join("config.json"))
    }

    /// Add or overwrite credentials for a registry.
    pub fn add(&mut self, registry: &str, username: &str, password: &str) {
        let registry = normalize_registry(registry);
        self.entries.insert(
            registry.clone(),
            Credential {
                registry,
                username: username.to_string(),
                password: password.to_string(),
            },
        );
    }

    /// Exact-host lookup (Docker Hub aliases normalized). Missing means
    /// anonymous.
    pub fn get(&self, registry: &str) -> Option<&Credential> {
        self.entries.get(&normalize_registry(registry))
    }

    /// Number of stored credentials.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decode a `base64(user:pass)` auth entry.
fn decode_auth(auth: &str) -> Option<(String, String)> {
    let decoded = STANDARD.decode(auth).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Normalize registry keys: strip scheme and path (the legacy Docker Hub key
/// is a full URL), fold the Docker Hub aliases onto one name.
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    let r = r
        .strip_prefix("https://")
        .or_else(|| r.strip_prefix("http://"))
        .unwrap_or(&r);
    let r = r.split('/').next().unwrap_or(r);
    if r == "index.docker.io" || r == "registry-1.docker.io" {
        "docker.io".to_string()
    } else {
        r.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn b64(s: &str) -> String {
        STANDARD.encode(s)
    }

    #[test]
    fn test_load_auths() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            &format!(
                r#"{{"auths": {{"ghcr.io": {{"auth": "{}"}}}}}}"#,
                b64("user:pa:ss")
            ),
        );

        let store = CredentialStore::load(&path);
        let cred = store.get("ghcr.io").unwrap();
        assert_eq!(cred.username, "user");
        // Password may itself contain colons; only the first splits
        assert_eq!(cred.password, "pa:ss");
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::load(&dir.path().join("nope.json"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_malformed_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "{not json");
        let store = CredentialStore::load(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn test_undecodable_auth_skipped() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, r#"{"auths": {"ghcr.io": {"auth": "!!!"}}}"#);
        let store = CredentialStore::load(&path);
        assert!(store.get("ghcr.io").is_none());
    }

    #[test]
    fn test_extra_fields_ignored() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            &format!(
                r#"{{"credsStore": "desktop", "auths": {{"quay.io": {{"auth": "{}", "email": "x@y"}}}}}}"#,
                b64("u:p")
            ),
        );
        let store = CredentialStore::load(&path);
        assert!(store.get("quay.io").is_some());
    }

    #[test]
    fn test_legacy_docker_hub_key() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            &format!(
                r#"{{"auths": {{"https://index.docker.io/v1/": {{"auth": "{}"}}}}}}"#,
                b64("hubuser:hubpass")
            ),
        );
        let store = CredentialStore::load(&path);

        // All Docker Hub aliases resolve to the same entry
        assert!(store.get("docker.io").is_some());
        assert!(store.get("index.docker.io").is_some());
        assert!(store.get("registry-1.docker.io").is_some());
    }

    #[test]
    fn test_add_overrides_file_entry() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            &format!(r#"{{"auths": {{"ghcr.io": {{"auth": "{}"}}}}}}"#, b64("a:b")),
        );
        let mut store = CredentialStore::load(&path);
        store.add("ghcr.io", "flaguser", "flagpass");

        assert_eq!(store.get("ghcr.io").unwrap().username, "flaguser");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_exact_host_no_wildcard() {
        let mut store = CredentialStore::new();
        store.add("registry.example.com", "u", "p");
        assert!(store.get("sub.registry.example.com").is_none());
        assert!(store.get("example.com").is_none());
    }

    #[test]
    fn test_basic_auth_encoding() {
        let cred = Credential {
            registry: "ghcr.io".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        assert_eq!(cred.basic_auth(), b64("user:pass"));
    }

    #[test]
    fn test_registry_auth_header_decodes_to_json() {
        let cred = Credential {
            registry: "ghcr.io".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
        };
        let decoded = STANDARD.decode(cred.registry_auth_header()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["username"], "u");
        assert_eq!(value["serveraddress"], "ghcr.io");
    }
}
