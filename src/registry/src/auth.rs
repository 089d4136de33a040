//! Bearer-token discovery and caching.
//!
//! A 401 from a registry carries a `WWW-Authenticate: Bearer` challenge
//! naming the token endpoint. Tokens are cached for their stated lifetime
//! keyed by (registry, repository, scope), and refresh is serialized per key
//! so a fan-out of checks against one repository causes one token fetch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Deserialize;
use watchz_core::{Result, WatchError};

/// Token lifetime assumed when the grant does not state one.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 60;

/// Parsed `WWW-Authenticate: Bearer` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub realm: String,
    pub service: String,
    pub scope: Option<String>,
}

impl AuthChallenge {
    /// Parse a `WWW-Authenticate` header value.
    ///
    /// `realm` and `service` are required; a challenge without them (or a
    /// non-Bearer scheme) fails.
    pub fn parse(header: &str) -> Result<Self> {
        let params = header.trim().strip_prefix("Bearer ").ok_or_else(|| {
            WatchError::AuthenticationFailed(format!(
                "unsupported authentication challenge: '{header}'"
            ))
        })?;

        let mut realm = None;
        let mut service = None;
        let mut scope = None;

        for part in params.split(',') {
            let part = part.trim();
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim_matches('"').to_string();
            match key {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        match (realm, service) {
            (Some(realm), Some(service)) => Ok(Self {
                realm,
                service,
                scope,
            }),
            _ => Err(WatchError::AuthenticationFailed(format!(
                "challenge missing realm or service: '{header}'"
            ))),
        }
    }

    /// The well-known Docker Hub token endpoint, used pre-emptively so the
    /// first request does not have to bounce off a 401.
    pub fn docker_hub() -> Self {
        Self {
            realm: "https://auth.docker.io/token".to_string(),
            service: "registry.docker.io".to_string(),
            scope: None,
        }
    }

    /// Token endpoint URL with `service` and `scope` query parameters.
    pub fn token_url(&self, scope: &str) -> String {
        let sep = if self.realm.contains('?') { '&' } else { '?' };
        format!("{}{}service={}&scope={}", self.realm, sep, self.service, scope)
    }
}

/// Token response from a registry auth endpoint. Different registries name
/// the field differently (`token` for Docker Hub, `access_token` for some
/// others); either is accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub issued_at: Option<String>,
}

impl TokenGrant {
    /// The bearer token, whichever field carried it.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().or(self.access_token.as_deref())
    }
}

/// Default scope for pulling a repository.
pub fn pull_scope(repository: &str) -> String {
    format!("repository:{repository}:pull")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TokenKey {
    registry: String,
    repository: String,
    scope: String,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Expiring bearer-token cache with per-key refresh serialization.
#[derive(Default)]
pub struct TokenCache {
    tokens: Mutex<HashMap<TokenKey, CachedToken>>,
    refresh_locks: Mutex<HashMap<TokenKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an unexpired token for the key.
    pub fn get(&self, registry: &str, repository: &str, scope: &str) -> Option<String> {
        let key = TokenKey {
            registry: registry.to_string(),
            repository: repository.to_string(),
            scope: scope.to_string(),
        };
        let tokens = self.tokens.lock().unwrap();
        tokens.get(&key).and_then(|cached| {
            if cached.expires_at > Instant::now() {
                Some(cached.token.clone())
            } else {
                None
            }
        })
    }

    /// Cache a token for its stated lifetime (default 60 s), dropping any
    /// expired entries while the map is held.
    pub fn insert(
        &self,
        registry: &str,
        repository: &str,
        scope: &str,
        token: String,
        expires_in: Option<u64>,
    ) {
        let key = TokenKey {
            registry: registry.to_string(),
            repository: repository.to_string(),
            scope: scope.to_string(),
        };
        let ttl = expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let expires_at = Instant::now() + Duration::from_secs(ttl);

        let mut tokens = self.tokens.lock().unwrap();
        tokens.insert(key, CachedToken { token, expires_at });
        tokens.retain(|_, cached| cached.expires_at > Instant::now());
    }

    /// The async lock serializing refresh for one key. N tasks missing the
    /// cache for the same key queue here; the winner fetches, the rest find
    /// the cached token when they get the lock.
    pub fn refresh_lock(
        &self,
        registry: &str,
        repository: &str,
        scope: &str,
    ) -> Arc<tokio::sync::Mutex<()>> {
        let key = TokenKey {
            registry: registry.to_string(),
            repository: repository.to_string(),
            scope: scope.to_string(),
        };
        let mut locks = self.refresh_locks.lock().unwrap();
        locks.entry(key).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_challenge() {
        let c = AuthChallenge::parse(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#,
        )
        .unwrap();
        assert_eq!(c.realm, "https://auth.docker.io/token");
        assert_eq!(c.service, "registry.docker.io");
        assert_eq!(c.scope, Some("repository:library/nginx:pull".to_string()));
    }

    #[test]
    fn test_parse_challenge_without_scope() {
        let c = AuthChallenge::parse(r#"Bearer realm="https://r.example/token",service="ex.io""#)
            .unwrap();
        assert_eq!(c.scope, None);
    }

    #[test]
    fn test_parse_rejects_missing_realm() {
        assert!(AuthChallenge::parse(r#"Bearer service="ex.io""#).is_err());
    }

    #[test]
    fn test_parse_rejects_missing_service() {
        assert!(AuthChallenge::parse(r#"Bearer realm="https://r.example/token""#).is_err());
    }

    #[test]
    fn test_parse_rejects_basic_scheme() {
        assert!(AuthChallenge::parse(r#"Basic realm="registry""#).is_err());
    }

    #[test]
    fn test_token_url() {
        let c = AuthChallenge::parse(r#"Bearer realm="https://r.example/token",service="ex.io""#)
            .unwrap();
        assert_eq!(
            c.token_url("repository:org/app:pull"),
            "https://r.example/token?service=ex.io&scope=repository:org/app:pull"
        );
    }

    #[test]
    fn test_token_url_realm_with_query() {
        let c = AuthChallenge {
            realm: "https://r.example/token?tenant=a".to_string(),
            service: "ex.io".to_string(),
            scope: None,
        };
        assert!(c.token_url("s").starts_with("https://r.example/token?tenant=a&service="));
    }

    #[test]
    fn test_grant_token_field_fallback() {
        let g: TokenGrant = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert_eq!(g.token(), Some("abc"));

        let g: TokenGrant = serde_json::from_str(r#"{"access_token":"xyz"}"#).unwrap();
        assert_eq!(g.token(), Some("xyz"));

        let g: TokenGrant = serde_json::from_str(r#"{"expires_in":300}"#).unwrap();
        assert_eq!(g.token(), None);
    }

    #[test]
    fn test_cache_hit_and_scope_isolation() {
        let cache = TokenCache::new();
        cache.insert("ghcr.io", "org/app", "pull", "t1".to_string(), Some(300));

        assert_eq!(cache.get("ghcr.io", "org/app", "pull"), Some("t1".to_string()));
        assert_eq!(cache.get("ghcr.io", "org/other", "pull"), None);
        assert_eq!(cache.get("ghcr.io", "org/app", "push"), None);
    }

    #[test]
    fn test_cache_expiry() {
        let cache = TokenCache::new();
        cache.insert("ghcr.io", "org/app", "pull", "t1".to_string(), Some(0));
        assert_eq!(cache.get("ghcr.io", "org/app", "pull"), None);
    }

    #[test]
    fn test_refresh_lock_is_shared_per_key() {
        let cache = TokenCache::new();
        let a = cache.refresh_lock("ghcr.io", "org/app", "pull");
        let b = cache.refresh_lock("ghcr.io", "org/app", "pull");
        assert!(Arc::ptr_eq(&a, &b));

        let c = cache.refresh_lock("ghcr.io", "org/other", "pull");
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_pull_scope() {
        assert_eq!(pull_scope("library/nginx"), "repository:library/nginx:pull");
    }
}
