//! Registry client for manifest digest lookups.
//!
//! Speaks the OCI-distribution v2 `manifests/<ref>` endpoint, HEAD first so
//! manifest bytes are never transferred just to compare digests. Handles
//! bearer-token discovery on 401, Basic fallback, gzip content encoding, and
//! the digest-pinned / local-image short circuits that need no network at
//! all. All entry points run under the retry policy for transient failures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode};
use watchz_core::{Result, RetryPolicy, WatchError};

use crate::auth::{pull_scope, AuthChallenge, TokenCache, TokenGrant};
use crate::credentials::CredentialStore;
use crate::reference::ImageReference;

/// Accept header covering every manifest media type we can compare.
const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// Header carrying the manifest digest on a successful response.
const DIGEST_HEADER: &str = "Docker-Content-Digest";

/// Maximum redirect hops before a manifest request is abandoned.
const MAX_REDIRECTS: usize = 5;

/// Result of one drift check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheck {
    pub has_update: bool,
    pub current: Option<String>,
    pub latest: Option<String>,
    pub message: Option<String>,
}

impl UpdateCheck {
    fn skipped(current: &str, message: &str) -> Self {
        Self {
            has_update: false,
            current: Some(current.to_string()),
            latest: None,
            message: Some(message.to_string()),
        }
    }
}

/// One entry of a batch drift check.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub image: String,
    pub current_digest: String,
}

/// Where the update engine asks whether an image has drifted. Fronted by a
/// trait so state-machine tests can substitute a deterministic source.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn check_for_update(&self, current_digest: &str, image: &str) -> Result<UpdateCheck>;
}

/// In-flight guard: at most one check per (registry, repository).
#[derive(Default)]
struct FlightLocks {
    inner: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl FlightLocks {
    fn lock_for(&self, registry: &str, repository: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.inner.lock().unwrap();
        locks
            .entry((registry.to_string(), repository.to_string()))
            .or_default()
            .clone()
    }
}

/// OCI-distribution v2 client with token caching.
pub struct RegistryClient {
    http: reqwest::Client,
    credentials: Arc<CredentialStore>,
    tokens: TokenCache,
    flights: FlightLocks,
    retry: RetryPolicy,
}

impl RegistryClient {
    /// Build a client over the given credential store and retry policy.
    pub fn new(credentials: Arc<CredentialStore>, retry: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .user_agent(format!("watchz/{}", watchz_core::VERSION))
            .build()
            .map_err(|e| WatchError::Other(format!("cannot build registry client: {e}")))?;

        Ok(Self {
            http,
            credentials,
            tokens: TokenCache::new(),
            flights: FlightLocks::default(),
            retry,
        })
    }

    /// Fetch the manifest digest for a reference without transferring the
    /// manifest itself.
    pub async fn head_manifest_digest(&self, reference: &ImageReference) -> Result<String> {
        self.retry
            .run(|| self.manifest_digest_once(reference))
            .await
    }

    /// Fetch the raw manifest bytes (gzip transparently decoded).
    pub async fn get_manifest(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        self.retry
            .run(|| async {
                let response = self.manifest_request(reference, Method::GET).await?;
                let response = self.interpret(reference, response).await?;
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| request_error("reading manifest body", e))?;
                Ok(bytes.to_vec())
            })
            .await
    }

    /// Compare `current_digest` against the registry's answer for `image`.
    ///
    /// Short-circuits without network I/O when the reference is pinned to a
    /// digest or when `image` is a bare local content-store id.
    pub async fn check_for_update(&self, current_digest: &str, image: &str) -> Result<UpdateCheck> {
        if image.starts_with("sha256:") {
            return Ok(UpdateCheck::skipped(current_digest, "local image"));
        }

        let reference = ImageReference::parse(image)?;
        if reference.digest.is_some() {
            return Ok(UpdateCheck::skipped(current_digest, "digest-pinned"));
        }

        let guard = self
            .flights
            .lock_for(&reference.registry, &reference.repository_path());
        let _in_flight = guard.lock().await;

        let latest = self.head_manifest_digest(&reference).await?;
        let has_update = latest != current_digest;
        Ok(UpdateCheck {
            has_update,
            current: Some(current_digest.to_string()),
            latest: Some(latest),
            message: None,
        })
    }

    /// Check a batch of images. Checks for distinct repositories proceed
    /// concurrently; checks hitting the same (registry, repository) are
    /// serialized so a cold token is fetched once, not N times.
    pub async fn check_many(&self, requests: &[CheckRequest]) -> Vec<Result<UpdateCheck>> {
        futures::future::join_all(
            requests
                .iter()
                .map(|r| self.check_for_update(&r.current_digest, &r.image)),
        )
        .await
    }

    /// One digest lookup attempt: HEAD, with a single GET fallback when the
    /// registry rejects HEAD outright (405) or omits the digest header.
    async fn manifest_digest_once(&self, reference: &ImageReference) -> Result<String> {
        let response = self.manifest_request(reference, Method::HEAD).await?;
        let status = response.status();
        if status.is_success() {
            if let Some(digest) = header_value(response.headers(), DIGEST_HEADER) {
                return Ok(digest);
            }
            tracing::debug!(image = %reference, "no digest from HEAD, falling back to GET");
        } else if status == StatusCode::METHOD_NOT_ALLOWED {
            tracing::debug!(image = %reference, "HEAD not allowed, falling back to GET");
        } else {
            return Err(self.manifest_failure(reference, response).await);
        }

        let response = self.manifest_request(reference, Method::GET).await?;
        let response = self.interpret(reference, response).await?;
        header_value(response.headers(), DIGEST_HEADER)
            .ok_or_else(|| WatchError::DigestNotFound(reference.to_string()))
    }

    /// Send one authenticated manifest request, discovering a bearer token
    /// on 401 and retrying exactly once. The response is returned with its
    /// status uninterpreted so callers can branch on it (a 405 on HEAD is a
    /// fallback signal, not a failure).
    async fn manifest_request(
        &self,
        reference: &ImageReference,
        method: Method,
    ) -> Result<reqwest::Response> {
        let registry = reference.registry.clone();
        let repository = reference.repository_path();
        let scope = pull_scope(&repository);
        let url = self.manifest_url(reference);

        let mut authorization = self.initial_authorization(&registry, &repository, &scope);

        // Docker Hub's token endpoint is known ahead of time; fetch the
        // token pre-emptively instead of bouncing off the first 401.
        if authorization.is_none() && registry == "docker.io" {
            let token = self
                .obtain_token(&AuthChallenge::docker_hub(), &registry, &repository, &scope)
                .await?;
            authorization = Some(format!("Bearer {token}"));
        }

        let response = self
            .send(&url, method.clone(), authorization.as_deref())
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = match header_value(response.headers(), WWW_AUTHENTICATE.as_str()) {
            Some(header) => AuthChallenge::parse(&header)?,
            None if registry == "docker.io" => AuthChallenge::docker_hub(),
            None => {
                return Err(WatchError::AuthenticationFailed(format!(
                    "{registry} returned 401 without a challenge"
                )))
            }
        };
        let scope = challenge.scope.clone().unwrap_or(scope);
        let token = self
            .obtain_token(&challenge, &registry, &repository, &scope)
            .await?;

        let retry = self
            .send(&url, method, Some(&format!("Bearer {token}")))
            .await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(WatchError::AuthenticationFailed(format!(
                "{registry} rejected the discovered bearer token for {repository}"
            )));
        }
        Ok(retry)
    }

    /// Classify a non-401 manifest response.
    async fn interpret(
        &self,
        reference: &ImageReference,
        response: reqwest::Response,
    ) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        Err(self.manifest_failure(reference, response).await)
    }

    /// Build the error for a failed manifest response.
    async fn manifest_failure(
        &self,
        reference: &ImageReference,
        response: reqwest::Response,
    ) -> WatchError {
        let status = response.status();
        let message = response.text().await.unwrap_or_default();
        let message = if message.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            message
        };
        tracing::debug!(image = %reference, status = status.as_u16(), "manifest request failed");
        WatchError::ManifestFetchFailed {
            status: status.as_u16(),
            message,
        }
    }

    async fn send(
        &self,
        url: &str,
        method: Method,
        authorization: Option<&str>,
    ) -> Result<reqwest::Response> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(MANIFEST_ACCEPT));
        if let Some(auth) = authorization {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(auth)
                    .map_err(|e| WatchError::Other(format!("bad authorization header: {e}")))?,
            );
        }
        self.http
            .request(method, url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| request_error("manifest request", e))
    }

    /// Cached token, else Basic when credentials are stored, else anonymous.
    fn initial_authorization(
        &self,
        registry: &str,
        repository: &str,
        scope: &str,
    ) -> Option<String> {
        if let Some(token) = self.tokens.get(registry, repository, scope) {
            return Some(format!("Bearer {token}"));
        }
        self.credentials
            .get(registry)
            .map(|cred| format!("Basic {}", cred.basic_auth()))
    }

    /// Fetch a bearer token for the challenge, serialized per cache key so
    /// concurrent tasks behind one repository cause one fetch.
    async fn obtain_token(
        &self,
        challenge: &AuthChallenge,
        registry: &str,
        repository: &str,
        scope: &str,
    ) -> Result<String> {
        let lock = self.tokens.refresh_lock(registry, repository, scope);
        let _refreshing = lock.lock().await;

        if let Some(token) = self.tokens.get(registry, repository, scope) {
            return Ok(token);
        }

        let url = challenge.token_url(scope);
        let mut request = self.http.get(&url);
        if let Some(cred) = self.credentials.get(registry) {
            request = request.basic_auth(&cred.username, Some(&cred.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| request_error("token request", e))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(WatchError::ManifestFetchFailed {
                status: status.as_u16(),
                message: format!("token endpoint {url} failed"),
            });
        }
        if !status.is_success() {
            return Err(WatchError::AuthenticationFailed(format!(
                "token endpoint {url} returned HTTP {}",
                status.as_u16()
            )));
        }

        let grant: TokenGrant = response
            .json()
            .await
            .map_err(|e| WatchError::InvalidManifest(format!("token response: {e}")))?;
        let token = grant
            .token()
            .ok_or_else(|| {
                WatchError::AuthenticationFailed(format!(
                    "token endpoint {url} returned no token"
                ))
            })?
            .to_string();

        self.tokens
            .insert(registry, repository, scope, token.clone(), grant.expires_in);
        tracing::debug!(registry, repository, "obtained registry token");
        Ok(token)
    }

    fn manifest_url(&self, reference: &ImageReference) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            base_url(reference.wire_registry()),
            reference.repository_path(),
            reference.manifest_reference()
        )
    }
}

#[async_trait]
impl UpdateSource for RegistryClient {
    async fn check_for_update(&self, current_digest: &str, image: &str) -> Result<UpdateCheck> {
        RegistryClient::check_for_update(self, current_digest, image).await
    }
}

/// Scheme selection: loopback registries are plain HTTP (the engine treats
/// them as insecure registries), everything else is HTTPS.
fn base_url(wire_host: &str) -> String {
    let host = wire_host.split(':').next().unwrap_or(wire_host);
    if host == "localhost" || host == "127.0.0.1" {
        format!("http://{wire_host}")
    } else {
        format!("https://{wire_host}")
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn request_error(context: &str, e: reqwest::Error) -> WatchError {
    if e.is_timeout() {
        WatchError::Timeout(format!("{context}: {e}"))
    } else if e.is_connect() {
        WatchError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            format!("{context}: {e}"),
        ))
    } else if e.is_redirect() {
        WatchError::Other(format!("{context}: too many redirects: {e}"))
    } else if e.is_decode() {
        WatchError::InvalidManifest(format!("{context}: {e}"))
    } else {
        // Mid-request failures (reset, torn body) are worth a retry
        WatchError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionAborted,
            format!("{context}: {e}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RegistryClient {
        RegistryClient::new(Arc::new(CredentialStore::new()), RetryPolicy::none()).unwrap()
    }

    #[test]
    fn test_base_url_scheme_selection() {
        assert_eq!(base_url("ghcr.io"), "https://ghcr.io");
        assert_eq!(base_url("registry-1.docker.io"), "https://registry-1.docker.io");
        assert_eq!(base_url("localhost:5000"), "http://localhost:5000");
        assert_eq!(base_url("127.0.0.1:8080"), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_manifest_url_composition() {
        let c = client();
        let r = ImageReference::parse("nginx:1.21").unwrap();
        assert_eq!(
            c.manifest_url(&r),
            "https://registry-1.docker.io/v2/library/nginx/manifests/1.21"
        );
    }

    #[tokio::test]
    async fn test_local_image_short_circuit() {
        let c = client();
        let check = c
            .check_for_update("sha256:aaa", "sha256:deadbeef")
            .await
            .unwrap();
        assert!(!check.has_update);
        assert_eq!(check.message.as_deref(), Some("local image"));
        assert_eq!(check.latest, None);
    }

    #[tokio::test]
    async fn test_digest_pinned_short_circuit() {
        let c = client();
        let pinned = format!(
            "nginx@sha256:{}",
            "0".repeat(64)
        );
        let check = c.check_for_update("sha256:aaa", &pinned).await.unwrap();
        assert!(!check.has_update);
        assert_eq!(check.message.as_deref(), Some("digest-pinned"));
    }

    #[tokio::test]
    async fn test_invalid_reference_propagates() {
        let c = client();
        assert!(c.check_for_update("sha256:aaa", "").await.is_err());
    }
}
