//! Engine API client and the trait the update engine consumes.
//!
//! The API version is negotiated once at connect time (`GET /version`
//! without a version prefix) and every subsequent path is prefixed
//! `/v<api>/...`. Read-only calls run under the retry policy; mutations are
//! never retried blindly.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use watchz_core::{Result, RetryPolicy, WatchError};

use crate::http::UnixHttpClient;
use crate::model::{
    Container, ContainerDetails, CreateContainerBody, CreatedContainer, EndpointSettings,
    EngineVersion, ImageInfo,
};

/// Engine operations the update engine depends on. Fronted by a trait so
/// the state machine can be driven against a recording stub in tests.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn list_containers(&self, include_stopped: bool) -> Result<Vec<Container>>;
    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails>;
    async fn inspect_image(&self, image: &str) -> Result<ImageInfo>;
    /// Pull an image; returns once the engine finishes. `auth` is a
    /// pre-encoded `X-Registry-Auth` header value.
    async fn pull_image(&self, image: &str, auth: Option<&str>) -> Result<()>;
    async fn stop_container(&self, id: &str, timeout_secs: u64, signal: Option<&str>)
        -> Result<()>;
    async fn remove_container(&self, id: &str, remove_volumes: bool) -> Result<()>;
    async fn create_container(&self, name: &str, body: &CreateContainerBody) -> Result<String>;
    async fn start_container(&self, id: &str) -> Result<()>;
    async fn remove_image(&self, image: &str) -> Result<()>;
    async fn network_connect(
        &self,
        network: &str,
        container: &str,
        endpoint: Option<&EndpointSettings>,
    ) -> Result<()>;
    async fn network_disconnect(&self, network: &str, container: &str, force: bool) -> Result<()>;
}

/// HTTP client for the engine's local socket API.
pub struct EngineClient {
    http: UnixHttpClient,
    api_version: String,
    retry: RetryPolicy,
}

impl EngineClient {
    /// Connect to the engine: ping it, then negotiate the API version
    /// unless one is pinned.
    pub async fn connect(
        socket: PathBuf,
        api_version: Option<String>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let http = UnixHttpClient::new(socket);

        let ping = http.request("GET", "/_ping", &[], None).await?;
        if !ping.is_success() {
            return Err(WatchError::EngineUnavailable(format!(
                "engine ping returned HTTP {}",
                ping.status
            )));
        }

        let api_version = match api_version {
            Some(pinned) => pinned,
            None => {
                let response = http.request("GET", "/version", &[], None).await?;
                if !response.is_success() {
                    return Err(WatchError::EngineUnavailable(format!(
                        "version negotiation returned HTTP {}",
                        response.status
                    )));
                }
                let version: EngineVersion = serde_json::from_slice(&response.body)?;
                if version.api_version.is_empty() {
                    return Err(WatchError::EngineUnavailable(
                        "engine reported no ApiVersion".to_string(),
                    ));
                }
                version.api_version
            }
        };

        tracing::debug!(api_version = %api_version, "connected to container engine");
        Ok(Self {
            http,
            api_version,
            retry,
        })
    }

    /// The negotiated (or pinned) API version.
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Liveness check.
    pub async fn ping(&self) -> Result<()> {
        let response = self.http.request("GET", "/_ping", &[], None).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(WatchError::EngineUnavailable(format!(
                "engine ping returned HTTP {}",
                response.status
            )))
        }
    }

    /// Engine version info.
    pub async fn version(&self) -> Result<EngineVersion> {
        let response = self.http.request("GET", "/version", &[], None).await?;
        check_status(&response)?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    fn path(&self, suffix: &str) -> String {
        format!("/v{}{}", self.api_version, suffix)
    }

    /// GET a JSON resource with retry on transient failures.
    async fn get_json<T: DeserializeOwned>(&self, suffix: &str) -> Result<T> {
        let path = self.path(suffix);
        self.retry
            .run(|| async {
                let response = self.http.request("GET", &path, &[], None).await?;
                check_status(&response)?;
                Ok(serde_json::from_slice(&response.body)?)
            })
            .await
    }
}

/// Map a non-2xx response to an engine error carrying status and body.
fn check_status(response: &crate::http::HttpResponse) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    Err(WatchError::EngineError {
        status: response.status,
        message: response.text().trim().to_string(),
    })
}

/// Like [`check_status`], but 304 (state already reached) is fine.
fn check_status_allow_unmodified(response: &crate::http::HttpResponse) -> Result<()> {
    if response.status == 304 {
        return Ok(());
    }
    check_status(response)
}

#[async_trait]
impl ContainerEngine for EngineClient {
    async fn list_containers(&self, include_stopped: bool) -> Result<Vec<Container>> {
        let all = if include_stopped { 1 } else { 0 };
        self.get_json(&format!("/containers/json?all={all}")).await
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
        self.get_json(&format!("/containers/{id}/json")).await
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageInfo> {
        self.get_json(&format!("/images/{image}/json")).await
    }

    async fn pull_image(&self, image: &str, auth: Option<&str>) -> Result<()> {
        let (name, tag) = split_pull_reference(image);
        let path = self.path(&format!("/images/create?fromImage={name}&tag={tag}"));

        let mut headers: Vec<(&str, &str)> = Vec::new();
        if let Some(auth) = auth {
            headers.push(("X-Registry-Auth", auth));
        }

        // The body is a progress stream; it is drained fully and discarded.
        let response = self.http.request("POST", &path, &headers, None).await?;
        check_status(&response)?;
        tracing::debug!(image, "image pulled");
        Ok(())
    }

    async fn stop_container(
        &self,
        id: &str,
        timeout_secs: u64,
        signal: Option<&str>,
    ) -> Result<()> {
        let mut query = format!("t={timeout_secs}");
        if let Some(signal) = signal {
            query.push_str(&format!("&signal={signal}"));
        }
        let path = self.path(&format!("/containers/{id}/stop?{query}"));
        let response = self.http.request("POST", &path, &[], None).await?;
        check_status_allow_unmodified(&response)
    }

    async fn remove_container(&self, id: &str, remove_volumes: bool) -> Result<()> {
        let path = self.path(&format!("/containers/{id}?v={remove_volumes}"));
        let response = self.http.request("DELETE", &path, &[], None).await?;
        check_status(&response)
    }

    async fn create_container(&self, name: &str, body: &CreateContainerBody) -> Result<String> {
        let path = self.path(&format!("/containers/create?name={name}"));
        let payload = serde_json::to_vec(body)?;
        let response = self
            .http
            .request("POST", &path, &[], Some(&payload))
            .await?;
        check_status(&response)?;

        let created: CreatedContainer = serde_json::from_slice(&response.body)?;
        for warning in &created.warnings {
            tracing::warn!(container = name, warning = %warning, "create warning");
        }
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let path = self.path(&format!("/containers/{id}/start"));
        let response = self.http.request("POST", &path, &[], None).await?;
        check_status_allow_unmodified(&response)
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let path = self.path(&format!("/images/{image}"));
        let response = self.http.request("DELETE", &path, &[], None).await?;
        check_status(&response)
    }

    async fn network_connect(
        &self,
        network: &str,
        container: &str,
        endpoint: Option<&EndpointSettings>,
    ) -> Result<()> {
        let path = self.path(&format!("/networks/{network}/connect"));
        let mut body = serde_json::json!({ "Container": container });
        if let Some(endpoint) = endpoint {
            body["EndpointConfig"] = serde_json::to_value(endpoint)?;
        }
        let payload = serde_json::to_vec(&body)?;
        let response = self
            .http
            .request("POST", &path, &[], Some(&payload))
            .await?;
        check_status(&response)
    }

    async fn network_disconnect(&self, network: &str, container: &str, force: bool) -> Result<()> {
        let path = self.path(&format!("/networks/{network}/disconnect"));
        let body = serde_json::json!({ "Container": container, "Force": force });
        let payload = serde_json::to_vec(&body)?;
        let response = self
            .http
            .request("POST", &path, &[], Some(&payload))
            .await?;
        check_status(&response)
    }
}

/// Split a pull reference into the engine's `fromImage` and `tag` query
/// parts. The tag is whatever follows the last colon of the last segment;
/// anything else defaults to `latest`.
fn split_pull_reference(image: &str) -> (&str, &str) {
    let last_segment_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_segment_start..].rfind(':') {
        Some(colon) => {
            let split = last_segment_start + colon;
            (&image[..split], &image[split + 1..])
        }
        None => (image, "latest"),
    }
}
