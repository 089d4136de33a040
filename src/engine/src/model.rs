//! Wire models for the engine's JSON API.
//!
//! Inspect models are deserialize-only views of what the engine reports;
//! [`CreateContainerBody`] is the serialize-only subset the update engine
//! sends back when recreating a workload. Empty fields are omitted from the
//! create body so the engine applies its own defaults.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Engine version info from `GET /version`.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineVersion {
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "ApiVersion", default)]
    pub api_version: String,
    #[serde(rename = "Os", default)]
    pub os: String,
    #[serde(rename = "Arch", default)]
    pub arch: String,
}

/// One entry of the container listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Container {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Names", default)]
    pub names: Vec<String>,
    #[serde(rename = "Image", default)]
    pub image: String,
    #[serde(rename = "ImageID", default)]
    pub image_id: String,
    #[serde(rename = "State", default)]
    pub state: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Labels", default)]
    pub labels: HashMap<String, String>,
    #[serde(rename = "Created", default)]
    pub created: i64,
}

impl Container {
    /// Primary name with the engine's leading slash stripped.
    pub fn name(&self) -> &str {
        self.names
            .first()
            .map(|n| n.strip_prefix('/').unwrap_or(n))
            .unwrap_or(&self.id)
    }

    /// First 12 characters of the id.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }

    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Full inspect view of one container; the surface needed to recreate it.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerDetails {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Image", default)]
    pub image: String,
    #[serde(rename = "Config", default)]
    pub config: ContainerConfig,
    #[serde(rename = "State", default)]
    pub state: ContainerState,
    #[serde(rename = "HostConfig", default)]
    pub host_config: HostConfig,
    #[serde(rename = "NetworkSettings", default)]
    pub network_settings: NetworkSettings,
}

impl ContainerDetails {
    /// Name with the engine's leading slash stripped.
    pub fn name(&self) -> &str {
        self.name.strip_prefix('/').unwrap_or(&self.name)
    }

    /// First 12 characters of the id.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Running", default)]
    pub running: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerConfig {
    #[serde(rename = "Hostname", default)]
    pub hostname: String,
    #[serde(rename = "User", default)]
    pub user: String,
    #[serde(rename = "WorkingDir", default)]
    pub working_dir: String,
    #[serde(rename = "Image", default)]
    pub image: String,
    #[serde(rename = "Env", default)]
    pub env: Option<Vec<String>>,
    #[serde(rename = "Cmd", default)]
    pub cmd: Option<Vec<String>>,
    #[serde(rename = "Entrypoint", default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(rename = "Labels", default)]
    pub labels: HashMap<String, String>,
    #[serde(rename = "ExposedPorts", default)]
    pub exposed_ports: Option<HashMap<String, serde_json::Value>>,
    #[serde(rename = "Volumes", default)]
    pub volumes: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostConfig {
    #[serde(rename = "Binds", default)]
    pub binds: Option<Vec<String>>,
    #[serde(rename = "PortBindings", default)]
    pub port_bindings: Option<HashMap<String, Option<Vec<PortBinding>>>>,
    #[serde(rename = "RestartPolicy", default)]
    pub restart_policy: Option<RestartPolicy>,
    #[serde(rename = "NetworkMode", default)]
    pub network_mode: String,
    #[serde(rename = "Privileged", default)]
    pub privileged: bool,
    #[serde(rename = "Links", default)]
    pub links: Option<Vec<String>>,
    #[serde(rename = "AutoRemove", default)]
    pub auto_remove: bool,
    #[serde(rename = "PublishAllPorts", default)]
    pub publish_all_ports: bool,
    #[serde(rename = "CapAdd", default)]
    pub cap_add: Option<Vec<String>>,
    #[serde(rename = "CapDrop", default)]
    pub cap_drop: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortBinding {
    #[serde(rename = "HostIp", default, skip_serializing_if = "String::is_empty")]
    pub host_ip: String,
    #[serde(rename = "HostPort", default)]
    pub host_port: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestartPolicy {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "MaximumRetryCount", default)]
    pub maximum_retry_count: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkSettings {
    #[serde(rename = "Networks", default)]
    pub networks: HashMap<String, EndpointSettings>,
}

/// Per-network endpoint state; also the body of a network-connect call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointSettings {
    #[serde(rename = "NetworkID", default, skip_serializing_if = "String::is_empty")]
    pub network_id: String,
    #[serde(rename = "IPAddress", default, skip_serializing)]
    pub ip_address: String,
    #[serde(rename = "Gateway", default, skip_serializing)]
    pub gateway: String,
    #[serde(rename = "IPPrefixLen", default, skip_serializing)]
    pub ip_prefix_len: i64,
    #[serde(rename = "Aliases", default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
}

/// Image inspect view. `repo_digests` carries the registry-published
/// manifest digests (`registry/namespace/repo@sha256:...`) — the quantity
/// update detection compares, distinct from the local content-store id.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageInfo {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Vec<String>,
    #[serde(rename = "RepoDigests", default)]
    pub repo_digests: Vec<String>,
    #[serde(rename = "Created", default)]
    pub created: String,
    #[serde(rename = "Size", default)]
    pub size: i64,
}

/// Response of `POST /containers/create`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedContainer {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Warnings", default)]
    pub warnings: Vec<String>,
}

/// Container-create request body: the preserved configuration of the old
/// container with only the image substituted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateContainerBody {
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "Hostname", skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(rename = "User", skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(rename = "WorkingDir", skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(rename = "Env", skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    #[serde(rename = "Cmd", skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(rename = "Entrypoint", skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(rename = "Labels", skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    #[serde(rename = "ExposedPorts", skip_serializing_if = "Option::is_none")]
    pub exposed_ports: Option<HashMap<String, serde_json::Value>>,
    #[serde(rename = "Volumes", skip_serializing_if = "Option::is_none")]
    pub volumes: Option<HashMap<String, serde_json::Value>>,
    #[serde(rename = "HostConfig", skip_serializing_if = "Option::is_none")]
    pub host_config: Option<CreateHostConfig>,
}

/// HostConfig subset carried across a recreate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateHostConfig {
    #[serde(rename = "Binds", skip_serializing_if = "Option::is_none")]
    pub binds: Option<Vec<String>>,
    #[serde(rename = "PortBindings", skip_serializing_if = "Option::is_none")]
    pub port_bindings: Option<HashMap<String, Option<Vec<PortBinding>>>>,
    #[serde(rename = "RestartPolicy", skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
    #[serde(rename = "NetworkMode", skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(rename = "Privileged", skip_serializing_if = "std::ops::Not::not")]
    pub privileged: bool,
    #[serde(rename = "Links", skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
    #[serde(rename = "AutoRemove", skip_serializing_if = "std::ops::Not::not")]
    pub auto_remove: bool,
    #[serde(rename = "PublishAllPorts", skip_serializing_if = "std::ops::Not::not")]
    pub publish_all_ports: bool,
    #[serde(rename = "CapAdd", skip_serializing_if = "Option::is_none")]
    pub cap_add: Option<Vec<String>>,
    #[serde(rename = "CapDrop", skip_serializing_if = "Option::is_none")]
    pub cap_drop: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_strips_slash() {
        let c: Container = serde_json::from_str(
            r#"{"Id": "abc123", "Names": ["/web"], "Image": "nginx"}"#,
        )
        .unwrap();
        assert_eq!(c.name(), "web");
    }

    #[test]
    fn test_container_name_falls_back_to_id() {
        let c: Container = serde_json::from_str(r#"{"Id": "abc123"}"#).unwrap();
        assert_eq!(c.name(), "abc123");
    }

    #[test]
    fn test_short_id() {
        let c: Container = serde_json::from_str(
            r#"{"Id": "0123456789abcdef0123456789abcdef"}"#,
        )
        .unwrap();
        assert_eq!(c.short_id(), "0123456789ab");
    }

    #[test]
    fn test_inspect_parses_null_cmd() {
        let details: ContainerDetails = serde_json::from_str(
            r#"{
                "Id": "abc",
                "Name": "/web",
                "Image": "sha256:111",
                "Config": {"Image": "nginx", "Cmd": null, "Env": ["A=1"]},
                "State": {"Status": "running", "Running": true},
                "HostConfig": {"NetworkMode": "bridge"},
                "NetworkSettings": {"Networks": {"bridge": {"NetworkID": "n1", "Aliases": null}}}
            }"#,
        )
        .unwrap();
        assert_eq!(details.name(), "web");
        assert_eq!(details.config.cmd, None);
        assert_eq!(details.config.env, Some(vec!["A=1".to_string()]));
        assert!(details.state.running);
        assert_eq!(details.network_settings.networks["bridge"].network_id, "n1");
    }

    #[test]
    fn test_image_info_defaults() {
        let info: ImageInfo = serde_json::from_str(r#"{"Id": "sha256:aaa"}"#).unwrap();
        assert!(info.repo_digests.is_empty());
        assert!(info.repo_tags.is_empty());
    }

    #[test]
    fn test_create_body_omits_empty_fields() {
        let body = CreateContainerBody {
            image: "nginx:1.21".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"Image": "nginx:1.21"}));
    }

    #[test]
    fn test_create_body_serializes_host_config() {
        let body = CreateContainerBody {
            image: "nginx:1.21".to_string(),
            env: Some(vec!["A=1".to_string()]),
            host_config: Some(CreateHostConfig {
                binds: Some(vec!["/data:/data".to_string()]),
                privileged: true,
                network_mode: Some("bridge".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["Env"][0], "A=1");
        assert_eq!(json["HostConfig"]["Binds"][0], "/data:/data");
        assert_eq!(json["HostConfig"]["Privileged"], true);
        // Defaults stay out of the body
        assert!(json["HostConfig"].get("AutoRemove").is_none());
        assert!(json.get("Cmd").is_none());
    }

    #[test]
    fn test_endpoint_settings_serializes_connect_subset() {
        let endpoint = EndpointSettings {
            network_id: "n1".to_string(),
            ip_address: "172.17.0.2".to_string(),
            gateway: "172.17.0.1".to_string(),
            ip_prefix_len: 16,
            aliases: Some(vec!["web".to_string()]),
        };
        let json = serde_json::to_value(&endpoint).unwrap();
        // Connect bodies carry identity and aliases, not runtime addresses
        assert_eq!(json["NetworkID"], "n1");
        assert_eq!(json["Aliases"][0], "web");
        assert!(json.get("IPAddress").is_none());
    }

    #[test]
    fn test_string_escaping_in_create_body() {
        let mut labels = HashMap::new();
        labels.insert(
            "note".to_string(),
            "line1\nline2\t\"quoted\\\"".to_string(),
        );
        let body = CreateContainerBody {
            image: "nginx".to_string(),
            labels: Some(labels),
            ..Default::default()
        };
        let text = serde_json::to_string(&body).unwrap();
        assert!(text.contains(r#"line1\nline2\t\"quoted\\\"#));
    }
}
