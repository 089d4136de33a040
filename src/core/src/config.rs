//! Process-wide watcher configuration.
//!
//! Built once at startup from defaults, environment, and flags (in that
//! precedence order, later wins) and shared read-only across every scan tick.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatchError};
use crate::report::EventLevel;

/// Default scan interval: once a day.
pub const DEFAULT_INTERVAL_SECS: u64 = 86_400;

/// Default seconds the engine waits before force-killing a stopping container.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Default engine endpoint.
pub const DEFAULT_HOST: &str = "unix:///var/run/docker.sock";

/// Watcher configuration, immutable after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Seconds between scan ticks.
    pub interval: u64,

    /// Run a single scan tick and exit.
    pub run_once: bool,

    /// Remove the old image after a successful update.
    pub cleanup: bool,

    /// Also scan containers that are not running.
    pub include_stopped: bool,

    /// Start a stopped container again after recreating it.
    pub revive_stopped: bool,

    /// Report drift but never mutate.
    pub monitor_only: bool,

    /// Recreate from the locally available image without pulling.
    pub no_pull: bool,

    /// Pull the new image but leave the running container untouched.
    pub no_restart: bool,

    /// Serialize batch updates with an inter-update gap.
    pub rolling_restart: bool,

    /// Seconds the engine waits before force-killing a stopping container.
    pub stop_timeout: u64,

    /// Only watch containers that opted in via the enable label.
    pub label_enable: bool,

    /// Scope label value this instance is responsible for.
    pub scope: Option<String>,

    /// Explicit container names to watch; empty means all.
    pub container_names: Vec<String>,

    /// Engine endpoint URI (only `unix://` stream sockets are supported).
    pub host: String,

    /// Pinned engine API version; negotiated when unset.
    pub api_version: Option<String>,

    /// Notification endpoint URLs (service://... grammar).
    pub notification_urls: Vec<String>,

    /// Minimum event level that is dispatched to notifiers.
    pub notification_level: EventLevel,

    /// Send one session report per tick instead of per-event messages.
    pub notification_report: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL_SECS,
            run_once: false,
            cleanup: false,
            include_stopped: false,
            revive_stopped: false,
            monitor_only: false,
            no_pull: false,
            no_restart: false,
            rolling_restart: false,
            stop_timeout: DEFAULT_STOP_TIMEOUT_SECS,
            label_enable: false,
            scope: None,
            container_names: Vec::new(),
            host: DEFAULT_HOST.to_string(),
            api_version: None,
            notification_urls: Vec::new(),
            notification_level: EventLevel::Info,
            notification_report: false,
        }
    }
}

impl WatchConfig {
    /// Scan interval as a [`Duration`].
    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    /// Stop timeout as a [`Duration`].
    pub fn stop_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.stop_timeout)
    }

    /// Resolve the engine socket path from the host URI.
    ///
    /// Only `unix://` URIs are accepted; anything else is a fatal
    /// configuration error.
    pub fn socket_path(&self) -> Result<PathBuf> {
        if let Some(path) = self.host.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(WatchError::Config(format!(
                    "empty socket path in host URI '{}'",
                    self.host
                )));
            }
            return Ok(PathBuf::from(path));
        }
        Err(WatchError::Config(format!(
            "unsupported host URI '{}' (only unix:// stream sockets are supported)",
            self.host
        )))
    }

    /// Whether `name` passes the explicit container-name filter.
    pub fn name_in_scope(&self, name: &str) -> bool {
        if self.container_names.is_empty() {
            return true;
        }
        let name = name.strip_prefix('/').unwrap_or(name);
        self.container_names
            .iter()
            .any(|n| n.strip_prefix('/').unwrap_or(n) == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WatchConfig::default();
        assert_eq!(config.interval, 86_400);
        assert_eq!(config.stop_timeout, 10);
        assert_eq!(config.host, "unix:///var/run/docker.sock");
        assert!(!config.run_once);
        assert!(config.container_names.is_empty());
    }

    #[test]
    fn test_socket_path_from_unix_uri() {
        let config = WatchConfig {
            host: "unix:///run/user/1000/podman/podman.sock".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.socket_path().unwrap(),
            PathBuf::from("/run/user/1000/podman/podman.sock")
        );
    }

    #[test]
    fn test_socket_path_rejects_tcp() {
        let config = WatchConfig {
            host: "tcp://127.0.0.1:2375".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.socket_path(),
            Err(WatchError::Config(_))
        ));
    }

    #[test]
    fn test_socket_path_rejects_empty() {
        let config = WatchConfig {
            host: "unix://".to_string(),
            ..Default::default()
        };
        assert!(config.socket_path().is_err());
    }

    #[test]
    fn test_name_in_scope_empty_list_watches_all() {
        let config = WatchConfig::default();
        assert!(config.name_in_scope("web"));
        assert!(config.name_in_scope("/web"));
    }

    #[test]
    fn test_name_in_scope_explicit_list() {
        let config = WatchConfig {
            container_names: vec!["web".to_string(), "db".to_string()],
            ..Default::default()
        };
        assert!(config.name_in_scope("web"));
        assert!(config.name_in_scope("/db"));
        assert!(!config.name_in_scope("cache"));
    }
}
