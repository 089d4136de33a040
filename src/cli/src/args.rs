//! Command-line surface and environment overlay.
//!
//! Flags win over `WATCHZ_*` / `DOCKER_*` environment variables, which win
//! over defaults; clap's `env` attribute encodes that precedence directly.

use clap::Parser;
use watchz_core::{EventLevel, Result, WatchConfig, WatchError};

/// Watchz - watches container base images and recreates workloads when
/// their registry manifest drifts.
#[derive(Debug, Parser)]
#[command(name = "watchz", version, about)]
pub struct Cli {
    /// Seconds between scans
    #[arg(short = 'i', long, env = "WATCHZ_POLL_INTERVAL", default_value_t = 86_400)]
    pub interval: u64,

    /// Run a single scan and exit
    #[arg(short = 'R', long)]
    pub run_once: bool,

    /// Remove the old image after a successful update
    #[arg(short = 'c', long, env = "WATCHZ_CLEANUP")]
    pub cleanup: bool,

    /// Also scan containers that are not running
    #[arg(short = 'S', long)]
    pub include_stopped: bool,

    /// Start stopped containers again after updating them
    #[arg(long)]
    pub revive_stopped: bool,

    /// Debug logging
    #[arg(short = 'd', long, env = "WATCHZ_DEBUG")]
    pub debug: bool,

    /// Trace logging (implies --debug)
    #[arg(long)]
    pub trace: bool,

    /// Report drift without mutating anything
    #[arg(long, env = "WATCHZ_MONITOR_ONLY")]
    pub monitor_only: bool,

    /// Recreate from the locally available image without pulling
    #[arg(long)]
    pub no_pull: bool,

    /// Pull new images but leave containers untouched
    #[arg(long)]
    pub no_restart: bool,

    /// Serialize updates with a gap instead of running them in parallel
    #[arg(long)]
    pub rolling_restart: bool,

    /// Seconds the engine waits before force-killing a stopping container
    #[arg(long, default_value_t = 10)]
    pub stop_timeout: u64,

    /// Only watch containers carrying the enable label
    #[arg(long, env = "WATCHZ_LABEL_ENABLE")]
    pub label_enable: bool,

    /// Only watch containers whose scope label matches
    #[arg(long, env = "WATCHZ_SCOPE")]
    pub scope: Option<String>,

    /// Engine endpoint URI (unix:// stream socket)
    #[arg(
        short = 'H',
        long,
        env = "DOCKER_HOST",
        default_value = "unix:///var/run/docker.sock"
    )]
    pub host: String,

    /// Pin the engine API version instead of negotiating it
    #[arg(short = 'a', long)]
    pub api_version: Option<String>,

    /// Verify TLS on the engine connection (tcp hosts only)
    #[arg(long)]
    pub tlsverify: bool,

    /// Notification URLs (service://... grammar), comma separated
    #[arg(long, env = "WATCHZ_NOTIFICATION_URL", value_delimiter = ',')]
    pub notification_url: Vec<String>,

    /// Minimum level dispatched to notifiers: debug, info, warn, error
    #[arg(long, env = "WATCHZ_NOTIFICATION_LEVEL", default_value = "info")]
    pub notification_level: String,

    /// Send one session report per scan instead of per-event messages
    #[arg(long, env = "WATCHZ_NOTIFICATION_REPORT")]
    pub notification_report: bool,

    /// Containers to watch (all running containers if omitted)
    pub containers: Vec<String>,
}

impl Cli {
    /// Validate and convert into the immutable process configuration.
    pub fn into_config(self) -> Result<WatchConfig> {
        if self.interval == 0 {
            return Err(WatchError::Config(
                "--interval must be at least 1 second".to_string(),
            ));
        }
        let notification_level: EventLevel = self
            .notification_level
            .parse()
            .map_err(WatchError::Config)?;

        if self.tlsverify {
            tracing::warn!("--tlsverify only applies to tcp hosts and is ignored for unix sockets");
        }

        let config = WatchConfig {
            interval: self.interval,
            run_once: self.run_once,
            cleanup: self.cleanup,
            include_stopped: self.include_stopped,
            revive_stopped: self.revive_stopped,
            monitor_only: self.monitor_only,
            no_pull: self.no_pull,
            no_restart: self.no_restart,
            rolling_restart: self.rolling_restart,
            stop_timeout: self.stop_timeout,
            label_enable: self.label_enable,
            scope: self.scope,
            container_names: self.containers,
            host: self.host,
            api_version: self.api_version,
            notification_urls: self
                .notification_url
                .into_iter()
                .filter(|u| !u.is_empty())
                .collect(),
            notification_level,
            notification_report: self.notification_report,
        };

        // Bad host URIs are fatal at startup, not at first use
        config.socket_path()?;
        Ok(config)
    }
}
