//! Watchz entry point.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use watchz_cli::Cli;
use watchz_core::RetryPolicy;
use watchz_engine::EngineClient;
use watchz_registry::{CredentialStore, RegistryClient};
use watchz_watcher::{scheduler, EventSink, NotificationDispatcher, Watcher};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing. A set RUST_LOG wins outright; --debug/--trace
    // only supply the fallback filter when it is absent.
    let default_level = if cli.trace {
        "trace"
    } else if cli.debug {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(cli.into_config()?);

    // Credentials: engine user config file, then explicit environment
    let mut credentials = CredentialStore::load_default();
    if let (Ok(user), Ok(password)) = (
        std::env::var("DOCKER_USERNAME"),
        std::env::var("DOCKER_PASSWORD"),
    ) {
        credentials.add("docker.io", &user, &password);
    }
    let credentials = Arc::new(credentials);

    let registry = Arc::new(RegistryClient::new(
        credentials.clone(),
        RetryPolicy::default(),
    )?);

    // Cannot reach the engine: fatal at startup
    let engine = Arc::new(
        EngineClient::connect(
            config.socket_path()?,
            config.api_version.clone(),
            RetryPolicy::default(),
        )
        .await?,
    );
    tracing::info!(
        host = %config.host,
        api_version = engine.api_version(),
        interval = config.interval,
        "watchz {} started",
        watchz_core::VERSION
    );

    let dispatcher = if config.notification_urls.is_empty() {
        None
    } else {
        Some(Arc::new(NotificationDispatcher::from_urls(
            &config.notification_urls,
            config.notification_level,
        )?))
    };
    let sink = EventSink::new(dispatcher, config.notification_report);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let watcher = Watcher::new(
        engine,
        registry,
        credentials,
        config.clone(),
        sink,
        shutdown_rx.clone(),
    );

    if config.run_once {
        scheduler::run_once(move || {
            let watcher = watcher.clone();
            async move {
                watcher.run_tick().await;
            }
        })
        .await;
    } else {
        scheduler::run_periodic(config.interval_duration(), shutdown_rx, move || {
            let watcher = watcher.clone();
            async move {
                watcher.run_tick().await;
            }
        })
        .await;
    }

    Ok(())
}

/// Feed SIGINT/SIGTERM into the shutdown channel.
fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let interrupted = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        let terminated = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cannot install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = interrupted => tracing::info!("interrupt received, shutting down"),
            _ = terminated => tracing::info!("termination requested, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });
}
