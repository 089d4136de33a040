//! The per-container update state machine.
//!
//! One scan tick is: list, select, check every watched container for
//! manifest drift, then drive `update` for the drifted ones. The update
//! sequence is strictly ordered per container; rollback points are the two
//! states where the old workload can still be saved (failed `remove`
//! restarts the old container, failed `start` removes the half-made new
//! one). Network failures during reattachment are logged, never terminal.

use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use watchz_core::{
    SessionReport, UpdateEvent, UpdateOutcome, UpdatePhase, UpdateResult, WatchConfig,
};
use watchz_engine::{
    Container, ContainerDetails, ContainerEngine, CreateContainerBody, CreateHostConfig,
    ImageInfo,
};
use watchz_registry::{CredentialStore, ImageReference, UpdateSource};

use crate::selector::{select, Selection};
use crate::session::EventSink;

/// Gap between sequential updates under rolling restart.
const ROLLING_GAP: std::time::Duration = std::time::Duration::from_secs(5);

/// A container that needs updating, carried from the check phase into the
/// mutation phase along with everything needed to recreate it.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub container: Container,
    pub selection: Selection,
    pub reference: ImageReference,
    pub details: ContainerDetails,
    pub current_digest: String,
    pub latest_digest: Option<String>,
}

/// Outcome of the check phase for one container.
enum Decision {
    /// Terminal without mutation; record as-is.
    Done(UpdateResult),
    /// Drift confirmed, mutation allowed.
    Update(Box<PendingUpdate>),
}

/// The update engine: owns one scan tick end to end.
#[derive(Clone)]
pub struct Watcher {
    engine: Arc<dyn ContainerEngine>,
    source: Arc<dyn UpdateSource>,
    credentials: Arc<CredentialStore>,
    config: Arc<WatchConfig>,
    sink: EventSink,
    shutdown: watch::Receiver<bool>,
}

impl Watcher {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        source: Arc<dyn UpdateSource>,
        credentials: Arc<CredentialStore>,
        config: Arc<WatchConfig>,
        sink: EventSink,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            source,
            credentials,
            config,
            sink,
            shutdown,
        }
    }

    /// Whether shutdown was requested. In-flight updates finish the state
    /// they are in but do not enter a new one.
    fn cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// One scan tick: list, select, check, update, report.
    pub async fn run_tick(&self) -> SessionReport {
        let session_id = self.sink.begin().await;
        tracing::info!(session = %session_id, "starting scan");

        let containers = match self
            .engine
            .list_containers(self.config.include_stopped)
            .await
        {
            Ok(containers) => containers,
            Err(e) => {
                tracing::error!(error = %e, "cannot list containers, aborting scan");
                return self.sink.finalize().await;
            }
        };

        let total = containers.len();
        let watched: Vec<(Container, Selection)> = containers
            .into_iter()
            .filter_map(|c| {
                let selection = select(&self.config, &c);
                if selection.watch {
                    Some((c, selection))
                } else {
                    tracing::debug!(container = c.name(), "not watched");
                    None
                }
            })
            .collect();
        tracing::debug!(total, watched = watched.len(), "selected containers");

        // Drift checks fan out bounded; the registry client serializes
        // same-repository checks so a cold token is fetched once.
        let semaphore = Arc::new(Semaphore::new(max_parallel()));
        let decisions = futures::future::join_all(watched.iter().map(|(c, selection)| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.ok();
                self.check_container(c, selection).await
            }
        }))
        .await;

        let mut pending = Vec::new();
        for decision in decisions {
            match decision {
                Decision::Done(result) => self.sink.record(result).await,
                Decision::Update(p) => pending.push(*p),
            }
        }

        if !pending.is_empty() {
            for result in self.update_batch(pending).await {
                self.sink.record(result).await;
            }
        }

        let report = self.sink.finalize().await;
        tracing::info!(
            session = %report.session_id,
            scanned = report.scanned,
            updated = report.updated,
            failed = report.failed,
            status = ?report.status,
            "scan finished"
        );
        report
    }

    /// Check phase for one container: resolve its current manifest digest
    /// and ask the registry whether it drifted.
    async fn check_container(&self, container: &Container, selection: &Selection) -> Decision {
        let name = container.name().to_string();
        let image = container.image.clone();
        self.sink
            .post(UpdateEvent::new(
                UpdatePhase::Checking,
                &name,
                &image,
                "checking for image drift",
            ))
            .await;

        let mut result = UpdateResult::new(&container.id, &name, &container.image_id);

        // A bare content-store id cannot be checked against any registry
        if image.starts_with("sha256:") {
            result.outcome = UpdateOutcome::SkippedLocal;
            return Decision::Done(result);
        }

        let reference = match ImageReference::parse(&image) {
            Ok(reference) => reference,
            Err(e) => return Decision::Done(result.failed(e.to_string())),
        };

        // Inspect up front: the recreate surface, and the running state the
        // rollback paths depend on
        let details = match self.engine.inspect_container(&container.id).await {
            Ok(details) => details,
            Err(e) => return Decision::Done(result.failed(format!("inspect: {e}"))),
        };

        let info = match self.engine.inspect_image(&image).await {
            Ok(info) => info,
            Err(e) => {
                // Degraded mode: the tag may be gone; inspect by the
                // container's own image id instead.
                tracing::debug!(container = %name, error = %e, "image inspect by name failed");
                match self.engine.inspect_image(&container.image_id).await {
                    Ok(info) => info,
                    Err(e) => {
                        return Decision::Done(result.failed(format!("inspect image: {e}")))
                    }
                }
            }
        };

        let Some(current) = current_digest(&reference, &info) else {
            // Locally built or untagged image: nothing to compare against
            result.outcome = UpdateOutcome::SkippedLocal;
            return Decision::Done(result);
        };
        result.old_digest = Some(current.clone());

        let check = match self.source.check_for_update(&current, &image).await {
            Ok(check) => check,
            Err(e) => {
                self.sink
                    .post(UpdateEvent::new(
                        UpdatePhase::Failed,
                        &name,
                        &image,
                        format!("drift check failed: {e}"),
                    ))
                    .await;
                return Decision::Done(result.failed(e.to_string()));
            }
        };

        result.new_digest = check.latest.clone();
        match check.message.as_deref() {
            Some("digest-pinned") => {
                result.outcome = UpdateOutcome::SkippedPinned;
                return Decision::Done(result);
            }
            Some("local image") => {
                result.outcome = UpdateOutcome::SkippedLocal;
                return Decision::Done(result);
            }
            _ => {}
        }

        if !check.has_update {
            result.outcome = UpdateOutcome::NoUpdate;
            return Decision::Done(result);
        }

        self.sink
            .post(UpdateEvent::new(
                UpdatePhase::UpdateAvailable,
                &name,
                &image,
                format!(
                    "new image available ({} -> {})",
                    short_digest(&current),
                    check.latest.as_deref().map(short_digest).unwrap_or("?")
                ),
            ))
            .await;

        if selection.monitor_only {
            self.sink
                .post(UpdateEvent::new(
                    UpdatePhase::Skipped,
                    &name,
                    &image,
                    "monitor-only, not updating",
                ))
                .await;
            result.outcome = UpdateOutcome::SkippedMonitor;
            return Decision::Done(result);
        }

        Decision::Update(Box::new(PendingUpdate {
            container: container.clone(),
            selection: selection.clone(),
            reference,
            details,
            current_digest: current,
            latest_digest: check.latest,
        }))
    }

    /// Update a batch: sequential with a gap under rolling restart (or for
    /// a single container), parallel bounded by CPU count otherwise.
    pub async fn update_batch(&self, work: Vec<PendingUpdate>) -> Vec<UpdateResult> {
        let mut results = Vec::new();

        if self.config.rolling_restart || work.len() == 1 {
            let total = work.len();
            for (i, pending) in work.into_iter().enumerate() {
                if self.cancelled() {
                    results.push(interrupted(&pending));
                    continue;
                }
                results.push(self.update_container(pending).await);
                if i + 1 < total {
                    self.gap().await;
                }
            }
            return results;
        }

        let semaphore = Arc::new(Semaphore::new(max_parallel()));
        let mut handles = Vec::new();
        for pending in work {
            let watcher = self.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                if watcher.cancelled() {
                    return interrupted(&pending);
                }
                watcher.update_container(pending).await
            }));
        }
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!(error = %e, "update task panicked"),
            }
        }
        results
    }

    /// Shutdown-aware inter-update sleep.
    async fn gap(&self) {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(ROLLING_GAP) => {}
            _ = shutdown.changed() => {}
        }
    }

    /// The state machine for one container.
    pub async fn update_container(&self, pending: PendingUpdate) -> UpdateResult {
        let PendingUpdate {
            container,
            selection,
            reference,
            details,
            current_digest,
            latest_digest,
        } = pending;
        let name = container.name().to_string();
        let image = container.image.clone();

        let mut result = UpdateResult::new(&container.id, &name, &container.image_id);
        result.old_digest = Some(current_digest);
        result.new_digest = latest_digest;

        let was_running = details.state.running;

        // Pull
        if !selection.no_pull {
            if self.cancelled() {
                return result.failed("interrupted before pull");
            }
            self.sink
                .post(UpdateEvent::new(
                    UpdatePhase::Pulling,
                    &name,
                    &image,
                    "pulling new image",
                ))
                .await;
            let auth = self
                .credentials
                .get(&reference.registry)
                .map(|c| c.registry_auth_header());
            if let Err(e) = self.engine.pull_image(&image, auth.as_deref()).await {
                return self.fail(result, &name, &image, "pull", e).await;
            }
        }

        // What the tag resolves to now, for the result and image cleanup
        let new_image_id = self
            .engine
            .inspect_image(&image)
            .await
            .ok()
            .map(|info: ImageInfo| info.id);
        result.new_image_id = new_image_id.clone();

        if self.config.no_restart {
            result.outcome = UpdateOutcome::Success;
            self.sink
                .post(UpdateEvent::new(
                    UpdatePhase::Success,
                    &name,
                    &image,
                    "new image pulled, restart suppressed",
                ))
                .await;
            return result;
        }

        // Stop
        if was_running {
            if self.cancelled() {
                return result.failed("interrupted before stop");
            }
            self.sink
                .post(UpdateEvent::new(
                    UpdatePhase::Stopping,
                    &name,
                    &image,
                    "stopping outdated container",
                ))
                .await;
            if let Err(e) = self
                .engine
                .stop_container(
                    &container.id,
                    self.config.stop_timeout,
                    selection.stop_signal.as_deref(),
                )
                .await
            {
                return self.fail(result, &name, &image, "stop", e).await;
            }
        }

        // Remove; on failure try to bring the old workload back
        if self.cancelled() {
            return result.failed("interrupted before remove");
        }
        if let Err(e) = self.engine.remove_container(&container.id, false).await {
            if was_running {
                if let Err(restart_err) = self.engine.start_container(&container.id).await {
                    tracing::warn!(
                        container = %name,
                        error = %restart_err,
                        "rollback restart of old container failed"
                    );
                }
            }
            return self.fail(result, &name, &image, "remove", e).await;
        }

        // Create with preserved configuration; from here the old container
        // is gone, so a failure loses the workload
        let body = recreate_body(&details, &image);
        let new_id = match self.engine.create_container(&name, &body).await {
            Ok(id) => id,
            Err(e) => {
                return self
                    .fail(result, &name, &image, "create (old container removed)", e)
                    .await
            }
        };

        // Reattach networks; per-network failures are logged, not terminal
        self.reattach_networks(&details, &new_id).await;

        // Start, unless the old container was stopped and staying stopped
        if was_running || self.config.revive_stopped {
            self.sink
                .post(UpdateEvent::new(
                    UpdatePhase::Starting,
                    &name,
                    &image,
                    "starting updated container",
                ))
                .await;
            if let Err(e) = self.engine.start_container(&new_id).await {
                if let Err(remove_err) = self.engine.remove_container(&new_id, false).await {
                    tracing::warn!(
                        container = %name,
                        error = %remove_err,
                        "rollback removal of new container failed"
                    );
                }
                return self.fail(result, &name, &image, "start", e).await;
            }
        }

        // Cleanup the superseded image, best-effort
        if self.config.cleanup && new_image_id.as_deref() != Some(container.image_id.as_str()) {
            if let Err(e) = self.engine.remove_image(&container.image_id).await {
                tracing::debug!(
                    image_id = %container.image_id,
                    error = %e,
                    "old image cleanup failed"
                );
            }
        }

        result.outcome = UpdateOutcome::Success;
        self.sink
            .post(UpdateEvent::new(
                UpdatePhase::Success,
                &name,
                &image,
                "container updated",
            ))
            .await;
        result
    }

    /// Record a failed state with its event.
    async fn fail(
        &self,
        result: UpdateResult,
        name: &str,
        image: &str,
        state: &str,
        error: watchz_core::WatchError,
    ) -> UpdateResult {
        self.sink
            .post(UpdateEvent::new(
                UpdatePhase::Failed,
                name,
                image,
                format!("{state} failed: {error}"),
            ))
            .await;
        result.failed(format!("{state}: {error}"))
    }

    /// Reattach the new container to the old one's networks.
    ///
    /// The create call carries at most one network (via `NetworkMode`); the
    /// engine auto-attaches it. Detach that one first, then connect every
    /// original network, carrying over its aliases minus the old
    /// container's short-id alias the engine injected.
    async fn reattach_networks(&self, details: &ContainerDetails, new_id: &str) {
        let networks = &details.network_settings.networks;
        if networks.is_empty() || details.host_config.network_mode == "host" {
            return;
        }

        let network_mode = &details.host_config.network_mode;
        let initial = networks
            .keys()
            .find(|name| *name == network_mode)
            .cloned()
            .or_else(|| networks.keys().min().cloned());
        if let Some(initial) = initial {
            if let Err(e) = self.engine.network_disconnect(&initial, new_id, false).await {
                tracing::warn!(network = %initial, error = %e, "initial network disconnect failed");
            }
        }

        let old_short_id = details.short_id();
        for (name, endpoint) in networks {
            let mut endpoint = endpoint.clone();
            if let Some(aliases) = endpoint.aliases.take() {
                let aliases: Vec<String> =
                    aliases.into_iter().filter(|a| a != old_short_id).collect();
                if !aliases.is_empty() {
                    endpoint.aliases = Some(aliases);
                }
            }
            let target = if endpoint.network_id.is_empty() {
                name.clone()
            } else {
                endpoint.network_id.clone()
            };
            if let Err(e) = self
                .engine
                .network_connect(&target, new_id, Some(&endpoint))
                .await
            {
                tracing::warn!(network = %name, error = %e, "network reattach failed");
            }
        }
    }
}

/// Result for an update that was cancelled before it could begin.
fn interrupted(pending: &PendingUpdate) -> UpdateResult {
    UpdateResult::new(
        &pending.container.id,
        pending.container.name(),
        &pending.container.image_id,
    )
    .failed("interrupted by shutdown")
}

/// The manifest digest the engine recorded for this reference, from the
/// image's repo digests. Preferred entry is the one whose repository prefix
/// matches the reference; otherwise the first. `None` means the image was
/// never pulled from a registry.
fn current_digest(reference: &ImageReference, info: &ImageInfo) -> Option<String> {
    let want = format!("{}/{}", reference.registry, reference.repository_path());
    let entry = info
        .repo_digests
        .iter()
        .find(|rd| rd.split('@').next() == Some(want.as_str()))
        .or_else(|| info.repo_digests.first())?;
    entry.split_once('@').map(|(_, digest)| digest.to_string())
}

/// Build the create body preserving the old container's configuration with
/// only the image substituted. Empty fields stay out of the body.
pub fn recreate_body(details: &ContainerDetails, image: &str) -> CreateContainerBody {
    let config = &details.config;
    let hc = &details.host_config;

    CreateContainerBody {
        image: image.to_string(),
        hostname: non_empty(&config.hostname),
        user: non_empty(&config.user),
        working_dir: non_empty(&config.working_dir),
        env: config.env.clone().filter(|v| !v.is_empty()),
        cmd: config.cmd.clone().filter(|v| !v.is_empty()),
        entrypoint: config.entrypoint.clone().filter(|v| !v.is_empty()),
        labels: (!config.labels.is_empty()).then(|| config.labels.clone()),
        exposed_ports: config.exposed_ports.clone().filter(|m| !m.is_empty()),
        volumes: config.volumes.clone().filter(|m| !m.is_empty()),
        host_config: Some(CreateHostConfig {
            binds: hc.binds.clone().filter(|v| !v.is_empty()),
            port_bindings: hc.port_bindings.clone().filter(|m| !m.is_empty()),
            restart_policy: hc
                .restart_policy
                .clone()
                .filter(|p| !p.name.is_empty()),
            network_mode: non_empty(&hc.network_mode),
            privileged: hc.privileged,
            links: hc.links.clone().filter(|v| !v.is_empty()),
            auto_remove: hc.auto_remove,
            publish_all_ports: hc.publish_all_ports,
            cap_add: hc.cap_add.clone().filter(|v| !v.is_empty()),
            cap_drop: hc.cap_drop.clone().filter(|v| !v.is_empty()),
        }),
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn short_digest(digest: &str) -> &str {
    let start = digest.find(':').map(|i| i + 1).unwrap_or(0);
    &digest[start..digest.len().min(start + 12)]
}

/// Parallel update bound: number of CPUs.
fn max_parallel() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
