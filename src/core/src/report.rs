//! Per-scan events, update results, and the session report.
//!
//! The update engine posts an [`UpdateEvent`] at every state transition and
//! one [`UpdateResult`] per container per scan tick. The event sink folds the
//! results into a [`SessionReport`] that is finalized when the tick ends.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Severity of an update event, ordered `debug < info < warn < error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for EventLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "unknown notification level: '{s}' (supported: debug, info, warn, error)"
            )),
        }
    }
}

/// State-machine transition reported by the update engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    Checking,
    UpdateAvailable,
    Pulling,
    Stopping,
    Starting,
    Success,
    Failed,
    Skipped,
}

impl UpdatePhase {
    /// Default severity for events in this phase.
    pub fn level(&self) -> EventLevel {
        match self {
            Self::Checking | Self::Skipped => EventLevel::Debug,
            Self::UpdateAvailable | Self::Pulling | Self::Stopping | Self::Starting
            | Self::Success => EventLevel::Info,
            Self::Failed => EventLevel::Error,
        }
    }
}

/// One structured event, emitted at each update-engine transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub phase: UpdatePhase,
    pub level: EventLevel,
    pub container_name: String,
    pub image: String,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl UpdateEvent {
    /// Create an event for a phase at its default level.
    pub fn new(
        phase: UpdatePhase,
        container_name: impl Into<String>,
        image: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            phase,
            level: phase.level(),
            container_name: container_name.into(),
            image: image.into(),
            message: message.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Terminal disposition of one container in one scan tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// Container was recreated on the new image.
    Success,
    /// An update was attempted and failed.
    Failed,
    /// Drift detected but monitor-only forbids mutation.
    SkippedMonitor,
    /// Reference carries an explicit digest pin.
    SkippedPinned,
    /// Image exists only in the local content store.
    SkippedLocal,
    /// Registry digest matches the running image.
    NoUpdate,
}

/// Per-container result, one per scan tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResult {
    pub container_id: String,
    pub container_name: String,
    pub old_image_id: String,
    pub new_image_id: Option<String>,
    pub outcome: UpdateOutcome,
    pub error: Option<String>,
    pub old_digest: Option<String>,
    pub new_digest: Option<String>,
}

impl UpdateResult {
    /// Result shell for a container before its outcome is known.
    pub fn new(
        container_id: impl Into<String>,
        container_name: impl Into<String>,
        old_image_id: impl Into<String>,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            container_name: container_name.into(),
            old_image_id: old_image_id.into(),
            new_image_id: None,
            outcome: UpdateOutcome::NoUpdate,
            error: None,
            old_digest: None,
            new_digest: None,
        }
    }

    /// Mark the result failed with the given error text.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.outcome = UpdateOutcome::Failed;
        self.error = Some(error.into());
        self
    }
}

/// Tick-level classification of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    /// Every attempted update succeeded.
    Completed,
    /// Some updates succeeded, some failed.
    PartialFailure,
    /// Every attempted update failed.
    Failed,
}

/// Aggregated report for one scan tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub scanned: usize,
    pub with_updates: usize,
    pub updated: usize,
    pub failed: usize,
    pub results: Vec<UpdateResult>,
    pub status: SessionStatus,
}

impl SessionReport {
    /// Start a new session. The id is wall-clock millis plus random suffix.
    pub fn begin() -> Self {
        let now = chrono::Utc::now();
        let session_id = format!(
            "{}-{}",
            now.timestamp_millis(),
            uuid::Uuid::new_v4().simple()
        );
        Self {
            session_id,
            start_time: now,
            end_time: None,
            scanned: 0,
            with_updates: 0,
            updated: 0,
            failed: 0,
            results: Vec::new(),
            status: SessionStatus::Running,
        }
    }

    /// Record one container result and update the counters.
    pub fn record(&mut self, result: UpdateResult) {
        self.scanned += 1;
        match result.outcome {
            UpdateOutcome::Success => {
                self.with_updates += 1;
                self.updated += 1;
            }
            UpdateOutcome::Failed => {
                self.with_updates += 1;
                self.failed += 1;
            }
            UpdateOutcome::SkippedMonitor => {
                self.with_updates += 1;
            }
            _ => {}
        }
        self.results.push(result);
    }

    /// Close the session and classify its status.
    pub fn finalize(&mut self) {
        self.end_time = Some(chrono::Utc::now());
        self.status = if self.failed == 0 {
            SessionStatus::Completed
        } else if self.updated > 0 {
            SessionStatus::PartialFailure
        } else {
            SessionStatus::Failed
        };
    }

    /// Human-readable one-paragraph summary used for notifications.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Session {}: scanned {}, {} with updates, {} updated, {} failed",
            self.session_id, self.scanned, self.with_updates, self.updated, self.failed
        )];
        let mut by_outcome: HashMap<&str, Vec<&str>> = HashMap::new();
        for r in &self.results {
            let key = match r.outcome {
                UpdateOutcome::Success => "updated",
                UpdateOutcome::Failed => "failed",
                UpdateOutcome::SkippedMonitor => "monitor-only",
                UpdateOutcome::SkippedPinned => "pinned",
                UpdateOutcome::SkippedLocal => "local",
                UpdateOutcome::NoUpdate => continue,
            };
            by_outcome
                .entry(key)
                .or_default()
                .push(r.container_name.as_str());
        }
        let mut keys: Vec<&&str> = by_outcome.keys().collect();
        keys.sort();
        for key in keys {
            lines.push(format!("  {}: {}", key, by_outcome[*key].join(", ")));
        }
        lines.join("\n")
    }
}
