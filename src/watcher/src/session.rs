//! Event sink and session aggregation.
//!
//! Update tasks post events and results from independent tasks; the sink
//! serializes them into the tick's [`SessionReport`] and forwards what the
//! notification settings ask for (per-event messages, or one report at
//! finalize).

use std::sync::Arc;

use tokio::sync::Mutex;
use watchz_core::{EventLevel, SessionReport, UpdateEvent, UpdateResult};

use crate::notify::NotificationDispatcher;

/// Shared sink for one process; the report inside is reset per tick.
#[derive(Clone)]
pub struct EventSink {
    report: Arc<Mutex<SessionReport>>,
    dispatcher: Option<Arc<NotificationDispatcher>>,
    /// Send one report per tick instead of per-event messages.
    report_mode: bool,
}

impl EventSink {
    pub fn new(dispatcher: Option<Arc<NotificationDispatcher>>, report_mode: bool) -> Self {
        Self {
            report: Arc::new(Mutex::new(SessionReport::begin())),
            dispatcher,
            report_mode,
        }
    }

    /// Sink without any notifiers (events are still logged and aggregated).
    pub fn disabled() -> Self {
        Self::new(None, false)
    }

    /// Reset the report for a new scan tick; returns its session id.
    pub async fn begin(&self) -> String {
        let mut report = self.report.lock().await;
        *report = SessionReport::begin();
        report.session_id.clone()
    }

    /// Post one state-transition event: logged, and dispatched immediately
    /// unless report mode batches everything into the final report.
    pub async fn post(&self, event: UpdateEvent) {
        match event.level {
            EventLevel::Debug => tracing::debug!(
                container = %event.container_name,
                image = %event.image,
                phase = ?event.phase,
                "{}", event.message
            ),
            EventLevel::Info => tracing::info!(
                container = %event.container_name,
                image = %event.image,
                phase = ?event.phase,
                "{}", event.message
            ),
            EventLevel::Warn => tracing::warn!(
                container = %event.container_name,
                image = %event.image,
                phase = ?event.phase,
                "{}", event.message
            ),
            EventLevel::Error => tracing::error!(
                container = %event.container_name,
                image = %event.image,
                phase = ?event.phase,
                "{}", event.message
            ),
        }

        if self.report_mode {
            return;
        }
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.notify_event(&event).await;
        }
    }

    /// Record one container's terminal result for this tick.
    pub async fn record(&self, result: UpdateResult) {
        self.report.lock().await.record(result);
    }

    /// Finalize the tick's report and dispatch it when report mode is on.
    pub async fn finalize(&self) -> SessionReport {
        let report = {
            let mut report = self.report.lock().await;
            report.finalize();
            report.clone()
        };

        if self.report_mode {
            if let Some(dispatcher) = &self.dispatcher {
                dispatcher.notify_report(&report).await;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchz_core::{SessionStatus, UpdateOutcome};

    fn result(name: &str, outcome: UpdateOutcome) -> UpdateResult {
        let mut r = UpdateResult::new("c1", name, "sha256:old");
        r.outcome = outcome;
        r
    }

    #[tokio::test]
    async fn test_record_and_finalize() {
        let sink = EventSink::disabled();
        sink.begin().await;
        sink.record(result("web", UpdateOutcome::Success)).await;
        sink.record(result("db", UpdateOutcome::NoUpdate)).await;

        let report = sink.finalize().await;
        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(report.scanned, 2);
        assert_eq!(report.updated, 1);
    }

    #[tokio::test]
    async fn test_begin_resets_between_ticks() {
        let sink = EventSink::disabled();
        let first = sink.begin().await;
        sink.record(result("web", UpdateOutcome::Failed)).await;
        sink.finalize().await;

        let second = sink.begin().await;
        assert_ne!(first, second);
        let report = sink.finalize().await;
        assert_eq!(report.scanned, 0);
        assert_eq!(report.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_concurrent_records_all_land() {
        let sink = EventSink::disabled();
        sink.begin().await;

        let mut handles = Vec::new();
        for i in 0..16 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                sink.record(result(&format!("c{i}"), UpdateOutcome::Success))
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let report = sink.finalize().await;
        assert_eq!(report.scanned, 16);
        assert_eq!(report.updated, 16);
    }
}
