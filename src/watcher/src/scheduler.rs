//! One-shot and periodic scan drivers.
//!
//! The periodic driver subtracts the scan's own duration from the interval
//! so a slow scan never drifts the cadence. Shutdown is cooperative: the
//! watch channel short-circuits the inter-tick sleep, and the update engine
//! observes the same channel between states.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Run a single scan and return.
pub async fn run_once<F, Fut>(mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    tick().await;
}

/// Run scans forever at `interval` until shutdown fires.
///
/// Each iteration records its start, runs the tick (tick errors are the
/// tick's own business; the loop never stops for them), and sleeps for
/// whatever remains of the interval.
pub async fn run_periodic<F, Fut>(
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        if *shutdown.borrow() {
            break;
        }

        let started = Instant::now();
        tick().await;

        let sleep = interval.saturating_sub(started.elapsed());
        tracing::debug!(seconds = sleep.as_secs(), "next scan scheduled");

        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            changed = shutdown.changed() => {
                // A dropped sender counts as shutdown
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_run_once_runs_exactly_once() {
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        run_once(move || {
            let c = c.clone();
            async move {
                *c.lock().unwrap() += 1;
            }
        })
        .await;
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tick_does_not_drift_cadence() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let starts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let recorded = starts.clone();
        let driver = tokio::spawn(run_periodic(
            Duration::from_secs(10),
            stop_rx,
            move || {
                let recorded = recorded.clone();
                async move {
                    recorded.lock().unwrap().push(Instant::now());
                    // A scan that eats 4 of the 10 seconds
                    tokio::time::sleep(Duration::from_secs(4)).await;
                }
            },
        ));

        tokio::time::sleep(Duration::from_secs(25)).await;
        stop_tx.send(true).unwrap();
        driver.await.unwrap();

        let starts = starts.lock().unwrap();
        assert!(starts.len() >= 3, "expected 3 ticks, got {}", starts.len());
        // Tick starts stay 10 s apart despite the 4 s scan
        let gap1 = starts[1].duration_since(starts[0]);
        let gap2 = starts[2].duration_since(starts[1]);
        assert_eq!(gap1, Duration::from_secs(10));
        assert_eq!(gap2, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_longer_than_interval_reruns_immediately() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let count = Arc::new(Mutex::new(0));

        let c = count.clone();
        let driver = tokio::spawn(run_periodic(
            Duration::from_secs(2),
            stop_rx,
            move || {
                let c = c.clone();
                async move {
                    *c.lock().unwrap() += 1;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            },
        ));

        tokio::time::sleep(Duration::from_secs(11)).await;
        stop_tx.send(true).unwrap();
        driver.await.unwrap();

        // Sleep clamps at zero: ticks run back to back
        assert!(*count.lock().unwrap() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_short_circuits_sleep() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let driver = tokio::spawn(run_periodic(
            Duration::from_secs(86_400),
            stop_rx,
            || async {},
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        stop_tx.send(true).unwrap();

        // Must return long before the day-long interval
        tokio::time::timeout(Duration::from_secs(5), driver)
            .await
            .expect("scheduler did not stop on shutdown")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_stops_loop() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let driver = tokio::spawn(run_periodic(
            Duration::from_secs(3600),
            stop_rx,
            || async {},
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(stop_tx);

        tokio::time::timeout(Duration::from_secs(5), driver)
            .await
            .expect("scheduler did not stop after sender drop")
            .unwrap();
    }
}
