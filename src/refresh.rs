use crate::errors::{AppError, AppResult};
use crate::store::LeadStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshState {
    Idle,
    Refreshing,
}

#[derive(Debug)]
pub enum TriggerOutcome {
    /// A refresh was already in flight; nothing was started.
    Skipped,
    Completed(AppResult<usize>),
}

/// Resets the in-flight flag even if the refresh task unwinds.
struct InFlightGuard {
    in_flight: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

/// A running interval loop and its own shutdown signal.
struct LoopHandle {
    task: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

/// Polls the store on a fixed interval with at most one refresh in flight.
#[derive(Clone)]
pub struct RefreshTimer {
    store: Arc<LeadStore>,
    interval: Duration,
    in_flight: Arc<AtomicBool>,
    last_attempt: Arc<RwLock<Option<DateTime<Utc>>>>,
    last_success: Arc<RwLock<Option<DateTime<Utc>>>>,
    loop_handle: Arc<Mutex<Option<LoopHandle>>>,
}

impl RefreshTimer {
    pub fn new(store: Arc<LeadStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            in_flight: Arc::new(AtomicBool::new(false)),
            last_attempt: Arc::new(RwLock::new(None)),
            last_success: Arc::new(RwLock::new(None)),
            loop_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> RefreshState {
        if self.in_flight.load(Ordering::SeqCst) {
            RefreshState::Refreshing
        } else {
            RefreshState::Idle
        }
    }

    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.last_attempt.read().ok().and_then(|value| *value)
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success.read().ok().and_then(|value| *value)
    }

    /// Manual refresh. Returns [`TriggerOutcome::Skipped`] while another
    /// refresh is outstanding.
    pub async fn trigger(&self) -> TriggerOutcome {
        let Some(handle) = self.begin() else {
            return TriggerOutcome::Skipped;
        };
        match handle.await {
            Ok(result) => TriggerOutcome::Completed(result),
            Err(error) => TriggerOutcome::Completed(Err(AppError::Internal(format!(
                "refresh task failed: {error}"
            )))),
        }
    }

    /// The refresh runs on its own task so dropping the caller or stopping
    /// the timer never cuts it short.
    fn begin(&self) -> Option<JoinHandle<AppResult<usize>>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("refresh already in flight; trigger ignored");
            return None;
        }

        let timer = self.clone();
        Some(tokio::spawn(async move {
            let _guard = InFlightGuard {
                in_flight: timer.in_flight.clone(),
            };
            let result = timer.store.refresh().await;
            timer.record(&result);
            result
        }))
    }

    fn record(&self, result: &AppResult<usize>) {
        let now = Utc::now();
        if let Ok(mut last_attempt) = self.last_attempt.write() {
            *last_attempt = Some(now);
        }
        match result {
            Ok(count) => {
                if let Ok(mut last_success) = self.last_success.write() {
                    *last_success = Some(now);
                }
                tracing::debug!(leads = count, "scheduled refresh finished");
            }
            Err(error) => {
                tracing::warn!(error = %error, "refresh attempt failed; schedule continues");
            }
        }
    }

    /// Starts the interval loop. Calling it again while running is a no-op.
    pub fn start(&self) {
        let Ok(mut handle) = self.loop_handle.lock() else {
            tracing::error!("refresh loop handle mutex poisoned");
            return;
        };
        if handle.as_ref().map(|existing| !existing.task.is_finished()).unwrap_or(false) {
            return;
        }

        let shutdown = Arc::new(Notify::new());
        let timer = self.clone();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                timer.run_loop(shutdown).await;
            }
        });
        *handle = Some(LoopHandle { task, shutdown });
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "auto-refresh started");
    }

    async fn run_loop(self, shutdown: Arc<Notify>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the store is refreshed at
        // bootstrap, so the schedule starts one interval out.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = ticker.tick() => {
                    let _ = self.begin();
                }
            }
        }
        tracing::info!("auto-refresh stopped");
    }

    /// Cancels the interval loop. An in-flight refresh still completes.
    pub async fn stop(&self) {
        let handle = match self.loop_handle.lock() {
            Ok(mut handle) => handle.take(),
            Err(_) => None,
        };
        let Some(handle) = handle else {
            return;
        };
        handle.shutdown.notify_one();
        if let Err(error) = handle.task.await {
            tracing::warn!(error = %error, "refresh loop ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RefreshState, RefreshTimer, TriggerOutcome};
    use crate::errors::AppResult;
    use crate::models::Lead;
    use crate::source::memory::{MemorySource, SourceOp};
    use crate::source::LeadSource;
    use crate::store::LeadStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;
    use tokio::time::{sleep, Duration};

    /// Fetches block until the gate is opened.
    #[derive(Default)]
    struct GatedSource {
        gate: Notify,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl LeadSource for GatedSource {
        fn name(&self) -> &str {
            "gated"
        }

        async fn fetch(&self) -> AppResult<Vec<Lead>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(vec![Lead::new("only")])
        }

        async fn update(&self, lead: &Lead) -> AppResult<Lead> {
            Ok(lead.clone())
        }

        async fn add(&self, lead: &Lead) -> AppResult<Lead> {
            Ok(lead.clone())
        }

        async fn delete(&self, _id: &str) -> AppResult<()> {
            Ok(())
        }
    }

    async fn wait_for(timer: &RefreshTimer, state: RefreshState) {
        for _ in 0..500 {
            if timer.state() == state {
                return;
            }
            sleep(Duration::from_millis(2)).await;
        }
        panic!("timer never reached {:?}", state);
    }

    #[tokio::test]
    async fn trigger_while_refreshing_is_a_no_op() {
        let source = Arc::new(GatedSource::default());
        let store = Arc::new(LeadStore::new(source.clone(), 10, "Converted"));
        let timer = RefreshTimer::new(store.clone(), Duration::from_secs(3600));

        let first = tokio::spawn({
            let timer = timer.clone();
            async move { timer.trigger().await }
        });
        wait_for(&timer, RefreshState::Refreshing).await;

        assert!(matches!(timer.trigger().await, TriggerOutcome::Skipped));

        source.gate.notify_one();
        let outcome = first.await.expect("first trigger task");
        assert!(matches!(outcome, TriggerOutcome::Completed(Ok(1))));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(timer.state(), RefreshState::Idle);
        assert!(timer.last_success().is_some());
    }

    #[tokio::test]
    async fn failures_record_attempt_and_do_not_block_later_refreshes() {
        let source = Arc::new(MemorySource::new(vec![Lead::new("1")]));
        let store = Arc::new(LeadStore::new(source.clone(), 10, "Converted"));
        let timer = RefreshTimer::new(store.clone(), Duration::from_secs(3600));

        source.fail_next(SourceOp::Fetch);
        assert!(matches!(timer.trigger().await, TriggerOutcome::Completed(Err(_))));
        assert!(timer.last_attempt().is_some());
        assert!(timer.last_success().is_none());
        assert_eq!(timer.state(), RefreshState::Idle);

        assert!(matches!(timer.trigger().await, TriggerOutcome::Completed(Ok(1))));
        assert!(timer.last_success().is_some());
    }

    #[tokio::test]
    async fn interval_drives_refresh_until_stopped() {
        let source = Arc::new(MemorySource::new(vec![Lead::new("1")]));
        let store = Arc::new(LeadStore::new(source.clone(), 10, "Converted"));
        let timer = RefreshTimer::new(store.clone(), Duration::from_millis(10));

        timer.start();
        timer.start();
        sleep(Duration::from_millis(80)).await;
        timer.stop().await;
        wait_for(&timer, RefreshState::Idle).await;

        let calls = source.fetch_calls();
        assert!(calls >= 2, "expected scheduled fetches, saw {calls}");
        assert_eq!(store.leads().await.len(), 1);

        sleep(Duration::from_millis(40)).await;
        assert_eq!(source.fetch_calls(), calls);
    }

    #[tokio::test]
    async fn restarting_after_stop_keeps_polling() {
        let source = Arc::new(MemorySource::new(vec![Lead::new("1")]));
        let store = Arc::new(LeadStore::new(source.clone(), 10, "Converted"));
        let timer = RefreshTimer::new(store.clone(), Duration::from_millis(10));

        timer.stop().await;
        timer.start();
        timer.stop().await;
        timer.stop().await;
        wait_for(&timer, RefreshState::Idle).await;

        timer.start();
        let before = source.fetch_calls();
        sleep(Duration::from_millis(80)).await;
        let after = source.fetch_calls();
        timer.stop().await;
        assert!(after >= before + 2, "restarted loop stalled at {after} fetches");
    }

    #[tokio::test]
    async fn stopping_does_not_cancel_in_flight_refresh() {
        let source = Arc::new(GatedSource::default());
        let store = Arc::new(LeadStore::new(source.clone(), 10, "Converted"));
        let timer = RefreshTimer::new(store.clone(), Duration::from_millis(5));

        timer.start();
        wait_for(&timer, RefreshState::Refreshing).await;
        timer.stop().await;

        source.gate.notify_one();
        wait_for(&timer, RefreshState::Idle).await;
        assert_eq!(store.leads().await.len(), 1);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }
}
