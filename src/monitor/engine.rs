//! MonitorEngine: start/stop lifecycle around the periodic tick.
//!
//! Each engine owns its own timer task and counters; nothing is process-wide,
//! so several engines can run side by side (tests do). The timer task never
//! runs a tick inline: it spawns one, and a fire that arrives while the
//! previous tick is still running is skipped (coalesced) and counted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::analyzer::RuleBasedAnalyzer;
use super::composer::NotificationComposer;
use super::error::{within, MonitorError};
use super::providers::build_providers;
use super::push::build_push_gateway;
use super::recorder::NotificationRecorder;
use super::rules::default_rules;
use super::runner::TickRunner;
use super::traits::Store;
use super::types::{EngineStats, TickSummary};
use crate::config::EngineConfig;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// State shared between the engine handle, its timer task and tick tasks.
struct EngineShared {
    runner: TickRunner,
    clock: Clock,
    tick_interval: Duration,
    store_timeout: Duration,
    tick_in_progress: AtomicBool,
    timer_fires: AtomicU64,
    ticks_started: AtomicU64,
    ticks_skipped: AtomicU64,
    ticks_completed: AtomicU64,
    /// Spawned ticks not yet awaited; finished ones are pruned on each spawn.
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

/// Clears the in-progress flag even if the tick panics.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl EngineShared {
    fn on_timer_fire(self: &Arc<Self>) {
        self.timer_fires.fetch_add(1, Ordering::SeqCst);

        if self
            .tick_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.ticks_skipped.fetch_add(1, Ordering::SeqCst);
            tracing::info!("Previous tick still running, skipping this one");
            return;
        }

        self.ticks_started.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _guard = TickGuard(&shared.tick_in_progress);
            let now = (shared.clock)();
            if let Err(e) = shared.runner.run_tick(now).await {
                tracing::warn!(error = %e, "Tick failed");
            }
            shared.ticks_completed.fetch_add(1, Ordering::SeqCst);
        });

        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.retain(|h| !h.is_finished());
            in_flight.push(handle);
        }
    }

    fn take_in_flight(&self) -> Vec<JoinHandle<()>> {
        self.in_flight
            .lock()
            .map(|mut in_flight| std::mem::take(&mut *in_flight))
            .unwrap_or_default()
    }
}

async fn timer_loop(shared: Arc<EngineShared>, cancel: CancellationToken) {
    // The first tick of a tokio interval completes immediately.
    let mut ticker = tokio::time::interval(shared.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Monitor timer cancelled");
                break;
            }
            _ = ticker.tick() => shared.on_timer_fire(),
        }
    }
}

struct TimerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct MonitorEngine {
    shared: Arc<EngineShared>,
    timer: tokio::sync::Mutex<Option<TimerHandle>>,
    running: AtomicBool,
}

impl MonitorEngine {
    pub fn new(
        store: Arc<dyn Store>,
        composer: NotificationComposer,
        recorder: NotificationRecorder,
        config: EngineConfig,
    ) -> Self {
        let rules = config.alert_rules.clone().unwrap_or_else(default_rules);
        let runner = TickRunner::new(
            store,
            Arc::new(RuleBasedAnalyzer::new(rules)),
            composer,
            recorder,
            &config,
        );

        Self {
            shared: Arc::new(EngineShared {
                runner,
                clock: Arc::new(Utc::now),
                tick_interval: config.tick_interval(),
                store_timeout: config.store_timeout(),
                tick_in_progress: AtomicBool::new(false),
                timer_fires: AtomicU64::new(0),
                ticks_started: AtomicU64::new(0),
                ticks_skipped: AtomicU64::new(0),
                ticks_completed: AtomicU64::new(0),
                in_flight: Mutex::new(Vec::new()),
            }),
            timer: tokio::sync::Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Validate `config` and build providers, push gateway and rules from it.
    pub fn from_config(store: Arc<dyn Store>, config: EngineConfig) -> Result<Self, MonitorError> {
        config.validate()?;

        let providers = build_providers(&config.providers)?;
        let push = build_push_gateway(config.push.as_ref())?;
        let composer = NotificationComposer::new(providers, config.body_max_len);
        let recorder = NotificationRecorder::new(store.clone(), push, config.store_timeout());

        tracing::info!(
            providers = ?composer.provider_names(),
            push_configured = config.push.is_some(),
            interval_ms = config.tick_interval_ms,
            "Monitor engine configured"
        );

        Ok(Self::new(store, composer, recorder, config))
    }

    /// Replace the wall clock used by timer-driven ticks. Only effective
    /// before the first `start()`.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.clock = Arc::new(clock),
            None => tracing::warn!("Engine already started, clock not replaced"),
        }
        self
    }

    /// Start the timer. The first tick runs immediately. No-op if already
    /// running. An unreachable store is a startup error.
    pub async fn start(&self) -> Result<(), MonitorError> {
        let mut timer = self.timer.lock().await;
        if timer.is_some() {
            tracing::debug!("Monitor engine already running");
            return Ok(());
        }

        within(self.shared.store_timeout, self.shared.runner.store().health_check())
            .await
            .map_err(|e| MonitorError::Startup(format!("store unavailable: {e}")))?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(timer_loop(Arc::clone(&self.shared), cancel.clone()));
        *timer = Some(TimerHandle { cancel, task });
        self.running.store(true, Ordering::SeqCst);

        tracing::info!(
            interval_ms = self.shared.tick_interval.as_millis() as u64,
            "Monitor engine started"
        );
        Ok(())
    }

    /// Disarm the timer. Returns once no further tick can start; a tick
    /// already running is left to finish on its own.
    pub async fn stop(&self) {
        let Some(timer) = self.timer.lock().await.take() else {
            return;
        };

        timer.cancel.cancel();
        if let Err(e) = timer.task.await {
            tracing::warn!(error = %e, "Monitor timer task ended abnormally");
        }
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Monitor engine stopped");
    }

    /// `stop()`, then wait for every tick spawned so far to finish, including
    /// ticks left running by an earlier `stop()`.
    pub async fn shutdown(&self) {
        self.stop().await;
        for handle in self.shared.take_in_flight() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "In-flight tick ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one tick at `now` right away, outside the timer and its counters.
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> Result<TickSummary, MonitorError> {
        self.shared.runner.run_tick(now).await
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            timer_fires: self.shared.timer_fires.load(Ordering::SeqCst),
            ticks_started: self.shared.ticks_started.load(Ordering::SeqCst),
            ticks_skipped: self.shared.ticks_skipped.load(Ordering::SeqCst),
            ticks_completed: self.shared.ticks_completed.load(Ordering::SeqCst),
        }
    }
}

impl Drop for MonitorEngine {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::monitor::testing::*;

    fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_patient(&test_patient("p1")).unwrap();
        store
            .upsert_medication_schedule(&test_schedule("p1", "med-1", &["14:00"]))
            .unwrap();
        store
    }

    fn engine_with(
        store: Arc<dyn Store>,
        composer: NotificationComposer,
        interval_ms: u64,
    ) -> MonitorEngine {
        let config = EngineConfig {
            tick_interval_ms: interval_ms,
            ..EngineConfig::default()
        };
        let recorder = NotificationRecorder::new(
            store.clone(),
            Arc::new(RecordingPushGateway::new()),
            config.store_timeout(),
        );
        MonitorEngine::new(store, composer, recorder, config).with_clock(|| at(13, 50))
    }

    async fn wait_for(engine: &MonitorEngine, done: impl Fn(EngineStats) -> bool) {
        for _ in 0..300 {
            if done(engine.stats()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached, stats: {:?}", engine.stats());
    }

    #[tokio::test]
    async fn start_runs_first_tick_immediately() {
        let store = Arc::new(seeded_store());
        let engine = engine_with(store.clone(), NotificationComposer::template_only(220), 3_600_000);

        engine.start().await.unwrap();
        assert!(engine.is_running());
        wait_for(&engine, |s| s.ticks_completed >= 1).await;

        assert_eq!(store.notification_count().unwrap(), 1);
        engine.shutdown().await;
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn second_start_is_a_no_op() {
        let store = Arc::new(seeded_store());
        let engine = engine_with(store, NotificationComposer::template_only(220), 3_600_000);

        engine.start().await.unwrap();
        wait_for(&engine, |s| s.ticks_completed >= 1).await;
        engine.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = engine.stats();
        assert_eq!(stats.timer_fires, 1);
        assert_eq!(stats.ticks_started, 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn unreachable_store_fails_start() {
        let mut faulty = FaultyStore::new(seeded_store());
        faulty.fail_health_check = true;
        let engine = engine_with(Arc::new(faulty), NotificationComposer::template_only(220), 1_000);

        let result = engine.start().await;

        assert!(matches!(result, Err(MonitorError::Startup(_))));
        assert!(!engine.is_running());
        assert_eq!(engine.stats().timer_fires, 0);
    }

    #[tokio::test]
    async fn slow_ticks_are_coalesced_not_overlapped() {
        let store = Arc::new(seeded_store());
        let provider = MockProvider::slow("slow", Duration::from_millis(300), "Metformin at 14:00.");
        let engine = engine_with(
            store.clone(),
            NotificationComposer::new(chain(&[&provider]), 220),
            50,
        );

        engine.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        engine.shutdown().await;

        let stats = engine.stats();
        assert!(stats.ticks_skipped > 0, "expected skipped fires, got {stats:?}");
        assert_eq!(stats.timer_fires, stats.ticks_started + stats.ticks_skipped);
        assert_eq!(stats.ticks_started, stats.ticks_completed);
        assert_eq!(provider.peak_concurrency(), 1);
        assert_eq!(store.notification_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn no_tick_starts_after_stop() {
        let store = Arc::new(seeded_store());
        let engine = engine_with(store, NotificationComposer::template_only(220), 30);

        engine.start().await.unwrap();
        wait_for(&engine, |s| s.ticks_completed >= 1).await;
        engine.stop().await;
        let after_stop = engine.stats();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!engine.is_running());
        assert_eq!(engine.stats().timer_fires, after_stop.timer_fires);
        assert_eq!(engine.stats().ticks_started, after_stop.ticks_started);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_tick() {
        let store = Arc::new(seeded_store());
        let provider = MockProvider::slow("slow", Duration::from_millis(200), "Metformin at 14:00.");
        let engine = engine_with(
            store.clone(),
            NotificationComposer::new(chain(&[&provider]), 220),
            3_600_000,
        );

        engine.start().await.unwrap();
        wait_for(&engine, |s| s.ticks_started >= 1).await;
        engine.shutdown().await;

        assert_eq!(engine.stats().ticks_completed, 1);
        assert_eq!(store.notification_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn shutdown_after_restart_waits_for_tick_from_before_stop() {
        let store = Arc::new(seeded_store());
        let provider = MockProvider::slow("slow", Duration::from_millis(300), "Metformin at 14:00.");
        let engine = engine_with(
            store.clone(),
            NotificationComposer::new(chain(&[&provider]), 220),
            3_600_000,
        );

        engine.start().await.unwrap();
        wait_for(&engine, |s| s.ticks_started >= 1).await;
        engine.stop().await;
        engine.start().await.unwrap();
        wait_for(&engine, |s| s.timer_fires >= 2).await;
        engine.shutdown().await;

        let stats = engine.stats();
        assert_eq!(stats.ticks_started, stats.ticks_completed);
        assert_eq!(stats.ticks_completed, 1);
        assert_eq!(stats.ticks_skipped, 1);
        assert_eq!(store.notification_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn engine_can_restart_after_stop() {
        let store = Arc::new(seeded_store());
        let engine = engine_with(store, NotificationComposer::template_only(220), 3_600_000);

        engine.start().await.unwrap();
        wait_for(&engine, |s| s.ticks_completed >= 1).await;
        engine.stop().await;
        engine.start().await.unwrap();
        wait_for(&engine, |s| s.ticks_completed >= 2).await;

        assert!(engine.is_running());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn from_config_uses_template_when_no_providers() {
        let store = Arc::new(seeded_store());
        let engine = MonitorEngine::from_config(store.clone(), EngineConfig::default()).unwrap();

        let summary = engine.run_tick_at(at(13, 50)).await.unwrap();

        assert_eq!(summary.created, 1);
        // No push gateway configured: recorded but not delivered.
        assert_eq!(summary.delivered, 0);
        let record = &store.notifications_for_patient("p1").unwrap()[0];
        assert_eq!(record.body, "Time to take Metformin (500 mg) at 14:00.");
    }

    #[tokio::test]
    async fn from_config_rejects_invalid_config() {
        let store = Arc::new(seeded_store());
        let config = EngineConfig {
            max_concurrency: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            MonitorEngine::from_config(store, config),
            Err(MonitorError::Config(_))
        ));
    }

    #[tokio::test]
    async fn independent_engines_do_not_share_state() {
        let a = engine_with(Arc::new(seeded_store()), NotificationComposer::template_only(220), 3_600_000);
        let b = engine_with(Arc::new(seeded_store()), NotificationComposer::template_only(220), 3_600_000);

        a.start().await.unwrap();
        wait_for(&a, |s| s.ticks_completed >= 1).await;

        assert!(a.is_running());
        assert!(!b.is_running());
        assert_eq!(b.stats(), EngineStats::default());
        a.shutdown().await;
    }
}
