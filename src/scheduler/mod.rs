use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::BrokerClient;
use crate::config::{EngineConfig, StrategyParamsManager};
use crate::notifications::NotificationManager;
use crate::persistence::{PersistenceAdapters, QuoteTick};
use crate::position_manager::PositionManager;
use crate::reconciler::Reconciler;
use crate::runtime::RuntimeState;
use crate::store::CandleStore;
use crate::strategy::StrategyEngine;
use crate::types::{Mode, Timeframe};

/// One independent periodic job per concern, each carrying its own busy
/// flag so a slow iteration is skipped rather than overlapped. All jobs
/// observe a shared shutdown flag and become no-ops once it is set.
pub struct Scheduler {
    store: Arc<CandleStore>,
    runtime: Arc<RuntimeState>,
    config: Arc<StrategyParamsManager>,
    broker: Arc<dyn BrokerClient>,
    strategy: Arc<StrategyEngine>,
    position_manager: Arc<PositionManager>,
    reconciler: Arc<Reconciler>,
    persistence: Arc<PersistenceAdapters>,
    engine_config: EngineConfig,
    epic: String,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<CandleStore>,
        runtime: Arc<RuntimeState>,
        config: Arc<StrategyParamsManager>,
        broker: Arc<dyn BrokerClient>,
        strategy: Arc<StrategyEngine>,
        position_manager: Arc<PositionManager>,
        reconciler: Arc<Reconciler>,
        persistence: Arc<PersistenceAdapters>,
        engine_config: EngineConfig,
        epic: String,
    ) -> Self {
        Self {
            store,
            runtime,
            config,
            broker,
            strategy,
            position_manager,
            reconciler,
            persistence,
            engine_config,
            epic,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Seeds every timeframe's history before any periodic job starts.
    pub async fn seed_history(&self) -> anyhow::Result<()> {
        let now_ms = Utc::now().timestamp_millis();
        for tf in [Timeframe::M1, Timeframe::M5, Timeframe::M15, Timeframe::H1, Timeframe::H4] {
            self.store.load_history(tf, tf.retention_cap() as u32, now_ms).await?;
        }
        Ok(())
    }

    /// Spawns every job and blocks until all have exited (only happens once
    /// `shutdown()` has been called from another task).
    pub async fn run(self: Arc<Self>) {
        let handles = self.spawn_jobs();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("scheduler: job task panicked: {}", e);
            }
        }
    }

    fn spawn_jobs(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let tick = self.engine_config.tick_interval;
        let reconcile = self.engine_config.reconcile_interval;
        let status = self.engine_config.status_interval;
        let session_refresh = self.engine_config.session_refresh_interval;

        vec![
            self.spawn_job("tick", tick, {
                let this = self.clone();
                move || {
                    let this = this.clone();
                    async move { this.run_tick().await }
                }
            }),
            self.spawn_job("m1", tick, {
                let this = self.clone();
                move || {
                    let this = this.clone();
                    async move { this.update_only(Timeframe::M1).await }
                }
            }),
            self.spawn_job("m5", tick, {
                let this = self.clone();
                move || {
                    let this = this.clone();
                    async move { this.update_and_evaluate(Timeframe::M5, Mode::Scalp).await }
                }
            }),
            self.spawn_job("m15", tick, {
                let this = self.clone();
                move || {
                    let this = this.clone();
                    async move { this.update_only(Timeframe::M15).await }
                }
            }),
            self.spawn_job("h1", tick, {
                let this = self.clone();
                move || {
                    let this = this.clone();
                    async move { this.update_and_evaluate(Timeframe::H1, Mode::Swing).await }
                }
            }),
            self.spawn_job("h4", tick, {
                let this = self.clone();
                move || {
                    let this = this.clone();
                    async move { this.update_only(Timeframe::H4).await }
                }
            }),
            self.spawn_job("reconciler", reconcile, {
                let this = self.clone();
                move || {
                    let this = this.clone();
                    async move { this.reconciler.run().await }
                }
            }),
            self.spawn_job("status", status, {
                let this = self.clone();
                move || {
                    let this = this.clone();
                    async move { this.emit_status().await }
                }
            }),
            self.spawn_job("session_refresh", session_refresh, {
                let this = self.clone();
                move || {
                    let this = this.clone();
                    async move { this.refresh_session().await }
                }
            }),
            self.spawn_daily_reset(),
        ]
    }

    /// Wraps `job` in an interval loop with its own busy flag (skip a tick
    /// rather than overlap) and the shared shutdown flag.
    fn spawn_job<F, Fut>(&self, name: &'static str, period: std::time::Duration, mut job: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let busy = AtomicBool::new(false);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if busy.swap(true, Ordering::SeqCst) {
                    continue;
                }
                job().await;
                busy.store(false, Ordering::SeqCst);
            }
            info!("scheduler: job '{}' exited", name);
        })
    }

    async fn run_tick(&self) {
        if let Ok(price) = self.broker.get_price(&self.epic).await {
            self.persistence
                .buffer_quote(QuoteTick {
                    epic: self.epic.clone(),
                    ts: Utc::now().timestamp_millis(),
                    bid: price.bid,
                    ask: price.ask,
                    status: format!("{:?}", price.status),
                })
                .await;
        }
        self.position_manager.tick(Utc::now().timestamp_millis()).await;
    }

    async fn update_only(&self, tf: Timeframe) {
        let now_ms = Utc::now().timestamp_millis();
        if let Err(e) = self.store.update(tf, now_ms).await {
            warn!("scheduler: {:?} update failed: {}", tf, e);
        }
    }

    /// On a new close for `tf`, persists the bar and runs the strategy
    /// engine for `mode` (M5→scalp always; H1→swing only if enabled).
    async fn update_and_evaluate(&self, tf: Timeframe, mode: Mode) {
        if mode == Mode::Swing && !self.config.get().await.swing_enabled {
            let now_ms = Utc::now().timestamp_millis();
            if let Err(e) = self.store.update(tf, now_ms).await {
                warn!("scheduler: {:?} update failed: {}", tf, e);
            }
            return;
        }

        let now_ms = Utc::now().timestamp_millis();
        let new_close = match self.store.update(tf, now_ms).await {
            Ok(new_close) => new_close,
            Err(e) => {
                warn!("scheduler: {:?} update failed: {}", tf, e);
                return;
            }
        };
        if !new_close {
            return;
        }
        if let Some(bar) = self.store.get(tf).await.last() {
            self.persistence.insert_candle(&self.epic, tf, bar).await;
        }
        let signal = self.strategy.evaluate(mode, now_ms).await;
        info!("scheduler: {:?} evaluate -> {:?}", mode, signal.action);
    }

    async fn refresh_session(&self) {
        if let Err(e) = self.broker.refresh_session().await {
            warn!("scheduler: session refresh failed, keeping existing tokens: {}", e);
        }
    }

    async fn emit_status(&self) {
        let counters = self.runtime.counters_snapshot().await;
        let open = self.runtime.positions_snapshot().await.len();
        info!(
            "status: epic={} trades={} realized_pnl={} consec_losses={} open_positions={}",
            self.epic, counters.trades_count, counters.realized_pnl, counters.consecutive_losses, open
        );
        self.persistence.flush_quotes().await;
    }

    /// One-shot alarm that re-arms itself for the following UTC midnight
    /// after firing.
    fn spawn_daily_reset(&self) -> JoinHandle<()> {
        let runtime = self.runtime.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let wait = duration_until_next_utc_midnight();
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = wait_for_shutdown(&shutdown) => break,
                }
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let counters = runtime.counters_snapshot().await;
                let new_equity = counters.start_equity + counters.realized_pnl;
                runtime.daily_reset(new_equity).await;
                info!("scheduler: daily reset at UTC midnight, new start_equity={}", new_equity);
            }
        })
    }

    /// Sets the shutdown flag; every job loop observes it on its next tick
    /// and exits. Waits for all spawned jobs to drain, then flushes
    /// whatever quotes remain buffered.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

fn duration_until_next_utc_midnight() -> std::time::Duration {
    let now = Utc::now();
    let next_midnight = (now.date_naive() + chrono::Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time");
    let next_midnight = Utc.from_utc_datetime(&next_midnight);
    (next_midnight - now)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(86_400))
}

/// Polls the shutdown flag so the daily-reset sleep can be interrupted
/// without a dedicated notify channel.
async fn wait_for_shutdown(flag: &AtomicBool) {
    loop {
        if flag.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_utc_midnight_is_never_more_than_a_day_away() {
        let d = duration_until_next_utc_midnight();
        assert!(d.as_secs() <= 86_400);
    }
}
