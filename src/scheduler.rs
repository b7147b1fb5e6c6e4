// src/scheduler.rs
//! Periodic capture scheduler.
//!
//! Phases: `Idle -> Scheduled -> Firing -> Scheduled -> ... -> Idle` (on stop).
//! Starting fires one cycle immediately, then on a fixed `interval`-minute
//! schedule, each firing delayed by an optional random jitter. A firing that
//! overlaps a running cycle is skipped. Timed cycles run in their own task, so
//! disarming the timer never cancels a cycle that has already begun.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::delivery::DeliveryResult;
use crate::error::SchedulerError;
use crate::state::{StateHandle, TaskRecord};

pub const MIN_INTERVAL_MINUTES: u32 = 1;
pub const MAX_INTERVAL_MINUTES: u32 = 1440;
pub const DEFAULT_INTERVAL_MINUTES: u32 = 60;

/// One capture cycle (refresh targets, wait for the outcome).
#[async_trait]
pub trait CaptureCycle: Send + Sync {
    async fn run_cycle(&self) -> DeliveryResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerPhase {
    Idle,
    Scheduled,
    Firing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub interval: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub last_refresh_time: Option<DateTime<Utc>>,
    pub next_refresh_time: Option<DateTime<Utc>>,
    pub phase: SchedulerPhase,
}

pub fn validate_interval(minutes: i64) -> Result<u32, SchedulerError> {
    if (MIN_INTERVAL_MINUTES as i64..=MAX_INTERVAL_MINUTES as i64).contains(&minutes) {
        Ok(minutes as u32)
    } else {
        Err(SchedulerError::InvalidInterval {
            got: minutes,
            min: MIN_INTERVAL_MINUTES,
            max: MAX_INTERVAL_MINUTES,
        })
    }
}

struct Inner {
    cycle: Arc<dyn CaptureCycle>,
    state: StateHandle,
    phase: Mutex<SchedulerPhase>,
    timer: Mutex<Option<JoinHandle<()>>>,
    next_fire: Mutex<Option<DateTime<Utc>>>,
    cycle_in_progress: AtomicBool,
}

/// Clears `cycle_in_progress` and leaves the Firing phase on every exit path.
struct FiringGuard<'a>(&'a Inner);

impl Drop for FiringGuard<'_> {
    fn drop(&mut self) {
        let armed = self.0.timer.lock().is_some();
        *self.0.phase.lock() = if armed {
            SchedulerPhase::Scheduled
        } else {
            SchedulerPhase::Idle
        };
        self.0.cycle_in_progress.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
    max_jitter: Duration,
    period: Option<Duration>,
}

impl Scheduler {
    pub fn new(cycle: Arc<dyn CaptureCycle>, state: StateHandle) -> Self {
        Self {
            inner: Arc::new(Inner {
                cycle,
                state,
                phase: Mutex::new(SchedulerPhase::Idle),
                timer: Mutex::new(None),
                next_fire: Mutex::new(None),
                cycle_in_progress: AtomicBool::new(false),
            }),
            max_jitter: Duration::ZERO,
            period: None,
        }
    }

    /// Random extra delay in `[0, max]` added before each timed firing.
    pub fn with_jitter(mut self, max: Duration) -> Self {
        self.max_jitter = max;
        self
    }

    /// Fixed timer period, overriding `interval` minutes. Persisted settings
    /// and `status().interval` still report the validated minutes.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    pub fn phase(&self) -> SchedulerPhase {
        *self.inner.phase.lock()
    }

    pub fn is_cycle_in_progress(&self) -> bool {
        self.inner.cycle_in_progress.load(Ordering::SeqCst)
    }

    /// Validate, persist, fire once now, then arm the periodic timer.
    /// An invalid interval or a failed persist leaves the current timer alone.
    pub async fn start(&self, interval_minutes: i64) -> Result<(), SchedulerError> {
        let interval = validate_interval(interval_minutes)?;

        let now = Utc::now();
        self.inner
            .state
            .update(|st| {
                st.scheduler_enabled = true;
                st.scheduler_interval = Some(interval);
                st.scheduler_start_time = Some(now);
            })
            .await?;

        self.disarm();
        let period = self
            .period
            .unwrap_or_else(|| Duration::from_secs(u64::from(interval) * 60));
        let jitter = random_jitter(self.max_jitter);
        *self.inner.next_fire.lock() = Some(now + chrono_span(period + jitter));
        *self.inner.timer.lock() = Some(self.spawn_timer(period, jitter));
        if !self.is_cycle_in_progress() {
            *self.inner.phase.lock() = SchedulerPhase::Scheduled;
        }
        tracing::info!(target: "scheduler", interval_minutes = interval, "scheduler started");

        self.fire().await;
        Ok(())
    }

    /// Disarm the timer; no further firings until restarted.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        self.disarm();
        if !self.is_cycle_in_progress() {
            *self.inner.phase.lock() = SchedulerPhase::Idle;
        }
        let now = Utc::now();
        self.inner
            .state
            .update(|st| {
                st.scheduler_enabled = false;
                st.scheduler_stop_time = Some(now);
            })
            .await?;
        tracing::info!(target: "scheduler", "scheduler stopped");
        Ok(())
    }

    /// Re-arm from persisted state after a restart.
    pub async fn restore(&self) -> Result<bool, SchedulerError> {
        let st = self.inner.state.load().await?;
        if !st.scheduler_enabled {
            tracing::info!(target: "scheduler", "scheduler not enabled, nothing to restore");
            return Ok(false);
        }
        let interval = st.scheduler_interval.unwrap_or(DEFAULT_INTERVAL_MINUTES);
        tracing::info!(target: "scheduler", interval_minutes = interval, "restoring scheduler");
        self.start(i64::from(interval)).await?;
        Ok(true)
    }

    pub async fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        let st = self.inner.state.load().await?;
        let armed = self.inner.timer.lock().is_some();
        Ok(SchedulerStatus {
            enabled: st.scheduler_enabled,
            interval: st.scheduler_interval.unwrap_or(DEFAULT_INTERVAL_MINUTES),
            start_time: st.scheduler_start_time,
            last_refresh_time: st.last_auto_refresh_time,
            next_refresh_time: if armed { *self.inner.next_fire.lock() } else { None },
            phase: self.phase(),
        })
    }

    /// Run one cycle and record it. Returns `None` when skipped because a
    /// previous cycle is still running.
    pub async fn fire(&self) -> Option<TaskRecord> {
        fire_inner(&self.inner).await
    }

    fn disarm(&self) {
        if let Some(h) = self.inner.timer.lock().take() {
            h.abort();
        }
        *self.inner.next_fire.lock() = None;
    }

    /// Ticks at `start + k * period`; each tick waits its jitter, then hands
    /// the cycle to a fresh task. `next_fire` carries the jitter already drawn
    /// for the coming tick.
    fn spawn_timer(&self, period: Duration, first_jitter: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let max_jitter = self.max_jitter;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut jitter = first_jitter;
            loop {
                ticker.tick().await;
                let tick_at = Utc::now();
                if !jitter.is_zero() {
                    tracing::debug!(target: "scheduler", jitter_ms = jitter.as_millis() as u64, "delaying firing");
                    tokio::time::sleep(jitter).await;
                }
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                jitter = random_jitter(max_jitter);
                *inner.next_fire.lock() = Some(tick_at + chrono_span(period + jitter));
                tokio::spawn(async move {
                    fire_inner(&inner).await;
                });
            }
        })
    }
}

fn chrono_span(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or_else(|_| ChronoDuration::zero())
}

fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

async fn fire_inner(inner: &Inner) -> Option<TaskRecord> {
    if inner
        .cycle_in_progress
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        tracing::warn!(target: "scheduler", "previous cycle still running, skipping firing");
        return None;
    }
    let _firing = FiringGuard(inner);
    *inner.phase.lock() = SchedulerPhase::Firing;

    tracing::info!(target: "scheduler", "capture cycle firing");
    let outcome = inner.cycle.run_cycle().await;
    let now = Utc::now();
    let record = TaskRecord {
        time: now,
        success: outcome.success,
        item_count: outcome.item_count,
    };

    counter!("scheduler_cycles_total").increment(1);
    gauge!("scheduler_last_run_ts").set(now.timestamp() as f64);

    let rec = record.clone();
    if let Err(e) = inner
        .state
        .update(move |st| {
            st.push_task_record(rec);
            st.last_auto_refresh_time = Some(now);
        })
        .await
    {
        tracing::error!(target: "scheduler", "persisting task record failed: {e:#}");
    }

    tracing::info!(
        target: "scheduler",
        success = outcome.success,
        items = outcome.item_count,
        error = outcome.error.as_deref().unwrap_or(""),
        "capture cycle finished"
    );
    Some(record)
}
