// tests/scheduler_records.rs
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use news_interceptor::delivery::DeliveryResult;
use news_interceptor::error::SchedulerError;
use news_interceptor::scheduler::{CaptureCycle, Scheduler, SchedulerPhase};
use news_interceptor::state::{
    MemoryStore, PersistedState, StateHandle, StateStore, TASK_RECORD_CAP,
};

struct CountingCycle {
    runs: AtomicUsize,
    delay: Duration,
    // runs numbered below this return at once
    slow_from: usize,
    result: DeliveryResult,
}

impl CountingCycle {
    fn new(result: DeliveryResult) -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
            delay: Duration::ZERO,
            slow_from: 1,
            result,
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
            delay,
            slow_from: 1,
            result: DeliveryResult::ok(1),
        })
    }

    /// Immediate first run, every later run takes `delay`.
    fn slow_after_first(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
            delay,
            slow_from: 2,
            result: DeliveryResult::ok(1),
        })
    }
}

#[async_trait]
impl CaptureCycle for CountingCycle {
    async fn run_cycle(&self) -> DeliveryResult {
        let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.slow_from && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}

fn scheduler(cycle: Arc<CountingCycle>) -> (Scheduler, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let s = Scheduler::new(cycle, StateHandle::new(store.clone()));
    (s, store)
}

#[tokio::test]
async fn start_fires_once_immediately_and_schedules_the_next() {
    let cycle = CountingCycle::new(DeliveryResult::ok(7));
    let (s, store) = scheduler(cycle.clone());

    let before = Utc::now();
    s.start(5).await.expect("valid interval");

    assert_eq!(cycle.runs.load(Ordering::SeqCst), 1);
    let st = store.snapshot();
    assert!(st.scheduler_enabled);
    assert_eq!(st.scheduler_interval, Some(5));
    assert_eq!(st.task_records.len(), 1);
    assert!(st.task_records[0].success);
    assert_eq!(st.task_records[0].item_count, 7);
    assert!(st.last_auto_refresh_time.is_some());

    let status = s.status().await.unwrap();
    assert_eq!(status.phase, SchedulerPhase::Scheduled);
    let next = status.next_refresh_time.expect("armed");
    let secs = (next - before).num_seconds();
    assert!((299..=301).contains(&secs), "next firing ~5 min out, got {secs}s");

    s.stop().await.unwrap();
}

#[tokio::test]
async fn invalid_interval_changes_nothing() {
    let cycle = CountingCycle::new(DeliveryResult::ok(1));
    let (s, store) = scheduler(cycle.clone());

    for bad in [0, -1, 1441] {
        let err = s.start(bad).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidInterval { got, .. } if got == bad));
    }

    assert_eq!(cycle.runs.load(Ordering::SeqCst), 0);
    assert_eq!(store.snapshot(), PersistedState::default());
    assert_eq!(s.phase(), SchedulerPhase::Idle);
    assert!(s.status().await.unwrap().next_refresh_time.is_none());
}

#[tokio::test]
async fn records_are_capped_newest_first() {
    let cycle = CountingCycle::new(DeliveryResult::ok(3));
    let (s, store) = scheduler(cycle.clone());

    for _ in 0..105 {
        s.fire().await.expect("not overlapping");
    }
    let st = store.snapshot();
    assert_eq!(st.task_records.len(), TASK_RECORD_CAP);
    assert!(st.task_records[0].time >= st.task_records[99].time);
}

#[tokio::test]
async fn failed_cycle_is_recorded_as_failure() {
    let cycle = CountingCycle::new(DeliveryResult::failed("collector responded 500"));
    let (s, store) = scheduler(cycle);

    let rec = s.fire().await.unwrap();
    assert!(!rec.success);
    assert_eq!(rec.item_count, 0);
    assert_eq!(store.snapshot().task_records, vec![rec]);
}

#[tokio::test]
async fn overlapping_firing_is_skipped() {
    let cycle = CountingCycle::slow(Duration::from_millis(200));
    let (s, store) = scheduler(cycle.clone());

    let first = {
        let s = s.clone();
        tokio::spawn(async move { s.fire().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(s.is_cycle_in_progress());
    assert_eq!(s.phase(), SchedulerPhase::Firing);

    assert!(s.fire().await.is_none(), "second firing skipped");
    assert!(first.await.unwrap().is_some());

    assert_eq!(cycle.runs.load(Ordering::SeqCst), 1);
    assert_eq!(store.snapshot().task_records.len(), 1);
    assert_eq!(s.phase(), SchedulerPhase::Idle);
}

#[tokio::test]
async fn stop_disarms_and_restore_rearms() {
    let cycle = CountingCycle::new(DeliveryResult::ok(1));
    let (s, store) = scheduler(cycle.clone());

    s.start(1).await.unwrap();
    s.stop().await.unwrap();
    let st = store.snapshot();
    assert!(!st.scheduler_enabled);
    assert!(st.scheduler_stop_time.is_some());
    assert_eq!(s.phase(), SchedulerPhase::Idle);
    assert!(s.status().await.unwrap().next_refresh_time.is_none());
    assert!(!s.restore().await.unwrap());

    // a fresh scheduler over an enabled state comes back armed
    let cycle2 = CountingCycle::new(DeliveryResult::ok(1));
    let store2 = Arc::new(MemoryStore::new());
    let handle = StateHandle::new(store2.clone());
    handle
        .update(|st| {
            st.scheduler_enabled = true;
            st.scheduler_interval = Some(30);
        })
        .await
        .unwrap();
    let s2 = Scheduler::new(cycle2.clone(), handle);
    assert!(s2.restore().await.unwrap());
    assert_eq!(cycle2.runs.load(Ordering::SeqCst), 1);
    assert_eq!(s2.status().await.unwrap().interval, 30);
    s2.stop().await.unwrap();
}

async fn wait_for_records(store: &MemoryStore, n: usize, limit: Duration) -> usize {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let len = store.snapshot().task_records.len();
        if len >= n || tokio::time::Instant::now() >= deadline {
            return len;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn timer_fires_again_after_one_period() {
    let cycle = CountingCycle::new(DeliveryResult::ok(2));
    let store = Arc::new(MemoryStore::new());
    let s = Scheduler::new(cycle.clone(), StateHandle::new(store.clone()))
        .with_period(Duration::from_millis(100));

    s.start(1).await.unwrap();
    assert_eq!(store.snapshot().task_records.len(), 1);
    let first_refresh = store.snapshot().last_auto_refresh_time;

    assert!(wait_for_records(&store, 2, Duration::from_secs(2)).await >= 2);
    s.stop().await.unwrap();

    let st = store.snapshot();
    assert!(cycle.runs.load(Ordering::SeqCst) >= 2);
    assert!(st.task_records.iter().all(|r| r.success && r.item_count == 2));
    assert!(st.last_auto_refresh_time > first_refresh);
}

#[tokio::test]
async fn stopping_during_a_timed_cycle_still_records_it() {
    let cycle = CountingCycle::slow_after_first(Duration::from_millis(300));
    let store = Arc::new(MemoryStore::new());
    let s = Scheduler::new(cycle.clone(), StateHandle::new(store.clone()))
        .with_period(Duration::from_millis(100));

    s.start(1).await.unwrap();
    assert_eq!(store.snapshot().task_records.len(), 1);

    // timed cycle begins at ~100 ms and runs for 300 ms
    tokio::time::sleep(Duration::from_millis(180)).await;
    assert!(s.is_cycle_in_progress());
    assert_eq!(s.phase(), SchedulerPhase::Firing);

    s.stop().await.unwrap();
    assert_eq!(s.phase(), SchedulerPhase::Firing);
    assert!(s.status().await.unwrap().next_refresh_time.is_none());

    assert_eq!(wait_for_records(&store, 2, Duration::from_secs(2)).await, 2);
    assert!(!s.is_cycle_in_progress());
    assert_eq!(s.phase(), SchedulerPhase::Idle);

    // nothing fires after stop
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(cycle.runs.load(Ordering::SeqCst), 2);
    let st = store.snapshot();
    assert_eq!(st.task_records.len(), 2);
    assert!(!st.scheduler_enabled);
}

#[tokio::test]
async fn next_refresh_follows_the_fixed_schedule_not_the_cycle_length() {
    let cycle = CountingCycle::slow_after_first(Duration::from_millis(150));
    let store = Arc::new(MemoryStore::new());
    let s = Scheduler::new(cycle.clone(), StateHandle::new(store.clone()))
        .with_period(Duration::from_millis(200));

    let before = Utc::now();
    s.start(1).await.unwrap();
    let next = s.status().await.unwrap().next_refresh_time.unwrap();
    let ms = (next - before).num_milliseconds();
    assert!((190..=260).contains(&ms), "first tick ~200 ms out, got {ms} ms");

    // inside the slow timed cycle; next tick is still start + 2 periods
    tokio::time::sleep(Duration::from_millis(280)).await;
    assert!(s.is_cycle_in_progress());
    let next = s.status().await.unwrap().next_refresh_time.unwrap();
    let ms = (next - before).num_milliseconds();
    assert!((380..=470).contains(&ms), "second tick ~400 ms out, got {ms} ms");

    s.stop().await.unwrap();
}

#[tokio::test]
async fn next_refresh_includes_the_drawn_jitter() {
    let cycle = CountingCycle::new(DeliveryResult::ok(1));
    let store = Arc::new(MemoryStore::new());
    let s = Scheduler::new(cycle, StateHandle::new(store))
        .with_jitter(Duration::from_secs(300));

    let before = Utc::now();
    s.start(10).await.unwrap();
    let next = s.status().await.unwrap().next_refresh_time.unwrap();
    let secs = (next - before).num_seconds();
    assert!((599..=901).contains(&secs), "10 min + up to 300 s jitter, got {secs}s");
    s.stop().await.unwrap();
}

/// Memory store whose saves fail while `broken` is set.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    broken: AtomicBool,
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn load(&self) -> anyhow::Result<PersistedState> {
        self.inner.load().await
    }

    async fn save(&self, state: &PersistedState) -> anyhow::Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.inner.save(state).await
    }
}

#[tokio::test]
async fn failed_persist_on_restart_keeps_the_running_timer() {
    let cycle = CountingCycle::new(DeliveryResult::ok(1));
    let store = Arc::new(FlakyStore::default());
    let s = Scheduler::new(cycle.clone(), StateHandle::new(store.clone()));

    s.start(30).await.unwrap();
    let armed = s.status().await.unwrap().next_refresh_time;
    assert!(armed.is_some());

    store.broken.store(true, Ordering::SeqCst);
    assert!(matches!(s.start(5).await, Err(SchedulerError::Store(_))));

    let status = s.status().await.unwrap();
    assert_eq!(status.phase, SchedulerPhase::Scheduled);
    assert_eq!(status.next_refresh_time, armed);
    assert_eq!(status.interval, 30);
    assert_eq!(cycle.runs.load(Ordering::SeqCst), 1);

    store.broken.store(false, Ordering::SeqCst);
    s.stop().await.unwrap();
}
