//! Scheduler loop — wakes at the earliest due time and triggers executions.
//!
//! A single loop owns scheduling authority. It sleeps until the earliest
//! `next_fire_time` across enabled jobs (capped so out-of-process store
//! changes are noticed within one tick), or until poked through a
//! [`SchedulerHandle`] after an in-process mutation. Firings run on spawned
//! tasks; a job never has two firings in flight at once — an occurrence
//! that comes due mid-flight is picked up on the wake that follows
//! completion, because `last_fired_at` is only advanced when the execution
//! session finishes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use nudge_types::{Job, JobError};

use crate::schedule::next_fire_time;
use crate::store::JobStore;

/// Execution boundary: hands a due job to the downstream agent layer.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<(), JobError>;
}

/// Wakes the scheduler loop after a job mutation so it recomputes its
/// sleep instead of waiting out the current one.
#[derive(Clone)]
pub struct SchedulerHandle {
    notify: Arc<Notify>,
}

impl SchedulerHandle {
    pub fn poke(&self) {
        self.notify.notify_one();
    }
}

/// The scheduling authority over a job store.
pub struct Scheduler {
    store: Arc<JobStore>,
    executor: Arc<dyn JobExecutor>,
    notify: Arc<Notify>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    max_tick: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<JobStore>, executor: Arc<dyn JobExecutor>, max_tick: Duration) -> Self {
        Self {
            store,
            executor,
            notify: Arc::new(Notify::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            max_tick,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            notify: self.notify.clone(),
        }
    }

    /// Run the wake/evaluate loop. Never returns; run it on its own task
    /// and drop the task (or the process) to stop scheduling.
    pub async fn run(self: Arc<Self>) {
        info!("Scheduler started");
        loop {
            let now = Utc::now();
            self.fire_due(now);

            let sleep_for = self.until_next_wake(Utc::now());
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.notify.notified() => {
                    debug!("Scheduler woken by mutation");
                }
            }
        }
    }

    /// Spawn a firing for every enabled job that is due and not already in
    /// flight.
    fn fire_due(&self, now: DateTime<Utc>) {
        let jobs = match self.store.list(false) {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("Failed to list jobs: {e}");
                return;
            }
        };

        for job in jobs {
            if self.in_flight.lock().unwrap().contains(&job.id) {
                // Still firing; the completion wake will re-evaluate.
                continue;
            }
            // None means exhausted (spent one-shot): terminal, unlike disabled.
            let Some(next) = next_fire_time(&job.schedule, job.last_fired_at, now) else {
                continue;
            };
            if next <= now {
                self.spawn_firing(job);
            }
        }
    }

    fn spawn_firing(&self, job: Job) {
        self.in_flight.lock().unwrap().insert(job.id.clone());

        let store = self.store.clone();
        let executor = self.executor.clone();
        let in_flight = self.in_flight.clone();
        let notify = self.notify.clone();

        tokio::spawn(async move {
            debug!(job_id = %job.id, name = %job.display_name(), "Firing job");
            if let Err(e) = executor.execute(&job).await {
                // No retry: log and let the job keep its place in the schedule.
                warn!(job_id = %job.id, "Job execution failed: {e}");
            }
            if let Err(e) = store.mark_fired(&job.id, Utc::now()) {
                warn!(job_id = %job.id, "Failed to record firing: {e}");
            }
            in_flight.lock().unwrap().remove(&job.id);
            notify.notify_one();
        });
    }

    /// Time until the earliest upcoming fire across enabled jobs, capped at
    /// `max_tick`. In-flight jobs are excluded; their completion pokes the
    /// loop.
    fn until_next_wake(&self, now: DateTime<Utc>) -> Duration {
        let jobs = match self.store.list(false) {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("Failed to list jobs: {e}");
                return self.max_tick;
            }
        };

        let mut earliest: Option<DateTime<Utc>> = None;
        for job in &jobs {
            if self.in_flight.lock().unwrap().contains(&job.id) {
                continue;
            }
            if let Some(next) = next_fire_time(&job.schedule, job.last_fired_at, now) {
                earliest = Some(earliest.map_or(next, |cur| cur.min(next)));
            }
        }

        match earliest {
            Some(at) => {
                let until = (at - now).to_std().unwrap_or(Duration::ZERO);
                until.min(self.max_tick)
            }
            None => self.max_tick,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nudge_types::{DeliverPolicy, JobSpec, Schedule};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Executor that records call counts and can be made slow or failing.
    struct ProbeExecutor {
        fired: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl ProbeExecutor {
        fn new(delay: Duration, fail: bool) -> Self {
            Self {
                fired: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                delay,
                fail,
            }
        }
    }

    #[async_trait]
    impl JobExecutor for ProbeExecutor {
        async fn execute(&self, _job: &Job) -> Result<(), JobError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.fired.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(JobError::Execution("probe failure".into()))
            } else {
                Ok(())
            }
        }
    }

    fn interval_spec(seconds: u64) -> JobSpec {
        JobSpec {
            id: None,
            name: None,
            message: "probe".into(),
            schedule: Schedule::Every { seconds },
            deliver: DeliverPolicy::Always,
            channel: "test".into(),
            to: "t".into(),
            enabled: true,
        }
    }

    fn start(
        store: Arc<JobStore>,
        executor: Arc<ProbeExecutor>,
    ) -> (Arc<Scheduler>, tokio::task::JoinHandle<()>) {
        let scheduler = Arc::new(Scheduler::new(
            store,
            executor,
            Duration::from_millis(200),
        ));
        let task = tokio::spawn(scheduler.clone().run());
        (scheduler, task)
    }

    #[tokio::test]
    async fn test_interval_fires_immediately_then_recurs() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        store.add(&interval_spec(1)).unwrap();
        let executor = Arc::new(ProbeExecutor::new(Duration::from_millis(10), false));

        let (_scheduler, task) = start(store.clone(), executor.clone());
        tokio::time::sleep(Duration::from_millis(300)).await;
        // First fire is immediate
        assert_eq!(executor.fired.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        // Second occurrence one interval later
        assert!(executor.fired.load(Ordering::SeqCst) >= 2);
        task.abort();
    }

    #[tokio::test]
    async fn test_one_shot_fires_exactly_once() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let mut spec = interval_spec(1);
        spec.schedule = Schedule::At {
            at: Utc::now() - chrono::Duration::seconds(5),
        };
        let job = store.add(&spec).unwrap();
        let executor = Arc::new(ProbeExecutor::new(Duration::from_millis(10), false));

        let (_scheduler, task) = start(store.clone(), executor.clone());
        tokio::time::sleep(Duration::from_millis(800)).await;

        assert_eq!(executor.fired.load(Ordering::SeqCst), 1);
        // Exhausted: last_fired_at set, evaluator says never again
        let stored = store.get(&job.id).unwrap();
        assert!(stored.last_fired_at.is_some());
        assert!(next_fire_time(&stored.schedule, stored.last_fired_at, Utc::now()).is_none());
        task.abort();
    }

    #[tokio::test]
    async fn test_no_concurrent_firings_of_same_job() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        store.add(&interval_spec(1)).unwrap();
        // Execution takes longer than the interval
        let executor = Arc::new(ProbeExecutor::new(Duration::from_millis(1500), false));

        let (_scheduler, task) = start(store.clone(), executor.clone());
        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert!(executor.fired.load(Ordering::SeqCst) >= 1);
        assert_eq!(executor.max_active.load(Ordering::SeqCst), 1);
        task.abort();
    }

    #[tokio::test]
    async fn test_failing_job_keeps_rescheduling() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        store.add(&interval_spec(1)).unwrap();
        let executor = Arc::new(ProbeExecutor::new(Duration::from_millis(10), true));

        let (_scheduler, task) = start(store.clone(), executor.clone());
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(executor.fired.load(Ordering::SeqCst) >= 2);
        task.abort();
    }

    #[tokio::test]
    async fn test_disable_lets_in_flight_firing_complete() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let job = store.add(&interval_spec(1)).unwrap();
        let executor = Arc::new(ProbeExecutor::new(Duration::from_millis(500), false));

        let (scheduler, task) = start(store.clone(), executor.clone());
        // Wait for the first firing to start, then disable mid-flight
        tokio::time::sleep(Duration::from_millis(200)).await;
        store.set_enabled(&job.id, false).unwrap();
        scheduler.handle().poke();

        tokio::time::sleep(Duration::from_millis(2000)).await;
        // The in-flight firing completed; nothing further was scheduled
        assert_eq!(executor.fired.load(Ordering::SeqCst), 1);
        task.abort();
    }

    #[tokio::test]
    async fn test_mutation_poke_schedules_new_job_promptly() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let executor = Arc::new(ProbeExecutor::new(Duration::from_millis(10), false));

        // Large max tick: only the poke can wake the loop early
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            executor.clone(),
            Duration::from_secs(60),
        ));
        let task = tokio::spawn(scheduler.clone().run());
        tokio::time::sleep(Duration::from_millis(100)).await;

        store.add(&interval_spec(300)).unwrap();
        scheduler.handle().poke();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(executor.fired.load(Ordering::SeqCst), 1);
        task.abort();
    }
}
