//! Named periodic tasks with single-flight execution.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::metrics;

use super::types::{RunNowOutcome, SchedulerError, TaskRunResult, TaskSchedule, TaskStatus};

type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

#[derive(Default)]
struct TaskState {
    last_started_at: Option<chrono::DateTime<Utc>>,
    last_finished_at: Option<chrono::DateTime<Utc>>,
    last_duration_ms: Option<u64>,
    last_result: Option<TaskRunResult>,
    run_count: u64,
    skipped_count: u64,
}

struct TaskEntry {
    name: String,
    run_fn: TaskFn,
    schedule: RwLock<TaskSchedule>,
    busy: AtomicBool,
    state: Mutex<TaskState>,
    current: Mutex<Option<JoinHandle<()>>>,
    reschedule: Notify,
}

impl TaskEntry {
    fn schedule(&self) -> TaskSchedule {
        self.schedule
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the single-flight slot. Returns None when a run is in progress.
    fn claim(self: &Arc<Self>) -> Option<BusyGuard> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Some(BusyGuard(Arc::clone(self)))
        } else {
            self.state().skipped_count += 1;
            metrics::TASK_RUNS
                .with_label_values(&[self.name.as_str(), "skipped"])
                .inc();
            None
        }
    }

    async fn run(&self) -> TaskRunResult {
        let started = Instant::now();
        self.state().last_started_at = Some(Utc::now());
        debug!(task = %self.name, "Task started");

        let outcome = (self.run_fn)().await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(summary) => {
                info!(task = %self.name, duration_ms = elapsed.as_millis() as u64, "{}", summary);
                TaskRunResult {
                    success: true,
                    message: summary,
                }
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(task = %self.name, error = %message, "Task failed");
                TaskRunResult {
                    success: false,
                    message,
                }
            }
        };

        metrics::TASK_RUNS
            .with_label_values(&[self.name.as_str(), if result.success { "ok" } else { "error" }])
            .inc();
        metrics::TASK_DURATION
            .with_label_values(&[self.name.as_str()])
            .observe(elapsed.as_secs_f64());

        let mut state = self.state();
        state.last_finished_at = Some(Utc::now());
        state.last_duration_ms = Some(elapsed.as_millis() as u64);
        state.last_result = Some(result.clone());
        state.run_count += 1;
        result
    }

    fn spawn_run(self: &Arc<Self>) -> RunNowOutcome {
        let Some(guard) = self.claim() else {
            debug!(task = %self.name, "Task already running, request merged");
            return RunNowOutcome::AlreadyRunning;
        };

        let entry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            entry.run().await;
        });
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        RunNowOutcome::Started
    }
}

/// Releases the single-flight slot even if the run panics or is aborted.
struct BusyGuard(Arc<TaskEntry>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::SeqCst);
    }
}

/// Runs registered tasks on their intervals.
///
/// A task never overlaps itself: a tick or run-now request that arrives
/// while the task is running is merged into the running execution.
pub struct Scheduler {
    tasks: RwLock<HashMap<String, Arc<TaskEntry>>>,
    grace: Duration,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// `grace` bounds how long [`Scheduler::stop`] waits for in-flight runs.
    pub fn new(grace: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: RwLock::new(HashMap::new()),
            grace,
            running: AtomicBool::new(false),
            shutdown_tx,
            loops: Mutex::new(Vec::new()),
        }
    }

    pub fn register<F, Fut>(
        &self,
        name: impl Into<String>,
        schedule: TaskSchedule,
        run: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let name = name.into();
        let run_fn: TaskFn = Arc::new(move || -> BoxFuture<'static, anyhow::Result<String>> {
            Box::pin(run())
        });
        let entry = Arc::new(TaskEntry {
            name: name.clone(),
            run_fn,
            schedule: RwLock::new(schedule),
            busy: AtomicBool::new(false),
            state: Mutex::new(TaskState::default()),
            current: Mutex::new(None),
            reschedule: Notify::new(),
        });

        {
            let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
            if tasks.contains_key(&name) {
                return Err(SchedulerError::AlreadyRegistered(name));
            }
            tasks.insert(name.clone(), Arc::clone(&entry));
        }
        debug!(task = %name, "Task registered");

        if self.is_running() {
            self.spawn_loop(entry);
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Names of all registered tasks, sorted.
    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn entry(&self, name: &str) -> Result<Arc<TaskEntry>, SchedulerError> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownTask(name.to_string()))
    }

    fn entries(&self) -> Vec<Arc<TaskEntry>> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Start the task in the background unless it is already running.
    pub fn run_now(&self, name: &str) -> Result<RunNowOutcome, SchedulerError> {
        let entry = self.entry(name)?;
        let outcome = entry.spawn_run();
        info!(task = name, outcome = ?outcome, "Run requested");
        Ok(outcome)
    }

    /// Run the task on the caller's task and wait for it.
    ///
    /// Returns `Ok(None)` if the task was already running.
    pub async fn execute(&self, name: &str) -> Result<Option<TaskRunResult>, SchedulerError> {
        let entry = self.entry(name)?;
        let Some(_guard) = entry.claim() else {
            return Ok(None);
        };
        Ok(Some(entry.run().await))
    }

    pub fn status(&self, name: &str) -> Result<TaskStatus, SchedulerError> {
        Ok(snapshot(self.entry(name)?.as_ref()))
    }

    pub fn statuses(&self) -> Vec<TaskStatus> {
        let mut statuses: Vec<TaskStatus> = self.entries().iter().map(|e| snapshot(e)).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Replace a task's schedule. The new interval applies from now.
    pub fn update_schedule(&self, name: &str, schedule: TaskSchedule) -> Result<(), SchedulerError> {
        let entry = self.entry(name)?;
        info!(
            task = name,
            interval_secs = schedule.interval_secs,
            enabled = schedule.enabled,
            "Task schedule updated"
        );
        *entry.schedule.write().unwrap_or_else(PoisonError::into_inner) = schedule;
        entry.reschedule.notify_one();
        Ok(())
    }

    /// Spawn one timer loop per registered task.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        let entries = self.entries();
        info!(tasks = entries.len(), "Starting scheduler");
        for entry in entries {
            self.spawn_loop(entry);
        }
    }

    fn spawn_loop(&self, entry: Arc<TaskEntry>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let initial = entry.schedule();
            if initial.enabled && initial.run_on_start {
                entry.spawn_run();
            }

            loop {
                let interval = entry.schedule().interval();
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = entry.reschedule.notified() => continue,
                    _ = tokio::time::sleep(interval) => {}
                }

                if !entry.schedule().enabled {
                    continue;
                }
                entry.spawn_run();
            }
            debug!(task = %entry.name, "Task loop stopped");
        });
        self.loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Stop the timers, wait up to the grace period for in-flight runs,
    /// then abort whatever is still running.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping scheduler");
        let _ = self.shutdown_tx.send(());

        let loops: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.loops.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in loops {
            let _ = handle.await;
        }

        let deadline = Instant::now() + self.grace;
        loop {
            let busy: Vec<Arc<TaskEntry>> = self
                .entries()
                .into_iter()
                .filter(|e| e.busy.load(Ordering::SeqCst))
                .collect();
            if busy.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                for entry in busy {
                    warn!(task = %entry.name, "Task did not finish within grace period, aborting");
                    if let Some(handle) = entry
                        .current
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take()
                    {
                        handle.abort();
                    }
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        info!("Scheduler stopped");
    }
}

fn snapshot(entry: &TaskEntry) -> TaskStatus {
    let state = entry.state();
    TaskStatus {
        name: entry.name.clone(),
        schedule: entry.schedule(),
        running: entry.busy.load(Ordering::SeqCst),
        last_started_at: state.last_started_at,
        last_finished_at: state.last_finished_at,
        last_duration_ms: state.last_duration_ms,
        last_result: state.last_result.clone(),
        run_count: state.run_count,
        skipped_count: state.skipped_count,
    }
}
