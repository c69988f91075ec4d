//! Priority-scheduled periodic task runner (spec §4.2), grounded in
//! `original_source/app/services/event_loop.py`'s `TradingEventLoop`.
//!
//! Single-threaded cooperative loop with a 1s tick period. Each tick
//! collects due tasks, sorts them stably by `(priority asc, next_due
//! asc)`, and awaits each to completion before starting the next —
//! this is what gives `risk_check` (CRITICAL) precedence over
//! `trading_cycle` (NORMAL) within the same tick (P7).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;
use crate::types::TaskPriority;

pub type TaskResult = anyhow::Result<()>;
pub type BoxFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;

/// A registrable unit of work. Implemented automatically for any
/// `FnMut() -> impl Future<Output = TaskResult> + Send` closure, so
/// callers register plain async closures (see `TradingEngine::wire`).
pub trait TaskFn: Send {
    fn call(&mut self) -> BoxFuture;
}

impl<F, Fut> TaskFn for F
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    fn call(&mut self) -> BoxFuture {
        Box::pin((self)())
    }
}

/// Immutable identity plus mutable run state for one registered task
/// (spec §3 `ScheduledTask`).
#[derive(Debug, Clone)]
pub struct ScheduledTaskState {
    pub name: String,
    pub interval: Duration,
    pub priority: TaskPriority,
    pub next_due: DateTime<Utc>,
    pub run_count: u64,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub enabled: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

struct TaskEntry {
    state: ScheduledTaskState,
    task: Box<dyn TaskFn>,
}

/// A read-only reference to a registered task, usable after
/// registration to enable/disable it without holding the scheduler.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub name: String,
}

/// Snapshot of one task's status, for the (out-of-scope) control/status
/// surface and for tests.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub name: String,
    pub enabled: bool,
    pub priority: TaskPriority,
    pub interval_secs: i64,
    pub run_count: u64,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub next_due: DateTime<Utc>,
}

/// Read-only scheduler-wide counters, grounded in
/// `event_loop.py::EventLoopState`.
#[derive(Debug, Clone, Default)]
pub struct SchedulerMetrics {
    pub total_ticks: u64,
    pub tasks_executed: u64,
    pub errors_encountered: u64,
    pub last_cycle_duration_ms: f64,
}

pub struct TaskScheduler {
    clock: Arc<dyn Clock>,
    tasks: Vec<TaskEntry>,
    paused: bool,
    stopping: bool,
    tick_period: Duration,
    metrics: SchedulerMetrics,
}

impl TaskScheduler {
    pub fn new(clock: Arc<dyn Clock>, tick_period_secs: u64) -> Self {
        Self {
            clock,
            tasks: Vec::new(),
            paused: false,
            stopping: false,
            tick_period: Duration::seconds(tick_period_secs as i64),
            metrics: SchedulerMetrics::default(),
        }
    }

    /// Register a periodic task. `next_due` starts at `now`, so a
    /// freshly registered task is immediately eligible on the next
    /// tick.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        interval_secs: u64,
        priority: TaskPriority,
        max_retries: u32,
        retry_delay_secs: u64,
        task: impl TaskFn + 'static,
    ) -> TaskHandle {
        let name = name.into();
        let now = self.clock.now();
        self.tasks.push(TaskEntry {
            state: ScheduledTaskState {
                name: name.clone(),
                interval: Duration::seconds(interval_secs as i64),
                priority,
                next_due: now,
                run_count: 0,
                error_count: 0,
                last_error: None,
                enabled: true,
                max_retries,
                retry_delay: Duration::seconds(retry_delay_secs as i64),
            },
            task: Box::new(task),
        });
        TaskHandle { name }
    }

    pub fn enable(&mut self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    pub fn disable(&mut self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        if let Some(entry) = self.tasks.iter_mut().find(|t| t.state.name == name) {
            entry.state.enabled = enabled;
            true
        } else {
            false
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Request a graceful stop. The in-flight task, if any, is allowed
    /// to finish; `run()` returns once the current tick completes.
    pub fn stop(&mut self) {
        self.stopping = true;
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics.clone()
    }

    pub fn task_status(&self) -> Vec<TaskStatus> {
        self.tasks
            .iter()
            .map(|t| TaskStatus {
                name: t.state.name.clone(),
                enabled: t.state.enabled,
                priority: t.state.priority,
                interval_secs: t.state.interval.num_seconds(),
                run_count: t.state.run_count,
                error_count: t.state.error_count,
                last_error: t.state.last_error.clone(),
                next_due: t.state.next_due,
            })
            .collect()
    }

    /// Indices of due, enabled tasks sorted by `(priority asc, next_due
    /// asc)` — a stable sort, so registration order breaks ties (spec
    /// §4.2 step 3).
    fn due_task_indices(&self, now: DateTime<Utc>) -> Vec<usize> {
        let mut due: Vec<usize> = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.state.enabled && t.state.next_due <= now)
            .map(|(i, _)| i)
            .collect();
        due.sort_by(|&a, &b| {
            let ta = &self.tasks[a].state;
            let tb = &self.tasks[b].state;
            ta.priority
                .cmp(&tb.priority)
                .then(ta.next_due.cmp(&tb.next_due))
        });
        due
    }

    /// Run exactly one tick at `now`: gather due tasks, execute them in
    /// priority order, update run state. Exposed directly so tests can
    /// drive the scheduler deterministically with a `TestClock` without
    /// waiting on real sleeps.
    pub async fn tick_once(&mut self, now: DateTime<Utc>) {
        let due = self.due_task_indices(now);

        for idx in due {
            if self.stopping {
                break;
            }
            let name = self.tasks[idx].state.name.clone();
            let result = self.tasks[idx].task.call().await;
            let now = self.clock.now();

            match result {
                Ok(()) => {
                    let state = &mut self.tasks[idx].state;
                    state.next_due = now + state.interval;
                    state.run_count += 1;
                    self.metrics.tasks_executed += 1;
                }
                Err(e) => {
                    let state = &mut self.tasks[idx].state;
                    state.error_count += 1;
                    state.last_error = Some(e.to_string());
                    let backoff = state.retry_delay * (state.error_count.min(state.max_retries) as i32);
                    state.next_due = now + backoff;
                    self.metrics.errors_encountered += 1;
                    tracing::error!(task = %name, error = %e, "scheduled task failed");
                }
            }
        }
    }

    /// The main cooperative loop. Runs until `stop()` is called.
    /// Suspends on `pause()`/`resume()` at the top of every tick.
    pub async fn run(&mut self) {
        self.stopping = false;
        tracing::info!("task scheduler starting");

        while !self.stopping {
            while self.paused && !self.stopping {
                tokio::time::sleep(StdDuration::from_millis(100)).await;
            }
            if self.stopping {
                break;
            }

            let cycle_start = self.clock.now();
            self.tick_once(cycle_start).await;
            let cycle_end = self.clock.now();

            self.metrics.total_ticks += 1;
            self.metrics.last_cycle_duration_ms =
                (cycle_end - cycle_start).num_milliseconds() as f64;

            let elapsed_ms = self.metrics.last_cycle_duration_ms.max(0.0) as u64;
            let tick_ms = self.tick_period.num_milliseconds().max(0) as u64;
            let sleep_ms = tick_ms.saturating_sub(elapsed_ms);
            tokio::time::sleep(StdDuration::from_millis(sleep_ms)).await;
        }

        tracing::info!("task scheduler stopped");
    }
}
