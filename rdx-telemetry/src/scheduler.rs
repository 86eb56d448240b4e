//! The cooperative, single-threaded task scheduler.
//!
//! A `Scheduler` owns a set of periodic tasks. The host calls `tick` from its
//! main loop; every task whose deadline has elapsed runs once, in
//! registration order, and is rescheduled at a fixed rate. Nothing here
//! sleeps or blocks.

use crate::common::TaskId;
use crate::error::{Result, TelemetryError};
use crate::time::Clock;
use slotmap::SlotMap;
use std::time::Duration;
use tracing::{debug, trace};

/// The logic run by a task. It receives the context passed to `tick`.
pub type TaskLogic<C> = Box<dyn FnMut(&mut C)>;

/// A periodic task and its fixed-rate timing state.
struct Task<C> {
    interval: Duration,
    next_deadline: Duration,
    fired: u64,
    missed: u64,
    task_logic: TaskLogic<C>,
}

impl<C> Task<C> {
    fn new(interval: Duration, now: Duration, task_logic: TaskLogic<C>) -> Self {
        Self {
            interval,
            next_deadline: now.checked_add(interval).unwrap_or(Duration::MAX),
            fired: 0,
            missed: 0,
            task_logic,
        }
    }

    /// Runs the task if its deadline has elapsed.
    /// Returns `true` if the task's logic was executed.
    fn process(&mut self, now: Duration, ctx: &mut C) -> bool {
        if now < self.next_deadline {
            return false;
        }
        (self.task_logic)(ctx);
        self.fired += 1;
        self.next_deadline = self
            .next_deadline
            .checked_add(self.interval)
            .unwrap_or(Duration::MAX);

        // Late by whole intervals: fire once, skip to the next boundary after `now`.
        if self.next_deadline <= now {
            let behind = (now - self.next_deadline).as_nanos() / self.interval.as_nanos();
            let skipped = u32::try_from(behind + 1).unwrap_or(u32::MAX);
            self.missed += u64::from(skipped);
            self.next_deadline = self
                .interval
                .checked_mul(skipped)
                .and_then(|jump| self.next_deadline.checked_add(jump))
                .unwrap_or(Duration::MAX);
            debug!(
                skipped,
                interval_ms = self.interval.as_millis() as u64,
                "Task overran; skipped missed firings."
            );
        }
        true
    }
}

/// A read-only view of a task's timing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub interval: Duration,
    pub next_deadline: Duration,
    /// How many times the task's logic has run.
    pub fired: u64,
    /// How many interval boundaries were skipped because a tick came late.
    pub missed: u64,
}

/// The cooperative scheduler.
///
/// `C` is the context handed to every task when it fires. Tasks registered
/// with `register` ignore it; tasks registered with `register_with` use it to
/// reach state owned outside the scheduler, such as the pipeline arena.
pub struct Scheduler<C = ()> {
    clock: Box<dyn Clock>,
    tasks: SlotMap<TaskId, Task<C>>,
    order: Vec<TaskId>,
}

impl<C: 'static> Scheduler<C> {
    /// Creates an empty scheduler reading time from `clock`.
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            clock: Box::new(clock),
            tasks: SlotMap::with_key(),
            order: Vec::new(),
        }
    }

    /// Current time according to the scheduler's clock.
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Registers a zero-argument callback to run every `interval`.
    ///
    /// The first firing happens no earlier than one interval from now.
    ///
    /// # Errors
    /// `TelemetryError::InvalidInterval` if `interval` is zero.
    pub fn register(
        &mut self,
        interval: Duration,
        mut callback: impl FnMut() + 'static,
    ) -> Result<TaskId> {
        self.register_with(interval, move |_: &mut C| callback())
    }

    /// Registers a callback that receives the tick context.
    ///
    /// # Errors
    /// `TelemetryError::InvalidInterval` if `interval` is zero.
    pub fn register_with(
        &mut self,
        interval: Duration,
        callback: impl FnMut(&mut C) + 'static,
    ) -> Result<TaskId> {
        if interval.is_zero() {
            return Err(TelemetryError::InvalidInterval(interval));
        }
        let now = self.clock.now();
        let id = self
            .tasks
            .insert(Task::new(interval, now, Box::new(callback)));
        self.order.push(id);
        debug!(?id, interval_ms = interval.as_millis() as u64, "Task registered.");
        Ok(id)
    }

    /// Runs every due task once, reading the time from the scheduler's clock.
    ///
    /// Returns the number of tasks that fired.
    pub fn tick(&mut self, ctx: &mut C) -> usize {
        let now = self.clock.now();
        self.tick_at(now, ctx)
    }

    /// Runs every task due at `now` once, in registration order.
    pub fn tick_at(&mut self, now: Duration, ctx: &mut C) -> usize {
        let mut fired = 0;
        for &id in &self.order {
            if let Some(task) = self.tasks.get_mut(id) {
                if task.process(now, ctx) {
                    trace!(?id, "Task fired.");
                    fired += 1;
                }
            }
        }
        fired
    }

    /// The earliest pending deadline, if any task is registered.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.tasks.values().map(|task| task.next_deadline).min()
    }

    /// Timing state of one task.
    pub fn task(&self, id: TaskId) -> Option<TaskInfo> {
        self.tasks.get(id).map(|task| TaskInfo {
            interval: task.interval,
            next_deadline: task.next_deadline,
            fired: task.fired,
            missed: task.missed,
        })
    }

    /// Task ids in registration order.
    pub fn task_ids(&self) -> &[TaskId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drops every task. Only used when the application halts during startup.
    pub(crate) fn clear(&mut self) {
        self.tasks.clear();
        self.order.clear();
    }
}
