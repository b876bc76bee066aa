//! Deadline-ordered timer wheel used by the transaction layer (§4.F, §9).
//!
//! Adapted from the teacher's `Timer<T>`: a `BTreeMap` keyed on
//! `(execute_at, task_id)` so `poll` pops everything due in O(k log n).
//! The teacher's version wraps its maps in `RwLock` for a multi-threaded
//! endpoint; this crate's event loop is single-threaded (§5: "no internal
//! locking"), so the maps here are plain fields mutated through `&mut self`.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
struct TimerKey {
    execute_at_nanos: u128,
    task_id: u64,
}

/// A min-heap of deadlines, each carrying a caller-supplied payload (a
/// `TransactionTimer` variant, in this crate's usage).
pub struct Timer<T> {
    tasks: BTreeMap<TimerKey, T>,
    id_to_deadline: HashMap<u64, u128>,
    epoch: Instant,
    last_task_id: u64,
}

impl<T> Default for Timer<T> {
    fn default() -> Self {
        Timer::new()
    }
}

impl<T> Timer<T> {
    pub fn new() -> Self {
        Timer {
            tasks: BTreeMap::new(),
            id_to_deadline: HashMap::new(),
            epoch: Instant::now(),
            last_task_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn nanos_since_epoch(&self, instant: Instant) -> u128 {
        instant.saturating_duration_since(self.epoch).as_nanos()
    }

    /// Schedule `value` to fire after `duration`, returning a cancellable
    /// task id.
    pub fn schedule(&mut self, duration: Duration, value: T) -> u64 {
        self.schedule_at(Instant::now() + duration, value)
    }

    pub fn schedule_at(&mut self, execute_at: Instant, value: T) -> u64 {
        self.last_task_id += 1;
        let task_id = self.last_task_id;
        let execute_at_nanos = self.nanos_since_epoch(execute_at);
        self.tasks.insert(TimerKey { execute_at_nanos, task_id }, value);
        self.id_to_deadline.insert(task_id, execute_at_nanos);
        task_id
    }

    /// Cancel a scheduled task. Idempotent: cancelling twice or an unknown
    /// id is a no-op, matching §5's "cancellation is synchronous and
    /// idempotent".
    pub fn cancel(&mut self, task_id: u64) -> Option<T> {
        let execute_at_nanos = self.id_to_deadline.remove(&task_id)?;
        self.tasks.remove(&TimerKey { execute_at_nanos, task_id })
    }

    /// Pop every task whose deadline is `<= now`, in deadline order.
    pub fn poll(&mut self, now: Instant) -> Vec<T> {
        let cutoff = self.nanos_since_epoch(now);
        let due: Vec<TimerKey> = self
            .tasks
            .range(..=TimerKey { execute_at_nanos: cutoff, task_id: u64::MAX })
            .map(|(key, _)| *key)
            .collect();
        let mut values = Vec::with_capacity(due.len());
        for key in due {
            if let Some(value) = self.tasks.remove(&key) {
                values.push(value);
            }
            self.id_to_deadline.remove(&key.task_id);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut timer: Timer<&'static str> = Timer::new();
        let now = Instant::now();
        timer.schedule_at(now + Duration::from_millis(20), "second");
        timer.schedule_at(now, "first");
        let fired = timer.poll(now + Duration::from_millis(50));
        assert_eq!(fired, vec!["first", "second"]);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut timer: Timer<&'static str> = Timer::new();
        let id = timer.schedule(Duration::from_millis(10), "task");
        assert_eq!(timer.cancel(id), Some("task"));
        assert_eq!(timer.cancel(id), None);
    }

    #[test]
    fn poll_leaves_future_tasks_untouched() {
        let mut timer: Timer<&'static str> = Timer::new();
        let now = Instant::now();
        timer.schedule_at(now + Duration::from_secs(10), "later");
        assert!(timer.poll(now).is_empty());
        assert_eq!(timer.len(), 1);
    }
}
