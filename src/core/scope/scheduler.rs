//! Deferred task scheduling.
//!
//! The scope runs on one logical executor; the only suspension points are
//! the deferred digest behind `eval_async` and the coalesced flush behind
//! `apply_async`. Both go through this trait so an embedder can hook its
//! own event loop. The bundled [`TickScheduler`] queues tasks until the
//! embedder drains them.

use std::cell::{Cell, RefCell};

/// Handle identifying a scheduled task, usable for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

/// Schedules work to run on a later tick of the embedder's event loop.
pub trait Scheduler {
    /// Queue a task for a later tick.
    fn schedule(&self, task: Box<dyn FnOnce()>) -> TaskId;

    /// Cancel a scheduled task. Returns whether it was still pending.
    fn cancel(&self, id: TaskId) -> bool;
}

/// Queue-backed scheduler for cooperative single-threaded embedders.
///
/// Scheduled tasks sit in the queue until [`TickScheduler::run_due`] runs
/// them; tasks scheduled while draining wait for the next call.
#[derive(Default)]
pub struct TickScheduler {
    next_id: Cell<u64>,
    queue: RefCell<Vec<(TaskId, Box<dyn FnOnce()>)>>,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every task scheduled so far and return how many ran.
    pub fn run_due(&self) -> usize {
        let due: Vec<_> = self.queue.borrow_mut().drain(..).collect();
        let count = due.len();
        for (_, task) in due {
            task();
        }
        count
    }

    /// How many tasks are waiting.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl Scheduler for TickScheduler {
    fn schedule(&self, task: Box<dyn FnOnce()>) -> TaskId {
        let id = TaskId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.queue.borrow_mut().push((id, task));
        id
    }

    fn cancel(&self, id: TaskId) -> bool {
        let mut queue = self.queue.borrow_mut();
        let before = queue.len();
        queue.retain(|(task_id, _)| *task_id != id);
        queue.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_runs_in_order() {
        let scheduler = TickScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            scheduler.schedule(Box::new(move || log.borrow_mut().push(i)));
        }
        assert_eq!(scheduler.run_due(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_cancel() {
        let scheduler = TickScheduler::new();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let id = scheduler.schedule(Box::new(move || flag.set(true)));
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        scheduler.run_due();
        assert!(!ran.get());
    }

    #[test]
    fn test_tasks_scheduled_while_draining_wait() {
        let scheduler = Rc::new(TickScheduler::new());
        let inner = scheduler.clone();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        scheduler.schedule(Box::new(move || {
            inner.schedule(Box::new(move || flag.set(true)));
        }));
        assert_eq!(scheduler.run_due(), 1);
        assert!(!ran.get());
        assert_eq!(scheduler.run_due(), 1);
        assert!(ran.get());
    }
}
