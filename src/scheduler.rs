//! Deferred execution on the next scheduler tick.
//!
//! Some pages ignore provider events that are raised synchronously inside the
//! call that caused them. Emissions that follow a provider switch are therefore
//! posted to the *next tick* of the host's event loop rather than run inline.
//! This is part of the event contract, not an optimisation: a [`Scheduler`]
//! must never run a task before the current call stack has unwound.
//!
//! - In the browser this is a zero-delay `setTimeout` (see `web::TimeoutScheduler`).
//! - Natively and in tests it is a [`TickQueue`] the host drains explicitly.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::rc::Rc;

/// A task to run on a later tick.
pub type Task = Box<dyn FnOnce()>;

/// Runs tasks on the next tick of the host event loop.
pub trait Scheduler: Debug {
    /// Queues `task` to run after the current call stack has unwound.
    ///
    /// Tasks queued from the same tick run in the order they were queued.
    fn next_tick(&self, task: Task);
}

/// A FIFO scheduler drained by the host.
///
/// # Examples
///
/// ```
/// use wallet_relay::scheduler::{Scheduler, TickQueue};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let queue = TickQueue::new();
/// let ran = Rc::new(Cell::new(false));
/// let flag = ran.clone();
/// queue.next_tick(Box::new(move || flag.set(true)));
///
/// assert!(!ran.get());
/// assert_eq!(queue.run_pending(), 1);
/// assert!(ran.get());
/// ```
#[derive(Clone, Default)]
pub struct TickQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl Debug for TickQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickQueue")
            .field("queued", &self.tasks.borrow().len())
            .finish()
    }
}

impl TickQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every task queued before this call; returns how many ran.
    ///
    /// Tasks queued while running belong to the following tick and stay queued.
    pub fn run_pending(&self) -> usize {
        let batch: Vec<Task> = self.tasks.borrow_mut().drain(..).collect();
        let count = batch.len();
        for task in batch {
            task();
        }
        count
    }

    /// Number of tasks waiting for the next tick.
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }
}

impl Scheduler for TickQueue {
    fn next_tick(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn tasks_run_in_queue_order() {
        let queue = TickQueue::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            queue.next_tick(Box::new(move || order.borrow_mut().push(n)));
        }
        queue.run_pending();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn tasks_queued_while_running_wait_for_next_tick() {
        let queue = TickQueue::new();
        let inner = queue.clone();
        queue.next_tick(Box::new(move || inner.next_tick(Box::new(|| {}))));
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.run_pending(), 1);
        assert!(queue.is_empty());
    }
}
