//! Run queue shared by all CPUs
//!
//! A thread is in the queue from the moment it becomes runnable until it
//! blocks or exits, including while it runs. Dispatch rotates the picked
//! thread to the tail, which gives round-robin order among runnable
//! threads. The `RUNNABLE` flag mirrors membership and is only changed here,
//! under the run-queue lock.

use alloc::{collections::VecDeque, sync::Arc};

use super::thread::{ThreadFlags, ThreadRef};
use crate::arch::CpuId;

pub struct RunQueue {
    threads: VecDeque<ThreadRef>,
}

impl RunQueue {
    pub const fn new() -> Self {
        Self {
            threads: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Append `thread` at the tail and mark it runnable.
    ///
    /// Returns `false` if it was already queued or has exited.
    pub fn enqueue(&mut self, thread: &ThreadRef) -> bool {
        crate::sched_assert!(!thread.is_idle(), "idle thread enqueued: {:?}", thread);

        if thread.is_runnable() || thread.has_exited() {
            return false;
        }
        self.threads.push_back(thread.clone());
        thread.set_flags(ThreadFlags::RUNNABLE);
        true
    }

    /// Remove `thread` and clear its runnable flag. Absent threads are a
    /// no-op.
    pub fn dequeue(&mut self, thread: &ThreadRef) -> bool {
        crate::sched_assert!(!thread.is_idle(), "idle thread dequeued: {:?}", thread);

        if !thread.is_runnable() {
            return false;
        }
        match self.threads.iter().position(|t| Arc::ptr_eq(t, thread)) {
            Some(pos) => {
                self.threads.remove(pos);
                thread.clear_flags(ThreadFlags::RUNNABLE);
                true
            }
            None => false,
        }
    }

    pub fn is_queued(&self, thread: &ThreadRef) -> bool {
        self.threads.iter().any(|t| Arc::ptr_eq(t, thread))
    }

    /// Oldest runnable thread other than `current` that `cpu` may run.
    ///
    /// Threads bound to another CPU are skipped. The chosen thread moves to
    /// the tail and is bound to `cpu`.
    pub fn take_next(&mut self, cpu: CpuId, current: &ThreadRef) -> Option<ThreadRef> {
        let pos = self.threads.iter().position(|t| {
            !Arc::ptr_eq(t, current) && t.cpu().map_or(true, |owner| owner == cpu)
        })?;
        let thread = self.threads.remove(pos)?;
        self.threads.push_back(thread.clone());
        thread.bind(cpu);
        Some(thread)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThreadRef> {
        self.threads.iter()
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}
