//! Multi-wait event gate
//!
//! An [`Event`] pairs a FIFO of undelivered results with a FIFO of waiting
//! threads. [`Scheduler::event_trigger`] wakes every registered listener and
//! queues its result. [`Scheduler::events_await`] waits on any of several
//! events and reports which one delivered.
//!
//! Wake attribution is first-trigger-wins: a listener record carries the
//! caller's index of its event, and the first trigger to claim the waiter
//! stores that index in the thread. Later triggers still see the waiter's
//! remaining records as listeners and queue their results, but do not wake
//! it again. A record is live until its waiter is claimed.
//!
//! Lock order: events in caller order, then the alarm list, then the run
//! queue.

use alloc::{collections::VecDeque, sync::Arc, vec::Vec};
use core::mem;

use super::{
    scheduler::Scheduler,
    thread::{Thread, ThreadRef},
};
use crate::{
    error::{KernelError, KernelResult},
    sync::{IrqMutex, IrqMutexGuard},
    timer::{Alarm, AlarmRef},
};

/// A waiting thread and the caller-side index of this event in its wait.
struct Listener {
    thread: ThreadRef,
    index: usize,
}

struct EventQueues<T> {
    pending: VecDeque<T>,
    listeners: VecDeque<Listener>,
}

impl<T> EventQueues<T> {
    fn register(&mut self, thread: &ThreadRef, index: usize) -> KernelResult<()> {
        self.listeners
            .try_reserve(1)
            .map_err(|_| KernelError::OutOfMemory {
                requested: mem::size_of::<Listener>(),
                available: 0,
            })?;
        self.listeners.push_back(Listener {
            thread: thread.clone(),
            index,
        });
        Ok(())
    }

    fn deregister(&mut self, thread: &Thread) {
        self.listeners
            .retain(|l| !core::ptr::eq(Arc::as_ptr(&l.thread), thread));
    }

    fn live_listeners(&self) -> usize {
        self.listeners
            .iter()
            .filter(|l| l.thread.wake_index().is_none())
            .count()
    }
}

/// Rendezvous point owned by a client subsystem (command queue, I/O port).
pub struct Event<T> {
    queues: IrqMutex<EventQueues<T>>,
}

impl<T> Event<T> {
    pub const fn new() -> Self {
        Self {
            queues: IrqMutex::new(EventQueues {
                pending: VecDeque::new(),
                listeners: VecDeque::new(),
            }),
        }
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

type Guards<'a, T> = Vec<IrqMutexGuard<'a, EventQueues<T>>>;

fn has_duplicates<T>(events: &[&Event<T>]) -> bool {
    events
        .iter()
        .enumerate()
        .any(|(i, a)| events[i + 1..].iter().any(|b| core::ptr::eq(*a, *b)))
}

/// Release in reverse acquisition order.
fn release<T>(guards: &mut Guards<'_, T>) {
    while let Some(guard) = guards.pop() {
        drop(guard);
    }
}

impl Scheduler {
    /// Deliver `result` through `event`.
    ///
    /// Every registered listener is woken and the result is queued for the
    /// next consumer. With no listener records at all the result is queued
    /// only when `drop_if_no_listeners` is false. Returns the number of
    /// threads woken, which is zero when every record belonged to a waiter
    /// some other event already woke.
    pub fn event_trigger<T>(
        &self,
        event: &Event<T>,
        result: T,
        drop_if_no_listeners: bool,
    ) -> KernelResult<usize> {
        let mut queues = event.queues.lock(self.platform());
        queues.pending.try_reserve(1).map_err(|_| {
            log::warn!("[EVENT] no memory for a pending result");
            KernelError::OutOfMemory {
                requested: mem::size_of::<T>(),
                available: 0,
            }
        })?;

        let had_listeners = !queues.listeners.is_empty();
        let mut woken = 0;
        while let Some(listener) = queues.listeners.pop_front() {
            if listener.thread.claim_wake(listener.index) {
                self.wake_thread(&listener.thread);
                woken += 1;
            }
        }
        self.metrics().record_trigger(woken);

        if !had_listeners && drop_if_no_listeners {
            self.metrics().record_event_dropped();
            log::trace!("[EVENT] no listeners, result dropped");
            return Ok(0);
        }
        queues.pending.push_back(result);
        Ok(woken)
    }

    /// Wait until any of `events` has a result.
    ///
    /// Events are locked and scanned in slice order. The first pending
    /// result found is returned with its event's index. Without `block`,
    /// `Ok(None)` means nothing was ready. With `block` the call returns a
    /// result once some trigger wakes the caller, preferring the event that
    /// did so.
    pub fn events_await<T>(
        &self,
        events: &[&Event<T>],
        block: bool,
    ) -> KernelResult<Option<(usize, T)>> {
        self.wait_events(events, block, None)
    }

    /// Blocking wait bounded by `timeout_us`. `Ok(None)` on timeout.
    pub fn events_await_timeout<T>(
        &self,
        events: &[&Event<T>],
        timeout_us: u64,
    ) -> KernelResult<Option<(usize, T)>> {
        let alarm = Alarm::new(timeout_us, self.current_thread());
        let result = self.wait_events(events, true, Some(&alarm));
        self.alarm_clear(&alarm);
        result
    }

    fn wait_events<T>(
        &self,
        events: &[&Event<T>],
        block: bool,
        alarm: Option<&AlarmRef>,
    ) -> KernelResult<Option<(usize, T)>> {
        crate::sched_assert!(
            !(block && events.is_empty()),
            "blocking wait on no events by {}",
            self.current_thread()
        );
        crate::sched_assert!(
            !has_duplicates(events),
            "event listed twice in one wait by {}",
            self.current_thread()
        );
        let platform = self.platform();
        let irq = platform.disable_interrupts();
        let current = self.current_thread();
        if block {
            crate::sched_assert!(
                current.preempt_count() == 0,
                "{} blocked on events with preemption disabled on cpu {}",
                current,
                platform.current_cpu()
            );
        }

        let mut guards: Guards<'_, T> = Vec::new();
        let armed = guards.try_reserve_exact(events.len()).map_err(KernelError::from).and_then(
            |()| match alarm {
                Some(alarm) => self.post_alarm_masked(alarm),
                None => Ok(()),
            },
        );
        if let Err(err) = armed {
            platform.restore_interrupts(irq);
            log::warn!("[EVENT] {} cannot wait: {}", current, err);
            return Err(err);
        }

        loop {
            for event in events {
                guards.push(event.queues.lock(platform));
            }

            // Drop leftover records from the previous round before the wake
            // index is reset, so no trigger can claim this thread for it.
            for queues in guards.iter_mut() {
                queues.deregister(&current);
            }
            let woke = current.reset_wake();

            let ready = woke
                .and_then(|i| {
                    guards
                        .get_mut(i)
                        .and_then(|q| q.pending.pop_front())
                        .map(|r| (i, r))
                })
                .or_else(|| {
                    guards
                        .iter_mut()
                        .enumerate()
                        .find_map(|(i, q)| q.pending.pop_front().map(|r| (i, r)))
                });

            let timed_out = alarm.map_or(false, |a| !a.is_active());
            if ready.is_some() || !block || timed_out {
                release(&mut guards);
                platform.restore_interrupts(irq);
                return Ok(ready);
            }

            for (index, queues) in guards.iter_mut().enumerate() {
                if let Err(err) = queues.register(&current, index) {
                    for queues in guards.iter_mut() {
                        queues.deregister(&current);
                    }
                    release(&mut guards);
                    platform.restore_interrupts(irq);
                    log::warn!("[EVENT] {} cannot register as listener: {}", current, err);
                    return Err(err);
                }
            }
            if !self.dequeue_for_wait(&current, alarm) {
                // Timed out while registering. The next pass reports it.
                for queues in guards.iter_mut() {
                    queues.deregister(&current);
                }
                release(&mut guards);
                continue;
            }
            release(&mut guards);

            self.reschedule(&current);
            platform.disable_interrupts();
        }
    }

    /// Live listeners on `events` whose thread is also in the run queue.
    ///
    /// Takes every event lock and then the run-queue lock, so the count is
    /// a consistent snapshot. Zero whenever nothing re-enqueued a waiter
    /// behind the scheduler's back.
    pub fn queued_listeners<T>(&self, events: &[&Event<T>]) -> usize {
        crate::sched_assert!(
            !has_duplicates(events),
            "event listed twice in a membership check"
        );
        let platform = self.platform();
        let mut guards: Guards<'_, T> = events.iter().map(|e| e.queues.lock(platform)).collect();
        let rq = self.run_queue().lock(platform);
        let count = guards
            .iter()
            .flat_map(|q| q.listeners.iter())
            .filter(|l| l.thread.wake_index().is_none() && rq.is_queued(&l.thread))
            .count();
        drop(rq);
        release(&mut guards);
        count
    }

    /// Results queued on `event` and not yet consumed.
    pub fn event_pending_len<T>(&self, event: &Event<T>) -> usize {
        event.queues.lock(self.platform()).pending.len()
    }

    /// Threads registered on `event` and not yet woken.
    pub fn event_listener_count<T>(&self, event: &Event<T>) -> usize {
        event.queues.lock(self.platform()).live_listeners()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{arch::mock::MockPlatform, sched::SchedConfig};

    fn scheduler() -> &'static Scheduler {
        let platform = MockPlatform::new(1);
        let sched = Scheduler::new(platform, SchedConfig::default()).unwrap();
        platform.attach(sched)
    }

    /// Put `t` on CPU 0 as the running thread.
    fn run(sched: &Scheduler, t: &ThreadRef) {
        sched.sched_enqueue_thread(t);
        sched.sched_next();
        assert!(Arc::ptr_eq(&sched.current_thread(), t));
    }

    #[test]
    fn test_results_are_delivered_fifo() {
        let sched = scheduler();
        let t = sched.new_thread("waiter");
        run(sched, &t);
        let event = Event::new();

        sched.event_trigger(&event, 1u32, false).unwrap();
        sched.event_trigger(&event, 2u32, false).unwrap();

        assert_eq!(sched.events_await(&[&event], true).unwrap(), Some((0, 1)));
        assert_eq!(sched.events_await(&[&event], true).unwrap(), Some((0, 2)));
        assert_eq!(sched.event_pending_len(&event), 0);
    }

    #[test]
    fn test_trigger_without_listeners_honors_drop_flag() {
        let sched = scheduler();
        let event = Event::new();

        assert_eq!(sched.event_trigger(&event, 7u8, true).unwrap(), 0);
        assert_eq!(sched.event_pending_len(&event), 0);

        sched.event_trigger(&event, 7u8, false).unwrap();
        assert_eq!(sched.event_pending_len(&event), 1);
        assert_eq!(sched.metrics().summary().events_dropped, 1);
    }

    #[test]
    fn test_non_blocking_wait_reports_nothing_ready() {
        let sched = scheduler();
        let t = sched.new_thread("poller");
        run(sched, &t);
        let a: Event<u8> = Event::new();
        let b: Event<u8> = Event::new();

        assert_eq!(sched.events_await(&[&a, &b], false).unwrap(), None);
        assert_eq!(sched.event_listener_count(&a), 0);
        assert!(t.is_runnable());
    }

    #[test]
    fn test_immediate_scan_uses_caller_order() {
        let sched = scheduler();
        let t = sched.new_thread("poller");
        run(sched, &t);
        let a = Event::new();
        let b = Event::new();
        sched.event_trigger(&b, "b", false).unwrap();
        sched.event_trigger(&a, "a", false).unwrap();

        assert_eq!(sched.events_await(&[&a, &b], false).unwrap(), Some((0, "a")));
        assert_eq!(sched.events_await(&[&a, &b], false).unwrap(), Some((1, "b")));
    }

    #[test]
    fn test_trigger_wakes_claimed_waiter_once_and_keeps_result() {
        let sched = scheduler();
        let waiter = sched.new_thread("waiter");
        let e1 = Event::new();
        let e2 = Event::new();
        {
            let mut q1 = e1.queues.lock(sched.platform());
            q1.register(&waiter, 0).unwrap();
        }
        {
            let mut q2 = e2.queues.lock(sched.platform());
            q2.register(&waiter, 1).unwrap();
        }
        assert_eq!(sched.event_listener_count(&e2), 1);

        assert_eq!(sched.event_trigger(&e2, 5u32, true).unwrap(), 1);
        assert_eq!(waiter.wake_index(), Some(1));
        assert!(sched.is_queued(&waiter));
        // The record left on e1 belongs to an already-claimed waiter: it is
        // not woken again, but the result is still queued.
        assert_eq!(sched.event_listener_count(&e1), 0);
        assert_eq!(sched.event_trigger(&e1, 6u32, true).unwrap(), 0);
        assert_eq!(waiter.wake_index(), Some(1));
        assert_eq!(sched.event_pending_len(&e1), 1);
        assert_eq!(sched.event_pending_len(&e2), 1);
        assert_eq!(sched.metrics().summary().events_dropped, 0);

        // Records are gone now, so a dropping trigger discards.
        sched.event_trigger(&e1, 7u32, true).unwrap();
        assert_eq!(sched.event_pending_len(&e1), 1);
    }

    #[test]
    fn test_queued_listener_audit() {
        let sched = scheduler();
        let waiter = sched.new_thread("waiter");
        let event: Event<u8> = Event::new();
        event
            .queues
            .lock(sched.platform())
            .register(&waiter, 0)
            .unwrap();
        assert_eq!(sched.queued_listeners(&[&event]), 0);

        sched.sched_enqueue_thread(&waiter);
        assert_eq!(sched.queued_listeners(&[&event]), 1);

        // Claimed records no longer count.
        assert!(waiter.claim_wake(0));
        assert_eq!(sched.queued_listeners(&[&event]), 0);
    }

    #[test]
    #[should_panic(expected = "blocking wait on no events")]
    fn test_blocking_wait_on_nothing_is_fatal() {
        let sched = scheduler();
        let t = sched.new_thread("waiter");
        run(sched, &t);
        let _ = sched.events_await::<u8>(&[], true);
    }

    #[test]
    fn test_non_blocking_wait_on_nothing_is_empty() {
        let sched = scheduler();
        assert_eq!(sched.events_await::<u8>(&[], false).unwrap(), None);
    }

    #[test]
    #[should_panic(expected = "event listed twice")]
    fn test_duplicate_event_in_wait_is_fatal() {
        let sched = scheduler();
        let t = sched.new_thread("waiter");
        run(sched, &t);
        let event: Event<u8> = Event::new();
        let _ = sched.events_await(&[&event, &event], false);
    }
}
