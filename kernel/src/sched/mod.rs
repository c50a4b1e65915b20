//! Thread scheduling
//!
//! Round-robin dispatch over one run queue shared by all CPUs, preemption
//! through a per-CPU one-shot timer, and the blocking primitives built on
//! top: alarms and multi-wait events.
//!
//! The free functions below act on the scheduler installed by
//! [`sched_init`]. Calling any of them earlier is a contract violation.

pub mod config;
pub mod event;
pub mod metrics;
pub mod queue;
pub mod scheduler;
mod smp;
pub mod thread;

pub use config::{SchedConfig, DEFAULT_IDLE_QUANTUM_US, DEFAULT_QUANTUM_US};
pub use event::Event;
pub use metrics::{MetricsSummary, SchedulerMetrics};
pub use scheduler::Scheduler;
pub use thread::{Thread, ThreadFlags, ThreadId, ThreadRef};

use spin::Once;

use crate::{
    arch::{CpuId, Platform},
    error::{KernelError, KernelResult},
    timer::AlarmRef,
};

static SCHEDULER: Once<Scheduler> = Once::new();

/// One-time setup on the boot CPU.
///
/// Creates the run queue and the idle threads and arms the preemption
/// timer of the calling CPU. Other CPUs call [`sched_start_cpu`] as they
/// come up. The platform routes the timer interrupt to
/// [`sched_timer_interrupt`] and the reschedule IPI to
/// [`sched_reschedule_ipi`].
pub fn sched_init(
    platform: &'static dyn Platform,
    config: SchedConfig,
) -> KernelResult<&'static Scheduler> {
    if SCHEDULER.is_completed() {
        return Err(KernelError::AlreadyExists {
            resource: "scheduler",
            id: 0,
        });
    }

    let scheduler = Scheduler::new(platform, config)?;
    let scheduler = SCHEDULER.call_once(|| scheduler);
    scheduler.start_cpu(platform.current_cpu())?;
    log::info!(
        "[SCHED] initialized: {} cpus, quantum {}us",
        platform.cpu_count(),
        config.quantum_us
    );
    Ok(scheduler)
}

/// The installed scheduler, if [`sched_init`] has run.
pub fn scheduler() -> KernelResult<&'static Scheduler> {
    SCHEDULER.get().ok_or(KernelError::NotInitialized {
        subsystem: "scheduler",
    })
}

fn sched() -> &'static Scheduler {
    match SCHEDULER.get() {
        Some(scheduler) => scheduler,
        None => crate::sched_bug!("scheduler used before sched_init"),
    }
}

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub fn sched_start_cpu(cpu: CpuId) -> KernelResult<()> {
    sched().start_cpu(cpu)
}

pub fn sched_timer_interrupt() {
    sched().handle_timer_interrupt();
}

pub fn sched_reschedule_ipi() {
    sched().handle_reschedule_ipi();
}

/// Post-switch obligation of the incoming thread. See
/// [`Scheduler::finish_switch`].
pub fn sched_finish_switch() {
    sched().finish_switch();
}

pub fn sched_next() {
    sched().sched_next();
}

pub fn sched_yield() {
    sched().sched_yield();
}

pub fn yield_now() {
    sched().yield_now();
}

pub fn exit_current() -> ! {
    sched().exit_current()
}

pub fn current_thread() -> ThreadRef {
    sched().current_thread()
}

pub fn sched_enqueue_thread(thread: &ThreadRef) -> bool {
    sched().sched_enqueue_thread(thread)
}

pub fn sched_dequeue_thread(thread: &ThreadRef) -> bool {
    sched().sched_dequeue_thread(thread)
}

pub fn preempt_disable() {
    sched().preempt_disable();
}

pub fn preempt_enable() {
    sched().preempt_enable();
}

pub fn alarm_post(alarm: &AlarmRef, wait: bool) -> KernelResult<()> {
    sched().alarm_post(alarm, wait)
}

pub fn alarm_clear(alarm: &AlarmRef) -> bool {
    sched().alarm_clear(alarm)
}

pub fn alarm_cleared(alarm: &AlarmRef) -> bool {
    sched().alarm_cleared(alarm)
}

pub fn sleep_us(us: u64) -> KernelResult<()> {
    sched().sleep_us(us)
}

pub fn events_await<T>(events: &[&Event<T>], block: bool) -> KernelResult<Option<(usize, T)>> {
    sched().events_await(events, block)
}

pub fn events_await_timeout<T>(
    events: &[&Event<T>],
    timeout_us: u64,
) -> KernelResult<Option<(usize, T)>> {
    sched().events_await_timeout(events, timeout_us)
}

pub fn event_trigger<T>(event: &Event<T>, result: T, drop_if_no_listeners: bool) -> KernelResult<usize> {
    sched().event_trigger(event, result, drop_if_no_listeners)
}
