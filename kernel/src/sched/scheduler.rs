//! Scheduler core
//!
//! Every CPU runs the same dispatch routine. It is entered from the
//! preemption timer, from the reschedule IPI, or synchronously by a yield.
//! There is no scheduler thread. State shared between CPUs is the run
//! queue, the per-CPU alarm lists and the per-thread flag words.
//!
//! A voluntary yield never switches stacks itself. It marks the thread
//! `AWAITING`, sends a reschedule IPI to the thread's CPU and spins until
//! the dispatcher on that CPU has taken the thread off it and, later, put it
//! back. The same path serves a yield issued on behalf of a thread running
//! on another CPU.

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::Ordering;

use super::{
    config::SchedConfig,
    metrics::SchedulerMetrics,
    queue::RunQueue,
    smp::PerCpu,
    thread::{Thread, ThreadFlags, ThreadRef, WAKE_BY_ALARM},
};
use crate::{
    arch::{CpuId, Platform},
    error::{KernelResult, SchedError},
    sync::IrqMutex,
    timer::{Alarm, AlarmRef},
};

pub struct Scheduler {
    platform: &'static dyn Platform,
    config: SchedConfig,
    run_queue: IrqMutex<RunQueue>,
    cpus: Vec<PerCpu>,
    metrics: SchedulerMetrics,
}

impl Scheduler {
    /// Build the run queue and one idle thread per CPU. Each idle thread
    /// starts out as its CPU's current thread.
    pub fn new(platform: &'static dyn Platform, config: SchedConfig) -> KernelResult<Self> {
        config.validate()?;
        let cpu_count = platform.cpu_count();
        if cpu_count == 0 {
            return Err(SchedError::NoCpus.into());
        }

        let cpus = (0..cpu_count)
            .map(|id| PerCpu::new(id, config.idle_quantum_us))
            .collect();

        Ok(Self {
            platform,
            config,
            run_queue: IrqMutex::new(RunQueue::new()),
            cpus,
            metrics: SchedulerMetrics::new(),
        })
    }

    /// Arm the preemption timer on `cpu`. Called once per CPU at bring-up.
    pub fn start_cpu(&self, cpu: CpuId) -> KernelResult<()> {
        let state = self
            .cpus
            .get(cpu)
            .ok_or(SchedError::InvalidCpuId { cpu })?;
        let current = state.current(self.platform);
        state
            .idling
            .store(current.is_idle(), Ordering::Relaxed);
        self.platform.arm_timer(cpu, current.quantum_us());
        log::info!("[SCHED] cpu {} online, running {}", state.id, current);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn platform(&self) -> &'static dyn Platform {
        self.platform
    }

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }

    pub(crate) fn run_queue(&self) -> &IrqMutex<RunQueue> {
        &self.run_queue
    }

    fn cpu(&self, cpu: CpuId) -> &PerCpu {
        match self.cpus.get(cpu) {
            Some(state) => state,
            None => crate::sched_bug!("cpu {} is not managed by the scheduler", cpu),
        }
    }

    /// Thread running on the calling CPU.
    pub fn current_thread(&self) -> ThreadRef {
        self.cpu(self.platform.current_cpu()).current(self.platform)
    }

    pub fn current_on(&self, cpu: CpuId) -> ThreadRef {
        self.cpu(cpu).current(self.platform)
    }

    pub fn idle_thread(&self, cpu: CpuId) -> ThreadRef {
        self.cpu(cpu).idle.clone()
    }

    /// New unqueued thread with the configured quantum.
    pub fn new_thread(&self, name: &str) -> ThreadRef {
        Thread::new(name, self.config.quantum_us)
    }

    pub fn run_queue_len(&self) -> usize {
        self.run_queue.lock(self.platform).len()
    }

    pub fn is_queued(&self, thread: &ThreadRef) -> bool {
        self.run_queue.lock(self.platform).is_queued(thread)
    }

    pub fn alarm_count(&self, cpu: CpuId) -> usize {
        self.cpu(cpu).alarms.lock(self.platform).len()
    }

    // ------------------------------------------------------------------
    // Run-queue membership
    // ------------------------------------------------------------------

    /// Make `thread` runnable. `false` if it already was.
    pub fn sched_enqueue_thread(&self, thread: &ThreadRef) -> bool {
        self.wake_thread(thread)
    }

    /// Take `thread` off the run queue. `false` if it was not queued.
    pub fn sched_dequeue_thread(&self, thread: &ThreadRef) -> bool {
        self.run_queue.lock(self.platform).dequeue(thread)
    }

    pub(crate) fn wake_thread(&self, thread: &ThreadRef) -> bool {
        let queued = self.run_queue.lock(self.platform).enqueue(thread);
        if queued {
            self.kick_idle_cpu(None);
        }
        queued
    }

    /// Get an idle CPU other than `except` to look at the run queue before
    /// its next tick.
    #[cfg(feature = "smp")]
    fn kick_idle_cpu(&self, except: Option<CpuId>) {
        if let Some(cpu) = self
            .cpus
            .iter()
            .find(|c| c.is_idling() && Some(c.id) != except)
        {
            self.send_reschedule_ipi(cpu.id);
        }
    }

    #[cfg(not(feature = "smp"))]
    fn kick_idle_cpu(&self, _except: Option<CpuId>) {}

    fn send_reschedule_ipi(&self, cpu: CpuId) {
        self.metrics.record_ipi();
        self.platform.send_reschedule_ipi(cpu);
    }

    // ------------------------------------------------------------------
    // Interrupt entry points
    // ------------------------------------------------------------------

    /// Preemption timer handler.
    pub fn handle_timer_interrupt(&self) {
        let cpu = self.platform.current_cpu();
        self.platform.end_of_interrupt(cpu);
        self.sched_next();
    }

    /// Reschedule IPI handler.
    pub fn handle_reschedule_ipi(&self) {
        let cpu = self.platform.current_cpu();
        self.platform.end_of_interrupt(cpu);

        // A yield has already recorded its remainder and stopped the timer.
        let current = self.current_on(cpu);
        if !current.is_awaiting() {
            current.record_remaining_us(self.platform.timer_remaining_us(cpu));
        }
        self.sched_next();
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Pick the next thread for the calling CPU and switch to it.
    ///
    /// Returns on the outgoing side only once that thread is dispatched
    /// again.
    pub fn sched_next(&self) {
        let platform = self.platform;
        let irq = platform.disable_interrupts();
        let cpu_id = platform.current_cpu();
        let cpu = self.cpu(cpu_id);
        let current = cpu.current(platform);
        self.metrics.record_dispatch();

        if current.preempt_count() > 0 {
            self.metrics.record_preempt_deferred();
            platform.arm_timer(cpu_id, current.quantum_us());
            platform.restore_interrupts(irq);
            return;
        }

        let voluntary = current.is_awaiting() || !current.is_runnable();
        current.clear_flags(ThreadFlags::AWAITING);

        let elapsed = current.take_elapsed_us();
        let mut woken = 0;
        let fired = cpu.alarms.lock(platform).advance(elapsed, |alarm| {
            log::trace!("[ALARM] {:?} fired for {}", alarm.id(), alarm.listener());
            let listener = alarm.listener();
            // Event records of a timed-out waiter stop counting as listeners.
            listener.claim_wake(WAKE_BY_ALARM);
            if self.run_queue.lock(platform).enqueue(listener) {
                woken += 1;
            }
        });
        self.metrics.record_alarms_fired(fired);
        if woken > 0 {
            self.kick_idle_cpu(Some(cpu_id));
        }

        let next = {
            let mut rq = self.run_queue.lock(platform);
            match rq.take_next(cpu_id, &current) {
                Some(next) => next,
                None if current.is_runnable() => current.clone(),
                None => cpu.idle.clone(),
            }
        };

        if Arc::ptr_eq(&next, &current) {
            platform.arm_timer(cpu_id, current.quantum_us());
            platform.restore_interrupts(irq);
            return;
        }

        self.switch_to(cpu, current, next, voluntary);
        platform.restore_interrupts(irq);
    }

    fn switch_to(&self, cpu: &PerCpu, current: ThreadRef, next: ThreadRef, voluntary: bool) {
        let platform = self.platform;

        if !current.is_idle() {
            *cpu.prev.lock(platform) = Some(current.clone());
        }
        *cpu.current.lock(platform) = next.clone();
        cpu.idling.store(next.is_idle(), Ordering::Relaxed);
        self.metrics
            .record_context_switch(voluntary, next.is_idle());
        log::trace!("[SCHED] cpu {}: {} -> {}", cpu.id, current, next);

        platform.arm_timer(cpu.id, next.quantum_us());
        platform.context_switch(&current, &next);
        self.finish_switch();
    }

    /// Release the thread switched away from on this CPU.
    ///
    /// Runs on the incoming side of every switch. Until it runs, the
    /// outgoing thread stays bound here and no other CPU will pick it.
    pub fn finish_switch(&self) {
        let platform = self.platform;
        let irq = platform.disable_interrupts();
        let cpu = self.cpu(platform.current_cpu());
        let prev = cpu.prev.lock(platform).take();
        if let Some(prev) = prev {
            let _rq = self.run_queue.lock(platform);
            prev.unbind();
        }
        platform.restore_interrupts(irq);
    }

    // ------------------------------------------------------------------
    // Yield
    // ------------------------------------------------------------------

    /// Give up the CPU and leave the run queue.
    ///
    /// The caller only runs again once something re-enqueues it. Returns
    /// with interrupts enabled.
    pub fn sched_yield(&self) {
        let current = self.current_thread();
        self.yield_thread(&current, true);
    }

    /// Give up the CPU but stay runnable.
    pub fn yield_now(&self) {
        let current = self.current_thread();
        self.yield_thread(&current, false);
    }

    /// Yield for a thread whose queue membership the caller already settled
    /// under its own locks.
    pub(crate) fn reschedule(&self, thread: &ThreadRef) {
        self.yield_thread(thread, false);
    }

    fn yield_thread(&self, thread: &ThreadRef, dequeue: bool) {
        let platform = self.platform;
        platform.disable_interrupts();
        crate::sched_assert!(
            thread.preempt_count() == 0,
            "{} yielded with preemption disabled (count {}) on cpu {}",
            thread,
            thread.preempt_count(),
            platform.current_cpu()
        );

        thread.set_flags(ThreadFlags::AWAITING);
        if dequeue {
            self.run_queue.lock(platform).dequeue(thread);
        }

        match thread.cpu() {
            Some(target) => {
                thread.record_remaining_us(platform.timer_remaining_us(target));
                platform.stop_timer(target);
                self.send_reschedule_ipi(target);
            }
            // Not on any CPU, so no dispatcher will clear the flag.
            None => thread.clear_flags(ThreadFlags::AWAITING),
        }

        platform.enable_interrupts();
        while thread.is_awaiting() {
            platform.pause();
        }
    }

    /// Terminate the calling thread.
    pub fn exit_current(&self) -> ! {
        let platform = self.platform;
        platform.disable_interrupts();
        let current = self.current_thread();
        crate::sched_assert!(
            !current.is_idle(),
            "idle thread exited on cpu {}",
            platform.current_cpu()
        );

        {
            let mut rq = self.run_queue.lock(platform);
            current.set_flags(ThreadFlags::EXITED);
            rq.dequeue(&current);
        }
        log::debug!("[SCHED] {} exited", current);

        self.yield_thread(&current, false);
        crate::sched_bug!("exited thread {} was resumed", current)
    }

    // ------------------------------------------------------------------
    // Preemption control
    // ------------------------------------------------------------------

    /// Suppress involuntary switches of the current thread. Nests.
    pub fn preempt_disable(&self) {
        self.current_thread().preempt_disable();
    }

    pub fn preempt_enable(&self) {
        let current = self.current_thread();
        if current.preempt_enable().is_none() {
            crate::sched_bug!("unbalanced preempt_enable by {}", current);
        }
    }

    // ------------------------------------------------------------------
    // Alarms
    // ------------------------------------------------------------------

    /// Insert `alarm` into the calling CPU's list.
    ///
    /// With `wait`, the calling thread (which must be the listener) leaves
    /// the run queue and yields until the alarm wakes it.
    pub fn alarm_post(&self, alarm: &AlarmRef, wait: bool) -> KernelResult<()> {
        let platform = self.platform;
        let irq = platform.disable_interrupts();
        if let Err(err) = self.post_alarm_masked(alarm) {
            platform.restore_interrupts(irq);
            log::warn!("[ALARM] post of {:?} failed: {}", alarm.id(), err);
            return Err(err);
        }

        if wait {
            let current = self.current_thread();
            crate::sched_assert!(
                Arc::ptr_eq(alarm.listener(), &current),
                "{} waits on alarm {:?} owned by {}",
                current,
                alarm.id(),
                alarm.listener()
            );
            self.block_on_alarm(alarm, &current);
        }
        platform.restore_interrupts(irq);
        Ok(())
    }

    /// Caller has interrupts masked, so this CPU's dispatcher cannot run
    /// between the insert and whatever the caller does next.
    pub(crate) fn post_alarm_masked(&self, alarm: &AlarmRef) -> KernelResult<()> {
        if alarm.is_active() {
            self.alarm_clear(alarm);
        }
        let cpu = self.platform.current_cpu();
        self.cpu(cpu)
            .alarms
            .lock(self.platform)
            .insert(alarm, cpu)?;
        self.metrics.record_alarm_posted();
        log::debug!(
            "[ALARM] {:?} posted on cpu {}: {}us for {}",
            alarm.id(),
            cpu,
            alarm.remaining_us(),
            alarm.listener()
        );
        Ok(())
    }

    /// Dequeue `current` unless `alarm` has already fired, then yield.
    fn block_on_alarm(&self, alarm: &AlarmRef, current: &ThreadRef) {
        if self.dequeue_for_wait(current, Some(alarm)) {
            self.reschedule(current);
        }
    }

    /// Take `thread` off the run queue for a wait bounded by `alarm`.
    ///
    /// Returns `false` and leaves the thread queued if the alarm already
    /// fired. The check and the dequeue happen under the owning list's
    /// lock, which the firing path holds while it enqueues the listener, so
    /// the owner may be any CPU.
    pub(crate) fn dequeue_for_wait(&self, thread: &ThreadRef, alarm: Option<&AlarmRef>) -> bool {
        let platform = self.platform;
        let Some(alarm) = alarm else {
            self.run_queue.lock(platform).dequeue(thread);
            return true;
        };
        let Some(owner) = alarm.owner_cpu() else {
            return false;
        };
        let _alarms = self.cpu(owner).alarms.lock(platform);
        if !alarm.is_active() || alarm.owner_cpu() != Some(owner) {
            return false;
        }
        self.run_queue.lock(platform).dequeue(thread);
        true
    }

    /// Cancel `alarm`. `false` if it already fired or was cleared.
    pub fn alarm_clear(&self, alarm: &AlarmRef) -> bool {
        while let Some(owner) = alarm.owner_cpu() {
            let removed = self.cpu(owner).alarms.lock(self.platform).remove(alarm);
            if removed {
                self.metrics.record_alarm_cleared();
                log::debug!("[ALARM] {:?} cleared", alarm.id());
                return true;
            }
            if alarm.owner_cpu() == Some(owner) {
                break;
            }
        }
        false
    }

    /// Whether `alarm` is no longer pending.
    pub fn alarm_cleared(&self, alarm: &AlarmRef) -> bool {
        !alarm.is_active()
    }

    /// Block the calling thread for at least `us` microseconds of
    /// scheduler time.
    ///
    /// The alarm itself is allocated infallibly; only its list insertion
    /// reports `OutOfMemory`.
    pub fn sleep_us(&self, us: u64) -> KernelResult<()> {
        let current = self.current_thread();
        let alarm = Alarm::new(us, current.clone());
        self.alarm_post(&alarm, true)?;

        // Woken by something else first.
        while alarm.is_active() {
            let irq = self.platform.disable_interrupts();
            self.block_on_alarm(&alarm, &current);
            self.platform.restore_interrupts(irq);
        }
        Ok(())
    }
}
