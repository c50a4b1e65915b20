//! Single-threaded [`Platform`] for unit tests
//!
//! Context switches return immediately and are recorded, so the code after
//! a switch plays the part of the incoming thread. IPIs are recorded and,
//! once enabled with [`MockPlatform::deliver_ipis`], handled inline when
//! interrupts are re-enabled on the target CPU.

use std::{
    cell::Cell,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    vec::Vec,
};

use spin::{Mutex, Once};

use super::{CpuId, Platform};
use crate::sched::{Scheduler, Thread, ThreadId};

std::thread_local! {
    static IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
}

pub(crate) struct MockPlatform {
    cpus: usize,
    cpu: AtomicUsize,
    timers: Mutex<Vec<Option<u64>>>,
    ipis: Mutex<Vec<CpuId>>,
    switches: Mutex<Vec<(ThreadId, ThreadId)>>,
    deliver: AtomicBool,
    scheduler: Once<&'static Scheduler>,
}

impl MockPlatform {
    pub(crate) fn new(cpus: usize) -> &'static Self {
        Box::leak(Box::new(Self {
            cpus,
            cpu: AtomicUsize::new(0),
            timers: Mutex::new(vec![None; cpus]),
            ipis: Mutex::new(Vec::new()),
            switches: Mutex::new(Vec::new()),
            deliver: AtomicBool::new(false),
            scheduler: Once::new(),
        }))
    }

    /// Give the scheduler a static lifetime and route IPIs to it.
    pub(crate) fn attach(&self, scheduler: Scheduler) -> &'static Scheduler {
        let scheduler: &'static Scheduler = Box::leak(Box::new(scheduler));
        self.scheduler.call_once(|| scheduler);
        scheduler
    }

    pub(crate) fn set_cpu(&self, cpu: CpuId) {
        self.cpu.store(cpu, Ordering::Relaxed);
    }

    pub(crate) fn deliver_ipis(&self, enabled: bool) {
        self.deliver.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn take_ipis(&self) -> Vec<CpuId> {
        core::mem::take(&mut *self.ipis.lock())
    }

    pub(crate) fn armed(&self, cpu: CpuId) -> Option<u64> {
        self.timers.lock()[cpu]
    }

    pub(crate) fn set_timer_remaining(&self, cpu: CpuId, us: u64) {
        self.timers.lock()[cpu] = Some(us);
    }

    pub(crate) fn switch_count(&self) -> usize {
        self.switches.lock().len()
    }

    fn deliver_pending(&self) {
        if !self.deliver.load(Ordering::Relaxed) {
            return;
        }
        let Some(scheduler) = self.scheduler.get() else {
            return;
        };
        let cpu = self.current_cpu();
        loop {
            let pending = {
                let mut ipis = self.ipis.lock();
                match ipis.iter().position(|&target| target == cpu) {
                    Some(pos) => {
                        ipis.remove(pos);
                        true
                    }
                    None => false,
                }
            };
            if !pending {
                break;
            }
            IRQ_ENABLED.with(|f| f.set(false));
            scheduler.handle_reschedule_ipi();
            IRQ_ENABLED.with(|f| f.set(true));
        }
    }
}

impl Platform for MockPlatform {
    fn cpu_count(&self) -> usize {
        self.cpus
    }

    fn current_cpu(&self) -> CpuId {
        self.cpu.load(Ordering::Relaxed)
    }

    fn disable_interrupts(&self) -> bool {
        IRQ_ENABLED.with(|f| f.replace(false))
    }

    fn restore_interrupts(&self, was_enabled: bool) {
        if was_enabled {
            IRQ_ENABLED.with(|f| f.set(true));
            self.deliver_pending();
        }
    }

    fn interrupts_enabled(&self) -> bool {
        IRQ_ENABLED.with(|f| f.get())
    }

    fn send_reschedule_ipi(&self, cpu: CpuId) {
        self.ipis.lock().push(cpu);
    }

    fn arm_timer(&self, cpu: CpuId, quantum_us: u64) {
        self.timers.lock()[cpu] = Some(quantum_us);
    }

    fn stop_timer(&self, cpu: CpuId) {
        self.timers.lock()[cpu] = None;
    }

    fn timer_remaining_us(&self, cpu: CpuId) -> u64 {
        self.timers.lock()[cpu].unwrap_or(0)
    }

    fn end_of_interrupt(&self, _cpu: CpuId) {}

    fn context_switch(&self, from: &Thread, to: &Thread) {
        self.switches.lock().push((from.id(), to.id()));
    }
}
