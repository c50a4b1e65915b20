//! Host simulation of a multi-CPU machine
//!
//! Every scheduler thread, idle threads included, is backed by an OS thread
//! that only executes while it holds its baton. A context switch hands the
//! CPU's baton to the incoming thread and parks the outgoing one until some
//! CPU hands it a baton again. Interrupt state is per OS thread.
//!
//! Time is virtual. Idle threads tick their CPU's timer, and each expiry
//! advances that CPU's clock by the quantum that was armed. Other threads
//! only take timer interrupts at explicit [`SimPlatform::preempt_point`]s.

#![allow(dead_code)]

use std::{
    cell::Cell,
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Condvar, Mutex, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use veridian_sched::{
    arch::{CpuId, Platform},
    SchedConfig, Scheduler, Thread, ThreadId, ThreadRef,
};

/// Upper bound for anything a test waits on.
pub const TIMEOUT: Duration = Duration::from_secs(20);

thread_local! {
    static CPU: Cell<Option<CpuId>> = const { Cell::new(None) };
    static IRQ_ENABLED: Cell<bool> = const { Cell::new(false) };
}

/// Permission to run on a CPU.
#[derive(Default)]
struct Baton {
    cpu: Mutex<Option<CpuId>>,
    ready: Condvar,
}

impl Baton {
    fn give(&self, cpu: CpuId) {
        let mut slot = self.cpu.lock().unwrap();
        assert!(slot.is_none(), "thread dispatched twice");
        *slot = Some(cpu);
        self.ready.notify_one();
    }

    fn take(&self) -> CpuId {
        let mut slot = self.cpu.lock().unwrap();
        loop {
            if let Some(cpu) = slot.take() {
                return cpu;
            }
            slot = self.ready.wait(slot).unwrap();
        }
    }
}

#[derive(Default)]
struct SimCpu {
    ipi_pending: AtomicBool,
    timer: Mutex<Option<u64>>,
    clock_us: AtomicU64,
}

pub struct SimPlatform {
    cpus: Vec<SimCpu>,
    batons: Mutex<HashMap<ThreadId, Arc<Baton>>>,
    scheduler: OnceLock<&'static Scheduler>,
    shutdown: AtomicBool,
}

/// Leak a simulated machine with `cpus` CPUs.
pub fn machine(cpus: usize) -> &'static SimPlatform {
    Box::leak(Box::new(SimPlatform {
        cpus: (0..cpus).map(|_| SimCpu::default()).collect(),
        batons: Mutex::new(HashMap::new()),
        scheduler: OnceLock::new(),
        shutdown: AtomicBool::new(false),
    }))
}

/// Machine plus a private scheduler, with every CPU running its idle thread.
pub fn boot(cpus: usize, config: SchedConfig) -> &'static SimPlatform {
    let sim = machine(cpus);
    let scheduler = Scheduler::new(sim, config).expect("scheduler construction");
    sim.power_on(Box::leak(Box::new(scheduler)));
    sim
}

/// Small quanta so virtual time moves quickly.
pub fn config(quantum_us: u64) -> SchedConfig {
    SchedConfig {
        quantum_us,
        idle_quantum_us: quantum_us,
    }
}

/// Poll `cond` until it holds or [`TIMEOUT`] passes.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

impl SimPlatform {
    pub fn scheduler(&self) -> &'static Scheduler {
        self.scheduler.get().expect("machine not powered on")
    }

    /// Attach `scheduler` and start one idle thread per CPU.
    pub fn power_on(&'static self, scheduler: &'static Scheduler) {
        self.scheduler
            .set(scheduler)
            .unwrap_or_else(|_| panic!("machine powered on twice"));
        for cpu in 0..self.cpus.len() {
            self.start_idle(cpu);
        }
    }

    /// Run `f` on the calling OS thread as if it executed on `cpu` with
    /// interrupts masked.
    pub fn on_cpu<R>(&self, cpu: CpuId, f: impl FnOnce() -> R) -> R {
        let saved = CPU.with(|c| c.replace(Some(cpu)));
        let result = f();
        CPU.with(|c| c.set(saved));
        result
    }

    /// Stop the idle loops.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Virtual microseconds that have passed on `cpu`.
    pub fn clock_us(&self, cpu: CpuId) -> u64 {
        self.cpus[cpu].clock_us.load(Ordering::SeqCst)
    }

    /// CPU the calling scheduler thread is running on.
    pub fn this_cpu(&self) -> CpuId {
        CPU.with(|c| c.get()).expect("not running on a simulated cpu")
    }

    /// Create a thread running `body` and make it runnable. The thread exits
    /// when `body` returns.
    pub fn spawn<F>(&'static self, name: &str, body: F) -> ThreadRef
    where
        F: FnOnce(&'static Scheduler) + Send + 'static,
    {
        let scheduler = self.scheduler();
        let thread = scheduler.new_thread(name);
        let baton = self.register(&thread);

        thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let cpu = baton.take();
                CPU.with(|c| c.set(Some(cpu)));
                // First dispatch returns through the interrupt that switched
                // to us.
                scheduler.finish_switch();
                IRQ_ENABLED.with(|f| f.set(true));
                self.deliver();

                body(scheduler);
                scheduler.exit_current();
            })
            .expect("spawn os thread");

        scheduler.sched_enqueue_thread(&thread);
        thread
    }

    /// Take the timer interrupt if the calling CPU's timer has expired.
    /// Every armed timer expires at the first preemption point.
    pub fn preempt_point(&self) {
        let Some(cpu) = CPU.with(|c| c.get()) else {
            return;
        };
        if !IRQ_ENABLED.with(|f| f.get()) {
            return;
        }
        let expired = self.cpus[cpu].timer.lock().unwrap().take();
        if let Some(quantum) = expired {
            self.cpus[cpu].clock_us.fetch_add(quantum, Ordering::SeqCst);
            self.interrupt(|s| s.handle_timer_interrupt());
        }
        self.deliver();
    }

    fn register(&self, thread: &Thread) -> Arc<Baton> {
        let baton = Arc::new(Baton::default());
        self.batons.lock().unwrap().insert(thread.id(), baton.clone());
        baton
    }

    fn baton(&self, thread: &Thread) -> Arc<Baton> {
        self.batons
            .lock()
            .unwrap()
            .get(&thread.id())
            .cloned()
            .unwrap_or_else(|| panic!("{} has no backing os thread", thread))
    }

    fn start_idle(&'static self, cpu: CpuId) {
        let scheduler = self.scheduler();
        let idle = scheduler.idle_thread(cpu);
        let baton = self.register(&idle);
        let thread_baton = baton.clone();

        thread::Builder::new()
            .name(format!("idle/{cpu}"))
            .spawn(move || {
                let cpu = thread_baton.take();
                CPU.with(|c| c.set(Some(cpu)));
                scheduler.start_cpu(cpu).expect("start cpu");
                IRQ_ENABLED.with(|f| f.set(true));
                while !self.shutdown.load(Ordering::Relaxed) {
                    self.preempt_point();
                    thread::sleep(Duration::from_micros(20));
                }
            })
            .expect("spawn idle os thread");

        baton.give(cpu);
    }

    /// Run a handler with interrupts masked, as the hardware would.
    fn interrupt(&self, handler: impl FnOnce(&Scheduler)) {
        IRQ_ENABLED.with(|f| f.set(false));
        handler(self.scheduler());
        IRQ_ENABLED.with(|f| f.set(true));
    }

    /// Handle reschedule IPIs pending for the calling CPU. The handler may
    /// switch us away, so the CPU is looked up again each round.
    fn deliver(&self) {
        loop {
            let Some(cpu) = CPU.with(|c| c.get()) else {
                return;
            };
            if !IRQ_ENABLED.with(|f| f.get()) {
                return;
            }
            if !self.cpus[cpu].ipi_pending.swap(false, Ordering::SeqCst) {
                return;
            }
            self.interrupt(|s| s.handle_reschedule_ipi());
        }
    }
}

impl Platform for SimPlatform {
    fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    fn current_cpu(&self) -> CpuId {
        self.this_cpu()
    }

    fn disable_interrupts(&self) -> bool {
        IRQ_ENABLED.with(|f| f.replace(false))
    }

    fn restore_interrupts(&self, was_enabled: bool) {
        if was_enabled {
            IRQ_ENABLED.with(|f| f.set(true));
            self.deliver();
        }
    }

    fn interrupts_enabled(&self) -> bool {
        IRQ_ENABLED.with(|f| f.get())
    }

    fn send_reschedule_ipi(&self, cpu: CpuId) {
        self.cpus[cpu].ipi_pending.store(true, Ordering::SeqCst);
    }

    fn arm_timer(&self, cpu: CpuId, quantum_us: u64) {
        *self.cpus[cpu].timer.lock().unwrap() = Some(quantum_us);
    }

    fn stop_timer(&self, cpu: CpuId) {
        *self.cpus[cpu].timer.lock().unwrap() = None;
    }

    /// Virtual timers only move at expiry, so a running timer reports its
    /// whole quantum.
    fn timer_remaining_us(&self, cpu: CpuId) -> u64 {
        self.cpus[cpu].timer.lock().unwrap().unwrap_or(0)
    }

    fn end_of_interrupt(&self, _cpu: CpuId) {}

    fn context_switch(&self, from: &Thread, to: &Thread) {
        let cpu = self.this_cpu();
        let own = self.baton(from);
        self.baton(to).give(cpu);

        if from.has_exited() {
            CPU.with(|c| c.set(None));
            loop {
                thread::park();
            }
        }

        let cpu = own.take();
        CPU.with(|c| c.set(Some(cpu)));
    }

    fn pause(&self) {
        self.deliver();
        thread::yield_now();
    }
}
