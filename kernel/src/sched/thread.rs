//! Thread control block as seen by the scheduler
//!
//! Threads are created and destroyed by process management. The scheduling
//! core only touches the fields below: CPU binding, scheduling metadata,
//! the preemption-disable count and the wake attribution index.

use alloc::{format, string::String, sync::Arc};
use core::{
    fmt,
    sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering},
};

use bitflags::bitflags;

use crate::arch::CpuId;

bitflags! {
    /// Scheduling state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadFlags: u32 {
        /// Member of the run queue. Only changed under the run-queue lock.
        const RUNNABLE = 1 << 0;
        /// Yield in progress; cleared by the dispatcher that takes it.
        const AWAITING = 1 << 1;
        /// Per-CPU fallback thread, never queued and never blocked.
        const IDLE = 1 << 2;
        const EXITED = 1 << 3;
    }
}

/// Thread ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

const NO_CPU: usize = usize::MAX;
const NO_WAKE: usize = usize::MAX;

/// Wake index claimed by a firing alarm. Matches no event position.
pub(crate) const WAKE_BY_ALARM: usize = usize::MAX - 1;

/// Per-thread scheduling metadata.
///
/// The flag word uses relaxed ordering. It is a liveness hint for polling;
/// queue membership under the run-queue lock is authoritative.
struct SchedInfo {
    quantum_us: AtomicU64,
    /// Timer remainder captured by the last voluntary yield.
    remaining_us: AtomicU64,
    flags: AtomicU32,
}

pub struct Thread {
    id: ThreadId,
    name: String,
    /// CPU the thread is bound to, `NO_CPU` when unbound.
    cpu: AtomicUsize,
    sched: SchedInfo,
    preempt_count: AtomicU32,
    /// Caller-side index of the event that last woke this thread.
    wake_index: AtomicUsize,
    /// Stack pointer slot used by the context-switch code.
    saved_sp: AtomicUsize,
}

/// Queues and CPUs hold threads through shared references; ownership stays
/// with process management.
pub type ThreadRef = Arc<Thread>;

impl Thread {
    pub fn new(name: &str, quantum_us: u64) -> ThreadRef {
        Arc::new(Self::with_flags(
            String::from(name),
            quantum_us,
            ThreadFlags::empty(),
            NO_CPU,
        ))
    }

    /// Idle thread for `cpu`. Bound to it for life.
    pub fn new_idle(cpu: CpuId, quantum_us: u64) -> ThreadRef {
        Arc::new(Self::with_flags(
            format!("idle/{}", cpu),
            quantum_us,
            ThreadFlags::IDLE,
            cpu,
        ))
    }

    fn with_flags(name: String, quantum_us: u64, flags: ThreadFlags, cpu: usize) -> Self {
        Self {
            id: ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)),
            name,
            cpu: AtomicUsize::new(cpu),
            sched: SchedInfo {
                quantum_us: AtomicU64::new(quantum_us),
                remaining_us: AtomicU64::new(0),
                flags: AtomicU32::new(flags.bits()),
            },
            preempt_count: AtomicU32::new(0),
            wake_index: AtomicUsize::new(NO_WAKE),
            saved_sp: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// CPU this thread is bound to.
    pub fn cpu(&self) -> Option<CpuId> {
        match self.cpu.load(Ordering::Acquire) {
            NO_CPU => None,
            cpu => Some(cpu),
        }
    }

    /// Caller holds the run-queue lock.
    pub(crate) fn bind(&self, cpu: CpuId) {
        self.cpu.store(cpu, Ordering::Release);
    }

    /// Caller holds the run-queue lock. Idle threads stay bound.
    pub(crate) fn unbind(&self) {
        if !self.is_idle() {
            self.cpu.store(NO_CPU, Ordering::Release);
        }
    }

    // ------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------

    pub fn flags(&self) -> ThreadFlags {
        ThreadFlags::from_bits_truncate(self.sched.flags.load(Ordering::Relaxed))
    }

    pub(crate) fn set_flags(&self, flags: ThreadFlags) {
        self.sched.flags.fetch_or(flags.bits(), Ordering::Relaxed);
    }

    pub(crate) fn clear_flags(&self, flags: ThreadFlags) {
        self.sched.flags.fetch_and(!flags.bits(), Ordering::Relaxed);
    }

    pub fn is_runnable(&self) -> bool {
        self.flags().contains(ThreadFlags::RUNNABLE)
    }

    pub fn is_awaiting(&self) -> bool {
        self.flags().contains(ThreadFlags::AWAITING)
    }

    pub fn is_idle(&self) -> bool {
        self.flags().contains(ThreadFlags::IDLE)
    }

    pub fn has_exited(&self) -> bool {
        self.flags().contains(ThreadFlags::EXITED)
    }

    // ------------------------------------------------------------------
    // Timeslice accounting
    // ------------------------------------------------------------------

    pub fn quantum_us(&self) -> u64 {
        self.sched.quantum_us.load(Ordering::Relaxed)
    }

    /// Takes effect the next time the thread is dispatched.
    pub fn set_quantum_us(&self, quantum_us: u64) {
        self.sched.quantum_us.store(quantum_us, Ordering::Relaxed);
    }

    pub fn remaining_us(&self) -> u64 {
        self.sched.remaining_us.load(Ordering::Relaxed)
    }

    pub(crate) fn record_remaining_us(&self, remaining_us: u64) {
        self.sched
            .remaining_us
            .store(remaining_us, Ordering::Relaxed);
    }

    /// Portion of the quantum consumed since the last dispatch. Resets the
    /// recorded remainder, so an expired timeslice counts in full.
    pub(crate) fn take_elapsed_us(&self) -> u64 {
        let remaining = self.sched.remaining_us.swap(0, Ordering::Relaxed);
        self.quantum_us().saturating_sub(remaining)
    }

    // ------------------------------------------------------------------
    // Preemption control
    // ------------------------------------------------------------------

    pub fn preempt_count(&self) -> u32 {
        self.preempt_count.load(Ordering::Relaxed)
    }

    pub(crate) fn preempt_disable(&self) -> u32 {
        self.preempt_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// `None` if the count was already zero.
    pub(crate) fn preempt_enable(&self) -> Option<u32> {
        self.preempt_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .ok()
            .map(|prev| prev - 1)
    }

    // ------------------------------------------------------------------
    // Wake attribution
    // ------------------------------------------------------------------

    pub fn wake_index(&self) -> Option<usize> {
        match self.wake_index.load(Ordering::Acquire) {
            NO_WAKE => None,
            index => Some(index),
        }
    }

    /// Record `index` as the waking event. The first claim wins.
    pub(crate) fn claim_wake(&self, index: usize) -> bool {
        self.wake_index
            .compare_exchange(NO_WAKE, index, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn reset_wake(&self) -> Option<usize> {
        match self.wake_index.swap(NO_WAKE, Ordering::AcqRel) {
            NO_WAKE => None,
            index => Some(index),
        }
    }

    // ------------------------------------------------------------------
    // Context-switch support
    // ------------------------------------------------------------------

    pub fn saved_sp(&self) -> usize {
        self.saved_sp.load(Ordering::Acquire)
    }

    /// Initial stack pointer, set by thread setup before the first enqueue.
    pub fn set_saved_sp(&self, sp: usize) {
        self.saved_sp.store(sp, Ordering::Release);
    }

    pub fn saved_sp_slot(&self) -> *mut usize {
        self.saved_sp.as_ptr()
    }
}

impl fmt::Display for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("cpu", &self.cpu())
            .field("flags", &self.flags())
            .field("preempt_count", &self.preempt_count())
            .finish()
    }
}
