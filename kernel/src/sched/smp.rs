//! Per-CPU scheduling state

use core::sync::atomic::{AtomicBool, Ordering};

use super::thread::{Thread, ThreadRef};
use crate::{
    arch::{CpuId, Platform},
    sync::IrqMutex,
    timer::AlarmList,
};

pub(crate) struct PerCpu {
    pub(crate) id: CpuId,
    /// Fallback thread, bound to this CPU for life.
    pub(crate) idle: ThreadRef,
    /// Thread executing on this CPU. Only this CPU's dispatcher writes it.
    pub(crate) current: IrqMutex<ThreadRef>,
    /// Outgoing thread of the last switch, unbound by the incoming side.
    pub(crate) prev: IrqMutex<Option<ThreadRef>>,
    pub(crate) alarms: IrqMutex<AlarmList>,
    /// Idle thread is current; wakers kick this CPU.
    pub(crate) idling: AtomicBool,
}

impl PerCpu {
    pub(crate) fn new(id: CpuId, idle_quantum_us: u64) -> Self {
        let idle = Thread::new_idle(id, idle_quantum_us);
        Self {
            id,
            current: IrqMutex::new(idle.clone()),
            idle,
            prev: IrqMutex::new(None),
            alarms: IrqMutex::new(AlarmList::new()),
            idling: AtomicBool::new(true),
        }
    }

    pub(crate) fn current(&self, platform: &dyn Platform) -> ThreadRef {
        self.current.lock(platform).clone()
    }

    pub(crate) fn is_idling(&self) -> bool {
        self.idling.load(Ordering::Relaxed)
    }
}
