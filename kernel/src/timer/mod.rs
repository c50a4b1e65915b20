//! Alarms and per-CPU timeout lists
//!
//! An [`Alarm`] is one timeout request tied to a listener thread. Each CPU
//! owns an [`AlarmList`] sorted ascending by remaining time. Only the owning
//! CPU's dispatcher advances it. Posting goes to the caller's list and
//! clearing goes to the owner recorded in the alarm, both under the list's
//! lock, so a clear and a firing check never interleave.
//!
//! # Usage
//!
//! ```ignore
//! // Sleep the calling thread for 1ms.
//! let alarm = Alarm::new(1_000, sched.current_thread());
//! sched.alarm_post(&alarm, true)?;
//!
//! // Bounded wait: post without blocking, clear once the work completes.
//! let alarm = Alarm::new(timeout_us, sched.current_thread());
//! sched.alarm_post(&alarm, false)?;
//! ...
//! sched.alarm_clear(&alarm);
//! ```

use alloc::{collections::VecDeque, sync::Arc};
use core::{
    mem,
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use crate::{
    arch::CpuId,
    error::{KernelError, KernelResult},
    sched::ThreadRef,
};

/// Alarm ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlarmId(pub u64);

/// Monotonically increasing counter for assigning unique alarm IDs.
static NEXT_ALARM_ID: AtomicU64 = AtomicU64::new(1);

const NO_CPU: usize = usize::MAX;

pub struct Alarm {
    id: AlarmId,
    remaining_us: AtomicU64,
    active: AtomicBool,
    /// CPU whose list holds the alarm while active.
    owner: AtomicUsize,
    listener: ThreadRef,
}

pub type AlarmRef = Arc<Alarm>;

impl Alarm {
    pub fn new(duration_us: u64, listener: ThreadRef) -> AlarmRef {
        Arc::new(Self {
            id: AlarmId(NEXT_ALARM_ID.fetch_add(1, Ordering::Relaxed)),
            remaining_us: AtomicU64::new(duration_us),
            active: AtomicBool::new(false),
            owner: AtomicUsize::new(NO_CPU),
            listener,
        })
    }

    pub fn id(&self) -> AlarmId {
        self.id
    }

    pub fn listener(&self) -> &ThreadRef {
        &self.listener
    }

    pub fn remaining_us(&self) -> u64 {
        self.remaining_us.load(Ordering::Relaxed)
    }

    /// Lock-free read for polling. Eventually consistent with the list.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn owner_cpu(&self) -> Option<CpuId> {
        match self.owner.load(Ordering::Acquire) {
            NO_CPU => None,
            cpu => Some(cpu),
        }
    }

    /// Reload the duration of an inactive alarm so it can be posted again.
    pub fn rearm(&self, duration_us: u64) -> bool {
        if self.is_active() {
            return false;
        }
        self.remaining_us.store(duration_us, Ordering::Relaxed);
        true
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.owner.store(NO_CPU, Ordering::Release);
    }
}

/// Pending alarms of one CPU, ascending by remaining time.
pub struct AlarmList {
    alarms: VecDeque<AlarmRef>,
}

impl AlarmList {
    pub const fn new() -> Self {
        Self {
            alarms: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    /// Next deadline.
    pub fn head(&self) -> Option<&AlarmRef> {
        self.alarms.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlarmRef> {
        self.alarms.iter()
    }

    /// Insert in sorted position and mark active. Alarms with equal
    /// remaining time keep posting order.
    pub fn insert(&mut self, alarm: &AlarmRef, cpu: CpuId) -> KernelResult<()> {
        self.remove(alarm);
        self.alarms
            .try_reserve(1)
            .map_err(|_| KernelError::OutOfMemory {
                requested: mem::size_of::<AlarmRef>(),
                available: 0,
            })?;

        let remaining = alarm.remaining_us();
        let pos = self
            .alarms
            .iter()
            .position(|a| a.remaining_us() > remaining)
            .unwrap_or(self.alarms.len());
        self.alarms.insert(pos, alarm.clone());
        alarm.owner.store(cpu, Ordering::Release);
        alarm.active.store(true, Ordering::Release);
        Ok(())
    }

    /// Remove and mark inactive. `false` if the alarm was not listed.
    pub fn remove(&mut self, alarm: &AlarmRef) -> bool {
        match self.alarms.iter().position(|a| Arc::ptr_eq(a, alarm)) {
            Some(pos) => {
                self.alarms.remove(pos);
                alarm.deactivate();
                true
            }
            None => false,
        }
    }

    /// Charge `elapsed_us` to every alarm.
    ///
    /// Alarms at or below `elapsed_us` are deactivated, removed and handed
    /// to `on_fire`. Their deficit is dropped. Returns the number fired.
    pub fn advance(&mut self, elapsed_us: u64, mut on_fire: impl FnMut(&AlarmRef)) -> usize {
        let mut fired = 0;
        self.alarms.retain(|alarm| {
            let remaining = alarm.remaining_us();
            if remaining > elapsed_us {
                alarm
                    .remaining_us
                    .store(remaining - elapsed_us, Ordering::Relaxed);
                true
            } else {
                alarm.remaining_us.store(0, Ordering::Relaxed);
                alarm.deactivate();
                on_fire(alarm);
                fired += 1;
                false
            }
        });
        fired
    }
}

impl Default for AlarmList {
    fn default() -> Self {
        Self::new()
    }
}
