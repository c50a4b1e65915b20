//! Scheduler counters
//!
//! Relaxed atomics; read as a point-in-time [`MetricsSummary`].

use core::sync::atomic::{AtomicU64, Ordering};

/// Scheduler performance metrics
pub struct SchedulerMetrics {
    /// Dispatch passes, including those that kept the current thread
    pub dispatches: AtomicU64,
    /// Total number of context switches
    pub context_switches: AtomicU64,
    /// Switches away from a thread that yielded, blocked or exited
    pub voluntary_switches: AtomicU64,
    /// Switches away from a thread that was still runnable (preemption)
    pub involuntary_switches: AtomicU64,
    /// Number of times idle task was scheduled
    pub idle_scheduled: AtomicU64,
    /// Dispatches skipped because preemption was disabled
    pub preempt_deferred: AtomicU64,
    pub ipis_sent: AtomicU64,
    pub alarms_posted: AtomicU64,
    pub alarms_fired: AtomicU64,
    pub alarms_cleared: AtomicU64,
    pub events_triggered: AtomicU64,
    /// Triggers discarded for lack of listeners
    pub events_dropped: AtomicU64,
    pub listener_wakeups: AtomicU64,
}

impl SchedulerMetrics {
    /// Create new metrics instance
    pub const fn new() -> Self {
        Self {
            dispatches: AtomicU64::new(0),
            context_switches: AtomicU64::new(0),
            voluntary_switches: AtomicU64::new(0),
            involuntary_switches: AtomicU64::new(0),
            idle_scheduled: AtomicU64::new(0),
            preempt_deferred: AtomicU64::new(0),
            ipis_sent: AtomicU64::new(0),
            alarms_posted: AtomicU64::new(0),
            alarms_fired: AtomicU64::new(0),
            alarms_cleared: AtomicU64::new(0),
            events_triggered: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            listener_wakeups: AtomicU64::new(0),
        }
    }

    pub fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a context switch
    pub fn record_context_switch(&self, voluntary: bool, to_idle: bool) {
        self.context_switches.fetch_add(1, Ordering::Relaxed);
        if voluntary {
            self.voluntary_switches.fetch_add(1, Ordering::Relaxed);
        } else {
            self.involuntary_switches.fetch_add(1, Ordering::Relaxed);
        }
        if to_idle {
            self.idle_scheduled.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_preempt_deferred(&self) {
        self.preempt_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ipi(&self) {
        self.ipis_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alarm_posted(&self) {
        self.alarms_posted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alarms_fired(&self, count: usize) {
        if count > 0 {
            self.alarms_fired.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub fn record_alarm_cleared(&self) {
        self.alarms_cleared.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trigger(&self, woken: usize) {
        self.events_triggered.fetch_add(1, Ordering::Relaxed);
        self.listener_wakeups
            .fetch_add(woken as u64, Ordering::Relaxed);
    }

    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get summary of metrics
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            dispatches: self.dispatches.load(Ordering::Relaxed),
            context_switches: self.context_switches.load(Ordering::Relaxed),
            voluntary_switches: self.voluntary_switches.load(Ordering::Relaxed),
            involuntary_switches: self.involuntary_switches.load(Ordering::Relaxed),
            idle_scheduled: self.idle_scheduled.load(Ordering::Relaxed),
            preempt_deferred: self.preempt_deferred.load(Ordering::Relaxed),
            ipis_sent: self.ipis_sent.load(Ordering::Relaxed),
            alarms_posted: self.alarms_posted.load(Ordering::Relaxed),
            alarms_fired: self.alarms_fired.load(Ordering::Relaxed),
            alarms_cleared: self.alarms_cleared.load(Ordering::Relaxed),
            events_triggered: self.events_triggered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            listener_wakeups: self.listener_wakeups.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in [
            &self.dispatches,
            &self.context_switches,
            &self.voluntary_switches,
            &self.involuntary_switches,
            &self.idle_scheduled,
            &self.preempt_deferred,
            &self.ipis_sent,
            &self.alarms_posted,
            &self.alarms_fired,
            &self.alarms_cleared,
            &self.events_triggered,
            &self.events_dropped,
            &self.listener_wakeups,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of scheduler metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSummary {
    pub dispatches: u64,
    pub context_switches: u64,
    pub voluntary_switches: u64,
    pub involuntary_switches: u64,
    pub idle_scheduled: u64,
    pub preempt_deferred: u64,
    pub ipis_sent: u64,
    pub alarms_posted: u64,
    pub alarms_fired: u64,
    pub alarms_cleared: u64,
    pub events_triggered: u64,
    pub events_dropped: u64,
    pub listener_wakeups: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_classification() {
        let m = SchedulerMetrics::new();
        m.record_context_switch(true, false);
        m.record_context_switch(false, true);

        let s = m.summary();
        assert_eq!(s.context_switches, 2);
        assert_eq!(s.voluntary_switches, 1);
        assert_eq!(s.involuntary_switches, 1);
        assert_eq!(s.idle_scheduled, 1);
    }

    #[test]
    fn test_reset() {
        let m = SchedulerMetrics::new();
        m.record_trigger(3);
        m.record_alarms_fired(2);
        m.reset();
        assert_eq!(m.summary(), MetricsSummary::default());
    }
}
