//! Cooperative timer scheduler.
//!
//! Timers are armed with a relative delay against the monotonic clock and
//! fired from the span run loop. Firing removes the timer before its action
//! runs, so actions are free to arm or cancel other timers.

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::error::{Error, Result};

pub const MAX_TIMERS: usize = 32;

/// What to do when a timer fires. The span run loop matches on this instead
/// of the callback pointers the protocol engines traditionally carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerKind {
    /// CLIP did not arrive after CRING; resync with `AT+CLCC`.
    ClipTimeout { call_id: u8 },
    /// Periodic `AT+CLCC` poll while an outbound call progresses.
    ProgressMonitor { call_id: u8 },
    /// The in-flight command went unanswered.
    CommandTimeout,
    /// Periodic `AT+CSQ` signal quality refresh.
    SignalPoll,
    /// Buffered tokens waiting on a continuation never got one; flush them.
    StalePending,
}

/// Bulk-cancellation token tying a timer to the record that armed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerOwner {
    Span,
    Call(u8),
    Sms(u16),
}

#[derive(Debug, Clone)]
pub struct Timer {
    pub id: u64,
    pub name: &'static str,
    pub deadline: Instant,
    pub kind: TimerKind,
    pub owner: TimerOwner,
}

pub struct Scheduler {
    timers: Vec<Timer, MAX_TIMERS>,
    next_id: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            timers: Vec::new(),
            next_id: 1,
        }
    }

    /// Arm a timer `delay` from now. The returned id stays valid until the
    /// timer fires or is cancelled; id 0 is never handed out.
    pub fn arm(
        &mut self,
        name: &'static str,
        delay: Duration,
        kind: TimerKind,
        owner: TimerOwner,
    ) -> Result<u64> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1;
        }

        self.timers
            .push(Timer {
                id,
                name,
                deadline: Instant::now() + delay,
                kind,
                owner,
            })
            .map_err(|_| Error::OutOfMemory)?;
        Ok(id)
    }

    pub fn cancel(&mut self, id: u64) -> Result<()> {
        if id == 0 {
            return Ok(());
        }
        match self.timers.iter().position(|t| t.id == id) {
            Some(pos) => {
                self.timers.remove(pos);
                Ok(())
            }
            None => Err(Error::Fail),
        }
    }

    /// Cancel every timer armed by `owner`. Used when a call or SMS record
    /// is destroyed with polls still pending.
    pub fn cancel_by_owner(&mut self, owner: TimerOwner) {
        self.timers.retain(|t| t.owner != owner);
    }

    /// Remove and return the next expired timer, earliest-armed first.
    /// Returns `None` once nothing is due, so firing loops naturally rescan
    /// after every action.
    pub fn pop_due(&mut self) -> Option<Timer> {
        let now = Instant::now();
        let pos = self.timers.iter().position(|t| t.deadline <= now)?;
        Some(self.timers.remove(pos))
    }

    /// Milliseconds until the earliest deadline: `None` when idle, zero when
    /// something is already due.
    pub fn time_to_next(&self) -> Option<u64> {
        let winner = self.timers.iter().map(|t| t.deadline).min()?;
        let now = Instant::now();
        if winner <= now {
            Some(0)
        } else {
            Some((winner - now).as_millis())
        }
    }

    pub fn is_idle(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_time::MockDriver;

    #[test]
    fn fires_in_insertion_order_and_ids_are_stable() {
        let _time = crate::test_helpers::time_guard();
        let mut sched = Scheduler::new();
        let a = sched
            .arm("a", Duration::from_millis(5), TimerKind::SignalPoll, TimerOwner::Span)
            .unwrap();
        let b = sched
            .arm(
                "b",
                Duration::from_millis(5),
                TimerKind::ClipTimeout { call_id: 1 },
                TimerOwner::Call(1),
            )
            .unwrap();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_ne!(a, b);

        assert!(sched.pop_due().is_none());

        MockDriver::get().advance(Duration::from_millis(6));
        assert_eq!(sched.pop_due().unwrap().id, a);
        assert_eq!(sched.pop_due().unwrap().id, b);
        assert!(sched.pop_due().is_none());
        assert!(sched.is_idle());
    }

    #[test]
    fn cancel_removes_one_timer() {
        let mut sched = Scheduler::new();
        let a = sched
            .arm("a", Duration::from_secs(3600), TimerKind::SignalPoll, TimerOwner::Span)
            .unwrap();
        assert!(sched.cancel(a).is_ok());
        assert!(sched.cancel(a).is_err());
        assert!(sched.is_idle());
        // Id zero is reserved and cancelling it is a no-op.
        assert!(sched.cancel(0).is_ok());
    }

    #[test]
    fn cancel_by_owner_is_bulk() {
        let mut sched = Scheduler::new();
        sched
            .arm(
                "clip",
                Duration::from_secs(3600),
                TimerKind::ClipTimeout { call_id: 2 },
                TimerOwner::Call(2),
            )
            .unwrap();
        sched
            .arm(
                "progress",
                Duration::from_secs(3600),
                TimerKind::ProgressMonitor { call_id: 2 },
                TimerOwner::Call(2),
            )
            .unwrap();
        let keep = sched
            .arm("poll", Duration::from_secs(3600), TimerKind::SignalPoll, TimerOwner::Span)
            .unwrap();

        sched.cancel_by_owner(TimerOwner::Call(2));
        assert_eq!(sched.timers.len(), 1);
        assert_eq!(sched.timers[0].id, keep);
    }

    #[test]
    fn time_to_next_reports_idle_due_and_pending() {
        let _time = crate::test_helpers::time_guard();
        let mut sched = Scheduler::new();
        assert_eq!(sched.time_to_next(), None);

        sched
            .arm("a", Duration::from_secs(3600), TimerKind::SignalPoll, TimerOwner::Span)
            .unwrap();
        let ms = sched.time_to_next().unwrap();
        assert!(ms > 0 && ms <= 3_600_000);

        MockDriver::get().advance(Duration::from_secs(3601));
        assert_eq!(sched.time_to_next(), Some(0));
    }
}
