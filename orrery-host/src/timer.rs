//! Script timers driven by an external clock
//!
//! The service never reads a wall clock. The host tells it what time it is
//! with [`TimerService::advance_to`] and then fires the due timers one at a
//! time, so a callback may cancel or suspend timers that are due later in
//! the same tick.

use crate::types::{CallbackId, ContextId, TimerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Saturated deadline; timers parked here are never due
const NEVER: Duration = Duration::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerKind {
    Once,
    /// Re-armed by `period` after each firing
    Repeating,
}

#[derive(Debug, Clone)]
struct Timer {
    period: Duration,
    kind: TimerKind,
    callback: CallbackId,
    context: ContextId,
    deadline: Duration,
    /// Time left when suspended
    remaining: Duration,
    suspended: bool,
}

/// A timer that fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTimer {
    pub id: TimerId,
    pub callback: CallbackId,
    pub context: ContextId,
    /// The timer is gone; release the callback after invoking it
    pub last: bool,
}

#[derive(Debug, Default)]
pub struct TimerService {
    timers: BTreeMap<TimerId, Timer>,
    now: Duration,
    released: Vec<CallbackId>,
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// Schedule `callback` for `context`.
    ///
    /// The first firing happens after `remaining` if given, otherwise after
    /// `period`. A suspended timer does not run until resumed. A repeating
    /// timer with a zero period fires once. Deadlines saturate; a timer
    /// whose deadline would overflow the clock never fires.
    pub fn schedule(
        &mut self,
        period: Duration,
        callback: CallbackId,
        context: ContextId,
        remaining: Option<Duration>,
        suspended: bool,
        kind: TimerKind,
    ) -> TimerId {
        let id = TimerId::new();
        let first = remaining.unwrap_or(period);
        let kind = if period.is_zero() { TimerKind::Once } else { kind };
        self.timers.insert(
            id,
            Timer {
                period,
                kind,
                callback,
                context,
                deadline: self.now.saturating_add(first),
                remaining: first,
                suspended,
            },
        );
        debug!(timer = %id, context = %context, ?period, ?kind, suspended, "scheduled timer");
        id
    }

    /// Cancel a timer and release its callback. False if it was not pending.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.timers.remove(&id) {
            Some(timer) => {
                self.released.push(timer.callback);
                debug!(timer = %id, "cancelled timer");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all_for_context(&mut self, context: ContextId) -> usize {
        let owned: Vec<TimerId> = self
            .timers
            .iter()
            .filter(|(_, timer)| timer.context == context)
            .map(|(id, _)| *id)
            .collect();
        owned.into_iter().filter(|id| self.cancel(*id)).count()
    }

    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        for (_, timer) in std::mem::take(&mut self.timers) {
            self.released.push(timer.callback);
        }
        count
    }

    pub fn suspend(&mut self, id: TimerId) -> bool {
        let now = self.now;
        match self.timers.get_mut(&id) {
            Some(timer) if !timer.suspended => {
                timer.remaining = timer.deadline.saturating_sub(now);
                timer.suspended = true;
                true
            }
            _ => false,
        }
    }

    pub fn resume(&mut self, id: TimerId) -> bool {
        let now = self.now;
        match self.timers.get_mut(&id) {
            Some(timer) if timer.suspended => {
                timer.deadline = now.saturating_add(timer.remaining);
                timer.suspended = false;
                true
            }
            _ => false,
        }
    }

    /// Time until the timer next fires (frozen while suspended)
    pub fn remaining(&self, id: TimerId) -> Option<Duration> {
        self.timers.get(&id).map(|timer| {
            if timer.suspended {
                timer.remaining
            } else {
                timer.deadline.saturating_sub(self.now)
            }
        })
    }

    pub fn is_suspended(&self, id: TimerId) -> Option<bool> {
        self.timers.get(&id).map(|timer| timer.suspended)
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Earliest deadline among running timers
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers
            .values()
            .filter(|timer| !timer.suspended && timer.deadline != NEVER)
            .map(|timer| timer.deadline)
            .min()
    }

    /// Move the clock forward and list the timers now due, earliest first.
    /// The clock never moves backwards.
    pub fn advance_to(&mut self, now: Duration) -> Vec<TimerId> {
        self.now = self.now.max(now);
        let mut due: Vec<(Duration, TimerId)> = self
            .timers
            .iter()
            .filter(|(_, timer)| !timer.suspended && timer.deadline != NEVER && timer.deadline <= self.now)
            .map(|(id, timer)| (timer.deadline, *id))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Fire a due timer.
    ///
    /// Returns `None` if it was cancelled, suspended or re-armed since
    /// `advance_to` listed it. Repeating timers re-arm by one period,
    /// skipping periods that were missed entirely.
    pub fn fire(&mut self, id: TimerId) -> Option<FiredTimer> {
        let now = self.now;
        let timer = self.timers.get_mut(&id)?;
        if timer.suspended || timer.deadline > now {
            return None;
        }

        let fired = FiredTimer {
            id,
            callback: timer.callback,
            context: timer.context,
            last: timer.kind == TimerKind::Once,
        };

        if fired.last {
            self.timers.remove(&id);
        } else {
            let mut next = timer.deadline.saturating_add(timer.period);
            if next <= now {
                next = now.saturating_add(timer.period);
            }
            timer.deadline = next;
        }
        Some(fired)
    }

    /// Callbacks released since the last call
    pub fn take_released(&mut self) -> Vec<CallbackId> {
        std::mem::take(&mut self.released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn fire_due(service: &mut TimerService, now: Duration) -> Vec<FiredTimer> {
        service
            .advance_to(now)
            .into_iter()
            .filter_map(|id| service.fire(id))
            .collect()
    }

    #[test]
    fn test_overflowing_deadlines_saturate() {
        let mut service = TimerService::new();
        service.advance_to(secs(1));
        let once = service.schedule(Duration::MAX, CallbackId(1), ContextId::ROOT, None, false, TimerKind::Once);
        let repeating = service.schedule(secs(2), CallbackId(2), ContextId::ROOT, Some(Duration::MAX), true, TimerKind::Repeating);

        assert!(service.resume(repeating));
        assert_eq!(service.next_deadline(), None);
        assert_eq!(service.remaining(once), Some(Duration::MAX - secs(1)));
        assert!(fire_due(&mut service, Duration::MAX).is_empty());
        assert!(service.contains(once));
        assert!(service.contains(repeating));
    }

    #[test]
    fn test_one_shot_fires_once() {
        let mut service = TimerService::new();
        let id = service.schedule(secs(2), CallbackId(1), ContextId::ROOT, None, false, TimerKind::Once);

        assert!(fire_due(&mut service, secs(1)).is_empty());
        let fired = fire_due(&mut service, secs(2));
        assert_eq!(fired.len(), 1);
        assert!(fired[0].last);
        assert!(!service.contains(id));
        assert!(fire_due(&mut service, secs(10)).is_empty());
    }

    #[test]
    fn test_repeating_rearms() {
        let mut service = TimerService::new();
        service.schedule(secs(3), CallbackId(1), ContextId::ROOT, None, false, TimerKind::Repeating);

        assert_eq!(fire_due(&mut service, secs(3)).len(), 1);
        assert_eq!(service.next_deadline(), Some(secs(6)));
        // jumping to t=20 skips the missed periods
        assert_eq!(fire_due(&mut service, secs(20)).len(), 1);
        assert_eq!(service.next_deadline(), Some(secs(23)));
    }

    #[test]
    fn test_zero_period_repeating_is_one_shot() {
        let mut service = TimerService::new();
        let id = service.schedule(Duration::ZERO, CallbackId(1), ContextId::ROOT, None, false, TimerKind::Repeating);
        let fired = fire_due(&mut service, Duration::ZERO);
        assert_eq!(fired.len(), 1);
        assert!(!service.contains(id));
    }

    #[test]
    fn test_due_order_is_by_deadline() {
        let mut service = TimerService::new();
        let late = service.schedule(secs(5), CallbackId(1), ContextId::ROOT, None, false, TimerKind::Once);
        let early = service.schedule(secs(1), CallbackId(2), ContextId::ROOT, None, false, TimerKind::Once);
        assert_eq!(service.advance_to(secs(5)), vec![early, late]);
    }

    #[test]
    fn test_cancelled_between_listing_and_firing() {
        let mut service = TimerService::new();
        let a = service.schedule(secs(1), CallbackId(1), ContextId::ROOT, None, false, TimerKind::Once);
        let b = service.schedule(secs(1), CallbackId(2), ContextId::ROOT, None, false, TimerKind::Once);

        let due = service.advance_to(secs(1));
        assert_eq!(due.len(), 2);
        assert!(service.fire(a).is_some());
        assert!(service.cancel(b));
        assert!(service.fire(b).is_none());
        assert_eq!(service.take_released(), vec![CallbackId(2)]);
    }

    #[test]
    fn test_suspend_freezes_remaining() {
        let mut service = TimerService::new();
        let id = service.schedule(secs(10), CallbackId(1), ContextId::ROOT, None, false, TimerKind::Once);

        service.advance_to(secs(4));
        assert!(service.suspend(id));
        assert!(!service.suspend(id));
        assert!(fire_due(&mut service, secs(30)).is_empty());
        assert_eq!(service.remaining(id), Some(secs(6)));

        assert!(service.resume(id));
        assert_eq!(service.next_deadline(), Some(secs(36)));
        assert_eq!(fire_due(&mut service, secs(36)).len(), 1);
    }

    #[test]
    fn test_schedule_with_remaining_and_suspended() {
        let mut service = TimerService::new();
        let id = service.schedule(secs(10), CallbackId(1), ContextId::ROOT, Some(secs(2)), true, TimerKind::Repeating);
        assert_eq!(service.is_suspended(id), Some(true));
        assert_eq!(service.next_deadline(), None);

        service.resume(id);
        assert_eq!(fire_due(&mut service, secs(2)).len(), 1);
        assert_eq!(service.next_deadline(), Some(secs(12)));
    }

    #[test]
    fn test_cancel_all_for_context() {
        let mut service = TimerService::new();
        service.schedule(secs(1), CallbackId(1), ContextId(1), None, false, TimerKind::Once);
        service.schedule(secs(1), CallbackId(2), ContextId(2), None, false, TimerKind::Once);
        service.schedule(secs(1), CallbackId(3), ContextId(1), None, false, TimerKind::Repeating);

        assert_eq!(service.cancel_all_for_context(ContextId(1)), 2);
        assert_eq!(service.len(), 1);
        let mut released = service.take_released();
        released.sort();
        assert_eq!(released, vec![CallbackId(1), CallbackId(3)]);
    }
}
