//! Debounced render scheduling.
//!
//! Render requests coalesce: while one is pending, further requests are
//! absorbed, and the render runs when the timer fires with whatever data the
//! component holds at that moment.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(10);

/// One-shot timer primitive supplied by the host.
pub trait Timer {
    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>);
}

pub struct Scheduler {
    interval: Duration,
    pending: Rc<Cell<bool>>,
    timer: Rc<dyn Timer>,
}

impl Scheduler {
    pub fn new(timer: Rc<dyn Timer>, interval: Duration) -> Self {
        Self {
            interval,
            pending: Rc::new(Cell::new(false)),
            timer,
        }
    }

    /// Arms the timer unless a render is already pending. Returns whether a
    /// new timer was armed. The pending flag clears just before `render` runs.
    pub fn request(&self, render: impl FnOnce() + 'static) -> bool {
        if self.pending.replace(true) {
            return false;
        }
        let pending = self.pending.clone();
        self.timer.set_timeout(
            self.interval,
            Box::new(move || {
                pending.set(false);
                render();
            }),
        );
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("interval", &self.interval)
            .field("pending", &self.pending.get())
            .finish()
    }
}

struct TimerEntry {
    fire_at_ms: u64,
    /// Registration order; breaks ties between equal deadlines.
    sequence: u64,
    callback: Box<dyn FnOnce()>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at_ms == other.fire_at_ms && self.sequence == other.sequence
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: earliest deadline first, then first registered.
        other
            .fire_at_ms
            .cmp(&self.fire_at_ms)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Default)]
struct ClockState {
    current_time_ms: u64,
    next_sequence: u64,
    pending_timers: BinaryHeap<TimerEntry>,
}

/// Virtual time for deterministic tests and offline rendering.
///
/// Time only moves when asked to. Callbacks run with no internal borrow held,
/// so they may register further timers.
#[derive(Clone, Default)]
pub struct VirtualClock {
    state: Rc<RefCell<ClockState>>,
}

impl VirtualClock {
    const IDLE_LIMIT: usize = 10_000;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.state.borrow().current_time_ms
    }

    pub fn has_pending_timers(&self) -> bool {
        !self.state.borrow().pending_timers.is_empty()
    }

    pub fn pending_timer_count(&self) -> usize {
        self.state.borrow().pending_timers.len()
    }

    pub fn time_to_next_timer(&self) -> Option<u64> {
        let state = self.state.borrow();
        state
            .pending_timers
            .peek()
            .map(|entry| entry.fire_at_ms.saturating_sub(state.current_time_ms))
    }

    /// Moves time forward by `ms`, firing every timer due on the way in
    /// deadline order. Returns how many fired.
    pub fn advance_by(&self, ms: u64) -> usize {
        let target_time = self.state.borrow().current_time_ms + ms;
        let mut fired = 0;
        while let Some(callback) = self.pop_due(target_time) {
            callback();
            fired += 1;
        }
        self.state.borrow_mut().current_time_ms = target_time;
        fired
    }

    /// Fires timers until none are left, jumping time to each deadline.
    pub fn run_until_idle(&self) -> usize {
        let mut fired = 0;
        while let Some(delay) = self.time_to_next_timer() {
            if fired >= Self::IDLE_LIMIT {
                log::warn!("virtual clock still busy after {fired} timers, giving up");
                break;
            }
            fired += self.advance_by(delay);
        }
        fired
    }

    pub fn clear_timers(&self) {
        self.state.borrow_mut().pending_timers.clear();
    }

    fn pop_due(&self, target_time: u64) -> Option<Box<dyn FnOnce()>> {
        let mut state = self.state.borrow_mut();
        if state.pending_timers.peek()?.fire_at_ms > target_time {
            return None;
        }
        let entry = state.pending_timers.pop()?;
        state.current_time_ms = state.current_time_ms.max(entry.fire_at_ms);
        Some(entry.callback)
    }
}

impl Timer for VirtualClock {
    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) {
        let mut state = self.state.borrow_mut();
        let fire_at_ms = state.current_time_ms + u64::try_from(delay.as_millis()).unwrap_or(u64::MAX / 2);
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.pending_timers.push(TimerEntry {
            fire_at_ms,
            sequence,
            callback,
        });
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualClock")
            .field("now_ms", &self.now_ms())
            .field("pending_timers", &self.pending_timer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> (Rc<Cell<u32>>, impl Fn() -> Box<dyn FnOnce()>) {
        let count = Rc::new(Cell::new(0));
        let handle = count.clone();
        (count, move || {
            let count = handle.clone();
            Box::new(move || count.set(count.get() + 1)) as Box<dyn FnOnce()>
        })
    }

    #[test]
    fn clock_starts_at_zero() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now_ms(), 0);
        assert!(!clock.has_pending_timers());
        assert_eq!(clock.time_to_next_timer(), None);
    }

    #[test]
    fn timer_fires_at_deadline_once() {
        let clock = VirtualClock::new();
        let (count, tick) = counter();
        clock.set_timeout(Duration::from_millis(10), tick());

        assert_eq!(clock.advance_by(9), 0);
        assert_eq!(clock.time_to_next_timer(), Some(1));
        assert_eq!(clock.advance_by(1), 1);
        assert_eq!(count.get(), 1);
        assert_eq!(clock.advance_by(100), 0);
        assert_eq!(clock.now_ms(), 110);
    }

    #[test]
    fn callbacks_may_register_timers() {
        let clock = VirtualClock::new();
        let (count, tick) = counter();
        let inner = clock.clone();
        let next = tick();
        clock.set_timeout(
            Duration::from_millis(5),
            Box::new(move || inner.set_timeout(Duration::from_millis(5), next)),
        );
        assert_eq!(clock.advance_by(20), 2);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn equal_deadlines_fire_in_registration_order() {
        let clock = VirtualClock::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for label in ["a", "b", "c"] {
            let order = order.clone();
            clock.set_timeout(Duration::from_millis(3), Box::new(move || order.borrow_mut().push(label)));
        }
        clock.run_until_idle();
        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
        assert_eq!(clock.now_ms(), 3);
    }

    #[test]
    fn scheduler_coalesces_requests() {
        let clock = Rc::new(VirtualClock::new());
        let scheduler = Scheduler::new(clock.clone(), DEFAULT_INTERVAL);
        let (count, _) = counter();

        for _ in 0..5 {
            let count = count.clone();
            scheduler.request(move || count.set(count.get() + 1));
        }
        assert!(scheduler.is_pending());
        assert_eq!(clock.pending_timer_count(), 1);
        assert_eq!(count.get(), 0);

        clock.advance_by(10);
        assert_eq!(count.get(), 1);
        assert!(!scheduler.is_pending());

        let again = count.clone();
        assert!(scheduler.request(move || again.set(again.get() + 1)));
        clock.run_until_idle();
        assert_eq!(count.get(), 2);
    }
}
