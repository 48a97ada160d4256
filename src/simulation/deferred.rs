//! # Deferred Phase Transitions
//!
//! When the BMS trips a cutoff it does not switch phase immediately; the
//! switch happens a short while later. Those delayed switches are queued here
//! against the simulation clock and applied on the first tick boundary at or
//! after their due time.
//!
//! Every entry carries the phase it expects to find. Applying an entry whose
//! expectation no longer holds is a no-op, so a stale entry can never undo a
//! later transition. Entries can also be cancelled individually or all at once
//! (level reset, explosion).

use std::time::Duration;

use super::events::TransitionCause;
use super::state::Phase;

/// Handle returned by [`DeferredTransitions::schedule_after`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionHandle(u64);

/// A queued, guarded phase change
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledTransition {
    pub handle: TransitionHandle,
    /// Simulation time at which the transition becomes due
    pub due_at: Duration,
    /// Phase that must still be current for the transition to apply
    pub expected: Phase,
    pub target: Phase,
    pub cause: TransitionCause,
}

impl ScheduledTransition {
    /// Guard evaluated when the transition fires.
    pub fn applies_to(&self, current: Phase) -> bool {
        current == self.expected && current != Phase::Exploded
    }
}

/// Queue of pending transitions, ordered by due time then scheduling order.
#[derive(Debug, Default, Clone)]
pub struct DeferredTransitions {
    pending: Vec<ScheduledTransition>,
    next_id: u64,
}

impl DeferredTransitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `expected -> target` to fire `delay` after `now`.
    pub fn schedule_after(
        &mut self,
        now: Duration,
        delay: Duration,
        expected: Phase,
        target: Phase,
        cause: TransitionCause,
    ) -> TransitionHandle {
        let handle = TransitionHandle(self.next_id);
        self.next_id += 1;

        let entry = ScheduledTransition {
            handle,
            due_at: now + delay,
            expected,
            target,
            cause,
        };
        // Stable insert keeps equal due times in scheduling order
        let pos = self.pending.partition_point(|p| p.due_at <= entry.due_at);
        self.pending.insert(pos, entry);
        handle
    }

    /// Whether a transition with this cause is still queued.
    pub fn is_pending(&self, cause: TransitionCause) -> bool {
        self.pending.iter().any(|p| p.cause == cause)
    }

    /// Returns true if the handle was still pending.
    pub fn cancel(&mut self, handle: TransitionHandle) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.handle != handle);
        self.pending.len() != before
    }

    /// Drop every pending transition. Returns how many were dropped.
    pub fn cancel_all(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    /// Remove and return every transition due at or before `now`, earliest
    /// first.
    pub fn take_due(&mut self, now: Duration) -> Vec<ScheduledTransition> {
        let split = self.pending.partition_point(|p| p.due_at <= now);
        self.pending.drain(..split).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
