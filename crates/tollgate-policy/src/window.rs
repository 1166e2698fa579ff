//! Fixed-ring sliding window counter.
//!
//! The window is split into equal slots kept in a ring, so the memory per
//! tenant key is bounded no matter how many queries it runs. Slots are
//! addressed by their absolute index since the window was created; a slot
//! drops out once the ring wraps past it. All methods take `now` explicitly.

use std::time::{Duration, Instant};

/// Slots per window used by the built-in policies
pub const DEFAULT_SLOTS: usize = 60;

#[derive(Debug, Clone)]
pub struct SlidingWindow {
    origin: Instant,
    slot_width: Duration,
    slots: Vec<u64>,
    current: u64,
}

impl SlidingWindow {
    pub fn new(window: Duration, slot_count: usize, now: Instant) -> Self {
        let slot_count = slot_count.max(1);
        let slot_width = (window / slot_count as u32).max(Duration::from_millis(1));
        Self {
            origin: now,
            slot_width,
            slots: vec![0; slot_count],
            current: 0,
        }
    }

    /// Full length of the window
    pub fn window(&self) -> Duration {
        self.slot_width * self.slots.len() as u32
    }

    fn len(&self) -> u64 {
        self.slots.len() as u64
    }

    fn ring_index(&self, slot: u64) -> usize {
        (slot % self.len()) as usize
    }

    fn slot_index(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin).as_nanos();
        (elapsed / self.slot_width.as_nanos()) as u64
    }

    fn slot_start(&self, slot: u64) -> Instant {
        let offset = self.slot_width.as_nanos().saturating_mul(u128::from(slot));
        self.origin + Duration::from_nanos(offset.min(u128::from(u64::MAX)) as u64)
    }

    /// Move the head to `now`, clearing slots that fell out of the window
    fn advance(&mut self, now: Instant) {
        let target = self.slot_index(now);
        if target <= self.current {
            return;
        }
        let steps = (target - self.current).min(self.len());
        for step in 1..=steps {
            let index = self.ring_index(self.current + step);
            self.slots[index] = 0;
        }
        self.current = target;
    }

    fn is_live(&self, slot: u64) -> bool {
        slot <= self.current && self.current - slot < self.len()
    }

    /// Add to the current slot and return the slot it landed in
    pub fn add(&mut self, now: Instant, amount: u64) -> u64 {
        self.advance(now);
        let index = self.ring_index(self.current);
        self.slots[index] = self.slots[index].saturating_add(amount);
        self.current
    }

    /// Correct an earlier [`add`](Self::add). Returns false if the slot has
    /// already left the window, in which case nothing changes.
    pub fn adjust(&mut self, now: Instant, slot: u64, delta: i64) -> bool {
        self.advance(now);
        if !self.is_live(slot) {
            return false;
        }
        let index = self.ring_index(slot);
        self.slots[index] = if delta >= 0 {
            self.slots[index].saturating_add(delta as u64)
        } else {
            self.slots[index].saturating_sub(delta.unsigned_abs())
        };
        true
    }

    /// Total over the live window
    pub fn sum(&mut self, now: Instant) -> u64 {
        self.advance(now);
        self.slots.iter().fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    /// How long until `incoming` more fits under `limit`.
    ///
    /// Zero if it fits now; a full window if `incoming` alone exceeds `limit`.
    pub fn retry_after(&mut self, now: Instant, limit: u64, incoming: u64) -> Duration {
        let mut remaining = self.sum(now);
        if remaining.saturating_add(incoming) <= limit {
            return Duration::ZERO;
        }

        let oldest = self.current.saturating_sub(self.len() - 1);
        for slot in oldest..=self.current {
            remaining = remaining.saturating_sub(self.slots[self.ring_index(slot)]);
            if remaining.saturating_add(incoming) <= limit {
                let expires = self.slot_start(slot + self.len());
                return expires.saturating_duration_since(now);
            }
        }
        self.window()
    }
}
