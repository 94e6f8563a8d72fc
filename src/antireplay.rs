/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use arrayvec::ArrayVec;

/// Largest lag behind the highest index seen that is still accepted.
pub const REPLAY_WINDOW_SIZE: u64 = 64;
const REPLAY_SET_CAPACITY: usize = REPLAY_WINDOW_SIZE as usize + 1;

/// SRTP replay list: the ascending set of received packet indices that are still inside the
/// window behind the highest index seen.
///
/// Indices more than `REPLAY_WINDOW_SIZE` behind the highest are refused outright, so the set
/// covers `highest - REPLAY_WINDOW_SIZE ..= highest`.
pub struct ReplayWindow {
    highest: u64,
    seen: ArrayVec<u64, REPLAY_SET_CAPACITY>,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self { highest: 0, seen: ArrayVec::new() }
    }

    /// Forget every index and restart with `highest` as the reference point.
    pub fn reset(&mut self, highest: u64) {
        self.highest = highest;
        self.seen.clear();
    }

    /// Check the window without mutating state.
    /// Returns true if a packet with this index may be accepted.
    pub fn check(&self, index: u64) -> bool {
        if index.saturating_add(REPLAY_WINDOW_SIZE) < self.highest {
            return false;
        }
        self.seen.binary_search(&index).is_err()
    }

    /// Record `index` as received.
    /// This should only be called after the packet is authenticated, and returns false if
    /// the index is not acceptable after all.
    pub fn update(&mut self, index: u64) -> bool {
        if !self.check(index) {
            return false;
        }
        if index > self.highest {
            self.highest = index;
            let stale = self.seen.iter().take_while(|i| **i + REPLAY_WINDOW_SIZE < index).count();
            self.seen.drain(..stale);
        }
        // Every held index lies in `[highest - 64, highest]` and `index` is not among them,
        // so there is always room.
        match self.seen.binary_search(&index) {
            Err(pos) => self.seen.try_insert(pos, index).is_ok(),
            Ok(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// The lowest index still held.
    pub fn oldest(&self) -> Option<u64> {
        self.seen.first().copied()
    }

    pub fn highest(&self) -> u64 {
        self.highest
    }
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn window_slides() {
        let mut w = ReplayWindow::new();
        for i in 1..=64 {
            assert!(w.check(i));
            assert!(w.update(i));
        }
        assert_eq!(w.len(), 64);

        assert!(!w.check(27));
        assert!(!w.update(27));

        assert!(w.update(69));
        assert_eq!(w.oldest(), Some(5));
        assert!(!w.check(4));

        // Late but inside the window.
        assert!(w.update(67));
        assert_eq!(w.oldest(), Some(5));
        assert!(!w.check(67));
        assert_eq!(w.highest(), 69);
    }

    #[test]
    fn lag_of_exactly_the_window_is_accepted() {
        let mut w = ReplayWindow::new();
        w.reset(100);
        assert!(w.update(100));
        assert!(w.check(100 - REPLAY_WINDOW_SIZE));
        assert!(w.update(100 - REPLAY_WINDOW_SIZE));
        assert!(!w.check(100 - REPLAY_WINDOW_SIZE - 1));
    }

    #[test]
    fn increasing_indices_never_replayed() {
        let mut w = ReplayWindow::new();
        w.reset(1000);
        for i in 1000..3000u64 {
            assert!(w.update(i), "index {} refused", i);
            assert!(w.len() <= REPLAY_SET_CAPACITY);
        }
        assert!(!w.check(2999));
        assert!(!w.check(2999 - 64));
        assert!(!w.check(2999 - 65));
        assert!(w.check(3000));
        assert_eq!(w.len(), REPLAY_SET_CAPACITY);
    }

    #[test]
    fn stays_sorted_and_bounded() {
        let mut w = ReplayWindow::new();
        let mut x: u64 = 12345;
        for _ in 0..5000 {
            // Small LCG so the test stays deterministic.
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let idx = 500 + (x >> 33) % 400;
            w.update(idx);
            assert!(w.len() <= REPLAY_SET_CAPACITY);
            assert!(w.seen.windows(2).all(|p| p[0] < p[1]));
            assert!(w.oldest().map_or(true, |o| o + REPLAY_WINDOW_SIZE >= w.highest()));
        }
    }
}
