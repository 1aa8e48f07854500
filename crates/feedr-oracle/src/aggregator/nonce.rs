//! Per-submitter sliding nonce windows.
//!
//! Each `(validator, feeder)` pair keeps the highest nonce accepted in the
//! open round and the set of accepted nonces within
//! `[highest - max_nonce + 1, highest]`. Nonces below that window are
//! stale, nonces inside it are accepted once, and a repeated nonce is a
//! harmless duplicate. A submitter gets at most `max_nonce` accepted
//! submissions per round. Windows are discarded when the round closes.

use std::collections::BTreeSet;

use crate::Rejection;

/// Classification of an incoming nonce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NonceCheck {
    Fresh,
    Duplicate,
}

/// Nonce bookkeeping for one submitter on one feeder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NonceWindow {
    highest: u64,
    seen: BTreeSet<u64>,
    accepted: u32,
}

impl NonceWindow {
    /// Lowest nonce still inside the window.
    pub fn floor(&self, max_nonce: u32) -> u64 {
        self.highest
            .saturating_sub(u64::from(max_nonce).saturating_sub(1))
            .max(1)
    }

    pub fn check(&self, nonce: u64, max_nonce: u32) -> Result<NonceCheck, Rejection> {
        let floor = self.floor(max_nonce);
        if nonce < floor {
            return Err(Rejection::StaleNonce { nonce, floor });
        }
        if self.seen.contains(&nonce) {
            return Ok(NonceCheck::Duplicate);
        }
        if self.accepted >= max_nonce {
            return Err(Rejection::NonceLimitReached { limit: max_nonce });
        }
        Ok(NonceCheck::Fresh)
    }

    /// Record a nonce that passed [`check`](Self::check) as fresh.
    pub fn record(&mut self, nonce: u64, max_nonce: u32) {
        self.seen.insert(nonce);
        self.accepted += 1;
        if nonce > self.highest {
            self.highest = nonce;
            let floor = self.floor(max_nonce);
            self.seen.retain(|n| *n >= floor);
        }
    }

    pub fn highest(&self) -> u64 {
        self.highest
    }

    pub fn accepted(&self) -> u32 {
        self.accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_is_stale() {
        let w = NonceWindow::default();
        assert_eq!(
            w.check(0, 3),
            Err(Rejection::StaleNonce { nonce: 0, floor: 1 })
        );
    }

    #[test]
    fn test_duplicate_is_noop() {
        let mut w = NonceWindow::default();
        assert_eq!(w.check(1, 3), Ok(NonceCheck::Fresh));
        w.record(1, 3);
        assert_eq!(w.check(1, 3), Ok(NonceCheck::Duplicate));
        assert_eq!(w.accepted(), 1);
    }

    #[test]
    fn test_window_slides() {
        let mut w = NonceWindow::default();
        w.record(1, 3);
        w.record(5, 3);
        // window is now [3, 5]
        assert_eq!(w.floor(3), 3);
        assert_eq!(
            w.check(2, 3),
            Err(Rejection::StaleNonce { nonce: 2, floor: 3 })
        );
        // an unseen nonce inside the window is still fresh
        assert_eq!(w.check(4, 3), Ok(NonceCheck::Fresh));
        // nonce 1 fell out of the window: stale, not duplicate
        assert!(w.check(1, 3).is_err());
    }

    #[test]
    fn test_limit_per_round() {
        let mut w = NonceWindow::default();
        for n in 1..=3 {
            w.record(n, 3);
        }
        assert_eq!(
            w.check(4, 3),
            Err(Rejection::NonceLimitReached { limit: 3 })
        );
        // duplicates stay harmless at the limit
        assert_eq!(w.check(3, 3), Ok(NonceCheck::Duplicate));
    }

    proptest! {
        #[test]
        fn prop_below_window_always_rejected(
            highest in 1u64..1_000,
            max_nonce in 1u32..16,
            offset in 1u64..1_000,
        ) {
            let mut w = NonceWindow::default();
            w.record(highest, max_nonce);
            let floor = w.floor(max_nonce);
            if let Some(stale) = floor.checked_sub(offset) {
                prop_assert!(w.check(stale, max_nonce).is_err());
            }
        }

        #[test]
        fn prop_fresh_nonce_accepted_exactly_once(
            nonces in proptest::collection::vec(1u64..64, 1..8),
        ) {
            let max_nonce = 64;
            let mut w = NonceWindow::default();
            let mut accepted = BTreeSet::new();
            for n in nonces {
                match w.check(n, max_nonce) {
                    Ok(NonceCheck::Fresh) => {
                        prop_assert!(accepted.insert(n));
                        w.record(n, max_nonce);
                    }
                    Ok(NonceCheck::Duplicate) => prop_assert!(accepted.contains(&n)),
                    Err(_) => prop_assert!(false, "nonce {} rejected inside a wide window", n),
                }
            }
        }
    }
}
