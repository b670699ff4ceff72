//! Tip-change notification for long-polling callers.

use gridhunt_types::Hash256;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A condition-variable-backed signal announcing new chain tips. The
/// embedding node calls [`TipSignal::announce`] whenever it accepts a new
/// tip; waiters block until the tip differs from the one they have seen.
pub struct TipSignal {
    tip: Mutex<Hash256>,
    changed: Condvar,
}

impl TipSignal {
    pub fn new(initial: Hash256) -> Self {
        Self {
            tip: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    pub fn current(&self) -> Hash256 {
        *self.tip.lock().expect("tip lock poisoned")
    }

    /// Publish a new tip and wake all waiters.
    pub fn announce(&self, tip: Hash256) {
        let mut current = self.tip.lock().expect("tip lock poisoned");
        if *current == tip {
            return;
        }
        *current = tip;
        self.changed.notify_all();
    }

    /// Block until the tip differs from `seen`, or the timeout elapses.
    /// Returns the new tip, or `None` on timeout.
    pub fn wait_for_change(&self, seen: &Hash256, timeout: Duration) -> Option<Hash256> {
        let guard = self.tip.lock().expect("tip lock poisoned");
        let (guard, result) = self
            .changed
            .wait_timeout_while(guard, timeout, |tip| tip == seen)
            .expect("tip lock poisoned");
        if result.timed_out() && *guard == *seen {
            None
        } else {
            Some(*guard)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn announce_wakes_waiter() {
        let signal = Arc::new(TipSignal::new(Hash256::ZERO));
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait_for_change(&Hash256::ZERO, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        signal.announce(Hash256::new([1; 32]));
        assert_eq!(waiter.join().unwrap(), Some(Hash256::new([1; 32])));
    }

    #[test]
    fn wait_times_out_without_change() {
        let signal = TipSignal::new(Hash256::ZERO);
        assert_eq!(
            signal.wait_for_change(&Hash256::ZERO, Duration::from_millis(10)),
            None
        );
    }

    #[test]
    fn no_wait_when_tip_already_moved() {
        let signal = TipSignal::new(Hash256::new([2; 32]));
        // The caller last saw the zero tip, so the current tip already
        // counts as a change.
        assert_eq!(
            signal.wait_for_change(&Hash256::ZERO, Duration::from_secs(1)),
            Some(Hash256::new([2; 32]))
        );
    }
}
