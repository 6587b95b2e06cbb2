//! Logical time.
//!
//! Lamport timestamps order events across peers without synchronized
//! physical clocks. Wall clock time never enters the protocol.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Logical time - a Lamport timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalTime(u64);

impl LogicalTime {
    /// Logical time zero
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for LogicalTime {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for LogicalTime {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Lamport clock owned by one node
///
/// `tick` and `observe` are single atomic read-modify-write operations, so
/// a concurrent reader never sees a value older than a completed update.
#[derive(Debug, Default)]
pub struct LamportClock {
    value: AtomicU64,
}

impl LamportClock {
    /// Create a clock at zero
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Current value
    #[must_use]
    pub fn now(&self) -> LogicalTime {
        LogicalTime(self.value.load(Ordering::SeqCst))
    }

    /// Advance for a local event and return the new value
    pub fn tick(&self) -> LogicalTime {
        LogicalTime(self.value.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Merge a received timestamp: `max(local, remote) + 1`
    pub fn observe(&self, remote: LogicalTime) -> LogicalTime {
        let next = |local: u64| local.max(remote.0) + 1;
        let previous = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |local| Some(next(local)))
            .unwrap_or_else(|local| local);
        LogicalTime(next(previous))
    }

    /// Back to zero. Only a crashed node that is revived does this.
    pub fn reset(&self) {
        self.value.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_tick_increments() {
        let clock = LamportClock::new();
        assert_eq!(clock.now(), LogicalTime::zero());
        assert_eq!(clock.tick(), LogicalTime::from_raw(1));
        assert_eq!(clock.tick(), LogicalTime::from_raw(2));
        assert_eq!(clock.now().as_u64(), 2);
    }

    #[test]
    fn test_observe_takes_max_plus_one() {
        let clock = LamportClock::new();
        assert_eq!(clock.observe(LogicalTime::from_raw(10)).as_u64(), 11);
        // an older timestamp still advances the clock
        assert_eq!(clock.observe(LogicalTime::from_raw(3)).as_u64(), 12);
    }

    #[test]
    fn test_reset() {
        let clock = LamportClock::new();
        clock.observe(LogicalTime::from_raw(41));
        clock.reset();
        assert_eq!(clock.now(), LogicalTime::zero());
    }

    #[test]
    fn test_concurrent_ticks_are_not_lost() {
        let clock = Arc::new(LamportClock::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        clock.tick();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(clock.now().as_u64(), 8000);
    }

    #[test]
    fn test_logical_time_display() {
        assert_eq!(LogicalTime::from_raw(7).to_string(), "7");
    }

    proptest::proptest! {
        #[test]
        fn prop_clock_never_decreases(events in proptest::collection::vec(proptest::option::of(0u64..1_000), 1..64)) {
            let clock = LamportClock::new();
            let mut last = clock.now();
            for event in events {
                let now = match event {
                    None => clock.tick(),
                    Some(remote) => {
                        let now = clock.observe(LogicalTime::from_raw(remote));
                        prop_assert!(now.as_u64() >= remote + 1);
                        now
                    }
                };
                prop_assert!(now > last);
                last = now;
            }
        }
    }
}
