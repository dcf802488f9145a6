//! Forwarded-packet counters.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::Family;

/// One monotonically increasing counter per family.
///
/// Workers increment, the metrics collector reads; neither needs a lock.
#[derive(Debug, Default)]
pub struct Counters {
    ipv4: AtomicU64,
    ipv6: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one relayed frame.
    pub fn record(&self, family: Family) {
        self.counter(family).fetch_add(1, Ordering::Relaxed);
    }

    /// Current value for `family`.
    pub fn get(&self, family: Family) -> u64 {
        self.counter(family).load(Ordering::Relaxed)
    }

    fn counter(&self, family: Family) -> &AtomicU64 {
        match family {
            Family::Ipv4 => &self.ipv4,
            Family::Ipv6 => &self.ipv6,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_families_are_independent() {
        let counters = Counters::new();
        counters.record(Family::Ipv4);
        counters.record(Family::Ipv4);
        counters.record(Family::Ipv6);

        assert_eq!(counters.get(Family::Ipv4), 2);
        assert_eq!(counters.get(Family::Ipv6), 1);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        const PER_THREAD: u64 = 10_000;
        let counters = Arc::new(Counters::new());

        let handles: Vec<_> = [Family::Ipv4, Family::Ipv6, Family::Ipv4, Family::Ipv6]
            .into_iter()
            .map(|family| {
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        counters.record(family);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counters.get(Family::Ipv4), 2 * PER_THREAD);
        assert_eq!(counters.get(Family::Ipv6), 2 * PER_THREAD);
    }
}
