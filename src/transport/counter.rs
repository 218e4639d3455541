use std::sync::atomic::{AtomicU64, Ordering};

use super::OpKind;

/// Per-kind completion counters.
///
/// Written by whoever retires operations (a transport's receive path) and
/// read by the poller. Counts are monotonic between two [`clear`]s.
///
/// [`clear`]: CompletionCounters::clear
#[derive(Debug, Default)]
pub struct CompletionCounters {
    counts: [AtomicU64; OpKind::COUNT],
}

impl CompletionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completion of the given kind.
    #[inline]
    pub fn bump(&self, op: OpKind) {
        self.counts[op.index()].fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn load(&self, op: OpKind) -> u64 {
        self.counts[op.index()].load(Ordering::Acquire)
    }

    /// Reset every kind to zero.
    pub fn clear(&self) {
        for count in &self.counts {
            count.store(0, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_bump_and_clear() {
        let counters = CompletionCounters::new();
        counters.bump(OpKind::LocalWrite);
        counters.bump(OpKind::LocalWrite);
        counters.bump(OpKind::InboundWrite);
        assert_eq!(counters.load(OpKind::LocalWrite), 2);
        assert_eq!(counters.load(OpKind::InboundWrite), 1);
        assert_eq!(counters.load(OpKind::RemoteWrite), 0);

        counters.clear();
        for op in OpKind::ALL {
            assert_eq!(counters.load(op), 0);
        }
    }

    #[test]
    fn test_concurrent_bumps() {
        let counters = Arc::new(CompletionCounters::new());
        let handles = (0..4)
            .map(|_| {
                let counters = counters.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.bump(OpKind::LocalWrite);
                    }
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counters.load(OpKind::LocalWrite), 4000);
    }
}
