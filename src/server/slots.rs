//! Upper bound on concurrently running exchanges.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct ExchangeSlots {
    active: AtomicUsize,
    max: usize,
}

impl ExchangeSlots {
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            max: max.max(1),
        })
    }

    /// Claim a slot, or `None` when all are taken.
    ///
    /// The guard is owned so it can travel with a response stream.
    pub fn try_acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        let mut current = self.active.load(Ordering::Relaxed);
        loop {
            if current >= self.max {
                return None;
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Some(SlotGuard {
                        slots: self.clone(),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

pub struct SlotGuard {
    slots: Arc<ExchangeSlots>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_stops_at_limit() {
        let slots = ExchangeSlots::new(2);
        let a = slots.try_acquire();
        let b = slots.try_acquire();
        assert!(a.is_some() && b.is_some());
        assert!(slots.try_acquire().is_none());

        drop(a);
        assert_eq!(slots.active(), 1);
        assert!(slots.try_acquire().is_some());
    }

    #[test]
    fn zero_limit_is_raised_to_one() {
        let slots = ExchangeSlots::new(0);
        assert_eq!(slots.max(), 1);
        assert!(slots.try_acquire().is_some());
    }

    #[test]
    fn concurrent_acquire_never_exceeds_limit() {
        let slots = ExchangeSlots::new(10);
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let slots = slots.clone();
                std::thread::spawn(move || slots.try_acquire())
            })
            .collect();
        let guards: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(guards.len(), 10);
        assert_eq!(slots.active(), 10);
    }
}
