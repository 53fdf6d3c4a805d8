use std::sync::Arc;

use crate::auth::Identity;
use crate::counter_store::CounterStore;

/// Lifetime count of admitted requests per identity.
///
/// Only admitted requests are recorded, so it must be called after the rate
/// limiter lets a request through. Counts are never decremented.
pub struct VisitCounter {
    store: Arc<dyn CounterStore<String>>,
}

impl VisitCounter {
    pub fn new(store: Arc<dyn CounterStore<String>>) -> Self {
        Self { store }
    }

    /// Record a visit and return the visit count *before* this one (0 on a first visit)
    pub fn record_visit(&self, identity: &Identity) -> u32 {
        self.store.increment(identity.key().to_string())
    }

    pub fn visits(&self, identity: &Identity) -> u32 {
        self.store.get(&identity.key().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter_store::InMemoryCounterStore;

    fn user(credential: &str) -> Identity {
        Identity::from_authorization(credential).unwrap()
    }

    #[test]
    fn test_visits_are_per_identity() {
        let visits = VisitCounter::new(Arc::new(InMemoryCounterStore::new()));
        let alice = user("Bearer USER001");
        let bob = user("Bearer USER002");

        assert_eq!(visits.record_visit(&alice), 0);
        assert_eq!(visits.record_visit(&alice), 1);
        assert_eq!(visits.record_visit(&alice), 2);
        assert_eq!(visits.record_visit(&bob), 0);

        assert_eq!(visits.visits(&alice), 3);
        assert_eq!(visits.visits(&bob), 1);
    }

    #[test]
    fn test_concurrent_visits_are_consecutive() {
        let visits = Arc::new(VisitCounter::new(Arc::new(InMemoryCounterStore::new())));
        let alice = user("Bearer USER001");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let visits = Arc::clone(&visits);
                let alice = alice.clone();
                std::thread::spawn(move || visits.record_visit(&alice))
            })
            .collect();

        let mut previous: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        previous.sort_unstable();

        assert_eq!(previous, (0..16).collect::<Vec<u32>>());
    }
}
