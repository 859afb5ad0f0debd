//! Service → circuit state table.
//!
//! Each entry has its own mutex. The map shard guard is released before that
//! mutex is taken, so the critical section for one service never blocks
//! another.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::state::CircuitStateEntry;
use crate::clock::Timestamp;

/// Shared handle to one service's entry.
pub type EntryHandle = Arc<Mutex<CircuitStateEntry>>;

/// Table of per-service circuit state.
///
/// Entries are created lazily and live as long as the registry.
#[derive(Debug, Default)]
pub struct CircuitRegistry {
    entries: DashMap<String, EntryHandle>,
}

impl CircuitRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `service`, if one has been created.
    #[must_use]
    pub fn get(&self, service: &str) -> Option<EntryHandle> {
        self.entries.get(service).map(|entry| Arc::clone(entry.value()))
    }

    /// Entry for `service`, creating a `CLOSED` one stamped at `now` if needed.
    pub fn get_or_create(&self, service: &str, now: Timestamp) -> EntryHandle {
        if let Some(existing) = self.get(service) {
            return existing;
        }

        // Two racing creators both land here; `or_insert_with` keeps the first.
        Arc::clone(
            self.entries
                .entry(service.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(CircuitStateEntry::new(now))))
                .value(),
        )
    }

    /// All tracked service ids, sorted.
    #[must_use]
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        services.sort_unstable();
        services
    }

    /// Number of tracked services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no service has been tracked yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::resilience::state::CircuitState;

    #[test]
    fn unknown_service_has_no_entry() {
        let registry = CircuitRegistry::new();
        assert!(registry.get("svc").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn get_or_create_returns_same_entry() {
        let clock = ManualClock::new();
        let registry = CircuitRegistry::new();

        let first = registry.get_or_create("svc", clock.now());
        first.lock().record_failure(1, clock.now());
        let second = registry.get_or_create("svc", clock.now());

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.lock().state(), CircuitState::Open);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn services_are_tracked_independently() {
        let clock = ManualClock::new();
        let registry = CircuitRegistry::new();

        registry
            .get_or_create("b", clock.now())
            .lock()
            .record_failure(1, clock.now());
        registry.get_or_create("a", clock.now());

        assert_eq!(registry.services(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            registry.get("a").map(|e| e.lock().state()),
            Some(CircuitState::Closed)
        );
    }

    #[test]
    fn holding_one_entry_does_not_block_another() {
        let clock = ManualClock::new();
        let registry = Arc::new(CircuitRegistry::new());
        let a = registry.get_or_create("a", clock.now());
        registry.get_or_create("b", clock.now());

        let _held = a.lock();
        let other = Arc::clone(&registry);
        let handle = std::thread::spawn(move || {
            other.get("b").map(|entry| entry.lock().failure_count())
        });

        assert_eq!(handle.join().ok().flatten(), Some(0));
    }
}
