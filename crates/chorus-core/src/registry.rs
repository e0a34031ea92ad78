// ── Instance-scoped registry ──
//
// Lazily builds one independent container per instance id and caches it.
// The coordinator's per-instance sessions and every domain store are
// instances of this type, which is what keeps instances isolated.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::model::InstanceId;

type Factory<T> = dyn Fn(&InstanceId) -> T + Send + Sync;

/// Cache of `T` keyed by instance id, populated on first access.
pub struct InstanceRegistry<T> {
    entries: DashMap<InstanceId, Arc<T>>,
    factory: Box<Factory<T>>,
}

impl<T> InstanceRegistry<T> {
    /// Create a registry whose containers are built by `factory`.
    pub fn new(factory: impl Fn(&InstanceId) -> T + Send + Sync + 'static) -> Self {
        Self {
            entries: DashMap::new(),
            factory: Box::new(factory),
        }
    }

    /// Return the container for `id`, constructing it on first access.
    pub fn get(&self, id: &InstanceId) -> Arc<T> {
        if let Some(existing) = self.entries.get(id) {
            return Arc::clone(existing.value());
        }
        // `entry` holds the shard lock, so concurrent first accesses
        // still construct exactly once.
        let entry = self
            .entries
            .entry(id.clone())
            .or_insert_with(|| Arc::new((self.factory)(id)));
        Arc::clone(entry.value())
    }

    /// Return the container for `id` only if it already exists.
    pub fn peek(&self, id: &InstanceId) -> Option<Arc<T>> {
        self.entries.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, id: &InstanceId) -> bool {
        self.entries.contains_key(id)
    }

    /// Drop the container for `id`. Returns it if it existed.
    pub fn clear(&self, id: &InstanceId) -> Option<Arc<T>> {
        self.entries.remove(id).map(|(_, v)| v)
    }

    /// Drop every container (full logout).
    pub fn clear_all(&self) {
        self.entries.clear();
    }

    pub fn ids(&self) -> Vec<InstanceId> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Default> Default for InstanceRegistry<T> {
    fn default() -> Self {
        Self::new(|_| T::default())
    }
}

impl<T> fmt::Debug for InstanceRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("instances", &self.ids())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counter {
        value: Mutex<u32>,
    }

    #[test]
    fn get_constructs_once_and_caches() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let registry = InstanceRegistry::new(move |id: &InstanceId| {
            counter.fetch_add(1, Ordering::SeqCst);
            id.to_string()
        });

        let a = InstanceId::new("a");
        let first = registry.get(&a);
        let second = registry.get(&a);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, "a");
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn containers_are_isolated_per_instance() {
        let registry: InstanceRegistry<Counter> = InstanceRegistry::default();
        let a = InstanceId::new("a");
        let b = InstanceId::new("b");

        *registry.get(&a).value.lock().unwrap() += 5;

        assert_eq!(*registry.get(&a).value.lock().unwrap(), 5);
        assert_eq!(*registry.get(&b).value.lock().unwrap(), 0);
    }

    #[test]
    fn peek_does_not_construct() {
        let registry: InstanceRegistry<Counter> = InstanceRegistry::default();
        let a = InstanceId::new("a");

        assert!(registry.peek(&a).is_none());
        assert!(registry.is_empty());
        registry.get(&a);
        assert!(registry.peek(&a).is_some());
    }

    #[test]
    fn clear_rebuilds_fresh_container() {
        let registry: InstanceRegistry<Counter> = InstanceRegistry::default();
        let a = InstanceId::new("a");
        let b = InstanceId::new("b");

        *registry.get(&a).value.lock().unwrap() = 7;
        *registry.get(&b).value.lock().unwrap() = 9;

        assert!(registry.clear(&a).is_some());
        assert_eq!(*registry.get(&a).value.lock().unwrap(), 0);
        assert_eq!(*registry.get(&b).value.lock().unwrap(), 9);

        registry.clear_all();
        assert!(registry.is_empty());
    }
}
