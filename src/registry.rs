//! Correlation identifier allocation and owner lookup.

use crate::types::{ControlKind, CorrelationId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-kind counter and owner table, guarded by one lock.
struct KindTable<O> {
    last: u64,
    owners: HashMap<u64, O>,
}

impl<O> KindTable<O> {
    fn new() -> Self {
        Self {
            last: 0,
            owners: HashMap::new(),
        }
    }

    /// Next free sequence. Zero is never handed out.
    fn next_free(&mut self) -> u64 {
        loop {
            self.last = self.last.wrapping_add(1);
            if self.last != 0 && !self.owners.contains_key(&self.last) {
                return self.last;
            }
        }
    }
}

/// Maps correlation identifiers to their owners, one table per kind.
///
/// Minting an identifier and registering its owner happen in the same
/// critical section, so a fresh identifier is never visible as free.
pub struct CorrelationRegistry<O> {
    requests: Mutex<KindTable<O>>,
    subscriptions: Mutex<KindTable<O>>,
}

impl<O> CorrelationRegistry<O> {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(KindTable::new()),
            subscriptions: Mutex::new(KindTable::new()),
        }
    }

    fn table(&self, kind: ControlKind) -> &Mutex<KindTable<O>> {
        match kind {
            ControlKind::Request => &self.requests,
            ControlKind::Subscription => &self.subscriptions,
        }
    }

    /// Mint an identifier of `kind` owned by `owner`.
    pub fn allocate(&self, kind: ControlKind, owner: O) -> CorrelationId {
        let mut table = self.table(kind).lock();
        let sequence = table.next_free();
        table.owners.insert(sequence, owner);
        CorrelationId::new(kind, sequence)
    }

    /// Associate `owner` with an existing identifier, returning the previous owner.
    pub fn register(&self, id: CorrelationId, owner: O) -> Option<O> {
        self.table(id.kind).lock().owners.insert(id.sequence, owner)
    }

    pub fn release(&self, id: CorrelationId) -> Option<O> {
        self.table(id.kind).lock().owners.remove(&id.sequence)
    }

    pub fn contains(&self, id: CorrelationId) -> bool {
        self.table(id.kind).lock().owners.contains_key(&id.sequence)
    }

    /// Number of live identifiers of `kind`.
    pub fn len(&self, kind: ControlKind) -> usize {
        self.table(kind).lock().owners.len()
    }

    pub fn is_empty(&self, kind: ControlKind) -> bool {
        self.len(kind) == 0
    }

    /// Scoped allocation: the identifier is released when the guard drops.
    pub fn acquire(self: &Arc<Self>, kind: ControlKind, owner: O) -> CorrelationGuard<O> {
        let id = self.allocate(kind, owner);
        CorrelationGuard {
            registry: Arc::clone(self),
            id,
        }
    }
}

impl<O: Clone> CorrelationRegistry<O> {
    pub fn lookup(&self, id: CorrelationId) -> Option<O> {
        self.table(id.kind).lock().owners.get(&id.sequence).cloned()
    }

    /// Snapshot of every owner of `kind`.
    pub fn owners(&self, kind: ControlKind) -> Vec<(CorrelationId, O)> {
        self.table(kind)
            .lock()
            .owners
            .iter()
            .map(|(seq, owner)| (CorrelationId::new(kind, *seq), owner.clone()))
            .collect()
    }
}

impl<O> Default for CorrelationRegistry<O> {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases its identifier on drop.
pub struct CorrelationGuard<O> {
    registry: Arc<CorrelationRegistry<O>>,
    id: CorrelationId,
}

impl<O> CorrelationGuard<O> {
    pub fn id(&self) -> CorrelationId {
        self.id
    }
}

impl<O> Drop for CorrelationGuard<O> {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

impl<O> std::fmt::Debug for CorrelationGuard<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationGuard").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_allocate_is_scoped_by_kind() {
        let registry = CorrelationRegistry::new();

        let a = registry.allocate(ControlKind::Request, "a");
        let b = registry.allocate(ControlKind::Request, "b");
        let s = registry.allocate(ControlKind::Subscription, "s");

        assert_eq!(a, CorrelationId::request(1));
        assert_eq!(b, CorrelationId::request(2));
        assert_eq!(s, CorrelationId::subscription(1));
        assert_eq!(registry.lookup(b), Some("b"));
        assert_eq!(registry.len(ControlKind::Request), 2);
        assert_eq!(registry.len(ControlKind::Subscription), 1);
    }

    #[test]
    fn test_release_and_register() {
        let registry = CorrelationRegistry::new();
        let id = registry.allocate(ControlKind::Subscription, 1);

        assert_eq!(registry.register(id, 2), Some(1));
        assert_eq!(registry.lookup(id), Some(2));
        assert_eq!(registry.release(id), Some(2));
        assert!(!registry.contains(id));
        assert_eq!(registry.lookup(id), None);
        assert!(registry.is_empty(ControlKind::Subscription));
    }

    #[test]
    fn test_allocation_skips_occupied_sequences() {
        let registry = CorrelationRegistry::new();
        registry.register(CorrelationId::request(1), "manual");
        registry.register(CorrelationId::request(2), "manual");

        let id = registry.allocate(ControlKind::Request, "fresh");
        assert_eq!(id, CorrelationId::request(3));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let registry = Arc::new(CorrelationRegistry::new());
        let id = {
            let guard = registry.acquire(ControlKind::Request, ());
            assert!(registry.contains(guard.id()));
            guard.id()
        };
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let registry = Arc::new(CorrelationRegistry::new());
        let shared = Arc::clone(&registry);

        let result = thread::spawn(move || {
            let _guard = shared.acquire(ControlKind::Request, ());
            panic!("cycle failed");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(registry.len(ControlKind::Request), 0);
    }

    #[test]
    fn test_concurrent_allocation_is_distinct() {
        let registry = Arc::new(CorrelationRegistry::new());
        let mut handles = Vec::new();

        for t in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                (0..200)
                    .map(|i| registry.allocate(ControlKind::Request, t * 1000 + i))
                    .collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 1600);
        assert_eq!(registry.len(ControlKind::Request), 1600);
    }
}
