//! Keyed collection of connected sandboxes.
//!
//! [`SandboxRegistry`] is a plain data structure: it never publishes events.
//! The session mutates it through [`SharedRegistry`] and announces changes on
//! its own bus; every other consumer only gets read access.

use super::{Sandbox, SandboxId};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::hash::Hash;
use std::sync::Arc;

/// Outcome of replacing the registry with a full snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub added: Vec<SandboxId>,
    pub removed: Vec<SandboxId>,
    pub refreshed: Vec<SandboxId>,
}

/// Sandboxes by id, iterated in insertion order.
#[derive(Debug, Clone, Default)]
pub struct SandboxRegistry {
    sandboxes: IndexMap<SandboxId, Sandbox>,
}

impl SandboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by id. A replaced entry keeps its listing position.
    pub fn insert(&mut self, sandbox: Sandbox) -> Option<Sandbox> {
        self.sandboxes.insert(sandbox.id.clone(), sandbox)
    }

    pub fn remove(&mut self, id: &SandboxId) -> Option<Sandbox> {
        self.sandboxes.shift_remove(id)
    }

    pub fn contains(&self, id: &SandboxId) -> bool {
        self.sandboxes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sandboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sandboxes.is_empty()
    }

    pub fn get(&self, id: &SandboxId) -> Option<&Sandbox> {
        self.sandboxes.get(id)
    }

    pub fn ids(&self) -> Vec<SandboxId> {
        self.sandboxes.keys().cloned().collect()
    }

    pub fn sandboxes(&self) -> Vec<Sandbox> {
        self.sandboxes.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sandbox> {
        self.sandboxes.values()
    }

    pub fn clear(&mut self) {
        self.sandboxes.clear();
    }

    /// Insert-or-replace every entry; ids not in `snapshot` are kept.
    pub fn merge(&mut self, snapshot: impl IntoIterator<Item = Sandbox>) -> usize {
        let mut merged = 0;
        for sandbox in snapshot {
            self.insert(sandbox);
            merged += 1;
        }
        merged
    }

    /// Make the registry equal to `snapshot`, in snapshot order.
    pub fn replace_all(&mut self, snapshot: impl IntoIterator<Item = Sandbox>) -> Reconciliation {
        let mut next: IndexMap<SandboxId, Sandbox> = IndexMap::new();
        for sandbox in snapshot {
            next.insert(sandbox.id.clone(), sandbox);
        }

        let mut outcome = Reconciliation::default();
        for id in self.sandboxes.keys() {
            if !next.contains_key(id) {
                outcome.removed.push(id.clone());
            }
        }
        for id in next.keys() {
            if self.sandboxes.contains_key(id) {
                outcome.refreshed.push(id.clone());
            } else {
                outcome.added.push(id.clone());
            }
        }

        self.sandboxes = next;
        outcome
    }

    pub fn filter<P>(&self, mut predicate: P) -> Vec<Sandbox>
    where
        P: FnMut(&Sandbox) -> bool,
    {
        self.iter().filter(|s| predicate(s)).cloned().collect()
    }

    pub fn map<T, F>(&self, f: F) -> Vec<T>
    where
        F: FnMut(&Sandbox) -> T,
    {
        self.iter().map(f).collect()
    }

    pub fn any<P>(&self, predicate: P) -> bool
    where
        P: FnMut(&Sandbox) -> bool,
    {
        self.iter().any(predicate)
    }

    pub fn all<P>(&self, predicate: P) -> bool
    where
        P: FnMut(&Sandbox) -> bool,
    {
        self.iter().all(predicate)
    }

    /// Group sandboxes into equivalence classes by `key`. Groups appear in
    /// order of first occurrence.
    pub fn group_by<K, F>(&self, mut key: F) -> IndexMap<K, Vec<Sandbox>>
    where
        K: Hash + Eq,
        F: FnMut(&Sandbox) -> K,
    {
        let mut groups: IndexMap<K, Vec<Sandbox>> = IndexMap::new();
        for sandbox in self.iter() {
            groups.entry(key(sandbox)).or_default().push(sandbox.clone());
        }
        groups
    }
}

/// Shared handle over the live registry.
///
/// Reads go through a copy taken under the lock, so query closures never see
/// a mutation half-applied and may call back into the handle freely.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<RwLock<SandboxRegistry>>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SandboxRegistry {
        self.inner.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn contains(&self, id: &SandboxId) -> bool {
        self.inner.read().contains(id)
    }

    pub fn get(&self, id: &SandboxId) -> Option<Sandbox> {
        self.inner.read().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<SandboxId> {
        self.inner.read().ids()
    }

    pub fn sandboxes(&self) -> Vec<Sandbox> {
        self.inner.read().sandboxes()
    }

    pub fn filter<P>(&self, predicate: P) -> Vec<Sandbox>
    where
        P: FnMut(&Sandbox) -> bool,
    {
        self.snapshot().filter(predicate)
    }

    pub fn map<T, F>(&self, f: F) -> Vec<T>
    where
        F: FnMut(&Sandbox) -> T,
    {
        self.snapshot().map(f)
    }

    pub fn any<P>(&self, predicate: P) -> bool
    where
        P: FnMut(&Sandbox) -> bool,
    {
        self.snapshot().any(predicate)
    }

    pub fn all<P>(&self, predicate: P) -> bool
    where
        P: FnMut(&Sandbox) -> bool,
    {
        self.snapshot().all(predicate)
    }

    pub fn group_by<K, F>(&self, key: F) -> IndexMap<K, Vec<Sandbox>>
    where
        K: Hash + Eq,
        F: FnMut(&Sandbox) -> K,
    {
        self.snapshot().group_by(key)
    }

    /// Apply `f` atomically with respect to readers and other writers.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut SandboxRegistry) -> R) -> R {
        f(&mut self.inner.write())
    }
}
